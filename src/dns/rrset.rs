//! RRset Grouping
//!
//! Partitions the records of a response section into RRsets, the unit a
//! single RRSIG covers.

use std::collections::HashMap;

use super::dns_types::{count_labels, DnsClass, DnsRecord, DnsRecordType};

/// Identity of an RRset: owner name, class and type
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RRsetKey {
    pub name: String,
    pub class: DnsClass,
    pub record_type: DnsRecordType,
}

impl RRsetKey {
    fn of(record: &DnsRecord) -> Self {
        Self {
            // Owner names compare case-insensitively
            name: record.name.to_lowercase(),
            class: record.class,
            record_type: record.record_type,
        }
    }
}

/// An RRset (Resource Record Set) - records with same name, class and type
#[derive(Debug, Clone, PartialEq)]
pub struct RRset {
    pub key: RRsetKey,
    /// Records in the order they appeared in the section
    pub records: Vec<DnsRecord>,
}

impl RRset {
    /// Owner name as it appeared on the first record
    pub fn name(&self) -> &str {
        self.records
            .first()
            .map(|r| r.name.as_str())
            .unwrap_or(&self.key.name)
    }

    pub fn record_type(&self) -> DnsRecordType {
        self.key.record_type
    }

    /// Get the number of labels in the owner name
    pub fn label_count(&self) -> u8 {
        count_labels(&self.key.name).min(u8::MAX as usize) as u8
    }
}

/// Group records into RRsets.
///
/// Returns `None` for an empty section so callers can skip signing. Groups
/// come back in the order their first record appeared.
pub fn group_rrsets(records: &[DnsRecord]) -> Option<Vec<RRset>> {
    if records.is_empty() {
        return None;
    }

    let mut index: HashMap<RRsetKey, usize> = HashMap::new();
    let mut rrsets: Vec<RRset> = Vec::new();

    for record in records {
        let key = RRsetKey::of(record);
        match index.get(&key) {
            Some(&i) => rrsets[i].records.push(record.clone()),
            None => {
                index.insert(key.clone(), rrsets.len());
                rrsets.push(RRset {
                    key,
                    records: vec![record.clone()],
                });
            }
        }
    }

    Some(rrsets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_empty_section_yields_none() {
        assert!(group_rrsets(&[]).is_none());
    }

    #[test]
    fn test_group_into_rrsets() {
        let records = vec![
            DnsRecord::a("www.example.com", Ipv4Addr::new(192, 168, 1, 1), 300),
            DnsRecord::ns("example.com", "ns1.example.com", 3600),
            DnsRecord::a("www.example.com", Ipv4Addr::new(192, 168, 1, 2), 300),
            DnsRecord::ns("example.com", "ns2.example.com", 3600),
            DnsRecord::a("www.example.com", Ipv4Addr::new(192, 168, 1, 3), 300),
        ];

        let rrsets = group_rrsets(&records).unwrap();

        // Should have 2 RRsets: A and NS
        assert_eq!(rrsets.len(), 2);
        assert_eq!(rrsets[0].record_type(), DnsRecordType::A);
        assert_eq!(rrsets[0].records.len(), 3);
        assert_eq!(rrsets[1].record_type(), DnsRecordType::NS);
        assert_eq!(rrsets[1].records.len(), 2);
    }

    #[test]
    fn test_every_record_lands_in_exactly_one_group() {
        let records: Vec<DnsRecord> = (0..10u8)
            .map(|i| DnsRecord::a(format!("h{}.example.com", i % 3), Ipv4Addr::new(10, 0, 0, i), 60))
            .collect();

        let rrsets = group_rrsets(&records).unwrap();
        let total: usize = rrsets.iter().map(|s| s.records.len()).sum();
        assert_eq!(total, records.len());
        assert_eq!(rrsets.len(), 3);
    }

    #[test]
    fn test_grouping_preserves_record_order() {
        let records = vec![
            DnsRecord::a("www.example.com", Ipv4Addr::new(10, 0, 0, 3), 60),
            DnsRecord::a("www.example.com", Ipv4Addr::new(10, 0, 0, 1), 60),
            DnsRecord::a("www.example.com", Ipv4Addr::new(10, 0, 0, 2), 60),
        ];
        let rrsets = group_rrsets(&records).unwrap();
        assert_eq!(rrsets[0].records, records);
    }

    #[test]
    fn test_owner_name_case_is_ignored() {
        let records = vec![
            DnsRecord::a("WWW.Example.com", Ipv4Addr::new(10, 0, 0, 1), 60),
            DnsRecord::a("www.example.com", Ipv4Addr::new(10, 0, 0, 2), 60),
        ];
        let rrsets = group_rrsets(&records).unwrap();
        assert_eq!(rrsets.len(), 1);
        assert_eq!(rrsets[0].name(), "WWW.Example.com.");
    }

    #[test]
    fn test_rrset_label_count() {
        let records = vec![DnsRecord::a("www.example.com", Ipv4Addr::new(10, 0, 0, 1), 60)];
        let rrsets = group_rrsets(&records).unwrap();
        assert_eq!(rrsets[0].label_count(), 3);
    }
}
