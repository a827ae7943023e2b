//! RRset Fingerprints
//!
//! A fingerprint identifies an RRset by owner, type and RDATA. It keys both
//! the signature cache and the single-flight coordinator. TTLs never
//! contribute, so a TTL change alone does not invalidate a cached signature.
//! SOA records only contribute their serial; every other type contributes
//! its canonical RDATA.

use std::fmt;

use sha2::{Digest, Sha256};

use super::dns_types::{DnsRecord, DnsRecordValue};
use super::rrset::RRset;
use super::wire::rdata_to_wire;

/// SHA-256 digest of an RRset's identity and relevant RDATA
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Fingerprint an RRset
    pub fn of_rrset(rrset: &RRset) -> Self {
        Self::of_records(&rrset.key.name, rrset.key.record_type.code(), &rrset.records)
    }

    /// Fingerprint records sharing `name` and type `rtype`
    pub fn of_records(name: &str, rtype: u16, records: &[DnsRecord]) -> Self {
        let mut hasher = Sha256::new();

        let name = name.to_lowercase();
        hasher.update((name.len() as u16).to_be_bytes());
        hasher.update(name.as_bytes());
        hasher.update(rtype.to_be_bytes());

        for record in records {
            match &record.value {
                // Only the serial moves while we are running
                DnsRecordValue::SOA { serial, .. } => hasher.update(serial.to_be_bytes()),
                DnsRecordValue::SRV { priority, weight, port, target } => {
                    hasher.update(priority.to_be_bytes());
                    hasher.update(weight.to_be_bytes());
                    hasher.update(port.to_be_bytes());
                    let target = target.to_lowercase();
                    hasher.update((target.len() as u16).to_be_bytes());
                    hasher.update(target.as_bytes());
                }
                DnsRecordValue::A(ip) => hasher.update(ip.octets()),
                DnsRecordValue::AAAA(ip) => hasher.update(ip.octets()),
                // NSEC next names move with the denial index
                other => {
                    let rdata = rdata_to_wire(other);
                    hasher.update((rdata.len() as u16).to_be_bytes());
                    hasher.update(&rdata);
                }
            }
        }

        Self(hasher.finalize().into())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form is enough to tell entries apart in logs
        write!(f, "Fingerprint({})", &hex::encode(&self.0[..8]))
    }
}
