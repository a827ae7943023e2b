//! Wire Format Encoding
//!
//! Just enough of RFC 1035 / RFC 4034 wire encoding to build the data an
//! RRSIG covers, encode NSEC type bitmaps, and measure a response for the
//! truncation check.

use std::collections::{BTreeMap, HashSet};

use super::dns_types::{split_labels, DnsMessage, DnsRecord, DnsRecordType, DnsRecordValue, Rrsig};

/// Fixed DNS header size
const HEADER_LEN: usize = 12;

/// Compression pointers can only address the first 16K of a message
const MAX_POINTER_OFFSET: usize = 0x3FFF;

/// Convert a domain name to canonical (lowercase, uncompressed) wire format
pub fn name_to_wire(name: &str) -> Vec<u8> {
    let mut wire = Vec::with_capacity(name.len() + 2);

    for label in split_labels(name) {
        let lower = label.to_lowercase();
        wire.push(lower.len() as u8);
        wire.extend_from_slice(lower.as_bytes());
    }

    wire.push(0); // Root label
    wire
}

/// Encode record types as an NSEC type bitmap (RFC 4034 Section 4.1.2)
pub fn types_to_bitmap(types: &[DnsRecordType]) -> Vec<u8> {
    // Window number -> 32 byte bitmap
    let mut windows: BTreeMap<u8, [u8; 32]> = BTreeMap::new();

    for rtype in types {
        let code = rtype.code();
        let window = (code >> 8) as u8;
        let offset = (code & 0xFF) as usize;
        let bitmap = windows.entry(window).or_insert([0u8; 32]);
        bitmap[offset / 8] |= 0x80 >> (offset % 8);
    }

    let mut out = Vec::new();
    for (window, bitmap) in windows {
        // Trailing zero octets are not transmitted
        let len = bitmap.iter().rposition(|b| *b != 0).map(|i| i + 1).unwrap_or(0);
        if len == 0 {
            continue;
        }
        out.push(window);
        out.push(len as u8);
        out.extend_from_slice(&bitmap[..len]);
    }
    out
}

/// RRSIG RDATA up to, but excluding, the signature field
pub fn rrsig_rdata_prefix(sig: &Rrsig) -> Vec<u8> {
    let mut rdata = Vec::with_capacity(18 + sig.signer_name.len() + 2);
    rdata.extend_from_slice(&sig.type_covered.code().to_be_bytes());
    rdata.push(sig.algorithm);
    rdata.push(sig.labels);
    rdata.extend_from_slice(&sig.original_ttl.to_be_bytes());
    rdata.extend_from_slice(&sig.expiration.to_be_bytes());
    rdata.extend_from_slice(&sig.inception.to_be_bytes());
    rdata.extend_from_slice(&sig.key_tag.to_be_bytes());
    rdata.extend_from_slice(&name_to_wire(&sig.signer_name));
    rdata
}

/// Convert a record value to canonical RDATA
pub fn rdata_to_wire(value: &DnsRecordValue) -> Vec<u8> {
    match value {
        DnsRecordValue::A(ip) => ip.octets().to_vec(),
        DnsRecordValue::AAAA(ip) => ip.octets().to_vec(),
        DnsRecordValue::CNAME(name) | DnsRecordValue::NS(name) | DnsRecordValue::PTR(name) => {
            name_to_wire(name)
        }
        DnsRecordValue::MX { preference, exchange } => {
            let mut rdata = Vec::new();
            rdata.extend_from_slice(&preference.to_be_bytes());
            rdata.extend_from_slice(&name_to_wire(exchange));
            rdata
        }
        DnsRecordValue::TXT(text) => {
            let mut rdata = Vec::new();
            // TXT records are split into 255-byte character strings
            for chunk in text.as_bytes().chunks(255) {
                rdata.push(chunk.len() as u8);
                rdata.extend_from_slice(chunk);
            }
            if rdata.is_empty() {
                rdata.push(0);
            }
            rdata
        }
        DnsRecordValue::SOA { mname, rname, serial, refresh, retry, expire, minimum } => {
            let mut rdata = Vec::new();
            rdata.extend_from_slice(&name_to_wire(mname));
            rdata.extend_from_slice(&name_to_wire(rname));
            rdata.extend_from_slice(&serial.to_be_bytes());
            rdata.extend_from_slice(&refresh.to_be_bytes());
            rdata.extend_from_slice(&retry.to_be_bytes());
            rdata.extend_from_slice(&expire.to_be_bytes());
            rdata.extend_from_slice(&minimum.to_be_bytes());
            rdata
        }
        DnsRecordValue::SRV { priority, weight, port, target } => {
            let mut rdata = Vec::new();
            rdata.extend_from_slice(&priority.to_be_bytes());
            rdata.extend_from_slice(&weight.to_be_bytes());
            rdata.extend_from_slice(&port.to_be_bytes());
            rdata.extend_from_slice(&name_to_wire(target));
            rdata
        }
        DnsRecordValue::RRSIG(sig) => {
            let mut rdata = rrsig_rdata_prefix(sig);
            rdata.extend_from_slice(&sig.signature);
            rdata
        }
        DnsRecordValue::DNSKEY { flags, protocol, algorithm, public_key } => {
            let mut rdata = Vec::with_capacity(4 + public_key.len());
            rdata.extend_from_slice(&flags.to_be_bytes());
            rdata.push(*protocol);
            rdata.push(*algorithm);
            rdata.extend_from_slice(public_key);
            rdata
        }
        DnsRecordValue::NSEC { next_domain, types } => {
            let mut rdata = name_to_wire(next_domain);
            rdata.extend_from_slice(&types_to_bitmap(types));
            rdata
        }
        DnsRecordValue::OPT { .. } => Vec::new(),
    }
}

/// Build the data an RRSIG signs (RFC 4034 Section 3.1.8.1):
/// the RRSIG RDATA prefix followed by the RRset in canonical order,
/// every record carrying the signature's original TTL.
pub fn signed_data(sig: &Rrsig, rrset: &[DnsRecord]) -> Vec<u8> {
    let mut data = rrsig_rdata_prefix(sig);

    let mut wire_records: Vec<Vec<u8>> = rrset
        .iter()
        .map(|record| {
            let rdata = rdata_to_wire(&record.value);
            let mut wire = name_to_wire(&record.name);
            wire.extend_from_slice(&record.record_type.code().to_be_bytes());
            wire.extend_from_slice(&record.class.code().to_be_bytes());
            wire.extend_from_slice(&sig.original_ttl.to_be_bytes());
            wire.extend_from_slice(&(rdata.len() as u16).to_be_bytes());
            wire.extend_from_slice(&rdata);
            wire
        })
        .collect();

    // Owner, type and class are shared, so this orders by RDATA
    wire_records.sort();
    wire_records.dedup();

    for wire in wire_records {
        data.extend_from_slice(&wire);
    }
    data
}

/// Length of a name in a message, using compression against earlier names
fn compressed_name_len(name: &str, offset: usize, seen: &mut HashSet<String>) -> usize {
    let labels = split_labels(name);
    let mut len = 0;

    for i in 0..labels.len() {
        let suffix = labels[i..].join(".").to_lowercase();
        if seen.contains(&suffix) {
            return len + 2;
        }
        if offset + len <= MAX_POINTER_OFFSET {
            seen.insert(suffix);
        }
        len += 1 + labels[i].len();
    }
    len + 1
}

fn record_len(record: &DnsRecord, offset: usize, seen: &mut HashSet<String>) -> usize {
    let owner = compressed_name_len(&record.name, offset, seen);
    // type, class, ttl, rdlength
    let fixed = owner + 10;
    let rdata_offset = offset + fixed;

    let rdata = match &record.value {
        // RFC 3597: only the well-known types may use compression in RDATA
        DnsRecordValue::CNAME(name) | DnsRecordValue::NS(name) | DnsRecordValue::PTR(name) => {
            compressed_name_len(name, rdata_offset, seen)
        }
        DnsRecordValue::MX { exchange, .. } => 2 + compressed_name_len(exchange, rdata_offset + 2, seen),
        DnsRecordValue::SOA { mname, rname, .. } => {
            let m = compressed_name_len(mname, rdata_offset, seen);
            let r = compressed_name_len(rname, rdata_offset + m, seen);
            m + r + 20
        }
        other => rdata_to_wire(other).len(),
    };
    fixed + rdata
}

/// Length of `msg` once serialized
pub fn message_len(msg: &DnsMessage) -> usize {
    let mut seen = HashSet::new();
    let mut len = HEADER_LEN;

    for question in &msg.question {
        len += compressed_name_len(&question.name, len, &mut seen) + 4;
    }
    for record in msg
        .answers
        .iter()
        .chain(msg.authority.iter())
        .chain(msg.additional.iter())
    {
        len += record_len(record, len, &mut seen);
    }
    len
}
