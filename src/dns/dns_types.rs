//! DNS Record Type Definitions
//!
//! The record model the signer works on: record types, record values,
//! whole records and the response message whose sections get signed.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

/// DNS record types the signer understands
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "UPPERCASE")]
pub enum DnsRecordType {
    /// IPv4 address record
    A,
    /// Name server
    NS,
    /// Canonical name (alias)
    CNAME,
    /// Start of authority
    SOA,
    /// Pointer record (reverse DNS)
    PTR,
    /// Mail exchange
    MX,
    /// Text record
    TXT,
    /// IPv6 address record
    AAAA,
    /// Service location
    SRV,
    /// EDNS0 pseudo-record
    OPT,
    /// Delegation signer
    DS,
    /// DNSSEC signature
    RRSIG,
    /// Next secure record
    NSEC,
    /// DNSSEC key
    DNSKEY,
}

impl DnsRecordType {
    /// IANA type number
    pub fn code(&self) -> u16 {
        match self {
            DnsRecordType::A => 1,
            DnsRecordType::NS => 2,
            DnsRecordType::CNAME => 5,
            DnsRecordType::SOA => 6,
            DnsRecordType::PTR => 12,
            DnsRecordType::MX => 15,
            DnsRecordType::TXT => 16,
            DnsRecordType::AAAA => 28,
            DnsRecordType::SRV => 33,
            DnsRecordType::OPT => 41,
            DnsRecordType::DS => 43,
            DnsRecordType::RRSIG => 46,
            DnsRecordType::NSEC => 47,
            DnsRecordType::DNSKEY => 48,
        }
    }

    /// Parse from an IANA type number
    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            1 => Some(DnsRecordType::A),
            2 => Some(DnsRecordType::NS),
            5 => Some(DnsRecordType::CNAME),
            6 => Some(DnsRecordType::SOA),
            12 => Some(DnsRecordType::PTR),
            15 => Some(DnsRecordType::MX),
            16 => Some(DnsRecordType::TXT),
            28 => Some(DnsRecordType::AAAA),
            33 => Some(DnsRecordType::SRV),
            41 => Some(DnsRecordType::OPT),
            43 => Some(DnsRecordType::DS),
            46 => Some(DnsRecordType::RRSIG),
            47 => Some(DnsRecordType::NSEC),
            48 => Some(DnsRecordType::DNSKEY),
            _ => None,
        }
    }
}

impl fmt::Display for DnsRecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DnsRecordType::A => "A",
            DnsRecordType::NS => "NS",
            DnsRecordType::CNAME => "CNAME",
            DnsRecordType::SOA => "SOA",
            DnsRecordType::PTR => "PTR",
            DnsRecordType::MX => "MX",
            DnsRecordType::TXT => "TXT",
            DnsRecordType::AAAA => "AAAA",
            DnsRecordType::SRV => "SRV",
            DnsRecordType::OPT => "OPT",
            DnsRecordType::DS => "DS",
            DnsRecordType::RRSIG => "RRSIG",
            DnsRecordType::NSEC => "NSEC",
            DnsRecordType::DNSKEY => "DNSKEY",
        };
        f.write_str(name)
    }
}

impl FromStr for DnsRecordType {
    type Err = DnsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "A" => Ok(DnsRecordType::A),
            "NS" => Ok(DnsRecordType::NS),
            "CNAME" => Ok(DnsRecordType::CNAME),
            "SOA" => Ok(DnsRecordType::SOA),
            "PTR" => Ok(DnsRecordType::PTR),
            "MX" => Ok(DnsRecordType::MX),
            "TXT" => Ok(DnsRecordType::TXT),
            "AAAA" => Ok(DnsRecordType::AAAA),
            "SRV" => Ok(DnsRecordType::SRV),
            "OPT" => Ok(DnsRecordType::OPT),
            "DS" => Ok(DnsRecordType::DS),
            "RRSIG" => Ok(DnsRecordType::RRSIG),
            "NSEC" => Ok(DnsRecordType::NSEC),
            "DNSKEY" => Ok(DnsRecordType::DNSKEY),
            _ => Err(DnsError::InvalidRecordType(s.to_string())),
        }
    }
}

/// DNS class
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum DnsClass {
    /// Internet
    IN,
    /// Chaos
    CH,
    /// Hesiod
    HS,
}

impl DnsClass {
    pub fn code(&self) -> u16 {
        match self {
            DnsClass::IN => 1,
            DnsClass::CH => 3,
            DnsClass::HS => 4,
        }
    }
}

impl Default for DnsClass {
    fn default() -> Self {
        DnsClass::IN
    }
}

/// RRSIG RDATA (RFC 4034 Section 3.1)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Rrsig {
    pub type_covered: DnsRecordType,
    pub algorithm: u8,
    pub labels: u8,
    pub original_ttl: u32,
    pub expiration: u32,
    pub inception: u32,
    pub key_tag: u16,
    pub signer_name: String,
    pub signature: Vec<u8>,
}

/// Values for different DNS record types
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data")]
pub enum DnsRecordValue {
    /// IPv4 address
    A(Ipv4Addr),
    /// IPv6 address
    AAAA(Ipv6Addr),
    /// Canonical name
    CNAME(String),
    /// Mail exchange
    MX { preference: u16, exchange: String },
    /// Text record
    TXT(String),
    /// Name server
    NS(String),
    /// Start of authority
    SOA {
        /// Primary nameserver
        mname: String,
        /// Admin email (with . instead of @)
        rname: String,
        /// Serial number
        serial: u32,
        /// Refresh interval (seconds)
        refresh: u32,
        /// Retry interval (seconds)
        retry: u32,
        /// Expire time (seconds)
        expire: u32,
        /// Minimum TTL (seconds)
        minimum: u32,
    },
    /// Service location
    SRV {
        priority: u16,
        weight: u16,
        port: u16,
        target: String,
    },
    /// Pointer record
    PTR(String),
    /// DNSSEC signature
    RRSIG(Rrsig),
    /// DNSSEC public key
    DNSKEY {
        flags: u16,
        protocol: u8,
        algorithm: u8,
        public_key: Vec<u8>,
    },
    /// Next secure record
    NSEC {
        next_domain: String,
        types: Vec<DnsRecordType>,
    },
    /// EDNS0 options header
    OPT {
        udp_payload_size: u16,
        dnssec_ok: bool,
    },
}

impl DnsRecordValue {
    /// Get the record type for this value
    pub fn record_type(&self) -> DnsRecordType {
        match self {
            DnsRecordValue::A(_) => DnsRecordType::A,
            DnsRecordValue::AAAA(_) => DnsRecordType::AAAA,
            DnsRecordValue::CNAME(_) => DnsRecordType::CNAME,
            DnsRecordValue::MX { .. } => DnsRecordType::MX,
            DnsRecordValue::TXT(_) => DnsRecordType::TXT,
            DnsRecordValue::NS(_) => DnsRecordType::NS,
            DnsRecordValue::SOA { .. } => DnsRecordType::SOA,
            DnsRecordValue::SRV { .. } => DnsRecordType::SRV,
            DnsRecordValue::PTR(_) => DnsRecordType::PTR,
            DnsRecordValue::RRSIG(_) => DnsRecordType::RRSIG,
            DnsRecordValue::DNSKEY { .. } => DnsRecordType::DNSKEY,
            DnsRecordValue::NSEC { .. } => DnsRecordType::NSEC,
            DnsRecordValue::OPT { .. } => DnsRecordType::OPT,
        }
    }
}

/// A DNS resource record. Owner names are absolute (`www.example.com.`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DnsRecord {
    pub name: String,
    #[serde(default)]
    pub class: DnsClass,
    pub record_type: DnsRecordType,
    pub ttl: u32,
    pub value: DnsRecordValue,
}

impl DnsRecord {
    /// Create a new IN-class record; the type follows from the value
    pub fn new(name: impl Into<String>, ttl: u32, value: DnsRecordValue) -> Self {
        Self {
            name: fqdn(&name.into()),
            class: DnsClass::IN,
            record_type: value.record_type(),
            ttl,
            value,
        }
    }

    /// Create an A record
    pub fn a(name: impl Into<String>, ip: Ipv4Addr, ttl: u32) -> Self {
        Self::new(name, ttl, DnsRecordValue::A(ip))
    }

    /// Create an AAAA record
    pub fn aaaa(name: impl Into<String>, ip: Ipv6Addr, ttl: u32) -> Self {
        Self::new(name, ttl, DnsRecordValue::AAAA(ip))
    }

    /// Create a CNAME record
    pub fn cname(name: impl Into<String>, target: impl Into<String>, ttl: u32) -> Self {
        Self::new(name, ttl, DnsRecordValue::CNAME(fqdn(&target.into())))
    }

    /// Create an NS record
    pub fn ns(name: impl Into<String>, nameserver: impl Into<String>, ttl: u32) -> Self {
        Self::new(name, ttl, DnsRecordValue::NS(fqdn(&nameserver.into())))
    }

    /// Create a TXT record
    pub fn txt(name: impl Into<String>, text: impl Into<String>, ttl: u32) -> Self {
        Self::new(name, ttl, DnsRecordValue::TXT(text.into()))
    }

    /// Create an SRV record
    pub fn srv(
        name: impl Into<String>,
        priority: u16,
        weight: u16,
        port: u16,
        target: impl Into<String>,
        ttl: u32,
    ) -> Self {
        Self::new(
            name,
            ttl,
            DnsRecordValue::SRV {
                priority,
                weight,
                port,
                target: fqdn(&target.into()),
            },
        )
    }

    /// Create an SOA record with conventional timers
    pub fn soa(name: impl Into<String>, mname: impl Into<String>, rname: impl Into<String>, serial: u32, ttl: u32) -> Self {
        Self::new(
            name,
            ttl,
            DnsRecordValue::SOA {
                mname: fqdn(&mname.into()),
                rname: fqdn(&rname.into()),
                serial,
                refresh: 28800,
                retry: 7200,
                expire: 604800,
                minimum: 60,
            },
        )
    }

    /// Get the signature if this is an RRSIG record
    pub fn rrsig(&self) -> Option<&Rrsig> {
        match &self.value {
            DnsRecordValue::RRSIG(sig) => Some(sig),
            _ => None,
        }
    }
}

/// Make a name absolute by appending the root label
pub fn fqdn(name: &str) -> String {
    if name.ends_with('.') {
        name.to_string()
    } else {
        format!("{}.", name)
    }
}

/// Split a name into its labels, ignoring the root
pub fn split_labels(name: &str) -> Vec<&str> {
    name.split('.').filter(|l| !l.is_empty()).collect()
}

/// Count labels in a domain name
pub fn count_labels(name: &str) -> usize {
    split_labels(name).len()
}

/// Seconds since the Unix epoch, the time base of RRSIG timestamps
pub fn current_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Response codes used by the signer
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ResponseCode {
    NoError,
    FormErr,
    ServFail,
    NXDomain,
    NotImp,
    Refused,
}

impl ResponseCode {
    pub fn code(&self) -> u8 {
        match self {
            ResponseCode::NoError => 0,
            ResponseCode::FormErr => 1,
            ResponseCode::ServFail => 2,
            ResponseCode::NXDomain => 3,
            ResponseCode::NotImp => 4,
            ResponseCode::Refused => 5,
        }
    }
}

/// Question section entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Question {
    pub name: String,
    pub qtype: DnsRecordType,
    #[serde(default)]
    pub qclass: DnsClass,
}

impl Question {
    pub fn new(name: impl Into<String>, qtype: DnsRecordType) -> Self {
        Self {
            name: fqdn(&name.into()),
            qtype,
            qclass: DnsClass::IN,
        }
    }
}

/// An outgoing DNS response
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DnsMessage {
    pub id: u16,
    pub rcode: ResponseCode,
    pub authoritative: bool,
    pub truncated: bool,
    pub question: Vec<Question>,
    pub answers: Vec<DnsRecord>,
    pub authority: Vec<DnsRecord>,
    pub additional: Vec<DnsRecord>,
}

impl DnsMessage {
    /// Create an empty authoritative response to `question`
    pub fn response(id: u16, question: Question) -> Self {
        Self {
            id,
            rcode: ResponseCode::NoError,
            authoritative: true,
            truncated: false,
            question: vec![question],
            answers: Vec::new(),
            authority: Vec::new(),
            additional: Vec::new(),
        }
    }

    /// Length of the message in wire format
    pub fn wire_len(&self) -> usize {
        super::wire::message_len(self)
    }

    /// The EDNS0 OPT record, if one was attached
    pub fn opt(&self) -> Option<&DnsRecord> {
        self.additional
            .iter()
            .find(|r| r.record_type == DnsRecordType::OPT)
    }

    /// All RRSIG records in the answer and authority sections
    pub fn signatures(&self) -> Vec<&Rrsig> {
        self.answers
            .iter()
            .chain(self.authority.iter())
            .filter_map(DnsRecord::rrsig)
            .collect()
    }
}

/// DNS-specific errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum DnsError {
    #[error("Invalid record type: {0}")]
    InvalidRecordType(String),

    #[error("Invalid denial depth: {0} (expected 1-4)")]
    InvalidDenialDepth(usize),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}
