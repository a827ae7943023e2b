//! DNSSEC Response Signing
//!
//! Signs responses as they are sent:
//! - RRSIG records for every RRset in the answer and authority sections,
//!   reused from the signature cache while they stay fresh
//! - NSEC records proving that a name or type does not exist
//! - EDNS0 OPT record advertising DNSSEC support, and the TC flag

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::denial::{self, denial_key, DenialIndex, ServiceEvent};
use super::dns_config::{DnssecConfig, MAX_UDP_SIZE, MIN_UDP_SIZE};
use super::dns_types::{
    count_labels, current_timestamp, fqdn, DnsError, DnsMessage, DnsRecord, DnsRecordType,
    DnsRecordValue, ResponseCode, Rrsig,
};
use super::dnssec_keys::{load_key_pair, DnskeyRecord, DnssecKeyError, DnssecKeyPair, SigningKey};
use super::fingerprint::Fingerprint;
use super::rrset::{group_rrsets, RRset};
use super::signature_cache::SignatureCache;
use super::single_flight::SingleFlight;
use super::wire::signed_data;

/// Types claimed by an NSEC at the zone apex
const APEX_TYPES: [DnsRecordType; 5] = [
    DnsRecordType::SOA,
    DnsRecordType::NS,
    DnsRecordType::RRSIG,
    DnsRecordType::DNSKEY,
    DnsRecordType::NSEC,
];

/// Types claimed by an NSEC below the apex
const LEAF_TYPES: [DnsRecordType; 4] = [
    DnsRecordType::A,
    DnsRecordType::AAAA,
    DnsRecordType::SRV,
    DnsRecordType::NSEC,
];

/// The identity the server signs with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerKey {
    pub algorithm: u8,
    pub key_tag: u16,
    pub signer_name: String,
    /// Zone apex, absolute and lowercased
    pub apex: String,
    pub apex_labels: usize,
}

impl ServerKey {
    pub fn new(zone: &str, algorithm: u8, key_tag: u16) -> Self {
        let apex = fqdn(zone).to_lowercase();
        Self {
            algorithm,
            key_tag,
            signer_name: apex.clone(),
            apex_labels: count_labels(&apex),
            apex,
        }
    }

    pub fn from_dnskey(dnskey: &DnskeyRecord) -> Self {
        Self::new(&dnskey.owner, dnskey.algorithm, dnskey.key_tag)
    }

    /// `label` followed by the apex; the apex itself for an empty label
    fn under_apex(&self, label: &str) -> String {
        if label.is_empty() {
            self.apex.clone()
        } else {
            format!("{}.{}", label, self.apex)
        }
    }
}

/// Online DNSSEC signer
pub struct DnssecSigner {
    key: ServerKey,
    signing_key: Arc<dyn SigningKey>,
    cache: Arc<SignatureCache>,
    flights: SingleFlight<Fingerprint, Rrsig, DnssecError>,
    denial: Arc<DenialIndex>,
    config: DnssecConfig,
}

impl DnssecSigner {
    /// Create a signer around an already loaded key.
    ///
    /// `signing_key` must produce signatures of the algorithm `key`
    /// announces in its RRSIGs.
    pub fn new(
        config: DnssecConfig,
        key: ServerKey,
        signing_key: Arc<dyn SigningKey>,
    ) -> Result<Self, DnssecError> {
        if signing_key.algorithm() != key.algorithm {
            return Err(DnssecError::InvalidConfiguration(format!(
                "key {} announces algorithm {} but signs with algorithm {}",
                key.key_tag,
                key.algorithm,
                signing_key.algorithm()
            )));
        }

        let cache = SignatureCache::with_limits(config.cache_max_entries, config.refresh_margin());
        Ok(Self {
            key,
            signing_key,
            cache: Arc::new(cache),
            flights: SingleFlight::new(),
            denial: Arc::new(DenialIndex::new()),
            config,
        })
    }

    /// Load the key named in `config` and create a signer for it
    pub fn from_config(config: DnssecConfig) -> Result<Self, DnssecError> {
        let key_path = config.key_path.clone().ok_or_else(|| {
            DnssecError::InvalidConfiguration("key_path is not set".to_string())
        })?;
        let key_pair = load_key_pair(&key_path)?;
        Self::from_key_pair(config, key_pair)
    }

    /// Create a signer for a loaded key pair, which must belong to the zone
    pub fn from_key_pair(config: DnssecConfig, key_pair: DnssecKeyPair) -> Result<Self, DnssecError> {
        let key = ServerKey::from_dnskey(key_pair.public());
        if key.apex != fqdn(&config.zone).to_lowercase() {
            return Err(DnssecError::InvalidConfiguration(format!(
                "key {} belongs to {}, not {}",
                key.key_tag, key.apex, config.zone
            )));
        }

        info!(
            "DNSSEC signer ready for {} (key tag {}, algorithm {})",
            key.apex, key.key_tag, key.algorithm
        );
        Self::new(config, key, Arc::new(key_pair))
    }

    /// Share an existing denial index instead of the signer's own
    pub fn with_denial_index(mut self, denial: Arc<DenialIndex>) -> Self {
        self.denial = denial;
        self
    }

    pub fn server_key(&self) -> &ServerKey {
        &self.key
    }

    pub fn cache(&self) -> &Arc<SignatureCache> {
        &self.cache
    }

    pub fn denial_index(&self) -> &Arc<DenialIndex> {
        &self.denial
    }

    /// Sign `msg` in place for a client advertising `bufsize`
    pub fn sign_response(&self, msg: &mut DnsMessage, bufsize: u16) {
        self.sign_response_at(msg, bufsize, current_timestamp());
    }

    /// Sign `msg` as of `now` (Unix seconds)
    pub fn sign_response_at(&self, msg: &mut DnsMessage, bufsize: u16, now: u64) {
        if is_denial(msg) {
            if let Some(question) = msg.question.first() {
                match self.new_nsec(&question.name) {
                    Ok(nsec) => msg.authority.push(nsec),
                    Err(e) => error!("Failed to build NSEC for {}: {}", question.name, e),
                }
            }
        }

        let answer_sigs = self.sign_section(&msg.answers, now);
        let authority_sigs = self.sign_section(&msg.authority, now);
        msg.answers.extend(answer_sigs);
        msg.authority.extend(authority_sigs);

        let max_size = self.max_udp_size();
        msg.additional.retain(|r| r.record_type != DnsRecordType::OPT);
        msg.additional.push(DnsRecord::new(
            ".",
            0,
            DnsRecordValue::OPT {
                udp_payload_size: max_size,
                dnssec_ok: true,
            },
        ));

        let bufsize = bufsize.clamp(MIN_UDP_SIZE, max_size);
        let len = msg.wire_len();
        msg.truncated = len > bufsize as usize;
        if msg.truncated {
            debug!("Response {} is {} bytes, client accepts {}", msg.id, len, bufsize);
        }
    }

    /// RRSIG records for every signable RRset in `section`
    fn sign_section(&self, section: &[DnsRecord], now: u64) -> Vec<DnsRecord> {
        let Some(rrsets) = group_rrsets(section) else {
            return Vec::new();
        };

        let mut signatures = Vec::with_capacity(rrsets.len());
        for rrset in &rrsets {
            if matches!(rrset.record_type(), DnsRecordType::RRSIG | DnsRecordType::OPT) {
                continue;
            }
            match self.sign_rrset(rrset, now) {
                Ok(sig) => {
                    let mut record =
                        DnsRecord::new(rrset.name(), self.config.original_ttl, DnsRecordValue::RRSIG(sig));
                    record.class = rrset.key.class;
                    signatures.push(record);
                }
                Err(e) => error!(
                    "Failed to sign {}/{}: {}",
                    rrset.name(),
                    rrset.record_type(),
                    e
                ),
            }
        }
        signatures
    }

    /// A signature for `rrset`: cached if fresh, otherwise signed once
    /// across all concurrent callers.
    pub fn sign_rrset(&self, rrset: &RRset, now: u64) -> Result<Rrsig, DnssecError> {
        let fingerprint = Fingerprint::of_rrset(rrset);
        if let Some(sig) = self.cache.get_fresh(&fingerprint, now) {
            return Ok(sig);
        }

        // The executing caller stores before waiters are released, so a
        // late caller finds the entry instead of signing again
        let flight = self.flights.execute(fingerprint, || {
            let sig = self.new_rrsig(rrset, now)?;
            self.cache.store(fingerprint, sig.clone());
            Ok(sig)
        });
        if flight.shared {
            debug!("Shared in-flight signature for {}/{}", rrset.name(), rrset.record_type());
        }
        flight.result
    }

    /// Sign `rrset` with the server key, bypassing the cache
    pub fn new_rrsig(&self, rrset: &RRset, now: u64) -> Result<Rrsig, DnssecError> {
        let inception = now.saturating_sub(self.config.inception_offset().as_secs());
        let expiration = now + self.config.validity().as_secs();

        let mut sig = Rrsig {
            type_covered: rrset.record_type(),
            algorithm: self.key.algorithm,
            labels: rrset.label_count(),
            original_ttl: self.config.original_ttl,
            // RFC 4034 timestamps are serial numbers modulo 2^32
            expiration: expiration as u32,
            inception: inception as u32,
            key_tag: self.key.key_tag,
            signer_name: self.key.signer_name.clone(),
            signature: Vec::new(),
        };

        let data = signed_data(&sig, &rrset.records);
        sig.signature = self
            .signing_key
            .sign(&data)
            .map_err(|e| DnssecError::SigningFailed(e.to_string()))?;

        debug!(
            "Signed RRset {}/{} with key {} (sig: {} bytes)",
            rrset.name(),
            rrset.record_type(),
            self.key.key_tag,
            sig.signature.len()
        );
        Ok(sig)
    }

    /// NSEC record denying `qname`
    pub fn new_nsec(&self, qname: &str) -> Result<DnsRecord, DnssecError> {
        let (key, depth) = denial_key(qname, self.key.apex_labels);
        let (prev, next) = self.denial.search(&key, depth)?;

        let types = if prev.is_empty() {
            APEX_TYPES.to_vec()
        } else {
            LEAF_TYPES.to_vec()
        };

        Ok(DnsRecord::new(
            self.key.under_apex(&prev),
            self.config.nsec_ttl,
            DnsRecordValue::NSEC {
                next_domain: self.key.under_apex(&next),
                types,
            },
        ))
    }

    /// Periodically drop stale signatures from the cache
    pub fn spawn_cache_sweeper(&self) -> JoinHandle<()> {
        Arc::clone(&self.cache).spawn_sweeper(self.config.sweep_interval())
    }

    /// Keep the denial index in step with service registrations
    pub fn spawn_event_listener(&self, events: mpsc::Receiver<ServiceEvent>) -> JoinHandle<()> {
        denial::spawn_event_listener(Arc::clone(&self.denial), events)
    }

    fn max_udp_size(&self) -> u16 {
        let configured = self.config.max_udp_size;
        let size = configured.clamp(MIN_UDP_SIZE, MAX_UDP_SIZE);
        if size != configured {
            warn!(
                "max_udp_size {} is outside {}-{}, using {}",
                configured, MIN_UDP_SIZE, MAX_UDP_SIZE, size
            );
        }
        size
    }
}

/// NXDOMAIN, or NOERROR carrying nothing but the SOA
fn is_denial(msg: &DnsMessage) -> bool {
    match msg.rcode {
        ResponseCode::NXDomain => true,
        ResponseCode::NoError => {
            msg.answers.is_empty()
                && msg.authority.len() == 1
                && msg.authority[0].record_type == DnsRecordType::SOA
        }
        _ => false,
    }
}

/// DNSSEC errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum DnssecError {
    #[error("Signing failed: {0}")]
    SigningFailed(String),

    #[error("Key error: {0}")]
    Key(#[from] DnssecKeyError),

    #[error("Denial lookup failed: {0}")]
    Denial(#[from] DnsError),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}
