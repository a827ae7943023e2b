//! DNSSEC Key Material
//!
//! Loads the zone signing key from a BIND style key pair (`<base>.key` with
//! the DNSKEY record, `<base>.private` with the private key), and generates
//! new ones. Only Ed25519 (algorithm 15) keys can sign.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use ring::rand::{SecureRandom, SystemRandom};
use ring::signature::{Ed25519KeyPair, KeyPair};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};
use zeroize::Zeroizing;

use super::dns_types::{fqdn, DnsRecord, DnsRecordValue};
use super::wire::name_to_wire;

/// DNSSEC algorithm identifiers (RFC 8624)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DnssecAlgorithm {
    /// RSA/SHA-256 (Algorithm 8)
    RsaSha256 = 8,
    /// ECDSA P-256 with SHA-256 (Algorithm 13)
    EcdsaP256Sha256 = 13,
    /// Ed25519 (Algorithm 15)
    Ed25519 = 15,
}

impl DnssecAlgorithm {
    /// Get the algorithm number
    pub fn number(&self) -> u8 {
        *self as u8
    }

    /// Get algorithm mnemonic
    pub fn name(&self) -> &'static str {
        match self {
            DnssecAlgorithm::RsaSha256 => "RSASHA256",
            DnssecAlgorithm::EcdsaP256Sha256 => "ECDSAP256SHA256",
            DnssecAlgorithm::Ed25519 => "ED25519",
        }
    }

    /// Parse from algorithm number
    pub fn from_number(num: u8) -> Option<Self> {
        match num {
            8 => Some(DnssecAlgorithm::RsaSha256),
            13 => Some(DnssecAlgorithm::EcdsaP256Sha256),
            15 => Some(DnssecAlgorithm::Ed25519),
            _ => None,
        }
    }
}

impl Default for DnssecAlgorithm {
    fn default() -> Self {
        DnssecAlgorithm::Ed25519
    }
}

/// Key flags for DNSKEY records
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyFlags {
    /// Zone Signing Key (256)
    Zsk = 256,
    /// Key Signing Key (257)
    Ksk = 257,
}

impl KeyFlags {
    pub fn value(&self) -> u16 {
        *self as u16
    }
}

/// Something that can produce DNSSEC signatures
pub trait SigningKey: Send + Sync {
    /// DNSSEC algorithm number of the signatures
    fn algorithm(&self) -> u8;

    /// Sign `data`
    fn sign(&self, data: &[u8]) -> Result<Vec<u8>, DnssecKeyError>;
}

/// Public half of a key: the DNSKEY record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnskeyRecord {
    /// Owner name, the zone apex
    pub owner: String,
    pub flags: u16,
    pub algorithm: u8,
    pub public_key: Vec<u8>,
    pub key_tag: u16,
}

impl DnskeyRecord {
    pub fn new(owner: &str, flags: u16, algorithm: u8, public_key: Vec<u8>) -> Self {
        let key_tag = calculate_key_tag(flags, algorithm, &public_key);
        Self {
            owner: fqdn(owner),
            flags,
            algorithm,
            public_key,
            key_tag,
        }
    }

    /// Check if this is a Key Signing Key (KSK)
    pub fn is_ksk(&self) -> bool {
        self.flags == KeyFlags::Ksk.value()
    }

    /// Get DNSKEY RDATA
    pub fn to_rdata(&self) -> Vec<u8> {
        let mut rdata = Vec::with_capacity(4 + self.public_key.len());
        rdata.extend_from_slice(&self.flags.to_be_bytes());
        rdata.push(3); // Protocol is always 3
        rdata.push(self.algorithm);
        rdata.extend_from_slice(&self.public_key);
        rdata
    }

    /// The DNSKEY as a record, for answering DNSKEY queries
    pub fn to_record(&self, ttl: u32) -> DnsRecord {
        DnsRecord::new(
            self.owner.clone(),
            ttl,
            DnsRecordValue::DNSKEY {
                flags: self.flags,
                protocol: 3,
                algorithm: self.algorithm,
                public_key: self.public_key.clone(),
            },
        )
    }

    /// Format as zone file record
    pub fn to_zone_format(&self) -> String {
        format!(
            "{} IN DNSKEY {} 3 {} {}",
            self.owner,
            self.flags,
            self.algorithm,
            STANDARD.encode(&self.public_key)
        )
    }

    /// Parse the DNSKEY line of a `.key` file
    pub fn parse(content: &str) -> Result<Self, DnssecKeyError> {
        for line in content.lines() {
            let line = line.split(';').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let tokens: Vec<&str> = line.split_whitespace().collect();
            let Some(pos) = tokens.iter().position(|t| t.eq_ignore_ascii_case("DNSKEY")) else {
                continue;
            };
            if pos == 0 || tokens.len() < pos + 5 {
                return Err(DnssecKeyError::InvalidKeyData(format!("short DNSKEY line: {}", line)));
            }

            let flags = parse_field::<u16>(tokens[pos + 1], "flags")?;
            let protocol = parse_field::<u8>(tokens[pos + 2], "protocol")?;
            if protocol != 3 {
                return Err(DnssecKeyError::InvalidKeyData(format!("protocol {} is not 3", protocol)));
            }
            let algorithm = parse_field::<u8>(tokens[pos + 3], "algorithm")?;
            let public_key = STANDARD
                .decode(tokens[pos + 4..].concat())
                .map_err(|e| DnssecKeyError::InvalidKeyData(format!("public key: {}", e)))?;

            return Ok(Self::new(tokens[0], flags, algorithm, public_key));
        }
        Err(DnssecKeyError::InvalidKeyData("no DNSKEY record found".to_string()))
    }

    /// Generate a DS record (SHA-256) for registrar submission
    pub fn to_ds(&self) -> DsRecord {
        let mut hasher = Sha256::new();
        // DS digest = SHA-256(owner name || DNSKEY RDATA)
        hasher.update(name_to_wire(&self.owner));
        hasher.update(self.to_rdata());

        DsRecord {
            key_tag: self.key_tag,
            algorithm: self.algorithm,
            digest_type: 2,
            digest: hasher.finalize().to_vec(),
        }
    }
}

fn parse_field<T: std::str::FromStr>(token: &str, field: &str) -> Result<T, DnssecKeyError> {
    token
        .parse()
        .map_err(|_| DnssecKeyError::InvalidKeyData(format!("bad {}: {}", field, token)))
}

/// DS (Delegation Signer) record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DsRecord {
    pub key_tag: u16,
    pub algorithm: u8,
    pub digest_type: u8,
    pub digest: Vec<u8>,
}

impl DsRecord {
    /// Format as zone file record
    pub fn to_zone_format(&self, domain: &str) -> String {
        format!(
            "{} IN DS {} {} {} {}",
            fqdn(domain),
            self.key_tag,
            self.algorithm,
            self.digest_type,
            hex::encode(&self.digest).to_uppercase()
        )
    }
}

/// An Ed25519 zone key: the DNSKEY plus its private seed
pub struct DnssecKeyPair {
    public: DnskeyRecord,
    seed: Zeroizing<[u8; 32]>,
    key_pair: Ed25519KeyPair,
}

impl DnssecKeyPair {
    /// Generate a fresh Ed25519 key for `zone`
    pub fn generate(zone: &str, flags: KeyFlags) -> Result<Self, DnssecKeyError> {
        let rng = SystemRandom::new();
        let mut seed = Zeroizing::new([0u8; 32]);
        rng.fill(&mut seed[..])
            .map_err(|_| DnssecKeyError::KeyGenerationFailed)?;

        let key_pair = Ed25519KeyPair::from_seed_unchecked(&seed[..])
            .map_err(|_| DnssecKeyError::KeyGenerationFailed)?;
        let public = DnskeyRecord::new(
            zone,
            flags.value(),
            DnssecAlgorithm::Ed25519.number(),
            key_pair.public_key().as_ref().to_vec(),
        );

        info!(
            "Generated {} for {} (tag: {})",
            if public.is_ksk() { "KSK" } else { "ZSK" },
            public.owner,
            public.key_tag
        );

        Ok(Self { public, seed, key_pair })
    }

    /// Combine a DNSKEY with its private seed, checking that they match
    pub fn from_parts(public: DnskeyRecord, seed: &[u8]) -> Result<Self, DnssecKeyError> {
        if public.algorithm != DnssecAlgorithm::Ed25519.number() {
            return Err(DnssecKeyError::UnsupportedAlgorithm(public.algorithm));
        }
        let seed: [u8; 32] = seed
            .try_into()
            .map_err(|_| DnssecKeyError::InvalidKeyData(format!("seed is {} bytes, expected 32", seed.len())))?;
        let seed = Zeroizing::new(seed);

        let key_pair = Ed25519KeyPair::from_seed_and_public_key(&seed[..], &public.public_key)
            .map_err(|_| DnssecKeyError::InvalidKeyData("private key does not match DNSKEY".to_string()))?;

        Ok(Self { public, seed, key_pair })
    }

    /// Read `<base>.key` and `<base>.private`
    pub fn load(base: impl AsRef<Path>) -> Result<Self, DnssecKeyError> {
        let (key_path, private_path) = key_file_paths(base.as_ref());

        let public = DnskeyRecord::parse(&read_file(&key_path)?)?;
        let private = Zeroizing::new(read_file(&private_path)?);
        let seed = parse_private_key(&private, public.algorithm)?;
        let pair = Self::from_parts(public, &seed)?;

        info!(
            "Loaded DNSSEC key for {} (tag: {}, algorithm: {}) from {}",
            pair.public.owner,
            pair.public.key_tag,
            pair.public.algorithm,
            key_path.display()
        );
        Ok(pair)
    }

    /// Write `<base>.key` and `<base>.private`
    pub fn save(&self, base: impl AsRef<Path>) -> Result<(), DnssecKeyError> {
        let (key_path, private_path) = key_file_paths(base.as_ref());

        let key_file = format!(
            "; This is a {}, keyid {}, for {}\n{}\n",
            if self.public.is_ksk() { "key-signing key" } else { "zone-signing key" },
            self.public.key_tag,
            self.public.owner,
            self.public.to_zone_format()
        );
        let private_file = Zeroizing::new(format!(
            "Private-key-format: v1.3\nAlgorithm: {} ({})\nPrivateKey: {}\n",
            DnssecAlgorithm::Ed25519.number(),
            DnssecAlgorithm::Ed25519.name(),
            STANDARD.encode(&self.seed[..])
        ));

        write_file(&key_path, &key_file)?;
        write_file(&private_path, &private_file)?;
        debug!("Saved key {} to {}", self.public.key_tag, key_path.display());
        Ok(())
    }

    /// The public DNSKEY
    pub fn public(&self) -> &DnskeyRecord {
        &self.public
    }
}

impl SigningKey for DnssecKeyPair {
    fn algorithm(&self) -> u8 {
        self.public.algorithm
    }

    fn sign(&self, data: &[u8]) -> Result<Vec<u8>, DnssecKeyError> {
        Ok(self.key_pair.sign(data).as_ref().to_vec())
    }
}

impl fmt::Debug for DnssecKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DnssecKeyPair")
            .field("public", &self.public)
            .finish_non_exhaustive()
    }
}

/// Load the key pair named by `base`; failures are fatal at startup
pub fn load_key_pair(base: impl AsRef<Path>) -> Result<DnssecKeyPair, DnssecKeyError> {
    DnssecKeyPair::load(base)
}

fn key_file_paths(base: &Path) -> (PathBuf, PathBuf) {
    let base = base.as_os_str().to_string_lossy();
    (
        PathBuf::from(format!("{}.key", base)),
        PathBuf::from(format!("{}.private", base)),
    )
}

fn read_file(path: &Path) -> Result<String, DnssecKeyError> {
    fs::read_to_string(path)
        .map_err(|e| DnssecKeyError::StorageError(format!("{}: {}", path.display(), e)))
}

fn write_file(path: &Path, content: &str) -> Result<(), DnssecKeyError> {
    fs::write(path, content)
        .map_err(|e| DnssecKeyError::StorageError(format!("{}: {}", path.display(), e)))
}

/// Extract the private key bytes from a BIND `Private-key-format` file
fn parse_private_key(content: &str, algorithm: u8) -> Result<Zeroizing<Vec<u8>>, DnssecKeyError> {
    let mut file_algorithm = None;
    let mut private_key = None;

    for line in content.lines() {
        let Some((field, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match field.trim() {
            "Algorithm" => {
                let number = value.split_whitespace().next().unwrap_or("");
                file_algorithm = Some(parse_field::<u8>(number, "algorithm")?);
            }
            "PrivateKey" => {
                let bytes = STANDARD
                    .decode(value)
                    .map_err(|e| DnssecKeyError::InvalidKeyData(format!("private key: {}", e)))?;
                private_key = Some(Zeroizing::new(bytes));
            }
            _ => {}
        }
    }

    match file_algorithm {
        Some(found) if found != algorithm => {
            return Err(DnssecKeyError::InvalidKeyData(format!(
                "private key algorithm {} does not match DNSKEY algorithm {}",
                found, algorithm
            )))
        }
        Some(_) => {}
        None => return Err(DnssecKeyError::InvalidKeyData("missing Algorithm field".to_string())),
    }
    if DnssecAlgorithm::from_number(algorithm) != Some(DnssecAlgorithm::Ed25519) {
        return Err(DnssecKeyError::UnsupportedAlgorithm(algorithm));
    }

    private_key.ok_or_else(|| DnssecKeyError::InvalidKeyData("missing PrivateKey field".to_string()))
}

/// Calculate DNSKEY key tag per RFC 4034 Appendix B
pub fn calculate_key_tag(flags: u16, algorithm: u8, public_key: &[u8]) -> u16 {
    let mut ac: u32 = 0;

    // DNSKEY RDATA format: flags (2) + protocol (1) + algorithm (1) + public key
    let mut rdata = Vec::with_capacity(4 + public_key.len());
    rdata.extend_from_slice(&flags.to_be_bytes());
    rdata.push(3);
    rdata.push(algorithm);
    rdata.extend_from_slice(public_key);

    for (i, byte) in rdata.iter().enumerate() {
        if i % 2 == 0 {
            ac += (*byte as u32) << 8;
        } else {
            ac += *byte as u32;
        }
    }

    ac += (ac >> 16) & 0xFFFF;
    (ac & 0xFFFF) as u16
}

/// DNSSEC Key errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum DnssecKeyError {
    #[error("Key generation failed")]
    KeyGenerationFailed,

    #[error("Invalid key data: {0}")]
    InvalidKeyData(String),

    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(u8),

    #[error("Signing failed: {0}")]
    SigningFailed(String),

    #[error("Storage error: {0}")]
    StorageError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use ring::signature::{UnparsedPublicKey, ED25519};

    #[test]
    fn test_dnssec_algorithm_number() {
        assert_eq!(DnssecAlgorithm::RsaSha256.number(), 8);
        assert_eq!(DnssecAlgorithm::EcdsaP256Sha256.number(), 13);
        assert_eq!(DnssecAlgorithm::Ed25519.number(), 15);
        assert_eq!(DnssecAlgorithm::from_number(99), None);
    }

    #[test]
    fn test_key_flags() {
        assert_eq!(KeyFlags::Zsk.value(), 256);
        assert_eq!(KeyFlags::Ksk.value(), 257);
    }

    #[test]
    fn test_generate_ed25519_key() {
        let key = DnssecKeyPair::generate("skydns.local", KeyFlags::Zsk).unwrap();
        let public = key.public();

        assert_eq!(public.owner, "skydns.local.");
        assert_eq!(public.algorithm, 15);
        assert_eq!(public.flags, 256);
        assert!(!public.is_ksk());
        assert_eq!(public.public_key.len(), 32);
        assert_eq!(
            public.key_tag,
            calculate_key_tag(public.flags, public.algorithm, &public.public_key)
        );
    }

    #[test]
    fn test_signature_verifies() {
        let key = DnssecKeyPair::generate("skydns.local", KeyFlags::Zsk).unwrap();
        let signature = key.sign(b"rrset data").unwrap();
        assert_eq!(signature.len(), 64);

        let verifier = UnparsedPublicKey::new(&ED25519, &key.public().public_key);
        assert!(verifier.verify(b"rrset data", &signature).is_ok());
    }

    #[test]
    fn test_key_tag_rfc4034_style_sum() {
        // flags 256, protocol 3, algorithm 15, key [0x00, 0x01]:
        // 0x0100 + 0x030F + 0x0001 = 0x0410
        assert_eq!(calculate_key_tag(256, 15, &[0x00, 0x01]), 0x0410);
    }

    #[test]
    fn test_parse_dnskey_line() {
        let content = "; zone-signing key\nskydns.local. 3600 IN DNSKEY 256 3 15 AAEC AwQ=\n";
        let dnskey = DnskeyRecord::parse(content).unwrap();
        assert_eq!(dnskey.owner, "skydns.local.");
        assert_eq!(dnskey.flags, 256);
        assert_eq!(dnskey.algorithm, 15);
        assert_eq!(dnskey.public_key, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_parse_dnskey_rejects_garbage() {
        assert!(DnskeyRecord::parse("; nothing here\n").is_err());
        assert!(DnskeyRecord::parse("example. IN DNSKEY 256 2 15 AAAA").is_err());
        assert!(DnskeyRecord::parse("example. IN DNSKEY 256 3 15 !!!").is_err());
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("Kskydns.local.+015+00001");

        let key = DnssecKeyPair::generate("skydns.local", KeyFlags::Zsk).unwrap();
        key.save(&base).unwrap();

        let loaded = load_key_pair(&base).unwrap();
        assert_eq!(loaded.public(), key.public());

        // Same private key, so signatures verify against the loaded DNSKEY
        let signature = loaded.sign(b"data").unwrap();
        let verifier = UnparsedPublicKey::new(&ED25519, &key.public().public_key);
        assert!(verifier.verify(b"data", &signature).is_ok());
    }

    #[test]
    fn test_load_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_key_pair(dir.path().join("Kmissing")).unwrap_err();
        assert!(matches!(err, DnssecKeyError::StorageError(_)));
    }

    #[test]
    fn test_mismatched_private_key_is_rejected() {
        let a = DnssecKeyPair::generate("skydns.local", KeyFlags::Zsk).unwrap();
        let b = DnssecKeyPair::generate("skydns.local", KeyFlags::Zsk).unwrap();
        let result = DnssecKeyPair::from_parts(a.public().clone(), &b.seed[..]);
        assert!(matches!(result, Err(DnssecKeyError::InvalidKeyData(_))));
    }

    #[test]
    fn test_unsupported_algorithm() {
        let public = DnskeyRecord::new("skydns.local", 256, 8, vec![1, 2, 3]);
        let result = DnssecKeyPair::from_parts(public, &[0u8; 32]);
        assert!(matches!(result, Err(DnssecKeyError::UnsupportedAlgorithm(8))));

        let private = "Private-key-format: v1.3\nAlgorithm: 8 (RSASHA256)\nPrivateKey: AAAA\n";
        assert!(matches!(
            parse_private_key(private, 8),
            Err(DnssecKeyError::UnsupportedAlgorithm(8))
        ));
    }

    #[test]
    fn test_ds_record() {
        let key = DnssecKeyPair::generate("skydns.local", KeyFlags::Ksk).unwrap();
        let ds = key.public().to_ds();

        assert_eq!(ds.key_tag, key.public().key_tag);
        assert_eq!(ds.digest_type, 2);
        assert_eq!(ds.digest.len(), 32);
        assert!(ds.to_zone_format("skydns.local").starts_with("skydns.local. IN DS"));
    }

    #[test]
    fn test_dnskey_record_conversion() {
        let key = DnssecKeyPair::generate("skydns.local", KeyFlags::Zsk).unwrap();
        let record = key.public().to_record(3600);
        assert_eq!(record.name, "skydns.local.");
        assert_eq!(record.ttl, 3600);
        match record.value {
            DnsRecordValue::DNSKEY { flags, protocol, algorithm, .. } => {
                assert_eq!(flags, 256);
                assert_eq!(protocol, 3);
                assert_eq!(algorithm, 15);
            }
            _ => panic!("Expected DNSKEY value"),
        }
    }
}
