//! Online DNSSEC Signing
//!
//! Signs authoritative DNS responses as they leave the server and proves the
//! non-existence of names that are not served.
//!
//! ## Architecture
//!
//! ```text
//! Response → RRset grouping → Fingerprint → Signature Cache ──hit──→ RRSIG copy
//!                                               │ miss/stale
//!                                               ↓
//!                                     Single-flight signing → Cache store
//!
//! NXDOMAIN / NODATA → Denial Index (4 depth registries) → NSEC
//!
//! Service events → Denial Index insert/remove
//! ```
//!
//! ## Components
//!
//! - `dns_types`: record types, values and response messages
//! - `wire`: canonical wire encoding, NSEC type bitmaps, message length
//! - `rrset`: groups records into signable RRsets
//! - `fingerprint`: deterministic RRset digests used as cache keys
//! - `signature_cache`: RRSIG cache with staleness checks and a size bound
//! - `single_flight`: collapses concurrent signing of the same RRset
//! - `denial`: reference-counted NSEC name registries and service events
//! - `dnssec_keys`: loading and generating the zone signing key
//! - `dnssec`: the response signer
//! - `dns_config`: signer configuration

pub mod dns_types;
pub mod dns_config;
pub mod wire;
pub mod rrset;
pub mod fingerprint;
pub mod signature_cache;
pub mod single_flight;
pub mod denial;
pub mod dnssec_keys;
pub mod dnssec;

pub use dns_types::*;
pub use dns_config::*;
pub use rrset::*;
pub use fingerprint::*;
pub use signature_cache::*;
pub use single_flight::*;
pub use denial::*;
pub use dnssec_keys::*;
pub use dnssec::*;
