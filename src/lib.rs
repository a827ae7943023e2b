// Library interface for the DNSSEC response signer
// The binary and the integration tests both go through these modules

pub mod dns;
pub mod lock_utils;
