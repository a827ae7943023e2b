//! DNSSEC Signer Tool
//!
//! Key management and configuration checks for the online signer.
//!
//! ## Usage
//!
//! ```bash
//! # Generate a zone signing key (writes <out>.key and <out>.private)
//! dnssec-signer keygen --zone skydns.local --out /etc/dnssec/Kskydns.local
//!
//! # Validate a configuration, load its key and print the DS record
//! dnssec-signer check --config /etc/dnssec/signer.toml
//! ```

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use dnssec_signer::dns::{
    DnsMessage, DnsRecord, DnsRecordType, DnskeyRecord, DnssecKeyPair, DnssecSigner, DsRecord,
    KeyFlags, LoggingConfig, Question, SignerConfig,
};

/// Online DNSSEC signer
#[derive(Parser, Debug)]
#[command(name = "dnssec-signer")]
#[command(version)]
#[command(about = "DNSSEC key management and signer checks", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate an Ed25519 key pair in BIND format
    Keygen {
        /// Zone apex the key signs
        #[arg(long)]
        zone: String,

        /// Output base name; defaults to K<zone>+015+<tag> in the current directory
        #[arg(long)]
        out: Option<PathBuf>,

        /// Generate a key-signing key (flags 257) instead of a zone-signing key
        #[arg(long)]
        ksk: bool,
    },

    /// Validate a configuration file and load its key
    Check {
        /// Path to configuration file (TOML or YAML)
        #[arg(short, long)]
        config: PathBuf,

        /// Print the key summary as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Serialize)]
struct KeySummary<'a> {
    zone: &'a str,
    dnskey: &'a DnskeyRecord,
    ds: DsRecord,
    ds_record: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    match args.command {
        Command::Keygen { zone, out, ksk } => {
            init_logging(args.verbose, None)?;
            keygen(&zone, out, ksk)
        }
        Command::Check { config, json } => {
            // The configured log level applies from the first message on
            let loaded = load_config(&config).await?;
            init_logging(args.verbose, Some(&loaded.logging))?;
            check(&config, loaded, json)
        }
    }
}

/// Level used when `RUST_LOG` is not set: `--verbose`, then the configured level
fn default_log_level(verbose: bool, logging: Option<&LoggingConfig>) -> String {
    if verbose {
        Level::DEBUG.as_str().to_lowercase()
    } else {
        logging
            .map(|l| l.level.to_lowercase())
            .unwrap_or_else(|| Level::INFO.as_str().to_lowercase())
    }
}

fn init_logging(verbose: bool, logging: Option<&LoggingConfig>) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_log_level(verbose, logging)));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;
    Ok(())
}

async fn load_config(path: &Path) -> anyhow::Result<SignerConfig> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let config = SignerConfig::from_file_content(&path.to_string_lossy(), &content)?;
    config.validate()?;
    Ok(config)
}

fn keygen(zone: &str, out: Option<PathBuf>, ksk: bool) -> anyhow::Result<()> {
    let flags = if ksk { KeyFlags::Ksk } else { KeyFlags::Zsk };
    let key = DnssecKeyPair::generate(zone, flags)?;
    let public = key.public();

    let base = out.unwrap_or_else(|| {
        PathBuf::from(format!("K{}+{:03}+{:05}", public.owner, public.algorithm, public.key_tag))
    });
    key.save(&base)
        .with_context(|| format!("Failed to write key files for {}", base.display()))?;

    info!("Wrote {}.key and {}.private", base.display(), base.display());
    println!("{}", public.to_zone_format());
    println!("{}", public.to_ds().to_zone_format(&public.owner));
    Ok(())
}

fn check(config_path: &Path, config: SignerConfig, json: bool) -> anyhow::Result<()> {
    if !config.dnssec.enabled {
        info!("DNSSEC is disabled in {}", config_path.display());
        return Ok(());
    }

    let key_path = config
        .dnssec
        .key_path
        .clone()
        .context("dnssec.key_path is required when DNSSEC is enabled")?;
    let key_pair = DnssecKeyPair::load(&key_path)?;
    let dnskey = key_pair.public().clone();
    let signer = DnssecSigner::from_key_pair(config.dnssec.clone(), key_pair)?;

    // Sign a sample response to make sure the key actually works
    let apex = signer.server_key().apex.clone();
    let mut sample = DnsMessage::response(0, Question::new(apex.as_str(), DnsRecordType::SOA));
    sample.answers.push(DnsRecord::soa(
        apex.as_str(),
        format!("ns.dns.{}", apex),
        format!("hostmaster.{}", apex),
        1,
        3600,
    ));
    signer.sign_response(&mut sample, config.dnssec.max_udp_size);
    anyhow::ensure!(
        !sample.signatures().is_empty(),
        "Key {} failed to sign a sample response",
        signer.server_key().key_tag
    );

    let ds = dnskey.to_ds();
    let summary = KeySummary {
        zone: &apex,
        dnskey: &dnskey,
        ds_record: ds.to_zone_format(&apex),
        ds,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("zone:     {}", summary.zone);
        println!("key tag:  {}", summary.dnskey.key_tag);
        println!("algorithm: {}", summary.dnskey.algorithm);
        println!("{}", summary.ds_record);
    }
    Ok(())
}
