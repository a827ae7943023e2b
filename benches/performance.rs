//! Signer Benchmarks
//!
//! Run with: cargo bench
//!
//! Compares serving a cached RRSIG against signing from scratch, plus the
//! pieces every response pays for regardless of the cache.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::net::Ipv4Addr;
use std::sync::Arc;

use dnssec_signer::dns::{
    group_rrsets, DenialIndex, DnsMessage, DnsRecord, DnsRecordType, DnssecConfig,
    DnssecKeyPair, DnssecSigner, Fingerprint, KeyFlags, Question, ServerKey, ServiceRecord,
};

const NOW: u64 = 1_700_000_000;

fn signer() -> DnssecSigner {
    let key_pair = DnssecKeyPair::generate("skydns.local", KeyFlags::Zsk).expect("key generation");
    let server_key = ServerKey::from_dnskey(key_pair.public());
    DnssecSigner::new(DnssecConfig::default(), server_key, Arc::new(key_pair)).expect("signer")
}

fn response(records: u8) -> DnsMessage {
    let mut msg = DnsMessage::response(1, Question::new("web.production.skydns.local.", DnsRecordType::A));
    for i in 0..records {
        msg.answers.push(DnsRecord::a(
            "web.production.skydns.local.",
            Ipv4Addr::new(10, 0, 0, i),
            60,
        ));
    }
    msg
}

// =============================================================================
// SIGNING
// =============================================================================

fn bench_signing(c: &mut Criterion) {
    let mut group = c.benchmark_group("Signing");
    group.throughput(Throughput::Elements(1));

    let signer = signer();
    let template = response(4);

    // Warm the cache once, every iteration after that is a hit
    signer.sign_response_at(&mut template.clone(), 4096, NOW);
    group.bench_function("cache_hit", |b| {
        b.iter(|| {
            let mut msg = template.clone();
            signer.sign_response_at(black_box(&mut msg), 4096, NOW);
            msg
        })
    });

    let rrsets = group_rrsets(&template.answers).expect("non-empty section");
    group.bench_function("fresh_signature", |b| {
        b.iter(|| signer.new_rrsig(black_box(&rrsets[0]), NOW))
    });

    group.finish();
}

// =============================================================================
// PER-RESPONSE WORK
// =============================================================================

fn bench_response_overhead(c: &mut Criterion) {
    let mut group = c.benchmark_group("Response");

    for records in [1u8, 8, 32] {
        let msg = response(records);
        group.bench_with_input(BenchmarkId::new("fingerprint", records), &msg, |b, msg| {
            b.iter(|| {
                let rrsets = group_rrsets(black_box(&msg.answers)).expect("non-empty section");
                Fingerprint::of_rrset(&rrsets[0])
            })
        });
        group.bench_with_input(BenchmarkId::new("wire_len", records), &msg, |b, msg| {
            b.iter(|| black_box(msg).wire_len())
        });
    }

    group.finish();
}

// =============================================================================
// DENIAL
// =============================================================================

fn bench_denial(c: &mut Criterion) {
    let mut group = c.benchmark_group("Denial");

    let index = Arc::new(DenialIndex::new());
    for i in 0..10_000 {
        index.register_service(&ServiceRecord::new(
            format!("r{}", i % 16),
            format!("{}", i % 7),
            format!("svc{}", i),
            "production",
        ));
    }
    let signer = signer().with_denial_index(Arc::clone(&index));

    group.bench_function("search_depth_2", |b| {
        b.iter(|| index.search(black_box("svc5000x.production"), 2))
    });
    group.bench_function("new_nsec", |b| {
        b.iter(|| signer.new_nsec(black_box("missing.production.skydns.local.")))
    });

    group.finish();
}

// =============================================================================
// CRITERION GROUPS
// =============================================================================

criterion_group!(benches, bench_signing, bench_response_overhead, bench_denial);

criterion_main!(benches);
