#[cfg(target_arch = "wasm32")]
fn main() {}

#[cfg(not(target_arch = "wasm32"))]
use std::time::Duration;

#[cfg(not(target_arch = "wasm32"))]
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
#[cfg(not(target_arch = "wasm32"))]
use mptlb::{
    AccessKind, AllowAll, CsrState, EntryStorage, LookupRequest, PageLevel, PrivilegeMode,
    PteFlags, PtwResponse, StaticPm, TickInput, Tlb, TlbConfig, TranslationEntry, WalkFault,
};

#[cfg(not(target_arch = "wasm32"))]
fn criterion_config() -> Criterion {
    match std::env::var("MPTLB_BENCH_PROFILE").as_deref() {
        Ok("ci") => Criterion::default()
            // Keep PR runtime low.
            .warm_up_time(Duration::from_millis(200))
            .measurement_time(Duration::from_secs(1))
            .sample_size(10)
            .noise_threshold(0.05),
        _ => Criterion::default()
            .warm_up_time(Duration::from_secs(1))
            .measurement_time(Duration::from_secs(2))
            .sample_size(30)
            .noise_threshold(0.03),
    }
}

#[cfg(not(target_arch = "wasm32"))]
fn page(vpn: u64) -> TranslationEntry {
    TranslationEntry::new(
        vpn,
        vpn + 0x1000,
        1,
        PageLevel::Page4K,
        PteFlags::R | PteFlags::W | PteFlags::A | PteFlags::D,
    )
}

#[cfg(not(target_arch = "wasm32"))]
fn bench_storage_lookup(c: &mut Criterion) {
    let cfg = TlbConfig::dtlb_defaults();
    let mut storage = EntryStorage::new(&cfg);
    for vpn in 0..64u64 {
        storage.insert(page(vpn), StaticPm::ALLOW_ALL);
    }

    let mut group = c.benchmark_group("tlb_lookup");
    group.throughput(Throughput::Elements(1));
    group.bench_function("storage_hit_4k", |b| {
        b.iter(|| black_box(storage.lookup(black_box(17), black_box(1))))
    });
    group.bench_function("storage_miss", |b| {
        b.iter(|| black_box(storage.lookup(black_box(0x7_0000), black_box(1))))
    });
    group.finish();
}

#[cfg(not(target_arch = "wasm32"))]
fn bench_tick(c: &mut Criterion) {
    let cfg = TlbConfig::dtlb_defaults();
    let ports = cfg.ports.len();
    let mut tlb = Tlb::new(cfg).unwrap();
    let csr = CsrState::sv39(1, PrivilegeMode::Supervisor);
    let mut pmp = AllowAll;

    for vpn in 0..64u64 {
        let input = TickInput::idle(ports, csr).with_ptw_response(PtwResponse {
            entry: page(vpn),
            fault: WalkFault::NONE,
        });
        tlb.tick(&input, &mut pmp).unwrap();
    }

    let mut input = TickInput::idle(ports, csr);
    for port in 0..ports {
        input = input.with_request(
            port,
            LookupRequest::new(((port as u64) << 12) | 0x40, AccessKind::Load),
        );
    }

    let mut group = c.benchmark_group("tlb_tick");
    group.throughput(Throughput::Elements(ports as u64));
    group.bench_function("all_ports_hit", |b| {
        b.iter(|| black_box(tlb.tick(black_box(&input), &mut pmp).unwrap()))
    });
    group.finish();
}

#[cfg(not(target_arch = "wasm32"))]
criterion_group! {
    name = benches;
    config = criterion_config();
    targets = bench_storage_lookup, bench_tick
}
#[cfg(not(target_arch = "wasm32"))]
criterion_main!(benches);
