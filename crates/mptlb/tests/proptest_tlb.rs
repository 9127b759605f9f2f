#![cfg(not(target_arch = "wasm32"))]

use mptlb::perm::{check, EntryPerm, ModeFlags};
use mptlb::{
    AccessKind, AllowAll, ArrayKind, CsrState, EntryStorage, FaultKinds, FlushScope,
    LookupRequest, NormalArrayConfig, NormalShape, PageLevel, PortMode, PrivilegeMode, PteFlags,
    PtwRequest, PtwResponse, ReplacementKind, Replacer, StaticPm, SuperArrayConfig, TickInput,
    Tlb, TlbConfig, TranslationEntry, WalkFault,
};
use proptest::prelude::*;

fn roomy_config(ports: Vec<PortMode>) -> TlbConfig {
    TlbConfig {
        name: "prop".to_string(),
        normal: NormalArrayConfig {
            shape: NormalShape::FullyAssociative { ways: 64 },
            replacement: ReplacementKind::Plru,
        },
        super_page: SuperArrayConfig {
            ways: 64,
            replacement: ReplacementKind::Plru,
        },
        ports,
        normal_as_victim: false,
        paddr_bits: 40,
        random_seed: 1,
    }
}

fn arb_kind() -> impl Strategy<Value = AccessKind> {
    prop_oneof![
        Just(AccessKind::Load),
        Just(AccessKind::Store),
        Just(AccessKind::Fetch),
        Just(AccessKind::Atomic),
    ]
}

fn arb_level() -> impl Strategy<Value = PageLevel> {
    prop_oneof![
        Just(PageLevel::Page4K),
        Just(PageLevel::Page2M),
        Just(PageLevel::Page1G),
    ]
}

fn arb_mode() -> impl Strategy<Value = PrivilegeMode> {
    prop_oneof![Just(PrivilegeMode::User), Just(PrivilegeMode::Supervisor)]
}

#[derive(Clone, Debug)]
struct Mapping {
    ppn: u64,
    asid: u16,
    global: bool,
}

prop_compose! {
    fn arb_mapping()(
        ppn in 0u64..(1 << 24),
        asid in 0u16..4,
        global in any::<bool>(),
    ) -> Mapping {
        Mapping { ppn, asid, global }
    }
}

#[derive(Clone, Debug)]
struct PortOp {
    request: Option<(u64, AccessKind)>,
    ptw_ready: bool,
}

#[derive(Clone, Debug)]
struct TickOp {
    ports: Vec<PortOp>,
    walker: Option<u64>,
    flush: bool,
}

prop_compose! {
    fn arb_port_op()(
        request in proptest::option::of((0u64..6, arb_kind())),
        ptw_ready in any::<bool>(),
    ) -> PortOp {
        PortOp { request, ptw_ready }
    }
}

prop_compose! {
    fn arb_tick_op(ports: usize)(
        ports in proptest::collection::vec(arb_port_op(), ports),
        walker in proptest::option::of(0u64..6),
        flush in proptest::bool::weighted(0.05),
    ) -> TickOp {
        TickOp { ports, walker, flush }
    }
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]

    #[test]
    fn installed_entries_hit_with_their_own_bits(
        mappings in proptest::collection::btree_map(0u64..(1 << 27), arb_mapping(), 1..32),
        query_asid in 0u16..4,
    ) {
        let cfg = roomy_config(vec![PortMode::NonBlocking]);
        let mut storage = EntryStorage::new(&cfg);
        for (&vpn, m) in &mappings {
            let mut flags = PteFlags::R | PteFlags::A;
            if m.global {
                flags |= PteFlags::G;
            }
            let entry = TranslationEntry::new(vpn, m.ppn, m.asid, PageLevel::Page4K, flags);
            storage.insert(entry, StaticPm::INVALID);
        }

        for (&vpn, m) in &mappings {
            let found = storage.lookup(vpn, m.asid);
            prop_assert!(found.hit());
            let entry = found.entry().unwrap();
            prop_assert_eq!(entry.ppn(), m.ppn);
            prop_assert_eq!(entry.global(), m.global);

            let other = storage.lookup(vpn, query_asid);
            prop_assert_eq!(other.hit(), m.global || query_asid == m.asid);
        }
    }

    #[test]
    fn global_flush_leaves_nothing_behind(
        entries in proptest::collection::vec(
            (0u64..(1 << 27), arb_level(), arb_mapping()),
            1..48,
        ),
    ) {
        let cfg = roomy_config(vec![PortMode::NonBlocking]);
        let mut tlb = Tlb::new(cfg).unwrap();
        let csr = CsrState::sv39(0, PrivilegeMode::Supervisor);
        let mut installed = Vec::new();
        for (vpn, level, m) in entries {
            let vpn = vpn & level.vpn_mask();
            let mut flags = PteFlags::R | PteFlags::A;
            if m.global {
                flags |= PteFlags::G;
            }
            let entry = TranslationEntry::new(vpn, m.ppn, m.asid, level, flags);
            tlb.tick(
                &TickInput::idle(1, csr).with_ptw_response(PtwResponse {
                    entry,
                    fault: WalkFault::NONE,
                }),
                &mut AllowAll,
            )
            .unwrap();
            installed.push(entry);
        }
        prop_assert!(tlb.storage().valid_count() > 0);

        tlb.tick(&TickInput::idle(1, csr).with_flush(FlushScope::All), &mut AllowAll)
            .unwrap();
        prop_assert_eq!(tlb.storage().valid_count(), 0);
        prop_assert_eq!(tlb.storage().entries(ArrayKind::Normal).count(), 0);
        prop_assert_eq!(tlb.storage().entries(ArrayKind::Super).count(), 0);
        for entry in installed {
            prop_assert!(!tlb.storage().lookup(entry.vpn(), entry.asid()).hit());
        }
    }

    #[test]
    fn access_fault_always_wins(
        bits in any::<u8>(),
        kind in arb_kind(),
        mode in arb_mode(),
        sum in any::<bool>(),
        mxr in any::<bool>(),
        walker_page_fault in any::<bool>(),
    ) {
        let perm = EntryPerm {
            flags: PteFlags::from_bits_truncate(bits),
            fault: WalkFault { page_fault: walker_page_fault, access_fault: true },
        };
        let flags = ModeFlags { sum, mxr, vm_enabled: true };
        let faults = check(perm, kind, StaticPm::INVALID, mode, flags);
        prop_assert_eq!(faults.access_fault, FaultKinds::of(kind));
        prop_assert!(faults.page_fault.is_empty());
    }

    #[test]
    fn blocking_ports_keep_a_single_walk_in_flight(
        ops in proptest::collection::vec(arb_tick_op(2), 1..80),
    ) {
        let cfg = roomy_config(vec![PortMode::Blocking, PortMode::Blocking]);
        let mut tlb = Tlb::new(cfg).unwrap();
        let csr = CsrState::sv39(2, PrivilegeMode::Supervisor);
        let mut in_flight: [Option<PtwRequest>; 2] = [None, None];

        for op in ops {
            let mut input = TickInput::idle(2, csr);
            for (port, p) in op.ports.iter().enumerate() {
                if let Some((vpn, kind)) = p.request {
                    input = input.with_request(port, LookupRequest::new(vpn << 12, kind));
                }
                input = input.with_ptw_ready(port, p.ptw_ready);
            }
            if let Some(vpn) = op.walker {
                input = input.with_ptw_response(PtwResponse {
                    entry: TranslationEntry::new(
                        vpn,
                        vpn + 0x100,
                        2,
                        PageLevel::Page4K,
                        PteFlags::R | PteFlags::W | PteFlags::A | PteFlags::D,
                    ),
                    fault: WalkFault::NONE,
                });
            }
            if op.flush {
                input = input.with_flush(FlushScope::All);
            }

            let before = [tlb.port_state(0).unwrap(), tlb.port_state(1).unwrap()];
            let out = tlb.tick(&input, &mut AllowAll).unwrap();

            for port in 0..2 {
                if before[port].response_suppressed {
                    prop_assert!(!out.accepted[port]);
                }
                let after = tlb.port_state(port).unwrap();
                if out.responses[port].is_some() {
                    // The previous miss, if any, is resolved.
                    in_flight[port] = None;
                }
                if let Some(req) = out.ptw_requests[port] {
                    prop_assert!(after.miss_pending);
                    if let Some(prev) = in_flight[port] {
                        prop_assert_eq!(req, prev);
                    }
                    in_flight[port] = Some(req);
                }
                if !after.miss_pending {
                    in_flight[port] = None;
                }
                if after.ptw_outstanding {
                    prop_assert!(after.response_suppressed);
                }
            }
        }
    }

    #[test]
    fn victim_choice_is_reproducible(
        kind in prop_oneof![
            Just(ReplacementKind::Plru),
            Just(ReplacementKind::RoundRobin),
            Just(ReplacementKind::Random),
        ],
        ways_log2 in 0u32..4,
        seed in any::<u16>(),
        touches in proptest::collection::vec((0usize..4, 0usize..8), 0..64),
    ) {
        let ways = 1usize << ways_log2;
        let mut a = Replacer::new(kind, 4, ways, seed);
        let mut b = Replacer::new(kind, 4, ways, seed);
        for &(set, way) in &touches {
            let way = way % ways;
            a.touch(set, way);
            b.touch(set, way);
            let va = a.victim(set);
            let vb = b.victim(set);
            prop_assert_eq!(va, vb);
            prop_assert!(va < ways);
        }
    }
}
