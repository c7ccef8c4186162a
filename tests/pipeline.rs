//! End-to-end behavior of the predictors under a speculative pipeline.

use tendril::*;

fn tage(lengths: &[usize], ctr_bits: u8, useful_bits: u8) -> TAGEPredictor {
    let mut cfg = TAGEConfig::with_lengths(lengths, 8, 9);
    cfg.ctr_bits = ctr_bits;
    cfg.useful_bits = useful_bits;
    cfg.alloc_skip = false;
    cfg.validate().unwrap();
    TAGEPredictor::new(TAGEBaseConfig { log_size: 8, ctr_bits: 2 }, cfg)
}

#[test]
fn base_then_allocation_into_shortest_table() {
    let mut p = tage(&[4, 8], 2, 1);
    let mut hist = SpeculativeHistory::new(64, 16, 8);
    for bit in [1, 0, 1, 1, 0, 1] {
        hist.append(bit, 1, 0x80, &mut [&mut p]).unwrap();
    }
    let pc = 0x100;

    // Three taken resolutions saturate the base counter
    let first = p.predict(pc, &hist.path, true);
    assert_eq!(first.provider, TAGEProvider::Base);
    assert_eq!(first.outcome, Outcome::N);
    for _ in 0..3 {
        p.base.get_entry_mut(first.base_idx).update(Outcome::T);
    }

    let pred = p.predict(pc, &hist.path, true);
    assert_eq!(pred.provider, TAGEProvider::Base);
    assert_eq!(pred.outcome, Outcome::T);
    assert_eq!(pred.confidence, Confidence::High);

    // The tag depends on exactly the four most recent history bits
    let expected_tag = (pc ^ hist.ghr.fold(4, 9) ^ (hist.ghr.fold(4, 8) << 1)) & 0x1ff;
    assert_eq!(pred.slots[0].tag as usize, expected_tag);

    p.commit(&pred, Outcome::N, pred.outcome, false);
    assert_eq!(p.stat().alcs, 1);
    let entry = p.core.entry(0, &pred.slots);
    assert_eq!(entry.tag, Some(pred.slots[0].tag));
    assert!(entry.ctr.is_weak());
    assert_eq!(entry.ctr.value(), -1);
    assert_eq!(entry.useful.value(), 0);
    assert_eq!(p.core.entry(1, &pred.slots).tag, None);
}

#[test]
fn longest_match_provides() {
    let mut p = tage(&[8, 20], 3, 2);
    let path = PathHistory::new(16);
    let slots = p.core.compute_slots(0x240, &path);
    p.core.entry_mut(0, &slots).allocate(slots[0].tag, 3, Direction);
    p.core.entry_mut(1, &slots).allocate(slots[1].tag, -3, Direction);

    let pred = p.predict(0x240, &path, true);
    assert!(!pred.pseudo_new);
    assert_eq!(pred.hit, Some(1));
    assert_eq!(pred.provider, TAGEProvider::Tagged(1));
    assert_eq!(pred.outcome, Outcome::N);
}

#[test]
fn at_most_one_allocation_per_commit() {
    let mut p = tage(&[3, 6, 12, 24, 48], 3, 2);
    let mut hist = SpeculativeHistory::new(256, 16, 48);
    let mut x: u64 = 0x2545_f491;
    for _ in 0..3000 {
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        let pc = 0x1000 + (x as usize % 16) * 4;
        let outcome = Outcome::from_bool((x >> 20) & 3 != 0);

        let pred = p.predict(pc, &hist.path, true);
        let before: Vec<Vec<Option<u32>>> = p.core.comp.iter()
            .map(|c| c.data.iter().map(|e| e.tag).collect())
            .collect();
        p.commit(&pred, outcome, pred.outcome, false);

        let changed: Vec<usize> = p.core.comp.iter().enumerate()
            .filter(|(bank, c)| c.data.iter().zip(&before[*bank]).any(|(e, t)| e.tag != *t))
            .map(|(bank, _)| bank)
            .collect();
        assert!(changed.len() <= 1);
        if let Some(&bank) = changed.first() {
            assert!(pred.hit.map_or(true, |hit| bank > hit));
        }

        let cp = hist.append(outcome.is_taken() as u64, 1, pc, &mut [&mut p]).unwrap();
        hist.retire(&cp);
    }
    assert!(p.stat().alcs > 0);
}

/// One resolved branch of a synthetic stream.
#[derive(Clone, Copy)]
struct Event {
    pc: usize,
    taken: Outcome,
}

fn stream() -> Vec<Event> {
    let mut res = Vec::new();
    let mut x: u32 = 7;
    for i in 0..3000 {
        x = x.wrapping_mul(1_103_515_245).wrapping_add(12345);
        res.push(Event { pc: 0x100, taken: Outcome::from_bool(i % 5 != 4) });
        res.push(Event { pc: 0x140 + ((x >> 16) as usize & 3) * 4,
            taken: Outcome::from_bool((x >> 24) & 1 == 1) });
    }
    res
}

fn predictor() -> TAGESCLPredictor {
    let mut cfg = TAGESCLConfig::default();
    cfg.tage = TAGEConfig::geometric(4, 128, 8, 8, 9);
    cfg.tage.history_buffer_bits = 1024;
    cfg.seed = Some(99);
    cfg.build().unwrap()
}

fn tables(p: &TAGESCLPredictor) -> impl PartialEq + std::fmt::Debug {
    (
        p.tage.core.comp.iter().map(|c| c.data.clone()).collect::<Vec<_>>(),
        p.tage.core.use_alt.clone(),
        p.tage.base.data.clone(),
        p.loops.as_ref().map(|l| (l.data.clone(), l.meta.clone())),
        p.sc.as_ref().map(|s| (s.bias.clone(), s.gehl.clone(), s.path.clone(), s.threshold)),
        p.rng,
        p.hist.clone(),
    )
}

#[test]
fn wrong_path_detours_do_not_change_learning() {
    let events = stream();

    let mut clean = predictor();
    for ev in &events {
        let (_, mut info) = clean.predict(ev.pc, true);
        clean.update_speculative_history(&mut info, ev.pc, BranchKind::DirectBranch,
            ev.taken, ev.pc + 0x20).unwrap();
        clean.commit(info, ev.pc, BranchKind::DirectBranch, ev.taken, ev.pc + 0x20).unwrap();
    }

    let mut detoured = predictor();
    let mut detours = 0;
    for ev in &events {
        let (pred, mut info) = detoured.predict(ev.pc, true);
        detoured.update_speculative_history(&mut info, ev.pc, BranchKind::DirectBranch,
            pred, ev.pc + 0x20).unwrap();
        if pred != ev.taken {
            let mut wrong = Vec::new();
            for i in 0..3 {
                let pc = 0x9000 + i * 4;
                let (_, mut w) = detoured.predict(pc, true);
                detoured.update_speculative_history(&mut w, pc, BranchKind::DirectBranch,
                    Outcome::T, pc + 0x20).unwrap();
                wrong.push(w);
            }
            while let Some(w) = wrong.pop() {
                detoured.squash(w).unwrap();
            }
            detoured.repair(&mut info, ev.pc, BranchKind::DirectBranch, ev.taken,
                ev.pc + 0x20).unwrap();
            detours += 1;
        }
        detoured.commit(info, ev.pc, BranchKind::DirectBranch, ev.taken, ev.pc + 0x20)
            .unwrap();
    }

    assert!(detours > 0);
    assert_eq!(tables(&clean), tables(&detoured));
}

fn target_tables(p: &ITTAGEPredictor) -> impl PartialEq + std::fmt::Debug {
    (
        p.core.comp.iter().map(|c| c.data.clone()).collect::<Vec<_>>(),
        p.core.use_alt.clone(),
        p.rng,
        p.hist.clone(),
    )
}

#[test]
fn wrong_path_detours_do_not_change_target_learning() {
    let handlers = [0x8000, 0x8808, 0x9010, 0xa018];
    let mut events = Vec::new();
    let mut x: u32 = 11;
    for i in 0..2000 {
        x = x.wrapping_mul(1_103_515_245).wrapping_add(12345);
        let taken = Outcome::from_bool((x >> 20) & 1 == 1);
        events.push((0x300, BranchKind::DirectBranch, taken, 0x340));
        let target = handlers[(i + taken.is_taken() as usize) % handlers.len()];
        events.push((0x500, BranchKind::IndirectCall, Outcome::T, target));
    }
    let build = || ITTAGEConfig { seed: Some(17), ..Default::default() }.build().unwrap();

    let mut clean = build();
    for &(pc, kind, taken, target) in &events {
        let (_, mut info) = clean.predict(pc, kind.is_conditional());
        clean.update_speculative_history(&mut info, pc, kind, taken, target).unwrap();
        clean.commit(info, pc, kind, taken, target).unwrap();
    }

    let mut detoured = build();
    let mut detours = 0;
    for &(pc, kind, taken, target) in &events {
        let (pred, mut info) = detoured.predict(pc, kind.is_conditional());
        if !kind.is_indirect_no_return() || pred == Some(target) {
            detoured.update_speculative_history(&mut info, pc, kind, taken, target).unwrap();
        } else {
            detoured.update_speculative_history(&mut info, pc, kind, taken,
                pred.unwrap_or(pc + 4)).unwrap();
            let mut wrong = Vec::new();
            for i in 0..3 {
                let wpc = 0x9000 + i * 4;
                let (_, mut w) = detoured.predict(wpc, false);
                detoured.update_speculative_history(&mut w, wpc, BranchKind::IndirectJump,
                    Outcome::T, 0x7000 + i * 0x40).unwrap();
                wrong.push(w);
            }
            while let Some(w) = wrong.pop() {
                detoured.squash(w).unwrap();
            }
            detoured.repair(&mut info, pc, kind, taken, target).unwrap();
            detours += 1;
        }
        detoured.commit(info, pc, kind, taken, target).unwrap();
    }

    assert!(detours > 0);
    assert_eq!(target_tables(&clean), target_tables(&detoured));
}

#[test]
fn unit_runs_both_predictors() {
    let mut dir = PredictorUnit::build(2, |tid| {
        TAGESCLConfig { seed: Some(tid as u64 + 1), ..Default::default() }.build()
    }).unwrap();
    let mut tgt = PredictorUnit::build(2, |tid| {
        ITTAGEConfig { seed: Some(tid as u64 + 1), ..Default::default() }.build()
    }).unwrap();

    let targets = [0x8000, 0x8808, 0x9010];
    let mut late_misses = 0;
    for i in 0..600 {
        let target = targets[i % 3];

        // A conditional branch ahead of the dispatch keeps history moving
        let (_, mut h) = dir.predict(1, 0x400, true).unwrap();
        dir.update_speculative_history(&mut h, 0x400, BranchKind::DirectBranch, Outcome::T,
            0x480).unwrap();
        dir.commit(h, 0x400, BranchKind::DirectBranch, Outcome::T, 0x480).unwrap();
        let (_, mut h) = tgt.predict(1, 0x400, true).unwrap();
        tgt.update_speculative_history(&mut h, 0x400, BranchKind::DirectBranch, Outcome::T,
            0x480).unwrap();
        tgt.commit(h, 0x400, BranchKind::DirectBranch, Outcome::T, 0x480).unwrap();

        let (pred, mut h) = tgt.predict(1, 0x500, false).unwrap();
        tgt.update_speculative_history(&mut h, 0x500, BranchKind::IndirectCall, Outcome::T,
            pred.unwrap_or(0x504)).unwrap();
        if pred != Some(target) {
            if i >= 500 {
                late_misses += 1;
            }
            tgt.repair(&mut h, 0x500, BranchKind::IndirectCall, Outcome::T, target).unwrap();
        }
        tgt.commit(h, 0x500, BranchKind::IndirectCall, Outcome::T, target).unwrap();
    }
    assert_eq!(late_misses, 0);
    assert_eq!(tgt.thread(0).unwrap().stat().clk, 0);
    assert_eq!(dir.thread(1).unwrap().stat.commits, 600);

    dir.reset();
    assert_eq!(dir.thread(1).unwrap().stat.commits, 0);
}
