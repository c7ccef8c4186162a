//! Run TAGE-SC-L and ITTAGE over a synthetic branch stream.
//!
//! Mispredicted branches send the front-end down a wrong path for a few
//! branches; those are squashed before the mispredicted branch is repaired
//! and committed.

use clap::Parser;
use rand::rngs::StdRng;
use rand::{ Rng, SeedableRng };
use std::path::PathBuf;
use std::time::Instant;

use tendril::*;

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Number of dynamic branches to simulate
    #[arg(short, long, default_value = "200000")]
    branches: usize,

    /// Wrong-path branches fetched after each misprediction
    #[arg(short, long, default_value = "4")]
    detour: usize,

    /// Seed for the workload and the predictors
    #[arg(short, long, default_value = "1")]
    seed: u64,

    /// Path to a TAGE-SC-L configuration (JSON)
    #[arg(long)]
    tagescl: Option<PathBuf>,

    /// Path to an ITTAGE configuration (JSON)
    #[arg(long)]
    ittage: Option<PathBuf>,
}

/// One resolved branch.
#[derive(Clone, Copy, Debug)]
struct Event {
    pc: usize,
    kind: BranchKind,
    taken: Outcome,
    target: usize,
}

/// A loop nest, a pair of correlated branches and an interpreter-style
/// dispatch through an indirect call.
struct Workload {
    rng: StdRng,
    step: usize,
    inner_trip: usize,
    last: Outcome,
}
impl Workload {
    const LOOP_PC: usize = 0x1_0000;
    const COND_PC: usize = 0x1_0040;
    const CORR_PC: usize = 0x1_0080;
    const DISPATCH_PC: usize = 0x1_00c0;
    const HANDLERS: [usize; 5] = [0x2_0000, 0x2_1000, 0x2_2000, 0x2_3000, 0x2_4000];
    const OPCODES: [usize; 8] = [0, 1, 1, 2, 0, 3, 4, 1];

    fn new(seed: u64) -> Self {
        Self { rng: StdRng::seed_from_u64(seed), step: 0, inner_trip: 9, last: Outcome::N }
    }

    /// Emit one iteration of the outer loop.
    fn next_block(&mut self, out: &mut Vec<Event>) {
        for i in 0..self.inner_trip {
            let taken = Outcome::from_bool(i + 1 != self.inner_trip);
            out.push(Event { pc: Self::LOOP_PC, kind: BranchKind::DirectBranch, taken,
                target: Self::LOOP_PC - 0x20 });
        }

        let r = Outcome::from_bool(self.rng.gen_ratio(1, 2));
        out.push(Event { pc: Self::COND_PC, kind: BranchKind::DirectBranch, taken: r,
            target: Self::COND_PC + 0x10 });
        let corr = if r == self.last { Outcome::T } else { Outcome::N };
        out.push(Event { pc: Self::CORR_PC, kind: BranchKind::DirectBranch, taken: corr,
            target: Self::CORR_PC + 0x10 });
        self.last = r;

        let op = Self::OPCODES[self.step % Self::OPCODES.len()];
        out.push(Event { pc: Self::DISPATCH_PC, kind: BranchKind::IndirectCall,
            taken: Outcome::T, target: Self::HANDLERS[op] });
        out.push(Event { pc: Self::HANDLERS[op] + 0x40, kind: BranchKind::Return,
            taken: Outcome::T, target: Self::DISPATCH_PC + 4 });
        self.step += 1;
    }

    /// A branch on a path that will never commit.
    fn wrong_path(&mut self) -> Event {
        let pc = 0x3_0000 + self.rng.gen_range(0..64) * 4;
        let taken = Outcome::from_bool(self.rng.gen_bool(0.5));
        Event { pc, kind: BranchKind::DirectBranch, taken, target: pc + 0x100 }
    }
}

#[derive(Debug, Default)]
struct Tally {
    conditional: usize,
    conditional_miss: usize,
    indirect: usize,
    indirect_miss: usize,
    indirect_no_prediction: usize,
    squashed: usize,
}

/// Drive one predictor through the stream. `correct` decides whether a
/// prediction matches the resolved branch.
fn simulate<P, F>(
    unit: &mut PredictorUnit<P>,
    work: &mut Workload,
    events: &[Event],
    detour: usize,
    mut correct: F,
) -> anyhow::Result<(usize, usize)>
    where P: SpeculativePredictor,
          F: FnMut(&P::Prediction, &Event) -> Option<(Outcome, usize)>,
{
    let mut squashed = 0;
    let mut misses = 0;
    for ev in events {
        let (pred, mut handle) = unit.predict(0, ev.pc, ev.kind.is_conditional())?;
        match correct(&pred, ev) {
            None => {
                unit.update_speculative_history(&mut handle, ev.pc, ev.kind, ev.taken,
                    ev.target)?;
            },
            Some((taken, target)) => {
                misses += 1;
                unit.update_speculative_history(&mut handle, ev.pc, ev.kind, taken, target)?;

                let mut wrong = Vec::with_capacity(detour);
                for _ in 0..detour {
                    let w = work.wrong_path();
                    let (_, mut h) = unit.predict(0, w.pc, true)?;
                    unit.update_speculative_history(&mut h, w.pc, w.kind, w.taken, w.target)?;
                    wrong.push(h);
                }
                squashed += wrong.len();
                while let Some(h) = wrong.pop() {
                    unit.squash(h)?;
                }
                unit.repair(&mut handle, ev.pc, ev.kind, ev.taken, ev.target)?;
            },
        }
        unit.commit(handle, ev.pc, ev.kind, ev.taken, ev.target)?;
    }
    Ok((misses, squashed))
}

fn load<T: Default>(path: &Option<PathBuf>, parse: fn(&str) -> Result<T, ConfigError>)
    -> anyhow::Result<T>
{
    match path {
        Some(p) => Ok(parse(&std::fs::read_to_string(p)?)?),
        None => Ok(T::default()),
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Cli::parse();

    let mut work = Workload::new(args.seed);
    let mut events = Vec::with_capacity(args.branches);
    while events.len() < args.branches {
        work.next_block(&mut events);
    }
    events.truncate(args.branches);
    println!("[*] Generated {} branches", events.len());

    let mut tagescl_cfg: TAGESCLConfig = load(&args.tagescl, TAGESCLConfig::from_json)?;
    tagescl_cfg.seed.get_or_insert(args.seed);
    let mut ittage_cfg: ITTAGEConfig = load(&args.ittage, ITTAGEConfig::from_json)?;
    ittage_cfg.seed.get_or_insert(args.seed);

    let storage_bits = tagescl_cfg.base.storage_bits() + tagescl_cfg.tage.storage_bits();
    println!("[*] TAGE entries (in total): {}", tagescl_cfg.tage.total_entries());
    println!("[*] TAGE storage bits: {}b, {:.2}KiB",
        storage_bits, storage_bits as f64 / 1024.0 / 8.0);

    let mut tally = Tally::default();
    let start = Instant::now();

    let mut dir = PredictorUnit::build(1, |_| tagescl_cfg.clone().build())?;
    let (misses, squashed) = simulate(&mut dir, &mut work, &events, args.detour, |p, ev| {
        if !ev.kind.is_conditional() || *p == ev.taken {
            None
        } else {
            Some((*p, ev.target))
        }
    })?;
    tally.conditional = events.iter().filter(|e| e.kind.is_conditional()).count();
    tally.conditional_miss = misses;
    tally.squashed += squashed;

    let mut tgt = PredictorUnit::build(1, |_| ittage_cfg.clone().build())?;
    let mut no_prediction = 0;
    let (misses, squashed) = simulate(&mut tgt, &mut work, &events, args.detour, |p, ev| {
        if !ev.kind.is_indirect_no_return() || *p == Some(ev.target) {
            return None;
        }
        match p {
            Some(t) => Some((ev.taken, *t)),
            None => {
                no_prediction += 1;
                None
            },
        }
    })?;
    tally.indirect = events.iter().filter(|e| e.kind.is_indirect_no_return()).count();
    tally.indirect_miss = misses + no_prediction;
    tally.indirect_no_prediction = no_prediction;
    tally.squashed += squashed;

    println!("[*] Completed in {:.3?}", start.elapsed());
    if let Some(p) = dir.thread(0) {
        println!("[*] {:#?}", p.tage_stat());
        println!("[*] {:#?}", p.stat);
    }
    if let Some(p) = tgt.thread(0) {
        println!("[*] {:#?}", p.stat());
    }

    let hits = tally.conditional - tally.conditional_miss;
    println!("[*] Conditional: {}/{} ({:.2}% correct) ({} misses)",
        hits, tally.conditional,
        hits as f64 / tally.conditional.max(1) as f64 * 100.0, tally.conditional_miss);
    let hits = tally.indirect - tally.indirect_miss;
    println!("[*] Indirect:    {}/{} ({:.2}% correct) ({} misses, {} without a prediction)",
        hits, tally.indirect,
        hits as f64 / tally.indirect.max(1) as f64 * 100.0,
        tally.indirect_miss, tally.indirect_no_prediction);
    println!("[*] Squashed {} wrong-path branches", tally.squashed);
    Ok(())
}
