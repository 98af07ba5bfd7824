//! Simulated annealing over the placement problem.
//!
//! Each read is an independent Metropolis walk over the assignment matrix
//! with a geometric cooling schedule, followed by a zero-temperature quench.
//! Reads run in parallel and share the immutable [`Problem`]; the winner is
//! the feasible read with the lowest unpenalized objective.
//!
//! # Moves
//!
//! A move picks a random `(pod, node)` cell:
//! - set cell: flip it off
//! - clear cell, pod placed elsewhere: shift the pod here, or flip on (50/50)
//! - clear cell, pod unplaced: flip on
//!
//! Energy deltas are computed from per-node load accumulators, so a move
//! costs O(1) to evaluate and O(partners) to apply.

use std::time::Instant;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use tracing::debug;

use kytos_core::{OptimizeError, OptimizeResult};

use crate::formulator::{Assignment, ConstraintKind, Problem, excess_sq};

/// Multiplier decorrelating per-read seeds.
const SEED_STRIDE: u64 = 0x9E37_79B9_7F4A_7C15;

/// Upper bound on greedy passes after cooling.
const MAX_QUENCH_PASSES: usize = 100;

/// Improvements smaller than this are treated as ties.
const IMPROVEMENT_EPSILON: f64 = 1e-9;

/// Run budget for one anneal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnnealParams {
    pub num_reads: u32,
    pub num_sweeps: u32,
    pub seed: u64,
}

/// Start and end temperature of the cooling schedule.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Schedule {
    pub t_initial: f64,
    pub t_final: f64,
}

impl Schedule {
    /// Derive temperatures from the spread of single-flip energy deltas.
    ///
    /// The hottest step accepts the largest uphill flip with probability
    /// 1/2; the coldest accepts the smallest with probability 1/100.
    pub fn for_problem(problem: &Problem) -> Self {
        let mut max_delta: f64 = 0.0;
        let mut min_delta = f64::INFINITY;

        let empty = problem.empty_assignment();
        for start in [&empty, problem.initial_assignment()] {
            let state = SearchState::new(problem, start.clone());
            for p in 0..problem.num_pods() {
                for n in 0..problem.num_nodes() {
                    let d = state.flip_delta(p, n).abs();
                    if d.is_finite() && d > IMPROVEMENT_EPSILON {
                        max_delta = max_delta.max(d);
                        min_delta = min_delta.min(d);
                    }
                }
            }
        }

        if !min_delta.is_finite() {
            return Self {
                t_initial: 1.0,
                t_final: 0.01,
            };
        }

        let t_initial = max_delta / std::f64::consts::LN_2;
        let mut t_final = min_delta / 100f64.ln();
        if t_final >= t_initial {
            t_final = t_initial / 100.0;
        }
        Self { t_initial, t_final }
    }

    /// Temperature at `sweep` of `num_sweeps`, decreasing geometrically.
    pub fn temperature(&self, sweep: u32, num_sweeps: u32) -> f64 {
        if num_sweeps <= 1 {
            return self.t_final;
        }
        let frac = f64::from(sweep) / f64::from(num_sweeps - 1);
        self.t_initial * (self.t_final / self.t_initial).powf(frac)
    }
}

/// Final state of one read.
#[derive(Debug, Clone)]
pub struct ReadResult {
    pub read_index: u32,
    pub assignment: Assignment,
    /// Unpenalized objective.
    pub objective: f64,
    /// Objective plus penalties.
    pub energy: f64,
    pub feasible: bool,
}

/// Best feasible read across an anneal.
#[derive(Debug, Clone)]
pub struct AnnealOutcome {
    pub assignment: Assignment,
    pub objective: f64,
    pub penalized_energy: f64,
    pub read_index: u32,
    pub feasible_reads: u32,
    pub num_reads: u32,
}

/// Anneal `problem` and return the best feasible assignment.
///
/// Fails with [`OptimizeError::Infeasible`] when no read ends feasible.
pub fn anneal(problem: &Problem, params: &AnnealParams) -> OptimizeResult<AnnealOutcome> {
    let schedule = Schedule::for_problem(problem);
    let started = Instant::now();

    let results: Vec<ReadResult> = (0..params.num_reads)
        .into_par_iter()
        .map(|read_index| run_read(problem, params, &schedule, read_index))
        .collect();

    let feasible_reads = results.iter().filter(|r| r.feasible).count() as u32;
    let best = results
        .into_iter()
        .filter(|r| r.feasible)
        .min_by(|a, b| {
            a.objective
                .total_cmp(&b.objective)
                .then(a.read_index.cmp(&b.read_index))
        });

    debug!(
        reads = params.num_reads,
        sweeps = params.num_sweeps,
        feasible_reads,
        t_initial = schedule.t_initial,
        t_final = schedule.t_final,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "anneal finished"
    );

    let best = best.ok_or(OptimizeError::Infeasible {
        num_reads: params.num_reads,
    })?;

    Ok(AnnealOutcome {
        assignment: best.assignment,
        objective: best.objective,
        penalized_energy: best.energy,
        read_index: best.read_index,
        feasible_reads,
        num_reads: params.num_reads,
    })
}

/// Execute a single read. Even reads start from the current placement,
/// odd reads from an empty matrix.
pub fn run_read(problem: &Problem, params: &AnnealParams, schedule: &Schedule, read_index: u32) -> ReadResult {
    let seed = params.seed ^ u64::from(read_index).wrapping_mul(SEED_STRIDE);
    let mut rng = ChaCha8Rng::seed_from_u64(seed);

    let start = if read_index % 2 == 0 {
        problem.initial_assignment().clone()
    } else {
        problem.empty_assignment()
    };
    let mut state = SearchState::new(problem, start);

    let moves_per_sweep = problem.num_pods() * problem.num_nodes();
    for sweep in 0..params.num_sweeps {
        let temperature = schedule.temperature(sweep, params.num_sweeps);
        for _ in 0..moves_per_sweep {
            state.propose(&mut rng, temperature);
        }
    }
    state.quench();

    let assignment = state.into_assignment();
    let objective = problem.objective(&assignment);
    let energy = problem.energy(&assignment);
    let feasible = problem.is_feasible(&assignment);

    debug!(read = read_index, objective, energy, feasible, "read finished");

    ReadResult {
        read_index,
        assignment,
        objective,
        energy,
        feasible,
    }
}

/// Mutable walk state with incremental energy bookkeeping.
pub(crate) struct SearchState<'a> {
    problem: &'a Problem,
    x: Assignment,
    /// Nodes each pod is assigned to.
    counts: Vec<u32>,
    cpu_load: Vec<f64>,
    mem_load: Vec<f64>,
    /// `affinity[n * P + p] = Σ_q A[p,q]·X[q,n]`.
    affinity: Vec<f64>,
    energy: f64,
}

impl<'a> SearchState<'a> {
    pub(crate) fn new(problem: &'a Problem, x: Assignment) -> Self {
        let num_pods = problem.num_pods();
        let (cpu_load, mem_load) = problem.node_loads(&x);

        let mut counts = vec![0u32; num_pods];
        let mut affinity = vec![0.0; problem.num_nodes() * num_pods];
        for q in 0..num_pods {
            for n in x.nodes_of(q) {
                counts[q] += 1;
                for &(p, a) in problem.partners(q) {
                    affinity[n * num_pods + p] += a;
                }
            }
        }

        let energy = problem.energy(&x);
        Self {
            problem,
            x,
            counts,
            cpu_load,
            mem_load,
            affinity,
            energy,
        }
    }

    pub(crate) fn energy(&self) -> f64 {
        self.energy
    }

    pub(crate) fn assignment(&self) -> &Assignment {
        &self.x
    }

    fn into_assignment(self) -> Assignment {
        self.x
    }

    /// Penalized energy change from toggling `(pod, node)`.
    pub(crate) fn flip_delta(&self, pod: usize, node: usize) -> f64 {
        let pb = self.problem;
        let w = pb.weights();
        let s = if self.x.get(pod, node) { -1.0 } else { 1.0 };

        let cpu_before = self.cpu_load[node];
        let cpu_after = cpu_before + s * pb.cpu(pod);
        let mem_before = self.mem_load[node];
        let mem_after = mem_before + s * pb.mem(pod);
        let cpu_cap = pb.cpu_capacity(node);
        let mem_cap = pb.mem_capacity(node);

        let balance = (cpu_after * cpu_after - cpu_before * cpu_before) / (cpu_cap * cpu_cap)
            + (mem_after * mem_after - mem_before * mem_before) / (mem_cap * mem_cap);
        let mut delta = balance * 10.0 * w.load_balance;

        delta += s * pb.move_cost(pod, node) * w.move_cost;
        delta += s * 2.0 * self.affinity[node * pb.num_pods() + pod] * w.anti_affinity;
        delta -= s * pb.desire(pod) * w.desire;

        let count = f64::from(self.counts[pod]);
        delta += pb.penalty_weight(ConstraintKind::OneHotRelaxed)
            * (excess_sq(count + s, 1.0) - excess_sq(count, 1.0));
        delta += pb.penalty_weight(ConstraintKind::CpuLimit)
            * (excess_sq(cpu_after, cpu_cap) - excess_sq(cpu_before, cpu_cap));
        delta += pb.penalty_weight(ConstraintKind::MemLimit)
            * (excess_sq(mem_after, mem_cap) - excess_sq(mem_before, mem_cap));

        delta
    }

    /// Toggle `(pod, node)` and account for a precomputed `delta`.
    pub(crate) fn apply_flip(&mut self, pod: usize, node: usize, delta: f64) {
        let pb = self.problem;
        let adding = !self.x.get(pod, node);
        let s = if adding { 1.0 } else { -1.0 };

        self.x.toggle(pod, node);
        if adding {
            self.counts[pod] += 1;
        } else {
            self.counts[pod] -= 1;
        }
        self.cpu_load[node] += s * pb.cpu(pod);
        self.mem_load[node] += s * pb.mem(pod);

        let num_pods = pb.num_pods();
        for &(q, a) in pb.partners(pod) {
            self.affinity[node * num_pods + q] += s * a;
        }
        self.energy += delta;
    }

    /// Attempt one random move at `temperature`. Returns whether it was taken.
    pub(crate) fn propose<R: Rng + ?Sized>(&mut self, rng: &mut R, temperature: f64) -> bool {
        let pod = rng.gen_range(0..self.problem.num_pods());
        let node = rng.gen_range(0..self.problem.num_nodes());

        if !self.x.get(pod, node)
            && let Some(from) = self.x.first_node(pod)
            && rng.gen_bool(0.5)
        {
            return self.try_shift(pod, from, node, |delta| metropolis(delta, temperature, rng));
        }

        let delta = self.flip_delta(pod, node);
        if metropolis(delta, temperature, rng) {
            self.apply_flip(pod, node, delta);
            true
        } else {
            false
        }
    }

    /// Move `pod` from `from` to `to` if `accept` approves the combined delta.
    fn try_shift(&mut self, pod: usize, from: usize, to: usize, accept: impl FnOnce(f64) -> bool) -> bool {
        let leave = self.flip_delta(pod, from);
        self.apply_flip(pod, from, leave);
        let arrive = self.flip_delta(pod, to);

        if accept(leave + arrive) {
            self.apply_flip(pod, to, arrive);
            true
        } else {
            self.apply_flip(pod, from, -leave);
            false
        }
    }

    /// Greedy descent: take strictly improving moves until none remain.
    pub(crate) fn quench(&mut self) {
        for _ in 0..MAX_QUENCH_PASSES {
            let mut improved = false;
            for pod in 0..self.problem.num_pods() {
                for node in 0..self.problem.num_nodes() {
                    improved |= self.improve_cell(pod, node);
                }
            }
            if !improved {
                break;
            }
        }
    }

    fn improve_cell(&mut self, pod: usize, node: usize) -> bool {
        let flip = self.flip_delta(pod, node);
        if self.x.get(pod, node) {
            if flip < -IMPROVEMENT_EPSILON {
                self.apply_flip(pod, node, flip);
                return true;
            }
            return false;
        }

        if let Some(from) = self.x.first_node(pod)
            && self.try_shift(pod, from, node, |delta| delta < -IMPROVEMENT_EPSILON && delta <= flip)
        {
            return true;
        }

        if flip < -IMPROVEMENT_EPSILON {
            self.apply_flip(pod, node, flip);
            return true;
        }
        false
    }
}

fn metropolis<R: Rng + ?Sized>(delta: f64, temperature: f64, rng: &mut R) -> bool {
    if delta <= 0.0 {
        return true;
    }
    if temperature <= 0.0 {
        return false;
    }
    rng.gen_range(0.0..1.0) < (-delta / temperature).exp()
}
