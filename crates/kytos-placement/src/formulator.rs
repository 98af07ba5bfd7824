//! Problem formulation — cluster state to a weighted binary objective.
//!
//! Builds the move-cost and anti-affinity matrices for a working pod set
//! and exposes the objective, the three soft constraints, and their
//! violation magnitudes over a pods x nodes assignment matrix.
//!
//! ```text
//! E(X) = 10·w_lb · Σ_n [(cpu_n / cpu_cap_n)² + (mem_n / mem_cap_n)²]
//!      +   w_mc · Σ_{p,n} X[p,n]·M[p,n]
//!      +   w_aa · Σ_{n,p,q} A[p,q]·X[p,n]·X[q,n]
//!      -   w_d  · Σ_p desire[p]·Σ_n X[p,n]
//! ```

use kytos_autoscale::WorkingPodSet;
use kytos_core::{AnnealingSettings, ClusterState};

/// Slack allowed when classifying an assignment as feasible.
pub const FEASIBILITY_TOLERANCE: f64 = 1e-6;

/// Fixed scale applied to the load-balance term.
const LOAD_BALANCE_SCALE: f64 = 10.0;

const MOVE_COST_PER_PRIORITY: f64 = 0.5;
const MOVE_COST_PER_MEM: f64 = 0.00001;
const MOVE_COST_PER_CPU: f64 = 0.0001;

/// Binary pods x nodes placement matrix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    num_pods: usize,
    num_nodes: usize,
    bits: Vec<bool>,
}

impl Assignment {
    /// All pods unplaced.
    pub fn empty(num_pods: usize, num_nodes: usize) -> Self {
        Self {
            num_pods,
            num_nodes,
            bits: vec![false; num_pods * num_nodes],
        }
    }

    pub fn num_pods(&self) -> usize {
        self.num_pods
    }

    pub fn num_nodes(&self) -> usize {
        self.num_nodes
    }

    pub fn get(&self, pod: usize, node: usize) -> bool {
        self.bits[pod * self.num_nodes + node]
    }

    pub fn set(&mut self, pod: usize, node: usize, value: bool) {
        self.bits[pod * self.num_nodes + node] = value;
    }

    pub fn toggle(&mut self, pod: usize, node: usize) {
        let bit = &mut self.bits[pod * self.num_nodes + node];
        *bit = !*bit;
    }

    /// Nodes the pod is assigned to, in node order.
    pub fn nodes_of(&self, pod: usize) -> impl Iterator<Item = usize> + '_ {
        let row = &self.bits[pod * self.num_nodes..(pod + 1) * self.num_nodes];
        row.iter().enumerate().filter(|(_, b)| **b).map(|(n, _)| n)
    }

    pub fn first_node(&self, pod: usize) -> Option<usize> {
        self.nodes_of(pod).next()
    }

    pub fn assigned_count(&self, pod: usize) -> usize {
        self.nodes_of(pod).count()
    }
}

/// The three soft constraints of the placement problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConstraintKind {
    /// Each pod sits on at most one node.
    OneHotRelaxed,
    /// Per-node cpu load stays within capacity.
    CpuLimit,
    /// Per-node memory load stays within capacity.
    MemLimit,
}

impl ConstraintKind {
    pub const ALL: [ConstraintKind; 3] = [
        ConstraintKind::OneHotRelaxed,
        ConstraintKind::CpuLimit,
        ConstraintKind::MemLimit,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ConstraintKind::OneHotRelaxed => "one_hot_relaxed",
            ConstraintKind::CpuLimit => "cpu_limit",
            ConstraintKind::MemLimit => "mem_limit",
        }
    }
}

/// A named constraint with its penalty multiplier.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Constraint {
    pub kind: ConstraintKind,
    pub penalty_weight: f64,
}

/// Largest `lhs - rhs` across the instances of each constraint.
///
/// A value `<= 0` means every instance holds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Violations {
    pub one_hot_relaxed: f64,
    pub cpu_limit: f64,
    pub mem_limit: f64,
}

impl Violations {
    pub fn get(&self, kind: ConstraintKind) -> f64 {
        match kind {
            ConstraintKind::OneHotRelaxed => self.one_hot_relaxed,
            ConstraintKind::CpuLimit => self.cpu_limit,
            ConstraintKind::MemLimit => self.mem_limit,
        }
    }

    pub fn is_feasible(&self) -> bool {
        ConstraintKind::ALL
            .iter()
            .all(|k| self.get(*k) <= FEASIBILITY_TOLERANCE)
    }
}

/// Weights of the four objective terms.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObjectiveWeights {
    pub load_balance: f64,
    pub move_cost: f64,
    pub anti_affinity: f64,
    pub desire: f64,
}

/// Weighted value of each objective term, for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ObjectiveTerms {
    pub load_balance: f64,
    pub move_cost: f64,
    pub anti_affinity: f64,
    pub desire: f64,
}

impl ObjectiveTerms {
    pub fn total(&self) -> f64 {
        self.load_balance + self.move_cost + self.anti_affinity + self.desire
    }
}

/// Fully numeric placement problem over a pods x nodes binary matrix.
#[derive(Debug, Clone)]
pub struct Problem {
    num_pods: usize,
    num_nodes: usize,
    cpu: Vec<f64>,
    mem: Vec<f64>,
    cpu_cap: Vec<f64>,
    mem_cap: Vec<f64>,
    /// Row-major pods x nodes.
    move_cost: Vec<f64>,
    /// Row-major pods x pods, symmetric with a zero diagonal.
    anti_affinity: Vec<f64>,
    /// Non-zero entries of each anti-affinity row.
    partners: Vec<Vec<(usize, f64)>>,
    desire: Vec<f64>,
    weights: ObjectiveWeights,
    constraints: [Constraint; 3],
    initial: Assignment,
}

/// Build the placement problem for a working pod set.
///
/// `state` supplies the nodes and the service profiles used to resolve
/// pod priorities; its pod list is not read.
pub fn formulate(
    working_set: &WorkingPodSet,
    state: &ClusterState,
    settings: &AnnealingSettings,
) -> Problem {
    let nodes = &state.nodes;
    let num_pods = working_set.len();
    let num_nodes = nodes.len();

    let mut cpu = Vec::with_capacity(num_pods);
    let mut mem = Vec::with_capacity(num_pods);
    let mut move_cost = Vec::with_capacity(num_pods * num_nodes);
    let mut initial = Assignment::empty(num_pods, num_nodes);

    for (p, w) in working_set.iter().enumerate() {
        let pod = &w.pod;
        cpu.push(pod.cpu_usage);
        mem.push(pod.mem_usage);

        let priority = pod
            .service
            .as_deref()
            .and_then(|s| state.service(s))
            .map_or(pod.priority, |s| s.priority);
        let relocation = MOVE_COST_PER_PRIORITY * priority
            + MOVE_COST_PER_MEM * pod.mem_usage
            + MOVE_COST_PER_CPU * pod.cpu_usage;

        for (n, node) in nodes.iter().enumerate() {
            let cost = match pod.current_node.as_deref() {
                None => 0.0,
                Some(current) if current == node.id => {
                    initial.set(p, n, true);
                    0.0
                }
                Some(_) => relocation,
            };
            move_cost.push(cost);
        }
    }

    let mut anti_affinity = vec![0.0; num_pods * num_pods];
    let mut partners = vec![Vec::new(); num_pods];
    let pods: Vec<_> = working_set.iter().map(|w| &w.pod).collect();
    for i in 0..num_pods {
        for k in (i + 1)..num_pods {
            let same_service = matches!(
                (pods[i].service.as_deref(), pods[k].service.as_deref()),
                (Some(a), Some(b)) if !a.is_empty() && a == b
            );
            if same_service {
                anti_affinity[i * num_pods + k] = 1.0;
                anti_affinity[k * num_pods + i] = 1.0;
                partners[i].push((k, 1.0));
                partners[k].push((i, 1.0));
            }
        }
    }

    Problem {
        num_pods,
        num_nodes,
        cpu,
        mem,
        cpu_cap: nodes.iter().map(|n| n.cpu_capacity).collect(),
        mem_cap: nodes.iter().map(|n| n.mem_capacity).collect(),
        move_cost,
        anti_affinity,
        partners,
        desire: working_set.desires(),
        weights: ObjectiveWeights {
            load_balance: settings.load_balance_weight,
            move_cost: settings.move_cost_weight,
            anti_affinity: settings.anti_affinity_weight,
            desire: settings.desire_weight,
        },
        constraints: [
            Constraint {
                kind: ConstraintKind::OneHotRelaxed,
                penalty_weight: settings.one_hot_relaxed_weight,
            },
            Constraint {
                kind: ConstraintKind::CpuLimit,
                penalty_weight: settings.cpu_limit_weight,
            },
            Constraint {
                kind: ConstraintKind::MemLimit,
                penalty_weight: settings.mem_limit_weight,
            },
        ],
        initial,
    }
}

impl Problem {
    pub fn num_pods(&self) -> usize {
        self.num_pods
    }

    pub fn num_nodes(&self) -> usize {
        self.num_nodes
    }

    pub fn cpu(&self, pod: usize) -> f64 {
        self.cpu[pod]
    }

    pub fn mem(&self, pod: usize) -> f64 {
        self.mem[pod]
    }

    pub fn cpu_capacity(&self, node: usize) -> f64 {
        self.cpu_cap[node]
    }

    pub fn mem_capacity(&self, node: usize) -> f64 {
        self.mem_cap[node]
    }

    pub fn move_cost(&self, pod: usize, node: usize) -> f64 {
        self.move_cost[pod * self.num_nodes + node]
    }

    pub fn anti_affinity(&self, p: usize, q: usize) -> f64 {
        self.anti_affinity[p * self.num_pods + q]
    }

    /// Pods sharing a service with `pod`, with their anti-affinity weight.
    pub fn partners(&self, pod: usize) -> &[(usize, f64)] {
        &self.partners[pod]
    }

    pub fn desire(&self, pod: usize) -> f64 {
        self.desire[pod]
    }

    pub fn weights(&self) -> &ObjectiveWeights {
        &self.weights
    }

    pub fn constraints(&self) -> &[Constraint; 3] {
        &self.constraints
    }

    pub fn penalty_weight(&self, kind: ConstraintKind) -> f64 {
        self.constraints
            .iter()
            .find(|c| c.kind == kind)
            .map_or(0.0, |c| c.penalty_weight)
    }

    /// Pods on the node they currently occupy; the rest unplaced.
    pub fn initial_assignment(&self) -> &Assignment {
        &self.initial
    }

    pub fn empty_assignment(&self) -> Assignment {
        Assignment::empty(self.num_pods, self.num_nodes)
    }

    /// Per-node (cpu, mem) load under `x`.
    pub fn node_loads(&self, x: &Assignment) -> (Vec<f64>, Vec<f64>) {
        let mut cpu = vec![0.0; self.num_nodes];
        let mut mem = vec![0.0; self.num_nodes];
        for p in 0..self.num_pods {
            for n in x.nodes_of(p) {
                cpu[n] += self.cpu[p];
                mem[n] += self.mem[p];
            }
        }
        (cpu, mem)
    }

    pub fn objective_terms(&self, x: &Assignment) -> ObjectiveTerms {
        let (cpu_load, mem_load) = self.node_loads(x);
        let w = &self.weights;

        let balance: f64 = (0..self.num_nodes)
            .map(|n| {
                let c = cpu_load[n] / self.cpu_cap[n];
                let m = mem_load[n] / self.mem_cap[n];
                c * c + m * m
            })
            .sum();

        let mut moves = 0.0;
        let mut placed_desire = 0.0;
        for p in 0..self.num_pods {
            for n in x.nodes_of(p) {
                moves += self.move_cost(p, n);
                placed_desire += self.desire[p];
            }
        }

        // Ordered pairs: each colliding pair contributes twice.
        let mut collisions = 0.0;
        for p in 0..self.num_pods {
            for n in x.nodes_of(p) {
                for &(q, a) in &self.partners[p] {
                    if x.get(q, n) {
                        collisions += a;
                    }
                }
            }
        }

        ObjectiveTerms {
            load_balance: balance * LOAD_BALANCE_SCALE * w.load_balance,
            move_cost: moves * w.move_cost,
            anti_affinity: collisions * w.anti_affinity,
            desire: -placed_desire * w.desire,
        }
    }

    /// Unpenalized objective value.
    pub fn objective(&self, x: &Assignment) -> f64 {
        self.objective_terms(x).total()
    }

    pub fn violations(&self, x: &Assignment) -> Violations {
        let (cpu_load, mem_load) = self.node_loads(x);

        let one_hot_relaxed = (0..self.num_pods)
            .map(|p| x.assigned_count(p) as f64 - 1.0)
            .fold(f64::NEG_INFINITY, f64::max);
        let cpu_limit = (0..self.num_nodes)
            .map(|n| cpu_load[n] - self.cpu_cap[n])
            .fold(f64::NEG_INFINITY, f64::max);
        let mem_limit = (0..self.num_nodes)
            .map(|n| mem_load[n] - self.mem_cap[n])
            .fold(f64::NEG_INFINITY, f64::max);

        Violations {
            one_hot_relaxed,
            cpu_limit,
            mem_limit,
        }
    }

    /// Σ over constraints of `weight · Σ_instances max(0, lhs - rhs)²`.
    pub fn penalty(&self, x: &Assignment) -> f64 {
        let (cpu_load, mem_load) = self.node_loads(x);

        let one_hot: f64 = (0..self.num_pods)
            .map(|p| excess_sq(x.assigned_count(p) as f64, 1.0))
            .sum();
        let cpu: f64 = (0..self.num_nodes)
            .map(|n| excess_sq(cpu_load[n], self.cpu_cap[n]))
            .sum();
        let mem: f64 = (0..self.num_nodes)
            .map(|n| excess_sq(mem_load[n], self.mem_cap[n]))
            .sum();

        self.penalty_weight(ConstraintKind::OneHotRelaxed) * one_hot
            + self.penalty_weight(ConstraintKind::CpuLimit) * cpu
            + self.penalty_weight(ConstraintKind::MemLimit) * mem
    }

    /// Objective plus weighted constraint penalties.
    pub fn energy(&self, x: &Assignment) -> f64 {
        self.objective(x) + self.penalty(x)
    }

    /// Every hard constraint holds, ignoring penalty weights.
    pub fn is_feasible(&self, x: &Assignment) -> bool {
        self.violations(x).is_feasible()
    }
}

/// `max(0, value - limit)²`.
pub(crate) fn excess_sq(value: f64, limit: f64) -> f64 {
    let over = (value - limit).max(0.0);
    over * over
}
