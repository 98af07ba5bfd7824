//! Solve pipeline — validate, scale, formulate, anneal, decode.

use std::time::Instant;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info};

use kytos_autoscale::{Preprocessed, preprocess};
use kytos_core::{AnnealingSettings, ClusterState, OptimizationResponse, OptimizeResult};

use crate::annealer::{AnnealParams, anneal};
use crate::decoder::decode;
use crate::formulator::formulate;

/// Separates the synthetic-id stream from the per-read annealing seeds.
const SYNTHETIC_ID_STREAM: u64 = 0x5EED_0F1D_5EED_0F1D;

/// Compute a placement plan for one cluster snapshot.
///
/// Stateless: `state` is only read, and nothing outlives the call.
pub fn solve_placement(state: &ClusterState, settings: &AnnealingSettings) -> OptimizeResult<OptimizationResponse> {
    state.validate()?;
    settings.validate()?;

    let started = Instant::now();
    let seed = settings.seed.unwrap_or_else(rand::random);

    info!(
        nodes = state.nodes.len(),
        pods = state.pods.len(),
        services = state.services.len(),
        reads = settings.num_reads,
        sweeps = settings.num_sweeps,
        seed,
        "solving placement"
    );

    let mut id_rng = ChaCha8Rng::seed_from_u64(seed ^ SYNTHETIC_ID_STREAM);
    let Preprocessed { working_set, plans } = preprocess(state, &mut id_rng)?;
    let synthetic = working_set.iter().filter(|w| w.synthetic).count();
    debug!(
        working_pods = working_set.len(),
        synthetic,
        scaled_services = plans.len(),
        "working set built"
    );

    let problem = formulate(&working_set, state, settings);
    let outcome = anneal(
        &problem,
        &AnnealParams {
            num_reads: settings.num_reads,
            num_sweeps: settings.num_sweeps,
            seed,
        },
    )?;

    let plan = decode(&outcome.assignment, &state.pods, &working_set, &state.nodes);

    info!(
        energy = outcome.objective,
        penalized_energy = outcome.penalized_energy,
        winning_read = outcome.read_index,
        feasible_reads = outcome.feasible_reads,
        actions = plan.actions.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "placement solved"
    );

    Ok(OptimizationResponse {
        pods: plan.pods,
        placements: plan.actions,
        energy: outcome.objective,
    })
}
