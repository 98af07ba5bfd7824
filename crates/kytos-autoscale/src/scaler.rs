//! Autoscale pre-processor — replica targets and desire scores.
//!
//! For each service, compares the request rate against the per-pod target
//! and decides how many instances should exist. Existing pods beyond that
//! count stay in the working set with a negative desire so the solver can
//! still keep them when capacity allows; missing instances are added as
//! synthetic unplaced pods.

use std::collections::{HashMap, HashSet};

use rand::Rng;
use tracing::{debug, warn};

use kytos_core::{ClusterState, OptimizeError, OptimizeResult, Pod, ServiceProfile};

/// Maximum change in replica count per solve call.
const MAX_SCALE_STEP: i64 = 2;

/// Desire for pods the system wants to keep.
const KEEP_DESIRE: f64 = 1.0;

/// Desire for pods marked for scale-in.
const REMOVE_DESIRE: f64 = -1.0;

/// A pod considered for placement this round.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkingPod {
    pub pod: Pod,
    /// How strongly the pod should exist, in `[-1, 1]`.
    pub desire: f64,
    /// Created by scale-out; not part of the caller's state.
    pub synthetic: bool,
}

/// Ordered pods paired 1:1 with their desire scores.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkingPodSet {
    entries: Vec<WorkingPod>,
}

impl WorkingPodSet {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &WorkingPod> {
        self.entries.iter()
    }

    pub fn get(&self, index: usize) -> Option<&WorkingPod> {
        self.entries.get(index)
    }

    pub fn desires(&self) -> Vec<f64> {
        self.entries.iter().map(|w| w.desire).collect()
    }

    fn push(&mut self, pod: Pod, desire: f64, synthetic: bool) {
        self.entries.push(WorkingPod {
            pod,
            desire,
            synthetic,
        });
    }
}

impl From<Vec<WorkingPod>> for WorkingPodSet {
    fn from(entries: Vec<WorkingPod>) -> Self {
        Self { entries }
    }
}

/// Scaling decision for a single service.
#[derive(Debug, Clone, PartialEq)]
pub struct ScalePlan {
    pub service_id: String,
    pub current_count: u32,
    pub needed: u32,
    pub desired_count: u32,
    pub urgency: f64,
    pub new_pod_desire: f64,
}

/// Output of [`preprocess`].
#[derive(Debug, Clone)]
pub struct Preprocessed {
    pub working_set: WorkingPodSet,
    pub plans: Vec<ScalePlan>,
}

/// Fraction of cluster resources still free, averaged over cpu and memory.
///
/// Usage is the sum over submitted pods. Can go negative on an
/// overcommitted cluster.
pub fn cluster_margin(state: &ClusterState) -> OptimizeResult<f64> {
    let cpu_capacity: f64 = state.nodes.iter().map(|n| n.cpu_capacity).sum();
    let mem_capacity: f64 = state.nodes.iter().map(|n| n.mem_capacity).sum();
    if !(cpu_capacity > 0.0) || !(mem_capacity > 0.0) {
        return Err(OptimizeError::InvalidInput(
            "total cluster capacity must be positive".to_string(),
        ));
    }

    let cpu_usage: f64 = state.pods.iter().map(|p| p.cpu_usage).sum();
    let mem_usage: f64 = state.pods.iter().map(|p| p.mem_usage).sum();

    let cpu_margin = 1.0 - cpu_usage / cpu_capacity;
    let mem_margin = 1.0 - mem_usage / mem_capacity;
    Ok((cpu_margin + mem_margin) / 2.0)
}

/// Decide the replica target for one service.
pub fn plan_service(service: &ServiceProfile, current_count: u32, cluster_margin: f64) -> ScalePlan {
    let needed = (service.current_request_rate / service.target_request_rate_per_pod)
        .ceil()
        .max(0.0) as i64;
    let current = i64::from(current_count);

    let mut desired = needed.max(i64::from(service.min_replicas));
    desired = desired.clamp((current - MAX_SCALE_STEP).max(0), current + MAX_SCALE_STEP);
    if let Some(max) = service.max_replicas {
        desired = desired.min(i64::from(max));
    }

    let urgency = if current > 0 {
        ((needed - current) as f64 / current as f64).clamp(0.0, 1.0)
    } else if desired > 0 {
        1.0
    } else {
        0.0
    };

    // Scarce headroom suppresses the desire to add capacity.
    let new_pod_desire = (urgency - (1.0 - cluster_margin)).clamp(-1.0, 1.0);

    ScalePlan {
        service_id: service.id.clone(),
        current_count,
        needed: needed.min(i64::from(u32::MAX)) as u32,
        desired_count: desired as u32,
        urgency,
        new_pod_desire,
    }
}

/// Build the working pod set for a solve call.
///
/// Service groups come first in services-list order, followed by pods with
/// no (or an unknown) service in input order. Every submitted pod appears
/// exactly once.
pub fn preprocess<R: Rng + ?Sized>(state: &ClusterState, rng: &mut R) -> OptimizeResult<Preprocessed> {
    let margin = cluster_margin(state)?;

    let known: HashSet<&str> = state.services.iter().map(|s| s.id.as_str()).collect();
    let mut by_service: HashMap<&str, Vec<&Pod>> = HashMap::new();
    for pod in &state.pods {
        if let Some(service) = pod.service.as_deref() {
            by_service.entry(service).or_default().push(pod);
        }
    }

    let mut taken_ids: HashSet<String> = state.pods.iter().map(|p| p.id.clone()).collect();
    let mut working_set = WorkingPodSet::default();
    let mut plans = Vec::with_capacity(state.services.len());
    let mut seen = HashSet::new();

    for service in &state.services {
        if !seen.insert(service.id.as_str()) {
            warn!(service = %service.id, "duplicate service profile ignored");
            continue;
        }

        let current_pods = by_service.get(service.id.as_str()).map(Vec::as_slice).unwrap_or(&[]);
        let current_count = current_pods.len() as u32;
        let plan = plan_service(service, current_count, margin);

        debug!(
            service = %service.id,
            current = plan.current_count,
            needed = plan.needed,
            desired = plan.desired_count,
            urgency = plan.urgency,
            new_pod_desire = plan.new_pod_desire,
            "scale plan"
        );

        if plan.desired_count >= current_count {
            for pod in current_pods {
                working_set.push((*pod).clone(), KEEP_DESIRE, false);
            }

            let (cpu_avg, mem_avg) = average_footprint(current_pods);
            for _ in current_count..plan.desired_count {
                let id = synthetic_id(&service.id, &mut taken_ids, rng);
                let pod = Pod {
                    id,
                    cpu_usage: cpu_avg,
                    mem_usage: mem_avg,
                    current_node: None,
                    service: Some(service.id.clone()),
                    priority: service.priority,
                };
                working_set.push(pod, plan.new_pod_desire, true);
            }
        } else {
            for (i, pod) in current_pods.iter().enumerate() {
                let desire = if (i as u32) < plan.desired_count {
                    KEEP_DESIRE
                } else {
                    REMOVE_DESIRE
                };
                working_set.push((*pod).clone(), desire, false);
            }
        }

        plans.push(plan);
    }

    for pod in &state.pods {
        let grouped = pod.service.as_deref().is_some_and(|s| known.contains(s));
        if !grouped {
            working_set.push(pod.clone(), KEEP_DESIRE, false);
        }
    }

    Ok(Preprocessed { working_set, plans })
}

fn average_footprint(pods: &[&Pod]) -> (f64, f64) {
    if pods.is_empty() {
        return (0.0, 0.0);
    }
    let count = pods.len() as f64;
    let cpu: f64 = pods.iter().map(|p| p.cpu_usage).sum();
    let mem: f64 = pods.iter().map(|p| p.mem_usage).sum();
    (cpu / count, mem / count)
}

fn synthetic_id<R: Rng + ?Sized>(service_id: &str, taken: &mut HashSet<String>, rng: &mut R) -> String {
    loop {
        let id = format!("{service_id}-{:06x}", rng.gen_range(0..0x100_0000u32));
        if taken.insert(id.clone()) {
            return id;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kytos_core::Node;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn node(id: &str) -> Node {
        Node {
            id: id.to_string(),
            cpu_capacity: 4000.0,
            mem_capacity: 16000.0,
            cpu_usage: 0.0,
            mem_usage: 0.0,
        }
    }

    fn pod(id: &str, service: Option<&str>) -> Pod {
        Pod {
            id: id.to_string(),
            cpu_usage: 500.0,
            mem_usage: 1024.0,
            current_node: Some("node1".to_string()),
            service: service.map(str::to_string),
            priority: 1.0,
        }
    }

    fn service(id: &str, rate: f64) -> ServiceProfile {
        ServiceProfile {
            id: id.to_string(),
            load_balancer_pod: format!("{id}-lb"),
            auto_scaling_enabled: true,
            min_replicas: 1,
            max_replicas: None,
            current_request_rate: rate,
            target_request_rate_per_pod: 100.0,
            priority: 10.0,
        }
    }

    fn rng() -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(7)
    }

    #[test]
    fn margin_averages_cpu_and_memory() {
        let state = ClusterState {
            nodes: vec![node("node1")],
            pods: vec![pod("a", None), pod("b", None)],
            services: vec![],
        };
        let margin = cluster_margin(&state).unwrap();
        let expected = ((1.0 - 1000.0 / 4000.0) + (1.0 - 2048.0 / 16000.0)) / 2.0;
        assert!((margin - expected).abs() < 1e-12);
    }

    #[test]
    fn margin_rejects_zero_capacity() {
        let mut n = node("node1");
        n.cpu_capacity = 0.0;
        let state = ClusterState {
            nodes: vec![n],
            pods: vec![pod("a", None)],
            services: vec![],
        };
        assert!(matches!(cluster_margin(&state), Err(OptimizeError::InvalidInput(_))));
    }

    #[test]
    fn scale_out_adds_synthetic_pods() {
        let state = ClusterState {
            nodes: vec![node("node1")],
            pods: vec![pod("web-1", Some("web")), pod("web-2", Some("web"))],
            services: vec![service("web", 400.0)],
        };
        let out = preprocess(&state, &mut rng()).unwrap();

        assert_eq!(out.plans[0].desired_count, 4);
        assert_eq!(out.working_set.len(), 4);

        let synthetic: Vec<_> = out.working_set.iter().filter(|w| w.synthetic).collect();
        assert_eq!(synthetic.len(), 2);
        for w in &synthetic {
            assert!(w.pod.id.starts_with("web-"));
            assert_eq!(w.pod.cpu_usage, 500.0);
            assert_eq!(w.pod.mem_usage, 1024.0);
            assert_eq!(w.pod.priority, 10.0);
            assert!(w.pod.current_node.is_none());
            assert_eq!(w.pod.service.as_deref(), Some("web"));
            assert!((w.desire - out.plans[0].new_pod_desire).abs() < 1e-12);
        }
        assert_ne!(synthetic[0].pod.id, synthetic[1].pod.id);
    }

    #[test]
    fn scale_out_desire_reflects_margin() {
        let state = ClusterState {
            nodes: vec![node("node1")],
            pods: vec![pod("web-1", Some("web")), pod("web-2", Some("web"))],
            services: vec![service("web", 400.0)],
        };
        let margin = cluster_margin(&state).unwrap();
        let plan = plan_service(&state.services[0], 2, margin);
        assert_eq!(plan.urgency, 1.0);
        assert!((plan.new_pod_desire - margin).abs() < 1e-12);
    }

    #[test]
    fn scale_in_marks_excess_for_removal() {
        let pods: Vec<Pod> = (1..=5).map(|i| pod(&format!("api-{i}"), Some("api"))).collect();
        let state = ClusterState {
            nodes: vec![node("node1")],
            pods,
            services: vec![service("api", 100.0)],
        };
        let out = preprocess(&state, &mut rng()).unwrap();

        // needed = 1, but damping limits the drop to current - 2.
        assert_eq!(out.plans[0].desired_count, 3);
        let desires = out.working_set.desires();
        assert_eq!(desires, vec![1.0, 1.0, 1.0, -1.0, -1.0]);
        let ids: Vec<_> = out.working_set.iter().map(|w| w.pod.id.as_str()).collect();
        assert_eq!(ids, vec!["api-1", "api-2", "api-3", "api-4", "api-5"]);
        assert!(out.working_set.iter().all(|w| !w.synthetic));
    }

    #[test]
    fn steady_state_keeps_everything() {
        let state = ClusterState {
            nodes: vec![node("node1")],
            pods: vec![pod("db-1", Some("db")), pod("db-2", Some("db"))],
            services: vec![service("db", 200.0)],
        };
        let out = preprocess(&state, &mut rng()).unwrap();
        assert_eq!(out.plans[0].desired_count, 2);
        assert_eq!(out.working_set.desires(), vec![1.0, 1.0]);
    }

    #[test]
    fn damping_limits_scale_out() {
        let mut svc = service("web", 10_000.0);
        svc.min_replicas = 0;
        let plan = plan_service(&svc, 3, 0.5);
        assert_eq!(plan.needed, 100);
        assert_eq!(plan.desired_count, 5);
    }

    #[test]
    fn respects_max_replicas() {
        let mut svc = service("web", 1000.0);
        svc.max_replicas = Some(4);
        let plan = plan_service(&svc, 3, 0.5);
        assert_eq!(plan.desired_count, 4);
    }

    #[test]
    fn respects_min_replicas() {
        let mut svc = service("web", 0.0);
        svc.min_replicas = 3;
        let plan = plan_service(&svc, 3, 0.5);
        assert_eq!(plan.desired_count, 3);
    }

    #[test]
    fn scale_band_holds_across_inputs() {
        for current in 0..8u32 {
            for rate in [0.0, 50.0, 250.0, 900.0, 5000.0] {
                let plan = plan_service(&service("s", rate), current, 0.3);
                let delta = i64::from(plan.desired_count) - i64::from(current);
                assert!(delta.abs() <= 2, "current={current} rate={rate} plan={plan:?}");
            }
        }
    }

    #[test]
    fn empty_service_gets_full_urgency() {
        let svc = service("new", 150.0);
        let plan = plan_service(&svc, 0, 0.9);
        assert_eq!(plan.desired_count, 2);
        assert_eq!(plan.urgency, 1.0);
        assert!((plan.new_pod_desire - 0.9).abs() < 1e-12);
    }

    #[test]
    fn empty_service_gets_zero_footprint() {
        let state = ClusterState {
            nodes: vec![node("node1")],
            pods: vec![pod("other", None)],
            services: vec![service("new", 100.0)],
        };
        let out = preprocess(&state, &mut rng()).unwrap();
        let synthetic: Vec<_> = out.working_set.iter().filter(|w| w.synthetic).collect();
        assert_eq!(synthetic.len(), 1);
        assert_eq!(synthetic[0].pod.cpu_usage, 0.0);
        assert_eq!(synthetic[0].pod.mem_usage, 0.0);
    }

    #[test]
    fn no_demand_no_minimum_means_zero_urgency() {
        let mut svc = service("idle", 0.0);
        svc.min_replicas = 0;
        let plan = plan_service(&svc, 0, 1.0);
        assert_eq!(plan.desired_count, 0);
        assert_eq!(plan.urgency, 0.0);
    }

    #[test]
    fn low_margin_suppresses_new_pods() {
        let plan = plan_service(&service("web", 1000.0), 1, -0.5);
        assert_eq!(plan.urgency, 1.0);
        assert_eq!(plan.new_pod_desire, -0.5);

        let plan = plan_service(&service("web", 100.0), 1, -1.0);
        assert_eq!(plan.new_pod_desire, -1.0);
    }

    #[test]
    fn unknown_service_passes_through() {
        let state = ClusterState {
            nodes: vec![node("node1")],
            pods: vec![pod("ghost-1", Some("ghost")), pod("plain", None)],
            services: vec![service("web", 100.0)],
        };
        let out = preprocess(&state, &mut rng()).unwrap();

        let pass: Vec<_> = out.working_set.iter().filter(|w| !w.synthetic).collect();
        assert_eq!(pass.len(), 2);
        assert!(pass.iter().all(|w| w.desire == 1.0));
        assert_eq!(pass[0].pod.id, "ghost-1");
        assert_eq!(pass[1].pod.id, "plain");
    }

    #[test]
    fn every_input_pod_appears_once() {
        let state = ClusterState {
            nodes: vec![node("node1"), node("node2")],
            pods: vec![
                pod("a-1", Some("a")),
                pod("x", None),
                pod("b-1", Some("b")),
                pod("a-2", Some("a")),
                pod("b-2", Some("b")),
                pod("b-3", Some("b")),
                pod("b-4", Some("b")),
            ],
            services: vec![service("b", 0.0), service("a", 500.0)],
        };
        let out = preprocess(&state, &mut rng()).unwrap();

        for p in &state.pods {
            let hits = out.working_set.iter().filter(|w| w.pod.id == p.id).count();
            assert_eq!(hits, 1, "pod {} appeared {hits} times", p.id);
        }

        // Service groups come first in services-list order.
        let order: Vec<_> = out
            .working_set
            .iter()
            .filter(|w| !w.synthetic)
            .map(|w| w.pod.id.as_str())
            .collect();
        assert_eq!(order, vec!["b-1", "b-2", "b-3", "b-4", "a-1", "a-2", "x"]);
    }

    #[test]
    fn synthetic_ids_avoid_collisions() {
        let mut taken: HashSet<String> = HashSet::new();
        let mut r = rng();
        for _ in 0..64 {
            synthetic_id("svc", &mut taken, &mut r);
        }
        assert_eq!(taken.len(), 64);
    }
}
