//! Domain types for the Kytos optimizer.
//!
//! These types describe one solve call: the cluster snapshot submitted by
//! the caller, the weights applied to the objective, and the placement plan
//! returned. All types serialize to/from the JSON wire format.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{OptimizeError, OptimizeResult};

/// Unique identifier for a node in the cluster.
pub type NodeId = String;

/// Unique identifier for a pod within one solve call.
pub type PodId = String;

/// Unique identifier for a service profile.
pub type ServiceId = String;

// ── Cluster ────────────────────────────────────────────────────────

/// A placement target with finite resources.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Node {
    pub id: NodeId,
    /// CPU capacity in milliCPU.
    pub cpu_capacity: f64,
    /// Memory capacity in MiB.
    pub mem_capacity: f64,
    #[serde(default)]
    pub cpu_usage: f64,
    #[serde(default)]
    pub mem_usage: f64,
}

/// Scaling profile for a service backed by one or more pods.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceProfile {
    pub id: ServiceId,
    pub load_balancer_pod: String,
    #[serde(default)]
    pub auto_scaling_enabled: bool,
    #[serde(default = "default_min_replicas")]
    pub min_replicas: u32,
    #[serde(default)]
    pub max_replicas: Option<u32>,
    #[serde(default)]
    pub current_request_rate: f64,
    #[serde(default = "default_target_rate")]
    pub target_request_rate_per_pod: f64,
    /// Higher is more important.
    #[serde(default = "default_service_priority")]
    pub priority: f64,
}

/// A unit of workload assignable to exactly one node or none.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Pod {
    pub id: PodId,
    /// CPU usage in milliCPU.
    pub cpu_usage: f64,
    /// Memory usage in MiB.
    pub mem_usage: f64,
    /// `None` means the pod is not placed yet.
    #[serde(default)]
    pub current_node: Option<NodeId>,
    #[serde(default)]
    pub service: Option<ServiceId>,
    /// Used when `service` does not resolve to a profile.
    #[serde(default = "default_pod_priority")]
    pub priority: f64,
}

/// Everything the optimizer sees for one solve call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClusterState {
    pub nodes: Vec<Node>,
    pub pods: Vec<Pod>,
    pub services: Vec<ServiceProfile>,
}

fn default_min_replicas() -> u32 {
    1
}

fn default_target_rate() -> f64 {
    100.0
}

fn default_service_priority() -> f64 {
    10.0
}

fn default_pod_priority() -> f64 {
    1.0
}

impl ClusterState {
    /// Look up a service profile by id.
    pub fn service(&self, id: &str) -> Option<&ServiceProfile> {
        self.services.iter().find(|s| s.id == id)
    }

    /// Reject inputs the optimizer cannot solve against.
    ///
    /// Runs before any solving begins; every failure is `InvalidInput`.
    pub fn validate(&self) -> OptimizeResult<()> {
        if self.nodes.is_empty() {
            return Err(OptimizeError::InvalidInput("no nodes supplied".to_string()));
        }
        if self.pods.is_empty() {
            return Err(OptimizeError::InvalidInput("no pods supplied".to_string()));
        }

        let mut node_ids = HashSet::new();
        for node in &self.nodes {
            if !node_ids.insert(node.id.as_str()) {
                return Err(OptimizeError::InvalidInput(format!(
                    "duplicate node id: {}",
                    node.id
                )));
            }
            if !(node.cpu_capacity > 0.0) || !(node.mem_capacity > 0.0) {
                return Err(OptimizeError::InvalidInput(format!(
                    "node {} must have positive cpu and memory capacity",
                    node.id
                )));
            }
        }

        let mut pod_ids = HashSet::new();
        for pod in &self.pods {
            if !pod_ids.insert(pod.id.as_str()) {
                return Err(OptimizeError::InvalidInput(format!(
                    "duplicate pod id: {}",
                    pod.id
                )));
            }
            if !(pod.cpu_usage >= 0.0) || !(pod.mem_usage >= 0.0) {
                return Err(OptimizeError::InvalidInput(format!(
                    "pod {} has negative resource usage",
                    pod.id
                )));
            }
        }

        for service in &self.services {
            if !(service.target_request_rate_per_pod > 0.0) {
                return Err(OptimizeError::InvalidInput(format!(
                    "service {} must have a positive target_request_rate_per_pod",
                    service.id
                )));
            }
            if let Some(max) = service.max_replicas
                && max < service.min_replicas
            {
                return Err(OptimizeError::InvalidInput(format!(
                    "service {}: max_replicas {} is below min_replicas {}",
                    service.id, max, service.min_replicas
                )));
            }
        }

        Ok(())
    }
}

// ── Settings ───────────────────────────────────────────────────────

/// Objective weights, penalty multipliers, and the solver run budget.
///
/// This is the single canonical default table. Any field omitted from a
/// request falls back to the value in [`AnnealingSettings::default`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AnnealingSettings {
    pub load_balance_weight: f64,
    pub move_cost_weight: f64,
    pub anti_affinity_weight: f64,
    pub desire_weight: f64,
    pub cpu_limit_weight: f64,
    pub mem_limit_weight: f64,
    pub one_hot_relaxed_weight: f64,
    /// Independent annealing runs.
    pub num_reads: u32,
    /// Sweeps per run; one sweep is |pods| x |nodes| candidate moves.
    pub num_sweeps: u32,
    /// Fixed seed for reproducible solves. Drawn from entropy when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl Default for AnnealingSettings {
    fn default() -> Self {
        Self {
            load_balance_weight: 5.0,
            move_cost_weight: 1.0,
            anti_affinity_weight: 5.0,
            desire_weight: 10.0,
            cpu_limit_weight: 1.0,
            mem_limit_weight: 1.0,
            one_hot_relaxed_weight: 20.0,
            num_reads: 100,
            num_sweeps: 1000,
            seed: None,
        }
    }
}

impl AnnealingSettings {
    pub fn validate(&self) -> OptimizeResult<()> {
        let weights = [
            ("load_balance_weight", self.load_balance_weight),
            ("move_cost_weight", self.move_cost_weight),
            ("anti_affinity_weight", self.anti_affinity_weight),
            ("desire_weight", self.desire_weight),
            ("cpu_limit_weight", self.cpu_limit_weight),
            ("mem_limit_weight", self.mem_limit_weight),
            ("one_hot_relaxed_weight", self.one_hot_relaxed_weight),
        ];
        for (name, value) in weights {
            if !(value >= 0.0) || !value.is_finite() {
                return Err(OptimizeError::InvalidInput(format!(
                    "{name} must be a finite non-negative number, got {value}"
                )));
            }
        }
        if self.num_reads == 0 {
            return Err(OptimizeError::InvalidInput("num_reads must be at least 1".to_string()));
        }
        if self.num_sweeps == 0 {
            return Err(OptimizeError::InvalidInput("num_sweeps must be at least 1".to_string()));
        }
        Ok(())
    }
}

// ── Plan ───────────────────────────────────────────────────────────

/// What the orchestrator should do with a pod.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Create,
    Move,
    Keep,
    Remove,
}

/// A single placement instruction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Action {
    pub pod_id: PodId,
    #[serde(default)]
    pub target_node_id: Option<NodeId>,
    pub action: ActionType,
}

/// Body of a solve call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationRequest {
    pub state: ClusterState,
    /// When absent, the server-configured defaults apply.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<AnnealingSettings>,
}

/// The placement plan returned for a solve call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OptimizationResponse {
    /// Pods after placement; removed pods are absent.
    pub pods: Vec<Pod>,
    pub placements: Vec<Action>,
    /// Unpenalized objective of the chosen assignment (lower is better).
    pub energy: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str) -> Node {
        Node {
            id: id.to_string(),
            cpu_capacity: 4000.0,
            mem_capacity: 16000.0,
            cpu_usage: 0.0,
            mem_usage: 0.0,
        }
    }

    fn pod(id: &str) -> Pod {
        Pod {
            id: id.to_string(),
            cpu_usage: 500.0,
            mem_usage: 1024.0,
            current_node: None,
            service: None,
            priority: 1.0,
        }
    }

    fn state() -> ClusterState {
        ClusterState {
            nodes: vec![node("node1")],
            pods: vec![pod("pod1")],
            services: vec![],
        }
    }

    #[test]
    fn pod_defaults_from_json() {
        let p: Pod = serde_json::from_str(r#"{"id":"p","cpu_usage":1,"mem_usage":2}"#).unwrap();
        assert_eq!(p.priority, 1.0);
        assert!(p.current_node.is_none());
        assert!(p.service.is_none());
    }

    #[test]
    fn service_defaults_from_json() {
        let s: ServiceProfile =
            serde_json::from_str(r#"{"id":"web","load_balancer_pod":"lb"}"#).unwrap();
        assert_eq!(s.min_replicas, 1);
        assert_eq!(s.max_replicas, None);
        assert_eq!(s.target_request_rate_per_pod, 100.0);
        assert_eq!(s.priority, 10.0);
        assert!(!s.auto_scaling_enabled);
    }

    #[test]
    fn partial_settings_fill_canonical_defaults() {
        let s: AnnealingSettings = serde_json::from_str(r#"{"num_reads": 7}"#).unwrap();
        assert_eq!(s.num_reads, 7);
        assert_eq!(s.desire_weight, 10.0);
        assert_eq!(s.one_hot_relaxed_weight, 20.0);
        assert_eq!(s.num_sweeps, 1000);
    }

    #[test]
    fn action_type_serializes_lowercase() {
        let a = Action {
            pod_id: "p".to_string(),
            target_node_id: None,
            action: ActionType::Remove,
        };
        let json = serde_json::to_value(&a).unwrap();
        assert_eq!(json["action"], "remove");
    }

    #[test]
    fn request_without_settings() {
        let req: OptimizationRequest = serde_json::from_str(
            r#"{"state":{"nodes":[],"pods":[],"services":[]}}"#,
        )
        .unwrap();
        assert!(req.settings.is_none());
    }

    #[test]
    fn valid_state_passes() {
        assert!(state().validate().is_ok());
    }

    #[test]
    fn empty_nodes_rejected() {
        let mut s = state();
        s.nodes.clear();
        assert!(matches!(s.validate(), Err(OptimizeError::InvalidInput(_))));
    }

    #[test]
    fn empty_pods_rejected() {
        let mut s = state();
        s.pods.clear();
        assert!(matches!(s.validate(), Err(OptimizeError::InvalidInput(_))));
    }

    #[test]
    fn zero_capacity_rejected() {
        let mut s = state();
        s.nodes[0].mem_capacity = 0.0;
        assert!(matches!(s.validate(), Err(OptimizeError::InvalidInput(_))));
    }

    #[test]
    fn duplicate_pod_ids_rejected() {
        let mut s = state();
        s.pods.push(pod("pod1"));
        assert!(matches!(s.validate(), Err(OptimizeError::InvalidInput(_))));
    }

    #[test]
    fn max_below_min_replicas_rejected() {
        let mut s = state();
        s.services.push(ServiceProfile {
            id: "web".to_string(),
            load_balancer_pod: "lb".to_string(),
            auto_scaling_enabled: true,
            min_replicas: 3,
            max_replicas: Some(2),
            current_request_rate: 0.0,
            target_request_rate_per_pod: 100.0,
            priority: 10.0,
        });
        assert!(matches!(s.validate(), Err(OptimizeError::InvalidInput(_))));
    }

    #[test]
    fn zero_target_rate_rejected() {
        let mut s = state();
        s.services.push(ServiceProfile {
            id: "web".to_string(),
            load_balancer_pod: "lb".to_string(),
            auto_scaling_enabled: false,
            min_replicas: 1,
            max_replicas: None,
            current_request_rate: 10.0,
            target_request_rate_per_pod: 0.0,
            priority: 10.0,
        });
        assert!(matches!(s.validate(), Err(OptimizeError::InvalidInput(_))));
    }

    #[test]
    fn settings_validation() {
        assert!(AnnealingSettings::default().validate().is_ok());

        let negative = AnnealingSettings {
            desire_weight: -1.0,
            ..Default::default()
        };
        assert!(negative.validate().is_err());

        let no_reads = AnnealingSettings {
            num_reads: 0,
            ..Default::default()
        };
        assert!(no_reads.validate().is_err());
    }
}
