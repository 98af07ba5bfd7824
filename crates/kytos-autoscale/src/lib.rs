//! kytos-autoscale — decides which pods should exist this round.
//!
//! Turns a `ClusterState` into a working pod set: every submitted pod plus
//! synthetic scale-out candidates, each paired with a desire score in
//! `[-1, 1]` that the placement objective rewards (or penalizes) placing.
//!
//! # Scaling Algorithm
//!
//! ```text
//! cluster_margin = mean(1 - Σpod.cpu / Σnode.cpu_cap, 1 - Σpod.mem / Σnode.mem_cap)
//!
//! per service:
//!     needed  = ceil(current_request_rate / target_request_rate_per_pod)
//!     desired = clamp(max(needed, min_replicas), current - 2, current + 2)
//!     desired = min(desired, max_replicas)          // when set
//!     urgency = clamp((needed - current) / current, 0, 1)
//!     new_pod_desire = clamp(urgency - (1 - cluster_margin), -1, 1)
//!
//!     desired > current: keep all (1.0), add synthetic pods (new_pod_desire)
//!     desired < current: keep first `desired` (1.0), rest marked (-1.0)
//! ```
//!
//! The ±2 band damps how fast a service can grow or shrink per call.

pub mod scaler;

pub use scaler::{
    Preprocessed, ScalePlan, WorkingPod, WorkingPodSet, cluster_margin, plan_service,
    preprocess,
};
