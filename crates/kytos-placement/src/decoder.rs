//! Decoding — winning assignment matrix to placement actions.
//!
//! Original pods are reported in request order: placed pods become
//! CREATE / MOVE / KEEP, unplaced pods become REMOVE. Synthetic scale-out
//! pods follow in working-set order and only appear when the solver placed
//! them.

use std::collections::HashMap;

use tracing::warn;

use kytos_autoscale::WorkingPodSet;
use kytos_core::{Action, ActionType, Node, Pod};

use crate::formulator::Assignment;

/// Final pod list and the actions that produce it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedPlan {
    pub pods: Vec<Pod>,
    pub actions: Vec<Action>,
}

/// Map `x` (indexed by `working_set`) back onto pod identities.
pub fn decode(x: &Assignment, original: &[Pod], working_set: &WorkingPodSet, nodes: &[Node]) -> DecodedPlan {
    let mut plan = DecodedPlan::default();
    let index_of: HashMap<&str, usize> = working_set
        .iter()
        .enumerate()
        .map(|(index, w)| (w.pod.id.as_str(), index))
        .collect();

    for pod in original {
        let target = index_of
            .get(pod.id.as_str())
            .and_then(|&index| chosen_node(x, index, &pod.id, nodes));

        match target {
            Some(node) => plan.place(pod, node),
            None => plan.actions.push(Action {
                pod_id: pod.id.clone(),
                target_node_id: None,
                action: ActionType::Remove,
            }),
        }
    }

    for (index, w) in working_set.iter().enumerate() {
        if !w.synthetic {
            continue;
        }
        if let Some(node) = chosen_node(x, index, &w.pod.id, nodes) {
            plan.place(&w.pod, node);
        }
    }

    plan
}

impl DecodedPlan {
    fn place(&mut self, pod: &Pod, node: &Node) {
        let action = match pod.current_node.as_deref() {
            None => ActionType::Create,
            Some(current) if current == node.id => ActionType::Keep,
            Some(_) => ActionType::Move,
        };

        self.pods.push(Pod {
            current_node: Some(node.id.clone()),
            ..pod.clone()
        });
        self.actions.push(Action {
            pod_id: pod.id.clone(),
            target_node_id: Some(node.id.clone()),
            action,
        });
    }
}

/// First node in node order; extra assignments are logged and dropped.
fn chosen_node<'n>(x: &Assignment, index: usize, pod_id: &str, nodes: &'n [Node]) -> Option<&'n Node> {
    let mut assigned = x.nodes_of(index);
    let first = assigned.next()?;

    let extra: Vec<&str> = assigned.map(|n| nodes[n].id.as_str()).collect();
    if !extra.is_empty() {
        warn!(
            pod = pod_id,
            kept = %nodes[first].id,
            dropped = ?extra,
            "pod assigned to multiple nodes; keeping first"
        );
    }

    Some(&nodes[first])
}
