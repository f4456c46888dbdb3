//! Fair queue ordering across users. Pure: the same descriptor list always
//! yields the same ordered list.

use std::cmp::Reverse;
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::pods::descriptor::PodDescriptor;

/// A Running pod with its queue positions assigned. Ordinals are cumulative
/// GPU counts: a pod's ordinal is the number of GPUs ahead of it in the
/// queue, itself included.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderedPod {
    #[serde(flatten)]
    pub pod: PodDescriptor,
    pub user_ordinal: u32,
    pub global_ordinal: u32,
}

/// Derives the global queue order from the current descriptor list. Only
/// Running pods participate; the output walks the queue from most to least
/// important.
pub fn calculate_order(pods: &[PodDescriptor]) -> Vec<OrderedPod> {
    let mut pods_by_user: HashMap<Option<String>, Vec<OrderedPod>> = HashMap::new();
    for pod in pods.iter().filter(|p| p.is_running()) {
        pods_by_user
            .entry(pod.user.clone())
            .or_default()
            .push(OrderedPod {
                pod: pod.clone(),
                user_ordinal: 0,
                global_ordinal: 0,
            });
    }

    let mut pods_all = Vec::new();
    for (user, mut bucket) in pods_by_user {
        if user.is_some() {
            assign_user_ordinals(&mut bucket);
        } else {
            // Anonymous jobs carry no queue of their own; the raw GPU count
            // stands in as the ordinal so smaller requests sort first in
            // the global step.
            for pod in &mut bucket {
                pod.user_ordinal = pod.pod.num_gpu;
            }
        }
        pods_all.append(&mut bucket);
    }

    // Higher key is higher priority.
    pods_all.sort_by(|a, b| global_key(b).cmp(&global_key(a)));

    let mut gpu_accumulation = 0;
    for pod in &mut pods_all {
        gpu_accumulation += pod.pod.num_gpu;
        pod.global_ordinal = gpu_accumulation;
    }
    pods_all
}

/// Orders one known user's bucket and accumulates their GPU counts into
/// `user_ordinal`.
fn assign_user_ordinals(bucket: &mut [OrderedPod]) {
    // Higher key is higher priority.
    bucket.sort_by(|a, b| user_key(&b.pod).cmp(&user_key(&a.pod)));
    let mut gpu_accumulation = 0;
    for pod in bucket {
        gpu_accumulation += pod.pod.num_gpu;
        pod.user_ordinal = gpu_accumulation;
    }
}

/// Composite key for ordering within one user's queue; the first differing
/// field decides. A CPU job is free and always ranks above GPU jobs, then
/// user-set priority, then earlier start, with the name as final tiebreak.
fn user_key(pod: &PodDescriptor) -> (bool, i64, Reverse<DateTime<Utc>>, Reverse<&str>) {
    (
        pod.num_gpu == 0,
        pod.user_priority,
        Reverse(pod.date_started),
        Reverse(pod.name.as_str()),
    )
}

/// Composite key for the global queue: CPU jobs first, known users before
/// anonymous ones, then position within the owner's queue, earlier start,
/// and name.
fn global_key(pod: &OrderedPod) -> (bool, bool, Reverse<u32>, Reverse<DateTime<Utc>>, Reverse<&str>) {
    (
        pod.pod.num_gpu == 0,
        pod.pod.user.is_some(),
        Reverse(pod.user_ordinal),
        Reverse(pod.pod.date_started),
        Reverse(pod.pod.name.as_str()),
    )
}
