use chrono::{DateTime, TimeZone, Utc};
use kube_watchdog::fairness::calculate_order;
use kube_watchdog::pods::descriptor::{PodDescriptor, PodPhase};

fn base_date() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
}

fn pod(name: &str, user: Option<&str>, num_gpu: u32, user_priority: i64) -> PodDescriptor {
    PodDescriptor {
        name: name.to_string(),
        user: user.map(str::to_string),
        status: PodPhase::Running,
        date_created: base_date(),
        date_started: base_date(),
        num_gpu,
        user_priority,
    }
}

#[test]
fn empty_input_yields_empty_order() {
    assert!(calculate_order(&[]).is_empty());
}

#[test]
fn single_cpu_job() {
    let order = calculate_order(&[pod("alpha", Some("u1"), 0, 0)]);
    assert_eq!(order.len(), 1);
    assert_eq!(order[0].pod.name, "alpha");
    assert_eq!(order[0].user_ordinal, 0);
    assert_eq!(order[0].global_ordinal, 0);
}

#[test]
fn only_running_pods_participate() {
    let mut pending = pod("pending", Some("u1"), 1, 0);
    pending.status = PodPhase::Pending;
    let mut failed = pod("failed", Some("u1"), 1, 0);
    failed.status = PodPhase::Failed;

    let order = calculate_order(&[pending, pod("running", Some("u1"), 1, 0), failed]);
    assert_eq!(order.len(), 1);
    assert_eq!(order[0].pod.name, "running");
}

#[test]
fn tie_on_start_date_breaks_by_name() {
    let order = calculate_order(&[
        pod("gamma", Some("u1"), 1, 0),
        pod("beta", Some("u1"), 1, 0),
    ]);
    let names: Vec<&str> = order.iter().map(|p| p.pod.name.as_str()).collect();
    assert_eq!(names, vec!["beta", "gamma"]);
    assert_eq!(order[0].user_ordinal, 1);
    assert_eq!(order[1].user_ordinal, 2);
    assert_eq!(order[0].global_ordinal, 1);
    assert_eq!(order[1].global_ordinal, 2);
}

#[test]
fn cpu_job_outranks_gpu_job_of_same_user_despite_priority() {
    let order = calculate_order(&[
        pod("g", Some("u1"), 2, 5),
        pod("c", Some("u1"), 0, 0),
    ]);
    let names: Vec<&str> = order.iter().map(|p| p.pod.name.as_str()).collect();
    assert_eq!(names, vec!["c", "g"]);
    assert_eq!(order[0].user_ordinal, 0);
    assert_eq!(order[1].user_ordinal, 2);
}

#[test]
fn known_user_outranks_anonymous() {
    let order = calculate_order(&[pod("a", None, 1, 0), pod("k", Some("u1"), 1, 0)]);
    let names: Vec<&str> = order.iter().map(|p| p.pod.name.as_str()).collect();
    assert_eq!(names, vec!["k", "a"]);
    assert_eq!(order[0].global_ordinal, 1);
    assert_eq!(order[1].global_ordinal, 2);
}

#[test]
fn higher_priority_ranks_first_within_user() {
    let order = calculate_order(&[
        pod("low", Some("u1"), 1, 0),
        pod("high", Some("u1"), 1, 10),
    ]);
    let names: Vec<&str> = order.iter().map(|p| p.pod.name.as_str()).collect();
    assert_eq!(names, vec!["high", "low"]);
}

#[test]
fn earlier_start_ranks_first_within_user() {
    let mut early = pod("late-name", Some("u1"), 1, 0);
    early.date_started = base_date() - chrono::Duration::hours(1);
    let order = calculate_order(&[pod("aaa", Some("u1"), 1, 0), early]);
    let names: Vec<&str> = order.iter().map(|p| p.pod.name.as_str()).collect();
    assert_eq!(names, vec!["late-name", "aaa"]);
}

#[test]
fn anonymous_pods_prefer_smaller_requests_first() {
    let order = calculate_order(&[pod("big", None, 4, 0), pod("small", None, 1, 0)]);
    let names: Vec<&str> = order.iter().map(|p| p.pod.name.as_str()).collect();
    assert_eq!(names, vec!["small", "big"]);
    // Anonymous ordinals are the raw GPU counts, not a cumulative sum.
    assert_eq!(order[0].user_ordinal, 1);
    assert_eq!(order[1].user_ordinal, 4);
}

#[test]
fn users_interleave_by_queue_position() {
    // Each user's first pod queues ahead of every user's second pod.
    let order = calculate_order(&[
        pod("u1-first", Some("u1"), 1, 0),
        pod("u1-second", Some("u1"), 1, 0),
        pod("u2-first", Some("u2"), 1, 0),
        pod("u2-second", Some("u2"), 1, 0),
    ]);
    let names: Vec<&str> = order.iter().map(|p| p.pod.name.as_str()).collect();
    assert_eq!(
        names,
        vec!["u1-first", "u2-first", "u1-second", "u2-second"]
    );
}

#[test]
fn global_ordinal_is_cumulative_and_totals_the_gpus() {
    let pods = vec![
        pod("a", Some("u1"), 2, 0),
        pod("b", Some("u1"), 1, 3),
        pod("c", Some("u2"), 3, 0),
        pod("d", None, 1, 0),
        pod("e", Some("u2"), 0, 0),
    ];
    let order = calculate_order(&pods);
    assert_eq!(order.len(), 5);

    let total: u32 = pods.iter().map(|p| p.num_gpu).sum();
    let mut previous = 0;
    for entry in &order {
        assert!(entry.global_ordinal >= previous);
        previous = entry.global_ordinal;
    }
    assert_eq!(order.last().unwrap().global_ordinal, total);
}

#[test]
fn user_ordinals_total_each_users_gpus() {
    let pods = vec![
        pod("a", Some("u1"), 2, 0),
        pod("b", Some("u1"), 1, 3),
        pod("c", Some("u2"), 3, 0),
    ];
    let order = calculate_order(&pods);

    let max_for = |user: &str| {
        order
            .iter()
            .filter(|p| p.pod.user.as_deref() == Some(user))
            .map(|p| p.user_ordinal)
            .max()
            .unwrap()
    };
    assert_eq!(max_for("u1"), 3);
    assert_eq!(max_for("u2"), 3);
}

#[test]
fn ordering_is_deterministic() {
    let pods = vec![
        pod("a", Some("u1"), 2, 0),
        pod("b", Some("u2"), 1, 3),
        pod("c", None, 3, 0),
        pod("d", None, 0, 0),
        pod("e", Some("u1"), 1, -2),
    ];
    let first = calculate_order(&pods);
    let second = calculate_order(&pods);
    assert_eq!(first, second);
}
