mod common;

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{SharedString, Unit};
use metrics_util::CompositeKey;
use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};
use portico::cache::TtlPolicy;
use portico::domain::{EndpointId, ProviderId, RequestDescriptor};
use serial_test::serial;

use common::{Harness, ScriptedAdapter};

fn snapshotter() -> &'static Snapshotter {
    static SNAPSHOTTER: OnceLock<Snapshotter> = OnceLock::new();
    SNAPSHOTTER.get_or_init(|| {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();
        recorder
            .install()
            .expect("debug metrics recorder should install in this test process");
        snapshotter
    })
}

type Snapshot = Vec<(CompositeKey, Option<Unit>, Option<SharedString>, DebugValue)>;

fn take_snapshot() -> Snapshot {
    snapshotter().snapshot().into_vec()
}

/// Sum of a counter across label sets matching every `(key, value)` pair.
fn counter(snapshot: &Snapshot, name: &str, labels: &[(&str, &str)]) -> u64 {
    snapshot
        .iter()
        .filter(|(key, _, _, _)| key.key().name() == name)
        .filter(|(key, _, _, _)| {
            labels.iter().all(|(label, value)| {
                key.key()
                    .labels()
                    .any(|candidate| candidate.key() == *label && candidate.value() == *value)
            })
        })
        .map(|(_, _, _, value)| match value {
            DebugValue::Counter(count) => *count,
            _ => 0,
        })
        .sum()
}

fn request(provider: &str, id: &str) -> RequestDescriptor {
    RequestDescriptor::new(provider, "item", [("id", id)]).expect("valid descriptor")
}

#[tokio::test]
#[serial]
async fn cache_and_upstream_counters() {
    snapshotter();
    let adapter = ScriptedAdapter::echo("metered");
    let dispatcher = Harness::new(vec![adapter.clone()]).build();

    dispatcher.handle(&request("metered", "1")).await.expect("miss");
    dispatcher.handle(&request("metered", "1")).await.expect("hit");
    dispatcher.handle(&request("metered", "1")).await.expect("hit");
    dispatcher.handle(&request("metered", "2")).await.expect("miss");

    let snapshot = take_snapshot();
    assert_eq!(counter(&snapshot, "portico_cache_miss_total", &[]), 2);
    assert_eq!(counter(&snapshot, "portico_cache_hit_total", &[]), 2);
    assert_eq!(
        counter(
            &snapshot,
            "portico_upstream_attempt_total",
            &[("provider", "metered")]
        ),
        2
    );
    assert_eq!(adapter.calls(), 2);
}

#[tokio::test]
#[serial]
async fn circuit_counters() {
    snapshotter();
    let adapter = ScriptedAdapter::failing("tripped");
    let policy = TtlPolicy::new(Duration::from_secs(3600), Duration::ZERO).with_endpoint(
        ProviderId::parse("tripped").expect("provider"),
        EndpointId::parse("item").expect("endpoint"),
        Some(Duration::ZERO),
        None,
    );
    let dispatcher = Harness::new(vec![adapter.clone()])
        .policy(policy)
        .failure_threshold(2)
        .build();

    for id in ["1", "2", "3", "4"] {
        dispatcher
            .handle(&request("tripped", id))
            .await
            .expect_err("provider is down");
    }

    assert_eq!(adapter.calls(), 2);
    let snapshot = take_snapshot();
    assert_eq!(
        counter(
            &snapshot,
            "portico_upstream_failure_total",
            &[("provider", "tripped"), ("kind", "network")]
        ),
        2
    );
    assert_eq!(
        counter(&snapshot, "portico_circuit_transition_total", &[("to", "open")]),
        1
    );
    assert_eq!(counter(&snapshot, "portico_circuit_rejected_total", &[]), 2);
    assert_eq!(counter(&snapshot, "portico_cache_bypass_total", &[]), 2);
}
