mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::{count_scan_plan, single_count, test_context, Partition, ScriptedIndex};
use rand::Rng;
use serde_json::json;
use streamexec::datastore::{
    Inclusion, KeyspaceScanVectors, MemoryIndex, ScanConsistency, ScanVector, VectorEntry,
};
use streamexec::execution::{build_root, execute, spawn_operator, Context, Listener, StopCause};
use streamexec::plan::{IndexCountScan, KeyspaceTerm, PlanSpan, SpanExpr};
use streamexec::{AnnotatedValue, ExecError, PlanArena, PlanKind};

#[derive(Default)]
struct StopNotices(AtomicUsize);

impl StopNotices {
    fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

impl Listener for StopNotices {
    fn child_stopped(&self, _child: &str) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn test_counts_are_summed_across_partitions() {
    let index = Arc::new(ScriptedIndex::counts(&[5, 0, 7]));
    let (arena, root) = count_scan_plan(index.clone());
    let ctx = test_context();

    let op = build_root(&arena, ctx.pipeline_cap()).unwrap();
    let notices = Arc::new(StopNotices::default());
    op.add_listener(notices.clone());
    let items = execute(op.clone(), ctx.clone(), None).await.unwrap();

    assert_eq!(single_count(&items), 12);
    assert_eq!(index.started(), 3);
    assert_eq!(ctx.error_count(), 0);
    assert_eq!(ctx.phase_operators("IndexCountScan"), 1);
    assert!(arena.get(root).unwrap().readonly());
    assert_eq!(notices.count(), 1);
    assert_eq!(op.base().listener_count(), 0);
}

#[tokio::test]
async fn test_total_overflow_is_reported() {
    let index = Arc::new(ScriptedIndex::counts(&[i64::MAX, 1]));
    let (arena, _) = count_scan_plan(index);
    let ctx = test_context();

    let op = build_root(&arena, ctx.pipeline_cap()).unwrap();
    let items = execute(op.clone(), ctx.clone(), None).await.unwrap();

    assert!(items.is_empty());
    let errors = ctx.errors();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].to_string().contains("overflows"), "unexpected error: {}", errors[0]);
    assert!(op.base().is_closed());
}

#[tokio::test]
async fn test_empty_partitions_count_zero() {
    let index = Arc::new(ScriptedIndex::counts(&[0, 0]));
    let (arena, _) = count_scan_plan(index);
    let ctx = test_context();

    let op = build_root(&arena, ctx.pipeline_cap()).unwrap();
    let items = execute(op, ctx.clone(), None).await.unwrap();

    assert_eq!(single_count(&items), 0);
    assert_eq!(ctx.summary().errors.len(), 0);
}

#[tokio::test]
async fn test_failed_partition_is_reported_and_counted_as_zero() {
    let index = Arc::new(ScriptedIndex::new(vec![
        Partition::count(4),
        Partition::Fail("disk unavailable".to_string()),
        Partition::count(6),
    ]));
    let (arena, _) = count_scan_plan(index);
    let ctx = test_context();

    let op = build_root(&arena, ctx.pipeline_cap()).unwrap();
    let items = execute(op, ctx.clone(), None).await.unwrap();

    assert_eq!(single_count(&items), 10);
    let errors = ctx.errors();
    assert_eq!(errors.len(), 1);
    let msg = errors[0].to_string();
    assert!(msg.contains("span 1"), "unexpected error: {}", msg);
    assert!(msg.contains("disk unavailable"), "unexpected error: {}", msg);
    assert!(matches!(errors[0], ExecError::Evaluation { .. }));
}

#[tokio::test]
async fn test_panicking_partition_becomes_internal_error() {
    let index = Arc::new(ScriptedIndex::new(vec![
        Partition::count(2),
        Partition::Panic("corrupt page".to_string()),
        Partition::count(1),
    ]));
    let (arena, _) = count_scan_plan(index);
    let ctx = test_context();

    let op = build_root(&arena, ctx.pipeline_cap()).unwrap();
    let items = execute(op.clone(), ctx.clone(), None).await.unwrap();

    assert_eq!(single_count(&items), 3);
    let errors = ctx.errors();
    assert_eq!(errors.len(), 1);
    match &errors[0] {
        ExecError::Internal(msg) => {
            assert!(msg.contains("span 1"), "unexpected error: {}", msg);
            assert!(msg.contains("corrupt page"), "unexpected error: {}", msg);
        }
        other => panic!("expected internal error, got {:?}", other),
    }
    assert!(op.base().is_closed());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_completion_order_does_not_matter() {
    let (counts, partitions) = {
        let mut rng = rand::thread_rng();
        let counts: Vec<i64> = (0..12).map(|_| rng.gen_range(0..1_000)).collect();
        let partitions: Vec<Partition> = counts
            .iter()
            .map(|c| Partition::delayed(*c, Duration::from_millis(rng.gen_range(0..25))))
            .collect();
        (counts, partitions)
    };
    let index = Arc::new(ScriptedIndex::new(partitions));
    let (arena, _) = count_scan_plan(index.clone());
    let ctx = test_context();

    let op = build_root(&arena, ctx.pipeline_cap()).unwrap();
    let items = execute(op, ctx, None).await.unwrap();

    assert_eq!(single_count(&items), counts.iter().sum::<i64>());
    assert_eq!(index.finished(), 12);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_query_stop_before_all_partitions_emits_nothing() {
    let index = Arc::new(ScriptedIndex::new(vec![
        Partition::count(3),
        Partition::Hang,
        Partition::Hang,
    ]));
    let (arena, _) = count_scan_plan(index.clone());
    let ctx = test_context();
    let op = build_root(&arena, ctx.pipeline_cap()).unwrap();

    let run = tokio::spawn(execute(op.clone(), ctx.clone(), None));
    while index.started() < 3 {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    ctx.stop();

    let items = tokio::time::timeout(Duration::from_secs(2), run)
        .await
        .expect("count scan did not close after stop")
        .unwrap()
        .unwrap();
    assert!(items.is_empty());
    assert_eq!(ctx.error_count(), 0);
    assert!(op.base().is_closed());
    assert!(op.base().is_done());
    assert_eq!(ctx.stop_cause(), Some(StopCause::Cancelled));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_query_stopped_before_execute_emits_nothing() {
    let index = Arc::new(ScriptedIndex::new(vec![
        Partition::count(1),
        Partition::count(2),
        Partition::Hang,
        Partition::Hang,
    ]));
    let (arena, _) = count_scan_plan(index);
    let ctx = test_context();
    let op = build_root(&arena, ctx.pipeline_cap()).unwrap();
    let notices = Arc::new(StopNotices::default());
    op.add_listener(notices.clone());

    ctx.stop();
    let items = tokio::time::timeout(
        Duration::from_secs(2),
        execute(op.clone(), ctx.clone(), None),
    )
    .await
    .expect("stopped count scan did not close")
    .unwrap();

    assert!(items.is_empty());
    assert!(op.base().is_closed());
    assert!(op.base().is_done());
    assert_eq!(notices.count(), 1);
    assert_eq!(op.base().listener_count(), 0);
    assert_eq!(ctx.error_count(), 0);
}

#[tokio::test]
async fn test_operator_stop_abandons_late_partitions() {
    let index = Arc::new(ScriptedIndex::new(vec![
        Partition::count(1),
        Partition::count(2),
        Partition::delayed(5, Duration::from_millis(200)),
    ]));
    let (arena, _) = count_scan_plan(index.clone());
    let ctx = test_context();
    let op = build_root(&arena, ctx.pipeline_cap()).unwrap();

    let run = tokio::spawn(execute(op.clone(), ctx.clone(), None));
    while index.finished() < 2 {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    op.stop();

    let items = tokio::time::timeout(Duration::from_secs(2), run)
        .await
        .expect("count scan did not close after stop")
        .unwrap()
        .unwrap();
    assert!(items.is_empty());
    assert!(!ctx.is_stopped());

    // The slow partition was abandoned; nothing hangs or reports afterwards.
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(index.finished(), 2);
    assert_eq!(ctx.error_count(), 0);
}

#[tokio::test]
async fn test_deadline_stops_hanging_scan() {
    let index = Arc::new(ScriptedIndex::new(vec![Partition::count(9), Partition::Hang]));
    let (arena, _) = count_scan_plan(index);
    let ctx = test_context();
    let op = build_root(&arena, ctx.pipeline_cap()).unwrap();

    ctx.arm_deadline(Duration::from_millis(30));
    let items = tokio::time::timeout(Duration::from_secs(2), execute(op, ctx.clone(), None))
        .await
        .expect("deadline did not stop the scan")
        .unwrap();

    assert!(items.is_empty());
    assert_eq!(ctx.stop_cause(), Some(StopCause::DeadlineExceeded));
    let summary = ctx.summary();
    assert_eq!(serde_json::to_value(summary.state).unwrap(), json!("timeout"));
}

#[tokio::test]
async fn test_handle_abort_still_closes_output() {
    let index = Arc::new(ScriptedIndex::new(vec![Partition::Hang]));
    let (arena, _) = count_scan_plan(index.clone());
    let ctx = test_context();
    let op = build_root(&arena, ctx.pipeline_cap()).unwrap();
    let output = op.take_output().unwrap();

    let handle = spawn_operator(op.clone(), ctx.clone(), None);
    while index.started() < 1 {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    handle.abort();
    let _ = handle.await;

    assert!(output.drain().await.is_empty());
    assert!(op.base().is_closed());
    assert!(op.base().is_done());
}

fn ages_index() -> Arc<MemoryIndex> {
    Arc::new(
        MemoryIndex::new("by_age", "users")
            .with_entry(json!(25), "bob")
            .with_entry(json!(28), "diana")
            .with_entry(json!(30), "alice")
            .with_entry(json!(35), "charlie")
            .with_entry(json!(41), "erin"),
    )
}

#[tokio::test]
async fn test_spans_bound_to_parent_fields() {
    let mut arena = PlanArena::new();
    let id = arena
        .add(PlanKind::IndexCountScan(IndexCountScan::new(
            ages_index(),
            KeyspaceTerm::new("default", "users").with_alias("u"),
            vec![PlanSpan::range(
                Some(SpanExpr::Parent("min".to_string())),
                Some(SpanExpr::Parent("max".to_string())),
                Inclusion::Both,
            )],
        )))
        .unwrap();
    arena.set_root(id).unwrap();
    let ctx = test_context();

    let op = build_root(&arena, ctx.pipeline_cap()).unwrap();
    let parent = AnnotatedValue::new(json!({"min": 28, "max": 35}));
    let items = execute(op, ctx.clone(), Some(parent)).await.unwrap();
    assert_eq!(single_count(&items), 3);

    // A parent without the referenced fields is a reported shape error.
    let op = build_root(&arena, ctx.pipeline_cap()).unwrap();
    let parent = AnnotatedValue::new(json!([28, 35]));
    let items = execute(op, ctx.clone(), Some(parent)).await.unwrap();
    assert_eq!(single_count(&items), 0);
    assert_eq!(ctx.error_count(), 1);
    assert!(ctx.errors()[0].to_string().contains("Shape mismatch"));
}

#[tokio::test]
async fn test_at_plus_uses_keyspace_scan_vector() {
    let mut arena = PlanArena::new();
    let id = arena
        .add(PlanKind::IndexCountScan(IndexCountScan::new(
            ages_index(),
            KeyspaceTerm::new("default", "users"),
            vec![
                PlanSpan::range(None, Some(SpanExpr::Literal(json!(30))), Inclusion::Neither),
                PlanSpan::range(Some(SpanExpr::Literal(json!(30))), None, Inclusion::Low),
            ],
        )))
        .unwrap();
    arena.set_root(id).unwrap();

    let vector = ScanVector::new(vec![VectorEntry {
        vbucket: 0,
        seqno: 5,
        guard: "a1".to_string(),
    }]);
    let ctx = Arc::new(
        Context::new()
            .with_consistency(ScanConsistency::AtPlus)
            .with_scan_vectors(Arc::new(
                KeyspaceScanVectors::new().with("default", "users", vector),
            )),
    );
    let op = build_root(&arena, ctx.pipeline_cap()).unwrap();
    let items = execute(op, ctx.clone(), None).await.unwrap();
    assert_eq!(single_count(&items), 5);
    assert_eq!(ctx.error_count(), 0);

    // Without a vector for the keyspace each span fails.
    let ctx = Arc::new(Context::new().with_consistency(ScanConsistency::AtPlus));
    let op = build_root(&arena, ctx.pipeline_cap()).unwrap();
    let items = execute(op, ctx.clone(), None).await.unwrap();
    assert_eq!(single_count(&items), 0);
    assert_eq!(ctx.error_count(), 2);
}
