//! Integration tests for the micro-batch CDC pipeline.
//!
//! These drive the zones, merge engine, and streaming supervisor
//! together over the in-memory store and scripted event source,
//! covering the end-to-end contract: last-event-wins per key, replay
//! idempotence, violation diversion, retry exhaustion, and
//! checkpointed resume.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use inlet_core::event::Operation;
use inlet_core::retry::RetryPolicy;
use inlet_core::schema::{InMemorySchemaRegistry, SchemaRegistry};
use inlet_ingest::{
    CdcBatchProcessor, MergeEngine, RawZone, StructuredZoneCdc, StructuredZoneLoad,
    TableStreamingSupervisor, ViolationRouter, ZonePipeline,
};
use inlet_store::{MemoryTableStore, TableStore};
use inlet_test_utils::fixtures::{micro_batch, offender_record, offenders_reference, raw_record};
use inlet_test_utils::{ConflictInjectingStore, MemoryEventSource};

const STRUCTURED: &str = "s3://lake/structured";
const VIOLATIONS: &str = "s3://lake/violations";
const RAW: &str = "s3://lake/raw";

const OFFENDERS: &str = "s3://lake/structured/oms/offenders";
const OFFENDER_VIOLATIONS: &str = "s3://lake/violations/oms/offenders";

struct Pipeline {
    inner: Arc<MemoryTableStore>,
    store: Arc<ConflictInjectingStore<MemoryTableStore>>,
    cdc: Arc<StructuredZoneCdc<ConflictInjectingStore<MemoryTableStore>>>,
    load: ZonePipeline<ConflictInjectingStore<MemoryTableStore>>,
}

fn pipeline() -> Pipeline {
    pipeline_with_policy(
        RetryPolicy::new(Duration::from_millis(1), Duration::from_millis(2), 0.0, 3).unwrap(),
    )
}

fn pipeline_with_policy(policy: RetryPolicy) -> Pipeline {
    let inner = Arc::new(MemoryTableStore::new());
    let store = Arc::new(ConflictInjectingStore::new(inner.clone()));

    let registry: Arc<dyn SchemaRegistry> =
        Arc::new(InMemorySchemaRegistry::new().with(offenders_reference()));
    let merge = Arc::new(MergeEngine::new(store.clone(), policy));
    let violations = Arc::new(ViolationRouter::new(store.clone(), VIOLATIONS));

    let cdc = Arc::new(StructuredZoneCdc::new(
        merge.clone(),
        violations.clone(),
        store.clone(),
        STRUCTURED,
    ));
    let load = ZonePipeline::new(
        RawZone::new(store.clone(), RAW),
        StructuredZoneLoad::new(registry, merge, violations, store.clone(), STRUCTURED),
    );

    Pipeline {
        inner,
        store,
        cdc,
        load,
    }
}

fn names(rows: &[inlet_store::Row]) -> Vec<(i64, String)> {
    let mut out: Vec<(i64, String)> = rows
        .iter()
        .map(|r| {
            (
                r.get("id").and_then(|v| v.as_i64()).unwrap(),
                r.get("last_name")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
            )
        })
        .collect();
    out.sort();
    out
}

#[tokio::test]
async fn pure_insert_batch_lands_in_structured_zone() {
    let p = pipeline();
    let records = vec![
        offender_record(Operation::Insert, 1, "a", 30),
        offender_record(Operation::Insert, 2, "b", 40),
    ];
    let refs: Vec<&_> = records.iter().collect();

    let merged = p.cdc.process(&offenders_reference(), &refs).await.unwrap();
    assert_eq!(merged.len(), 2);

    let rows = p.inner.read_rows(OFFENDERS).await.unwrap();
    assert_eq!(names(&rows), vec![(1, "a".into()), (2, "b".into())]);
    assert_eq!(p.inner.manifest_version(OFFENDERS), Some(1));
}

#[tokio::test]
async fn update_then_delete_of_same_key_empties_target() {
    let p = pipeline();
    let seed = vec![offender_record(Operation::Insert, 1, "a", 30)];
    let refs: Vec<&_> = seed.iter().collect();
    p.cdc.process(&offenders_reference(), &refs).await.unwrap();

    let batch = vec![
        offender_record(Operation::Update, 1, "z", 30),
        offender_record(Operation::Delete, 1, "z", 30),
    ];
    let refs: Vec<&_> = batch.iter().collect();
    p.cdc.process(&offenders_reference(), &refs).await.unwrap();

    assert!(p.inner.read_rows(OFFENDERS).await.unwrap().is_empty());
}

#[tokio::test]
async fn delete_of_absent_key_is_not_an_error() {
    let p = pipeline();
    let batch = vec![offender_record(Operation::Delete, 7, "gone", 50)];
    let refs: Vec<&_> = batch.iter().collect();

    p.cdc.process(&offenders_reference(), &refs).await.unwrap();

    assert!(p.inner.read_rows(OFFENDERS).await.unwrap().is_empty());
    assert!(!p.inner.exists(OFFENDER_VIOLATIONS).await.unwrap());
}

#[tokio::test]
async fn replaying_a_batch_is_idempotent() {
    let p = pipeline();
    let batch = vec![
        offender_record(Operation::Insert, 1, "a", 30),
        offender_record(Operation::Update, 2, "b", 40),
        offender_record(Operation::Delete, 3, "c", 50),
    ];
    let refs: Vec<&_> = batch.iter().collect();

    p.cdc.process(&offenders_reference(), &refs).await.unwrap();
    let first = p.inner.read_rows(OFFENDERS).await.unwrap();

    p.cdc.process(&offenders_reference(), &refs).await.unwrap();
    let second = p.inner.read_rows(OFFENDERS).await.unwrap();

    assert_eq!(first, second);
}

#[tokio::test]
async fn validation_failure_diverts_row_and_leaves_target_unchanged() {
    let p = pipeline();
    let batch = vec![raw_record(
        "oms",
        "offenders",
        Operation::Insert,
        r#"{"id": 1, "age": null}"#,
    )];
    let refs: Vec<&_> = batch.iter().collect();

    let merged = p.cdc.process(&offenders_reference(), &refs).await.unwrap();
    assert!(merged.is_empty());

    assert!(!p.inner.exists(OFFENDERS).await.unwrap());
    let violations = p.inner.read_rows(OFFENDER_VIOLATIONS).await.unwrap();
    assert_eq!(violations.len(), 1);
    assert_eq!(
        violations[0].get("error"),
        Some(&json!("non-null field age is null"))
    );
    assert_eq!(violations[0].get("zone"), Some(&json!("STRUCTURED_CDC")));
}

#[tokio::test]
async fn exhausted_retries_divert_batch_and_stream_continues() {
    let p = pipeline();
    // Three conflicts against three attempts: every attempt fails.
    p.store.fail_merges(OFFENDERS, 3);

    let batch = vec![offender_record(Operation::Insert, 1, "a", 30)];
    let refs: Vec<&_> = batch.iter().collect();
    let merged = p.cdc.process(&offenders_reference(), &refs).await.unwrap();
    assert!(merged.is_empty());

    let violations = p.inner.read_rows(OFFENDER_VIOLATIONS).await.unwrap();
    assert_eq!(violations.len(), 1);
    assert_eq!(violations[0].get("zone"), Some(&json!("STRUCTURED_CDC")));
    assert_eq!(violations[0].get("id"), Some(&json!(1)));

    // The conflicts are spent; the next batch applies normally.
    let batch = vec![offender_record(Operation::Insert, 2, "b", 40)];
    let refs: Vec<&_> = batch.iter().collect();
    let merged = p.cdc.process(&offenders_reference(), &refs).await.unwrap();
    assert_eq!(merged.len(), 1);
    assert_eq!(
        names(&p.inner.read_rows(OFFENDERS).await.unwrap()),
        vec![(2, "b".into())]
    );
}

#[tokio::test]
async fn transient_conflicts_are_retried_to_success() {
    let p = pipeline();
    // Two conflicts against three attempts: the third succeeds.
    p.store.fail_merges(OFFENDERS, 2);

    let batch = vec![offender_record(Operation::Insert, 1, "a", 30)];
    let refs: Vec<&_> = batch.iter().collect();
    let merged = p.cdc.process(&offenders_reference(), &refs).await.unwrap();

    assert_eq!(merged.len(), 1);
    assert!(!p.inner.exists(OFFENDER_VIOLATIONS).await.unwrap());
}

#[tokio::test]
async fn load_batch_flows_through_raw_and_structured_zones() {
    let p = pipeline();
    let batch = micro_batch(
        1,
        vec![
            offender_record(Operation::Load, 1, "a", 30),
            offender_record(Operation::Load, 2, "b", 40),
            raw_record(
                "oms",
                "offenders",
                Operation::Load,
                r#"{"id": 3, "age": null}"#,
            ),
        ],
    );

    p.load.process_load_batch(&batch).await.unwrap();

    // Raw archive keeps everything, violations included.
    let raw_rows = p
        .inner
        .read_rows("s3://lake/raw/oms/offenders/load")
        .await
        .unwrap();
    assert_eq!(raw_rows.len(), 3);

    // Structured zone holds the conforming rows only.
    let rows = p.inner.read_rows(OFFENDERS).await.unwrap();
    assert_eq!(names(&rows), vec![(1, "a".into()), (2, "b".into())]);

    let violations = p.inner.read_rows(OFFENDER_VIOLATIONS).await.unwrap();
    assert_eq!(violations.len(), 1);
    assert_eq!(violations[0].get("zone"), Some(&json!("STRUCTURED_LOAD")));
}

#[tokio::test]
async fn load_without_schema_diverts_whole_sub_batch() {
    let p = pipeline();
    let batch = micro_batch(
        1,
        vec![raw_record(
            "oms",
            "unknown_table",
            Operation::Load,
            r#"{"id": 1}"#,
        )],
    );

    p.load.process_load_batch(&batch).await.unwrap();

    let violations = p
        .inner
        .read_rows("s3://lake/violations/oms/unknown_table")
        .await
        .unwrap();
    assert_eq!(violations.len(), 1);
    assert_eq!(
        violations[0].get("error"),
        Some(&json!("Schema does not exist for oms/unknown_table"))
    );
    assert!(!p.inner.exists("s3://lake/structured/oms/unknown_table").await.unwrap());
}

fn supervisor(
    p: &Pipeline,
    source: Arc<MemoryEventSource>,
) -> TableStreamingSupervisor<ConflictInjectingStore<MemoryTableStore>> {
    let processor = Arc::new(CdcBatchProcessor::new(
        offenders_reference(),
        p.cdc.clone(),
    ));
    TableStreamingSupervisor::new("Inlet CDC", "s3://lake/checkpoints", source, processor)
}

#[tokio::test]
async fn supervisor_processes_batches_in_order_and_commits() {
    let p = pipeline();
    let source = Arc::new(MemoryEventSource::new());
    source.push_batch(
        "oms",
        "offenders",
        micro_batch(1, vec![offender_record(Operation::Insert, 1, "a", 30)]),
    );
    source.push_batch(
        "oms",
        "offenders",
        micro_batch(2, vec![offender_record(Operation::Update, 1, "a2", 31)]),
    );

    let sup = supervisor(&p, source.clone());
    let checkpoint = sup.checkpoint_prefix().to_string();
    assert_eq!(sup.query_name(), "Inlet CDC oms.offenders");
    assert_eq!(
        checkpoint,
        "s3://lake/checkpoints/Inlet CDC/Inlet CDC oms.offenders"
    );

    let handle = sup.start().await.unwrap();
    handle.join().await.unwrap();

    assert_eq!(
        names(&p.inner.read_rows(OFFENDERS).await.unwrap()),
        vec![(1, "a2".into())]
    );
    assert_eq!(source.committed_offset(&checkpoint), Some(2));
}

#[tokio::test]
async fn supervisor_resumes_from_last_committed_offset() {
    let p = pipeline();
    let source = Arc::new(MemoryEventSource::new());
    source.push_batch(
        "oms",
        "offenders",
        micro_batch(1, vec![offender_record(Operation::Insert, 1, "a", 30)]),
    );

    let handle = supervisor(&p, source.clone()).start().await.unwrap();
    handle.join().await.unwrap();

    // A later batch arrives; a restarted supervisor picks up only it.
    source.push_batch(
        "oms",
        "offenders",
        micro_batch(2, vec![offender_record(Operation::Insert, 2, "b", 40)]),
    );
    let handle = supervisor(&p, source.clone()).start().await.unwrap();
    handle.join().await.unwrap();

    assert_eq!(
        names(&p.inner.read_rows(OFFENDERS).await.unwrap()),
        vec![(1, "a".into()), (2, "b".into())]
    );
}

#[tokio::test]
async fn supervisor_stop_is_cooperative() {
    let p = pipeline();
    let source = Arc::new(MemoryEventSource::new_hold_open());
    source.push_batch(
        "oms",
        "offenders",
        micro_batch(1, vec![offender_record(Operation::Insert, 1, "a", 30)]),
    );

    let handle = supervisor(&p, source.clone()).start().await.unwrap();

    // Wait for the in-flight batch to settle, then stop.
    let mut settled = false;
    for _ in 0..100 {
        if !p.inner.read_rows(OFFENDERS).await.unwrap().is_empty() {
            settled = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(settled, "batch should settle before stop");

    handle.stop().await.unwrap();
}

#[tokio::test]
async fn exhausted_batch_does_not_stop_the_query() {
    let p = pipeline();
    p.store.fail_merges(OFFENDERS, 3);

    let source = Arc::new(MemoryEventSource::new());
    source.push_batch(
        "oms",
        "offenders",
        micro_batch(1, vec![offender_record(Operation::Insert, 1, "a", 30)]),
    );
    source.push_batch(
        "oms",
        "offenders",
        micro_batch(2, vec![offender_record(Operation::Insert, 2, "b", 40)]),
    );

    let handle = supervisor(&p, source.clone()).start().await.unwrap();
    handle.join().await.unwrap();

    // Batch 1 was diverted; batch 2 applied; both committed.
    assert_eq!(
        names(&p.inner.read_rows(OFFENDERS).await.unwrap()),
        vec![(2, "b".into())]
    );
    assert_eq!(p.inner.read_rows(OFFENDER_VIOLATIONS).await.unwrap().len(), 1);
}
