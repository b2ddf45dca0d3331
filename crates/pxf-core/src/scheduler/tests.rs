//! Scheduler tests against the scripted transport and an in-memory store.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use super::{JobController, SchedulerState, TickOutcome};
use crate::config::SchedulerConfig;
use crate::control::CancellationToken;
use crate::export::ExportSink;
use crate::grid::Corner;
use crate::job::{ConfigError, JobConfig};
use crate::job_store::{open_memory, JobStore, StopRequest};
use crate::transport::mock::{coords_of, json, ScriptedTransport, TEST_TEMPLATE};

#[derive(Default)]
struct MemorySink {
    files: Mutex<Vec<(String, String)>>,
    fail_next: AtomicBool,
}

impl MemorySink {
    fn count(&self) -> usize {
        self.files.lock().unwrap().len()
    }

    fn lines(&self, i: usize) -> usize {
        self.files.lock().unwrap()[i].1.lines().count()
    }
}

impl ExportSink for MemorySink {
    fn write_text(&self, name: &str, text: &str) -> anyhow::Result<PathBuf> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            anyhow::bail!("disk full");
        }
        self.files
            .lock()
            .unwrap()
            .push((name.to_string(), text.to_string()));
        Ok(PathBuf::from(name))
    }
}

fn sched_cfg() -> SchedulerConfig {
    SchedulerConfig {
        initial_delay_ms: 0,
        recovery_delay_ms: 5,
        stop_poll_ms: 10,
        ..SchedulerConfig::default()
    }
}

/// A `w` x `h` grid in block (0,0), `batch` points per tick.
fn job_cfg(w: i64, h: i64, batch: usize) -> JobConfig {
    JobConfig {
        batch_size: batch,
        batch_delay_ms: 1,
        max_rps: 1000,
        concurrency: 2,
        start: Corner::new(0, 0, 0, 0),
        end: Corner::new(0, 0, w - 1, h - 1),
        url_template: TEST_TEMPLATE.to_string(),
        ..JobConfig::default()
    }
}

fn controller_on(
    store: JobStore,
    t: Arc<ScriptedTransport>,
) -> (JobController, Arc<MemorySink>) {
    let sink = Arc::new(MemorySink::default());
    let c = JobController::new(store, sink.clone(), t, sched_cfg());
    (c, sink)
}

async fn controller(t: Arc<ScriptedTransport>) -> (JobController, Arc<MemorySink>) {
    controller_on(open_memory().await.unwrap(), t)
}

#[tokio::test]
async fn four_points_three_ids_and_one_sentinel() {
    let t = Arc::new(ScriptedTransport::new(|url| {
        let (_, _, x, y) = coords_of(url);
        if (x, y) == (1, 1) {
            return Ok(json(200, r#"{"paintedBy":{"id":null,"name":""}}"#));
        }
        Ok(json(200, &format!(r#"{{"paintedBy":{{"id":"{}-{}"}}}}"#, x, y)))
    }));
    let (c, sink) = controller(t.clone()).await;

    let started = c.start(job_cfg(2, 2, 10)).await.unwrap();
    assert!(started.ok);
    assert_eq!(started.total, Some(4));
    assert_eq!(c.state(), SchedulerState::Scheduled);

    let outcome = c.run().await.unwrap();
    assert!(matches!(outcome, TickOutcome::Finished { .. }));
    assert_eq!(c.state(), SchedulerState::Idle);
    assert_eq!(t.call_count(), 4);

    let progress = c.get_progress().await.unwrap().unwrap();
    assert!(progress.finished);
    assert!(!progress.stopped);
    assert_eq!((progress.done, progress.total), (4, 4));
    assert_eq!(progress.stats.ok, 4);
    assert_eq!(progress.records.len(), 4);
    let by_id: HashMap<Option<&str>, u64> = progress
        .records
        .iter()
        .map(|r| (r.id.as_deref(), r.count))
        .collect();
    assert_eq!(by_id.len(), 4);
    assert_eq!(by_id[&None], 1);
    assert!(["0-0", "0-1", "1-0"].iter().all(|k| by_id[&Some(*k)] == 1));

    assert_eq!(sink.count(), 1);
    assert_eq!(sink.lines(0), 4);
    assert!(c.store().load_job().await.unwrap().is_none());
    assert!(c.run_state().await.unwrap().is_none());
}

#[tokio::test]
async fn start_rejects_while_live_job_exists() {
    let t = Arc::new(ScriptedTransport::unique_ids());
    let (c, _) = controller(t).await;
    let first = c.start(job_cfg(3, 3, 2)).await.unwrap();
    let second = c.start(job_cfg(2, 2, 2)).await.unwrap();
    assert!(!second.ok);
    assert_eq!(second.error.as_deref(), Some("already-running"));
    assert_eq!(second.job_id, first.job_id);
}

#[tokio::test]
async fn start_replaces_stale_job() {
    let t = Arc::new(ScriptedTransport::unique_ids());
    let store = open_memory().await.unwrap();
    let (c, _) = controller_on(store.clone(), t);
    c.start(job_cfg(3, 3, 2)).await.unwrap();

    let mut old = store.load_job().await.unwrap().unwrap();
    old.created_at_ms -= 11 * 60 * 1000;
    store.begin_job(&old).await.unwrap();

    let again = c.start(job_cfg(2, 2, 2)).await.unwrap();
    assert!(again.ok);
    assert_eq!(store.load_job().await.unwrap().unwrap().total(), 4);
}

#[tokio::test]
async fn start_replaces_drained_job() {
    let t = Arc::new(ScriptedTransport::unique_ids());
    let store = open_memory().await.unwrap();
    let (c, _) = controller_on(store.clone(), t);
    c.start(job_cfg(2, 1, 2)).await.unwrap();
    let mut job = store.load_job().await.unwrap().unwrap();
    job.advance(job.total());
    store.begin_job(&job).await.unwrap();

    assert!(c.start(job_cfg(2, 2, 2)).await.unwrap().ok);
}

#[tokio::test]
async fn invalid_config_persists_nothing() {
    let t = Arc::new(ScriptedTransport::unique_ids());
    let (c, _) = controller(t.clone()).await;
    let cfg = JobConfig {
        step_x: 0,
        ..job_cfg(2, 2, 2)
    };
    let err = c.start(cfg).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ConfigError>(),
        Some(ConfigError::Stride { .. })
    ));
    assert!(c.store().load_job().await.unwrap().is_none());
    assert_eq!(t.call_count(), 0);
}

#[tokio::test]
async fn tick_without_job_is_idle() {
    let t = Arc::new(ScriptedTransport::unique_ids());
    let (c, _) = controller(t).await;
    assert_eq!(c.tick().await.unwrap(), TickOutcome::Idle);
}

#[tokio::test]
async fn restart_resumes_at_cursor() {
    let store = open_memory().await.unwrap();
    let t1 = Arc::new(ScriptedTransport::unique_ids());
    let (c1, _) = controller_on(store.clone(), t1.clone());
    c1.start(job_cfg(3, 2, 2)).await.unwrap();
    assert!(matches!(
        c1.tick().await.unwrap(),
        TickOutcome::Continue { .. }
    ));
    assert_eq!(t1.call_count(), 2);
    drop(c1);

    // A new controller (new process) picks the job up from the store.
    let t2 = Arc::new(ScriptedTransport::unique_ids());
    let (c2, _) = controller_on(store.clone(), t2.clone());
    let job = store.load_job().await.unwrap().unwrap();
    assert_eq!(job.cursor, 2);
    c2.tick().await.unwrap();

    let expected: Vec<String> = job.points[2..4]
        .iter()
        .map(|p| job.url.build(p).unwrap())
        .collect();
    let mut got = t2.calls.lock().unwrap().clone();
    got.sort();
    let mut want = expected.clone();
    want.sort();
    assert_eq!(got, want);

    let job = store.load_job().await.unwrap().unwrap();
    assert_eq!(job.cursor, 4);
    assert_eq!(job.stats.ok, 4);
    assert_eq!(job.results.len(), 4);
}

#[tokio::test]
async fn double_stop_exports_once() {
    let t = Arc::new(ScriptedTransport::unique_ids());
    let (c, sink) = controller(t).await;
    c.start(job_cfg(2, 2, 2)).await.unwrap();
    c.tick().await.unwrap();

    let first = c.stop("user").await.unwrap();
    let second = c.stop("user").await.unwrap();
    assert!(first.ok && second.ok);
    assert!(first.filename.is_some());
    assert!(second.filename.is_none());
    assert_eq!(sink.count(), 1);
    assert_eq!(sink.lines(0), 2);

    let progress = c.get_progress().await.unwrap().unwrap();
    assert!(progress.stopped);
    assert_eq!(progress.reason.as_deref(), Some("user"));
    assert_eq!(progress.done, 2);
    assert!(c.cancellation().is_stopped());
    assert!(c.store().load_job().await.unwrap().is_none());
}

#[tokio::test]
async fn concurrent_stops_have_one_winner() {
    let t = Arc::new(ScriptedTransport::unique_ids());
    let (c, sink) = controller(t).await;
    c.start(job_cfg(2, 2, 2)).await.unwrap();
    c.tick().await.unwrap();

    let (a, b) = tokio::join!(c.stop("a"), c.stop("b"));
    let exported = [a.unwrap(), b.unwrap()]
        .iter()
        .filter(|r| r.filename.is_some())
        .count();
    assert_eq!(exported, 1);
    assert_eq!(sink.count(), 1);
}

#[tokio::test]
async fn stop_during_tick_keeps_settled_points() {
    let token: Arc<OnceLock<CancellationToken>> = Arc::new(OnceLock::new());
    let served = Arc::new(Mutex::new(0usize));
    let t = {
        let token = token.clone();
        let served = served.clone();
        Arc::new(ScriptedTransport::new(move |url| {
            let mut n = served.lock().unwrap();
            *n += 1;
            if *n == 3 {
                token.get().unwrap().request_stop();
            }
            let (_, _, x, y) = coords_of(url);
            Ok(json(200, &format!(r#"{{"paintedBy":{{"id":"{}-{}"}}}}"#, x, y)))
        }))
    };
    let (c, sink) = controller(t.clone()).await;
    let cfg = JobConfig {
        concurrency: 1,
        ..job_cfg(4, 4, 10)
    };
    c.start(cfg).await.unwrap();
    token.set(c.cancellation()).unwrap();

    assert_eq!(c.tick().await.unwrap(), TickOutcome::Cancelled);
    assert_eq!(c.state(), SchedulerState::Cancelled);
    assert_eq!(t.call_count(), 3);
    assert_eq!(sink.count(), 1);
    assert_eq!(sink.lines(0), 3);
    let progress = c.get_progress().await.unwrap().unwrap();
    assert!(progress.stopped);
    assert_eq!(progress.done, 3);

    // Later stop requests see nothing left to do.
    let again = c.stop("late").await.unwrap();
    assert!(again.ok);
    assert!(again.job_id.is_none());
    assert_eq!(sink.count(), 1);
}

#[tokio::test]
async fn persisted_flag_from_another_process_cancels() {
    let t = Arc::new(ScriptedTransport::unique_ids());
    let (c, sink) = controller(t.clone()).await;
    let cfg = JobConfig {
        batch_delay_ms: 60_000,
        ..job_cfg(3, 3, 2)
    };
    c.start(cfg).await.unwrap();

    let store = c.store().clone();
    let runner = {
        let c = c.clone();
        tokio::spawn(async move { c.run().await })
    };
    // Let the first tick land, then stop from "outside" via the store only.
    tokio::time::sleep(Duration::from_millis(100)).await;
    store
        .set_stop_flag(&StopRequest {
            requested_at: 0,
            reason: "remote".into(),
        })
        .await
        .unwrap();

    let outcome = tokio::time::timeout(Duration::from_secs(5), runner)
        .await
        .expect("runner did not notice the stop flag")
        .unwrap()
        .unwrap();
    assert_eq!(outcome, TickOutcome::Cancelled);
    assert_eq!(t.call_count(), 2);
    assert_eq!(sink.count(), 1);
    let progress = c.get_progress().await.unwrap().unwrap();
    assert_eq!(progress.reason.as_deref(), Some("remote"));
}

#[tokio::test]
async fn throttled_responses_shrink_limits_for_good() {
    let seen: Arc<Mutex<HashMap<String, usize>>> = Arc::default();
    let t = {
        let seen = seen.clone();
        Arc::new(ScriptedTransport::new(move |url| {
            let mut seen = seen.lock().unwrap();
            let n = seen.entry(url.to_string()).or_insert(0);
            *n += 1;
            if *n == 1 {
                Ok(json(429, ""))
            } else {
                Ok(json(200, r#"{"paintedBy":{"id":1}}"#))
            }
        }))
    };
    let (c, _) = controller(t).await;
    let cfg = JobConfig {
        concurrency: 4,
        max_rps: 6,
        ..job_cfg(3, 3, 4)
    };
    c.start(cfg).await.unwrap();

    let outcome = c.tick().await.unwrap();
    match outcome {
        TickOutcome::Continue { delay } => assert!(delay >= Duration::from_secs(30)),
        other => panic!("unexpected {:?}", other),
    }
    let job = c.store().load_job().await.unwrap().unwrap();
    assert_eq!((job.concurrency, job.max_rps), (2, 3));
    assert_eq!(job.stats.rate_limited, 4);
    assert_eq!(job.stats.ok, 4);

    // Clean tick: limits stay reduced.
    seen.lock().unwrap().clear();
    for p in &job.points[4..8] {
        seen.lock().unwrap().insert(job.url.build(p).unwrap(), 1);
    }
    c.tick().await.unwrap();
    let job = c.store().load_job().await.unwrap().unwrap();
    assert_eq!((job.concurrency, job.max_rps), (2, 3));
    assert_eq!(job.cursor, 8);
}

#[tokio::test]
async fn failed_tick_recovers_without_losing_job() {
    let t = Arc::new(ScriptedTransport::unique_ids());
    let (c, sink) = controller(t.clone()).await;
    c.start(job_cfg(2, 1, 10)).await.unwrap();
    sink.fail_next.store(true, Ordering::SeqCst);

    // The drained job's export fails once; the recovery tick finishes it.
    let outcome = tokio::time::timeout(Duration::from_secs(5), c.run())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(outcome, TickOutcome::Finished { .. }));
    assert_eq!(sink.count(), 1);
    assert_eq!(t.call_count(), 2);
    assert!(c.get_progress().await.unwrap().unwrap().finished);
}

#[tokio::test]
async fn start_after_stop_gets_fresh_token() {
    let t = Arc::new(ScriptedTransport::unique_ids());
    let (c, _) = controller(t).await;
    c.start(job_cfg(2, 2, 2)).await.unwrap();
    c.stop("user").await.unwrap();
    assert!(c.cancellation().is_stopped());

    assert!(c.start(job_cfg(2, 2, 2)).await.unwrap().ok);
    assert!(!c.cancellation().is_stopped());
    assert!(c.store().stop_flag().await.unwrap().is_none());
    assert!(matches!(
        c.tick().await.unwrap(),
        TickOutcome::Continue { .. }
    ));
}

#[tokio::test]
async fn signal_only_leaves_settling_to_the_runner() {
    let t = Arc::new(ScriptedTransport::unique_ids());
    let (c, sink) = controller(t).await;
    c.start(job_cfg(2, 2, 2)).await.unwrap();
    c.tick().await.unwrap();

    assert_eq!(c.signal_stop("  ").await.unwrap(), "stop");
    assert!(c.store().load_job().await.unwrap().is_some());
    assert_eq!(sink.count(), 0);

    assert_eq!(c.tick().await.unwrap(), TickOutcome::Cancelled);
    assert_eq!(sink.count(), 1);
    assert!(c.store().load_job().await.unwrap().is_none());
}

#[tokio::test]
async fn interrupted_run_returns_promptly_and_resumes() {
    let handle: Arc<OnceLock<JobController>> = Arc::new(OnceLock::new());
    let served = Arc::new(Mutex::new(0usize));
    let t = {
        let handle = handle.clone();
        let served = served.clone();
        Arc::new(ScriptedTransport::new(move |url| {
            let mut n = served.lock().unwrap();
            *n += 1;
            if *n == 2 {
                handle.get().unwrap().interrupt();
            }
            let (_, _, x, y) = coords_of(url);
            Ok(json(200, &format!(r#"{{"paintedBy":{{"id":"{}-{}"}}}}"#, x, y)))
        }))
    };
    let (c, sink) = controller(t.clone()).await;
    let cfg = JobConfig {
        concurrency: 1,
        ..job_cfg(5, 4, 20)
    };
    c.start(cfg).await.unwrap();
    assert!(handle.set(c.clone()).is_ok());

    let outcome = tokio::time::timeout(Duration::from_secs(5), c.run())
        .await
        .expect("interrupted run did not return")
        .unwrap();
    assert_eq!(outcome, TickOutcome::Interrupted);
    assert_eq!(t.call_count(), 2);
    assert_eq!(sink.count(), 0);
    assert!(!c.cancellation().is_stopped());
    assert!(c.store().stop_flag().await.unwrap().is_none());
    let job = c.store().load_job().await.unwrap().unwrap();
    assert_eq!(job.cursor, 2);
    assert!(!c.get_progress().await.unwrap().unwrap().stopped);

    // The next run picks up where the interrupted one left off.
    let outcome = tokio::time::timeout(Duration::from_secs(5), c.run())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(outcome, TickOutcome::Finished { .. }));
    assert_eq!(t.call_count(), 20);
    assert_eq!(c.get_progress().await.unwrap().unwrap().stats.ok, 20);
}

#[tokio::test]
async fn interrupt_during_batch_delay_skips_the_next_tick() {
    let t = Arc::new(ScriptedTransport::unique_ids());
    let (c, _) = controller(t.clone()).await;
    let cfg = JobConfig {
        batch_delay_ms: 60_000,
        ..job_cfg(3, 3, 2)
    };
    c.start(cfg).await.unwrap();

    let runner = {
        let c = c.clone();
        tokio::spawn(async move { c.run().await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    c.interrupt();

    let outcome = tokio::time::timeout(Duration::from_secs(5), runner)
        .await
        .expect("runner ignored the interrupt")
        .unwrap()
        .unwrap();
    assert_eq!(outcome, TickOutcome::Interrupted);
    assert_eq!(t.call_count(), 2);
    assert_eq!(c.store().load_job().await.unwrap().unwrap().cursor, 2);
}

#[tokio::test]
async fn failed_stop_commit_leaves_job_for_the_next_stop() {
    let t = Arc::new(ScriptedTransport::unique_ids());
    let (c, sink) = controller(t).await;
    c.start(job_cfg(2, 2, 2)).await.unwrap();
    c.tick().await.unwrap();

    for when in ["INSERT", "UPDATE"] {
        let sql = format!(
            "CREATE TRIGGER no_progress_{when} BEFORE {when} ON state \
             WHEN NEW.key = 'progress' BEGIN SELECT RAISE(ABORT, 'disk full'); END"
        );
        sqlx::query(&sql).execute(&c.store().pool).await.unwrap();
    }
    assert!(c.stop("user").await.is_err());
    assert!(c.store().load_job().await.unwrap().is_some());
    assert_eq!(sink.count(), 0);

    for when in ["INSERT", "UPDATE"] {
        let sql = format!("DROP TRIGGER no_progress_{when}");
        sqlx::query(&sql).execute(&c.store().pool).await.unwrap();
    }
    let retry = c.stop("user").await.unwrap();
    assert!(retry.filename.is_some());
    assert_eq!(sink.count(), 1);
    assert!(c.store().load_job().await.unwrap().is_none());
    let progress = c.get_progress().await.unwrap().unwrap();
    assert!(progress.stopped);
    assert_eq!(progress.filename, retry.filename);
}

#[tokio::test]
async fn failed_snapshot_export_clears_the_filename() {
    let t = Arc::new(ScriptedTransport::unique_ids());
    let (c, sink) = controller(t).await;
    c.start(job_cfg(2, 2, 2)).await.unwrap();
    c.tick().await.unwrap();
    sink.fail_next.store(true, Ordering::SeqCst);

    let res = c.stop("user").await.unwrap();
    assert!(res.filename.is_none());
    let progress = c.get_progress().await.unwrap().unwrap();
    assert!(progress.stopped);
    assert!(progress.filename.is_none());
    assert!(c.store().load_job().await.unwrap().is_none());
}
