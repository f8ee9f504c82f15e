mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use common::{DisconnectMode, FakeRuntime, Op, ReadyMode, next_event, next_events};
use workvisor::{
    BackoffPolicy, BackoffTracker, Bus, EventKind, PairOutcome, Pool, ReloadError, Reloader,
    WorkerError, WorkerId,
};

const STOP: Duration = Duration::from_secs(2);

struct Harness {
    rt: FakeRuntime,
    bus: Bus,
    pool: Arc<Pool>,
    reloader: Arc<Reloader>,
}

async fn harness(workers: usize, ready_timeout: Option<Duration>) -> Harness {
    let rt = FakeRuntime::new();
    let bus = Bus::new(1024);
    let pool = Pool::new(
        Arc::new(rt.clone()),
        bus.clone(),
        BackoffTracker::new(BackoffPolicy::default()),
        STOP,
        None,
    );
    pool.spawn_listener();
    let reloader = Reloader::new(Arc::clone(&pool), bus.clone(), ready_timeout);

    let mut rx = bus.subscribe();
    pool.start_pool(workers).await;
    next_events(&mut rx, EventKind::WorkerReady, workers).await;

    Harness {
        rt,
        bus,
        pool,
        reloader,
    }
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(200)).await;
}

#[tokio::test(start_paused = true)]
async fn test_replacement_is_ready_before_original_is_stopped() {
    let h = harness(4, None).await;
    h.rt.set_ready(ReadyMode::After(Duration::from_millis(50)));

    let report = h.reloader.reload().await.unwrap();
    assert_eq!(report.pairs.len(), 4);
    assert!(report.is_success());

    let mut replacements = Vec::new();
    for pair in &report.pairs {
        assert_eq!(pair.outcome, PairOutcome::Complete);
        let new = pair.replacement.unwrap();
        let ready = h.rt.position(Op::Ready(new)).unwrap();
        let stop = h.rt.position(Op::Disconnect(pair.original)).unwrap();
        assert!(
            ready < stop,
            "{new} ready at {ready}, {} stopped at {stop}",
            pair.original
        );
        replacements.push(new);
    }

    settle().await;
    replacements.sort_unstable();
    assert_eq!(h.pool.ids().await, replacements);
    assert_eq!(h.pool.backoff().deaths(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_serving_workers_never_drop_below_target() {
    let h = harness(2, None).await;
    h.rt.set_ready(ReadyMode::After(Duration::from_millis(100)));
    h.rt.set_disconnect(DisconnectMode::After(Duration::from_millis(50)));

    let mut serving: HashSet<WorkerId> = h.pool.ids().await.into_iter().collect();
    let mut rx = h.bus.subscribe();
    let session = h.reloader.spawn_reload().unwrap();

    loop {
        let ev = rx.recv().await.unwrap();
        match ev.kind {
            EventKind::WorkerReady => {
                serving.insert(ev.worker.unwrap());
            }
            EventKind::StopRequested | EventKind::WorkerExited => {
                serving.remove(&ev.worker.unwrap());
            }
            EventKind::ReloadFinished => break,
            _ => {}
        }
        assert!(serving.len() >= 2, "only {serving:?} serving after {ev:?}");
    }

    let report = session.await.unwrap();
    assert_eq!(report.completed(), 2);
    settle().await;
    assert_eq!(h.pool.len().await, 2);
    assert_eq!(h.pool.ready_count().await, 2);
    assert_eq!(h.rt.spawned().len(), 4);
    for pair in &report.pairs {
        assert_eq!(h.rt.count(Op::Disconnect(pair.original)), 1);
        assert_eq!(h.rt.count(Op::Kill(pair.original)), 0);
    }
}

#[tokio::test(start_paused = true)]
async fn test_second_reload_is_rejected_without_touching_the_session() {
    let h = harness(2, None).await;
    h.rt.set_ready(ReadyMode::After(Duration::from_secs(1)));
    let mut rx = h.bus.subscribe();

    let first = h.reloader.spawn_reload().unwrap();
    let started = next_event(&mut rx, EventKind::ReloadStarted, None).await;
    assert_eq!(started.count, Some(2));
    assert!(h.reloader.is_active());
    assert_eq!(h.reloader.session().unwrap().len(), 2);

    assert_eq!(h.reloader.reload().await.unwrap_err(), ReloadError::InProgress);
    assert!(h.reloader.spawn_reload().is_err());
    let rejected = next_event(&mut rx, EventKind::ReloadRejected, None).await;
    assert_eq!(rejected.reason.as_deref(), Some("reload already in progress"));
    assert_eq!(h.reloader.session().unwrap().len(), 2);

    let report = first.await.unwrap();
    assert_eq!(report.pairs.len(), 2);
    assert!(!h.reloader.is_active());
    assert!(h.reloader.session().is_none());

    // The slot is free again.
    let again = h.reloader.reload().await.unwrap();
    assert_eq!(again.pairs.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_failed_spawn_keeps_the_original() {
    let h = harness(2, None).await;
    let originals = h.pool.ids().await;
    h.rt.fail_next_spawns(1);
    let mut rx = h.bus.subscribe();

    let report = h.reloader.reload().await.unwrap();
    assert!(!report.is_success());
    assert_eq!(report.failed(), 1);
    assert_eq!(report.completed(), 1);

    let failed = report
        .pairs
        .iter()
        .find(|p| matches!(p.outcome, PairOutcome::Failed(_)))
        .unwrap();
    assert_eq!(failed.replacement, None);
    assert!(originals.contains(&failed.original));

    settle().await;
    assert_eq!(h.pool.len().await, 2);
    assert!(h.pool.ids().await.contains(&failed.original));

    // Released: a later crash of the kept original is restarted by the pool.
    h.rt.crash(failed.original, 1);
    next_event(&mut rx, EventKind::RestartScheduled, Some(failed.original)).await;
}

#[tokio::test(start_paused = true)]
async fn test_replacement_crash_before_ready_fails_the_pair() {
    let h = harness(1, None).await;
    h.rt.set_ready(ReadyMode::Never);
    let mut rx = h.bus.subscribe();

    let session = h.reloader.spawn_reload().unwrap();
    let replacement = WorkerId::new(2);
    next_event(&mut rx, EventKind::WorkerSpawned, Some(replacement)).await;
    h.rt.crash(replacement, 1);

    let report = session.await.unwrap();
    let pair = &report.pairs[0];
    assert_eq!(pair.original, WorkerId::new(1));
    assert_eq!(pair.replacement, Some(replacement));
    let PairOutcome::Failed(reason) = &pair.outcome else {
        panic!("expected a failed pair, got {:?}", pair.outcome);
    };
    assert!(reason.contains("exited before becoming ready"), "{reason}");

    // The checked-out replacement is not restarted; the original keeps serving.
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(h.rt.spawned().len(), 2);
    assert_eq!(h.pool.ids().await, vec![WorkerId::new(1)]);
    assert_eq!(h.rt.count(Op::Disconnect(WorkerId::new(1))), 0);
}

#[tokio::test(start_paused = true)]
async fn test_ready_timeout_retires_the_replacement() {
    let h = harness(1, Some(Duration::from_secs(1))).await;
    h.rt.set_ready(ReadyMode::Never);

    let report = h.reloader.reload().await.unwrap();
    let pair = &report.pairs[0];
    let replacement = pair.replacement.unwrap();
    let expected = WorkerError::ReadyTimeout {
        id: replacement,
        timeout: Duration::from_secs(1),
    };
    assert_eq!(pair.outcome, PairOutcome::Failed(expected.to_string()));

    settle().await;
    assert_eq!(h.rt.count(Op::Disconnect(replacement)), 1);
    assert_eq!(h.pool.ids().await, vec![pair.original]);
    assert_eq!(h.pool.backoff().deaths(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_stuck_original_degrades_the_pair() {
    let h = harness(1, None).await;
    let original = h.pool.ids().await[0];
    h.rt.set_worker_disconnect(original, DisconnectMode::Ignore);

    let report = h.reloader.reload().await.unwrap();
    let pair = &report.pairs[0];
    assert_eq!(
        pair.outcome,
        PairOutcome::Degraded(WorkerError::StopTimeout {
            id: original,
            timeout: STOP,
        })
    );
    assert!(report.is_success());
    assert_eq!(h.rt.count(Op::Kill(original)), 1);

    settle().await;
    assert_eq!(h.pool.ids().await, vec![pair.replacement.unwrap()]);
    assert_eq!(h.pool.backoff().deaths(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_reload_is_rejected_during_shutdown() {
    let h = harness(2, None).await;
    h.pool.shutdown_all(STOP).await;

    assert_eq!(
        h.reloader.reload().await.unwrap_err(),
        ReloadError::ShuttingDown
    );
    assert!(!h.reloader.is_active());
}

#[tokio::test(start_paused = true)]
async fn test_reload_of_empty_pool_is_a_noop() {
    let h = harness(1, None).await;
    let only = h.pool.ids().await[0];
    h.pool
        .get(only)
        .await
        .unwrap()
        .request_graceful_stop(STOP)
        .await
        .unwrap();
    settle().await;

    let report = h.reloader.reload().await.unwrap();
    assert!(report.pairs.is_empty());
    assert!(report.is_success());
    assert_eq!(h.rt.spawned().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_original_crash_during_completed_swap_is_not_restarted() {
    let h = harness(2, None).await;
    h.rt.set_ready(ReadyMode::After(Duration::from_secs(1)));
    let mut rx = h.bus.subscribe();

    let session = h.reloader.spawn_reload().unwrap();
    next_event(&mut rx, EventKind::ReloadStarted, None).await;
    h.rt.crash(WorkerId::new(1), 1);
    next_event(&mut rx, EventKind::WorkerCrashed, Some(WorkerId::new(1))).await;

    let report = session.await.unwrap();
    assert!(report.is_success());
    assert!(report.pairs.iter().all(|p| p.outcome == PairOutcome::Complete));

    settle().await;
    assert_eq!(h.pool.ids().await, vec![WorkerId::new(3), WorkerId::new(4)]);
    assert_eq!(h.rt.spawned().len(), 4);
    assert_eq!(h.rt.count(Op::Disconnect(WorkerId::new(1))), 0);
    assert_eq!(h.pool.backoff().deaths(), 1);
    while let Ok(ev) = rx.try_recv() {
        assert_ne!(ev.kind, EventKind::RestartScheduled, "{ev:?}");
    }
}

#[tokio::test(start_paused = true)]
async fn test_original_crash_during_failed_swap_is_restarted() {
    let h = harness(2, Some(Duration::from_secs(1))).await;
    h.rt.set_ready(ReadyMode::Never);
    let mut rx = h.bus.subscribe();

    let session = h.reloader.spawn_reload().unwrap();
    next_event(&mut rx, EventKind::ReloadStarted, None).await;
    h.rt.crash(WorkerId::new(1), 1);
    next_event(&mut rx, EventKind::WorkerCrashed, Some(WorkerId::new(1))).await;

    // Held by the pair until it fails.
    settle().await;
    assert_eq!(h.rt.spawned().len(), 4);

    let report = session.await.unwrap();
    assert_eq!(report.failed(), 2);
    next_event(&mut rx, EventKind::RestartScheduled, Some(WorkerId::new(1))).await;

    settle().await;
    assert_eq!(h.pool.len().await, h.pool.target());
    assert_eq!(h.pool.ids().await, vec![WorkerId::new(2), WorkerId::new(5)]);
    assert_eq!(h.rt.spawned().len(), 5);
    assert_eq!(h.pool.backoff().deaths(), 1);
}
