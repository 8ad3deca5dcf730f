//! End-to-end queue scenarios against a directory-rooted session

mod common;

use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use assert_fs::prelude::*;
use assert_fs::TempDir;
use predicates::prelude::*;
use shuttle::{
    shared, ChannelDispatcher, EngineConfig, ExistingFilePolicy, LocalSession, ShuttleError,
    TransferQueue,
};

use common::*;

#[test]
fn test_download_photos_tree() {
    let remote = TempDir::new().unwrap();
    photos_tree(&remote);
    let out = TempDir::new().unwrap();
    let state = TempDir::new().unwrap();
    let queue = inline_queue(EngineConfig::default(), log_at(state.path()));

    let session = shared(LocalSession::new(remote.path()).unwrap());
    let report = queue
        .enqueue_download(&["/photos"], out.path(), session)
        .unwrap();
    assert_eq!(report.deferred, 1);
    assert!(queue.wait_until_idle(WAIT));

    let tasks = queue.tasks().snapshot();
    assert_eq!(tasks.len(), 7);
    assert_task_invariants(&tasks);
    let names: Vec<_> = tasks.iter().map(|t| t.display_name.as_str()).collect();
    assert_eq!(
        names,
        vec!["photos", "a.jpg", "b.jpg", "c.jpg", "trip", "d.jpg", "e.jpg"]
    );
    assert!(tasks.iter().all(|t| t.completed));

    out.child("photos").assert(predicate::path::is_dir());
    out.child("photos/trip").assert(predicate::path::is_dir());
    out.child("photos/a.jpg").assert("a.jpg");
    out.child("photos/trip/e.jpg").assert("e.jpg");
}

#[test]
fn test_mid_copy_failure_is_isolated() {
    let remote = TempDir::new().unwrap();
    for name in ["a.bin", "b.bin", "c.bin"] {
        remote.child(name).write_binary(&pattern(8192)).unwrap();
    }
    let out = TempDir::new().unwrap();
    let state = TempDir::new().unwrap();
    let log = log_at(state.path());
    let queue = inline_queue(EngineConfig::default(), log.clone());

    let session = shared(ScriptedSession::new(remote.path()).fail_download_after("/b.bin", 4096));
    queue
        .enqueue_download(&["/a.bin", "/b.bin", "/c.bin"], out.path(), session)
        .unwrap();
    assert!(queue.wait_until_idle(WAIT));

    let tasks = queue.tasks().snapshot();
    assert_task_invariants(&tasks);
    assert!(tasks[0].completed);
    assert!(tasks[1].failed);
    assert!(tasks[1]
        .error_message
        .as_deref()
        .unwrap()
        .contains("simulated connection reset"));
    assert!(tasks[2].completed);
    assert_eq!(fs::read(out.path().join("c.bin")).unwrap(), pattern(8192));

    // A failed unit is recorded but never offered for resume
    let b_dest = out.path().join("b.bin").to_string_lossy().into_owned();
    assert!(log.find_incomplete_transfer("/b.bin", &b_dest).is_none());
    let failed: Vec<_> = log
        .load_all_transfers()
        .into_iter()
        .filter(|e| e.failed)
        .collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].source, "/b.bin");
}

#[test]
fn test_completion_callback_fires_once() {
    let remote = TempDir::new().unwrap();
    photos_tree(&remote);
    let out = TempDir::new().unwrap();
    let state = TempDir::new().unwrap();
    let queue = inline_queue(EngineConfig::default(), log_at(state.path()));

    let fired = Arc::new(AtomicUsize::new(0));
    let counter = fired.clone();
    queue.set_completion_callback(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let session = shared(LocalSession::new(remote.path()).unwrap());
    queue
        .enqueue_download(&["/photos", "/missing"], out.path(), session)
        .unwrap();
    assert!(queue.wait_until_idle(WAIT));

    let summary = queue.tasks().summary();
    assert_eq!(summary.completed, 7);
    assert_eq!(summary.failed, 1);
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

#[test]
fn test_shutdown_discards_pending_units() {
    let remote = TempDir::new().unwrap();
    for name in ["1.txt", "2.txt", "3.txt"] {
        remote.child(name).write_str(name).unwrap();
    }
    let out = TempDir::new().unwrap();
    let state = TempDir::new().unwrap();
    let queue = inline_queue(EngineConfig::default(), log_at(state.path()));

    let (release, gate) = crossbeam_channel::bounded::<()>(1);
    let session = shared(ScriptedSession::new(remote.path()).hold_download("/1.txt", gate));
    queue
        .enqueue_download(&["/1.txt", "/2.txt", "/3.txt"], out.path(), session.clone())
        .unwrap();

    let tasks = queue.tasks();
    assert!(wait_for(|| tasks.len() == 1));
    queue.shutdown();
    assert_eq!(queue.pending_units(), 0);
    release.send(()).unwrap();
    assert!(queue.wait_until_idle(WAIT));

    assert_eq!(tasks.len(), 1);
    assert!(tasks.get(0).unwrap().snapshot().completed);
    out.child("1.txt").assert("1.txt");
    out.child("2.txt").assert(predicate::path::missing());

    let again = queue.enqueue_download(&["/3.txt"], out.path(), session);
    assert!(matches!(again, Err(ShuttleError::QueueClosed)));
}

#[test]
fn test_upload_tree() {
    let local = TempDir::new().unwrap();
    photos_tree(&local);
    let remote = TempDir::new().unwrap();
    remote.child("backup").create_dir_all().unwrap();
    let state = TempDir::new().unwrap();
    let queue = inline_queue(EngineConfig::default(), log_at(state.path()));

    let session = shared(LocalSession::new(remote.path()).unwrap());
    let report = queue
        .enqueue_upload(&[local.path().join("photos")], "/backup", session)
        .unwrap();
    assert_eq!(report.queued, 7);
    assert!(queue.wait_until_idle(WAIT));

    let tasks = queue.tasks().snapshot();
    assert_task_invariants(&tasks);
    assert!(tasks.iter().all(|t| t.completed));
    assert_eq!(tasks[0].destination, "/backup/photos");
    remote.child("backup/photos/b.jpg").assert("b.jpg");
    remote.child("backup/photos/trip/d.jpg").assert("d.jpg");
}

#[test]
fn test_upload_into_existing_tree() {
    let local = TempDir::new().unwrap();
    photos_tree(&local);
    let remote = TempDir::new().unwrap();
    remote.child("photos/trip").create_dir_all().unwrap();
    let state = TempDir::new().unwrap();
    let queue = inline_queue(EngineConfig::default(), log_at(state.path()));

    let session = shared(LocalSession::new(remote.path()).unwrap());
    queue
        .enqueue_upload(&[local.path().join("photos")], "/", session)
        .unwrap();
    assert!(queue.wait_until_idle(WAIT));

    // Already-existing directories count as ready
    let summary = queue.tasks().summary();
    assert_eq!(summary.completed, 7);
    assert_eq!(summary.failed, 0);
    remote.child("photos/c.jpg").assert("c.jpg");
}

#[test]
fn test_skip_existing_destination() {
    let remote = TempDir::new().unwrap();
    remote.child("a.txt").write_str("new").unwrap();
    remote.child("b.txt").write_str("fresh").unwrap();
    let out = TempDir::new().unwrap();
    out.child("a.txt").write_str("old").unwrap();
    let state = TempDir::new().unwrap();
    let config = EngineConfig {
        existing_files: ExistingFilePolicy::Skip,
        ..Default::default()
    };
    let queue = inline_queue(config, log_at(state.path()));

    let session = shared(LocalSession::new(remote.path()).unwrap());
    queue
        .enqueue_download(&["/a.txt", "/b.txt"], out.path(), session)
        .unwrap();
    assert!(queue.wait_until_idle(WAIT));

    let tasks = queue.tasks().snapshot();
    assert_task_invariants(&tasks);
    assert_eq!(tasks[0].status, "Skipped (exists)");
    assert_eq!(tasks[1].status, "Completed");
    out.child("a.txt").assert("old");
    out.child("b.txt").assert("fresh");
}

#[test]
fn test_refused_completion_on_download_is_tolerated() {
    let remote = TempDir::new().unwrap();
    remote.child("a.txt").write_str("payload").unwrap();
    let out = TempDir::new().unwrap();
    let state = TempDir::new().unwrap();
    let queue = inline_queue(EngineConfig::default(), log_at(state.path()));

    let session = shared(ScriptedSession::new(remote.path()).complete_with(false));
    queue
        .enqueue_download(&["/a.txt"], out.path(), session)
        .unwrap();
    assert!(queue.wait_until_idle(WAIT));

    let task = queue.tasks().get(0).unwrap().snapshot();
    assert!(task.completed);
    out.child("a.txt").assert("payload");
}

#[test]
fn test_refused_completion_on_upload_fails() {
    let local = TempDir::new().unwrap();
    local.child("a.txt").write_str("payload").unwrap();
    let remote = TempDir::new().unwrap();
    let state = TempDir::new().unwrap();
    let queue = inline_queue(EngineConfig::default(), log_at(state.path()));

    let session = shared(ScriptedSession::new(remote.path()).complete_with(false));
    queue
        .enqueue_upload(&[local.path().join("a.txt")], "/", session)
        .unwrap();
    assert!(queue.wait_until_idle(WAIT));

    let tasks = queue.tasks().snapshot();
    assert_task_invariants(&tasks);
    assert!(tasks[0].failed);
}

#[test]
fn test_second_batch_reuses_worker() {
    let remote = TempDir::new().unwrap();
    remote.child("a.txt").write_str("a").unwrap();
    remote.child("b.txt").write_str("b").unwrap();
    let out = TempDir::new().unwrap();
    let state = TempDir::new().unwrap();
    let queue = inline_queue(EngineConfig::default(), log_at(state.path()));
    let session = shared(LocalSession::new(remote.path()).unwrap());

    queue
        .enqueue_download(&["/a.txt"], out.path(), session.clone())
        .unwrap();
    assert!(queue.wait_until_idle(WAIT));
    queue
        .enqueue_download(&["/b.txt"], out.path(), session)
        .unwrap();
    assert!(queue.wait_until_idle(WAIT));

    assert_eq!(queue.tasks().summary().completed, 2);
    out.child("b.txt").assert("b");
}

#[test]
fn test_batch_added_mid_transfer_runs_in_full() {
    let remote = TempDir::new().unwrap();
    for name in ["1", "2", "3", "4"] {
        remote.child(name).write_str(name).unwrap();
    }
    let out = TempDir::new().unwrap();
    let state = TempDir::new().unwrap();
    let config = EngineConfig {
        max_queue_units: 3,
        ..Default::default()
    };
    let queue = inline_queue(config, log_at(state.path()));

    let (release, gate) = crossbeam_channel::bounded::<()>(1);
    let session = shared(ScriptedSession::new(remote.path()).hold_download("/1", gate));
    queue
        .enqueue_download(&["/1", "/2"], out.path(), session.clone())
        .unwrap();
    let tasks = queue.tasks();
    assert!(wait_for(|| tasks.len() == 1));

    // The cap applies per request, not to the worker's lifetime
    queue
        .enqueue_download(&["/3", "/4"], out.path(), session)
        .unwrap();
    release.send(()).unwrap();
    assert!(queue.wait_until_idle(WAIT));

    let tasks = tasks.snapshot();
    assert_eq!(tasks.len(), 4);
    assert!(tasks.iter().all(|t| t.completed));
    out.child("4").assert("4");
}

#[test]
fn test_download_enqueue_does_not_wait_for_transfer() {
    let remote = TempDir::new().unwrap();
    remote.child("held.txt").write_str("held").unwrap();
    remote.child("next.txt").write_str("next").unwrap();
    let out = TempDir::new().unwrap();
    let state = TempDir::new().unwrap();
    let queue = inline_queue(EngineConfig::default(), log_at(state.path()));

    let (release, gate) = crossbeam_channel::bounded::<()>(1);
    let session = shared(ScriptedSession::new(remote.path()).hold_download("/held.txt", gate));
    queue
        .enqueue_download(&["/held.txt"], out.path(), session.clone())
        .unwrap();
    let tasks = queue.tasks();
    assert!(wait_for(|| tasks.len() == 1));

    let (done_tx, done_rx) = crossbeam_channel::bounded(1);
    let returned = thread::scope(|scope| {
        scope.spawn(|| {
            let result = queue.enqueue_download(&["/next.txt"], out.path(), session.clone());
            let _ = done_tx.send(result.is_ok());
        });
        let returned = done_rx.recv_timeout(Duration::from_secs(5));
        release.send(()).unwrap();
        returned
    });
    assert_eq!(returned, Ok(true));

    assert!(queue.wait_until_idle(WAIT));
    assert_eq!(queue.tasks().summary().completed, 2);
    out.child("next.txt").assert("next");
}

#[test]
fn test_adapter_panic_fails_only_its_unit() {
    let remote = TempDir::new().unwrap();
    remote.child("boom").write_str("boom").unwrap();
    remote.child("ok").write_str("ok").unwrap();
    let out = TempDir::new().unwrap();
    let state = TempDir::new().unwrap();
    let queue = inline_queue(EngineConfig::default(), log_at(state.path()));

    let session = shared(ScriptedSession::new(remote.path()).panic_on_download("/boom"));
    queue
        .enqueue_download(&["/boom", "/ok"], out.path(), session.clone())
        .unwrap();
    assert!(queue.wait_until_idle(WAIT));

    let tasks = queue.tasks().snapshot();
    assert_task_invariants(&tasks);
    assert!(tasks[0].failed);
    assert!(tasks[0].error_message.as_deref().unwrap().contains("panicked"));
    assert!(tasks[1].completed);
    out.child("ok").assert("ok");

    // The same session keeps serving later requests
    remote.child("later").write_str("later").unwrap();
    queue
        .enqueue_download(&["/later"], out.path(), session)
        .unwrap();
    assert!(queue.wait_until_idle(WAIT));
    out.child("later").assert("later");
}

#[test]
fn test_failed_entry_records_bytes_before_ui_catches_up() {
    let remote = TempDir::new().unwrap();
    remote.child("big.bin").write_binary(&pattern(8192)).unwrap();
    let out = TempDir::new().unwrap();
    let state = TempDir::new().unwrap();
    let log = log_at(state.path());
    let (dispatcher, pump) = ChannelDispatcher::new();
    let config = EngineConfig {
        chunk_size: 1024,
        ..Default::default()
    };
    let queue = TransferQueue::new(config, log.clone(), Arc::new(dispatcher));

    let session = shared(ScriptedSession::new(remote.path()).fail_download_after("/big.bin", 4096));
    queue
        .enqueue_download(&["/big.bin"], out.path(), session)
        .unwrap();
    assert!(queue.wait_until_idle(WAIT));

    // The pump has not run, so the Task has seen none of the progress
    assert!(queue.tasks().is_empty());
    let failed: Vec<_> = log
        .load_all_transfers()
        .into_iter()
        .filter(|e| e.failed)
        .collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].bytes_transferred, 4096);
    assert_eq!(failed[0].total_bytes, 8192);

    pump.run_pending();
    assert!(queue.tasks().get(0).unwrap().snapshot().failed);
}
