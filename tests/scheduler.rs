// tests/scheduler.rs
//
// PollEngine behaviour on short timers: independent cadences,
// start/stop semantics, manual polls and registry edits with cascade.
// The clock is paused, so sleeps advance virtual time deterministically.

mod common;

use std::time::Duration;

use common::{query, record, source, ts, Harness};
use tokio::time::sleep;

const LONG: Duration = Duration::from_secs(3600);

#[tokio::test(start_paused = true)]
async fn start_runs_one_immediate_cycle_per_enabled_source() {
    let h = Harness::new();
    let a = source("A", 1, vec![query("qa", "a")]);
    let mut off = source("Off", 1, vec![query("qo", "o")]);
    off.enabled = false;
    let engine = h.engine(vec![a.clone(), off.clone()], LONG);

    engine.start();
    engine.start(); // no-op
    sleep(Duration::from_millis(100)).await;

    assert!(engine.is_running());
    assert_eq!(h.exec.calls_for(a.id), 1);
    assert_eq!(h.exec.calls_for(off.id), 0);

    let st = engine.status(a.id).expect("status for scheduled source");
    assert!(st.last_poll_time.is_some());
    assert!(st.next_poll_time.is_some());
    assert!(engine.status(off.id).is_none());
    engine.stop();
}

#[tokio::test(start_paused = true)]
async fn sources_poll_on_their_own_cadence() {
    let h = Harness::new();
    let fast = source("Fast", 1, vec![query("f", "f")]);
    let slow = source("Slow", 5, vec![query("s", "s")]);
    let engine = h.engine(vec![fast.clone(), slow.clone()], Duration::from_millis(50));

    engine.start();
    sleep(Duration::from_millis(560)).await;
    engine.stop();

    let f = h.exec.calls_for(fast.id);
    let s = h.exec.calls_for(slow.id);
    assert!(f >= 6, "fast polled {f} times");
    assert!((2..=4).contains(&s), "slow polled {s} times");
}

#[tokio::test(start_paused = true)]
async fn a_stuck_or_failing_source_does_not_hold_back_others() {
    let h = Harness::new();
    let stuck = source("Stuck", 1, vec![query("qs", "stuck")]);
    let broken = source("Broken", 1, vec![query("qx", "broken")]);
    let healthy = source("Healthy", 1, vec![query("qh", "healthy")]);
    h.exec.set_delay_for("stuck", LONG);
    h.exec.fail("broken", "connection reset");
    h.exec.set("healthy", vec![record("1", "Open", ts(0))]);
    let engine = h.engine(
        vec![stuck.clone(), broken.clone(), healthy.clone()],
        Duration::from_millis(50),
    );

    engine.start();
    sleep(Duration::from_millis(530)).await;

    // immediate cycle plus one per 50ms tick
    assert_eq!(h.exec.calls_for(stuck.id), 1);
    assert!(h.exec.calls_for(healthy.id) >= 10, "healthy polled {}", h.exec.calls_for(healthy.id));
    assert!(h.exec.calls_for(broken.id) >= 10, "broken polled {}", h.exec.calls_for(broken.id));

    assert!(engine.status(stuck.id).unwrap().is_polling);
    let ok = engine.status(healthy.id).unwrap();
    assert!(!ok.is_polling);
    assert!(ok.last_error.is_none());
    assert_eq!(ok.change_count, 1);
    let bad = engine.status(broken.id).unwrap();
    assert!(bad.last_error.as_deref().unwrap().starts_with("Error polling Broken"));
    assert_eq!(h.notifier.keys(), vec!["OPS-1"]);
    engine.stop();
}

#[tokio::test(start_paused = true)]
async fn ticks_are_skipped_while_a_cycle_is_in_flight() {
    let h = Harness::new();
    let a = source("A", 1, vec![query("qa", "a")]);
    h.exec.set_delay(Duration::from_millis(300));
    let engine = h.engine(vec![a.clone()], Duration::from_millis(50));

    engine.start();
    sleep(Duration::from_millis(420)).await;
    engine.stop();

    assert!(h.exec.calls_for(a.id) <= 2, "overlapping cycles for one source");
}

#[tokio::test(start_paused = true)]
async fn stop_cancels_future_ticks() {
    let h = Harness::new();
    let a = source("A", 1, vec![query("qa", "a")]);
    let engine = h.engine(vec![a.clone()], Duration::from_millis(50));

    engine.start();
    sleep(Duration::from_millis(120)).await;
    engine.stop();
    sleep(Duration::from_millis(20)).await;
    let n = h.exec.calls();

    sleep(Duration::from_millis(200)).await;
    assert_eq!(h.exec.calls(), n);
    assert!(!engine.is_running());
    assert!(engine.statuses().iter().all(|s| s.next_poll_time.is_none()));
}

#[tokio::test(start_paused = true)]
async fn in_flight_cycle_completes_after_stop() {
    let h = Harness::new();
    let q = query("qa", "a");
    let a = source("A", 1, vec![q]);
    h.exec.set("a", vec![record("1", "Open", ts(0))]);
    h.exec.set_delay(Duration::from_millis(200));
    let engine = h.engine(vec![a.clone()], LONG);

    engine.start();
    sleep(Duration::from_millis(50)).await;
    assert!(engine.status(a.id).unwrap().is_polling);
    engine.stop();
    sleep(Duration::from_millis(300)).await;

    let st = engine.status(a.id).unwrap();
    assert!(!st.is_polling);
    assert_eq!(st.change_count, 1);
    assert!(st.has_changes);
    assert!(st.next_poll_time.is_none());
    assert_eq!(h.notifier.keys(), vec!["OPS-1"]);
}

#[tokio::test(start_paused = true)]
async fn poll_now_works_while_stopped_and_counts_accumulate() {
    let h = Harness::new();
    let a = source("A", 1, vec![query("qa", "a")]);
    let b = source("B", 3, vec![query("qb", "b")]);
    h.exec.set("a", vec![record("1", "Open", ts(0)), record("2", "Open", ts(0))]);
    h.exec.fail("b", "boom");
    let engine = h.engine(vec![a.clone(), b.clone()], LONG);

    let results = engine.poll_now().await;
    assert_eq!(results.len(), 2);
    assert!(!engine.is_running());

    let sa = engine.status(a.id).unwrap();
    assert_eq!(sa.change_count, 2);
    assert!(sa.last_error.is_none());
    let sb = engine.status(b.id).unwrap();
    assert!(sb.last_error.as_deref().unwrap().starts_with("Error polling B"));

    h.exec.set("a", vec![record("3", "Open", ts(0))]);
    engine.poll_source_now(a.id).await.unwrap();
    assert_eq!(engine.status(a.id).unwrap().change_count, 3);

    assert!(engine.reset_change_counter(a.id));
    let sa = engine.status(a.id).unwrap();
    assert_eq!(sa.change_count, 0);
    assert!(!sa.has_changes);
    assert!(!engine.reset_change_counter(issue_watch::model::SourceId::new()));
}

#[tokio::test(start_paused = true)]
async fn removing_a_source_deletes_only_its_rows() {
    let h = Harness::new();
    let a = source("A", 1, vec![query("qa", "a")]);
    let b = source("B", 1, vec![query("qb", "b")]);
    h.exec.set("a", vec![record("1", "Open", ts(0))]);
    h.exec.set("b", vec![record("1", "Open", ts(0))]);
    let engine = h.engine(vec![a.clone(), b.clone()], LONG);
    engine.poll_now().await;
    assert_eq!(h.store.count().unwrap(), 2);

    assert!(engine.remove_source(a.id).await.unwrap());
    assert!(!engine.remove_source(a.id).await.unwrap());

    let left = h.store.all_states().unwrap();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].source_id, b.id);
    assert!(engine.status(a.id).is_none());

    // a later manual poll never resurrects the removed source
    engine.poll_now().await;
    assert_eq!(h.exec.calls_for(a.id), 1);
}

#[tokio::test(start_paused = true)]
async fn removing_a_query_deletes_its_rows() {
    let h = Harness::new();
    let keep = query("keep", "k");
    let drop_me = query("drop", "d");
    let a = source("A", 1, vec![keep.clone(), drop_me.clone()]);
    h.exec.set("k", vec![record("1", "Open", ts(0))]);
    h.exec.set("d", vec![record("2", "Open", ts(0))]);
    let engine = h.engine(vec![a.clone()], LONG);
    engine.poll_now().await;

    assert!(engine.remove_query(a.id, drop_me.id).await.unwrap());
    let left = h.store.all_states().unwrap();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].query_id, keep.id);
    assert_eq!(engine.sources()[0].queries.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn replace_sources_validates_and_purges_vanished_queries() {
    let h = Harness::new();
    let q1 = query("one", "1");
    let q2 = query("two", "2");
    let a = source("A", 1, vec![q1.clone(), q2.clone()]);
    h.exec.set("1", vec![record("1", "Open", ts(0))]);
    h.exec.set("2", vec![record("2", "Open", ts(0))]);
    let engine = h.engine(vec![a.clone()], LONG);
    engine.poll_now().await;

    let mut bad = a.clone();
    bad.poll_interval = 0;
    assert!(engine.replace_sources(vec![bad]).await.is_err());
    assert_eq!(engine.sources()[0].poll_interval, 1);

    let mut edited = a.clone();
    edited.queries.retain(|q| q.id == q1.id);
    edited.queries[0].expression = "1 ORDER BY key".into();
    engine.replace_sources(vec![edited]).await.unwrap();

    let left = h.store.all_states().unwrap();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].query_id, q1.id, "query id survives an expression edit");
}

#[tokio::test(start_paused = true)]
async fn registry_edit_while_running_schedules_the_new_source() {
    let h = Harness::new();
    let a = source("A", 1, vec![query("qa", "a")]);
    let engine = h.engine(vec![a], LONG);
    engine.start();

    let b = source("B", 1, vec![query("qb", "b")]);
    engine.upsert_source(b.clone()).await.unwrap();
    sleep(Duration::from_millis(100)).await;

    assert!(engine.is_running());
    assert_eq!(h.exec.calls_for(b.id), 1);
    assert!(engine.status(b.id).unwrap().next_poll_time.is_some());
    engine.stop();
}

#[tokio::test(start_paused = true)]
async fn issues_join_the_registry_and_track_read_state() {
    let h = Harness::new();
    let q = query("Mine", "m");
    let a = source("Work", 1, vec![q.clone()]);
    h.exec.set("m", vec![record("1", "Open", ts(0)), record("2", "Open", ts(4))]);
    let engine = h.engine(vec![a.clone()], LONG);
    engine.poll_now().await;

    let issues = engine.list_issues().unwrap();
    assert_eq!(issues.len(), 2);
    assert_eq!(issues[0].key, "OPS-2", "newest first");
    assert!(issues.iter().all(|i| i.is_new && !i.is_read));
    assert_eq!(issues[1].url, "https://jira.example.com/browse/OPS-1");
    assert_eq!(issues[1].query_name, "Mine");

    assert_eq!(engine.mark_read(&["1".to_string()]).unwrap(), 1);
    let issues = engine.list_issues().unwrap();
    assert!(issues.iter().find(|i| i.id == "1").unwrap().is_read);

    let key = issue_watch::model::StateKey::new("2", a.id, q.id);
    assert!(engine.mark_one_read(&key).unwrap());
    assert!(engine.list_issues().unwrap()[0].is_read);

    assert_eq!(engine.mark_all_read().unwrap(), 2);
    assert!(engine.mark_unread(&key).unwrap());
    assert!(!engine.list_issues().unwrap()[0].is_read);
}

#[tokio::test(start_paused = true)]
async fn subscribers_see_status_updates() {
    let h = Harness::new();
    let a = source("A", 1, vec![query("qa", "a")]);
    let engine = h.engine(vec![a.clone()], LONG);
    let mut rx = engine.subscribe();

    engine.poll_now().await;
    assert!(rx.has_changed().unwrap());
    let map = rx.borrow_and_update().clone();
    assert!(map.contains_key(&a.id));
}
