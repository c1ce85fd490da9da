//! End-to-end save flows against a scripted executor on paused time.

use std::time::Duration;

use autosave_coordinator::{AutosaveConfig, CommitResult, MemoryCache, Patch, ReadCache, ReadOutcome, SaveStatus, ViewKey, WriteFailure};
use pretty_assertions::assert_eq;
use serde_json::json;
use tokio::time::{Instant, sleep};

use crate::common::{Harness, StaticFetcher, Step, capture_logs, order};

fn ms(value: u64) -> Duration {
	Duration::from_millis(value)
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn edits_within_quiet_period_share_one_write() {
	let h = Harness::new(&AutosaveConfig::default(), Step::ok(100));
	let start = Instant::now();
	let session = h.coordinator.open("1", order("1")).unwrap();

	session.edit_field("status", "sent");
	sleep(ms(200)).await;
	session.edit_field("notes", "ring twice");
	sleep(ms(1_000)).await;

	let log = h.executor.log();
	assert_eq!(log.len(), 1);
	assert_eq!(log[0].started - start, ms(700));
	assert_eq!(log[0].patch, Patch::new().with("status", "sent").with("notes", "ring twice"));
	assert_eq!(session.status(), SaveStatus::Saved);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn edit_during_flight_gets_a_follow_up_write() {
	let h = Harness::new(&AutosaveConfig::default(), Step::ok(300));
	let session = h.coordinator.open("1", order("1")).unwrap();

	session.edit_field("status", "sent");
	let dispatched = session.save_now();
	let edit_later = async {
		sleep(ms(100)).await;
		session.edit_field("notes", "follow up");
		sleep(ms(150)).await;
		// Still inside the first write's window.
		assert_eq!(h.executor.log().len(), 1);
	};
	let (first, ()) = tokio::join!(dispatched, edit_later);
	assert!(first.is_saved());

	assert_eq!(session.status(), SaveStatus::Pending);
	assert_eq!(session.view().pending, Patch::new().with("notes", "follow up"));
	assert!(h.coordinator.is_debouncing(session.entity_id()));

	sleep(ms(1_000)).await;
	let log = h.executor.log();
	assert_eq!(log.len(), 2);
	assert_eq!(log[1].patch, Patch::new().with("notes", "follow up"));
	assert!(log[1].started >= log[0].settled.unwrap());
	assert_eq!(session.status(), SaveStatus::Saved);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn server_error_reverts_every_touched_entry() {
	let h = Harness::new(&AutosaveConfig::default(), Step::ok(100));
	h.executor.push(Step::fail(100, WriteFailure::server(422, "status locked")));
	let detail = h.bytes("order/1");
	let list = h.bytes("orders");
	let (logs, _guard) = capture_logs();
	let session = h.coordinator.open("1", order("1")).unwrap();

	session.edit_field("status", "sent");
	let result = session.save_now().await;

	assert_eq!(result, CommitResult::Failed(WriteFailure::server(422, "status locked")));
	assert_eq!(h.bytes("order/1"), detail);
	assert_eq!(h.bytes("orders"), list);
	assert_eq!(session.status(), SaveStatus::Error);
	assert_eq!(session.view().pending, Patch::new().with("status", "sent"));
	assert!(logs.contents().contains("autosave.coordinator.write_failed"));
	assert!(logs.contents().contains("autosave.cache.rollback"));
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn manual_save_of_empty_patch_is_a_no_op() {
	let h = Harness::new(&AutosaveConfig::default(), Step::ok(100));
	let session = h.coordinator.open("1", order("1")).unwrap();
	let before = session.view();

	assert_eq!(session.save_now().await, CommitResult::NothingToSave);

	assert_eq!(session.view(), before);
	assert!(h.executor.log().is_empty());
	assert_eq!(h.coordinator.metrics().writes_started, 0);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn last_write_to_a_field_wins() {
	let h = Harness::new(&AutosaveConfig::default(), Step::ok(100));
	let session = h.coordinator.open("1", order("1")).unwrap();

	session.edit_field("status", "a");
	session.edit_field("status", "b");
	assert_eq!(session.pending_field_count(), 1);
	sleep(ms(1_000)).await;

	let log = h.executor.log();
	assert_eq!(log.len(), 1);
	assert_eq!(log[0].patch, Patch::new().with("status", "b"));
	assert_eq!(h.coordinator.metrics().coalesced_edits, 1);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn stale_read_cannot_clobber_optimistic_value() {
	let h = Harness::new(&AutosaveConfig::default(), Step::ok(100));
	let session = h.coordinator.open("1", order("1")).unwrap();
	let key = ViewKey::from("order/1");

	let ticket = h.cache.begin_read(&key);
	session.edit_field("status", "sent");
	let save = session.save_now();
	let late_read = async {
		sleep(ms(50)).await;
		h.cache.complete_read(ticket, order("1"))
	};
	let (result, outcome) = tokio::join!(save, late_read);

	assert!(result.is_saved());
	assert_eq!(outcome, ReadOutcome::Discarded);
	assert_eq!(h.view("order/1")["status"], json!("sent"));
	assert_eq!(h.cache.discarded_reads(), 1);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn derived_views_refetch_after_write() {
	let fetcher = StaticFetcher::new(20);
	fetcher.set("orders/count", json!(3));
	let h = Harness::with_cache(MemoryCache::with_fetcher(fetcher.clone()), &AutosaveConfig::default(), Step::ok(100));
	let session = h.coordinator.open("1", order("1")).unwrap();

	session.edit_field("status", "sent");
	assert!(session.save_now().await.is_saved());
	let count = ViewKey::from("orders/count");
	assert!(h.cache.is_stale(&count));
	assert!(h.cache.is_refetching(&count));

	sleep(ms(50)).await;
	assert!(!h.cache.is_stale(&count));
	assert_eq!(h.cache.get_view(&count), Some(json!(3)));
	assert_eq!(fetcher.fetches(), vec![count]);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn derived_views_refetch_after_failure_too() {
	let fetcher = StaticFetcher::new(20);
	fetcher.set("orders/count", json!(2));
	let h = Harness::with_cache(MemoryCache::with_fetcher(fetcher.clone()), &AutosaveConfig::default(), Step::ok(100));
	h.executor.push(Step::fail(100, WriteFailure::network("reset by peer")));
	let session = h.coordinator.open("1", order("1")).unwrap();

	session.edit_field("status", "sent");
	assert!(!session.save_now().await.is_saved());
	sleep(ms(50)).await;

	assert_eq!(fetcher.fetches().len(), 1);
	assert!(h.executor.log()[0].failed);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn entities_save_independently() {
	let h = Harness::new(&AutosaveConfig::default(), Step::ok(300));
	h.cache.insert("order/2", order("2"));
	let one = h.coordinator.open("1", order("1")).unwrap();
	let two = h.coordinator.open_cached("2").unwrap();

	one.edit_field("status", "sent");
	two.edit_field("status", "paid");
	sleep(ms(600)).await;

	// Single flight is per entity; both writes run at once.
	assert_eq!(h.coordinator.in_flight(one.entity_id()), Some(1));
	assert_eq!(h.coordinator.in_flight(two.entity_id()), Some(1));
	sleep(ms(300)).await;

	let list = h.view("orders");
	assert_eq!(list["items"][0]["status"], json!("sent"));
	assert_eq!(list["items"][1]["status"], json!("paid"));
	assert_eq!(h.executor.server_record("2").unwrap()["status"], json!("paid"));
	h.executor.assert_single_flight();
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn success_without_new_edits_leaves_clean_state() {
	let h = Harness::new(&AutosaveConfig::default(), Step::ok(100));
	let session = h.coordinator.open("1", order("1")).unwrap();

	session.edit(Patch::new().with("status", "sent").with("notes", "left at door"));
	sleep(ms(1_000)).await;

	let view = session.view();
	assert_eq!(view.status, SaveStatus::Saved);
	assert!(view.pending.is_empty());
	assert_eq!(view.pending_field_count, 0);
	assert_eq!(view.last_error, None);
	assert_eq!(view.canonical, h.executor.server_record("1").unwrap());
	assert_eq!(h.view("order/1"), view.canonical);
}
