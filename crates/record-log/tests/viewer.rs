use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use record_log::{
    ErrorKind, Filter, InMemoryRecordStore, LogIdentity, RecordIndex, RecordStore, Role,
    Snapshot, StoreError, Viewer, ViewerConfig, ViewerError, WindowPage,
};
use test_timeout::tokio_timeout_test;
use tokio::sync::Notify;

const LOG: &str = "agents/main/sessions/s1.jsonl";

/// Wraps the in-memory store, counting window fetches and optionally parking one of them.
struct ProbeStore {
    inner: Arc<InMemoryRecordStore>,
    fetches: AtomicUsize,
    failing: AtomicBool,
    fail_remaining: AtomicUsize,
    hold: Mutex<Option<Hold>>,
}

struct Hold {
    offset: u64,
    entered: Arc<Notify>,
    release: Arc<Notify>,
}

impl ProbeStore {
    fn new(inner: Arc<InMemoryRecordStore>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            fetches: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
            fail_remaining: AtomicUsize::new(0),
            hold: Mutex::new(None),
        })
    }

    /// The next fetch at `offset` blocks until the returned release handle is notified.
    fn hold_next(&self, offset: u64) -> (Arc<Notify>, Arc<Notify>) {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        *self.hold.lock() = Some(Hold {
            offset,
            entered: entered.clone(),
            release: release.clone(),
        });
        (entered, release)
    }

    fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Fails only the next `count` fetches.
    fn fail_next(&self, count: usize) {
        self.fail_remaining.store(count, Ordering::SeqCst);
    }

    fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RecordStore for ProbeStore {
    async fn count(&self, path: &LogIdentity) -> Result<u64, StoreError> {
        self.inner.count(path).await
    }

    async fn fetch_window(
        &self,
        path: &LogIdentity,
        offset: u64,
        limit: u64,
    ) -> Result<WindowPage, StoreError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let fail_once = self
            .fail_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail_once || self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Rejected {
                status: 503,
                message: "store unavailable".into(),
            });
        }
        let page = self.inner.fetch_window(path, offset, limit).await?;
        let held = {
            let mut hold = self.hold.lock();
            let matches = hold.as_ref().map(|h| h.offset == offset).unwrap_or(false);
            if matches {
                hold.take()
            } else {
                None
            }
        };
        if let Some(hold) = held {
            hold.entered.notify_one();
            hold.release.notified().await;
        }
        Ok(page)
    }

    async fn write_line(
        &self,
        path: &LogIdentity,
        index: RecordIndex,
        content: &str,
    ) -> Result<(), StoreError> {
        self.inner.write_line(path, index, content).await
    }
}

struct Harness {
    memory: Arc<InMemoryRecordStore>,
    store: Arc<ProbeStore>,
    viewer: Arc<Viewer>,
    renders: Arc<AtomicUsize>,
    last: Arc<Mutex<Option<Snapshot>>>,
}

impl Harness {
    async fn new(total: usize, config: ViewerConfig) -> Self {
        let memory = InMemoryRecordStore::new();
        memory.create(LOG).await;
        for i in 0..total {
            memory.append(LOG, record_line(i)).await;
        }
        let store = ProbeStore::new(memory.clone());
        let renders = Arc::new(AtomicUsize::new(0));
        let last = Arc::new(Mutex::new(None));
        let (count, slot) = (renders.clone(), last.clone());
        let viewer = Viewer::new(
            store.clone(),
            move |snapshot: &Snapshot| {
                count.fetch_add(1, Ordering::SeqCst);
                *slot.lock() = Some(snapshot.clone());
            },
            config,
        );
        Self {
            memory,
            store,
            viewer: Arc::new(viewer),
            renders,
            last,
        }
    }

    fn renders(&self) -> usize {
        self.renders.load(Ordering::SeqCst)
    }

    fn last(&self) -> Snapshot {
        self.last.lock().clone().expect("nothing rendered yet")
    }
}

fn record_line(i: usize) -> String {
    let role = if i % 2 == 0 { "user" } else { "assistant" };
    format!(r#"{{"role":"{role}","content":"message {i}"}}"#)
}

fn quiet() -> ViewerConfig {
    ViewerConfig {
        poll_interval_ms: 3_600_000,
        ..ViewerConfig::default()
    }
}

fn first_index(snapshot: &Snapshot) -> Option<RecordIndex> {
    snapshot.visible_records.first().map(|record| record.index)
}

#[tokio::test]
async fn open_anchors_to_the_tail_in_follow_mode() {
    let h = Harness::new(45, quiet()).await;
    let snapshot = h.viewer.open(LOG).await.unwrap();
    assert_eq!(snapshot.visible_records.len(), 20);
    assert_eq!(first_index(&snapshot), Some(25));
    assert_eq!(snapshot.visible_records.last().unwrap().index, 44);
    assert_eq!(snapshot.pagination_label, "26–45 of 45");
    assert!(snapshot.follow);
    assert!(snapshot.can_page_back);
    assert!(!snapshot.can_page_forward);
    assert_eq!(h.last(), snapshot);
}

#[tokio::test]
async fn paging_moves_the_window_and_toggles_follow() {
    let h = Harness::new(45, quiet()).await;
    h.viewer.open(LOG).await.unwrap();

    let back = h.viewer.page_back().await.unwrap();
    assert_eq!(first_index(&back), Some(5));
    assert!(!back.follow);
    let back = h.viewer.page_back().await.unwrap();
    assert_eq!(first_index(&back), Some(0));
    assert!(!back.can_page_back);

    let forward = h.viewer.page_forward().await.unwrap();
    assert_eq!(first_index(&forward), Some(20));
    assert!(!forward.follow);
    let forward = h.viewer.page_forward().await.unwrap();
    assert_eq!(first_index(&forward), Some(25));
    assert!(forward.follow);

    h.viewer.page_back().await.unwrap();
    let end = h.viewer.jump_to_end().await.unwrap();
    assert_eq!(first_index(&end), Some(25));
    assert!(end.follow);
}

#[tokio::test]
async fn failed_probe_opens_at_the_top() {
    let h = Harness::new(45, quiet()).await;
    h.store.fail_next(1);
    let snapshot = h.viewer.open(LOG).await.unwrap();
    assert_eq!(h.store.fetches(), 2);
    assert_eq!(first_index(&snapshot), Some(0));
    assert_eq!(snapshot.pagination_label, "1–20 of 45");
    assert!(!snapshot.can_page_back);
    assert!(snapshot.can_page_forward);
}

#[tokio::test]
async fn empty_logs_disable_both_directions() {
    let h = Harness::new(0, quiet()).await;
    let snapshot = h.viewer.open(LOG).await.unwrap();
    assert!(snapshot.visible_records.is_empty());
    assert_eq!(snapshot.pagination_label, "0–0 of 0");
    assert!(!snapshot.can_page_back && !snapshot.can_page_forward);
}

#[tokio_timeout_test(10)]
async fn late_poll_response_cannot_undo_navigation() {
    let h = Harness::new(45, quiet()).await;
    h.viewer.open(LOG).await.unwrap();

    let (entered, release) = h.store.hold_next(25);
    let viewer = h.viewer.clone();
    let poll = tokio::spawn(async move { viewer.poll_once().await });
    entered.notified().await;

    let navigated = h.viewer.page_back().await.unwrap();
    assert_eq!(first_index(&navigated), Some(5));
    let renders = h.renders();

    release.notify_one();
    let rendered = poll.await.unwrap().unwrap();
    assert!(!rendered);
    assert_eq!(h.renders(), renders);
    assert_eq!(first_index(&h.viewer.snapshot()), Some(5));
    assert!(!h.viewer.snapshot().follow);
}

#[tokio_timeout_test(10)]
async fn opening_another_log_discards_the_old_response() {
    let h = Harness::new(45, quiet()).await;
    h.memory.append("other.jsonl", record_line(0)).await;
    h.viewer.open(LOG).await.unwrap();

    let (entered, release) = h.store.hold_next(25);
    let viewer = h.viewer.clone();
    let poll = tokio::spawn(async move { viewer.poll_once().await });
    entered.notified().await;

    let other = h.viewer.open("other.jsonl").await.unwrap();
    assert_eq!(other.path, Some(LogIdentity::new("other.jsonl")));
    release.notify_one();
    poll.await.unwrap().unwrap();
    let snapshot = h.viewer.snapshot();
    assert_eq!(snapshot.path, Some(LogIdentity::new("other.jsonl")));
    assert_eq!(snapshot.total, 1);
}

#[tokio::test]
async fn filters_apply_to_the_current_window_only() {
    let h = Harness::new(45, quiet()).await;
    h.viewer.open(LOG).await.unwrap();

    let users = h.viewer.set_filter(Filter::role(Role::User));
    assert!(users.visible_records.iter().all(|r| r.role == Role::User));
    assert_eq!(users.visible_records.len(), 10);

    let found = h.viewer.set_filter(Filter::text("MESSAGE 30"));
    let indices: Vec<_> = found.visible_records.iter().map(|r| r.index).collect();
    assert_eq!(indices, vec![30]);

    let outside = h.viewer.set_filter(Filter::text("message 3\""));
    assert!(outside.visible_records.is_empty());
    assert_eq!(outside.pagination_label, "26–45 of 45");
}

#[tokio::test]
async fn saved_edits_are_written_once_and_reloaded() {
    let h = Harness::new(10, quiet()).await;
    h.viewer.open(LOG).await.unwrap();

    let draft = h.viewer.begin_edit(7).await.unwrap();
    assert_eq!(draft.index, 7);
    assert!(draft.text.contains("\"content\": \"message 7\""));
    assert_eq!(h.viewer.snapshot().editing, Some(7));

    let text = "{\n  \"role\": \"assistant\",\n  \"content\": \"rewritten\"\n}";
    let formatted = h.viewer.format_edit(text).unwrap();
    let snapshot = h.viewer.save_edit(&formatted).await.unwrap();

    let writes = h.memory.writes().await;
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].0, LogIdentity::new(LOG));
    assert_eq!(writes[0].1, 7);
    assert_eq!(writes[0].2, r#"{"content":"rewritten","role":"assistant"}"#);

    assert_eq!(snapshot.editing, None);
    let edited = snapshot
        .visible_records
        .iter()
        .find(|r| r.index == 7)
        .unwrap();
    assert_eq!(edited.preview, "rewritten");
    assert_eq!(first_index(&snapshot), Some(0));
}

#[tokio::test]
async fn malformed_edits_never_reach_the_store() {
    let h = Harness::new(10, quiet()).await;
    h.viewer.open(LOG).await.unwrap();
    h.viewer.begin_edit(7).await.unwrap();

    let err = h.viewer.format_edit("{not json").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MalformedContent);
    let err = h.viewer.save_edit("{not json").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MalformedContent);

    assert!(h.memory.writes().await.is_empty());
    let snapshot = h.viewer.snapshot();
    assert_eq!(snapshot.editing, Some(7));
    assert!(snapshot.notice.is_some());
}

#[tokio::test]
async fn a_new_edit_session_replaces_the_old_one() {
    let h = Harness::new(10, quiet()).await;
    h.viewer.open(LOG).await.unwrap();
    h.viewer.begin_edit(2).await.unwrap();
    h.viewer.begin_edit(4).await.unwrap();
    h.viewer.save_edit(r#"{"role":"user","content":"four"}"#).await.unwrap();

    let writes = h.memory.writes().await;
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].1, 4);

    h.viewer.begin_edit(5).await.unwrap();
    let snapshot = h.viewer.cancel_edit();
    assert_eq!(snapshot.editing, None);
    assert!(matches!(
        h.viewer.save_edit("{}").await,
        Err(ViewerError::NoEditSession)
    ));
}

#[tokio::test]
async fn editing_a_record_outside_the_window_is_not_found() {
    let h = Harness::new(45, quiet()).await;
    h.viewer.open(LOG).await.unwrap();
    let before = h.store.fetches();

    let err = h.viewer.begin_edit(3).await.unwrap_err();
    assert!(matches!(err, ViewerError::RecordNotFound(3)));
    assert_eq!(h.store.fetches(), before + 1);
    assert_eq!(h.viewer.snapshot().editing, None);
}

#[tokio::test]
async fn concurrent_changes_block_the_save() {
    let h = Harness::new(10, quiet()).await;
    h.viewer.open(LOG).await.unwrap();
    h.viewer.begin_edit(3).await.unwrap();

    h.memory
        .write_line(&LogIdentity::new(LOG), 3, r#"{"role":"user","content":"theirs"}"#)
        .await
        .unwrap();
    let err = h
        .viewer
        .save_edit(r#"{"role":"user","content":"mine"}"#)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ViewerError::PersistFailure(StoreError::Conflict { index: 3 })
    ));

    let writes = h.memory.writes().await;
    assert_eq!(writes.len(), 1);
    let snapshot = h.viewer.snapshot();
    assert_eq!(snapshot.editing, None);
    let reloaded = snapshot.visible_records.iter().find(|r| r.index == 3).unwrap();
    assert_eq!(reloaded.preview, "theirs");
}

#[tokio::test]
async fn last_writer_wins_without_verification() {
    let config = ViewerConfig {
        verify_before_save: false,
        ..quiet()
    };
    let h = Harness::new(10, config).await;
    h.viewer.open(LOG).await.unwrap();
    h.viewer.begin_edit(3).await.unwrap();
    h.memory
        .write_line(&LogIdentity::new(LOG), 3, r#"{"content":"theirs"}"#)
        .await
        .unwrap();

    h.viewer.save_edit(r#"{"content":"mine"}"#).await.unwrap();
    let lines = h.memory.lines(&LogIdentity::new(LOG)).await;
    assert_eq!(lines[3], r#"{"content":"mine"}"#);
}

#[tokio::test]
async fn rejected_writes_keep_the_session_open() {
    let config = ViewerConfig {
        verify_before_save: false,
        ..quiet()
    };
    let h = Harness::new(10, config).await;
    h.viewer.open(LOG).await.unwrap();
    h.viewer.begin_edit(9).await.unwrap();
    h.memory.truncate(&LogIdentity::new(LOG), 5).await;

    let err = h.viewer.save_edit(r#"{"content":"late"}"#).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PersistFailure);
    assert!(matches!(
        err,
        ViewerError::PersistFailure(StoreError::IndexOutOfRange { index: 9, total: 5 })
    ));
    assert!(h.memory.writes().await.is_empty());

    let snapshot = h.viewer.snapshot();
    assert_eq!(snapshot.editing, Some(9));
    assert_eq!(snapshot.total, 5);
}

#[tokio_timeout_test(30, paused)]
async fn identical_polls_do_not_render() {
    let h = Harness::new(45, ViewerConfig::default()).await;
    h.viewer.open(LOG).await.unwrap();
    assert!(h.viewer.is_polling());
    let after_open = h.renders();
    let fetches = h.store.fetches();

    tokio::time::sleep(Duration::from_millis(4_500)).await;
    assert_eq!(h.store.fetches(), fetches + 2);
    assert_eq!(h.renders(), after_open);

    h.memory.append(LOG, record_line(45)).await;
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(h.renders(), after_open + 1);
    let snapshot = h.last();
    assert!(snapshot.scroll_to_bottom);
    assert_eq!(snapshot.pagination_label, "27–46 of 46");
    assert_eq!(snapshot.visible_records.last().unwrap().index, 45);
}

#[tokio_timeout_test(30, paused)]
async fn growth_without_follow_only_updates_the_total() {
    let h = Harness::new(45, ViewerConfig::default()).await;
    h.viewer.open(LOG).await.unwrap();
    h.viewer.page_back().await.unwrap();

    h.memory.append(LOG, record_line(45)).await;
    tokio::time::sleep(Duration::from_millis(2_500)).await;
    let snapshot = h.last();
    assert_eq!(first_index(&snapshot), Some(5));
    assert_eq!(snapshot.total, 46);
    assert!(!snapshot.scroll_to_bottom);
}

#[tokio_timeout_test(30, paused)]
async fn reopening_never_leaves_two_pollers() {
    let h = Harness::new(45, ViewerConfig::default()).await;
    h.viewer.open(LOG).await.unwrap();
    h.viewer.open(LOG).await.unwrap();
    h.viewer.set_visible(true);
    let fetches = h.store.fetches();

    tokio::time::sleep(Duration::from_millis(2_500)).await;
    assert_eq!(h.store.fetches(), fetches + 1);
}

#[tokio_timeout_test(30, paused)]
async fn hiding_and_closing_stop_the_poller() {
    let h = Harness::new(45, ViewerConfig::default()).await;
    h.viewer.open(LOG).await.unwrap();

    h.viewer.set_visible(false);
    assert!(!h.viewer.is_polling());
    let fetches = h.store.fetches();
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(h.store.fetches(), fetches);

    h.viewer.set_visible(true);
    assert!(h.viewer.is_polling());
    let closed = h.viewer.close();
    assert!(!h.viewer.is_polling());
    assert_eq!(closed.path, None);
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(h.store.fetches(), fetches);
}

#[tokio_timeout_test(30, paused)]
async fn poll_failures_are_reported_once() {
    let h = Harness::new(45, ViewerConfig::default()).await;
    h.viewer.open(LOG).await.unwrap();
    let after_open = h.renders();

    h.store.set_failing(true);
    tokio::time::sleep(Duration::from_millis(4_500)).await;
    assert_eq!(h.renders(), after_open + 1);
    let notice = h.last().notice.expect("failure notice");
    assert!(notice.message.contains("store unavailable"));
    assert_eq!(first_index(&h.last()), Some(25));

    h.store.set_failing(false);
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(h.renders(), after_open + 2);
    assert_eq!(h.last().notice, None);
}

#[tokio_timeout_test(30, paused)]
async fn truncated_logs_reanchor_to_the_new_tail() {
    let h = Harness::new(45, ViewerConfig::default()).await;
    h.viewer.open(LOG).await.unwrap();

    h.memory.truncate(&LogIdentity::new(LOG), 10).await;
    tokio::time::sleep(Duration::from_millis(2_500)).await;
    let snapshot = h.last();
    assert_eq!(first_index(&snapshot), Some(0));
    assert_eq!(snapshot.pagination_label, "1–10 of 10");
    assert!(snapshot.follow);
}
