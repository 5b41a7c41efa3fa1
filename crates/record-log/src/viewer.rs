//! Presentation-facing facade over one open record log.
//!
//! A [`Viewer`] owns its view state, its edit session and its tail poller. Every
//! operation mutates state under a short-held lock, performs at most a handful of store
//! calls with the lock released, and hands the resulting [`Snapshot`] to the configured
//! [`RenderSink`].

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::editor::{self, EditDraft, Editor};
use crate::error::ViewerError;
use crate::log_throttle::{LogThrottle, ViewerLogKind};
use crate::metrics;
use crate::poller::{PollControl, TailPoller};
use crate::projection::{project, Filter, VisibleRecord};
use crate::store::{RecordStore, StoreError};
use crate::view::{ApplyOutcome, FetchRequest, Pagination, WindowManager, DEFAULT_PAGE_SIZE};
use crate::{LogIdentity, RecordIndex};

/// Re-anchors chased within one operation before leaving the rest to the next poll.
const MAX_REANCHORS: usize = 2;

fn default_page_size() -> u64 {
    DEFAULT_PAGE_SIZE
}

fn default_poll_interval_ms() -> u64 {
    2_000
}

fn default_verify_before_save() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewerConfig {
    #[serde(default = "default_page_size")]
    pub page_size: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Re-read the record before saving and refuse the write if it changed.
    #[serde(default = "default_verify_before_save")]
    pub verify_before_save: bool,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            poll_interval_ms: default_poll_interval_ms(),
            verify_before_save: default_verify_before_save(),
        }
    }
}

impl ViewerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeLevel {
    Info,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Info,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            message: message.into(),
        }
    }
}

/// Everything a presentation layer needs to draw the viewer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub path: Option<LogIdentity>,
    pub visible_records: Vec<VisibleRecord>,
    pub pagination_label: String,
    pub can_page_back: bool,
    pub can_page_forward: bool,
    pub total: u64,
    pub follow: bool,
    pub scroll_to_bottom: bool,
    pub editing: Option<RecordIndex>,
    pub notice: Option<Notice>,
}

pub trait RenderSink: Send + Sync {
    fn render(&self, snapshot: &Snapshot);
}

impl<F> RenderSink for F
where
    F: Fn(&Snapshot) + Send + Sync,
{
    fn render(&self, snapshot: &Snapshot) {
        self(snapshot)
    }
}

enum Drive {
    Stale,
    Applied { changed: bool, scroll_to_bottom: bool },
}

struct Inner {
    window: WindowManager,
    filter: Filter,
    editor: Editor,
    notice: Option<Notice>,
    last_poll_error: Option<String>,
    visible: bool,
}

impl Inner {
    fn require_open(&self) -> Result<&LogIdentity, ViewerError> {
        self.window.path().ok_or(ViewerError::NotOpen)
    }

    fn clear_error_notice(&mut self) -> bool {
        let had_poll_error = self.last_poll_error.take().is_some();
        let had_error = matches!(&self.notice, Some(n) if n.level == NoticeLevel::Error);
        if had_error {
            self.notice = None;
        }
        had_error || had_poll_error
    }

    fn snapshot(&self, scroll_to_bottom: bool) -> Snapshot {
        let Some(state) = self.window.state() else {
            let pagination = Pagination::empty();
            return Snapshot {
                path: None,
                visible_records: Vec::new(),
                pagination_label: pagination.label,
                can_page_back: false,
                can_page_forward: false,
                total: 0,
                follow: false,
                scroll_to_bottom: false,
                editing: None,
                notice: self.notice.clone(),
            };
        };
        let pagination = state.pagination();
        Snapshot {
            path: Some(state.path().clone()),
            visible_records: project(state.records(), &self.filter),
            pagination_label: pagination.label,
            can_page_back: pagination.can_page_back,
            can_page_forward: pagination.can_page_forward,
            total: state.total(),
            follow: state.follow(),
            scroll_to_bottom,
            editing: self.editor.editing(),
            notice: self.notice.clone(),
        }
    }
}

struct Shared {
    store: Arc<dyn RecordStore>,
    sink: Box<dyn RenderSink>,
    config: ViewerConfig,
    inner: Mutex<Inner>,
    throttle: Mutex<LogThrottle>,
}

impl Shared {
    fn render(&self, scroll_to_bottom: bool) -> Snapshot {
        let snapshot = self.inner.lock().snapshot(scroll_to_bottom);
        self.sink.render(&snapshot);
        snapshot
    }

    fn fail(&self, err: ViewerError) -> ViewerError {
        self.inner.lock().notice = Some(Notice::error(err.to_string()));
        warn!(error = %err, kind = ?err.kind(), "viewer operation failed");
        self.render(false);
        err
    }

    /// Performs `request` and any re-anchor it leads to, applying results in order.
    async fn run_fetch(&self, mut request: FetchRequest) -> Result<Drive, ViewerError> {
        let mut reanchors = 0;
        loop {
            let ticket = request.ticket;
            metrics::FETCHES
                .with_label_values(&[ticket.kind.as_str()])
                .inc();
            let fetched = self
                .store
                .fetch_window(&request.path, ticket.offset, ticket.limit)
                .await
                .and_then(|page| {
                    if page.is_contiguous() {
                        Ok(page)
                    } else {
                        Err(StoreError::MalformedWindow(format!(
                            "non-contiguous indices at offset {}",
                            ticket.offset
                        )))
                    }
                });
            let page = match fetched {
                Ok(page) => page,
                Err(err) => {
                    if !self.inner.lock().window.is_current(&ticket) {
                        metrics::STALE_RESPONSES.inc();
                        return Ok(Drive::Stale);
                    }
                    return Err(ViewerError::from_fetch(&request.path, err));
                }
            };

            let outcome = self.inner.lock().window.apply(&ticket, page);
            match outcome {
                ApplyOutcome::Stale => {
                    metrics::STALE_RESPONSES.inc();
                    debug!(
                        path = %request.path,
                        generation = ticket.generation,
                        seq = ticket.seq,
                        kind = ticket.kind.as_str(),
                        "dropped stale window"
                    );
                    return Ok(Drive::Stale);
                }
                ApplyOutcome::Applied {
                    changed,
                    scroll_to_bottom,
                } => {
                    return Ok(Drive::Applied {
                        changed,
                        scroll_to_bottom,
                    })
                }
                ApplyOutcome::Reanchor(next) => {
                    reanchors += 1;
                    if reanchors > MAX_REANCHORS {
                        return Ok(Drive::Stale);
                    }
                    let admitted = self.throttle.lock().admit(ViewerLogKind::Reanchor, &next.path);
                    if let Some(suppressed) = admitted {
                        debug!(
                            path = %next.path,
                            offset = next.ticket.offset,
                            generation = next.ticket.generation,
                            suppressed,
                            "re-anchoring window to tail"
                        );
                    }
                    request = next;
                }
            }
        }
    }

    /// Renders the outcome of a navigation-style fetch and surfaces failures.
    fn settle(&self, result: Result<Drive, ViewerError>) -> Result<Snapshot, ViewerError> {
        match result {
            Ok(Drive::Applied {
                scroll_to_bottom, ..
            }) => {
                self.inner.lock().clear_error_notice();
                Ok(self.render(scroll_to_bottom))
            }
            Ok(Drive::Stale) => Ok(self.inner.lock().snapshot(false)),
            Err(err) => Err(self.fail(err)),
        }
    }

    async fn navigate(&self, request: Option<FetchRequest>) -> Result<Snapshot, ViewerError> {
        let Some(request) = request else {
            return Ok(self.inner.lock().snapshot(false));
        };
        debug!(
            path = %request.path,
            offset = request.ticket.offset,
            generation = request.ticket.generation,
            kind = request.ticket.kind.as_str(),
            "window transition"
        );
        let result = self.run_fetch(request).await;
        self.settle(result)
    }

    async fn reload(&self) {
        let request = self.inner.lock().window.refresh();
        if let Some(request) = request {
            if let Err(err) = self.run_fetch(request).await {
                self.inner.lock().notice = Some(Notice::error(err.to_string()));
            }
        }
    }

    async fn poll_once(&self) -> Result<bool, ViewerError> {
        let request = {
            let mut inner = self.inner.lock();
            if !inner.visible {
                return Ok(false);
            }
            inner.window.poll()
        };
        let Some(request) = request else {
            return Ok(false);
        };
        let path = request.path.clone();

        match self.run_fetch(request).await {
            Ok(Drive::Applied {
                changed,
                scroll_to_bottom,
            }) => {
                let recovered = self.inner.lock().clear_error_notice();
                if changed || recovered {
                    metrics::POLLS.with_label_values(&["changed"]).inc();
                    self.render(scroll_to_bottom);
                    Ok(true)
                } else {
                    metrics::POLLS.with_label_values(&["unchanged"]).inc();
                    Ok(false)
                }
            }
            Ok(Drive::Stale) => {
                metrics::POLLS.with_label_values(&["stale"]).inc();
                Ok(false)
            }
            Err(err) => {
                metrics::POLLS.with_label_values(&["failed"]).inc();
                let message = err.to_string();
                let fresh = {
                    let mut inner = self.inner.lock();
                    if inner.last_poll_error.as_deref() == Some(message.as_str()) {
                        false
                    } else {
                        inner.last_poll_error = Some(message.clone());
                        inner.notice = Some(Notice::error(message));
                        true
                    }
                };
                let admitted = self.throttle.lock().admit(ViewerLogKind::PollFailure, &path);
                if let Some(suppressed) = admitted {
                    warn!(path = %path, error = %err, suppressed, "tail poll failed");
                }
                if fresh {
                    self.render(false);
                }
                Err(err)
            }
        }
    }
}

/// One viewer instance. Viewers share nothing but the store.
pub struct Viewer {
    shared: Arc<Shared>,
    poller: Mutex<Option<TailPoller>>,
}

impl Viewer {
    pub fn new(
        store: Arc<dyn RecordStore>,
        sink: impl RenderSink + 'static,
        mut config: ViewerConfig,
    ) -> Self {
        config.page_size = config.page_size.max(1);
        let inner = Inner {
            window: WindowManager::new(config.page_size),
            filter: Filter::default(),
            editor: Editor::new(),
            notice: None,
            last_poll_error: None,
            visible: true,
        };
        Self {
            shared: Arc::new(Shared {
                store,
                sink: Box::new(sink),
                config,
                inner: Mutex::new(inner),
                throttle: Mutex::new(LogThrottle::default()),
            }),
            poller: Mutex::new(None),
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        self.shared.inner.lock().snapshot(false)
    }

    pub fn is_polling(&self) -> bool {
        self.poller
            .lock()
            .as_ref()
            .map(|poller| !poller.is_finished())
            .unwrap_or(false)
    }

    /// Opens `path` anchored to its tail in follow mode, replacing whatever was open.
    pub async fn open(&self, path: impl Into<LogIdentity>) -> Result<Snapshot, ViewerError> {
        let path = path.into();
        self.stop_poller();
        let probe = {
            let mut inner = self.shared.inner.lock();
            inner.editor.cancel();
            inner.notice = None;
            inner.last_poll_error = None;
            inner.window.open(path.clone())
        };
        info!(path = %path, "opening record log");

        metrics::FETCHES
            .with_label_values(&[probe.ticket.kind.as_str()])
            .inc();
        let probed = self.shared.store.fetch_window(&path, 0, 1).await;
        let (total, probe_err) = match probed {
            Ok(page) => (Some(page.total), None),
            Err(err) => {
                warn!(path = %path, error = %err, "probe failed; anchoring to the top");
                (None, Some(err))
            }
        };
        let next = self.shared.inner.lock().window.apply_probe(&probe.ticket, total);

        let result = match (next, probe_err) {
            (None, _) => Ok(Drive::Stale),
            (Some(_), Some(err)) if err.is_not_found() => Err(ViewerError::LogNotFound(path)),
            (Some(request), _) => self.shared.run_fetch(request).await,
        };
        self.start_poller();
        self.shared.settle(result)
    }

    pub async fn page_back(&self) -> Result<Snapshot, ViewerError> {
        let request = {
            let mut inner = self.shared.inner.lock();
            inner.require_open()?;
            inner.window.page_back()
        };
        self.shared.navigate(request).await
    }

    pub async fn page_forward(&self) -> Result<Snapshot, ViewerError> {
        let request = {
            let mut inner = self.shared.inner.lock();
            inner.require_open()?;
            inner.window.page_forward()
        };
        self.shared.navigate(request).await
    }

    pub async fn jump_to_end(&self) -> Result<Snapshot, ViewerError> {
        let request = {
            let mut inner = self.shared.inner.lock();
            inner.require_open()?;
            inner.window.jump_to_end()
        };
        self.shared.navigate(request).await
    }

    /// Re-fetches the current window, superseding anything in flight.
    pub async fn refresh(&self) -> Result<Snapshot, ViewerError> {
        let request = self.shared.inner.lock().window.refresh();
        match request {
            Some(request) => self.shared.navigate(Some(request)).await,
            None => Err(ViewerError::NotOpen),
        }
    }

    /// One tail-poll tick. Returns whether a new snapshot was rendered.
    pub async fn poll_once(&self) -> Result<bool, ViewerError> {
        self.shared.poll_once().await
    }

    pub fn set_filter(&self, filter: Filter) -> Snapshot {
        if filter.is_empty() {
            debug!("filter cleared");
        } else {
            debug!(query = %filter.text_query, role = ?filter.role_filter, "filter changed");
        }
        self.shared.inner.lock().filter = filter;
        self.shared.render(false)
    }

    /// Starts or stops background tailing without touching the view state.
    pub fn set_visible(&self, visible: bool) {
        self.shared.inner.lock().visible = visible;
        if visible {
            self.start_poller();
        } else {
            self.stop_poller();
        }
    }

    /// Opens an edit session on a record of the current window and returns its editable
    /// text. Any previous session is dropped unsaved.
    pub async fn begin_edit(&self, index: RecordIndex) -> Result<EditDraft, ViewerError> {
        let draft = {
            let mut guard = self.shared.inner.lock();
            let inner = &mut *guard;
            let state = inner.window.state().ok_or(ViewerError::NotOpen)?;
            let path = state.path().clone();
            state
                .record(index)
                .cloned()
                .map(|record| inner.editor.begin(path, &record))
        };
        match draft {
            Some(draft) => {
                debug!(index, "edit session started");
                self.shared.render(false);
                Ok(draft)
            }
            None => {
                self.shared.reload().await;
                Err(self.shared.fail(ViewerError::RecordNotFound(index)))
            }
        }
    }

    /// Validates and pretty-prints the draft text of the open session.
    pub fn format_edit(&self, text: &str) -> Result<String, ViewerError> {
        if self.shared.inner.lock().editor.session().is_none() {
            return Err(ViewerError::NoEditSession);
        }
        editor::format(text).map_err(|err| self.shared.fail(err))
    }

    pub fn cancel_edit(&self) -> Snapshot {
        if let Some(session) = self.shared.inner.lock().editor.cancel() {
            debug!(index = session.index, "edit session cancelled");
        }
        self.shared.render(false)
    }

    /// Validates, canonicalizes and writes the draft over the record under edit.
    pub async fn save_edit(&self, text: &str) -> Result<Snapshot, ViewerError> {
        let session = self
            .shared
            .inner
            .lock()
            .editor
            .session()
            .cloned()
            .ok_or(ViewerError::NoEditSession)?;
        let canonical = editor::canonicalize(text).map_err(|err| self.shared.fail(err))?;
        let path = session.path.clone();
        let index = session.index;

        if self.shared.config.verify_before_save {
            let current = match self.shared.store.fetch_window(&path, index, 1).await {
                Ok(page) => page.lines.into_iter().find(|record| record.index == index),
                Err(err) => {
                    metrics::WRITES.with_label_values(&["error"]).inc();
                    self.shared.reload().await;
                    return Err(self.shared.fail(ViewerError::PersistFailure(err)));
                }
            };
            if current.map(|record| record.raw) != Some(session.original.raw.clone()) {
                metrics::WRITES.with_label_values(&["conflict"]).inc();
                warn!(path = %path, index, "record changed since the edit began");
                self.shared.inner.lock().editor.finish(&path, index);
                self.shared.reload().await;
                return Err(self
                    .shared
                    .fail(ViewerError::PersistFailure(StoreError::Conflict { index })));
            }
        }

        if let Err(err) = self.shared.store.write_line(&path, index, &canonical).await {
            metrics::WRITES.with_label_values(&["error"]).inc();
            self.shared.reload().await;
            return Err(self.shared.fail(ViewerError::PersistFailure(err)));
        }
        metrics::WRITES.with_label_values(&["ok"]).inc();
        info!(path = %path, index, "record saved");

        let request = {
            let mut inner = self.shared.inner.lock();
            inner.editor.finish(&path, index);
            inner.notice = Some(Notice::info(format!("Saved record #{index}")));
            if inner.window.path() == Some(&path) {
                inner.window.refresh()
            } else {
                None
            }
        };
        let Some(request) = request else {
            return Ok(self.shared.render(false));
        };
        match self.shared.run_fetch(request).await {
            Ok(Drive::Applied {
                scroll_to_bottom, ..
            }) => Ok(self.shared.render(scroll_to_bottom)),
            Ok(Drive::Stale) => Ok(self.shared.render(false)),
            Err(err) => {
                warn!(path = %path, error = %err, "reload after save failed");
                self.shared.inner.lock().notice = Some(Notice::error(err.to_string()));
                Ok(self.shared.render(false))
            }
        }
    }

    /// Full text of a record in the current window, as shown when expanded.
    pub async fn copy_record(&self, index: RecordIndex) -> Result<String, ViewerError> {
        let text = {
            let inner = self.shared.inner.lock();
            let state = inner.window.state().ok_or(ViewerError::NotOpen)?;
            state.record(index).map(|record| record.pretty())
        };
        match text {
            Some(text) => Ok(text),
            None => {
                self.shared.reload().await;
                Err(self.shared.fail(ViewerError::RecordNotFound(index)))
            }
        }
    }

    /// Stops tailing and drops the view; responses still in flight are discarded.
    pub fn close(&self) -> Snapshot {
        self.stop_poller();
        let closed = {
            let mut inner = self.shared.inner.lock();
            inner.editor.cancel();
            inner.notice = None;
            inner.last_poll_error = None;
            inner.window.close()
        };
        if let Some(state) = closed {
            info!(path = %state.path(), "closed record log");
        }
        self.shared.render(false)
    }

    fn start_poller(&self) {
        self.stop_poller();
        let ready = {
            let inner = self.shared.inner.lock();
            inner.visible && inner.window.state().is_some()
        };
        if !ready {
            return;
        }
        if tokio::runtime::Handle::try_current().is_err() {
            warn!("no tokio runtime available; tail polling disabled");
            return;
        }
        let weak: Weak<Shared> = Arc::downgrade(&self.shared);
        let period = self.shared.config.poll_interval();
        let poller = TailPoller::spawn(period, move || {
            let weak = weak.clone();
            async move {
                let Some(shared) = weak.upgrade() else {
                    return PollControl::Stop;
                };
                let _ = shared.poll_once().await;
                PollControl::Continue
            }
        });
        debug!(period_ms = period.as_millis() as u64, "tail poller started");
        *self.poller.lock() = Some(poller);
    }

    fn stop_poller(&self) {
        if let Some(poller) = self.poller.lock().take() {
            poller.stop();
            debug!("tail poller stopped");
        }
    }
}
