//! View state and window transitions.
//!
//! [`WindowManager`] owns every change to the window offset. Transitions are synchronous
//! and hand back a [`FetchRequest`]; the caller performs the store call and feeds the
//! response to [`WindowManager::apply`]. Each request carries the generation current at
//! issue time plus a monotonically increasing sequence number. Navigation bumps the
//! generation, so responses to anything issued before it are dropped on arrival.

use crate::{LogIdentity, Record, RecordIndex, WindowPage};

pub const DEFAULT_PAGE_SIZE: u64 = 20;

/// First index of the last full page.
pub fn tail_offset(total: u64, page_size: u64) -> u64 {
    total.saturating_sub(page_size)
}

pub fn page_back_offset(offset: u64, page_size: u64) -> u64 {
    offset.saturating_sub(page_size)
}

/// Next page start, never past the final page start.
pub fn page_forward_offset(offset: u64, page_size: u64, total: u64) -> u64 {
    offset
        .saturating_add(page_size)
        .min(tail_offset(total, page_size))
        .max(offset)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pagination {
    pub label: String,
    pub can_page_back: bool,
    pub can_page_forward: bool,
}

impl Pagination {
    pub fn for_window(offset: u64, page_size: u64, total: u64) -> Self {
        let end = offset.saturating_add(page_size).min(total);
        let start = if total > 0 { (offset + 1).min(end.max(1)) } else { 0 };
        Self {
            label: format!("{start}–{end} of {total}"),
            can_page_back: offset > 0,
            can_page_forward: offset.saturating_add(page_size) < total,
        }
    }

    pub fn empty() -> Self {
        Self::for_window(0, DEFAULT_PAGE_SIZE, 0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchKind {
    Probe,
    Navigate,
    Refresh,
    Poll,
    Reanchor,
}

impl FetchKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FetchKind::Probe => "probe",
            FetchKind::Navigate => "navigate",
            FetchKind::Refresh => "refresh",
            FetchKind::Poll => "poll",
            FetchKind::Reanchor => "reanchor",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchTicket {
    pub generation: u64,
    pub seq: u64,
    pub offset: u64,
    pub limit: u64,
    pub kind: FetchKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub path: LogIdentity,
    pub ticket: FetchTicket,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Superseded by a newer request or by closing the viewer; nothing changed.
    Stale,
    Applied {
        changed: bool,
        scroll_to_bottom: bool,
    },
    /// The window no longer covers the tail it should show; fetch this instead.
    Reanchor(FetchRequest),
}

#[derive(Debug, Clone)]
pub struct ViewState {
    path: LogIdentity,
    offset: u64,
    page_size: u64,
    total: u64,
    follow: bool,
    records: Vec<Record>,
    last_seen_total: u64,
    loaded: bool,
}

impl ViewState {
    fn new(path: LogIdentity, page_size: u64) -> Self {
        Self {
            path,
            offset: 0,
            page_size,
            total: 0,
            follow: true,
            records: Vec::new(),
            last_seen_total: 0,
            loaded: false,
        }
    }

    pub fn path(&self) -> &LogIdentity {
        &self.path
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn follow(&self) -> bool {
        self.follow
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn record(&self, index: RecordIndex) -> Option<&Record> {
        self.records.iter().find(|record| record.index == index)
    }

    pub fn reaches_end(&self) -> bool {
        self.offset.saturating_add(self.page_size) >= self.total
    }

    pub fn pagination(&self) -> Pagination {
        Pagination::for_window(self.offset, self.page_size, self.total)
    }
}

#[derive(Debug)]
pub struct WindowManager {
    page_size: u64,
    generation: u64,
    last_seq: u64,
    applied_seq: u64,
    state: Option<ViewState>,
}

impl WindowManager {
    pub fn new(page_size: u64) -> Self {
        Self {
            page_size: page_size.max(1),
            generation: 0,
            last_seq: 0,
            applied_seq: 0,
            state: None,
        }
    }

    pub fn state(&self) -> Option<&ViewState> {
        self.state.as_ref()
    }

    pub fn path(&self) -> Option<&LogIdentity> {
        self.state.as_ref().map(|state| &state.path)
    }

    /// Replaces any previous view and returns the probe used to learn the log size.
    pub fn open(&mut self, path: LogIdentity) -> FetchRequest {
        self.generation += 1;
        self.last_seq += 1;
        let ticket = FetchTicket {
            generation: self.generation,
            seq: self.last_seq,
            offset: 0,
            limit: 1,
            kind: FetchKind::Probe,
        };
        self.state = Some(ViewState::new(path.clone(), self.page_size));
        FetchRequest { path, ticket }
    }

    /// Anchors the window to the tail (or the top when the probe failed) and returns the
    /// full window fetch.
    pub fn apply_probe(&mut self, ticket: &FetchTicket, total: Option<u64>) -> Option<FetchRequest> {
        if !self.is_current(ticket) {
            return None;
        }
        self.applied_seq = ticket.seq;
        let page_size = self.page_size;
        let state = self.state.as_mut()?;
        state.follow = true;
        match total {
            Some(total) => {
                state.total = total;
                state.offset = tail_offset(total, page_size);
            }
            None => state.offset = 0,
        }
        self.issue(FetchKind::Navigate)
    }

    pub fn page_back(&mut self) -> Option<FetchRequest> {
        let page_size = self.page_size;
        let state = self.state.as_mut()?;
        if state.offset == 0 {
            return None;
        }
        state.offset = page_back_offset(state.offset, page_size);
        state.follow = false;
        self.navigate()
    }

    pub fn page_forward(&mut self) -> Option<FetchRequest> {
        let page_size = self.page_size;
        let state = self.state.as_mut()?;
        if state.reaches_end() {
            return None;
        }
        state.offset = page_forward_offset(state.offset, page_size, state.total);
        state.follow = state.reaches_end();
        self.navigate()
    }

    pub fn jump_to_end(&mut self) -> Option<FetchRequest> {
        let page_size = self.page_size;
        let state = self.state.as_mut()?;
        state.offset = tail_offset(state.total, page_size);
        state.follow = true;
        self.navigate()
    }

    /// Re-fetches the current window, superseding anything in flight.
    pub fn refresh(&mut self) -> Option<FetchRequest> {
        self.state.as_ref()?;
        self.generation += 1;
        self.issue(FetchKind::Refresh)
    }

    /// Re-fetches the current window without superseding in-flight navigation.
    pub fn poll(&mut self) -> Option<FetchRequest> {
        self.issue(FetchKind::Poll)
    }

    /// Drops the view; every outstanding request becomes stale.
    pub fn close(&mut self) -> Option<ViewState> {
        self.generation += 1;
        self.state.take()
    }

    pub fn is_current(&self, ticket: &FetchTicket) -> bool {
        self.state.is_some() && ticket.generation == self.generation && ticket.seq > self.applied_seq
    }

    pub fn apply(&mut self, ticket: &FetchTicket, page: WindowPage) -> ApplyOutcome {
        if !self.is_current(ticket) {
            return ApplyOutcome::Stale;
        }
        self.applied_seq = ticket.seq;
        let page_size = self.page_size;
        let Some(state) = self.state.as_mut() else {
            return ApplyOutcome::Stale;
        };

        if ticket.kind != FetchKind::Reanchor && ticket.offset != state.offset {
            return ApplyOutcome::Stale;
        }

        // Only polls chase growth; navigation keeps the offset it asked for.
        let shrank_below = ticket.offset > 0 && ticket.offset >= page.total;
        let grew_past = ticket.kind == FetchKind::Poll
            && state.follow
            && ticket.offset.saturating_add(page_size) < page.total;
        if shrank_below || grew_past {
            let offset = tail_offset(page.total, page_size);
            self.generation += 1;
            return match self.issue_at(FetchKind::Reanchor, offset) {
                Some(next) => ApplyOutcome::Reanchor(next),
                None => ApplyOutcome::Stale,
            };
        }

        // A re-anchor only moves the window once its records arrive.
        if ticket.kind == FetchKind::Reanchor {
            state.offset = ticket.offset;
            state.follow = true;
        }
        let mut records = page.lines;
        records.truncate(page_size as usize);
        let changed =
            !state.loaded || page.total != state.last_seen_total || records != state.records;
        state.records = records;
        state.total = page.total;
        state.last_seen_total = page.total;
        state.loaded = true;
        ApplyOutcome::Applied {
            changed,
            scroll_to_bottom: state.follow && state.reaches_end(),
        }
    }

    fn navigate(&mut self) -> Option<FetchRequest> {
        self.generation += 1;
        self.issue(FetchKind::Navigate)
    }

    fn issue(&mut self, kind: FetchKind) -> Option<FetchRequest> {
        let offset = self.state.as_ref()?.offset;
        self.issue_at(kind, offset)
    }

    fn issue_at(&mut self, kind: FetchKind, offset: u64) -> Option<FetchRequest> {
        let path = self.state.as_ref()?.path.clone();
        self.last_seq += 1;
        Some(FetchRequest {
            path,
            ticket: FetchTicket {
                generation: self.generation,
                seq: self.last_seq,
                offset,
                limit: self.page_size,
                kind,
            },
        })
    }
}
