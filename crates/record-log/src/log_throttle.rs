//! Rate limit for warnings a viewer would otherwise repeat on every poll tick.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

use crate::LogIdentity;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ViewerLogKind {
    PollFailure,
    Reanchor,
}

impl ViewerLogKind {
    fn interval(self) -> Duration {
        match self {
            ViewerLogKind::PollFailure => Duration::from_secs(30),
            ViewerLogKind::Reanchor => Duration::from_secs(10),
        }
    }
}

struct Emitted {
    at: Instant,
    suppressed: u64,
}

/// Per-viewer memory of the last emitted warning of each kind. Opening a different log
/// starts over.
#[derive(Default)]
pub struct LogThrottle {
    path: Option<LogIdentity>,
    emitted: HashMap<ViewerLogKind, Emitted>,
}

impl LogThrottle {
    /// `Some(n)` when the event should be logged, `n` being how many were dropped since
    /// the last one that was.
    pub fn admit(&mut self, kind: ViewerLogKind, path: &LogIdentity) -> Option<u64> {
        self.admit_at(kind, path, Instant::now())
    }

    fn admit_at(&mut self, kind: ViewerLogKind, path: &LogIdentity, now: Instant) -> Option<u64> {
        if self.path.as_ref() != Some(path) {
            self.path = Some(path.clone());
            self.emitted.clear();
        }
        if let Some(last) = self.emitted.get_mut(&kind) {
            if now.duration_since(last.at) < kind.interval() {
                last.suppressed += 1;
                return None;
            }
        }
        let previous = self.emitted.insert(
            kind,
            Emitted {
                at: now,
                suppressed: 0,
            },
        );
        Some(previous.map_or(0, |last| last.suppressed))
    }
}
