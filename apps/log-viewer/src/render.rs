use std::io::Write;

use parking_lot::Mutex;
use record_log::{LogIdentity, NoticeLevel, RecordIndex, RenderSink, Snapshot, VisibleRecord};

pub fn header(snapshot: &Snapshot) -> String {
    let title = match &snapshot.path {
        Some(path) if path.file_name() != path.as_str() => {
            format!("{} ({path})", path.file_name())
        }
        Some(path) => path.to_string(),
        None => "(no log open)".to_string(),
    };
    let mut line = format!("== {title}  {}", snapshot.pagination_label);
    if snapshot.follow {
        line.push_str("  [follow]");
    }
    if let Some(index) = snapshot.editing {
        line.push_str(&format!("  [editing #{index}]"));
    }
    line
}

pub fn row(record: &VisibleRecord) -> String {
    format!(
        "#{:<6} {:<10} {}",
        record.index, record.role_label, record.preview
    )
}

pub fn notice_line(snapshot: &Snapshot) -> Option<String> {
    snapshot.notice.as_ref().map(|notice| match notice.level {
        NoticeLevel::Info => format!("-- {}", notice.message),
        NoticeLevel::Error => format!("!! {}", notice.message),
    })
}

/// Full text block for one window; `expand` prints every record body instead of previews.
pub fn render_snapshot(snapshot: &Snapshot, expand: bool) -> String {
    let mut out = header(snapshot);
    out.push('\n');
    for record in &snapshot.visible_records {
        out.push_str(&row(record));
        out.push('\n');
        if expand {
            for line in record.body().lines() {
                out.push_str("    ");
                out.push_str(line);
                out.push('\n');
            }
        }
    }
    if snapshot.visible_records.is_empty() {
        out.push_str("(no matching records)\n");
    }
    if let Some(notice) = notice_line(snapshot) {
        out.push_str(&notice);
        out.push('\n');
    }
    out
}

#[derive(Default)]
struct TailState {
    path: Option<LogIdentity>,
    last_printed: Option<RecordIndex>,
    last_notice: Option<String>,
}

/// Sink for follow mode: prints each record once, in index order, as it appears.
pub struct TailPrinter<W> {
    out: Mutex<W>,
    state: Mutex<TailState>,
}

impl<W: Write + Send> TailPrinter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
            state: Mutex::new(TailState::default()),
        }
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner()
    }

    fn lines_for(&self, snapshot: &Snapshot) -> Vec<String> {
        let mut state = self.state.lock();
        let mut lines = Vec::new();
        if snapshot.path != state.path {
            state.path = snapshot.path.clone();
            state.last_printed = None;
            state.last_notice = None;
            if snapshot.path.is_some() {
                lines.push(header(snapshot));
            }
        }
        for record in &snapshot.visible_records {
            if state.last_printed.map_or(true, |last| record.index > last) {
                lines.push(row(record));
                state.last_printed = Some(record.index);
            }
        }
        let notice = notice_line(snapshot);
        if notice != state.last_notice {
            if let Some(line) = &notice {
                lines.push(line.clone());
            }
            state.last_notice = notice;
        }
        lines
    }
}

impl<W: Write + Send> RenderSink for TailPrinter<W> {
    fn render(&self, snapshot: &Snapshot) {
        let lines = self.lines_for(snapshot);
        if lines.is_empty() {
            return;
        }
        let mut out = self.out.lock();
        for line in lines {
            let _ = writeln!(out, "{line}");
        }
        let _ = out.flush();
    }
}
