use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use record_log::{
    Filter, HttpRecordStore, JsonlFileStore, RecordIndex, RecordStore, Role, Snapshot, Viewer,
    ViewerConfig,
};
use tracing::{debug, info};

use crate::logging::{LogConfig, LogLevel};
use crate::render::{render_snapshot, TailPrinter};

#[derive(Parser, Debug)]
#[command(name = "log-viewer")]
#[command(about = "Browse, tail and edit JSONL record logs")]
pub struct Cli {
    #[command(flatten)]
    pub source: SourceArgs,

    /// Records per window
    #[arg(long, default_value_t = 20, global = true)]
    pub page_size: u64,

    /// Tail poll interval in milliseconds
    #[arg(long, default_value_t = 2_000, global = true)]
    pub poll_ms: u64,

    #[arg(long, value_enum, default_value_t = LogLevel::Warn, global = true)]
    pub log_level: LogLevel,

    /// Write logs to this file instead of stderr
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Debug)]
pub struct SourceArgs {
    /// Base URL of a record-store service (e.g., http://localhost:8090)
    #[arg(long, env = "RECORD_STORE_URL", global = true)]
    pub store_url: Option<String>,

    /// Directory holding the logs, read directly from disk
    #[arg(long, env = "RECORD_LOG_ROOT", global = true)]
    pub root: Option<PathBuf>,

    /// HTTP request timeout in seconds
    #[arg(long, default_value_t = 10, global = true)]
    pub timeout_secs: u64,
}

#[derive(Args, Debug, Default, Clone)]
pub struct FilterArgs {
    /// Only records with this role (user, assistant, system, tool, unknown)
    #[arg(long)]
    pub role: Option<Role>,

    /// Case-insensitive text to search for
    #[arg(short, long)]
    pub query: Option<String>,
}

impl FilterArgs {
    fn to_filter(&self) -> Filter {
        Filter {
            text_query: self.query.clone().unwrap_or_default(),
            role_filter: self.role,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print one window of a log, the newest by default
    Show {
        path: String,
        /// Pages to step back from the tail
        #[arg(long, default_value_t = 0)]
        back: u32,
        #[command(flatten)]
        filter: FilterArgs,
        /// Print full record bodies
        #[arg(long)]
        expand: bool,
        /// Print the snapshot as JSON
        #[arg(long, conflicts_with = "expand")]
        json: bool,
    },

    /// Follow a log and print records as they are appended (ctrl-c to stop)
    Tail {
        path: String,
        #[command(flatten)]
        filter: FilterArgs,
    },

    /// Replace one record with new JSON content
    Edit {
        path: String,
        index: RecordIndex,
        /// New content; read from --file or stdin when omitted
        #[arg(long, conflicts_with = "file")]
        content: Option<String>,
        #[arg(long)]
        file: Option<PathBuf>,
        /// Skip the check that the record is unchanged since it was read
        #[arg(long)]
        no_verify: bool,
        /// Validate and print the formatted content without writing
        #[arg(long)]
        dry_run: bool,
    },

    /// Print the full body of one record
    Copy { path: String, index: RecordIndex },
}

impl Cli {
    pub fn log_config(&self) -> LogConfig {
        LogConfig {
            level: self.log_level,
            file: self.log_file.clone(),
        }
    }

    pub fn viewer_config(&self) -> ViewerConfig {
        ViewerConfig {
            page_size: self.page_size,
            poll_interval_ms: self.poll_ms,
            ..ViewerConfig::default()
        }
    }
}

impl SourceArgs {
    pub fn connect(&self) -> Result<Arc<dyn RecordStore>> {
        if let Some(url) = &self.store_url {
            let store = HttpRecordStore::with_timeout(url, Duration::from_secs(self.timeout_secs))
                .context("failed to build HTTP client")?;
            debug!(url = %store.base_url(), "using record-store service");
            return Ok(Arc::new(store));
        }
        if let Some(root) = &self.root {
            if !root.is_dir() {
                bail!("log root {} is not a directory", root.display());
            }
            debug!(root = %root.display(), "reading logs from disk");
            return Ok(Arc::new(JsonlFileStore::new(root)));
        }
        bail!("no record store configured; pass --store-url or --root (or set RECORD_STORE_URL / RECORD_LOG_ROOT)")
    }
}

pub async fn run(cli: Cli) -> Result<()> {
    let store = cli.source.connect()?;
    let config = cli.viewer_config();
    let mut stdout = std::io::stdout();
    match cli.command {
        Command::Show {
            path,
            back,
            filter,
            expand,
            json,
        } => {
            let snapshot = show(store, config, &path, back, &filter).await?;
            if json {
                serde_json::to_writer_pretty(&mut stdout, &snapshot)?;
                writeln!(stdout)?;
            } else {
                write!(stdout, "{}", render_snapshot(&snapshot, expand))?;
            }
        }
        Command::Tail { path, filter } => tail(store, config, &path, &filter).await?,
        Command::Edit {
            path,
            index,
            content,
            file,
            no_verify,
            dry_run,
        } => {
            let text = match (content, file) {
                (Some(content), _) => content,
                (None, Some(file)) => std::fs::read_to_string(&file)
                    .with_context(|| format!("failed to read {}", file.display()))?,
                (None, None) => {
                    let mut buf = String::new();
                    std::io::stdin().read_to_string(&mut buf)?;
                    buf
                }
            };
            let config = ViewerConfig {
                verify_before_save: !no_verify,
                ..config
            };
            let output = edit(store, config, &path, index, &text, dry_run).await?;
            writeln!(stdout, "{output}")?;
        }
        Command::Copy { path, index } => {
            let viewer = quiet_viewer(store, config);
            viewer.open(path.as_str()).await?;
            seek(&viewer, index).await?;
            writeln!(stdout, "{}", viewer.copy_record(index).await?)?;
        }
    }
    Ok(())
}

fn quiet_viewer(store: Arc<dyn RecordStore>, config: ViewerConfig) -> Viewer {
    let viewer = Viewer::new(store, |_: &Snapshot| {}, config);
    viewer.set_visible(false);
    viewer
}

/// Steps back from the tail until the window holds `index`.
async fn seek(viewer: &Viewer, index: RecordIndex) -> Result<Snapshot> {
    let mut snapshot = viewer.snapshot();
    if index >= snapshot.total {
        bail!(
            "record #{index} is past the end of the log ({} records)",
            snapshot.total
        );
    }
    loop {
        match snapshot.visible_records.first() {
            Some(first) if first.index > index && snapshot.can_page_back => {
                snapshot = viewer.page_back().await?;
            }
            _ => return Ok(snapshot),
        }
    }
}

pub async fn show(
    store: Arc<dyn RecordStore>,
    config: ViewerConfig,
    path: &str,
    back: u32,
    filter: &FilterArgs,
) -> Result<Snapshot> {
    let viewer = quiet_viewer(store, config);
    viewer.open(path).await?;
    for _ in 0..back {
        if !viewer.snapshot().can_page_back {
            break;
        }
        viewer.page_back().await?;
    }
    Ok(viewer.set_filter(filter.to_filter()))
}

pub async fn edit(
    store: Arc<dyn RecordStore>,
    config: ViewerConfig,
    path: &str,
    index: RecordIndex,
    text: &str,
    dry_run: bool,
) -> Result<String> {
    let viewer = quiet_viewer(store, config);
    viewer.open(path).await?;
    seek(&viewer, index).await?;
    viewer.begin_edit(index).await?;
    let formatted = viewer.format_edit(text)?;
    if dry_run {
        viewer.cancel_edit();
        return Ok(formatted);
    }
    let snapshot = viewer.save_edit(text).await?;
    info!(path, index, "record replaced");
    Ok(snapshot
        .notice
        .map(|notice| notice.message)
        .unwrap_or_else(|| format!("Saved record #{index}")))
}

async fn tail(
    store: Arc<dyn RecordStore>,
    config: ViewerConfig,
    path: &str,
    filter: &FilterArgs,
) -> Result<()> {
    let viewer = Viewer::new(store, TailPrinter::new(std::io::stdout()), config);
    viewer.set_filter(filter.to_filter());
    viewer.open(path).await?;
    info!(path, "following log; ctrl-c to stop");
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    viewer.close();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use record_log::InMemoryRecordStore;

    async fn store_with(lines: usize) -> Arc<InMemoryRecordStore> {
        let store = InMemoryRecordStore::new();
        for i in 0..lines {
            let role = if i % 3 == 0 { "assistant" } else { "user" };
            store
                .append("a.jsonl", format!(r#"{{"role":"{role}","content":"m{i}"}}"#))
                .await;
        }
        store
    }

    #[test]
    fn parses_subcommands_and_roles() {
        let cli = Cli::try_parse_from([
            "log-viewer",
            "--root",
            "/tmp",
            "show",
            "a.jsonl",
            "--back",
            "2",
            "--role",
            "assistant",
        ])
        .unwrap();
        match cli.command {
            Command::Show { back, filter, .. } => {
                assert_eq!(back, 2);
                assert_eq!(filter.role, Some(Role::Assistant));
            }
            other => panic!("unexpected command {other:?}"),
        }
        assert!(Cli::try_parse_from(["log-viewer", "show", "a.jsonl", "--role", "wizard"]).is_err());
    }

    #[tokio::test]
    async fn show_steps_back_and_filters() {
        let store = store_with(50).await;
        let filter = FilterArgs {
            role: Some(Role::Assistant),
            query: None,
        };
        let snapshot = show(store, ViewerConfig::default(), "a.jsonl", 1, &filter)
            .await
            .unwrap();
        assert_eq!(snapshot.pagination_label, "11–30 of 50");
        assert!(snapshot
            .visible_records
            .iter()
            .all(|r| r.role == Role::Assistant && r.index % 3 == 0));
    }

    #[tokio::test]
    async fn edit_seeks_to_old_records() {
        let store = store_with(50).await;
        let message = edit(
            store.clone(),
            ViewerConfig::default(),
            "a.jsonl",
            4,
            r#"{"role":"user","content":"fixed"}"#,
            false,
        )
        .await
        .unwrap();
        assert_eq!(message, "Saved record #4");
        let writes = store.writes().await;
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].1, 4);
        assert_eq!(writes[0].2, r#"{"content":"fixed","role":"user"}"#);
    }

    #[tokio::test]
    async fn dry_runs_and_bad_input_never_write() {
        let store = store_with(5).await;
        let formatted = edit(store.clone(), ViewerConfig::default(), "a.jsonl", 1, r#"{"a":1}"#, true)
            .await
            .unwrap();
        assert_eq!(formatted, "{\n  \"a\": 1\n}");
        assert!(edit(store.clone(), ViewerConfig::default(), "a.jsonl", 1, "{oops", false)
            .await
            .is_err());
        assert!(edit(store.clone(), ViewerConfig::default(), "a.jsonl", 9, "{}", false)
            .await
            .is_err());
        assert!(store.writes().await.is_empty());
    }
}
