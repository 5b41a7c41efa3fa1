//! Line-oriented JSON logs on the local filesystem.
//!
//! Blank lines are not records. Every other physical line is one record whose index
//! counts non-blank lines from the top of the file, so a malformed line still occupies
//! its slot (with `data` left empty) and edits never shift neighbouring indices.

use std::fs::{self, File};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::store::{validate_line_content, validate_log_path, RecordStore, StoreError};
use crate::{LogIdentity, Record, RecordIndex, WindowPage};

pub struct JsonlFileStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_lock: Mutex::new(()),
        }
    }

    fn resolve(&self, path: &LogIdentity) -> Result<PathBuf, StoreError> {
        validate_log_path(path)?;
        Ok(self.root.join(path.as_str()))
    }
}

#[async_trait]
impl RecordStore for JsonlFileStore {
    async fn count(&self, path: &LogIdentity) -> Result<u64, StoreError> {
        let file = self.resolve(path)?;
        let name = path.to_string();
        blocking(move || scan_window(&file, &name, 0, 0).map(|page| page.total)).await
    }

    async fn fetch_window(
        &self,
        path: &LogIdentity,
        offset: u64,
        limit: u64,
    ) -> Result<WindowPage, StoreError> {
        let file = self.resolve(path)?;
        let name = path.to_string();
        blocking(move || scan_window(&file, &name, offset, limit)).await
    }

    async fn write_line(
        &self,
        path: &LogIdentity,
        index: RecordIndex,
        content: &str,
    ) -> Result<(), StoreError> {
        validate_line_content(content)?;
        let file = self.resolve(path)?;
        let name = path.to_string();
        let content = content.to_string();
        let _guard = self.write_lock.lock().await;
        blocking(move || replace_line(&file, &name, index, &content)).await?;
        debug!(path = %path, index, "replaced record");
        Ok(())
    }
}

async fn blocking<T, F>(job: F) -> Result<T, StoreError>
where
    F: FnOnce() -> Result<T, StoreError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(job)
        .await
        .map_err(|err| StoreError::Io(std::io::Error::new(std::io::ErrorKind::Other, err)))?
}

fn open_log(file: &Path, name: &str) -> Result<File, StoreError> {
    match File::open(file) {
        Ok(handle) => Ok(handle),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            Err(StoreError::LogNotFound(name.to_string()))
        }
        Err(err) => Err(err.into()),
    }
}

fn trim_line_ending(mut bytes: &[u8]) -> &[u8] {
    if bytes.ends_with(b"\n") {
        bytes = &bytes[..bytes.len() - 1];
    }
    if bytes.ends_with(b"\r") {
        bytes = &bytes[..bytes.len() - 1];
    }
    bytes
}

fn is_blank(bytes: &[u8]) -> bool {
    bytes.iter().all(|b| b.is_ascii_whitespace())
}

/// Streams the file once, materialising only the records inside the window.
fn scan_window(
    file: &Path,
    name: &str,
    offset: u64,
    limit: u64,
) -> Result<WindowPage, StoreError> {
    if file.is_dir() {
        return Err(StoreError::InvalidPath(format!("{name} is a directory")));
    }
    let mut reader = BufReader::new(open_log(file, name)?);
    let end = offset.saturating_add(limit);
    let mut buf = Vec::new();
    let mut index: RecordIndex = 0;
    let mut lines = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            break;
        }
        let line = trim_line_ending(&buf);
        if is_blank(line) {
            continue;
        }
        if index >= offset && index < end {
            let raw = String::from_utf8_lossy(line).into_owned();
            let record = Record::parse(index, raw);
            if !record.is_structured() {
                warn!(path = %name, index, "record is not valid JSON");
            }
            lines.push(record);
        }
        index += 1;
    }
    Ok(WindowPage {
        lines,
        total: index,
    })
}

/// Rewrites the file with one record replaced, via a sibling temp file and rename.
fn replace_line(
    file: &Path,
    name: &str,
    target: RecordIndex,
    content: &str,
) -> Result<(), StoreError> {
    let mut reader = BufReader::new(open_log(file, name)?);
    let mut out: Vec<u8> = Vec::new();
    let mut buf = Vec::new();
    let mut index: RecordIndex = 0;
    let mut replaced = false;
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            break;
        }
        let line = trim_line_ending(&buf);
        if is_blank(line) {
            out.extend_from_slice(&buf);
            continue;
        }
        if index == target {
            out.extend_from_slice(content.as_bytes());
            out.extend_from_slice(&buf[line.len()..]);
            if !buf.ends_with(b"\n") {
                out.push(b'\n');
            }
            replaced = true;
        } else {
            out.extend_from_slice(&buf);
        }
        index += 1;
    }
    if !replaced {
        return Err(StoreError::IndexOutOfRange {
            index: target,
            total: index,
        });
    }

    let tmp = file.with_extension("jsonl.tmp");
    {
        let mut handle = File::create(&tmp)?;
        handle.write_all(&out)?;
        handle.sync_all()?;
    }
    fs::rename(&tmp, file)?;
    Ok(())
}
