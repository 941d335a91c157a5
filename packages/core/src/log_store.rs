//! Size-bounded append-only measurement log.
//!
//! `LogStore` appends one line per [`MeasurementRecord`] to a text file.
//! Before each append the file size is checked against `max_size`; when it
//! is already over the cap the oldest lines are dropped until the newest
//! tail fits (ring-buffer semantics, but by bytes rather than by count).
//!
//! Trimming only ever removes a contiguous prefix, so surviving lines keep
//! their chronological order. The newest line is always kept, even when it
//! alone is larger than the cap.
//!
//! The store holds no in-memory state beyond its path and cap; the file is
//! the single source of truth and one scheduler task owns it.

use std::io;
use std::path::{Path, PathBuf};

use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

use crate::error::AppError;
use crate::record::MeasurementRecord;

/// Byte-capped append-only log of measurement records.
#[derive(Debug, Clone)]
pub struct LogStore {
    path: PathBuf,
    max_size: u64,
}

impl LogStore {
    /// Create a store backed by `path`. The file is created lazily on the
    /// first append.
    pub fn new(path: impl Into<PathBuf>, max_size: u64) -> Self {
        Self {
            path: path.into(),
            max_size,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn max_size(&self) -> u64 {
        self.max_size
    }

    /// Current size of the backing file in bytes; a missing file is empty.
    pub async fn size(&self) -> Result<u64, AppError> {
        match fs::metadata(&self.path).await {
            Ok(meta) => Ok(meta.len()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(0),
            Err(err) => Err(err.into()),
        }
    }

    /// Trim if the log is already over the cap, then append `record`.
    pub async fn append(&self, record: &MeasurementRecord) -> Result<(), AppError> {
        self.trim_if_oversized().await?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(record.to_line().as_bytes()).await?;
        file.flush().await?;

        Ok(())
    }

    /// Drop the oldest lines when the file exceeds the cap.
    ///
    /// Returns the number of lines removed (zero when no trim was needed).
    pub async fn trim_if_oversized(&self) -> Result<usize, AppError> {
        if self.size().await? <= self.max_size {
            return Ok(0);
        }

        let contents = fs::read(&self.path).await?;
        let lines: Vec<&[u8]> = contents.split_inclusive(|b| *b == b'\n').collect();
        let keep_from = retained_start(&lines, self.max_size);

        if keep_from == 0 {
            return Ok(0);
        }

        let retained = lines[keep_from..].concat();
        let staging = staging_path(&self.path);
        fs::write(&staging, &retained).await?;
        fs::rename(&staging, &self.path).await?;

        tracing::debug!(
            "Trimmed {} oldest records from {} ({} bytes retained)",
            keep_from,
            self.path.display(),
            retained.len()
        );

        Ok(keep_from)
    }

    /// Read every record in the log, oldest first.
    pub async fn read_all(&self) -> Result<Vec<MeasurementRecord>, AppError> {
        let contents = match fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        contents
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(idx, line)| {
                line.parse::<MeasurementRecord>()
                    .map_err(|err| AppError::Parse(format!("line {}: {}", idx + 1, err)))
            })
            .collect()
    }
}

/// Index of the first line to keep so the retained tail fits in
/// `max_size` bytes. Lines are accumulated newest first; the newest line
/// is kept unconditionally.
pub fn retained_start(lines: &[&[u8]], max_size: u64) -> usize {
    let mut total: u64 = 0;
    let mut start = lines.len();

    for (idx, line) in lines.iter().enumerate().rev() {
        let len = line.len() as u64;
        if start < lines.len() && total + len > max_size {
            break;
        }
        total += len;
        start = idx;
    }

    start
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".trim");
    path.with_file_name(name)
}
