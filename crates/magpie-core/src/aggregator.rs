//! Single-consumer rotating result writer.
//!
//! All documents produced by the pool drain through one aggregator task
//! into size-capped, newline-delimited JSON segment files named
//! `{save_id}_{00000..}.jsonl`. On startup the aggregator scans its
//! directory and resumes the highest existing segment instead of
//! overwriting segment zero.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use tokio::sync::mpsc;

use crate::error::CrawlError;

/// Segment cap for merged crawl output.
pub const MERGED_SEGMENT_BYTES: u64 = 1024 * 1024 * 1024;

/// Segment cap for the generic variant.
pub const GENERIC_SEGMENT_BYTES: u64 = 100 * 1024 * 1024;

/// Message type drained by the aggregator loop.
///
/// Ownership of a document transfers to the aggregator once it is placed
/// on the channel; it is never mutated afterwards.
#[derive(Debug, Clone)]
pub enum SinkMessage {
    Document(String),
    Stop,
}

/// Rotating `.jsonl` writer, one per engine run.
pub struct JsonAggregator {
    save_dir: PathBuf,
    save_id: String,
    segment_index: u64,
    documents_in_segment: u64,
    max_segment_bytes: u64,
    file: Option<File>,
}

impl JsonAggregator {
    /// Open an aggregator over `save_dir`, continuing the highest-numbered
    /// existing segment for `save_id` or starting at segment 0.
    pub fn new(
        save_dir: impl Into<PathBuf>,
        save_id: impl Into<String>,
        max_segment_bytes: u64,
    ) -> Result<Self, CrawlError> {
        let save_dir = save_dir.into();
        let save_id = save_id.into();
        fs::create_dir_all(&save_dir)?;

        let segment_index = highest_segment_index(&save_dir, &save_id)?.unwrap_or(0);
        let aggregator = Self {
            save_dir,
            save_id,
            segment_index,
            documents_in_segment: 0,
            max_segment_bytes,
            file: None,
        };
        tracing::info!(
            save_id = %aggregator.save_id,
            segment = %aggregator.segment_path().display(),
            "Aggregator started"
        );
        Ok(aggregator)
    }

    /// Delete every existing segment belonging to `save_id` under `dir`.
    pub fn reset(dir: &Path, save_id: &str) -> Result<(), CrawlError> {
        if !dir.is_dir() {
            return Ok(());
        }
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if segment_index_of(&name, save_id).is_some() {
                fs::remove_file(entry.path())?;
            }
        }
        Ok(())
    }

    /// Append one document as a single line, rotating afterwards if the
    /// current segment has grown past the size cap.
    pub fn write(&mut self, document: &str) -> Result<(), CrawlError> {
        if document.is_empty() {
            return Ok(());
        }
        let path = self.segment_path();
        let file = match &mut self.file {
            Some(file) => file,
            vacant => vacant.insert(OpenOptions::new().create(true).append(true).open(&path)?),
        };
        file.write_all(document.as_bytes())?;
        file.write_all(b"\n")?;
        self.documents_in_segment += 1;

        if self.segment_size()? > self.max_segment_bytes {
            self.rotate()?;
        }
        Ok(())
    }

    pub fn segment_path(&self) -> PathBuf {
        self.save_dir
            .join(format!("{}_{:05}.jsonl", self.save_id, self.segment_index))
    }

    pub fn segment_index(&self) -> u64 {
        self.segment_index
    }

    pub fn documents_in_segment(&self) -> u64 {
        self.documents_in_segment
    }

    fn segment_size(&self) -> Result<u64, CrawlError> {
        Ok(fs::metadata(self.segment_path())?.len())
    }

    fn rotate(&mut self) -> Result<(), CrawlError> {
        // Close the old handle before opening the next segment.
        self.file = None;
        self.segment_index += 1;
        self.documents_in_segment = 0;
        self.file = Some(
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(self.segment_path())?,
        );
        tracing::info!(segment = %self.segment_path().display(), "Rotated to new segment");
        Ok(())
    }
}

/// Drain the result channel into the aggregator until a stop sentinel.
///
/// A failed write is logged and must not halt the stream: one bad
/// document never costs the documents behind it.
pub async fn aggregator_loop(mut rx: mpsc::Receiver<SinkMessage>, mut aggregator: JsonAggregator) {
    while let Some(message) = rx.recv().await {
        match message {
            SinkMessage::Document(document) => {
                if let Err(e) = aggregator.write(&document) {
                    tracing::error!(error = %e, "Failed to write document, continuing");
                }
            }
            SinkMessage::Stop => {
                tracing::warn!("Aggregator received stop command");
                break;
            }
        }
    }
}

fn highest_segment_index(dir: &Path, save_id: &str) -> Result<Option<u64>, CrawlError> {
    let mut highest = None;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name();
        if let Some(index) = segment_index_of(&name.to_string_lossy(), save_id) {
            highest = Some(highest.map_or(index, |h: u64| h.max(index)));
        }
    }
    Ok(highest)
}

fn segment_index_of(file_name: &str, save_id: &str) -> Option<u64> {
    file_name
        .strip_prefix(save_id)?
        .strip_prefix('_')?
        .strip_suffix(".jsonl")?
        .parse()
        .ok()
}
