//! Crawl configuration loading.
//!
//! One YAML file per crawl describes where output and checkpoints live,
//! which egress identities to run, and the task-list file to load.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use magpie_core::adapter::Configurable;
use magpie_core::error::CrawlError;
use magpie_core::identity::{WorkerIdentity, parse_identity_list};
use serde::Deserialize;

use crate::pages::PageTask;

fn default_interval() -> u64 {
    1
}

#[derive(Debug, Clone, Deserialize)]
pub struct CrawlConfig {
    /// Output file prefix; segments are `{save_id}_{00000..}.jsonl`.
    pub save_id: String,
    pub save_dir: PathBuf,
    pub cache_dir: PathBuf,
    /// Tab-separated task list: `id\turl\tpages`, first line is a header.
    pub tasklist: PathBuf,
    /// Egress identity specs, `"ip"` or `"ip:interval_secs"`. Empty runs
    /// a single unbound worker.
    #[serde(default)]
    pub ips: Vec<String>,
    #[serde(default = "default_interval")]
    pub default_interval: u64,
    #[serde(default)]
    pub webhook_url: Option<String>,
}

impl CrawlConfig {
    pub fn load(path: &Path) -> Result<Self, CrawlError> {
        let raw = fs::read_to_string(path)?;
        serde_yaml::from_str(&raw)
            .map_err(|e| CrawlError::Config(format!("{}: {e}", path.display())))
    }

    pub fn identities(&self) -> Result<Vec<WorkerIdentity>, CrawlError> {
        let default_interval = Duration::from_secs(self.default_interval);
        if self.ips.is_empty() {
            return Ok(vec![WorkerIdentity::new(None, default_interval, 0)]);
        }
        parse_identity_list(&self.ips, default_interval)
    }
}

impl Configurable for CrawlConfig {
    type Task = PageTask;

    fn load_tasks(&self) -> Result<(Vec<PageTask>, Vec<WorkerIdentity>), CrawlError> {
        Ok((load_page_tasks(&self.tasklist)?, self.identities()?))
    }
}

/// Parse the tab-separated task list, skipping the header line and any
/// blank lines.
pub fn load_page_tasks(path: &Path) -> Result<Vec<PageTask>, CrawlError> {
    let raw = fs::read_to_string(path)?;
    let mut tasks = Vec::new();
    for (number, line) in raw.lines().enumerate().skip(1) {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let mut columns = line.split('\t');
        let (Some(id), Some(url)) = (columns.next(), columns.next()) else {
            return Err(CrawlError::Config(format!(
                "{}:{}: expected `id\\turl[\\tpages]`",
                path.display(),
                number + 1
            )));
        };
        let pages = match columns.next() {
            Some(pages) => pages.parse().map_err(|_| {
                CrawlError::Config(format!(
                    "{}:{}: invalid page count {pages:?}",
                    path.display(),
                    number + 1
                ))
            })?,
            None => 1,
        };
        tasks.push(PageTask {
            id: id.to_string(),
            url: url.to_string(),
            pages,
        });
    }
    Ok(tasks)
}
