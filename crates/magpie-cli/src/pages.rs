//! Generic paged-listing site adapter.
//!
//! One task is one paginated section of a site: `pages` numbered pages
//! under a base URL. Each page is a checkpoint sub-unit, processed
//! strictly in order with a checkpoint write after every page, so a
//! killed crawl resumes at the first unfinished page instead of
//! re-fetching the whole section.

use std::fmt;

use chrono::Utc;
use magpie_client::fetch::{FetchClient, FetchOptions};
use magpie_client::headers::HeaderState;
use magpie_core::adapter::{Adapter, DocumentSink};
use magpie_core::checkpoint::{CheckpointRecord, CheckpointStore, SubUnit, SubUnitProgress};
use magpie_core::error::CrawlError;
use magpie_core::identity::WorkerIdentity;

#[derive(Debug, Clone)]
pub struct PageTask {
    pub id: String,
    pub url: String,
    pub pages: u32,
}

impl fmt::Display for PageTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

#[derive(Clone)]
pub struct PageAdapter {
    checkpoints: CheckpointStore,
}

impl PageAdapter {
    pub fn new(checkpoints: CheckpointStore) -> Self {
        Self { checkpoints }
    }
}

impl Adapter for PageAdapter {
    type Task = PageTask;

    async fn run(
        &self,
        task: PageTask,
        identity: &WorkerIdentity,
        sink: &DocumentSink,
    ) -> Result<(), CrawlError> {
        if self.checkpoints.is_processed(&task.id) {
            tracing::warn!(task = %task, "Already processed, skipping");
            return Ok(());
        }

        let mut record: CheckpointRecord<SubUnitProgress> = self.checkpoints.read(&task.id)?;
        if record.progress.units.is_empty() {
            record.progress.units = (1..=task.pages)
                .map(|page| SubUnit::new(format!("page{page}"), page))
                .collect();
        }

        let client = FetchClient::new(identity)?;
        let mut headers = HeaderState::new();
        let options = FetchOptions::default();

        let start = record
            .progress
            .first_unfinished()
            .unwrap_or(record.progress.units.len());
        for position in start..record.progress.units.len() {
            let page = record.progress.units[position].index;
            let url = page_url(&task.url, page);

            // RateLimited/PossibleBan/NoResponse propagate to the worker
            // loop; a missing page is an ordinary condition.
            let fetched = client.get(&url, &mut headers, &options).await?;
            match fetched.body {
                Some(body) => {
                    let document = serde_json::json!({
                        "id": task.id,
                        "page": page,
                        "uri": url,
                        "retrieved": Utc::now().to_rfc3339(),
                        "text": body,
                    })
                    .to_string();
                    sink.push(document).await?;
                }
                None => {
                    tracing::warn!(task = %task, page, "Page not found, skipping");
                }
            }

            record.progress.mark_done(page);
            record.touch();
            self.checkpoints.write(&task.id, &record)?;
        }

        record.mark_done();
        self.checkpoints.write(&task.id, &record)?;
        Ok(())
    }
}

/// Substitute `{page}` in the base URL, or append a `page` query
/// parameter when no placeholder is present.
fn page_url(base: &str, page: u32) -> String {
    if base.contains("{page}") {
        base.replace("{page}", &page.to_string())
    } else if base.contains('?') {
        format!("{base}&page={page}")
    } else {
        format!("{base}?page={page}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::tempdir;
    use tokio::sync::mpsc;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn identity() -> WorkerIdentity {
        WorkerIdentity::new(None, Duration::ZERO, 0)
    }

    fn sink() -> (DocumentSink, mpsc::Receiver<magpie_core::SinkMessage>) {
        let (tx, rx) = mpsc::channel(64);
        (DocumentSink::new(tx), rx)
    }

    fn drain(rx: &mut mpsc::Receiver<magpie_core::SinkMessage>) -> Vec<String> {
        let mut documents = Vec::new();
        while let Ok(message) = rx.try_recv() {
            if let magpie_core::SinkMessage::Document(document) = message {
                documents.push(document);
            }
        }
        documents
    }

    #[test]
    fn page_url_substitution() {
        assert_eq!(
            page_url("https://x.test/list?page={page}", 3),
            "https://x.test/list?page=3"
        );
        assert_eq!(
            page_url("https://x.test/list", 3),
            "https://x.test/list?page=3"
        );
        assert_eq!(
            page_url("https://x.test/list?sort=new", 3),
            "https://x.test/list?sort=new&page=3"
        );
    }

    #[tokio::test]
    async fn crawls_every_page_and_marks_done() {
        let server = MockServer::start().await;
        for page in 1..=3 {
            Mock::given(method("GET"))
                .and(path("/list"))
                .and(query_param("page", page.to_string()))
                .respond_with(ResponseTemplate::new(200).set_body_string(format!("page {page}")))
                .expect(1)
                .mount(&server)
                .await;
        }

        let cache = tempdir().unwrap();
        let store = CheckpointStore::new(cache.path());
        let adapter = PageAdapter::new(store.clone());
        let (sink, mut rx) = sink();

        let task = PageTask {
            id: "list".into(),
            url: format!("{}/list", server.uri()),
            pages: 3,
        };
        adapter.run(task, &identity(), &sink).await.unwrap();

        assert_eq!(drain(&mut rx).len(), 3);
        assert!(store.is_processed("list"));
    }

    #[tokio::test]
    async fn fresh_done_entity_makes_zero_fetches() {
        // No mocks mounted: any request would 404 the mock server and the
        // checkpoint below must prevent all of them.
        let server = MockServer::start().await;

        let cache = tempdir().unwrap();
        let store = CheckpointStore::new(cache.path());
        let mut record: CheckpointRecord<SubUnitProgress> = CheckpointRecord::default();
        record.mark_done();
        store.write("list", &record).unwrap();

        let adapter = PageAdapter::new(store);
        let (sink, mut rx) = sink();
        let task = PageTask {
            id: "list".into(),
            url: format!("{}/list", server.uri()),
            pages: 3,
        };
        adapter.run(task, &identity(), &sink).await.unwrap();

        assert!(drain(&mut rx).is_empty());
        assert_eq!(server.received_requests().await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn resumes_at_first_unfinished_page() {
        let server = MockServer::start().await;
        // Only page 3 may be requested.
        Mock::given(method("GET"))
            .and(path("/list"))
            .and(query_param("page", "3"))
            .respond_with(ResponseTemplate::new(200).set_body_string("page 3"))
            .expect(1)
            .mount(&server)
            .await;

        let cache = tempdir().unwrap();
        let store = CheckpointStore::new(cache.path());
        let mut record: CheckpointRecord<SubUnitProgress> = CheckpointRecord::default();
        record.progress.units = (1..=3)
            .map(|page| SubUnit::new(format!("page{page}"), page))
            .collect();
        record.progress.mark_done(1);
        record.progress.mark_done(2);
        record.touch();
        store.write("list", &record).unwrap();

        let adapter = PageAdapter::new(store.clone());
        let (sink, mut rx) = sink();
        let task = PageTask {
            id: "list".into(),
            url: format!("{}/list", server.uri()),
            pages: 3,
        };
        adapter.run(task, &identity(), &sink).await.unwrap();

        assert_eq!(drain(&mut rx).len(), 1);
        assert!(store.is_processed("list"));
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn missing_pages_are_skipped_not_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("page", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_string("page 1"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let cache = tempdir().unwrap();
        let store = CheckpointStore::new(cache.path());
        let adapter = PageAdapter::new(store.clone());
        let (sink, mut rx) = sink();
        let task = PageTask {
            id: "list".into(),
            url: format!("{}/list", server.uri()),
            pages: 2,
        };
        adapter.run(task, &identity(), &sink).await.unwrap();

        // One document, but the entity still completed.
        assert_eq!(drain(&mut rx).len(), 1);
        assert!(store.is_processed("list"));
    }
}
