//! Shared test helpers for exercising BatchDownloader without a network.

use crate::config::LoaderConfig;
use crate::downloader::BatchDownloader;
use crate::error::Result;
use crate::fetch::{FetchRequest, FetchResponse, Fetcher};
use crate::logging::test_support::RecordingLogger;
use crate::queue::AsyncHandoffQueue;
use crate::types::Item;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

type Responder = dyn Fn(&FetchRequest) -> FetchResponse + Send + Sync;

/// Fetcher that records every request and answers from a closure
pub(crate) struct RecordingFetcher {
    pub(crate) requests: Mutex<Vec<FetchRequest>>,
    respond: Box<Responder>,
}

impl RecordingFetcher {
    pub(crate) fn new<F>(respond: F) -> Arc<Self>
    where
        F: Fn(&FetchRequest) -> FetchResponse + Send + Sync + 'static,
    {
        Arc::new(Self {
            requests: Mutex::new(Vec::new()),
            respond: Box::new(respond),
        })
    }

    /// Answers every batch with one valid line per requested id
    pub(crate) fn echo() -> Arc<Self> {
        Self::new(|request| FetchResponse::from_chunks(200, [batch_body(&requested_ids(request))]))
    }

    /// Like [`echo`](Self::echo) but leaves out `missing`
    pub(crate) fn echo_except(missing: &[&str]) -> Arc<Self> {
        let missing: HashSet<String> = missing.iter().map(|s| s.to_string()).collect();
        Self::new(move |request| {
            let ids: Vec<String> = requested_ids(request)
                .into_iter()
                .filter(|id| !missing.contains(id))
                .collect();
            FetchResponse::from_chunks(200, [batch_body(&ids)])
        })
    }

    pub(crate) fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Ids of every batch request, in send order
    pub(crate) fn batches(&self) -> Vec<Vec<String>> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.body.is_some())
            .map(requested_ids)
            .collect()
    }
}

#[async_trait]
impl Fetcher for RecordingFetcher {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse> {
        let response = (self.respond)(&request);
        self.requests.lock().unwrap().push(request);
        Ok(response)
    }
}

/// Ids carried by a batch request body
pub(crate) fn requested_ids(request: &FetchRequest) -> Vec<String> {
    let body: serde_json::Value =
        serde_json::from_str(request.body.as_deref().unwrap_or("{}")).unwrap();
    let objects = body["objects"].as_str().unwrap_or("[]");
    serde_json::from_str(objects).unwrap()
}

/// Minimal valid object for `id`
pub(crate) fn object_json(id: &str) -> String {
    serde_json::json!({ "id": id, "speckle_type": "Base" }).to_string()
}

/// Response body with one `<id>\t<json>` line per id
pub(crate) fn batch_body(ids: &[String]) -> String {
    ids.iter()
        .map(|id| format!("{id}\t{}\n", object_json(id)))
        .collect()
}

pub(crate) fn test_config() -> LoaderConfig {
    LoaderConfig::new("http://objects.test", "proj", "root")
}

/// Downloader wired to `fetcher`, a recording logger and a fresh queue
pub(crate) fn downloader_with(
    fetcher: Arc<RecordingFetcher>,
    config: LoaderConfig,
) -> (BatchDownloader, Arc<RecordingLogger>, AsyncHandoffQueue<Item>) {
    let logger = Arc::new(RecordingLogger::default());
    let downloader = BatchDownloader::new(config, fetcher, logger.clone()).unwrap();
    (downloader, logger, AsyncHandoffQueue::new())
}
