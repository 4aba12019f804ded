use super::*;
use std::sync::atomic::AtomicUsize;

#[tokio::test(start_paused = true)]
async fn ids_within_one_window_share_a_request() {
    let fetcher = RecordingFetcher::echo();
    let (downloader, _logger, queue) = downloader_with(fetcher.clone(), test_config());
    downloader
        .initialize(Arc::new(queue.clone()), 3, Some(Duration::from_millis(100)))
        .unwrap();

    downloader.add("a").unwrap();
    downloader.add("b").unwrap();
    downloader.add("c").unwrap();

    let items: Vec<Item> = tokio::time::timeout(Duration::from_secs(5), queue.consume().collect())
        .await
        .expect("sink should close once all expected items arrive");

    assert_eq!(fetcher.request_count(), 1);
    assert_eq!(fetcher.batches(), vec![vec!["a", "b", "c"]]);
    let ids: Vec<&str> = items.iter().map(|i| i.id.as_str()).collect();
    assert_eq!(ids, vec!["a", "b", "c"]);
    assert_eq!(downloader.delivered(), 3);
}

#[tokio::test(start_paused = true)]
async fn window_is_not_extended_by_later_ids() {
    let fetcher = RecordingFetcher::echo();
    let (downloader, _logger, queue) = downloader_with(fetcher.clone(), test_config());
    downloader
        .initialize(Arc::new(queue.clone()), 1000, Some(Duration::from_millis(200)))
        .unwrap();

    downloader.add("a").unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;
    downloader.add("b").unwrap();
    assert_eq!(fetcher.request_count(), 0, "window still open");

    // 200ms after the first id, not after the last
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(fetcher.batches(), vec![vec!["a", "b"]]);

    downloader.add("c").unwrap();
    tokio::time::sleep(Duration::from_millis(199)).await;
    assert_eq!(fetcher.request_count(), 1);
    tokio::time::sleep(Duration::from_millis(2)).await;
    assert_eq!(fetcher.batches(), vec![vec!["a", "b"], vec!["c"]]);
    assert_eq!(queue.len(), 3);

    downloader.dispose_async().await;
}

#[tokio::test(start_paused = true)]
async fn duplicate_ids_are_requested_once_per_batch() {
    let fetcher = RecordingFetcher::echo();
    let (downloader, _logger, queue) = downloader_with(fetcher.clone(), test_config());
    downloader
        .initialize(Arc::new(queue.clone()), 1000, None)
        .unwrap();

    for id in ["x", "y", "x", "x", "y"] {
        downloader.add(id).unwrap();
    }
    tokio::time::sleep(Duration::from_millis(250)).await;

    assert_eq!(fetcher.batches(), vec![vec!["x", "y"]]);
    assert_eq!(queue.len(), 2);
    downloader.dispose_async().await;
}

#[tokio::test(start_paused = true)]
async fn small_graph_flushes_as_soon_as_it_is_complete() {
    let fetcher = RecordingFetcher::echo();
    let (downloader, _logger, queue) = downloader_with(fetcher.clone(), test_config());
    downloader
        .initialize(Arc::new(queue.clone()), 2, Some(Duration::from_secs(60)))
        .unwrap();

    downloader.add("one").unwrap();
    downloader.add("two").unwrap();

    // Cap equals the graph size, so nothing waits for the 60s window
    let items: Vec<Item> = tokio::time::timeout(Duration::from_secs(1), queue.consume().collect())
        .await
        .unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(fetcher.request_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn large_graph_is_split_at_max_batch_size() {
    let fetcher = RecordingFetcher::echo();
    let mut config = test_config();
    config.batch.max_batch_size = 10;
    let (downloader, _logger, queue) = downloader_with(fetcher.clone(), config);
    downloader
        .initialize(Arc::new(queue.clone()), 500, None)
        .unwrap();

    for i in 0..25 {
        downloader.add(format!("obj{i}")).unwrap();
    }
    tokio::time::sleep(Duration::from_millis(250)).await;

    let sizes: Vec<usize> = fetcher.batches().iter().map(Vec::len).collect();
    assert_eq!(sizes, vec![10, 10, 5]);
    assert_eq!(queue.len(), 25);
    downloader.dispose_async().await;
}

#[tokio::test(start_paused = true)]
async fn items_stream_from_chunked_response() {
    // Lines split at awkward chunk boundaries, no trailing newline
    let fetcher = RecordingFetcher::new(|_| {
        let body = format!(
            "a\t{}\nb\t{}",
            object_json("a"),
            object_json("b")
        );
        let (head, tail) = body.split_at(7);
        let (mid, tail) = tail.split_at(tail.len() - 3);
        FetchResponse::from_chunks(200, [head.to_string(), mid.to_string(), tail.to_string()])
    });
    let (downloader, logger, queue) = downloader_with(fetcher.clone(), test_config());
    downloader
        .initialize(Arc::new(queue.clone()), 2, None)
        .unwrap();

    downloader.add("a").unwrap();
    downloader.add("b").unwrap();

    let items: Vec<Item> = tokio::time::timeout(Duration::from_secs(5), queue.consume().collect())
        .await
        .unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(items[1].payload["id"], "b");
    assert!(items[0].size.unwrap() > 0);
    assert!(!logger.contains(LogLevel::Warn, "failed"));
}

/// Fetcher that holds each request open for a while and tracks overlap
struct SlowFetcher {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

#[async_trait::async_trait]
impl Fetcher for SlowFetcher {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(500)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(FetchResponse::from_chunks(
            200,
            [batch_body(&requested_ids(&request))],
        ))
    }
}

#[tokio::test(start_paused = true)]
async fn concurrent_batches_are_capped() {
    let fetcher = Arc::new(SlowFetcher {
        in_flight: AtomicUsize::new(0),
        peak: AtomicUsize::new(0),
    });
    let mut config = test_config();
    config.batch.max_batch_size = 2;
    config.batch.max_concurrent_batches = 2;
    let logger = Arc::new(crate::logging::test_support::RecordingLogger::default());
    let downloader = BatchDownloader::new(config, fetcher.clone(), logger).unwrap();
    let queue = AsyncHandoffQueue::new();
    downloader
        .initialize(Arc::new(queue.clone()), 100, None)
        .unwrap();

    for i in 0..12 {
        downloader.add(format!("id{i}")).unwrap();
    }
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(queue.len(), 12);
    assert_eq!(fetcher.peak.load(Ordering::SeqCst), 2);
    downloader.dispose_async().await;
}
