use super::*;

#[tokio::test]
async fn root_object_is_fetched_by_default() {
    let fetcher = RecordingFetcher::new(|_| FetchResponse::from_chunks(200, [object_json("root")]));
    let config = test_config().with_token("tok");
    let (downloader, _logger, _queue) = downloader_with(fetcher.clone(), config);

    let item = downloader.download_single(None).await.unwrap();
    assert_eq!(item.id.as_str(), "root");
    assert_eq!(item.size, Some(0));

    let requests = fetcher.requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, Method::Get);
    assert_eq!(requests[0].url, "http://objects.test/objects/proj/root/single");
    assert_eq!(requests[0].header("Authorization"), Some("Bearer tok"));
    assert_eq!(requests[0].header("Accept"), Some("text/plain"));
    assert!(requests[0].body.is_none());
}

#[tokio::test]
async fn raw_encoded_object_resolves_individually() {
    let fetcher = RecordingFetcher::new(|_| {
        FetchResponse::from_chunks(
            200,
            [serde_json::json!({
                "id": "blob",
                "speckle_type": "Objects.Other.RawEncoding",
                "format": "brep",
            })
            .to_string()],
        )
    });
    let (downloader, _logger, _queue) = downloader_with(fetcher, test_config());

    let item = downloader.download_single(Some("blob")).await.unwrap();
    assert_eq!(item.speckle_type(), Some(crate::types::RAW_ENCODING_MARKER));
}

#[tokio::test]
async fn single_fetch_errors_are_returned() {
    let fetcher = RecordingFetcher::new(|request| {
        if request.url.ends_with("/denied/single") {
            FetchResponse::from_chunks(403, Vec::<String>::new())
        } else {
            FetchResponse::from_chunks(200, [object_json("someone-else")])
        }
    });
    let (downloader, logger, _queue) = downloader_with(fetcher, test_config());

    assert!(matches!(
        downloader.download_single(Some("denied")).await,
        Err(Error::AccessDenied { status: 403 })
    ));
    let err = downloader.download_single(Some("mine")).await.unwrap_err();
    assert!(matches!(err, Error::Protocol(ProtocolError::NotABase { .. })));
    assert!(logger.contains(LogLevel::Warn, "failed to fetch object mine"));
}

#[tokio::test]
async fn single_fetch_after_dispose_fails() {
    let fetcher = RecordingFetcher::echo();
    let (downloader, _logger, _queue) = downloader_with(fetcher.clone(), test_config());
    downloader.dispose_async().await;

    assert!(matches!(
        downloader.download_single(None).await,
        Err(Error::Disposed)
    ));
    assert_eq!(fetcher.request_count(), 0);
}
