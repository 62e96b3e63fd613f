use std::{sync::Arc, time::Duration};

use kakera::{
    source::TemplateRequestBuilder, Continuation, DownloadEvent, EngineConfig, FiniteSource,
    FragmentDownloadEngine, FragmentIndex, FragmentRequest, KakeraError, MemorySink,
    RetrySleep, SinkOutcome,
};

use crate::common::{data, drain, fragment_url, init_tracing, page, Reply, ScriptedFetcher};

fn finite(names: &[&str]) -> FiniteSource {
    FiniteSource::from_urls(names.iter().map(|name| fragment_url(name)))
}

fn chat_source(first: &str) -> kakera::ContinuationSource<TemplateRequestBuilder> {
    kakera::ContinuationSource::with_token(
        Continuation::Token(first.to_string()),
        TemplateRequestBuilder::new("https://example.com/chat?c={token}"),
    )
}

fn chat_fetcher() -> ScriptedFetcher {
    ScriptedFetcher::new()
        .on("T0", [page("data1", Some("T1"))])
        .on("T1", [page("data2", None)])
}

#[tokio::test]
async fn test_finite_source_in_order() -> anyhow::Result<()> {
    init_tracing();
    let fetcher = ScriptedFetcher::new()
        .on("a", [data("bytes(a)")])
        .on("b", [data("bytes(b)")])
        .on("c", [data("bytes(c)")]);
    let sink = MemorySink::new();

    let summary = FragmentDownloadEngine::new(
        EngineConfig::default(),
        finite(&["a", "b", "c"]),
        fetcher,
        sink.clone(),
    )
    .download()
    .await?;

    assert_eq!(sink.data(), b"bytes(a)bytes(b)bytes(c)");
    assert_eq!(
        sink.appended(),
        (1..=3).map(FragmentIndex::Ordinal).collect::<Vec<_>>()
    );
    assert_eq!(summary.fragments, 3);
    assert_eq!(summary.bytes, 24);
    assert!(!summary.partial);
    assert_eq!(sink.open_count(), 1);
    assert_eq!(sink.close_count(), 1);
    assert_eq!(sink.outcome(), Some(SinkOutcome::Completed));
    Ok(())
}

#[tokio::test]
async fn test_continuation_source() -> anyhow::Result<()> {
    let fetcher = Arc::new(chat_fetcher());
    let sink = MemorySink::new();

    let summary = FragmentDownloadEngine::new(
        EngineConfig::default().live(true),
        chat_source("T0"),
        fetcher.clone(),
        sink.clone(),
    )
    .download()
    .await?;

    assert_eq!(sink.data(), b"data1data2");
    assert_eq!(summary.fragments, 2);
    assert!(summary.is_live);
    assert_eq!(fetcher.tokens(), vec!["T0", "T1"]);
    Ok(())
}

#[tokio::test]
async fn test_test_mode_stops_after_first_fragment() -> anyhow::Result<()> {
    let fetcher = Arc::new(chat_fetcher());
    let sink = MemorySink::new();

    let summary = FragmentDownloadEngine::new(
        EngineConfig::default().test_mode(true),
        chat_source("T0"),
        fetcher.clone(),
        sink.clone(),
    )
    .download()
    .await?;

    assert_eq!(sink.data(), b"data1");
    assert_eq!(summary.fragments, 1);
    assert!(summary.partial);
    assert_eq!(fetcher.tokens(), vec!["T0"]);
    Ok(())
}

#[tokio::test]
async fn test_empty_page_does_not_stop() -> anyhow::Result<()> {
    let fetcher = ScriptedFetcher::new()
        .on("T0", [page("", Some("T1"))])
        .on("T1", [page("", Some("T2"))])
        .on("T2", [page("data", None)]);
    let sink = MemorySink::new();

    let summary = FragmentDownloadEngine::new(
        EngineConfig::default().live(true),
        chat_source("T0"),
        fetcher,
        sink.clone(),
    )
    .download()
    .await?;

    assert_eq!(sink.data(), b"data");
    assert_eq!(sink.appended().len(), 3);
    assert_eq!(summary.fragments, 3);
    Ok(())
}

#[tokio::test]
async fn test_repeated_token_is_never_requested_twice() -> anyhow::Result<()> {
    let fetcher = Arc::new(
        ScriptedFetcher::new()
            .on("T0", [page("a", Some("T1"))])
            .on("T1", [page("b", Some("T0"))]),
    );

    FragmentDownloadEngine::new(
        EngineConfig::default().live(true),
        chat_source("T0"),
        fetcher.clone(),
        MemorySink::new(),
    )
    .download()
    .await?;

    assert_eq!(fetcher.tokens(), vec!["T0", "T1"]);
    Ok(())
}

#[tokio::test]
async fn test_continuation_needs_live_or_test_mode() {
    let result = FragmentDownloadEngine::new(
        EngineConfig::default(),
        chat_source("T0"),
        chat_fetcher(),
        MemorySink::new(),
    )
    .download()
    .await;

    assert!(matches!(result, Err(KakeraError::InvalidConfig(_))));
}

#[tokio::test]
async fn test_retries_are_reported() -> anyhow::Result<()> {
    let retries = 3;
    let fetcher = ScriptedFetcher::new()
        .on("a", [data("a")])
        .on(
            "b",
            [Reply::Transport, Reply::Transport, Reply::Transport, data("b")],
        );
    let sink = MemorySink::new();

    let mut engine = FragmentDownloadEngine::new(
        EngineConfig::default().max_retries(retries),
        finite(&["a", "b"]),
        fetcher,
        sink.clone(),
    );
    let mut events = engine.events().unwrap();
    engine.download().await?;

    let events = drain(&mut events);
    let retrying: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            DownloadEvent::FragmentRetrying { index, attempt, .. } => Some((*index, *attempt)),
            _ => None,
        })
        .collect();
    assert_eq!(
        retrying,
        (1..=retries)
            .map(|n| (FragmentIndex::Ordinal(2), n))
            .collect::<Vec<_>>()
    );
    let completed = events
        .iter()
        .filter(|e| {
            matches!(e, DownloadEvent::FragmentCompleted { index, .. } if *index == FragmentIndex::Ordinal(2))
        })
        .count();
    assert_eq!(completed, 1);
    assert!(matches!(events.last(), Some(DownloadEvent::Finished(_))));
    assert_eq!(sink.data(), b"ab");
    Ok(())
}

#[tokio::test]
async fn test_given_up_keeps_partial_output() {
    let fetcher = ScriptedFetcher::new()
        .on("a", [data("a")])
        .on("b", [Reply::Transport]);
    let sink = MemorySink::new();

    let mut engine = FragmentDownloadEngine::new(
        EngineConfig::default().max_retries(2),
        finite(&["a", "b", "c"]),
        fetcher,
        sink.clone(),
    );
    let mut events = engine.events().unwrap();
    let error = engine.download().await.unwrap_err();

    match &error {
        KakeraError::GivenUp {
            index, attempts, ..
        } => {
            assert_eq!(*index, FragmentIndex::Ordinal(2));
            assert_eq!(*attempts, 3);
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(sink.data(), b"a");
    assert_eq!(sink.outcome(), Some(SinkOutcome::Failed));

    let events = drain(&mut events);
    assert!(matches!(
        events.last(),
        Some(DownloadEvent::Failed { index: Some(FragmentIndex::Ordinal(2)), .. })
    ));
}

#[tokio::test]
async fn test_fatal_error_is_not_retried() {
    let fetcher = Arc::new(
        ScriptedFetcher::new()
            .on("a", [data("a")])
            .on("b", [Reply::NotFound, data("b")]),
    );

    let mut engine = FragmentDownloadEngine::new(
        EngineConfig::default().max_retries(5),
        finite(&["a", "b"]),
        fetcher.clone(),
        MemorySink::new(),
    );
    let mut events = engine.events().unwrap();
    let error = engine.download().await.unwrap_err();

    assert_eq!(error.fragment_index(), Some(FragmentIndex::Ordinal(2)));
    assert_eq!(fetcher.requests().len(), 2);
    assert!(!drain(&mut events)
        .iter()
        .any(|e| matches!(e, DownloadEvent::FragmentRetrying { .. })));
}

#[tokio::test]
async fn test_zero_retries() {
    let fetcher = Arc::new(ScriptedFetcher::new().on("a", [Reply::Transport, data("a")]));

    let error = FragmentDownloadEngine::new(
        EngineConfig::default().max_retries(0),
        finite(&["a"]),
        fetcher.clone(),
        MemorySink::new(),
    )
    .download()
    .await
    .unwrap_err();

    assert!(matches!(error, KakeraError::GivenUp { attempts: 1, .. }));
    assert_eq!(fetcher.requests().len(), 1);
}

#[tokio::test]
async fn test_skip_unavailable_fragments() -> anyhow::Result<()> {
    let fetcher = ScriptedFetcher::new()
        .on("a", [data("a")])
        .on("b", [Reply::NotFound])
        .on("c", [data("c")]);
    let sink = MemorySink::new();

    let mut engine = FragmentDownloadEngine::new(
        EngineConfig::default().skip_unavailable_fragments(true),
        finite(&["a", "b", "c"]),
        fetcher,
        sink.clone(),
    );
    let mut events = engine.events().unwrap();
    let summary = engine.download().await?;

    assert_eq!(sink.data(), b"ac");
    assert_eq!(summary.fragments, 2);
    assert_eq!(summary.skipped, 1);
    assert!(drain(&mut events).iter().any(|e| matches!(
        e,
        DownloadEvent::FragmentSkipped { index: FragmentIndex::Ordinal(2), .. }
    )));
    Ok(())
}

#[tokio::test]
async fn test_first_and_fatal_fragments_are_never_skipped() {
    let config = EngineConfig::default()
        .max_retries(0)
        .skip_unavailable_fragments(true);

    let first = FragmentDownloadEngine::new(
        config.clone(),
        finite(&["a", "b"]),
        ScriptedFetcher::new()
            .on("a", [Reply::NotFound])
            .on("b", [data("b")]),
        MemorySink::new(),
    )
    .download()
    .await;
    assert_eq!(
        first.unwrap_err().fragment_index(),
        Some(FragmentIndex::Ordinal(1))
    );

    let source = FiniteSource::new(vec![
        FragmentRequest::new(FragmentIndex::Ordinal(1), fragment_url("a")),
        FragmentRequest::new(FragmentIndex::Ordinal(2), fragment_url("b")).fatal(true),
    ]);
    let fatal = FragmentDownloadEngine::new(
        config,
        source,
        ScriptedFetcher::new()
            .on("a", [data("a")])
            .on("b", [Reply::NotFound]),
        MemorySink::new(),
    )
    .download()
    .await;
    assert_eq!(
        fatal.unwrap_err().fragment_index(),
        Some(FragmentIndex::Ordinal(2))
    );
}

#[tokio::test]
async fn test_continuation_is_never_skipped() {
    let result = FragmentDownloadEngine::new(
        EngineConfig::default()
            .live(true)
            .max_retries(0)
            .skip_unavailable_fragments(true),
        chat_source("T0"),
        ScriptedFetcher::new()
            .on("T0", [page("a", Some("T1"))])
            .on("T1", [Reply::NotFound]),
        MemorySink::new(),
    )
    .download()
    .await;

    assert!(matches!(result, Err(KakeraError::GivenUp { .. })));
}

#[tokio::test]
async fn test_bootstrap_failure() {
    let source = kakera::ContinuationSource::with_bootstrap(
        FragmentRequest::bootstrap(fragment_url("watch")),
        TemplateRequestBuilder::new("https://example.com/chat?c={token}"),
    );
    let sink = MemorySink::new();

    let result = FragmentDownloadEngine::new(
        EngineConfig::default().live(true),
        source,
        ScriptedFetcher::new().on("watch", [data("<html>no chat here</html>")]),
        sink.clone(),
    )
    .download()
    .await;

    assert!(matches!(result, Err(KakeraError::Bootstrap(_))));
    assert!(sink.data().is_empty());
    assert_eq!(sink.close_count(), 1);
}

#[tokio::test]
async fn test_bootstrap_payload_is_not_persisted() -> anyhow::Result<()> {
    let source = kakera::ContinuationSource::with_bootstrap(
        FragmentRequest::bootstrap(fragment_url("watch")),
        TemplateRequestBuilder::new("https://example.com/chat?c={token}"),
    );
    let sink = MemorySink::new();

    let summary = FragmentDownloadEngine::new(
        EngineConfig::default().test_mode(true),
        source,
        ScriptedFetcher::new()
            .on("watch", [page("<html>page</html>", Some("T0"))])
            .on("T0", [page("data1", Some("T1"))]),
        sink.clone(),
    )
    .download()
    .await?;

    assert_eq!(sink.data(), b"data1");
    assert_eq!(summary.fragments, 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_retry_sleep_between_attempts() -> anyhow::Result<()> {
    let started = tokio::time::Instant::now();
    FragmentDownloadEngine::new(
        EngineConfig::default().retry_sleep(RetrySleep::Linear {
            initial: 1.,
            step: 1.,
            max: 10.,
        }),
        finite(&["a"]),
        ScriptedFetcher::new().on("a", [Reply::Transport, Reply::Transport, data("a")]),
        MemorySink::new(),
    )
    .download()
    .await?;

    assert_eq!(started.elapsed().as_secs(), 3);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_abort_between_fragments() -> anyhow::Result<()> {
    let names: Vec<String> = (0..100).map(|i| format!("{i}.ts")).collect();
    let mut fetcher = ScriptedFetcher::new().with_latency(Duration::from_secs(1));
    for name in &names {
        fetcher = fetcher.on(name, [data("x")]);
    }
    let source = FiniteSource::from_urls(names.iter().map(|name| fragment_url(name)));
    let sink = MemorySink::new();

    let mut handle = FragmentDownloadEngine::new(EngineConfig::default(), source, fetcher, sink.clone())
        .start()
        .await?;
    let mut events = handle.events().unwrap();
    while let Some(event) = events.recv().await {
        if matches!(event, DownloadEvent::FragmentCompleted { .. }) {
            handle.abort();
            break;
        }
    }

    let summary = handle.wait().await?;
    assert!(summary.partial);
    assert!(summary.fragments >= 1 && summary.fragments < 100);
    assert_eq!(sink.data().len() as u64, summary.fragments);
    assert_eq!(sink.outcome(), Some(SinkOutcome::Aborted));
    assert_eq!(sink.close_count(), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_abort_interrupts_poll_delay() -> anyhow::Result<()> {
    let fetcher = ScriptedFetcher::new().on(
        "T0",
        [Reply::Data {
            payload: "live",
            next: Some("T1"),
            poll: Some(Duration::from_secs(3600)),
        }],
    );
    let sink = MemorySink::new();

    let mut handle = FragmentDownloadEngine::new(
        EngineConfig::default().live(true),
        chat_source("T0"),
        fetcher,
        sink.clone(),
    )
    .start()
    .await?;
    let mut events = handle.events().unwrap();
    while let Some(event) = events.recv().await {
        if matches!(event, DownloadEvent::FragmentCompleted { .. }) {
            break;
        }
    }

    let started = tokio::time::Instant::now();
    handle.abort();
    let summary = handle.wait().await?;
    assert!(started.elapsed() < Duration::from_secs(3600));
    assert!(summary.partial);
    assert_eq!(sink.data(), b"live");
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_abort_interrupts_retry_sleep() -> anyhow::Result<()> {
    let sink = MemorySink::new();
    let mut handle = FragmentDownloadEngine::new(
        EngineConfig::default()
            .max_retries(3)
            .retry_sleep(RetrySleep::Fixed { secs: 3600. }),
        finite(&["a", "b"]),
        ScriptedFetcher::new()
            .on("a", [data("a")])
            .on("b", [Reply::Transport]),
        sink.clone(),
    )
    .start()
    .await?;
    let mut events = handle.events().unwrap();
    while let Some(event) = events.recv().await {
        if matches!(event, DownloadEvent::FragmentRetrying { .. }) {
            break;
        }
    }

    let started = tokio::time::Instant::now();
    handle.abort();
    let summary = handle.wait().await?;
    assert!(started.elapsed() < Duration::from_secs(3600));
    assert!(summary.partial);
    assert_eq!(summary.fragments, 1);
    assert_eq!(sink.data(), b"a");
    assert_eq!(sink.outcome(), Some(SinkOutcome::Aborted));

    let given_up = drain(&mut events)
        .iter()
        .any(|e| matches!(e, DownloadEvent::FragmentGivenUp { .. }));
    assert!(!given_up);
    Ok(())
}
