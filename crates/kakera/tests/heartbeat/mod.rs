use std::{
    sync::{
        atomic::{AtomicBool, AtomicU32, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use kakera::{
    DownloadEvent, EngineConfig, FiniteSource, FragmentDownloadEngine, HeartbeatPing,
    KakeraError, KakeraResult, MemorySink,
};
use rand::Rng;
use tokio::time::Instant;

use crate::common::{data, drain, fragment_url, Reply, ScriptedFetcher};

/// Records when it fires, and whether it ever fired after the sink was closed.
struct WatchingPing {
    sink: MemorySink,
    fired_at: Mutex<Vec<Instant>>,
    fired_after_close: AtomicBool,
    max_delay_us: u64,
    fail: bool,
}

impl WatchingPing {
    fn new(sink: MemorySink) -> Self {
        Self {
            sink,
            fired_at: Mutex::new(Vec::new()),
            fired_after_close: AtomicBool::new(false),
            max_delay_us: 0,
            fail: false,
        }
    }
}

impl HeartbeatPing for WatchingPing {
    async fn ping(&self) -> KakeraResult<()> {
        if self.sink.is_closed() {
            self.fired_after_close.store(true, Ordering::SeqCst);
        }
        self.fired_at.lock().unwrap().push(Instant::now());

        if self.max_delay_us > 0 {
            let delay = rand::thread_rng().gen_range(0..self.max_delay_us);
            tokio::time::sleep(Duration::from_micros(delay)).await;
        }
        if self.sink.is_closed() {
            self.fired_after_close.store(true, Ordering::SeqCst);
        }

        if self.fail {
            return Err(KakeraError::Heartbeat("session expired".to_string()));
        }
        Ok(())
    }
}

fn single_fragment(latency: Duration) -> (FiniteSource, ScriptedFetcher) {
    (
        FiniteSource::from_urls([fragment_url("a")]),
        ScriptedFetcher::new()
            .on("a", [data("a")])
            .with_latency(latency),
    )
}

#[tokio::test(start_paused = true)]
async fn test_heartbeat_schedule() -> anyhow::Result<()> {
    let sink = MemorySink::new();
    let ping = Arc::new(WatchingPing::new(sink.clone()));
    let (source, fetcher) = single_fragment(Duration::from_secs(65));

    let started = Instant::now();
    let summary = FragmentDownloadEngine::new(EngineConfig::default(), source, fetcher, sink.clone())
        .with_heartbeat(ping.clone(), Duration::from_secs(30))
        .download()
        .await?;
    assert_eq!(summary.elapsed.as_secs(), 65);

    // nothing may fire at t=90
    tokio::time::sleep(Duration::from_secs(60)).await;

    let fired: Vec<u64> = ping
        .fired_at
        .lock()
        .unwrap()
        .iter()
        .map(|at| at.duration_since(started).as_secs())
        .collect();
    assert_eq!(fired, vec![0, 30, 60]);
    assert!(!ping.fired_after_close.load(Ordering::SeqCst));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_heartbeat_fires_before_first_fragment() -> anyhow::Result<()> {
    struct OrderedPing(Arc<AtomicU32>);
    impl HeartbeatPing for OrderedPing {
        async fn ping(&self) -> KakeraResult<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    let pings = Arc::new(AtomicU32::new(0));
    let mut engine = FragmentDownloadEngine::new(
        EngineConfig::default(),
        FiniteSource::from_urls([fragment_url("a")]),
        ScriptedFetcher::new().on("a", [data("a")]),
        MemorySink::new(),
    )
    .with_heartbeat(OrderedPing(pings.clone()), Duration::from_secs(30));
    let mut events = engine.events().unwrap();

    let handle = engine.start().await?;
    // the synchronous first ping already happened when start returns
    assert_eq!(pings.load(Ordering::SeqCst), 1);
    handle.wait().await?;

    assert!(matches!(
        drain(&mut events).first(),
        Some(DownloadEvent::Started { .. })
    ));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_heartbeat_failure_does_not_abort() -> anyhow::Result<()> {
    let sink = MemorySink::new();
    let mut ping = WatchingPing::new(sink.clone());
    ping.fail = true;
    let (source, fetcher) = single_fragment(Duration::from_secs(25));

    let mut engine = FragmentDownloadEngine::new(EngineConfig::default(), source, fetcher, sink.clone())
        .with_heartbeat(ping, Duration::from_secs(10));
    let mut events = engine.events().unwrap();
    engine.download().await?;

    let failures = drain(&mut events)
        .iter()
        .filter(|e| matches!(e, DownloadEvent::HeartbeatFailed { .. }))
        .count();
    assert_eq!(failures, 3);
    assert_eq!(sink.data(), b"a");
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_heartbeat_stops_on_failure() -> anyhow::Result<()> {
    let sink = MemorySink::new();
    let ping = Arc::new(WatchingPing::new(sink.clone()));
    let fetcher = ScriptedFetcher::new()
        .on("a", [Reply::NotFound])
        .with_latency(Duration::from_secs(15));

    let result = FragmentDownloadEngine::new(
        EngineConfig::default(),
        FiniteSource::from_urls([fragment_url("a")]),
        fetcher,
        sink.clone(),
    )
    .with_heartbeat(ping.clone(), Duration::from_secs(10))
    .download()
    .await;
    assert!(result.is_err());

    tokio::time::sleep(Duration::from_secs(100)).await;
    assert_eq!(ping.fired_at.lock().unwrap().len(), 2);
    assert!(!ping.fired_after_close.load(Ordering::SeqCst));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_hanging_ping_does_not_delay_teardown() -> anyhow::Result<()> {
    /// Answers the first ping, every later one never returns.
    struct HangingPing(AtomicU32);
    impl HeartbeatPing for HangingPing {
        async fn ping(&self) -> KakeraResult<()> {
            if self.0.fetch_add(1, Ordering::SeqCst) > 0 {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            Ok(())
        }
    }

    let ping = Arc::new(HangingPing(AtomicU32::new(0)));
    let sink = MemorySink::new();
    let (source, fetcher) = single_fragment(Duration::from_secs(12));

    let started = Instant::now();
    let summary = FragmentDownloadEngine::new(EngineConfig::default(), source, fetcher, sink.clone())
        .with_heartbeat(ping.clone(), Duration::from_secs(10))
        .download()
        .await?;

    assert_eq!(started.elapsed().as_secs(), 12);
    assert_eq!(summary.elapsed.as_secs(), 12);
    assert_eq!(ping.0.load(Ordering::SeqCst), 2);
    assert!(sink.is_closed());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_no_heartbeat_after_close() -> anyhow::Result<()> {
    for _ in 0..1000 {
        let (interval_us, latency_us, fragments) = {
            let mut rng = rand::thread_rng();
            (
                rng.gen_range(200..2000),
                rng.gen_range(0..1500),
                rng.gen_range(1..4),
            )
        };

        let names: Vec<String> = (0..fragments).map(|i| format!("{i}.ts")).collect();
        let mut fetcher = ScriptedFetcher::new().with_latency(Duration::from_micros(latency_us));
        for name in &names {
            fetcher = fetcher.on(name, [data("x")]);
        }
        let source = FiniteSource::from_urls(names.iter().map(|name| fragment_url(name)));

        let sink = MemorySink::new();
        let mut ping = WatchingPing::new(sink.clone());
        ping.max_delay_us = 500;
        let ping = Arc::new(ping);

        let handle = FragmentDownloadEngine::new(EngineConfig::default(), source, fetcher, sink.clone())
            .with_heartbeat(ping.clone(), Duration::from_micros(interval_us))
            .start()
            .await?;
        handle.wait().await?;

        let fired = ping.fired_at.lock().unwrap().len();
        tokio::time::sleep(Duration::from_micros(interval_us * 2)).await;

        assert!(sink.is_closed());
        assert!(!ping.fired_after_close.load(Ordering::SeqCst));
        assert_eq!(ping.fired_at.lock().unwrap().len(), fired);
    }
    Ok(())
}
