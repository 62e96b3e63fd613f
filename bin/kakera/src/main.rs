use std::{path::PathBuf, str::FromStr, time::Duration};

use anyhow::Context;
use clap::Parser;
use fake_user_agent::get_chrome_rua;
use kakera::{
    EngineConfig, EventReporter, FileSink, FragmentDownloadEngine, FragmentFetcher,
    FragmentSource, HeartbeatPing, ProviderDescriptor, RetrySleep,
};
use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue},
    ClientBuilder,
};

#[derive(Parser, Debug, Clone)]
#[clap(version, author)]
pub struct KakeraArgs {
    /// Debug output
    #[clap(long, alias = "debug")]
    verbose: bool,

    /// Retry limit of each fragment
    #[clap(long, default_value = "10")]
    retries: u32,

    /// Delay between retries
    ///
    /// `none`, seconds (eg. `5`), `linear=<initial>:<step>:<max>` or `exp=<initial>:<base>:<max>`.
    #[clap(long, default_value = "none")]
    retry_sleep: RetrySleep,

    /// Output file path
    ///
    /// `{ext}` is replaced by the extension of the media.
    #[clap(short, long, default_value = "download.{ext}")]
    output: String,

    /// Only download the first fragment
    #[clap(long)]
    test: bool,

    /// Treat the media as live, even when the descriptor does not
    #[clap(long)]
    live: bool,

    /// Restart from scratch instead of resuming a partial download
    #[clap(long)]
    no_continue: bool,

    /// Skip fragments that still fail after all retries
    #[clap(long)]
    skip_unavailable: bool,

    /// Keep the resume state file after a successful download
    #[clap(long)]
    keep_state: bool,

    /// Cookies used to download
    #[clap(long)]
    cookies: Option<String>,

    /// HTTP Header used to download
    ///
    /// Custom header. eg. "User-Agent: xxxxx". This option will override --cookies.
    #[clap(short = 'H', long)]
    headers: Vec<String>,

    /// Request timeout in seconds
    #[clap(long, default_value = "60")]
    timeout: u64,

    /// Provider descriptor (JSON) path
    descriptor: PathBuf,
}

impl KakeraArgs {
    fn client_builder(&self) -> anyhow::Result<ClientBuilder> {
        let mut headers = HeaderMap::new();
        if let Some(cookies) = &self.cookies {
            headers.insert(
                reqwest::header::COOKIE,
                HeaderValue::from_str(cookies).context("Invalid cookie")?,
            );
        }

        for header in &self.headers {
            let (key, value) = header
                .split_once(':')
                .with_context(|| format!("Invalid header: {header}"))?;
            headers.insert(
                HeaderName::from_str(key.trim()).context("Invalid header name")?,
                HeaderValue::from_str(value.trim()).context("Invalid header value")?,
            );
        }

        Ok(ClientBuilder::new()
            .default_headers(headers)
            .user_agent(get_chrome_rua())
            .timeout(Duration::from_secs(self.timeout)))
    }

    fn config(&self) -> EngineConfig {
        EngineConfig::default()
            .max_retries(self.retries)
            .retry_sleep(self.retry_sleep.clone())
            .test_mode(self.test)
            .live(self.live)
            .continue_partial(!self.no_continue)
            .skip_unavailable_fragments(self.skip_unavailable)
            .keep_state_file(self.keep_state)
    }
}

async fn run<S, F, P>(
    engine: FragmentDownloadEngine<S, F, FileSink, P>,
) -> anyhow::Result<()>
where
    S: FragmentSource + 'static,
    F: FragmentFetcher + 'static,
    P: HeartbeatPing,
{
    let handle = engine.start().await?;

    let cancel = handle.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Ctrl-C received, stopping after the current fragment.");
            cancel.cancel();
        }
    });

    let summary = handle.wait().await?;
    match &summary.path {
        Some(path) if summary.partial => {
            tracing::info!("Stopped early, {} bytes saved to {}", summary.bytes, path.display())
        }
        Some(path) => tracing::info!(
            "Downloaded {} fragment(s), {} bytes to {} in {:.1}s",
            summary.fragments,
            summary.bytes,
            path.display(),
            summary.elapsed.as_secs_f64()
        ),
        None => {}
    }
    if summary.skipped > 0 {
        tracing::warn!("{} fragment(s) were skipped.", summary.skipped);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = KakeraArgs::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                let level = if args.verbose { "debug" } else { "info" };
                tracing_subscriber::EnvFilter::new(format!("kakera={level}"))
            }),
        )
        .with_writer(std::io::stderr)
        .init();

    let data = tokio::fs::read(&args.descriptor)
        .await
        .with_context(|| format!("Failed to read {}", args.descriptor.display()))?;
    let descriptor = ProviderDescriptor::from_json(&data)?;

    let client = descriptor.client(args.client_builder()?)?;
    let output = args.output.replace("{ext}", descriptor.extension());
    let engine = FragmentDownloadEngine::new(
        descriptor.engine_config(args.config()),
        descriptor.source()?,
        descriptor.fetcher(client.clone()),
        FileSink::new(output),
    )
    // events are already logged, nobody else listens to them
    .with_events(EventReporter::default());

    match descriptor.heartbeat(client)? {
        Some((pinger, interval)) => run(engine.with_heartbeat(pinger, interval)).await,
        None => run(engine).await,
    }
}
