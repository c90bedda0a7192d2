use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use pixatlas::fetcher::USER_AGENT;
use pixatlas::stream::{self, DEFAULT_STREAM_MARKER};
use pixatlas::{CancelToken, JsonlSink};

#[derive(Parser, Debug)]
#[command(
    name = "pixatlas-tail",
    about = "Tail a live record stream and persist decoded payloads"
)]
struct TailCli {
    /// URL of the long-lived chunked stream
    #[arg(long, env = "PIXATLAS_STREAM_URL")]
    url: String,

    /// File receiving one JSON document per decoded record
    #[arg(long, env = "PIXATLAS_STREAM_OUTPUT", default_value = "records.jsonl")]
    output: PathBuf,

    /// Prefix marking payload-carrying lines
    #[arg(long, default_value = DEFAULT_STREAM_MARKER)]
    marker: String,

    /// Seconds before the whole streaming request times out
    #[arg(long, env = "PIXATLAS_STREAM_TIMEOUT_SECS", default_value_t = 3600)]
    request_timeout_secs: u64,
}

fn main() -> Result<()> {
    let cli = TailCli::parse();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build runtime")?;

    let client = reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(Duration::from_secs(cli.request_timeout_secs.max(1)))
        .build()
        .context("failed to build stream client")?;

    let mut sink = JsonlSink::create(&cli.output)
        .with_context(|| format!("failed to create {:?}", cli.output))?;

    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        runtime.spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("interrupt received; closing the stream...");
                cancel.trigger();
            }
        });
    }

    eprintln!("tailing {}...", cli.url);
    let stats = runtime
        .block_on(stream::tail_url(
            &client,
            &cli.url,
            &cli.marker,
            &mut sink,
            &cancel,
        ))
        .context("stream session failed")?;
    sink.flush().context("failed to flush sink")?;

    stats.report();
    eprintln!("wrote {:?}", cli.output);
    Ok(())
}
