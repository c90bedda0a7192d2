use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use pixatlas::fetcher::USER_AGENT;
use pixatlas::{
    AbsentRowPolicy, CancelToken, HttpByteSource, Manifest, PipelineControls, PixelFeaturizer,
    TsneEmbedder,
};

#[derive(Parser, Debug)]
#[command(
    name = "pixatlas-mapper",
    about = "Fetch a manifest of images and map them onto 2-D scatter coordinates"
)]
struct MapperCli {
    /// URL of the tab-separated manifest; must contain an `id` column
    #[arg(long, env = "PIXATLAS_MANIFEST_URL")]
    manifest_url: String,

    /// Image URL template with an `{id}` placeholder
    #[arg(long, env = "PIXATLAS_IMAGE_URL")]
    image_url: String,

    /// Output file receiving the manifest plus `x` and `y` columns
    #[arg(long, env = "PIXATLAS_OUTPUT", default_value = "pixatlas.tab")]
    output: PathBuf,

    /// Maximum number of concurrently in-flight image fetches
    #[arg(long, env = "PIXATLAS_FETCH_CONCURRENCY", default_value_t = 10)]
    fetch_concurrency: usize,

    /// Seconds before an individual fetch times out
    #[arg(long, env = "PIXATLAS_FETCH_TIMEOUT_SECS", default_value_t = 60)]
    fetch_timeout_secs: u64,

    /// Featurize worker threads (0 = one per core)
    #[arg(long, env = "PIXATLAS_FEATURIZE_THREADS", default_value_t = 0)]
    featurize_threads: usize,

    /// Edge length every image is resized to before featurization
    #[arg(long, env = "PIXATLAS_STANDARD_SIZE", default_value_t = 100)]
    standard_size: u32,

    /// What to do with rows whose fetch or featurize failed
    #[arg(long, value_enum, default_value_t = AbsentRowPolicy::NullFill)]
    on_missing: AbsentRowPolicy,

    /// Only process the first N manifest rows
    #[arg(long)]
    limit: Option<usize>,

    /// t-SNE perplexity
    #[arg(long, default_value_t = 30.0)]
    perplexity: f32,

    /// t-SNE optimization epochs
    #[arg(long, default_value_t = 1000)]
    epochs: usize,
}

fn main() -> Result<()> {
    let cli = MapperCli::parse();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build runtime")?;

    let manifest_client = reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(Duration::from_secs(60))
        .build()
        .context("failed to build manifest client")?;

    eprintln!("downloading manifest from {}...", cli.manifest_url);
    let mut manifest = runtime
        .block_on(Manifest::load(&manifest_client, &cli.manifest_url))
        .context("failed to load manifest")?;
    if let Some(limit) = cli.limit {
        manifest.truncate(limit);
    }
    eprintln!(
        "manifest loaded: {} rows ({} dropped for missing id)",
        manifest.len(),
        manifest.dropped_rows()
    );

    let controls = PipelineControls::new(
        cli.fetch_concurrency,
        Duration::from_secs(cli.fetch_timeout_secs.max(1)),
        cli.featurize_threads,
        cli.standard_size,
        cli.on_missing,
    );
    let source = HttpByteSource::new(&cli.image_url, controls.fetch_timeout())
        .context("failed to build image client")?;
    let featurizer = PixelFeaturizer::new(controls.standard_size(), controls.standard_size());
    let embedder = TsneEmbedder::new()
        .perplexity(cli.perplexity)
        .epochs(cli.epochs);

    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        runtime.spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("interrupt received; draining in-flight fetches...");
                cancel.trigger();
            }
        });
    }

    let file = File::create(&cli.output)
        .with_context(|| format!("failed to create {:?}", cli.output))?;
    let mut writer = BufWriter::new(file);

    let summary = pixatlas::run_pipeline(
        &runtime,
        &manifest,
        source,
        featurizer,
        &embedder,
        &controls,
        cancel,
        &mut writer,
    )
    .context("pipeline run failed")?;
    writer.flush().context("failed to flush output")?;

    summary.report();
    eprintln!("wrote {:?}", cli.output);
    Ok(())
}
