use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use iptv_sieve::{
    config::Config,
    services::{
        BlacklistBackend, BlacklistStore, EndpointRegistry, FileBlacklistBackend, IpApiLookup,
        OverlayBlacklistBackend, PolicyFilter, StreamProber, SurveyPipeline, write_channel_list,
    },
    sources::read_channel_lists,
};

#[derive(Parser)]
#[command(name = "iptv-sieve")]
#[command(version)]
#[command(about = "Verify IPTV source servers and emit the channels served by the fast ones")]
#[command(long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Log level
    #[arg(short = 'v', long, default_value = "info")]
    log_level: String,

    /// Worker pool width (overrides config file)
    #[arg(short, long, value_name = "N")]
    workers: Option<usize>,

    /// URLs sampled per server (overrides config file)
    #[arg(long, value_name = "N")]
    sample_count: Option<usize>,

    /// Peak throughput in MiB/s a server needs to qualify
    #[arg(long, value_name = "MIB_PER_SEC")]
    min_throughput: Option<f64>,

    /// Output channel list path (overrides config file)
    #[arg(short, long, value_name = "PATH")]
    output: Option<PathBuf>,

    /// Probe and emit without writing to the blacklist
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_filter = format!("iptv_sieve={}", cli.log_level);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting iptv-sieve v{}", env!("CARGO_PKG_VERSION"));

    let mut config = Config::load_from_file(&cli.config)?;
    info!("Configuration loaded from: {}", cli.config);

    // Override config with CLI arguments
    if let Some(workers) = cli.workers {
        config.probe.workers = workers;
    }
    if let Some(sample_count) = cli.sample_count {
        config.probe.sample_count = sample_count;
    }
    if let Some(min_throughput) = cli.min_throughput {
        config.probe.min_throughput = min_throughput;
    }
    if let Some(output) = cli.output {
        config.output.path = output;
    }
    config.validate()?;

    let lines = read_channel_lists(&config.inputs.channel_lists).await;
    let registry = EndpointRegistry::build_with_default(&config.inputs.default_category, &lines.lines);
    info!(
        "Registry: {} categories, {} channels, {} servers ({} lines ignored)",
        registry.categories().len(),
        registry.channel_count(),
        registry.server_count(),
        registry.ignored_lines()
    );

    let file_backend = Arc::new(FileBlacklistBackend::new(&config.blacklist.path));
    let backend: Arc<dyn BlacklistBackend> = if cli.dry_run {
        info!("Dry run: blacklist appends stay in memory");
        Arc::new(OverlayBlacklistBackend::new(file_backend))
    } else {
        file_backend
    };
    let store = Arc::new(BlacklistStore::new(backend));
    if let Err(e) = store.ensure_exists().await {
        warn!("Could not create blacklist {}: {}", store.describe(), e);
    }

    let prober = Arc::new(StreamProber::from_config(&config.probe)?);
    let mut pipeline = SurveyPipeline::new(prober, store, config.probe.workers);
    if config.policy.enabled {
        let lookup = IpApiLookup::from_config(&config.policy)?;
        pipeline = pipeline.with_policy(Arc::new(PolicyFilter::new(
            Arc::new(lookup),
            config.policy.deny.clone(),
        )));
    } else {
        info!("Policy filter disabled");
    }

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, finishing in-flight probes");
                cancel.cancel();
            }
        }
    });

    let outcome = pipeline.run(&registry, cancel).await;

    if outcome.cancelled() {
        warn!(
            "Run was cancelled; leaving {} untouched",
            config.output.path.display()
        );
    } else {
        write_channel_list(&config.output.path, &outcome.records)
            .await
            .with_context(|| format!("writing {}", config.output.path.display()))?;
        info!(
            "Wrote {} channel(s) to {}",
            outcome.records.len(),
            config.output.path.display()
        );
    }

    if let Some(report_path) = &config.output.report_path {
        match outcome.report.write_json(report_path).await {
            Ok(()) => info!("Run report written to {}", report_path.display()),
            Err(e) => error!("Failed to write run report {}: {}", report_path.display(), e),
        }
    }

    Ok(())
}
