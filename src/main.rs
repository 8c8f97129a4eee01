use clap::{Parser, Subcommand};
use std::{path::PathBuf, sync::Arc};
use tokio::signal;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use phishguard::{
    config::Config,
    dataset, domain_age,
    engine::{build_parser, DetectionEngine},
    features::FeatureExtractor,
    routes::{self, AppState},
    training,
};

#[derive(Parser)]
#[command(name = "phishguard", version, about = "URL phishing classifier")]
struct Cli {
    /// Config file (toml, yaml or json); `phishguard.*` in the working directory is used if present
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP service
    Serve,
    /// Train a model from a `url,is_phishing` CSV
    Train {
        #[arg(long)]
        dataset: PathBuf,
        /// Output path, defaults to `model.path`
        #[arg(long)]
        model: Option<PathBuf>,
    },
    /// Score URLs from the command line
    Check {
        #[arg(required = true)]
        urls: Vec<String>,
        /// Print one JSON result per line
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "phishguard=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = Config::load_from(cli.config.as_deref())?;
    info!("Loaded configuration: {:?}", config);

    match cli.command {
        Command::Serve => serve(config).await,
        Command::Train { dataset, model } => train(config, dataset, model).await,
        Command::Check { urls, json } => check(config, urls, json).await,
    }
}

async fn serve(config: Config) -> anyhow::Result<()> {
    let metrics = metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()?;
    let engine = DetectionEngine::from_config(&config)?;

    let app = routes::router(AppState {
        engine: Arc::new(engine),
        metrics: Some(metrics),
    })
    .layer(CorsLayer::permissive())
    .layer(TraceLayer::new_for_http());

    let addr = format!("{}:{}", config.server.host, config.server.port);
    info!("Starting PhishGuard on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn train(config: Config, dataset_path: PathBuf, model_path: Option<PathBuf>) -> anyhow::Result<()> {
    let parser = Arc::new(build_parser(&config)?);
    let extractor = FeatureExtractor::new(parser, domain_age::from_config(&config.whois));
    let samples = dataset::load_csv(&dataset_path)?;

    let (classifier, report) = training::train(&extractor, &samples, &config.model.forest_params()).await?;
    let model_path = model_path.unwrap_or(config.model.path);
    classifier.save(&model_path)?;

    println!("{}", report);
    println!("model written to {}", model_path.display());
    Ok(())
}

async fn check(config: Config, urls: Vec<String>, json: bool) -> anyhow::Result<()> {
    let engine = DetectionEngine::from_config(&config)?;
    if !engine.model_loaded() {
        warn!("No model at {}; only whitelisted URLs can be classified", config.model.path.display());
    }

    for url in urls {
        let result = engine.score(&url).await;
        if json {
            println!("{}", serde_json::to_string(&result)?);
            continue;
        }

        println!("URL: {}", url);
        match (&result.error, result.is_phishing) {
            (Some(e), _) => println!("Error: {}", e),
            (None, Some(true)) => println!("Prediction: Phishing"),
            (None, _) => println!("Prediction: Legitimate"),
        }
        println!("Confidence: {:.2}\n", result.confidence);
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    warn!("Shutdown signal received, starting graceful shutdown");
}
