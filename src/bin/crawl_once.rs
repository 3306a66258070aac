use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::error;

use nfce_crawler::config;
use nfce_crawler::crawler::ReceiptCrawler;
use nfce_crawler::renderer::HttpRenderer;
use nfce_crawler::router::classify;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Look up a single receipt and print it as JSON, without touching any queue"
)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// NFC-e access key
    chave: String,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;

    let renderer = HttpRenderer::new(&cfg.source.user_agent)?;
    let crawler = ReceiptCrawler::new(Arc::new(renderer), cfg.extract_settings());

    match crawler.crawl(&args.chave).await {
        Ok(receipt) => {
            println!("{}", serde_json::to_string_pretty(&receipt)?);
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            let route = classify(&err);
            error!(%err, category = err.category(), route = route.as_str(), "lookup failed");
            eprintln!("{} ({} -> {})", err, err.category(), cfg.queues.channels.queue_for(route));
            Ok(ExitCode::FAILURE)
        }
    }
}
