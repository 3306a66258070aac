use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use nfce_crawler::broker::SqliteBroker;
use nfce_crawler::config;
use nfce_crawler::consumer::Consumer;
use nfce_crawler::crawler::ReceiptCrawler;
use nfce_crawler::db;
use nfce_crawler::renderer::HttpRenderer;

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;

    let pool = db::init_pool(&cfg.database_url()).await?;
    db::run_migrations(&pool).await?;

    // Anything delivered but never acked belonged to a consumer that died.
    let released = db::release_unacked(&pool, &cfg.queues.consumer).await?;
    if released > 0 {
        info!(released, "requeued unacknowledged deliveries");
    }

    let renderer = HttpRenderer::new(&cfg.source.user_agent)?;
    let crawler = ReceiptCrawler::new(Arc::new(renderer), cfg.extract_settings());
    let consumer = Consumer::new(
        Arc::new(SqliteBroker::new(pool)),
        crawler,
        cfg.queues.consumer.clone(),
        cfg.queues.channels.clone(),
    );

    info!(queue = %cfg.queues.consumer, "starting consumer");
    tokio::select! {
        _ = consumer.run(cfg.poll_interval()) => {}
        res = tokio::signal::ctrl_c() => {
            res?;
            info!("shutting down");
        }
    }

    Ok(())
}
