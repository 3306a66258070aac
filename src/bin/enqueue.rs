use anyhow::{Context, Result};
use clap::Parser;
use serde_json::{json, Value};
use std::path::PathBuf;

use nfce_crawler::config;
use nfce_crawler::db;
use nfce_crawler::model::INBOUND_PATTERN;

#[derive(Debug, Parser)]
#[command(author, version, about = "Put a receipt lookup request on the consumer queue")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// NFC-e access key (spaces are fine)
    #[arg(long)]
    chave: String,

    /// Opaque user reference, parsed as JSON when possible
    #[arg(long, default_value = "null")]
    user: String,

    /// Opaque requester tax id, parsed as JSON when possible
    #[arg(long, default_value = "null")]
    cpf: String,

    /// Wrap the request in a `{pattern, data}` envelope
    #[arg(long)]
    envelope: bool,
}

fn opaque(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
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

    let request = json!({
        "chave": args.chave,
        "user": opaque(&args.user),
        "cpf": opaque(&args.cpf),
    });
    let body = if args.envelope {
        json!({ "pattern": INBOUND_PATTERN, "data": request })
    } else {
        request
    };
    let body = serde_json::to_vec(&body).context("failed to encode request")?;

    let message_id = db::enqueue(&pool, &cfg.queues.consumer, &body).await?;
    let pending = db::count_pending(&pool, &cfg.queues.consumer).await?;
    println!("enqueued {} on {} ({} pending)", message_id, cfg.queues.consumer, pending);
    Ok(())
}
