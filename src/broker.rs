use crate::db::{self, Delivery, Pool};
use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

/// Queue operations the consumer relies on. Acknowledgement is manual.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Take the next waiting message off `queue`, if any.
    async fn next_delivery(&self, queue: &str) -> Result<Option<Delivery>>;

    async fn publish(&self, queue: &str, body: &[u8]) -> Result<()>;

    async fn ack(&self, delivery: &Delivery) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct SqliteBroker {
    pool: Pool,
}

impl SqliteBroker {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Broker for SqliteBroker {
    async fn next_delivery(&self, queue: &str) -> Result<Option<Delivery>> {
        db::claim_next(&self.pool, queue).await
    }

    async fn publish(&self, queue: &str, body: &[u8]) -> Result<()> {
        let message_id = db::enqueue(&self.pool, queue, body).await?;
        debug!(queue, message_id, "published");
        Ok(())
    }

    async fn ack(&self, delivery: &Delivery) -> Result<()> {
        db::ack(&self.pool, delivery.id).await
    }
}
