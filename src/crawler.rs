use crate::assemble::assemble;
use crate::error::CrawlError;
use crate::extract::{fetch_regions, ExtractSettings};
use crate::model::Receipt;
use crate::parse::parse;
use crate::renderer::Renderer;
use std::sync::Arc;
use tracing::{info, instrument};

/// Receipt key in, assembled receipt out.
#[derive(Clone)]
pub struct ReceiptCrawler {
    renderer: Arc<dyn Renderer>,
    settings: ExtractSettings,
}

impl ReceiptCrawler {
    pub fn new(renderer: Arc<dyn Renderer>, settings: ExtractSettings) -> Self {
        Self { renderer, settings }
    }

    #[instrument(skip(self))]
    pub async fn crawl(&self, key: &str) -> Result<Receipt, CrawlError> {
        let raw = fetch_regions(self.renderer.as_ref(), key, &self.settings).await?;
        let receipt = assemble(parse(&raw)?);
        info!(
            access_key = %receipt.access_key,
            items = receipt.items.len(),
            total = %receipt.total_amount,
            coupons = receipt.coupon_count,
            "receipt assembled"
        );
        Ok(receipt)
    }
}
