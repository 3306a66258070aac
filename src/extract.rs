use crate::error::{CrawlError, RenderError};
use crate::model::RawPageExtract;
use crate::renderer::{Page, Renderer};
use crate::schema::{Shape, ERROR_BANNER, READY_MARKER, REGIONS};
use std::time::Duration;
use tracing::{debug, instrument, warn};

#[derive(Debug, Clone)]
pub struct ExtractSettings {
    pub base_url: String,
    pub navigation_timeout: Duration,
    pub ready_timeout: Duration,
}

impl ExtractSettings {
    pub fn url_for(&self, key: &str) -> String {
        format!("{}{}", self.base_url, key)
    }
}

/// Open a page, pull every region for `key`, and close the page whatever the
/// outcome.
#[instrument(skip_all)]
pub async fn fetch_regions(
    renderer: &dyn Renderer,
    key: &str,
    settings: &ExtractSettings,
) -> Result<RawPageExtract, CrawlError> {
    let mut page = renderer.open_page().await?;
    let res = extract(page.as_mut(), key, settings).await;
    if let Err(err) = page.close().await {
        warn!(?err, "failed to close page");
    }
    res
}

/// Read the raw regions off an already opened page.
///
/// The error banner is checked before any data region is touched, so a page
/// the source refused never yields a partial extract.
pub async fn extract(
    page: &mut dyn Page,
    key: &str,
    settings: &ExtractSettings,
) -> Result<RawPageExtract, CrawlError> {
    let url = settings.url_for(key);
    page.goto(&url, settings.navigation_timeout)
        .await
        .map_err(|source| match source {
            RenderError::ExecutionDestroyed(_) => CrawlError::from(source),
            source => CrawlError::Navigation {
                url: url.clone(),
                source,
            },
        })?;

    page.wait_for(READY_MARKER, settings.ready_timeout)
        .await
        .map_err(|err| match err {
            RenderError::Timeout { .. } => CrawlError::NotReady(err),
            other => CrawlError::from(other),
        })?;

    if let Some(banner) = page.text_of(ERROR_BANNER).await? {
        let banner = banner.trim();
        if !banner.is_empty() {
            warn!(banner, "source reported an error");
            return Err(CrawlError::SourceReported(banner.to_string()));
        }
    }

    let mut raw = RawPageExtract::new();
    for rule in REGIONS {
        let texts: Vec<String> = match rule.shape {
            Shape::Single => page.text_of(rule.selector).await?.into_iter().collect(),
            Shape::Sequence => page.texts_of(rule.selector).await?,
        };
        debug!(region = rule.region.as_str(), entries = texts.len(), "region read");
        raw.insert(rule.region, texts);
    }
    Ok(raw)
}
