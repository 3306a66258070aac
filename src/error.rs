//! Failure taxonomy for the crawl pipeline.
use crate::schema::{ItemField, Region};
use std::time::Duration;
use thiserror::Error;

/// Renderer-level failures, surfaced by [`crate::renderer::Page`] implementations.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("timed out after {}ms while {action}", .waited.as_millis())]
    Timeout { action: String, waited: Duration },
    #[error("Execution context was destroyed: {0}")]
    ExecutionDestroyed(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("invalid selector {0}")]
    Selector(String),
}

/// A region's text did not match the layout the parser expects.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("region {} is empty", .0.as_str())]
    MissingRegion(Region),
    #[error("no tax id in identity block: {0:?}")]
    MissingTaxId(String),
    #[error("item count is not numeric: {0:?}")]
    InvalidItemCount(String),
    #[error("total amount is not numeric: {0:?}")]
    InvalidAmount(String),
    #[error("item {index} {}: label {:?} not found in {raw:?}", .field.as_str(), .field.label())]
    MissingLabel {
        field: ItemField,
        index: usize,
        raw: String,
    },
    #[error("item {index} {}: not a number {raw:?}", .field.as_str())]
    InvalidNumber {
        field: ItemField,
        index: usize,
        raw: String,
    },
    #[error("item {index} has no {}", .field.as_str())]
    MissingItemField { field: ItemField, index: usize },
    #[error("no DD/MM/YYYY date in emission info: {0:?}")]
    NoDateFound(String),
}

/// Anything that can stop a receipt from being assembled.
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("navigation to {url} failed: {source}")]
    Navigation {
        url: String,
        #[source]
        source: RenderError,
    },
    #[error("page never became ready: {0}")]
    NotReady(#[source] RenderError),
    #[error("{0}")]
    ExecutionDestroyed(String),
    #[error("{0}")]
    SourceReported(String),
    #[error("renderer error: {0}")]
    Renderer(#[source] RenderError),
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),
}

impl CrawlError {
    /// Stable tag carried in dead-letter payloads.
    pub fn category(&self) -> &'static str {
        match self {
            CrawlError::Navigation { .. } => "navigation",
            CrawlError::NotReady(_) => "not_ready",
            CrawlError::ExecutionDestroyed(_) => "execution_destroyed",
            CrawlError::SourceReported(_) => "source_reported",
            CrawlError::Renderer(_) => "renderer",
            CrawlError::Parse(_) => "parse",
        }
    }
}

/// The inbound payload could not be turned into a lookup request.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("malformed request: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("unexpected pattern {0:?}")]
    UnexpectedPattern(String),
}

impl RequestError {
    pub fn category(&self) -> &'static str {
        match self {
            RequestError::Malformed(_) => "malformed_request",
            RequestError::UnexpectedPattern(_) => "unexpected_pattern",
        }
    }
}

impl From<RenderError> for CrawlError {
    fn from(err: RenderError) -> Self {
        match err {
            RenderError::ExecutionDestroyed(_) => CrawlError::ExecutionDestroyed(err.to_string()),
            other => CrawlError::Renderer(other),
        }
    }
}
