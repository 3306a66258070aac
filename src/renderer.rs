//! Boundary to whatever renders the source page.
//!
//! The pipeline only needs to open an isolated page, navigate, wait for a
//! marker, and read element text. [`http::HttpRenderer`] is the bundled
//! implementation; tests plug in scripted pages.
use crate::error::RenderError;
use async_trait::async_trait;
use std::time::Duration;

pub mod http;

pub use http::HttpRenderer;

#[async_trait]
pub trait Renderer: Send + Sync {
    /// Open a page that belongs to a single request.
    async fn open_page(&self) -> Result<Box<dyn Page>, RenderError>;
}

#[async_trait]
pub trait Page: Send {
    async fn goto(&mut self, url: &str, timeout: Duration) -> Result<(), RenderError>;

    /// Wait until `selector` matches at least one element, or fail after `timeout`.
    async fn wait_for(&mut self, selector: &str, timeout: Duration) -> Result<(), RenderError>;

    /// Text of the first element matching `selector`.
    async fn text_of(&self, selector: &str) -> Result<Option<String>, RenderError>;

    /// Text of every element matching `selector`, in document order.
    async fn texts_of(&self, selector: &str) -> Result<Vec<String>, RenderError>;

    async fn close(self: Box<Self>) -> Result<(), RenderError>;
}
