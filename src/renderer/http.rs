use super::{Page, Renderer};
use crate::error::RenderError;
use crate::schema::{ERROR_BANNER, READY_MARKER, REGIONS};
use async_trait::async_trait;
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

const DEFAULT_POLL: Duration = Duration::from_millis(500);

/// Renders pages by fetching the served HTML and evaluating CSS selectors on it.
///
/// The consultation page is server-rendered, so no script execution is needed
/// to reach the receipt markup. Readiness is polled by re-fetching.
///
/// Each load parses the document once and reads every watched selector from
/// that parse. Other selectors are still answered, at the cost of a fresh parse.
#[derive(Clone)]
pub struct HttpRenderer {
    http: Client,
    poll_interval: Duration,
    watched: Arc<[String]>,
}

impl fmt::Debug for HttpRenderer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpRenderer")
            .field("poll_interval", &self.poll_interval)
            .field("watched", &self.watched.len())
            .finish_non_exhaustive()
    }
}

/// Ready marker, error banner and every schema region.
fn page_selectors() -> Arc<[String]> {
    [READY_MARKER, ERROR_BANNER]
        .into_iter()
        .chain(REGIONS.iter().map(|rule| rule.selector))
        .map(String::from)
        .collect()
}

impl HttpRenderer {
    pub fn new(user_agent: &str) -> Result<Self, RenderError> {
        let http = Client::builder()
            .user_agent(user_agent)
            .no_proxy()
            .build()
            .map_err(|e| RenderError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            poll_interval: DEFAULT_POLL,
            watched: page_selectors(),
        })
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

#[async_trait]
impl Renderer for HttpRenderer {
    async fn open_page(&self) -> Result<Box<dyn Page>, RenderError> {
        Ok(Box::new(HttpPage {
            http: self.http.clone(),
            poll_interval: self.poll_interval,
            watched: self.watched.clone(),
            url: None,
            html: None,
            snapshot: HashMap::new(),
        }))
    }
}

pub struct HttpPage {
    http: Client,
    poll_interval: Duration,
    watched: Arc<[String]>,
    url: Option<String>,
    html: Option<String>,
    /// Texts of the watched selectors for the current document.
    snapshot: HashMap<String, Vec<String>>,
}

impl HttpPage {
    async fn load(&mut self, url: &str, timeout: Duration) -> Result<(), RenderError> {
        let html = tokio::time::timeout(timeout, fetch(&self.http, url))
            .await
            .map_err(|_| RenderError::Timeout {
                action: format!("loading {url}"),
                waited: timeout,
            })??;
        self.snapshot = snapshot(&html, &self.watched)?;
        debug!(url, bytes = html.len(), "page loaded");
        self.url = Some(url.to_string());
        self.html = Some(html);
        Ok(())
    }

    fn texts(&self, selector: &str) -> Result<Vec<String>, RenderError> {
        let html = self
            .html
            .as_deref()
            .ok_or_else(|| RenderError::ExecutionDestroyed("no document loaded".into()))?;
        match self.snapshot.get(selector) {
            Some(texts) => Ok(texts.clone()),
            None => select_texts(html, selector),
        }
    }
}

#[async_trait]
impl Page for HttpPage {
    async fn goto(&mut self, url: &str, timeout: Duration) -> Result<(), RenderError> {
        self.load(url, timeout).await
    }

    async fn wait_for(&mut self, selector: &str, timeout: Duration) -> Result<(), RenderError> {
        let url = self
            .url
            .clone()
            .ok_or_else(|| RenderError::ExecutionDestroyed("no document loaded".into()))?;
        let deadline = Instant::now() + timeout;
        loop {
            if !self.texts(selector)?.is_empty() {
                return Ok(());
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(RenderError::Timeout {
                    action: format!("waiting for {selector}"),
                    waited: timeout,
                });
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                continue;
            }
            self.load(&url, remaining).await?;
        }
    }

    async fn text_of(&self, selector: &str) -> Result<Option<String>, RenderError> {
        Ok(self.texts(selector)?.into_iter().next())
    }

    async fn texts_of(&self, selector: &str) -> Result<Vec<String>, RenderError> {
        self.texts(selector)
    }

    async fn close(self: Box<Self>) -> Result<(), RenderError> {
        Ok(())
    }
}

async fn fetch(http: &Client, url: &str) -> Result<String, RenderError> {
    let res = http
        .get(url)
        .send()
        .await
        .map_err(|e| RenderError::Transport(e.to_string()))?;
    let status = res.status();
    if !status.is_success() {
        return Err(RenderError::Transport(format!("{status} from {url}")));
    }
    res.text()
        .await
        .map_err(|e| RenderError::Transport(e.to_string()))
}

fn parse_selector(selector: &str) -> Result<Selector, RenderError> {
    Selector::parse(selector).map_err(|e| RenderError::Selector(format!("{selector}: {e:?}")))
}

/// Parse `html` once and collect the texts of every selector in `selectors`.
fn snapshot(html: &str, selectors: &[String]) -> Result<HashMap<String, Vec<String>>, RenderError> {
    let doc = Html::parse_document(html);
    selectors
        .iter()
        .map(|selector| -> Result<(String, Vec<String>), RenderError> {
            let sel = parse_selector(selector)?;
            Ok((selector.clone(), doc.select(&sel).map(element_text).collect()))
        })
        .collect()
}

fn select_texts(html: &str, selector: &str) -> Result<Vec<String>, RenderError> {
    let sel = parse_selector(selector)?;
    let doc = Html::parse_document(html);
    let texts = doc.select(&sel).map(element_text).collect();
    Ok(texts)
}

/// Text nodes of an element, trimmed and joined by newlines, which is how the
/// page reads when its inline blocks are laid out.
fn element_text(el: ElementRef<'_>) -> String {
    el.text()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
