//! Decides where a processed delivery goes.
use crate::error::CrawlError;
use serde::{Deserialize, Serialize};

const EXECUTION_MARKERS: &[&str] = &["Execution", "destroyed"];
const CANNOT_RECOVER_MARKERS: &[&str] = &["tente novamente", "recuperar"];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Route {
    Success,
    ExecutionDestroyed,
    CannotRecover,
    DeadLetter,
}

impl Route {
    pub fn as_str(&self) -> &'static str {
        match self {
            Route::Success => "success",
            Route::ExecutionDestroyed => "execution_destroyed",
            Route::CannotRecover => "cannot_recover",
            Route::DeadLetter => "dead_letter",
        }
    }
}

/// Destination queue for each route.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Channels {
    pub producer: String,
    #[serde(default = "default_execution_destroyed")]
    pub execution_destroyed: String,
    #[serde(default = "default_cannot_recover")]
    pub cannot_recover: String,
    #[serde(default = "default_dead_letter")]
    pub dead_letter: String,
}

fn default_execution_destroyed() -> String {
    "EXECUTION_DESTROYED".into()
}

fn default_cannot_recover() -> String {
    "NAO_POSSIVEL_RECUPERAR_NFC".into()
}

fn default_dead_letter() -> String {
    "DEAD_CONSULTAR_NFE_QRCODE".into()
}

impl Channels {
    pub fn with_producer(producer: impl Into<String>) -> Self {
        Self {
            producer: producer.into(),
            execution_destroyed: default_execution_destroyed(),
            cannot_recover: default_cannot_recover(),
            dead_letter: default_dead_letter(),
        }
    }

    pub fn queue_for(&self, route: Route) -> &str {
        match route {
            Route::Success => &self.producer,
            Route::ExecutionDestroyed => &self.execution_destroyed,
            Route::CannotRecover => &self.cannot_recover,
            Route::DeadLetter => &self.dead_letter,
        }
    }
}

/// Failure route for a crawl error. Typed failures route by variant; only
/// text the source or the renderer produced is matched against markers,
/// execution markers first.
pub fn classify(err: &CrawlError) -> Route {
    match err {
        CrawlError::ExecutionDestroyed(_) => Route::ExecutionDestroyed,
        CrawlError::SourceReported(banner) => classify_text(&[banner.as_str()]),
        CrawlError::Renderer(source) => classify_text(&[source.to_string().as_str()]),
        CrawlError::Navigation { .. } | CrawlError::NotReady(_) | CrawlError::Parse(_) => {
            Route::DeadLetter
        }
    }
}

/// Keyword routing over free text, such as a source banner or a broker error.
pub fn classify_text(texts: &[&str]) -> Route {
    let has = |markers: &[&str]| texts.iter().any(|t| markers.iter().any(|m| t.contains(m)));
    if has(EXECUTION_MARKERS) {
        Route::ExecutionDestroyed
    } else if has(CANNOT_RECOVER_MARKERS) {
        Route::CannotRecover
    } else {
        Route::DeadLetter
    }
}
