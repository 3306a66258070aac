//! Inbound message boundary: decode, crawl, route, acknowledge.
use crate::broker::Broker;
use crate::crawler::ReceiptCrawler;
use crate::db::Delivery;
use crate::error::RequestError;
use crate::model::{
    FailureMessage, Receipt, ReceiptRequest, SuccessMessage, FAILURE_PATTERN, INBOUND_PATTERN,
    SUCCESS_PATTERN,
};
use crate::router::{classify, classify_text, Channels, Route};
use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};

/// Nest-style envelope some producers wrap requests in.
#[derive(Debug, Deserialize)]
struct Envelope {
    pattern: String,
    data: Value,
}

pub fn decode_request(body: &[u8]) -> Result<ReceiptRequest, RequestError> {
    let value: Value = serde_json::from_slice(body)?;
    if value.get("chave").is_none() {
        if let Ok(env) = serde_json::from_value::<Envelope>(value.clone()) {
            if env.pattern != INBOUND_PATTERN {
                return Err(RequestError::UnexpectedPattern(env.pattern));
            }
            return Ok(serde_json::from_value(env.data)?);
        }
    }
    Ok(serde_json::from_value(value)?)
}

/// Correlation fields recovered from whatever part of the body parses.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Correlation {
    pub user: Value,
    pub cpf: Value,
    pub chave: Value,
}

impl Correlation {
    pub fn salvage(body: &[u8]) -> Self {
        let Ok(mut value) = serde_json::from_slice::<Value>(body) else {
            return Self::default();
        };
        if value.get("chave").is_none() {
            if let Some(data) = value.get_mut("data") {
                value = data.take();
            }
        }
        let mut field = |name: &str| value.get_mut(name).map(Value::take).unwrap_or(Value::Null);
        Self {
            user: field("user"),
            cpf: field("cpf"),
            chave: field("chave"),
        }
    }

    fn from_request(req: &ReceiptRequest) -> Self {
        Self {
            user: req.user.clone(),
            cpf: req.cpf.clone(),
            chave: Value::String(req.chave.clone()),
        }
    }

    pub fn failure(self, category: &str, message: String) -> FailureMessage {
        FailureMessage {
            pattern: FAILURE_PATTERN.to_string(),
            user: self.user,
            cpf: self.cpf,
            chave: self.chave,
            error: category.to_string(),
            message,
        }
    }
}

#[derive(Clone)]
pub struct Consumer {
    broker: Arc<dyn Broker>,
    crawler: ReceiptCrawler,
    queue: String,
    channels: Channels,
}

impl Consumer {
    pub fn new(
        broker: Arc<dyn Broker>,
        crawler: ReceiptCrawler,
        queue: impl Into<String>,
        channels: Channels,
    ) -> Self {
        Self {
            broker,
            crawler,
            queue: queue.into(),
            channels,
        }
    }

    /// Handle at most one waiting message. Returns `None` when the queue was empty.
    #[instrument(skip_all)]
    pub async fn process_next(&self) -> Result<Option<Route>> {
        let Some(delivery) = self.broker.next_delivery(&self.queue).await? else {
            return Ok(None);
        };
        self.handle_delivery(&delivery).await.map(Some)
    }

    /// Route one delivery and acknowledge it. Every path publishes exactly one
    /// outbound message, then acks exactly once. If that message cannot be
    /// published the delivery is left unacked so it is delivered again.
    #[instrument(skip_all, fields(message_id = %delivery.message_id))]
    pub async fn handle_delivery(&self, delivery: &Delivery) -> Result<Route> {
        let route = match decode_request(&delivery.body) {
            Ok(req) => {
                info!(chave = %req.chave, "lookup request received");
                self.process_request(&req).await?
            }
            Err(err) => {
                warn!(?err, "undecodable request");
                let failure = Correlation::salvage(&delivery.body).failure(err.category(), err.to_string());
                self.publish_failure(Route::DeadLetter, &failure).await?;
                Route::DeadLetter
            }
        };

        self.broker
            .ack(delivery)
            .await
            .with_context(|| format!("failed to ack message {}", delivery.message_id))?;
        info!(route = route.as_str(), "message acknowledged");
        Ok(route)
    }

    async fn process_request(&self, req: &ReceiptRequest) -> Result<Route> {
        let err = match self.crawler.crawl(&req.chave).await {
            Ok(receipt) => match self.publish_success(req, &receipt).await {
                Ok(()) => return Ok(Route::Success),
                Err(err) => {
                    error!(?err, "failed to publish receipt");
                    let message = format!("{err:#}");
                    let route = classify_text(&["publish", message.as_str()]);
                    let failure = Correlation::from_request(req).failure("publish", message);
                    self.publish_failure(route, &failure).await?;
                    return Ok(route);
                }
            },
            Err(err) => err,
        };

        error!(%err, category = err.category(), "receipt lookup failed");
        let route = classify(&err);
        let failure = Correlation::from_request(req).failure(err.category(), err.to_string());
        self.publish_failure(route, &failure).await?;
        Ok(route)
    }

    async fn publish_success(&self, req: &ReceiptRequest, receipt: &Receipt) -> Result<()> {
        let msg = SuccessMessage {
            pattern: SUCCESS_PATTERN,
            user: &req.user,
            cpf: &req.cpf,
            receipt,
        };
        let body = serde_json::to_vec(&msg).context("failed to encode receipt message")?;
        self.broker
            .publish(self.channels.queue_for(Route::Success), &body)
            .await
    }

    async fn publish_failure(&self, route: Route, failure: &FailureMessage) -> Result<()> {
        let queue = self.channels.queue_for(route);
        let body = serde_json::to_vec(failure).context("failed to encode failure message")?;
        self.broker
            .publish(queue, &body)
            .await
            .with_context(|| format!("failed to publish failure message to {queue}"))?;
        info!(queue, route = route.as_str(), "failure routed");
        Ok(())
    }

    /// Consume forever, one message at a time.
    pub async fn run(&self, poll_interval: Duration) {
        loop {
            match self.process_next().await {
                Ok(Some(_)) => {}
                Ok(None) => tokio::time::sleep(poll_interval).await,
                Err(err) => {
                    error!(?err, "consumer error");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_flat_and_enveloped_requests() {
        let flat = decode_request(br#"{"chave":"ABC123","user":"u1","cpf":"123"}"#).unwrap();
        assert_eq!(flat.chave, "ABC123");
        assert_eq!(flat.user, json!("u1"));

        let wrapped = decode_request(
            br#"{"pattern":"consultar_nfe","data":{"chave":"ABC123","user":"u1","cpf":"123"}}"#,
        )
        .unwrap();
        assert_eq!(wrapped, flat);
    }

    #[test]
    fn rejects_other_patterns_and_garbage() {
        let err = decode_request(br#"{"pattern":"gerar_cupom","data":{"chave":"A"}}"#).unwrap_err();
        assert!(matches!(err, RequestError::UnexpectedPattern(p) if p == "gerar_cupom"));

        let err = decode_request(b"not json").unwrap_err();
        assert_eq!(err.category(), "malformed_request");
        let err = decode_request(br#"{"user":"u1"}"#).unwrap_err();
        assert_eq!(err.category(), "malformed_request");
    }

    #[test]
    fn salvages_what_it_can() {
        let c = Correlation::salvage(br#"{"user":"u1","cpf":123}"#);
        assert_eq!(c.user, json!("u1"));
        assert_eq!(c.cpf, json!(123));
        assert!(c.chave.is_null());

        let c = Correlation::salvage(br#"{"pattern":"x","data":{"chave":"K"}}"#);
        assert_eq!(c.chave, json!("K"));

        assert_eq!(Correlation::salvage(b"\xff"), Correlation::default());
    }
}
