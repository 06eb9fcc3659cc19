//! Order poller - fetches the authoritative order record from the backend
//!
//! The backend answers in one of three envelope shapes:
//! - a bare order object
//! - `{ "status": ..., "result": <order> }`
//! - `{ "data": <order> }`
//!
//! All of them are normalized here into a single [`Order`]; anything else is a
//! `MalformedResponse`. The poller holds no polling state of its own.

use super::Order;
use crate::error::{CoordinatorError, CoordinatorResult};

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::debug;

/// Source of order snapshots
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OrderSource: Send + Sync {
    async fn fetch_order(&self, order_id: &str) -> CoordinatorResult<Order>;
}

/// Order source backed by the HTTP order endpoint
pub struct HttpOrderSource {
    client: reqwest::Client,
    base_url: String,
}

impl HttpOrderSource {
    pub fn new(base_url: &str, request_timeout: Duration) -> CoordinatorResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| CoordinatorError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn order_url(&self, order_id: &str) -> String {
        format!("{}/orders/{}", self.base_url, order_id)
    }
}

fn transport_error(err: reqwest::Error, order_id: &str) -> CoordinatorError {
    if err.is_timeout() {
        CoordinatorError::Timeout {
            operation: format!("order {}", order_id),
        }
    } else if err.is_decode() {
        CoordinatorError::MalformedResponse(err.to_string())
    } else {
        CoordinatorError::Http(err.to_string())
    }
}

#[async_trait]
impl OrderSource for HttpOrderSource {
    async fn fetch_order(&self, order_id: &str) -> CoordinatorResult<Order> {
        let url = self.order_url(order_id);
        debug!("Fetching order {} from {}", order_id, url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| transport_error(e, order_id))?;

        match response.status() {
            StatusCode::NOT_FOUND => {
                return Err(CoordinatorError::NotFound {
                    order_id: order_id.to_string(),
                })
            }
            status if !status.is_success() => {
                return Err(CoordinatorError::Http(format!(
                    "order endpoint returned {}",
                    status
                )))
            }
            _ => {}
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| transport_error(e, order_id))?;

        normalize_envelope(order_id, body)
    }
}

/// Normalize any accepted envelope into a validated order
pub fn normalize_envelope(order_id: &str, body: Value) -> CoordinatorResult<Order> {
    let Value::Object(mut map) = body else {
        return Err(CoordinatorError::MalformedResponse(
            "expected a JSON object".to_string(),
        ));
    };

    let payload = if map.contains_key("status") && map.contains_key("result") {
        unwrap_payload(order_id, map.remove("result"))?
    } else if map.contains_key("data") {
        unwrap_payload(order_id, map.remove("data"))?
    } else if is_bare_order(&map) {
        Value::Object(map)
    } else {
        let keys: Vec<_> = map.keys().cloned().collect();
        return Err(CoordinatorError::MalformedResponse(format!(
            "unrecognized envelope with keys {:?}",
            keys
        )));
    };

    let order: Order = serde_json::from_value(payload)
        .map_err(|e| CoordinatorError::MalformedResponse(e.to_string()))?;

    if order.order_id != order_id {
        return Err(CoordinatorError::MalformedResponse(format!(
            "requested order {} but received {}",
            order_id, order.order_id
        )));
    }

    order.validate()?;
    Ok(order)
}

fn unwrap_payload(order_id: &str, payload: Option<Value>) -> CoordinatorResult<Value> {
    match payload {
        None | Some(Value::Null) => Err(CoordinatorError::NotFound {
            order_id: order_id.to_string(),
        }),
        Some(value) => Ok(value),
    }
}

fn is_bare_order(map: &Map<String, Value>) -> bool {
    ["source_intent", "sourceIntent"]
        .iter()
        .any(|key| map.contains_key(*key))
}
