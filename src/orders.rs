//! Order lookup against the order-management HTTP API

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Which endpoint to ask
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LookupDetail {
    /// `GET /orders/{id}/status`
    Status,
    /// `GET /orders/{id}/tracking`
    Tracking,
}

impl LookupDetail {
    fn path_segment(self) -> &'static str {
        match self {
            LookupDetail::Status => "status",
            LookupDetail::Tracking => "tracking",
        }
    }
}

/// Facts returned for an existing order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderStatus {
    pub order_id: String,
    /// Order status, or the shipment status for tracking lookups
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracking_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub carrier: Option<String>,
    pub detail: LookupDetail,
}

impl OrderStatus {
    /// Plain-sentence rendering used when no model reply is available
    pub fn summary(&self) -> String {
        let status = self.status.as_deref();
        match (self.detail, &self.tracking_number) {
            (LookupDetail::Status, _) => match status {
                Some(status) => format!("The status for order {} is: {status}.", self.order_id),
                None => format!(
                    "I found order {}, but its status is not available right now.",
                    self.order_id
                ),
            },
            (LookupDetail::Tracking, Some(number)) => format!(
                "Tracking for order {}: Number {}, Carrier: {}, Status: {}.",
                self.order_id,
                number,
                self.carrier.as_deref().unwrap_or("N/A"),
                status.unwrap_or("N/A")
            ),
            (LookupDetail::Tracking, None) => {
                let mut text = format!(
                    "Tracking information is not yet available for order {}.",
                    self.order_id
                );
                if let Some(status) = status {
                    text.push_str(&format!(" Current status: {status}."));
                }
                text
            }
        }
    }

    /// The value a reply about this order has to repeat verbatim: the
    /// status for status lookups, the tracking number for tracking lookups.
    /// Shipment statuses are free text and may be paraphrased.
    pub fn required_mention(&self) -> Option<&str> {
        match self.detail {
            LookupDetail::Status => self.status.as_deref(),
            LookupDetail::Tracking => self.tracking_number.as_deref(),
        }
    }
}

/// A completed lookup. `NotFound` is a valid answer, not a failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum OrderLookupOutcome {
    Found(OrderStatus),
    NotFound { order_id: String },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OrderLookupError {
    #[error("Order service timed out")]
    Timeout,
    #[error("Order service unavailable: {message}")]
    Unavailable { transient: bool, message: String },
}

impl OrderLookupError {
    pub fn unavailable(transient: bool, message: impl Into<String>) -> Self {
        Self::Unavailable {
            transient,
            message: message.into(),
        }
    }

    /// Worth one immediate retry
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable { transient: true, .. })
    }
}

#[async_trait]
pub trait OrderLookup: Send + Sync {
    async fn lookup(
        &self,
        order_id: &str,
        detail: LookupDetail,
    ) -> Result<OrderLookupOutcome, OrderLookupError>;
}

#[async_trait]
impl<T: OrderLookup + ?Sized> OrderLookup for Arc<T> {
    async fn lookup(
        &self,
        order_id: &str,
        detail: LookupDetail,
    ) -> Result<OrderLookupOutcome, OrderLookupError> {
        (**self).lookup(order_id, detail).await
    }
}

/// Client for the order-management API
pub struct HttpOrderLookup {
    client: Client,
    base_url: Url,
}

impl fmt::Debug for HttpOrderLookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpOrderLookup")
            .field("base_url", &self.base_url.as_str())
            .finish_non_exhaustive()
    }
}

impl HttpOrderLookup {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, String> {
        let base_url = Url::parse(base_url).map_err(|e| format!("Invalid order API URL: {e}"))?;
        if base_url.cannot_be_a_base() {
            return Err(format!("Order API URL cannot be a base: {base_url}"));
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| format!("Failed to create HTTP client: {e}"))?;
        Ok(Self { client, base_url })
    }

    fn endpoint(&self, order_id: &str, detail: LookupDetail) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .extend(["orders", order_id, detail.path_segment()]);
        }
        url
    }
}

#[async_trait]
impl OrderLookup for HttpOrderLookup {
    async fn lookup(
        &self,
        order_id: &str,
        detail: LookupDetail,
    ) -> Result<OrderLookupOutcome, OrderLookupError> {
        let url = self.endpoint(order_id, detail);
        tracing::debug!(%url, "Order lookup");

        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                OrderLookupError::Timeout
            } else {
                OrderLookupError::unavailable(true, format!("request failed: {e}"))
            }
        })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(OrderLookupOutcome::NotFound {
                order_id: order_id.to_string(),
            });
        }
        if !status.is_success() {
            let transient = status.is_server_error()
                || status == StatusCode::TOO_MANY_REQUESTS
                || status == StatusCode::REQUEST_TIMEOUT;
            return Err(OrderLookupError::unavailable(transient, format!("HTTP {status}")));
        }

        let body: OrderApiResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                OrderLookupError::Timeout
            } else {
                OrderLookupError::unavailable(false, format!("malformed response: {e}"))
            }
        })?;

        Ok(OrderLookupOutcome::Found(body.into_status(order_id, detail)))
    }
}

/// Union of the status and tracking payloads
#[derive(Debug, Deserialize)]
struct OrderApiResponse {
    order_id: Option<String>,
    status: Option<String>,
    tracking_number: Option<String>,
    carrier: Option<String>,
}

impl OrderApiResponse {
    fn into_status(self, requested_id: &str, detail: LookupDetail) -> OrderStatus {
        OrderStatus {
            order_id: self.order_id.unwrap_or_else(|| requested_id.to_string()),
            status: self.status,
            tracking_number: self.tracking_number,
            carrier: self.carrier,
            detail,
        }
    }
}
