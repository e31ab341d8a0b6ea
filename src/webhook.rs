//! # Webhook Delivery
//!
//! Posts the vendor and business payloads for a processed call.
//!
//! ## Delivery Rules:
//! - Each payload is attempted up to `max_attempts` times
//! - Between attempts the dispatcher sleeps `attempt * base_delay_ms` (linear backoff)
//! - Non-2xx responses count as failures and are retried
//! - An empty URL skips that webhook entirely
//! - The two deliveries run concurrently; one failing never affects the other
//! - Outcomes are logged and counted, never returned as errors to the caller

use crate::config::WebhookConfig;
use crate::outcome::payload::{BusinessPayload, VendorPayload};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("endpoint answered with status {0}")]
    Status(u16),
}

/// Result of delivering one payload.
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryOutcome {
    Skipped,
    Delivered { attempts: u32 },
    Failed { attempts: u32, error: String },
}

/// Succeeded/failed/skipped counts for one dispatch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliverySummary {
    pub succeeded: u32,
    pub failed: u32,
    pub skipped: u32,
}

impl DeliverySummary {
    fn count(&mut self, outcome: &DeliveryOutcome) {
        match outcome {
            DeliveryOutcome::Skipped => self.skipped += 1,
            DeliveryOutcome::Delivered { .. } => self.succeeded += 1,
            DeliveryOutcome::Failed { .. } => self.failed += 1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WebhookDispatcher {
    client: reqwest::Client,
    config: WebhookConfig,
}

impl WebhookDispatcher {
    pub fn new(config: WebhookConfig) -> Result<Self, DeliveryError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &WebhookConfig {
        &self.config
    }

    async fn post_once<T: Serialize + ?Sized>(&self, url: &str, payload: &T) -> Result<(), DeliveryError> {
        let response = self.client.post(url).json(payload).send().await?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(DeliveryError::Status(status.as_u16()))
        }
    }

    /// Deliver one payload with bounded retry and linear backoff.
    pub async fn deliver<T: Serialize + ?Sized>(
        &self,
        label: &str,
        url: &str,
        payload: &T,
    ) -> DeliveryOutcome {
        if url.trim().is_empty() {
            debug!(webhook = label, "Webhook URL not configured, skipping");
            return DeliveryOutcome::Skipped;
        }

        let max_attempts = self.config.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            match self.post_once(url, payload).await {
                Ok(()) => {
                    debug!(webhook = label, attempt, "Webhook delivered");
                    return DeliveryOutcome::Delivered { attempts: attempt };
                }
                Err(e) => {
                    warn!(webhook = label, attempt, max_attempts, error = %e, "Webhook attempt failed");
                    last_error = e.to_string();
                }
            }

            if attempt < max_attempts {
                let delay = Duration::from_millis(self.config.base_delay_ms * attempt as u64);
                tokio::time::sleep(delay).await;
            }
        }

        DeliveryOutcome::Failed {
            attempts: max_attempts,
            error: last_error,
        }
    }

    /// Deliver both payloads concurrently and independently.
    pub async fn dispatch(&self, vendor: &VendorPayload, business: &BusinessPayload) -> DeliverySummary {
        let (vendor_outcome, business_outcome) = tokio::join!(
            self.deliver("vendor", &self.config.vendor_url, vendor),
            self.deliver("business", &self.config.business_url, business),
        );

        let mut summary = DeliverySummary::default();
        summary.count(&vendor_outcome);
        summary.count(&business_outcome);

        info!(
            call_id = %vendor.call_id,
            succeeded = summary.succeeded,
            failed = summary.failed,
            skipped = summary.skipped,
            "Webhook dispatch finished"
        );
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AnalysisConfig;
    use crate::outcome::payload::{build_business_payload, build_vendor_payload};
    use crate::records::model::{CallAnalytics, CallMetadata, CallRecord, CallStatus, LeadFields};
    use actix_web::{web, App, HttpResponse, HttpServer};
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn record() -> CallRecord {
        let now = Utc::now();
        CallRecord {
            call_id: "hook-1".to_string(),
            started_at: now,
            ended_at: now,
            duration_seconds: 0,
            metadata: CallMetadata::default(),
            status: CallStatus::Partial,
            fields: LeadFields::default(),
            analytics: CallAnalytics::default(),
            transcript_file: "t.json".to_string(),
            extraction_result_file: None,
            updated_at: now,
        }
    }

    /// Local endpoint counting hits; answers with `status`.
    async fn start_endpoint(status: u16) -> (String, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let server = HttpServer::new(move || {
            let counter = counter.clone();
            App::new().route(
                "/hook",
                web::post().to(move |_body: web::Json<serde_json::Value>| {
                    let counter = counter.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        HttpResponse::build(
                            actix_web::http::StatusCode::from_u16(status).unwrap(),
                        )
                        .finish()
                    }
                }),
            )
        })
        .workers(1)
        .bind(("127.0.0.1", 0))
        .unwrap();
        let addr = server.addrs()[0];
        actix_web::rt::spawn(server.run());
        (format!("http://{}/hook", addr), hits)
    }

    fn config(vendor_url: String, business_url: String) -> WebhookConfig {
        WebhookConfig {
            vendor_url,
            business_url,
            max_attempts: 3,
            base_delay_ms: 10,
            request_timeout_secs: 5,
            ..Default::default()
        }
    }

    #[actix_web::test]
    async fn test_business_failure_does_not_affect_vendor() {
        let (vendor_url, hits) = start_endpoint(200).await;
        // Nothing listens on port 1
        let dispatcher =
            WebhookDispatcher::new(config(vendor_url, "http://127.0.0.1:1/hook".to_string())).unwrap();

        let record = record();
        let vendor = build_vendor_payload(&record, true, Utc::now());
        let business =
            build_business_payload(&record, &[], dispatcher.config(), &AnalysisConfig::default());

        let summary = dispatcher.dispatch(&vendor, &business).await;
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[actix_web::test]
    async fn test_non_2xx_is_retried_until_exhausted() {
        let (url, hits) = start_endpoint(503).await;
        let dispatcher = WebhookDispatcher::new(config(url.clone(), String::new())).unwrap();

        let outcome = dispatcher.deliver("vendor", &url, &serde_json::json!({"a": 1})).await;
        assert!(matches!(outcome, DeliveryOutcome::Failed { attempts: 3, .. }));
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[actix_web::test]
    async fn test_empty_url_is_skipped() {
        let dispatcher = WebhookDispatcher::new(config(String::new(), String::new())).unwrap();
        let record = record();
        let vendor = build_vendor_payload(&record, true, Utc::now());
        let business =
            build_business_payload(&record, &[], dispatcher.config(), &AnalysisConfig::default());
        let summary = dispatcher.dispatch(&vendor, &business).await;
        assert_eq!(
            summary,
            DeliverySummary {
                succeeded: 0,
                failed: 0,
                skipped: 2
            }
        );
    }
}
