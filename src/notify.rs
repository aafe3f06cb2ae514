//! Outbound notifications (purchase receipts, refund status mail).
//!
//! Delivery is fire-and-forget: `dispatch` never blocks and never fails the
//! caller. When `NOTIFICATION_WEBHOOK_URL` is set, each notification is POSTed
//! there as JSON for the mail service to render and send.

use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Serialize;
use strum::AsRefStr;

/// Retry delays in milliseconds. Total worst case: 300ms plus request timeouts.
const NOTIFY_RETRY_DELAYS: &[u64] = &[100, 200];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum NotificationKind {
    /// To the buyer
    PurchaseReceipt,
    /// To the developer
    RefundRequested,
    /// To the buyer
    RefundApproved,
    /// To the buyer, with the rejection reason
    RefundDeclined,
    /// To the developer
    RefundFailed,
    /// To the developer
    Chargeback,
}

#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub kind: NotificationKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipient: Option<String>,
    pub contribution_uuid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    pub product_id: String,
    pub product_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<Decimal>,
    pub currency: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Who caused the event, when it was not the processor
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
    pub timestamp: i64,
    /// Unique per dispatch so the receiver can drop our retries
    pub idempotency_key: String,
}

pub trait Notifier: Send + Sync {
    /// Queue a notification. Must return promptly; delivery errors are logged.
    fn dispatch(&self, notification: Notification);
}

/// POSTs notifications to a webhook from a background task.
#[derive(Clone)]
pub struct WebhookNotifier {
    client: Client,
    url: Option<String>,
}

impl WebhookNotifier {
    pub fn new(client: Client, url: Option<String>) -> Self {
        Self { client, url }
    }
}

impl Notifier for WebhookNotifier {
    fn dispatch(&self, notification: Notification) {
        let Some(url) = self.url.clone() else {
            tracing::debug!(
                "No notification webhook configured, dropping {} for {}",
                notification.kind.as_ref(),
                notification.contribution_uuid
            );
            return;
        };

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(
                "No async runtime to deliver {} for {}, dropping it",
                notification.kind.as_ref(),
                notification.contribution_uuid
            );
            return;
        };

        let client = self.client.clone();
        let kind = notification.kind;
        runtime.spawn(
            AssertUnwindSafe(async move {
                send_notification(&client, &url, &notification).await;
            })
            .catch_unwind()
            .map(move |result| {
                if let Err(panic) = result {
                    let panic_msg = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    tracing::error!(
                        "Notification task panicked for '{}': {}",
                        kind.as_ref(),
                        panic_msg
                    );
                }
            }),
        );
    }
}

async fn send_notification(client: &Client, url: &str, notification: &Notification) {
    for (attempt, delay_ms) in std::iter::once(&0u64)
        .chain(NOTIFY_RETRY_DELAYS.iter())
        .enumerate()
    {
        if attempt > 0 {
            tokio::time::sleep(Duration::from_millis(*delay_ms)).await;
        }

        match client
            .post(url)
            .json(notification)
            .timeout(Duration::from_secs(5))
            .send()
            .await
        {
            Ok(resp) if resp.status().is_success() => {
                if attempt > 0 {
                    tracing::debug!("Notification webhook succeeded after {} retries", attempt);
                }
                return;
            }
            Ok(resp) => {
                tracing::debug!("Notification webhook returned {}", resp.status());
            }
            Err(e) => {
                tracing::debug!("Notification webhook failed: {}", e);
            }
        }
    }

    tracing::warn!(
        "Failed to deliver {} notification for {} after {} attempts",
        notification.kind.as_ref(),
        notification.contribution_uuid,
        NOTIFY_RETRY_DELAYS.len() + 1
    );
}
