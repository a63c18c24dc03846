//! Owner notification after a successful provision.
//!
//! The message carries the root password in plaintext, as the owner has no
//! other way to learn it. Delivery failures never fail a provision.

use crate::record::VpsRecord;
use async_trait::async_trait;
use reqwest::{header, Client};
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

/// Errors from a notification channel.
#[derive(Debug, Error)]
pub enum NotifyError {
    /// Channel accepted the request but refused it
    #[error("failed to send notification: {0}")]
    SendFailed(String),
    /// Transport-level failure
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
}

/// Delivers the access details of a new VPS to its owner.
#[async_trait]
pub trait OwnerNotifier: Send + Sync {
    /// Tell `record.owner_id` how to reach the VPS.
    async fn notify_provisioned(&self, record: &VpsRecord) -> Result<(), NotifyError>;
}

/// Human-readable access message.
pub fn access_message(record: &VpsRecord) -> String {
    format!(
        "Your VPS '{}' is ready.\nIP: {}\nUser: root\nPassword: {}\nSSH: ssh root@{}\nOS: {} {}\nResources: {} GB RAM, {} CPU, {} GB disk",
        record.id,
        record.ip_address,
        record.root_password,
        record.ip_address,
        record.os_type,
        record.os_release,
        record.ram_gb,
        record.cpu_cores,
        record.disk_gb,
    )
}

/// Records the hand-off in the service log without the password.
///
/// Used when no delivery channel is configured.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl OwnerNotifier for LogNotifier {
    async fn notify_provisioned(&self, record: &VpsRecord) -> Result<(), NotifyError> {
        tracing::info!(
            owner_id = record.owner_id,
            vps_id = %record.id,
            ip = %record.ip_address,
            "No notification channel configured, owner must fetch access details via describe"
        );
        Ok(())
    }
}

/// POSTs the access details as JSON to a webhook.
pub struct WebhookNotifier {
    client: Client,
    url: String,
}

impl WebhookNotifier {
    /// Create a notifier posting to `url`, each request bounded by `timeout`.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, NotifyError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl OwnerNotifier for WebhookNotifier {
    async fn notify_provisioned(&self, record: &VpsRecord) -> Result<(), NotifyError> {
        let body = json!({
            "event": "vps_provisioned",
            "owner_id": record.owner_id,
            "vps_id": record.id,
            "ip": record.ip_address.to_string(),
            "username": "root",
            "password": record.root_password,
            "ssh": format!("ssh root@{}", record.ip_address),
            "os": record.os_type,
            "os_release": record.os_release,
            "ram_gb": record.ram_gb,
            "cpu_cores": record.cpu_cores,
            "disk_gb": record.disk_gb,
            "message": access_message(record),
        });

        let response = self
            .client
            .post(&self.url)
            .header(header::CONTENT_TYPE, "application/json")
            .json(&body)
            .send()
            .await?;
        let status = response.status();

        if !status.is_success() {
            let error_body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(NotifyError::SendFailed(format!(
                "webhook returned {status}: {error_body}"
            )));
        }

        tracing::info!(owner_id = record.owner_id, vps_id = %record.id, "Owner notified via webhook");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn record() -> VpsRecord {
        VpsRecord {
            id: "web1".into(),
            owner_id: 42,
            ip_address: Ipv4Addr::new(10, 0, 0, 100),
            root_password: "hunter2".into(),
            os_type: "ubuntu".into(),
            os_release: "22.04".into(),
            ram_gb: 2,
            cpu_cores: 1,
            disk_gb: 20,
            created_at: None,
        }
    }

    #[test]
    fn test_access_message_contents() {
        let msg = access_message(&record());
        assert!(msg.contains("'web1'"));
        assert!(msg.contains("ssh root@10.0.0.100"));
        assert!(msg.contains("Password: hunter2"));
        assert!(msg.contains("2 GB RAM, 1 CPU, 20 GB disk"));
    }

    #[tokio::test]
    async fn test_log_notifier_succeeds() {
        assert!(LogNotifier.notify_provisioned(&record()).await.is_ok());
    }

    #[tokio::test]
    async fn test_webhook_unreachable_is_an_error() {
        // Port 9 on loopback is not expected to accept HTTP
        let notifier =
            WebhookNotifier::new("http://127.0.0.1:9/hook", Duration::from_secs(2)).unwrap();
        assert!(notifier.notify_provisioned(&record()).await.is_err());
    }
}
