//! Delivery of "tickets available" alerts.
//!
//! Supports a Discord webhook and a log-only fallback used when no webhook
//! is configured.

use async_trait::async_trait;
use calendar_types::{DayRecord, SaleStatus};
use chrono::{NaiveDate, Utc};
use std::time::Duration;

use crate::error::NotifyError;

const EMBED_COLOR: u32 = 0x03b2f8;
const TITLE_LIMIT: usize = 256;
const DESCRIPTION_LIMIT: usize = 4096;

/// One newly available date
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub date: NaiveDate,
    pub sale_status: SaleStatus,
    pub holiday: Option<String>,
    pub day_label: Option<String>,
}

impl From<&DayRecord> for Alert {
    fn from(record: &DayRecord) -> Self {
        Self {
            date: record.date,
            sale_status: record.sale_status,
            holiday: record.holiday.clone(),
            day_label: record.day_label.clone(),
        }
    }
}

impl Alert {
    pub fn status_label(&self) -> &str {
        match self.sale_status {
            SaleStatus::Available => "Available",
            _ => self.sale_status.as_str(),
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, alert: &Alert) -> Result<(), NotifyError>;
}

/// Writes alerts to the log only
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, alert: &Alert) -> Result<(), NotifyError> {
        tracing::info!(
            "Tickets available for {} ({})",
            alert.date,
            alert.status_label()
        );
        Ok(())
    }
}

/// Posts an embed to a Discord webhook
pub struct DiscordNotifier {
    client: reqwest::Client,
    webhook_url: String,
    site_url: String,
}

impl DiscordNotifier {
    pub fn new(client: reqwest::Client, webhook_url: &str, site_url: &str) -> Self {
        Self {
            client,
            webhook_url: webhook_url.to_string(),
            site_url: site_url.trim_end_matches('/').to_string(),
        }
    }

    fn payload(&self, alert: &Alert) -> serde_json::Value {
        let calendar_url = format!("{}/en/calendar", self.site_url);
        let logo_url = format!("{}/images/logo.svg", self.site_url);
        let date = alert.date.format("%Y-%m-%d").to_string();

        let title: String = "Nintendo Museum Tickets Available!"
            .chars()
            .take(TITLE_LIMIT)
            .collect();
        let mut description = format!("Tickets are available for: **{}**", date);
        if let Some(note) = alert.holiday.as_ref().or(alert.day_label.as_ref()) {
            description.push_str(&format!(" ({})", note));
        }
        let description: String = description.chars().take(DESCRIPTION_LIMIT).collect();

        serde_json::json!({
            "embeds": [{
                "title": title,
                "description": description,
                "url": calendar_url,
                "color": EMBED_COLOR,
                "thumbnail": { "url": logo_url },
                "fields": [
                    { "name": "Date", "value": date, "inline": true },
                    { "name": "Status", "value": alert.status_label(), "inline": true },
                    { "name": "Link", "value": format!("[Book now]({})", calendar_url), "inline": false }
                ],
                "footer": { "text": "Nintendo Museum Monitor", "icon_url": logo_url },
                "timestamp": Utc::now().to_rfc3339()
            }]
        })
    }
}

#[async_trait]
impl Notifier for DiscordNotifier {
    async fn notify(&self, alert: &Alert) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(&self.webhook_url)
            .json(&self.payload(alert))
            .timeout(Duration::from_secs(10))
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(NotifyError::Status { status, body })
        }
    }
}
