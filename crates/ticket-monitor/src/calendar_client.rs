use async_trait::async_trait;
use calendar_types::{CalendarSnapshot, YearMonth};
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;

use crate::error::FetchError;
use crate::identity::{Identity, IdentityPool};

pub const DEFAULT_BASE_URL: &str = "https://museum-tickets.nintendo.com";

const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/141.0.0.0 Safari/537.36";

/// Anything that can produce a calendar snapshot for a month
#[async_trait]
pub trait CalendarSource: Send + Sync {
    async fn fetch(&self, target: YearMonth) -> Result<CalendarSnapshot, FetchError>;
}

/// Client for the ticketing calendar API.
///
/// Every attempt draws a fresh identity from the pool and builds a client
/// bound to it, so a retry never reuses the egress that just failed.
pub struct CalendarClient {
    base_url: String,
    pool: Arc<IdentityPool>,
    timeout: Duration,
    attempts: u32,
}

impl CalendarClient {
    pub fn new(base_url: &str, pool: Arc<IdentityPool>, timeout: Duration, attempts: u32) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            pool,
            timeout,
            attempts: attempts.max(1),
        }
    }

    pub fn calendar_page_url(&self) -> String {
        format!("{}/en/calendar", self.base_url)
    }

    fn browser_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::USER_AGENT, HeaderValue::from_static(USER_AGENT));
        headers.insert(
            header::ACCEPT,
            HeaderValue::from_static("application/json, text/plain, */*"),
        );
        headers.insert(
            header::ACCEPT_LANGUAGE,
            HeaderValue::from_static("de-DE,de;q=0.9,en-US;q=0.8,en;q=0.7"),
        );
        headers.insert("X-Requested-With", HeaderValue::from_static("XMLHttpRequest"));
        headers.insert(
            "sec-ch-ua",
            HeaderValue::from_static(
                "\"Google Chrome\";v=\"141\", \"Not?A_Brand\";v=\"8\", \"Chromium\";v=\"141\"",
            ),
        );
        headers.insert("sec-ch-ua-mobile", HeaderValue::from_static("?0"));
        headers.insert("sec-ch-ua-platform", HeaderValue::from_static("\"macOS\""));
        headers.insert("Sec-Fetch-Site", HeaderValue::from_static("same-origin"));
        headers.insert("Sec-Fetch-Mode", HeaderValue::from_static("cors"));
        headers.insert("Sec-Fetch-Dest", HeaderValue::from_static("empty"));
        if let Ok(referer) = HeaderValue::from_str(&self.calendar_page_url()) {
            headers.insert(header::REFERER, referer);
        }
        headers
    }

    fn build_client(&self, identity: &Identity) -> reqwest::Result<Client> {
        let builder = Client::builder()
            .default_headers(self.browser_headers())
            .timeout(self.timeout)
            .connect_timeout(Duration::from_secs(10));

        let builder = match identity {
            // Direct means direct: ignore HTTP(S)_PROXY from the environment
            Identity::Direct => builder.no_proxy(),
            Identity::Proxy(endpoint) => builder.proxy(endpoint.to_proxy()?),
        };

        builder.build()
    }

    async fn fetch_once(
        &self,
        identity: &Identity,
        target: YearMonth,
    ) -> Result<CalendarSnapshot, FetchError> {
        let client = self.build_client(identity)?;

        let response = client
            .get(format!("{}/en/api/calendar", self.base_url))
            .query(&[
                ("target_year", target.year().to_string()),
                ("target_month", target.month().to_string()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::Status {
                status,
                body: body.chars().take(200).collect(),
            });
        }

        let body = response.bytes().await?;
        Ok(CalendarSnapshot::from_json(target, &body)?)
    }
}

#[async_trait]
impl CalendarSource for CalendarClient {
    async fn fetch(&self, target: YearMonth) -> Result<CalendarSnapshot, FetchError> {
        let mut attempt = 1;
        loop {
            let identity = self.pool.next();
            tracing::debug!(
                "Fetching calendar for {} via {} (attempt {}/{})",
                target,
                identity,
                attempt,
                self.attempts
            );

            match self.fetch_once(&identity, target).await {
                Ok(snapshot) => {
                    tracing::info!(
                        "Successfully fetched calendar for {} ({} days)",
                        snapshot.target(),
                        snapshot.len()
                    );
                    return Ok(snapshot);
                }
                Err(e) if attempt < self.attempts => {
                    tracing::warn!("Calendar fetch via {} failed: {}; retrying", identity, e);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
