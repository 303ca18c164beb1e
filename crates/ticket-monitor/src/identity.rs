//! Egress identities for calendar requests.
//!
//! A pool holds the loaded proxy endpoints and hands out one identity per
//! fetch attempt. With nothing loaded every attempt goes out directly.

use rand::Rng;
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::error::IdentityError;

pub const WEBSHARE_LIST_URL: &str =
    "https://proxy.webshare.io/api/v2/proxy/list/?mode=direct&page=1&page_size=100";

/// Listing calls tried before the pool degrades to direct
const WEBSHARE_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyEndpoint {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl ProxyEndpoint {
    /// Parse `ip:port` or `ip:port:username:password`
    pub fn parse_line(line: &str) -> Option<Self> {
        let parts: Vec<&str> = line.trim().split(':').collect();
        let (host, port, username, password) = match parts.as_slice() {
            [host, port] => (*host, *port, None, None),
            [host, port, user, pass] => (*host, *port, Some(*user), Some(*pass)),
            _ => return None,
        };

        if host.is_empty() {
            return None;
        }

        Some(Self {
            host: host.to_string(),
            port: port.parse().ok()?,
            username: username.map(str::to_string),
            password: password.map(str::to_string),
        })
    }

    pub fn url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    /// Route all request traffic through this endpoint
    pub fn to_proxy(&self) -> reqwest::Result<reqwest::Proxy> {
        let proxy = reqwest::Proxy::all(self.url())?;
        Ok(match (&self.username, &self.password) {
            (Some(user), Some(pass)) => proxy.basic_auth(user, pass),
            _ => proxy,
        })
    }
}

// Credentials stay out of logs
impl fmt::Display for ProxyEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Network egress used for one fetch attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    Direct,
    Proxy(ProxyEndpoint),
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identity::Direct => f.write_str("direct"),
            Identity::Proxy(endpoint) => write!(f, "proxy {}", endpoint),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum Rotation {
    #[default]
    Random,
    RoundRobin,
}

/// Where proxies are loaded from at startup
#[derive(Debug, Clone)]
pub enum ProxySource {
    File(PathBuf),
    Webshare {
        url: String,
        api_key: String,
        retry_delay: Duration,
    },
}

pub struct IdentityPool {
    proxies: Vec<ProxyEndpoint>,
    rotation: Rotation,
    cursor: AtomicUsize,
}

impl IdentityPool {
    pub fn new(proxies: Vec<ProxyEndpoint>, rotation: Rotation) -> Self {
        Self {
            proxies,
            rotation,
            cursor: AtomicUsize::new(0),
        }
    }

    /// A pool that always connects directly
    pub fn direct() -> Self {
        Self::new(Vec::new(), Rotation::default())
    }

    /// Load from `source`, degrading to a direct pool on any failure
    pub async fn load(source: &ProxySource, rotation: Rotation, client: &reqwest::Client) -> Self {
        let loaded = match source {
            ProxySource::File(path) => read_proxy_file(path),
            ProxySource::Webshare {
                url,
                api_key,
                retry_delay,
            } => fetch_webshare_with_retry(client, url, api_key, *retry_delay).await,
        };

        match loaded.and_then(|proxies| {
            if proxies.is_empty() {
                Err(IdentityError::Empty)
            } else {
                Ok(proxies)
            }
        }) {
            Ok(proxies) => {
                tracing::info!("Loaded {} proxies ({:?} rotation)", proxies.len(), rotation);
                Self::new(proxies, rotation)
            }
            Err(e) => {
                tracing::warn!("{}; using direct connection", e);
                Self::direct()
            }
        }
    }

    pub fn len(&self) -> usize {
        self.proxies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }

    /// Identity for the next fetch attempt
    pub fn next(&self) -> Identity {
        if self.proxies.is_empty() {
            return Identity::Direct;
        }

        let index = match self.rotation {
            Rotation::Random => rand::thread_rng().gen_range(0..self.proxies.len()),
            Rotation::RoundRobin => self.cursor.fetch_add(1, Ordering::Relaxed) % self.proxies.len(),
        };

        Identity::Proxy(self.proxies[index].clone())
    }
}

/// Parse a proxy list file body, skipping blanks, `#` comments and malformed lines
pub fn parse_proxy_list(contents: &str) -> Vec<ProxyEndpoint> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let endpoint = ProxyEndpoint::parse_line(line);
            if endpoint.is_none() {
                tracing::warn!("Skipping malformed proxy line");
            }
            endpoint
        })
        .collect()
}

pub fn read_proxy_file(path: &Path) -> Result<Vec<ProxyEndpoint>, IdentityError> {
    let contents = std::fs::read_to_string(path).map_err(|source| IdentityError::File {
        path: path.display().to_string(),
        source,
    })?;
    Ok(parse_proxy_list(&contents))
}

#[derive(Debug, Deserialize)]
struct WebshareListing {
    #[serde(default)]
    results: Vec<WebshareProxy>,
}

#[derive(Debug, Deserialize)]
struct WebshareProxy {
    proxy_address: Option<String>,
    port: u16,
    username: Option<String>,
    password: Option<String>,
}

/// One call to the Webshare proxy listing endpoint
pub async fn fetch_webshare(
    client: &reqwest::Client,
    url: &str,
    api_key: &str,
) -> Result<Vec<ProxyEndpoint>, IdentityError> {
    let response = client
        .get(url)
        .header(reqwest::header::AUTHORIZATION, format!("Token {}", api_key))
        .timeout(Duration::from_secs(5))
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        return Err(IdentityError::ListingStatus(status));
    }

    let listing: WebshareListing = response.json().await?;
    let proxies = listing
        .results
        .into_iter()
        .filter_map(|p| {
            Some(ProxyEndpoint {
                host: p.proxy_address?,
                port: p.port,
                username: p.username,
                password: p.password,
            })
        })
        .collect();

    Ok(proxies)
}

async fn fetch_webshare_with_retry(
    client: &reqwest::Client,
    url: &str,
    api_key: &str,
    retry_delay: Duration,
) -> Result<Vec<ProxyEndpoint>, IdentityError> {
    let mut attempt = 1;
    loop {
        match fetch_webshare(client, url, api_key).await {
            Ok(proxies) => return Ok(proxies),
            Err(e) if attempt < WEBSHARE_ATTEMPTS => {
                tracing::debug!("Proxy listing attempt {} failed: {}", attempt, e);
                attempt += 1;
                tokio::time::sleep(retry_delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}
