use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::future::try_join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

/// One master server's `servers.json` document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MasterListing {
    pub servers: Vec<MasterServer>,
}

/// A game server as reported by a master server
///
/// One server may be reachable under several addresses (one per protocol).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MasterServer {
    pub addresses: Vec<String>,
    #[serde(default)]
    pub info: MasterServerInfo,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MasterServerInfo {
    #[serde(default)]
    pub clients: Vec<MasterClient>,
}

/// A player currently on a server; only the name matters here
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MasterClient {
    pub name: String,
}

impl MasterServer {
    pub fn new<A, N>(addresses: A, names: N) -> Self
    where
        A: IntoIterator,
        A::Item: Into<String>,
        N: IntoIterator,
        N::Item: Into<String>,
    {
        Self {
            addresses: addresses.into_iter().map(Into::into).collect(),
            info: MasterServerInfo {
                clients: names
                    .into_iter()
                    .map(|name| MasterClient { name: name.into() })
                    .collect(),
            },
        }
    }

    /// Names the listing says are currently playing on this server
    pub fn names(&self) -> HashSet<String> {
        self.info.clients.iter().map(|c| c.name.clone()).collect()
    }
}

/// Source of the authoritative server/player universe
#[async_trait]
pub trait MasterSource: Send + Sync {
    async fn fetch(&self) -> Result<Vec<MasterListing>>;
}

/// Fetches `servers.json` from every configured master server over HTTP
pub struct HttpMasterSource {
    client: reqwest::Client,
    urls: Vec<String>,
}

impl HttpMasterSource {
    pub fn new(urls: Vec<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build master listing HTTP client")?;

        Ok(Self { client, urls })
    }

    async fn fetch_one(&self, url: &str) -> Result<MasterListing> {
        self.client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Failed to fetch master listing from {}", url))?
            .error_for_status()
            .with_context(|| format!("Master server {} returned an error", url))?
            .json()
            .await
            .with_context(|| format!("Failed to parse master listing from {}", url))
    }
}

#[async_trait]
impl MasterSource for HttpMasterSource {
    async fn fetch(&self) -> Result<Vec<MasterListing>> {
        try_join_all(self.urls.iter().map(|url| self.fetch_one(url))).await
    }
}
