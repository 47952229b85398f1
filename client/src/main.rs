use anyhow::{bail, Context, Result};
use log::{debug, warn};
use registry::{ClientRecord, ClientsResponse, InitRequest, InitResponse, SetRequest};
use serde::Serialize;
use serde_json::json;
use std::time::Duration;

/// Consecutive failed polls before giving up on the registration
const MAX_POLL_FAILURES: u32 = 5;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Talks to the registry's HTTP API on behalf of one identity
struct RegistryClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl RegistryClient {
    fn new(base_url: String, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: None,
        })
    }

    async fn post<B: Serialize>(&self, path: &str, body: &B) -> Result<reqwest::Response> {
        let mut request = self.http.post(format!("{}{}", self.base_url, path)).json(body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("Failed to reach registry at {}", self.base_url))?;

        if !response.status().is_success() {
            let status = response.status();
            let message = response.text().await.unwrap_or_default();
            bail!("{} failed with {}: {}", path, status, message);
        }
        Ok(response)
    }

    async fn register(&mut self, address: &str, name: &str, iden: &str) -> Result<Vec<ClientRecord>> {
        let request = InitRequest {
            address: Some(address.to_string()),
            name: Some(name.to_string()),
            data: Some(json!({ "iden": iden })),
        };

        let response: InitResponse = self
            .post("/api/init", &request)
            .await?
            .json()
            .await
            .context("Failed to parse registration response")?;

        self.token = Some(response.token.context("Registration returned no token")?);
        Ok(response.clients)
    }

    async fn poll(&self) -> Result<Vec<ClientRecord>> {
        let response: ClientsResponse = self
            .post("/api/updates", &json!({}))
            .await?
            .json()
            .await
            .context("Failed to parse updates response")?;
        Ok(response.clients)
    }

    async fn deregister(&self) -> Result<()> {
        self.post("/api/set", &SetRequest::default()).await?;
        Ok(())
    }
}

fn describe(record: &ClientRecord) -> String {
    match &record.data {
        Some(data) => format!("{} -> {}", record.name, data),
        None => format!("{} (gone)", record.name),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    println!("=== Registry Client Starting ===\n");

    let base_url = std::env::var("TCI_URL").unwrap_or_else(|_| "http://localhost:8080".to_string());
    let address = std::env::var("SERVER_ADDRESS").context("SERVER_ADDRESS environment variable not set")?;
    let name = std::env::var("PLAYER_NAME").context("PLAYER_NAME environment variable not set")?;
    let iden = std::env::var("IDEN").unwrap_or_else(|_| "tci-client".to_string());
    let poll_interval = match std::env::var("POLL_INTERVAL_MS") {
        Ok(ms) => Duration::from_millis(ms.parse().context("Invalid POLL_INTERVAL_MS")?),
        Err(_) => Duration::from_secs(2),
    };

    println!("[1/2] Registering {:?} on {} via {}...", name, address, base_url);
    let mut client = RegistryClient::new(base_url, REQUEST_TIMEOUT)?;
    let peers = client.register(&address, &name, &iden).await?;
    println!("✓ Registered, {} peer(s) on the server", peers.len());
    for peer in &peers {
        println!("  {}", describe(peer));
    }

    println!("\n[2/2] Polling for updates every {:?} (Ctrl+C to deregister)", poll_interval);
    let mut ticker = tokio::time::interval(poll_interval);
    let mut failures = 0;
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match client.poll().await {
                    Ok(updates) => {
                        failures = 0;
                        debug!("Poll returned {} update(s)", updates.len());
                        for update in &updates {
                            println!("  {}", describe(update));
                        }
                    }
                    Err(e) => {
                        failures += 1;
                        warn!("Polling failed ({}/{}): {:#}", failures, MAX_POLL_FAILURES, e);
                        if failures >= MAX_POLL_FAILURES {
                            bail!("Lost registration");
                        }
                    }
                }
            }
            _ = &mut shutdown => {
                println!("\nReceived Ctrl+C, deregistering...");
                client.deregister().await?;
                println!("✓ Deregistered");
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe() {
        let live = ClientRecord { name: "peanut".into(), data: Some(json!({"iden": "x"})) };
        let gone = ClientRecord { name: "peanut".into(), data: None };

        assert_eq!(describe(&live), r#"peanut -> {"iden":"x"}"#);
        assert_eq!(describe(&gone), "peanut (gone)");
    }

    #[test]
    fn test_base_url_trimmed() {
        let client = RegistryClient::new("http://localhost:8080/".to_string(), REQUEST_TIMEOUT).unwrap();
        assert_eq!(client.base_url, "http://localhost:8080");
        assert!(client.token.is_none());
    }

    #[tokio::test]
    async fn test_hung_registry_times_out() {
        // Accepts connections but never answers
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut open = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                open.push(socket);
            }
        });

        let mut client = RegistryClient::new(format!("http://{}", addr), Duration::from_millis(200)).unwrap();
        client.token = Some("token".to_string());

        let started = std::time::Instant::now();
        assert!(client.poll().await.is_err());
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
