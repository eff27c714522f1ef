use anyhow::{Context, Result, bail};

use nutriledger_core::sync::{RemoteSync, SyncPayload};

/// Mirrors ledger payloads to an HTTP endpoint with `PUT {url}/users/{user_id}/ledger`.
pub struct HttpRemoteSync {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    rt: tokio::runtime::Handle,
}

impl HttpRemoteSync {
    /// Must be called from within a tokio runtime.
    pub fn new(base_url: &str, api_key: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(format!(
                "nutriledger/{} (nutrition ledger)",
                env!("CARGO_PKG_VERSION")
            ))
            .timeout(std::time::Duration::from_secs(10))
            .connect_timeout(std::time::Duration::from_secs(5))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            rt: tokio::runtime::Handle::current(),
        })
    }

    fn ledger_url(&self, user_id: &str) -> String {
        format!("{}/users/{user_id}/ledger", self.base_url)
    }

    pub async fn upsert_async(&self, user_id: &str, payload: &SyncPayload) -> Result<()> {
        let mut req = self.client.put(self.ledger_url(user_id)).json(payload);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let resp = req
            .send()
            .await
            .with_context(|| format!("Failed to reach sync server {}", self.base_url))?;

        let status = resp.status();
        if !status.is_success() {
            bail!("Sync server rejected {} with {status}", payload.key());
        }
        Ok(())
    }
}

impl RemoteSync for HttpRemoteSync {
    // Blocks on the runtime handle; call from a blocking thread (`spawn_blocking`).
    fn upsert(&self, user_id: &str, payload: &SyncPayload) -> Result<()> {
        self.rt.block_on(self.upsert_async(user_id, payload))
    }
}
