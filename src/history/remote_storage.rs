//! Remote key-value history backend. Reuses the crate's shared `reqwest`
//! client, mirroring the teacher's provider-wide client-reuse pattern.

use super::entry::{HistoryEntry, HistoryKey};
use super::storage::HistoryStorage;
use crate::error::GateResult;
use async_trait::async_trait;

pub struct RemoteHistoryStorage {
    client: reqwest::Client,
    base_url: String,
}

impl RemoteHistoryStorage {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    fn url_for(&self, key: &HistoryKey) -> String {
        format!("{}/history/{}", self.base_url.trim_end_matches('/'), urlencode(&key.as_string()))
    }
}

fn urlencode(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '~') {
                c.to_string()
            } else {
                c.to_string().bytes().map(|b| format!("%{:02X}", b)).collect()
            }
        })
        .collect()
}

#[async_trait]
impl HistoryStorage for RemoteHistoryStorage {
    async fn load(&self, key: &HistoryKey) -> GateResult<Vec<HistoryEntry>> {
        let resp = self.client.get(self.url_for(key)).send().await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        let resp = resp.error_for_status()?;
        Ok(resp.json().await?)
    }

    async fn save(&self, key: &HistoryKey, entries: &[HistoryEntry]) -> GateResult<()> {
        self.client
            .put(self.url_for(key))
            .json(entries)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn delete(&self, key: &HistoryKey) -> GateResult<()> {
        let resp = self.client.delete(self.url_for(key)).send().await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(());
        }
        resp.error_for_status()?;
        Ok(())
    }

    async fn list_keys(&self) -> GateResult<Vec<HistoryKey>> {
        let url = format!("{}/history", self.base_url.trim_end_matches('/'));
        let resp = self.client.get(url).send().await?.error_for_status()?;
        let ids: Vec<String> = resp.json().await?;
        Ok(ids.into_iter().map(HistoryKey::new).collect())
    }

    async fn close(&self) -> GateResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_for_encodes_key() {
        let storage = RemoteHistoryStorage::new(reqwest::Client::new(), "https://gw.example/api");
        let key = HistoryKey::new("user one");
        assert_eq!(storage.url_for(&key), "https://gw.example/api/history/user%20one");
    }
}
