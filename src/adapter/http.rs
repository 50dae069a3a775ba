use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde_json::{json, Value};
use std::fmt;
use tracing::{debug, info, warn};

use super::PersistenceAdapter;
use crate::model::{ChangeRecord, PaddockPatch};

/// JSON-over-HTTP backend.
///
/// Batches go to `POST {base}/v1/farms/{farm}/changes` as
/// `{"farmId", "changes": [...]}`; metadata patches go to
/// `POST {base}/v1/farms/{farm}/paddocks/{id}/metadata`. The server is
/// expected to apply a batch atomically and treat adds as upserts.
#[derive(Clone)]
pub struct HttpAdapter {
    http: Client,
    base_url: Url,
    token: String,
}

impl fmt::Debug for HttpAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpAdapter")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

pub fn build_changes_body(farm_id: &str, changes: &[ChangeRecord]) -> Value {
    json!({
        "farmId": farm_id,
        "changes": changes,
    })
}

impl HttpAdapter {
    pub fn new(base_url: &str, token: String) -> Result<Self> {
        // A trailing slash keeps `join` from dropping the last path segment.
        let normalized = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{base_url}/")
        };
        let base_url = Url::parse(&normalized).context("invalid sync.base_url")?;
        let http = Client::builder()
            .user_agent(concat!("paddock-sync/", env!("CARGO_PKG_VERSION")))
            .no_proxy()
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url,
            token,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .with_context(|| format!("invalid endpoint path {path}"))
    }

    pub fn build_changes_request(
        &self,
        farm_id: &str,
        changes: &[ChangeRecord],
    ) -> Result<reqwest::Request> {
        let url = self.endpoint(&format!("v1/farms/{farm_id}/changes"))?;
        self.build_post(url, &build_changes_body(farm_id, changes))
    }

    pub fn build_metadata_request(
        &self,
        farm_id: &str,
        paddock_id: &str,
        fields: &PaddockPatch,
    ) -> Result<reqwest::Request> {
        let url = self.endpoint(&format!("v1/farms/{farm_id}/paddocks/{paddock_id}/metadata"))?;
        let body = serde_json::to_value(fields).context("failed to encode metadata patch")?;
        self.build_post(url, &body)
    }

    fn build_post(&self, url: Url, body: &Value) -> Result<reqwest::Request> {
        self.http
            .post(url)
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Content-Type", "application/json")
            .json(body)
            .build()
            .context("failed to build sync request")
    }

    async fn execute(&self, request: reqwest::Request) -> Result<()> {
        let url = request.url().clone();
        debug!(%url, "sending sync request");
        let res = self
            .http
            .execute(request)
            .await
            .with_context(|| format!("failed to reach {url}"))?;

        let status = res.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let body = res.text().await.unwrap_or_default();
            warn!(%url, "rate limited by sync backend");
            return Err(anyhow!("received 429 from sync backend: {}", body));
        }
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            warn!(%url, %status, "sync backend rejected request");
            return Err(anyhow!("sync backend error {}: {}", status, body));
        }
        info!(%url, %status, "sync request accepted");
        Ok(())
    }
}

#[async_trait]
impl PersistenceAdapter for HttpAdapter {
    async fn apply_changes(&self, farm_id: &str, changes: &[ChangeRecord]) -> Result<()> {
        let request = self.build_changes_request(farm_id, changes)?;
        self.execute(request).await
    }

    async fn update_metadata(
        &self,
        farm_id: &str,
        paddock_id: &str,
        fields: &PaddockPatch,
    ) -> Result<()> {
        let request = self.build_metadata_request(farm_id, paddock_id, fields)?;
        self.execute(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Polygon;
    use crate::model::{ChangeKind, EntityKind, PaddockStatus};
    use chrono::Utc;

    fn record() -> ChangeRecord {
        ChangeRecord {
            seq: 7,
            id: "s-1".into(),
            entity_type: EntityKind::Section,
            change_type: ChangeKind::Add,
            geometry: Some(Polygon::rectangle(0.0, 0.0, 0.001, 0.001)),
            parent_id: Some("p-1".into()),
            metadata: None,
            timestamp: Utc::now(),
            synced: false,
        }
    }

    fn body_json(request: &reqwest::Request) -> Value {
        let bytes = request.body().and_then(|b| b.as_bytes()).unwrap();
        serde_json::from_slice(bytes).unwrap()
    }

    #[test]
    fn changes_request_targets_farm_endpoint() {
        let adapter = HttpAdapter::new("https://sync.example.com/api", "secret".into()).unwrap();
        let request = adapter.build_changes_request("farm-9", &[record()]).unwrap();

        assert_eq!(request.method(), reqwest::Method::POST);
        assert_eq!(
            request.url().as_str(),
            "https://sync.example.com/api/v1/farms/farm-9/changes"
        );
        assert_eq!(request.headers()["Authorization"], "Bearer secret");
        assert_eq!(request.headers()["Content-Type"], "application/json");

        let body = body_json(&request);
        assert_eq!(body["farmId"], "farm-9");
        assert_eq!(body["changes"][0]["id"], "s-1");
        assert_eq!(body["changes"][0]["changeType"], "add");
        assert_eq!(body["changes"][0]["parentId"], "p-1");
        assert_eq!(body["changes"][0]["geometry"]["geometry"]["type"], "Polygon");
    }

    #[test]
    fn metadata_request_sends_only_present_fields() {
        let adapter = HttpAdapter::new("http://localhost:8080/", "t".into()).unwrap();
        let patch = PaddockPatch {
            status: Some(PaddockStatus::Grazed),
            rest_days: Some(0),
            ..Default::default()
        };
        let request = adapter.build_metadata_request("f", "p-2", &patch).unwrap();
        assert_eq!(
            request.url().as_str(),
            "http://localhost:8080/v1/farms/f/paddocks/p-2/metadata"
        );
        let body = body_json(&request);
        assert_eq!(body, json!({ "status": "grazed", "restDays": 0 }));
    }

    #[test]
    fn rejects_invalid_base_url() {
        assert!(HttpAdapter::new("not a url", "t".into()).is_err());
    }
}
