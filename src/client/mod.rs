//! Idempotent control client for the running server.
//!
//! Mutating index/template calls are gated behind a cluster-health wait so
//! they do not race the server's asynchronous propagation. Existence probes
//! and mutations are not transactional; two callers racing on the same
//! resource name must serialize their own setup.

mod types;

pub use types::{DocumentWithId, IndexDescriptor, IndexRequest, TemplateDescriptor};

use serde_json::json;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::version::{Version, VersionBehavior};

/// HTTP client layer over the instance's REST API.
pub struct ElasticClient {
    http: reqwest::Client,
    base_url: String,
    /// Bulk routing metadata key, resolved once from the server's reported
    /// version
    routing_key: OnceCell<&'static str>,
}

impl ElasticClient {
    pub fn new(http_port: u16) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: format!("http://127.0.0.1:{http_port}"),
            routing_key: OnceCell::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Create `name` unless it already exists. A no-op on repeated calls.
    pub async fn create_index_if_absent(
        &self,
        name: &str,
        settings_json: Option<&str>,
    ) -> Result<()> {
        if self.index_exists(name).await? {
            debug!("index {name} already exists, create skipped");
            return Ok(());
        }
        let mut request = self.http.put(self.url(&format!("/{name}")));
        if let Some(settings) = settings_json {
            request = request
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(settings.to_string());
        }
        expect_success(request.send().await?).await?;
        self.wait_for_cluster_yellow().await
    }

    /// Delete `name` if it exists; absent indices are left alone.
    pub async fn delete_index_if_present(&self, name: &str) -> Result<()> {
        if !self.index_exists(name).await? {
            warn!("index {name} does not exist, delete skipped");
            return Ok(());
        }
        let response = self.http.delete(self.url(&format!("/{name}"))).send().await?;
        expect_success(response).await?;
        self.wait_for_cluster_yellow().await
    }

    pub async fn index_exists(&self, name: &str) -> Result<bool> {
        let response = self.http.head(self.url(&format!("/{name}"))).send().await?;
        Ok(response.status().is_success())
    }

    /// Create template `name` unless it already exists.
    pub async fn create_template_if_absent(&self, name: &str, body: &str) -> Result<()> {
        if self.template_exists(name).await? {
            debug!("template {name} already exists, create skipped");
            return Ok(());
        }
        let response = self
            .http
            .put(self.url(&format!("/_template/{name}")))
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body.to_string())
            .send()
            .await?;
        expect_success(response).await?;
        self.wait_for_cluster_yellow().await
    }

    /// Delete template `name` if it exists.
    pub async fn delete_template_if_present(&self, name: &str) -> Result<()> {
        if !self.template_exists(name).await? {
            warn!("template {name} does not exist, delete skipped");
            return Ok(());
        }
        let response = self
            .http
            .delete(self.url(&format!("/_template/{name}")))
            .send()
            .await?;
        expect_success(response).await?;
        self.wait_for_cluster_yellow().await
    }

    pub async fn template_exists(&self, name: &str) -> Result<bool> {
        let response = self
            .http
            .head(self.url(&format!("/_template/{name}")))
            .send()
            .await?;
        Ok(response.status().is_success())
    }

    /// Block until cluster health reaches at least yellow, i.e. degraded
    /// but available.
    pub async fn wait_for_cluster_yellow(&self) -> Result<()> {
        let response = self
            .http
            .get(self.url("/_cluster/health?wait_for_status=yellow&timeout=60s"))
            .send()
            .await?;
        expect_success(response).await?;
        Ok(())
    }

    /// Submit one newline-delimited bulk request, then refresh so that a
    /// search issued right after observes the written documents.
    pub async fn bulk_index(&self, requests: &[IndexRequest]) -> Result<()> {
        if requests.is_empty() {
            return Ok(());
        }
        let routing_key = self.routing_key().await?;
        let mut body = String::new();
        for request in requests {
            let mut action = serde_json::Map::new();
            action.insert("_index".into(), json!(request.index));
            if let Some(id) = &request.id {
                action.insert("_id".into(), json!(id));
            }
            if let Some(routing) = &request.routing {
                action.insert(routing_key.into(), json!(routing));
            }
            body.push_str(&json!({ "index": action }).to_string());
            body.push('\n');
            body.push_str(&flatten_newlines(&request.document));
            body.push('\n');
        }
        let response = self
            .http
            .post(self.url("/_bulk"))
            .header(reqwest::header::CONTENT_TYPE, "application/x-ndjson")
            .body(body)
            .send()
            .await?;
        expect_success(response).await?;
        self.refresh().await
    }

    /// Make everything indexed so far visible to search.
    pub async fn refresh(&self) -> Result<()> {
        let response = self.http.get(self.url("/_refresh")).send().await?;
        expect_success(response).await?;
        Ok(())
    }

    /// Fetch the `_source` of every document in the given indices, or in
    /// the whole cluster when none are named.
    pub async fn fetch_all_documents(&self, indices: &[&str]) -> Result<Vec<String>> {
        self.fetch_all_documents_routed(None, indices).await
    }

    /// Same as [`Self::fetch_all_documents`], optionally scoped to one
    /// routing key.
    pub async fn fetch_all_documents_routed(
        &self,
        routing: Option<&str>,
        indices: &[&str],
    ) -> Result<Vec<String>> {
        if indices.is_empty() {
            return self.search_for_documents("/_search").await;
        }
        let routing_param = routing
            .map(|key| format!("?routing={key}"))
            .unwrap_or_default();
        let mut documents = Vec::new();
        for index in indices {
            let path = format!("/{index}/_search{routing_param}");
            documents.extend(self.search_for_documents(&path).await?);
        }
        Ok(documents)
    }

    async fn search_for_documents(&self, path: &str) -> Result<Vec<String>> {
        let response = self.http.get(self.url(path)).send().await?;
        let response = expect_success(response).await?;
        let body: serde_json::Value = response.json().await?;
        let hits = body
            .get("hits")
            .and_then(|hits| hits.get("hits"))
            .and_then(|hits| hits.as_array())
            .ok_or_else(|| {
                Error::UnexpectedResponse(format!("search response without hits: {body}"))
            })?;
        Ok(hits
            .iter()
            .filter_map(|hit| hit.get("_source"))
            .map(|source| source.to_string())
            .collect())
    }

    /// The bulk metadata key for routing changed name in a later server
    /// generation; ask the running instance which one it expects, once.
    async fn routing_key(&self) -> Result<&'static str> {
        self.routing_key
            .get_or_try_init(|| async {
                let response = self.http.get(self.url("/")).send().await?;
                let response = expect_success(response).await?;
                let body: serde_json::Value = response.json().await?;
                let reported = body
                    .get("version")
                    .and_then(|version| version.get("number"))
                    .and_then(|number| number.as_str())
                    .unwrap_or_default();
                match reported.parse::<Version>() {
                    Ok(version) => Ok(VersionBehavior::for_version(&version)
                        .map(|behavior| behavior.bulk_routing_key)
                        .unwrap_or("_routing")),
                    Err(_) => {
                        warn!("could not parse server-reported version '{reported}'");
                        Ok("_routing")
                    }
                }
            })
            .await
            .map(|key| *key)
    }
}

/// Pass 2xx responses through; everything else becomes an error carrying
/// the response body verbatim, so server-side diagnostics survive.
async fn expect_success(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(Error::Http {
        status: status.as_u16(),
        body,
    })
}

/// Document bodies land on a single NDJSON line.
fn flatten_newlines(json: &str) -> String {
    json.replace(['\n', '\r'], " ")
}
