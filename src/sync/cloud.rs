//! HTTP client for the cloud replica

use super::LocalFileInfo;
use crate::config::CloudConfig;
use crate::error::{Error, Result};
use crate::storage::ByteReader;
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client, RequestBuilder, Response};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};
use url::Url;

#[derive(Debug, Serialize)]
struct HashListRequest<'a> {
    hashes: &'a [String],
}

#[derive(Debug, Deserialize)]
struct DiffResponse {
    #[serde(default)]
    missing: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CognifyRequest<'a> {
    dataset_ids: [&'a str; 1],
    run_in_background: bool,
    custom_prompt: &'a str,
}

/// What the remote removed during a prune
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PruneReport {
    #[serde(default)]
    pub deleted_database_entries: u64,
    #[serde(default)]
    pub deleted_files: u64,
}

/// Client for the `/api/sync` and `/api/cognify` endpoints
#[derive(Clone)]
pub struct CloudClient {
    client: Client,
    base_url: Url,
    api_key_header: String,
    api_key: Option<String>,
}

impl CloudClient {
    /// A path prefix on the configured URL (`https://host/v1`) is kept;
    /// endpoints are resolved beneath it.
    pub fn new(config: &CloudConfig) -> Result<Self> {
        let mut base_url = Url::parse(&config.url)
            .map_err(|e| Error::Config(format!("Invalid cloud URL: {}", e)))?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url,
            api_key_header: config.api_key_header.clone(),
            api_key: config.api_key(),
        })
    }

    /// Override the API key (otherwise read from the configured env var)
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| Error::Config(format!("Invalid cloud URL: {}", e)))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.header(self.api_key_header.as_str(), key),
            None => request,
        }
    }

    /// Send the request and turn transport failures and non-2xx answers
    /// into connection errors
    async fn send(&self, what: &str, request: RequestBuilder) -> Result<Response> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| Error::Connection(format!("{} request failed: {}", what, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Connection(format!(
                "{} failed with HTTP {}: {}",
                what,
                status.as_u16(),
                body.trim()
            )));
        }
        Ok(response)
    }

    /// Ask the remote which of `hashes` it does not hold
    pub async fn diff(&self, dataset_id: &str, hashes: &[String]) -> Result<Vec<String>> {
        let url = self.endpoint(&format!("api/sync/{}/diff", dataset_id))?;
        debug!(dataset_id, hashes = hashes.len(), "Requesting hash diff");

        let response = self
            .send("diff", self.client.post(url).json(&HashListRequest { hashes }))
            .await?;
        let parsed = response
            .json::<DiffResponse>()
            .await
            .map_err(|e| Error::Connection(format!("diff response unreadable: {}", e)))?;
        Ok(parsed.missing)
    }

    /// Upload one item's bytes plus metadata. Returns the bytes actually
    /// read from `reader`; the stored size is never trusted for framing.
    pub async fn upload(
        &self,
        dataset_id: &str,
        dataset_name: &str,
        file: &LocalFileInfo,
        reader: ByteReader,
    ) -> Result<u64> {
        let url = self.endpoint(&format!("api/sync/{}/data/{}", dataset_id, file.id))?;

        let sent = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&sent);
        let stream = ReaderStream::new(reader).inspect(move |chunk| {
            if let Ok(bytes) = chunk {
                counter.fetch_add(bytes.len() as u64, Ordering::Relaxed);
            }
        });
        let part = Part::stream(Body::wrap_stream(stream))
            .file_name(file.name.clone())
            .mime_str(&file.mime_type)
            .map_err(|e| Error::Connection(format!("invalid MIME type {}: {}", file.mime_type, e)))?;

        let mut form = Form::new()
            .text("datasetId", dataset_id.to_string())
            .text("datasetName", dataset_name.to_string())
            .text("itemId", file.id.clone())
            .text("mimeType", file.mime_type.clone())
            .text("extension", file.extension.clone())
            .text("contentHash", file.content_hash.clone());
        if let Some(node_set) = &file.node_set {
            form = form.text("nodeSet", serde_json::to_string(node_set)?);
        }
        let form = form.part("file", part);

        debug!(data_id = %file.id, "Uploading data item");
        self.send("upload", self.client.put(url).multipart(form))
            .await?;

        let sent = sent.load(Ordering::Relaxed);
        if sent != file.data_size {
            warn!(
                data_id = %file.id,
                recorded = file.data_size,
                sent,
                "Stored size differs from uploaded bytes"
            );
        }
        Ok(sent)
    }

    /// Ask the remote to drop everything not in `hashes`
    pub async fn prune(&self, dataset_id: &str, hashes: &[String]) -> Result<PruneReport> {
        let mut url = self.endpoint(&format!("api/sync/{}", dataset_id))?;
        url.query_pairs_mut().append_pair("prune", "true");

        let response = self
            .send("prune", self.client.put(url).json(&HashListRequest { hashes }))
            .await?;
        response
            .json::<PruneReport>()
            .await
            .map_err(|e| Error::Connection(format!("prune response unreadable: {}", e)))
    }

    /// Ask the remote to rebuild the dataset's graph
    pub async fn cognify(&self, dataset_id: &str) -> Result<()> {
        let url = self.endpoint("api/cognify")?;
        let request = CognifyRequest {
            dataset_ids: [dataset_id],
            run_in_background: false,
            custom_prompt: "",
        };
        self.send("cognify", self.client.post(url).json(&request))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> CloudClient {
        let config = CloudConfig {
            url: server.uri(),
            ..CloudConfig::default()
        };
        CloudClient::new(&config).unwrap().with_api_key("secret")
    }

    #[tokio::test]
    async fn test_diff_sends_hashes_with_api_key() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/sync/ds-1/diff"))
            .and(header("X-Api-Key", "secret"))
            .and(body_json(serde_json::json!({"hashes": ["h1", "h2"]})))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"missing": ["h2"]})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let missing = client_for(&server)
            .diff("ds-1", &["h1".to_string(), "h2".to_string()])
            .await
            .unwrap();
        assert_eq!(missing, vec!["h2".to_string()]);
    }

    #[tokio::test]
    async fn test_base_url_path_prefix_is_kept() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/api/sync/ds-1/diff"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"missing": []})),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/api/cognify"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let config = CloudConfig {
            url: format!("{}/v1", server.uri()),
            ..CloudConfig::default()
        };
        let client = CloudClient::new(&config).unwrap();
        assert!(client.diff("ds-1", &[]).await.unwrap().is_empty());
        client.cognify("ds-1").await.unwrap();
    }

    #[tokio::test]
    async fn test_non_success_is_connection_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/sync/ds-1/diff"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .mount(&server)
            .await;

        let err = client_for(&server).diff("ds-1", &[]).await.unwrap_err();
        match err {
            Error::Connection(message) => assert!(message.contains("503")),
            other => panic!("expected connection error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_prune_and_cognify_shapes() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/api/sync/ds-1"))
            .and(query_param("prune", "true"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "deletedDatabaseEntries": 2,
                "deletedFiles": 1
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/cognify"))
            .and(body_json(serde_json::json!({
                "datasetIds": ["ds-1"],
                "runInBackground": false,
                "customPrompt": ""
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let report = client.prune("ds-1", &["h1".to_string()]).await.unwrap();
        assert_eq!(
            report,
            PruneReport {
                deleted_database_entries: 2,
                deleted_files: 1
            }
        );
        client.cognify("ds-1").await.unwrap();
    }

    #[tokio::test]
    async fn test_unreachable_remote_is_connection_error() {
        let config = CloudConfig {
            url: "http://127.0.0.1:1".to_string(),
            ..CloudConfig::default()
        };
        let err = CloudClient::new(&config)
            .unwrap()
            .cognify("ds-1")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Connection(_)));
    }
}
