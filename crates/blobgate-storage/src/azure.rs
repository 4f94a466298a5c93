//! Azure Blob Storage REST client

use crate::credential::{ChainedCredential, ClientSecretCredential, TokenCredential, STORAGE_SCOPE};
use crate::{
    BackendProvider, BlobBackend, BlobItem, BlobPage, BlobProperties, Result, StorageError,
    DEFAULT_PAGE_SIZE,
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderName, AUTHORIZATION, CONTENT_TYPE, LAST_MODIFIED};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Blob service REST API version sent with every request
pub const API_VERSION: &str = "2021-08-06";

/// Metadata key holding the client's original file name
pub const ORIGINAL_FILENAME_META: &str = "originalfilename";

/// Configuration for an Azure Blob container
#[derive(Clone, Debug)]
pub struct AzureBlobConfig {
    /// Storage account name
    pub account_name: String,
    /// Container holding uploads
    pub container_name: String,
    /// Blob service endpoint; defaults to `https://{account}.blob.core.windows.net`
    pub endpoint: Option<String>,
    /// Request timeout
    pub timeout: Duration,
    /// Page size requested from List Blobs
    pub page_size: u32,
}

impl Default for AzureBlobConfig {
    fn default() -> Self {
        Self {
            account_name: String::new(),
            container_name: String::new(),
            endpoint: None,
            timeout: Duration::from_secs(30),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl AzureBlobConfig {
    pub fn new(account_name: impl Into<String>, container_name: impl Into<String>) -> Self {
        Self {
            account_name: account_name.into(),
            container_name: container_name.into(),
            ..Default::default()
        }
    }

    /// Point at a different blob endpoint (Azurite, sovereign clouds, tests)
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Fail with the name of the first missing setting
    pub fn validate(&self) -> Result<()> {
        if self.account_name.trim().is_empty() {
            return Err(StorageError::Configuration(
                "AZURE_STORAGE_ACCOUNT_NAME is not set".to_string(),
            ));
        }
        if self.container_name.trim().is_empty() {
            return Err(StorageError::Configuration(
                "AZURE_STORAGE_CONTAINER_NAME is not set".to_string(),
            ));
        }
        Ok(())
    }

    fn container_url(&self) -> String {
        let endpoint = match &self.endpoint {
            Some(endpoint) => endpoint.trim_end_matches('/').to_string(),
            None => format!("https://{}.blob.core.windows.net", self.account_name),
        };
        format!("{}/{}", endpoint, self.container_name)
    }
}

/// Encode each path segment of a blob name, keeping the separators
fn encode_blob_path(name: &str) -> String {
    name.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn http_date(now: DateTime<Utc>) -> String {
    now.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

// List Blobs response body
#[derive(Debug, Deserialize)]
struct EnumerationResults {
    #[serde(rename = "Blobs", default)]
    blobs: BlobsXml,
    #[serde(rename = "NextMarker", default)]
    next_marker: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct BlobsXml {
    #[serde(rename = "Blob", default)]
    blob: Vec<BlobXml>,
}

#[derive(Debug, Deserialize)]
struct BlobXml {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Properties")]
    properties: PropertiesXml,
    #[serde(rename = "Metadata", default)]
    metadata: Option<HashMap<String, String>>,
}

#[derive(Debug, Deserialize)]
struct PropertiesXml {
    #[serde(rename = "Creation-Time", default)]
    creation_time: Option<String>,
    #[serde(rename = "Last-Modified", default)]
    last_modified: Option<String>,
    #[serde(rename = "Content-Length", default)]
    content_length: u64,
    #[serde(rename = "Content-Type", default)]
    content_type: Option<String>,
}

impl From<BlobXml> for BlobItem {
    fn from(blob: BlobXml) -> Self {
        let props = blob.properties;
        BlobItem {
            name: blob.name,
            size: props.content_length,
            content_type: props.content_type.filter(|ct| !ct.is_empty()),
            created_on: props.creation_time.as_deref().and_then(parse_http_date),
            last_modified: props.last_modified.as_deref().and_then(parse_http_date),
            metadata: blob
                .metadata
                .unwrap_or_default()
                .into_iter()
                .map(|(k, v)| {
                    let decoded = urlencoding::decode(&v).map(|d| d.into_owned()).unwrap_or(v);
                    (k, decoded)
                })
                .collect(),
        }
    }
}

fn parse_list_response(body: &str) -> Result<BlobPage> {
    let results: EnumerationResults = quick_xml::de::from_str(body)?;
    Ok(BlobPage {
        items: results.blobs.blob.into_iter().map(BlobItem::from).collect(),
        next_marker: results.next_marker.filter(|m| !m.is_empty()),
    })
}

/// Azure Blob container client authenticated with bearer tokens
#[derive(Clone)]
pub struct AzureBlobStore {
    client: Client,
    config: AzureBlobConfig,
    container_url: String,
    credential: Arc<dyn TokenCredential>,
}

impl AzureBlobStore {
    /// Create a new container client
    pub fn new(config: AzureBlobConfig, credential: Arc<dyn TokenCredential>) -> Result<Self> {
        config.validate()?;
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        let container_url = config.container_url();

        Ok(Self {
            client,
            config,
            container_url,
            credential,
        })
    }

    /// The configuration this client was built with
    pub fn config(&self) -> &AzureBlobConfig {
        &self.config
    }

    async fn bearer(&self) -> Result<String> {
        let token = self.credential.get_token(STORAGE_SCOPE).await?;
        Ok(format!("Bearer {}", token.token))
    }

    fn common_headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert("x-ms-version", API_VERSION.parse().map_err(header_err)?);
        headers.insert(
            "x-ms-date",
            http_date(Utc::now()).parse().map_err(header_err)?,
        );
        Ok(headers)
    }

    async fn check(response: Response, operation: &str) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let code = response
            .headers()
            .get("x-ms-error-code")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("Unknown")
            .to_string();
        let body = response.text().await.unwrap_or_default();
        debug!(%status, %code, body = %body, "{} failed", operation);
        Err(StorageError::from_status(
            status,
            format!("{} failed with {} ({})", operation, status, code),
        ))
    }
}

fn header_err<E: std::fmt::Display>(err: E) -> StorageError {
    StorageError::BlobApi(format!("invalid header value: {}", err))
}

#[async_trait]
impl BlobBackend for AzureBlobStore {
    fn backend_name(&self) -> &'static str {
        "azure"
    }

    fn blob_url(&self, name: &str) -> String {
        format!("{}/{}", self.container_url, encode_blob_path(name))
    }

    #[instrument(skip(self, data, metadata), fields(size = data.len()))]
    async fn put_blob(
        &self,
        name: &str,
        data: Bytes,
        content_type: &str,
        metadata: &HashMap<String, String>,
    ) -> Result<BlobProperties> {
        let url = self.blob_url(name);
        let size = data.len() as u64;

        let mut headers = self.common_headers()?;
        headers.insert("x-ms-blob-type", "BlockBlob".parse().map_err(header_err)?);
        headers.insert(
            "x-ms-blob-content-type",
            content_type.parse().map_err(header_err)?,
        );
        headers.insert(CONTENT_TYPE, content_type.parse().map_err(header_err)?);
        for (key, value) in metadata {
            // Header values must be visible ASCII; non-ASCII names are percent-encoded
            let encoded = urlencoding::encode(value);
            headers.insert(
                HeaderName::from_bytes(format!("x-ms-meta-{}", key).as_bytes())
                    .map_err(header_err)?,
                encoded.parse().map_err(header_err)?,
            );
        }
        headers.insert(AUTHORIZATION, self.bearer().await?.parse().map_err(header_err)?);

        let response = self
            .client
            .put(&url)
            .headers(headers)
            .body(data)
            .send()
            .await?;
        let response = Self::check(response, "Put Blob").await?;

        if response.status() != StatusCode::CREATED {
            warn!(status = %response.status(), "Put Blob returned unexpected success status");
        }

        let created_on = response
            .headers()
            .get(LAST_MODIFIED)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_http_date)
            .unwrap_or_else(Utc::now);

        debug!(blob = %name, "Blob written");

        Ok(BlobProperties {
            name: name.to_string(),
            url,
            size,
            content_type: content_type.to_string(),
            created_on,
        })
    }

    #[instrument(skip(self))]
    async fn list_blobs(&self, prefix: &str, marker: Option<&str>) -> Result<BlobPage> {
        let page_size = self.config.page_size.to_string();
        let mut query = vec![
            ("restype", "container"),
            ("comp", "list"),
            ("include", "metadata"),
            ("prefix", prefix),
            ("maxresults", page_size.as_str()),
        ];
        if let Some(marker) = marker {
            query.push(("marker", marker));
        }

        let mut headers = self.common_headers()?;
        headers.insert(AUTHORIZATION, self.bearer().await?.parse().map_err(header_err)?);

        let response = self
            .client
            .get(&self.container_url)
            .query(&query)
            .headers(headers)
            .send()
            .await?;
        let response = Self::check(response, "List Blobs").await?;
        let body = response.text().await?;

        let page = parse_list_response(&body)?;
        debug!(count = page.items.len(), more = page.next_marker.is_some(), "Listed blobs");
        Ok(page)
    }
}

/// Resolves an [`AzureBlobStore`] through the credential chain
pub struct AzureProvider {
    config: AzureBlobConfig,
    credential: Arc<dyn TokenCredential>,
}

impl AzureProvider {
    /// Use the standard chain without explicit service principal credentials
    pub fn new(config: AzureBlobConfig) -> Self {
        Self::with_credential(config, Arc::new(ChainedCredential::standard(None)))
    }

    /// Use the standard chain, trying the given service principal first
    pub fn with_service_principal(config: AzureBlobConfig, sp: ClientSecretCredential) -> Self {
        Self::with_credential(config, Arc::new(ChainedCredential::standard(Some(sp))))
    }

    pub fn with_credential(config: AzureBlobConfig, credential: Arc<dyn TokenCredential>) -> Self {
        Self { config, credential }
    }
}

#[async_trait]
impl BackendProvider for AzureProvider {
    async fn connect(&self) -> Result<Arc<dyn BlobBackend>> {
        self.config.validate()?;
        // Fetch one token so a dead chain surfaces here, not on the first write
        self.credential.get_token(STORAGE_SCOPE).await?;
        let store = AzureBlobStore::new(self.config.clone(), Arc::clone(&self.credential))?;
        Ok(Arc::new(store))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::AccessToken;
    use chrono::Duration as ChronoDuration;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct StaticToken;

    #[async_trait]
    impl TokenCredential for StaticToken {
        fn name(&self) -> &'static str {
            "static"
        }

        async fn get_token(&self, _scope: &str) -> Result<AccessToken> {
            Ok(AccessToken {
                token: "test-token".to_string(),
                expires_on: Utc::now() + ChronoDuration::hours(1),
            })
        }
    }

    struct NoToken;

    #[async_trait]
    impl TokenCredential for NoToken {
        fn name(&self) -> &'static str {
            "none"
        }

        async fn get_token(&self, _scope: &str) -> Result<AccessToken> {
            Err(StorageError::Credential("nothing configured".to_string()))
        }
    }

    fn store_for(server: &MockServer) -> AzureBlobStore {
        let config = AzureBlobConfig::new("acct", "uploads").with_endpoint(server.uri());
        AzureBlobStore::new(config, Arc::new(StaticToken)).unwrap()
    }

    const PAGE_ONE: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<EnumerationResults ServiceEndpoint="https://acct.blob.core.windows.net/" ContainerName="uploads">
  <Prefix>u1/</Prefix>
  <MaxResults>1000</MaxResults>
  <Blobs>
    <Blob>
      <Name>u1/20240101_120000_a.txt</Name>
      <Properties>
        <Creation-Time>Mon, 01 Jan 2024 12:00:00 GMT</Creation-Time>
        <Last-Modified>Mon, 01 Jan 2024 12:00:01 GMT</Last-Modified>
        <Content-Length>10</Content-Length>
        <Content-Type>text/plain</Content-Type>
        <BlobType>BlockBlob</BlobType>
      </Properties>
      <Metadata>
        <originalfilename>a.txt</originalfilename>
      </Metadata>
    </Blob>
  </Blobs>
  <NextMarker>page-2</NextMarker>
</EnumerationResults>"#;

    const PAGE_TWO: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<EnumerationResults ContainerName="uploads">
  <Blobs>
    <Blob>
      <Name>u1/20240102_120000_b.bin</Name>
      <Properties>
        <Last-Modified>Tue, 02 Jan 2024 12:00:00 GMT</Last-Modified>
        <Content-Length>3</Content-Length>
        <Content-Type>application/octet-stream</Content-Type>
      </Properties>
    </Blob>
  </Blobs>
  <NextMarker />
</EnumerationResults>"#;

    #[test]
    fn test_parse_list_pages() {
        let page = parse_list_response(PAGE_ONE).unwrap();
        assert_eq!(page.items.len(), 1);
        let item = &page.items[0];
        assert_eq!(item.name, "u1/20240101_120000_a.txt");
        assert_eq!(item.size, 10);
        assert_eq!(item.content_type.as_deref(), Some("text/plain"));
        assert_eq!(
            item.metadata.get(ORIGINAL_FILENAME_META).map(String::as_str),
            Some("a.txt")
        );
        assert!(item.created_on.is_some());
        assert_eq!(page.next_marker.as_deref(), Some("page-2"));

        let page = parse_list_response(PAGE_TWO).unwrap();
        assert!(page.items[0].created_on.is_none());
        assert!(page.items[0].last_modified.is_some());
        assert!(page.next_marker.is_none());
    }

    #[test]
    fn test_blob_url_encodes_segments() {
        let config = AzureBlobConfig::new("acct", "uploads");
        let store = AzureBlobStore::new(config, Arc::new(StaticToken)).unwrap();
        assert_eq!(
            store.blob_url("user%2Fx/a b.txt"),
            "https://acct.blob.core.windows.net/uploads/user%252Fx/a%20b.txt"
        );
    }

    #[test]
    fn test_validate_names_missing_setting() {
        let err = AzureBlobConfig::new("", "uploads").validate().unwrap_err();
        assert!(err.to_string().contains("AZURE_STORAGE_ACCOUNT_NAME"));
        let err = AzureBlobConfig::new("acct", " ").validate().unwrap_err();
        assert!(err.to_string().contains("AZURE_STORAGE_CONTAINER_NAME"));
    }

    #[tokio::test]
    async fn test_put_blob_sends_headers() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/uploads/u1/20240101_120000_x.txt"))
            .and(header("x-ms-blob-type", "BlockBlob"))
            .and(header("x-ms-version", API_VERSION))
            .and(header("x-ms-blob-content-type", "text/plain"))
            .and(header("x-ms-meta-originalfilename", "notes.txt"))
            .and(header("authorization", "Bearer test-token"))
            .respond_with(
                ResponseTemplate::new(201)
                    .insert_header("Last-Modified", "Mon, 01 Jan 2024 12:00:00 GMT"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let store = store_for(&server);
        let mut metadata = HashMap::new();
        metadata.insert(ORIGINAL_FILENAME_META.to_string(), "notes.txt".to_string());

        let props = store
            .put_blob(
                "u1/20240101_120000_x.txt",
                Bytes::from_static(b"0123456789"),
                "text/plain",
                &metadata,
            )
            .await
            .unwrap();

        assert_eq!(props.size, 10);
        assert_eq!(props.created_on.to_rfc3339(), "2024-01-01T12:00:00+00:00");
        assert!(props.url.ends_with("/uploads/u1/20240101_120000_x.txt"));
    }

    #[tokio::test]
    async fn test_list_follows_marker() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/uploads"))
            .and(query_param("comp", "list"))
            .and(query_param("marker", "page-2"))
            .respond_with(ResponseTemplate::new(200).set_body_string(PAGE_TWO))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/uploads"))
            .and(query_param("comp", "list"))
            .and(query_param("prefix", "u1/"))
            .respond_with(ResponseTemplate::new(200).set_body_string(PAGE_ONE))
            .up_to_n_times(1)
            .mount(&server)
            .await;

        let store = store_for(&server);
        let first = store.list_blobs("u1/", None).await.unwrap();
        assert_eq!(first.next_marker.as_deref(), Some("page-2"));

        let second = store
            .list_blobs("u1/", first.next_marker.as_deref())
            .await
            .unwrap();
        assert_eq!(second.items[0].name, "u1/20240102_120000_b.bin");
        assert!(second.next_marker.is_none());
    }

    #[tokio::test]
    async fn test_error_status_mapping() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(
                ResponseTemplate::new(403)
                    .insert_header("x-ms-error-code", "AuthorizationPermissionMismatch"),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503).insert_header("x-ms-error-code", "ServerBusy"))
            .mount(&server)
            .await;

        let store = store_for(&server);
        let err = store
            .put_blob("u1/a", Bytes::from_static(b"a"), "text/plain", &HashMap::new())
            .await
            .unwrap_err();
        assert!(err.is_denied());
        assert!(err.to_string().contains("AuthorizationPermissionMismatch"));

        let err = store.list_blobs("u1/", None).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_provider_surfaces_credential_failure() {
        let config = AzureBlobConfig::new("acct", "uploads");
        let provider = AzureProvider::with_credential(config, Arc::new(NoToken));
        let err = provider.connect().await.err().unwrap();
        assert!(matches!(err, StorageError::Credential(_)));

        let provider = AzureProvider::with_credential(AzureBlobConfig::default(), Arc::new(StaticToken));
        let err = provider.connect().await.err().unwrap();
        assert!(matches!(err, StorageError::Configuration(_)));
    }
}
