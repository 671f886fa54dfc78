//! Registry v2 client for one endpoint
//!
//! [`Repository`] is a single `<registry>/<name>` addressed over HTTP and
//! implements both content traits; [`RegistryClient`] owns the transport policy
//! of one configured registry and exposes push, pull, fetch and existence.

use crate::error::handlers::{HttpErrorHandler, NetworkErrorHandler};
use crate::error::{Result, SyncError};
use crate::logging::Logger;
use crate::registry::archive::{self, ArchiveReader};
use crate::registry::auth::{AuthChallenge, Authenticator, CredentialStore};
use crate::registry::manifest::{Descriptor, MANIFEST_ACCEPT, sha256_digest};
use crate::registry::platform::Platform;
use crate::registry::store::{self, ContentSource, ContentTarget, MemoryStore};
use crate::registry::{Exister, Pusher, Registry, is_local_address};
use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE, LOCATION, WWW_AUTHENTICATE};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

const MAX_RETRIES: u32 = 3;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const DOCKER_HUB_API: &str = "registry-1.docker.io";

/// One repository on one registry endpoint
#[derive(Clone)]
pub struct Repository {
    http: Client,
    auth: Arc<Authenticator>,
    /// Host as credentials are keyed, e.g. `docker.io`
    host: String,
    base_url: Url,
    name: String,
    output: Logger,
}

impl Repository {
    /// `registry_url` is `host[:port][/prefix]`, optionally with a scheme
    pub fn new(
        registry_url: &str,
        name: &str,
        plain_http: bool,
        http: Client,
        auth: Arc<Authenticator>,
        output: Logger,
    ) -> Result<Self> {
        let (scheme, rest) = if let Some(rest) = registry_url.strip_prefix("http://") {
            ("http", rest)
        } else if let Some(rest) = registry_url.strip_prefix("https://") {
            ("https", rest)
        } else if plain_http {
            ("http", registry_url)
        } else {
            ("https", registry_url)
        };

        let rest = rest.trim_end_matches('/');
        let (host, prefix) = rest.split_once('/').unwrap_or((rest, ""));
        if host.is_empty() {
            return Err(SyncError::Configuration(format!(
                "registry URL {} has no host",
                registry_url
            )));
        }
        let api_host = match host {
            "docker.io" | "index.docker.io" => DOCKER_HUB_API,
            other => other,
        };
        let base_url = Url::parse(&format!("{}://{}", scheme, api_host))?;

        let name = name.trim_matches('/');
        let name = if prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}/{}", prefix, name)
        };

        Ok(Self {
            http,
            auth,
            host: host.to_string(),
            base_url,
            name,
            output,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn url(&self, kind: &str, reference: &str) -> Result<Url> {
        Ok(self
            .base_url
            .join(&format!("/v2/{}/{}/{}", self.name, kind, reference))?)
    }

    /// Send with transient-failure retry and one challenge round-trip on 401
    async fn send<F>(&self, actions: &str, operation: &str, build: F) -> Result<Response>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        let scope = format!("repository:{}:{}", self.name, actions);
        let scope_key = format!("{}/{}", self.host, scope);
        let mut authorized = false;
        let mut attempt = 0;

        loop {
            let mut request = build(&self.http);
            if let Some(header) = self.auth.cached(&scope_key) {
                request = request.header(AUTHORIZATION, header);
            }

            match request.send().await {
                Err(e) if NetworkErrorHandler::is_transient(&e) && attempt < MAX_RETRIES => {
                    attempt += 1;
                    self.output.warning(&format!(
                        "{} failed ({}), retrying ({}/{})",
                        operation, e, attempt, MAX_RETRIES
                    ));
                    tokio::time::sleep(HttpErrorHandler::retry_delay(attempt, RETRY_BASE_DELAY)).await;
                }
                Err(e) => return Err(NetworkErrorHandler::handle_network_error(&e, operation)),
                Ok(response) if response.status() == StatusCode::UNAUTHORIZED && !authorized => {
                    let Some(header) = response
                        .headers()
                        .get(WWW_AUTHENTICATE)
                        .and_then(|h| h.to_str().ok())
                    else {
                        return Ok(response);
                    };
                    let challenge = AuthChallenge::from_header(header)?;
                    self.output
                        .detail(&format!("Answering {:?} challenge for {}", challenge.scheme, scope));
                    self.auth
                        .authorize(&self.host, &challenge, &scope, &scope_key)
                        .await?;
                    authorized = true;
                }
                Ok(response)
                    if HttpErrorHandler::is_transient(response.status()) && attempt < MAX_RETRIES =>
                {
                    attempt += 1;
                    self.output.warning(&format!(
                        "{} returned {}, retrying ({}/{})",
                        operation,
                        response.status(),
                        attempt,
                        MAX_RETRIES
                    ));
                    tokio::time::sleep(HttpErrorHandler::retry_delay(attempt, RETRY_BASE_DELAY)).await;
                }
                Ok(response) => return Ok(response),
            }
        }
    }

    async fn expect_success(response: Response, operation: &str) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Failed to read error response".to_string());
        Err(HttpErrorHandler::handle_registry_error(status, &error_text, operation))
    }

    async fn head_exists(&self, kind: &str, digest: &str) -> Result<bool> {
        let url = self.url(kind, digest)?;
        let operation = format!("HEAD {}", url);
        let response = self
            .send("pull", &operation, |http| {
                http.head(url.clone()).header(ACCEPT, MANIFEST_ACCEPT)
            })
            .await?;
        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(HttpErrorHandler::handle_registry_error(status, "", &operation)),
        }
    }
}

#[async_trait]
impl ContentSource for Repository {
    /// HEAD the manifest for its digest, falling back to GET when the
    /// registry omits `Docker-Content-Digest`
    async fn resolve(&self, reference: &str) -> Result<Descriptor> {
        let url = self.url("manifests", reference)?;
        let operation = format!("resolve {}:{}", self.name, reference);

        let response = self
            .send("pull", &operation, |http| {
                http.head(url.clone()).header(ACCEPT, MANIFEST_ACCEPT)
            })
            .await?;
        let response = Self::expect_success(response, &operation).await?;
        let headers = response.headers();
        let media_type = headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_string());
        let digest = headers
            .get("Docker-Content-Digest")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let size = headers
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());

        if let (Some(media_type), Some(digest), Some(size)) = (media_type, digest, size) {
            return Ok(Descriptor {
                media_type,
                digest,
                size,
                platform: None,
            });
        }

        self.output
            .detail(&format!("No digest header for {}, fetching manifest", operation));
        let response = self
            .send("pull", &operation, |http| {
                http.get(url.clone()).header(ACCEPT, MANIFEST_ACCEPT)
            })
            .await?;
        let response = Self::expect_success(response, &operation).await?;
        let media_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_string())
            .unwrap_or_default();
        let body = response.bytes().await?;
        Ok(Descriptor {
            media_type,
            digest: sha256_digest(&body),
            size: body.len() as u64,
            platform: None,
        })
    }

    async fn fetch_manifest(&self, desc: &Descriptor) -> Result<Vec<u8>> {
        let url = self.url("manifests", &desc.digest)?;
        let operation = format!("fetch manifest {}@{}", self.name, desc.digest);
        let accept = if desc.media_type.is_empty() {
            MANIFEST_ACCEPT.to_string()
        } else {
            desc.media_type.clone()
        };
        let response = self
            .send("pull", &operation, |http| {
                http.get(url.clone()).header(ACCEPT, accept.as_str())
            })
            .await?;
        let response = Self::expect_success(response, &operation).await?;
        Ok(response.bytes().await?.to_vec())
    }

    async fn fetch_blob(&self, desc: &Descriptor) -> Result<Vec<u8>> {
        let url = self.url("blobs", &desc.digest)?;
        let operation = format!("fetch blob {}@{}", self.name, desc.digest);
        let response = self.send("pull", &operation, |http| http.get(url.clone())).await?;
        let response = Self::expect_success(response, &operation).await?;
        Ok(response.bytes().await?.to_vec())
    }
}

#[async_trait]
impl ContentTarget for Repository {
    async fn exists(&self, desc: &Descriptor) -> Result<bool> {
        if desc.is_manifest() {
            self.head_exists("manifests", &desc.digest).await
        } else {
            self.head_exists("blobs", &desc.digest).await
        }
    }

    /// Monolithic upload: open a session, then PUT the whole blob with its digest
    async fn push_blob(&self, desc: &Descriptor, data: Vec<u8>) -> Result<()> {
        let start_url = self.base_url.join(&format!("/v2/{}/blobs/uploads/", self.name))?;
        let operation = format!("start upload {}", self.name);
        let response = self
            .send("pull,push", &operation, |http| http.post(start_url.clone()))
            .await?;
        let response = Self::expect_success(response, &operation).await?;

        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| SyncError::Registry("No Location header in upload response".to_string()))?;
        let mut upload_url = self.base_url.join(location)?;
        upload_url.query_pairs_mut().append_pair("digest", &desc.digest);

        let operation = format!("upload blob {}@{}", self.name, desc.digest);
        let response = self
            .send("pull,push", &operation, |http| {
                http.put(upload_url.clone())
                    .header(CONTENT_TYPE, "application/octet-stream")
                    .body(data.clone())
            })
            .await?;
        Self::expect_success(response, &operation).await?;
        Ok(())
    }

    async fn push_manifest(&self, desc: &Descriptor, data: Vec<u8>, tag: Option<&str>) -> Result<()> {
        let reference = tag.unwrap_or(&desc.digest);
        let url = self.url("manifests", reference)?;
        let operation = format!("push manifest {}:{}", self.name, reference);
        let response = self
            .send("pull,push", &operation, |http| {
                http.put(url.clone())
                    .header(CONTENT_TYPE, desc.media_type.as_str())
                    .body(data.clone())
            })
            .await?;
        Self::expect_success(response, &operation).await?;
        Ok(())
    }
}

/// Image copied into a transient in-memory store
pub struct PulledImage {
    pub descriptor: Descriptor,
    pub store: MemoryStore,
}

/// Client for one configured registry
pub struct RegistryClient {
    registry: Registry,
    http: Client,
    source_http: Client,
    auth: Arc<Authenticator>,
    output: Logger,
}

impl RegistryClient {
    pub fn new(registry: Registry, credentials: Arc<CredentialStore>, output: Logger) -> Result<Self> {
        let http = Client::builder()
            .danger_accept_invalid_certs(registry.insecure)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| SyncError::Network(format!("Failed to create HTTP client: {}", e)))?;
        let source_http = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| SyncError::Network(format!("Failed to create HTTP client: {}", e)))?;
        let auth = Arc::new(Authenticator::new(http.clone(), credentials, output.clone()));

        Ok(Self {
            registry,
            http,
            source_http,
            auth,
            output,
        })
    }

    /// `name` inside this registry
    pub fn repository(&self, name: &str) -> Result<Repository> {
        Repository::new(
            &self.registry.url,
            name,
            self.registry.plain_http,
            self.http.clone(),
            Arc::clone(&self.auth),
            self.output.clone(),
        )
    }

    /// `name` inside a source registry; loopback sources are reached over plain HTTP
    pub fn source_repository(&self, source_url: &str, name: &str) -> Result<Repository> {
        Repository::new(
            source_url,
            name,
            is_local_address(source_url),
            self.source_http.clone(),
            Arc::clone(&self.auth),
            self.output.clone(),
        )
    }

    /// Copy `name:reference` from this registry into memory
    pub async fn pull(&self, name: &str, reference: &str) -> Result<PulledImage> {
        let repository = self.repository(name)?;
        let store = MemoryStore::new();
        let descriptor = store::copy(&repository, &store, reference, reference, None, &self.output).await?;
        Ok(PulledImage { descriptor, store })
    }

    /// Resolve metadata only
    pub async fn fetch(&self, name: &str, reference: &str) -> Result<Descriptor> {
        self.repository(name)?.resolve(reference).await
    }
}

#[async_trait]
impl Exister for RegistryClient {
    fn registry(&self) -> &Registry {
        &self.registry
    }

    async fn exist(&self, name: &str, reference: &str) -> Result<bool> {
        match self.fetch(name, reference).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl Pusher for RegistryClient {
    async fn push(
        &self,
        source_url: &str,
        name: &str,
        reference: &str,
        tag: &str,
        platform: Option<&Platform>,
    ) -> Result<Descriptor> {
        let source = self.source_repository(source_url, name)?;
        let target = self.repository(name)?;
        self.output.detail(&format!(
            "Copying {}/{}:{} to {}/{}:{}",
            source_url, name, reference, self.registry.url, target.name(), tag
        ));
        store::copy(&source, &target, reference, tag, platform, &self.output).await
    }

    async fn push_archive(&self, archive_path: &Path, name: &str, tag: &str) -> Result<Descriptor> {
        let reader = ArchiveReader::new(archive_path, self.output.clone());
        let image = tokio::task::spawn_blocking(move || reader.read()).await??;
        let target = self.repository(name)?;
        archive::push_image(image, &target, tag, &self.output).await
    }
}
