//! Registry authentication
//!
//! Credentials are never configured here: they are looked up per registry host
//! in the Docker client configuration, either inline (`auths`) or through a
//! credential helper (`credHelpers` / `credsStore`). Bearer tokens obtained from
//! a challenge are cached per repository scope for the life of the process.

use crate::error::{Result, SyncError};
use crate::logging::Logger;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, RwLock};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Docker Hub stores its credentials under the legacy index address
const DOCKER_HUB_AUTH_KEY: &str = "https://index.docker.io/v1/";

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    pub fn basic_header(&self) -> String {
        let encoded = BASE64.encode(format!("{}:{}", self.username, self.password));
        format!("Basic {}", encoded)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct DockerConfigFile {
    auths: HashMap<String, DockerAuthEntry>,
    cred_helpers: HashMap<String, String>,
    creds_store: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DockerAuthEntry {
    auth: Option<String>,
    username: Option<String>,
    password: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HelperResponse {
    username: String,
    secret: String,
}

/// Looks up credentials for registry hosts in the Docker client configuration
#[derive(Debug)]
pub struct CredentialStore {
    config_path: Option<PathBuf>,
    output: Logger,
}

impl CredentialStore {
    /// Use `$DOCKER_CONFIG/config.json`, falling back to `~/.docker/config.json`
    pub fn from_environment(output: Logger) -> Self {
        let config_path = std::env::var_os("DOCKER_CONFIG")
            .map(|dir| PathBuf::from(dir).join("config.json"))
            .or_else(|| {
                let dirs = directories::BaseDirs::new()?;
                Some(dirs.home_dir().join(".docker/config.json"))
            });
        Self {
            config_path,
            output,
        }
    }

    pub fn with_config_path(path: impl Into<PathBuf>, output: Logger) -> Self {
        Self {
            config_path: Some(path.into()),
            output,
        }
    }

    /// A store that never yields credentials
    pub fn anonymous(output: Logger) -> Self {
        Self {
            config_path: None,
            output,
        }
    }

    pub async fn resolve(&self, host: &str) -> Result<Option<Credentials>> {
        let Some(path) = &self.config_path else {
            return Ok(None);
        };
        let config = match load_config(path)? {
            Some(config) => config,
            None => return Ok(None),
        };

        let keys = auth_keys(host);

        if let Some(helper) = keys.iter().find_map(|key| config.cred_helpers.get(key)) {
            self.output
                .detail(&format!("Using credential helper {} for {}", helper, host));
            return self.from_helper(helper, &keys[0]).await;
        }

        for key in &keys {
            if let Some(entry) = config.auths.get(key) {
                if let Some(credentials) = decode_entry(entry)? {
                    self.output
                        .detail(&format!("Using stored credentials for {}", host));
                    return Ok(Some(credentials));
                }
            }
        }

        if let Some(store) = &config.creds_store {
            self.output
                .detail(&format!("Using credential store {} for {}", store, host));
            return self.from_helper(store, &keys[0]).await;
        }

        Ok(None)
    }

    async fn from_helper(&self, helper: &str, server: &str) -> Result<Option<Credentials>> {
        let program = format!("docker-credential-{}", helper);
        let mut child = Command::new(&program)
            .arg("get")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SyncError::Auth(format!("cannot run {}: {}", program, e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(server.as_bytes()).await?;
        }

        let result = child.wait_with_output().await?;
        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            let stdout = String::from_utf8_lossy(&result.stdout);
            // Helpers report a missing entry on stdout or stderr depending on the helper
            if stdout.contains("credentials not found") || stderr.contains("credentials not found") {
                return Ok(None);
            }
            return Err(SyncError::Auth(format!(
                "{} get failed: {}",
                program,
                stderr.trim()
            )));
        }

        let response: HelperResponse = serde_json::from_slice(&result.stdout)
            .map_err(|e| SyncError::Auth(format!("invalid {} response: {}", program, e)))?;
        Ok(Some(Credentials {
            username: response.username,
            password: response.secret,
        }))
    }
}

fn load_config(path: &Path) -> Result<Option<DockerConfigFile>> {
    if !path.is_file() {
        return Ok(None);
    }
    let data = std::fs::read(path)?;
    let config = serde_json::from_slice(&data).map_err(|e| {
        SyncError::Auth(format!("invalid Docker config {}: {}", path.display(), e))
    })?;
    Ok(Some(config))
}

/// Keys a host may be stored under, most specific first
fn auth_keys(host: &str) -> Vec<String> {
    if matches!(host, "docker.io" | "index.docker.io" | "registry-1.docker.io") {
        return vec![
            DOCKER_HUB_AUTH_KEY.to_string(),
            "docker.io".to_string(),
            "index.docker.io".to_string(),
        ];
    }
    vec![
        host.to_string(),
        format!("https://{}", host),
        format!("http://{}", host),
    ]
}

fn decode_entry(entry: &DockerAuthEntry) -> Result<Option<Credentials>> {
    if let Some(auth) = entry.auth.as_deref().filter(|a| !a.is_empty()) {
        let decoded = BASE64
            .decode(auth)
            .map_err(|e| SyncError::Auth(format!("invalid stored auth: {}", e)))?;
        let decoded = String::from_utf8(decoded)
            .map_err(|e| SyncError::Auth(format!("invalid stored auth: {}", e)))?;
        let (username, password) = decoded
            .split_once(':')
            .ok_or_else(|| SyncError::Auth("stored auth is not user:password".to_string()))?;
        return Ok(Some(Credentials {
            username: username.to_string(),
            password: password.to_string(),
        }));
    }
    match (&entry.username, &entry.password) {
        (Some(username), Some(password)) => Ok(Some(Credentials {
            username: username.clone(),
            password: password.clone(),
        })),
        _ => Ok(None),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthScheme {
    Bearer,
    Basic,
}

/// Parsed `WWW-Authenticate` header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthChallenge {
    pub scheme: AuthScheme,
    pub realm: String,
    pub service: Option<String>,
    pub scope: Option<String>,
}

impl AuthChallenge {
    pub fn from_header(header: &str) -> Result<Self> {
        let err = || SyncError::Auth(format!("unsupported authentication header: {}", header));
        let (scheme, params) = header.trim().split_once(' ').unwrap_or((header.trim(), ""));
        let scheme = match scheme.to_ascii_lowercase().as_str() {
            "bearer" => AuthScheme::Bearer,
            "basic" => AuthScheme::Basic,
            _ => return Err(err()),
        };

        let mut realm = None;
        let mut service = None;
        let mut scope = None;
        for (key, value) in parse_params(params) {
            match key.as_str() {
                "realm" => realm = Some(value),
                "service" => service = Some(value),
                "scope" => scope = Some(value),
                _ => continue,
            }
        }

        if scheme == AuthScheme::Bearer && realm.is_none() {
            return Err(err());
        }
        Ok(Self {
            scheme,
            realm: realm.unwrap_or_default(),
            service,
            scope,
        })
    }
}

/// Split `key="value",key=value` honoring commas inside quotes
fn parse_params(params: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    let mut rest = params.trim();
    while !rest.is_empty() {
        let Some((key, after)) = rest.split_once('=') else {
            break;
        };
        let key = key.trim().trim_start_matches(',').trim().to_ascii_lowercase();
        let after = after.trim_start();
        let (value, remaining) = if let Some(quoted) = after.strip_prefix('"') {
            match quoted.find('"') {
                Some(end) => (&quoted[..end], &quoted[end + 1..]),
                None => (quoted, ""),
            }
        } else {
            match after.find(',') {
                Some(end) => (&after[..end], &after[end..]),
                None => (after, ""),
            }
        };
        out.push((key, value.to_string()));
        rest = remaining.trim_start().trim_start_matches(',').trim_start();
    }
    out
}

#[derive(Deserialize)]
struct TokenResponse {
    token: Option<String>,
    access_token: Option<String>,
}

/// Answers registry challenges and caches the resulting authorization headers
#[derive(Debug)]
pub struct Authenticator {
    http: Client,
    credentials: Arc<CredentialStore>,
    headers: RwLock<HashMap<String, String>>,
    output: Logger,
}

impl Authenticator {
    pub fn new(http: Client, credentials: Arc<CredentialStore>, output: Logger) -> Self {
        Self {
            http,
            credentials,
            headers: RwLock::new(HashMap::new()),
            output,
        }
    }

    /// Authorization header previously obtained for `scope_key`
    pub fn cached(&self, scope_key: &str) -> Option<String> {
        self.headers
            .read()
            .ok()
            .and_then(|headers| headers.get(scope_key).cloned())
    }

    /// Answer a challenge and cache the header for `scope_key`
    pub async fn authorize(
        &self,
        host: &str,
        challenge: &AuthChallenge,
        scope: &str,
        scope_key: &str,
    ) -> Result<String> {
        let credentials = self.credentials.resolve(host).await?;
        let header = match challenge.scheme {
            AuthScheme::Basic => credentials
                .as_ref()
                .map(Credentials::basic_header)
                .ok_or_else(|| SyncError::Auth(format!("{} requires credentials", host)))?,
            AuthScheme::Bearer => {
                let token = self
                    .fetch_token(challenge, scope, credentials.as_ref())
                    .await?;
                format!("Bearer {}", token)
            }
        };

        if let Ok(mut headers) = self.headers.write() {
            headers.insert(scope_key.to_string(), header.clone());
        }
        Ok(header)
    }

    async fn fetch_token(
        &self,
        challenge: &AuthChallenge,
        scope: &str,
        credentials: Option<&Credentials>,
    ) -> Result<String> {
        let mut url = url::Url::parse(&challenge.realm)?;
        {
            let mut query = url.query_pairs_mut();
            if let Some(service) = &challenge.service {
                query.append_pair("service", service);
            }
            query.append_pair("scope", challenge.scope.as_deref().unwrap_or(scope));
        }

        self.output.detail(&format!("Requesting token from: {}", url));
        let mut request = self.http.get(url.as_str());
        if let Some(credentials) = credentials {
            request = request.basic_auth(&credentials.username, Some(&credentials.password));
        }

        let response = request
            .send()
            .await
            .map_err(|e| SyncError::Network(format!("Failed to get auth token: {}", e)))?;
        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error response".to_string());
            return Err(SyncError::Auth(format!(
                "token request failed with status {}: {}",
                status, error_text
            )));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| SyncError::Parse(format!("Failed to parse token response: {}", e)))?;
        body.token
            .or(body.access_token)
            .ok_or_else(|| SyncError::Auth("token response carried no token".to_string()))
    }
}
