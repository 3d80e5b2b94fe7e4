//! Cluster resource adapter
//!
//! Talks to a Kubernetes API server over REST. Deploys use server-side apply,
//! so re-applying the same manifest is idempotent on the cluster side.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client, Method, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use tracing::{debug, info};
use url::Url;

use crate::deploy::adapter::{AdapterOutcome, BackendAdapter};
use crate::errors::{AdapterError, AgentError, ErrorKind};
use crate::filesys::file::File;
use crate::models::command::{Action, TargetKind};
use crate::models::health::ProbeResult;

const APPLY_PATCH: &str = "application/apply-patch+yaml";
const MERGE_PATCH: &str = "application/merge-patch+json";

/// Cluster adapter options
#[derive(Debug, Clone)]
pub struct Options {
    /// API server base URL, e.g. `https://10.0.0.1:6443`
    pub api_server: String,

    /// Namespace used when neither the manifest nor the command names one
    pub namespace: String,

    /// Static bearer token
    pub token: Option<SecretString>,

    /// File holding a bearer token, re-read on every request
    pub token_file: Option<PathBuf>,

    /// PEM CA bundle for the API server
    pub ca_cert_path: Option<PathBuf>,

    pub insecure_skip_tls_verify: bool,

    /// Field manager name for server-side apply
    pub field_manager: String,

    /// Timeout for liveness probes
    pub probe_timeout: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            api_server: "https://127.0.0.1:6443".to_string(),
            namespace: "default".to_string(),
            token: None,
            token_file: None,
            ca_cert_path: None,
            insecure_skip_tls_verify: false,
            field_manager: "edgemgr".to_string(),
            probe_timeout: Duration::from_secs(5),
        }
    }
}

/// Supported resource kinds and their REST collections
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Deployment,
    Service,
    ConfigMap,
    Secret,
}

impl ResourceKind {
    pub fn parse(kind: &str) -> Result<Self, AdapterError> {
        match kind {
            "Deployment" => Ok(ResourceKind::Deployment),
            "Service" => Ok(ResourceKind::Service),
            "ConfigMap" => Ok(ResourceKind::ConfigMap),
            "Secret" => Ok(ResourceKind::Secret),
            other => Err(AdapterError::validation(format!(
                "Unsupported resource kind: {other}"
            ))),
        }
    }

    /// Path of a named resource
    pub fn path(&self, namespace: &str, name: &str) -> String {
        match self {
            ResourceKind::Deployment => {
                format!("/apis/apps/v1/namespaces/{namespace}/deployments/{name}")
            }
            ResourceKind::Service => format!("/api/v1/namespaces/{namespace}/services/{name}"),
            ResourceKind::ConfigMap => {
                format!("/api/v1/namespaces/{namespace}/configmaps/{name}")
            }
            ResourceKind::Secret => format!("/api/v1/namespaces/{namespace}/secrets/{name}"),
        }
    }
}

/// Cluster backend adapter
pub struct ClusterAdapter {
    client: Client,
    base_url: Url,
    options: Options,
}

impl ClusterAdapter {
    pub fn new(options: Options) -> Result<Self, AgentError> {
        let base_url = Url::parse(&options.api_server)
            .map_err(|e| AgentError::ConfigError(format!("Invalid cluster api_server: {e}")))?;

        let mut builder = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .danger_accept_invalid_certs(options.insecure_skip_tls_verify);

        if let Some(ref ca_path) = options.ca_cert_path {
            let pem = std::fs::read(ca_path).map_err(|e| {
                AgentError::ConfigError(format!("Failed to read CA cert {}: {e}", ca_path.display()))
            })?;
            let cert = reqwest::Certificate::from_pem(&pem)?;
            builder = builder.add_root_certificate(cert);
        }

        Ok(Self {
            client: builder.build()?,
            base_url,
            options,
        })
    }

    async fn bearer(&self) -> Option<String> {
        if let Some(ref token) = self.options.token {
            return Some(token.expose_secret().to_string());
        }
        let file = File::new(self.options.token_file.as_ref()?);
        match file.read_string().await {
            Ok(token) => Some(token.trim().to_string()),
            Err(e) => {
                debug!("Failed to read token file: {}", e);
                None
            }
        }
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<(&'static str, Vec<u8>)>,
        timeout: Duration,
    ) -> Result<reqwest::Response, reqwest::Error> {
        let mut url = self.base_url.clone();
        url.set_path(path);

        debug!("{} {}", method, url);

        let mut request = self
            .client
            .request(method, url)
            .query(query)
            .timeout(timeout)
            .header(header::ACCEPT, "application/json");

        if let Some(token) = self.bearer().await {
            request = request.bearer_auth(token);
        }
        if let Some((content_type, bytes)) = body {
            request = request.header(header::CONTENT_TYPE, content_type).body(bytes);
        }

        request.send().await
    }

    /// Send a request and decode a successful JSON body
    async fn call(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<(&'static str, Vec<u8>)>,
        timeout: Duration,
    ) -> Result<serde_json::Value, AdapterError> {
        let response = self
            .request(method, path, query, body, timeout)
            .await
            .map_err(classify_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AdapterError::new(
                classify_status(status),
                format!("{status}: {}", api_message(&body)),
            ));
        }

        response.json().await.map_err(classify_reqwest)
    }

    fn namespace<'a>(&'a self, payload: &'a serde_json::Value) -> &'a str {
        payload
            .get("namespace")
            .and_then(|v| v.as_str())
            .unwrap_or(&self.options.namespace)
    }

    async fn apply(
        &self,
        target_name: &str,
        payload: &serde_json::Value,
        timeout: Duration,
    ) -> Result<AdapterOutcome, AdapterError> {
        let manifests = manifests(payload)?;
        let default_ns = self.namespace(payload);
        let mut applied = Vec::with_capacity(manifests.len());

        for manifest in manifests {
            let kind = manifest
                .get("kind")
                .and_then(|v| v.as_str())
                .ok_or_else(|| AdapterError::validation("Manifest is missing kind"))?;
            let kind = ResourceKind::parse(kind)?;

            let mut manifest = manifest.clone();
            let metadata = manifest
                .as_object_mut()
                .ok_or_else(|| AdapterError::validation("Manifest must be an object"))?
                .entry("metadata")
                .or_insert_with(|| json!({}));
            let metadata = metadata
                .as_object_mut()
                .ok_or_else(|| AdapterError::validation("metadata must be an object"))?;
            let name = metadata
                .entry("name")
                .or_insert_with(|| json!(target_name))
                .as_str()
                .ok_or_else(|| AdapterError::validation("metadata.name must be a string"))?
                .to_string();
            let namespace = metadata
                .entry("namespace")
                .or_insert_with(|| json!(default_ns))
                .as_str()
                .ok_or_else(|| AdapterError::validation("metadata.namespace must be a string"))?
                .to_string();

            info!("Applying {:?} {}/{}", kind, namespace, name);

            // JSON is valid YAML for the apply patch content type
            let body = serde_json::to_vec(&manifest)
                .map_err(|e| AdapterError::validation(format!("Unserializable manifest: {e}")))?;
            self.call(
                Method::PATCH,
                &kind.path(&namespace, &name),
                &[("fieldManager", self.options.field_manager.as_str()), ("force", "true")],
                Some((APPLY_PATCH, body)),
                timeout,
            )
            .await?;

            applied.push(json!({ "kind": format!("{kind:?}"), "namespace": namespace, "name": name }));
        }

        Ok(AdapterOutcome::new(json!({ "applied": applied })))
    }

    async fn scale(
        &self,
        target_name: &str,
        payload: &serde_json::Value,
        timeout: Duration,
    ) -> Result<AdapterOutcome, AdapterError> {
        let replicas = payload
            .get("replicas")
            .and_then(|v| v.as_u64())
            .filter(|r| *r <= i32::MAX as u64)
            .ok_or_else(|| AdapterError::validation("replicas must be a non-negative integer"))?;
        let namespace = self.namespace(payload);

        info!("Scaling deployment {}/{} to {} replicas", namespace, target_name, replicas);

        let path = format!("{}/scale", ResourceKind::Deployment.path(namespace, target_name));
        let body = serde_json::to_vec(&json!({ "spec": { "replicas": replicas } }))
            .map_err(|e| AdapterError::validation(e.to_string()))?;
        self.call(Method::PATCH, &path, &[], Some((MERGE_PATCH, body)), timeout)
            .await?;

        Ok(AdapterOutcome::new(json!({ "replicas": replicas })))
    }

    async fn delete(
        &self,
        target_name: &str,
        payload: &serde_json::Value,
        timeout: Duration,
    ) -> Result<AdapterOutcome, AdapterError> {
        let kind = match payload.get("kind").and_then(|v| v.as_str()) {
            Some(kind) => ResourceKind::parse(kind)?,
            None => ResourceKind::Deployment,
        };
        let namespace = self.namespace(payload);

        info!("Deleting {:?} {}/{}", kind, namespace, target_name);

        match self
            .call(Method::DELETE, &kind.path(namespace, target_name), &[], None, timeout)
            .await
        {
            Ok(_) => Ok(AdapterOutcome::new(json!({ "removed": true }))),
            Err(e) if e.message.starts_with("404") => {
                debug!("{:?} {}/{} already absent", kind, namespace, target_name);
                Ok(AdapterOutcome::new(json!({ "removed": false })))
            }
            Err(e) => Err(e),
        }
    }

    async fn read_status(
        &self,
        target_name: &str,
        payload: &serde_json::Value,
        timeout: Duration,
    ) -> Result<AdapterOutcome, AdapterError> {
        let namespace = self.namespace(payload);
        let deployment = self
            .call(
                Method::GET,
                &ResourceKind::Deployment.path(namespace, target_name),
                &[],
                None,
                timeout,
            )
            .await?;

        Ok(AdapterOutcome::new(json!({
            "desired": deployment.pointer("/spec/replicas"),
            "ready": deployment.pointer("/status/readyReplicas").cloned().unwrap_or(json!(0)),
            "available": deployment.pointer("/status/availableReplicas").cloned().unwrap_or(json!(0)),
            "generation": deployment.pointer("/metadata/generation"),
            "observed_generation": deployment.pointer("/status/observedGeneration"),
        })))
    }
}

#[async_trait]
impl BackendAdapter for ClusterAdapter {
    fn kind(&self) -> TargetKind {
        TargetKind::ClusterResource
    }

    async fn execute(
        &self,
        action: Action,
        target_name: &str,
        payload: &serde_json::Value,
        timeout: Duration,
    ) -> Result<AdapterOutcome, AdapterError> {
        match action {
            Action::Deploy => self.apply(target_name, payload, timeout).await,
            Action::Scale => self.scale(target_name, payload, timeout).await,
            Action::Remove => self.delete(target_name, payload, timeout).await,
            Action::Status => self.read_status(target_name, payload, timeout).await,
        }
    }

    async fn probe(&self) -> ProbeResult {
        match self
            .request(
                Method::GET,
                "/api/v1/namespaces",
                &[("limit", "1")],
                None,
                self.options.probe_timeout,
            )
            .await
        {
            Ok(response) if response.status().is_success() => ProbeResult::Alive,
            Ok(response) => ProbeResult::Failed(format!("API server returned {}", response.status())),
            Err(e) if e.is_connect() => ProbeResult::Unreachable(e.to_string()),
            Err(e) => ProbeResult::Failed(e.to_string()),
        }
    }
}

/// Manifests carried by a deploy command
fn manifests(payload: &serde_json::Value) -> Result<Vec<&serde_json::Value>, AdapterError> {
    if let Some(list) = payload.get("manifests") {
        let list = list
            .as_array()
            .ok_or_else(|| AdapterError::validation("manifests must be an array"))?;
        if list.is_empty() {
            return Err(AdapterError::validation("manifests is empty"));
        }
        return Ok(list.iter().collect());
    }
    payload
        .get("manifest")
        .map(|m| vec![m])
        .ok_or_else(|| AdapterError::validation("Missing parameter: manifest or manifests"))
}

/// Map an API server status code onto the error taxonomy
pub fn classify_status(status: StatusCode) -> ErrorKind {
    match status.as_u16() {
        400 | 422 => ErrorKind::Validation,
        409 | 429 => ErrorKind::Transient,
        s if s >= 500 => ErrorKind::Transient,
        _ => ErrorKind::Permanent,
    }
}

fn classify_reqwest(err: reqwest::Error) -> AdapterError {
    let kind = if err.is_timeout() || err.is_connect() || err.is_request() {
        ErrorKind::Transient
    } else {
        ErrorKind::Permanent
    };
    AdapterError::new(kind, err.to_string())
}

/// Extract the `message` of a Kubernetes Status body
fn api_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
        .unwrap_or_else(|| body.chars().take(512).collect())
}
