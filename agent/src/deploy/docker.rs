//! Docker container adapter
//!
//! Drives the local container runtime through the `docker` CLI. Every child
//! process is spawned with `kill_on_drop`, so a timed-out call does not leave
//! a stuck process behind.

use std::process::{Output, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::deploy::adapter::{required_str, AdapterOutcome, BackendAdapter};
use crate::errors::{AdapterError, ErrorKind};
use crate::models::command::{Action, TargetKind};
use crate::models::health::ProbeResult;

/// Container adapter options
#[derive(Debug, Clone)]
pub struct Options {
    /// Path or name of the docker binary
    pub binary: String,

    /// Restart policy used when the command does not set one
    pub default_restart_policy: String,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            binary: "docker".to_string(),
            default_restart_policy: "unless-stopped".to_string(),
        }
    }
}

/// Container backend adapter
pub struct DockerAdapter {
    options: Options,
}

impl DockerAdapter {
    pub fn new(options: Options) -> Self {
        Self { options }
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new(&self.options.binary);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    async fn run(&self, args: &[&str]) -> Result<Output, AdapterError> {
        debug!("docker {}", args.join(" "));
        self.command(args).output().await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                AdapterError::permanent(format!("docker binary not found: {}", self.options.binary))
            } else {
                AdapterError::transient(format!("Failed to run docker {}: {}", args[0], e))
            }
        })
    }

    /// Run a docker subcommand and require a zero exit status
    async fn run_checked(&self, args: &[&str]) -> Result<String, AdapterError> {
        let output = self.run(args).await?;
        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).trim().to_string());
        }
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        Err(AdapterError::new(
            classify_stderr(&stderr),
            format!("docker {} failed: {}", args[0], stderr),
        ))
    }

    async fn login(&self, image: &str, payload: &serde_json::Value) {
        let Some(token) = payload
            .get("registry_token")
            .and_then(|v| v.as_str())
            .filter(|t| !t.is_empty())
        else {
            return;
        };
        let Some(registry) = registry_host(image) else {
            debug!("Image {} has no registry host, skipping login", image);
            return;
        };
        let user = payload
            .get("registry_user")
            .and_then(|v| v.as_str())
            .unwrap_or("edgemgr");

        debug!("Authenticating with registry {}...", registry);
        let result: Result<bool, std::io::Error> = async {
            let mut child = Command::new(&self.options.binary)
                .args(["login", registry, "-u", user, "--password-stdin"])
                .stdin(Stdio::piped())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .kill_on_drop(true)
                .spawn()?;
            if let Some(mut stdin) = child.stdin.take() {
                stdin.write_all(token.as_bytes()).await?;
            }
            let output = child.wait_with_output().await?;
            Ok(output.status.success())
        }
        .await;

        match result {
            Ok(true) => debug!("Authenticated with {}", registry),
            Ok(false) => warn!("Registry login to {} failed, attempting anonymous pull", registry),
            Err(e) => warn!("Failed to run docker login: {}, attempting anonymous pull", e),
        }
    }

    async fn deploy(
        &self,
        name: &str,
        payload: &serde_json::Value,
    ) -> Result<AdapterOutcome, AdapterError> {
        let image = required_str(payload, "image")?;
        info!("Deploying container {} from image {}", name, image);

        self.login(image, payload).await;

        let pull = payload.get("pull").and_then(|v| v.as_bool()).unwrap_or(true);
        if pull {
            debug!("Pulling image: {}", image);
            self.run_checked(&["pull", image]).await?;
        }

        self.discard(name).await;

        let run_args = build_run_args(name, image, payload, &self.options.default_restart_policy)?;
        let args: Vec<&str> = run_args.iter().map(String::as_str).collect();
        let container_id = self.run_checked(&args).await?;

        info!("Container {} deployed: {}", name, container_id);
        Ok(AdapterOutcome::new(json!({
            "container_id": container_id,
            "image": image,
        })))
    }

    /// Stop and remove any existing container with this name
    async fn discard(&self, name: &str) {
        for verb in ["stop", "rm"] {
            match self.run_checked(&[verb, name]).await {
                Ok(_) => debug!("docker {} {}: done", verb, name),
                Err(e) if is_missing_container(&e.message) => {}
                Err(e) => debug!("docker {} {} before redeploy: {}", verb, name, e.message),
            }
        }
    }

    async fn remove(
        &self,
        name: &str,
        payload: &serde_json::Value,
    ) -> Result<AdapterOutcome, AdapterError> {
        let force = payload.get("force").and_then(|v| v.as_bool()).unwrap_or(false);
        info!("Removing container {} (force: {})", name, force);

        let result = if force {
            self.run_checked(&["rm", "-f", name]).await
        } else {
            match self.run_checked(&["stop", name]).await {
                Ok(_) => self.run_checked(&["rm", name]).await,
                Err(e) => Err(e),
            }
        };

        match result {
            Ok(_) => Ok(AdapterOutcome::new(json!({ "removed": true }))),
            Err(e) if is_missing_container(&e.message) => {
                debug!("Container {} already absent", name);
                Ok(AdapterOutcome::new(json!({ "removed": false })))
            }
            Err(e) => Err(e),
        }
    }

    async fn inspect(
        &self,
        name: &str,
        payload: &serde_json::Value,
    ) -> Result<AdapterOutcome, AdapterError> {
        let tail = logs_tail(payload)?;
        let with_stats = payload.get("stats").and_then(|v| v.as_bool()).unwrap_or(false);

        match self
            .run_checked(&["inspect", "--format", "{{json .State}}", name])
            .await
        {
            Ok(stdout) => {
                let state: serde_json::Value = serde_json::from_str(&stdout).map_err(|e| {
                    AdapterError::permanent(format!("Unparseable docker inspect output: {e}"))
                })?;
                let mut detail = json!({ "exists": true, "state": state });

                if let Some(tail) = tail {
                    detail["logs"] = json!(self.logs(name, tail).await?);
                }
                if with_stats {
                    detail["stats"] = self.stats(name).await?;
                }
                Ok(AdapterOutcome::new(detail))
            }
            Err(e) if is_missing_container(&e.message) => {
                Ok(AdapterOutcome::new(json!({ "exists": false })))
            }
            Err(e) => Err(e),
        }
    }

    /// Last `tail` log lines from both streams, sorted by timestamp
    async fn logs(&self, name: &str, tail: u64) -> Result<String, AdapterError> {
        let tail = tail.to_string();
        let output = self
            .run(&["logs", "--timestamps", "--tail", &tail, name])
            .await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(AdapterError::new(
                classify_stderr(&stderr),
                format!("docker logs failed: {stderr}"),
            ));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let mut lines: Vec<&str> = stdout.lines().chain(stderr.lines()).collect();
        lines.sort_unstable();
        Ok(lines.join("\n"))
    }

    /// One-shot resource usage snapshot
    async fn stats(&self, name: &str) -> Result<serde_json::Value, AdapterError> {
        let stdout = self
            .run_checked(&["stats", "--no-stream", "--format", "{{json .}}", name])
            .await?;
        serde_json::from_str(&stdout)
            .map_err(|e| AdapterError::permanent(format!("Unparseable docker stats output: {e}")))
    }
}

#[async_trait]
impl BackendAdapter for DockerAdapter {
    fn kind(&self) -> TargetKind {
        TargetKind::Container
    }

    async fn execute(
        &self,
        action: Action,
        target_name: &str,
        payload: &serde_json::Value,
        _timeout: Duration,
    ) -> Result<AdapterOutcome, AdapterError> {
        match action {
            Action::Deploy => self.deploy(target_name, payload).await,
            Action::Remove => self.remove(target_name, payload).await,
            Action::Status => self.inspect(target_name, payload).await,
            Action::Scale => Err(AdapterError::validation(
                "scale is not supported for single containers",
            )),
        }
    }

    async fn probe(&self) -> ProbeResult {
        match self.run(&["info", "--format", "{{.ServerVersion}}"]).await {
            Ok(output) if output.status.success() => ProbeResult::Alive,
            Ok(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
                if stderr.contains("Cannot connect to the Docker daemon") {
                    ProbeResult::Unreachable(stderr)
                } else {
                    ProbeResult::Failed(stderr)
                }
            }
            Err(e) if e.kind == ErrorKind::Permanent => ProbeResult::Unreachable(e.message),
            Err(e) => ProbeResult::Failed(e.message),
        }
    }
}

/// Build `docker run` arguments from command parameters
pub fn build_run_args(
    name: &str,
    image: &str,
    payload: &serde_json::Value,
    default_restart_policy: &str,
) -> Result<Vec<String>, AdapterError> {
    let restart_policy = payload
        .get("restart_policy")
        .and_then(|v| v.as_str())
        .unwrap_or(default_restart_policy);

    let mut args = vec![
        "run".to_string(),
        "-d".to_string(),
        "--name".to_string(),
        name.to_string(),
        "--restart".to_string(),
        restart_policy.to_string(),
    ];

    // {"80/tcp": 8080} -> -p 8080:80/tcp
    if let Some(ports) = payload.get("ports") {
        let ports = ports
            .as_object()
            .ok_or_else(|| AdapterError::validation("ports must be an object"))?;
        for (container_port, host_port) in ports {
            let host_port = match host_port {
                serde_json::Value::Number(n) => n.to_string(),
                serde_json::Value::String(s) => s.clone(),
                _ => {
                    return Err(AdapterError::validation(format!(
                        "Invalid host port for {container_port}"
                    )))
                }
            };
            args.push("-p".to_string());
            args.push(format!("{host_port}:{container_port}"));
        }
    }

    if let Some(env) = payload.get("environment") {
        let env = env
            .as_object()
            .ok_or_else(|| AdapterError::validation("environment must be an object"))?;
        for (key, value) in env {
            let value = match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            args.push("-e".to_string());
            args.push(format!("{key}={value}"));
        }
    }

    // {"/host": {"bind": "/data", "mode": "ro"}} or {"/host": "/data"}
    if let Some(volumes) = payload.get("volumes") {
        let volumes = volumes
            .as_object()
            .ok_or_else(|| AdapterError::validation("volumes must be an object"))?;
        for (host, spec) in volumes {
            let mount = match spec {
                serde_json::Value::String(bind) => format!("{host}:{bind}"),
                serde_json::Value::Object(obj) => {
                    let bind = obj.get("bind").and_then(|v| v.as_str()).ok_or_else(|| {
                        AdapterError::validation(format!("Volume {host} is missing bind"))
                    })?;
                    match obj.get("mode").and_then(|v| v.as_str()) {
                        Some(mode) => format!("{host}:{bind}:{mode}"),
                        None => format!("{host}:{bind}"),
                    }
                }
                _ => return Err(AdapterError::validation(format!("Invalid volume {host}"))),
            };
            args.push("-v".to_string());
            args.push(mount);
        }
    }

    args.push(image.to_string());
    Ok(args)
}

/// Map docker CLI stderr onto the error taxonomy
pub fn classify_stderr(stderr: &str) -> ErrorKind {
    let lower = stderr.to_lowercase();
    const TRANSIENT: &[&str] = &[
        "cannot connect to the docker daemon",
        "connection refused",
        "connection reset",
        "i/o timeout",
        "tls handshake timeout",
        "temporary failure",
        "toomanyrequests",
        "is already in use",
        "context deadline exceeded",
    ];
    const VALIDATION: &[&str] = &["invalid reference format", "invalid argument", "unknown flag"];

    if TRANSIENT.iter().any(|needle| lower.contains(needle)) {
        ErrorKind::Transient
    } else if VALIDATION.iter().any(|needle| lower.contains(needle)) {
        ErrorKind::Validation
    } else {
        ErrorKind::Permanent
    }
}

/// Requested log tail for a status call: `"logs": true` or
/// `"logs": {"tail": N}`. Defaults to 100 lines.
pub fn logs_tail(payload: &serde_json::Value) -> Result<Option<u64>, AdapterError> {
    const DEFAULT_TAIL: u64 = 100;

    match payload.get("logs") {
        None | Some(serde_json::Value::Null) | Some(serde_json::Value::Bool(false)) => Ok(None),
        Some(serde_json::Value::Bool(true)) => Ok(Some(DEFAULT_TAIL)),
        Some(serde_json::Value::Object(obj)) => match obj.get("tail") {
            None => Ok(Some(DEFAULT_TAIL)),
            Some(tail) => tail
                .as_u64()
                .map(Some)
                .ok_or_else(|| AdapterError::validation("logs.tail must be a positive integer")),
        },
        Some(_) => Err(AdapterError::validation("logs must be a boolean or an object")),
    }
}

fn is_missing_container(message: &str) -> bool {
    message.contains("No such container") || message.contains("No such object")
}

/// Registry host of an image reference, if it names one
fn registry_host(image: &str) -> Option<&str> {
    let (first, _) = image.split_once('/')?;
    if first.contains('.') || first.contains(':') || first == "localhost" {
        Some(first)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_run_args() {
        let payload = json!({
            "image": "nginx:latest",
            "ports": {"80/tcp": 8080},
            "environment": {"ENV": "production"},
            "volumes": {"/srv/data": {"bind": "/data", "mode": "ro"}},
        });
        let args = build_run_args("web", "nginx:latest", &payload, "unless-stopped").unwrap();

        assert_eq!(&args[..6], &["run", "-d", "--name", "web", "--restart", "unless-stopped"]);
        assert!(args.windows(2).any(|w| w == ["-p", "8080:80/tcp"]));
        assert!(args.windows(2).any(|w| w == ["-e", "ENV=production"]));
        assert!(args.windows(2).any(|w| w == ["-v", "/srv/data:/data:ro"]));
        assert_eq!(args.last().map(String::as_str), Some("nginx:latest"));
    }

    #[test]
    fn test_build_run_args_rejects_bad_ports() {
        let payload = json!({"ports": ["80"]});
        let err = build_run_args("web", "nginx", &payload, "no").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
    }

    #[test]
    fn test_classify_stderr() {
        assert_eq!(
            classify_stderr("Cannot connect to the Docker daemon at unix:///var/run/docker.sock"),
            ErrorKind::Transient
        );
        assert_eq!(
            classify_stderr("Error response from daemon: manifest for nginx:nope not found"),
            ErrorKind::Permanent
        );
        assert_eq!(
            classify_stderr("docker: invalid reference format."),
            ErrorKind::Validation
        );
    }

    #[test]
    fn test_logs_tail() {
        assert_eq!(logs_tail(&json!({})).unwrap(), None);
        assert_eq!(logs_tail(&json!({"logs": true})).unwrap(), Some(100));
        assert_eq!(logs_tail(&json!({"logs": {"tail": 20}})).unwrap(), Some(20));
        assert_eq!(
            logs_tail(&json!({"logs": {"tail": -1}})).unwrap_err().kind,
            ErrorKind::Validation
        );
        assert_eq!(logs_tail(&json!({"logs": "all"})).unwrap_err().kind, ErrorKind::Validation);
    }

    #[test]
    fn test_missing_container_messages() {
        assert!(is_missing_container(
            "docker stop failed: Error response from daemon: No such container: web"
        ));
        assert!(!is_missing_container(
            "docker rm failed: Error response from daemon: container is running"
        ));
    }

    #[tokio::test]
    async fn test_discard_tolerates_failures() {
        let adapter = DockerAdapter::new(Options {
            binary: "false".to_string(),
            ..Default::default()
        });
        adapter.discard("web").await;
    }

    #[test]
    fn test_registry_host() {
        assert_eq!(registry_host("ghcr.io/org/app:1"), Some("ghcr.io"));
        assert_eq!(registry_host("localhost:5000/app"), Some("localhost:5000"));
        assert_eq!(registry_host("library/nginx"), None);
        assert_eq!(registry_host("nginx"), None);
    }
}
