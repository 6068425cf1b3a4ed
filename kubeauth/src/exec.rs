//! Running an exec credential plugin the way `kubectl` would.

use std::future;
use std::io::{self, Write as _};
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::builder::EXEC_API_VERSION;
use crate::direct::{ClusterSpec, ExecConfig};

/// Environment variable carrying the [`ExecCredential`] request to the plugin.
pub const EXEC_INFO_ENV: &str = "KUBERNETES_EXEC_INFO";

/// How long output is still collected once the plugin itself is gone.
/// Anything it left running in the background may hold its pipes open.
const DRAIN_GRACE: Duration = Duration::from_millis(250);

// region: Wire types
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExecCredential {
    pub kind: String,
    pub api_version: String,
    #[serde(default)]
    pub spec: ExecCredentialSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ExecCredentialStatus>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct ExecCredentialSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster: Option<ExecCluster>,
    #[serde(default)]
    pub interactive: bool,
}

/// The cluster a plugin is authenticating for, sent when the exec config asks
/// for `provideClusterInfo`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "kebab-case")]
pub struct ExecCluster {
    pub server: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate_authority_data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insecure_skip_tls_verify: Option<bool>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ExecCredentialStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration_timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl ExecCredential {
    /// The request handed to a plugin before it runs.
    pub fn request(exec: &ExecConfig, cluster: &ClusterSpec, interactive: bool) -> Self {
        let cluster = exec.provide_cluster_info.then(|| ExecCluster {
            server: cluster.server.clone(),
            certificate_authority_data: cluster.certificate_authority_data.clone(),
            insecure_skip_tls_verify: cluster.insecure_skip_tls_verify,
        });
        Self {
            kind: "ExecCredential".to_owned(),
            api_version: if exec.api_version.is_empty() {
                EXEC_API_VERSION.to_owned()
            } else {
                exec.api_version.clone()
            },
            spec: ExecCredentialSpec {
                cluster,
                interactive,
            },
            status: None,
        }
    }
}
// endregion

/// Trips once, is observed by every clone.
#[derive(Debug, Clone)]
pub struct CancelToken(Arc<watch::Sender<bool>>);

impl Default for CancelToken {
    fn default() -> Self {
        Self(Arc::new(watch::channel(false).0))
    }
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }

    /// Completes once the token has been tripped.
    pub async fn cancelled(&self) {
        let mut rx = self.0.subscribe();
        // The sender outlives `rx`, so this only returns once tripped.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

/// How a plugin run ended.
#[derive(Debug)]
pub struct ExecOutcome {
    pub status: ExitStatus,
    pub stderr: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("unable to start exec plugin {command:?}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("unable to set up the exec plugin runtime")]
    Runtime(#[source] io::Error),

    #[error("unable to wait for exec plugin")]
    Wait(#[source] io::Error),

    #[error("unable to encode the exec credential request")]
    Encode(#[source] serde_json::Error),

    #[error("{}", describe_failure(.code, .cancelled, .stderr))]
    ExecPluginFailed {
        code: Option<i32>,
        stderr: String,
        cancelled: bool,
    },
}

fn describe_failure(code: &Option<i32>, cancelled: &bool, stderr: &str) -> String {
    let mut msg = if *cancelled {
        "exec plugin was cancelled".to_owned()
    } else {
        match code {
            Some(code) => format!("exec plugin exited with status {code}"),
            None => "exec plugin was terminated by a signal".to_owned(),
        }
    };
    if let Some(last) = stderr.lines().rev().find(|l| !l.trim().is_empty()) {
        msg.push_str(": ");
        msg.push_str(last.trim());
    }
    msg
}

/// Runs plugins. `timeout: None` waits until the plugin exits or the token
/// trips.
#[derive(Debug, Clone, Default)]
pub struct ExecRunner {
    pub cancel: CancelToken,
    pub timeout: Option<Duration>,
    /// Stop the plugin on Ctrl-C instead of leaving the signal to the process.
    pub interrupt: bool,
}

impl ExecRunner {
    pub fn new(cancel: CancelToken, timeout: Option<Duration>) -> Self {
        Self {
            cancel,
            timeout,
            interrupt: false,
        }
    }

    pub fn stop_on_interrupt(mut self, interrupt: bool) -> Self {
        self.interrupt = interrupt;
        self
    }

    /// Runs `exec` against `cluster` and blocks until it is done. stdin is
    /// inherited for interactive logins; stderr is both shown and captured;
    /// the credential on stdout is not passed on.
    pub fn run(&self, exec: &ExecConfig, cluster: &ClusterSpec) -> Result<ExecOutcome, ExecError> {
        let request = ExecCredential::request(exec, cluster, true);
        let request = serde_json::to_string(&request).map_err(ExecError::Encode)?;

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(ExecError::Runtime)?;
        runtime.block_on(self.supervise(exec, request))
    }

    async fn supervise(&self, exec: &ExecConfig, request: String) -> Result<ExecOutcome, ExecError> {
        let mut command = Command::new(&exec.command);
        command
            .args(&exec.args)
            .env(EXEC_INFO_ENV, request)
            .envs(exec.env.iter().map(|var| (&var.name, &var.value)))
            .stdin(Stdio::inherit())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(command = %exec.command, args = ?exec.args, "running exec plugin");
        let mut child = command.spawn().map_err(|source| ExecError::Spawn {
            command: exec.command.clone(),
            source,
        })?;

        let stdout = Output::default();
        let stderr = Output::default();
        let mut readers = Vec::new();
        if let Some(pipe) = child.stdout.take() {
            readers.push(tokio::spawn(stdout.clone().collect(pipe, false)));
        }
        if let Some(pipe) = child.stderr.take() {
            readers.push(tokio::spawn(stderr.clone().collect(pipe, true)));
        }

        let status = tokio::select! {
            status = child.wait() => Some(status.map_err(ExecError::Wait)?),
            () = self.cancel.cancelled() => {
                debug!("exec plugin cancelled");
                None
            }
            () = interrupted(self.interrupt) => None,
            () = expired(self.timeout) => {
                debug!(timeout = ?self.timeout, "exec plugin timed out");
                None
            }
        };
        if status.is_none() {
            if let Err(e) = child.kill().await {
                debug!("exec plugin could not be killed: {e}");
            }
        }

        // Background processes of the plugin may keep the pipes open
        // indefinitely; whatever arrived within the grace period is kept.
        let finished = async {
            for reader in readers {
                let _ = reader.await;
            }
        };
        if tokio::time::timeout(DRAIN_GRACE, finished).await.is_err() {
            debug!("exec plugin output still open after exit, not waiting for it");
        }

        let Some(status) = status else {
            return Err(ExecError::ExecPluginFailed {
                code: None,
                stderr: stderr.text(),
                cancelled: true,
            });
        };

        if !status.success() {
            return Err(ExecError::ExecPluginFailed {
                code: status.code(),
                stderr: stderr.text(),
                cancelled: false,
            });
        }

        match serde_json::from_slice::<ExecCredential>(&stdout.bytes()) {
            Ok(credential) => debug!(
                expires = ?credential.status.and_then(|s| s.expiration_timestamp),
                "exec plugin returned a credential"
            ),
            Err(e) => warn!("exec plugin succeeded but printed no valid credential: {e}"),
        }

        Ok(ExecOutcome {
            status,
            stderr: stderr.text(),
        })
    }
}

async fn interrupted(listen: bool) {
    if listen && tokio::signal::ctrl_c().await.is_ok() {
        info!("Received interrupt, stopping exec plugin");
        return;
    }
    future::pending().await
}

async fn expired(timeout: Option<Duration>) {
    match timeout {
        Some(timeout) => tokio::time::sleep(timeout).await,
        None => future::pending().await,
    }
}

/// Everything read from one of the plugin's pipes so far.
#[derive(Debug, Clone, Default)]
struct Output(Arc<Mutex<Vec<u8>>>);

impl Output {
    /// Reads `pipe` to the end, copying it to our stderr when `echo` is set.
    async fn collect(self, mut pipe: impl AsyncRead + Unpin, echo: bool) {
        let mut buf = [0u8; 4096];
        loop {
            let n = match pipe.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            };
            if echo {
                let _ = io::stderr().write_all(&buf[..n]);
            }
            self.lock().extend_from_slice(&buf[..n]);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<u8>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn bytes(&self) -> Vec<u8> {
        self.lock().clone()
    }

    fn text(&self) -> String {
        String::from_utf8_lossy(&self.lock()).into_owned()
    }
}
