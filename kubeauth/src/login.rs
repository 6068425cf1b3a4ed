//! Logging in to a cluster: resolve, build, merge, and optionally verify.

use std::fmt;
use std::io;
use std::path::PathBuf;

use tracing::{debug, info};

use crate::builder::{self, LoginOptions};
use crate::exec::{ExecError, ExecRunner};
use crate::resolve::{self, ClusterSource, ResolveError};
use crate::store::{self, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Resolving,
    Building,
    Merging,
    Verifying,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Step::Resolving => "resolving cluster",
            Step::Building => "building kubeconfig",
            Step::Merging => "writing kubeconfig",
            Step::Verifying => "running exec plugin",
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LoginFailure {
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error("could not determine the path of the running executable")]
    SelfResolutionFailed(#[source] io::Error),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Exec(#[from] ExecError),
}

/// A failed login, tagged with the step that failed.
#[derive(Debug, thiserror::Error)]
#[error("{step} failed")]
pub struct LoginError {
    pub step: Step,
    #[source]
    pub cause: LoginFailure,
}

fn failed<E: Into<LoginFailure>>(step: Step) -> impl FnOnce(E) -> LoginError {
    move |e| LoginError {
        step,
        cause: e.into(),
    }
}

/// The command the exec plugin entry points at.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum HelperCommand {
    /// The binary that is running right now.
    #[default]
    CurrentExe,
    Fixed(PathBuf),
}

impl HelperCommand {
    pub fn resolve(&self) -> io::Result<PathBuf> {
        match self {
            HelperCommand::CurrentExe => std::env::current_exe(),
            HelperCommand::Fixed(path) => Ok(path.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginOutcome {
    pub context: String,
    pub switched: bool,
    pub verified: bool,
}

/// Drives one login. Owns the kubeconfig file for the duration of the call.
pub struct Login<'a> {
    pub source: &'a dyn ClusterSource,
    pub kubeconfig: PathBuf,
    pub helper: HelperCommand,
    pub runner: ExecRunner,
}

impl<'a> Login<'a> {
    pub fn new(source: &'a dyn ClusterSource, kubeconfig: PathBuf) -> Self {
        Self {
            source,
            kubeconfig,
            helper: HelperCommand::default(),
            runner: ExecRunner::default(),
        }
    }

    /// Logs in to `cluster` (`name` or `name/namespace`).
    ///
    /// A failing exec plugin does not undo the kubeconfig changes; the entry
    /// stays usable for a later, lazily triggered login.
    pub fn login(
        &self,
        cluster: &str,
        ambient_namespace: &str,
        options: &LoginOptions,
    ) -> Result<LoginOutcome, LoginError> {
        let resolved = resolve::resolve(self.source, cluster, ambient_namespace)
            .map_err(failed(Step::Resolving))?;

        let command = self
            .helper
            .resolve()
            .map_err(LoginFailure::SelfResolutionFailed)
            .map_err(failed(Step::Building))?;
        let conn = &resolved.connection;
        let login = builder::build(
            &conn.api_endpoint,
            &conn.oidc_issuer_url,
            &command,
            &conn.oidc_client_id,
            &resolved.identity.context_name(),
            &conn.ca_certificate,
            options,
        );
        debug!(context = login.entry.name(), command = %command.display(), "built kubeconfig entry");

        store::merge_and_persist(&self.kubeconfig, &login.entry, login.switch_current_context)
            .map_err(failed(Step::Merging))?;

        let mut verified = false;
        if login.run_exec_plugin {
            if let Some(exec) = login.entry.exec() {
                self.runner
                    .run(exec, &login.entry.cluster.cluster)
                    .map_err(failed(Step::Verifying))?;
                verified = true;
            }
        }

        info!(context = login.entry.name(), "logged in to {}", resolved.identity);
        Ok(LoginOutcome {
            context: login.entry.name().to_owned(),
            switched: login.switch_current_context,
            verified,
        })
    }
}
