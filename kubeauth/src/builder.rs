//! Building the kubeconfig entries for one cluster login.
//!
//! This is pure construction: no I/O and no failure modes. Everything that
//! can be malformed was rejected while resolving the cluster.

use std::path::Path;

use base64::Engine as _;
use serde_yaml::Mapping;
use url::Url;

use crate::direct::{
    Cluster, ClusterSpec, Context, ContextSpec, ExecConfig, InteractiveMode, User, UserSpec,
};

/// `apiVersion` of the exec credential handshake.
pub const EXEC_API_VERSION: &str = "client.authentication.k8s.io/v1";

/// Sub-command of our own binary that acts as the credential helper.
pub const EXEC_SUBCOMMAND: [&str; 2] = ["auth", "oidc"];

/// Independent knobs of a login. Every field has a sensible default, set only
/// what you need.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LoginOptions {
    /// Use this context name instead of the derived one.
    pub context_name: Option<String>,
    /// Run the exec plugin right after writing the kubeconfig.
    pub run_exec_plugin: bool,
    /// Point `current-context` at the new context.
    pub switch_current_context: bool,
    /// Default namespace of the new context.
    pub namespace: Option<String>,
}

/// The cluster, user and context for one login. All three share one name.
#[derive(Debug, Clone, PartialEq)]
pub struct CredentialEntry {
    pub cluster: Cluster,
    pub user: User,
    pub context: Context,
}

impl CredentialEntry {
    pub fn name(&self) -> &str {
        &self.context.name
    }

    pub fn exec(&self) -> Option<&ExecConfig> {
        self.user.user.exec.as_ref()
    }
}

/// A built entry plus what to do with it.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterLogin {
    pub entry: CredentialEntry,
    pub run_exec_plugin: bool,
    pub switch_current_context: bool,
}

/// The issuer exactly as the identity provider spells it. `Url` appends a
/// slash to bare hosts, which would break the `iss` claim comparison.
fn issuer_arg(issuer: &Url) -> String {
    let text = issuer.as_str();
    if issuer.path() == "/" && issuer.query().is_none() && issuer.fragment().is_none() {
        text.trim_end_matches('/').to_owned()
    } else {
        text.to_owned()
    }
}

pub fn exec_args(issuer: &Url, client_id: &str) -> Vec<String> {
    EXEC_SUBCOMMAND
        .iter()
        .map(|s| s.to_string())
        .chain([issuer_arg(issuer), client_id.to_owned()])
        .collect()
}

pub fn build(
    endpoint: &Url,
    issuer: &Url,
    command: &Path,
    client_id: &str,
    default_name: &str,
    ca_cert: &[u8],
    options: &LoginOptions,
) -> ClusterLogin {
    let name = options
        .context_name
        .clone()
        .unwrap_or_else(|| default_name.to_owned());

    let cluster = Cluster {
        name: name.clone(),
        cluster: ClusterSpec {
            server: endpoint.to_string(),
            certificate_authority_data: (!ca_cert.is_empty())
                .then(|| base64::engine::general_purpose::STANDARD.encode(ca_cert)),
            ..Default::default()
        },
    };

    let user = User {
        name: name.clone(),
        user: UserSpec {
            exec: Some(ExecConfig {
                api_version: EXEC_API_VERSION.to_owned(),
                command: command.to_string_lossy().into_owned(),
                args: exec_args(issuer, client_id),
                env: Vec::new(),
                provide_cluster_info: true,
                interactive_mode: Some(InteractiveMode::IfAvailable),
                install_hint: None,
                extra: Mapping::new(),
            }),
            ..Default::default()
        },
    };

    let context = Context {
        name: name.clone(),
        context: ContextSpec {
            cluster: name.clone(),
            user: name,
            namespace: options.namespace.clone(),
            extra: Mapping::new(),
        },
    };

    ClusterLogin {
        entry: CredentialEntry {
            cluster,
            user,
            context,
        },
        run_exec_plugin: options.run_exec_plugin,
        switch_current_context: options.switch_current_context,
    }
}
