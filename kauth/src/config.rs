//! Command line arguments.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args as ClapArgs, Parser, Subcommand};
use kubeauth::api::DEFAULT_API_CLUSTER;

/// Log in to managed clusters and keep the local kubeconfig in sync.
#[derive(Parser, Debug, Clone)]
#[command(name = "kauth", version)]
pub struct Args {
    /// Kubeconfig file to update [default: $KUBECONFIG, then ~/.kube/config]
    #[arg(long, global = true, env = "KAUTH_KUBECONFIG", value_name = "FILE")]
    pub kubeconfig: Option<PathBuf>,

    /// Kubeconfig context of the resource API
    #[arg(long, global = true, env = "KAUTH_API_CLUSTER", default_value = DEFAULT_API_CLUSTER)]
    pub api_cluster: String,

    /// Namespace to look clusters up in [default: namespace of the API context]
    #[arg(short, long, global = true, env = "KAUTH_NAMESPACE")]
    pub namespace: Option<String>,

    /// Log debug output to stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Authenticate with clusters
    #[command(subcommand)]
    Auth(AuthCommand),
}

#[derive(Subcommand, Debug, Clone)]
pub enum AuthCommand {
    /// Add a cluster to the kubeconfig and log in to it
    #[command(after_help = r#"Examples:
  kauth auth cluster prod                 Cluster in the current namespace
  kauth auth cluster prod/team-a          Cluster in namespace team-a
  kauth auth cluster prod --exec-plugin   Log in right away"#)]
    Cluster(ClusterArgs),

    /// Exec credential plugin used by the written kubeconfig
    #[command(hide = true)]
    Oidc(OidcArgs),
}

#[derive(ClapArgs, Debug, Clone)]
pub struct ClusterArgs {
    /// Name of the cluster to authenticate with. Also accepts 'name/namespace'.
    #[arg(value_name = "NAME")]
    pub name: String,

    /// Run the exec plugin after writing the kubeconfig
    #[arg(long)]
    pub exec_plugin: bool,

    /// Leave the current context as it is
    #[arg(long)]
    pub no_switch_context: bool,

    /// Give up on the exec plugin after this many seconds [default: wait until interrupted]
    #[arg(long, value_name = "SECONDS")]
    pub exec_timeout: Option<u64>,
}

impl ClusterArgs {
    pub fn exec_timeout(&self) -> Option<Duration> {
        self.exec_timeout.map(Duration::from_secs)
    }
}

#[derive(ClapArgs, Debug, Clone)]
pub struct OidcArgs {
    /// OIDC issuer of the cluster
    #[arg(value_name = "ISSUER_URL")]
    pub issuer_url: String,

    /// OIDC client id of the cluster
    #[arg(value_name = "CLIENT_ID")]
    pub client_id: String,

    /// Program that performs the browser login
    #[arg(long, env = "KAUTH_OIDC_HELPER", default_value = "kubectl")]
    pub helper: String,

    /// Arguments passed to the helper before the OIDC flags
    #[arg(
        long,
        env = "KAUTH_OIDC_HELPER_ARGS",
        default_value = "oidc-login get-token",
        value_delimiter = ' '
    )]
    pub helper_args: Vec<String>,
}
