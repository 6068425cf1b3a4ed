//! kauth - log in to managed clusters through OIDC.
//!
//! `auth cluster` writes a kubeconfig context whose user runs `auth oidc` of
//! this very binary to fetch tokens.

mod config;
mod oidc;

use std::path::Path;
use std::process::ExitCode;

use anyhow::{Context as _, Result};
use clap::Parser;
use console::style;
use tracing::debug;

use config::{Args, AuthCommand, ClusterArgs, Command};
use kubeauth::api::KubeClusterSource;
use kubeauth::{store, CancelToken, ExecRunner, KubeconfigPath, Login, LoginOptions};

fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(e) = init_tracing(args.verbose) {
        eprintln!("Failed to initialize logging: {e:#}");
        return ExitCode::FAILURE;
    }

    match run(&args) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {e:#}", style("error:").red().bold());
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<ExitCode> {
    match &args.command {
        Command::Auth(AuthCommand::Cluster(cluster)) => {
            login(args, cluster)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Auth(AuthCommand::Oidc(oidc)) => Ok(oidc::exit_code(oidc::run(oidc)?)),
    }
}

fn login(args: &Args, cluster: &ClusterArgs) -> Result<()> {
    let kubeconfig = KubeconfigPath::with_override(args.kubeconfig.clone()).resolve()?;

    let namespace = match &args.namespace {
        Some(namespace) => namespace.clone(),
        None => api_namespace(&kubeconfig, &args.api_cluster)?,
    };
    debug!(namespace = %namespace, api_cluster = %args.api_cluster, "ambient namespace");

    let source = KubeClusterSource::new(kubeconfig.clone(), &args.api_cluster);
    let mut login = Login::new(&source, kubeconfig);
    login.runner = ExecRunner::new(CancelToken::new(), cluster.exec_timeout())
        .stop_on_interrupt(cluster.exec_plugin);

    let options = LoginOptions {
        run_exec_plugin: cluster.exec_plugin,
        switch_current_context: !cluster.no_switch_context,
        ..Default::default()
    };
    let outcome = login.login(&cluster.name, &namespace, &options)?;

    let verb = if outcome.switched {
        "switched to context"
    } else {
        "added context"
    };
    println!("{} {verb} {}", style("✓").green(), style(&outcome.context).bold());
    Ok(())
}

/// Namespace of the API context in the kubeconfig, empty if there is none.
fn api_namespace(kubeconfig: &Path, api_cluster: &str) -> Result<String> {
    let config = store::load(kubeconfig)
        .with_context(|| format!("reading namespace of context {api_cluster}"))?;
    Ok(config
        .context_namespace(api_cluster)
        .unwrap_or_default()
        .to_owned())
}

fn init_tracing(verbose: bool) -> Result<()> {
    use tracing_subscriber::{fmt, EnvFilter};

    let level = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| anyhow::anyhow!("Failed to initialize log filter: {}", e))?;

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    Ok(())
}
