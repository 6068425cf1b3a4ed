//! `auth oidc`: the exec plugin the kubeconfig entries point at.
//!
//! The browser flow and the token cache belong to an OIDC login helper. We
//! only hand it the issuer and client id and let it talk to the caller
//! directly: stdin, stdout (the ExecCredential) and stderr are inherited and
//! its exit code becomes ours.

use std::process::{Command, ExitCode, ExitStatus};

use anyhow::Context as _;
use tracing::debug;

use crate::config::OidcArgs;

fn helper_command(args: &OidcArgs) -> Command {
    let mut command = Command::new(&args.helper);
    command
        .args(args.helper_args.iter().filter(|a| !a.is_empty()))
        .arg(format!("--oidc-issuer-url={}", args.issuer_url))
        .arg(format!("--oidc-client-id={}", args.client_id));
    command
}

pub fn exit_code(status: ExitStatus) -> ExitCode {
    match status.code() {
        Some(0) => ExitCode::SUCCESS,
        Some(code) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
        None => ExitCode::FAILURE,
    }
}

pub fn run(args: &OidcArgs) -> anyhow::Result<ExitStatus> {
    let mut command = helper_command(args);
    debug!(helper = %args.helper, issuer = %args.issuer_url, "running OIDC login helper");
    command
        .status()
        .with_context(|| format!("running OIDC login helper {:?}", args.helper))
}
