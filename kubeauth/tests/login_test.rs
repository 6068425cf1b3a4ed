use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use kubeauth::login::LoginFailure;
use kubeauth::resolve::{
    KubernetesClusterObservation, KubernetesClusterStatus, LookupError, ResolveError,
};
use kubeauth::store::{self, StoreError};
use kubeauth::{ClusterIdentity, ClusterSource, HelperCommand, Login, LoginOptions, Step};

const HELPER: &str = "/opt/kauth/bin/kauth";

#[derive(Default)]
struct Clusters(HashMap<(String, String), KubernetesClusterStatus>);

impl Clusters {
    fn with(mut self, name: &str, namespace: &str, endpoint: &str) -> Self {
        self.0.insert(
            (name.to_owned(), namespace.to_owned()),
            KubernetesClusterStatus {
                at_provider: KubernetesClusterObservation {
                    api_endpoint: endpoint.to_owned(),
                    oidc_issuer_url: "https://auth.example.com/realms/nine".to_owned(),
                    oidc_client_id: "nine-cluster".to_owned(),
                    api_ca_cert: "LS0tLS1CRUdJTg==".to_owned(),
                },
            },
        );
        self
    }
}

impl ClusterSource for Clusters {
    fn get_cluster(
        &self,
        identity: &ClusterIdentity,
    ) -> Result<KubernetesClusterStatus, LookupError> {
        self.0
            .get(&(identity.name.clone(), identity.namespace.clone()))
            .cloned()
            .ok_or_else(|| LookupError::NotFound(identity.clone()))
    }
}

fn login<'a>(source: &'a Clusters, kubeconfig: &Path) -> Login<'a> {
    let mut login = Login::new(source, kubeconfig.to_owned());
    login.helper = HelperCommand::Fixed(PathBuf::from(HELPER));
    login
}

fn switching() -> LoginOptions {
    LoginOptions {
        switch_current_context: true,
        ..Default::default()
    }
}

const STAGING: &str = r#"apiVersion: v1
kind: Config
clusters:
- name: staging/team-b
  cluster:
    server: https://staging.example.com
contexts:
- name: staging/team-b
  context:
    cluster: staging/team-b
    user: staging/team-b
current-context: staging/team-b
preferences: {}
users:
- name: staging/team-b
  user:
    token: abc
"#;

#[test]
fn first_login_creates_kubeconfig() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config");
    let clusters = Clusters::default().with("prod", "team-a", "https://api.prod.example.com");

    let outcome = login(&clusters, &path)
        .login("prod", "team-a", &switching())
        .unwrap();
    assert_eq!(outcome.context, "prod/team-a");
    assert!(outcome.switched);
    assert!(!outcome.verified);

    let kc = store::load(&path).unwrap();
    assert_eq!(kc.current_context(), Some("prod/team-a"));
    assert_eq!(kc.clusters.len(), 1);
    assert_eq!(kc.users.len(), 1);
    assert_eq!(kc.contexts.len(), 1);

    let exec = kc.user("prod/team-a").unwrap().exec.as_ref().unwrap();
    assert_eq!(exec.command, HELPER);
    assert_eq!(
        exec.args,
        ["auth", "oidc", "https://auth.example.com/realms/nine", "nine-cluster"]
    );
    assert_eq!(
        kc.cluster("prod/team-a").unwrap().certificate_authority_data.as_deref(),
        Some("LS0tLS1CRUdJTg==")
    );
}

#[test]
fn first_login_without_switch_leaves_current_unset() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config");
    let clusters = Clusters::default().with("prod", "team-a", "https://api.prod.example.com");

    login(&clusters, &path)
        .login("prod/team-a", "", &LoginOptions::default())
        .unwrap();

    let kc = store::load(&path).unwrap();
    assert_eq!(kc.current_context(), None);
    assert_eq!(kc.contexts.len(), 1);
}

#[test]
fn repeated_login_keeps_other_current_context() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config");
    fs::write(&path, STAGING).unwrap();
    let clusters = Clusters::default().with("prod", "team-a", "https://api.prod.example.com");
    let login = login(&clusters, &path);

    login.login("prod/team-a", "other", &LoginOptions::default()).unwrap();
    let first = store::load(&path).unwrap();
    login.login("prod/team-a", "other", &LoginOptions::default()).unwrap();
    let second = store::load(&path).unwrap();

    assert_eq!(first, second);
    assert_eq!(second.current_context(), Some("staging/team-b"));
    let names: Vec<_> = second.contexts.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, ["staging/team-b", "prod/team-a"]);
    assert_eq!(second.user("staging/team-b").unwrap().token.as_deref(), Some("abc"));
}

#[test]
fn context_name_override() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config");
    let clusters = Clusters::default().with("prod", "team-a", "https://api.prod.example.com");

    let outcome = login(&clusters, &path)
        .login(
            "prod/team-a",
            "",
            &LoginOptions {
                context_name: Some("prod".to_owned()),
                switch_current_context: true,
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(outcome.context, "prod");
    let kc = store::load(&path).unwrap();
    assert_eq!(kc.current_context(), Some("prod"));
    assert_eq!(kc.context("prod").unwrap().cluster, "prod");
}

#[test]
fn two_slashes_fail_before_lookup() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config");
    let clusters = Clusters::default();

    let err = login(&clusters, &path)
        .login("a/b/c", "team-a", &switching())
        .unwrap_err();
    assert_eq!(err.step, Step::Resolving);
    assert!(matches!(
        err.cause,
        LoginFailure::Resolve(ResolveError::InvalidIdentifier { .. })
    ));
    assert!(!path.exists());
}

#[test]
fn empty_namespace_fails() {
    let dir = tempfile::tempdir().unwrap();
    let clusters = Clusters::default();
    let err = login(&clusters, &dir.path().join("config"))
        .login("prod", "", &switching())
        .unwrap_err();
    assert!(matches!(
        err.cause,
        LoginFailure::Resolve(ResolveError::InvalidIdentifier { .. })
    ));
}

#[test]
fn unknown_cluster_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let clusters = Clusters::default();
    let err = login(&clusters, &dir.path().join("config"))
        .login("prod", "team-a", &switching())
        .unwrap_err();
    assert_eq!(err.step, Step::Resolving);
    assert!(matches!(
        err.cause,
        LoginFailure::Resolve(ResolveError::Lookup(LookupError::NotFound(_)))
    ));
}

#[test]
fn empty_endpoint_leaves_kubeconfig_alone() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config");
    fs::write(&path, STAGING).unwrap();
    let clusters = Clusters::default().with("prod", "team-a", "");

    let err = login(&clusters, &path)
        .login("prod/team-a", "", &switching())
        .unwrap_err();
    assert_eq!(err.step, Step::Resolving);
    assert!(matches!(
        err.cause,
        LoginFailure::Resolve(ResolveError::IncompleteStatus { .. })
    ));
    assert_eq!(fs::read_to_string(&path).unwrap(), STAGING);
}

#[test]
fn corrupt_kubeconfig_is_reported_not_replaced() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config");
    fs::write(&path, "users: {{{").unwrap();
    let clusters = Clusters::default().with("prod", "team-a", "https://api.prod.example.com");

    let err = login(&clusters, &path)
        .login("prod/team-a", "", &switching())
        .unwrap_err();
    assert_eq!(err.step, Step::Merging);
    assert!(matches!(
        err.cause,
        LoginFailure::Store(StoreError::CorruptExisting { .. })
    ));
    assert_eq!(fs::read_to_string(&path).unwrap(), "users: {{{");
}

#[cfg(unix)]
#[test]
fn failed_exec_plugin_keeps_entries() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config");
    let clusters = Clusters::default().with("prod", "team-a", "https://api.prod.example.com");
    let mut login = Login::new(&clusters, path.clone());
    login.helper = HelperCommand::Fixed(PathBuf::from("false"));

    let err = login
        .login(
            "prod/team-a",
            "",
            &LoginOptions {
                run_exec_plugin: true,
                switch_current_context: true,
                ..Default::default()
            },
        )
        .unwrap_err();
    assert_eq!(err.step, Step::Verifying);
    assert!(matches!(err.cause, LoginFailure::Exec(_)));

    let kc = store::load(&path).unwrap();
    assert_eq!(kc.current_context(), Some("prod/team-a"));
    assert_eq!(kc.user("prod/team-a").unwrap().exec.as_ref().unwrap().command, "false");
}

#[cfg(unix)]
#[test]
fn successful_exec_plugin_verifies() {
    let dir = tempfile::tempdir().unwrap();
    let clusters = Clusters::default().with("prod", "team-a", "https://api.prod.example.com");
    let mut login = Login::new(&clusters, dir.path().join("config"));
    login.helper = HelperCommand::Fixed(PathBuf::from("true"));

    let outcome = login
        .login(
            "prod/team-a",
            "",
            &LoginOptions {
                run_exec_plugin: true,
                ..Default::default()
            },
        )
        .unwrap();
    assert!(outcome.verified);
    assert!(!outcome.switched);
}
