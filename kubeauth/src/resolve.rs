//! Turning a cluster argument into connection details.

use std::fmt;

use base64::Engine as _;
use serde::Deserialize;
use tracing::debug;
use url::Url;

/// A managed cluster, addressed by name and namespace in the resource API.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClusterIdentity {
    pub name: String,
    pub namespace: String,
}

impl ClusterIdentity {
    /// Parses `name` or `name/namespace`. An explicit namespace beats
    /// `ambient_namespace`.
    pub fn parse(raw: &str, ambient_namespace: &str) -> Result<Self, ResolveError> {
        let invalid = |reason| ResolveError::InvalidIdentifier {
            raw: raw.to_owned(),
            reason,
        };

        let (name, namespace) = match raw.split_once('/') {
            None => (raw, ambient_namespace),
            Some((_, rest)) if rest.contains('/') => {
                return Err(invalid("expected `name` or `name/namespace`"))
            }
            Some((name, namespace)) => (name, namespace),
        };

        if name.is_empty() {
            return Err(invalid("cluster name cannot be empty"));
        }
        if namespace.is_empty() {
            return Err(invalid("namespace cannot be empty"));
        }

        Ok(Self {
            name: name.to_owned(),
            namespace: namespace.to_owned(),
        })
    }

    /// The default name of the kubeconfig context for this cluster.
    pub fn context_name(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ClusterIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.name, self.namespace)
    }
}

// region: Resource
/// `status` of a `KubernetesCluster` resource, trimmed to what login needs.
#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KubernetesClusterStatus {
    #[serde(default)]
    pub at_provider: KubernetesClusterObservation,
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
pub struct KubernetesClusterObservation {
    #[serde(rename = "apiEndpoint", default)]
    pub api_endpoint: String,
    #[serde(rename = "oidcIssuerURL", default)]
    pub oidc_issuer_url: String,
    #[serde(rename = "oidcClientID", default)]
    pub oidc_client_id: String,
    /// Base64 encoded PEM bundle.
    #[serde(rename = "apiCACert", default)]
    pub api_ca_cert: String,
}

#[derive(Debug, thiserror::Error)]
pub enum LookupError {
    #[error("cluster {0} not found")]
    NotFound(ClusterIdentity),

    #[error("unable to get cluster {identity}")]
    Upstream {
        identity: ClusterIdentity,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// The resource API, as far as login is concerned: one point lookup.
pub trait ClusterSource {
    fn get_cluster(
        &self,
        identity: &ClusterIdentity,
    ) -> Result<KubernetesClusterStatus, LookupError>;
}
// endregion

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("invalid cluster identifier {raw:?}: {reason}")]
    InvalidIdentifier { raw: String, reason: &'static str },

    #[error(transparent)]
    Lookup(#[from] LookupError),

    #[error("cluster status is incomplete: {field} {reason}")]
    IncompleteStatus { field: &'static str, reason: String },

    #[error("unable to decode API CA certificate")]
    InvalidEncoding(#[source] base64::DecodeError),
}

/// Where and how to reach one cluster.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionInfo {
    pub api_endpoint: Url,
    pub oidc_issuer_url: Url,
    pub oidc_client_id: String,
    pub ca_certificate: Vec<u8>,
}

fn parse_url(field: &'static str, raw: &str) -> Result<Url, ResolveError> {
    let url = Url::parse(raw).map_err(|e| ResolveError::IncompleteStatus {
        field,
        reason: format!("is not a valid URL ({raw:?}: {e})"),
    })?;
    if !url.has_host() {
        return Err(ResolveError::IncompleteStatus {
            field,
            reason: format!("has no host ({raw:?})"),
        });
    }
    Ok(url)
}

impl ConnectionInfo {
    pub fn from_status(status: &KubernetesClusterStatus) -> Result<Self, ResolveError> {
        let observed = &status.at_provider;

        let api_endpoint = parse_url("apiEndpoint", &observed.api_endpoint)?;
        let oidc_issuer_url = parse_url("oidcIssuerURL", &observed.oidc_issuer_url)?;
        if observed.oidc_client_id.is_empty() {
            return Err(ResolveError::IncompleteStatus {
                field: "oidcClientID",
                reason: "is empty".to_owned(),
            });
        }
        let ca_certificate = base64::engine::general_purpose::STANDARD
            .decode(observed.api_ca_cert.trim())
            .map_err(ResolveError::InvalidEncoding)?;

        Ok(Self {
            api_endpoint,
            oidc_issuer_url,
            oidc_client_id: observed.oidc_client_id.clone(),
            ca_certificate,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedCluster {
    pub identity: ClusterIdentity,
    pub connection: ConnectionInfo,
}

/// Validates `raw`, looks the cluster up once and extracts its connection
/// details. Nothing is retried.
pub fn resolve(
    source: &dyn ClusterSource,
    raw: &str,
    ambient_namespace: &str,
) -> Result<ResolvedCluster, ResolveError> {
    let identity = ClusterIdentity::parse(raw, ambient_namespace)?;
    debug!(cluster = %identity, "looking up cluster");

    let status = source.get_cluster(&identity)?;
    let connection = ConnectionInfo::from_status(&status)?;
    debug!(
        cluster = %identity,
        endpoint = %connection.api_endpoint,
        issuer = %connection.oidc_issuer_url,
        "resolved cluster connection"
    );

    Ok(ResolvedCluster {
        identity,
        connection,
    })
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use rstest::rstest;

    use super::*;

    fn status(endpoint: &str, issuer: &str, ca: &str) -> KubernetesClusterStatus {
        KubernetesClusterStatus {
            at_provider: KubernetesClusterObservation {
                api_endpoint: endpoint.to_owned(),
                oidc_issuer_url: issuer.to_owned(),
                oidc_client_id: "nine-login".to_owned(),
                api_ca_cert: ca.to_owned(),
            },
        }
    }

    struct Single {
        status: KubernetesClusterStatus,
        calls: Cell<usize>,
    }

    impl ClusterSource for Single {
        fn get_cluster(
            &self,
            _: &ClusterIdentity,
        ) -> Result<KubernetesClusterStatus, LookupError> {
            self.calls.set(self.calls.get() + 1);
            Ok(self.status.clone())
        }
    }

    #[rstest]
    #[case("prod/team-a", "other", "prod", "team-a")]
    #[case("prod/team-a", "", "prod", "team-a")]
    #[case("prod", "team-b", "prod", "team-b")]
    fn parses_identity(
        #[case] raw: &str,
        #[case] ambient: &str,
        #[case] name: &str,
        #[case] namespace: &str,
    ) {
        let id = ClusterIdentity::parse(raw, ambient).unwrap();
        assert_eq!(id.name, name);
        assert_eq!(id.namespace, namespace);
    }

    #[rstest]
    #[case("prod", "")]
    #[case("prod/", "team-a")]
    #[case("/team-a", "team-a")]
    #[case("a/b/c", "team-a")]
    #[case("", "team-a")]
    fn rejects_identity(#[case] raw: &str, #[case] ambient: &str) {
        let err = ClusterIdentity::parse(raw, ambient).unwrap_err();
        assert!(matches!(err, ResolveError::InvalidIdentifier { .. }), "{err:?}");
    }

    #[test]
    fn context_name_is_name_slash_namespace() {
        let id = ClusterIdentity::parse("prod", "team-a").unwrap();
        assert_eq!(id.context_name(), "prod/team-a");
    }

    #[test]
    fn invalid_identifier_skips_lookup() {
        let source = Single {
            status: status("https://api.example.com", "https://auth.example.com", ""),
            calls: Cell::new(0),
        };
        let err = resolve(&source, "a/b/c", "team-a").unwrap_err();
        assert!(matches!(err, ResolveError::InvalidIdentifier { .. }));
        assert_eq!(source.calls.get(), 0);
    }

    #[test]
    fn extracts_connection_info() {
        let source = Single {
            status: status(
                "https://api.prod.example.com:6443",
                "https://auth.example.com/realms/nine",
                "LS0tLS1CRUdJTg==",
            ),
            calls: Cell::new(0),
        };
        let resolved = resolve(&source, "prod", "team-a").unwrap();
        assert_eq!(source.calls.get(), 1);
        assert_eq!(resolved.connection.api_endpoint.host_str(), Some("api.prod.example.com"));
        assert_eq!(resolved.connection.oidc_client_id, "nine-login");
        assert_eq!(resolved.connection.ca_certificate, b"-----BEGIN");
    }

    #[test]
    fn empty_endpoint_is_incomplete() {
        let err = ConnectionInfo::from_status(&status("", "https://auth.example.com", ""))
            .unwrap_err();
        assert!(
            matches!(err, ResolveError::IncompleteStatus { field: "apiEndpoint", .. }),
            "{err:?}"
        );
    }

    #[test]
    fn bad_issuer_is_incomplete() {
        let err = ConnectionInfo::from_status(&status("https://api.example.com", "not a url", ""))
            .unwrap_err();
        assert!(matches!(
            err,
            ResolveError::IncompleteStatus { field: "oidcIssuerURL", .. }
        ));
    }

    #[test]
    fn bad_ca_is_invalid_encoding() {
        let err = ConnectionInfo::from_status(&status(
            "https://api.example.com",
            "https://auth.example.com",
            "%%% not base64",
        ))
        .unwrap_err();
        assert!(matches!(err, ResolveError::InvalidEncoding(_)));
    }

    #[test]
    fn status_deserializes_from_resource_json() {
        let status: KubernetesClusterStatus = serde_json::from_value(serde_json::json!({
            "atProvider": {
                "apiEndpoint": "https://api.example.com",
                "oidcIssuerURL": "https://auth.example.com",
                "oidcClientID": "client",
                "apiCACert": "",
                "klusterletVersion": "ignored"
            },
            "conditions": []
        }))
        .unwrap();
        assert_eq!(status.at_provider.oidc_client_id, "client");
        assert_eq!(status.at_provider.api_endpoint, "https://api.example.com");
    }
}
