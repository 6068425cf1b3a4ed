//! The kubeconfig document exactly as it sits on disk.
//!
//! Every struct keeps the fields it does not know about in `extra`, so a file
//! written by another tool survives a load/save cycle untouched.

use std::path::PathBuf;

use serde::*;
use serde_yaml::Mapping;

/// Accepts an explicit `null` where a list is expected. client-go writes
/// `clusters: null` for an empty config.
fn null_as_default<'de, D, T>(de: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(de)?.unwrap_or_default())
}

// region: Context
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct ContextSpec {
    #[serde(default)]
    pub cluster: String,
    #[serde(default)]
    pub user: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(flatten)]
    pub extra: Mapping,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Context {
    pub name: String,
    pub context: ContextSpec,
}
// endregion

// region: Cluster
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "kebab-case")]
pub struct ClusterSpec {
    #[serde(default)]
    pub server: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certificate_authority_data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certificate_authority: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub insecure_skip_tls_verify: Option<bool>,
    #[serde(flatten)]
    pub extra: Mapping,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Cluster {
    pub name: String,
    pub cluster: ClusterSpec,
}
// endregion

// region: User
/// How `kubectl` and friends may prompt when running an exec plugin.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum InteractiveMode {
    Never,
    IfAvailable,
    Always,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ExecEnvVar {
    pub name: String,
    pub value: String,
}

/// An exec credential plugin invocation, as understood by client-go.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExecConfig {
    pub api_version: String,
    pub command: String,
    #[serde(default, deserialize_with = "null_as_default", skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default", skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<ExecEnvVar>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub provide_cluster_info: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interactive_mode: Option<InteractiveMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub install_hint: Option<String>,
    #[serde(flatten)]
    pub extra: Mapping,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "kebab-case")]
pub struct UserSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_certificate: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_certificate_data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_key: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_key_data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exec: Option<ExecConfig>,
    #[serde(flatten)]
    pub extra: Mapping,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct User {
    pub name: String,
    pub user: UserSpec,
}
// endregion

// region: Common
fn default_api_version() -> String {
    "v1".to_owned()
}

fn default_kind() -> String {
    "Config".to_owned()
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct KubeConfig {
    #[serde(rename = "apiVersion", default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "default_kind")]
    pub kind: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub clusters: Vec<Cluster>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub contexts: Vec<Context>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub current_context: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub preferences: Mapping,
    #[serde(default, deserialize_with = "null_as_default")]
    pub users: Vec<User>,
    #[serde(flatten)]
    pub extra: Mapping,
}

impl Default for KubeConfig {
    fn default() -> Self {
        Self {
            api_version: default_api_version(),
            kind: default_kind(),
            clusters: Vec::new(),
            contexts: Vec::new(),
            current_context: String::new(),
            preferences: Mapping::new(),
            users: Vec::new(),
            extra: Mapping::new(),
        }
    }
}

impl KubeConfig {
    /// Parses a document. Blank input is an empty config, like `kubectl` treats it.
    pub fn from_yaml(text: &str) -> Result<KubeConfig, serde_yaml::Error> {
        if text.trim().is_empty() {
            return Ok(KubeConfig::default());
        }
        serde_yaml::from_str(text)
    }

    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }

    /// The current context, if one is set.
    pub fn current_context(&self) -> Option<&str> {
        Some(self.current_context.as_str()).filter(|name| !name.is_empty())
    }

    pub fn context(&self, name: &str) -> Option<&ContextSpec> {
        self.contexts
            .iter()
            .find(|ctx| ctx.name == name)
            .map(|ctx| &ctx.context)
    }

    pub fn cluster(&self, name: &str) -> Option<&ClusterSpec> {
        self.clusters
            .iter()
            .find(|cls| cls.name == name)
            .map(|cls| &cls.cluster)
    }

    pub fn user(&self, name: &str) -> Option<&UserSpec> {
        self.users
            .iter()
            .find(|usr| usr.name == name)
            .map(|usr| &usr.user)
    }

    /// Namespace configured on the named context, ignoring an empty value.
    pub fn context_namespace(&self, name: &str) -> Option<&str> {
        self.context(name)
            .and_then(|ctx| ctx.namespace.as_deref())
            .filter(|ns| !ns.is_empty())
    }
}
// endregion
