//! Locating the kubeconfig file.
//!
//! A [`KubeconfigPath`] is an ordered list of [`PathSource`]s. Every source
//! contributes zero or more candidate files; the first candidate that exists
//! wins, otherwise the first candidate is used so a fresh file gets created
//! where `kubectl` would look for it.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use tracing::debug;

/// Environment variable holding a kubeconfig path list.
pub const KUBECONFIG_ENV: &str = "KUBECONFIG";

pub fn kube_dir(home: &Path) -> PathBuf {
    home.join(".kube")
}

pub fn default_kubeconfig(home: &Path) -> PathBuf {
    kube_dir(home).join("config")
}

/// One place a kubeconfig path can come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSource {
    /// A path given explicitly, e.g. on the command line.
    Explicit(PathBuf),
    /// A path list in the named environment variable.
    EnvList(String),
    /// `.kube/config` below `$HOME`.
    Home,
    /// `.kube/config` below the home directory of the current OS user. Only
    /// consulted when `$HOME` is not set.
    UserLookup,
}

/// What a [`PathSource`] reads from the process. Swappable so tests never
/// depend on the real environment.
pub trait Environment {
    fn var_os(&self, key: &str) -> Option<OsString>;
    fn user_home(&self) -> Option<PathBuf>;
}

/// The real process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl Environment for ProcessEnv {
    fn var_os(&self, key: &str) -> Option<OsString> {
        std::env::var_os(key)
    }

    fn user_home(&self) -> Option<PathBuf> {
        dirs::home_dir()
    }
}

impl PathSource {
    fn candidates(&self, env: &dyn Environment) -> Vec<PathBuf> {
        match self {
            PathSource::Explicit(path) => vec![path.clone()],
            PathSource::EnvList(var) => match env.var_os(var) {
                Some(value) => std::env::split_paths(&value)
                    .filter(|p| !p.as_os_str().is_empty())
                    .collect(),
                None => Vec::new(),
            },
            PathSource::Home => env
                .var_os("HOME")
                .filter(|home| !home.is_empty())
                .map(|home| default_kubeconfig(Path::new(&home)))
                .into_iter()
                .collect(),
            PathSource::UserLookup => {
                if env.var_os("HOME").is_some_and(|home| !home.is_empty()) {
                    return Vec::new();
                }
                env.user_home()
                    .map(|home| default_kubeconfig(&home))
                    .into_iter()
                    .collect()
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KubeconfigPath {
    sources: Vec<PathSource>,
}

#[derive(Debug, thiserror::Error)]
#[error("no kubeconfig location could be determined (tried {0:?})")]
pub struct NoKubeconfigPath(pub Vec<PathSource>);

impl KubeconfigPath {
    pub fn new(sources: Vec<PathSource>) -> Self {
        Self { sources }
    }

    /// `$KUBECONFIG`, then `~/.kube/config`, then the OS user's home.
    pub fn standard() -> Self {
        Self::new(vec![
            PathSource::EnvList(KUBECONFIG_ENV.to_owned()),
            PathSource::Home,
            PathSource::UserLookup,
        ])
    }

    /// Like [`KubeconfigPath::standard`], but an explicit path short-circuits
    /// everything else.
    pub fn with_override(explicit: Option<PathBuf>) -> Self {
        match explicit {
            Some(path) => Self::new(vec![PathSource::Explicit(path)]),
            None => Self::standard(),
        }
    }

    pub fn resolve(&self) -> Result<PathBuf, NoKubeconfigPath> {
        self.resolve_in(&ProcessEnv)
    }

    pub fn resolve_in(&self, env: &dyn Environment) -> Result<PathBuf, NoKubeconfigPath> {
        // A source that yields anything ends the search, the lower ones are
        // fallbacks only.
        let candidates = self
            .sources
            .iter()
            .map(|source| source.candidates(env))
            .find(|found| !found.is_empty())
            .unwrap_or_default();

        let chosen = candidates
            .iter()
            .find(|path| path.exists())
            .or_else(|| candidates.first())
            .cloned()
            .ok_or_else(|| NoKubeconfigPath(self.sources.clone()))?;
        debug!(path = %chosen.display(), "resolved kubeconfig path");
        Ok(chosen)
    }
}

impl Default for KubeconfigPath {
    fn default() -> Self {
        Self::standard()
    }
}
