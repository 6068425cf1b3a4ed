//! Loading, merging and saving the kubeconfig file.
//!
//! Other tools share this file, so a merge only ever touches the three
//! entries it upserts. Entries keep their position; new ones are appended.
//! There is no cross-process lock: load, merge and write happen back to back
//! and the last writer wins.

use std::fs;
use std::io::{self, Write as _};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::builder::CredentialEntry;
use crate::direct::KubeConfig;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("unable to read kubeconfig {}", path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("existing kubeconfig {} could not be parsed, refusing to overwrite it", path.display())]
    CorruptExisting {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("unable to serialize kubeconfig")]
    Serialize(#[source] serde_yaml::Error),

    #[error("unable to write kubeconfig {}", path.display())]
    NotWritable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Reads the kubeconfig at `path`. A missing file is an empty config.
pub fn load(path: &Path) -> Result<KubeConfig, StoreError> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "no kubeconfig yet, starting empty");
            return Ok(KubeConfig::default());
        }
        Err(source) => {
            return Err(StoreError::Unreadable {
                path: path.to_owned(),
                source,
            })
        }
    };

    KubeConfig::from_yaml(&text).map_err(|source| StoreError::CorruptExisting {
        path: path.to_owned(),
        source,
    })
}

fn upsert<T>(entries: &mut Vec<T>, entry: T, name: impl Fn(&T) -> &str) {
    match entries.iter().position(|e| name(e) == name(&entry)) {
        Some(at) => entries[at] = entry,
        None => entries.push(entry),
    }
}

impl KubeConfig {
    /// Upserts the entry's cluster, user and context by name.
    pub fn merge(&mut self, entry: &CredentialEntry, set_current: bool) {
        upsert(&mut self.clusters, entry.cluster.clone(), |c| c.name.as_str());
        upsert(&mut self.users, entry.user.clone(), |u| u.name.as_str());
        upsert(&mut self.contexts, entry.context.clone(), |c| c.name.as_str());

        if set_current {
            self.current_context = entry.context.name.clone();
        }
    }
}

/// Serializes `config` completely, then atomically replaces `path` with it.
/// A symlinked kubeconfig is written through, its target is replaced.
/// The file ends up readable by its owner only.
pub fn persist(path: &Path, config: &KubeConfig) -> Result<(), StoreError> {
    let text = config.to_yaml().map_err(StoreError::Serialize)?;

    let not_writable = |source| StoreError::NotWritable {
        path: path.to_owned(),
        source,
    };

    let target = write_target(path).map_err(not_writable)?;
    let path = target.as_path();

    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).map_err(not_writable)?;

    let mut file = tempfile::Builder::new()
        .prefix(".kubeconfig")
        .tempfile_in(dir)
        .map_err(not_writable)?;
    restrict_to_owner(file.as_file()).map_err(not_writable)?;
    file.write_all(text.as_bytes()).map_err(not_writable)?;
    file.as_file().sync_all().map_err(not_writable)?;
    file.persist(path).map_err(|e| not_writable(e.error))?;

    Ok(())
}

/// The file a write to `path` has to land in: `path` itself unless it is a
/// symlink to an existing file.
fn write_target(path: &Path) -> io::Result<PathBuf> {
    match fs::canonicalize(path) {
        Ok(target) => Ok(target),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(path.to_owned()),
        Err(e) => Err(e),
    }
}

#[cfg(unix)]
fn restrict_to_owner(file: &fs::File) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_to_owner(_: &fs::File) -> io::Result<()> {
    Ok(())
}

/// Load, merge and persist in one go.
pub fn merge_and_persist(
    path: &Path,
    entry: &CredentialEntry,
    set_current: bool,
) -> Result<KubeConfig, StoreError> {
    let mut config = load(path)?;
    config.merge(entry, set_current);
    persist(path, &config)?;

    info!(
        path = %path.display(),
        context = entry.name(),
        current = set_current,
        "kubeconfig updated"
    );
    Ok(config)
}
