//! Log in to OIDC-protected clusters and keep the kubeconfig in step.
//!
//! The pipeline is [`resolve`] → [`builder`] → [`store`], driven by
//! [`login::Login`], which can also run the exec plugin once to verify the
//! login straight away.

pub mod api;
pub mod builder;
pub mod direct;
pub mod exec;
pub mod login;
pub mod path;
pub mod resolve;
pub mod store;

pub use builder::{ClusterLogin, CredentialEntry, LoginOptions};
pub use direct::KubeConfig;
pub use exec::{CancelToken, ExecRunner};
pub use login::{HelperCommand, Login, LoginError, LoginOutcome, Step};
pub use path::KubeconfigPath;
pub use resolve::{ClusterIdentity, ClusterSource};
