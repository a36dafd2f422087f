use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::token::Activity;

/// Conventional location of the grid CA bundle directory.
pub const DEFAULT_CA_PATH: &str = "/etc/grid-security/certificates";

/// Token lifetime requested for the destination of a copy.
pub const DEFAULT_COPY_LIFETIME: Duration = Duration::from_secs(5 * 60);

/// Configuration for the mutually authenticated HTTP transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientParameters {
    /// Client certificate (PEM). Empty means no client certificate is presented.
    pub user_cert: PathBuf,

    /// Private key (PEM) for `user_cert`
    pub user_key: PathBuf,

    /// Directory holding trusted CA certificates
    pub ca_path: PathBuf,

    /// Skip verification of the server certificate
    pub insecure: bool,
}

impl ClientParameters {
    /// Create parameters for a certificate/key pair.
    ///
    /// An empty key path falls back to the certificate path, which is how
    /// proxy certificates bundle both in one file.
    pub fn new(
        user_cert: impl Into<PathBuf>,
        user_key: impl Into<PathBuf>,
        ca_path: impl Into<PathBuf>,
    ) -> Self {
        let user_cert = user_cert.into();
        let mut user_key = user_key.into();
        if user_key.as_os_str().is_empty() {
            user_key = user_cert.clone();
        }

        Self {
            user_cert,
            user_key,
            ca_path: ca_path.into(),
            insecure: false,
        }
    }

    /// Parameters without a client certificate, trusting `ca_path` only
    pub fn anonymous(ca_path: impl Into<PathBuf>) -> Self {
        Self::new(PathBuf::new(), PathBuf::new(), ca_path)
    }

    /// Set the CA directory
    pub fn with_ca_path(mut self, ca_path: impl Into<PathBuf>) -> Self {
        self.ca_path = ca_path.into();
        self
    }

    /// Disable or enable server certificate verification
    pub fn with_insecure(mut self, insecure: bool) -> Self {
        self.insecure = insecure;
        self
    }

    pub fn has_client_cert(&self) -> bool {
        !self.user_cert.as_os_str().is_empty()
    }

    pub fn cert_path(&self) -> &Path {
        &self.user_cert
    }

    pub fn key_path(&self) -> &Path {
        &self.user_key
    }
}

impl Default for ClientParameters {
    fn default() -> Self {
        Self::anonymous(DEFAULT_CA_PATH)
    }
}

/// Policy for the token requested from the copy destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOptions {
    /// Lifetime of the destination token. Zero requests no expiry caveat.
    pub lifetime: Duration,

    /// Activities the destination must authorise for the inbound push
    pub destination_activities: Vec<Activity>,
}

impl TransferOptions {
    pub fn new(lifetime: Duration) -> Self {
        Self {
            lifetime,
            ..Self::default()
        }
    }

    /// Override the activity set requested from the destination
    pub fn with_destination_activities(mut self, activities: Vec<Activity>) -> Self {
        self.destination_activities = activities;
        self
    }
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            lifetime: DEFAULT_COPY_LIFETIME,
            // The source pushes with PUT; LIST lets the destination check the
            // target collection before accepting it.
            destination_activities: vec![Activity::Upload, Activity::List],
        }
    }
}
