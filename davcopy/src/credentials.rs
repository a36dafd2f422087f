//! Default client credential discovery.
//!
//! The transport never looks for credentials itself; callers that were not
//! given an explicit certificate ask a [`CredentialLocator`] instead.

use std::env;
use std::path::PathBuf;

use crate::error::{Error, Result};

/// Finds a certificate and key when none was configured
pub trait CredentialLocator {
    /// Returns `(certificate, key)`; both may name the same proxy file.
    fn locate(&self) -> Result<(PathBuf, PathBuf)>;
}

/// Grid-style lookup through the environment and well-known paths.
///
/// Order: `X509_USER_PROXY`, `/tmp/x509up_u<uid>`, `X509_USER_CERT` /
/// `X509_USER_KEY`, then `~/.globus/usercert.pem` / `userkey.pem`.
#[derive(Debug, Clone)]
pub struct EnvCredentialLocator {
    lookup: fn(&str) -> Option<String>,
    home: Option<PathBuf>,
    tmp: PathBuf,
}

impl EnvCredentialLocator {
    pub fn new() -> Self {
        Self {
            lookup: |key| env::var(key).ok().filter(|v| !v.is_empty()),
            home: dirs::home_dir(),
            tmp: PathBuf::from("/tmp"),
        }
    }

    #[cfg(unix)]
    fn default_proxy(&self) -> Option<PathBuf> {
        let uid = nix::unistd::getuid();
        Some(self.tmp.join(format!("x509up_u{}", uid)))
    }

    #[cfg(not(unix))]
    fn default_proxy(&self) -> Option<PathBuf> {
        None
    }
}

impl Default for EnvCredentialLocator {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialLocator for EnvCredentialLocator {
    fn locate(&self) -> Result<(PathBuf, PathBuf)> {
        if let Some(proxy) = (self.lookup)("X509_USER_PROXY") {
            let proxy = PathBuf::from(proxy);
            return Ok((proxy.clone(), proxy));
        }

        if let Some(proxy) = self.default_proxy().filter(|p| p.is_file()) {
            return Ok((proxy.clone(), proxy));
        }

        if let Some(cert) = (self.lookup)("X509_USER_CERT") {
            let cert = PathBuf::from(cert);
            let key = (self.lookup)("X509_USER_KEY")
                .map(PathBuf::from)
                .unwrap_or_else(|| cert.clone());
            return Ok((cert, key));
        }

        if let Some(home) = &self.home {
            let globus = home.join(".globus");
            let (cert, key) = (globus.join("usercert.pem"), globus.join("userkey.pem"));
            if cert.is_file() && key.is_file() {
                return Ok((cert, key));
            }
        }

        Err(Error::CredentialLocation(
            "no proxy found and X509_USER_CERT is not set; pass --cert".to_string(),
        ))
    }
}
