//! Mutual-TLS transport construction.
//!
//! Loads the client certificate/key pair and the trusted CA directory and
//! turns them into a [`reqwest::Client`] that never follows redirects on its
//! own; redirects are handled by [`crate::redirect`].

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use reqwest::{Certificate, Client, Identity, redirect};
use rustls::RootCertStore;
use rustls::pki_types::CertificateDer;
use rustls::pki_types::pem::PemObject;

use crate::config::ClientParameters;
use crate::error::{Error, Result};

/// A client certificate and its private key, ready to present during the handshake
pub struct ClientIdentity {
    cert_path: PathBuf,
    key_path: PathBuf,
    identity: Identity,
}

impl ClientIdentity {
    /// Load a PEM certificate chain and private key.
    ///
    /// When both paths are the same file it is read once, so proxy
    /// certificates carrying the key inline work as is.
    pub fn load(cert_path: &Path, key_path: &Path) -> Result<Self> {
        let mut pem = fs::read(cert_path).map_err(|e| Error::Credential {
            path: cert_path.to_path_buf(),
            reason: e.to_string(),
        })?;

        if key_path != cert_path {
            let key = fs::read(key_path).map_err(|e| Error::Credential {
                path: key_path.to_path_buf(),
                reason: e.to_string(),
            })?;
            pem.push(b'\n');
            pem.extend_from_slice(&key);
        }

        let identity = Identity::from_pem(&pem).map_err(|e| Error::Credential {
            path: cert_path.to_path_buf(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            cert_path: cert_path.to_path_buf(),
            key_path: key_path.to_path_buf(),
            identity,
        })
    }

    pub fn cert_path(&self) -> &Path {
        &self.cert_path
    }

    pub fn key_path(&self) -> &Path {
        &self.key_path
    }
}

impl fmt::Debug for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientIdentity")
            .field("cert_path", &self.cert_path)
            .field("key_path", &self.key_path)
            .finish_non_exhaustive()
    }
}

/// One CA certificate loaded from the trust directory
#[derive(Debug, Clone)]
pub struct CaCertificate {
    /// File the certificate was read from
    pub source: PathBuf,
    der: CertificateDer<'static>,
}

impl CaCertificate {
    pub fn der(&self) -> &[u8] {
        self.der.as_ref()
    }

    /// Identity used in diagnostics: the file name, which in hashed CA
    /// directories is the subject hash.
    pub fn identity(&self) -> String {
        self.source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.source.display().to_string())
    }
}

/// Trusted CA certificates loaded from a directory
#[derive(Debug, Clone, Default)]
pub struct TrustStore {
    certificates: Vec<CaCertificate>,
}

impl TrustStore {
    /// Load every PEM certificate found in `dir`.
    ///
    /// Files that are not certificates (signing policies, namespaces, CRLs)
    /// are skipped, and so are certificates that do not parse as trust
    /// anchors. An empty directory yields an empty store.
    pub fn load(dir: &Path) -> Result<Self> {
        let trust_err = |source| Error::TrustStore {
            path: dir.to_path_buf(),
            source,
        };

        let mut candidates = Vec::new();
        for entry in fs::read_dir(dir).map_err(trust_err)? {
            let path = entry.map_err(trust_err)?.path();
            if path.is_file() && is_certificate_file(&path) {
                candidates.push(path);
            }
        }
        candidates.sort();

        // Trial store: drops DER that frames as PEM but is not a trust anchor.
        let mut anchors = RootCertStore::empty();
        let mut certificates = Vec::new();
        for path in candidates {
            let pem = match fs::read(&path) {
                Ok(pem) => pem,
                Err(e) => {
                    tracing::trace!("skipping unreadable CA file {}: {}", path.display(), e);
                    continue;
                }
            };

            let ders = match CertificateDer::pem_slice_iter(&pem)
                .collect::<std::result::Result<Vec<_>, _>>()
            {
                Ok(ders) => ders,
                Err(e) => {
                    tracing::trace!("skipping {}: {}", path.display(), e);
                    continue;
                }
            };

            let mut loaded = 0;
            for der in ders {
                match anchors.add(der.clone()) {
                    Ok(()) => {
                        loaded += 1;
                        certificates.push(CaCertificate {
                            source: path.clone(),
                            der,
                        });
                    }
                    Err(e) => tracing::trace!("skipping certificate in {}: {}", path.display(), e),
                }
            }

            if loaded > 0 {
                tracing::debug!("CA: {} ({} certificate(s))", path.display(), loaded);
            } else {
                tracing::trace!("no usable certificate in {}", path.display());
            }
        }

        Ok(Self { certificates })
    }

    pub fn certificates(&self) -> &[CaCertificate] {
        &self.certificates
    }

    pub fn len(&self) -> usize {
        self.certificates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.certificates.is_empty()
    }
}

// Hashed CA directories name certificates `<hash>.<n>`; CRLs are `<hash>.r<n>`.
fn is_certificate_file(path: &Path) -> bool {
    match path.extension().and_then(|e| e.to_str()) {
        Some("pem" | "crt" | "cer") => true,
        Some(ext) => !ext.is_empty() && ext.bytes().all(|b| b.is_ascii_digit()),
        None => false,
    }
}

/// TLS material for a mutually authenticated HTTP client
#[derive(Debug)]
pub struct Transport {
    identity: Option<ClientIdentity>,
    trust_store: TrustStore,
    insecure: bool,
}

impl Transport {
    /// Load credentials and trust anchors described by `params`.
    pub fn build(params: &ClientParameters) -> Result<Self> {
        tracing::debug!("User cert: {}", params.cert_path().display());
        tracing::debug!("User key: {}", params.key_path().display());

        let identity = if params.has_client_cert() {
            Some(ClientIdentity::load(params.cert_path(), params.key_path())?)
        } else {
            None
        };

        tracing::debug!("CA Path: {}", params.ca_path.display());
        let trust_store = TrustStore::load(&params.ca_path)?;
        if trust_store.is_empty() {
            tracing::warn!(
                "no CA certificates found in {}; server certificates will not validate",
                params.ca_path.display()
            );
        }

        Ok(Self {
            identity,
            trust_store,
            insecure: params.insecure,
        })
    }

    pub fn client_identity(&self) -> Option<&ClientIdentity> {
        self.identity.as_ref()
    }

    pub fn trust_store(&self) -> &TrustStore {
        &self.trust_store
    }

    pub fn insecure(&self) -> bool {
        self.insecure
    }

    /// Build an HTTP client from this transport. Redirects are not followed.
    ///
    /// Failures here are [`Error::ClientSetup`]; nothing has touched the
    /// network yet.
    pub fn into_client(self) -> Result<Client> {
        let mut builder = Client::builder()
            .use_rustls_tls()
            .tls_built_in_root_certs(false)
            .danger_accept_invalid_certs(self.insecure)
            .redirect(redirect::Policy::none());

        for ca in &self.trust_store.certificates {
            let certificate = Certificate::from_der(ca.der()).map_err(Error::ClientSetup)?;
            builder = builder.add_root_certificate(certificate);
        }

        if let Some(identity) = self.identity {
            builder = builder.identity(identity.identity);
        }

        builder.build().map_err(Error::ClientSetup)
    }
}

/// Load the transport described by `params`.
pub fn build_transport(params: &ClientParameters) -> Result<Transport> {
    Transport::build(params)
}

/// Build a ready-to-use client with no automatic redirect following.
pub fn build_client(params: &ClientParameters) -> Result<Client> {
    build_transport(params)?.into_client()
}
