//! # davcopy
//!
//! Server-to-server ("third-party") copies between HTTP/WebDAV endpoints,
//! authorised with macaroons and driven over mutual TLS.
//!
//! The client never touches the file bytes. It asks the destination for a
//! short-lived bearer token restricted by caveats, then sends a WebDAV `COPY`
//! carrying that token to the source, which pushes the data directly.
//!
//! ## Components
//!
//! - **Transport**: client certificate, CA directory and verification policy
//!   turned into a [`reqwest::Client`] ([`transport`])
//! - **Token service client**: macaroon requests with activity and expiry
//!   caveats ([`token`])
//! - **Redirect executor**: redirect chasing for `COPY` with body replay
//!   ([`redirect`])
//! - **Transfer orchestrator**: token, then copy ([`transfer`])
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use davcopy::{ClientParameters, do_third_party_copy};
//!
//! # async fn example() -> davcopy::Result<()> {
//! let params = ClientParameters::new("/tmp/x509up_u1000", "", "/etc/grid-security/certificates");
//! do_third_party_copy(
//!     &params,
//!     Duration::from_secs(300),
//!     "https://source.example.org/data/file",
//!     "https://dest.example.org/data/file",
//! )
//! .await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod credentials;
pub mod error;
pub mod redirect;
pub mod token;
pub mod transfer;
pub mod transport;

pub use config::{ClientParameters, TransferOptions};
pub use credentials::{CredentialLocator, EnvCredentialLocator};
pub use error::{Error, Result};
pub use redirect::{ReplayableRequest, RequestBody, execute_with_redirects};
pub use token::{Activity, TokenRequest, TokenResponse, TokenUris, request_token};
pub use transfer::{
    TransferRequest, do_third_party_copy, do_third_party_copy_with, get_token, request_copy,
};
pub use transport::{Transport, build_client, build_transport};
