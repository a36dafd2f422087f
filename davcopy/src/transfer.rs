use std::time::Duration;

use http::header::{HeaderName, HeaderValue};
use http::Method;
use reqwest::{Client, Response};
use url::Url;

use crate::config::{ClientParameters, TransferOptions};
use crate::error::{Error, Result};
use crate::redirect::{ReplayableRequest, execute_with_redirects};
use crate::token::{Activity, TokenRequest, TokenResponse, request_token};
use crate::transport::build_client;

/// WebDAV verb that triggers a server-side copy
pub const COPY_METHOD: &str = "COPY";

pub const DESTINATION: HeaderName = HeaderName::from_static("destination");
pub const X_NO_DELEGATE: HeaderName = HeaderName::from_static("x-no-delegate");
pub const TRANSFER_HEADER_AUTHORIZATION: HeaderName =
    HeaderName::from_static("transferheaderauthorization");

/// A third-party copy: `source` pushes to `destination` using `token`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub source: Url,
    pub destination: Url,
    pub token: String,
}

impl TransferRequest {
    pub fn new(source: Url, destination: Url, token: impl Into<String>) -> Self {
        Self {
            source,
            destination,
            token: token.into(),
        }
    }

    /// The `COPY` request sent to the source
    pub fn to_request(&self) -> Result<ReplayableRequest> {
        let method = Method::from_bytes(COPY_METHOD.as_bytes())
            .map_err(|e| Error::InvalidRequest(e.to_string()))?;

        let mut authorization = HeaderValue::from_str(&format!("BEARER {}", self.token))?;
        authorization.set_sensitive(true);

        Ok(ReplayableRequest::new(method, self.source.clone())
            .with_header(
                DESTINATION,
                HeaderValue::from_str(self.destination.as_str())?,
            )
            .with_header(X_NO_DELEGATE, HeaderValue::from_static("true"))
            .with_header(TRANSFER_HEADER_AUTHORIZATION, authorization))
    }
}

/// Request a token for `resource` on its own.
pub async fn get_token(
    params: &ClientParameters,
    lifetime: Duration,
    resource: &str,
    activities: Vec<Activity>,
) -> Result<TokenResponse> {
    let client = build_client(params)?;
    tracing::debug!("Created HTTP client");

    let request = TokenRequest::new(Url::parse(resource)?, activities).with_lifetime(lifetime);
    request_token(&client, &request).await
}

/// Copy `source` to `destination` with the default destination policy.
pub async fn do_third_party_copy(
    params: &ClientParameters,
    lifetime: Duration,
    source: &str,
    destination: &str,
) -> Result<()> {
    do_third_party_copy_with(params, &TransferOptions::new(lifetime), source, destination).await
}

/// Copy `source` to `destination`.
///
/// Obtains a token from the destination, then asks the source to push the
/// data there with a `COPY` request. Fails unless the final response, after
/// redirects, is 2xx.
pub async fn do_third_party_copy_with(
    params: &ClientParameters,
    options: &TransferOptions,
    source: &str,
    destination: &str,
) -> Result<()> {
    let source = Url::parse(source)?;
    let destination = Url::parse(destination)?;
    let client = build_client(params)?;

    let token_request = TokenRequest::new(
        destination.clone(),
        options.destination_activities.clone(),
    )
    .with_lifetime(options.lifetime);
    let token = request_token(&client, &token_request).await?;
    tracing::info!("Got token {}", token.macaroon);

    request_copy(
        &client,
        &TransferRequest::new(source, destination, token.macaroon),
    )
    .await
}

/// Send the `COPY` and classify the final response.
pub async fn request_copy(client: &Client, transfer: &TransferRequest) -> Result<()> {
    let request = transfer.to_request()?;
    tracing::debug!(
        "{} {}\nDestination: {}\nX-No-Delegate: true",
        request.method,
        request.url,
        transfer.destination
    );

    let mut response = execute_with_redirects(client, request).await?;
    let status = response.status();
    tracing::debug!("Copy response status code: {}", status);

    drain_lines(&mut response).await;

    if !status.is_success() {
        return Err(Error::Transfer { status });
    }
    Ok(())
}

// Sources stream progress markers until the copy finishes.
async fn drain_lines(response: &mut Response) {
    let mut pending = Vec::new();
    loop {
        match response.chunk().await {
            Ok(Some(chunk)) => {
                pending.extend_from_slice(&chunk);
                while let Some(pos) = pending.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = pending.drain(..=pos).collect();
                    tracing::debug!("{}", String::from_utf8_lossy(&line).trim_end());
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::warn!("stopped reading copy response: {}", e);
                break;
            }
        }
    }
    if !pending.is_empty() {
        tracing::debug!("{}", String::from_utf8_lossy(&pending).trim_end());
    }
}
