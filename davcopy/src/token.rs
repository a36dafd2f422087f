use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};
use http::header::CONTENT_TYPE;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Error, Result};

/// Content type understood by macaroon-issuing endpoints
pub const MACAROON_REQUEST_CONTENT_TYPE: &str = "application/macaroon-request";

/// Lifetime used when a token is requested on its own
pub const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(60);

/// Operation a token authorises on the resource it is scoped to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Activity {
    Download,
    Upload,
    Delete,
    Manage,
    List,
    ReadMetadata,
    UpdateMetadata,
    Stage,
    /// A server-defined activity, sent as given
    Other(String),
}

impl Activity {
    /// The activities every macaroon-issuing endpoint understands
    pub const ALL: [Activity; 8] = [
        Activity::Download,
        Activity::Upload,
        Activity::Delete,
        Activity::Manage,
        Activity::List,
        Activity::ReadMetadata,
        Activity::UpdateMetadata,
        Activity::Stage,
    ];

    pub fn as_str(&self) -> &str {
        match self {
            Activity::Download => "DOWNLOAD",
            Activity::Upload => "UPLOAD",
            Activity::Delete => "DELETE",
            Activity::Manage => "MANAGE",
            Activity::List => "LIST",
            Activity::ReadMetadata => "READ_METADATA",
            Activity::UpdateMetadata => "UPDATE_METADATA",
            Activity::Stage => "STAGE",
            Activity::Other(name) => name,
        }
    }
}

impl fmt::Display for Activity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Activity {
    type Err = Error;

    /// Known names match case-insensitively; anything else becomes
    /// [`Activity::Other`] unless it would break the caveat syntax.
    fn from_str(s: &str) -> Result<Self> {
        if let Some(known) = Activity::ALL
            .into_iter()
            .find(|a| a.as_str().eq_ignore_ascii_case(s))
        {
            return Ok(known);
        }

        if s.is_empty() || s.contains(',') || s.chars().any(char::is_whitespace) {
            return Err(Error::InvalidRequest(format!("invalid activity: {:?}", s)));
        }
        Ok(Activity::Other(s.to_string()))
    }
}

/// A request for a macaroon scoped to a resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenRequest {
    /// Resource the token is scoped to
    pub resource: Url,

    /// Requested lifetime. Zero omits the expiry caveat.
    pub lifetime: Duration,

    /// Activities to authorise, in the order they are sent
    pub activities: Vec<Activity>,
}

impl TokenRequest {
    pub fn new(resource: Url, activities: Vec<Activity>) -> Self {
        Self {
            resource,
            lifetime: DEFAULT_TOKEN_LIFETIME,
            activities,
        }
    }

    pub fn with_lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime = lifetime;
        self
    }

    /// `activity:A,B,...` in the order given
    pub fn activity_caveat(&self) -> String {
        let joined = self
            .activities
            .iter()
            .map(Activity::as_str)
            .collect::<Vec<_>>()
            .join(",");
        format!("activity:{}", joined)
    }

    /// Caveats to request, with the expiry computed relative to `now`
    pub fn caveats_at(&self, now: DateTime<Utc>) -> Result<Vec<String>> {
        if self.activities.is_empty() {
            return Err(Error::InvalidRequest(
                "token request needs at least one activity".to_string(),
            ));
        }

        let mut caveats = vec![self.activity_caveat()];
        if !self.lifetime.is_zero() {
            let before = TimeDelta::from_std(self.lifetime)
                .ok()
                .and_then(|lifetime| now.checked_add_signed(lifetime))
                .ok_or_else(|| {
                    Error::InvalidRequest(format!("lifetime too large: {:?}", self.lifetime))
                })?;
            caveats.push(format!(
                "before:{}",
                before.to_rfc3339_opts(SecondsFormat::Secs, true)
            ));
        }
        Ok(caveats)
    }

    /// Wire payload, stamped with the current time
    pub fn payload(&self) -> Result<MacaroonRequest> {
        Ok(MacaroonRequest {
            caveats: self.caveats_at(Utc::now())?,
        })
    }
}

/// JSON body sent to the token endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MacaroonRequest {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub caveats: Vec<String>,
}

/// Reply from the token endpoint
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TokenResponse {
    /// Opaque bearer token
    pub macaroon: String,
    #[serde(default)]
    pub uri: TokenUris,
}

/// Resource locations echoed back with a token
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TokenUris {
    pub target_with_macaroon: String,
    pub base_with_macaroon: String,
    pub target: String,
    pub base: String,
}

impl TokenResponse {
    /// Decode a 2xx token endpoint body
    pub fn from_slice(body: &[u8]) -> Result<Self> {
        serde_json::from_slice(body).map_err(Error::Protocol)
    }
}

/// Ask `request.resource` for a macaroon. Exactly one round trip, no retries.
pub async fn request_token(client: &Client, request: &TokenRequest) -> Result<TokenResponse> {
    let payload = request.payload()?;
    let body = serde_json::to_vec(&payload)
        .map_err(|e| Error::InvalidRequest(format!("failed to serialize caveats: {}", e)))?;

    tracing::debug!(
        "POST {}\nContent-Type: {}\n\n{}",
        request.resource,
        MACAROON_REQUEST_CONTENT_TYPE,
        String::from_utf8_lossy(&body)
    );

    let response = client
        .post(request.resource.clone())
        .header(CONTENT_TYPE, MACAROON_REQUEST_CONTENT_TYPE)
        .body(body)
        .send()
        .await?;

    let status = response.status();
    tracing::debug!("Response status code: {}", status);

    if !status.is_success() {
        // The status is the error; the body is only worth a debug dump.
        match response.bytes().await {
            Ok(body) => tracing::debug!("Response: {}", String::from_utf8_lossy(&body)),
            Err(e) => tracing::debug!("Response body unreadable: {}", e),
        }
        return Err(Error::TokenService { status });
    }

    let body = response.bytes().await?;
    tracing::debug!("Response: {}", String::from_utf8_lossy(&body));

    TokenResponse::from_slice(&body)
}
