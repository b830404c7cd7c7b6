use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::credentials::Credential;
use crate::errors::SourceError;

pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
pub const SHEETS_BASE_URL: &str = "https://sheets.googleapis.com";

/// Where one sector's rows live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetLocation {
    pub spreadsheet_id: String,
    pub range: String,
}

/// Abstraction over the spreadsheet backend for testability.
/// Real implementation: `GoogleSheetsClient`. Test doubles live with the tests.
#[async_trait]
pub trait TabularSource: Send + Sync {
    /// Rows of the range as display strings, top to bottom.
    async fn fetch(
        &self,
        credential: &Credential,
        location: &SheetLocation,
    ) -> Result<Vec<Vec<String>>, SourceError>;
}

/// Response from Google's token endpoint.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

/// Response from the `values.get` endpoint.
#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<serde_json::Value>>,
}

/// Google Sheets v4 client.
pub struct GoogleSheetsClient {
    http: reqwest::Client,
    client_id: String,
    client_secret: String,
    token_url: String,
    base_url: String,
}

impl GoogleSheetsClient {
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        timeout: std::time::Duration,
    ) -> Result<Self, SourceError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("installsync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SourceError::Http(e.to_string()))?;
        Ok(Self {
            http,
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            token_url: GOOGLE_TOKEN_URL.to_string(),
            base_url: SHEETS_BASE_URL.to_string(),
        })
    }

    /// Point the client at other endpoints.
    pub fn with_endpoints(mut self, token_url: impl Into<String>, base_url: impl Into<String>) -> Self {
        self.token_url = token_url.into();
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Exchange the stored refresh token for a short-lived access token.
    async fn access_token(&self, credential: &Credential) -> Result<String, SourceError> {
        let resp = self
            .http
            .post(&self.token_url)
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("refresh_token", credential.refresh_token.as_str()),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await
            .map_err(|e| SourceError::Auth(format!("token request failed: {}", e)))?
            .json::<TokenResponse>()
            .await
            .map_err(|e| SourceError::Auth(format!("unreadable token response: {}", e)))?;

        match (resp.access_token, resp.error) {
            (Some(token), _) => Ok(token),
            (None, Some(err)) => Err(SourceError::Auth(match resp.error_description {
                Some(desc) => format!("{}: {}", err, desc),
                None => err,
            })),
            (None, None) => Err(SourceError::Auth("token response without access_token".into())),
        }
    }

    fn values_url(&self, location: &SheetLocation) -> String {
        format!(
            "{}/v4/spreadsheets/{}/values/{}",
            self.base_url, location.spreadsheet_id, location.range
        )
    }
}

#[async_trait]
impl TabularSource for GoogleSheetsClient {
    async fn fetch(
        &self,
        credential: &Credential,
        location: &SheetLocation,
    ) -> Result<Vec<Vec<String>>, SourceError> {
        let token = self.access_token(credential).await?;
        let resp = self
            .http
            .get(self.values_url(location))
            .bearer_auth(token)
            .query(&[("valueRenderOption", "FORMATTED_VALUE")])
            .send()
            .await
            .map_err(|e| SourceError::Http(e.to_string()))?;

        match resp.status() {
            reqwest::StatusCode::FORBIDDEN | reqwest::StatusCode::UNAUTHORIZED => {
                return Err(SourceError::PermissionDenied {
                    spreadsheet_id: location.spreadsheet_id.clone(),
                });
            }
            reqwest::StatusCode::NOT_FOUND => {
                return Err(SourceError::NotFound {
                    spreadsheet_id: location.spreadsheet_id.clone(),
                    range: location.range.clone(),
                });
            }
            status if !status.is_success() => {
                return Err(SourceError::Http(format!("Sheets API returned {}", status)));
            }
            _ => {}
        }

        let body: ValueRange = resp
            .json()
            .await
            .map_err(|e| SourceError::Decode(e.to_string()))?;
        debug!(
            spreadsheet = %location.spreadsheet_id,
            range = %location.range,
            rows = body.values.len(),
            "fetched sheet rows"
        );
        Ok(body.values.into_iter().map(stringify_row).collect())
    }
}

/// Cells arrive formatted, but numbers and booleans can still come back as
/// JSON scalars.
fn stringify_row(row: Vec<serde_json::Value>) -> Vec<String> {
    row.into_iter()
        .map(|cell| match cell {
            serde_json::Value::String(s) => s,
            serde_json::Value::Null => String::new(),
            other => other.to_string(),
        })
        .collect()
}
