//! GitHub contents API backend.
//!
//! Each document is one JSON file under the configured data directory. The
//! blob `sha` GitHub reports for a file is its version token, and a `PUT`
//! carrying a stale `sha` is rejected, which gives compare-and-swap writes.

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use reqwest::{
    Client, RequestBuilder, Response, StatusCode,
    header::{ACCEPT, AUTHORIZATION, HeaderValue},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::application::repos::{ConnectionStatus, ContentRepo, StoreError};
use crate::config::ContentHostSettings;
use crate::domain::document::{ContentKey, Document, VersionToken};
use crate::domain::projects::projects_key;

use super::error::InfraError;
use super::user_agent;

const SOURCE: &str = "infra::github";
const ACCEPT_GITHUB_JSON: &str = "application/vnd.github.v3+json";
const ACCEPT_GITHUB_RAW: &str = "application/vnd.github.raw+json";
const COMMIT_SUFFIX: &str = " (via Admin CMS)";

#[derive(Debug, Deserialize)]
struct ContentsResponse {
    // Empty with encoding `none` for files over 1 MB.
    #[serde(default)]
    content: String,
    #[serde(default)]
    encoding: Option<String>,
    sha: String,
}

#[derive(Debug, Serialize)]
struct PutContentsRequest<'a> {
    message: String,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    branch: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct PutContentsResponse {
    content: CommittedFile,
}

#[derive(Debug, Deserialize)]
struct CommittedFile {
    sha: String,
}

#[derive(Clone)]
pub struct GitHubContentRepo {
    client: Client,
    settings: ContentHostSettings,
}

impl GitHubContentRepo {
    pub fn new(settings: ContentHostSettings) -> Result<Self, InfraError> {
        let client = Client::builder()
            .user_agent(user_agent())
            .timeout(settings.request_timeout)
            .build()
            .map_err(|err| InfraError::configuration(format!("http client: {err}")))?;
        Ok(Self { client, settings })
    }

    fn contents_url(&self, key: &ContentKey) -> Result<Url, StoreError> {
        let path = key.file_path(&self.settings.data_dir);
        let mut url = self.settings.api_base.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|()| StoreError::InvalidKey("api base cannot hold a path".to_string()))?;
            segments
                .pop_if_empty()
                .extend([
                    "repos",
                    self.settings.owner.as_str(),
                    self.settings.repo.as_str(),
                    "contents",
                ])
                .extend(path.split('/').filter(|segment| !segment.is_empty()));
        }
        Ok(url)
    }

    fn authorized(
        &self,
        request: RequestBuilder,
        accept: &'static str,
    ) -> Result<RequestBuilder, StoreError> {
        let token = self
            .settings
            .token
            .as_deref()
            .ok_or_else(|| StoreError::auth("no access token configured"))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|_| StoreError::auth("access token is not a valid header value"))?;
        Ok(request
            .header(AUTHORIZATION, bearer)
            .header(ACCEPT, accept))
    }

    async fn get_contents(
        &self,
        key: &ContentKey,
        accept: &'static str,
    ) -> Result<Response, StoreError> {
        let mut url = self.contents_url(key)?;
        if let Some(branch) = self.settings.branch.as_deref() {
            url.query_pairs_mut().append_pair("ref", branch);
        }
        let request = self.authorized(self.client.get(url), accept)?;
        request.send().await.map_err(StoreError::unavailable)
    }

    /// Fetch the file body directly, for files too large to inline.
    async fn read_raw(&self, key: &ContentKey) -> Result<Value, StoreError> {
        let response = self.get_contents(key, ACCEPT_GITHUB_RAW).await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(StoreError::NotFound);
        }
        if !status.is_success() {
            return Err(status_error(status, response).await);
        }
        let bytes = response.bytes().await.map_err(StoreError::unavailable)?;
        serde_json::from_slice(&bytes).map_err(StoreError::invalid_payload)
    }
}

impl std::fmt::Debug for GitHubContentRepo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubContentRepo")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ContentRepo for GitHubContentRepo {
    #[instrument(skip_all, fields(key = %key))]
    async fn read(&self, key: &ContentKey) -> Result<Document, StoreError> {
        let response = self.get_contents(key, ACCEPT_GITHUB_JSON).await?;
        let status = response.status();
        debug!(target = SOURCE, %status, "Contents fetched");

        if status == StatusCode::NOT_FOUND {
            return Err(StoreError::NotFound);
        }
        if !status.is_success() {
            return Err(status_error(status, response).await);
        }

        let body: ContentsResponse = response.json().await.map_err(StoreError::invalid_payload)?;
        let payload = match body.encoding.as_deref() {
            Some("base64") | None => decode_content(&body.content)?,
            Some("none") => {
                debug!(target = SOURCE, "Inline content omitted; fetching raw file");
                self.read_raw(key).await?
            }
            Some(other) => {
                return Err(StoreError::invalid_payload(format!(
                    "unsupported content encoding `{other}`"
                )));
            }
        };
        Ok(Document {
            key: key.clone(),
            payload,
            token: VersionToken::new(body.sha),
        })
    }

    #[instrument(skip_all, fields(key = %key, expected = expected.map(VersionToken::as_str)))]
    async fn write(
        &self,
        key: &ContentKey,
        payload: &Value,
        expected: Option<&VersionToken>,
        description: &str,
    ) -> Result<VersionToken, StoreError> {
        let url = self.contents_url(key)?;
        let body = PutContentsRequest {
            message: format!("{description}{COMMIT_SUFFIX}"),
            content: encode_content(payload)?,
            sha: expected.map(VersionToken::as_str),
            branch: self.settings.branch.as_deref(),
        };

        let request = self.authorized(self.client.put(url), ACCEPT_GITHUB_JSON)?.json(&body);
        let response = request.send().await.map_err(StoreError::unavailable)?;
        let status = response.status();
        debug!(target = SOURCE, %status, "Contents written");

        match status {
            StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY => Err(StoreError::Conflict),
            // The file the token refers to is gone.
            StatusCode::NOT_FOUND if expected.is_some() => Err(StoreError::Conflict),
            StatusCode::NOT_FOUND => Err(StoreError::NotFound),
            status if status.is_success() => {
                let body: PutContentsResponse =
                    response.json().await.map_err(StoreError::invalid_payload)?;
                Ok(VersionToken::new(body.content.sha))
            }
            status => Err(status_error(status, response).await),
        }
    }

    async fn verify(&self) -> ConnectionStatus {
        let response = match self.get_contents(&projects_key(), ACCEPT_GITHUB_JSON).await {
            Ok(response) => response,
            Err(StoreError::AuthFailure(_)) => return ConnectionStatus::InvalidToken,
            Err(err) => {
                warn!(target = SOURCE, error = %err, "Content host unreachable");
                return ConnectionStatus::Unreachable(err.to_string());
            }
        };

        match response.status() {
            status if status.is_success() => ConnectionStatus::Connected,
            StatusCode::NOT_FOUND => ConnectionStatus::RepoNotFound,
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ConnectionStatus::InvalidToken,
            status => ConnectionStatus::Unreachable(format!("unexpected status {status}")),
        }
    }
}

async fn status_error(status: StatusCode, response: Response) -> StoreError {
    let body = response.text().await.unwrap_or_default();
    let message = github_message(&body).unwrap_or_else(|| status.to_string());
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => StoreError::auth(message),
        _ => StoreError::unavailable(format!("status {status}: {message}")),
    }
}

fn github_message(body: &str) -> Option<String> {
    serde_json::from_str::<Value>(body)
        .ok()?
        .get("message")?
        .as_str()
        .map(str::to_string)
}

/// GitHub wraps base64 content at 60 columns.
fn decode_content(encoded: &str) -> Result<Value, StoreError> {
    let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = STANDARD
        .decode(compact.as_bytes())
        .map_err(StoreError::invalid_payload)?;
    serde_json::from_slice(&bytes).map_err(StoreError::invalid_payload)
}

fn encode_content(payload: &Value) -> Result<String, StoreError> {
    let pretty = serde_json::to_string_pretty(payload).map_err(StoreError::invalid_payload)?;
    Ok(STANDARD.encode(pretty.as_bytes()))
}
