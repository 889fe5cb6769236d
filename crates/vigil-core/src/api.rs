use crate::stream::STREAM_PATH;
use crate::{Alert, DetectionCounts, ObjectType};
use reqwest::{Method, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use url::Url;

pub const DEFAULT_API_URL: &str = "http://localhost:8000";
pub const DEFAULT_ALERT_LIMIT: u32 = 20;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("unsupported url scheme for stream: {0}")]
    UnsupportedScheme(String),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("backend returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("backend rejected request: {0}")]
    Rejected(String),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Rtsp,
    Webcam,
    Upload,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Rtsp => "rtsp",
            SourceType::Webcam => "webcam",
            SourceType::Upload => "upload",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceType {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_lowercase().as_str() {
            "rtsp" => Ok(SourceType::Rtsp),
            "webcam" => Ok(SourceType::Webcam),
            "upload" | "file" => Ok(SourceType::Upload),
            other => Err(format!("Unknown source type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CameraConfig {
    pub source_type: SourceType,
    #[serde(default)]
    pub rtsp_url: Option<String>,
    #[serde(default)]
    pub video_file: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewRule {
    pub name: String,
    pub object_type: ObjectType,
    pub threshold: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Rule {
    pub rule_id: String,
    pub name: String,
    pub object_type: ObjectType,
    pub threshold: u32,
}

/// The `{status, message}` envelope most mutating endpoints answer with.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusReply {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub rule_id: Option<String>,
}

impl StatusReply {
    pub fn into_result(self) -> Result<StatusReply, ApiError> {
        if self.status.eq_ignore_ascii_case("error") {
            return Err(ApiError::Rejected(
                self.message
                    .unwrap_or_else(|| "no message from backend".to_string()),
            ));
        }
        Ok(self)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Health {
    pub status: String,
    #[serde(default)]
    pub streaming: bool,
    #[serde(default)]
    pub detections: DetectionCounts,
    #[serde(default)]
    pub connected_clients: u32,
}

#[derive(Debug, Serialize)]
struct RecipientList<'a> {
    emails: &'a [String],
}

/// Request/response access to the detection backend. No retries and no
/// caching: each call is one HTTP exchange.
#[derive(Debug, Clone)]
pub struct BackendClient {
    http: reqwest::Client,
    base: Url,
}

impl BackendClient {
    pub fn new(base: Url, timeout: Duration) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base: normalize_base(base),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    pub fn stream_url(&self) -> Result<Url, ApiError> {
        stream_url_for(&self.base)
    }

    pub async fn detections(&self) -> Result<DetectionCounts, ApiError> {
        self.fetch(Method::GET, self.endpoint("get_detections")?).await
    }

    pub async fn alerts(&self, limit: u32) -> Result<Vec<Alert>, ApiError> {
        let mut url = self.endpoint("get_alerts")?;
        url.query_pairs_mut()
            .append_pair("limit", &limit.to_string());
        self.fetch(Method::GET, url).await
    }

    pub async fn configure_camera(&self, config: &CameraConfig) -> Result<StatusReply, ApiError> {
        self.submit(self.endpoint("configure_camera")?, config).await
    }

    pub async fn test_connection(&self, config: &CameraConfig) -> Result<StatusReply, ApiError> {
        self.submit(self.endpoint("test_connection")?, config).await
    }

    pub async fn start_stream(&self) -> Result<StatusReply, ApiError> {
        let reply: StatusReply = self
            .fetch(Method::POST, self.endpoint("start_stream")?)
            .await?;
        reply.into_result()
    }

    pub async fn stop_stream(&self) -> Result<StatusReply, ApiError> {
        let reply: StatusReply = self
            .fetch(Method::POST, self.endpoint("stop_stream")?)
            .await?;
        reply.into_result()
    }

    pub async fn create_rule(&self, rule: &NewRule) -> Result<StatusReply, ApiError> {
        self.submit(self.endpoint("create_rule")?, rule).await
    }

    pub async fn rules(&self) -> Result<Vec<Rule>, ApiError> {
        self.fetch(Method::GET, self.endpoint("get_rules")?).await
    }

    pub async fn delete_rule(&self, rule_id: &str) -> Result<StatusReply, ApiError> {
        let mut url = self.endpoint("delete_rule")?;
        url.path_segments_mut()
            .map_err(|_| ApiError::UnsupportedScheme(self.base.scheme().to_string()))?
            .push(rule_id);
        let reply: StatusReply = self.fetch(Method::DELETE, url).await?;
        reply.into_result()
    }

    pub async fn configure_alerts(&self, emails: &[String]) -> Result<StatusReply, ApiError> {
        self.submit(self.endpoint("configure_alerts")?, &RecipientList { emails })
            .await
    }

    pub async fn send_test_email(&self, emails: &[String]) -> Result<StatusReply, ApiError> {
        self.submit(self.endpoint("send_test_email")?, &emails).await
    }

    pub async fn health(&self) -> Result<Health, ApiError> {
        self.fetch(Method::GET, self.endpoint("health")?).await
    }

    fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        Ok(self.base.join(path)?)
    }

    async fn fetch<T: DeserializeOwned>(&self, method: Method, url: Url) -> Result<T, ApiError> {
        debug!(event = "api_request", method = %method, url = %url);
        let response = self.http.request(method, url).send().await?;
        decode_response(response).await
    }

    async fn submit<B: Serialize + ?Sized>(
        &self,
        url: Url,
        body: &B,
    ) -> Result<StatusReply, ApiError> {
        debug!(event = "api_request", method = "POST", url = %url);
        let response = self.http.post(url).json(body).send().await?;
        let reply: StatusReply = decode_response(response).await?;
        reply.into_result()
    }
}

async fn decode_response<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ApiError::Status {
            status: status.as_u16(),
            body,
        });
    }
    Ok(response.json::<T>().await?)
}

fn normalize_base(mut base: Url) -> Url {
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    base.set_query(None);
    base.set_fragment(None);
    base
}

/// Maps `http(s)://host/prefix/` onto `ws(s)://host/prefix/ws/stream`.
pub fn stream_url_for(api_base: &Url) -> Result<Url, ApiError> {
    let scheme = match api_base.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => return Err(ApiError::UnsupportedScheme(other.to_string())),
    };
    let base = normalize_base(api_base.clone());
    let mut url = base.join(STREAM_PATH.trim_start_matches('/'))?;
    url.set_scheme(scheme)
        .map_err(|_| ApiError::UnsupportedScheme(api_base.scheme().to_string()))?;
    Ok(url)
}
