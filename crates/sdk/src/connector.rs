//! Client for the comparison service
//!
//! Session start is a plain request. Everything else goes through the
//! long-request protocol: the client announces `Eyes-Expect: 202+location`,
//! the server may answer `202 Accepted` with a `Location` to poll, polling
//! continues on a growing delay until the task reports `201 Created`, and a
//! `DELETE` on the final `Location` yields the result. A `410 Gone` restarts
//! the whole request once.

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE, LOCATION};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode, Url};
use std::time::Duration;
use tracing::{debug, info, trace, warn};

use eyes_common::{
    Error, MatchResult, MatchWindowData, Result, RunningSession, SessionStartInfo, TestResults,
};

use crate::config::{PollSchedule, ServerConfig};

const API_PATH: [&str; 3] = ["api", "sessions", "running"];
const EYES_EXPECT: &str = "Eyes-Expect";
const EYES_DATE: &str = "Eyes-Date";

/// Operations the session manager needs from the comparison service
#[async_trait]
pub trait EyesConnector: Send + Sync {
    async fn start_session(&self, start_info: &SessionStartInfo) -> Result<RunningSession>;

    async fn match_window(
        &self,
        session: &RunningSession,
        data: &MatchWindowData,
        image: &[u8],
    ) -> Result<MatchResult>;

    async fn replace_window(
        &self,
        session: &RunningSession,
        step_index: u32,
        data: &MatchWindowData,
        image: &[u8],
    ) -> Result<MatchResult>;

    async fn end_session(
        &self,
        session: &RunningSession,
        aborted: bool,
        save: bool,
    ) -> Result<TestResults>;
}

/// Growing delay between polls of a long-running task
#[derive(Debug, Clone)]
pub struct Backoff {
    next: Duration,
    factor: f64,
    max: Duration,
}

impl Backoff {
    pub fn new(schedule: PollSchedule) -> Self {
        let max = Duration::from_millis(schedule.max_delay_ms);
        Self {
            next: Duration::from_millis(schedule.initial_delay_ms).min(max),
            factor: schedule.factor,
            max,
        }
    }
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let delay = self.next;
        self.next = delay.mul_f64(self.factor).min(self.max);
        Some(delay)
    }
}

/// HTTP implementation of [`EyesConnector`]
pub struct ServerConnector {
    client: Client,
    server_url: Url,
    api_key: String,
    poll: PollSchedule,
}

impl ServerConnector {
    pub fn new(config: &ServerConfig, api_key: impl Into<String>) -> Result<Self> {
        let server_url = Url::parse(&config.url)
            .map_err(|e| Error::InvalidConfig(format!("server url {}: {}", config.url, e)))?;
        if server_url.cannot_be_a_base() {
            return Err(Error::InvalidConfig(format!(
                "server url {} cannot be a base",
                config.url
            )));
        }

        let poll = config.poll;
        if !poll.factor.is_finite() || poll.factor < 1.0 {
            return Err(Error::InvalidConfig(format!(
                "poll factor must be a finite number >= 1.0, got {}",
                poll.factor
            )));
        }
        if poll.initial_delay_ms == 0 {
            return Err(Error::InvalidConfig(
                "poll initial delay must be positive".into(),
            ));
        }

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let mut builder = Client::builder()
            .default_headers(headers)
            .timeout(config.timeout());

        if let Some(proxy) = &config.proxy {
            let mut p = reqwest::Proxy::all(&proxy.uri)?;
            if let Some(username) = &proxy.username {
                p = p.basic_auth(username, proxy.password.as_deref().unwrap_or_default());
            }
            builder = builder.proxy(p);
        }

        Ok(Self {
            client: builder.build()?,
            server_url,
            api_key: api_key.into(),
            poll,
        })
    }

    pub fn server_url(&self) -> &Url {
        &self.server_url
    }

    fn endpoint(&self, tail: &[&str]) -> Url {
        let mut url = self.server_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().extend(API_PATH).extend(tail);
        }
        url
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.client
            .request(method, url)
            .query(&[("apiKey", self.api_key.as_str())])
    }

    /// Run the long-request protocol; `make` builds the original request
    /// and is called again for the single retry after `410 Gone`.
    async fn long_request<F>(&self, operation: &str, make: F) -> Result<Response>
    where
        F: Fn() -> RequestBuilder + Send + Sync,
    {
        let mut retried = false;
        loop {
            let response = make()
                .header(EYES_EXPECT, "202+location")
                .header(EYES_DATE, rfc1123_now())
                .send()
                .await?;

            match self.complete(operation, response).await {
                Err(Error::TaskGone { .. }) if !retried => {
                    warn!("{}: server task has gone, retrying the request once", operation);
                    retried = true;
                }
                other => return other,
            }
        }
    }

    async fn complete(&self, operation: &str, mut response: Response) -> Result<Response> {
        let mut backoff = Backoff::new(self.poll);
        let mut poll_url: Option<Url> = None;

        loop {
            match response.status() {
                StatusCode::OK => return Ok(response),
                StatusCode::ACCEPTED => {
                    if let Some(url) = self.location(operation, &response)? {
                        poll_url = Some(url);
                    }
                    let url = poll_url.clone().ok_or_else(|| missing_location(operation))?;
                    let delay = backoff.next().unwrap_or_default();
                    debug!("{}: still running, polling {} in {:?}", operation, url, delay);

                    tokio::time::sleep(delay).await;
                    response = self
                        .request(Method::GET, url)
                        .header(EYES_DATE, rfc1123_now())
                        .send()
                        .await?;
                }
                StatusCode::CREATED => {
                    let url = self
                        .location(operation, &response)?
                        .ok_or_else(|| missing_location(operation))?;
                    trace!("{}: task finished, fetching result from {}", operation, url);

                    let result = self
                        .request(Method::DELETE, url)
                        .header(EYES_DATE, rfc1123_now())
                        .send()
                        .await?;
                    return match result.status() {
                        StatusCode::OK => Ok(result),
                        StatusCode::GONE => Err(gone(operation)),
                        _ => Err(protocol_error(operation, result).await),
                    };
                }
                StatusCode::GONE => return Err(gone(operation)),
                _ => return Err(protocol_error(operation, response).await),
            }
        }
    }

    fn location(&self, operation: &str, response: &Response) -> Result<Option<Url>> {
        let Some(value) = response.headers().get(LOCATION) else {
            return Ok(None);
        };
        let value = value.to_str().map_err(|_| Error::Protocol {
            operation: operation.to_string(),
            status: response.status().as_u16(),
            body: "non-ascii Location header".into(),
        })?;
        let url = self.server_url.join(value).map_err(|e| Error::Protocol {
            operation: operation.to_string(),
            status: response.status().as_u16(),
            body: format!("bad Location header {}: {}", value, e),
        })?;
        Ok(Some(url))
    }
}

#[async_trait]
impl EyesConnector for ServerConnector {
    async fn start_session(&self, start_info: &SessionStartInfo) -> Result<RunningSession> {
        let url = self.endpoint(&[]);
        let body = serde_json::json!({ "startInfo": start_info });
        debug!(
            "Starting session for '{}' of '{}'",
            start_info.scenario_id_or_name, start_info.app_id_or_name
        );

        let response = self.request(Method::POST, url).json(&body).send().await?;
        let status = response.status();
        if status != StatusCode::OK && status != StatusCode::CREATED {
            return Err(protocol_error("startSession", response).await);
        }

        let mut session: RunningSession = response.json().await?;
        session.is_new_baseline = status == StatusCode::CREATED;
        info!(
            "Session {} started ({})",
            session.server_id,
            if session.is_new_baseline { "new baseline" } else { "existing baseline" }
        );
        Ok(session)
    }

    async fn match_window(
        &self,
        session: &RunningSession,
        data: &MatchWindowData,
        image: &[u8],
    ) -> Result<MatchResult> {
        let url = self.endpoint(&[&session.server_id]);
        let body = encode_upload(data, image)?;
        debug!("Uploading {} bytes for '{}'", body.len(), data.tag);

        let response = self
            .long_request("matchWindow", || {
                self.request(Method::POST, url.clone())
                    .header(CONTENT_TYPE, "application/octet-stream")
                    .body(body.clone())
            })
            .await?;
        Ok(response.json().await?)
    }

    async fn replace_window(
        &self,
        session: &RunningSession,
        step_index: u32,
        data: &MatchWindowData,
        image: &[u8],
    ) -> Result<MatchResult> {
        let step = step_index.to_string();
        let url = self.endpoint(&[&session.server_id, &step]);
        let body = encode_upload(data, image)?;

        let response = self
            .long_request("replaceWindow", || {
                self.request(Method::PUT, url.clone())
                    .header(CONTENT_TYPE, "application/octet-stream")
                    .body(body.clone())
            })
            .await?;
        Ok(response.json().await?)
    }

    async fn end_session(
        &self,
        session: &RunningSession,
        aborted: bool,
        save: bool,
    ) -> Result<TestResults> {
        let url = self.endpoint(&[&session.server_id]);
        debug!("Ending session {} (aborted: {}, save: {})", session.server_id, aborted, save);

        let response = self
            .long_request("stopSession", || {
                self.request(Method::DELETE, url.clone()).query(&[
                    ("aborted", aborted.to_string()),
                    ("updateBaseline", save.to_string()),
                ])
            })
            .await?;
        Ok(response.json().await?)
    }
}

/// Frame an upload: `u32 BE length ‖ JSON metadata ‖ image bytes`
pub fn encode_upload(data: &MatchWindowData, image: &[u8]) -> Result<Bytes> {
    let json = serde_json::to_vec(data)?;
    let len = u32::try_from(json.len())
        .map_err(|_| Error::Internal("match metadata larger than 4 GiB".into()))?;

    let mut buf = BytesMut::with_capacity(4 + json.len() + image.len());
    buf.put_u32(len);
    buf.put_slice(&json);
    buf.put_slice(image);
    Ok(buf.freeze())
}

fn rfc1123_now() -> String {
    chrono::Utc::now()
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string()
}

fn gone(operation: &str) -> Error {
    Error::TaskGone {
        operation: operation.to_string(),
    }
}

fn missing_location(operation: &str) -> Error {
    Error::Protocol {
        operation: operation.to_string(),
        status: 0,
        body: "long request response has no Location header".into(),
    }
}

async fn protocol_error(operation: &str, response: Response) -> Error {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    Error::Protocol {
        operation: operation.to_string(),
        status,
        body,
    }
}
