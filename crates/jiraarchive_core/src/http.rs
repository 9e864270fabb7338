use std::collections::hash_map::RandomState;
use std::env;
use std::fmt;
use std::hash::{BuildHasher, Hasher};
use std::str::FromStr;
use std::thread::sleep;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use reqwest::blocking::{Client, Response};
use reqwest::header::USER_AGENT;
use reqwest::{Method, StatusCode, Url};
use serde_json::Value;

use crate::config::ArchiveConfig;

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub user_agent: String,
    pub timeout_ms: u64,
    pub rate_limit_read_ms: u64,
    pub rate_limit_write_ms: u64,
    pub max_retries: usize,
    pub max_write_retries: usize,
    pub retry_delay_ms: u64,
}

impl HttpClientConfig {
    pub fn from_config(config: &ArchiveConfig) -> Self {
        let http = &config.http;
        Self {
            user_agent: config.user_agent(),
            timeout_ms: env_or("JIRAARCHIVE_HTTP_TIMEOUT_MS", http.timeout_ms.unwrap_or(30_000)),
            rate_limit_read_ms: env_or(
                "JIRAARCHIVE_RATE_LIMIT_READ",
                http.rate_limit_read_ms.unwrap_or(100),
            ),
            rate_limit_write_ms: env_or(
                "JIRAARCHIVE_RATE_LIMIT_WRITE",
                http.rate_limit_write_ms.unwrap_or(500),
            ),
            max_retries: env_or("JIRAARCHIVE_HTTP_RETRIES", http.max_retries.unwrap_or(2)),
            max_write_retries: env_or(
                "JIRAARCHIVE_HTTP_WRITE_RETRIES",
                http.max_write_retries.unwrap_or(1),
            ),
            retry_delay_ms: env_or(
                "JIRAARCHIVE_HTTP_RETRY_DELAY_MS",
                http.retry_delay_ms.unwrap_or(500),
            ),
        }
    }
}

#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// A single request against one of the REST APIs.
pub struct ApiRequest<'a> {
    pub method: Method,
    pub url: Url,
    pub query: &'a [(&'a str, String)],
    pub body: Option<&'a Value>,
    pub is_write: bool,
}

impl<'a> ApiRequest<'a> {
    pub fn get(url: Url, query: &'a [(&'a str, String)]) -> Self {
        Self {
            method: Method::GET,
            url,
            query,
            body: None,
            is_write: false,
        }
    }

    pub fn put(url: Url, query: &'a [(&'a str, String)], body: &'a Value) -> Self {
        Self {
            method: Method::PUT,
            url,
            query,
            body: Some(body),
            is_write: true,
        }
    }
}

/// Blocking HTTP transport with basic auth, rate limiting and retries.
pub struct HttpTransport {
    client: Client,
    config: HttpClientConfig,
    credentials: Credentials,
    pacer: Pacer,
    request_count: usize,
}

impl HttpTransport {
    pub fn new(config: HttpClientConfig, credentials: Credentials) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            client,
            config,
            credentials,
            pacer: Pacer::default(),
            request_count: 0,
        })
    }

    pub fn request_count(&self) -> usize {
        self.request_count
    }

    /// Send `request`, retrying retryable failures. The final response is
    /// returned whatever its status so callers can map specific codes.
    pub fn send(&mut self, request: &ApiRequest<'_>) -> Result<Response> {
        let max_retries = if request.is_write {
            self.config.max_write_retries
        } else {
            self.config.max_retries
        };

        for attempt in 0..=max_retries {
            self.pacer.wait(self.spacing(request.is_write));
            self.request_count += 1;
            log::debug!("{} {}", request.method, request.url);

            let mut builder = self
                .client
                .request(request.method.clone(), request.url.clone())
                .header(USER_AGENT, self.config.user_agent.clone())
                .basic_auth(
                    &self.credentials.username,
                    Some(&self.credentials.password),
                )
                .query(request.query);
            if let Some(body) = request.body {
                builder = builder.json(body);
            }

            match builder.send() {
                Ok(response) => {
                    let status = response.status();
                    if attempt < max_retries && is_retryable_status(status) {
                        log::warn!(
                            "{} {} returned HTTP {status}; retrying (attempt {})",
                            request.method,
                            request.url,
                            attempt + 1
                        );
                        self.pause_after_failure(attempt, request.is_write);
                        continue;
                    }
                    return Ok(response);
                }
                Err(error) => {
                    if attempt < max_retries && is_retryable_error(&error) {
                        log::warn!(
                            "{} {} failed: {error}; retrying (attempt {})",
                            request.method,
                            request.url,
                            attempt + 1
                        );
                        self.pause_after_failure(attempt, request.is_write);
                        continue;
                    }
                    return Err(error)
                        .with_context(|| format!("failed to call {}", request.url));
                }
            }
        }

        bail!("request to {} exhausted retry budget", request.url)
    }

    /// Send `request` and decode a JSON body, failing on any non-success status.
    pub fn send_json(&mut self, request: &ApiRequest<'_>) -> Result<Value> {
        let response = self.send(request)?;
        expect_json(response, &request.url)
    }

    /// Minimum spacing between two requests; writes are spaced further apart.
    fn spacing(&self, is_write: bool) -> Duration {
        if is_write {
            Duration::from_millis(self.config.rate_limit_write_ms)
        } else {
            Duration::from_millis(self.config.rate_limit_read_ms)
        }
    }

    fn pause_after_failure(&self, attempt: usize, is_write: bool) {
        let delay = backoff_delay(self.config.retry_delay_ms, attempt, is_write, jitter_ms());
        log::debug!("backing off for {}ms", delay.as_millis());
        sleep(delay);
    }
}

/// Keeps consecutive requests at least a given spacing apart.
#[derive(Debug, Default)]
struct Pacer {
    last_sent: Option<Instant>,
}

impl Pacer {
    fn wait(&mut self, spacing: Duration) {
        let pause = remaining_pause(self.last_sent.map(|sent| sent.elapsed()), spacing);
        if !pause.is_zero() {
            sleep(pause);
        }
        self.last_sent = Some(Instant::now());
    }
}

fn remaining_pause(since_last: Option<Duration>, spacing: Duration) -> Duration {
    match since_last {
        Some(elapsed) => spacing.saturating_sub(elapsed),
        None => Duration::ZERO,
    }
}

/// Delay before retry number `attempt + 1`: the base delay doubles per
/// attempt, writes wait twice as long, and `jitter_ms` is added on top.
fn backoff_delay(base_ms: u64, attempt: usize, is_write: bool, jitter_ms: u64) -> Duration {
    let doublings = u32::try_from(attempt).unwrap_or(u32::MAX).min(16);
    let mut millis = base_ms.saturating_mul(1u64 << doublings);
    if is_write {
        millis = millis.saturating_mul(2);
    }
    Duration::from_millis(millis.saturating_add(jitter_ms))
}

// RandomState is seeded per instance, which is enough spread for retry jitter.
fn jitter_ms() -> u64 {
    RandomState::new().build_hasher().finish() % 100
}

pub fn expect_json(response: Response, url: &Url) -> Result<Value> {
    let status = response.status();
    if !status.is_success() {
        let detail = response.text().unwrap_or_default();
        bail!(
            "request to {url} failed with HTTP {status}: {}",
            truncate_for_error(&detail, 200)
        );
    }
    response
        .json()
        .with_context(|| format!("failed to decode JSON response from {url}"))
}

/// Join a service base URL with an API path, tolerating slashes on either side.
pub fn join_url(base: &str, path: &str) -> Result<Url> {
    let joined = format!(
        "{}/{}",
        base.trim().trim_end_matches('/'),
        path.trim_start_matches('/')
    );
    Url::parse(&joined).with_context(|| format!("invalid service URL: {joined}"))
}

pub fn truncate_for_error(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= max_chars {
        return trimmed.to_string();
    }
    let mut output = trimmed.chars().take(max_chars).collect::<String>();
    output.push_str("...");
    output
}

fn env_or<T: FromStr>(key: &str, fallback: T) -> T {
    parse_or(env::var(key).ok().as_deref(), fallback)
}

fn parse_or<T: FromStr>(raw: Option<&str>, fallback: T) -> T {
    raw.and_then(|value| value.trim().parse().ok())
        .unwrap_or(fallback)
}

// 408, 429 and the gateway family are transient; everything else is final.
fn is_retryable_status(status: StatusCode) -> bool {
    matches!(status.as_u16(), 408 | 429 | 502..=504)
}

fn is_retryable_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect()
}
