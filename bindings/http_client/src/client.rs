use crate::params::RequestParams;
use crate::response::HttpResponse;
use anyhow::Context;
use gale_instruments::{RequestSample, Reporter, SampleTags};
use reqwest::header::CONTENT_TYPE;
use reqwest::Method;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

/// How long to wait for a complete response before giving up on a request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// A [reqwest::Client] that records every request it makes with a [Reporter].
///
/// Cheap to clone. One client is shared by every virtual user so that connections are pooled.
#[derive(Debug, Clone)]
pub struct HttpClientInstrumented {
    client: reqwest::Client,
    reporter: Arc<Reporter>,
}

impl HttpClientInstrumented {
    pub fn new(reporter: Arc<Reporter>) -> anyhow::Result<Self> {
        Self::with_timeout(reporter, DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_timeout(reporter: Arc<Reporter>, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("gale/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self { client, reporter })
    }

    /// Send one request and record it.
    ///
    /// There are no retries. Redirects are followed with reqwest's default policy. If no response
    /// is received the returned [HttpResponse] has status 0 and `error` set.
    pub async fn request(
        &self,
        tags: &SampleTags,
        method: Method,
        url: &str,
        body: Option<Vec<u8>>,
        params: &RequestParams,
    ) -> HttpResponse {
        let mut builder = self.client.request(method.clone(), url);
        for (name, value) in &params.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = body {
            builder = builder.header(CONTENT_TYPE, "application/json").body(body);
        }

        let started = Instant::now();
        let response = match builder.send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                let headers = response
                    .headers()
                    .iter()
                    .filter_map(|(name, value)| {
                        value
                            .to_str()
                            .ok()
                            .map(|value| (name.as_str().to_string(), value.to_string()))
                    })
                    .collect::<HashMap<_, _>>();

                match response.bytes().await {
                    Ok(raw) => HttpResponse::received(status, headers, &raw),
                    Err(e) => HttpResponse {
                        status,
                        headers,
                        body: None,
                        error: Some(format!("Failed to read response body: {e}")),
                    },
                }
            }
            Err(e) => {
                log::debug!("{} {} failed: {}", method, url, e);
                HttpResponse::not_received(e.to_string())
            }
        };
        let duration = started.elapsed();

        self.record(tags, &method, url, params, &response, duration);

        response
    }

    fn record(
        &self,
        tags: &SampleTags,
        method: &Method,
        url: &str,
        params: &RequestParams,
        response: &HttpResponse,
        duration: Duration,
    ) {
        self.reporter.add_request(RequestSample {
            method: method.to_string(),
            url: url.to_string(),
            name: params.name.clone().unwrap_or_else(|| url.to_string()),
            status: response.status,
            duration,
            timestamp: SystemTime::now(),
            failed: params.is_failure(response.status),
            error: response.error.clone(),
            tags: tags.clone(),
        });
    }
}

/// An [HttpClientInstrumented] bound to a base URL and to the tags of one virtual user.
///
/// Paths passed to its methods are appended to the base URL.
#[derive(Debug, Clone)]
pub struct VuHttpClient {
    client: HttpClientInstrumented,
    base_url: String,
    tags: SampleTags,
}

impl VuHttpClient {
    pub fn new(client: HttpClientInstrumented, base_url: &str, tags: SampleTags) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            tags,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub fn tags(&self) -> &SampleTags {
        &self.tags
    }

    pub async fn get(&self, path: &str, params: RequestParams) -> HttpResponse {
        self.client
            .request(&self.tags, Method::GET, &self.url(path), None, &params)
            .await
    }

    pub async fn post_json<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
        params: RequestParams,
    ) -> HttpResponse {
        self.send_json(Method::POST, path, body, params).await
    }

    pub async fn put_json<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
        params: RequestParams,
    ) -> HttpResponse {
        self.send_json(Method::PUT, path, body, params).await
    }

    async fn send_json<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: &B,
        params: RequestParams,
    ) -> HttpResponse {
        let url = self.url(path);
        match serde_json::to_vec(body) {
            Ok(body) => {
                self.client
                    .request(&self.tags, method, &url, Some(body), &params)
                    .await
            }
            Err(e) => {
                log::error!("Could not serialize the body for {} {}: {}", method, url, e);
                let response = HttpResponse::not_received(format!("Invalid request body: {e}"));
                self.client
                    .record(&self.tags, &method, &url, &params, &response, Duration::ZERO);
                response
            }
        }
    }
}
