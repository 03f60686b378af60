use crate::domain::{HttpMethod, Sample, SampleErrorKind};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::Client;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SamplerError {
    #[error("invalid header name `{name}`: {reason}")]
    InvalidHeaderName { name: String, reason: String },
    #[error("invalid header value for `{name}`: {reason}")]
    InvalidHeaderValue { name: String, reason: String },
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Issues exactly one request and reports how it went. Never retries.
#[async_trait]
pub trait Sampler: Send + Sync {
    async fn sample(&self, method: HttpMethod, body: Option<&str>) -> Sample;
}

pub fn build_headers(input: &HashMap<String, String>) -> Result<HeaderMap, SamplerError> {
    let mut headers = HeaderMap::new();

    for (key, value) in input {
        if key.is_empty() {
            continue;
        }

        let header_name =
            HeaderName::from_bytes(key.as_bytes()).map_err(|err| SamplerError::InvalidHeaderName {
                name: key.clone(),
                reason: err.to_string(),
            })?;
        let header_value =
            HeaderValue::from_str(value).map_err(|err| SamplerError::InvalidHeaderValue {
                name: key.clone(),
                reason: err.to_string(),
            })?;
        headers.insert(header_name, header_value);
    }

    Ok(headers)
}

/// Which part of the exchange a transport error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Send,
    ReadBody,
}

fn classify_reqwest_error(err: &reqwest::Error, stage: Stage) -> SampleErrorKind {
    if err.is_timeout() {
        return SampleErrorKind::Timeout;
    }
    // Once headers arrived the connection is established.
    if stage == Stage::ReadBody {
        return SampleErrorKind::ReadError;
    }

    let message = err.to_string().to_ascii_lowercase();
    if message.contains("dns") || message.contains("failed to lookup address") {
        SampleErrorKind::DnsError
    } else if message.contains("tls") || message.contains("certificate") {
        SampleErrorKind::TlsError
    } else if err.is_connect() {
        SampleErrorKind::ConnectError
    } else {
        SampleErrorKind::ReadError
    }
}

fn elapsed_ms(started_at: Instant) -> f64 {
    started_at.elapsed().as_secs_f64() * 1000.0
}

/// Sampler backed by a pooled `reqwest` client.
pub struct HttpSampler {
    client: Client,
    url: String,
    headers: HeaderMap,
}

impl HttpSampler {
    pub fn new(
        url: impl Into<String>,
        headers: &HashMap<String, String>,
        timeout: Duration,
    ) -> Result<Self, SamplerError> {
        let client = Client::builder()
            .redirect(reqwest::redirect::Policy::limited(10))
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            url: url.into(),
            headers: build_headers(headers)?,
        })
    }
}

#[async_trait]
impl Sampler for HttpSampler {
    async fn sample(&self, method: HttpMethod, body: Option<&str>) -> Sample {
        let started_at = Instant::now();
        let mut request = self
            .client
            .request(method.into(), &self.url)
            .headers(self.headers.clone());

        if let Some(body) = body {
            if !self.headers.contains_key(CONTENT_TYPE) {
                request = request.header(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            }
            request = request.body(body.to_string());
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(err) => {
                let kind = classify_reqwest_error(&err, Stage::Send);
                return Sample::failed(method, elapsed_ms(started_at), kind);
            }
        };

        let status = response.status().as_u16();
        match response.bytes().await {
            Ok(_) => Sample::succeeded(method, elapsed_ms(started_at), status),
            Err(err) => Sample {
                status_code: Some(status),
                ..Sample::failed(
                    method,
                    elapsed_ms(started_at),
                    classify_reqwest_error(&err, Stage::ReadBody),
                )
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn headers(entries: &[(&str, &str)]) -> HashMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn build_headers_rejects_invalid_names() {
        assert!(build_headers(&headers(&[("Authorization", "Bearer x")])).is_ok());
        assert!(matches!(
            build_headers(&headers(&[("bad header", "x")])),
            Err(SamplerError::InvalidHeaderName { .. })
        ));
    }

    #[tokio::test]
    async fn any_response_counts_as_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&server)
            .await;

        let sampler = HttpSampler::new(
            format!("{}/health", server.uri()),
            &HashMap::new(),
            Duration::from_secs(5),
        )
        .expect("sampler");
        let sample = sampler.sample(HttpMethod::Get, None).await;

        assert!(sample.success);
        assert_eq!(sample.status_code, Some(503));
        assert_eq!(sample.error, None);
        assert!(sample.latency_ms > 0.0);
    }

    #[tokio::test]
    async fn body_and_headers_are_attached() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("x-api-key", "secret"))
            .and(header("content-type", "application/json"))
            .and(body_string(r#"{"email":"a@b.c"}"#))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let sampler = HttpSampler::new(
            server.uri(),
            &headers(&[("x-api-key", "secret")]),
            Duration::from_secs(5),
        )
        .expect("sampler");
        let sample = sampler
            .sample(HttpMethod::Post, Some(r#"{"email":"a@b.c"}"#))
            .await;

        assert!(sample.success);
        assert_eq!(sample.method, HttpMethod::Post);
        assert_eq!(sample.status_code, Some(201));
    }

    #[tokio::test]
    async fn slow_target_is_recorded_as_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let sampler = HttpSampler::new(server.uri(), &HashMap::new(), Duration::from_millis(50))
            .expect("sampler");
        let sample = sampler.sample(HttpMethod::Get, None).await;

        assert!(!sample.success);
        assert_eq!(sample.error, Some(SampleErrorKind::Timeout));
    }

    #[tokio::test]
    async fn unreachable_target_is_a_failed_sample() {
        let sampler = HttpSampler::new("http://127.0.0.1:1", &HashMap::new(), Duration::from_secs(2))
            .expect("sampler");
        let sample = sampler.sample(HttpMethod::Delete, None).await;

        assert!(!sample.success);
        assert!(sample.error.is_some());
        assert_eq!(sample.status_code, None);
    }
}
