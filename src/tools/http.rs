//! api_call 步骤：共享 reqwest Client，带超时；2xx 视为成功，响应体只读取前 output_cap 字节

use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::{Client, Method};
use serde_json::Value;

use super::{capped_text, StepFailure, StepResult};
use crate::plan::HttpMethod;

const USER_AGENT: &str = concat!("taskforge/", env!("CARGO_PKG_VERSION"));

pub struct ApiCaller {
    client: Client,
    timeout: Duration,
    output_cap: usize,
}

/// 按块读取响应体，超过 cap 即停止读取；返回 (内容, 是否截断)
async fn read_body(mut resp: reqwest::Response, cap: usize) -> reqwest::Result<(Vec<u8>, bool)> {
    let mut buf = Vec::with_capacity(cap.min(8192));
    while let Some(chunk) = resp.chunk().await? {
        let room = cap - buf.len();
        if chunk.len() > room {
            buf.extend_from_slice(&chunk[..room]);
            return Ok((buf, true));
        }
        buf.extend_from_slice(&chunk);
    }
    Ok((buf, false))
}

fn to_method(method: HttpMethod) -> Method {
    match method {
        HttpMethod::Get => Method::GET,
        HttpMethod::Post => Method::POST,
        HttpMethod::Put => Method::PUT,
        HttpMethod::Patch => Method::PATCH,
        HttpMethod::Delete => Method::DELETE,
    }
}

impl ApiCaller {
    pub fn new(timeout: Duration, output_cap: usize) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            timeout,
            output_cap,
        }
    }

    pub async fn call(
        &self,
        url: &str,
        method: HttpMethod,
        body: Option<&Value>,
        headers: &BTreeMap<String, String>,
    ) -> StepResult {
        let mut req = self.client.request(to_method(method), url);
        for (k, v) in headers {
            req = req.header(k.as_str(), v.as_str());
        }
        if let Some(body) = body {
            req = req.json(body);
        }

        tracing::info!(method = %method, url = %url, "api_call step");
        let resp = match req.send().await {
            Ok(resp) => resp,
            Err(e) if e.is_timeout() => {
                return StepResult::failed(StepFailure::TimedOut(self.timeout.as_secs()), "", None)
            }
            Err(e) => return StepResult::failed(StepFailure::Transport(e.to_string()), "", None),
        };

        let status = resp.status();
        let excerpt = match read_body(resp, self.output_cap).await {
            Ok((body, truncated)) => capped_text(&body, truncated),
            Err(e) if e.is_timeout() => {
                return StepResult::failed(StepFailure::TimedOut(self.timeout.as_secs()), "", None)
            }
            Err(e) => return StepResult::failed(StepFailure::Transport(e.to_string()), "", None),
        };
        if status.is_success() {
            StepResult::ok(excerpt)
        } else {
            StepResult::failed(
                StepFailure::HttpStatus(status.as_u16()),
                excerpt,
                Some(format!("HTTP {status}")),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    #[tokio::test]
    async fn test_post_json_with_headers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hooks/build"))
            .and(header("x-token", "abc"))
            .and(body_json(json!({"ref": "main"})))
            .respond_with(ResponseTemplate::new(201).set_body_string("queued"))
            .expect(1)
            .mount(&server)
            .await;

        let caller = ApiCaller::new(Duration::from_secs(5), 1024);
        let mut headers = BTreeMap::new();
        headers.insert("x-token".to_string(), "abc".to_string());
        let r = caller
            .call(
                &format!("{}/hooks/build", server.uri()),
                HttpMethod::Post,
                Some(&json!({"ref": "main"})),
                &headers,
            )
            .await;
        assert!(r.success, "{r:?}");
        assert_eq!(r.output, "queued");
    }

    #[tokio::test]
    async fn test_non_2xx_is_failure_with_body_excerpt() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404).set_body_string("no such thing"))
            .mount(&server)
            .await;

        let caller = ApiCaller::new(Duration::from_secs(5), 1024);
        let r = caller
            .call(&server.uri(), HttpMethod::Get, None, &BTreeMap::new())
            .await;
        assert!(!r.success);
        assert_eq!(r.failure, Some(StepFailure::HttpStatus(404)));
        assert_eq!(r.output, "no such thing");
    }

    #[tokio::test]
    async fn test_large_body_is_capped() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("b".repeat(1 << 20)))
            .mount(&server)
            .await;

        let caller = ApiCaller::new(Duration::from_secs(5), 32);
        let r = caller
            .call(&server.uri(), HttpMethod::Get, None, &BTreeMap::new())
            .await;
        assert!(r.success);
        assert_eq!(r.output, format!("{}{}", "b".repeat(32), crate::tools::TRUNCATION_MARKER));
    }

    #[tokio::test]
    async fn test_slow_endpoint_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
            .mount(&server)
            .await;

        let caller = ApiCaller::new(Duration::from_millis(200), 1024);
        let r = caller
            .call(&server.uri(), HttpMethod::Get, None, &BTreeMap::new())
            .await;
        assert!(!r.success);
        assert!(matches!(r.failure, Some(StepFailure::TimedOut(_))));
    }

    #[tokio::test]
    async fn test_unreachable_host_is_transport_failure() {
        let caller = ApiCaller::new(Duration::from_secs(2), 1024);
        let r = caller
            .call("http://127.0.0.1:9/", HttpMethod::Get, None, &BTreeMap::new())
            .await;
        assert!(!r.success);
        assert!(matches!(r.failure, Some(StepFailure::Transport(_))));
    }
}
