//! Signed, retrying HTTP transport. Every request is re-signed on each
//! retry attempt (a fresh nonce and date), matching the original client's
//! behavior of never reusing a signature across attempts.

use std::time::Duration;

use reqwest::{Method, Response, StatusCode};
use serde::Serialize;

use crate::error::ClientError;
use crate::signer::Signer;

#[derive(Clone)]
pub struct Transport {
    http: reqwest::Client,
    base_url: String,
    signer: Signer,
    max_retries: u32,
}

impl Transport {
    pub fn new(base_url: impl Into<String>, signer: Signer, max_retries: u32) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(3))
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Transport {
            http,
            base_url: base_url.into(),
            signer,
            max_retries,
        })
    }

    pub async fn get(&self, path_and_query: &str) -> Result<Response, ClientError> {
        self.execute(Method::GET, path_and_query, None::<&()>).await
    }

    pub async fn post_json<B: Serialize + ?Sized>(
        &self,
        path_and_query: &str,
        body: &B,
    ) -> Result<Response, ClientError> {
        self.execute(Method::POST, path_and_query, Some(body)).await
    }

    pub async fn patch_json<B: Serialize + ?Sized>(
        &self,
        path_and_query: &str,
        body: &B,
    ) -> Result<Response, ClientError> {
        self.execute(Method::PATCH, path_and_query, Some(body)).await
    }

    async fn execute<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path_and_query: &str,
        body: Option<&B>,
    ) -> Result<Response, ClientError> {
        let operation = format!("{method} {path_and_query}");
        let mut attempt = 0u32;
        loop {
            let signed_path = self.signer.sign(method.as_str(), path_and_query)?;
            let url = format!("{}{}", self.base_url, signed_path);
            let mut req = self.http.request(method.clone(), &url);
            if let Some(body) = body {
                req = req.json(body);
            }

            match req.send().await {
                Ok(resp) if is_retryable_status(resp.status()) && attempt < self.max_retries => {
                    tracing::warn!(status = %resp.status(), attempt, %operation, "retrying request");
                    attempt += 1;
                    backoff(attempt).await;
                    continue;
                }
                Ok(resp) => return Ok(resp),
                Err(e) if attempt < self.max_retries && (e.is_timeout() || e.is_connect()) => {
                    tracing::warn!(error = %e, attempt, %operation, "retrying after transport error");
                    attempt += 1;
                    backoff(attempt).await;
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

async fn backoff(attempt: u32) {
    let millis = 100u64.saturating_mul(1u64 << attempt.min(6));
    tokio::time::sleep(Duration::from_millis(millis)).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::method as method_matcher;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn retries_on_server_error_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method_matcher("GET"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method_matcher("GET"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let signer = Signer::new("key1", "secret", 600);
        let transport = Transport::new(server.uri(), signer, 5).unwrap();
        let resp = transport.get("/v1/repos/acme/widgets").await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let server = MockServer::start().await;
        Mock::given(method_matcher("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let signer = Signer::new("key1", "secret", 600);
        let transport = Transport::new(server.uri(), signer, 1).unwrap();
        let resp = transport.get("/v1/repos/acme/widgets").await.unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
