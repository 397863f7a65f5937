use crate::config::{self, HarvestConfig};
use crate::error::{AppError, AppResult};
use crate::logging::{log, LogLevel};
use bytes::Bytes;
use reqwest::{Client, RequestBuilder, Response, StatusCode};

/// Thin reqwest wrapper. Each call is exactly one attempt; retries and pacing
/// belong to the caller.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
}

impl ApiClient {
    pub fn new(cfg: &HarvestConfig) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(cfg.request_timeout)
            .connect_timeout(std::time::Duration::from_secs(config::HTTP_CONNECT_TIMEOUT))
            .default_headers(config::BASE_UA_HEADERS.clone())
            .gzip(true)
            .build()
            .map_err(|e| AppError::ConfigError(format!("HTTP client setup failed: {}", e)))?;
        Ok(ApiClient { client })
    }

    pub async fn get(&self, url: &str, query: &[(&str, String)], ctx: &str) -> AppResult<Bytes> {
        self.send(self.client.get(url).query(query), ctx).await
    }

    pub async fn post_form(
        &self,
        url: &str,
        query: &[(&str, String)],
        form: &[(&str, String)],
        ctx: &str,
    ) -> AppResult<Bytes> {
        self.send(self.client.post(url).query(query).form(form), ctx)
            .await
    }

    async fn send(&self, request: RequestBuilder, ctx: &str) -> AppResult<Bytes> {
        let resp = request
            .send()
            .await
            .map_err(|e| transport_error(e, ctx))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(self.handle_http_error(resp, status, ctx).await);
        }
        resp.bytes().await.map_err(|e| {
            log(
                LogLevel::Debug,
                &format!("{} - Error reading success response body: {}", ctx, e),
            );
            transport_error(e, ctx)
        })
    }

    async fn handle_http_error(&self, resp: Response, status: StatusCode, ctx: &str) -> AppError {
        if status == StatusCode::FORBIDDEN {
            return AppError::blocked(ctx, status.as_u16());
        }

        let resp_text = resp
            .text()
            .await
            .unwrap_or_else(|_| "Failed to read error body".to_string());
        let error_message = format!(
            "HTTP {} ({}). Body: {}...",
            status.as_u16(),
            status.canonical_reason().unwrap_or("Unknown Status"),
            resp_text.chars().take(150).collect::<String>()
        );
        classify_status(status, ctx, error_message)
    }
}

/// 403 blocks, 408/429/5xx are transient, any other 4xx is a bad request.
pub fn classify_status(status: StatusCode, ctx: &str, message: String) -> AppError {
    if status == StatusCode::FORBIDDEN {
        AppError::blocked(ctx, status.as_u16())
    } else if status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
    {
        AppError::retryable(ctx, message)
    } else {
        AppError::Fatal(format!("{} - {}", ctx, message))
    }
}

fn transport_error(e: reqwest::Error, ctx: &str) -> AppError {
    if e.is_timeout() {
        AppError::Timeout(format!("{} - {}", ctx, e))
    } else if e.is_builder() {
        AppError::Fatal(format!("{} - invalid request: {}", ctx, e))
    } else if e.is_connect() {
        AppError::retryable(ctx, format!("Connection error: {}", e))
    } else {
        AppError::retryable(ctx, format!("Request error: {}", e))
    }
}
