use crate::auth::AuthManager;
use crate::config::ClientConfig;
use crate::models::{
    ActivityLogRequest, CleanupRequest, DailySummary, PauseReply, StartReply, StartRequest,
    StopReply, SyncReply, TimedRequest,
};
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Ошибки транспорта (для разбора и логирования)
#[derive(Debug, Clone, PartialEq)]
pub enum ApiError {
    Network(String),
    Http { status: u16, message: String },
    /// 401: сессия бэкенда потеряна, нужен повторный логин
    Unauthorized,
    Decode(String),
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::Network(s) => write!(f, "Network: {}", s),
            ApiError::Http { status, message } => write!(f, "HTTP {}: {}", status, message),
            ApiError::Unauthorized => write!(f, "Unauthorized (login required)"),
            ApiError::Decode(s) => write!(f, "Decode: {}", s),
        }
    }
}

impl std::error::Error for ApiError {}

/// Серверные эндпоинты, которые использует ядро таймера
#[async_trait]
pub trait TimerApi: Send + Sync {
    async fn start_timer(&self, request: &StartRequest) -> Result<StartReply, ApiError>;
    async fn pause_timer(&self, request: &TimedRequest) -> Result<PauseReply, ApiError>;
    async fn stop_timer(&self, request: &TimedRequest) -> Result<StopReply, ApiError>;
    async fn sync_timer(&self, request: &TimedRequest) -> Result<SyncReply, ApiError>;
    /// Best-effort: тело ответа не важно
    async fn cleanup_timer(&self, request: &CleanupRequest) -> Result<(), ApiError>;
    async fn daily_summary(&self, date: NaiveDate) -> Result<DailySummary, ApiError>;
    async fn log_activity(&self, request: &ActivityLogRequest) -> Result<(), ApiError>;
}

/// HTTP-реализация TimerApi поверх reqwest
pub struct HttpTimerApi {
    client: reqwest::Client,
    api_base_url: String,
    app_version: String,
    auth: Arc<AuthManager>,
}

impl HttpTimerApi {
    pub fn new(config: &ClientConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        let api_base_url = config.api_base_url.trim_end_matches('/').to_string();
        Self {
            auth: Arc::new(AuthManager::new(
                api_base_url.clone(),
                config.session_cookie.clone(),
            )),
            client,
            api_base_url,
            app_version: config.app_version.clone(),
        }
    }

    fn check_status(status: StatusCode) -> Result<(), ApiError> {
        if status == StatusCode::UNAUTHORIZED {
            warn!("[API] 401 from backend, login required");
            return Err(ApiError::Unauthorized);
        }
        Ok(())
    }

    async fn into_error(response: reqwest::Response) -> ApiError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        // Бэкенд отдаёт {"error": "..."} или {"message": "..."}
        let message = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| {
                v["error"]
                    .as_str()
                    .or_else(|| v["message"].as_str())
                    .map(|s| s.to_string())
            })
            .unwrap_or_else(|| {
                if body.is_empty() {
                    status.canonical_reason().unwrap_or("Unknown").to_string()
                } else {
                    body
                }
            });
        ApiError::Http {
            status: status.as_u16(),
            message,
        }
    }

    /// POST с CSRF: при 400 токен обновляется и запрос повторяется один раз
    async fn post<B: Serialize + Sync>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<reqwest::Response, ApiError> {
        let url = format!("{}{}", self.api_base_url, path);
        let mut csrf_retry_used = false;

        loop {
            let token = self.auth.get_csrf_token(&self.client).await;
            let mut request = self
                .client
                .post(&url)
                .header("Content-Type", "application/json")
                .header("X-App-Version", &self.app_version);
            if let Some(token) = token.as_deref() {
                request = request.header("X-CSRFToken", token);
            }
            if let Some(cookie) = self.auth.session_cookie() {
                request = request.header("Cookie", cookie);
            }

            let response = request
                .json(body)
                .send()
                .await
                .map_err(|e| ApiError::Network(e.to_string()))?;
            let status = response.status();
            Self::check_status(status)?;

            if status == StatusCode::BAD_REQUEST && !csrf_retry_used {
                csrf_retry_used = true;
                self.auth.invalidate_csrf_token().await;
                let fresh = self.auth.get_csrf_token(&self.client).await;
                if fresh.is_some() && fresh != token {
                    info!("[API] {} returned 400, retrying once with fresh CSRF token", path);
                    continue;
                }
            }

            if !status.is_success() {
                return Err(Self::into_error(response).await);
            }
            return Ok(response);
        }
    }

    async fn post_json<B: Serialize + Sync, R: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R, ApiError> {
        let response = self.post(path, body).await?;
        response
            .json::<R>()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))
    }
}

#[async_trait]
impl TimerApi for HttpTimerApi {
    async fn start_timer(&self, request: &StartRequest) -> Result<StartReply, ApiError> {
        self.post_json("/api/timer/start", request).await
    }

    async fn pause_timer(&self, request: &TimedRequest) -> Result<PauseReply, ApiError> {
        self.post_json("/api/timer/pause", request).await
    }

    async fn stop_timer(&self, request: &TimedRequest) -> Result<StopReply, ApiError> {
        self.post_json("/api/timer/stop", request).await
    }

    async fn sync_timer(&self, request: &TimedRequest) -> Result<SyncReply, ApiError> {
        self.post_json("/api/timer/sync", request).await
    }

    async fn cleanup_timer(&self, request: &CleanupRequest) -> Result<(), ApiError> {
        self.post("/api/timer/cleanup", request).await.map(|_| ())
    }

    async fn daily_summary(&self, date: NaiveDate) -> Result<DailySummary, ApiError> {
        let url = format!("{}/api/daily-summary", self.api_base_url);
        let date_str = date.format("%Y-%m-%d").to_string();
        debug!("[API] GET daily-summary for {}", date_str);

        let mut request = self
            .client
            .get(&url)
            .query(&[("date", date_str.as_str())])
            .header("X-App-Version", &self.app_version);
        if let Some(cookie) = self.auth.session_cookie() {
            request = request.header("Cookie", cookie);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;
        Self::check_status(response.status())?;
        if !response.status().is_success() {
            return Err(Self::into_error(response).await);
        }
        response
            .json::<DailySummary>()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))
    }

    async fn log_activity(&self, request: &ActivityLogRequest) -> Result<(), ApiError> {
        self.post("/api/activity/log", request).await.map(|_| ())
    }
}
