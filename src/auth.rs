use std::sync::Arc;
use tracing::{debug, warn};

/// Менеджер анти-CSRF токена и cookie сессии бэкенда.
/// Токен кэшируется и перезапрашивается после инвалидации.
pub struct AuthManager {
    api_base_url: String,
    session_cookie: Option<String>,
    pub csrf_token: Arc<tokio::sync::RwLock<Option<String>>>,
}

impl AuthManager {
    pub fn new(api_base_url: String, session_cookie: Option<String>) -> Self {
        Self {
            api_base_url,
            session_cookie,
            csrf_token: Arc::new(tokio::sync::RwLock::new(None)),
        }
    }

    pub fn session_cookie(&self) -> Option<&str> {
        self.session_cookie.as_deref()
    }

    pub async fn set_csrf_token(&self, token: Option<String>) {
        *self.csrf_token.write().await = token;
    }

    /// Сбросить токен (например, сервер ответил 400 на изменяющий запрос)
    pub async fn invalidate_csrf_token(&self) {
        self.set_csrf_token(None).await;
    }

    /// Получить CSRF токен: из кэша или с сервера.
    /// None: запрос уйдёт без заголовка, сервер сам решит
    pub async fn get_csrf_token(&self, client: &reqwest::Client) -> Option<String> {
        if let Some(token) = self.csrf_token.read().await.clone() {
            return Some(token);
        }

        match self.fetch_csrf_token(client).await {
            Ok(token) => {
                debug!("[AUTH] CSRF token refreshed");
                self.set_csrf_token(Some(token.clone())).await;
                Some(token)
            }
            Err(e) => {
                warn!("[AUTH] Failed to get CSRF token: {}", e);
                None
            }
        }
    }

    async fn fetch_csrf_token(&self, client: &reqwest::Client) -> Result<String, String> {
        let url = format!("{}/api/csrf-token", self.api_base_url);
        let mut request = client.get(&url);
        if let Some(cookie) = self.session_cookie() {
            request = request.header("Cookie", cookie);
        }

        let response = request
            .send()
            .await
            .map_err(|e| format!("Network error during CSRF token fetch: {}", e))?;

        if !response.status().is_success() {
            return Err(format!(
                "CSRF token fetch failed with status: {}",
                response.status()
            ));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| format!("Failed to parse CSRF response: {}", e))?;

        json["csrf_token"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| "Missing csrf_token in response".to_string())
    }
}
