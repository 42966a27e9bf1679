use std::time::Duration;
use tracing::warn;

/// Интервалы и пороги таймера
#[derive(Clone, Debug)]
pub struct TimerTimings {
    /// Частота обновления дисплея (презентационный тик, без сети)
    pub display_refresh: Duration,
    /// Фоновая сверка с сервером, пока таймер идёт
    pub reconcile_interval: Duration,
    /// Окно тишины для debounce sync
    pub debounce: Duration,
    /// Расхождение локальных и серверных часов, после которого берём серверное значение
    pub drift_threshold_ms: u64,
    /// Сессии старше этого при старте считаются протухшими
    pub max_session_age: Duration,
    /// Обновление daily-summary, пока таймер не идёт
    pub summary_refresh: Duration,
}

impl Default for TimerTimings {
    fn default() -> Self {
        Self {
            display_refresh: Duration::from_millis(100),
            reconcile_interval: Duration::from_secs(60),
            debounce: Duration::from_secs(1),
            drift_threshold_ms: 10_000,
            max_session_age: Duration::from_secs(24 * 60 * 60),
            summary_refresh: Duration::from_secs(5 * 60),
        }
    }
}

/// Конфигурация клиента (api_base_url, таймауты, app_version)
#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub api_base_url: String,
    pub http_timeout_secs: u64,
    /// App version sent in X-App-Version header for debugging version skew
    pub app_version: String,
    /// Cookie сессии бэкенда (логин вне области клиента)
    pub session_cookie: Option<String>,
    pub timings: TimerTimings,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://127.0.0.1:5000".to_string(),
            http_timeout_secs: 30,
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            session_cookie: None,
            timings: TimerTimings::default(),
        }
    }
}

impl ClientConfig {
    /// Default + переопределения из TASKCLOCK_* переменных окружения
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(url) = lookup("TASKCLOCK_API_URL") {
            config.api_base_url = url.trim_end_matches('/').to_string();
        }
        if let Some(raw) = lookup("TASKCLOCK_HTTP_TIMEOUT_SECS") {
            match raw.parse() {
                Ok(secs) => config.http_timeout_secs = secs,
                Err(e) => warn!("[CONFIG] Ignoring TASKCLOCK_HTTP_TIMEOUT_SECS={}: {}", raw, e),
            }
        }
        if let Some(raw) = lookup("TASKCLOCK_SYNC_INTERVAL_SECS") {
            match raw.parse::<u64>() {
                Ok(secs) if secs > 0 => {
                    config.timings.reconcile_interval = Duration::from_secs(secs)
                }
                _ => warn!("[CONFIG] Ignoring TASKCLOCK_SYNC_INTERVAL_SECS={}", raw),
            }
        }
        config.session_cookie = lookup("TASKCLOCK_SESSION_COOKIE").filter(|c| !c.is_empty());

        config
    }
}
