use crate::engine::TimerEngine;
use crate::sync::SyncTrigger;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Сигналы видимости и фокуса окна → запросы сверки
pub struct PresenceMonitor {
    pub is_visible: Arc<Mutex<bool>>,
    engine: TimerEngine,
}

impl PresenceMonitor {
    /// Окно при запуске считается видимым
    pub fn new(engine: TimerEngine) -> Self {
        Self {
            is_visible: Arc::new(Mutex::new(true)),
            engine,
        }
    }

    /// Только переход hidden → visible запрашивает sync.
    /// Возвращает true, если sync запланирован
    pub fn visibility_changed(&self, visible: bool) -> bool {
        let regained = match self.is_visible.lock() {
            Ok(mut current) => {
                let was_visible = *current;
                *current = visible;
                visible && !was_visible
            }
            Err(_) => false,
        };
        if !regained {
            debug!("[MONITOR] Visibility → {}, no sync", visible);
            return false;
        }
        self.engine.request_sync(SyncTrigger::VisibilityRegained)
    }

    pub fn focus_gained(&self) -> bool {
        self.engine.request_sync(SyncTrigger::FocusGained)
    }

    pub fn is_visible(&self) -> bool {
        self.is_visible.lock().map(|v| *v).unwrap_or(true)
    }
}
