//! Centralized UI event names and payloads.
//! The engine only emits; rendering layers subscribe and read.

use crate::engine::TimerSnapshot;
use crate::models::{Task, TaskId};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// Event names (engine emit ↔ UI listen)
pub mod events {
    pub const TIMER_STATE_UPDATE: &str = "timer-state-update";
    /// Sub-second display refresh while running
    pub const TIMER_DISPLAY_TICK: &str = "timer-display-tick";
    pub const TIMER_CONTROLS: &str = "timer-controls";
    pub const TASK_UPDATED: &str = "task-updated";
    pub const TASKS_REFRESHED: &str = "tasks-refreshed";
    pub const NOTIFICATION: &str = "notification";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    Success,
    Info,
    Warning,
    Error,
}

/// Состояние кнопок и блокировки выбора задачи
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ControlState {
    pub start_enabled: bool,
    pub pause_enabled: bool,
    pub stop_enabled: bool,
    pub task_switch_locked: bool,
}

impl ControlState {
    pub fn running() -> Self {
        Self {
            start_enabled: false,
            pause_enabled: true,
            stop_enabled: true,
            task_switch_locked: true,
        }
    }

    pub fn paused() -> Self {
        Self {
            start_enabled: true,
            pause_enabled: false,
            stop_enabled: true,
            task_switch_locked: false,
        }
    }

    pub fn idle() -> Self {
        Self {
            start_enabled: true,
            pause_enabled: false,
            stop_enabled: false,
            task_switch_locked: false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "payload", rename_all = "kebab-case")]
pub enum UiEvent {
    StateChanged(TimerSnapshot),
    Display {
        task_id: Option<TaskId>,
        elapsed_ms: u64,
        text: String,
    },
    Controls(ControlState),
    TaskUpdated(Task),
    TasksRefreshed { count: usize },
    Notification {
        level: NotificationLevel,
        message: String,
    },
}

impl UiEvent {
    pub fn name(&self) -> &'static str {
        match self {
            UiEvent::StateChanged(_) => events::TIMER_STATE_UPDATE,
            UiEvent::Display { .. } => events::TIMER_DISPLAY_TICK,
            UiEvent::Controls(_) => events::TIMER_CONTROLS,
            UiEvent::TaskUpdated(_) => events::TASK_UPDATED,
            UiEvent::TasksRefreshed { .. } => events::TASKS_REFRESHED,
            UiEvent::Notification { .. } => events::NOTIFICATION,
        }
    }
}

/// Broadcast-канал событий UI
#[derive(Clone)]
pub struct Notifier {
    tx: broadcast::Sender<UiEvent>,
}

impl Notifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UiEvent> {
        self.tx.subscribe()
    }

    /// Нет подписчиков: событие просто теряется
    pub fn emit(&self, event: UiEvent) {
        let _ = self.tx.send(event);
    }

    /// Пользовательское уведомление (дублируется в лог)
    pub fn notify(&self, level: NotificationLevel, message: impl Into<String>) {
        let message = message.into();
        match level {
            NotificationLevel::Success | NotificationLevel::Info => info!("[NOTIFY] {}", message),
            NotificationLevel::Warning => warn!("[NOTIFY] {}", message),
            NotificationLevel::Error => error!("[NOTIFY] {}", message),
        }
        self.emit(UiEvent::Notification { level, message });
    }
}
