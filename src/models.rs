use crate::engine::SessionId;
use serde::{Deserialize, Deserializer, Serialize};

pub type TaskId = i64;

/// Статус задачи на бэкенде
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Paused,
    Completed,
}

/// Задача из daily-summary (кэшируемая копия серверной записи)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    #[serde(default, deserialize_with = "null_as_default")]
    pub title: String,
    pub status: TaskStatus,
    /// Подтверждённое время работы, мс
    #[serde(default, deserialize_with = "null_as_default")]
    pub time_spent: u64,
    #[serde(default)]
    pub timer_session_id: Option<String>,
    /// Серверный wall-clock начала текущего сегмента (ISO-8601)
    #[serde(default)]
    pub timer_start_time: Option<String>,
}

impl Task {
    /// Задача с активной серверной сессией (кандидат на восстановление)
    pub fn has_running_timer(&self) -> bool {
        self.status == TaskStatus::InProgress
            && self
                .timer_session_id
                .as_deref()
                .is_some_and(|id| !id.is_empty())
    }
}

/// Бэкенд отдаёт null вместо 0 / пустой строки для старых записей
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DailySummary {
    #[serde(default)]
    pub tasks: Vec<Task>,
}

// ============================================
// TIMER API PAYLOADS
// ============================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StartRequest {
    pub task_id: TaskId,
    pub session_id: SessionId,
}

/// pause / stop / sync: кандидат времени от клиента
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimedRequest {
    pub task_id: TaskId,
    pub session_id: SessionId,
    pub client_time: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CleanupRequest {
    pub task_id: TaskId,
    pub session_id: SessionId,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivityLogRequest {
    pub message: String,
    pub task_db_id: Option<TaskId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyStatus {
    Success,
    SessionInvalid,
    Error,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StartReply {
    pub status: ReplyStatus,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PauseReply {
    pub status: ReplyStatus,
    #[serde(default, deserialize_with = "null_as_default")]
    pub time_spent: u64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub elapsed_in_session: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StopReply {
    pub status: ReplyStatus,
    #[serde(default, deserialize_with = "null_as_default")]
    pub time_spent: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SyncReply {
    pub status: ReplyStatus,
    #[serde(default, deserialize_with = "null_as_default")]
    pub time_spent: u64,
    /// time_spent + текущий сегмент, если бэкенд его считает
    #[serde(default)]
    pub total_display_time: Option<u64>,
}

impl SyncReply {
    /// Серверное elapsed для сравнения с локальными часами
    pub fn server_elapsed(&self) -> u64 {
        self.total_display_time.unwrap_or(self.time_spent)
    }
}
