use crate::config::TimerTimings;
use crate::format::format_time;
use crate::ipc::{NotificationLevel, Notifier, UiEvent};
use crate::models::{Task, TaskId};
use crate::network::{ApiError, TimerApi};
use crate::sync::SessionScope;
use chrono::{Local, NaiveDate};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinHandle;
mod clock;
mod core;
mod recovery;
mod session;
pub use clock::LocalClock;
pub use recovery::{assess_running_task, parse_server_timestamp, RecoveryOutcome, ResumeDecision};
pub use session::SessionId;

/// Timer Engine - строгая FSM поверх локальных часов и серверной записи.
/// Сессию мутируют только методы движка; UI читает snapshot и события.
#[derive(Clone)]
pub struct TimerEngine {
    /// Состояние FSM - единственный источник истины для клиента
    pub(crate) session: Arc<Mutex<TimerSession>>,
    /// Кэш задач текущего дня (копия серверных записей)
    pub(crate) tasks: Arc<Mutex<TaskCache>>,
    /// Дата, которую сейчас смотрит пользователь
    pub(crate) view_date: Arc<Mutex<NaiveDate>>,
    /// Фоновые задачи активной сессии (дисплей, сверка, debounce)
    pub(crate) scope: Arc<Mutex<Option<SessionScope>>>,
    /// Single-flight для sync
    pub(crate) sync_in_flight: Arc<AtomicBool>,
    pub(crate) api: Arc<dyn TimerApi>,
    pub(crate) notifier: Notifier,
    pub(crate) timings: TimerTimings,
}

/// Состояние таймера - строгая FSM.
/// Running без session_id физически невозможен
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerState {
    Stopped,
    Running { session_id: SessionId },
    /// Пауза подтверждена сервером; id нужен для stop
    Paused { session_id: SessionId },
}

impl TimerState {
    pub fn session_id(&self) -> Option<&SessionId> {
        match self {
            TimerState::Stopped => None,
            TimerState::Running { session_id } | TimerState::Paused { session_id } => {
                Some(session_id)
            }
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            TimerState::Stopped => "stopped",
            TimerState::Running { .. } => "running",
            TimerState::Paused { .. } => "paused",
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, TimerState::Running { .. })
    }
}

/// Эфемерная сессия таймера (не персистится)
#[derive(Debug, Default)]
pub struct TimerSession {
    pub(crate) state: TimerState,
    pub(crate) selected_task: Option<TaskId>,
    pub(crate) clock: LocalClock,
}

impl Default for TimerState {
    fn default() -> Self {
        TimerState::Stopped
    }
}

impl TimerSession {
    /// Совпадают ли задача и сессия с активными
    pub(crate) fn matches(&self, task_id: TaskId, session_id: &SessionId) -> bool {
        self.selected_task == Some(task_id) && self.state.session_id() == Some(session_id)
    }

    /// Полный сброс в Stopped: выбор, сессия и часы очищаются
    pub(crate) fn clear(&mut self) -> u64 {
        self.state = TimerState::Stopped;
        self.selected_task = None;
        self.clock.stop()
    }
}

/// Кэш задач дня
#[derive(Debug, Default)]
pub struct TaskCache {
    tasks: Vec<Task>,
}

impl TaskCache {
    pub fn get(&self, id: TaskId) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn get_mut(&mut self, id: TaskId) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.id == id)
    }

    pub fn replace_all(&mut self, tasks: Vec<Task>) {
        self.tasks = tasks;
    }

    pub fn all(&self) -> &[Task] {
        &self.tasks
    }
}

/// Снимок для UI (без Instant)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimerSnapshot {
    #[serde(flatten)]
    pub state: TimerStateForApi,
    pub task_id: Option<TaskId>,
    pub elapsed_ms: u64,
    pub display: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(tag = "state")]
pub enum TimerStateForApi {
    Stopped,
    Running { session_id: SessionId },
    Paused { session_id: SessionId },
}

impl From<&TimerState> for TimerStateForApi {
    fn from(state: &TimerState) -> Self {
        match state {
            TimerState::Stopped => TimerStateForApi::Stopped,
            TimerState::Running { session_id } => TimerStateForApi::Running {
                session_id: session_id.clone(),
            },
            TimerState::Paused { session_id } => TimerStateForApi::Paused {
                session_id: session_id.clone(),
            },
        }
    }
}

impl TimerSnapshot {
    pub fn session_id(&self) -> Option<&SessionId> {
        match &self.state {
            TimerStateForApi::Stopped => None,
            TimerStateForApi::Running { session_id } | TimerStateForApi::Paused { session_id } => {
                Some(session_id)
            }
        }
    }
}

/// Результат оптимистичного перехода: подтверждение сервера идёт в фоне
pub struct Dispatched {
    pub session_id: SessionId,
    pub confirmation: JoinHandle<()>,
}

/// Исход одной сверки с сервером
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Таймер не идёт или id не совпали: запроса не было
    Skipped,
    InSync { drift_ms: u64 },
    Rebased { drift_ms: u64 },
    /// Сервер не знает сессию: локальный сброс
    Invalidated,
    /// Ответ пришёл для уже неактивной сессии
    Discarded,
    /// Нет ответа; повтор на следующем тике
    Unreachable,
}

/// Ошибки переходов FSM (предусловия) и транспорта
#[derive(Debug, Clone, PartialEq)]
pub enum TimerError {
    NoTaskSelected,
    TaskUnavailable(TaskId),
    TaskCompleted(TaskId),
    NotToday,
    TaskSwitchWhileRunning,
    InvalidTransition {
        from: &'static str,
        action: &'static str,
    },
    SessionMismatch,
    Rejected(&'static str),
    Api(ApiError),
    Poisoned(String),
}

impl fmt::Display for TimerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimerError::NoTaskSelected => write!(f, "Please select a task first."),
            TimerError::TaskUnavailable(id) => write!(f, "Task {} is not available.", id),
            TimerError::TaskCompleted(id) => {
                write!(f, "Task {} is completed and cannot be timed.", id)
            }
            TimerError::NotToday => write!(f, "You can only start timers for today's tasks."),
            TimerError::TaskSwitchWhileRunning => write!(
                f,
                "Please stop or pause the current task before switching."
            ),
            TimerError::InvalidTransition { from, action } => {
                write!(f, "Cannot {} a timer that is {}.", action, from)
            }
            TimerError::SessionMismatch => {
                write!(f, "Timer session does not match the active session.")
            }
            TimerError::Rejected(action) => write!(f, "Server rejected timer {}.", action),
            TimerError::Api(e) => write!(f, "API: {}", e),
            TimerError::Poisoned(s) => write!(f, "Mutex poisoned: {}", s),
        }
    }
}

impl std::error::Error for TimerError {}

impl TimerError {
    fn level(&self) -> NotificationLevel {
        match self {
            TimerError::Api(_) | TimerError::Rejected(_) | TimerError::Poisoned(_) => {
                NotificationLevel::Error
            }
            _ => NotificationLevel::Warning,
        }
    }
}

impl TimerEngine {
    pub fn new(api: Arc<dyn TimerApi>, notifier: Notifier, timings: TimerTimings) -> Self {
        Self {
            session: Arc::new(Mutex::new(TimerSession::default())),
            tasks: Arc::new(Mutex::new(TaskCache::default())),
            view_date: Arc::new(Mutex::new(Local::now().date_naive())),
            scope: Arc::new(Mutex::new(None)),
            sync_in_flight: Arc::new(AtomicBool::new(false)),
            api,
            notifier,
            timings,
        }
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    pub(crate) fn lock_session(&self) -> Result<MutexGuard<'_, TimerSession>, TimerError> {
        self.session
            .lock()
            .map_err(|e| TimerError::Poisoned(e.to_string()))
    }

    pub(crate) fn lock_tasks(&self) -> Result<MutexGuard<'_, TaskCache>, TimerError> {
        self.tasks
            .lock()
            .map_err(|e| TimerError::Poisoned(e.to_string()))
    }

    /// Отказ в переходе: лог + уведомление пользователю, состояние не меняется
    pub(crate) fn reject(&self, err: TimerError) -> TimerError {
        tracing::warn!("[FSM] Rejected: {}", err);
        self.notifier.notify(err.level(), err.to_string());
        err
    }

    pub fn view_date(&self) -> Result<NaiveDate, TimerError> {
        self.view_date
            .lock()
            .map(|d| *d)
            .map_err(|e| TimerError::Poisoned(e.to_string()))
    }

    /// Навигация по датам (UI). Таймер стартует только для сегодняшней даты
    pub fn set_view_date(&self, date: NaiveDate) -> Result<(), TimerError> {
        let mut view = self
            .view_date
            .lock()
            .map_err(|e| TimerError::Poisoned(e.to_string()))?;
        *view = date;
        Ok(())
    }

    pub fn is_viewing_today(&self) -> Result<bool, TimerError> {
        Ok(self.view_date()? == Local::now().date_naive())
    }

    /// Заменить кэш задач (daily-summary)
    pub fn replace_tasks(&self, tasks: Vec<Task>) -> Result<(), TimerError> {
        let count = tasks.len();
        self.lock_tasks()?.replace_all(tasks);
        self.notifier.emit(UiEvent::TasksRefreshed { count });
        Ok(())
    }

    pub fn task(&self, task_id: TaskId) -> Result<Option<Task>, TimerError> {
        Ok(self.lock_tasks()?.get(task_id).cloned())
    }

    pub fn tasks(&self) -> Result<Vec<Task>, TimerError> {
        Ok(self.lock_tasks()?.all().to_vec())
    }

    /// Изменить задачу в кэше и оповестить UI
    pub(crate) fn update_task(
        &self,
        task_id: TaskId,
        apply: impl FnOnce(&mut Task),
    ) -> Option<Task> {
        let updated = match self.tasks.lock() {
            Ok(mut cache) => cache.get_mut(task_id).map(|task| {
                apply(task);
                task.clone()
            }),
            Err(e) => {
                tracing::error!("[TIMER] Task cache poisoned: {}", e);
                None
            }
        };
        if let Some(task) = &updated {
            self.notifier.emit(UiEvent::TaskUpdated(task.clone()));
        }
        updated
    }

    /// Текущее состояние для UI.
    /// Running/Paused: показания часов; Stopped: сохранённое time_spent
    pub fn snapshot(&self) -> Result<TimerSnapshot, TimerError> {
        let (state, task_id, clock_ms) = {
            let session = self.lock_session()?;
            (
                TimerStateForApi::from(&session.state),
                session.selected_task,
                match session.state {
                    TimerState::Stopped => None,
                    _ => Some(session.clock.elapsed()),
                },
            )
        };
        let elapsed_ms = match clock_ms {
            Some(ms) => ms,
            None => match task_id {
                Some(id) => self.lock_tasks()?.get(id).map(|t| t.time_spent).unwrap_or(0),
                None => 0,
            },
        };
        Ok(TimerSnapshot {
            state,
            task_id,
            elapsed_ms,
            display: format_time(elapsed_ms),
        })
    }

    /// Активные (task, session), если таймер не остановлен
    pub fn active_ids(&self) -> Result<Option<(TaskId, SessionId)>, TimerError> {
        let session = self.lock_session()?;
        Ok(match (session.selected_task, session.state.session_id()) {
            (Some(task_id), Some(session_id)) => Some((task_id, session_id.clone())),
            _ => None,
        })
    }

    pub fn selected_task(&self) -> Result<Option<TaskId>, TimerError> {
        Ok(self.lock_session()?.selected_task)
    }

    pub(crate) fn emit_state(&self) {
        match self.snapshot() {
            Ok(snapshot) => self.notifier.emit(UiEvent::StateChanged(snapshot)),
            Err(e) => tracing::error!("[TIMER] Failed to build snapshot: {}", e),
        }
    }

    /// Презентационный тик дисплея
    pub(crate) fn emit_display(&self) {
        if let Ok(snapshot) = self.snapshot() {
            self.notifier.emit(UiEvent::Display {
                task_id: snapshot.task_id,
                elapsed_ms: snapshot.elapsed_ms,
                text: snapshot.display,
            });
        }
    }

    /// Остановить все фоновые задачи (выход из приложения)
    pub fn shutdown(&self) {
        self.cancel_scope();
    }
}
