//! In-memory TimerApi для тестов движка: записывает вызовы и
//! ведёт подтверждённое время по задачам как настоящий бэкенд.

use crate::config::TimerTimings;
use crate::engine::TimerEngine;
use crate::ipc::{NotificationLevel, Notifier, UiEvent};
use crate::models::{
    ActivityLogRequest, CleanupRequest, DailySummary, PauseReply, ReplyStatus, StartReply,
    StartRequest, StopReply, SyncReply, Task, TaskId, TaskStatus, TimedRequest,
};
use crate::network::{ApiError, TimerApi};
use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

#[derive(Debug, Clone, PartialEq)]
pub enum ApiCall {
    Start(StartRequest),
    Pause(TimedRequest),
    Stop(TimedRequest),
    Sync(TimedRequest),
    Cleanup(CleanupRequest),
    Summary(NaiveDate),
    Activity(ActivityLogRequest),
}

#[derive(Default)]
pub struct RecordingApi {
    pub calls: Mutex<Vec<ApiCall>>,
    /// Подтверждённое сервером time_spent по задачам
    pub confirmed: Mutex<HashMap<TaskId, u64>>,
    pub fail_start: AtomicBool,
    pub fail_pause: AtomicBool,
    pub fail_stop: AtomicBool,
    /// None: success с total_display_time = client_time
    pub sync_reply: Mutex<Option<Result<SyncReply, ApiError>>>,
    pub sync_delay: Mutex<Option<Duration>>,
    pub summary: Mutex<Vec<Task>>,
}

impl RecordingApi {
    pub fn with_summary(tasks: Vec<Task>) -> Self {
        let api = Self::default();
        *api.summary.lock().unwrap() = tasks;
        api
    }

    fn record(&self, call: ApiCall) {
        self.calls.lock().unwrap().push(call);
    }

    pub fn calls(&self) -> Vec<ApiCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, matches: impl Fn(&ApiCall) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| matches(c)).count()
    }

    pub fn sync_calls(&self) -> usize {
        self.count(|c| matches!(c, ApiCall::Sync(_)))
    }

    pub fn set_sync_reply(&self, reply: Result<SyncReply, ApiError>) {
        *self.sync_reply.lock().unwrap() = Some(reply);
    }

    pub fn confirmed(&self, task_id: TaskId) -> u64 {
        self.confirmed
            .lock()
            .unwrap()
            .get(&task_id)
            .copied()
            .unwrap_or(0)
    }

    fn network_down() -> ApiError {
        ApiError::Network("connection refused".into())
    }
}

#[async_trait]
impl TimerApi for RecordingApi {
    async fn start_timer(&self, request: &StartRequest) -> Result<StartReply, ApiError> {
        self.record(ApiCall::Start(request.clone()));
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(Self::network_down());
        }
        Ok(StartReply {
            status: ReplyStatus::Success,
        })
    }

    async fn pause_timer(&self, request: &TimedRequest) -> Result<PauseReply, ApiError> {
        self.record(ApiCall::Pause(request.clone()));
        if self.fail_pause.load(Ordering::SeqCst) {
            return Err(Self::network_down());
        }
        let mut confirmed = self.confirmed.lock().unwrap();
        let before = confirmed.get(&request.task_id).copied().unwrap_or(0);
        let time_spent = request.client_time.max(before);
        confirmed.insert(request.task_id, time_spent);
        Ok(PauseReply {
            status: ReplyStatus::Success,
            time_spent,
            elapsed_in_session: time_spent - before,
        })
    }

    async fn stop_timer(&self, request: &TimedRequest) -> Result<StopReply, ApiError> {
        self.record(ApiCall::Stop(request.clone()));
        if self.fail_stop.load(Ordering::SeqCst) {
            return Err(Self::network_down());
        }
        let mut confirmed = self.confirmed.lock().unwrap();
        let before = confirmed.get(&request.task_id).copied().unwrap_or(0);
        let time_spent = request.client_time.max(before);
        confirmed.insert(request.task_id, time_spent);
        Ok(StopReply {
            status: ReplyStatus::Success,
            time_spent,
        })
    }

    async fn sync_timer(&self, request: &TimedRequest) -> Result<SyncReply, ApiError> {
        self.record(ApiCall::Sync(request.clone()));
        let delay = *self.sync_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let scripted = self.sync_reply.lock().unwrap().clone();
        scripted.unwrap_or_else(|| {
            Ok(SyncReply {
                status: ReplyStatus::Success,
                time_spent: self.confirmed(request.task_id),
                total_display_time: Some(request.client_time),
            })
        })
    }

    async fn cleanup_timer(&self, request: &CleanupRequest) -> Result<(), ApiError> {
        self.record(ApiCall::Cleanup(request.clone()));
        Ok(())
    }

    async fn daily_summary(&self, date: NaiveDate) -> Result<DailySummary, ApiError> {
        self.record(ApiCall::Summary(date));
        Ok(DailySummary {
            tasks: self.summary.lock().unwrap().clone(),
        })
    }

    async fn log_activity(&self, request: &ActivityLogRequest) -> Result<(), ApiError> {
        self.record(ApiCall::Activity(request.clone()));
        Ok(())
    }
}

pub fn task(id: TaskId, title: &str, status: TaskStatus, time_spent: u64) -> Task {
    Task {
        id,
        title: title.to_string(),
        status,
        time_spent,
        timer_session_id: None,
        timer_start_time: None,
    }
}

/// Движок с production-таймингами и кэшем задач
pub fn engine_with(
    api: Arc<RecordingApi>,
    tasks: Vec<Task>,
) -> (TimerEngine, broadcast::Receiver<UiEvent>) {
    let notifier = Notifier::new(1024);
    let rx = notifier.subscribe();
    let engine = TimerEngine::new(api, notifier, TimerTimings::default());
    engine.replace_tasks(tasks).unwrap();
    (engine, rx)
}

/// Вычитать все накопленные уведомления (Lagged пропускается)
pub fn notifications(rx: &mut broadcast::Receiver<UiEvent>) -> Vec<(NotificationLevel, String)> {
    let mut out = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(UiEvent::Notification { level, message }) => out.push((level, message)),
            Ok(_) | Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }
    out
}
