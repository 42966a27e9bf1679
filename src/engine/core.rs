use crate::engine::{
    Dispatched, SessionId, SyncOutcome, TimerEngine, TimerError, TimerSession, TimerState,
};
use crate::format::format_duration;
use crate::ipc::{ControlState, NotificationLevel, UiEvent};
use crate::models::{
    ActivityLogRequest, ReplyStatus, StartRequest, TaskId, TaskStatus, TimedRequest,
};
use scopeguard::guard;
use std::sync::atomic::Ordering;
use tracing::{debug, error, info, warn};

impl TimerEngine {
    /// Мутация сессии под одним lock (без await внутри)
    pub(crate) fn with_session<R>(
        &self,
        apply: impl FnOnce(&mut TimerSession) -> R,
    ) -> Result<R, TimerError> {
        let mut session = self.lock_session()?;
        Ok(apply(&mut session))
    }

    /// Выбор задачи. Пока таймер идёт, выбор запрещён.
    /// Смена задачи на паузе бросает приостановленную сессию
    pub fn select_task(&self, task_id: TaskId) -> Result<(), TimerError> {
        let (running, previous) = {
            let session = self.lock_session()?;
            (session.state.is_running(), session.selected_task)
        };
        if running {
            return Err(self.reject(TimerError::TaskSwitchWhileRunning));
        }

        let status = self.lock_tasks()?.get(task_id).map(|t| t.status);
        let unavailable = match status {
            None => Some(TimerError::TaskUnavailable(task_id)),
            Some(TaskStatus::Completed) => Some(TimerError::TaskCompleted(task_id)),
            Some(_) => None,
        };
        if let Some(err) = unavailable {
            if previous == Some(task_id) {
                self.with_session(|s| {
                    s.clear();
                })?;
                self.cancel_scope();
                self.emit_state();
            }
            return Err(self.reject(err));
        }

        let switched = self.with_session(|s| {
            if s.state.is_running() {
                return Err(TimerError::TaskSwitchWhileRunning);
            }
            let abandoned = s.selected_task != Some(task_id)
                && matches!(s.state, TimerState::Paused { .. });
            if abandoned {
                s.clear();
            }
            s.selected_task = Some(task_id);
            Ok(abandoned)
        })?;
        let abandoned = switched.map_err(|e| self.reject(e))?;

        if abandoned {
            info!("[FSM] Paused session abandoned, switched to task {}", task_id);
            self.notifier.emit(UiEvent::Controls(ControlState::idle()));
        }
        debug!("[FSM] Task {} selected", task_id);
        self.emit_state();
        self.emit_display();
        Ok(())
    }

    /// Старт выбранной задачи (удобно для UI-кнопки)
    pub fn start_selected(&self) -> Result<Dispatched, TimerError> {
        match self.selected_task()? {
            Some(task_id) => self.start(task_id),
            None => Err(self.reject(TimerError::NoTaskSelected)),
        }
    }

    /// Переход: Stopped → Running или Paused → Running (resume = новый session_id).
    /// Оптимистично: часы и UI меняются сразу, подтверждение сервера идёт в фоне
    pub fn start(&self, task_id: TaskId) -> Result<Dispatched, TimerError> {
        if !self.is_viewing_today()? {
            return Err(self.reject(TimerError::NotToday));
        }
        if self.selected_task()? != Some(task_id) {
            return Err(self.reject(TimerError::NoTaskSelected));
        }
        let base_ms = match self.task(task_id)? {
            None => return Err(self.reject(TimerError::TaskUnavailable(task_id))),
            Some(task) if task.status == TaskStatus::Completed => {
                return Err(self.reject(TimerError::TaskCompleted(task_id)))
            }
            Some(task) => task.time_spent,
        };

        let session_id = SessionId::generate();
        let transition = self.with_session(|s| {
            if s.state.is_running() {
                return Err(TimerError::InvalidTransition {
                    from: s.state.label(),
                    action: "start",
                });
            }
            if s.selected_task != Some(task_id) {
                return Err(TimerError::NoTaskSelected);
            }
            s.state = TimerState::Running {
                session_id: session_id.clone(),
            };
            s.clock.start(base_ms);
            Ok(())
        })?;
        transition.map_err(|e| self.reject(e))?;

        info!(
            "[TIMER] Start: task={} session={} base={}ms",
            task_id, session_id, base_ms
        );
        self.open_scope(task_id, session_id.clone());
        self.notifier.emit(UiEvent::Controls(ControlState::running()));
        self.emit_state();

        let engine = self.clone();
        let pending = session_id.clone();
        let confirmation = tokio::spawn(async move {
            engine.confirm_start(task_id, pending).await;
        });
        Ok(Dispatched {
            session_id,
            confirmation,
        })
    }

    async fn confirm_start(&self, task_id: TaskId, session_id: SessionId) {
        let request = StartRequest {
            task_id,
            session_id: session_id.clone(),
        };
        let failure = match self.api.start_timer(&request).await {
            Ok(reply) if reply.status == ReplyStatus::Success => None,
            Ok(reply) => Some(format!("server replied {:?}", reply.status)),
            Err(e) => Some(e.to_string()),
        };

        if let Some(reason) = failure {
            let rolled_back = self
                .with_session(|s| {
                    if s.matches(task_id, &session_id) {
                        s.state = TimerState::Stopped;
                        s.clock.stop();
                        true
                    } else {
                        false
                    }
                })
                .unwrap_or(false);
            if !rolled_back {
                debug!(
                    "[TIMER] Start failure for inactive session {} ignored: {}",
                    session_id, reason
                );
                return;
            }
            error!("[TIMER] Start not confirmed, rolled back: {}", reason);
            self.cancel_scope();
            self.notifier.emit(UiEvent::Controls(ControlState::idle()));
            self.emit_state();
            self.notifier.notify(
                NotificationLevel::Error,
                "Failed to start timer. Please try again.",
            );
            return;
        }

        let still_active = self
            .with_session(|s| s.state.is_running() && s.matches(task_id, &session_id))
            .unwrap_or(false);
        if !still_active {
            debug!(
                "[TIMER] Start confirmation for inactive session {} discarded",
                session_id
            );
            return;
        }

        info!("[TIMER] Start confirmed: session={}", session_id);
        let task = self.update_task(task_id, |task| {
            task.status = TaskStatus::InProgress;
            task.timer_session_id = Some(session_id.to_string());
        });
        self.attach_reconcile_tick(task_id, &session_id);
        if let Some(task) = task {
            self.log_activity(format!("Started working on: {}", task.title), task_id)
                .await;
        }
        self.notifier
            .notify(NotificationLevel::Success, "Timer started!");
    }

    /// Переход: Running → Paused. Не оптимистично: состояние меняется
    /// только после подтверждения сервера. Возвращает подтверждённое time_spent
    pub async fn pause(&self, task_id: TaskId, session_id: &SessionId) -> Result<u64, TimerError> {
        let check = {
            let session = self.lock_session()?;
            if !session.state.is_running() {
                Err(TimerError::InvalidTransition {
                    from: session.state.label(),
                    action: "pause",
                })
            } else if !session.matches(task_id, session_id) {
                Err(TimerError::SessionMismatch)
            } else {
                Ok(session.clock.elapsed())
            }
        };
        let client_time = check.map_err(|e| self.reject(e))?;

        info!(
            "[TIMER] Pause requested: task={} session={} client_time={}ms",
            task_id, session_id, client_time
        );
        let request = TimedRequest {
            task_id,
            session_id: session_id.clone(),
            client_time,
        };
        let reply = match self.api.pause_timer(&request).await {
            Ok(reply) => reply,
            Err(e) => {
                error!("[TIMER] Pause request failed: {}", e);
                self.notifier.notify(
                    NotificationLevel::Error,
                    "Failed to pause timer. Please try again.",
                );
                return Err(TimerError::Api(e));
            }
        };
        if reply.status != ReplyStatus::Success {
            error!("[TIMER] Pause rejected by server: {:?}", reply.status);
            self.notifier
                .notify(NotificationLevel::Error, "Failed to pause timer.");
            return Err(TimerError::Rejected("pause"));
        }

        let applied = self.with_session(|s| {
            if s.state.is_running() && s.matches(task_id, session_id) {
                s.state = TimerState::Paused {
                    session_id: session_id.clone(),
                };
                s.clock.hold(reply.time_spent);
                true
            } else {
                false
            }
        })?;
        if !applied {
            debug!(
                "[TIMER] Pause reply for inactive session {} discarded",
                session_id
            );
            return Err(TimerError::SessionMismatch);
        }

        self.cancel_scope();
        let task = self.update_task(task_id, |task| {
            task.time_spent = reply.time_spent;
            task.status = TaskStatus::Paused;
            task.timer_session_id = None;
        });
        self.notifier.emit(UiEvent::Controls(ControlState::paused()));
        self.emit_state();
        info!(
            "[TIMER] Paused: task={} time_spent={}ms",
            task_id, reply.time_spent
        );

        if let Some(task) = task {
            self.log_activity(format!("Paused task: {}", task.title), task_id)
                .await;
        }
        self.notifier.notify(
            NotificationLevel::Success,
            format!(
                "Timer paused! Session time: {}",
                format_duration(reply.elapsed_in_session)
            ),
        );
        Ok(reply.time_spent)
    }

    /// Переход: Running/Paused → Stopped. Локально сразу и безусловно,
    /// сервер подтверждает в фоне (без повтора)
    pub fn stop(&self, task_id: TaskId, session_id: &SessionId) -> Result<Dispatched, TimerError> {
        let transition = self.with_session(|s| {
            if s.state == TimerState::Stopped {
                Err(TimerError::InvalidTransition {
                    from: s.state.label(),
                    action: "stop",
                })
            } else if !s.matches(task_id, session_id) {
                Err(TimerError::SessionMismatch)
            } else {
                Ok(s.clear())
            }
        })?;
        let client_time = transition.map_err(|e| self.reject(e))?;

        info!(
            "[TIMER] Stop: task={} session={} client_time={}ms",
            task_id, session_id, client_time
        );
        self.cancel_scope();
        self.notifier.emit(UiEvent::Controls(ControlState::idle()));
        self.emit_state();

        let engine = self.clone();
        let pending = session_id.clone();
        let confirmation = tokio::spawn(async move {
            engine.confirm_stop(task_id, pending, client_time).await;
        });
        Ok(Dispatched {
            session_id: session_id.clone(),
            confirmation,
        })
    }

    async fn confirm_stop(&self, task_id: TaskId, session_id: SessionId, client_time: u64) {
        let request = TimedRequest {
            task_id,
            session_id,
            client_time,
        };
        match self.api.stop_timer(&request).await {
            Ok(reply) if reply.status == ReplyStatus::Success => {
                info!(
                    "[TIMER] Stop confirmed: task={} total={}ms",
                    task_id, reply.time_spent
                );
                self.update_task(task_id, |task| {
                    task.status = TaskStatus::Completed;
                    task.time_spent = reply.time_spent;
                    task.timer_session_id = None;
                });
                self.notifier.notify(
                    NotificationLevel::Success,
                    format!(
                        "Task completed! Total time: {}",
                        format_duration(reply.time_spent)
                    ),
                );
            }
            Ok(reply) => {
                warn!("[TIMER] Stop not confirmed by server: {:?}", reply.status);
                self.notifier.notify(
                    NotificationLevel::Warning,
                    "Failed to stop timer on server, but stopped locally.",
                );
            }
            Err(e) => {
                warn!("[TIMER] Stop request failed: {}", e);
                self.notifier.notify(
                    NotificationLevel::Warning,
                    "Timer stopped locally, but server sync failed.",
                );
            }
        }
    }

    pub async fn pause_active(&self) -> Result<u64, TimerError> {
        match self.active_ids()? {
            Some((task_id, session_id)) => self.pause(task_id, &session_id).await,
            None => Err(self.reject(TimerError::InvalidTransition {
                from: "stopped",
                action: "pause",
            })),
        }
    }

    pub fn stop_active(&self) -> Result<Dispatched, TimerError> {
        match self.active_ids()? {
            Some((task_id, session_id)) => self.stop(task_id, &session_id),
            None => Err(self.reject(TimerError::InvalidTransition {
                from: "stopped",
                action: "stop",
            })),
        }
    }

    /// Сверка локальных часов с сервером.
    /// Только для активной Running-сессии; single-flight
    pub async fn sync(
        &self,
        task_id: TaskId,
        session_id: &SessionId,
    ) -> Result<SyncOutcome, TimerError> {
        let client_time = self.with_session(|s| {
            (s.state.is_running() && s.matches(task_id, session_id)).then(|| s.clock.elapsed())
        })?;
        let Some(client_time) = client_time else {
            debug!("[SYNC] Session {} is not running, sync skipped", session_id);
            return Ok(SyncOutcome::Skipped);
        };

        if self
            .sync_in_flight
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            debug!("[SYNC] Another sync already in progress, skipping");
            return Ok(SyncOutcome::Skipped);
        }
        let _guard = guard((), |_| {
            self.sync_in_flight.store(false, Ordering::Release);
        });

        let request = TimedRequest {
            task_id,
            session_id: session_id.clone(),
            client_time,
        };
        let reply = match self.api.sync_timer(&request).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!("[SYNC] Sync failed, will retry on next tick: {}", e);
                return Ok(SyncOutcome::Unreachable);
            }
        };

        match reply.status {
            ReplyStatus::Success => {
                let server_ms = reply.server_elapsed();
                let threshold = self.timings.drift_threshold_ms;
                let outcome = self.with_session(|s| {
                    if !(s.state.is_running() && s.matches(task_id, session_id)) {
                        return SyncOutcome::Discarded;
                    }
                    let drift_ms = client_time.abs_diff(server_ms);
                    if drift_ms > threshold {
                        s.clock.rebase(server_ms);
                        SyncOutcome::Rebased { drift_ms }
                    } else {
                        SyncOutcome::InSync { drift_ms }
                    }
                })?;
                match outcome {
                    SyncOutcome::Rebased { drift_ms } => {
                        info!(
                            "[SYNC] Drift {}ms exceeds threshold, local clock rebased to {}ms",
                            drift_ms, server_ms
                        );
                        self.emit_display();
                    }
                    SyncOutcome::InSync { drift_ms } => {
                        debug!("[SYNC] In sync (drift {}ms)", drift_ms);
                    }
                    _ => debug!("[SYNC] Reply for inactive session {} discarded", session_id),
                }
                Ok(outcome)
            }
            ReplyStatus::SessionInvalid => {
                let cleared = self.with_session(|s| {
                    if s.matches(task_id, session_id) {
                        s.clear();
                        true
                    } else {
                        false
                    }
                })?;
                if !cleared {
                    debug!(
                        "[SYNC] session_invalid for inactive session {} discarded",
                        session_id
                    );
                    return Ok(SyncOutcome::Discarded);
                }

                warn!("[SYNC] Server invalidated session {}", session_id);
                self.cancel_scope();
                self.update_task(task_id, |task| {
                    task.timer_session_id = None;
                });
                self.notifier.emit(UiEvent::Controls(ControlState::idle()));
                self.emit_state();
                self.notifier.notify(
                    NotificationLevel::Warning,
                    "Timer session expired on the server. Time since the last sync may be approximate.",
                );
                Ok(SyncOutcome::Invalidated)
            }
            other => {
                warn!("[SYNC] Unexpected sync status {:?}", other);
                Ok(SyncOutcome::Unreachable)
            }
        }
    }

    /// Обновить кэш задач из daily-summary. Пока таймер идёт, обновление пропускается
    pub async fn refresh_tasks(&self) -> Result<bool, TimerError> {
        let running = self.lock_session()?.state.is_running();
        if running {
            debug!("[TIMER] Timer running, summary refresh skipped");
            return Ok(false);
        }
        let date = self.view_date()?;
        let summary = self
            .api
            .daily_summary(date)
            .await
            .map_err(TimerError::Api)?;
        debug!("[TIMER] Summary refreshed: {} tasks", summary.tasks.len());
        self.replace_tasks(summary.tasks)?;
        Ok(true)
    }

    /// Журнал активности (best effort)
    pub(crate) async fn log_activity(&self, message: String, task_id: TaskId) {
        let request = ActivityLogRequest {
            message,
            task_db_id: Some(task_id),
        };
        if let Err(e) = self.api.log_activity(&request).await {
            warn!("[TIMER] Failed to log activity: {}", e);
        }
    }
}
