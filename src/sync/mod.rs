use crate::engine::{SessionId, TimerEngine};
use crate::models::TaskId;
use std::fmt;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Источник запроса сверки
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    /// Минутный тик, пока таймер идёт
    Tick,
    /// Окно снова видно (hidden → visible)
    VisibilityRegained,
    FocusGained,
}

impl fmt::Display for SyncTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncTrigger::Tick => write!(f, "tick"),
            SyncTrigger::VisibilityRegained => write!(f, "visibility"),
            SyncTrigger::FocusGained => write!(f, "focus"),
        }
    }
}

/// Фоновая работа одной сессии таймера.
/// Drop прерывает всё: дисплей, минутный тик, отложенный и отправленный sync
pub struct SessionScope {
    task_id: TaskId,
    session_id: SessionId,
    display: JoinHandle<()>,
    reconcile: Option<JoinHandle<()>>,
    /// Ожидание окна тишины; новый триггер его заменяет
    debounce: Option<JoinHandle<()>>,
    /// Уже отправленный sync; заменять нельзя, только Drop
    in_flight: Option<JoinHandle<()>>,
}

impl SessionScope {
    fn new(task_id: TaskId, session_id: SessionId, display: JoinHandle<()>) -> Self {
        Self {
            task_id,
            session_id,
            display,
            reconcile: None,
            debounce: None,
            in_flight: None,
        }
    }

    pub fn owns(&self, task_id: TaskId, session_id: &SessionId) -> bool {
        self.task_id == task_id && &self.session_id == session_id
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn has_reconcile_tick(&self) -> bool {
        self.reconcile.is_some()
    }

    pub fn has_pending_sync(&self) -> bool {
        self.debounce.as_ref().is_some_and(|h| !h.is_finished())
    }

    pub fn has_sync_in_flight(&self) -> bool {
        self.in_flight.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for SessionScope {
    fn drop(&mut self) {
        self.display.abort();
        if let Some(handle) = self.reconcile.take() {
            handle.abort();
        }
        if let Some(handle) = self.debounce.take() {
            handle.abort();
        }
        if let Some(handle) = self.in_flight.take() {
            handle.abort();
        }
    }
}

fn spawn_display_refresh(engine: TimerEngine, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            engine.emit_display();
        }
    })
}

fn spawn_reconcile_tick(
    engine: TimerEngine,
    task_id: TaskId,
    session_id: SessionId,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval_at(Instant::now() + every, every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            engine.schedule_sync(task_id, &session_id, SyncTrigger::Tick);
        }
    })
}

impl TimerEngine {
    /// Новая сессия: новый scope; предыдущий (если был) прерывается
    pub(crate) fn open_scope(&self, task_id: TaskId, session_id: SessionId) {
        let display = spawn_display_refresh(self.clone(), self.timings.display_refresh);
        let scope = SessionScope::new(task_id, session_id, display);
        let previous = match self.scope.lock() {
            Ok(mut slot) => slot.replace(scope),
            Err(e) => {
                error!("[SYNC] Scope mutex poisoned: {}", e);
                return;
            }
        };
        drop(previous);
    }

    /// Завершить фоновую работу текущей сессии
    pub(crate) fn cancel_scope(&self) {
        let previous = match self.scope.lock() {
            Ok(mut slot) => slot.take(),
            Err(e) => {
                error!("[SYNC] Scope mutex poisoned: {}", e);
                None
            }
        };
        if let Some(scope) = previous {
            debug!("[SYNC] Scope of session {} cancelled", scope.session_id());
        }
    }

    /// Минутная сверка (после подтверждения старта или восстановления)
    pub(crate) fn attach_reconcile_tick(&self, task_id: TaskId, session_id: &SessionId) {
        let Ok(mut slot) = self.scope.lock() else {
            error!("[SYNC] Scope mutex poisoned, reconcile tick not started");
            return;
        };
        match slot.as_mut() {
            Some(scope) if scope.owns(task_id, session_id) => {
                if let Some(old) = scope.reconcile.take() {
                    old.abort();
                }
                scope.reconcile = Some(spawn_reconcile_tick(
                    self.clone(),
                    task_id,
                    session_id.clone(),
                    self.timings.reconcile_interval,
                ));
                debug!(
                    "[SYNC] Reconcile tick every {:?} for session {}",
                    self.timings.reconcile_interval, session_id
                );
            }
            _ => debug!("[SYNC] Session {} has no scope, tick not started", session_id),
        }
    }

    /// Запрос сверки для активной Running-сессии (visibility/focus)
    pub fn request_sync(&self, trigger: SyncTrigger) -> bool {
        let active = self
            .with_session(|s| {
                if !s.state.is_running() {
                    return None;
                }
                s.selected_task.zip(s.state.session_id().cloned())
            })
            .unwrap_or(None);
        match active {
            Some((task_id, session_id)) => self.schedule_sync(task_id, &session_id, trigger),
            None => {
                debug!("[SYNC] {} trigger ignored, timer not running", trigger);
                false
            }
        }
    }

    /// Debounce: новый запрос в окне тишины заменяет предыдущий,
    /// срабатывает только последний. Отправленный sync не прерывается
    pub(crate) fn schedule_sync(
        &self,
        task_id: TaskId,
        session_id: &SessionId,
        trigger: SyncTrigger,
    ) -> bool {
        let Ok(mut slot) = self.scope.lock() else {
            error!("[SYNC] Scope mutex poisoned, sync not scheduled");
            return false;
        };
        let Some(scope) = slot.as_mut().filter(|s| s.owns(task_id, session_id)) else {
            debug!("[SYNC] {} trigger for inactive session {} ignored", trigger, session_id);
            return false;
        };
        if let Some(pending) = scope.debounce.take() {
            pending.abort();
        }

        let engine = self.clone();
        let session_id = session_id.clone();
        let quiet = self.timings.debounce;
        debug!("[SYNC] {} trigger, sync in {:?}", trigger, quiet);
        scope.debounce = Some(tokio::spawn(async move {
            tokio::time::sleep(quiet).await;
            engine.dispatch_sync(task_id, session_id, trigger);
        }));
        true
    }

    /// Окно тишины истекло: отправить sync вне заменяемого debounce-хэндла
    fn dispatch_sync(&self, task_id: TaskId, session_id: SessionId, trigger: SyncTrigger) {
        let Ok(mut slot) = self.scope.lock() else {
            error!("[SYNC] Scope mutex poisoned, sync not sent");
            return;
        };
        let Some(scope) = slot.as_mut().filter(|s| s.owns(task_id, &session_id)) else {
            debug!("[SYNC] Session {} ended before {} sync", session_id, trigger);
            return;
        };
        if scope.has_sync_in_flight() {
            debug!("[SYNC] {} trigger folded into the sync in flight", trigger);
            return;
        }

        let engine = self.clone();
        scope.in_flight = Some(tokio::spawn(async move {
            match engine.sync(task_id, &session_id).await {
                Ok(outcome) => debug!("[SYNC] {} sync finished: {:?}", trigger, outcome),
                Err(e) => warn!("[SYNC] {} sync failed: {}", trigger, e),
            }
        }));
    }
}

/// Периодическое обновление daily-summary (пропускается, пока таймер идёт)
pub fn spawn_summary_refresh(engine: TimerEngine, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval_at(Instant::now() + every, every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            match engine.refresh_tasks().await {
                Ok(true) => info!("[SYNC] Daily summary refreshed"),
                Ok(false) => {}
                Err(e) => warn!("[SYNC] Daily summary refresh failed: {}", e),
            }
        }
    })
}
