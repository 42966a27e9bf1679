use crate::engine::{SessionId, TimerEngine, TimerError, TimerState};
use crate::ipc::{ControlState, NotificationLevel, UiEvent};
use crate::models::{CleanupRequest, Task, TaskId, TaskStatus};
use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Naive-форматы бэкенда (без зоны): интерпретируются в локальной зоне клиента
const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Разбор серверного timer_start_time: RFC 3339, затем naive ISO-8601
pub fn parse_server_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .and_then(|naive| Local.from_local_datetime(&naive).earliest())
        .map(|local| local.with_timezone(&Utc))
}

/// Решение по незавершённой серверной сессии
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeDecision {
    /// Возобновить с базой time_spent + возраст сессии
    Resume { base_ms: u64 },
    /// Старше лимита или из будущего
    Stale { age_ms: i64 },
    /// timer_start_time не разобрать
    Unreadable,
}

pub fn assess_running_task(task: &Task, now: DateTime<Utc>, max_age: Duration) -> ResumeDecision {
    let Some(raw) = task
        .timer_start_time
        .as_deref()
        .filter(|s| !s.trim().is_empty())
    else {
        return ResumeDecision::Resume {
            base_ms: task.time_spent,
        };
    };
    let Some(started) = parse_server_timestamp(raw) else {
        return ResumeDecision::Unreadable;
    };

    let age_ms = (now - started).num_milliseconds();
    let max_age_ms = i64::try_from(max_age.as_millis()).unwrap_or(i64::MAX);
    if age_ms < 0 || age_ms > max_age_ms {
        return ResumeDecision::Stale { age_ms };
    }
    ResumeDecision::Resume {
        base_ms: task.time_spent.saturating_add(age_ms.unsigned_abs()),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryOutcome {
    NothingToResume,
    Resumed {
        task_id: TaskId,
        session_id: SessionId,
        base_ms: u64,
    },
    DiscardedStale {
        task_id: TaskId,
    },
    SkippedNotToday,
}

impl TimerEngine {
    /// Восстановление при запуске: найти незавершённую серверную сессию
    /// и либо продолжить её, либо закрыть как протухшую
    pub async fn recover_on_startup(&self) -> Result<RecoveryOutcome, TimerError> {
        if !self.is_viewing_today()? {
            debug!("[RECOVERY] Not viewing today, recovery skipped");
            return Ok(RecoveryOutcome::SkippedNotToday);
        }
        let stopped = self.lock_session()?.state == TimerState::Stopped;
        if !stopped {
            debug!("[RECOVERY] Timer already active, recovery skipped");
            return Ok(RecoveryOutcome::NothingToResume);
        }

        let date = self.view_date()?;
        let summary = self
            .api
            .daily_summary(date)
            .await
            .map_err(TimerError::Api)?;
        let candidate = summary
            .tasks
            .iter()
            .find(|t| t.has_running_timer())
            .cloned();
        self.replace_tasks(summary.tasks)?;

        let Some(task) = candidate else {
            info!("[RECOVERY] No running session to resume");
            return Ok(RecoveryOutcome::NothingToResume);
        };
        let session_id = SessionId::from(task.timer_session_id.clone().unwrap_or_default());

        match assess_running_task(&task, Utc::now(), self.timings.max_session_age) {
            ResumeDecision::Resume { base_ms } => {
                let resumed = self.with_session(|s| {
                    if s.state != TimerState::Stopped {
                        return false;
                    }
                    s.state = TimerState::Running {
                        session_id: session_id.clone(),
                    };
                    s.selected_task = Some(task.id);
                    s.clock.start(base_ms);
                    true
                })?;
                if !resumed {
                    return Ok(RecoveryOutcome::NothingToResume);
                }

                info!(
                    "[RECOVERY] Resumed task={} session={} base={}ms",
                    task.id, session_id, base_ms
                );
                self.open_scope(task.id, session_id.clone());
                self.attach_reconcile_tick(task.id, &session_id);
                self.notifier.emit(UiEvent::Controls(ControlState::running()));
                self.emit_state();
                self.notifier
                    .notify(NotificationLevel::Success, "Resumed existing timer session!");
                Ok(RecoveryOutcome::Resumed {
                    task_id: task.id,
                    session_id,
                    base_ms,
                })
            }
            decision => {
                warn!(
                    "[RECOVERY] Stale session {} on task {}: {:?}",
                    session_id, task.id, decision
                );
                self.discard_stale_session(task.id, session_id).await;
                Ok(RecoveryOutcome::DiscardedStale { task_id: task.id })
            }
        }
    }

    /// Best-effort cleanup: ошибка только логируется
    async fn discard_stale_session(&self, task_id: TaskId, session_id: SessionId) {
        let request = CleanupRequest {
            task_id,
            session_id,
        };
        match self.api.cleanup_timer(&request).await {
            Ok(()) => {
                self.update_task(task_id, |task| {
                    task.status = TaskStatus::Paused;
                    task.timer_session_id = None;
                    task.timer_start_time = None;
                });
            }
            Err(e) => warn!("[RECOVERY] Cleanup failed: {}", e),
        }
        self.notifier.notify(
            NotificationLevel::Warning,
            "Stale timer session detected and cleaned up",
        );
    }
}
