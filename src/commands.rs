use crate::engine::{TimerEngine, TimerStateForApi};
use crate::format::{format_duration, format_time};
use crate::models::TaskId;
use crate::monitor::PresenceMonitor;
use chrono::NaiveDate;
use std::str::FromStr;
use tracing::debug;

/// Команды пользователя (строковый драйвер вместо UI)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Select(TaskId),
    Start,
    Pause,
    Stop,
    Visible,
    Hidden,
    Focus,
    Status,
    Date(NaiveDate),
    Refresh,
    Tasks,
    Help,
    Quit,
}

pub const HELP: &str = "\
commands:
  tasks                 list today's tasks
  select <task_id>      select a task
  start | pause | stop  control the timer for the selected task
  visible | hidden      window visibility changed
  focus                 window gained focus
  status                show timer state
  date <YYYY-MM-DD>     switch the viewed date
  refresh               reload the daily summary
  help | quit";

impl FromStr for Command {
    type Err = String;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut parts = line.split_whitespace();
        let name = parts
            .next()
            .ok_or_else(|| "Empty command".to_string())?
            .to_ascii_lowercase();
        let arg = parts.next();

        let command = match (name.as_str(), arg) {
            ("select", Some(raw)) => Command::Select(
                raw.parse()
                    .map_err(|e| format!("Invalid task id '{}': {}", raw, e))?,
            ),
            ("select", None) => return Err("Usage: select <task_id>".to_string()),
            ("date", Some(raw)) => Command::Date(
                NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                    .map_err(|e| format!("Invalid date '{}': {}", raw, e))?,
            ),
            ("date", None) => return Err("Usage: date <YYYY-MM-DD>".to_string()),
            ("start" | "resume", None) => Command::Start,
            ("pause", None) => Command::Pause,
            ("stop", None) => Command::Stop,
            ("visible", None) => Command::Visible,
            ("hidden", None) => Command::Hidden,
            ("focus", None) => Command::Focus,
            ("status", None) => Command::Status,
            ("refresh", None) => Command::Refresh,
            ("tasks", None) => Command::Tasks,
            ("help" | "?", None) => Command::Help,
            ("quit" | "exit", None) => Command::Quit,
            (other, Some(_)) if !other.is_empty() => {
                return Err(format!("'{}' takes no arguments", other))
            }
            (other, _) => return Err(format!("Unknown command '{}'. Try 'help'.", other)),
        };
        Ok(command)
    }
}

/// Выполнить команду. Ошибки: строкой для вывода пользователю
pub async fn execute(
    engine: &TimerEngine,
    monitor: &PresenceMonitor,
    command: Command,
) -> Result<String, String> {
    debug!("[CMD] {:?}", command);
    match command {
        Command::Select(task_id) => {
            engine.select_task(task_id).map_err(|e| e.to_string())?;
            Ok(format!("Selected task {}", task_id))
        }
        Command::Start => {
            let dispatched = engine.start_selected().map_err(|e| e.to_string())?;
            Ok(format!("Timer running (session {})", dispatched.session_id))
        }
        Command::Pause => {
            let time_spent = engine.pause_active().await.map_err(|e| e.to_string())?;
            Ok(format!("Paused at {}", format_time(time_spent)))
        }
        Command::Stop => {
            let dispatched = engine.stop_active().map_err(|e| e.to_string())?;
            Ok(format!("Stopped session {}", dispatched.session_id))
        }
        Command::Visible => Ok(sync_reply(monitor.visibility_changed(true))),
        Command::Hidden => {
            monitor.visibility_changed(false);
            Ok("Window hidden".to_string())
        }
        Command::Focus => Ok(sync_reply(monitor.focus_gained())),
        Command::Status => status_line(engine),
        Command::Date(date) => {
            engine.set_view_date(date).map_err(|e| e.to_string())?;
            let refreshed = engine.refresh_tasks().await.map_err(|e| e.to_string())?;
            Ok(if refreshed {
                format!("Viewing {}", date)
            } else {
                format!("Viewing {} (task list kept while the timer runs)", date)
            })
        }
        Command::Refresh => {
            let refreshed = engine.refresh_tasks().await.map_err(|e| e.to_string())?;
            Ok(if refreshed {
                "Tasks refreshed".to_string()
            } else {
                "Refresh skipped while the timer runs".to_string()
            })
        }
        Command::Tasks => task_list(engine),
        Command::Help => Ok(HELP.to_string()),
        Command::Quit => Ok("Bye".to_string()),
    }
}

fn sync_reply(scheduled: bool) -> String {
    if scheduled {
        "Sync scheduled".to_string()
    } else {
        "No sync needed".to_string()
    }
}

fn status_line(engine: &TimerEngine) -> Result<String, String> {
    let snapshot = engine.snapshot().map_err(|e| e.to_string())?;
    let task = snapshot
        .task_id
        .map(|id| id.to_string())
        .unwrap_or_else(|| "-".to_string());
    Ok(match &snapshot.state {
        TimerStateForApi::Stopped => format!("STOPPED task={} {}", task, snapshot.display),
        TimerStateForApi::Running { session_id } => {
            format!("RUNNING task={} {} ({})", task, snapshot.display, session_id)
        }
        TimerStateForApi::Paused { session_id } => {
            format!("PAUSED task={} {} ({})", task, snapshot.display, session_id)
        }
    })
}

fn task_list(engine: &TimerEngine) -> Result<String, String> {
    let tasks = engine.tasks().map_err(|e| e.to_string())?;
    if tasks.is_empty() {
        return Ok("No tasks for this date".to_string());
    }
    let selected = engine.selected_task().map_err(|e| e.to_string())?;
    Ok(tasks
        .iter()
        .map(|t| {
            format!(
                "{} {:>5}  {:<12} {:>8}  {}",
                if selected == Some(t.id) { "*" } else { " " },
                t.id,
                format!("{:?}", t.status),
                format_duration(t.time_spent),
                t.title
            )
        })
        .collect::<Vec<_>>()
        .join("\n"))
}
