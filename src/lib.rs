pub mod auth;
pub mod commands;
pub mod config;
pub mod engine;
pub mod format;
pub mod ipc;
pub mod models;
pub mod monitor;
pub mod network;
pub mod sync;
use crate::commands::Command;
use crate::config::ClientConfig;
use crate::engine::TimerEngine;
use crate::ipc::{Notifier, UiEvent};
use crate::monitor::PresenceMonitor;
use crate::network::{HttpTimerApi, TimerApi};
use crate::sync::spawn_summary_refresh;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[cfg(test)]
pub(crate) mod test_utils;

pub fn run() {
    // Инициализация логирования: по умолчанию info (если RUST_LOG не задан)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = ClientConfig::from_env();
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!("[APP] Failed to create runtime: {}", e);
            return;
        }
    };
    runtime.block_on(run_client(config));
}

/// Цикл клиента: восстановление, фоновые задачи, команды из stdin
pub async fn run_client(config: ClientConfig) {
    info!(
        "[APP] taskclock {} (backend {})",
        config.app_version, config.api_base_url
    );
    let api: Arc<dyn TimerApi> = Arc::new(HttpTimerApi::new(&config));
    let notifier = Notifier::new(256);
    let printer = spawn_event_printer(notifier.subscribe());
    let engine = TimerEngine::new(api, notifier, config.timings.clone());

    match engine.recover_on_startup().await {
        Ok(outcome) => info!("[APP] Startup recovery: {:?}", outcome),
        Err(e) => warn!("[APP] Startup recovery failed: {}", e),
    }
    let summary_refresh = spawn_summary_refresh(engine.clone(), config.timings.summary_refresh);
    let monitor = PresenceMonitor::new(engine.clone());

    println!("{}", commands::HELP);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                error!("[APP] Failed to read stdin: {}", e);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        let command = match line.parse::<Command>() {
            Ok(command) => command,
            Err(e) => {
                println!("{}", e);
                continue;
            }
        };
        let quit = command == Command::Quit;
        match commands::execute(&engine, &monitor, command).await {
            Ok(output) => println!("{}", output),
            Err(e) => println!("error: {}", e),
        }
        if quit {
            break;
        }
    }

    // Незавершённая сессия остаётся на сервере: её подхватит recovery при следующем запуске
    summary_refresh.abort();
    engine.shutdown();
    printer.abort();
    info!("[APP] Shutdown complete");
}

/// Рендер событий UI в терминал. Тики дисплея только в debug
fn spawn_event_printer(mut rx: broadcast::Receiver<UiEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let event = match rx.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!("[APP] Event printer lagged by {} events", skipped);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };
            match &event {
                UiEvent::Notification { level, message } => {
                    println!("[{:?}] {}", level, message)
                }
                UiEvent::Display { .. } => {}
                _ => match serde_json::to_string(&event) {
                    Ok(json) => debug!("[APP] {} {}", event.name(), json),
                    Err(e) => warn!("[APP] Failed to serialize {}: {}", event.name(), e),
                },
            }
        }
    })
}
