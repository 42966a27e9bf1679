//! Форматирование длительностей для дисплея таймера и уведомлений.
//! Все значения во входе: миллисекунды.

/// Дисплей таймера: `HH:MM:SS` (часы не ограничены 24)
pub fn format_time(ms: u64) -> String {
    let total_seconds = ms / 1000;
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
}

/// Человекочитаемая длительность: `45s`, `1m 5s`, `1h`, `3h 12m`.
/// Секунды округляются до ближайшей; при часах секунды не показываются.
pub fn format_duration(ms: u64) -> String {
    if ms == 0 {
        return "0s".to_string();
    }
    let total_seconds = ms.saturating_add(500) / 1000;
    if total_seconds < 60 {
        return format!("{}s", total_seconds);
    }
    let total_minutes = total_seconds / 60;
    if total_minutes < 60 {
        return format!("{}m {}s", total_minutes, total_seconds % 60);
    }
    let hours = total_minutes / 60;
    let minutes = total_minutes % 60;
    if minutes == 0 {
        format!("{}h", hours)
    } else {
        format!("{}h {}m", hours, minutes)
    }
}
