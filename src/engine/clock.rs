use tokio::time::Instant;

/// Локальные часы сессии: считают elapsed без сетевых запросов.
/// Авторитетный итог хранит сервер, здесь только плавный дисплей.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalClock {
    /// Время (мс), накопленное до начала текущего сегмента
    base_time_spent: u64,
    /// Монотонное время начала сегмента (None: часы не идут)
    segment_start: Option<Instant>,
}

impl LocalClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Запустить сегмент с базой `base_ms`
    pub fn start(&mut self, base_ms: u64) {
        self.base_time_spent = base_ms;
        self.segment_start = Some(Instant::now());
    }

    /// base + (now - segment_start) пока идёт, иначе base
    pub fn elapsed(&self) -> u64 {
        match self.segment_start {
            Some(started) => {
                let segment_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
                self.base_time_spent.saturating_add(segment_ms)
            }
            None => self.base_time_spent,
        }
    }

    /// Остановить: вернуть финальный elapsed и сбросить часы
    pub fn stop(&mut self) -> u64 {
        let final_ms = self.elapsed();
        self.segment_start = None;
        self.base_time_spent = 0;
        final_ms
    }

    /// Заморозить показание на `base_ms` (пауза, подтверждённая сервером)
    pub fn hold(&mut self, base_ms: u64) {
        self.base_time_spent = base_ms;
        self.segment_start = None;
    }

    /// Перепривязать к серверному значению (коррекция дрейфа)
    pub fn rebase(&mut self, server_ms: u64) {
        self.base_time_spent = server_ms;
        self.segment_start = Some(Instant::now());
    }

    pub fn is_running(&self) -> bool {
        self.segment_start.is_some()
    }

    pub fn base_time_spent(&self) -> u64 {
        self.base_time_spent
    }
}
