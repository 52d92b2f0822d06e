use std::time::Duration;

/// Latency counters for a model
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PredictionStats {
    pub count: u64,
    pub total_latency: Duration,
    pub last_latency: Option<Duration>,
}

impl PredictionStats {
    pub fn record(&mut self, latency: Duration) {
        self.count += 1;
        self.total_latency += latency;
        self.last_latency = Some(latency);
    }

    pub fn mean_latency(&self) -> Option<Duration> {
        if self.count == 0 {
            return None;
        }
        let count = u32::try_from(self.count).unwrap_or(u32::MAX);
        Some(self.total_latency / count)
    }
}
