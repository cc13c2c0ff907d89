use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use rand::distr::{Distribution, Uniform};
use tracing::debug;

/// Browser user agents rotated across crawl requests.
pub const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36 Edg/124.0.0.0",
];

pub fn random_user_agent() -> &'static str {
    let mut rng = rand::rng();
    Uniform::new(0, USER_AGENTS.len())
        .map(|d| USER_AGENTS[d.sample(&mut rng)])
        .unwrap_or(USER_AGENTS[0])
}

/// Spaces out requests to the same host.
///
/// Each caller reserves the next free slot for its host before sleeping, so
/// concurrent crawls against one site queue up instead of bursting. Slots are
/// `min_delay` plus up to 20% jitter apart; different hosts never wait on
/// each other.
#[derive(Debug)]
pub struct HostThrottle {
    min_delay: Duration,
    next_slot: Mutex<HashMap<String, Instant>>,
}

impl HostThrottle {
    pub fn new(min_delay: Duration) -> Self {
        Self {
            min_delay,
            next_slot: Mutex::new(HashMap::new()),
        }
    }

    fn spacing(&self) -> Duration {
        let base = self.min_delay.as_millis() as u64;
        if base == 0 {
            return Duration::ZERO;
        }
        let jitter = {
            let mut rng = rand::rng();
            Uniform::new_inclusive(0u64, base / 5)
                .map(|d| d.sample(&mut rng))
                .unwrap_or(0)
        };
        Duration::from_millis(base + jitter)
    }

    /// Time the caller has to wait before hitting `host`; reserves the slot.
    fn reserve(&self, host: &str) -> Duration {
        let now = Instant::now();
        let spacing = self.spacing();
        let mut slots = self.next_slot.lock().unwrap_or_else(|p| p.into_inner());
        let slot = slots
            .get(host)
            .copied()
            .filter(|t| *t > now)
            .unwrap_or(now);
        slots.insert(host.to_string(), slot + spacing);
        slot.saturating_duration_since(now)
    }

    pub async fn wait(&self, host: &str) {
        let wait = self.reserve(host);
        if !wait.is_zero() {
            debug!("Waiting {}ms before next request to {}", wait.as_millis(), host);
            tokio::time::sleep(wait).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_agent_comes_from_pool() {
        assert!(USER_AGENTS.contains(&random_user_agent()));
    }

    #[test]
    fn first_request_per_host_is_immediate() {
        let throttle = HostThrottle::new(Duration::from_millis(500));
        assert!(throttle.reserve("a.example").is_zero());
        assert!(throttle.reserve("b.example").is_zero());
        let second = throttle.reserve("a.example");
        assert!(second >= Duration::from_millis(450));
        assert!(second <= Duration::from_millis(600));
    }

    #[test]
    fn zero_delay_never_waits() {
        let throttle = HostThrottle::new(Duration::ZERO);
        for _ in 0..3 {
            assert!(throttle.reserve("a.example").is_zero());
        }
    }

    #[tokio::test]
    async fn wait_sleeps_between_requests() {
        let throttle = HostThrottle::new(Duration::from_millis(50));
        let start = Instant::now();
        throttle.wait("a.example").await;
        throttle.wait("a.example").await;
        assert!(start.elapsed() >= Duration::from_millis(45));
    }
}
