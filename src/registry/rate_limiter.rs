use crate::llm::types::{RateLimitConfig, RateLimitStatus};
use chrono::{DateTime, Duration, Utc};

/// Why a call was refused locally.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitRejection {
    pub message: String,
    pub reset_time: DateTime<Utc>,
}

/// Fixed-window request and token budget for one provider. A limit of zero means
/// unlimited. Like the circuit breaker it is guarded by the registry's
/// per-provider mutex rather than its own lock.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    config: RateLimitConfig,
    minute: Window,
    day: Window,
}

#[derive(Debug, Clone)]
struct Window {
    started: DateTime<Utc>,
    requests: u32,
    tokens: u64,
}

impl Window {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            started: now,
            requests: 0,
            tokens: 0,
        }
    }

    fn roll(&mut self, now: DateTime<Utc>, length: Duration) {
        if now.signed_duration_since(self.started) >= length {
            *self = Window::new(now);
        }
    }
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self::new_at(config, Utc::now())
    }

    pub fn new_at(config: RateLimitConfig, now: DateTime<Utc>) -> Self {
        Self {
            config,
            minute: Window::new(now),
            day: Window::new(now),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    fn refill(&mut self, now: DateTime<Utc>) {
        self.minute.roll(now, Duration::minutes(1));
        self.day.roll(now, Duration::days(1));
    }

    /// Reserve one request and `tokens` estimated tokens, or explain which budget
    /// is spent. A request larger than the whole token budget is admitted into an
    /// otherwise empty window so it can never be starved forever.
    pub fn try_acquire_at(&mut self, tokens: u64, now: DateTime<Utc>) -> Result<(), RateLimitRejection> {
        self.refill(now);

        if let Some(daily) = self.config.requests_per_day.filter(|d| *d > 0)
            && self.day.requests >= daily
        {
            return Err(RateLimitRejection {
                message: format!("daily request limit of {} reached", daily),
                reset_time: self.day.started + Duration::days(1),
            });
        }

        let rpm = self.config.requests_per_minute;
        if rpm > 0 && self.minute.requests >= rpm {
            return Err(RateLimitRejection {
                message: format!("request rate limit of {}/min exceeded", rpm),
                reset_time: self.minute.started + Duration::minutes(1),
            });
        }

        let tpm = self.config.tokens_per_minute;
        if tpm > 0 && self.minute.tokens > 0 && self.minute.tokens + tokens > tpm {
            return Err(RateLimitRejection {
                message: format!(
                    "token rate limit exceeded: need {} tokens, {} left this minute",
                    tokens,
                    tpm.saturating_sub(self.minute.tokens)
                ),
                reset_time: self.minute.started + Duration::minutes(1),
            });
        }

        self.minute.requests += 1;
        self.minute.tokens += tokens;
        self.day.requests += 1;
        Ok(())
    }

    /// True when not even a minimal request would be admitted at `now`.
    pub fn is_exhausted_at(&self, now: DateTime<Utc>) -> bool {
        let mut probe = self.clone();
        probe.try_acquire_at(0, now).is_err()
    }

    pub fn status_at(&self, now: DateTime<Utc>) -> RateLimitStatus {
        let mut current = self.clone();
        current.refill(now);
        RateLimitStatus {
            requests_remaining: self
                .config
                .requests_per_minute
                .saturating_sub(current.minute.requests),
            tokens_remaining: self
                .config
                .tokens_per_minute
                .saturating_sub(current.minute.tokens),
            daily_requests_remaining: self
                .config
                .requests_per_day
                .map(|d| d.saturating_sub(current.day.requests)),
            reset_time: current.minute.started + Duration::minutes(1),
        }
    }
}
