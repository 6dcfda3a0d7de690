//! Login policy: a synchronous veto checked before any code is exchanged.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// What the policy gets to see about a login attempt.
#[derive(Debug, Clone, Copy)]
pub struct LoginAttempt<'a> {
    pub provider: &'a str,
    /// Client address (peer IP or first `X-Forwarded-For` hop).
    pub client: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyVerdict {
    Allow,
    /// Abort the attempt; the reason is shown to the user.
    Deny(String),
}

pub trait LoginPolicy: Send + Sync {
    fn check(&self, attempt: &LoginAttempt<'_>) -> PolicyVerdict;
}

/// Policy that never vetoes.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

impl LoginPolicy for AllowAll {
    fn check(&self, _attempt: &LoginAttempt<'_>) -> PolicyVerdict {
        PolicyVerdict::Allow
    }
}

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u32,
    started: Instant,
}

/// Fixed-window limiter keyed by client address.
pub struct AttemptLimiter {
    max_attempts: u32,
    window: Duration,
    windows: Mutex<HashMap<String, Window>>,
}

impl AttemptLimiter {
    pub fn new(max_attempts: u32, window: Duration) -> Self {
        Self {
            max_attempts,
            window,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Limiter for `max_attempts` per window, or `None` when the limit is 0
    /// (no limit configured).
    pub fn enabled(max_attempts: u32, window: Duration) -> Option<Self> {
        (max_attempts > 0).then(|| Self::new(max_attempts, window))
    }

    fn check_at(&self, client: &str, now: Instant) -> PolicyVerdict {
        let mut windows = self.windows.lock().expect("login limiter mutex poisoned");

        if windows.len() > 10_000 {
            windows.retain(|_, w| now.duration_since(w.started) < self.window);
        }

        let entry = windows.entry(client.to_string()).or_insert(Window {
            count: 0,
            started: now,
        });
        if now.duration_since(entry.started) >= self.window {
            *entry = Window {
                count: 0,
                started: now,
            };
        }

        entry.count += 1;
        if entry.count > self.max_attempts {
            let retry_in = self
                .window
                .saturating_sub(now.duration_since(entry.started))
                .as_secs()
                .max(1);
            return PolicyVerdict::Deny(format!(
                "too many login attempts, try again in {retry_in}s"
            ));
        }
        PolicyVerdict::Allow
    }
}

impl LoginPolicy for AttemptLimiter {
    fn check(&self, attempt: &LoginAttempt<'_>) -> PolicyVerdict {
        let verdict = self.check_at(attempt.client, Instant::now());
        if verdict != PolicyVerdict::Allow {
            tracing::warn!(
                provider = attempt.provider,
                client = attempt.client,
                "login attempt vetoed by rate limit"
            );
        }
        verdict
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allow_all_allows() {
        let attempt = LoginAttempt {
            provider: "google",
            client: "10.0.0.1",
        };
        assert_eq!(AllowAll.check(&attempt), PolicyVerdict::Allow);
    }

    #[test]
    fn limiter_denies_after_max_and_resets_with_window() {
        let limiter = AttemptLimiter::new(2, Duration::from_secs(60));
        let t0 = Instant::now();

        assert_eq!(limiter.check_at("a", t0), PolicyVerdict::Allow);
        assert_eq!(limiter.check_at("a", t0), PolicyVerdict::Allow);
        assert!(matches!(limiter.check_at("a", t0), PolicyVerdict::Deny(_)));

        // Other clients are counted separately
        assert_eq!(limiter.check_at("b", t0), PolicyVerdict::Allow);

        let later = t0 + Duration::from_secs(61);
        assert_eq!(limiter.check_at("a", later), PolicyVerdict::Allow);
    }

    #[test]
    fn zero_limit_disables_the_limiter() {
        assert!(AttemptLimiter::enabled(0, Duration::from_secs(60)).is_none());

        let limiter = AttemptLimiter::enabled(1, Duration::from_secs(60)).unwrap();
        let t0 = Instant::now();
        assert_eq!(limiter.check_at("1.2.3.4", t0), PolicyVerdict::Allow);
        assert!(matches!(limiter.check_at("1.2.3.4", t0), PolicyVerdict::Deny(_)));
    }
}
