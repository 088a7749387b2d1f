//! Sliding-window admission control with two independent scopes
//! (per-credential, per-client-ip). Backed by a concurrent keyed map so
//! admission checks for unrelated keys never contend.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    Credential,
    ClientIp,
}

#[derive(Debug, Clone)]
pub struct Admission {
    pub allowed: bool,
    pub retry_after_secs: u64,
    /// Set when the admission was granted only because the gate's own
    /// storage was unavailable, not because the window had room.
    pub fail_open: bool,
}

impl Admission {
    fn allow() -> Self {
        Self { allowed: true, retry_after_secs: 0, fail_open: false }
    }

    fn deny(retry_after_secs: u64) -> Self {
        Self { allowed: false, retry_after_secs, fail_open: false }
    }

    fn fail_open() -> Self {
        Self { allowed: true, retry_after_secs: 0, fail_open: true }
    }
}

struct Window {
    limit: u32,
    period: Duration,
    entries: Mutex<VecDeque<Instant>>,
}

/// The Rate Gate. One instance is shared process-wide (in a real deployment
/// its window state would live in a shared KV store so horizontally scaled
/// workers share budgets — this in-process map is the local analogue of
/// that shared store).
pub struct RateGate {
    credential_limit_per_sec: u32,
    ip_limit_per_min: u32,
    #[allow(dead_code)]
    ip_burst: u32,
    windows: DashMap<(Scope, String), Window>,
    whitelist: HashSet<String>,
    blacklist: HashSet<String>,
    fail_open_total: AtomicU64,
}

impl RateGate {
    pub fn new(credential_limit_per_sec: u32, ip_limit_per_min: u32, ip_burst: u32) -> Self {
        Self {
            credential_limit_per_sec,
            ip_limit_per_min,
            ip_burst,
            windows: DashMap::new(),
            whitelist: HashSet::new(),
            blacklist: HashSet::new(),
            fail_open_total: AtomicU64::new(0),
        }
    }

    pub fn with_whitelist(mut self, keys: impl IntoIterator<Item = String>) -> Self {
        self.whitelist = keys.into_iter().collect();
        self
    }

    pub fn with_blacklist(mut self, keys: impl IntoIterator<Item = String>) -> Self {
        self.blacklist = keys.into_iter().collect();
        self
    }

    pub fn fail_open_total(&self) -> u64 {
        self.fail_open_total.load(Ordering::Relaxed)
    }

    /// Check admission for `key` under `scope`. Blacklist and whitelist are
    /// consulted before the sliding-window check.
    pub fn admit(&self, scope: Scope, key: &str) -> Admission {
        if self.blacklist.contains(key) {
            return Admission::deny(u64::MAX.min(3600));
        }
        if self.whitelist.contains(key) {
            return Admission::allow();
        }

        let (limit, period) = match scope {
            Scope::Credential => (self.credential_limit_per_sec, Duration::from_secs(1)),
            Scope::ClientIp => (self.ip_limit_per_min, Duration::from_secs(60)),
        };

        let entry = self.windows.entry((scope, key.to_string())).or_insert_with(|| Window {
            limit,
            period,
            entries: Mutex::new(VecDeque::new()),
        });

        let now = Instant::now();
        let mut entries = match entry.entries.lock() {
            Ok(guard) => guard,
            Err(_) => {
                // Poisoned lock: treat as gate storage being unavailable.
                self.fail_open_total.fetch_add(1, Ordering::Relaxed);
                warn!(?scope, key, "rate gate storage unavailable, failing open");
                return Admission::fail_open();
            }
        };

        while let Some(&oldest) = entries.front() {
            if now.duration_since(oldest) >= entry.period {
                entries.pop_front();
            } else {
                break;
            }
        }

        if (entries.len() as u32) < entry.limit {
            entries.push_back(now);
            Admission::allow()
        } else {
            let oldest = *entries.front().expect("len >= limit > 0 implies non-empty");
            let retry_after = entry.period.saturating_sub(now.duration_since(oldest));
            Admission::deny((retry_after.as_secs_f64().ceil() as u64).max(1))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admits_under_limit_and_denies_at_boundary() {
        let gate = RateGate::new(5, 100, 20);
        for _ in 0..5 {
            assert!(gate.admit(Scope::Credential, "cred-a").allowed);
        }
        let sixth = gate.admit(Scope::Credential, "cred-a");
        assert!(!sixth.allowed);
        assert!(sixth.retry_after_secs >= 1);
    }

    #[test]
    fn scopes_are_independent() {
        let gate = RateGate::new(1, 1, 1);
        assert!(gate.admit(Scope::Credential, "same-key").allowed);
        // Different scope, same key string — independent budget.
        assert!(gate.admit(Scope::ClientIp, "same-key").allowed);
    }

    #[test]
    fn keys_are_independent() {
        let gate = RateGate::new(1, 100, 20);
        assert!(gate.admit(Scope::Credential, "a").allowed);
        assert!(gate.admit(Scope::Credential, "b").allowed);
        assert!(!gate.admit(Scope::Credential, "a").allowed);
    }

    #[test]
    fn whitelist_bypasses_window() {
        let gate = RateGate::new(1, 100, 20).with_whitelist(["vip".to_string()]);
        for _ in 0..10 {
            assert!(gate.admit(Scope::Credential, "vip").allowed);
        }
    }

    #[test]
    fn blacklist_always_denies() {
        let gate = RateGate::new(100, 100, 20).with_blacklist(["bad-actor".to_string()]);
        assert!(!gate.admit(Scope::ClientIp, "bad-actor").allowed);
    }
}
