//! Password check with per-operation rate limiting
//!
//! Each privileged operation class keeps its own failure counter. After
//! `max_failures` mismatches inside one window the class is locked until the
//! window expires, and while locked even the correct password is refused.

use alloc::string::String;

use embassy_time::{Duration, Instant};
use log::{info, warn};

use crate::config::AuthConfig;

/// Privileged operations, each rate-limited independently
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationClass {
    ClearData,
    DeleteFile,
    Reboot,
    Upload,
}

impl OperationClass {
    pub const ALL: [OperationClass; 4] = [
        OperationClass::ClearData,
        OperationClass::DeleteFile,
        OperationClass::Reboot,
        OperationClass::Upload,
    ];

    const fn index(self) -> usize {
        self as usize
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::ClearData => "clear_data",
            Self::DeleteFile => "delete",
            Self::Reboot => "reboot",
            Self::Upload => "upload",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOutcome {
    Authorized,
    Unauthorized,
    RateLimited,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RateLimitState {
    pub failed_attempts: u32,
    /// Set by the first failure of a window
    pub window_start: Option<Instant>,
}

pub struct AuthGuard {
    password: String,
    max_failures: u32,
    window: Duration,
    states: [RateLimitState; OperationClass::ALL.len()],
}

impl AuthGuard {
    pub fn new(password: &str, config: &AuthConfig) -> Self {
        Self {
            password: String::from(password),
            max_failures: config.max_failures,
            window: Duration::from_secs(config.window_secs),
            states: [RateLimitState::default(); OperationClass::ALL.len()],
        }
    }

    pub fn state(&self, class: OperationClass) -> RateLimitState {
        self.states[class.index()]
    }

    pub fn check(&mut self, provided: &str, class: OperationClass, now: Instant) -> AuthOutcome {
        let max_failures = self.max_failures;
        let window = self.window;
        let state = &mut self.states[class.index()];

        if let Some(start) = state.window_start {
            if now.saturating_duration_since(start) >= window {
                *state = RateLimitState::default();
            }
        }

        if state.failed_attempts >= max_failures {
            warn!("Rejected {} request: rate limited", class.label());
            return AuthOutcome::RateLimited;
        }

        if constant_time_eq(provided.as_bytes(), self.password.as_bytes()) {
            *state = RateLimitState::default();
            return AuthOutcome::Authorized;
        }

        if state.window_start.is_none() {
            state.window_start = Some(now);
        }
        state.failed_attempts += 1;
        if state.failed_attempts >= max_failures {
            warn!(
                "{} locked after {} failed attempts",
                class.label(),
                state.failed_attempts
            );
        } else {
            info!(
                "Rejected {} request: bad password ({}/{})",
                class.label(),
                state.failed_attempts,
                max_failures
            );
        }
        AuthOutcome::Unauthorized
    }
}

/// Compare without returning early on the first differing byte.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    let len = a.len().max(b.len());
    let mut diff = u8::from(a.len() != b.len());
    for i in 0..len {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        diff |= x ^ y;
    }
    diff == 0
}
