// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Per-tool circuit breaking for autonomous runs.
//!
//! A tool that fails several times in a row is temporarily disabled so the
//! model stops burning turns on it; the failure streak resets on success and
//! the tool re-enables itself when the disable window expires.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use tracing::warn;

use vyuha_config::ToolsConfig;

#[derive(Debug, Default, Clone)]
struct ToolHealth {
    consecutive_failures: u32,
    disabled_until: Option<DateTime<Utc>>,
}

/// Tracks tool failure streaks and disables unhealthy tools for a window.
pub struct AutonomyGate {
    disable_after: u32,
    disable_duration: Duration,
    health: Mutex<HashMap<String, ToolHealth>>,
}

impl AutonomyGate {
    pub fn new(cfg: &ToolsConfig) -> Self {
        Self {
            disable_after: cfg.disable_after_failures,
            disable_duration: Duration::milliseconds(cfg.disable_duration_ms),
            health: Mutex::new(HashMap::new()),
        }
    }

    /// Record one execution outcome for `tool`.
    pub fn record_result(&self, tool: &str, success: bool) {
        self.record_result_at(tool, success, Utc::now());
    }

    pub fn record_result_at(&self, tool: &str, success: bool, now: DateTime<Utc>) {
        let mut health = self.health.lock().unwrap();
        let entry = health.entry(tool.to_string()).or_default();
        if success {
            entry.consecutive_failures = 0;
            return;
        }
        entry.consecutive_failures += 1;
        if entry.consecutive_failures >= self.disable_after && entry.disabled_until.is_none() {
            let until = now + self.disable_duration;
            warn!(
                %tool,
                failures = entry.consecutive_failures,
                until = %until,
                "disabling tool after repeated failures"
            );
            entry.disabled_until = Some(until);
        }
    }

    /// Whether `tool` is currently disabled.  An expired window re-enables
    /// the tool and clears its streak.
    pub fn is_disabled(&self, tool: &str) -> bool {
        self.is_disabled_at(tool, Utc::now())
    }

    pub fn is_disabled_at(&self, tool: &str, now: DateTime<Utc>) -> bool {
        let mut health = self.health.lock().unwrap();
        let Some(entry) = health.get_mut(tool) else {
            return false;
        };
        match entry.disabled_until {
            Some(until) if now < until => true,
            Some(_) => {
                entry.disabled_until = None;
                entry.consecutive_failures = 0;
                false
            }
            None => false,
        }
    }

    /// Manually clear a tool's disable state and failure streak.
    pub fn reset(&self, tool: &str) {
        self.health.lock().unwrap().remove(tool);
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn gate() -> AutonomyGate {
        AutonomyGate::new(&ToolsConfig::default())
    }

    fn t0() -> DateTime<Utc> {
        "2026-01-01T00:00:00Z".parse().unwrap()
    }

    #[test]
    fn unknown_tool_is_enabled() {
        assert!(!gate().is_disabled("shell"));
    }

    #[test]
    fn failures_below_threshold_keep_tool_enabled() {
        let g = gate();
        g.record_result_at("shell", false, t0());
        g.record_result_at("shell", false, t0());
        assert!(!g.is_disabled_at("shell", t0()));
    }

    #[test]
    fn threshold_failures_disable_tool() {
        let g = gate();
        for _ in 0..3 {
            g.record_result_at("shell", false, t0());
        }
        assert!(g.is_disabled_at("shell", t0()));
    }

    #[test]
    fn success_resets_failure_streak() {
        let g = gate();
        g.record_result_at("shell", false, t0());
        g.record_result_at("shell", false, t0());
        g.record_result_at("shell", true, t0());
        g.record_result_at("shell", false, t0());
        assert!(!g.is_disabled_at("shell", t0()));
    }

    #[test]
    fn disable_expires_after_duration() {
        let g = gate();
        for _ in 0..3 {
            g.record_result_at("shell", false, t0());
        }
        let still_disabled = t0() + Duration::milliseconds(59_999);
        let expired = t0() + Duration::milliseconds(60_001);
        assert!(g.is_disabled_at("shell", still_disabled));
        assert!(!g.is_disabled_at("shell", expired));
        // Streak cleared on expiry: one more failure does not re-disable.
        g.record_result_at("shell", false, expired);
        assert!(!g.is_disabled_at("shell", expired));
    }

    #[test]
    fn reset_clears_disable_state() {
        let g = gate();
        for _ in 0..3 {
            g.record_result_at("shell", false, t0());
        }
        g.reset("shell");
        assert!(!g.is_disabled_at("shell", t0()));
    }

    #[test]
    fn tools_are_tracked_independently() {
        let g = gate();
        for _ in 0..3 {
            g.record_result_at("shell", false, t0());
        }
        assert!(g.is_disabled_at("shell", t0()));
        assert!(!g.is_disabled_at("read_file", t0()));
    }
}
