//! Inbound call routing decision engine.
//!
//! A pure function over a call's time-windowed routing rules: given the
//! rules in priority order and the current instant, decide whether the
//! call is forwarded to a human number, handed to a specific assistant,
//! or falls through to the number's statically configured assistant.
//!
//! Emergency rules pre-empt everything: if any rule is flagged emergency,
//! only emergency rules are considered at all.

pub mod hours;

use chrono::{DateTime, NaiveTime, Utc, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

pub use hours::{ServiceHoursError, WeeklySchedule, in_service_hours};

// =============================================================================
// Rule Model
// =============================================================================

/// Target of a routing rule. Forwarding to a number and selecting an
/// assistant are mutually exclusive by construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleTarget {
    /// Forward the call untouched to a human number
    Forward(String),
    /// Hand the call to a specific assistant
    Assistant(String),
}

/// One time-windowed inbound routing rule.
///
/// Rules are evaluated in the order supplied by the caller; the first rule
/// whose day and time window contain "now" wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundRoutingRule {
    /// IANA time zone id the rule's window is expressed in.
    /// An invalid or empty id falls back to UTC rather than failing.
    #[serde(default)]
    pub time_zone: String,

    /// Days of week the rule applies on. Empty means every day.
    #[serde(default)]
    pub days: Vec<Weekday>,

    /// When set, the time window is ignored and the whole day matches.
    #[serde(default)]
    pub is_full_day: bool,

    /// Window start (local time of day)
    pub start: NaiveTime,

    /// Window end (local time of day)
    pub end: NaiveTime,

    /// Emergency rules pre-empt all non-emergency rules.
    #[serde(default)]
    pub is_emergency: bool,

    /// Where a matching call goes.
    pub target: RuleTarget,
}

impl InboundRoutingRule {
    /// Resolve the rule's time zone, falling back to UTC on a bad id.
    fn zone(&self) -> Tz {
        self.time_zone.parse().unwrap_or(Tz::UTC)
    }

    /// Whether the rule's window contains the given instant.
    fn matches(&self, now: DateTime<Utc>) -> bool {
        let local = now.with_timezone(&self.zone());
        let weekday = chrono::Datelike::weekday(&local);

        // Empty day set is a wildcard
        if !self.days.is_empty() && !self.days.contains(&weekday) {
            return false;
        }

        if self.is_full_day {
            return true;
        }

        let t = local.time();
        if self.start == self.end {
            // Explicit empty window, never a 24h one
            return false;
        }
        if self.start > self.end {
            // Overnight wraparound, e.g. 22:00-06:00
            t >= self.start || t <= self.end
        } else {
            t >= self.start && t <= self.end
        }
    }
}

// =============================================================================
// Evaluation
// =============================================================================

/// Outcome of evaluating the routing rules for one call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Forward the call untouched to this number; no AI session is opened
    Forward(String),
    /// Hand the call to this assistant
    Assistant(String),
    /// No rule matched; use the statically configured assistant
    NoMatch,
}

/// Evaluate the routing rules against the given instant.
///
/// If any rule is flagged emergency the candidate set is restricted to
/// emergency rules only; otherwise all rules are candidates. Within the
/// candidate set the first match in the supplied order wins.
pub fn evaluate(rules: &[InboundRoutingRule], now: DateTime<Utc>) -> RouteOutcome {
    let has_emergency = rules.iter().any(|r| r.is_emergency);

    let candidates = rules.iter().filter(|r| !has_emergency || r.is_emergency);

    for rule in candidates {
        if rule.matches(now) {
            return match &rule.target {
                RuleTarget::Forward(number) => RouteOutcome::Forward(number.clone()),
                RuleTarget::Assistant(id) => RouteOutcome::Assistant(id.clone()),
            };
        }
    }

    RouteOutcome::NoMatch
}

// =============================================================================
// Tests
// =============================================================================
