//! Timeout policy: the four independent deadline classes of an activity task
//!
//! Each class is either a positive number of seconds or unbounded. In
//! declarations a class is written as an integer or as the string `"NONE"`.

use crate::{ConductorError, ConductorResult};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::time::Duration;

/// The deadline classes that govern an activity task's lifetime
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutKind {
    /// Armed at schedule, disarmed when a worker claims the task
    ScheduleToStart,
    /// Armed at schedule, disarmed when the task closes
    ScheduleToClose,
    /// Armed at claim, disarmed when the task closes
    StartToClose,
    /// Armed at claim, re-armed on every accepted heartbeat
    Heartbeat,
}

impl TimeoutKind {
    pub const ALL: [TimeoutKind; 4] = [
        TimeoutKind::ScheduleToStart,
        TimeoutKind::ScheduleToClose,
        TimeoutKind::StartToClose,
        TimeoutKind::Heartbeat,
    ];
}

impl fmt::Display for TimeoutKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TimeoutKind::ScheduleToStart => "schedule_to_start",
            TimeoutKind::ScheduleToClose => "schedule_to_close",
            TimeoutKind::StartToClose => "start_to_close",
            TimeoutKind::Heartbeat => "heartbeat",
        };
        f.write_str(s)
    }
}

// ── Timeout ──────────────────────────────────────────────────────────

/// One deadline class: bounded by a positive duration, or disabled
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Timeout {
    #[default]
    Unbounded,
    After(Duration),
}

impl Timeout {
    const UNBOUNDED_LITERAL: &'static str = "NONE";

    pub fn secs(secs: u64) -> Self {
        Self::After(Duration::from_secs(secs))
    }

    /// The deadline duration, or `None` when the class is disabled
    pub fn duration(&self) -> Option<Duration> {
        match self {
            Timeout::Unbounded => None,
            Timeout::After(d) => Some(*d),
        }
    }

    pub fn is_unbounded(&self) -> bool {
        matches!(self, Timeout::Unbounded)
    }

    /// Parse the declaration form: `"NONE"` or a positive number of seconds
    pub fn parse(raw: &str) -> ConductorResult<Self> {
        let raw = raw.trim();
        if raw.eq_ignore_ascii_case(Self::UNBOUNDED_LITERAL) {
            return Ok(Timeout::Unbounded);
        }
        let secs: u64 = raw.parse().map_err(|_| {
            ConductorError::InvalidTimeoutPolicy(format!(
                "expected seconds or \"NONE\", got '{}'",
                raw
            ))
        })?;
        Self::from_secs_checked(secs)
    }

    fn from_secs_checked(secs: u64) -> ConductorResult<Self> {
        if secs == 0 {
            return Err(ConductorError::InvalidTimeoutPolicy(
                "timeout must be a positive duration".to_string(),
            ));
        }
        Ok(Timeout::secs(secs))
    }

    fn validate(&self) -> ConductorResult<()> {
        match self {
            Timeout::After(d) if d.is_zero() => Err(ConductorError::InvalidTimeoutPolicy(
                "timeout must be a positive duration".to_string(),
            )),
            _ => Ok(()),
        }
    }
}

impl fmt::Display for Timeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Timeout::Unbounded => f.write_str(Self::UNBOUNDED_LITERAL),
            Timeout::After(d) => write!(f, "{}s", d.as_secs()),
        }
    }
}

impl Serialize for Timeout {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Timeout::Unbounded => serializer.serialize_str(Self::UNBOUNDED_LITERAL),
            Timeout::After(d) => serializer.serialize_u64(d.as_secs()),
        }
    }
}

impl<'de> Deserialize<'de> for Timeout {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Secs(u64),
            Text(String),
        }

        let parsed = match Raw::deserialize(deserializer)? {
            Raw::Secs(secs) => Timeout::from_secs_checked(secs),
            Raw::Text(text) => Timeout::parse(&text),
        };
        parsed.map_err(serde::de::Error::custom)
    }
}

// ── Timeout Policy ───────────────────────────────────────────────────

/// Deadlines for one activity type. Unset classes are unbounded.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutPolicy {
    #[serde(default)]
    pub schedule_to_start: Timeout,
    #[serde(default)]
    pub schedule_to_close: Timeout,
    #[serde(default)]
    pub start_to_close: Timeout,
    #[serde(default)]
    pub heartbeat: Timeout,
}

impl TimeoutPolicy {
    /// Every deadline class disabled
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn with(mut self, kind: TimeoutKind, timeout: Timeout) -> Self {
        *self.slot_mut(kind) = timeout;
        self
    }

    pub fn with_schedule_to_start(self, timeout: Timeout) -> Self {
        self.with(TimeoutKind::ScheduleToStart, timeout)
    }

    pub fn with_schedule_to_close(self, timeout: Timeout) -> Self {
        self.with(TimeoutKind::ScheduleToClose, timeout)
    }

    pub fn with_start_to_close(self, timeout: Timeout) -> Self {
        self.with(TimeoutKind::StartToClose, timeout)
    }

    pub fn with_heartbeat(self, timeout: Timeout) -> Self {
        self.with(TimeoutKind::Heartbeat, timeout)
    }

    pub fn get(&self, kind: TimeoutKind) -> Timeout {
        match kind {
            TimeoutKind::ScheduleToStart => self.schedule_to_start,
            TimeoutKind::ScheduleToClose => self.schedule_to_close,
            TimeoutKind::StartToClose => self.start_to_close,
            TimeoutKind::Heartbeat => self.heartbeat,
        }
    }

    fn slot_mut(&mut self, kind: TimeoutKind) -> &mut Timeout {
        match kind {
            TimeoutKind::ScheduleToStart => &mut self.schedule_to_start,
            TimeoutKind::ScheduleToClose => &mut self.schedule_to_close,
            TimeoutKind::StartToClose => &mut self.start_to_close,
            TimeoutKind::Heartbeat => &mut self.heartbeat,
        }
    }

    /// Apply per-decision overrides on top of this policy
    pub fn merged(&self, overrides: &TimeoutOverrides) -> Self {
        let mut merged = *self;
        for kind in TimeoutKind::ALL {
            if let Some(timeout) = overrides.get(kind) {
                *merged.slot_mut(kind) = timeout;
            }
        }
        merged
    }

    pub fn validate(&self) -> ConductorResult<()> {
        TimeoutKind::ALL
            .iter()
            .try_for_each(|kind| self.get(*kind).validate())
    }
}

/// Per-decision timeout overrides; `None` keeps the activity type's default
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule_to_start: Option<Timeout>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule_to_close: Option<Timeout>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_to_close: Option<Timeout>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heartbeat: Option<Timeout>,
}

impl TimeoutOverrides {
    pub fn get(&self, kind: TimeoutKind) -> Option<Timeout> {
        match kind {
            TimeoutKind::ScheduleToStart => self.schedule_to_start,
            TimeoutKind::ScheduleToClose => self.schedule_to_close,
            TimeoutKind::StartToClose => self.start_to_close,
            TimeoutKind::Heartbeat => self.heartbeat,
        }
    }

    pub fn set(&mut self, kind: TimeoutKind, timeout: Timeout) {
        let slot = match kind {
            TimeoutKind::ScheduleToStart => &mut self.schedule_to_start,
            TimeoutKind::ScheduleToClose => &mut self.schedule_to_close,
            TimeoutKind::StartToClose => &mut self.start_to_close,
            TimeoutKind::Heartbeat => &mut self.heartbeat,
        };
        *slot = Some(timeout);
    }

    pub fn is_empty(&self) -> bool {
        TimeoutKind::ALL.iter().all(|k| self.get(*k).is_none())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_declaration_forms() {
        assert_eq!(Timeout::parse("NONE").unwrap(), Timeout::Unbounded);
        assert_eq!(Timeout::parse("none").unwrap(), Timeout::Unbounded);
        assert_eq!(Timeout::parse(" 15 ").unwrap(), Timeout::secs(15));
        assert!(Timeout::parse("0").is_err());
        assert!(Timeout::parse("soon").is_err());
    }

    #[test]
    fn test_deserialize_policy_from_mixed_values() {
        let policy: TimeoutPolicy = serde_json::from_value(serde_json::json!({
            "schedule_to_start": "NONE",
            "start_to_close": 10,
            "heartbeat": "15"
        }))
        .unwrap();

        assert!(policy.schedule_to_start.is_unbounded());
        assert!(policy.schedule_to_close.is_unbounded());
        assert_eq!(policy.start_to_close, Timeout::secs(10));
        assert_eq!(policy.heartbeat.duration(), Some(Duration::from_secs(15)));
    }

    #[test]
    fn test_deserialize_rejects_zero() {
        let result: Result<TimeoutPolicy, _> =
            serde_json::from_value(serde_json::json!({ "heartbeat": 0 }));
        assert!(result.is_err());
    }

    #[test]
    fn test_serialize_unbounded_as_none_literal() {
        let policy = TimeoutPolicy::unbounded().with_start_to_close(Timeout::secs(15));
        let json = serde_json::to_value(policy).unwrap();
        assert_eq!(json["schedule_to_start"], "NONE");
        assert_eq!(json["start_to_close"], 15);
    }

    #[test]
    fn test_merge_overrides() {
        let base = TimeoutPolicy::unbounded()
            .with_start_to_close(Timeout::secs(10))
            .with_heartbeat(Timeout::secs(15));
        let mut overrides = TimeoutOverrides::default();
        overrides.set(TimeoutKind::Heartbeat, Timeout::Unbounded);
        overrides.set(TimeoutKind::ScheduleToStart, Timeout::secs(30));

        let merged = base.merged(&overrides);
        assert_eq!(merged.start_to_close, Timeout::secs(10));
        assert!(merged.heartbeat.is_unbounded());
        assert_eq!(merged.schedule_to_start, Timeout::secs(30));
        assert!(!overrides.is_empty());
    }

    #[test]
    fn test_validate_rejects_zero_duration() {
        let policy = TimeoutPolicy::unbounded().with_heartbeat(Timeout::After(Duration::ZERO));
        assert!(matches!(
            policy.validate(),
            Err(ConductorError::InvalidTimeoutPolicy(_))
        ));
    }
}
