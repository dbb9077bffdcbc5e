use anyhow::{Context, Result};
use chrono::{DateTime, NaiveTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A managed bot record as persisted in the registry.
#[derive(Debug, Clone)]
pub struct Bot {
    pub id: i64,
    pub name: String,
    pub kind: BotKind,
    pub script_path: String,
    pub status: BotStatus,
    pub remote: Option<RemoteTarget>,
    pub group: Option<String>,
    pub schedule: Option<Schedule>,
    pub created_at: DateTime<Utc>,
    pub last_started: Option<DateTime<Utc>>,
    pub start_count: u32,
}

/// Creation input for [`Bot`]. Status always defaults to `Stopped`.
#[derive(Debug, Clone)]
pub struct BotSpec {
    pub name: String,
    pub kind: BotKind,
    pub script_path: String,
    pub remote: Option<RemoteTarget>,
    pub group: Option<String>,
    pub schedule: Option<Schedule>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BotKind {
    Local,
    Remote,
}

impl BotKind {
    pub(crate) fn as_db(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Remote => "remote",
        }
    }

    pub(crate) fn from_db(value: &str) -> Self {
        if value.eq_ignore_ascii_case("remote") {
            Self::Remote
        } else {
            Self::Local
        }
    }
}

impl fmt::Display for BotKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_db())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BotStatus {
    Stopped,
    Running,
}

impl BotStatus {
    pub(crate) fn as_db(self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Running => "running",
        }
    }

    pub(crate) fn from_db(value: &str) -> Self {
        if value.eq_ignore_ascii_case("running") {
            Self::Running
        } else {
            Self::Stopped
        }
    }

    pub fn is_running(self) -> bool {
        self == Self::Running
    }
}

impl fmt::Display for BotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_db())
    }
}

/// Host and credentials for a bot executed over a remote shell session.
///
/// The auth enum makes "exactly one credential" structural; specs carrying
/// both or neither cannot be represented.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteTarget {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub auth: RemoteAuth,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RemoteAuth {
    Password(String),
    KeyFile(String),
}

/// Daily time-of-day at which a bot should be ensured running (24h clock,
/// minute resolution).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    hour: u8,
    minute: u8,
}

impl Schedule {
    pub fn new(hour: u8, minute: u8) -> Result<Self> {
        anyhow::ensure!(hour < 24, "schedule hour out of range: {hour}");
        anyhow::ensure!(minute < 60, "schedule minute out of range: {minute}");
        Ok(Self { hour, minute })
    }

    /// True when `now` falls in this schedule's minute.
    pub fn matches(self, now: NaiveTime) -> bool {
        now.hour() == u32::from(self.hour) && now.minute() == u32::from(self.minute)
    }
}

impl FromStr for Schedule {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self> {
        let (hour_raw, minute_raw) = raw
            .trim()
            .split_once(':')
            .with_context(|| format!("invalid schedule '{raw}' (expected HH:MM)"))?;
        let hour: u8 = hour_raw
            .parse()
            .with_context(|| format!("invalid schedule hour in '{raw}'"))?;
        let minute: u8 = minute_raw
            .parse()
            .with_context(|| format!("invalid schedule minute in '{raw}'"))?;
        Self::new(hour, minute)
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedule_parses_and_displays() {
        let schedule: Schedule = "09:00".parse().unwrap();
        assert_eq!(schedule.to_string(), "09:00");

        let schedule: Schedule = "23:59".parse().unwrap();
        assert_eq!(schedule.to_string(), "23:59");
    }

    #[test]
    fn schedule_rejects_garbage() {
        assert!("".parse::<Schedule>().is_err());
        assert!("9".parse::<Schedule>().is_err());
        assert!("24:00".parse::<Schedule>().is_err());
        assert!("12:60".parse::<Schedule>().is_err());
        assert!("ab:cd".parse::<Schedule>().is_err());
    }

    #[test]
    fn schedule_matches_minute() {
        let schedule: Schedule = "09:00".parse().unwrap();
        assert!(schedule.matches(NaiveTime::from_hms_opt(9, 0, 30).unwrap()));
        assert!(!schedule.matches(NaiveTime::from_hms_opt(9, 1, 0).unwrap()));
        assert!(!schedule.matches(NaiveTime::from_hms_opt(8, 0, 0).unwrap()));
    }

    #[test]
    fn kind_and_status_round_trip_db_forms() {
        assert_eq!(BotKind::from_db(BotKind::Remote.as_db()), BotKind::Remote);
        assert_eq!(BotKind::from_db("unknown"), BotKind::Local);
        assert_eq!(
            BotStatus::from_db(BotStatus::Running.as_db()),
            BotStatus::Running
        );
        assert_eq!(BotStatus::from_db(""), BotStatus::Stopped);
    }
}
