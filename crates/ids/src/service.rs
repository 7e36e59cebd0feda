//! Identifier implementations.

use crate::{IdError, IdResult};
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::{fmt, str::FromStr};

/// Re-exported for convenience.
pub use ::uuid::Uuid;

const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%S%.3f";

/// A UUID guaranteed to be in canonical form (32 lowercase hex characters, no hyphens).
///
/// # Construction
/// - [`ShardableUuid::new`] generates a fresh v4 identifier.
/// - [`ShardableUuid::parse`] validates an externally supplied identifier.
///
/// Displaying a `ShardableUuid` always yields the canonical form.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShardableUuid(Uuid);

impl Default for ShardableUuid {
    fn default() -> Self {
        Self::new()
    }
}

impl ShardableUuid {
    /// Generates a new random identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parses an identifier that must already be canonical.
    ///
    /// # Errors
    ///
    /// Returns [`IdError::InvalidInput`] if `input` is not 32 lowercase hex characters.
    pub fn parse(input: &str) -> IdResult<Self> {
        if !Self::is_canonical(input) {
            return Err(IdError::InvalidInput(format!(
                "UUID must be 32 lowercase hex characters without hyphens, got: '{}'",
                input
            )));
        }
        Uuid::parse_str(input)
            .map(Self)
            .map_err(|e| IdError::InvalidInput(format!("invalid UUID '{}': {}", input, e)))
    }

    pub fn uuid(&self) -> Uuid {
        self.0
    }

    /// Purely syntactic check: exactly 32 bytes of `0-9a-f`.
    pub fn is_canonical(input: &str) -> bool {
        input.len() == 32
            && input
                .bytes()
                .all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
    }

    /// Returns `parent_dir/<s1>/<s2>/<uuid>/` where `s1`/`s2` are the first two hex pairs.
    pub fn sharded_dir(&self, parent_dir: &Path) -> PathBuf {
        let canonical = self.0.simple().to_string();
        parent_dir
            .join(&canonical[0..2])
            .join(&canonical[2..4])
            .join(&canonical)
    }
}

impl fmt::Display for ShardableUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

impl FromStr for ShardableUuid {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ShardableUuid::parse(s)
    }
}

/// A time-prefixed identifier: `YYYYMMDDTHHMMSS.mmmZ-<canonical uuid>`.
///
/// Example: `20260111T143522.045Z-550e8400e29b41d4a716446655440000`
///
/// Ordering compares the timestamp first, then the UUID. [`TimestampId::generate`] given the
/// previously issued id always returns a strictly later timestamp, so ids issued from one
/// writer are totally ordered by creation.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TimestampId {
    timestamp: DateTime<Utc>,
    uuid: ShardableUuid,
}

impl TimestampId {
    /// Issues a new id stamped at `now`.
    ///
    /// If `last` is at or after `now`, the new timestamp is `last + 1ms`.
    pub fn generate(last: Option<&TimestampId>, now: DateTime<Utc>) -> Self {
        // Millisecond precision is all that survives the textual form.
        let now = truncate_to_millis(now);
        let timestamp = match last {
            Some(prev) if now <= prev.timestamp => prev.timestamp + Duration::milliseconds(1),
            _ => now,
        };

        Self {
            timestamp,
            uuid: ShardableUuid::new(),
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn uuid(&self) -> &ShardableUuid {
        &self.uuid
    }
}

fn truncate_to_millis(ts: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ts.timestamp_millis()).unwrap_or(ts)
}

impl Ord for TimestampId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.timestamp
            .cmp(&other.timestamp)
            .then_with(|| self.uuid.cmp(&other.uuid))
    }
}

impl PartialOrd for TimestampId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl FromStr for TimestampId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (ts_str, uuid_str) = s.split_once('-').ok_or_else(|| {
            IdError::InvalidInput(format!("Invalid timestamp id format: '{}'", s))
        })?;

        let ts_no_z = ts_str.strip_suffix('Z').ok_or_else(|| {
            IdError::InvalidInput(format!("Timestamp must end with 'Z': '{}'", ts_str))
        })?;

        let naive = NaiveDateTime::parse_from_str(ts_no_z, TIMESTAMP_FORMAT).map_err(|e| {
            IdError::InvalidInput(format!("Invalid timestamp format '{}': {}", ts_str, e))
        })?;

        Ok(Self {
            timestamp: DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc),
            uuid: ShardableUuid::parse(uuid_str)?,
        })
    }
}

impl fmt::Display for TimestampId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}Z-{}",
            self.timestamp.format(TIMESTAMP_FORMAT),
            self.uuid
        )
    }
}

#[cfg(feature = "serde")]
mod serde_impls {
    use super::{ShardableUuid, TimestampId};

    macro_rules! string_serde {
        ($ty:ty) => {
            impl serde::Serialize for $ty {
                fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
                where
                    S: serde::Serializer,
                {
                    serializer.collect_str(self)
                }
            }

            impl<'de> serde::Deserialize<'de> for $ty {
                fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
                where
                    D: serde::Deserializer<'de>,
                {
                    let s = String::deserialize(deserializer)?;
                    s.parse().map_err(serde::de::Error::custom)
                }
            }
        };
    }

    string_serde!(ShardableUuid);
    string_serde!(TimestampId);
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_new_generates_canonical_uuid() {
        let id = ShardableUuid::new();
        assert!(ShardableUuid::is_canonical(&id.to_string()));
    }

    #[test]
    fn test_parse_rejects_non_canonical_forms() {
        for input in [
            "550e8400-e29b-41d4-a716-446655440000",
            "550E8400E29B41D4A716446655440000",
            "550e8400e29b41d4a71644665544000",
            "550e8400e29b41d4a716446655440zzz",
            "",
        ] {
            assert!(ShardableUuid::parse(input).is_err(), "accepted {input}");
        }
    }

    #[test]
    fn test_sharded_dir_structure() {
        let id = ShardableUuid::parse("550e8400e29b41d4a716446655440000").unwrap();
        assert_eq!(
            id.sharded_dir(Path::new("/artifacts")),
            PathBuf::from("/artifacts/55/0e/550e8400e29b41d4a716446655440000")
        );
    }

    #[test]
    fn test_timestamp_id_monotonic_same_instant() {
        let now = Utc.with_ymd_and_hms(2026, 1, 11, 14, 35, 22).unwrap();
        let first = TimestampId::generate(None, now);
        let second = TimestampId::generate(Some(&first), now);
        assert!(second.timestamp() > first.timestamp());
        assert!(second > first);
    }

    #[test]
    fn test_timestamp_id_clock_going_backwards() {
        let now = Utc.with_ymd_and_hms(2026, 1, 11, 14, 35, 22).unwrap();
        let first = TimestampId::generate(None, now);
        let second = TimestampId::generate(Some(&first), now - Duration::seconds(30));
        assert_eq!(second.timestamp(), first.timestamp() + Duration::milliseconds(1));
    }

    #[test]
    fn test_timestamp_id_display_and_parse() {
        let raw = "20260111T143522.045Z-550e8400e29b41d4a716446655440000";
        let id: TimestampId = raw.parse().unwrap();
        assert_eq!(id.to_string(), raw);
        assert_eq!(id.uuid().to_string(), "550e8400e29b41d4a716446655440000");
    }

    #[test]
    fn test_timestamp_id_parse_errors() {
        let missing_z = "20260111T143522.045-550e8400e29b41d4a716446655440000";
        match missing_z.parse::<TimestampId>() {
            Err(IdError::InvalidInput(msg)) => assert!(msg.contains("must end with 'Z'")),
            other => panic!("unexpected: {other:?}"),
        }
        assert!("no-separator-here".parse::<TimestampId>().is_err());
        assert!("20260199T143522.045Z-550e8400e29b41d4a716446655440000"
            .parse::<TimestampId>()
            .is_err());
    }

    #[test]
    fn test_serde_as_strings() {
        let id = ShardableUuid::parse("550e8400e29b41d4a716446655440000").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"550e8400e29b41d4a716446655440000\"");
        let back: ShardableUuid = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
