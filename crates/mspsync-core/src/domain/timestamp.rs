use std::fmt::{Display, Formatter};
use std::time::Duration;

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use time::format_description::well_known::Rfc3339;
use time::{OffsetDateTime, UtcOffset};

use crate::ValidationError;

/// RFC3339 timestamp guaranteed to be UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UtcDateTime(OffsetDateTime);

impl UtcDateTime {
    pub fn now() -> Self {
        Self(OffsetDateTime::now_utc())
    }

    /// Strict parse: RFC3339 with a UTC offset.
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let parsed = OffsetDateTime::parse(input, &Rfc3339).map_err(|_| {
            ValidationError::TimestampNotUtc {
                value: input.to_owned(),
            }
        })?;

        Self::from_offset_datetime(parsed).map_err(|_| ValidationError::TimestampNotUtc {
            value: input.to_owned(),
        })
    }

    /// Parse the timestamp shapes upstream APIs emit: RFC3339 with any offset,
    /// offset-less ISO-8601 (read as UTC), a space instead of `T`, or a bare date.
    pub fn parse_lenient(input: &str) -> Option<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return None;
        }
        if let Ok(parsed) = OffsetDateTime::parse(trimmed, &Rfc3339) {
            return Some(Self(parsed.to_offset(UtcOffset::UTC)));
        }

        let normalized = if trimmed.len() == 10 {
            format!("{trimmed}T00:00:00Z")
        } else {
            format!("{}Z", trimmed.replacen(' ', "T", 1))
        };
        OffsetDateTime::parse(&normalized, &Rfc3339)
            .ok()
            .map(|parsed| Self(parsed.to_offset(UtcOffset::UTC)))
    }

    pub fn from_unix_seconds(seconds: i64) -> Option<Self> {
        OffsetDateTime::from_unix_timestamp(seconds).ok().map(Self)
    }

    pub fn from_unix_millis(millis: i64) -> Option<Self> {
        OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * 1_000_000)
            .ok()
            .map(Self)
    }

    pub fn from_offset_datetime(value: OffsetDateTime) -> Result<Self, ValidationError> {
        if value.offset() != UtcOffset::UTC {
            return Err(ValidationError::TimestampNotUtc {
                value: value
                    .format(&Rfc3339)
                    .unwrap_or_else(|_| String::from("<unformattable>")),
            });
        }

        Ok(Self(value))
    }

    pub fn into_inner(self) -> OffsetDateTime {
        self.0
    }

    pub fn unix_seconds(self) -> i64 {
        self.0.unix_timestamp()
    }

    pub fn saturating_sub(self, duration: Duration) -> Self {
        let duration = time::Duration::try_from(duration).unwrap_or(time::Duration::MAX);
        Self(self.0.checked_sub(duration).unwrap_or(self.0))
    }

    pub fn saturating_add(self, duration: Duration) -> Self {
        let duration = time::Duration::try_from(duration).unwrap_or(time::Duration::MAX);
        Self(self.0.checked_add(duration).unwrap_or(self.0))
    }

    /// RFC3339 rendering truncated to whole seconds, the form sent upstream.
    pub fn format_seconds(self) -> String {
        let truncated = self.0.replace_nanosecond(0).unwrap_or(self.0);
        Self(truncated).format_rfc3339()
    }

    pub fn format_rfc3339(self) -> String {
        self.0
            .format(&Rfc3339)
            .unwrap_or_else(|_| self.0.unix_timestamp().to_string())
    }
}

impl Display for UtcDateTime {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.format_rfc3339())
    }
}

impl Serialize for UtcDateTime {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.format_rfc3339())
    }
}

impl<'de> Deserialize<'de> for UtcDateTime {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        Self::parse(&value).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_utc_timestamp() {
        let parsed = UtcDateTime::parse("2024-01-01T00:00:00Z").expect("must parse");
        assert_eq!(parsed.format_rfc3339(), "2024-01-01T00:00:00Z");
    }

    #[test]
    fn rejects_non_utc_timestamp() {
        let err = UtcDateTime::parse("2024-01-01T01:00:00+01:00").expect_err("must fail");
        assert!(matches!(err, ValidationError::TimestampNotUtc { .. }));
    }

    #[test]
    fn lenient_parse_normalizes_upstream_shapes() {
        let expected = "2024-03-05T10:15:00Z";
        for input in [
            "2024-03-05T10:15:00Z",
            "2024-03-05T12:15:00+02:00",
            "2024-03-05T10:15:00",
            "2024-03-05 10:15:00",
        ] {
            let parsed = UtcDateTime::parse_lenient(input).expect(input);
            assert_eq!(parsed.format_rfc3339(), expected, "input {input}");
        }
        assert_eq!(
            UtcDateTime::parse_lenient("2024-03-05").map(UtcDateTime::format_rfc3339),
            Some(String::from("2024-03-05T00:00:00Z"))
        );
        assert_eq!(UtcDateTime::parse_lenient("yesterday"), None);
    }

    #[test]
    fn epoch_constructors_agree() {
        let seconds = UtcDateTime::from_unix_seconds(1_700_000_000).expect("seconds");
        let millis = UtcDateTime::from_unix_millis(1_700_000_000_000).expect("millis");
        assert_eq!(seconds, millis);
    }
}
