//! A Serde serializer/deserializer for chrono [Duration] instances that uses ISO-8601 formatting with
//! millisecond precision, e.g. `PT600.125S`. Used for the elapsed time of each recorded attempt.

use chrono::Duration;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{self, Deserialize, Deserializer, Serializer};

/// Converts [Duration] instances to ISO-8601 string values, for use in JSON. Negative durations (which can
/// only come from a wall clock stepping backwards) are written as zero.
///
/// Parameters:
/// * `duration`: the [Duration] instance to be serialized
/// * `serializer`: the Serde [Serializer] to use
///
/// Returns the [Serializer] result.
pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let millis = duration.num_milliseconds().max(0);
    let s = format!("PT{}.{:03}S", millis / 1000, millis % 1000);
    serializer.serialize_str(&s)
}

/// Converts serialized ISO-8601 duration JSON strings (seconds only, with an optional fraction) back to
/// [Duration] instances.
///
/// Parameters:
/// * `deserializer`: the Serde [Deserializer] to use
///
/// Returns the deserialized [Duration].
pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let text = String::deserialize(deserializer)?;

    lazy_static! {
        static ref REGEX_DURATION: Regex = Regex::new(r"^PT(\d+)(?:\.(\d{1,9}))?S$").unwrap();
    }
    let capture = REGEX_DURATION.captures(&text).ok_or_else(|| {
        serde::de::Error::invalid_value(
            serde::de::Unexpected::Str(&text),
            &"a value in the format: 'PT123.456S'",
        )
    })?;

    let secs = capture[1]
        .parse::<i64>()
        .map_err(serde::de::Error::custom)?;
    // Right-pad the fraction to nanoseconds, so that ".5" means half a second.
    let nanos = match capture.get(2) {
        Some(fraction) => format!("{:0<9}", fraction.as_str())
            .parse::<i64>()
            .map_err(serde::de::Error::custom)?,
        None => 0,
    };

    Ok(Duration::seconds(secs) + Duration::nanoseconds(nanos))
}
