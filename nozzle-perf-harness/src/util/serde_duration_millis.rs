//! A Serde serializer/deserializer for [std::time::Duration] instances that uses millisecond numbers, which
//! is how the configuration's delays and timeouts are written in environment variables.

use serde::{self, Deserialize, Deserializer, Serializer};
use std::time::Duration;

/// Converts [Duration] instances to millisecond numeric values, for use in JSON. This conversion is
/// lossy: any fractional milliseconds in the [Duration] will be discarded.
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
    let milliseconds = u64::try_from(duration.as_millis()).map_err(serde::ser::Error::custom)?;
    serializer.serialize_u64(milliseconds)
}

/// Converts serialized JSON milliseconds back to [Duration] instances.
///
/// Parameters:
/// * `deserializer`: the Serde [Deserializer] to use
///
/// Returns the deserialized [Duration].
pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let milliseconds = u64::deserialize(deserializer)?;
    Ok(Duration::from_millis(milliseconds))
}

/// The same conversions as the parent module, for optional [Duration]s: `None` maps to `null`.
pub mod option {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(duration) => super::serialize(duration, serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let milliseconds = Option::<u64>::deserialize(deserializer)?;
        Ok(milliseconds.map(Duration::from_millis))
    }
}
