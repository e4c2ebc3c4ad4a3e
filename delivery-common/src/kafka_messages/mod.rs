use chrono::{DateTime, Utc};
use serde::{de, Deserialize, Deserializer, Serializer};

pub mod dead_letter;
pub mod delivered;

/// Outbound events carry unix seconds as a float, matching the `created_at` of inbound messages.
pub fn serialize_unix_seconds<S>(datetime: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_f64(datetime.timestamp_micros() as f64 / 1_000_000.0)
}

pub fn deserialize_unix_seconds<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let seconds: f64 = Deserialize::deserialize(deserializer)?;
    let micros = (seconds * 1_000_000.0).round() as i64;

    DateTime::<Utc>::from_timestamp(
        micros.div_euclid(1_000_000),
        (micros.rem_euclid(1_000_000) * 1_000) as u32,
    )
    .ok_or_else(|| de::Error::custom(format!("timestamp out of range: {}", seconds)))
}
