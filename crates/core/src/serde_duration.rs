//! Serde helpers for `Duration` fields expressed in milliseconds.
//!
//! ```ignore
//! #[serde(with = "spread_hedge_core::serde_duration::millis")]
//! pub open_lock_duration: Duration,
//! ```

pub mod millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        u64::try_from(duration.as_millis())
            .unwrap_or(u64::MAX)
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};
    use std::time::Duration;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Holder {
        #[serde(with = "super::millis")]
        timeout: Duration,
    }

    #[test]
    fn test_millis_json() {
        let holder = Holder {
            timeout: Duration::from_millis(1500),
        };
        let json = serde_json::to_string(&holder).unwrap();
        assert_eq!(json, r#"{"timeout":1500}"#);

        let parsed: Holder = serde_json::from_str(r#"{"timeout":30000}"#).unwrap();
        assert_eq!(parsed.timeout, Duration::from_secs(30));
    }
}
