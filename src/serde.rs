//! Serde helpers shared by configuration types.

use std::time::Duration;

use serde::{Deserialize, Deserializer, de};

/// Deserializes a humantime duration string such as `"1s"` or `"250ms"`.
pub fn humantime_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let value = String::deserialize(deserializer)?;
    humantime::parse_duration(&value).map_err(|error| {
        de::Error::custom(format!("invalid duration {value:?}: {error}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Deserialize)]
    struct Wrapper {
        #[serde(deserialize_with = "humantime_duration")]
        period: Duration,
    }

    #[test]
    fn parses_humantime_strings() {
        let wrapper: Wrapper = toml::from_str(r#"period = "1ms""#).unwrap();
        assert_eq!(wrapper.period, Duration::from_millis(1));

        let wrapper: Wrapper = toml::from_str(r#"period = "1m 30s""#).unwrap();
        assert_eq!(wrapper.period, Duration::from_secs(90));
    }

    #[test]
    fn rejects_garbage() {
        let error = toml::from_str::<Wrapper>(r#"period = "soon""#)
            .err()
            .expect("should fail");
        assert!(error.to_string().contains("invalid duration"));
    }
}
