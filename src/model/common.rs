use serde::de::{Deserializer, IgnoredAny, MapAccess, SeqAccess, Visitor};
use std::fmt;

pub type EventId = i64;
pub type CategoryId = i64;

/// Counts arrive as ints, integral floats or digit strings. Anything else is `None`.
pub fn deserialize_optional_flexible_i64<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let text = deserialize_optional_scalar(deserializer)?;
    Ok(text.and_then(|t| t.trim().parse::<i64>().ok()))
}

/// Any JSON scalar rendered as its CSV text. Objects, arrays and null become `None`.
pub fn deserialize_optional_scalar<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    struct ScalarVisitor;
    impl<'de> Visitor<'de> for ScalarVisitor {
        type Value = Option<String>;
        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("string, number, bool or null")
        }

        fn visit_bool<E>(self, v: bool) -> Result<Self::Value, E> {
            Ok(Some(v.to_string()))
        }
        fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E> {
            Ok(Some(v.to_string()))
        }
        fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E> {
            Ok(Some(v.to_string()))
        }
        fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E> {
            if v.fract() == 0.0 && v.abs() < 1e15 {
                Ok(Some(format!("{}", v as i64)))
            } else {
                Ok(Some(v.to_string()))
            }
        }
        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E> {
            Ok(Some(v.to_string()))
        }
        fn visit_string<E>(self, v: String) -> Result<Self::Value, E> {
            Ok(Some(v))
        }
        fn visit_none<E>(self) -> Result<Self::Value, E> {
            Ok(None)
        }
        fn visit_unit<E>(self) -> Result<Self::Value, E> {
            Ok(None)
        }
        fn visit_some<D2>(self, deserializer: D2) -> Result<Self::Value, D2::Error>
        where
            D2: Deserializer<'de>,
        {
            deserializer.deserialize_any(self)
        }
        fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            while map.next_entry::<IgnoredAny, IgnoredAny>()?.is_some() {}
            Ok(None)
        }
        fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
        where
            A: SeqAccess<'de>,
        {
            while seq.next_element::<IgnoredAny>()?.is_some() {}
            Ok(None)
        }
    }
    deserializer.deserialize_any(ScalarVisitor)
}

/// Strict numeric id check used for dedup keys: non-empty, all digits.
pub fn parse_numeric_id(raw: Option<&str>) -> Option<i64> {
    let t = raw?.trim();
    if t.is_empty() {
        return None;
    }
    t.parse::<i64>().ok().filter(|v| *v >= 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Deserialize)]
    struct Probe {
        #[serde(default, deserialize_with = "deserialize_optional_scalar")]
        v: Option<String>,
        #[serde(default, deserialize_with = "deserialize_optional_flexible_i64")]
        n: Option<i64>,
    }

    #[test]
    fn test_scalar_shapes() {
        let p: Probe = serde_json::from_str(r#"{"v": 103456789, "n": "12"}"#).unwrap();
        assert_eq!(p.v.as_deref(), Some("103456789"));
        assert_eq!(p.n, Some(12));

        let p: Probe = serde_json::from_str(r#"{"v": true, "n": null}"#).unwrap();
        assert_eq!(p.v.as_deref(), Some("true"));
        assert_eq!(p.n, None);

        let p: Probe = serde_json::from_str(r#"{"v": {"nested": [1,2]}}"#).unwrap();
        assert_eq!(p.v, None);
        assert_eq!(p.n, None);

        let p: Probe = serde_json::from_str(r#"{"n": 40.0}"#).unwrap();
        assert_eq!(p.n, Some(40));
        let p: Probe = serde_json::from_str(r#"{"n": "many"}"#).unwrap();
        assert_eq!(p.n, None);
    }

    #[test]
    fn test_parse_numeric_id() {
        assert_eq!(parse_numeric_id(Some(" 42 ")), Some(42));
        assert_eq!(parse_numeric_id(Some("")), None);
        assert_eq!(parse_numeric_id(Some("abc")), None);
        assert_eq!(parse_numeric_id(Some("-3")), None);
        assert_eq!(parse_numeric_id(None), None);
    }
}
