//! Lenient serde helpers for the community wire format.
//!
//! The server is loose about scalar types: ids arrive as strings or numbers,
//! counters sometimes as strings, and some lists are JSON encoded inside a
//! string field. These helpers accept every shape seen on the wire and fall back
//! to the default instead of failing the whole frame.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

#[derive(Deserialize)]
#[serde(untagged)]
enum Scalar {
    Text(String),
    Number(serde_json::Number),
    Flag(bool),
    Other(Value),
}

/// Any field whose `null` means "use the default".
pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Option::unwrap_or_default)
}

/// String field that may arrive as a number, bool, or null.
pub(crate) fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Scalar::deserialize(deserializer)? {
        Scalar::Text(text) => text,
        Scalar::Number(number) => number.to_string(),
        Scalar::Flag(flag) => flag.to_string(),
        Scalar::Other(Value::Null) => String::new(),
        Scalar::Other(other) => other.to_string(),
    })
}

/// Integer field that may arrive as a numeric string or null.
pub(crate) fn lenient_i64<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Scalar::deserialize(deserializer)? {
        Scalar::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().map(|value| value as i64))
            .unwrap_or_default(),
        Scalar::Text(text) => text.trim().parse().unwrap_or_default(),
        Scalar::Flag(flag) => i64::from(flag),
        Scalar::Other(_) => 0,
    })
}

/// Float field that may arrive as a numeric string or null.
pub(crate) fn lenient_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Scalar::deserialize(deserializer)? {
        Scalar::Number(number) => number.as_f64().unwrap_or_default(),
        Scalar::Text(text) => text.trim().parse().unwrap_or_default(),
        Scalar::Flag(_) | Scalar::Other(_) => 0.0,
    })
}

/// Flag that may arrive as a bool or as `0`/`1`.
pub(crate) fn lenient_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Scalar::deserialize(deserializer)? {
        Scalar::Flag(flag) => flag,
        Scalar::Number(number) => number.as_f64().is_some_and(|value| value != 0.0),
        Scalar::Text(text) => !matches!(text.trim(), "" | "0" | "false"),
        Scalar::Other(_) => false,
    })
}

/// String list that may arrive as an array or as a JSON-encoded array string.
pub(crate) fn nested_string_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(string_list(Value::deserialize(deserializer)?))
}

fn string_list(value: Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::String(text) => Some(text),
                Value::Null => None,
                other => Some(other.to_string()),
            })
            .collect(),
        Value::String(text) if text.trim().is_empty() => Vec::new(),
        Value::String(text) => match serde_json::from_str::<Value>(&text) {
            Ok(nested @ Value::Array(_)) => string_list(nested),
            _ => vec![text],
        },
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;
    use serde_json::json;

    use super::{
        lenient_bool, lenient_f64, lenient_i64, lenient_string, nested_string_list,
        null_as_default,
    };

    #[derive(Debug, Default, Deserialize)]
    #[serde(default)]
    struct Sample {
        #[serde(deserialize_with = "lenient_string")]
        id: String,
        #[serde(deserialize_with = "lenient_i64")]
        count: i64,
        #[serde(deserialize_with = "lenient_f64")]
        temp: f64,
        #[serde(deserialize_with = "lenient_bool")]
        enabled: bool,
        #[serde(deserialize_with = "nested_string_list")]
        names: Vec<String>,
        #[serde(deserialize_with = "null_as_default")]
        scores: Vec<i64>,
    }

    fn decode(value: serde_json::Value) -> Sample {
        serde_json::from_value(value).expect("decode sample")
    }

    #[test]
    fn numbers_and_strings_are_interchangeable() {
        let sample = decode(json!({
            "id": 1630569106133_i64,
            "count": "3",
            "temp": "12.5",
            "enabled": 1
        }));
        assert_eq!(sample.id, "1630569106133");
        assert_eq!(sample.count, 3);
        assert_eq!(sample.temp, 12.5);
        assert!(sample.enabled);
    }

    #[test]
    fn nulls_and_missing_fields_fall_back_to_defaults() {
        let sample = decode(json!({"id": null, "count": null, "names": null, "scores": null}));
        assert_eq!(sample.id, "");
        assert_eq!(sample.count, 0);
        assert!(!sample.enabled);
        assert!(sample.names.is_empty());
        assert!(sample.scores.is_empty());
        assert_eq!(decode(json!({"scores": [1, 2]})).scores, vec![1, 2]);
    }

    #[test]
    fn string_lists_may_be_json_encoded() {
        let sample = decode(json!({"names": "[\"alice\",\"bob\"]"}));
        assert_eq!(sample.names, vec!["alice", "bob"]);

        let sample = decode(json!({"names": ["carol"]}));
        assert_eq!(sample.names, vec!["carol"]);

        let sample = decode(json!({"names": "dave"}));
        assert_eq!(sample.names, vec!["dave"]);
    }
}
