//! Measures returned by `/api/measures/component` and their normalization
//! into a flat metric-to-value mapping.

use serde::{Deserialize, Deserializer};
use std::collections::HashMap;

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Measure {
    #[serde(default)]
    pub metric: String,
    #[serde(default, deserialize_with = "lenient_text")]
    pub value: Option<String>,
    #[serde(default)]
    pub periods: Vec<Period>,
    /// Newer servers report the leak period as a single object.
    #[serde(default)]
    pub period: Option<Period>,
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Period {
    #[serde(default, deserialize_with = "lenient_text")]
    pub value: Option<String>,
}

impl Measure {
    /// The current value if present, otherwise the first period value.
    pub fn best_value(&self) -> Option<&str> {
        non_empty(&self.value)
            .or_else(|| self.periods.first().and_then(|p| non_empty(&p.value)))
            .or_else(|| self.period.as_ref().and_then(|p| non_empty(&p.value)))
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

/// Reduces the measures to the best available value per metric.
///
/// Metrics without any value are left out. Metrics are not filtered against
/// the requested keys.
pub fn normalize(measures: &[Measure]) -> HashMap<String, String> {
    measures
        .iter()
        .filter_map(|measure| {
            measure
                .best_value()
                .map(|value| (measure.metric.clone(), value.to_string()))
        })
        .collect()
}

/// Accepts strings, numbers and booleans, rendering non-strings as text.
fn lenient_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;

    Ok(match value {
        None | Some(serde_json::Value::Null) => None,
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        Some(serde_json::Value::Bool(b)) => Some(b.to_string()),
        Some(other) => {
            return Err(serde::de::Error::custom(format!(
                "expected a scalar measure value, got {other}"
            )));
        }
    })
}
