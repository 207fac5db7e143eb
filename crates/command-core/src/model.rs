use std::collections::BTreeMap;

use serde_json::Value;

use crate::errors::NormalizeError;

/// One action as the upstream parser emitted it, before validation.
#[derive(Clone, Debug)]
pub struct RawAction {
    pub intent: String,
    pub parameters: BTreeMap<String, Value>,
    pub confidence: Option<f32>,
}

impl RawAction {
    fn from_object(value: &Value) -> Result<Self, NormalizeError> {
        let object = value
            .as_object()
            .ok_or_else(|| NormalizeError::Parse(format!("expected an action object, got {value}")))?;

        let intent = object
            .get("intent")
            .or_else(|| object.get("type"))
            .and_then(Value::as_str)
            .ok_or_else(|| NormalizeError::Parse("action has no intent field".to_string()))?
            .to_string();

        let parameters = object
            .get("parameters")
            .or_else(|| object.get("params"))
            .map(|params| {
                params
                    .as_object()
                    .map(|map| {
                        map.iter()
                            .map(|(k, v)| (k.clone(), v.clone()))
                            .collect::<BTreeMap<_, _>>()
                    })
                    .ok_or_else(|| {
                        NormalizeError::Parse("parameters must be an object".to_string())
                    })
            })
            .transpose()?
            .unwrap_or_default();

        let confidence = object
            .get("confidence")
            .and_then(Value::as_f64)
            .map(|c| c as f32);

        Ok(Self {
            intent,
            parameters,
            confidence,
        })
    }
}

/// A whole raw intent record: one action, or an ordered list of actions for
/// multi-step requests ("search X, then filter by Y").
#[derive(Clone, Debug)]
pub struct RawIntent {
    pub actions: Vec<RawAction>,
}

impl RawIntent {
    /// Accepts the wire shapes the upstream parser produces: a bare action
    /// object, a bare array of actions, or `{"intents": [...]}`.
    pub fn from_value(value: &Value) -> Result<Self, NormalizeError> {
        let entries: Vec<&Value> = match value {
            Value::Array(items) => items.iter().collect(),
            Value::Object(map) => match map.get("intents") {
                Some(Value::Array(items)) => items.iter().collect(),
                Some(other) => {
                    return Err(NormalizeError::Parse(format!(
                        "intents must be an array, got {other}"
                    )))
                }
                None => vec![value],
            },
            other => {
                return Err(NormalizeError::Parse(format!(
                    "expected an object or array, got {other}"
                )))
            }
        };

        if entries.is_empty() {
            return Err(NormalizeError::Parse("intent record is empty".to_string()));
        }

        let actions = entries
            .into_iter()
            .map(RawAction::from_object)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { actions })
    }
}

/// Flatten a JSON parameter value to the string form commands carry.
/// Nested structures (e.g. `form_data`) stay as compact JSON text.
pub(crate) fn param_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_single_object() {
        let raw = json!({
            "intent": "NAVIGATE",
            "confidence": 0.95,
            "parameters": { "target": "https://google.com" }
        });
        let intent = RawIntent::from_value(&raw).unwrap();
        assert_eq!(intent.actions.len(), 1);
        assert_eq!(intent.actions[0].intent, "NAVIGATE");
        assert_eq!(intent.actions[0].confidence, Some(0.95));
    }

    #[test]
    fn parses_array_preserving_order() {
        let raw = json!([
            { "intent": "SEARCH", "parameters": { "text": "laptops" } },
            { "intent": "SCREENSHOT" }
        ]);
        let intent = RawIntent::from_value(&raw).unwrap();
        assert_eq!(intent.actions.len(), 2);
        assert_eq!(intent.actions[0].intent, "SEARCH");
        assert_eq!(intent.actions[1].intent, "SCREENSHOT");
    }

    #[test]
    fn parses_wrapped_intents_key() {
        let raw = json!({ "intents": [ { "type": "SCROLL", "params": { "direction": "down" } } ] });
        let intent = RawIntent::from_value(&raw).unwrap();
        assert_eq!(intent.actions[0].intent, "SCROLL");
    }

    #[test]
    fn rejects_garbage() {
        assert!(RawIntent::from_value(&json!(42)).is_err());
        assert!(RawIntent::from_value(&json!([])).is_err());
        assert!(RawIntent::from_value(&json!({ "parameters": {} })).is_err());
        assert!(RawIntent::from_value(&json!({ "intent": "CLICK", "parameters": [1, 2] })).is_err());
    }
}
