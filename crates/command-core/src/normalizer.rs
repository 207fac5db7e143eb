use serde_json::Value;
use tracing::debug;

use voxpilot_core_types::{Command, CommandType};

use crate::errors::NormalizeError;
use crate::model::{param_to_string, RawAction, RawIntent};
use crate::schema;

/// Turns raw intent records into ordered, validated commands.
///
/// All-or-nothing per record: one bad action yields zero commands, so a
/// multi-step request never half-executes. Confidence below the threshold
/// flags the command but does not block it.
#[derive(Clone, Debug)]
pub struct Normalizer {
    confidence_threshold: f32,
}

impl Normalizer {
    pub fn new(confidence_threshold: f32) -> Self {
        Self {
            confidence_threshold: confidence_threshold.clamp(0.0, 1.0),
        }
    }

    pub fn normalize(&self, raw: &Value) -> Result<Vec<Command>, NormalizeError> {
        let intent = RawIntent::from_value(raw)?;
        let commands = intent
            .actions
            .iter()
            .map(|action| self.normalize_action(action))
            .collect::<Result<Vec<_>, _>>()?;
        debug!(commands = commands.len(), "normalized intent record");
        Ok(commands)
    }

    fn normalize_action(&self, action: &RawAction) -> Result<Command, NormalizeError> {
        let command_type = CommandType::parse(&action.intent)
            .ok_or_else(|| NormalizeError::UnsupportedCommand(action.intent.clone()))?;

        let params = action
            .parameters
            .iter()
            .map(|(key, value)| (key.clone(), param_to_string(value)))
            .collect();
        let (params, target) = schema::apply(command_type, params, None)?;

        let confidence = action.confidence.unwrap_or(1.0).clamp(0.0, 1.0);
        let mut command = Command::new(command_type).with_confidence(confidence);
        command.params = params;
        command.target = target;
        command.low_confidence = confidence < self.confidence_threshold;
        Ok(command)
    }
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new(0.5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn go_to_google_yields_one_navigate() {
        let normalizer = Normalizer::default();
        let commands = normalizer
            .normalize(&json!({
                "intent": "NAVIGATE",
                "confidence": 0.97,
                "parameters": { "target": "google.com" }
            }))
            .unwrap();
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].command_type, CommandType::Navigate);
        assert_eq!(commands[0].param("url"), Some("https://google.com/"));
        assert!(!commands[0].low_confidence);
    }

    #[test]
    fn multi_intent_splits_in_order() {
        let normalizer = Normalizer::default();
        let commands = normalizer
            .normalize(&json!([
                { "intent": "SEARCH", "parameters": { "text": "python tutorials" } },
                { "intent": "SCREENSHOT" }
            ]))
            .unwrap();
        assert_eq!(commands.len(), 2);
        assert_eq!(commands[0].command_type, CommandType::Search);
        assert_eq!(commands[1].command_type, CommandType::Screenshot);
    }

    #[test]
    fn unsupported_type_fails() {
        let normalizer = Normalizer::default();
        let err = normalizer
            .normalize(&json!({ "intent": "TELEPORT", "parameters": {} }))
            .unwrap_err();
        assert!(matches!(err, NormalizeError::UnsupportedCommand(name) if name == "TELEPORT"));
    }

    #[test]
    fn missing_required_param_yields_zero_commands() {
        let normalizer = Normalizer::default();
        let err = normalizer
            .normalize(&json!([
                { "intent": "NAVIGATE", "parameters": { "url": "https://example.com" } },
                { "intent": "TYPE", "parameters": { "selector": "#email" } }
            ]))
            .unwrap_err();
        assert!(matches!(err, NormalizeError::Validation { .. }));
    }

    #[test]
    fn low_confidence_is_flagged_not_blocked() {
        let normalizer = Normalizer::new(0.6);
        let commands = normalizer
            .normalize(&json!({
                "intent": "CLICK",
                "confidence": 0.3,
                "parameters": { "selector": "maybe this button" }
            }))
            .unwrap();
        assert!(commands[0].low_confidence);
        assert_eq!(commands[0].confidence, 0.3);
    }

    #[test]
    fn nested_form_data_survives_as_json_text() {
        let normalizer = Normalizer::default();
        let commands = normalizer
            .normalize(&json!({
                "intent": "FILL_FORM",
                "parameters": { "form_data": { "name": "Ada", "email": "ada@example.com" } }
            }))
            .unwrap();
        let form_data: serde_json::Value =
            serde_json::from_str(commands[0].param("form_data").unwrap()).unwrap();
        assert_eq!(form_data["name"], "Ada");
    }
}
