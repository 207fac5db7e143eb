//! Per-type command schemas: required parameters, defaults, shaping.

use std::collections::BTreeMap;

use serde_json::Value;
use url::Url;

use voxpilot_core_types::CommandType;

use crate::errors::NormalizeError;

/// Search box the original agent falls back to when no selector is given.
pub const DEFAULT_SEARCH_SELECTOR: &str = "input[name='q']";
/// Pixels scrolled per gesture.
pub const DEFAULT_SCROLL_AMOUNT: i64 = 800;

const EXTRACT_DATA_TYPES: [&str; 4] = ["text", "links", "images", "forms"];

/// Unresolved references (`$prev.key`, `$stepN.key`) are filled in at
/// execution time; their shape is the planner's problem, not the schema's.
fn is_reference(value: &str) -> bool {
    value.starts_with('$')
}

/// Validate `params`/`target` for `command_type` and return the shaped pair.
/// Missing required keys and malformed values are `Validation` errors.
pub fn apply(
    command_type: CommandType,
    mut params: BTreeMap<String, String>,
    mut target: Option<String>,
) -> Result<(BTreeMap<String, String>, Option<String>), NormalizeError> {
    // selector-ish params double as the target field
    if target.is_none() {
        target = params
            .get("selector")
            .or_else(|| params.get("target"))
            .cloned();
    }

    match command_type {
        CommandType::Navigate | CommandType::Download => {
            let raw = params
                .get("url")
                .or_else(|| params.get("target"))
                .cloned()
                .or_else(|| target.clone())
                .ok_or_else(|| NormalizeError::validation(command_type, "missing url param"))?;
            let url = if is_reference(&raw) {
                raw
            } else {
                shape_url(command_type, &raw)?
            };
            params.insert("url".to_string(), url);
        }
        CommandType::Search => {
            require(command_type, &params, "text")?;
            params
                .entry("selector".to_string())
                .or_insert_with(|| DEFAULT_SEARCH_SELECTOR.to_string());
        }
        CommandType::Click => {
            if target.as_deref().map(str::is_empty).unwrap_or(true) {
                return Err(NormalizeError::validation(
                    command_type,
                    "missing target selector",
                ));
            }
        }
        CommandType::Type => {
            require(command_type, &params, "text")?;
            if target.as_deref().map(str::is_empty).unwrap_or(true) {
                return Err(NormalizeError::validation(
                    command_type,
                    "missing target selector",
                ));
            }
        }
        CommandType::Extract => {
            let data_type = params
                .entry("data_type".to_string())
                .or_insert_with(|| "text".to_string())
                .clone();
            if !is_reference(&data_type) && !EXTRACT_DATA_TYPES.contains(&data_type.as_str()) {
                return Err(NormalizeError::validation(
                    command_type,
                    format!("unknown data_type {data_type}"),
                ));
            }
        }
        CommandType::Scroll => {
            let direction = params
                .entry("direction".to_string())
                .or_insert_with(|| "down".to_string())
                .clone();
            if !matches!(direction.as_str(), "up" | "down") {
                return Err(NormalizeError::validation(
                    command_type,
                    format!("direction must be up or down, got {direction}"),
                ));
            }
            let amount = params
                .entry("amount".to_string())
                .or_insert_with(|| DEFAULT_SCROLL_AMOUNT.to_string())
                .clone();
            if !is_reference(&amount) && amount.parse::<i64>().is_err() {
                return Err(NormalizeError::validation(
                    command_type,
                    format!("amount must be an integer, got {amount}"),
                ));
            }
        }
        CommandType::Wait => {
            let has_condition = params.contains_key("condition");
            let seconds_ok = match params.get("seconds") {
                Some(raw) => is_reference(raw) || raw.parse::<u64>().is_ok(),
                None => false,
            };
            if !has_condition && !seconds_ok {
                return Err(NormalizeError::validation(
                    command_type,
                    "needs seconds or a condition",
                ));
            }
        }
        CommandType::Screenshot => {}
        CommandType::Filter => {
            if !params.keys().any(|k| k.starts_with("filter_")) {
                return Err(NormalizeError::validation(
                    command_type,
                    "needs at least one filter_* criterion",
                ));
            }
        }
        CommandType::FillForm => {
            let raw = params
                .get("form_data")
                .ok_or_else(|| NormalizeError::validation(command_type, "missing form_data"))?;
            let parsed: Value = serde_json::from_str(raw).map_err(|err| {
                NormalizeError::validation(command_type, format!("form_data is not JSON: {err}"))
            })?;
            let fields = parsed.as_object().ok_or_else(|| {
                NormalizeError::validation(command_type, "form_data must be an object")
            })?;
            if fields.is_empty() {
                return Err(NormalizeError::validation(command_type, "form_data is empty"));
            }
        }
        CommandType::Upload => {
            require(command_type, &params, "file")?;
            if target.as_deref().map(str::is_empty).unwrap_or(true) {
                return Err(NormalizeError::validation(
                    command_type,
                    "missing target selector",
                ));
            }
        }
    }

    Ok((params, target))
}

fn require(
    command_type: CommandType,
    params: &BTreeMap<String, String>,
    key: &str,
) -> Result<(), NormalizeError> {
    match params.get(key) {
        Some(value) if !value.is_empty() => Ok(()),
        _ => Err(NormalizeError::validation(
            command_type,
            format!("missing {key} param"),
        )),
    }
}

/// Bare hosts like `google.com` get an https scheme before validation.
fn shape_url(command_type: CommandType, raw: &str) -> Result<String, NormalizeError> {
    let candidate = if raw.contains("://") {
        raw.to_string()
    } else {
        format!("https://{raw}")
    };
    Url::parse(&candidate)
        .map(|url| url.to_string())
        .map_err(|err| {
            NormalizeError::validation(command_type, format!("invalid url {raw}: {err}"))
        })
}
