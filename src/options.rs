// src/options.rs
// Options codec: turns an untyped options document into GenerationOptions

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Errors produced while decoding an options document
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OptionsError {
    /// The document is not valid JSON
    #[error("Malformed options document at line {line}, column {column}: {message}")]
    Syntax {
        /// 1-based line of the syntax error
        line: usize,
        /// 1-based column of the syntax error
        column: usize,
        /// Parser message
        message: String,
    },

    /// The document is valid JSON but not an object, or a recognized option
    /// has the wrong type
    #[error("Options document has the wrong shape: {0}")]
    Shape(String),
}

/// Sampling and length controls for one generation request
///
/// Every option is optional; `None` means the model's own default applies.
/// Values outside an option's range are clamped (and logged), never rejected.
/// Counts accept any JSON number; a fractional count is truncated first.
///
/// | Option | Range |
/// |--------|-------|
/// | `temperature` | `0.0..=2.0` |
/// | `top_p` | `0.0..=1.0` |
/// | `top_k` | `1..=u32::MAX` |
/// | `max_output_tokens` | `1..=u32::MAX` |
/// | `seed` | any `u64` |
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct GenerationOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<u64>,
}

impl GenerationOptions {
    /// Sets the sampling temperature
    pub fn with_temperature(mut self, value: f64) -> Self {
        self.temperature = clamp_float("temperature", value, 0.0, 2.0);
        self
    }

    /// Sets the nucleus sampling probability threshold
    pub fn with_top_p(mut self, value: f64) -> Self {
        self.top_p = clamp_float("top_p", value, 0.0, 1.0);
        self
    }

    /// Sets the top-k token cut-off
    pub fn with_top_k(mut self, value: u32) -> Self {
        self.top_k = clamp_count("top_k", f64::from(value));
        self
    }

    /// Caps the number of generated tokens
    pub fn with_max_output_tokens(mut self, value: u32) -> Self {
        self.max_output_tokens = clamp_count("max_output_tokens", f64::from(value));
        self
    }

    /// Requests deterministic sampling with the given seed
    pub fn with_seed(mut self, value: u64) -> Self {
        self.seed = Some(value);
        self
    }

    pub fn temperature(&self) -> Option<f64> {
        self.temperature
    }

    pub fn top_p(&self) -> Option<f64> {
        self.top_p
    }

    pub fn top_k(&self) -> Option<u32> {
        self.top_k
    }

    pub fn max_output_tokens(&self) -> Option<u32> {
        self.max_output_tokens
    }

    pub fn seed(&self) -> Option<u64> {
        self.seed
    }

    /// Whether every option is left at the model default
    pub fn is_default(&self) -> bool {
        *self == Self::default()
    }

    /// Canonical JSON encoding (snake_case keys, unset options omitted)
    ///
    /// Default options encode as `{}`.
    pub fn to_json(&self) -> String {
        // Numeric fields only; serialization cannot fail.
        serde_json::to_string(self).unwrap_or_else(|_| String::from("{}"))
    }
}

/// Wire shape of the options document
///
/// camelCase spellings are accepted as aliases.
#[derive(Debug, Default, Deserialize)]
struct RawOptions {
    temperature: Option<f64>,
    #[serde(alias = "topP")]
    top_p: Option<f64>,
    #[serde(alias = "topK")]
    top_k: Option<f64>,
    #[serde(alias = "maxOutputTokens", alias = "max_tokens", alias = "maxTokens")]
    max_output_tokens: Option<f64>,
    seed: Option<u64>,
}

impl RawOptions {
    fn into_options(self) -> GenerationOptions {
        GenerationOptions {
            temperature: self
                .temperature
                .and_then(|v| clamp_float("temperature", v, 0.0, 2.0)),
            top_p: self.top_p.and_then(|v| clamp_float("top_p", v, 0.0, 1.0)),
            top_k: self.top_k.and_then(|v| clamp_count("top_k", v)),
            max_output_tokens: self
                .max_output_tokens
                .and_then(|v| clamp_count("max_output_tokens", v)),
            seed: self.seed,
        }
    }
}

/// Decodes an options document
///
/// `None`, an empty string, or whitespace means "use defaults", so
/// `decode(None)` and `decode(Some("{}"))` are equivalent. Unknown keys are
/// ignored and `null` values count as absent.
///
/// # Errors
///
/// * `OptionsError::Syntax` - the document is not valid JSON
/// * `OptionsError::Shape` - the top level is not an object, or a recognized
///   option has the wrong type
///
/// # Examples
///
/// ```
/// # use fm_session::options;
/// let opts = options::decode(Some(r#"{"temperature": 3.5, "unknown": true}"#)).unwrap();
/// assert_eq!(opts.temperature(), Some(2.0));
/// assert_eq!(options::decode(None).unwrap(), options::decode(Some("{}")).unwrap());
/// ```
pub fn decode(document: Option<&str>) -> Result<GenerationOptions, OptionsError> {
    let Some(document) = document.map(str::trim).filter(|d| !d.is_empty()) else {
        return Ok(GenerationOptions::default());
    };

    let value: Value = serde_json::from_str(document).map_err(|e| OptionsError::Syntax {
        line: e.line(),
        column: e.column(),
        message: e.to_string(),
    })?;

    if !value.is_object() {
        return Err(OptionsError::Shape(format!(
            "expected a JSON object, found {}",
            json_kind(&value)
        )));
    }

    let raw: RawOptions =
        serde_json::from_value(value).map_err(|e| OptionsError::Shape(e.to_string()))?;
    Ok(raw.into_options())
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn clamp_float(option: &'static str, value: f64, min: f64, max: f64) -> Option<f64> {
    if value.is_nan() {
        tracing::warn!(option, "option is NaN, using the model default");
        return None;
    }
    let clamped = value.clamp(min, max);
    if clamped != value {
        tracing::warn!(option, value, clamped, "option out of range, clamped");
    }
    Some(clamped)
}

fn clamp_count(option: &'static str, value: f64) -> Option<u32> {
    if value.is_nan() {
        tracing::warn!(option, "option is NaN, using the model default");
        return None;
    }
    let clamped = value.trunc().clamp(1.0, f64::from(u32::MAX));
    if clamped != value {
        tracing::warn!(option, value, clamped, "option out of range, clamped");
    }
    // In range and integral, so the cast is exact.
    Some(clamped as u32)
}
