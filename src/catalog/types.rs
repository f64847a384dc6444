//! Engine catalog data model and the settings merge rule.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// InferType
// ---------------------------------------------------------------------------

/// How an engine consumes audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InferType {
    /// Incremental recognition over a live socket.
    Stream,
    /// One-shot recognition of a complete recording.
    Normal,
}

// ---------------------------------------------------------------------------
// EngineDescriptor
// ---------------------------------------------------------------------------

/// Links and hints shown next to an engine in the selector.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineMeta {
    pub official: Option<String>,
    pub configuration: Option<String>,
    pub tips: Option<String>,
    pub fee: Option<String>,
}

/// One ASR engine as reported by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineDescriptor {
    pub name: String,
    #[serde(default)]
    pub desc: String,
    pub infer_type: InferType,
    #[serde(default)]
    pub meta: EngineMeta,
}

impl EngineDescriptor {
    pub fn is_streaming(&self) -> bool {
        self.infer_type == InferType::Stream
    }
}

/// Keep only streaming-capable engines, keyed by name.
pub fn streaming_engines(engines: Vec<EngineDescriptor>) -> HashMap<String, EngineDescriptor> {
    engines
        .into_iter()
        .filter(EngineDescriptor::is_streaming)
        .map(|e| (e.name.clone(), e))
        .collect()
}

// ---------------------------------------------------------------------------
// ParamValue / EngineParamDescriptor
// ---------------------------------------------------------------------------

/// A scalar engine parameter value.
///
/// Untagged so the same representation works in JSON responses and in
/// `settings.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl ParamValue {
    /// Parse user input, preferring the narrowest type that accepts it.
    ///
    /// ```
    /// use sentio_wakeword::catalog::ParamValue;
    ///
    /// assert_eq!(ParamValue::parse("true"), ParamValue::Bool(true));
    /// assert_eq!(ParamValue::parse("16000"), ParamValue::Int(16_000));
    /// assert_eq!(ParamValue::parse("0.5"), ParamValue::Float(0.5));
    /// assert_eq!(ParamValue::parse("2pass"), ParamValue::Text("2pass".into()));
    /// ```
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if let Ok(b) = raw.parse::<bool>() {
            return ParamValue::Bool(b);
        }
        if let Ok(i) = raw.parse::<i64>() {
            return ParamValue::Int(i);
        }
        if let Ok(f) = raw.parse::<f64>() {
            return ParamValue::Float(f);
        }
        ParamValue::Text(raw.to_string())
    }
}

impl std::fmt::Display for ParamValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParamValue::Bool(b) => write!(f, "{b}"),
            ParamValue::Int(i) => write!(f, "{i}"),
            ParamValue::Float(x) => write!(f, "{x}"),
            ParamValue::Text(s) => write!(f, "{s}"),
        }
    }
}

/// One configurable parameter of an engine.  Schema order is display order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineParamDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, rename = "type")]
    pub param_type: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub range: Vec<ParamValue>,
    #[serde(default)]
    pub choices: Vec<ParamValue>,
    #[serde(default)]
    pub default: Option<ParamValue>,
}

// ---------------------------------------------------------------------------
// EngineSettings
// ---------------------------------------------------------------------------

/// Parameter name → current value.
pub type EngineSettings = BTreeMap<String, ParamValue>;

/// Reconcile a freshly fetched schema with previously persisted values.
///
/// Defaults seed the result, a persisted value wins when its name is in the
/// schema, and names the schema no longer knows are dropped.
///
/// ```
/// use sentio_wakeword::catalog::{merge_settings, EngineParamDescriptor, EngineSettings, ParamValue};
///
/// let param = |name: &str, default: ParamValue| EngineParamDescriptor {
///     name: name.into(),
///     description: String::new(),
///     param_type: String::new(),
///     required: false,
///     range: vec![],
///     choices: vec![],
///     default: Some(default),
/// };
/// let schema = vec![
///     param("rate", ParamValue::Int(1)),
///     param("lang", ParamValue::Text("en".into())),
/// ];
/// let mut persisted = EngineSettings::new();
/// persisted.insert("rate".into(), ParamValue::Int(5));
///
/// let merged = merge_settings(&schema, &persisted);
/// assert_eq!(merged["rate"], ParamValue::Int(5));
/// assert_eq!(merged["lang"], ParamValue::Text("en".into()));
/// ```
pub fn merge_settings(
    schema: &[EngineParamDescriptor],
    persisted: &EngineSettings,
) -> EngineSettings {
    schema
        .iter()
        .filter_map(|param| {
            persisted
                .get(&param.name)
                .or(param.default.as_ref())
                .map(|value| (param.name.clone(), value.clone()))
        })
        .collect()
}
