//! The trait-calculation algorithm contract.
//!
//! Algorithms are external plug-ins. They declare their schema (variable
//! names, units, labels, citation, feature flags) as named string values and
//! expose one calculation over the clipped plot pixels. This module resolves
//! those declarations once at load time into an [`AlgorithmSpec`] and
//! normalizes whatever shape the calculation returns against the declared
//! variable list.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;

use tracing::debug;

use crate::clip::RasterWindow;
use crate::error::PipelineError;

/// A single trait value as it will appear in an output cell.
#[derive(Debug, Clone, PartialEq)]
pub enum TraitValue {
    Number(f64),
    Text(String),
    /// Array-typed cell; empty for unset array-default fields.
    List(Vec<TraitValue>),
}

impl fmt::Display for TraitValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => write!(f, "{s}"),
            Self::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
        }
    }
}

/// The value shape an algorithm's calculation may return.
///
/// Normalization into a flat value list happens in [`validate_calc_value`];
/// nothing downstream of the adapter ever sees this variant type.
#[derive(Debug, Clone)]
pub enum CalcValue {
    /// A single value, valid when exactly one variable is declared.
    Scalar(TraitValue),
    /// Values in declared-variable order.
    Sequence(Vec<TraitValue>),
    /// Values keyed by variable name; extra keys are dropped.
    Mapping(BTreeMap<String, TraitValue>),
    /// Unordered values. Always rejected: there is no defined pairing with
    /// the declared variable order.
    Set(BTreeSet<String>),
}

/// Normalize a calculation result against the declared variable list.
///
/// - Mappings are read in `expected_names` order; unknown keys are dropped.
/// - Sequences are used as-is.
/// - A scalar becomes a one-element sequence.
/// - Sets are rejected outright.
///
/// # Errors
/// [`PipelineError::UnsupportedType`] for a set;
/// [`PipelineError::Arity`] when the normalized length differs from
/// `expected_names`. Both are per-file errors: the orchestrator logs them
/// and continues with the next file.
pub fn validate_calc_value(
    calc_value: CalcValue,
    expected_names: &[String],
) -> Result<Vec<TraitValue>, PipelineError> {
    let values = match calc_value {
        CalcValue::Set(_) => {
            return Err(PipelineError::UnsupportedType(
                "a set was returned and isn't supported; use a sequence instead".to_string(),
            ))
        }
        CalcValue::Mapping(mut map) => expected_names
            .iter()
            .filter_map(|name| map.remove(name))
            .collect(),
        CalcValue::Sequence(values) => values,
        CalcValue::Scalar(value) => vec![value],
    };

    if values.len() != expected_names.len() {
        return Err(PipelineError::Arity {
            expected: expected_names.len(),
            actual: values.len(),
        });
    }
    Ok(values)
}

/// The named declarations an algorithm publishes about itself.
///
/// Lookups never fail: absent, mistyped, or blank declarations resolve to
/// the caller's default. Only [`variable_list`](Self::variable_list) is
/// strict, because schema construction cannot proceed without it.
#[derive(Debug, Clone, Default)]
pub struct AlgorithmDeclarations {
    values: BTreeMap<String, String>,
}

impl AlgorithmDeclarations {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from (name, value) pairs.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            values: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Load declarations from a JSON object file of name → string/number/bool.
    ///
    /// # Errors
    /// Returns [`PipelineError::Config`] when the file cannot be read or is
    /// not a JSON object.
    pub fn from_json_file(path: &Path) -> Result<Self, PipelineError> {
        let text = std::fs::read_to_string(path)?;
        let parsed: serde_json::Value = serde_json::from_str(&text)
            .map_err(|e| PipelineError::Config(format!("invalid algorithm declarations: {e}")))?;
        let serde_json::Value::Object(map) = parsed else {
            return Err(PipelineError::Config(
                "algorithm declarations must be a JSON object".to_string(),
            ));
        };

        let mut values = BTreeMap::new();
        for (key, value) in map {
            let text = match value {
                serde_json::Value::String(s) => s,
                serde_json::Value::Bool(b) => b.to_string(),
                serde_json::Value::Number(n) => n.to_string(),
                other => {
                    debug!(key = %key, value = %other, "Ignoring non-scalar declaration");
                    continue;
                }
            };
            values.insert(key, text);
        }
        Ok(Self { values })
    }

    pub fn insert(&mut self, name: &str, value: &str) {
        self.values.insert(name.to_string(), value.to_string());
    }

    /// Boolean declaration; `default` when absent, blank, or unparseable.
    #[must_use]
    pub fn get_bool(&self, name: &str, default: bool) -> bool {
        match self.values.get(name).map(|v| v.trim().to_lowercase()) {
            Some(v) if v == "true" || v == "1" => true,
            Some(v) if v == "false" || v == "0" => false,
            _ => default,
        }
    }

    /// String declaration; `default` when absent or empty after trimming.
    #[must_use]
    pub fn get_str(&self, name: &str, default: &str) -> String {
        match self.values.get(name).map(|v| v.trim()) {
            Some(v) if !v.is_empty() => v.to_string(),
            _ => default.to_string(),
        }
    }

    /// Required comma-joined list declaration.
    ///
    /// # Errors
    /// Returns [`PipelineError::Config`] (run-fatal) when the declaration is
    /// absent or empty.
    pub fn variable_list(&self, name: &str) -> Result<Vec<String>, PipelineError> {
        let raw = self
            .values
            .get(name)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                PipelineError::Config(format!("unable to find a {name} algorithm declaration"))
            })?;
        Ok(raw.split(',').map(str::to_string).collect())
    }

    /// Optional comma-joined list; empty when undeclared.
    #[must_use]
    pub fn variable_labels(&self) -> Vec<String> {
        match self.values.get("VARIABLE_LABELS").map(|v| v.trim()) {
            Some(v) if !v.is_empty() => v.split(',').map(str::to_string).collect(),
            _ => Vec::new(),
        }
    }
}

/// Citation metadata an algorithm may declare. Empty strings mean
/// "not declared" and leave the table defaults in place.
#[derive(Debug, Clone, Default)]
pub struct Citation {
    pub author: String,
    pub title: String,
    pub year: String,
}

/// The resolved capability record for a loaded algorithm.
///
/// Built once per run from [`AlgorithmDeclarations`]; every later schema or
/// header decision reads from here instead of going back to the raw
/// declarations.
#[derive(Debug, Clone)]
pub struct AlgorithmSpec {
    pub name: String,
    pub version: String,
    pub variable_names: Vec<String>,
    pub variable_units: Vec<String>,
    pub variable_labels: Vec<String>,
    pub citation: Citation,
    pub method: String,
    pub write_geostreams_csv: bool,
    pub write_betydb_csv: bool,
}

impl AlgorithmSpec {
    /// Resolve declarations into a spec.
    ///
    /// # Errors
    /// Returns [`PipelineError::Config`] when `VARIABLE_NAMES` or
    /// `VARIABLE_UNITS` is missing or empty. This aborts the run.
    pub fn from_declarations(decls: &AlgorithmDeclarations) -> Result<Self, PipelineError> {
        Ok(Self {
            name: decls.get_str("ALGORITHM_NAME", "unknown algorithm"),
            version: decls.get_str("VERSION", "x.y"),
            variable_names: decls.variable_list("VARIABLE_NAMES")?,
            variable_units: decls.variable_list("VARIABLE_UNITS")?,
            variable_labels: decls.variable_labels(),
            citation: Citation {
                author: decls.get_str("CITATION_AUTHOR", ""),
                title: decls.get_str("CITATION_TITLE", ""),
                year: decls.get_str("CITATION_YEAR", ""),
            },
            method: decls.get_str("ALGORITHM_METHOD", ""),
            write_geostreams_csv: decls.get_bool("WRITE_GEOSTREAMS_CSV", true),
            write_betydb_csv: decls.get_bool("WRITE_BETYDB_CSV", true),
        })
    }
}

/// The calculation an algorithm plug-in supplies.
pub trait PlotCalculator {
    /// Compute trait values for one clipped plot region.
    ///
    /// # Errors
    /// Implementations report their own failures; the orchestrator treats
    /// them as per-file errors.
    fn calculate(&self, window: &RasterWindow) -> Result<CalcValue, PipelineError>;
}

/// Built-in demonstration calculator: mean of all finite pixel values.
///
/// Stands in for a real plug-in in the CLI and in tests; declares a single
/// `mean_value` variable.
pub struct MeanValueCalculator;

impl MeanValueCalculator {
    /// Declarations matching this calculator's schema.
    #[must_use]
    pub fn declarations() -> AlgorithmDeclarations {
        AlgorithmDeclarations::from_pairs([
            ("ALGORITHM_NAME", "mean value"),
            ("VERSION", "1.0"),
            ("VARIABLE_NAMES", "mean_value"),
            ("VARIABLE_UNITS", "meters"),
        ])
    }
}

impl PlotCalculator for MeanValueCalculator {
    fn calculate(&self, window: &RasterWindow) -> Result<CalcValue, PipelineError> {
        let (sum, count) = window
            .pixels
            .iter()
            .filter(|v| v.is_finite())
            .fold((0.0_f64, 0_u64), |(s, n), &v| (s + f64::from(v), n + 1));
        if count == 0 {
            return Err(PipelineError::UnsupportedType(
                "clipped region holds no finite pixels".to_string(),
            ));
        }
        #[allow(clippy::cast_precision_loss)]
        Ok(CalcValue::Scalar(TraitValue::Number(sum / count as f64)))
    }
}
