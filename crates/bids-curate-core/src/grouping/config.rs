//! Grouping configuration: which sidecar fields separate parameter groups, and
//! how two values of a field are compared.

use config::{Config, File as ConfigFile, FileFormat};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::Error;

pub const DEFAULT_REL_TOL: f64 = 1e-3;
const FALLBACK_DATATYPE: &str = "default";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompareKind {
    #[default]
    Numeric,
    Exact,
}

/// One field entry as written in the configuration document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    #[serde(default)]
    pub compare: CompareKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rel_tol: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abs_tol: Option<f64>,
}

impl FieldSpec {
    fn numeric(name: &str) -> Self {
        Self {
            name: name.to_string(),
            compare: CompareKind::Numeric,
            rel_tol: None,
            abs_tol: None,
        }
    }

    fn exact(name: &str) -> Self {
        Self {
            name: name.to_string(),
            compare: CompareKind::Exact,
            rel_tol: None,
            abs_tol: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToleranceDefaults {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rel_tol: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub abs_tol: Option<f64>,
}

impl Default for ToleranceDefaults {
    fn default() -> Self {
        Self {
            rel_tol: Some(DEFAULT_REL_TOL),
            abs_tol: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatatypeFields {
    /// Replaces the built-in list when present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<FieldSpec>>,
    /// Appended to the list; an entry with an existing name replaces it.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub extra_fields: Vec<FieldSpec>,
}

/// The grouping configuration document as stored on disk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupingDocument {
    pub tolerance: ToleranceDefaults,
    pub datatypes: BTreeMap<String, DatatypeFields>,
}

impl GroupingDocument {
    /// The built-in defaults written out as a document.
    pub fn builtin() -> Self {
        let datatypes = builtin_fields()
            .into_iter()
            .map(|(dt, fields)| {
                (
                    dt.to_string(),
                    DatatypeFields {
                        fields: Some(fields),
                        extra_fields: Vec::new(),
                    },
                )
            })
            .collect();
        Self {
            tolerance: ToleranceDefaults::default(),
            datatypes,
        }
    }

    pub fn to_toml(&self) -> Result<String, Error> {
        Ok(toml::to_string_pretty(self)?)
    }
}

fn builtin_fields() -> BTreeMap<&'static str, Vec<FieldSpec>> {
    let n = FieldSpec::numeric;
    let e = FieldSpec::exact;
    let mut map = BTreeMap::new();
    map.insert(
        "anat",
        vec![
            n("EchoTime"),
            n("RepetitionTime"),
            n("InversionTime"),
            n("FlipAngle"),
            n("MagneticFieldStrength"),
            e("Manufacturer"),
            n("Dim1Size"),
            n("Dim2Size"),
            n("Dim3Size"),
            n("VoxelSizeDim1"),
            n("VoxelSizeDim2"),
            n("VoxelSizeDim3"),
        ],
    );
    map.insert(
        "func",
        vec![
            n("RepetitionTime"),
            n("EchoTime"),
            n("FlipAngle"),
            n("MultibandAccelerationFactor"),
            n("SliceTiming"),
            n("EffectiveEchoSpacing"),
            n("TotalReadoutTime"),
            e("PhaseEncodingDirection"),
            n("NumVolumes"),
        ],
    );
    map.insert(
        "dwi",
        vec![
            n("RepetitionTime"),
            n("EchoTime"),
            n("FlipAngle"),
            n("EffectiveEchoSpacing"),
            n("TotalReadoutTime"),
            e("PhaseEncodingDirection"),
            n("NumVolumes"),
        ],
    );
    map.insert(
        "fmap",
        vec![
            n("EchoTime"),
            n("EchoTime1"),
            n("EchoTime2"),
            n("RepetitionTime"),
            n("TotalReadoutTime"),
            e("PhaseEncodingDirection"),
        ],
    );
    map.insert(
        FALLBACK_DATATYPE,
        vec![n("RepetitionTime"), n("EchoTime"), n("FlipAngle")],
    );
    map
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Rule {
    Numeric {
        rel_tol: Option<f64>,
        abs_tol: Option<f64>,
    },
    Exact,
}

/// A resolved field comparator.
#[derive(Debug, Clone, PartialEq)]
pub struct Comparator {
    pub name: String,
    pub rule: Rule,
}

impl Comparator {
    /// Absent on both sides matches; absent on one side does not.
    pub fn matches(&self, a: Option<&Value>, b: Option<&Value>) -> bool {
        match (a, b) {
            (None, None) => true,
            (Some(a), Some(b)) => match self.rule {
                Rule::Numeric { rel_tol, abs_tol } => numeric_match(a, b, rel_tol, abs_tol),
                Rule::Exact => exact_match(a, b),
            },
            _ => false,
        }
    }
}

fn numbers_close(a: f64, b: f64, rel_tol: Option<f64>, abs_tol: Option<f64>) -> bool {
    let diff = (a - b).abs();
    if diff == 0.0 {
        return true;
    }
    abs_tol.is_some_and(|t| diff <= t) || rel_tol.is_some_and(|t| diff <= t * a.abs().max(b.abs()))
}

fn numeric_match(a: &Value, b: &Value, rel_tol: Option<f64>, abs_tol: Option<f64>) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => numbers_close(x, y, rel_tol, abs_tol),
            _ => x == y,
        },
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .zip(ys)
                    .all(|(x, y)| numeric_match(x, y, rel_tol, abs_tol))
        }
        _ => exact_match(a, b),
    }
}

fn normalize_text(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

fn exact_match(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::String(x), Value::String(y)) => normalize_text(x) == normalize_text(y),
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| exact_match(x, y))
        }
        _ => a == b,
    }
}

/// Resolved grouping configuration, injected into the engine at construction.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupingConfig {
    by_datatype: BTreeMap<String, Vec<Comparator>>,
}

impl Default for GroupingConfig {
    fn default() -> Self {
        // Built-in entries are valid by construction.
        Self::from_document(&GroupingDocument::default()).unwrap_or_else(|_| Self {
            by_datatype: BTreeMap::new(),
        })
    }
}

impl GroupingConfig {
    /// Load a grouping document; `None` gives the built-in defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, Error> {
        let path = match path {
            Some(path) => path,
            None => return Ok(Self::default()),
        };
        let document = Config::builder()
            .add_source(ConfigFile::from(path).format(FileFormat::Toml))
            .build()?
            .try_deserialize::<GroupingDocument>()?;
        Self::from_document(&document)
    }

    pub fn from_document(document: &GroupingDocument) -> Result<Self, Error> {
        check_tolerance("tolerance", document.tolerance.rel_tol, document.tolerance.abs_tol)?;

        let builtin = builtin_fields();
        let mut datatypes: Vec<String> = builtin.keys().map(|k| k.to_string()).collect();
        for dt in document.datatypes.keys() {
            if !datatypes.contains(dt) {
                datatypes.push(dt.clone());
            }
        }

        let mut by_datatype = BTreeMap::new();
        for dt in datatypes {
            let overrides = document.datatypes.get(&dt);
            let mut specs: Vec<FieldSpec> = match overrides.and_then(|o| o.fields.clone()) {
                Some(fields) => fields,
                None => builtin
                    .get(dt.as_str())
                    .or_else(|| builtin.get(FALLBACK_DATATYPE))
                    .cloned()
                    .unwrap_or_default(),
            };
            if let Some(o) = overrides {
                for extra in &o.extra_fields {
                    match specs.iter_mut().find(|s| s.name == extra.name) {
                        Some(existing) => *existing = extra.clone(),
                        None => specs.push(extra.clone()),
                    }
                }
            }

            let mut comparators: Vec<Comparator> = Vec::with_capacity(specs.len());
            for spec in specs {
                let name = spec.name.trim().to_string();
                if name.is_empty() {
                    return Err(Error::InvalidConfig(format!(
                        "datatype '{}' has a field with an empty name",
                        dt
                    )));
                }
                if comparators.iter().any(|c| c.name == name) {
                    return Err(Error::InvalidConfig(format!(
                        "datatype '{}' lists field '{}' twice",
                        dt, name
                    )));
                }
                let rule = match spec.compare {
                    CompareKind::Exact => Rule::Exact,
                    CompareKind::Numeric => {
                        let (rel_tol, abs_tol) = if spec.rel_tol.is_none() && spec.abs_tol.is_none() {
                            (document.tolerance.rel_tol, document.tolerance.abs_tol)
                        } else {
                            (spec.rel_tol, spec.abs_tol)
                        };
                        check_tolerance(&name, rel_tol, abs_tol)?;
                        if rel_tol.is_none() && abs_tol.is_none() {
                            return Err(Error::InvalidConfig(format!(
                                "numeric field '{}' of datatype '{}' has no tolerance",
                                name, dt
                            )));
                        }
                        Rule::Numeric { rel_tol, abs_tol }
                    }
                };
                comparators.push(Comparator { name, rule });
            }
            by_datatype.insert(dt, comparators);
        }

        Ok(Self { by_datatype })
    }

    /// Comparators for a datatype, falling back to the `default` entry.
    pub fn fields_for(&self, datatype: &str) -> &[Comparator] {
        self.by_datatype
            .get(datatype)
            .or_else(|| self.by_datatype.get(FALLBACK_DATATYPE))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

fn check_tolerance(what: &str, rel_tol: Option<f64>, abs_tol: Option<f64>) -> Result<(), Error> {
    for (label, tol) in [("rel_tol", rel_tol), ("abs_tol", abs_tol)] {
        if let Some(t) = tol {
            if !t.is_finite() || t < 0.0 {
                return Err(Error::InvalidConfig(format!(
                    "{} of '{}' must be a non-negative number, got {}",
                    label, what, t
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn numeric(rel: Option<f64>, abs: Option<f64>) -> Comparator {
        Comparator {
            name: "RepetitionTime".to_string(),
            rule: Rule::Numeric {
                rel_tol: rel,
                abs_tol: abs,
            },
        }
    }

    #[test]
    fn test_relative_tolerance() {
        let loose = numeric(Some(1e-3), None);
        let tight = numeric(Some(1e-6), None);
        assert!(loose.matches(Some(&json!(2.0)), Some(&json!(2.0004))));
        assert!(!tight.matches(Some(&json!(2.0)), Some(&json!(2.0004))));
    }

    #[test]
    fn test_absolute_tolerance() {
        let cmp = numeric(None, Some(0.01));
        assert!(cmp.matches(Some(&json!(0.03)), Some(&json!(0.035))));
        assert!(!cmp.matches(Some(&json!(0.03)), Some(&json!(0.05))));
    }

    #[test]
    fn test_absence_rules() {
        let cmp = numeric(Some(1e-3), None);
        assert!(cmp.matches(None, None));
        assert!(!cmp.matches(Some(&json!(1)), None));
        assert!(!cmp.matches(None, Some(&json!(1))));
    }

    #[test]
    fn test_arrays_compare_elementwise() {
        let cmp = numeric(Some(1e-3), None);
        assert!(cmp.matches(Some(&json!([0.0, 0.5, 1.0])), Some(&json!([0.0, 0.50001, 1.0]))));
        assert!(!cmp.matches(Some(&json!([0.0, 0.5])), Some(&json!([0.0, 0.5, 1.0]))));
    }

    #[test]
    fn test_exact_is_case_and_whitespace_insensitive() {
        let cmp = Comparator {
            name: "Manufacturer".to_string(),
            rule: Rule::Exact,
        };
        assert!(cmp.matches(Some(&json!("  Siemens   Healthineers")), Some(&json!("siemens healthineers"))));
        assert!(!cmp.matches(Some(&json!("j")), Some(&json!("j-"))));
        assert!(cmp.matches(Some(&json!(2)), Some(&json!(2.0))));
    }

    #[test]
    fn test_unknown_datatype_uses_default_list() {
        let config = GroupingConfig::default();
        let names: Vec<&str> = config.fields_for("pet").iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["RepetitionTime", "EchoTime", "FlipAngle"]);
    }

    #[test]
    fn test_extra_fields_extend_and_replace() {
        let mut document = GroupingDocument::default();
        document.datatypes.insert(
            "fmap".to_string(),
            DatatypeFields {
                fields: None,
                extra_fields: vec![
                    FieldSpec {
                        name: "EchoTime".to_string(),
                        compare: CompareKind::Numeric,
                        rel_tol: None,
                        abs_tol: Some(0.5),
                    },
                    FieldSpec::exact("SeriesDescription"),
                ],
            },
        );
        let config = GroupingConfig::from_document(&document).unwrap();
        let fields = config.fields_for("fmap");
        assert_eq!(
            fields[0].rule,
            Rule::Numeric {
                rel_tol: None,
                abs_tol: Some(0.5)
            }
        );
        assert_eq!(fields.last().map(|c| c.name.as_str()), Some("SeriesDescription"));
    }

    #[test]
    fn test_invalid_documents() {
        let mut negative = GroupingDocument::default();
        negative.tolerance.rel_tol = Some(-1.0);
        assert!(matches!(
            GroupingConfig::from_document(&negative),
            Err(Error::InvalidConfig(_))
        ));

        let mut duplicate = GroupingDocument::default();
        duplicate.datatypes.insert(
            "anat".to_string(),
            DatatypeFields {
                fields: Some(vec![FieldSpec::numeric("EchoTime"), FieldSpec::numeric("EchoTime")]),
                extra_fields: Vec::new(),
            },
        );
        assert!(matches!(
            GroupingConfig::from_document(&duplicate),
            Err(Error::InvalidConfig(_))
        ));

        let mut untolerant = GroupingDocument::default();
        untolerant.tolerance = ToleranceDefaults {
            rel_tol: None,
            abs_tol: None,
        };
        assert!(matches!(
            GroupingConfig::from_document(&untolerant),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_builtin_document_renders_to_toml() {
        let text = GroupingDocument::builtin().to_toml().unwrap();
        assert!(text.contains("datatypes.func"));
        assert!(text.contains("RepetitionTime"));
    }
}
