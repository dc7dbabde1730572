use std::collections::BTreeMap;
use std::fmt;

use crate::index::filename::RESERVED_KEYS;
use crate::index::ScanFile;

/// Deterministic label of a KeyGroup: `datatype-`, `suffix-` and every other
/// non-subject, non-session entity as `key-value`, sorted by key, joined by `_`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct KeyGroupLabel(String);

/// The parts a label is built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelParts {
    pub datatype: String,
    pub suffix: String,
    pub entities: BTreeMap<String, String>,
}

impl KeyGroupLabel {
    pub fn from_parts(datatype: &str, suffix: &str, entities: &BTreeMap<String, String>) -> Self {
        let mut tokens: BTreeMap<&str, &str> = entities
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        tokens.insert("datatype", datatype);
        tokens.insert("suffix", suffix);
        let label = tokens
            .iter()
            .map(|(k, v)| format!("{}-{}", k, v))
            .collect::<Vec<_>>()
            .join("_");
        Self(label)
    }

    pub fn of_scan(scan: &ScanFile) -> Self {
        Self::from_parts(&scan.datatype, &scan.suffix, &scan.entities)
    }

    /// Parse a label typed by a user. Datatype and suffix tokens are required;
    /// subject and session are not allowed.
    pub fn parse(text: &str) -> Result<(Self, LabelParts), String> {
        let text = text.trim();
        if text.is_empty() {
            return Err("empty label".to_string());
        }
        let mut datatype = None;
        let mut suffix = None;
        let mut entities = BTreeMap::new();
        for token in text.split('_') {
            let (key, value) = token
                .split_once('-')
                .ok_or_else(|| format!("token '{}' is not a key-value pair", token))?;
            let valid = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric());
            if !valid(key) || !valid(value) {
                return Err(format!("token '{}' is not alphanumeric", token));
            }
            match key {
                "datatype" => datatype = Some(value.to_string()),
                "suffix" => suffix = Some(value.to_string()),
                "sub" | "ses" => {
                    return Err(format!("'{}' may not appear in a KeyGroup label", key));
                }
                other => {
                    if entities.insert(other.to_string(), value.to_string()).is_some() {
                        return Err(format!("entity '{}' appears more than once", other));
                    }
                }
            }
        }
        let datatype = datatype.ok_or_else(|| "label has no datatype token".to_string())?;
        let suffix = suffix.ok_or_else(|| "label has no suffix token".to_string())?;
        debug_assert!(RESERVED_KEYS.iter().all(|k| !entities.contains_key(*k)));

        let label = Self::from_parts(&datatype, &suffix, &entities);
        Ok((
            label,
            LabelParts {
                datatype,
                suffix,
                entities,
            },
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for KeyGroupLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Scans sharing one entity composition and modality.
#[derive(Debug, Clone)]
pub struct KeyGroup {
    pub label: KeyGroupLabel,
    pub datatype: String,
    pub suffix: String,
    pub entities: BTreeMap<String, String>,
    /// Indices into the index's scan list, in walk order.
    pub members: Vec<usize>,
}

/// Partition scans into KeyGroups, ordered by label.
pub fn classify(scans: &[ScanFile]) -> Vec<KeyGroup> {
    let mut groups: BTreeMap<KeyGroupLabel, KeyGroup> = BTreeMap::new();
    for (idx, scan) in scans.iter().enumerate() {
        let label = KeyGroupLabel::of_scan(scan);
        groups
            .entry(label.clone())
            .or_insert_with(|| KeyGroup {
                label,
                datatype: scan.datatype.clone(),
                suffix: scan.suffix.clone(),
                entities: scan.entities.clone(),
                members: Vec::new(),
            })
            .members
            .push(idx);
    }
    groups.into_values().collect()
}
