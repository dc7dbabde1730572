//! Turning the user's `MergeInto` / `RenameKeyGroup` cells into checked directives.

use std::collections::BTreeMap;

use crate::grouping::key_group::LabelParts;
use crate::grouping::{Grouping, KeyGroupLabel, ParamGroupRef};

/// A checked edit for the members of one parameter group (or one file).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Directive {
    pub merge_into: Option<ParamGroupRef>,
    pub rename: Option<Rename>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Rename {
    pub label: KeyGroupLabel,
    pub entities: BTreeMap<String, String>,
}

impl Directive {
    pub fn is_noop(&self) -> bool {
        self.merge_into.is_none() && self.rename.is_none()
    }
}

/// Parse a `MergeInto` cell: a bare id refers to the source's KeyGroup.
pub fn parse_merge_into(text: &str, source: &KeyGroupLabel) -> Result<ParamGroupRef, String> {
    let text = text.trim();
    if let Ok(id) = text.parse::<usize>() {
        return Ok(ParamGroupRef {
            label: source.clone(),
            id,
        });
    }
    // Spreadsheet tools like to write integers as `1.0`.
    if let Ok(value) = text.parse::<f64>() {
        if value >= 0.0 && value.fract() == 0.0 {
            return Ok(ParamGroupRef {
                label: source.clone(),
                id: value as usize,
            });
        }
        return Err(format!("'{}' is not a parameter group id", text));
    }
    text.parse::<ParamGroupRef>()
}

/// Check the cells of one row against the current grouping.
///
/// `source` is the parameter group whose members the row edits. Merging a
/// group into itself and renaming a group to its own label are dropped.
pub fn resolve_directive(
    grouping: &Grouping,
    source: &ParamGroupRef,
    merge_cell: &str,
    rename_cell: &str,
) -> Result<Directive, String> {
    let source_kg = grouping
        .key_group(&source.label)
        .ok_or_else(|| format!("unknown key group {}", source.label))?;
    let mut directive = Directive::default();

    if !merge_cell.is_empty() {
        let target = parse_merge_into(merge_cell, &source.label)?;
        let target_kg = grouping
            .key_group(&target.label)
            .ok_or_else(|| format!("merge target {} names an unknown key group", target))?;
        if grouping.find(&target).is_none() {
            return Err(format!("merge target {} does not exist", target));
        }
        if target_kg.datatype != source_kg.datatype || target_kg.suffix != source_kg.suffix {
            return Err(format!(
                "cannot merge {} into {}: {}/{} and {}/{} are different modalities",
                source, target, source_kg.datatype, source_kg.suffix, target_kg.datatype, target_kg.suffix
            ));
        }
        if &target != source {
            directive.merge_into = Some(target);
        }
    }

    if !rename_cell.is_empty() {
        let (label, LabelParts { datatype, suffix, entities }) = KeyGroupLabel::parse(rename_cell)
            .map_err(|e| format!("invalid RenameKeyGroup '{}': {}", rename_cell, e))?;
        if datatype != source_kg.datatype || suffix != source_kg.suffix {
            return Err(format!(
                "rename {} changes datatype or suffix of {}",
                label, source.label
            ));
        }
        let merge_label = directive.merge_into.as_ref().map(|t| &t.label);
        let taken = grouping.key_group(&label).is_some()
            && label != source.label
            && Some(&label) != merge_label;
        if taken {
            return Err(format!("rename target {} is already an existing key group", label));
        }
        if label != source.label {
            directive.rename = Some(Rename { label, entities });
        }
    }

    Ok(directive)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn label(text: &str) -> KeyGroupLabel {
        KeyGroupLabel::parse(text).unwrap().0
    }

    #[test]
    fn test_bare_id_refers_to_source_group() {
        let src = label("datatype-anat_suffix-T1w");
        let r = parse_merge_into("2", &src).unwrap();
        assert_eq!(r.label, src);
        assert_eq!(r.id, 2);
        assert_eq!(parse_merge_into("1.0", &src).unwrap().id, 1);
        assert!(parse_merge_into("1.5", &src).is_err());
    }

    #[test]
    fn test_qualified_target() {
        let src = label("datatype-anat_suffix-T1w");
        let r = parse_merge_into("acq-x_datatype-anat_suffix-T1w:0", &src).unwrap();
        assert_eq!(r.label.as_str(), "acq-x_datatype-anat_suffix-T1w");
        assert_eq!(r.id, 0);
    }
}
