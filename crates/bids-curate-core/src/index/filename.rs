//! Structured filename parsing.
//!
//! Names follow `[sub-<S>_][ses-<T>_](<key>-<value>_)*<suffix><ext>`. Parsing
//! never guesses: anything that does not decompose cleanly is a [`NameError`].

use std::collections::BTreeMap;
use thiserror::Error;

/// Entity keys that are reserved for KeyGroup labels and may not appear in names.
pub const RESERVED_KEYS: [&str; 2] = ["datatype", "suffix"];

/// Canonical entity order used when building filenames.
const ENTITY_ORDER: [&str; 27] = [
    "sub", "ses", "task", "acq", "ce", "trc", "stain", "rec", "dir", "run", "mod", "echo", "flip",
    "inv", "mt", "part", "proc", "hemi", "space", "split", "recording", "chunk", "atlas", "res",
    "den", "label", "desc",
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NameError {
    #[error("empty file name")]
    Empty,
    #[error("missing suffix")]
    MissingSuffix,
    #[error("suffix '{0}' is not alphanumeric")]
    BadSuffix(String),
    #[error("token '{0}' is not a key-value pair")]
    BadToken(String),
    #[error("entity '{0}' appears more than once")]
    DuplicateEntity(String),
    #[error("entity key '{0}' is reserved")]
    ReservedEntity(String),
    #[error("name does not start with a subject entity")]
    MissingSubject,
    #[error("session entity must directly follow the subject")]
    MisplacedSession,
}

/// A filename decomposed into entity tokens, suffix and extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityName {
    /// Entities in filename order, including `sub`/`ses` when present.
    pub entities: Vec<(String, String)>,
    pub suffix: String,
    /// Everything from the first `.` on, e.g. `.nii.gz`. May be empty.
    pub extension: String,
}

impl EntityName {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entities
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Filename without the extension.
    pub fn stem(&self) -> String {
        let mut tokens: Vec<String> = self
            .entities
            .iter()
            .map(|(k, v)| format!("{}-{}", k, v))
            .collect();
        tokens.push(self.suffix.clone());
        tokens.join("_")
    }
}

/// A primary scan filename: subject and optional session split out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanName {
    pub subject: String,
    pub session: Option<String>,
    /// Remaining entities, sorted by key.
    pub entities: BTreeMap<String, String>,
    pub suffix: String,
    pub extension: String,
}

fn is_label(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric())
}

/// Split a filename at its first dot.
pub fn split_extension(name: &str) -> (&str, &str) {
    match name.find('.') {
        Some(pos) => (&name[..pos], &name[pos..]),
        None => (name, ""),
    }
}

/// Parse any entity-structured name (sidecars may omit subject and session).
pub fn parse_entities(name: &str) -> Result<EntityName, NameError> {
    let (stem, extension) = split_extension(name);
    if stem.is_empty() {
        return Err(NameError::Empty);
    }

    let mut tokens: Vec<&str> = stem.split('_').collect();
    let suffix = tokens.pop().ok_or(NameError::MissingSuffix)?;
    if suffix.is_empty() {
        return Err(NameError::MissingSuffix);
    }
    if !is_label(suffix) {
        return Err(NameError::BadSuffix(suffix.to_string()));
    }

    let mut entities: Vec<(String, String)> = Vec::with_capacity(tokens.len());
    for token in tokens {
        let (key, value) = token
            .split_once('-')
            .ok_or_else(|| NameError::BadToken(token.to_string()))?;
        if !is_label(key) || !is_label(value) {
            return Err(NameError::BadToken(token.to_string()));
        }
        if RESERVED_KEYS.contains(&key) {
            return Err(NameError::ReservedEntity(key.to_string()));
        }
        if entities.iter().any(|(k, _)| k == key) {
            return Err(NameError::DuplicateEntity(key.to_string()));
        }
        entities.push((key.to_string(), value.to_string()));
    }

    Ok(EntityName {
        entities,
        suffix: suffix.to_string(),
        extension: extension.to_string(),
    })
}

/// Parse a primary scan filename. The subject must come first and the session,
/// when present, second.
pub fn parse_scan_name(name: &str) -> Result<ScanName, NameError> {
    let parsed = parse_entities(name)?;
    let mut iter = parsed.entities.into_iter().peekable();

    let subject = match iter.next() {
        Some((key, value)) if key == "sub" => value,
        _ => return Err(NameError::MissingSubject),
    };
    let session = match iter.peek() {
        Some((key, _)) if key == "ses" => iter.next().map(|(_, v)| v),
        _ => None,
    };

    let mut entities = BTreeMap::new();
    for (key, value) in iter {
        if key == "ses" {
            return Err(NameError::MisplacedSession);
        }
        entities.insert(key, value);
    }

    Ok(ScanName {
        subject,
        session,
        entities,
        suffix: parsed.suffix,
        extension: parsed.extension,
    })
}

fn entity_rank(key: &str) -> usize {
    ENTITY_ORDER
        .iter()
        .position(|k| *k == key)
        .unwrap_or(ENTITY_ORDER.len())
}

/// Build a scan filename with entities in canonical order; unknown keys follow
/// the known ones alphabetically.
pub fn build_scan_name(
    subject: &str,
    session: Option<&str>,
    entities: &BTreeMap<String, String>,
    suffix: &str,
    extension: &str,
) -> String {
    let mut ordered: Vec<(&String, &String)> = entities.iter().collect();
    ordered.sort_by(|(a, _), (b, _)| entity_rank(a).cmp(&entity_rank(b)).then_with(|| a.cmp(b)));

    let mut name = format!("sub-{}", subject);
    if let Some(ses) = session {
        name.push_str(&format!("_ses-{}", ses));
    }
    for (key, value) in ordered {
        name.push_str(&format!("_{}-{}", key, value));
    }
    name.push('_');
    name.push_str(suffix);
    name.push_str(extension);
    name
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_scan_name() {
        let name = parse_scan_name("sub-01_ses-pre_task-rest_acq-mb_run-2_bold.nii.gz").unwrap();
        assert_eq!(name.subject, "01");
        assert_eq!(name.session.as_deref(), Some("pre"));
        assert_eq!(name.suffix, "bold");
        assert_eq!(name.extension, ".nii.gz");
        assert_eq!(name.entities.get("task").map(String::as_str), Some("rest"));
        assert_eq!(name.entities.get("run").map(String::as_str), Some("2"));
        assert_eq!(name.entities.len(), 3);
    }

    #[test]
    fn test_parse_without_session() {
        let name = parse_scan_name("sub-02_T1w.nii").unwrap();
        assert_eq!(name.subject, "02");
        assert!(name.session.is_none());
        assert!(name.entities.is_empty());
        assert_eq!(name.suffix, "T1w");
    }

    #[test]
    fn test_malformed_names() {
        assert_eq!(parse_scan_name("task-rest_bold.nii.gz"), Err(NameError::MissingSubject));
        assert!(matches!(parse_scan_name("sub-01_task_bold.nii"), Err(NameError::BadToken(_))));
        assert!(matches!(
            parse_scan_name("sub-01_run-1_run-2_bold.nii"),
            Err(NameError::DuplicateEntity(_))
        ));
        assert!(matches!(
            parse_scan_name("sub-01_task-rest_ses-1_bold.nii"),
            Err(NameError::MisplacedSession)
        ));
        assert!(matches!(
            parse_scan_name("sub-01_suffix-x_bold.nii"),
            Err(NameError::ReservedEntity(_))
        ));
        assert!(matches!(parse_scan_name("sub-01_bo-ld.nii"), Err(NameError::BadSuffix(_))));
        assert_eq!(parse_scan_name(".nii"), Err(NameError::Empty));
    }

    #[test]
    fn test_sidecar_names_may_omit_subject() {
        let name = parse_entities("task-rest_bold.json").unwrap();
        assert_eq!(name.get("task"), Some("rest"));
        assert_eq!(name.suffix, "bold");
        assert_eq!(name.stem(), "task-rest_bold");
    }

    #[test]
    fn test_build_uses_canonical_order() {
        let mut entities = BTreeMap::new();
        entities.insert("run".to_string(), "1".to_string());
        entities.insert("acq".to_string(), "mb".to_string());
        entities.insert("task".to_string(), "rest".to_string());
        entities.insert("foo".to_string(), "bar".to_string());
        let name = build_scan_name("01", Some("a"), &entities, "bold", ".nii.gz");
        assert_eq!(name, "sub-01_ses-a_task-rest_acq-mb_run-1_foo-bar_bold.nii.gz");
    }
}
