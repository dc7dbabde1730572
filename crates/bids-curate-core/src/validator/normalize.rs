//! Canonical rows from the validator's JSON issue report.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::Error;

/// One (issue, affected file) pair.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IssueRow {
    pub files: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub severity: String,
    pub description: String,
    pub code: String,
    pub url: String,
    /// Owning subject in sequential runs; empty for whole-dataset runs.
    pub subject: String,
}

pub const COLUMNS: [&str; 7] = ["files", "type", "severity", "description", "code", "url", "subject"];

#[derive(Debug, Default, Deserialize)]
struct Report {
    #[serde(default)]
    issues: Issues,
}

#[derive(Debug, Default, Deserialize)]
struct Issues {
    #[serde(default)]
    errors: Vec<Issue>,
    #[serde(default)]
    warnings: Vec<Issue>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Issue {
    #[serde(default)]
    key: String,
    #[serde(default)]
    code: Value,
    #[serde(default)]
    reason: String,
    #[serde(default)]
    severity: String,
    #[serde(default)]
    help_url: String,
    #[serde(default)]
    files: Vec<IssueFile>,
}

#[derive(Debug, Deserialize)]
struct IssueFile {
    #[serde(default)]
    file: Option<FileRef>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileRef {
    #[serde(default)]
    relative_path: String,
}

fn code_text(code: &Value) -> String {
    match code {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Parse the validator's `--json` output. Anything printed before the JSON
/// document is ignored.
pub fn parse_validator_output(output: &str) -> Result<Vec<IssueRow>, Error> {
    let start = match output.find('{') {
        Some(start) => start,
        None => {
            return Err(Error::Other("validator output contains no JSON document".to_string()));
        }
    };
    let report: Report = serde_json::from_str(output[start..].trim_end())?;

    let mut rows = Vec::new();
    for (default_severity, issues) in [("error", &report.issues.errors), ("warning", &report.issues.warnings)] {
        for issue in issues {
            let severity = if issue.severity.is_empty() {
                default_severity.to_string()
            } else {
                issue.severity.clone()
            };
            let row = |files: String| IssueRow {
                files,
                kind: issue.key.clone(),
                severity: severity.clone(),
                description: issue.reason.clone(),
                code: code_text(&issue.code),
                url: issue.help_url.clone(),
                subject: String::new(),
            };
            let paths: Vec<String> = issue
                .files
                .iter()
                .filter_map(|f| f.file.as_ref().map(|r| r.relative_path.clone()))
                .collect();
            if paths.is_empty() {
                rows.push(row(String::new()));
            } else {
                rows.extend(paths.into_iter().map(row));
            }
        }
    }
    Ok(rows)
}

/// Sort rows by content and collapse rows that differ only in `subject`,
/// keeping the lexicographically first subject.
pub fn normalize(mut rows: Vec<IssueRow>) -> Vec<IssueRow> {
    rows.sort();
    rows.dedup_by(|later, earlier| {
        later.files == earlier.files
            && later.kind == earlier.kind
            && later.severity == earlier.severity
            && later.description == earlier.description
            && later.code == earlier.code
            && later.url == earlier.url
    });
    rows
}

/// Column descriptions written next to the validation table.
pub fn field_dictionary() -> Value {
    let entry = |long: &str, description: &str| json!({"LongName": long, "Description": description});
    json!({
        "files": entry("Files", "File(s) affected by the issue, relative to the dataset root"),
        "type": entry("Issue type", "Validator key identifying the kind of issue"),
        "severity": entry("Severity", "Whether the issue is an error or a warning"),
        "description": entry("Description", "Validator explanation of the issue"),
        "code": entry("Code", "Numeric validator issue code"),
        "url": entry("Help URL", "Link to more information about the issue"),
        "subject": entry("Subject", "Subject whose isolated copy produced the issue (sequential runs only)"),
    })
}
