mod common;

use pretty_assertions::assert_eq;
use serde_json::json;
use std::path::PathBuf;
use tempfile::tempdir;

use bids_curate_core::{AppConfig, ProblemKind, ScanIndex, SilentReporter};

use common::{scan, write};

#[test]
fn test_index_inherits_sidecars_shallow_to_deep() {
    let tmp = tempdir().unwrap();
    let root = tmp.path();
    write(root, "task-rest_bold.json", r#"{"RepetitionTime": 2.0, "EchoTime": 0.03}"#);
    write(root, "sub-01/sub-01_task-rest_bold.json", r#"{"EchoTime": 0.035}"#);
    scan(
        root,
        "sub-01/func/sub-01_task-rest_bold.nii.gz",
        Some(json!({"FlipAngle": 70})),
    );

    let index = ScanIndex::build(root, &AppConfig::default(), None, &SilentReporter).unwrap();
    assert_eq!(index.scans.len(), 1);
    let bold = &index.scans[0];
    assert_eq!(bold.field("RepetitionTime"), Some(&json!(2.0)));
    assert_eq!(bold.field("EchoTime"), Some(&json!(0.035)));
    assert_eq!(bold.field("FlipAngle"), Some(&json!(70)));
    assert_eq!(
        bold.sidecar_path,
        Some(PathBuf::from("sub-01/func/sub-01_task-rest_bold.json"))
    );
}

#[test]
fn test_malformed_names_are_reported_not_indexed() {
    let tmp = tempdir().unwrap();
    let root = tmp.path();
    scan(root, "sub-01/anat/sub-01_T1w.nii.gz", None);
    scan(root, "sub-01/anat/sub-02_T1w.nii.gz", None);
    scan(root, "sub-01/anat/sub-01_acq-x-y_T1w.nii.gz", None);

    let index = ScanIndex::build(root, &AppConfig::default(), None, &SilentReporter).unwrap();
    assert_eq!(index.scans.len(), 1);
    assert_eq!(index.malformed.len(), 2);
    assert!(index
        .malformed
        .iter()
        .all(|p| p.kind == ProblemKind::MalformedFilename));
}

#[test]
fn test_non_data_trees_are_skipped() {
    let tmp = tempdir().unwrap();
    let root = tmp.path();
    scan(root, "sub-01/anat/sub-01_T1w.nii.gz", None);
    scan(root, "derivatives/x/sub-01/anat/sub-01_T1w.nii.gz", None);
    scan(root, "sourcedata/sub-01/anat/sub-01_T1w.nii.gz", None);
    scan(root, "sub-01/anat/.hidden_T1w.nii.gz", None);

    let mut config = AppConfig::default();
    config.ignore_patterns = vec!["sub-02/**".to_string()];
    scan(root, "sub-02/anat/sub-02_T1w.nii.gz", None);

    let index = ScanIndex::build(root, &config, None, &SilentReporter).unwrap();
    let paths: Vec<PathBuf> = index.scans.iter().map(|s| s.path.clone()).collect();
    assert_eq!(paths, vec![PathBuf::from("sub-01/anat/sub-01_T1w.nii.gz")]);
}

#[test]
fn test_sessions_and_entities() {
    let tmp = tempdir().unwrap();
    let root = tmp.path();
    scan(root, "sub-01/ses-A/dwi/sub-01_ses-A_acq-multi_run-1_dwi.nii.gz", None);

    let index = ScanIndex::build(root, &AppConfig::default(), None, &SilentReporter).unwrap();
    let dwi = &index.scans[0];
    assert_eq!(dwi.subject, "01");
    assert_eq!(dwi.session.as_deref(), Some("A"));
    assert_eq!(dwi.datatype, "dwi");
    assert_eq!(dwi.suffix, "dwi");
    assert_eq!(dwi.entities.get("acq").map(String::as_str), Some("multi"));
    assert_eq!(dwi.entities.get("run").map(String::as_str), Some("1"));
    assert!(dwi.sidecar_path.is_none());
}
