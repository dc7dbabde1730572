mod common;

use pretty_assertions::assert_eq;
use serde_json::json;
use std::fs;
use std::path::Path;
use tempfile::tempdir;

use bids_curate_core::grouping::config::{CompareKind, DatatypeFields, FieldSpec, GroupingDocument};
use bids_curate_core::{AcqGroupLevel, AppConfig, CurationEngine, GroupingConfig, ParamGroupRef};

use common::{engine, scan};

fn two_bold_runs(root: &Path) {
    scan(
        root,
        "sub-01/func/sub-01_task-rest_bold.nii.gz",
        Some(json!({"RepetitionTime": 2.0, "EchoTime": 0.03, "FlipAngle": 70})),
    );
    scan(
        root,
        "sub-02/func/sub-02_task-rest_bold.nii.gz",
        Some(json!({"RepetitionTime": 2.0004, "EchoTime": 0.03, "FlipAngle": 70})),
    );
}

fn func_tolerance(rel_tol: f64) -> GroupingConfig {
    let mut document = GroupingDocument::default();
    document.datatypes.insert(
        "func".to_string(),
        DatatypeFields {
            fields: None,
            extra_fields: vec![FieldSpec {
                name: "RepetitionTime".to_string(),
                compare: CompareKind::Numeric,
                rel_tol: Some(rel_tol),
                abs_tol: None,
            }],
        },
    );
    GroupingConfig::from_document(&document).unwrap()
}

#[test]
fn test_tolerance_decides_parameter_groups() {
    let tmp = tempdir().unwrap();
    let root = tmp.path();
    two_bold_runs(root);

    let loose = engine(root).group().unwrap();
    assert_eq!(loose.grouping.param_groups.len(), 1);
    assert_eq!(loose.grouping.param_groups[0].len(), 2);

    let tight = CurationEngine::new(root, AppConfig::default(), func_tolerance(1e-6))
        .group()
        .unwrap();
    assert_eq!(tight.grouping.param_groups.len(), 2);
    assert_eq!(tight.grouping.param_groups[0].id, 0);
    assert!(tight.grouping.param_groups[0].dominant);
    assert!(!tight.grouping.param_groups[1].dominant);
}

#[test]
fn test_grouping_config_loads_from_toml() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("grouping.toml");
    fs::write(
        &path,
        "[tolerance]\nrel_tol = 0.001\n\n[datatypes.func]\nextra_fields = [{ name = \"RepetitionTime\", rel_tol = 1e-6 }]\n",
    )
    .unwrap();
    let config = GroupingConfig::load(Some(path.as_path())).unwrap();
    assert!(config.fields_for("func").iter().any(|c| c.name == "RepetitionTime"));

    fs::write(&path, "[tolerance]\nrel_tol = -1.0\n").unwrap();
    assert!(GroupingConfig::load(Some(path.as_path())).is_err());
}

#[test]
fn test_tables_are_deterministic() {
    let tmp = tempdir().unwrap();
    let root = tmp.path();
    two_bold_runs(root);
    scan(root, "sub-01/anat/sub-01_T1w.nii.gz", Some(json!({"EchoTime": 0.003})));
    scan(root, "sub-02/anat/sub-02_T1w.nii.gz", Some(json!({"EchoTime": 0.005})));

    let first = engine(root).group().unwrap().tables;
    let second = engine(root).group().unwrap().tables;
    assert_eq!(
        String::from_utf8(first.summary_bytes().unwrap()).unwrap(),
        String::from_utf8(second.summary_bytes().unwrap()).unwrap()
    );
    assert_eq!(first.files_bytes().unwrap(), second.files_bytes().unwrap());
    assert_eq!(first.acq_grouping_bytes().unwrap(), second.acq_grouping_bytes().unwrap());
}

#[test]
fn test_counts_are_conserved() {
    let tmp = tempdir().unwrap();
    let root = tmp.path();
    two_bold_runs(root);
    scan(root, "sub-01/anat/sub-01_T1w.nii.gz", Some(json!({"EchoTime": 0.003})));
    scan(root, "sub-02/anat/sub-02_T1w.nii.gz", Some(json!({"EchoTime": 0.005})));
    scan(root, "sub-03/anat/sub-03_T1w.nii.gz", Some(json!({"EchoTime": 0.005})));

    let result = engine(root).group().unwrap();
    let counted: usize = result.tables.summary.iter().map(|r| r.count).sum();
    assert_eq!(counted, result.index.scans.len());
    assert_eq!(result.tables.files.len(), result.index.scans.len());

    // The larger T1w cluster ranks first even though it was opened second.
    let t1w: Vec<(usize, usize)> = result
        .tables
        .summary
        .iter()
        .filter(|r| r.group.label.as_str() == "datatype-anat_suffix-T1w")
        .map(|r| (r.group.id, r.count))
        .collect();
    assert_eq!(t1w, vec![(0, 2), (1, 1)]);
}

#[test]
fn test_write_tables_under_output_dir() {
    let tmp = tempdir().unwrap();
    let root = tmp.path();
    two_bold_runs(root);

    let (_, paths) = engine(root).write_tables(Path::new("v1")).unwrap();
    assert_eq!(paths.summary, root.join("code/curation/v1_summary.tsv"));
    assert!(paths.files.is_file());
    assert!(paths.acq_grouping.is_file());
    assert!(paths.acq_group_info.is_file());

    let summary = fs::read_to_string(&paths.summary).unwrap();
    let header = summary.lines().next().unwrap();
    assert!(header.starts_with("KeyGroup\tParamGroup\tDominant\tCount\t"));
    assert!(header.ends_with("\tMergeInto\tRenameKeyGroup"));

    // Written tables live under code/ and do not show up as scans.
    assert_eq!(engine(root).index().unwrap().scans.len(), 2);
}

#[test]
fn test_acquisition_groups_by_session() {
    let tmp = tempdir().unwrap();
    let root = tmp.path();
    scan(root, "sub-01/ses-A/anat/sub-01_ses-A_T1w.nii.gz", Some(json!({"EchoTime": 0.003})));
    scan(root, "sub-01/ses-B/anat/sub-01_ses-B_T1w.nii.gz", Some(json!({"EchoTime": 0.003})));
    scan(root, "sub-01/ses-B/func/sub-01_ses-B_task-rest_bold.nii.gz", Some(json!({"RepetitionTime": 2.0})));
    scan(root, "sub-02/ses-A/anat/sub-02_ses-A_T1w.nii.gz", Some(json!({"EchoTime": 0.003})));

    let result = engine(root).group().unwrap();
    let by_session = result.grouping.acquisition_groups(&result.index, AcqGroupLevel::Session);
    assert_eq!(by_session.groups.len(), 2);
    assert_eq!(by_session.groups[0].members.len(), 2);
    let t1w: ParamGroupRef = "datatype-anat_suffix-T1w:0".parse().unwrap();
    assert!(by_session.groups[0].pattern.contains(&t1w));
    assert_eq!(by_session.groups[0].pattern.len(), 1);

    let by_subject = result.grouping.acquisition_groups(&result.index, AcqGroupLevel::Subject);
    assert_eq!(by_subject.groups.len(), 2);
    assert_eq!(by_subject.groups[0].members.len(), 1);
}
