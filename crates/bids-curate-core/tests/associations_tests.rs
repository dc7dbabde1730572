mod common;

use pretty_assertions::assert_eq;
use serde_json::json;
use std::fs;
use std::path::PathBuf;
use tempfile::tempdir;

use bids_curate_core::associations::{associated_files, purge, read_scan_list};
use bids_curate_core::AppConfig;

use common::{engine, read_json, scan, write};

#[test]
fn test_associated_files_by_stem() {
    let tmp = tempdir().unwrap();
    let root = tmp.path();
    scan(root, "sub-01/func/sub-01_task-rest_bold.nii.gz", Some(json!({"RepetitionTime": 2.0})));
    write(root, "sub-01/func/sub-01_task-rest_events.tsv", "onset\n");
    write(root, "sub-01/func/sub-01_task-rest_physio.tsv.gz", "");
    write(root, "sub-01/func/sub-01_task-other_events.tsv", "onset\n");

    let index = engine(root).index().unwrap();
    let found = associated_files(root, &index.scans[0]);
    assert_eq!(
        found,
        vec![
            PathBuf::from("sub-01/func/sub-01_task-rest_bold.json"),
            PathBuf::from("sub-01/func/sub-01_task-rest_events.tsv"),
            PathBuf::from("sub-01/func/sub-01_task-rest_physio.tsv.gz"),
        ]
    );
}

#[test]
fn test_purge_drops_linkage_only() {
    let tmp = tempdir().unwrap();
    let root = tmp.path();
    scan(root, "sub-01/func/sub-01_task-rest_bold.nii.gz", Some(json!({"RepetitionTime": 2.0})));
    scan(root, "sub-01/func/sub-01_task-nback_bold.nii.gz", Some(json!({"RepetitionTime": 2.0})));
    scan(
        root,
        "sub-01/fmap/sub-01_dir-AP_epi.nii.gz",
        Some(json!({
            "EchoTime": 0.05,
            "IntendedFor": [
                "func/sub-01_task-rest_bold.nii.gz",
                "bids::sub-01/func/sub-01_task-nback_bold.nii.gz"
            ]
        })),
    );
    write(
        root,
        "sub-01/sub-01_scans.tsv",
        "filename\tacq_time\n\
         func/sub-01_task-rest_bold.nii.gz\t2020-01-01T10:00:00\n\
         func/sub-01_task-nback_bold.nii.gz\t2020-01-01T10:30:00\n",
    );
    let sidecar_before = fs::read(root.join("sub-01/func/sub-01_task-rest_bold.json")).unwrap();

    let report = purge(
        root,
        &AppConfig::default(),
        &[PathBuf::from("sub-01/func/sub-01_task-rest_bold.nii.gz")],
    )
    .unwrap();

    assert_eq!(report.entries_removed, 2);
    assert_eq!(report.files_changed.len(), 2);
    assert!(root.join("sub-01/func/sub-01_task-rest_bold.nii.gz").is_file());
    assert_eq!(
        fs::read(root.join("sub-01/func/sub-01_task-rest_bold.json")).unwrap(),
        sidecar_before
    );
    assert_eq!(
        read_json(root, "sub-01/fmap/sub-01_dir-AP_epi.json")["IntendedFor"],
        json!(["bids::sub-01/func/sub-01_task-nback_bold.nii.gz"])
    );
    let scans = fs::read_to_string(root.join("sub-01/sub-01_scans.tsv")).unwrap();
    assert!(!scans.contains("task-rest"));
    assert!(scans.contains("func/sub-01_task-nback_bold.nii.gz"));
}

#[test]
fn test_purge_through_engine_reads_scan_list() {
    let tmp = tempdir().unwrap();
    let root = tmp.path();
    scan(root, "sub-01/func/sub-01_task-rest_bold.nii.gz", Some(json!({"RepetitionTime": 2.0})));
    scan(
        root,
        "sub-01/fmap/sub-01_dir-AP_epi.nii.gz",
        Some(json!({"IntendedFor": "func/sub-01_task-rest_bold.nii.gz"})),
    );
    let list = tmp.path().join("code/purge.txt");
    write(
        root,
        "code/purge.txt",
        &format!("{}\n\n", root.join("sub-01/func/sub-01_task-rest_bold.nii.gz").display()),
    );

    let scans = read_scan_list(root, &list).unwrap();
    assert_eq!(scans, vec![PathBuf::from("sub-01/func/sub-01_task-rest_bold.nii.gz")]);

    let report = engine(root).purge(&list).unwrap();
    assert_eq!(report.entries_removed, 1);
    let fmap = read_json(root, "sub-01/fmap/sub-01_dir-AP_epi.json");
    assert!(fmap.get("IntendedFor").is_none());
}
