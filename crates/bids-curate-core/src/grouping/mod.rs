//! KeyGroup classification and ParameterGroup clustering over a [`ScanIndex`].

pub mod acquisition;
pub mod cluster;
pub mod config;
pub mod key_group;

pub use acquisition::{AcqGroup, AcqKey, AcquisitionGrouping};
pub use cluster::ParameterGroup;
pub use config::{Comparator, GroupingConfig, GroupingDocument};
pub use key_group::{KeyGroup, KeyGroupLabel};

use std::fmt;
use std::str::FromStr;
use std::time::Instant;
use tracing::{debug, info};

use crate::config::AcqGroupLevel;
use crate::index::ScanIndex;
use crate::progress::ProgressReporter;

/// `<KeyGroup label>:<id>`, the identity of a ParameterGroup in tables.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ParamGroupRef {
    pub label: KeyGroupLabel,
    pub id: usize,
}

impl fmt::Display for ParamGroupRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.label, self.id)
    }
}

impl FromStr for ParamGroupRef {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (label, id) = s
            .trim()
            .rsplit_once(':')
            .ok_or_else(|| format!("'{}' is not of the form <label>:<id>", s))?;
        let id = id
            .trim()
            .parse::<usize>()
            .map_err(|_| format!("'{}' is not a parameter group id", id))?;
        let (label, _) = KeyGroupLabel::parse(label)?;
        Ok(Self { label, id })
    }
}

/// One generation of groups computed from an index.
#[derive(Debug, Clone)]
pub struct Grouping {
    pub key_groups: Vec<KeyGroup>,
    /// Ordered by KeyGroup label, then id.
    pub param_groups: Vec<ParameterGroup>,
    /// Scan index to position in `param_groups`.
    assignment: Vec<usize>,
}

impl Grouping {
    pub fn build(index: &ScanIndex, config: &GroupingConfig, reporter: &dyn ProgressReporter) -> Self {
        let start = Instant::now();
        let key_groups = key_group::classify(&index.scans);

        let mut param_groups = Vec::new();
        for kg in &key_groups {
            let fields = config.fields_for(&kg.datatype);
            let clustered = cluster::cluster_key_group(kg, &index.scans, fields);
            debug!(
                "{}: {} scans in {} parameter groups",
                kg.label,
                kg.members.len(),
                clustered.len()
            );
            param_groups.extend(clustered);
        }

        let mut assignment = vec![0; index.scans.len()];
        for (pos, group) in param_groups.iter().enumerate() {
            for &member in &group.members {
                assignment[member] = pos;
            }
        }

        let elapsed = start.elapsed().as_secs_f64();
        reporter.on_grouping_complete(key_groups.len(), param_groups.len(), elapsed);
        info!(
            "Found {} key groups and {} parameter groups in {:.2}s",
            key_groups.len(),
            param_groups.len(),
            elapsed
        );

        Self {
            key_groups,
            param_groups,
            assignment,
        }
    }

    pub fn find(&self, group: &ParamGroupRef) -> Option<&ParameterGroup> {
        self.param_groups
            .iter()
            .find(|g| g.key_group == group.label && g.id == group.id)
    }

    pub fn key_group(&self, label: &KeyGroupLabel) -> Option<&KeyGroup> {
        self.key_groups.iter().find(|kg| &kg.label == label)
    }

    pub fn param_group_of(&self, scan: usize) -> &ParameterGroup {
        &self.param_groups[self.assignment[scan]]
    }

    pub fn ref_of(&self, scan: usize) -> ParamGroupRef {
        let group = self.param_group_of(scan);
        ParamGroupRef {
            label: group.key_group.clone(),
            id: group.id,
        }
    }

    pub fn acquisition_groups(&self, index: &ScanIndex, level: AcqGroupLevel) -> AcquisitionGrouping {
        AcquisitionGrouping::build(
            level,
            index.scans.iter().enumerate().map(|(idx, scan)| {
                (scan.subject.as_str(), scan.session.as_deref(), self.ref_of(idx))
            }),
        )
    }
}
