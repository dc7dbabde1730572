use serde_json::Value;
use std::collections::BTreeMap;

use super::config::Comparator;
use super::key_group::{KeyGroup, KeyGroupLabel};
use crate::index::ScanFile;

/// A cluster of scans inside one KeyGroup whose configured fields all match
/// the cluster's representative.
///
/// Groups are rebuilt on every index pass and never carry edits. The rename
/// target set by a `RenameKeyGroup` cell is held in
/// [`Directive::rename`](crate::apply::Directive), keyed by the group's
/// [`ParamGroupRef`](crate::grouping::ParamGroupRef) while a plan is built.
#[derive(Debug, Clone)]
pub struct ParameterGroup {
    pub key_group: KeyGroupLabel,
    /// 0 is the most populous group of its KeyGroup.
    pub id: usize,
    /// Index of the scan that opened the cluster.
    pub representative: usize,
    /// Representative values of the configured fields; `None` when absent.
    pub parameters: BTreeMap<String, Option<Value>>,
    /// Scan indices in walk order.
    pub members: Vec<usize>,
    pub dominant: bool,
}

impl ParameterGroup {
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

fn vectors_match(fields: &[Comparator], scan: &ScanFile, rep: &ScanFile) -> bool {
    fields
        .iter()
        .all(|c| c.matches(scan.field(&c.name), rep.field(&c.name)))
}

/// Greedy single-pass clustering of one KeyGroup.
///
/// Each scan, in walk order, joins the first existing cluster whose
/// representative matches on every field, else it opens a new cluster.
/// Members are only ever compared to the representative, never to each
/// other. Ids are then ranked by descending size; ties keep the order in
/// which the clusters were opened.
pub fn cluster_key_group(
    key_group: &KeyGroup,
    scans: &[ScanFile],
    fields: &[Comparator],
) -> Vec<ParameterGroup> {
    let mut clusters: Vec<(usize, Vec<usize>)> = Vec::new();
    for &idx in &key_group.members {
        let scan = &scans[idx];
        match clusters
            .iter_mut()
            .find(|(rep, _)| vectors_match(fields, scan, &scans[*rep]))
        {
            Some((_, members)) => members.push(idx),
            None => clusters.push((idx, vec![idx])),
        }
    }

    // Stable sort keeps opening order among equal sizes.
    clusters.sort_by(|a, b| b.1.len().cmp(&a.1.len()));

    clusters
        .into_iter()
        .enumerate()
        .map(|(id, (rep, members))| {
            let parameters = fields
                .iter()
                .map(|c| (c.name.clone(), scans[rep].field(&c.name).cloned()))
                .collect();
            ParameterGroup {
                key_group: key_group.label.clone(),
                id,
                representative: rep,
                parameters,
                members,
                dominant: id == 0,
            }
        })
        .collect()
}
