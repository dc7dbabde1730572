use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use super::ParamGroupRef;
use crate::config::AcqGroupLevel;

/// Row key of the AcquisitionGrouping table.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AcqKey {
    pub subject: String,
    /// Always `None` at subject level.
    pub session: Option<String>,
}

impl fmt::Display for AcqKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.session {
            Some(ses) => write!(f, "sub-{}/ses-{}", self.subject, ses),
            None => write!(f, "sub-{}", self.subject),
        }
    }
}

/// Subjects (or sessions) sharing the exact same set of parameter groups.
#[derive(Debug, Clone)]
pub struct AcqGroup {
    /// 0 is the most common pattern.
    pub id: usize,
    pub pattern: BTreeSet<ParamGroupRef>,
    pub members: Vec<AcqKey>,
}

#[derive(Debug, Clone)]
pub struct AcquisitionGrouping {
    pub level: AcqGroupLevel,
    pub presence: BTreeMap<AcqKey, BTreeSet<ParamGroupRef>>,
    pub groups: Vec<AcqGroup>,
}

impl AcquisitionGrouping {
    pub fn build<'a, I>(level: AcqGroupLevel, observations: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, Option<&'a str>, ParamGroupRef)>,
    {
        let mut presence: BTreeMap<AcqKey, BTreeSet<ParamGroupRef>> = BTreeMap::new();
        for (subject, session, group) in observations {
            let key = AcqKey {
                subject: subject.to_string(),
                session: match level {
                    AcqGroupLevel::Subject => None,
                    AcqGroupLevel::Session => session.map(str::to_string),
                },
            };
            presence.entry(key).or_default().insert(group);
        }

        let mut groups: Vec<AcqGroup> = Vec::new();
        for (key, pattern) in &presence {
            match groups.iter_mut().find(|g| &g.pattern == pattern) {
                Some(group) => group.members.push(key.clone()),
                None => groups.push(AcqGroup {
                    id: 0,
                    pattern: pattern.clone(),
                    members: vec![key.clone()],
                }),
            }
        }
        groups.sort_by(|a, b| b.members.len().cmp(&a.members.len()));
        for (id, group) in groups.iter_mut().enumerate() {
            group.id = id;
        }

        Self {
            level,
            presence,
            groups,
        }
    }

    /// Every parameter group seen anywhere, in column order.
    pub fn columns(&self) -> BTreeSet<ParamGroupRef> {
        self.presence.values().flatten().cloned().collect()
    }

    pub fn group_of(&self, key: &AcqKey) -> Option<&AcqGroup> {
        self.groups.iter().find(|g| g.members.contains(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grouping::key_group::KeyGroupLabel;
    use std::collections::BTreeMap as Map;

    fn pg(suffix: &str, id: usize) -> ParamGroupRef {
        ParamGroupRef {
            label: KeyGroupLabel::from_parts("anat", suffix, &Map::new()),
            id,
        }
    }

    #[test]
    fn test_patterns_ranked_by_size() {
        let obs = vec![
            ("01", Some("A"), pg("T1w", 0)),
            ("01", Some("B"), pg("T2w", 0)),
            ("02", Some("A"), pg("T1w", 1)),
            ("03", Some("A"), pg("T1w", 1)),
        ];
        let grouping = AcquisitionGrouping::build(AcqGroupLevel::Subject, obs);
        assert_eq!(grouping.presence.len(), 3);
        assert_eq!(grouping.groups.len(), 2);
        assert_eq!(grouping.groups[0].members.len(), 2);
        assert_eq!(grouping.groups[0].members[0].subject, "02");
        assert_eq!(grouping.groups[1].pattern.len(), 2);
        assert_eq!(grouping.columns().len(), 3);
    }

    #[test]
    fn test_session_level_splits_rows() {
        let obs = vec![
            ("01", Some("A"), pg("T1w", 0)),
            ("01", Some("B"), pg("T1w", 0)),
        ];
        let grouping = AcquisitionGrouping::build(AcqGroupLevel::Session, obs);
        assert_eq!(grouping.presence.len(), 2);
        assert_eq!(grouping.groups.len(), 1);
        let key = AcqKey {
            subject: "01".to_string(),
            session: Some("B".to_string()),
        };
        assert_eq!(key.to_string(), "sub-01/ses-B");
        assert_eq!(grouping.group_of(&key).map(|g| g.id), Some(0));
    }
}
