//! Splitting one commit request into per-target commits.
//!
//! A handle may front nested working trees (submodules). Changes tagged with
//! a group are committed inside that nested tree first, in group order, so
//! the main tree's commit then records the updated nested pointers. The main
//! tree is always the last target. Only the main handle is ever synced.

use std::collections::BTreeSet;

use autocommit_core::{ChangeRecord, RepoHandle};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitTarget {
    pub handle: RepoHandle,
    /// `None` for the main tree.
    pub group: Option<String>,
}

impl CommitTarget {
    pub fn is_main(&self) -> bool {
        self.group.is_none()
    }
}

pub fn partition(repo: &RepoHandle, changes: &[ChangeRecord]) -> Vec<CommitTarget> {
    let groups: BTreeSet<&str> = changes.iter().filter_map(|c| c.group.as_deref()).collect();
    groups
        .into_iter()
        .map(|group| CommitTarget {
            handle: repo.nested(group),
            group: Some(group.to_string()),
        })
        .chain(std::iter::once(CommitTarget {
            handle: repo.clone(),
            group: None,
        }))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use autocommit_core::ChangeKind;

    #[test]
    fn plain_changes_yield_only_the_main_tree() {
        let repo = RepoHandle::new("/work/site");
        let targets = partition(&repo, &[ChangeRecord::new("a.txt", ChangeKind::Modified)]);
        assert_eq!(targets.len(), 1);
        assert!(targets[0].is_main());
        assert_eq!(targets[0].handle, repo);
    }

    #[test]
    fn nested_groups_come_first_in_order_and_once_each() {
        let repo = RepoHandle::new("/work/site");
        let changes = [
            ChangeRecord::new("themes/b", ChangeKind::Modified).in_group("themes/b"),
            ChangeRecord::new("index.md", ChangeKind::Modified),
            ChangeRecord::new("themes/a", ChangeKind::Modified).in_group("themes/a"),
            ChangeRecord::new("themes/a", ChangeKind::Untracked).in_group("themes/a"),
        ];
        let targets = partition(&repo, &changes);
        let groups: Vec<Option<&str>> = targets.iter().map(|t| t.group.as_deref()).collect();
        assert_eq!(groups, vec![Some("themes/a"), Some("themes/b"), None]);
        assert_eq!(targets[0].handle.root, repo.root.join("themes/a"));
    }
}
