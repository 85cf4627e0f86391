//! Change-list inversion and application
//!
//! `apply(left, &diff(left, right))` rebuilds `right` up to geometry, and
//! `invert` turns a left→right list into a right→left list.

use crate::error::{DomError, Result};
use crate::snapshot::*;

/// Swap the direction of a change list
pub fn invert(changes: &[Change]) -> Vec<Change> {
    changes.iter().map(invert_one).collect()
}

fn invert_one(change: &Change) -> Change {
    match &change.detail {
        ChangeDetail::Added { node } => Change {
            kind: ChangeType::REMOVE,
            node: change.node.clone(),
            origin: None,
            detail: ChangeDetail::Removed { node: node.clone() },
        },
        ChangeDetail::Removed { node } => Change {
            kind: ChangeType::ADD,
            node: change.node.clone(),
            origin: None,
            detail: ChangeDetail::Added { node: node.clone() },
        },
        ChangeDetail::Text { before, after } => Change {
            kind: change.kind,
            node: change.origin.clone().unwrap_or_else(|| change.node.clone()),
            origin: Some(change.node.clone()),
            detail: ChangeDetail::Text {
                before: after.clone(),
                after: before.clone(),
            },
        },
        ChangeDetail::Style {
            property,
            before,
            after,
        } => Change {
            kind: change.kind,
            node: change.origin.clone().unwrap_or_else(|| change.node.clone()),
            origin: Some(change.node.clone()),
            detail: ChangeDetail::Style {
                property: property.clone(),
                before: after.clone(),
                after: before.clone(),
            },
        },
    }
}

/// Apply a change list produced against `base`.
///
/// Removals run deepest-last-first on left paths, additions in ascending
/// right-path order, then text and style edits on right paths.
pub fn apply(base: &SnapshotTree, changes: &[Change]) -> Result<SnapshotTree> {
    let mut root = Some(base.root.clone());

    let mut removals: Vec<&NodePath> = changes
        .iter()
        .filter(|c| matches!(c.detail, ChangeDetail::Removed { .. }))
        .map(|c| &c.node.path)
        .collect();
    removals.sort_unstable_by(|a, b| b.cmp(a));
    for path in removals {
        remove_at(&mut root, path)?;
    }

    let mut additions: Vec<(&NodePath, &SnapshotNode)> = changes
        .iter()
        .filter_map(|c| match &c.detail {
            ChangeDetail::Added { node } => Some((&c.node.path, node)),
            _ => None,
        })
        .collect();
    additions.sort_by(|a, b| a.0.cmp(b.0));
    for (path, node) in additions {
        insert_at(&mut root, path, node.clone())?;
    }

    let mut root = root.ok_or_else(|| invalid(&[], "change list removes the root"))?;

    for change in changes {
        match &change.detail {
            ChangeDetail::Text { after, .. } => {
                let node = resolve(&mut root, &change.node.path)?;
                node.text = after.clone();
            }
            ChangeDetail::Style {
                property, after, ..
            } => {
                let node = resolve(&mut root, &change.node.path)?;
                match after {
                    Some(value) => {
                        node.style.insert(property.clone(), value.clone());
                    }
                    None => {
                        node.style.remove(property);
                    }
                }
            }
            ChangeDetail::Added { .. } | ChangeDetail::Removed { .. } => {}
        }
    }

    Ok(SnapshotTree {
        version: base.version,
        root,
        rect: base.rect,
        meta: base.meta.clone(),
    })
}

fn invalid(path: &[usize], reason: &str) -> DomError {
    DomError::InvalidPath {
        path: path.to_vec(),
        reason: reason.to_string(),
    }
}

fn resolve<'a>(root: &'a mut SnapshotNode, path: &[usize]) -> Result<&'a mut SnapshotNode> {
    root.at_path_mut(path)
        .ok_or_else(|| invalid(path, "no node at path"))
}

fn remove_at(root: &mut Option<SnapshotNode>, path: &[usize]) -> Result<()> {
    let Some((&index, parent_path)) = path.split_last() else {
        return match root.take() {
            Some(_) => Ok(()),
            None => Err(invalid(path, "root already removed")),
        };
    };
    let tree = root
        .as_mut()
        .ok_or_else(|| invalid(path, "root was removed"))?;
    let parent = resolve(tree, parent_path)?;
    if index >= parent.children.len() {
        return Err(invalid(path, "child index out of range"));
    }
    parent.children.remove(index);
    Ok(())
}

fn insert_at(root: &mut Option<SnapshotNode>, path: &[usize], node: SnapshotNode) -> Result<()> {
    let Some((&index, parent_path)) = path.split_last() else {
        return match root {
            Some(_) => Err(invalid(path, "root is still present")),
            None => {
                *root = Some(node);
                Ok(())
            }
        };
    };
    let tree = root
        .as_mut()
        .ok_or_else(|| invalid(path, "root was removed"))?;
    let parent = resolve(tree, parent_path)?;
    if index > parent.children.len() {
        return Err(invalid(path, "child index out of range"));
    }
    parent.children.insert(index, node);
    Ok(())
}
