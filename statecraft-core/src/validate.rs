//! Structural validation run before a machine starts.
//!
//! Reports the first defect found, walking states in document order and then
//! transitions in declaration order.

use crate::error::CoreError;
use crate::state::{ChildMode, StateId, StateKind};
use crate::tree::StateTree;

pub(crate) fn validate(tree: &StateTree) -> Result<(), CoreError> {
    let root = tree.root();
    if tree.node(root).children.is_empty() {
        return Err(CoreError::NoInitialState {
            state: tree.name(root).to_string(),
        });
    }

    let mut states: Vec<StateId> = tree.live_states().collect();
    tree.sort_document_order(&mut states);
    for s in states {
        validate_state(tree, s)?;
    }

    for t in tree.live_transitions() {
        let node = tree.transition(t);
        let from = tree.name(node.source);
        for target in &node.targets {
            if !tree.is_live(*target) {
                return Err(CoreError::DanglingTarget {
                    from_state: from.to_string(),
                    target: tree.name(*target).to_string(),
                });
            }
        }
        check_compatible(tree, from, &node.targets)?;
    }
    Ok(())
}

fn validate_state(tree: &StateTree, s: StateId) -> Result<(), CoreError> {
    let node = tree.node(s);
    match &node.kind {
        StateKind::Standard {
            child_mode,
            initial,
            error_state,
        } => {
            if *child_mode == ChildMode::Exclusive && !node.children.is_empty() {
                let Some(initial) = initial else {
                    return Err(CoreError::NoInitialState {
                        state: node.name.clone(),
                    });
                };
                if !tree.is_live(*initial) || tree.parent(*initial) != Some(s) {
                    return Err(CoreError::InvalidInitialState {
                        parent: node.name.clone(),
                        child: tree.name(*initial).to_string(),
                    });
                }
            }
            if let Some(target) = error_state {
                if !tree.is_live(*target) || *target == tree.root() {
                    return Err(CoreError::InvalidErrorState {
                        state: node.name.clone(),
                        target: tree.name(*target).to_string(),
                    });
                }
            }
        }
        StateKind::History {
            default_targets, ..
        } => {
            if default_targets.is_empty() {
                return Err(CoreError::MissingHistoryDefault {
                    history: node.name.clone(),
                });
            }
            let parent = tree.parent(s).unwrap_or(tree.root());
            for target in default_targets {
                if !tree.is_live(*target) || !tree.is_descendant(*target, parent) {
                    return Err(CoreError::InvalidHistoryDefault {
                        history: node.name.clone(),
                        parent: tree.name(parent).to_string(),
                        target: tree.name(*target).to_string(),
                    });
                }
            }
            check_compatible(tree, &node.name, default_targets)?;
        }
        StateKind::Final => {}
    }
    Ok(())
}

/// Rejects target lists that no single configuration can satisfy: one
/// target inside another, or two targets in different children of an
/// exclusive state. History targets stand for their parent.
pub(crate) fn check_compatible(
    tree: &StateTree,
    from: &str,
    targets: &[StateId],
) -> Result<(), CoreError> {
    let effective = |s: StateId| {
        if tree.node(s).kind.is_history() {
            tree.parent(s).unwrap_or(s)
        } else {
            s
        }
    };

    for (i, a) in targets.iter().enumerate() {
        for b in &targets[i + 1..] {
            if a == b {
                continue;
            }
            let (ea, eb) = (effective(*a), effective(*b));
            let conflict = if ea == eb || tree.is_descendant(ea, eb) || tree.is_descendant(eb, ea) {
                true
            } else {
                tree.find_lca(&[ea, eb])
                    .is_some_and(|lca| tree.child_mode(lca) != Some(ChildMode::Parallel))
            };
            if conflict {
                return Err(CoreError::ConflictingTargets {
                    from_state: from.to_string(),
                    first: tree.name(*a).to_string(),
                    second: tree.name(*b).to_string(),
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{HistoryType, MachineId};

    fn exclusive() -> StateKind {
        StateKind::standard(ChildMode::Exclusive)
    }

    fn set_initial(tree: &mut StateTree, parent: StateId, child: StateId) {
        if let StateKind::Standard { initial, .. } = &mut tree.node_mut(parent).kind {
            *initial = Some(child);
        }
    }

    #[test]
    fn test_empty_root_has_no_initial_state() {
        let tree = StateTree::new(MachineId::next(), "m".into());
        assert!(matches!(
            validate(&tree),
            Err(CoreError::NoInitialState { state }) if state == "m"
        ));
    }

    #[test]
    fn test_compound_requires_initial() {
        let mut tree = StateTree::new(MachineId::next(), "m".into());
        let root = tree.root();
        let a = tree.add(root, "a".into(), exclusive()).unwrap();
        tree.add(root, "b".into(), exclusive()).unwrap();
        assert!(matches!(
            validate(&tree),
            Err(CoreError::NoInitialState { state }) if state == "m"
        ));

        set_initial(&mut tree, root, a);
        assert!(validate(&tree).is_ok());
    }

    #[test]
    fn test_parallel_needs_no_initial() {
        let mut tree = StateTree::new(MachineId::next(), "m".into());
        let root = tree.root();
        let p = tree
            .add(root, "p".into(), StateKind::standard(ChildMode::Parallel))
            .unwrap();
        tree.add(p, "r1".into(), exclusive()).unwrap();
        tree.add(p, "r2".into(), exclusive()).unwrap();
        set_initial(&mut tree, root, p);
        assert!(validate(&tree).is_ok());
    }

    #[test]
    fn test_history_default_checks() {
        let mut tree = StateTree::new(MachineId::next(), "m".into());
        let root = tree.root();
        let p = tree.add(root, "p".into(), exclusive()).unwrap();
        let a = tree.add(p, "a".into(), exclusive()).unwrap();
        let outside = tree.add(root, "outside".into(), exclusive()).unwrap();
        set_initial(&mut tree, root, p);
        set_initial(&mut tree, p, a);
        let h = tree
            .add(
                p,
                "h".into(),
                StateKind::History {
                    history_type: HistoryType::Shallow,
                    default_targets: Vec::new(),
                    memory: Vec::new(),
                },
            )
            .unwrap();
        assert!(matches!(
            validate(&tree),
            Err(CoreError::MissingHistoryDefault { history }) if history == "h"
        ));

        if let StateKind::History {
            default_targets, ..
        } = &mut tree.node_mut(h).kind
        {
            default_targets.push(outside);
        }
        assert!(matches!(
            validate(&tree),
            Err(CoreError::InvalidHistoryDefault { .. })
        ));
    }

    #[test]
    fn test_conflicting_targets() {
        let mut tree = StateTree::new(MachineId::next(), "m".into());
        let root = tree.root();
        let a = tree.add(root, "a".into(), exclusive()).unwrap();
        let b = tree.add(root, "b".into(), exclusive()).unwrap();
        let p = tree
            .add(root, "p".into(), StateKind::standard(ChildMode::Parallel))
            .unwrap();
        let r1 = tree.add(p, "r1".into(), exclusive()).unwrap();
        let r2 = tree.add(p, "r2".into(), exclusive()).unwrap();

        assert!(check_compatible(&tree, "x", &[r1, r2]).is_ok());
        assert!(matches!(
            check_compatible(&tree, "x", &[a, b]),
            Err(CoreError::ConflictingTargets { first, second, .. }) if first == "a" && second == "b"
        ));
        assert!(check_compatible(&tree, "x", &[p, r1]).is_err());
    }
}
