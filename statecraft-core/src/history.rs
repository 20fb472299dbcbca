//! History capture and restore.

use crate::state::{HistoryType, StateId, StateKind};
use crate::tree::StateTree;
use std::collections::BTreeSet;

/// Records, for every history child of `state`, what is active beneath it.
///
/// Must run while `configuration` still holds the states being exited.
pub(crate) fn record(tree: &mut StateTree, configuration: &BTreeSet<StateId>, state: StateId) {
    let histories = tree.node(state).history.clone();
    for h in histories {
        let history_type = match tree.node(h).kind {
            StateKind::History { history_type, .. } => history_type,
            _ => continue,
        };
        let mut remembered: Vec<StateId> = configuration
            .iter()
            .copied()
            .filter(|s| match history_type {
                HistoryType::Deep => tree.is_atomic(*s) && tree.is_descendant(*s, state),
                HistoryType::Shallow => tree.parent(*s) == Some(state),
            })
            .collect();
        tree.sort_document_order(&mut remembered);

        tracing::debug!(
            "recorded {:?} history for {} in {}: {:?}",
            history_type,
            tree.name(state),
            tree.name(h),
            remembered
                .iter()
                .map(|s| tree.name(*s))
                .collect::<Vec<_>>()
        );
        if let StateKind::History { memory, .. } = &mut tree.node_mut(h).kind {
            *memory = remembered;
        }
    }
}

/// States a transition into history state `h` actually enters: the memory
/// when non-empty, otherwise the default targets.
pub(crate) fn targets(tree: &StateTree, h: StateId) -> Vec<StateId> {
    match &tree.node(h).kind {
        StateKind::History {
            memory,
            default_targets,
            ..
        } => {
            if memory.is_empty() {
                default_targets.clone()
            } else {
                memory.clone()
            }
        }
        _ => Vec::new(),
    }
}

pub(crate) fn clear_all(tree: &mut StateTree) {
    for node in tree.states.iter_mut() {
        if let StateKind::History { memory, .. } = &mut node.kind {
            memory.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{ChildMode, MachineId};

    fn history(history_type: HistoryType) -> StateKind {
        StateKind::History {
            history_type,
            default_targets: Vec::new(),
            memory: Vec::new(),
        }
    }

    #[test]
    fn test_shallow_and_deep_capture() {
        let mut tree = StateTree::new(MachineId::next(), "root".into());
        let root = tree.root();
        let standard = || StateKind::standard(ChildMode::Exclusive);
        let p = tree.add(root, "p".into(), standard()).unwrap();
        let a = tree.add(p, "a".into(), standard()).unwrap();
        let a1 = tree.add(a, "a1".into(), standard()).unwrap();
        let shallow = tree.add(p, "hs".into(), history(HistoryType::Shallow)).unwrap();
        let deep = tree.add(p, "hd".into(), history(HistoryType::Deep)).unwrap();

        let config: BTreeSet<StateId> = [p, a, a1].into_iter().collect();
        record(&mut tree, &config, p);

        assert_eq!(targets(&tree, shallow), vec![a]);
        assert_eq!(targets(&tree, deep), vec![a1]);

        clear_all(&mut tree);
        assert!(targets(&tree, shallow).is_empty());
    }

    #[test]
    fn test_default_used_without_memory() {
        let mut tree = StateTree::new(MachineId::next(), "root".into());
        let root = tree.root();
        let p = tree
            .add(root, "p".into(), StateKind::standard(ChildMode::Exclusive))
            .unwrap();
        let a = tree
            .add(p, "a".into(), StateKind::standard(ChildMode::Exclusive))
            .unwrap();
        let h = tree.add(p, "h".into(), history(HistoryType::Shallow)).unwrap();
        if let StateKind::History {
            default_targets, ..
        } = &mut tree.node_mut(h).kind
        {
            default_targets.push(a);
        }
        assert_eq!(targets(&tree, h), vec![a]);
    }
}
