//! The state arena and structural queries over it.

use crate::error::CoreError;
use crate::state::{ChildMode, MachineId, StateId, StateKind, StateNode};
use crate::transition::{TransitionId, TransitionNode};

const ROOT_INDEX: usize = 0;

/// Owns every state and transition of one machine.
///
/// Nodes are never physically removed; removal sets a tombstone so ids stay
/// stable. Live children lists never contain tombstoned nodes.
#[derive(Debug)]
pub(crate) struct StateTree {
    machine: MachineId,
    pub(crate) states: Vec<StateNode>,
    pub(crate) transitions: Vec<TransitionNode>,
    /// Pre-order position of each state, indexed by arena slot.
    rank: Vec<usize>,
}

impl StateTree {
    pub(crate) fn new(machine: MachineId, root_name: String) -> Self {
        let root = StateNode::new(root_name, None, StateKind::standard(ChildMode::Exclusive));
        Self {
            machine,
            states: vec![root],
            transitions: Vec::new(),
            rank: vec![0],
        }
    }

    pub(crate) fn machine(&self) -> MachineId {
        self.machine
    }

    pub(crate) fn root(&self) -> StateId {
        StateId::new(self.machine, ROOT_INDEX)
    }

    /// Fails unless `id` names a live state of this machine.
    pub(crate) fn check(&self, id: StateId) -> Result<(), CoreError> {
        if id.machine() != self.machine {
            return Err(CoreError::ForeignState {
                state: id.to_string(),
            });
        }
        match self.states.get(id.index()) {
            Some(node) if !node.removed => Ok(()),
            _ => Err(CoreError::UnknownState {
                state: id.to_string(),
            }),
        }
    }

    pub(crate) fn check_transition(&self, id: TransitionId) -> Result<(), CoreError> {
        let live = id.machine() == self.machine
            && self
                .transitions
                .get(id.index())
                .is_some_and(|t| !t.removed);
        if live {
            Ok(())
        } else {
            Err(CoreError::UnknownTransition {
                transition: id.to_string(),
            })
        }
    }

    pub(crate) fn is_live(&self, id: StateId) -> bool {
        self.check(id).is_ok()
    }

    pub(crate) fn node(&self, id: StateId) -> &StateNode {
        &self.states[id.index()]
    }

    pub(crate) fn node_mut(&mut self, id: StateId) -> &mut StateNode {
        &mut self.states[id.index()]
    }

    pub(crate) fn transition(&self, id: TransitionId) -> &TransitionNode {
        &self.transitions[id.index()]
    }

    pub(crate) fn transition_mut(&mut self, id: TransitionId) -> &mut TransitionNode {
        &mut self.transitions[id.index()]
    }

    pub(crate) fn name(&self, id: StateId) -> &str {
        &self.node(id).name
    }

    pub(crate) fn parent(&self, id: StateId) -> Option<StateId> {
        self.node(id).parent
    }

    pub(crate) fn find(&self, name: &str) -> Option<StateId> {
        self.states
            .iter()
            .position(|n| !n.removed && n.name == name)
            .map(|i| StateId::new(self.machine, i))
    }

    pub(crate) fn live_states(&self) -> impl Iterator<Item = StateId> + '_ {
        self.states
            .iter()
            .enumerate()
            .filter(|(_, n)| !n.removed)
            .map(move |(i, _)| StateId::new(self.machine, i))
    }

    pub(crate) fn live_transitions(&self) -> impl Iterator<Item = TransitionId> + '_ {
        self.transitions
            .iter()
            .enumerate()
            .filter(|(_, t)| !t.removed)
            .map(move |(i, _)| TransitionId::new(self.machine, i))
    }

    /// Attaches a new node under `parent`.
    pub(crate) fn add(
        &mut self,
        parent: StateId,
        name: String,
        kind: StateKind,
    ) -> Result<StateId, CoreError> {
        self.check(parent)?;
        if !self.node(parent).kind.is_standard() {
            return Err(CoreError::InvalidParent {
                parent: self.name(parent).to_string(),
            });
        }
        if self.find(&name).is_some() {
            return Err(CoreError::DuplicateState { state: name });
        }

        let id = StateId::new(self.machine, self.states.len());
        let is_history = kind.is_history();
        self.states.push(StateNode::new(name, Some(parent), kind));
        let parent_node = self.node_mut(parent);
        if is_history {
            parent_node.history.push(id);
        } else {
            parent_node.children.push(id);
        }
        self.reindex();
        Ok(id)
    }

    pub(crate) fn add_transition(&mut self, node: TransitionNode) -> TransitionId {
        let id = TransitionId::new(self.machine, self.transitions.len());
        let source = node.source;
        self.transitions.push(node);
        self.node_mut(source).transitions.push(id);
        id
    }

    pub(crate) fn remove_transition(&mut self, id: TransitionId) {
        let source = self.transition(id).source;
        self.node_mut(source).transitions.retain(|t| *t != id);
        let t = self.transition_mut(id);
        t.removed = true;
        t.on_transition = None;
        t.observers.clear();
    }

    /// Tombstones `id` and its subtree. Returns the removed states.
    pub(crate) fn remove_subtree(&mut self, id: StateId) -> Vec<StateId> {
        let mut removed = Vec::new();
        let mut stack = vec![id];
        while let Some(s) = stack.pop() {
            let node = self.node(s);
            stack.extend(node.children.iter().copied());
            stack.extend(node.history.iter().copied());
            removed.push(s);
        }

        for &s in &removed {
            let owned: Vec<TransitionId> = self.node(s).transitions.clone();
            for t in owned {
                self.remove_transition(t);
            }
            let node = self.node_mut(s);
            node.removed = true;
            node.on_entry = None;
            node.on_exit = None;
            node.observers.clear();
        }

        if let Some(parent) = self.parent(id) {
            let node = self.node_mut(parent);
            node.children.retain(|c| *c != id);
            node.history.retain(|c| *c != id);
            if let StateKind::Standard { initial, .. } = &mut node.kind {
                if *initial == Some(id) {
                    *initial = None;
                }
            }
        }
        self.reindex();
        removed
    }

    /// Recomputes document order: a pre-order walk from the root, children
    /// in declaration order, history children last.
    pub(crate) fn reindex(&mut self) {
        let mut rank = vec![usize::MAX; self.states.len()];
        let mut next = 0;
        let mut stack = vec![self.root()];
        while let Some(s) = stack.pop() {
            rank[s.index()] = next;
            next += 1;
            let node = self.node(s);
            stack.extend(node.history.iter().rev().copied());
            stack.extend(node.children.iter().rev().copied());
        }
        self.rank = rank;
    }

    pub(crate) fn rank(&self, id: StateId) -> usize {
        self.rank.get(id.index()).copied().unwrap_or(usize::MAX)
    }

    /// Proper ancestors, nearest first.
    pub(crate) fn proper_ancestors(&self, id: StateId) -> Vec<StateId> {
        let mut out = Vec::new();
        let mut cur = self.parent(id);
        while let Some(p) = cur {
            out.push(p);
            cur = self.parent(p);
        }
        out
    }

    /// Whether `id` is a proper descendant of `ancestor`.
    pub(crate) fn is_descendant(&self, id: StateId, ancestor: StateId) -> bool {
        let mut cur = self.parent(id);
        while let Some(p) = cur {
            if p == ancestor {
                return true;
            }
            cur = self.parent(p);
        }
        false
    }

    pub(crate) fn depth(&self, id: StateId) -> usize {
        self.proper_ancestors(id).len()
    }

    pub(crate) fn child_mode(&self, id: StateId) -> Option<ChildMode> {
        match self.node(id).kind {
            StateKind::Standard { child_mode, .. } => Some(child_mode),
            _ => None,
        }
    }

    pub(crate) fn initial(&self, id: StateId) -> Option<StateId> {
        match self.node(id).kind {
            StateKind::Standard { initial, .. } => initial,
            _ => None,
        }
    }

    pub(crate) fn error_state(&self, id: StateId) -> Option<StateId> {
        match self.node(id).kind {
            StateKind::Standard { error_state, .. } => error_state,
            _ => None,
        }
    }

    /// Final states and childless standard states.
    pub(crate) fn is_atomic(&self, id: StateId) -> bool {
        let node = self.node(id);
        match node.kind {
            StateKind::Final => true,
            StateKind::Standard { .. } => node.children.is_empty(),
            StateKind::History { .. } => false,
        }
    }

    pub(crate) fn is_compound(&self, id: StateId) -> bool {
        self.child_mode(id) == Some(ChildMode::Exclusive) && !self.node(id).children.is_empty()
    }

    pub(crate) fn is_parallel(&self, id: StateId) -> bool {
        self.child_mode(id) == Some(ChildMode::Parallel) && !self.node(id).children.is_empty()
    }

    /// The nearest proper ancestor of `states[0]` that contains every other
    /// state in `states`.
    pub(crate) fn find_lca(&self, states: &[StateId]) -> Option<StateId> {
        let (first, rest) = states.split_first()?;
        self.proper_ancestors(*first)
            .into_iter()
            .find(|anc| rest.iter().all(|s| self.is_descendant(*s, *anc)))
    }

    /// Sorts states into document order.
    pub(crate) fn sort_document_order(&self, states: &mut [StateId]) {
        states.sort_by_key(|s| self.rank(*s));
    }
}
