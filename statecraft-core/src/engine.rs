//! The stepping algorithm.
//!
//! One step consumes one event:
//!
//! 1. every active leaf, in document order, walks itself and then its
//!    ancestors and picks the first transition whose trigger and guard pass;
//! 2. candidates that would exit the same states, or whose sources are
//!    nested in one another, conflict; the deeper source wins, then the
//!    earlier leaf in document order;
//! 3. history is recorded for every state about to be exited;
//! 4. states are exited deepest first, transition hooks run, and the entry
//!    set is entered outermost first;
//! 5. final states are checked, then a failing hook is routed to the
//!    nearest error state.

use crate::error::HookError;
use crate::event::Event;
use crate::history;
use crate::machine::{FaultContext, MachineFault, MachineStatus, StateMachine, StepOutcome};
use crate::notify::Notification;
use crate::queue::EventPriority;
use crate::state::StateId;
use crate::transition::{TransitionId, TransitionKind};
use std::collections::BTreeSet;

/// A transition about to fire. Synthetic firings carry no transition and
/// come from imperative jumps and error routing.
#[derive(Debug, Clone)]
pub(crate) struct Firing {
    pub(crate) transition: Option<TransitionId>,
    pub(crate) source: StateId,
    pub(crate) targets: Vec<StateId>,
    pub(crate) kind: TransitionKind,
}

impl Firing {
    pub(crate) fn synthetic(source: StateId, target: StateId) -> Self {
        Self {
            transition: None,
            source,
            targets: vec![target],
            kind: TransitionKind::External,
        }
    }
}

impl StateMachine {
    fn firing(&self, t: TransitionId) -> Firing {
        let node = self.tree.transition(t);
        Firing {
            transition: Some(t),
            source: node.source,
            targets: node.targets.clone(),
            kind: node.kind,
        }
    }

    /// The state whose active descendants a firing exits.
    pub(crate) fn domain(&self, firing: &Firing) -> StateId {
        let tree = &self.tree;
        let source = firing.source;
        if firing.kind == TransitionKind::Internal
            && (tree.is_compound(source) || tree.is_parallel(source))
            && firing.targets.iter().all(|t| tree.is_descendant(*t, source))
        {
            return source;
        }
        let mut states = Vec::with_capacity(firing.targets.len() + 1);
        states.push(source);
        states.extend(firing.targets.iter().copied());
        tree.find_lca(&states).unwrap_or(tree.root())
    }

    fn exit_set(&self, firing: &Firing) -> BTreeSet<StateId> {
        let domain = self.domain(firing);
        self.configuration
            .iter()
            .copied()
            .filter(|s| self.tree.is_descendant(*s, domain))
            .collect()
    }

    pub(crate) fn select_transitions(&self, event: &Event) -> Vec<Firing> {
        let tree = &self.tree;
        let leaves = self.active_leaves();

        // (transition, depth of source, position of the selecting leaf)
        let mut candidates: Vec<(TransitionId, usize, usize)> = Vec::new();
        for (order, leaf) in leaves.iter().enumerate() {
            let mut walk = std::iter::once(*leaf).chain(tree.proper_ancestors(*leaf));
            let found = walk.find_map(|s| {
                tree.node(s)
                    .transitions
                    .iter()
                    .copied()
                    .find(|t| tree.transition(*t).event_test(event))
            });
            if let Some(t) = found {
                if !candidates.iter().any(|(c, _, _)| *c == t) {
                    let depth = tree.depth(tree.transition(t).source);
                    candidates.push((t, depth, order));
                }
            }
        }
        candidates.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));

        let mut accepted: Vec<(Firing, BTreeSet<StateId>, usize)> = Vec::new();
        for (t, _, order) in candidates {
            let firing = self.firing(t);
            let exits = self.exit_set(&firing);
            let conflict = accepted.iter().find(|(other, other_exits, _)| {
                let related = other.source == firing.source
                    || tree.is_descendant(other.source, firing.source)
                    || tree.is_descendant(firing.source, other.source);
                related || !other_exits.is_disjoint(&exits)
            });
            match conflict {
                Some((winner, _, _)) => tracing::debug!(
                    "transition from {} preempted by transition from {}",
                    tree.name(firing.source),
                    tree.name(winner.source)
                ),
                None => accepted.push((firing, exits, order)),
            }
        }
        accepted.sort_by_key(|(_, _, order)| *order);
        accepted.into_iter().map(|(f, _, _)| f).collect()
    }

    /// Fires `firings` for `event`, then handles final states and faults.
    pub(crate) fn run_firings(&mut self, event: Event, firings: &[Firing]) -> StepOutcome {
        let transitions: Vec<TransitionId> = firings.iter().filter_map(|f| f.transition).collect();
        tracing::debug!(
            "event {}: firing {} transition(s)",
            event,
            firings.len()
        );
        let (mut exited, mut entered) = self.microstep(&event, firings);
        self.check_final_states(&entered);
        if let Some((more_exited, more_entered)) = self.route_fault() {
            exited.extend(more_exited);
            entered.extend(more_entered);
        }
        StepOutcome {
            event,
            transitions,
            exited,
            entered,
        }
    }

    fn microstep(&mut self, event: &Event, firings: &[Firing]) -> (Vec<StateId>, Vec<StateId>) {
        let mut exit: BTreeSet<StateId> = BTreeSet::new();
        for firing in firings {
            exit.extend(self.exit_set(firing));
        }
        let mut exited: Vec<StateId> = exit.into_iter().collect();
        self.tree.sort_document_order(&mut exited);
        exited.reverse();
        tracing::debug!("exit set: {:?}", self.names(&exited));

        for s in &exited {
            if !self.tree.node(*s).history.is_empty() {
                history::record(&mut self.tree, &self.configuration, *s);
            }
        }
        for s in &exited {
            self.exit_state(event, *s);
        }

        for firing in firings {
            if let Some(t) = firing.transition {
                self.execute_transition_content(event, t);
            }
        }

        let entries = self.entry_set(firings);
        tracing::debug!("entry set: {:?}", self.names(&entries));
        for s in &entries {
            self.enter_state(event, *s);
        }
        (exited, entries)
    }

    fn exit_state(&mut self, event: &Event, s: StateId) {
        let result = match self.tree.node_mut(s).on_exit.as_mut() {
            Some(hook) => hook(event),
            None => Ok(()),
        };
        if let Err(err) = result {
            self.record_fault(FaultContext::Exit(s), err);
        }
        self.configuration.remove(&s);
        self.emit(Notification::Exited(s));
        self.emit(Notification::ActiveChanged {
            state: s,
            active: false,
        });
    }

    fn execute_transition_content(&mut self, event: &Event, t: TransitionId) {
        let result = match self.tree.transition_mut(t).on_transition.as_mut() {
            Some(hook) => hook(event),
            None => Ok(()),
        };
        if let Err(err) = result {
            self.record_fault(FaultContext::Transition(t), err);
        }
        self.emit(Notification::Triggered(t));
    }

    fn enter_state(&mut self, event: &Event, s: StateId) {
        self.configuration.insert(s);
        let result = match self.tree.node_mut(s).on_entry.as_mut() {
            Some(hook) => hook(event),
            None => Ok(()),
        };
        if let Err(err) = result {
            self.record_fault(FaultContext::Entry(s), err);
        }
        self.emit(Notification::Entered(s));
        self.emit(Notification::ActiveChanged {
            state: s,
            active: true,
        });
    }

    /// States to enter for `firings`, in document order. Runs after the
    /// exits so that freshly recorded history is visible.
    fn entry_set(&self, firings: &[Firing]) -> Vec<StateId> {
        let tree = &self.tree;
        let mut set = BTreeSet::new();
        for firing in firings {
            let domain = self.domain(firing);
            for t in &firing.targets {
                self.add_descendants(*t, &mut set);
            }
            for t in &firing.targets {
                self.add_ancestors(*t, domain, &mut set);
            }
            if tree.is_parallel(domain) {
                for child in &tree.node(domain).children {
                    if !self.covered(*child, &set) {
                        self.add_descendants(*child, &mut set);
                    }
                }
            }
        }
        set.remove(&tree.root());

        let mut entries: Vec<StateId> = set
            .into_iter()
            .filter(|s| !self.configuration.contains(s))
            .collect();
        tree.sort_document_order(&mut entries);
        entries
    }

    /// Whether `set` already holds `state` or one of its descendants.
    fn covered(&self, state: StateId, set: &BTreeSet<StateId>) -> bool {
        set.iter()
            .any(|s| *s == state || self.tree.is_descendant(*s, state))
    }

    fn add_descendants(&self, s: StateId, set: &mut BTreeSet<StateId>) {
        let tree = &self.tree;
        if tree.node(s).kind.is_history() {
            let parent = tree.parent(s).unwrap_or(tree.root());
            let resolved = history::targets(tree, s);
            for r in &resolved {
                self.add_descendants(*r, set);
            }
            for r in &resolved {
                self.add_ancestors(*r, parent, set);
            }
            return;
        }

        set.insert(s);
        if tree.is_compound(s) {
            if let Some(initial) = tree.initial(s) {
                self.add_descendants(initial, set);
            }
        } else if tree.is_parallel(s) {
            for child in &tree.node(s).children {
                if !self.covered(*child, set) {
                    self.add_descendants(*child, set);
                }
            }
        }
    }

    /// Adds the proper ancestors of `s` below `domain`, completing the
    /// regions of any parallel ancestor.
    fn add_ancestors(&self, s: StateId, domain: StateId, set: &mut BTreeSet<StateId>) {
        let tree = &self.tree;
        for anc in tree.proper_ancestors(s) {
            if anc == domain {
                break;
            }
            set.insert(anc);
            if tree.is_parallel(anc) {
                for child in &tree.node(anc).children {
                    if !self.covered(*child, set) {
                        self.add_descendants(*child, set);
                    }
                }
            }
        }
    }

    pub(crate) fn enter_initial_configuration(&mut self) {
        let root = self.tree.root();
        let mut set = BTreeSet::new();
        self.add_descendants(root, &mut set);
        set.remove(&root);
        let mut entries: Vec<StateId> = set.into_iter().collect();
        self.tree.sort_document_order(&mut entries);

        let event = Event::none();
        for s in &entries {
            self.enter_state(&event, *s);
        }
        self.check_final_states(&entries);
        self.route_fault();
    }

    /// Whether `s` has completed: a compound with an active final child, or
    /// a parallel state whose regions have all completed.
    fn is_in_final_state(&self, s: StateId) -> bool {
        let tree = &self.tree;
        if tree.is_compound(s) {
            tree.node(s).children.iter().any(|c| {
                self.configuration.contains(c) && tree.node(*c).kind.is_final()
            })
        } else if tree.is_parallel(s) {
            tree.node(s)
                .children
                .iter()
                .all(|c| self.is_in_final_state(*c))
        } else {
            false
        }
    }

    fn check_final_states(&mut self, entered: &[StateId]) {
        if self.status != MachineStatus::Running {
            return;
        }
        let root = self.tree.root();
        let mut announced: Vec<StateId> = Vec::new();
        let mut machine_done = false;

        for s in entered {
            if !self.tree.node(*s).kind.is_final() || !self.configuration.contains(s) {
                continue;
            }
            let Some(parent) = self.tree.parent(*s) else {
                continue;
            };
            if parent == root {
                machine_done = true;
                continue;
            }
            if !announced.contains(&parent) {
                announced.push(parent);
                self.state_finished(parent);
            }
            if let Some(grandparent) = self.tree.parent(parent) {
                if grandparent != root
                    && self.tree.is_parallel(grandparent)
                    && !announced.contains(&grandparent)
                    && self.is_in_final_state(grandparent)
                {
                    announced.push(grandparent);
                    self.state_finished(grandparent);
                }
            }
        }

        if machine_done {
            self.finish();
        }
    }

    fn state_finished(&mut self, state: StateId) {
        let event = Event::finished(self.tree.name(state));
        tracing::debug!("{} finished", self.tree.name(state));
        if let Err(err) = self.queue.post(event, EventPriority::High) {
            tracing::warn!("dropping finished event for {}: {}", self.tree.name(state), err);
        }
        self.emit(Notification::Finished(state));
    }

    fn finish(&mut self) {
        self.queue.close();
        self.queue.clear();
        self.status = MachineStatus::Finished;
        tracing::info!("state machine {} finished", self.name());
        self.emit(Notification::MachineFinished);
    }

    fn record_fault(&mut self, context: FaultContext, err: HookError) {
        let origin = match context {
            FaultContext::Entry(s) | FaultContext::Exit(s) => s,
            FaultContext::Transition(t) => self.tree.transition(t).source,
        };
        let fault = MachineFault {
            context,
            message: err.message().to_string(),
        };
        tracing::warn!("{}", self.error_string_for(&fault));
        self.fault_origin.get_or_insert(origin);
        self.fault = Some(fault);
    }

    pub(crate) fn error_string_for(&self, fault: &MachineFault) -> String {
        let name = |s: StateId| self.tree.name(s).to_string();
        match fault.context {
            FaultContext::Entry(s) => format!("entry hook of '{}' failed: {}", name(s), fault.message),
            FaultContext::Exit(s) => format!("exit hook of '{}' failed: {}", name(s), fault.message),
            FaultContext::Transition(t) => format!(
                "transition hook from '{}' failed: {}",
                name(self.tree.transition(t).source),
                fault.message
            ),
        }
    }

    /// The error state configured on `origin` or its nearest ancestor,
    /// skipping error states that contain `origin`.
    fn find_error_state(&self, origin: StateId) -> Option<StateId> {
        let tree = &self.tree;
        std::iter::once(origin)
            .chain(tree.proper_ancestors(origin))
            .filter_map(|s| tree.error_state(s))
            .find(|e| tree.is_live(*e) && *e != origin && !tree.is_descendant(origin, *e))
    }

    /// Moves to the error state for the first fault of the last microstep.
    /// Faults raised while routing are recorded but not routed again.
    fn route_fault(&mut self) -> Option<(Vec<StateId>, Vec<StateId>)> {
        let origin = self.fault_origin.take()?;
        if self.status != MachineStatus::Running {
            return None;
        }
        let target = self.find_error_state(origin)?;
        let source = self.first_active_leaf()?;
        tracing::info!(
            "routing fault in {} to error state {}",
            self.tree.name(origin),
            self.tree.name(target)
        );

        let firing = Firing::synthetic(source, target);
        let result = self.microstep(&Event::none(), &[firing]);
        self.check_final_states(&result.1);
        self.fault_origin = None;
        Some(result)
    }

    pub(crate) fn emit(&mut self, notification: Notification) {
        match notification {
            Notification::Triggered(t) => {
                for observer in self.tree.transition_mut(t).observers.iter_mut() {
                    observer(&notification);
                }
            }
            _ => {
                if let Some(s) = notification.state() {
                    for observer in self.tree.node_mut(s).observers.iter_mut() {
                        observer(&notification);
                    }
                }
            }
        }
        for observer in self.subscribers.iter_mut() {
            observer(&notification);
        }
    }

    fn names(&self, states: &[StateId]) -> Vec<&str> {
        states.iter().map(|s| self.tree.name(*s)).collect()
    }
}
