//! The state machine: tree construction, lifecycle, and event intake.
//!
//! A machine owns its state arena, its configuration, and its event queue.
//! The tree may only be changed while the machine is not running. Once
//! started, the machine is driven by the thread that started it through
//! [`StateMachine::step`] or [`StateMachine::process_events`]; any thread may
//! post events through an [`EventPoster`].

use crate::error::{CoreError, HookError};
use crate::event::Event;
use crate::guard::GuardExpr;
use crate::history;
use crate::notify::{Notification, Observer};
use crate::queue::{DelayedEventId, EventPoster, EventPriority, EventQueue};
use crate::state::{ChildMode, HistoryType, MachineId, StateId, StateKind};
use crate::transition::{TransitionBuilder, TransitionId, TransitionNode};
use crate::tree::StateTree;
use crate::validate;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

/// Lifecycle of a machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachineStatus {
    NotRunning,
    Running,
    /// A final child of the root was entered. Terminal until [`StateMachine::reset`].
    Finished,
}

impl fmt::Display for MachineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MachineStatus::NotRunning => "not running",
            MachineStatus::Running => "running",
            MachineStatus::Finished => "finished",
        };
        f.write_str(s)
    }
}

/// Where a hook failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultContext {
    Entry(StateId),
    Exit(StateId),
    Transition(TransitionId),
}

/// A recorded hook failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineFault {
    pub context: FaultContext,
    pub message: String,
}

impl fmt::Display for MachineFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.context {
            FaultContext::Entry(s) => write!(f, "entry hook of {} failed: {}", s, self.message),
            FaultContext::Exit(s) => write!(f, "exit hook of {} failed: {}", s, self.message),
            FaultContext::Transition(t) => {
                write!(f, "transition hook of {} failed: {}", t, self.message)
            }
        }
    }
}

/// What one step did.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub event: Event,
    /// Fired transitions, in document order of their selecting states.
    pub transitions: Vec<TransitionId>,
    /// Exited states, deepest first.
    pub exited: Vec<StateId>,
    /// Entered states, outermost first.
    pub entered: Vec<StateId>,
}

impl StepOutcome {
    /// True when the event matched nothing.
    pub fn decayed(&self) -> bool {
        self.transitions.is_empty() && self.exited.is_empty() && self.entered.is_empty()
    }
}

/// Summary of a [`StateMachine::process_events`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainReport {
    pub processed: usize,
    pub fired: usize,
    pub status: MachineStatus,
}

/// A hierarchical state machine.
pub struct StateMachine {
    pub(crate) tree: StateTree,
    pub(crate) configuration: BTreeSet<StateId>,
    pub(crate) status: MachineStatus,
    pub(crate) queue: Arc<EventQueue>,
    pub(crate) subscribers: Vec<Observer>,
    pub(crate) fault: Option<MachineFault>,
    /// State whose hook failed first during the current step.
    pub(crate) fault_origin: Option<StateId>,
    owner: Option<ThreadId>,
}

impl StateMachine {
    /// Creates an empty machine. `name` names the root state.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            tree: StateTree::new(MachineId::next(), name.into()),
            configuration: BTreeSet::new(),
            status: MachineStatus::NotRunning,
            queue: Arc::new(EventQueue::default()),
            subscribers: Vec::new(),
            fault: None,
            fault_origin: None,
            owner: None,
        }
    }

    pub fn machine_id(&self) -> MachineId {
        self.tree.machine()
    }

    pub fn name(&self) -> &str {
        self.tree.name(self.tree.root())
    }

    /// The top state. It is implicitly active while the configuration is
    /// non-empty and is never reported in it.
    pub fn root(&self) -> StateId {
        self.tree.root()
    }

    // ------------------------------------------------------------------
    // Tree construction
    // ------------------------------------------------------------------

    fn ensure_stopped(&self) -> Result<(), CoreError> {
        if self.status == MachineStatus::Running {
            return Err(CoreError::MachineRunning);
        }
        Ok(())
    }

    pub fn add_state(&mut self, parent: StateId, name: impl Into<String>) -> Result<StateId, CoreError> {
        self.ensure_stopped()?;
        self.tree
            .add(parent, name.into(), StateKind::standard(ChildMode::Exclusive))
    }

    pub fn add_parallel_state(
        &mut self,
        parent: StateId,
        name: impl Into<String>,
    ) -> Result<StateId, CoreError> {
        self.ensure_stopped()?;
        self.tree
            .add(parent, name.into(), StateKind::standard(ChildMode::Parallel))
    }

    pub fn add_final_state(
        &mut self,
        parent: StateId,
        name: impl Into<String>,
    ) -> Result<StateId, CoreError> {
        self.ensure_stopped()?;
        self.tree.add(parent, name.into(), StateKind::Final)
    }

    /// Adds a history pseudo-state. It needs a default before the machine can start.
    pub fn add_history_state(
        &mut self,
        parent: StateId,
        name: impl Into<String>,
        history_type: HistoryType,
    ) -> Result<StateId, CoreError> {
        self.ensure_stopped()?;
        self.tree.add(
            parent,
            name.into(),
            StateKind::History {
                history_type,
                default_targets: Vec::new(),
                memory: Vec::new(),
            },
        )
    }

    pub fn set_initial_state(&mut self, parent: StateId, child: StateId) -> Result<(), CoreError> {
        self.ensure_stopped()?;
        self.tree.check(parent)?;
        self.tree.check(child)?;
        let direct = self.tree.parent(child) == Some(parent);
        let child_is_history = self.tree.node(child).kind.is_history();
        let parent_name = self.tree.name(parent).to_string();
        let child_name = self.tree.name(child).to_string();
        match &mut self.tree.node_mut(parent).kind {
            StateKind::Standard { initial, .. } if direct && !child_is_history => {
                *initial = Some(child);
                Ok(())
            }
            StateKind::Standard { .. } => Err(CoreError::InvalidInitialState {
                parent: parent_name,
                child: child_name,
            }),
            _ => Err(CoreError::InvalidParent {
                parent: parent_name,
            }),
        }
    }

    pub fn set_child_mode(&mut self, state: StateId, mode: ChildMode) -> Result<(), CoreError> {
        self.ensure_stopped()?;
        self.tree.check(state)?;
        let name = self.tree.name(state).to_string();
        match &mut self.tree.node_mut(state).kind {
            StateKind::Standard { child_mode, .. } => {
                *child_mode = mode;
                Ok(())
            }
            _ => Err(CoreError::InvalidParent { parent: name }),
        }
    }

    /// Sets the state entered when a hook fails inside `state` or its descendants.
    pub fn set_error_state(&mut self, state: StateId, target: StateId) -> Result<(), CoreError> {
        self.ensure_stopped()?;
        self.tree.check(state)?;
        self.tree.check(target)?;
        let invalid = || CoreError::InvalidErrorState {
            state: self.tree.name(state).to_string(),
            target: self.tree.name(target).to_string(),
        };
        if target == self.tree.root() || !self.tree.node(state).kind.is_standard() {
            return Err(invalid());
        }
        if let StateKind::Standard { error_state, .. } = &mut self.tree.node_mut(state).kind {
            *error_state = Some(target);
        }
        Ok(())
    }

    fn history_parent(&self, history: StateId) -> Result<StateId, CoreError> {
        self.tree.check(history)?;
        if !self.tree.node(history).kind.is_history() {
            return Err(CoreError::NotHistoryState {
                state: self.tree.name(history).to_string(),
            });
        }
        Ok(self.tree.parent(history).unwrap_or(self.tree.root()))
    }

    /// Sets the states entered through `history` before it has any memory.
    pub fn set_history_default(
        &mut self,
        history: StateId,
        targets: impl IntoIterator<Item = StateId>,
    ) -> Result<(), CoreError> {
        self.ensure_stopped()?;
        let parent = self.history_parent(history)?;
        let targets: Vec<StateId> = targets.into_iter().collect();
        for target in &targets {
            self.tree.check(*target)?;
            if !self.tree.is_descendant(*target, parent) {
                return Err(CoreError::InvalidHistoryDefault {
                    history: self.tree.name(history).to_string(),
                    parent: self.tree.name(parent).to_string(),
                    target: self.tree.name(*target).to_string(),
                });
            }
        }
        validate::check_compatible(&self.tree, self.tree.name(history), &targets)?;
        if let StateKind::History {
            default_targets, ..
        } = &mut self.tree.node_mut(history).kind
        {
            *default_targets = targets;
        }
        Ok(())
    }

    pub fn set_history_type(
        &mut self,
        history: StateId,
        history_type: HistoryType,
    ) -> Result<(), CoreError> {
        self.ensure_stopped()?;
        self.history_parent(history)?;
        if let StateKind::History {
            history_type: current,
            memory,
            ..
        } = &mut self.tree.node_mut(history).kind
        {
            *current = history_type;
            memory.clear();
        }
        Ok(())
    }

    /// Removes a state and its subtree, with every transition they own.
    ///
    /// Transitions elsewhere that target a removed state stay attached and
    /// make [`StateMachine::validate`] fail until they are removed.
    pub fn remove_state(&mut self, state: StateId) -> Result<(), CoreError> {
        self.ensure_stopped()?;
        self.tree.check(state)?;
        if state == self.tree.root() {
            return Err(CoreError::RootRemoval {
                state: self.tree.name(state).to_string(),
            });
        }
        let removed = self.tree.remove_subtree(state);
        for s in &removed {
            self.configuration.remove(s);
        }
        tracing::debug!(
            "removed {} state(s) under {}",
            removed.len(),
            self.tree.name(state)
        );
        Ok(())
    }

    /// Attaches a transition to `source`.
    pub fn add_transition(
        &mut self,
        source: StateId,
        builder: TransitionBuilder,
    ) -> Result<TransitionId, CoreError> {
        self.ensure_stopped()?;
        self.tree.check(source)?;
        let from = self.tree.name(source).to_string();
        if !self.tree.node(source).kind.is_standard() {
            return Err(CoreError::InvalidSource { state: from });
        }
        if builder.targets.is_empty() {
            return Err(CoreError::NoTargets { from_state: from });
        }
        for target in &builder.targets {
            self.tree.check(*target)?;
            if *target == self.tree.root() {
                return Err(CoreError::RootTarget {
                    state: self.tree.name(*target).to_string(),
                });
            }
        }
        validate::check_compatible(&self.tree, &from, &builder.targets)?;
        let guard = builder.guard.as_deref().map(GuardExpr::parse).transpose()?;

        Ok(self.tree.add_transition(TransitionNode {
            source,
            targets: builder.targets,
            kind: builder.kind,
            trigger: builder.trigger,
            guard,
            on_transition: builder.on_transition,
            observers: Vec::new(),
            removed: false,
        }))
    }

    pub fn remove_transition(&mut self, transition: TransitionId) -> Result<(), CoreError> {
        self.ensure_stopped()?;
        self.tree.check_transition(transition)?;
        self.tree.remove_transition(transition);
        Ok(())
    }

    pub fn on_entry<F>(&mut self, state: StateId, hook: F) -> Result<(), CoreError>
    where
        F: FnMut(&Event) -> Result<(), HookError> + Send + 'static,
    {
        self.ensure_stopped()?;
        self.tree.check(state)?;
        self.tree.node_mut(state).on_entry = Some(Box::new(hook));
        Ok(())
    }

    pub fn on_exit<F>(&mut self, state: StateId, hook: F) -> Result<(), CoreError>
    where
        F: FnMut(&Event) -> Result<(), HookError> + Send + 'static,
    {
        self.ensure_stopped()?;
        self.tree.check(state)?;
        self.tree.node_mut(state).on_exit = Some(Box::new(hook));
        Ok(())
    }

    /// Registers an observer for one state's notifications. It is dropped
    /// together with the state.
    pub fn observe<F>(&mut self, state: StateId, observer: F) -> Result<(), CoreError>
    where
        F: FnMut(&Notification) + Send + 'static,
    {
        self.tree.check(state)?;
        self.tree.node_mut(state).observers.push(Box::new(observer));
        Ok(())
    }

    pub fn observe_transition<F>(
        &mut self,
        transition: TransitionId,
        observer: F,
    ) -> Result<(), CoreError>
    where
        F: FnMut(&Notification) + Send + 'static,
    {
        self.tree.check_transition(transition)?;
        self.tree
            .transition_mut(transition)
            .observers
            .push(Box::new(observer));
        Ok(())
    }

    /// Registers an observer for every notification of this machine.
    pub fn subscribe<F>(&mut self, observer: F)
    where
        F: FnMut(&Notification) + Send + 'static,
    {
        self.subscribers.push(Box::new(observer));
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn parent_state(&self, state: StateId) -> Option<StateId> {
        self.tree.check(state).ok()?;
        self.tree.parent(state)
    }

    pub fn state_name(&self, state: StateId) -> Option<&str> {
        self.tree.check(state).ok()?;
        Some(self.tree.name(state))
    }

    pub fn find_state(&self, name: &str) -> Option<StateId> {
        self.tree.find(name)
    }

    /// Non-history children in declaration order.
    pub fn child_states(&self, state: StateId) -> Result<&[StateId], CoreError> {
        self.tree.check(state)?;
        Ok(&self.tree.node(state).children)
    }

    pub fn history_states(&self, state: StateId) -> Result<&[StateId], CoreError> {
        self.tree.check(state)?;
        Ok(&self.tree.node(state).history)
    }

    pub fn kind(&self, state: StateId) -> Result<&StateKind, CoreError> {
        self.tree.check(state)?;
        Ok(&self.tree.node(state).kind)
    }

    /// What `history` currently remembers; empty before its parent was first exited.
    pub fn history_memory(&self, history: StateId) -> Result<&[StateId], CoreError> {
        self.history_parent(history)?;
        match &self.tree.node(history).kind {
            StateKind::History { memory, .. } => Ok(memory),
            _ => Ok(&[]),
        }
    }

    pub fn transitions(&self, state: StateId) -> Result<&[TransitionId], CoreError> {
        self.tree.check(state)?;
        Ok(&self.tree.node(state).transitions)
    }

    pub fn transition_source(&self, transition: TransitionId) -> Result<StateId, CoreError> {
        self.tree.check_transition(transition)?;
        Ok(self.tree.transition(transition).source)
    }

    pub fn transition_targets(&self, transition: TransitionId) -> Result<&[StateId], CoreError> {
        self.tree.check_transition(transition)?;
        Ok(&self.tree.transition(transition).targets)
    }

    /// Whether `transition` would be enabled by `event`. Has no side effects.
    pub fn event_test(&self, transition: TransitionId, event: &Event) -> Result<bool, CoreError> {
        self.tree.check_transition(transition)?;
        Ok(self.tree.transition(transition).event_test(event))
    }

    pub fn state_count(&self) -> usize {
        self.tree.live_states().count()
    }

    pub fn transition_count(&self) -> usize {
        self.tree.live_transitions().count()
    }

    /// Active states, root excluded.
    pub fn configuration(&self) -> &BTreeSet<StateId> {
        &self.configuration
    }

    pub fn is_active(&self, state: StateId) -> bool {
        if state == self.tree.root() {
            return !self.configuration.is_empty();
        }
        self.configuration.contains(&state)
    }

    /// Active atomic states in document order.
    pub fn active_leaves(&self) -> Vec<StateId> {
        let mut leaves: Vec<StateId> = self
            .configuration
            .iter()
            .copied()
            .filter(|s| self.tree.is_atomic(*s))
            .collect();
        self.tree.sort_document_order(&mut leaves);
        leaves
    }

    /// Names of all active states in document order.
    pub fn active_state_names(&self) -> Vec<&str> {
        let mut states: Vec<StateId> = self.configuration.iter().copied().collect();
        self.tree.sort_document_order(&mut states);
        states.into_iter().map(|s| self.tree.name(s)).collect()
    }

    pub fn status(&self) -> MachineStatus {
        self.status
    }

    pub fn is_running(&self) -> bool {
        self.status == MachineStatus::Running
    }

    /// The most recent hook failure.
    pub fn error(&self) -> Option<&MachineFault> {
        self.fault.as_ref()
    }

    /// The most recent hook failure as text; empty when there is none.
    pub fn error_string(&self) -> String {
        self.fault
            .as_ref()
            .map(|f| self.error_string_for(f))
            .unwrap_or_default()
    }

    pub fn clear_error(&mut self) {
        self.fault = None;
    }

    pub fn pending_events(&self) -> usize {
        self.queue.pending()
    }

    pub fn delayed_events(&self) -> usize {
        self.queue.delayed_count()
    }

    /// Checks the tree for construction errors without starting.
    pub fn validate(&self) -> Result<(), CoreError> {
        validate::validate(&self.tree)
    }

    /// Renders a notification with state names. Ids this machine does not
    /// own, or no longer holds, are printed as raw ids.
    pub fn describe(&self, notification: &Notification) -> String {
        let name = |s: StateId| match self.tree.check(s) {
            Ok(()) => self.tree.name(s).to_string(),
            Err(_) => s.to_string(),
        };
        match *notification {
            Notification::Entered(s) => format!("entered {}", name(s)),
            Notification::Exited(s) => format!("exited {}", name(s)),
            Notification::ActiveChanged { state, active } => {
                format!("{} active={}", name(state), active)
            }
            Notification::Triggered(t) => {
                if self.tree.check_transition(t).is_err() {
                    return format!("triggered {}", t);
                }
                let node = self.tree.transition(t);
                let targets: Vec<String> = node.targets.iter().map(|s| name(*s)).collect();
                format!("triggered {} -> {}", name(node.source), targets.join(", "))
            }
            Notification::Finished(s) => format!("finished {}", name(s)),
            Notification::MachineStarted => format!("machine {} started", self.name()),
            Notification::MachineStopped => format!("machine {} stopped", self.name()),
            Notification::MachineFinished => format!("machine {} finished", self.name()),
        }
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Validates the tree and enters the initial configuration.
    ///
    /// The calling thread becomes the only thread allowed to step the machine.
    pub fn start(&mut self) -> Result<(), CoreError> {
        match self.status {
            MachineStatus::Running => return Err(CoreError::AlreadyRunning),
            MachineStatus::Finished => return Err(CoreError::AlreadyFinished),
            MachineStatus::NotRunning => {}
        }
        self.validate()?;
        self.tree.reindex();

        self.owner = Some(thread::current().id());
        self.configuration.clear();
        history::clear_all(&mut self.tree);
        self.queue.clear();
        self.fault = None;
        self.fault_origin = None;
        self.queue.open();
        self.status = MachineStatus::Running;

        tracing::info!("state machine {} started", self.name());
        self.emit(Notification::MachineStarted);
        self.enter_initial_configuration();
        Ok(())
    }

    /// Stops the machine without running exit hooks. Queued and delayed
    /// events are dropped; the configuration keeps its last value.
    pub fn stop(&mut self) -> Result<(), CoreError> {
        if self.status != MachineStatus::Running {
            return Err(CoreError::NotRunning);
        }
        self.queue.close();
        let dropped = self.queue.pending() + self.queue.delayed_count();
        self.queue.clear();
        self.status = MachineStatus::NotRunning;
        tracing::info!(
            "state machine {} stopped, {} pending event(s) dropped",
            self.name(),
            dropped
        );
        self.emit(Notification::MachineStopped);
        Ok(())
    }

    /// Returns a stopped or finished machine to its pristine state.
    pub fn reset(&mut self) -> Result<(), CoreError> {
        self.ensure_stopped()?;
        self.configuration.clear();
        history::clear_all(&mut self.tree);
        self.queue.clear();
        self.fault = None;
        self.fault_origin = None;
        self.owner = None;
        self.status = MachineStatus::NotRunning;
        Ok(())
    }

    fn ensure_owner(&self) -> Result<(), CoreError> {
        match self.owner {
            Some(owner) if owner != thread::current().id() => Err(CoreError::WrongThread),
            _ => Ok(()),
        }
    }

    fn ensure_running(&self) -> Result<(), CoreError> {
        self.ensure_owner()?;
        if self.status != MachineStatus::Running {
            return Err(CoreError::NotRunning);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------

    pub fn post_event(&self, event: Event) -> Result<(), CoreError> {
        self.queue.post(event, EventPriority::Normal)
    }

    /// Posts an event that is processed before any normal event.
    pub fn post_internal_event(&self, event: Event) -> Result<(), CoreError> {
        self.queue.post(event, EventPriority::High)
    }

    pub fn post_delayed_event(
        &self,
        event: Event,
        delay: Duration,
    ) -> Result<DelayedEventId, CoreError> {
        self.queue.post_delayed(event, delay)
    }

    pub fn cancel_delayed_event(&self, id: DelayedEventId) -> bool {
        self.queue.cancel_delayed(id)
    }

    /// A handle for posting from other threads.
    pub fn poster(&self) -> EventPoster {
        EventPoster::new(self.queue.clone())
    }

    pub fn next_delayed_deadline(&self) -> Option<Instant> {
        self.queue.next_deadline()
    }

    /// Processes at most one queued event.
    ///
    /// Returns `None` when nothing was queued or a stop was requested.
    pub fn step(&mut self) -> Result<Option<StepOutcome>, CoreError> {
        self.ensure_running()?;
        if self.queue.take_stop_request() {
            self.stop()?;
            return Ok(None);
        }
        self.queue.promote_due(Instant::now());
        let Some(event) = self.queue.dequeue() else {
            return Ok(None);
        };

        let firings = self.select_transitions(&event);
        if firings.is_empty() {
            tracing::trace!("event {} decayed", event);
            return Ok(Some(StepOutcome {
                event,
                transitions: Vec::new(),
                exited: Vec::new(),
                entered: Vec::new(),
            }));
        }
        Ok(Some(self.run_firings(event, &firings)))
    }

    /// Steps until the queues are empty, a stop is requested, or the
    /// machine finishes.
    pub fn process_events(&mut self) -> Result<DrainReport, CoreError> {
        self.ensure_running()?;
        let mut processed = 0;
        let mut fired = 0;
        while self.status == MachineStatus::Running {
            match self.step()? {
                Some(outcome) => {
                    processed += 1;
                    fired += outcome.transitions.len();
                }
                None => break,
            }
        }
        Ok(DrainReport {
            processed,
            fired,
            status: self.status,
        })
    }

    /// Jumps to `target` from the current configuration, as if an external
    /// transition from the first active leaf fired.
    ///
    /// Returns `None` when `target` is already active.
    pub fn go_to_state(&mut self, target: StateId) -> Result<Option<StepOutcome>, CoreError> {
        self.ensure_running()?;
        self.tree.check(target)?;
        if target == self.tree.root() {
            return Err(CoreError::RootTarget {
                state: self.tree.name(target).to_string(),
            });
        }
        if !self.tree.node(target).kind.is_history() && self.configuration.contains(&target) {
            return Ok(None);
        }
        let Some(source) = self.first_active_leaf() else {
            return Err(CoreError::NotRunning);
        };
        let firing = crate::engine::Firing::synthetic(source, target);
        Ok(Some(self.run_firings(Event::none(), &[firing])))
    }

    pub(crate) fn first_active_leaf(&self) -> Option<StateId> {
        self.active_leaves().into_iter().next()
    }
}

impl fmt::Debug for StateMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateMachine")
            .field("name", &self.name())
            .field("status", &self.status)
            .field("configuration", &self.active_state_names())
            .field("states", &self.state_count())
            .field("transitions", &self.transition_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn toggle() -> (StateMachine, StateId, StateId) {
        let mut m = StateMachine::new("toggle");
        let root = m.root();
        let a = m.add_state(root, "A").unwrap();
        let b = m.add_state(root, "B").unwrap();
        m.set_initial_state(root, a).unwrap();
        m.add_transition(a, TransitionBuilder::on_event("Go").target(b))
            .unwrap();
        m.add_transition(b, TransitionBuilder::on_event("Back").target(a))
            .unwrap();
        (m, a, b)
    }

    #[test]
    fn test_start_enters_initial_state() {
        let (mut m, a, _) = toggle();
        m.start().unwrap();
        assert_eq!(m.status(), MachineStatus::Running);
        assert_eq!(m.configuration().iter().copied().collect::<Vec<_>>(), vec![a]);
        assert!(m.is_active(m.root()));
    }

    #[test]
    fn test_start_twice_fails() {
        let (mut m, _, _) = toggle();
        m.start().unwrap();
        assert!(matches!(m.start(), Err(CoreError::AlreadyRunning)));
    }

    #[test]
    fn test_post_before_start_is_rejected() {
        let (m, _, _) = toggle();
        assert!(matches!(
            m.post_event(Event::new("Go")),
            Err(CoreError::NotRunning)
        ));
        assert_eq!(m.pending_events(), 0);
    }

    #[test]
    fn test_initial_state_must_be_direct_child() {
        let mut m = StateMachine::new("m");
        let root = m.root();
        let a = m.add_state(root, "a").unwrap();
        let a1 = m.add_state(a, "a1").unwrap();
        assert!(matches!(
            m.set_initial_state(root, a1),
            Err(CoreError::InvalidInitialState { .. })
        ));
    }

    #[test]
    fn test_transition_to_other_machine_is_rejected() {
        let (mut m, a, _) = toggle();
        let mut other = StateMachine::new("other");
        let x = other.add_state(other.root(), "x").unwrap();
        assert!(matches!(
            m.add_transition(a, TransitionBuilder::on_event("Go").target(x)),
            Err(CoreError::ForeignState { .. })
        ));
        assert_eq!(x.machine(), other.machine_id());
    }

    #[test]
    fn test_transition_requires_targets_and_valid_guard() {
        let (mut m, a, b) = toggle();
        assert!(matches!(
            m.add_transition(a, TransitionBuilder::on_event("Go")),
            Err(CoreError::NoTargets { .. })
        ));
        assert!(matches!(
            m.add_transition(a, TransitionBuilder::on_event("Go").target(b).guard("count >")),
            Err(CoreError::InvalidGuard { .. })
        ));
        let root = m.root();
        assert!(matches!(
            m.add_transition(a, TransitionBuilder::on_event("Go").target(root)),
            Err(CoreError::RootTarget { .. })
        ));
    }

    #[test]
    fn test_final_state_cannot_own_transitions() {
        let (mut m, a, _) = toggle();
        let done = m.add_final_state(m.root(), "done").unwrap();
        assert!(matches!(
            m.add_transition(done, TransitionBuilder::on_event("x").target(a)),
            Err(CoreError::InvalidSource { .. })
        ));
    }

    #[test]
    fn test_describe_uses_names() {
        let (m, a, _) = toggle();
        assert_eq!(m.describe(&Notification::Entered(a)), "entered A");
        assert_eq!(
            m.describe(&Notification::MachineStarted),
            "machine toggle started"
        );
    }

    #[test]
    fn test_describe_foreign_ids() {
        let (m, _, _) = toggle();
        let (other, a, _) = toggle();
        let t = other.transitions(a).unwrap()[0];

        assert_eq!(
            m.describe(&Notification::Entered(a)),
            format!("entered {}", a)
        );
        assert_eq!(
            m.describe(&Notification::Triggered(t)),
            format!("triggered {}", t)
        );
    }

    #[test]
    fn test_observer_sees_activity() {
        let (mut m, a, _) = toggle();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        m.observe(a, move |n| sink.lock().unwrap().push(*n)).unwrap();
        m.start().unwrap();
        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                Notification::Entered(a),
                Notification::ActiveChanged {
                    state: a,
                    active: true
                }
            ]
        );
    }

    #[test]
    fn test_reset_after_stop() {
        let (mut m, a, b) = toggle();
        m.start().unwrap();
        m.go_to_state(b).unwrap();
        m.stop().unwrap();
        assert!(m.is_active(b));
        m.reset().unwrap();
        assert!(m.configuration().is_empty());
        m.start().unwrap();
        assert!(m.is_active(a));
    }
}
