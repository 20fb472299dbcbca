//! State nodes and identities.
//!
//! All states of a machine live in one arena owned by the machine. A
//! [`StateId`] is a stable index into that arena, stamped with the id of the
//! machine that issued it, so parent links, initial-state pointers, and
//! history memory are plain ids rather than owning references.

use crate::error::HookError;
use crate::event::Event;
use crate::notify::Observer;
use crate::transition::TransitionId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_MACHINE_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MachineId(u64);

impl MachineId {
    pub(crate) fn next() -> Self {
        Self(NEXT_MACHINE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

/// Identity of a state within its machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StateId {
    machine: MachineId,
    index: usize,
}

impl StateId {
    pub(crate) fn new(machine: MachineId, index: usize) -> Self {
        Self { machine, index }
    }

    /// The machine this state belongs to.
    pub fn machine(&self) -> MachineId {
        self.machine
    }

    pub fn index(&self) -> usize {
        self.index
    }
}

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "state#{}.{}", self.machine.0, self.index)
    }
}

/// How the children of a state run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChildMode {
    /// Exactly one child is active.
    #[default]
    Exclusive,
    /// Every child is active.
    Parallel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryType {
    /// Remembers the direct active child.
    #[default]
    Shallow,
    /// Remembers the full active leaf configuration.
    Deep,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateKind {
    /// Atomic when it has no children, compound or parallel otherwise.
    Standard {
        child_mode: ChildMode,
        initial: Option<StateId>,
        error_state: Option<StateId>,
    },
    Final,
    History {
        history_type: HistoryType,
        /// Entered when there is no memory yet.
        default_targets: Vec<StateId>,
        /// States active when the parent was last exited.
        memory: Vec<StateId>,
    },
}

impl StateKind {
    pub(crate) fn standard(child_mode: ChildMode) -> Self {
        StateKind::Standard {
            child_mode,
            initial: None,
            error_state: None,
        }
    }

    pub fn is_standard(&self) -> bool {
        matches!(self, StateKind::Standard { .. })
    }

    pub fn is_final(&self) -> bool {
        matches!(self, StateKind::Final)
    }

    pub fn is_history(&self) -> bool {
        matches!(self, StateKind::History { .. })
    }
}

/// Entry and exit callback.
pub type StateHook = Box<dyn FnMut(&Event) -> Result<(), HookError> + Send>;

pub(crate) struct StateNode {
    pub(crate) name: String,
    pub(crate) parent: Option<StateId>,
    pub(crate) kind: StateKind,
    /// Non-history children in declaration order.
    pub(crate) children: Vec<StateId>,
    pub(crate) history: Vec<StateId>,
    pub(crate) transitions: Vec<TransitionId>,
    pub(crate) on_entry: Option<StateHook>,
    pub(crate) on_exit: Option<StateHook>,
    pub(crate) observers: Vec<Observer>,
    pub(crate) removed: bool,
}

impl StateNode {
    pub(crate) fn new(name: String, parent: Option<StateId>, kind: StateKind) -> Self {
        Self {
            name,
            parent,
            kind,
            children: Vec::new(),
            history: Vec::new(),
            transitions: Vec::new(),
            on_entry: None,
            on_exit: None,
            observers: Vec::new(),
            removed: false,
        }
    }
}

impl fmt::Debug for StateNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateNode")
            .field("name", &self.name)
            .field("parent", &self.parent)
            .field("kind", &self.kind)
            .field("children", &self.children)
            .field("history", &self.history)
            .field("transitions", &self.transitions)
            .field("removed", &self.removed)
            .finish_non_exhaustive()
    }
}
