//! Notifications produced while the machine steps.
//!
//! Observers are plain callbacks. Per-state and per-transition observers live
//! on the node they watch and go away with it; machine-wide subscribers see
//! every notification. Delivery is synchronous, inside the step that produced
//! the notification.

use crate::state::StateId;
use crate::transition::TransitionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notification {
    Entered(StateId),
    Exited(StateId),
    ActiveChanged { state: StateId, active: bool },
    Triggered(TransitionId),
    /// A compound state reached a final child, or every region of a
    /// parallel state did.
    Finished(StateId),
    MachineStarted,
    MachineStopped,
    MachineFinished,
}

impl Notification {
    /// The state this notification is about, if any.
    pub fn state(&self) -> Option<StateId> {
        match self {
            Notification::Entered(s)
            | Notification::Exited(s)
            | Notification::Finished(s)
            | Notification::ActiveChanged { state: s, .. } => Some(*s),
            _ => None,
        }
    }
}

pub type Observer = Box<dyn FnMut(&Notification) + Send>;
