//! Transitions and their triggers.
//!
//! A transition is owned by its source state and fires when its trigger
//! matches the dequeued event and its guard (if any) holds. Triggers are a
//! closed set: plain event-type filters, optionally bound to a sender, and
//! mouse filters that add button, exact modifier mask, and hit region.

use crate::error::HookError;
use crate::event::{Event, EventType, Modifiers, MouseButton, ObjectId};
use crate::guard::GuardExpr;
use crate::notify::Observer;
use crate::region::{CoordinateSpace, HitRegion};
use crate::state::{MachineId, StateId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a transition within its machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransitionId {
    machine: MachineId,
    index: usize,
}

impl TransitionId {
    pub(crate) fn new(machine: MachineId, index: usize) -> Self {
        Self { machine, index }
    }

    pub fn machine(&self) -> MachineId {
        self.machine
    }

    pub fn index(&self) -> usize {
        self.index
    }
}

impl fmt::Display for TransitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "transition#{}.{}", self.machine.as_u64(), self.index)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransitionKind {
    /// Exits and re-enters the source.
    #[default]
    External,
    /// Does not exit a compound source when every target lies inside it.
    Internal,
}

/// Mouse filter.
#[derive(Debug, Clone, PartialEq)]
pub struct MouseTrigger {
    pub event_type: EventType,
    pub button: MouseButton,
    /// Must equal the event's modifiers exactly.
    pub modifiers: Modifiers,
    pub region: Option<HitRegion>,
    pub space: CoordinateSpace,
}

impl MouseTrigger {
    pub fn new(event_type: EventType, button: MouseButton) -> Self {
        Self {
            event_type,
            button,
            modifiers: Modifiers::NONE,
            region: None,
            space: CoordinateSpace::default(),
        }
    }

    pub fn press(button: MouseButton) -> Self {
        Self::new(EventType::MOUSE_BUTTON_PRESS, button)
    }

    pub fn release(button: MouseButton) -> Self {
        Self::new(EventType::MOUSE_BUTTON_RELEASE, button)
    }

    pub fn with_modifiers(mut self, modifiers: Modifiers) -> Self {
        self.modifiers = modifiers;
        self
    }

    pub fn with_region(mut self, region: HitRegion) -> Self {
        self.region = Some(region);
        self
    }

    pub fn with_space(mut self, space: CoordinateSpace) -> Self {
        self.space = space;
        self
    }

    fn matches(&self, event: &Event) -> bool {
        if event.event_type != self.event_type {
            return false;
        }
        let Some(mouse) = &event.mouse else {
            return false;
        };
        if mouse.button != self.button || mouse.modifiers != self.modifiers {
            return false;
        }
        match &self.region {
            Some(region) => region.contains(self.space.position(mouse)),
            None => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Trigger {
    Event {
        event_type: EventType,
        /// When set, only events sent by this object match.
        source: Option<ObjectId>,
    },
    Mouse {
        filter: MouseTrigger,
        source: Option<ObjectId>,
    },
}

impl Trigger {
    pub fn event(event_type: impl Into<EventType>) -> Self {
        Trigger::Event {
            event_type: event_type.into(),
            source: None,
        }
    }

    pub fn mouse(filter: MouseTrigger) -> Self {
        Trigger::Mouse {
            filter,
            source: None,
        }
    }

    pub fn source(&self) -> Option<&ObjectId> {
        match self {
            Trigger::Event { source, .. } | Trigger::Mouse { source, .. } => source.as_ref(),
        }
    }

    fn set_source(&mut self, object: ObjectId) {
        match self {
            Trigger::Event { source, .. } | Trigger::Mouse { source, .. } => *source = Some(object),
        }
    }

    /// Pure match against an event, ignoring guards.
    pub fn matches(&self, event: &Event) -> bool {
        if let Some(source) = self.source() {
            if event.sender.as_ref() != Some(source) {
                return false;
            }
        }
        match self {
            Trigger::Event { event_type, .. } => event.event_type == *event_type,
            Trigger::Mouse { filter, .. } => filter.matches(event),
        }
    }
}

/// Transition effect callback.
pub type TransitionHook = Box<dyn FnMut(&Event) -> Result<(), HookError> + Send>;

/// Describes a transition before it is attached to a source state.
pub struct TransitionBuilder {
    pub(crate) trigger: Trigger,
    pub(crate) targets: Vec<StateId>,
    pub(crate) kind: TransitionKind,
    pub(crate) guard: Option<String>,
    pub(crate) on_transition: Option<TransitionHook>,
}

impl TransitionBuilder {
    pub fn new(trigger: Trigger) -> Self {
        Self {
            trigger,
            targets: Vec::new(),
            kind: TransitionKind::External,
            guard: None,
            on_transition: None,
        }
    }

    pub fn on_event(event_type: impl Into<EventType>) -> Self {
        Self::new(Trigger::event(event_type))
    }

    pub fn on_mouse(filter: MouseTrigger) -> Self {
        Self::new(Trigger::mouse(filter))
    }

    pub fn from_sender(mut self, sender: impl Into<ObjectId>) -> Self {
        self.trigger.set_source(sender.into());
        self
    }

    pub fn target(mut self, target: StateId) -> Self {
        self.targets.push(target);
        self
    }

    pub fn targets(mut self, targets: impl IntoIterator<Item = StateId>) -> Self {
        self.targets.extend(targets);
        self
    }

    pub fn kind(mut self, kind: TransitionKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn internal(self) -> Self {
        self.kind(TransitionKind::Internal)
    }

    /// Guard expression over the event payload, e.g. `event.count > 2`.
    pub fn guard(mut self, expr: impl Into<String>) -> Self {
        self.guard = Some(expr.into());
        self
    }

    pub fn on_transition<F>(mut self, hook: F) -> Self
    where
        F: FnMut(&Event) -> Result<(), HookError> + Send + 'static,
    {
        self.on_transition = Some(Box::new(hook));
        self
    }
}

impl fmt::Debug for TransitionBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransitionBuilder")
            .field("trigger", &self.trigger)
            .field("targets", &self.targets)
            .field("kind", &self.kind)
            .field("guard", &self.guard)
            .finish_non_exhaustive()
    }
}

pub(crate) struct TransitionNode {
    pub(crate) source: StateId,
    pub(crate) targets: Vec<StateId>,
    pub(crate) kind: TransitionKind,
    pub(crate) trigger: Trigger,
    pub(crate) guard: Option<GuardExpr>,
    pub(crate) on_transition: Option<TransitionHook>,
    pub(crate) observers: Vec<Observer>,
    pub(crate) removed: bool,
}

impl TransitionNode {
    /// Whether this transition is enabled for `event`. Has no side effects.
    pub(crate) fn event_test(&self, event: &Event) -> bool {
        if !self.trigger.matches(event) {
            return false;
        }
        match &self.guard {
            Some(guard) => guard.evaluate(&event.payload),
            None => true,
        }
    }
}

impl fmt::Debug for TransitionNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransitionNode")
            .field("source", &self.source)
            .field("targets", &self.targets)
            .field("kind", &self.kind)
            .field("trigger", &self.trigger)
            .field("guard", &self.guard)
            .field("removed", &self.removed)
            .finish_non_exhaustive()
    }
}
