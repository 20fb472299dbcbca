//! # statecraft-core
//!
//! Hierarchical state machine engine for statecraft.
//!
//! This crate provides:
//! - A state tree with compound, parallel, final, and history states
//! - Event, signal, and mouse transitions with payload guards
//! - A thread-safe event queue drained by the machine's owner thread
//! - The stepping algorithm with conflict resolution and history capture
//! - Declarative chart definitions in YAML or JSON

pub mod definition;
mod engine;
pub mod error;
pub mod event;
pub mod guard;
mod history;
pub mod machine;
pub mod notify;
pub mod queue;
pub mod region;
pub mod state;
pub mod transition;
mod tree;
mod validate;

pub use definition::{ChartDefinition, MouseAction, MouseDefinition, StateDefinition, TransitionDefinition};
pub use error::{CoreError, HookError};
pub use event::{Event, EventType, Modifier, Modifiers, MouseButton, MouseData, ObjectId, Point};
pub use guard::{CompareOp, GuardExpr};
pub use machine::{DrainReport, FaultContext, MachineFault, MachineStatus, StateMachine, StepOutcome};
pub use notify::{Notification, Observer};
pub use queue::{DelayedEventId, EventPoster, EventPriority};
pub use region::{CoordinateSpace, HitRegion};
pub use state::{ChildMode, HistoryType, MachineId, StateHook, StateId, StateKind};
pub use transition::{MouseTrigger, TransitionBuilder, TransitionHook, TransitionId, TransitionKind, Trigger};
