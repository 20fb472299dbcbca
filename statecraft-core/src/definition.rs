//! Declarative chart definitions.
//!
//! Charts are written in YAML or JSON:
//!
//! ```yaml
//! name: player
//! initial: stopped
//! states:
//!   - name: stopped
//!     transitions:
//!       - { event: play, target: playing }
//!   - name: playing
//!     initial: normal
//!     states:
//!       - { name: normal }
//!       - { name: fast }
//!       - { name: hist, history: shallow, default: normal }
//!     transitions:
//!       - { event: stop, target: stopped, guard: "event.force || event.user" }
//!       - { mouse: { button: right }, target: stopped }
//!   - { name: done, final: true }
//! ```
//!
//! State names are global to a chart, so targets are plain names.

use crate::error::CoreError;
use crate::event::{EventType, Modifiers, MouseButton};
use crate::machine::StateMachine;
use crate::region::{CoordinateSpace, HitRegion};
use crate::state::{ChildMode, HistoryType, StateId};
use crate::transition::{MouseTrigger, TransitionBuilder, TransitionKind};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// A whole chart. The chart itself is the root state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartDefinition {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial: Option<String>,

    #[serde(default, skip_serializing_if = "is_false")]
    pub parallel: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_state: Option<String>,

    pub states: Vec<StateDefinition>,

    /// Transitions owned by the root.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transitions: Vec<TransitionDefinition>,

    /// Free-form metadata, ignored by the machine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateDefinition {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial: Option<String>,

    #[serde(default, skip_serializing_if = "is_false")]
    pub parallel: bool,

    #[serde(default, rename = "final", skip_serializing_if = "is_false")]
    pub is_final: bool,

    /// Makes this a history pseudo-state of its parent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history: Option<HistoryType>,

    /// Default targets of a history state. A string or a list.
    #[serde(
        default,
        deserialize_with = "deserialize_names",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub default: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_state: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub states: Vec<StateDefinition>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transitions: Vec<TransitionDefinition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,

    /// Only events from this sender match.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mouse: Option<MouseDefinition>,

    /// Target state(s). Accepts `target` or `targets`, a string or a list.
    #[serde(alias = "target", deserialize_with = "deserialize_names")]
    pub targets: Vec<String>,

    #[serde(default)]
    pub kind: TransitionKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guard: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MouseAction {
    #[default]
    Press,
    Release,
    DoubleClick,
    Move,
}

impl MouseAction {
    pub fn event_type(self) -> EventType {
        match self {
            MouseAction::Press => EventType::MOUSE_BUTTON_PRESS,
            MouseAction::Release => EventType::MOUSE_BUTTON_RELEASE,
            MouseAction::DoubleClick => EventType::MOUSE_BUTTON_DBL_CLICK,
            MouseAction::Move => EventType::MOUSE_MOVE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MouseDefinition {
    #[serde(default)]
    pub action: MouseAction,

    pub button: MouseButton,

    #[serde(default)]
    pub modifiers: Modifiers,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<HitRegion>,

    #[serde(default)]
    pub space: CoordinateSpace,
}

impl MouseDefinition {
    fn trigger(&self) -> MouseTrigger {
        let mut trigger = MouseTrigger::new(self.action.event_type(), self.button)
            .with_modifiers(self.modifiers)
            .with_space(self.space);
        if let Some(region) = &self.region {
            trigger = trigger.with_region(region.clone());
        }
        trigger
    }
}

fn is_false(b: &bool) -> bool {
    !*b
}

fn deserialize_names<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::{self, Visitor};
    use std::fmt;

    struct NamesVisitor;

    impl<'de> Visitor<'de> for NamesVisitor {
        type Value = Vec<String>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a state name or a list of state names")
        }

        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(vec![v.to_string()])
        }

        fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
        where
            A: de::SeqAccess<'de>,
        {
            let mut names = Vec::new();
            while let Some(s) = seq.next_element::<String>()? {
                names.push(s);
            }
            Ok(names)
        }
    }

    deserializer.deserialize_any(NamesVisitor)
}

fn invalid(reason: impl Into<String>) -> CoreError {
    CoreError::InvalidDefinition {
        reason: reason.into(),
    }
}

impl ChartDefinition {
    pub fn from_json(json: &str) -> Result<Self, CoreError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, CoreError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Loads a chart, picking the format from the file extension.
    /// Anything other than `.json` is read as YAML.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| CoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));
        if is_json {
            Self::from_json(&contents)
        } else {
            Self::from_yaml(&contents)
        }
    }

    pub fn to_yaml(&self) -> Result<String, CoreError> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// CRC32C of the canonical JSON form.
    pub fn checksum(&self) -> Result<String, CoreError> {
        let json_bytes = serde_json::to_vec(self)?;
        Ok(format!("{:08x}", crc32c::crc32c(&json_bytes)))
    }

    /// Builds and validates a machine for this chart.
    pub fn build(&self) -> Result<StateMachine, CoreError> {
        let mut machine = StateMachine::new(self.name.clone());
        let root = machine.root();
        if self.parallel {
            machine.set_child_mode(root, ChildMode::Parallel)?;
        }

        // Names must all exist before initial states and targets resolve.
        let mut created = Vec::new();
        for state in &self.states {
            create_states(&mut machine, root, state, &mut created)?;
        }

        configure(
            &mut machine,
            root,
            self.initial.as_deref(),
            self.error_state.as_deref(),
            &self.transitions,
        )?;
        for (id, state) in created {
            if state.history.is_some() {
                let targets = resolve_all(&machine, &state.default)?;
                machine.set_history_default(id, targets)?;
            } else {
                configure(
                    &mut machine,
                    id,
                    state.initial.as_deref(),
                    state.error_state.as_deref(),
                    &state.transitions,
                )?;
            }
        }

        machine.validate()?;
        tracing::debug!(
            "built chart {} with {} states and {} transitions",
            self.name,
            machine.state_count(),
            machine.transition_count()
        );
        Ok(machine)
    }
}

fn create_states<'a>(
    machine: &mut StateMachine,
    parent: StateId,
    def: &'a StateDefinition,
    created: &mut Vec<(StateId, &'a StateDefinition)>,
) -> Result<(), CoreError> {
    let flavours = [def.is_final, def.parallel, def.history.is_some()];
    if flavours.iter().filter(|f| **f).count() > 1 {
        return Err(invalid(format!(
            "state '{}' can only be one of final, parallel, or history",
            def.name
        )));
    }
    if (def.is_final || def.history.is_some())
        && (!def.states.is_empty() || !def.transitions.is_empty())
    {
        return Err(invalid(format!(
            "state '{}' cannot have child states or transitions",
            def.name
        )));
    }

    let id = if def.is_final {
        machine.add_final_state(parent, def.name.clone())?
    } else if let Some(history_type) = def.history {
        machine.add_history_state(parent, def.name.clone(), history_type)?
    } else if def.parallel {
        machine.add_parallel_state(parent, def.name.clone())?
    } else {
        machine.add_state(parent, def.name.clone())?
    };
    created.push((id, def));

    for child in &def.states {
        create_states(machine, id, child, created)?;
    }
    Ok(())
}

fn configure(
    machine: &mut StateMachine,
    state: StateId,
    initial: Option<&str>,
    error_state: Option<&str>,
    transitions: &[TransitionDefinition],
) -> Result<(), CoreError> {
    if let Some(initial) = initial {
        let child = resolve(machine, initial)?;
        machine.set_initial_state(state, child)?;
    }
    if let Some(error_state) = error_state {
        let target = resolve(machine, error_state)?;
        machine.set_error_state(state, target)?;
    }
    for t in transitions {
        let builder = transition_builder(machine, t)?;
        machine.add_transition(state, builder)?;
    }
    Ok(())
}

fn transition_builder(
    machine: &StateMachine,
    def: &TransitionDefinition,
) -> Result<TransitionBuilder, CoreError> {
    let mut builder = match (&def.event, &def.mouse) {
        (Some(event), None) => TransitionBuilder::on_event(event.as_str()),
        (None, Some(mouse)) => TransitionBuilder::on_mouse(mouse.trigger()),
        (Some(_), Some(_)) => {
            return Err(invalid("a transition takes either 'event' or 'mouse', not both"))
        }
        (None, None) => return Err(invalid("a transition needs 'event' or 'mouse'")),
    };
    if let Some(sender) = &def.sender {
        builder = builder.from_sender(sender.as_str());
    }
    builder = builder
        .targets(resolve_all(machine, &def.targets)?)
        .kind(def.kind);
    if let Some(guard) = &def.guard {
        builder = builder.guard(guard.as_str());
    }
    Ok(builder)
}

fn resolve(machine: &StateMachine, name: &str) -> Result<StateId, CoreError> {
    machine
        .find_state(name)
        .ok_or_else(|| CoreError::UnknownState {
            state: name.to_string(),
        })
}

fn resolve_all(machine: &StateMachine, names: &[String]) -> Result<Vec<StateId>, CoreError> {
    names.iter().map(|n| resolve(machine, n)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Event, MouseData, Point};
    use serde_json::json;
    use std::io::Write;

    const PLAYER: &str = r#"
name: player
initial: stopped
states:
  - name: stopped
    transitions:
      - { event: play, target: playing }
  - name: playing
    initial: normal
    states:
      - name: normal
        transitions:
          - { event: faster, target: fast }
      - { name: fast }
      - { name: hist, history: shallow, default: normal }
    transitions:
      - { event: stop, target: stopped, guard: "event.force || event.user" }
      - { event: finish, target: done }
  - name: paused
    transitions:
      - { event: resume, target: hist }
  - { name: done, final: true }
"#;

    #[test]
    fn test_parse_and_build_yaml() {
        let chart = ChartDefinition::from_yaml(PLAYER).unwrap();
        assert_eq!(chart.name, "player");
        assert_eq!(chart.states.len(), 4);
        assert_eq!(chart.states[1].states[2].history, Some(HistoryType::Shallow));
        assert_eq!(chart.states[1].states[2].default, vec!["normal"]);

        let mut m = chart.build().unwrap();
        assert_eq!(m.state_count(), 8);
        assert_eq!(m.transition_count(), 5);

        m.start().unwrap();
        assert_eq!(m.active_state_names(), ["stopped"]);
        m.post_event(Event::new("play")).unwrap();
        m.post_event(Event::new("faster")).unwrap();
        m.process_events().unwrap();
        assert_eq!(m.active_state_names(), ["playing", "fast"]);

        // the guard rejects a plain stop
        m.post_event(Event::new("stop")).unwrap();
        m.process_events().unwrap();
        assert_eq!(m.active_state_names(), ["playing", "fast"]);

        m.post_event(Event::new("stop").with_payload(json!({"user": true})))
            .unwrap();
        m.process_events().unwrap();
        assert_eq!(m.active_state_names(), ["stopped"]);
    }

    #[test]
    fn test_targets_accept_string_or_list() {
        let chart = ChartDefinition::from_json(
            r#"{
                "name": "fork",
                "initial": "idle",
                "states": [
                    {"name": "idle", "transitions": [{"event": "go", "targets": ["a1", "b1"]}]},
                    {"name": "work", "parallel": true, "states": [
                        {"name": "a", "initial": "a1", "states": [{"name": "a1"}]},
                        {"name": "b", "initial": "b1", "states": [{"name": "b1"}]}
                    ]}
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(
            chart.states[0].transitions[0].targets,
            vec!["a1".to_string(), "b1".to_string()]
        );

        let mut m = chart.build().unwrap();
        m.start().unwrap();
        m.post_event(Event::new("go")).unwrap();
        m.process_events().unwrap();
        assert_eq!(m.active_state_names(), ["work", "a", "a1", "b", "b1"]);
    }

    #[test]
    fn test_mouse_transition_definition() {
        let chart = ChartDefinition::from_yaml(
            r#"
name: canvas
initial: idle
states:
  - name: idle
    transitions:
      - target: selected
        mouse:
          button: left
          modifiers: [shift]
          region: { rect: { x: 0, y: 0, width: 10, height: 10 } }
  - name: selected
"#,
        )
        .unwrap();
        let mut m = chart.build().unwrap();
        m.start().unwrap();

        let outside = MouseData::new(MouseButton::Left, Point::new(20.0, 20.0))
            .with_modifiers(Modifiers::SHIFT);
        m.post_event(Event::mouse(EventType::MOUSE_BUTTON_PRESS, outside))
            .unwrap();
        m.process_events().unwrap();
        assert_eq!(m.active_state_names(), ["idle"]);

        let inside = MouseData::new(MouseButton::Left, Point::new(2.0, 2.0))
            .with_modifiers(Modifiers::SHIFT);
        m.post_event(Event::mouse(EventType::MOUSE_BUTTON_PRESS, inside))
            .unwrap();
        m.process_events().unwrap();
        assert_eq!(m.active_state_names(), ["selected"]);
    }

    #[test]
    fn test_unknown_target() {
        let chart = ChartDefinition::from_yaml(
            "name: t\ninitial: a\nstates:\n  - name: a\n    transitions:\n      - { event: go, target: nowhere }\n",
        )
        .unwrap();
        assert!(matches!(
            chart.build(),
            Err(CoreError::UnknownState { state }) if state == "nowhere"
        ));
    }

    #[test]
    fn test_duplicate_state_names() {
        let chart =
            ChartDefinition::from_yaml("name: t\ninitial: a\nstates:\n  - name: a\n  - name: a\n")
                .unwrap();
        assert!(matches!(
            chart.build(),
            Err(CoreError::DuplicateState { state }) if state == "a"
        ));
    }

    #[test]
    fn test_missing_initial_state() {
        let chart =
            ChartDefinition::from_yaml("name: t\nstates:\n  - name: a\n  - name: b\n").unwrap();
        assert!(matches!(
            chart.build(),
            Err(CoreError::NoInitialState { state }) if state == "t"
        ));
    }

    #[test]
    fn test_transition_needs_a_trigger() {
        let chart = ChartDefinition::from_yaml(
            "name: t\ninitial: a\nstates:\n  - name: a\n    transitions:\n      - { target: a }\n",
        )
        .unwrap();
        assert!(matches!(
            chart.build(),
            Err(CoreError::InvalidDefinition { .. })
        ));
    }

    #[test]
    fn test_checksum_is_stable() {
        let a = ChartDefinition::from_yaml(PLAYER).unwrap();
        let b = ChartDefinition::from_yaml(&a.to_yaml().unwrap()).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.checksum().unwrap(), b.checksum().unwrap());
        assert_eq!(a.checksum().unwrap().len(), 8);
    }

    #[test]
    fn test_from_file_by_extension() {
        let dir = tempfile::tempdir().unwrap();

        let yaml_path = dir.path().join("player.yaml");
        std::fs::write(&yaml_path, PLAYER).unwrap();
        assert_eq!(ChartDefinition::from_file(&yaml_path).unwrap().name, "player");

        let json_path = dir.path().join("toggle.json");
        let mut file = std::fs::File::create(&json_path).unwrap();
        write!(
            file,
            r#"{{"name": "toggle", "initial": "a", "states": [{{"name": "a"}}]}}"#
        )
        .unwrap();
        assert_eq!(ChartDefinition::from_file(&json_path).unwrap().name, "toggle");

        let missing = dir.path().join("missing.yaml");
        assert!(matches!(
            ChartDefinition::from_file(&missing),
            Err(CoreError::Io { .. })
        ));
    }
}
