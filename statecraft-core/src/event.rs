//! Events consumed by the state machine.
//!
//! An event is an opaque stimulus with a type discriminant. The machine only
//! looks at the parts that configured transitions inspect: the type, the
//! sender identity, mouse data, and the JSON payload used by guards.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::borrow::Cow;
use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// Event type discriminant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventType(Cow<'static, str>);

impl EventType {
    /// The null event used for imperative jumps and the initial entry.
    pub const NONE: EventType = EventType(Cow::Borrowed("None"));
    /// Posted internally when a compound or parallel state completes.
    pub const FINISHED: EventType = EventType(Cow::Borrowed("finished"));
    pub const MOUSE_BUTTON_PRESS: EventType = EventType(Cow::Borrowed("MouseButtonPress"));
    pub const MOUSE_BUTTON_RELEASE: EventType = EventType(Cow::Borrowed("MouseButtonRelease"));
    pub const MOUSE_BUTTON_DBL_CLICK: EventType = EventType(Cow::Borrowed("MouseButtonDblClick"));
    pub const MOUSE_MOVE: EventType = EventType(Cow::Borrowed("MouseMove"));

    pub fn new(name: impl Into<String>) -> Self {
        Self(Cow::Owned(name.into()))
    }

    pub const fn from_static(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for EventType {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for EventType {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of the object that sent an event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(pub String);

impl ObjectId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ObjectId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ObjectId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MouseButton {
    Left,
    Right,
    Middle,
    Back,
    Forward,
}

/// A single keyboard modifier, used for (de)serializing [`Modifiers`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modifier {
    Shift,
    Control,
    Alt,
    Meta,
    Keypad,
}

impl Modifier {
    const ALL: [Modifier; 5] = [
        Modifier::Shift,
        Modifier::Control,
        Modifier::Alt,
        Modifier::Meta,
        Modifier::Keypad,
    ];

    fn bit(self) -> u8 {
        match self {
            Modifier::Shift => 0x01,
            Modifier::Control => 0x02,
            Modifier::Alt => 0x04,
            Modifier::Meta => 0x08,
            Modifier::Keypad => 0x10,
        }
    }
}

/// Keyboard modifier mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "Vec<Modifier>", into = "Vec<Modifier>")]
pub struct Modifiers(u8);

impl Modifiers {
    pub const NONE: Modifiers = Modifiers(0);
    pub const SHIFT: Modifiers = Modifiers(0x01);
    pub const CONTROL: Modifiers = Modifiers(0x02);
    pub const ALT: Modifiers = Modifiers(0x04);
    pub const META: Modifiers = Modifiers(0x08);
    pub const KEYPAD: Modifiers = Modifiers(0x10);

    pub fn contains(self, other: Modifiers) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for Modifiers {
    type Output = Modifiers;

    fn bitor(self, rhs: Modifiers) -> Modifiers {
        Modifiers(self.0 | rhs.0)
    }
}

impl BitOrAssign for Modifiers {
    fn bitor_assign(&mut self, rhs: Modifiers) {
        self.0 |= rhs.0;
    }
}

impl From<Modifier> for Modifiers {
    fn from(m: Modifier) -> Self {
        Modifiers(m.bit())
    }
}

impl From<Vec<Modifier>> for Modifiers {
    fn from(list: Vec<Modifier>) -> Self {
        Modifiers(list.into_iter().fold(0, |acc, m| acc | m.bit()))
    }
}

impl From<Modifiers> for Vec<Modifier> {
    fn from(mask: Modifiers) -> Self {
        Modifier::ALL
            .into_iter()
            .filter(|m| mask.0 & m.bit() != 0)
            .collect()
    }
}

/// A 2D point.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Mouse data carried by mouse events.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MouseData {
    pub button: MouseButton,
    #[serde(default)]
    pub modifiers: Modifiers,
    /// Position relative to the receiving object.
    #[serde(default)]
    pub local_pos: Point,
    /// Position in scene coordinates.
    #[serde(default)]
    pub scene_pos: Point,
}

impl MouseData {
    pub fn new(button: MouseButton, pos: Point) -> Self {
        Self {
            button,
            modifiers: Modifiers::NONE,
            local_pos: pos,
            scene_pos: pos,
        }
    }

    pub fn with_modifiers(mut self, modifiers: Modifiers) -> Self {
        self.modifiers = modifiers;
        self
    }

    pub fn with_scene_pos(mut self, pos: Point) -> Self {
        self.scene_pos = pos;
        self
    }
}

/// A stimulus posted to a state machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: EventType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<ObjectId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mouse: Option<MouseData>,

    /// Payload inspected by transition guards.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub payload: Value,
}

impl Event {
    pub fn new(event_type: impl Into<EventType>) -> Self {
        Self {
            event_type: event_type.into(),
            sender: None,
            mouse: None,
            payload: Value::Null,
        }
    }

    /// The null event.
    pub fn none() -> Self {
        Self::new(EventType::NONE)
    }

    /// A signal emission: the event type is the signal name, the sender the emitter.
    pub fn signal(sender: impl Into<ObjectId>, signal: impl Into<EventType>) -> Self {
        Self::new(signal).with_sender(sender)
    }

    /// The completion event for a compound or parallel state.
    pub fn finished(state_name: &str) -> Self {
        Self::new(EventType::FINISHED).with_sender(state_name)
    }

    pub fn mouse(event_type: EventType, data: MouseData) -> Self {
        Self {
            event_type,
            sender: None,
            mouse: Some(data),
            payload: Value::Null,
        }
    }

    pub fn with_sender(mut self, sender: impl Into<ObjectId>) -> Self {
        self.sender = Some(sender.into());
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.sender {
            Some(sender) => write!(f, "{}@{}", self.event_type, sender),
            None => write!(f, "{}", self.event_type),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_type_equality_ignores_storage() {
        assert_eq!(EventType::new("finished"), EventType::FINISHED);
        assert_eq!(EventType::from("Go").as_str(), "Go");
    }

    #[test]
    fn test_modifier_mask_from_list() {
        let mask: Modifiers = vec![Modifier::Shift, Modifier::Control].into();
        assert_eq!(mask, Modifiers::SHIFT | Modifiers::CONTROL);
        assert!(mask.contains(Modifiers::SHIFT));
        assert!(!mask.contains(Modifiers::ALT));

        let list: Vec<Modifier> = mask.into();
        assert_eq!(list, vec![Modifier::Shift, Modifier::Control]);
    }

    #[test]
    fn test_event_deserializes_from_script_form() {
        let event: Event = serde_json::from_value(json!({
            "type": "click",
            "sender": "button",
            "mouse": {
                "button": "left",
                "modifiers": ["shift"],
                "local_pos": {"x": 1.0, "y": 2.0}
            },
            "payload": {"count": 2}
        }))
        .unwrap();

        assert_eq!(event.event_type.as_str(), "click");
        assert_eq!(event.sender, Some(ObjectId::from("button")));
        let mouse = event.mouse.unwrap();
        assert_eq!(mouse.button, MouseButton::Left);
        assert_eq!(mouse.modifiers, Modifiers::SHIFT);
        assert_eq!(mouse.local_pos, Point::new(1.0, 2.0));
        assert_eq!(mouse.scene_pos, Point::default());
        assert_eq!(event.payload["count"], 2);
    }

    #[test]
    fn test_finished_event_names_the_state() {
        let event = Event::finished("playing");
        assert_eq!(event.event_type, EventType::FINISHED);
        assert_eq!(event.sender.as_ref().map(|s| s.as_str()), Some("playing"));
        assert_eq!(event.to_string(), "finished@playing");
    }
}
