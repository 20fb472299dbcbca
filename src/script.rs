//! Event scripts for `statecraft run --events`.
//!
//! A script is a YAML or JSON list of entries:
//!
//! ```yaml
//! - play
//! - { event: stop, payload: { user: true } }
//! - { event: clicked, sender: ok_button }
//! - { event: tick, delay_ms: 250 }
//! - { mouse: { action: press, button: left, x: 10, y: 4, modifiers: [control] } }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use statecraft_core::{Event, Modifiers, MouseAction, MouseButton, MouseData, Point};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScriptEntry {
    /// A bare event type.
    Name(String),
    Full(ScriptedEvent),
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ScriptedEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,

    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub payload: Value,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mouse: Option<ScriptedMouse>,

    /// Posted as a delayed event when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptedMouse {
    #[serde(default)]
    pub action: MouseAction,
    pub button: MouseButton,
    #[serde(default)]
    pub modifiers: Modifiers,
    pub x: f64,
    pub y: f64,
    /// Scene position; the local position is used when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scene: Option<Point>,
}

impl ScriptEntry {
    pub fn delay(&self) -> Option<Duration> {
        match self {
            ScriptEntry::Name(_) => None,
            ScriptEntry::Full(e) => e.delay_ms.map(Duration::from_millis),
        }
    }

    pub fn to_event(&self) -> Result<Event, String> {
        let scripted = match self {
            ScriptEntry::Name(name) => return Ok(Event::new(name.as_str())),
            ScriptEntry::Full(e) => e,
        };

        let mut event = match (&scripted.mouse, &scripted.event) {
            (Some(_), Some(_)) => return Err("set either 'event' or 'mouse', not both".into()),
            (None, None) => return Err("entry needs an 'event' or a 'mouse'".into()),
            (None, Some(name)) => Event::new(name.as_str()),
            (Some(mouse), None) => {
                let mut data = MouseData::new(mouse.button, Point::new(mouse.x, mouse.y))
                    .with_modifiers(mouse.modifiers);
                if let Some(scene) = mouse.scene {
                    data = data.with_scene_pos(scene);
                }
                Event::mouse(mouse.action.event_type(), data)
            }
        };
        if let Some(sender) = &scripted.sender {
            event = event.with_sender(sender.as_str());
        }
        if !scripted.payload.is_null() {
            event = event.with_payload(scripted.payload.clone());
        }
        Ok(event)
    }
}

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("failed to read event script '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse event script '{}': {reason}", path.display())]
    Parse { path: PathBuf, reason: String },

    #[error("event script entry {index}: {reason}")]
    Entry { index: usize, reason: String },
}

/// Loads a script, picking JSON or YAML by extension like chart files.
pub fn load(path: impl AsRef<Path>) -> Result<Vec<ScriptEntry>, ScriptError> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path).map_err(|source| ScriptError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let is_json = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"));
    let parsed = if is_json {
        serde_json::from_str(&contents).map_err(|e| e.to_string())
    } else {
        serde_yaml::from_str(&contents).map_err(|e| e.to_string())
    };
    let entries: Vec<ScriptEntry> = parsed.map_err(|reason| ScriptError::Parse {
        path: path.to_path_buf(),
        reason,
    })?;

    // reject malformed entries before anything is posted
    for (index, entry) in entries.iter().enumerate() {
        entry
            .to_event()
            .map_err(|reason| ScriptError::Entry { index, reason })?;
    }
    Ok(entries)
}
