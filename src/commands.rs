//! Command execution.

use crate::config::Config;
use crate::script::{self, ScriptError};
use colored::Colorize;
use statecraft_core::{ChartDefinition, CoreError, Event, MachineStatus, Notification, StateMachine};
use std::path::Path;
use std::sync::mpsc;
use std::time::{Duration, Instant};

/// A started machine plus the notifications it has emitted so far.
pub struct Session {
    pub machine: StateMachine,
    notifications: mpsc::Receiver<Notification>,
    show_notifications: bool,
    max_steps: usize,
}

impl Session {
    /// Loads and builds a chart. The machine is not started.
    pub fn open(chart: &Path, config: &Config) -> Result<Self, CoreError> {
        let definition = ChartDefinition::from_file(chart)?;
        let mut machine = definition.build()?;
        let (tx, rx) = mpsc::channel();
        machine.subscribe(move |n| {
            let _ = tx.send(*n);
        });
        tracing::debug!("loaded chart {} from {}", machine.name(), chart.display());
        Ok(Self {
            machine,
            notifications: rx,
            show_notifications: config.output.show_notifications,
            max_steps: config.runner.max_steps,
        })
    }

    pub fn start(&mut self) -> Result<String, CoreError> {
        self.machine.start()?;
        Ok(self.take_notifications())
    }

    pub fn stop(&mut self) -> Result<String, CoreError> {
        self.machine.stop()?;
        Ok(self.take_notifications())
    }

    pub fn reset(&mut self) -> Result<String, CoreError> {
        self.machine.reset()?;
        self.take_notifications();
        Ok("Machine reset".to_string())
    }

    pub fn post(&self, event: Event, delay: Option<Duration>) -> Result<(), CoreError> {
        match delay {
            Some(delay) => self.machine.post_delayed_event(event, delay).map(|_| ()),
            None => self.machine.post_event(event),
        }
    }

    /// Processes one event.
    pub fn step(&mut self) -> Result<String, CoreError> {
        let outcome = self.machine.step()?;
        let mut out = self.take_notifications();
        match outcome {
            Some(outcome) if outcome.decayed() => {
                push_line(&mut out, format!("{} {}", "decayed".dimmed(), outcome.event))
            }
            Some(_) => {}
            None => push_line(&mut out, "No pending events".yellow().to_string()),
        }
        Ok(out)
    }

    /// Steps until the queue is empty, the machine leaves the running
    /// state, or `runner.max_steps` events were processed.
    pub fn drain(&mut self) -> Result<String, CoreError> {
        let mut processed = 0;
        while self.machine.is_running() {
            if processed == self.max_steps {
                tracing::warn!("step limit of {} reached", self.max_steps);
                let mut out = self.take_notifications();
                push_line(
                    &mut out,
                    format!("{} after {} events", "Step limit reached".red(), processed),
                );
                return Ok(out);
            }
            if self.machine.step()?.is_none() {
                break;
            }
            processed += 1;
        }
        tracing::debug!("drained {} event(s)", processed);
        Ok(self.take_notifications())
    }

    pub fn go_to(&mut self, state: &str) -> Result<String, CoreError> {
        let target = self
            .machine
            .find_state(state)
            .ok_or_else(|| CoreError::UnknownState {
                state: state.to_string(),
            })?;
        match self.machine.go_to_state(target)? {
            Some(_) => Ok(self.take_notifications()),
            None => Ok(format!("{} is already active", state.cyan())),
        }
    }

    pub fn configuration(&self) -> String {
        let names = self.machine.active_state_names();
        if names.is_empty() {
            return "(empty)".dimmed().to_string();
        }
        names
            .iter()
            .map(|n| n.cyan().to_string())
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn status(&self) -> String {
        let status = self.machine.status();
        let status = match status {
            MachineStatus::Running => status.to_string().green(),
            MachineStatus::NotRunning => status.to_string().yellow(),
            MachineStatus::Finished => status.to_string().magenta(),
        };
        let mut out = format!(
            "{} {}\n  Configuration: {}\n  Pending: {} ({} delayed)",
            self.machine.name().bold(),
            status,
            self.configuration(),
            self.machine.pending_events(),
            self.machine.delayed_events()
        );
        if self.machine.error().is_some() {
            out.push_str(&format!("\n  Error: {}", self.machine.error_string().red()));
        }
        out
    }

    /// Renders notifications received since the last call.
    fn take_notifications(&mut self) -> String {
        let received: Vec<Notification> = self.notifications.try_iter().collect();
        if !self.show_notifications {
            return String::new();
        }
        let mut out = String::new();
        for n in received {
            let line = self.machine.describe(&n);
            let line = match n {
                Notification::ActiveChanged { .. } => continue,
                Notification::Entered(_) => line.green(),
                Notification::Exited(_) => line.yellow(),
                Notification::Triggered(_) => line.cyan(),
                Notification::Finished(_) => line.magenta(),
                _ => line.bold(),
            };
            push_line(&mut out, format!("  {}", line));
        }
        out
    }
}

fn push_line(out: &mut String, line: String) {
    if line.is_empty() {
        return;
    }
    if !out.is_empty() {
        out.push('\n');
    }
    out.push_str(&line);
}

/// `statecraft validate`: builds the chart and reports its shape.
pub fn validate(chart: &Path) -> Result<String, Box<dyn std::error::Error>> {
    let definition = ChartDefinition::from_file(chart)?;
    let checksum = definition.checksum()?;
    let machine = definition.build()?;
    Ok(format!(
        "{} chart {} ({} states, {} transitions, checksum: {})",
        "Valid".green(),
        machine.name().cyan(),
        machine.state_count().saturating_sub(1),
        machine.transition_count(),
        checksum
    ))
}

/// `statecraft run`: posts the `-e` events, then the script entries, and
/// drains until nothing is left. Waits for delayed events to come due.
pub fn run(
    chart: &Path,
    script_path: Option<&Path>,
    events: &[String],
    config: &Config,
) -> Result<String, Box<dyn std::error::Error>> {
    let entries = match script_path {
        Some(path) => script::load(path)?,
        None => Vec::new(),
    };
    let mut session = Session::open(chart, config)?;
    let mut out = session.start()?;

    for name in events {
        session.post(Event::new(name.as_str()), None)?;
    }
    for (index, entry) in entries.iter().enumerate() {
        let event = entry
            .to_event()
            .map_err(|reason| ScriptError::Entry { index, reason })?;
        session.post(event, entry.delay())?;
    }

    loop {
        push_line(&mut out, session.drain()?);
        if !session.machine.is_running() || session.machine.pending_events() > 0 {
            break;
        }
        let Some(deadline) = session.machine.next_delayed_deadline() else {
            break;
        };
        std::thread::sleep(deadline.saturating_duration_since(Instant::now()));
    }

    push_line(&mut out, session.status());
    Ok(out)
}

/// `statecraft config`: prints the effective configuration, or saves it.
pub fn show_config(config: &Config, write: Option<&Path>) -> Result<String, Box<dyn std::error::Error>> {
    match write {
        Some(path) => {
            config.save(path)?;
            Ok(format!("{} {}", "Wrote".green(), path.display()))
        }
        None => Ok(serde_yaml::to_string(config)?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    const CHART: &str = r#"
name: door
initial: closed
states:
  - name: closed
    transitions:
      - { event: open, target: opened }
  - name: opened
    transitions:
      - { event: close, target: closed }
      - { event: remove, target: gone }
  - { name: gone, final: true }
"#;

    fn quiet_config() -> Config {
        let mut config = Config::default();
        config.output.color = false;
        config
    }

    fn write_chart(dir: &tempfile::TempDir) -> PathBuf {
        colored::control::set_override(false);
        let path = dir.path().join("door.yaml");
        std::fs::write(&path, CHART).unwrap();
        path
    }

    #[test]
    fn test_validate_reports_counts() {
        let dir = tempfile::tempdir().unwrap();
        let out = validate(&write_chart(&dir)).unwrap();
        assert!(out.contains("door"));
        assert!(out.contains("3 states, 3 transitions"));
    }

    #[test]
    fn test_run_with_events() {
        let dir = tempfile::tempdir().unwrap();
        let chart = write_chart(&dir);
        let out = run(
            &chart,
            None,
            &["open".to_string(), "close".to_string(), "open".to_string()],
            &quiet_config(),
        )
        .unwrap();
        assert!(out.contains("entered opened"));
        assert!(out.contains("Configuration: opened"));
    }

    #[test]
    fn test_run_with_delayed_script() {
        let dir = tempfile::tempdir().unwrap();
        let chart = write_chart(&dir);
        let script = dir.path().join("events.yaml");
        std::fs::write(&script, "- open\n- { event: remove, delay_ms: 20 }\n").unwrap();

        let out = run(&chart, Some(&script), &[], &quiet_config()).unwrap();
        assert!(out.contains("machine door finished"));
        assert!(out.contains("Configuration: gone"));
    }

    #[test]
    fn test_step_limit() {
        let dir = tempfile::tempdir().unwrap();
        let chart = write_chart(&dir);
        let mut config = quiet_config();
        config.runner.max_steps = 1;

        let mut session = Session::open(&chart, &config).unwrap();
        session.start().unwrap();
        session.post(Event::new("open"), None).unwrap();
        session.post(Event::new("close"), None).unwrap();
        let out = session.drain().unwrap();
        assert!(out.contains("Step limit reached"));
        assert_eq!(session.machine.active_state_names(), ["opened"]);
    }

    #[test]
    fn test_go_to_unknown_state() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = Session::open(&write_chart(&dir), &quiet_config()).unwrap();
        session.start().unwrap();
        assert!(matches!(
            session.go_to("nowhere"),
            Err(CoreError::UnknownState { .. })
        ));
        assert!(session.go_to("closed").unwrap().contains("already active"));
        assert!(session.go_to("opened").unwrap().contains("entered opened"));
    }
}
