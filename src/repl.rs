//! Interactive REPL.

use crate::commands::Session;
use crate::config::Config;
use colored::Colorize;
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use rustyline::Editor;
use statecraft_core::Event;
use std::path::Path;
use std::time::Duration;

const HELP_TEXT: &str = r#"
Available commands:
  help                            Show this help

  post <event> [payload]          Queue an event (payload is JSON)
  signal <sender> <event>         Queue an event from a sender
  delay <ms> <event>              Queue a delayed event

  step                            Process one event
  drain                           Process events until the queue is empty

  config                          Show the active states
  status                          Show status, queue sizes and last error
  goto <state>                    Jump straight to a state

  start                           Start the machine
  stop                            Stop without running exit hooks
  reset                           Forget configuration and history

  quit, exit                      Exit the REPL
"#;

pub fn run(chart: &Path, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let mut session = Session::open(chart, config)?;
    println!(
        "{} {}",
        "statecraft".bold().cyan(),
        session.machine.name().bold()
    );
    let started = session.start()?;
    if !started.is_empty() {
        println!("{}", started);
    }

    let rl_config = rustyline::Config::builder()
        .history_ignore_space(true)
        .auto_add_history(true)
        .build();
    let mut rl: Editor<(), DefaultHistory> = Editor::with_config(rl_config)?;

    let history_path = config.runner.history_path();
    let _ = rl.load_history(&history_path);

    println!("Type 'help' for available commands.\n");

    loop {
        let prompt = format!("{} ", format!("{}>", session.machine.name()).cyan());
        match rl.readline(&prompt) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                match execute_repl_command(&mut session, line) {
                    Ok(Some(output)) if output.is_empty() => {}
                    Ok(Some(output)) => println!("{}\n", output),
                    Ok(None) => break,
                    Err(e) => println!("{}: {}\n", "Error".red(), e),
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("^D");
                break;
            }
            Err(err) => {
                println!("{}: {:?}", "Error".red(), err);
                break;
            }
        }
    }

    let _ = rl.save_history(&history_path);
    Ok(())
}

/// Runs one REPL line. `Ok(None)` ends the session.
fn execute_repl_command(
    session: &mut Session,
    line: &str,
) -> Result<Option<String>, Box<dyn std::error::Error>> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.is_empty() {
        return Ok(Some(String::new()));
    }

    let cmd = parts[0].to_lowercase();
    let args = &parts[1..];

    match cmd.as_str() {
        "help" | "?" => Ok(Some(HELP_TEXT.to_string())),

        "quit" | "exit" | "q" => Ok(None),

        "post" | "p" => {
            if args.is_empty() {
                return Ok(Some("Usage: post <event> [payload_json]".to_string()));
            }
            let mut event = Event::new(args[0]);
            if args.len() > 1 {
                event = event.with_payload(serde_json::from_str(&args[1..].join(" "))?);
            }
            session.post(event, None)?;
            Ok(Some(format!("{} {}", "Queued".green(), args[0].cyan())))
        }

        "signal" => {
            if args.len() < 2 {
                return Ok(Some("Usage: signal <sender> <event>".to_string()));
            }
            session.post(Event::signal(args[0], args[1]), None)?;
            Ok(Some(format!(
                "{} {} from {}",
                "Queued".green(),
                args[1].cyan(),
                args[0]
            )))
        }

        "delay" => {
            if args.len() < 2 {
                return Ok(Some("Usage: delay <ms> <event>".to_string()));
            }
            let ms: u64 = args[0].parse()?;
            session.post(Event::new(args[1]), Some(Duration::from_millis(ms)))?;
            Ok(Some(format!(
                "{} {} in {}ms",
                "Scheduled".green(),
                args[1].cyan(),
                ms
            )))
        }

        "step" | "s" => Ok(Some(session.step()?)),

        "drain" | "d" => Ok(Some(session.drain()?)),

        "config" | "c" => Ok(Some(session.configuration())),

        "status" => Ok(Some(session.status())),

        "goto" | "g" => {
            if args.is_empty() {
                return Ok(Some("Usage: goto <state>".to_string()));
            }
            Ok(Some(session.go_to(args[0])?))
        }

        "start" => Ok(Some(session.start()?)),

        "stop" => Ok(Some(session.stop()?)),

        "reset" => Ok(Some(session.reset()?)),

        _ => Ok(Some(format!(
            "Unknown command: {}. Type 'help' for help.",
            cmd
        ))),
    }
}
