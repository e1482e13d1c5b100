//! Interactive simulator shell
//!
//! Drives the in-memory registry the way the hardware and the host UI would,
//! and inspects the engine's view of each controller.

use crate::engine::types::{
    IndicatorMask, IndicatorReading, NodeId, BUTTON_COUNT, DEVICE_TYPE_PROPERTY, LEVEL_PROPERTY,
};
use crate::engine::EngineHandle;
use crate::registry::{DeviceRegistry, InMemoryRegistry};
use anyhow::{bail, Context, Result};
use colored::*;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::runtime::Handle;

/// A parsed shell command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplCommand {
    Devices,
    Press { node: NodeId, button: u8, on: bool },
    Indicator { node: NodeId, mask: IndicatorMask },
    Stale { node: NodeId, mask: IndicatorMask },
    Level { node: NodeId, level: u8 },
    State { node: NodeId },
    Help,
    Quit,
}

impl ReplCommand {
    /// Parse one input line; `Ok(None)` for blank lines
    pub fn parse(line: &str) -> Result<Option<Self>> {
        let parts: Vec<&str> = line.split_whitespace().collect();
        let Some((&name, args)) = parts.split_first() else {
            return Ok(None);
        };

        let command = match (name, args) {
            ("devices" | "ls", []) => ReplCommand::Devices,
            ("press", [node, button, state]) => {
                let button = button
                    .parse::<u8>()
                    .ok()
                    .filter(|b| (1..=BUTTON_COUNT).contains(b))
                    .with_context(|| format!("Button must be 1-{}", BUTTON_COUNT))?;
                let on = match *state {
                    "on" => true,
                    "off" => false,
                    other => bail!("Expected on|off, got '{}'", other),
                };
                ReplCommand::Press {
                    node: parse_node(node)?,
                    button,
                    on,
                }
            }
            ("indicator", [node, mask]) => ReplCommand::Indicator {
                node: parse_node(node)?,
                mask: parse_mask(mask)?,
            },
            ("stale", [node, mask]) => ReplCommand::Stale {
                node: parse_node(node)?,
                mask: parse_mask(mask)?,
            },
            ("level", [node, level]) => {
                let level = level
                    .parse::<u8>()
                    .ok()
                    .filter(|l| *l <= 99)
                    .context("Level must be 0-99")?;
                ReplCommand::Level {
                    node: parse_node(node)?,
                    level,
                }
            }
            ("state", [node]) => ReplCommand::State {
                node: parse_node(node)?,
            },
            ("help" | "?", []) => ReplCommand::Help,
            ("quit" | "exit", []) => ReplCommand::Quit,
            _ => bail!("Unknown command '{}' (try 'help')", line.trim()),
        };

        Ok(Some(command))
    }
}

fn parse_node(value: &str) -> Result<NodeId> {
    value
        .parse()
        .with_context(|| format!("Invalid node id '{}'", value))
}

/// Bitmask as decimal, `0b...` or `0x...`
fn parse_mask(value: &str) -> Result<IndicatorMask> {
    let bits = if let Some(binary) = value.strip_prefix("0b") {
        u8::from_str_radix(binary, 2)
    } else if let Some(hex) = value.strip_prefix("0x") {
        u8::from_str_radix(hex, 16)
    } else {
        value.parse()
    }
    .with_context(|| format!("Invalid bitmask '{}'", value))?;

    if bits > 0b11111 {
        bail!("Bitmask {} has bits beyond button {}", value, BUTTON_COUNT);
    }
    Ok(IndicatorMask::new(bits))
}

/// Simulator shell bound to a registry and a running engine
pub struct Repl {
    registry: Arc<InMemoryRegistry>,
    engine: EngineHandle,
    runtime: Handle,
}

impl Repl {
    pub fn new(registry: Arc<InMemoryRegistry>, engine: EngineHandle, runtime: Handle) -> Self {
        Self {
            registry,
            engine,
            runtime,
        }
    }

    /// Read-eval loop; blocks the calling thread until quit or EOF
    pub fn run(self) -> Result<()> {
        let mut rl = DefaultEditor::new()?;
        println!("{}", "Scene Sync simulator - type 'help' for commands".bold().cyan());

        loop {
            let line = match rl.readline("scene-sync> ") {
                Ok(line) => line,
                Err(ReadlineError::Interrupted | ReadlineError::Eof) => break,
                Err(e) => return Err(e.into()),
            };
            let _ = rl.add_history_entry(line.as_str());

            match ReplCommand::parse(&line) {
                Ok(Some(ReplCommand::Quit)) => break,
                Ok(Some(command)) => self.execute(command),
                Ok(None) => {}
                Err(e) => println!("{} {:#}", "error:".red().bold(), e),
            }
        }

        Ok(())
    }

    fn execute(&self, command: ReplCommand) {
        match command {
            ReplCommand::Devices => self.print_devices(),
            ReplCommand::Press { node, button, on } => {
                let device = self.registry.scheme().button_device(node, button).to_string();
                let value = json!(if on { "on" } else { "off" });
                if !self
                    .registry
                    .host_set_property(&device, LEVEL_PROPERTY, value)
                {
                    println!("{} no device {}", "error:".red().bold(), device);
                }
            }
            ReplCommand::Indicator { node, mask } => {
                match self.registry.report_indicator(node, mask) {
                    Some(reading) => println!(
                        "  node {} reported {} at {}",
                        node,
                        mask.to_string().yellow(),
                        reading.update_time
                    ),
                    None => println!("{} unknown node {}", "error:".red().bold(), node),
                }
            }
            ReplCommand::Stale { node, mask } => {
                let Some(state) = self.registry.node(node) else {
                    println!("{} unknown node {}", "error:".red().bold(), node);
                    return;
                };
                // Same timestamps as the last report, new value
                let reading = IndicatorReading {
                    value: mask,
                    ..state.indicator
                };
                self.registry.report_indicator_reading(node, reading);
                println!(
                    "  node {} re-reported {} at {}",
                    node,
                    mask.to_string().yellow(),
                    reading.update_time.to_string().dimmed()
                );
            }
            ReplCommand::Level { node, level } => {
                if !self.registry.set_load_level(node, level) {
                    println!("{} unknown node {}", "error:".red().bold(), node);
                }
            }
            ReplCommand::State { node } => self.print_state(node),
            ReplCommand::Help => print_help(),
            ReplCommand::Quit => {}
        }
    }

    fn print_devices(&self) {
        let devices = self.runtime.block_on(self.registry.list_devices());
        println!("\n{}", "Devices:".bold());
        for device in devices {
            let device_type = self
                .registry
                .property(&device, DEVICE_TYPE_PROPERTY)
                .unwrap_or(Value::Null);
            let level = self
                .registry
                .property(&device, LEVEL_PROPERTY)
                .unwrap_or(Value::Null);
            let level = match level.as_str() {
                Some("on") => "on".green(),
                Some("off") => "off".dimmed(),
                _ => level.to_string().cyan(),
            };
            println!(
                "  {:<40} {:<18} {}",
                device,
                device_type.as_str().unwrap_or("?").yellow(),
                level
            );
        }
        println!();
    }

    fn print_state(&self, node: NodeId) {
        let Some(record) = self.runtime.block_on(self.engine.controller(node)) else {
            println!("  node {} is not a tracked controller", node);
            return;
        };

        println!("\n{}", format!("Controller {}", node).bold());
        println!(
            "  desired indicator: {}",
            record.desired_indicator.to_string().yellow()
        );
        for button in 1..=BUTTON_COUNT {
            let device = self.registry.scheme().button_device(node, button).to_string();
            let state = self
                .registry
                .property(&device, LEVEL_PROPERTY)
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_else(|| "-".to_string());
            let lit = if record.desired_indicator.is_lit(button) {
                "●".green()
            } else {
                "○".dimmed()
            };
            println!(
                "  {} button {} {:<4} group {:?}",
                lit,
                button,
                state,
                record.group(button)
            );
        }

        match serde_json::to_string_pretty(&record) {
            Ok(json) => println!("{}", json.dimmed()),
            Err(e) => println!("{} {}", "error:".red().bold(), e),
        }
        println!();
    }
}

fn print_help() {
    println!("\n{}", "Commands:".bold());
    for (usage, text) in [
        ("devices", "list virtual devices"),
        ("press <node> <button> on|off", "toggle a virtual button"),
        ("indicator <node> <mask>", "node reports its indicator register"),
        ("stale <node> <mask>", "re-deliver the last report with a new value"),
        ("level <node> <0-99>", "load reports a new level"),
        ("state <node>", "show the engine's controller record"),
        ("quit", "stop the engine and exit"),
    ] {
        println!("  {:<32} {}", usage.cyan(), text);
    }
    println!();
}
