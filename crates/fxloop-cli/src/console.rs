//! Line commands on stdin while the loop runs.

use fxloop_engine::{EffectKind, EffectSwitch, Shutdown};
use std::io::BufRead;
use std::thread;

#[derive(Debug, PartialEq)]
enum Command {
    Preset(usize),
    Effect(EffectKind),
    Quit,
}

fn parse(line: &str) -> Result<Option<Command>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    if matches!(line, "q" | "quit" | "exit") {
        return Ok(Some(Command::Quit));
    }
    if let Ok(slot) = line.parse::<usize>() {
        return Ok(Some(Command::Preset(slot)));
    }
    let kind: EffectKind = line.parse()?;
    kind.check()?;
    Ok(Some(Command::Effect(kind)))
}

/// Read commands until EOF. The thread is detached: a blocked stdin read
/// must not hold up shutdown.
pub fn spawn(switch: EffectSwitch, presets: Vec<EffectKind>, shutdown: Shutdown) {
    let reader = thread::Builder::new().name("fx-console".into()).spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if shutdown.is_triggered() {
                break;
            }
            match parse(&line) {
                Ok(None) => {}
                Ok(Some(Command::Quit)) => {
                    shutdown.trigger();
                    break;
                }
                Ok(Some(Command::Preset(slot))) => match presets.get(slot) {
                    Some(kind) => {
                        tracing::info!(slot, effect = %kind, "preset selected");
                        switch.select(kind.clone());
                    }
                    None => tracing::warn!(slot, "no such preset (0..{})", presets.len()),
                },
                Ok(Some(Command::Effect(kind))) => {
                    tracing::info!(effect = %kind, "effect selected");
                    switch.select(kind);
                }
                Err(e) => tracing::warn!("{e}"),
            }
        }
    });
    if let Err(e) = reader {
        tracing::warn!("cannot read commands from stdin: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_select_presets() {
        assert_eq!(parse(" 3 "), Ok(Some(Command::Preset(3))));
    }

    #[test]
    fn effect_specs_and_quit() {
        assert_eq!(parse("tremolo:4"), Ok(Some(Command::Effect(EffectKind::Tremolo { hz: 4.0 }))));
        assert_eq!(parse("q"), Ok(Some(Command::Quit)));
        assert_eq!(parse(""), Ok(None));
    }

    #[test]
    fn bad_input_is_reported() {
        assert!(parse("reverb").is_err());
        assert!(parse("echo:100:2").is_err());
    }
}
