use crate::error::{ConfigError, Direction};
use cpal::traits::{DeviceTrait, HostTrait};

#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub name: String,
    pub has_input: bool,
    pub has_output: bool,
    pub is_default_input: bool,
    pub is_default_output: bool,
}

pub fn list_devices() -> Result<Vec<DeviceInfo>, ConfigError> {
    let host = cpal::default_host();

    let default_in  = host.default_input_device().map(|d| d.name().unwrap_or_default());
    let default_out = host.default_output_device().map(|d| d.name().unwrap_or_default());

    let devices = host
        .devices()
        .map_err(|e| ConfigError::Host(e.to_string()))?;

    let mut out = Vec::new();
    for dev in devices {
        let name = dev.name().unwrap_or_else(|_| "<unknown>".to_string());
        let is_default_input  = default_in.as_deref() == Some(name.as_str());
        let is_default_output = default_out.as_deref() == Some(name.as_str());
        out.push(DeviceInfo {
            has_input: supports(&dev, Direction::Capture),
            has_output: supports(&dev, Direction::Playback),
            name,
            is_default_input,
            is_default_output,
        });
    }
    Ok(out)
}

/// Pretty-print for CLI
pub fn print_devices() -> Result<(), ConfigError> {
    let list = list_devices()?;
    if list.is_empty() {
        println!("(no devices found)");
        return Ok(());
    }
    for (i, d) in list.iter().enumerate() {
        let mut marks = String::new();
        if d.is_default_input { marks.push_str("*I"); }
        if d.is_default_output { if !marks.is_empty() { marks.push(' ');} marks.push_str("*O"); }
        if !marks.is_empty() { print!("[{marks}] "); }
        let caps = match (d.has_input, d.has_output) {
            (true, true) => "in/out",
            (true, false) => "in",
            (false, true) => "out",
            (false, false) => "-",
        };
        println!("{:>2}  {:<6} {}", i, caps, d.name);
    }
    Ok(())
}

fn supports(dev: &cpal::Device, direction: Direction) -> bool {
    match direction {
        Direction::Capture => dev.supported_input_configs().map(|mut c| c.next().is_some()).unwrap_or(false),
        Direction::Playback => dev.supported_output_configs().map(|mut c| c.next().is_some()).unwrap_or(false),
    }
}

/* ---------- device picking (by index, name, or default) ---------- */

/// Index is the number `print_devices` shows, counted over every host
/// device; a device that cannot work in `direction` is refused. Names match
/// by case-insensitive substring. Without either, the host default is used.
pub(crate) fn pick_device(
    host: &cpal::Host,
    direction: Direction,
    name_substr: Option<&str>,
    index: Option<usize>,
) -> Result<cpal::Device, ConfigError> {
    let enumerate = || {
        host.devices()
            .map_err(|e| ConfigError::Host(e.to_string()))
    };

    if let Some(idx) = index {
        let listed = enumerate()?.map(|d| {
            let ok = supports(&d, direction);
            (d, ok)
        });
        return nth_capable(listed, idx, direction);
    }

    if let Some(q) = name_substr {
        let qn = q.to_lowercase();
        return enumerate()?
            .find(|d| {
                d.name().map(|n| n.to_lowercase().contains(&qn)).unwrap_or(false) && supports(d, direction)
            })
            .ok_or_else(|| ConfigError::Open {
                direction,
                name: q.to_string(),
                reason: "no matching device".into(),
            });
    }

    let default = match direction {
        Direction::Capture => host.default_input_device(),
        Direction::Playback => host.default_output_device(),
    };
    default.ok_or(ConfigError::NoDevice(direction))
}

fn nth_capable<T>(
    mut listed: impl Iterator<Item = (T, bool)>,
    idx: usize,
    direction: Direction,
) -> Result<T, ConfigError> {
    let refuse = |reason: &str| ConfigError::Open { direction, name: format!("#{idx}"), reason: reason.into() };
    match listed.nth(idx) {
        Some((dev, true)) => Ok(dev),
        Some((_, false)) => Err(refuse(match direction {
            Direction::Capture => "device cannot capture",
            Direction::Playback => "device cannot play",
        })),
        None => Err(refuse("no such device index")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // "hdmi" plays only, "mic" captures only, "usb" does both
    fn listing(direction: Direction) -> impl Iterator<Item = (&'static str, bool)> {
        [("hdmi", false, true), ("mic", true, false), ("usb", true, true)]
            .into_iter()
            .map(move |(name, i, o)| (name, if direction == Direction::Capture { i } else { o }))
    }

    #[test]
    fn index_matches_the_printed_listing() {
        assert_eq!(nth_capable(listing(Direction::Capture), 1, Direction::Capture).unwrap(), "mic");
        assert_eq!(nth_capable(listing(Direction::Capture), 2, Direction::Capture).unwrap(), "usb");
        assert_eq!(nth_capable(listing(Direction::Playback), 0, Direction::Playback).unwrap(), "hdmi");
        assert_eq!(nth_capable(listing(Direction::Playback), 2, Direction::Playback).unwrap(), "usb");
    }

    #[test]
    fn wrong_direction_and_missing_index_are_refused() {
        let err = nth_capable(listing(Direction::Capture), 0, Direction::Capture).unwrap_err();
        assert!(matches!(&err, ConfigError::Open { name, reason, .. } if name == "#0" && reason.contains("cannot capture")), "{err}");
        let err = nth_capable(listing(Direction::Playback), 1, Direction::Playback).unwrap_err();
        assert!(matches!(&err, ConfigError::Open { reason, .. } if reason.contains("cannot play")), "{err}");
        let err = nth_capable(listing(Direction::Capture), 3, Direction::Capture).unwrap_err();
        assert!(matches!(&err, ConfigError::Open { reason, .. } if reason == "no such device index"), "{err}");
    }
}
