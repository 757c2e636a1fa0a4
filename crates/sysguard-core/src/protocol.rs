//! Line-oriented request/response protocol.
//!
//! A request is one line: a sensor path for its value, the path followed by
//! `?` for its metadata, or one of the commands `monitors` and `quit`.

use crate::registry::SensorRegistry;
use crate::Error;

/// Response to a path that is not registered.
pub const UNKNOWN_COMMAND: &str = "UNKNOWN COMMAND\n";

/// Response to a registered sensor whose source vanished.
pub const UNAVAILABLE: &str = "UNAVAILABLE\n";

/// Notification that the sensor set changed and must be re-enumerated.
pub const RECONFIGURE: &str = "\x1bRECONFIGURE\x1b\n";

/// Metadata request suffix.
pub const INFO_SUFFIX: char = '?';

/// A parsed request line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command<'a> {
    Value(&'a str),
    Info(&'a str),
    Monitors,
    Quit,
    Empty,
}

impl<'a> Command<'a> {
    pub fn parse(line: &'a str) -> Self {
        let line = line.trim();
        match line {
            "" => Command::Empty,
            "monitors" => Command::Monitors,
            "quit" => Command::Quit,
            _ => match line.strip_suffix(INFO_SUFFIX) {
                Some(path) => Command::Info(path),
                None => Command::Value(line),
            },
        }
    }
}

/// What to send back for a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Write this text to the client.
    Reply(String),
    /// Nothing to write.
    Silent,
    /// Close the connection.
    Close,
}

/// Answers one request line from the registry.
pub fn respond(registry: &SensorRegistry, line: &str) -> Response {
    match Command::parse(line) {
        Command::Empty => Response::Silent,
        Command::Quit => Response::Close,
        Command::Monitors => {
            let mut reply = String::new();
            for sensor in registry.sensors() {
                reply.push_str(sensor.path());
                reply.push('\t');
                reply.push_str(&sensor.sensor_type().to_string());
                reply.push('\n');
            }
            reply.push('\n');
            Response::Reply(reply)
        }
        Command::Value(path) => {
            let reply = match registry.lookup(path).and_then(|sensor| sensor.read()) {
                Ok(reading) => format!("{}\n", reading),
                Err(Error::SensorUnavailable(_)) => UNAVAILABLE.to_string(),
                Err(_) => UNKNOWN_COMMAND.to_string(),
            };
            Response::Reply(reply)
        }
        Command::Info(path) => {
            let reply = match registry.lookup(path) {
                Ok(sensor) => format!("{}\n", sensor.describe()),
                Err(_) => UNKNOWN_COMMAND.to_string(),
            };
            Response::Reply(reply)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor::{Reading, SensorCell, SensorInfo, SensorType};

    fn registry() -> (SensorRegistry, SensorCell) {
        let mut registry = SensorRegistry::new();
        let blocks = SensorCell::new();
        blocks.set(Reading::Integer(1048576));
        registry.register(
            "SoftRaid/md0/NumBlocks",
            SensorType::Integer,
            blocks.reader(),
            Box::new(|| SensorInfo::new("Number of blocks", 0.0, 0.0, "blocks")),
            "softraid",
        );

        let load = SensorCell::new();
        load.set(Reading::Float(0.5));
        registry.register(
            "cpu/loadavg1",
            SensorType::Float,
            load.reader(),
            Box::new(|| SensorInfo::new("Load average 1 min", 0.0, 0.0, "")),
            "loadavg",
        );
        (registry, blocks)
    }

    #[test]
    fn test_parse() {
        assert_eq!(Command::parse("cpu/loadavg1\n"), Command::Value("cpu/loadavg1"));
        assert_eq!(Command::parse("cpu/loadavg1?"), Command::Info("cpu/loadavg1"));
        assert_eq!(Command::parse("monitors"), Command::Monitors);
        assert_eq!(Command::parse("quit\r\n"), Command::Quit);
        assert_eq!(Command::parse("   "), Command::Empty);
    }

    #[test]
    fn test_value_responses() {
        let (registry, _) = registry();
        assert_eq!(
            respond(&registry, "SoftRaid/md0/NumBlocks"),
            Response::Reply("1048576\n".to_string())
        );
        assert_eq!(
            respond(&registry, "cpu/loadavg1"),
            Response::Reply("0.500000\n".to_string())
        );
    }

    #[test]
    fn test_info_response() {
        let (registry, _) = registry();
        assert_eq!(
            respond(&registry, "SoftRaid/md0/NumBlocks?"),
            Response::Reply("Number of blocks\t0\t0\tblocks\n".to_string())
        );
    }

    #[test]
    fn test_unknown_path_is_deterministic() {
        let (registry, _) = registry();
        for _ in 0..3 {
            assert_eq!(
                respond(&registry, "SoftRaid/md7/NumBlocks"),
                Response::Reply(UNKNOWN_COMMAND.to_string())
            );
            assert_eq!(
                respond(&registry, "SoftRaid/md7/NumBlocks?"),
                Response::Reply(UNKNOWN_COMMAND.to_string())
            );
        }
        // Lookup is by exact path only.
        assert_eq!(
            respond(&registry, "softraid/md0/numblocks"),
            Response::Reply(UNKNOWN_COMMAND.to_string())
        );
    }

    #[test]
    fn test_unavailable_value() {
        let (registry, blocks) = registry();
        blocks.clear();
        assert_eq!(
            respond(&registry, "SoftRaid/md0/NumBlocks"),
            Response::Reply(UNAVAILABLE.to_string())
        );
        // Metadata stays available.
        assert_eq!(
            respond(&registry, "SoftRaid/md0/NumBlocks?"),
            Response::Reply("Number of blocks\t0\t0\tblocks\n".to_string())
        );
    }

    #[test]
    fn test_monitors_listing() {
        let (registry, _) = registry();
        assert_eq!(
            respond(&registry, "monitors"),
            Response::Reply(
                "SoftRaid/md0/NumBlocks\tinteger\ncpu/loadavg1\tfloat\n\n".to_string()
            )
        );
    }

    #[test]
    fn test_control_lines() {
        let (registry, _) = registry();
        assert_eq!(respond(&registry, ""), Response::Silent);
        assert_eq!(respond(&registry, "quit"), Response::Close);
    }
}
