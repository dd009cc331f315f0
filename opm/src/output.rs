//! Output holds the process-wide output format and the JSON envelope.
//!
//! The format is the only process-wide mutable state in the tool; it is
//! initialized exactly once at startup.

use std::sync::OnceLock;

use serde_json::{Value, json};

/// Format selects the output rendering.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Format {
    /// Human-readable text.
    #[default]
    Text,
    /// The JSON envelope.
    Json,
}

impl std::str::FromStr for Format {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Format::Text),
            "json" => Ok(Format::Json),
            other => Err(format!("unknown format {other:?} (expected text or json)")),
        }
    }
}

static FORMAT: OnceLock<Format> = OnceLock::new();

/// Init sets the process-wide format. Later calls are ignored.
pub fn init(format: Format) {
    let _ = FORMAT.set(format);
}

/// Format reports the process-wide format.
pub fn format() -> Format {
    *FORMAT.get().unwrap_or(&Format::Text)
}

/// Envelope emits the JSON result envelope for a command.
pub fn envelope(command: &str, success: bool, result: Value, warnings: &[String], errors: &[String]) {
    let body = json!({
        "command": command,
        "success": success,
        "result": result,
        "warnings": warnings,
        "errors": errors,
    });
    println!("{}", serde_json::to_string_pretty(&body).expect("envelope serializes"));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_parses() {
        assert_eq!("text".parse::<Format>().unwrap(), Format::Text);
        assert_eq!("json".parse::<Format>().unwrap(), Format::Json);
        assert!("yaml".parse::<Format>().is_err());
    }
}
