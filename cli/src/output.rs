//! Module `output` renders user-facing status lines and diagnostics.
//!
//! Two channels exist: human-readable lines with a four-character level
//! prefix, a two-tier scope, and a right-aligned status word; and, under
//! `--verbose`, structured JSON records.

use serde_json::json;

/// Reporter is the user-facing output channel.
#[derive(Clone, Copy, Debug)]
pub enum Reporter {
    /// Human prints aligned text lines.
    Human,
    /// Json prints one JSON record per line.
    Json,
}

impl Reporter {
    /// New selects the channel: JSON under `--verbose`.
    pub fn new(verbose: bool) -> Reporter {
        if verbose { Reporter::Json } else { Reporter::Human }
    }

    /// Resource reports one resource outcome under a release.
    pub fn resource(&self, release: &str, scope: &str, status: &str) {
        match self {
            Reporter::Human => {
                let scope = format!("{release} {scope}");
                println!("{:<4} {scope:<62}{status:>12}", "info");
            }
            Reporter::Json => println!(
                "{}",
                json!({
                    "type": "resource",
                    "release": release,
                    "resource": scope,
                    "status": status,
                })
            ),
        }
    }

    /// Warn reports a non-fatal condition.
    pub fn warn(&self, release: &str, message: &str) {
        match self {
            Reporter::Human => println!("{:<4} {release} {message}", "warn"),
            Reporter::Json => println!(
                "{}",
                json!({"type": "warning", "release": release, "message": message})
            ),
        }
    }

    /// Error reports one failure with an optional hint.
    pub fn error(&self, scope: &str, message: &str, hint: Option<&str>) {
        match self {
            Reporter::Human => {
                eprintln!("{:<4} {scope} {message:>12}", "err");
                if let Some(hint) = hint {
                    eprintln!("{:<4} {hint}", "");
                }
            }
            Reporter::Json => eprintln!(
                "{}",
                json!({
                    "type": "error",
                    "location": scope,
                    "message": message,
                    "hint": hint,
                })
            ),
        }
    }

    /// Summary reports a final one-line outcome.
    pub fn summary(&self, release: &str, message: &str) {
        match self {
            Reporter::Human => println!("{:<4} {release} {message}", "info"),
            Reporter::Json => println!(
                "{}",
                json!({"type": "summary", "release": release, "message": message})
            ),
        }
    }
}

/// CONFIG_HINT is the standard hint for configuration problems.
pub static CONFIG_HINT: &str = "Run `opm config vet` to check for configuration errors";
