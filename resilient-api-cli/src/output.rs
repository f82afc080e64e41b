//! Output formatting for CLI

use anyhow::Result;
use clap::ValueEnum;
use colored::Colorize;
use resilient_api_sdk::ApiResponse;

/// Output format for response bodies
#[derive(Debug, Clone, Copy, Default, ValueEnum, PartialEq, Eq)]
pub enum OutputFormat {
    /// Pretty-printed JSON (default)
    #[default]
    Json,
    /// Single-line JSON
    Compact,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Json => write!(f, "json"),
            Self::Compact => write!(f, "compact"),
        }
    }
}

impl std::str::FromStr for OutputFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "json" => Ok(Self::Json),
            "compact" => Ok(Self::Compact),
            other => anyhow::bail!("Unknown output format: {}", other),
        }
    }
}

/// Writes responses to stdout and status lines to stderr
pub struct OutputWriter {
    format: OutputFormat,
}

impl OutputWriter {
    pub fn new(format: OutputFormat, no_color: bool) -> Self {
        if no_color {
            colored::control::set_override(false);
        }
        Self { format }
    }

    /// Print the status line and the body of a response
    pub fn response(&self, response: &ApiResponse) -> Result<()> {
        eprintln!("{}", status_line(response.status));
        let body = render_body(&response.body, self.format)?;
        if !body.is_empty() {
            println!("{}", body);
        }
        Ok(())
    }

    pub fn success(&self, message: &str) {
        eprintln!("{} {}", "✓".green(), message);
    }

    pub fn error(&self, message: &str) {
        eprintln!("{} {}", "✗".red(), message);
    }

    pub fn warning(&self, message: &str) {
        eprintln!("{} {}", "⚠".yellow(), message);
    }

    pub fn info(&self, message: &str) {
        eprintln!("{} {}", "ℹ".blue(), message);
    }

    /// Start a spinner for an in-flight request
    pub fn spinner(&self, message: &str) -> indicatif::ProgressBar {
        let pb = indicatif::ProgressBar::new_spinner();
        if let Ok(style) = indicatif::ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
            pb.set_style(style);
        }
        pb.set_message(message.to_string());
        pb.enable_steady_tick(std::time::Duration::from_millis(100));
        pb
    }
}

/// `HTTP <status>` colored by class
pub fn status_line(status: u16) -> String {
    let text = format!("HTTP {}", status);
    match status {
        200..=299 => text.green().bold().to_string(),
        300..=399 => text.yellow().to_string(),
        _ => text.red().bold().to_string(),
    }
}

/// Render a response body; non-JSON bodies are printed as received
pub fn render_body(body: &str, format: OutputFormat) -> Result<String> {
    if body.trim().is_empty() {
        return Ok(String::new());
    }
    let Ok(value) = serde_json::from_str::<serde_json::Value>(body) else {
        return Ok(body.to_string());
    };
    Ok(match format {
        OutputFormat::Json => serde_json::to_string_pretty(&value)?,
        OutputFormat::Compact => serde_json::to_string(&value)?,
    })
}

/// Print a key-value pair in detail format
pub fn print_field(key: &str, value: &str) {
    println!("  {}: {}", key.cyan(), value);
}

/// Print a section header
pub fn print_section(title: &str) {
    println!("\n{}", title.bold().underline());
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_render_body() {
        let body = r#"{"id":5,"tags":["a"]}"#;

        assert_eq!(
            render_body(body, OutputFormat::Json).unwrap(),
            "{\n  \"id\": 5,\n  \"tags\": [\n    \"a\"\n  ]\n}"
        );
        assert_eq!(render_body(body, OutputFormat::Compact).unwrap(), body);
        assert_eq!(render_body("plain text", OutputFormat::Json).unwrap(), "plain text");
        assert_eq!(render_body("  ", OutputFormat::Json).unwrap(), "");
    }

    #[test]
    fn test_status_line_text() {
        colored::control::set_override(false);
        assert_eq!(status_line(201), "HTTP 201");
        assert_eq!(status_line(503), "HTTP 503");
    }

    #[test]
    fn test_output_format_parsing() {
        assert_eq!("json".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert_eq!(OutputFormat::Compact.to_string(), "compact");
        assert!("yaml".parse::<OutputFormat>().is_err());
    }
}
