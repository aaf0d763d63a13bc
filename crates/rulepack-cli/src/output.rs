//! Human and JSON output rendering.
//!
//! Human mode prints a title, event lines, hand-rendered tables, a sorted
//! summary, and a done line. JSON mode wraps every result in the
//! `{command, result}` envelope; errors become
//! `{command: "error", result: {failedCommand, error: {message}}}`.

use serde::Serialize;
use std::collections::BTreeMap;
use std::io::IsTerminal;

/// One informational line above the tables.
pub struct Event {
    pub level: &'static str,
    pub message: String,
}

impl Event {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            level: "info",
            message: message.into(),
        }
    }

    pub fn warn(message: impl Into<String>) -> Self {
        Self {
            level: "warn",
            message: message.into(),
        }
    }
}

/// A titled table of string rows.
pub struct Table {
    pub title: &'static str,
    pub columns: Vec<&'static str>,
    pub rows: Vec<Vec<String>>,
}

/// Everything one command prints in human mode.
#[derive(Default)]
pub struct HumanPayload {
    pub title: &'static str,
    pub events: Vec<Event>,
    pub tables: Vec<Table>,
    pub summary: BTreeMap<&'static str, String>,
    pub done: &'static str,
}

impl Default for Table {
    fn default() -> Self {
        Self {
            title: "",
            columns: Vec::new(),
            rows: Vec::new(),
        }
    }
}

/// Output renderer selected by the global `--json` / `--no-color` flags.
pub struct Renderer {
    json: bool,
    color: bool,
}

impl Renderer {
    pub fn new(json: bool, no_color: bool) -> Self {
        Self {
            json,
            color: !no_color && std::io::stdout().is_terminal(),
        }
    }

    pub fn json_mode(&self) -> bool {
        self.json
    }

    /// Emit a command result: JSON envelope in JSON mode, the human payload
    /// otherwise.
    pub fn emit<T: Serialize>(
        &self,
        command: &str,
        result: &T,
        payload: HumanPayload,
    ) -> anyhow::Result<()> {
        if self.json {
            self.render_json(command, result)
        } else {
            self.render_human(payload);
            Ok(())
        }
    }

    pub fn render_json<T: Serialize>(&self, command: &str, result: &T) -> anyhow::Result<()> {
        #[derive(Serialize)]
        struct Envelope<'a, T> {
            command: &'a str,
            result: &'a T,
        }
        let mut text = serde_json::to_string_pretty(&Envelope { command, result })?;
        text.push('\n');
        print!("{text}");
        Ok(())
    }

    pub fn render_human(&self, payload: HumanPayload) {
        println!("{}", self.style(payload.title, Style::Header));
        for event in &payload.events {
            match event.level {
                "warn" => println!("{}", self.style(&format!("! {}", event.message), Style::Warn)),
                "error" => println!("{}", self.style(&format!("x {}", event.message), Style::Error)),
                _ => println!("- {}", event.message),
            }
        }
        for table in &payload.tables {
            println!();
            if !table.title.is_empty() {
                println!("{}", self.style(table.title, Style::Subhead));
            }
            println!("{}", render_table(&table.columns, &table.rows));
        }
        if !payload.summary.is_empty() {
            println!();
            println!("{}", self.style("Summary", Style::Subhead));
            for (key, value) in &payload.summary {
                println!("  {key}: {value}");
            }
        }
        if !payload.done.is_empty() {
            println!();
            println!("{}", self.style(&format!("OK {}", payload.done), Style::Done));
        }
    }

    /// A single bold red error line on stderr, or the JSON error envelope.
    pub fn render_error(&self, failed_command: &str, error: &anyhow::Error) {
        if self.json {
            #[derive(Serialize)]
            struct ErrorBody<'a> {
                #[serde(rename = "failedCommand")]
                failed_command: &'a str,
                error: ErrorMessage,
            }
            #[derive(Serialize)]
            struct ErrorMessage {
                message: String,
            }
            let _ = self.render_json(
                "error",
                &ErrorBody {
                    failed_command,
                    error: ErrorMessage {
                        message: error.to_string(),
                    },
                },
            );
            return;
        }
        eprintln!("{}", self.style(&format!("Error: {error}"), Style::Error));
    }

    fn style(&self, text: &str, style: Style) -> String {
        if !self.color {
            return text.to_string();
        }
        let code = match style {
            Style::Header => "1;36",
            Style::Subhead => "1",
            Style::Warn => "33",
            Style::Error => "1;31",
            Style::Done => "1;32",
        };
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

enum Style {
    Header,
    Subhead,
    Warn,
    Error,
    Done,
}

fn render_table(columns: &[&str], rows: &[Vec<String>]) -> String {
    if columns.is_empty() {
        return String::new();
    }
    let mut widths: Vec<usize> = columns.iter().map(|c| c.len()).collect();
    for row in rows {
        for (i, width) in widths.iter_mut().enumerate() {
            let len = row.get(i).map_or(0, String::len);
            if len > *width {
                *width = len;
            }
        }
    }
    let mut out = String::new();
    let write_row = |out: &mut String, values: &[String]| {
        out.push('|');
        for (i, width) in widths.iter().enumerate() {
            let value = values.get(i).map_or("", String::as_str);
            out.push(' ');
            out.push_str(value);
            out.push_str(&" ".repeat(width - value.len()));
            out.push_str(" |");
        }
        out.push('\n');
    };
    let header: Vec<String> = columns.iter().map(|c| (*c).to_string()).collect();
    write_row(&mut out, &header);
    out.push('|');
    for width in &widths {
        out.push_str(&"-".repeat(width + 2));
        out.push('|');
    }
    out.push('\n');
    for row in rows {
        write_row(&mut out, row);
    }
    out.trim_end_matches('\n').to_string()
}
