use std::io::{self, IsTerminal, Write};

use anyhow::anyhow;
use serde_json::Value;
use unicode_width::UnicodeWidthStr;

use crate::config::Config;
use crate::fields::CustomField;
use crate::history::History;
use crate::session::Notice;
use crate::task::{Priority, Status, Task};
use crate::view::Page;

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
}

impl Renderer {
    pub fn new(cfg: &Config) -> anyhow::Result<Self> {
        let color_cfg = cfg.get("color").unwrap_or_else(|| "on".to_string());
        let color = match color_cfg.to_ascii_lowercase().as_str() {
            "on" | "yes" | "true" | "1" => true,
            "off" | "no" | "false" | "0" => false,
            other => return Err(anyhow!("invalid color setting: {other}")),
        };

        Ok(Self {
            color: color && io::stdout().is_terminal(),
        })
    }

    pub fn plain() -> Self {
        Self { color: false }
    }

    #[tracing::instrument(skip_all, fields(rows = page.items.len()))]
    pub fn print_task_page<W: Write>(
        &self,
        mut out: W,
        page: &Page<&Task>,
        fields: &[CustomField],
    ) -> anyhow::Result<()> {
        if page.total_items == 0 {
            writeln!(out, "No tasks.")?;
            return Ok(());
        }

        let mut headers = vec![
            "ID".to_string(),
            "Title".to_string(),
            "Priority".to_string(),
            "Status".to_string(),
        ];
        headers.extend(fields.iter().map(|field| field.name.clone()));

        let rows = page
            .items
            .iter()
            .map(|task| {
                let mut row = vec![
                    self.paint(&task.id.to_string(), "33"),
                    task.title.clone(),
                    self.priority_cell(task.priority),
                    self.status_cell(task.status),
                ];
                row.extend(
                    fields
                        .iter()
                        .map(|field| format_value(task.field(&field.name))),
                );
                row
            })
            .collect();

        write_table(&mut out, headers, rows)?;
        writeln!(
            out,
            "Page {}/{} ({} tasks)",
            page.page, page.total_pages, page.total_items
        )?;
        Ok(())
    }

    pub fn print_fields<W: Write>(
        &self,
        mut out: W,
        fields: &[CustomField],
    ) -> anyhow::Result<()> {
        if fields.is_empty() {
            writeln!(out, "No custom fields.")?;
            return Ok(());
        }

        let headers = vec!["ID".to_string(), "Name".to_string(), "Type".to_string()];
        let rows = fields
            .iter()
            .map(|field| {
                vec![
                    self.paint(&field.id.to_string(), "33"),
                    field.name.clone(),
                    field.kind.to_string(),
                ]
            })
            .collect();
        write_table(&mut out, headers, rows)
    }

    pub fn print_history<W: Write>(&self, mut out: W, history: &History) -> anyhow::Result<()> {
        writeln!(
            out,
            "snapshot  {}/{}",
            history.cursor() + 1,
            history.len()
        )?;
        writeln!(out, "undo      {}", yes_no(history.can_undo()))?;
        writeln!(out, "redo      {}", yes_no(history.can_redo()))?;
        Ok(())
    }

    /// Deletions get a red marker, everything else a green one.
    pub fn print_notice<W: Write>(&self, mut out: W, notice: &Notice) -> anyhow::Result<()> {
        let marker = if notice.is_deletion() {
            self.paint("-", "31")
        } else {
            self.paint("+", "32")
        };
        writeln!(out, "{marker} {notice}")?;
        Ok(())
    }

    fn priority_cell(&self, priority: Priority) -> String {
        match priority {
            Priority::Urgent => self.paint(priority.as_str(), "1;31"),
            Priority::High => self.paint(priority.as_str(), "31"),
            Priority::Medium => self.paint(priority.as_str(), "33"),
            Priority::None => String::new(),
        }
    }

    fn status_cell(&self, status: Status) -> String {
        match status {
            Status::Completed => self.paint(status.as_str(), "32"),
            Status::InProgress => self.paint(status.as_str(), "36"),
            Status::NotStarted => status.as_str().to_string(),
        }
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

fn yes_no(flag: bool) -> &'static str {
    if flag { "yes" } else { "no" }
}

fn format_value(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(text)) => text.clone(),
        Some(Value::Bool(true)) => "yes".to_string(),
        Some(Value::Bool(false)) => "no".to_string(),
        Some(other) => other.to_string(),
    }
}

fn write_table<W: Write>(
    mut writer: W,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let column_count = headers.len();
    let mut widths = vec![0usize; column_count];

    for (idx, header) in headers.iter().enumerate() {
        widths[idx] = widths[idx].max(UnicodeWidthStr::width(header.as_str()));
    }

    for row in &rows {
        for (idx, cell) in row.iter().enumerate() {
            widths[idx] = widths[idx].max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
        }
    }

    let line = |writer: &mut W, cells: &[String]| -> io::Result<()> {
        let mut text = String::new();
        for (cell, width) in cells.iter().zip(&widths) {
            let visible_width = UnicodeWidthStr::width(strip_ansi(cell).as_str());
            text.push_str(cell);
            text.push_str(&" ".repeat(width.saturating_sub(visible_width) + 1));
        }
        writeln!(writer, "{}", text.trim_end())
    };

    line(&mut writer, &headers)?;
    let rule: Vec<String> = widths.iter().map(|width| "-".repeat(*width)).collect();
    line(&mut writer, &rule)?;
    for row in &rows {
        line(&mut writer, row)?;
    }

    Ok(())
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;

    for ch in s.chars() {
        if escaped {
            if ch == 'm' {
                escaped = false;
            }
            continue;
        }

        if ch == '\x1b' {
            escaped = true;
            continue;
        }

        out.push(ch);
    }

    out
}
