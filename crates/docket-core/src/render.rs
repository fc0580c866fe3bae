use std::io::{self, IsTerminal, Write};

use chrono::NaiveDate;
use unicode_width::UnicodeWidthStr;

use crate::autosave::{SaveStatus, Severity};
use crate::config::Config;
use crate::filter::ViewFilter;
use crate::task::Task;

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
}

impl Renderer {
    pub fn new(cfg: &Config) -> anyhow::Result<Self> {
        let color = cfg.get_bool("color")?.unwrap_or(true);

        Ok(Self {
            color: color && io::stdout().is_terminal(),
        })
    }

    pub fn plain() -> Self {
        Self { color: false }
    }

    #[tracing::instrument(skip(self, out, tasks, today), fields(count = tasks.len()))]
    pub fn write_view<W: Write>(
        &self,
        out: &mut W,
        tasks: &[Task],
        today: NaiveDate,
    ) -> anyhow::Result<()> {
        if tasks.is_empty() {
            writeln!(out, "No tasks.")?;
            return Ok(());
        }

        let headers = vec![
            "#".to_string(),
            "Done".to_string(),
            "Due".to_string(),
            "Title".to_string(),
            "Tags".to_string(),
            "Id".to_string(),
        ];

        let mut rows = Vec::with_capacity(tasks.len());

        for (idx, task) in tasks.iter().enumerate() {
            let position = self.paint(&(idx + 1).to_string(), "33");
            let done = if task.is_completed { "x" } else { "" }.to_string();

            let due = task.due_display();
            let due = if task.is_overdue(today) {
                self.paint(&due, "31")
            } else {
                due
            };

            let short_id = task.id.chars().take(8).collect::<String>();

            rows.push(vec![
                position,
                done,
                due,
                task.title.clone(),
                task.tag_list().join(", "),
                short_id,
            ]);
        }

        write_table(out, headers, rows)?;
        Ok(())
    }

    pub fn write_status<W: Write>(&self, out: &mut W, status: &SaveStatus) -> anyhow::Result<()> {
        let code = match status.severity {
            Severity::Saved => "32",
            Severity::Saving => "33",
            Severity::Error => "31",
        };
        writeln!(out, "{}", self.paint(&status.message, code))?;
        Ok(())
    }

    pub fn write_filter<W: Write>(&self, out: &mut W, filter: &ViewFilter) -> anyhow::Result<()> {
        let tag = if filter.tag.trim().is_empty() {
            "-".to_string()
        } else {
            filter.tag.clone()
        };
        writeln!(out, "filter: date={} tag={}", filter.date, tag)?;
        Ok(())
    }

    #[tracing::instrument(skip(self, out, task))]
    pub fn write_task<W: Write>(&self, out: &mut W, task: &Task) -> anyhow::Result<()> {
        writeln!(out, "id        {}", task.id)?;
        writeln!(out, "title     {}", task.title)?;
        writeln!(out, "done      {}", if task.is_completed { "yes" } else { "no" })?;
        writeln!(out, "tags      {}", task.tag_list().join(", "))?;
        writeln!(out, "due       {}", task.due_display())?;
        Ok(())
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color || text.is_empty() {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
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

    write_row(&mut writer, &headers, &widths)?;

    let rule = widths.iter().map(|w| "-".repeat(*w)).collect::<Vec<_>>();
    write_row(&mut writer, &rule, &widths)?;

    for row in &rows {
        write_row(&mut writer, row, &widths)?;
    }

    Ok(())
}

fn write_row<W: Write>(writer: &mut W, cells: &[String], widths: &[usize]) -> anyhow::Result<()> {
    let mut line = String::new();
    for (cell, width) in cells.iter().zip(widths) {
        let visible_width = UnicodeWidthStr::width(strip_ansi(cell).as_str());
        let padding = width.saturating_sub(visible_width);
        line.push_str(cell);
        line.push_str(&" ".repeat(padding + 1));
    }
    writeln!(writer, "{}", line.trim_end())?;
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
