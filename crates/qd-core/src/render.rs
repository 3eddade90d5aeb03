use std::io::{self, IsTerminal, Write};

use chrono::{DateTime, Utc};
use unicode_width::UnicodeWidthStr;

use crate::config::Config;
use crate::datetime::format_local;
use crate::deadline::{DeadlineStatus, deadline_status, format_remaining, time_remaining};
use crate::notify::ReminderRequest;
use crate::reminders::offset_label;
use crate::store::{Attention, AttentionLevel, StatusCounts};
use crate::task::{Priority, Task};

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
}

impl Renderer {
    pub fn new(cfg: &Config) -> Self {
        Self {
            color: cfg.color_enabled() && io::stdout().is_terminal(),
        }
    }

    pub fn plain() -> Self {
        Self { color: false }
    }

    #[tracing::instrument(skip(self, out, tasks, now), fields(count = tasks.len()))]
    pub fn write_task_table<W: Write>(
        &self,
        out: &mut W,
        tasks: &[&Task],
        now: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        if tasks.is_empty() {
            writeln!(out, "No tasks.")?;
            return Ok(());
        }

        let headers = ["ID", "Type", "Status", "Remaining", "Pri", "Title"]
            .map(str::to_string)
            .to_vec();

        let rows = tasks
            .iter()
            .map(|task| {
                let (status, remaining) = if task.is_completed {
                    (self.paint("Done", "2"), String::new())
                } else {
                    let status = deadline_status(task, now);
                    (
                        self.paint(status.label(), status_color(status)),
                        format_remaining(time_remaining(task, now)),
                    )
                };
                vec![
                    self.paint(&task.short_id(), "33"),
                    task.task_type.label().to_string(),
                    status,
                    remaining,
                    self.paint(task.priority.label(), priority_color(task.priority)),
                    task.title.clone(),
                ]
            })
            .collect();

        write_table(out, headers, rows)
    }

    pub fn write_task_info<W: Write>(
        &self,
        out: &mut W,
        task: &Task,
        now: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        writeln!(out, "id          {}", task.id)?;
        writeln!(out, "title       {}", task.title)?;
        if !task.description.is_empty() {
            writeln!(out, "description {}", task.description)?;
        }
        writeln!(out, "type        {}", task.task_type.label())?;
        writeln!(out, "priority    {}", task.priority.label())?;
        writeln!(out, "completed   {}", if task.is_completed { "yes" } else { "no" })?;
        writeln!(out, "created     {}", format_local(task.created_at))?;
        match task.deadline {
            Some(deadline) => {
                let status = deadline_status(task, now);
                writeln!(out, "deadline    {}", format_local(deadline))?;
                writeln!(
                    out,
                    "status      {} ({})",
                    self.paint(status.label(), status_color(status)),
                    format_remaining(time_remaining(task, now))
                )?;
            }
            None => writeln!(out, "deadline    -")?,
        }
        writeln!(
            out,
            "reminders   {}",
            if task.notification_scheduled {
                "scheduled"
            } else {
                "none"
            }
        )?;
        Ok(())
    }

    pub fn write_status<W: Write>(
        &self,
        out: &mut W,
        counts: StatusCounts,
        attention: Attention,
    ) -> anyhow::Result<()> {
        writeln!(out, "active     {}", counts.active)?;
        writeln!(out, "overdue    {}", counts.overdue)?;
        writeln!(out, "completed  {}", counts.completed)?;
        let badge = match attention.level {
            AttentionLevel::Clear => self.paint("all clear", "32"),
            AttentionLevel::DueSoon => {
                self.paint(&format!("{} due soon", attention.count), "33")
            }
            AttentionLevel::Overdue => {
                self.paint(&format!("{} need attention", attention.count), "31")
            }
        };
        writeln!(out, "attention  {badge}")?;
        Ok(())
    }

    pub fn write_reminders<W: Write>(
        &self,
        out: &mut W,
        reminders: &[ReminderRequest],
    ) -> anyhow::Result<()> {
        if reminders.is_empty() {
            writeln!(out, "No pending reminders.")?;
            return Ok(());
        }

        let headers = ["Fires", "Before", "Level", "Title"]
            .map(str::to_string)
            .to_vec();
        let rows = reminders
            .iter()
            .map(|reminder| {
                vec![
                    format_local(reminder.trigger_at),
                    offset_label(reminder.offset_secs)
                        .map(str::to_string)
                        .unwrap_or_else(|| format!("{}s", reminder.offset_secs)),
                    format!("{:?}", reminder.level),
                    reminder.title.clone(),
                ]
            })
            .collect();
        write_table(out, headers, rows)
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

fn status_color(status: DeadlineStatus) -> &'static str {
    match status {
        DeadlineStatus::Overdue => "31",
        DeadlineStatus::Imminent => "91",
        DeadlineStatus::Soon => "33",
        DeadlineStatus::Normal => "32",
    }
}

fn priority_color(priority: Priority) -> &'static str {
    match priority {
        Priority::Urgent => "35",
        Priority::High => "31",
        Priority::Medium => "33",
        Priority::Low => "34",
    }
}

fn write_table<W: Write>(
    writer: &mut W,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.width()).collect();
    for row in &rows {
        for (idx, cell) in row.iter().enumerate() {
            widths[idx] = widths[idx].max(strip_ansi(cell).width());
        }
    }

    let last = headers.len().saturating_sub(1);
    for (idx, header) in headers.iter().enumerate() {
        write!(writer, "{header:width$}", width = widths[idx])?;
        if idx != last {
            write!(writer, " ")?;
        }
    }
    writeln!(writer)?;

    for (idx, width) in widths.iter().enumerate() {
        write!(writer, "{:-<width$}", "", width = *width)?;
        if idx != last {
            write!(writer, " ")?;
        }
    }
    writeln!(writer)?;

    for row in rows {
        for (idx, cell) in row.iter().enumerate() {
            write!(writer, "{cell}")?;
            if idx != last {
                let padding = widths[idx].saturating_sub(strip_ansi(cell).width());
                write!(writer, "{} ", " ".repeat(padding))?;
            }
        }
        writeln!(writer)?;
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

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 8, 0, 0)
            .single()
            .expect("valid now")
    }

    #[test]
    fn table_columns_align_on_display_width() {
        let wide = Task::new_queue("보고서 제출", now() + Duration::hours(3), now());
        let narrow = Task::new_stack("idea", now());
        let mut buf = Vec::new();
        Renderer::plain()
            .write_task_table(&mut buf, &[&wide, &narrow], now())
            .expect("render");

        let text = String::from_utf8(buf).expect("utf8");
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("ID "));
        assert!(lines[2].contains("Due today"));
        assert!(lines[2].contains("3 hours 0 minutes left"));
        assert!(lines[3].ends_with("idea"));
        assert_eq!(
            lines[2].find("Queue").expect("type column"),
            lines[3].find("Stack").expect("type column")
        );
    }

    #[test]
    fn reminder_table_labels_come_from_the_offset() {
        let task = Task::new_queue("renew passport", now() + Duration::days(2), now());
        let reminder = |offset_secs: i64| ReminderRequest {
            identifier: format!("{}-{offset_secs}", task.id),
            task_id: task.id,
            offset_secs,
            title: task.title.clone(),
            body: "Heads up".to_string(),
            trigger_at: now() + Duration::days(1),
            level: crate::notify::InterruptionLevel::Active,
            category: crate::notify::REMINDER_CATEGORY.to_string(),
        };

        let mut buf = Vec::new();
        Renderer::plain()
            .write_reminders(&mut buf, &[reminder(3_600), reminder(900)])
            .expect("render");

        let text = String::from_utf8(buf).expect("utf8");
        let lines: Vec<&str> = text.lines().collect();
        assert!(lines[2].contains("1 hour"));
        assert!(lines[3].contains("900s"));
        assert!(!text.contains("Heads up"));
    }

    #[test]
    fn strip_ansi_removes_color_codes() {
        assert_eq!(strip_ansi("\x1b[31mOverdue\x1b[0m"), "Overdue");
    }
}
