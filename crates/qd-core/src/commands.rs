use std::io::Write;
use std::path::Path;

use anyhow::{Context, anyhow};
use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::cli::{AddArgs, Command, EditArgs, ListArgs, ListView};
use crate::config::Config;
use crate::datetime::{format_local, parse_deadline_expr};
use crate::notify::NotificationCenter;
use crate::render::Renderer;
use crate::store::TaskStore;
use crate::task::{Task, TaskDraft, TaskType};

#[instrument(skip_all)]
pub fn dispatch<W: Write>(
    store: &mut TaskStore,
    cfg: &Config,
    renderer: &Renderer,
    center: &dyn NotificationCenter,
    command: Command,
    out: &mut W,
) -> anyhow::Result<()> {
    let now = store.now();
    debug!(?command, "dispatching command");

    match command {
        Command::Add(args) => cmd_add(store, args, now, out),
        Command::List(args) => cmd_list(store, cfg, renderer, args, now, out),
        Command::Info { id } => {
            let task = store.find_by_prefix(&id)?;
            renderer.write_task_info(out, task, now)
        }
        Command::Edit(args) => cmd_edit(store, args, now, out),
        Command::Done { id } => {
            let id = resolve_id(store, &id)?;
            let completed = store.toggle_complete(id)?;
            let verb = if completed { "Completed" } else { "Reopened" };
            writeln!(out, "{verb} task {}.", short(id))?;
            Ok(())
        }
        Command::Delete { ids } => cmd_delete(store, &ids, out),
        Command::Queue { id, due } => {
            let id = resolve_id(store, &id)?;
            let deadline = parse_deadline_expr(&due, now)?;
            store.move_to_queue(id, deadline)?;
            writeln!(
                out,
                "Moved task {} to the queue, due {}.",
                short(id),
                format_local(deadline)
            )?;
            Ok(())
        }
        Command::Stack { id } => {
            let id = resolve_id(store, &id)?;
            store.move_to_stack(id)?;
            writeln!(out, "Moved task {} to the stack.", short(id))?;
            Ok(())
        }
        Command::Status => {
            renderer.write_status(out, store.task_count_by_status(now), store.attention(now))
        }
        Command::Reminders => {
            store.refresh_reminders();
            store.sync_reminders();
            renderer.write_reminders(out, &center.pending())
        }
        Command::Export { path } => {
            store.export_to(&path)?;
            writeln!(out, "Exported {} tasks to {}.", store.len(), path.display())?;
            Ok(())
        }
        Command::Import { path } => cmd_import(store, &path, out),
        Command::Clear { yes } => {
            if !yes {
                return Err(anyhow!("refusing to delete every task without --yes"));
            }
            store.clear_all()?;
            writeln!(out, "All tasks deleted.")?;
            Ok(())
        }
    }
}

fn resolve_id(store: &TaskStore, prefix: &str) -> anyhow::Result<Uuid> {
    Ok(store.find_by_prefix(prefix)?.id)
}

fn short(id: Uuid) -> String {
    id.simple().to_string()[..8].to_string()
}

#[instrument(skip_all)]
fn cmd_add<W: Write>(
    store: &mut TaskStore,
    args: AddArgs,
    now: DateTime<Utc>,
    out: &mut W,
) -> anyhow::Result<()> {
    let mut draft = TaskDraft::new(args.title.join(" "));
    draft.description = args.description.unwrap_or_default();
    draft.priority = args.priority.unwrap_or_default();
    draft.task_type = Some(if args.stack {
        TaskType::Stack
    } else {
        TaskType::Queue
    });
    if let Some(expr) = args.due.as_deref() {
        draft.deadline = Some(parse_deadline_expr(expr, now)?);
    }

    let id = store.create(draft)?;
    info!(task = %id, "command add");

    let task = store
        .get(id)
        .ok_or_else(|| anyhow!("task {id} vanished after add"))?;
    match task.deadline {
        Some(deadline) => writeln!(
            out,
            "Created task {}, due {}.",
            task.short_id(),
            format_local(deadline)
        )?,
        None => writeln!(out, "Created task {}.", task.short_id())?,
    }
    Ok(())
}

#[instrument(skip_all)]
fn cmd_list<W: Write>(
    store: &mut TaskStore,
    cfg: &Config,
    renderer: &Renderer,
    args: ListArgs,
    now: DateTime<Utc>,
    out: &mut W,
) -> anyhow::Result<()> {
    let filtering = args.search.is_some() || args.status.is_some();
    if let Some(text) = args.search {
        store.set_search_text(text);
    }
    if let Some(status) = args.status {
        store.set_status_filter(status);
    }

    let view = match args.view {
        Some(view) => view,
        None if filtering => ListView::All,
        None => default_view(cfg)?,
    };
    debug!(?view, "listing tasks");

    let tasks: Vec<&Task> = match view {
        ListView::Queue => store.queue_tasks(),
        ListView::Stack => store.stack_tasks(),
        ListView::Done => store.completed_tasks(),
        ListView::Due => store.due_soon_tasks(now),
        ListView::Overdue => store.overdue_tasks(now),
        ListView::All => store.filtered_tasks(now),
    };
    renderer.write_task_table(out, &tasks, now)
}

fn default_view(cfg: &Config) -> anyhow::Result<ListView> {
    let name = cfg.get("default.list").unwrap_or_else(|| "queue".to_string());
    <ListView as clap::ValueEnum>::from_str(&name, true)
        .map_err(|_| anyhow!("invalid default.list setting: {name}"))
}

#[instrument(skip_all)]
fn cmd_edit<W: Write>(
    store: &mut TaskStore,
    args: EditArgs,
    now: DateTime<Utc>,
    out: &mut W,
) -> anyhow::Result<()> {
    let mut task = store.find_by_prefix(&args.id)?.clone();

    if let Some(title) = args.title {
        task.title = title.trim().to_string();
    }
    if let Some(description) = args.description {
        task.description = description.trim().to_string();
    }
    if let Some(priority) = args.priority {
        task.priority = priority;
    }
    if let Some(expr) = args.due {
        task.deadline = if expr.trim().eq_ignore_ascii_case("none") {
            None
        } else {
            Some(parse_deadline_expr(&expr, now)?)
        };
    }

    let id = task.id;
    store.update(task)?;
    writeln!(out, "Updated task {}.", short(id))?;
    Ok(())
}

fn cmd_delete<W: Write>(store: &mut TaskStore, prefixes: &[String], out: &mut W) -> anyhow::Result<()> {
    let ids = prefixes
        .iter()
        .map(|prefix| resolve_id(store, prefix))
        .collect::<anyhow::Result<Vec<_>>>()?;
    let removed = store.delete_many(&ids);
    writeln!(out, "Deleted {removed} task(s).")?;
    Ok(())
}

fn cmd_import<W: Write>(store: &mut TaskStore, path: &Path, out: &mut W) -> anyhow::Result<()> {
    let count = store
        .import_from(path)
        .with_context(|| format!("failed to import {}", path.display()))?;
    writeln!(out, "Imported {count} tasks from {}.", path.display())?;
    Ok(())
}
