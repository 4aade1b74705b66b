use std::io::{self, BufRead, Write};
use std::str::FromStr;

use anyhow::{Context, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::cli::{Command, FieldCommand, ListArgs};
use crate::fields::FieldType;
use crate::form::TaskDraft;
use crate::render::Renderer;
use crate::session::{Confirm, Notice, Outcome, Session};
use crate::storage::{KeyValueStore, SaveStatus};
use crate::task::{Priority, Status};
use crate::view::{Direction, SortKey, SortSpec, TaskFilter, run_view};

/// Asks on stderr and reads one line from stdin. Anything but y/yes declines.
#[derive(Debug, Default)]
pub struct TerminalConfirm;

impl Confirm for TerminalConfirm {
    fn confirm(&mut self, prompt: &str) -> bool {
        eprint!("{prompt} [y/N] ");
        if io::stderr().flush().is_err() {
            return false;
        }
        let mut answer = String::new();
        match io::stdin().lock().read_line(&mut answer) {
            Ok(_) => matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"),
            Err(err) => {
                warn!(error = %err, "failed reading confirmation; treating as no");
                false
            }
        }
    }
}

#[instrument(skip(session, renderer, confirm, out))]
pub fn dispatch<S: KeyValueStore, W: Write>(
    session: &mut Session<S>,
    renderer: &Renderer,
    confirm: &mut dyn Confirm,
    command: Command,
    mut out: W,
) -> anyhow::Result<()> {
    match command {
        Command::Add {
            title,
            priority,
            status,
            assignments,
        } => cmd_add(session, renderer, &mut out, title, priority, status, &assignments),
        Command::Edit {
            id,
            title,
            priority,
            status,
            assignments,
        } => cmd_edit(
            session,
            renderer,
            &mut out,
            id,
            EditArgs {
                title,
                priority,
                status,
                assignments,
            },
        ),
        Command::Delete { ids } => cmd_delete(session, renderer, confirm, &mut out, &ids),
        Command::List(args) => cmd_list(session, renderer, &mut out, args),
        Command::Undo => {
            let notice = session.undo();
            finish(session, renderer, &mut out, notice, "Nothing to undo.")
        }
        Command::Redo => {
            let notice = session.redo();
            finish(session, renderer, &mut out, notice, "Nothing to redo.")
        }
        Command::History => renderer.print_history(&mut out, session.history()),
        Command::Field(sub) => cmd_field(session, renderer, &mut out, sub),
        Command::Export => cmd_export(session, &mut out),
    }
}

struct EditArgs {
    title: Option<String>,
    priority: Option<String>,
    status: Option<String>,
    assignments: Vec<String>,
}

#[instrument(skip(session, renderer, out, assignments))]
fn cmd_add<S: KeyValueStore, W: Write>(
    session: &mut Session<S>,
    renderer: &Renderer,
    out: &mut W,
    title: String,
    priority: Option<String>,
    status: Option<String>,
    assignments: &[String],
) -> anyhow::Result<()> {
    info!("command add");

    let mut draft = session.new_draft(title);
    if let Some(raw) = priority {
        draft.priority = raw.parse::<Priority>()?;
    }
    if let Some(raw) = status {
        draft.status = raw.parse::<Status>()?;
    }
    draft.apply_assignments(session.fields(), assignments)?;

    let notice = session.create(draft)?;
    finish(session, renderer, out, Some(notice), "")
}

#[instrument(skip(session, renderer, out, args))]
fn cmd_edit<S: KeyValueStore, W: Write>(
    session: &mut Session<S>,
    renderer: &Renderer,
    out: &mut W,
    id: i64,
    args: EditArgs,
) -> anyhow::Result<()> {
    info!("command edit");

    let task = session
        .task(id)
        .ok_or_else(|| anyhow!("no task with id {id}"))?;
    let mut draft = TaskDraft::from_task(task);
    if let Some(title) = args.title {
        draft.title = title;
    }
    if let Some(raw) = args.priority {
        draft.priority = raw.parse::<Priority>()?;
    }
    if let Some(raw) = args.status {
        draft.status = raw.parse::<Status>()?;
    }
    draft.apply_assignments(session.fields(), &args.assignments)?;

    let task = draft.into_task(id)?;
    let notice = session.update(task);
    finish(session, renderer, out, notice, "")
}

#[instrument(skip(session, renderer, confirm, out))]
fn cmd_delete<S: KeyValueStore, W: Write>(
    session: &mut Session<S>,
    renderer: &Renderer,
    confirm: &mut dyn Confirm,
    out: &mut W,
    ids: &[i64],
) -> anyhow::Result<()> {
    info!("command delete");

    let outcome = match ids {
        [id] => session.delete(*id, confirm),
        _ => {
            let view = session.view_mut();
            view.clear_selection();
            for id in ids {
                view.select(*id);
            }
            session.delete_selected(confirm)
        }
    };

    match outcome {
        Outcome::Done(notice) => finish(session, renderer, out, Some(notice), ""),
        Outcome::Cancelled => {
            writeln!(out, "Cancelled.")?;
            Ok(())
        }
        Outcome::NotFound => Err(anyhow!("no task matches the given id(s)")),
    }
}

#[instrument(skip(session, renderer, out))]
fn cmd_list<S: KeyValueStore, W: Write>(
    session: &mut Session<S>,
    renderer: &Renderer,
    out: &mut W,
    args: ListArgs,
) -> anyhow::Result<()> {
    let filter = TaskFilter {
        title: args.title.unwrap_or_default(),
        priority: parse_choice(args.priority.as_deref())?,
        status: parse_choice(args.status.as_deref())?,
    };
    let sort = args
        .sort
        .as_deref()
        .map(SortKey::from_str)
        .transpose()?
        .map(|key| SortSpec {
            key,
            direction: if args.desc {
                Direction::Descending
            } else {
                Direction::Ascending
            },
        });

    let view = session.view_mut();
    view.set_filter(filter);
    view.set_sort(sort);
    if let Some(page_size) = args.page_size {
        if page_size == 0 {
            return Err(anyhow!("--page-size must be at least 1"));
        }
        view.set_page_size(page_size);
    }
    view.set_page(args.page);

    let page = run_view(session.tasks(), session.view().query());
    debug!(
        shown = page.items.len(),
        total = page.total_items,
        "list view computed"
    );
    renderer.print_task_page(out, &page, session.fields().fields())
}

#[instrument(skip(session, renderer, out))]
fn cmd_field<S: KeyValueStore, W: Write>(
    session: &mut Session<S>,
    renderer: &Renderer,
    out: &mut W,
    sub: FieldCommand,
) -> anyhow::Result<()> {
    match sub {
        FieldCommand::List => renderer.print_fields(out, session.fields().fields()),
        FieldCommand::Add { name, kind } => {
            let kind: FieldType = kind.parse()?;
            let id = session.next_id();
            let mut registry = session.fields().clone();
            registry.add_field(&name, kind, id)?;
            let notice = session.save_fields(registry.into_fields());
            finish(session, renderer, out, Some(notice), "")
        }
        FieldCommand::Remove { field } => {
            let mut registry = session.fields().clone();
            let id = match field.parse::<i64>() {
                Ok(id) => id,
                Err(_) => registry
                    .find(&field)
                    .map(|found| found.id)
                    .ok_or_else(|| anyhow!("no custom field named {field}"))?,
            };
            if !registry.remove_field(id) {
                return Err(anyhow!("no custom field with id {id}"));
            }
            let notice = session.save_fields(registry.into_fields());
            finish(session, renderer, out, Some(notice), "")
        }
    }
}

fn cmd_export<S: KeyValueStore, W: Write>(
    session: &Session<S>,
    out: &mut W,
) -> anyhow::Result<()> {
    let json =
        serde_json::to_string_pretty(session.tasks()).context("failed to encode tasks")?;
    writeln!(out, "{json}")?;
    Ok(())
}

/// Print the notice, or `fallback` when nothing happened, and surface a
/// failed save. The in-memory change stands either way.
fn finish<S: KeyValueStore, W: Write>(
    session: &Session<S>,
    renderer: &Renderer,
    out: &mut W,
    notice: Option<Notice>,
    fallback: &str,
) -> anyhow::Result<()> {
    match notice {
        Some(notice) => renderer.print_notice(&mut *out, &notice)?,
        None if !fallback.is_empty() => writeln!(out, "{fallback}")?,
        None => {}
    }

    if let SaveStatus::Failed(reason) = session.last_save() {
        warn!(reason = %reason, "changes were not persisted");
        eprintln!("warning: changes could not be saved: {reason}");
    }
    Ok(())
}

/// `None` for "all", otherwise the parsed value.
fn parse_choice<T>(raw: Option<&str>) -> anyhow::Result<Option<T>>
where
    T: FromStr<Err = anyhow::Error>,
{
    match raw.map(str::trim) {
        None => Ok(None),
        Some(value) if value.eq_ignore_ascii_case("all") => Ok(None),
        Some(value) => value.parse().map(Some),
    }
}
