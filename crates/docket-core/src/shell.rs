use std::io::{BufRead, Write};
use std::path::Path;

use anyhow::{Context, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::app::{App, TaskPatch};
use crate::cli::split_line;
use crate::datetime::{self, parse_due_expr, start_of_day};
use crate::filter::DateFilter;
use crate::render::Renderer;

const PROMPT: &str = "docket> ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

pub fn known_command_names() -> Vec<&'static str> {
    vec![
        "add",
        "list",
        "edit",
        "done",
        "undone",
        "delete",
        "completeall",
        "clearcompleted",
        "filter",
        "status",
        "export",
        "import",
        "help",
        "quit",
    ]
}

pub fn expand_command_abbrev<'a>(token: &'a str, known: &[&'a str]) -> Option<&'a str> {
    if known.contains(&token) {
        return Some(token);
    }

    let mut matches = known.iter().copied().filter(|name| name.starts_with(token));
    let first = matches.next()?;
    if matches.next().is_some() {
        None
    } else {
        Some(first)
    }
}

/// Reads commands until `quit` or end of input. Command errors are printed
/// and the loop carries on.
#[instrument(skip_all)]
pub fn run_interactive<R: BufRead, W: Write>(
    app: &mut App,
    renderer: &Renderer,
    input: R,
    out: &mut W,
) -> anyhow::Result<()> {
    info!("interactive shell started");
    write!(out, "{PROMPT}")?;
    out.flush()?;

    for line in input.lines() {
        let line = line.context("failed reading shell input")?;
        match split_line(&line).and_then(|tokens| dispatch(app, renderer, out, &tokens)) {
            Ok(Flow::Quit) => return Ok(()),
            Ok(Flow::Continue) => {}
            Err(err) => {
                warn!(error = %format!("{err:#}"), "shell command failed");
                writeln!(out, "error: {err:#}")?;
            }
        }
        write!(out, "{PROMPT}")?;
        out.flush()?;
    }

    writeln!(out)?;
    Ok(())
}

#[instrument(skip(app, renderer, out))]
pub fn dispatch<W: Write>(
    app: &mut App,
    renderer: &Renderer,
    out: &mut W,
    tokens: &[String],
) -> anyhow::Result<Flow> {
    let Some((first, args)) = tokens.split_first() else {
        return Ok(Flow::Continue);
    };

    let known = known_command_names();
    let lowered = first.to_ascii_lowercase();
    let command = expand_command_abbrev(&lowered, &known)
        .ok_or_else(|| anyhow!("unknown or ambiguous command: {first}"))?;

    debug!(command, ?args, "dispatching shell command");

    match command {
        "add" => cmd_add(app, out, args)?,
        "list" => cmd_list(app, renderer, out)?,
        "edit" => cmd_edit(app, renderer, out, args)?,
        "done" => cmd_set_done(app, out, args, true)?,
        "undone" => cmd_set_done(app, out, args, false)?,
        "delete" => cmd_delete(app, out, args)?,
        "completeall" => {
            let count = app.complete_all();
            writeln!(out, "Completed {count} task(s).")?;
        }
        "clearcompleted" => {
            let count = app.clear_completed();
            writeln!(out, "Removed {count} completed task(s).")?;
        }
        "filter" => cmd_filter(app, renderer, out, args)?,
        "status" => cmd_status(app, renderer, out)?,
        "export" => {
            let path = single_path(args, "export")?;
            let count = app.export(path)?;
            writeln!(out, "Exported {count} task(s) to {}.", path.display())?;
        }
        "import" => {
            let path = single_path(args, "import")?;
            let count = app.import(path)?;
            writeln!(out, "Imported {count} task(s) from {}.", path.display())?;
        }
        "help" => cmd_help(out)?,
        "quit" => return Ok(Flow::Quit),
        other => return Err(anyhow!("unknown command: {other}")),
    }

    Ok(Flow::Continue)
}

fn cmd_add<W: Write>(app: &mut App, out: &mut W, args: &[String]) -> anyhow::Result<()> {
    let (title, mods) = parse_desc_and_mods(args)?;
    if title.is_empty() {
        return Err(anyhow!("add: a title is required"));
    }

    let mut tags = String::new();
    let mut due = None;
    for one_mod in mods {
        match one_mod {
            Mod::Tags(value) => tags = value,
            Mod::Due(value) => due = value.map(start_of_day),
            Mod::Done(_) => return Err(anyhow!("add: done: is only valid for edit")),
        }
    }

    let task = app.add_task(&title, &tags, due)?;
    writeln!(out, "Added \"{}\".", task.title)?;
    Ok(())
}

fn cmd_list<W: Write>(app: &App, renderer: &Renderer, out: &mut W) -> anyhow::Result<()> {
    renderer.write_filter(out, app.filter())?;
    renderer.write_view(out, &app.view(), datetime::today())
}

fn cmd_edit<W: Write>(
    app: &mut App,
    renderer: &Renderer,
    out: &mut W,
    args: &[String],
) -> anyhow::Result<()> {
    let (selector, rest) = args
        .split_first()
        .ok_or_else(|| anyhow!("edit: expected a task number or id"))?;
    let id = app.resolve(selector)?;

    let (title, mods) = parse_desc_and_mods(rest)?;
    let mut patch = TaskPatch {
        title: (!title.is_empty()).then_some(title),
        ..TaskPatch::default()
    };
    for one_mod in mods {
        match one_mod {
            Mod::Tags(value) => patch.tags = Some(value),
            Mod::Due(value) => patch.due = Some(value.map(start_of_day)),
            Mod::Done(value) => patch.completed = Some(value),
        }
    }

    if patch.is_empty() {
        return Err(anyhow!("edit: nothing to change"));
    }

    let task = app.edit_task(&id, patch)?;
    renderer.write_task(out, &task)
}

fn cmd_set_done<W: Write>(
    app: &mut App,
    out: &mut W,
    args: &[String],
    completed: bool,
) -> anyhow::Result<()> {
    let selector = single_arg(args, if completed { "done" } else { "undone" })?;
    let id = app.resolve(selector)?;
    let task = app.set_completed(&id, completed)?;
    let verb = if completed { "Completed" } else { "Reopened" };
    writeln!(out, "{verb} \"{}\".", task.title)?;
    Ok(())
}

fn cmd_delete<W: Write>(app: &mut App, out: &mut W, args: &[String]) -> anyhow::Result<()> {
    let selector = single_arg(args, "delete")?;
    let id = app.resolve(selector)?;
    let title = app.get(&id).map(|task| task.title).unwrap_or_default();
    if app.delete_task(&id) {
        writeln!(out, "Deleted \"{title}\".")?;
    }
    Ok(())
}

fn cmd_filter<W: Write>(
    app: &mut App,
    renderer: &Renderer,
    out: &mut W,
    args: &[String],
) -> anyhow::Result<()> {
    let (kind, rest) = args
        .split_first()
        .ok_or_else(|| anyhow!("filter: expected 'date <kind>' or 'tag [text]'"))?;

    match kind.to_ascii_lowercase().as_str() {
        "date" => {
            let raw = single_arg(rest, "filter date")?;
            app.set_date_filter(raw.parse::<DateFilter>()?);
        }
        "tag" => app.set_tag_filter(&rest.join(" ")),
        other => return Err(anyhow!("filter: unknown criterion '{other}'")),
    }

    renderer.write_filter(out, app.filter())
}

fn cmd_status<W: Write>(app: &App, renderer: &Renderer, out: &mut W) -> anyhow::Result<()> {
    renderer.write_status(out, &app.status())?;
    writeln!(out, "data: {}", app.datastore().tasks_path.display())?;
    Ok(())
}

fn cmd_help<W: Write>(out: &mut W) -> anyhow::Result<()> {
    writeln!(
        out,
        "Commands (unique prefixes work):
  add <title> [tags:<a,b>] [due:<date>]
  list
  edit <n|id> [<new title>] [tags:<a,b>] [due:<date>|due:none] [done:yes|no]
  done <n|id>        undone <n|id>        delete <n|id>
  completeall        clearcompleted
  filter date <all|today|week|overdue>
  filter tag [text]
  status
  export <path>      import <path>
  help               quit
Dates: today, tomorrow, yesterday, monday..sunday, YYYY-MM-DD, +Nd, +Nw"
    )?;
    Ok(())
}

fn single_arg<'a>(args: &'a [String], command: &str) -> anyhow::Result<&'a str> {
    match args {
        [one] => Ok(one.as_str()),
        [] => Err(anyhow!("{command}: missing argument")),
        _ => Err(anyhow!("{command}: expected exactly one argument")),
    }
}

fn single_path<'a>(args: &'a [String], command: &str) -> anyhow::Result<&'a Path> {
    single_arg(args, command).map(Path::new)
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Mod {
    Tags(String),
    Due(Option<chrono::NaiveDate>),
    Done(bool),
}

/// Free words form the title; `title:` words join them. `--` ends modifier
/// parsing.
fn parse_desc_and_mods(args: &[String]) -> anyhow::Result<(String, Vec<Mod>)> {
    let mut desc_parts = Vec::new();
    let mut mods = Vec::new();

    let mut literal = false;
    for arg in args {
        if arg == "--" {
            literal = true;
            continue;
        }

        if !literal {
            if let Some(rest) = arg.strip_prefix("title:") {
                desc_parts.push(rest.to_string());
                continue;
            }
            if let Some(one_mod) = parse_one_mod(arg)? {
                mods.push(one_mod);
                continue;
            }
        }

        desc_parts.push(arg.clone());
    }

    let title = desc_parts
        .iter()
        .map(|part| part.trim())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    Ok((title, mods))
}

fn parse_one_mod(tok: &str) -> anyhow::Result<Option<Mod>> {
    let Some((key, value)) = tok.split_once(':') else {
        return Ok(None);
    };

    match key.to_ascii_lowercase().as_str() {
        "tags" | "tag" => Ok(Some(Mod::Tags(value.trim().to_string()))),
        "due" => {
            let value = value.trim();
            if value.is_empty() || value.eq_ignore_ascii_case("none") {
                return Ok(Some(Mod::Due(None)));
            }
            Ok(Some(Mod::Due(Some(parse_due_expr(value, datetime::today())?))))
        }
        "done" => {
            let done = match value.trim().to_ascii_lowercase().as_str() {
                "yes" | "y" | "true" | "1" => true,
                "no" | "n" | "false" | "0" => false,
                other => return Err(anyhow!("done: expected yes or no, got '{other}'")),
            };
            Ok(Some(Mod::Done(done)))
        }
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::Arc;
    use std::time::Duration;

    use tempfile::tempdir;
    use tokio::runtime::Handle;

    use super::{Flow, Mod, dispatch, expand_command_abbrev, known_command_names, parse_desc_and_mods, run_interactive};
    use crate::app::App;
    use crate::datastore::DataStore;
    use crate::filter::{DateFilter, ViewFilter};
    use crate::render::Renderer;

    fn words(line: &str) -> Vec<String> {
        line.split_whitespace().map(str::to_string).collect()
    }

    fn app_in(dir: &std::path::Path) -> App {
        App::with_datastore(
            Arc::new(DataStore::open(dir)),
            Handle::current(),
            Duration::from_millis(40),
            ViewFilter::default(),
        )
    }

    #[test]
    fn abbreviations_must_be_unique() {
        let known = known_command_names();
        assert_eq!(expand_command_abbrev("a", &known), Some("add"));
        assert_eq!(expand_command_abbrev("comp", &known), Some("completeall"));
        assert_eq!(expand_command_abbrev("done", &known), Some("done"));
        assert_eq!(expand_command_abbrev("d", &known), None);
        assert_eq!(expand_command_abbrev("c", &known), None);
        assert_eq!(expand_command_abbrev("zap", &known), None);
    }

    #[test]
    fn modifiers_split_from_title() {
        let (title, mods) =
            parse_desc_and_mods(&words("Buy milk tags:dairy due:none done:yes")).unwrap();
        assert_eq!(title, "Buy milk");
        assert_eq!(
            mods,
            vec![Mod::Tags("dairy".to_string()), Mod::Due(None), Mod::Done(true)]
        );

        let (title, mods) = parse_desc_and_mods(&words("-- due:tomorrow")).unwrap();
        assert_eq!(title, "due:tomorrow");
        assert!(mods.is_empty());

        assert!(parse_desc_and_mods(&words("x due:someday")).is_err());
        assert!(parse_desc_and_mods(&words("x done:maybe")).is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn commands_drive_the_app() {
        let temp = tempdir().unwrap();
        let mut app = app_in(temp.path());
        let renderer = Renderer::plain();
        let mut out = Vec::new();

        dispatch(&mut app, &renderer, &mut out, &words("add Buy milk tags:dairy due:yesterday")).unwrap();
        dispatch(&mut app, &renderer, &mut out, &words("add Walk dog")).unwrap();
        assert_eq!(app.tasks().len(), 2);
        assert_eq!(app.tasks()[0].tags, "dairy");

        dispatch(&mut app, &renderer, &mut out, &words("filter date overdue")).unwrap();
        assert_eq!(app.filter().date, DateFilter::Overdue);
        assert_eq!(app.view().len(), 1);

        dispatch(&mut app, &renderer, &mut out, &words("done 1")).unwrap();
        assert!(app.view().is_empty());

        dispatch(&mut app, &renderer, &mut out, &words("filter date all")).unwrap();
        dispatch(&mut app, &renderer, &mut out, &words("edit 2 Walk the dog due:none")).unwrap();
        assert_eq!(app.tasks()[1].title, "Walk the dog");

        assert!(dispatch(&mut app, &renderer, &mut out, &words("edit 2")).is_err());
        assert!(dispatch(&mut app, &renderer, &mut out, &words("add")).is_err());
        assert!(dispatch(&mut app, &renderer, &mut out, &words("bogus")).is_err());
        assert!(dispatch(&mut app, &renderer, &mut out, &words("delete 9")).is_err());

        dispatch(&mut app, &renderer, &mut out, &words("clearcompleted")).unwrap();
        assert_eq!(app.tasks().len(), 1);

        let flow = dispatch(&mut app, &renderer, &mut out, &words("quit")).unwrap();
        assert_eq!(flow, Flow::Quit);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn interactive_loop_survives_errors() {
        let temp = tempdir().unwrap();
        let mut app = app_in(temp.path());
        let input = Cursor::new("add one\nnonsense\nlist\nquit\nadd never\n");
        let mut out = Vec::new();

        run_interactive(&mut app, &Renderer::plain(), input, &mut out).unwrap();

        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("error: unknown or ambiguous command: nonsense"));
        assert!(text.contains("one"));
        assert_eq!(app.tasks().len(), 1);
    }
}
