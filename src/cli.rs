use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

use crate::lifecycle::{self, Mutation, NewTask, SubtaskRemoval};
use crate::model::task::TaskStatus;
use crate::sync::SyncService;

/// Where the tasks file lives when `--file` is not given, relative to the root.
pub const DEFAULT_TASKS_FILE: &str = ".taskbridge/tasks.json";

#[derive(Debug, Clone)]
pub enum Command {
    AddTask(NewTask),
    AddSubtask { parent: u32, task: NewTask },
    SetStatus { ids: String, status: TaskStatus },
    RemoveTask { id: u32 },
    RemoveSubtask { id: String, convert: bool },
    SyncTickets,
    MigrateRefIds,
    Help,
}

#[derive(Debug, Clone)]
pub struct Invocation {
    pub command: Command,
    pub tasks_file: Option<PathBuf>,
    pub root: Option<PathBuf>,
}

impl Invocation {
    pub fn project_root(&self) -> Result<PathBuf> {
        match &self.root {
            Some(root) => Ok(root.clone()),
            None => std::env::current_dir().context("Failed to determine the current directory"),
        }
    }

    pub fn tasks_path(&self, project_root: &Path) -> PathBuf {
        self.tasks_file
            .clone()
            .unwrap_or_else(|| project_root.join(DEFAULT_TASKS_FILE))
    }
}

fn take_value(args: &[String], i: &mut usize, flag: &str) -> Result<String> {
    *i += 1;
    match args.get(*i) {
        Some(value) => Ok(value.clone()),
        None => bail!("Missing value for {flag}"),
    }
}

fn parse_id(raw: &str) -> Result<u32> {
    match raw.trim().parse::<u32>() {
        Ok(id) if id > 0 => Ok(id),
        _ => bail!("Invalid task id '{raw}'"),
    }
}

fn parse_dependencies(raw: &str) -> Result<Vec<u32>> {
    raw.split(',')
        .filter(|part| !part.trim().is_empty())
        .map(parse_id)
        .collect()
}

/// Parse a full argument list (without the program name).
///
/// Supported forms:
///   taskbridge add-task "Title" [-d <desc>] [--details <text>] [--test-strategy <text>]
///                       [--priority <p>] [--deps 1,2]
///   taskbridge add-subtask --parent 3 "Title" [same options]
///   taskbridge set-status 3,4.1 done
///   taskbridge remove-task 3
///   taskbridge remove-subtask 3.1 [--convert]
///   taskbridge sync-tickets
///   taskbridge migrate-ref-ids
/// `--file <tasks.json>` and `--root <dir>` are accepted anywhere.
pub fn parse_args(args: &[String]) -> Result<Invocation> {
    let mut tasks_file = None;
    let mut root = None;
    let mut rest: Vec<String> = Vec::new();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--file" | "-f" => tasks_file = Some(PathBuf::from(take_value(args, &mut i, "--file")?)),
            "--root" | "-r" => root = Some(PathBuf::from(take_value(args, &mut i, "--root")?)),
            _ => rest.push(args[i].clone()),
        }
        i += 1;
    }

    let command = match rest.first().map(String::as_str) {
        None | Some("help" | "-h" | "--help") => Command::Help,
        Some("add-task") => Command::AddTask(parse_new_task(&rest[1..], false)?.1),
        Some("add-subtask") => {
            let (parent, task) = parse_new_task(&rest[1..], true)?;
            let Some(parent) = parent else {
                bail!("add-subtask needs --parent <task id>");
            };
            Command::AddSubtask { parent, task }
        }
        Some("set-status") => parse_set_status(&rest[1..])?,
        Some("remove-task") => match &rest[1..] {
            [id] => Command::RemoveTask { id: parse_id(id)? },
            _ => bail!("Usage: taskbridge remove-task <id>"),
        },
        Some("remove-subtask") => parse_remove_subtask(&rest[1..])?,
        Some("sync-tickets") => Command::SyncTickets,
        Some("migrate-ref-ids") => Command::MigrateRefIds,
        Some(other) => bail!("Unknown command '{other}'. Run `taskbridge help` for usage."),
    };

    Ok(Invocation {
        command,
        tasks_file,
        root,
    })
}

/// Title words plus flags. `parent` is only looked for when `want_parent` is set.
fn parse_new_task(args: &[String], want_parent: bool) -> Result<(Option<u32>, NewTask)> {
    let mut task = NewTask::default();
    let mut parent = None;
    let mut title_parts: Vec<String> = Vec::new();
    let mut i = 0;

    while i < args.len() {
        match args[i].as_str() {
            "-d" | "--desc" | "--description" => task.description = take_value(args, &mut i, "--desc")?,
            "--details" => task.details = take_value(args, &mut i, "--details")?,
            "--test-strategy" => task.test_strategy = Some(take_value(args, &mut i, "--test-strategy")?),
            "-p" | "--priority" => task.priority = Some(take_value(args, &mut i, "--priority")?),
            "--deps" | "--dependencies" => {
                task.dependencies = parse_dependencies(&take_value(args, &mut i, "--deps")?)?
            }
            "--parent" if want_parent => {
                parent = Some(parse_id(&take_value(args, &mut i, "--parent")?)?)
            }
            _ => title_parts.push(args[i].clone()),
        }
        i += 1;
    }

    task.title = title_parts.join(" ");
    if task.title.trim().is_empty() {
        bail!("Task title cannot be empty");
    }
    Ok((parent, task))
}

fn parse_set_status(args: &[String]) -> Result<Command> {
    let [ids, status] = args else {
        bail!("Usage: taskbridge set-status <id[,id...]> <status>");
    };
    let status = status.parse::<TaskStatus>().map_err(anyhow::Error::msg)?;
    Ok(Command::SetStatus {
        ids: ids.clone(),
        status,
    })
}

fn parse_remove_subtask(args: &[String]) -> Result<Command> {
    let mut id = None;
    let mut convert = false;
    for arg in args {
        match arg.as_str() {
            "--convert" | "-c" => convert = true,
            _ if id.is_none() => id = Some(arg.clone()),
            _ => bail!("Unexpected argument '{arg}'"),
        }
    }
    let Some(id) = id else {
        bail!("Usage: taskbridge remove-subtask <parent.id> [--convert]");
    };
    Ok(Command::RemoveSubtask { id, convert })
}

fn report<T>(mutation: &Mutation<T>) {
    for note in &mutation.ticketing {
        if note.result.success {
            println!("  ticket for {}: {}", note.entity, note.result);
        }
    }
    for warning in &mutation.warnings {
        eprintln!("  warning: {warning}");
    }
}

/// Execute a parsed command against the tasks file.
pub async fn run(invocation: &Invocation, sync: &SyncService) -> Result<()> {
    let root = invocation.project_root()?;
    let path = invocation.tasks_path(&root);

    match &invocation.command {
        Command::Help => print_help(),
        Command::AddTask(new) => {
            let added = lifecycle::add_task(sync, &path, &root, new.clone()).await?;
            println!("Added task {}: {}", added.value.id, added.value.title);
            report(&added);
        }
        Command::AddSubtask { parent, task } => {
            let added = lifecycle::add_subtask(sync, &path, &root, *parent, task.clone()).await?;
            println!("Added subtask {parent}.{}: {}", added.value.id, added.value.title);
            report(&added);
        }
        Command::SetStatus { ids, status } => {
            let changed = lifecycle::set_task_status(sync, &path, &root, ids, *status).await?;
            for change in &changed.value {
                println!("Task {}: {} -> {}", change.id, change.from, change.to);
            }
            report(&changed);
        }
        Command::RemoveTask { id } => {
            let removed = lifecycle::remove_task(sync, &path, &root, *id).await?;
            println!("Removed task {id}: {}", removed.value.title);
            report(&removed);
        }
        Command::RemoveSubtask { id, convert } => {
            let removed = lifecycle::remove_subtask(sync, &path, &root, id, *convert).await?;
            match &removed.value {
                SubtaskRemoval::Deleted(sub) => println!("Removed subtask {id}: {}", sub.title),
                SubtaskRemoval::Converted(task) => {
                    println!("Converted subtask {id} into task {}: {}", task.id, task.title)
                }
            }
            report(&removed);
        }
        Command::SyncTickets => {
            let summary = sync
                .sync_all_tasks(&path, &root)
                .await
                .context("Ticket sync failed")?;
            if !summary.available {
                println!("Ticketing is disabled or not configured; nothing to sync.");
                return Ok(());
            }
            println!(
                "Synced {} items: {} created, {} recovered, {} unchanged, {} errors",
                summary.processed,
                summary.created(),
                summary.updated(),
                summary.skipped,
                summary.error_count
            );
            for failure in &summary.errors {
                eprintln!("  {}: {}", failure.entity, failure.message);
            }
        }
        Command::MigrateRefIds => {
            let assigned = lifecycle::backfill_ref_ids(sync.ref_ids(), &path)?;
            println!("Assigned {assigned} reference ids");
        }
    }
    Ok(())
}

pub fn print_help() {
    println!("taskbridge: keep a task file in step with Jira, GitHub or Azure DevOps\n");
    println!("USAGE:");
    println!("  taskbridge add-task <title> [options]            Add a task and open its ticket");
    println!("  taskbridge add-subtask --parent <id> <title>      Add a subtask under a task");
    println!("  taskbridge set-status <id[,id...]> <status>       Change status (done cascades)");
    println!("  taskbridge remove-task <id>                       Remove a task and its tickets");
    println!("  taskbridge remove-subtask <p.id> [--convert]      Remove or promote a subtask");
    println!("  taskbridge sync-tickets                           Reconcile every task with its ticket");
    println!("  taskbridge migrate-ref-ids                        Backfill missing reference ids");
    println!();
    println!("ADD OPTIONS:");
    println!("  -d, --desc <text>          Description");
    println!("      --details <text>       Implementation details");
    println!("      --test-strategy <text> Test strategy");
    println!("  -p, --priority <p>         Priority");
    println!("      --deps <1,2>           Dependencies (sibling ids for subtasks)");
    println!();
    println!("COMMON OPTIONS:");
    println!("  -f, --file <path>   Tasks file (default: <root>/{DEFAULT_TASKS_FILE})");
    println!("  -r, --root <dir>    Project root (default: current directory)");
    println!();
    let statuses: Vec<&str> = TaskStatus::ALL.iter().map(|s| s.as_str()).collect();
    println!("STATUSES: {}", statuses.join(", "));
}
