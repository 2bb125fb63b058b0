use std::fs;
use std::path::{Path, PathBuf};

use crate::cli::commands::{Cli, Commands, OrderArgs, RecoveryArgs, ReplayArgs};
use crate::cli::output::{
    NotificationJson, ReplayJson, StepJson, ViewJson, format_ordered, format_recovery_entry,
    format_view, severity_label,
};
use crate::cli::session::{Replay, parse_session};
use crate::io::config_io::load_config;
use crate::io::recovery;
use crate::model::config::Config;
use crate::model::task::Task;
use crate::ops::ordering::sort_tasks;

type CmdResult = Result<(), Box<dyn std::error::Error>>;

pub fn dispatch(cli: Cli) -> CmdResult {
    let cwd = std::env::current_dir()?;
    let config = load_config(cli.config.as_deref(), &cwd)?;
    let json = cli.json;

    match cli.command {
        Commands::Order(args) => cmd_order(args, json),
        Commands::Replay(args) => cmd_replay(args, config, json),
        Commands::Recovery(args) => cmd_recovery(args, &config, &cwd, json),
    }
}

fn read_file(path: &Path) -> Result<String, Box<dyn std::error::Error>> {
    fs::read_to_string(path)
        .map_err(|e| format!("could not read {}: {}", path.display(), e).into())
}

fn cmd_order(args: OrderArgs, json: bool) -> CmdResult {
    let text = read_file(&args.file)?;
    let mut tasks: Vec<Task> = serde_json::from_str(&text)
        .map_err(|e| format!("could not parse {}: {}", args.file.display(), e))?;
    for task in &mut tasks {
        task.normalize_times();
    }
    sort_tasks(&mut tasks);

    if json {
        println!("{}", serde_json::to_string_pretty(&tasks)?);
    } else {
        for line in format_ordered(&tasks) {
            println!("{}", line);
        }
    }
    Ok(())
}

fn cmd_replay(args: ReplayArgs, config: Config, json: bool) -> CmdResult {
    let session = parse_session(&read_file(&args.session)?)?;
    let mut replay = Replay::new(&session, config);
    if let Some(dir) = args.recovery_dir {
        replay = replay.with_recovery_dir(dir);
    }

    let runtime = tokio::runtime::Builder::new_current_thread().build()?;
    runtime.block_on(replay.run(session.steps))?;

    let client = replay.client();
    let messages = client.notifier().messages();
    let snapshots: Vec<(String, bool, Vec<Task>)> = replay
        .views()
        .iter()
        .map(|view| {
            let entry = client.entry(view);
            (
                view.to_string(),
                entry.as_ref().is_some_and(|e| e.is_stale()),
                entry.map(|e| e.tasks().to_vec()).unwrap_or_default(),
            )
        })
        .collect();

    if json {
        let steps: Vec<StepJson> = replay
            .results()
            .iter()
            .enumerate()
            .map(|(i, r)| StepJson {
                step: i + 1,
                action: r.action.clone(),
                result: r.result.clone(),
            })
            .collect();
        let out = ReplayJson {
            steps: &steps,
            views: snapshots
                .iter()
                .map(|(query, stale, tasks)| ViewJson {
                    query: query.clone(),
                    stale: *stale,
                    tasks,
                })
                .collect(),
            notifications: messages
                .iter()
                .map(|(severity, message)| NotificationJson {
                    severity: *severity,
                    message,
                })
                .collect(),
            focus: replay.focus().focused().map(|id| id.as_str()),
            backend_writes: client.backend().write_count(),
        };
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    for (i, result) in replay.results().iter().enumerate() {
        println!("{:>3}  {:<28} {}", i + 1, result.action, result.result);
    }
    for (view, query) in snapshots.iter().zip(replay.views()) {
        println!();
        for line in format_view(query, view.1, &view.2) {
            println!("{}", line);
        }
    }
    if !messages.is_empty() {
        println!();
        println!("notifications:");
        for (severity, message) in &messages {
            println!("  {:<5} {}", severity_label(*severity), message);
        }
    }
    if let Some(id) = replay.focus().focused() {
        println!();
        println!("focus: {}", id);
    }
    Ok(())
}

fn cmd_recovery(args: RecoveryArgs, config: &Config, cwd: &Path, json: bool) -> CmdResult {
    let dir: PathBuf = args
        .dir
        .or_else(|| config.recovery.dir.clone())
        .unwrap_or_else(|| cwd.to_path_buf());

    if args.prune {
        let removed = recovery::prune_recovery(&dir, None)?;
        println!("pruned {} entries", removed);
        return Ok(());
    }

    let entries = recovery::read_recovery_entries(&dir, Some(args.limit.unwrap_or(10)));
    if json {
        let values: Vec<serde_json::Value> = entries.iter().map(|e| e.to_json()).collect();
        println!("{}", serde_json::to_string_pretty(&values)?);
    } else if entries.is_empty() {
        println!("no recovery entries");
    } else {
        for entry in &entries {
            for line in format_recovery_entry(entry) {
                println!("{}", line);
            }
        }
    }
    Ok(())
}
