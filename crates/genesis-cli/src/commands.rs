//! CLI commands implementation

use anyhow::{Context, Result};
use genesis_core::{aml, Config, LlmClient};
use std::fs;
use std::io::{self, BufRead, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::agent::{Agent, Ports, ProgressFn, RunMode, StopHandle};
use crate::mind::LlmPlanner;
use crate::tools::builtin::create_default_registry;
use crate::tools::executor::{ActionPort, ToolExecutor};
use crate::tools::ToolContext;

// ANSI color codes
const GREEN: &str = "\x1b[92m";
const RED: &str = "\x1b[91m";
const YELLOW: &str = "\x1b[93m";
const BLUE: &str = "\x1b[94m";
const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";
const RESET: &str = "\x1b[0m";

/// Backing file used by `run` when none is given
pub const DEFAULT_FILE: &str = "genesis_v1.md";

fn print_status(ok: bool, msg: &str) {
    let icon = if ok {
        format!("{}✓{}", GREEN, RESET)
    } else {
        format!("{}✗{}", RED, RESET)
    };
    println!("  {} {}", icon, msg);
}

fn progress_printer() -> ProgressFn {
    Arc::new(|line: &str| println!("{}", line))
}

/// Planner and tools for the current directory
async fn build_ports(config: &Config) -> Result<Ports> {
    let client = LlmClient::new(&config.llm).context("Failed to create LLM client")?;
    if !client.health_check().await {
        println!(
            "{}Warning:{} no answer from {} (planning will fail until it is reachable)",
            YELLOW, RESET, config.llm.base_url
        );
    }

    let working_dir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let executor = ToolExecutor::new(create_default_registry(), ToolContext::new(working_dir));
    let planner = LlmPlanner::new(client, executor.schemas());

    Ok(Ports {
        decision: Arc::new(planner),
        actions: Arc::new(executor),
    })
}

/// First Ctrl-C requests a cooperative stop, the second exits
fn install_interrupt_handler(stop: StopHandle) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        println!("\n{}Stopping after the current step (Ctrl-C again to quit)...{}", YELLOW, RESET);
        stop.request();

        if tokio::signal::ctrl_c().await.is_ok() {
            std::process::exit(130);
        }
    });
}

/// Read one trimmed line; `None` on EOF
fn prompt(message: &str) -> Result<Option<String>> {
    println!("{}", message);
    print!("> ");
    io::stdout().flush()?;

    let mut line = String::new();
    if io::stdin().lock().read_line(&mut line)? == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim().to_string()))
}

/// Run the life loop over one backing file
pub async fn run(file: Option<PathBuf>, mode: RunMode, forever: bool, task: Option<String>) -> Result<()> {
    let config = Config::load()?;

    let file = match mode {
        RunMode::Background => config.scheduler.wake_file.clone(),
        _ => file.unwrap_or_else(|| PathBuf::from(DEFAULT_FILE)),
    };

    let ports = build_ports(&config).await?;
    let agent = Agent::new(&file, mode, &config, ports, Some(progress_printer()))
        .with_context(|| format!("Cannot start on backing file {}", file.display()))?;
    print_banner(&agent, &config);
    agent.start();
    install_interrupt_handler(agent.stop_handle());
    let stop = agent.stop_handle();

    if let Some(ref task) = task {
        println!("{}Adding task:{} {}", BLUE, RESET, task);
        agent.add_task_front(task)?;
    } else if !forever && io::stdin().is_terminal() {
        if let Some(input) = prompt("Genesis is listening. New task? (Enter to skip)")? {
            if !input.is_empty() {
                println!("{}Adding task:{} {}", BLUE, RESET, input);
                agent.add_task_front(&input)?;
            }
        }
    }

    let outcome = if forever {
        run_forever(&agent, &stop).await
    } else {
        match agent.run_all().await {
            Ok(stats) => {
                println!("\n{}Run finished:{} {}", BOLD, RESET, stats);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    };

    agent.stop().await;
    if let Err(ref e) = outcome {
        println!("{}Runtime failure:{} {:#}", RED, RESET, e);
    }
    println!("{}Genesis runtime stopped.{}", DIM, RESET);
    outcome
}

fn print_banner(agent: &Agent, config: &Config) {
    match agent.mode() {
        RunMode::Foreground => println!("{}Foreground mode:{} serving tasks", BOLD, RESET),
        RunMode::Background => println!("{}Background mode:{} self-directed evolution", BOLD, RESET),
        RunMode::Dual => println!("{}Dual mode:{} serving tasks, evolving when idle", BOLD, RESET),
    }
    println!("  File: {}", agent.path().display());
    println!("  Model: {}", config.llm.model);
    if agent.has_scheduler() {
        println!(
            "  Idle cycles: {} after {}s without interaction",
            config.scheduler.wake_file.display(),
            config.scheduler.idle_timeout_secs
        );
    }
    println!();
}

async fn run_forever(agent: &Agent, stop: &StopHandle) -> Result<()> {
    loop {
        let stats = agent.run_all().await?;
        if stop.is_requested() {
            break;
        }
        if stats.total > 0 {
            println!("{}Cycle finished:{} {}", DIM, RESET, stats);
            continue;
        }

        match prompt("\nNo pending tasks. Enter a new task (Enter to quit):")? {
            Some(input) if !input.is_empty() => {
                println!("{}Adding task:{} {}", BLUE, RESET, input);
                agent.add_task_front(&input)?;
            }
            _ => {
                println!("Leaving at user request.");
                break;
            }
        }
    }
    Ok(())
}

/// Task files in `dir`: `*.md` whose name starts with a lowercase letter
pub fn task_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)
        .with_context(|| format!("Failed to read {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "md"))
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| n.chars().next())
                .is_some_and(|c| c.is_lowercase())
        })
        .collect();
    files.sort();
    Ok(files)
}

/// Display name and pending count of a task file
struct TaskFileInfo {
    path: PathBuf,
    name: String,
    pending: usize,
}

fn describe(path: &Path) -> TaskFileInfo {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    match fs::read_to_string(path) {
        Ok(text) => {
            let state = aml::decode(&text);
            TaskFileInfo {
                path: path.to_path_buf(),
                name: state.name().map(str::to_string).unwrap_or(stem),
                pending: state.pending_count(),
            }
        }
        Err(_) => TaskFileInfo {
            path: path.to_path_buf(),
            name: stem,
            pending: 0,
        },
    }
}

/// Run the first pending task of one file; false when nothing is pending
async fn work_file(file: &Path, config: &Config, ports: &Ports) -> Result<bool> {
    let agent = Agent::new(file, RunMode::Foreground, config, ports.clone(), Some(progress_printer()))?;
    let state = agent.state()?;
    let Some(task) = state.next_pending_todo() else {
        return Ok(false);
    };

    println!("{}Running:{} {}", BLUE, RESET, task.content);
    agent.run_once().await?;
    Ok(true)
}

/// Run one task from every task file in the work directory
pub async fn work() -> Result<()> {
    let config = Config::load()?;
    let work_dir = &config.workspace.work_dir;

    if !work_dir.exists() {
        fs::create_dir_all(work_dir).with_context(|| format!("Failed to create {}", work_dir.display()))?;
        println!("Created {}; add task files to it.", work_dir.display());
        return Ok(());
    }

    let files = task_files(work_dir)?;
    if files.is_empty() {
        println!("No task files in {}", work_dir.display());
        return Ok(());
    }
    println!("{}Found {} task files{}", BOLD, files.len(), RESET);

    let ports = build_ports(&config).await?;
    let (mut ran, mut failed) = (0usize, 0usize);

    for file in &files {
        println!("\n{}--- {} ---{}", DIM, file.display(), RESET);
        let result = work_file(file, &config, &ports).await;

        match result {
            Ok(true) => ran += 1,
            Ok(false) => print_status(true, "nothing pending"),
            Err(e) => {
                failed += 1;
                print_status(false, &format!("{:#}", e));
            }
        }
    }

    println!(
        "\n{}Work finished:{} {} ran, {} failed, {} files",
        BOLD,
        RESET,
        ran,
        failed,
        files.len()
    );
    Ok(())
}

/// Pick a task file interactively and work through it
pub async fn select() -> Result<()> {
    let config = Config::load()?;
    let work_dir = &config.workspace.work_dir;

    let files = if work_dir.exists() { task_files(work_dir)? } else { Vec::new() };
    if files.is_empty() {
        println!("No task files in {}", work_dir.display());
        return Ok(());
    }

    println!("\n{}Genesis: choose a task file{}\n", BOLD, RESET);
    let infos: Vec<TaskFileInfo> = files.iter().map(|f| describe(f)).collect();
    for (i, info) in infos.iter().enumerate() {
        let status = if info.pending > 0 {
            format!("{}({} pending){}", YELLOW, info.pending, RESET)
        } else {
            format!("{}(done){}", GREEN, RESET)
        };
        println!("  [{}] {} {}", i + 1, info.name, status);
        println!("      {}{}{}", DIM, info.path.display(), RESET);
    }
    println!("  [0] Quit\n");

    let choice = match prompt("Select:")? {
        Some(c) if !c.is_empty() && c != "0" => c,
        _ => return Ok(()),
    };
    let Some(info) = choice
        .parse::<usize>()
        .ok()
        .and_then(|n| n.checked_sub(1))
        .and_then(|idx| infos.get(idx))
    else {
        println!("{}Invalid choice:{} {}", RED, RESET, choice);
        return Ok(());
    };

    println!("\n{}Starting:{} {}", BOLD, RESET, info.name);
    let ports = build_ports(&config).await?;
    let agent = Agent::new(&info.path, RunMode::Foreground, &config, ports, Some(progress_printer()))?;
    install_interrupt_handler(agent.stop_handle());
    let stop = agent.stop_handle();

    loop {
        if agent.run_once().await? {
            if stop.is_requested() {
                break;
            }
            continue;
        }

        match prompt("\nAll tasks done. Enter a new task to continue (Enter to quit):")? {
            Some(input) if !input.is_empty() => agent.add_task(&input)?,
            _ => break,
        }
    }

    agent.stop().await;
    Ok(())
}

// Config management commands

/// Create default config file
pub async fn config_init() -> Result<()> {
    let path = Config::user_config_path()?;
    if path.exists() {
        println!("Config file already exists: {}", path.display());
        return Ok(());
    }

    let path = Config::create_default()?;
    println!("{}Created:{} {}", GREEN, RESET, path.display());
    println!("\nEdit this file to customize genesis.");
    Ok(())
}

/// Show the effective configuration
pub async fn config_show() -> Result<()> {
    let config = Config::load()?;

    println!("{}Effective Configuration{}", BOLD, RESET);
    match Config::find_config_path() {
        Some(path) => println!("  Source: {}", path.display()),
        None => println!("  Source: defaults (run 'genesis config init' to create a file)"),
    }
    println!();

    println!("{}[llm]{}", BLUE, RESET);
    println!("  base_url = \"{}\"", config.llm.base_url);
    println!("  model = \"{}\"", config.llm.model);
    println!("  timeout_secs = {}", config.llm.timeout_secs);
    println!("  temperature = {}", config.llm.temperature);
    println!("  max_tokens = {}", config.llm.max_tokens);
    if config.llm.api_key.is_some() {
        println!("  api_key = \"***\"");
    }
    println!();

    println!("{}[engine]{}", BLUE, RESET);
    println!("  max_retries = {}", config.engine.max_retries);
    println!("  max_steps_per_task = {}", config.engine.max_steps_per_task);
    println!();

    println!("{}[memory]{}", BLUE, RESET);
    println!("  limit = {}", config.memory.limit);
    println!("  keep_count = {}", config.memory.keep_count);
    println!();

    println!("{}[scheduler]{}", BLUE, RESET);
    println!("  idle_timeout_secs = {}", config.scheduler.idle_timeout_secs);
    println!("  poll_interval_secs = {}", config.scheduler.poll_interval_secs);
    println!("  wake_file = \"{}\"", config.scheduler.wake_file.display());
    println!("  meta_prompt_file = \"{}\"", config.scheduler.meta_prompt_file.display());
    println!();

    println!("{}[workspace]{}", BLUE, RESET);
    println!("  work_dir = \"{}\"", config.workspace.work_dir.display());

    Ok(())
}

/// Print config file path
pub async fn config_path() -> Result<()> {
    let path = Config::find_config_path().map_or_else(Config::user_config_path, Ok)?;
    println!("{}", path.display());
    Ok(())
}
