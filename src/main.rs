use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use bddrunner::config::{Config, LogFormat, LoggingConfig};
use bddrunner::dispatch::RunRequest;
use bddrunner::locator::{self, LocatedReport};
use bddrunner::report::{self, ParsedReport, ScenarioStatus};
use bddrunner::storage::{self, Run, RunStatus};
use bddrunner::Services;

#[derive(Parser)]
#[command(
    name = "bddrunner",
    about = "Run BDD test suites from git repositories and normalize their reports",
    version,
    long_about = None
)]
struct Cli {
    /// Config file (default: $BDDRUNNER_CONFIG, then /etc/bddrunner/bddrunner.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the SQLite database path
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon (API server + executor)
    Serve {
        /// Bind address
        #[arg(long)]
        bind: Option<String>,
    },

    /// Execute one run in the foreground, streaming its output
    Run {
        /// Project id
        project: String,

        /// Repository override (owner/name, URL or path)
        #[arg(long)]
        repository: Option<String>,

        /// Tag to select scenarios by; repeatable, tags are ANDed
        #[arg(long = "tag")]
        tags: Vec<String>,

        #[arg(long)]
        branch: Option<String>,

        /// Build target (default: the project's)
        #[arg(long)]
        target: Option<String>,

        /// Keep the run in memory only
        #[arg(long)]
        ephemeral: bool,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Parse a report file and print the normalized result
    Parse {
        path: PathBuf,

        #[arg(long, value_enum, default_value = "auto")]
        format: ParseFormat,

        #[arg(long)]
        json: bool,
    },

    /// Find the report file a run would use under a directory
    Locate { dir: PathBuf },

    /// Inspect recorded runs
    Runs {
        #[command(subcommand)]
        action: RunsAction,
    },

    /// Inspect configured projects
    Projects {
        #[command(subcommand)]
        action: ProjectsAction,
    },
}

#[derive(Subcommand)]
enum RunsAction {
    /// List runs, newest first
    List {
        #[arg(long)]
        project: Option<String>,

        #[arg(long, default_value = "20")]
        limit: usize,
    },

    /// Show one run with its features
    Show {
        id: String,

        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum ProjectsAction {
    /// List all projects
    List,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ParseFormat {
    Auto,
    Cucumber,
    Junit,
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(logging.level.as_str()));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::resolve(cli.config.as_deref())?;
    if let Some(db) = cli.db {
        config.storage.database_path = db;
    }
    init_tracing(&config.logging);

    match cli.command {
        Commands::Serve { bind } => {
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            tracing::info!(bind = %config.server.bind, "Starting bddrunner daemon");
            bddrunner::serve(config).await?;
        }
        Commands::Run {
            project,
            repository,
            tags,
            branch,
            target,
            ephemeral,
            json,
        } => {
            let pool = if ephemeral {
                storage::open_in_memory()?
            } else {
                storage::open_pool(&config.storage.database_path.display().to_string())?
            };
            let services = Services::new(&config, pool)?;
            let request = RunRequest {
                project_id: project,
                repository,
                tags: Some(tags),
                branch,
                target,
            };
            let run = run_foreground(&services, request, !json).await?;
            if json {
                let detail = services.runs.get_run(&run.id)?;
                println!("{}", serde_json::to_string_pretty(&detail)?);
            } else {
                print_run(&run);
            }
            if run.status != RunStatus::Passed {
                std::process::exit(1);
            }
        }
        Commands::Parse { path, format, json } => {
            let parsed = parse_file(&path, format)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&parsed)?);
            } else {
                print_report(&parsed);
            }
        }
        Commands::Locate { dir } => {
            if !dir.is_dir() {
                bail!("{} is not a directory", dir.display());
            }
            match locator::locate(&dir) {
                Some(LocatedReport::Cucumber(path)) => println!("cucumber {}", path.display()),
                Some(LocatedReport::Junit(path)) => println!("junit {}", path.display()),
                None => println!("No report found; a run would fall back to the exit code."),
            }
        }
        Commands::Runs { action } => {
            let pool = storage::open_pool(&config.storage.database_path.display().to_string())?;
            let runs = storage::RunStore::new(pool);
            match action {
                RunsAction::List { project, limit } => {
                    let list = runs.list_runs(project.as_deref(), limit)?;
                    if list.is_empty() {
                        println!("No runs found.");
                    } else {
                        println!(
                            "{:<36} | {:<16} | {:<8} | {:>6} | {:>6} | {:>7} | Created",
                            "Id", "Project", "Status", "Passed", "Failed", "Skipped"
                        );
                        println!(
                            "{:-<36}-|-{:-<16}-|-{:-<8}-|-{:-<6}-|-{:-<6}-|-{:-<7}-|-{:-<20}",
                            "", "", "", "", "", "", ""
                        );
                        for run in list {
                            println!(
                                "{:<36} | {:<16} | {:<8} | {:>6} | {:>6} | {:>7} | {}",
                                run.id,
                                run.project_id,
                                run.status,
                                run.summary.passed,
                                run.summary.failed,
                                run.summary.skipped,
                                run.created_at.to_rfc3339()
                            );
                        }
                    }
                }
                RunsAction::Show { id, json } => {
                    let Some(detail) = runs.get_run(&id)? else {
                        bail!("run '{}' not found", id);
                    };
                    if json {
                        println!("{}", serde_json::to_string_pretty(&detail)?);
                    } else {
                        print_run(&detail.run);
                        for feature in &detail.features {
                            println!("\nFeature: {}", feature.name);
                            for scenario in &feature.scenarios {
                                println!(
                                    "  [{}] {} ({} ms)",
                                    label(scenario.status),
                                    scenario.name,
                                    scenario.duration_ms
                                );
                            }
                        }
                    }
                }
            }
        }
        Commands::Projects { action } => match action {
            ProjectsAction::List => {
                let pool =
                    storage::open_pool(&config.storage.database_path.display().to_string())?;
                let services = Services::new(&config, pool)?;
                let list = services.projects.list_projects()?;
                if list.is_empty() {
                    println!("No projects found.");
                } else {
                    println!("{:<16} | {:<24} | {:<32} | Target", "Id", "Name", "Repository");
                    println!("{:-<16}-|-{:-<24}-|-{:-<32}-|-{:-<12}", "", "", "", "");
                    for p in list {
                        println!(
                            "{:<16} | {:<24} | {:<32} | {}",
                            p.id, p.name, p.repository, p.default_target
                        );
                    }
                }
            }
        },
    }

    Ok(())
}

/// Execute a run on this task, echoing new log lines while it progresses.
async fn run_foreground(services: &Services, request: RunRequest, echo: bool) -> Result<Run> {
    let run = services.dispatcher.prepare(request)?;
    let run_id = run.id.clone();
    tracing::info!(%run_id, "Executing run");

    let executor = services.executor.clone();
    let mut task = tokio::spawn(async move { executor.execute(run).await });

    let mut offset = 0;
    let finished = loop {
        tokio::select! {
            result = &mut task => break result.context("executor task failed")?,
            _ = tokio::time::sleep(Duration::from_millis(250)) => {}
        }
        if echo {
            offset = echo_logs(services, &run_id, offset);
        }
    };
    if echo {
        echo_logs(services, &run_id, offset);
    }

    match finished {
        Some(run) => Ok(run),
        None => services
            .runs
            .find_run(&run_id)?
            .with_context(|| format!("run '{}' disappeared", run_id)),
    }
}

fn echo_logs(services: &Services, run_id: &str, offset: usize) -> usize {
    let chunk = services.logs.read(run_id, offset);
    for line in &chunk.lines {
        println!("{}", line.text);
    }
    chunk.total
}

fn parse_file(path: &Path, format: ParseFormat) -> Result<ParsedReport> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let format = match format {
        ParseFormat::Auto => match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => ParseFormat::Cucumber,
            Some(ext) if ext.eq_ignore_ascii_case("xml") => ParseFormat::Junit,
            _ => bail!(
                "cannot infer report format of {}; pass --format",
                path.display()
            ),
        },
        other => other,
    };
    let parsed = match format {
        ParseFormat::Junit => report::parse_junit(&text)?,
        _ => report::parse_cucumber(&text)?,
    };
    Ok(parsed)
}

fn label(status: ScenarioStatus) -> &'static str {
    match status {
        ScenarioStatus::Passed => "PASS",
        ScenarioStatus::Failed => "FAIL",
        ScenarioStatus::Skipped => "SKIP",
    }
}

fn print_report(parsed: &ParsedReport) {
    for feature in &parsed.features {
        println!("Feature: {}", feature.name);
        for scenario in &feature.scenarios {
            println!(
                "  [{}] {} ({} ms)",
                label(scenario.status),
                scenario.name,
                scenario.duration_ms
            );
            for step in scenario.steps.iter().filter(|s| s.error.is_some()) {
                println!(
                    "         {} {}: {}",
                    step.keyword,
                    step.text,
                    step.error.as_deref().unwrap_or_default()
                );
            }
        }
    }
    let s = parsed.summary;
    println!(
        "\n{} scenarios: {} passed, {} failed, {} skipped",
        s.total, s.passed, s.failed, s.skipped
    );
}

fn print_run(run: &Run) {
    println!("\n=== Run {} ===", run.id);
    println!("Project:  {}", run.project_id);
    println!("Target:   {} @ {}", run.target, run.branch);
    println!("Status:   {}", run.status);
    println!(
        "Summary:  {} passed, {} failed, {} skipped ({} total)",
        run.summary.passed, run.summary.failed, run.summary.skipped, run.summary.total
    );
    if let Some(format) = run.report_format {
        println!("Source:   {}", format);
    }
    if let Some(ms) = run.duration_ms {
        println!("Duration: {:.1}s", ms as f64 / 1000.0);
    }
    if let Some(error) = &run.error {
        println!("Error:    {}", error);
    }
}
