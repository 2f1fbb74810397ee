// Entry point for `tasker-step`: runs a single task step on this host.
//
// The plan is read from a JSON or YAML file. Inputs are host directories
// registered as artifacts before the step runs; artifacts registered by the
// step are printed as JSON when it ends. The exit code encodes the
// `StepResult`.

use anyhow::{Context, Result};
use clap::Parser;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tasker_common::{
    ContainerMetadata, ContainerType, EngineSettings, LogFormat, PlanId, RunState, SettingsStore,
    StepContext, StepMetadata, StepResult, TaskPlan, WindowSize, Worker,
};
use tasker_worker::{ConsoleDelegateFactory, LocalPool, LocalWorker, TaskStep, TaskStepError};

/// Command-line arguments for the step runner.
#[derive(Parser, Debug)]
#[command(name = "tasker-step", about = "Run a single task step on this host")]
struct Args {
    /// Task plan to run (`.json`, `.yml` or `.yaml`).
    #[arg(long)]
    plan: PathBuf,

    /// Artifact to register before running, as `name=dir`. Repeatable.
    #[arg(long = "input", value_parser = parse_input)]
    inputs: Vec<(String, PathBuf)>,

    /// Engine settings file (JSON).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Where containers, volumes and task caches are kept.
    #[arg(long)]
    work_dir: Option<PathBuf>,

    #[arg(long, default_value = "1")]
    plan_id: String,

    #[arg(long, default_value_t = 1)]
    team_id: i32,

    #[arg(long, default_value_t = 1)]
    build_id: i32,

    /// Job the build belongs to; 0 for a one-off build, which keeps no caches.
    #[arg(long, default_value_t = 0)]
    job_id: i32,

    /// Step name used to key task caches. Defaults to the plan's name.
    #[arg(long)]
    step_name: Option<String>,

    #[arg(long)]
    log_format: Option<LogFormat>,

    /// Propagate the step's trace context into the task process.
    #[arg(long)]
    tracing: bool,
}

fn parse_input(value: &str) -> Result<(String, PathBuf), String> {
    match value.split_once('=') {
        Some((name, dir)) if !name.is_empty() && !dir.is_empty() => {
            Ok((name.to_string(), PathBuf::from(dir)))
        }
        _ => Err(format!("expected name=dir, got '{value}'")),
    }
}

fn main() {
    let args = Args::parse();

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("tasker-step: failed to build tokio runtime: {e}");
            std::process::exit(StepResult::Errored.exit_code());
        }
    };

    let exit_code = runtime.block_on(async move { run(args).await });

    std::process::exit(exit_code);
}

async fn run(args: Args) -> i32 {
    let mut settings = match SettingsStore::new(args.settings.clone()).get_settings() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("tasker-step: {e:#}");
            return StepResult::Errored.exit_code();
        }
    };
    if let Some(format) = args.log_format {
        settings.log_format = format;
    }
    if args.tracing {
        settings.tracing_enabled = true;
    }
    init_logging(settings.log_format);

    let outcome = match execute(&args, &settings).await {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::error!("tasker-step failed: {:#}", e);
            return StepResult::Errored.exit_code();
        }
    };

    let result = StepResult::from_outcome(&outcome, TaskStepError::is_canceled);
    if let Err(e) = &outcome {
        tracing::error!("step {}: {}", result, e);
    }
    tracing::info!("step {} (exit code {})", result, result.exit_code());
    result.exit_code()
}

fn init_logging(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

async fn execute(args: &Args, settings: &EngineSettings) -> Result<Result<bool, TaskStepError>> {
    let plan = load_plan(&args.plan)?;

    let work_dir = args
        .work_dir
        .clone()
        .or_else(|| settings.work_directory.clone())
        .unwrap_or_else(|| std::env::temp_dir().join("tasker"));
    let worker = Arc::new(LocalWorker::new(&work_dir));
    tracing::info!(worker = worker.name(), work_dir = %work_dir.display(), "using local worker");

    let state = RunState::new();
    for (name, dir) in &args.inputs {
        let dir = dir
            .canonicalize()
            .with_context(|| format!("input '{name}' directory {}", dir.display()))?;
        state
            .artifact_repository()
            .register_artifact(name.clone(), worker.import_volume(dir));
    }

    let step_name = args.step_name.clone().unwrap_or_else(|| plan.name.clone());
    let metadata = StepMetadata {
        team_id: args.team_id,
        build_id: args.build_id,
        job_id: args.job_id,
        ..Default::default()
    };
    let container_metadata = ContainerMetadata {
        working_directory: format!("/tmp/build/{}", &uuid::Uuid::new_v4().simple().to_string()[..8]),
        container_type: ContainerType::Task,
        step_name,
        team_id: args.team_id,
        build_id: args.build_id,
        job_id: args.job_id,
        ..Default::default()
    };

    let step = TaskStep::new(
        PlanId::new(args.plan_id.clone()),
        plan,
        settings.default_limits,
        metadata,
        container_metadata,
        Arc::new(LocalPool::new(worker.clone())),
        Arc::new(ConsoleDelegateFactory::new()),
    )
    .with_tracing(settings.tracing())
    .with_window_size(WindowSize {
        columns: settings.tty_columns,
        rows: settings.tty_rows,
    });

    let ctx = StepContext::new();
    let interrupt = ctx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling step");
            interrupt.cancel();
        }
    });

    let outcome = step.run(&ctx, &state).await;

    let artifacts: BTreeMap<String, String> = state
        .artifact_repository()
        .as_map()
        .into_iter()
        .filter_map(|(name, volume)| {
            let path = worker.volume(volume.handle())?;
            Some((name, path.path().display().to_string()))
        })
        .collect();
    println!("{}", serde_json::to_string_pretty(&artifacts)?);

    Ok(outcome)
}

fn load_plan(path: &Path) -> Result<TaskPlan> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read plan from {}", path.display()))?;
    let yaml = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yml" | "yaml")
    );
    let plan = if yaml {
        serde_yaml::from_str(&raw).with_context(|| format!("Failed to parse plan {}", path.display()))?
    } else {
        serde_json::from_str(&raw).with_context(|| format!("Failed to parse plan {}", path.display()))?
    };
    Ok(plan)
}
