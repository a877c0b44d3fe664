#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;

use airq_agent::gateway::http::HttpBackend;
use airq_agent::gateway::{
    AirqApi, BackendGateway, NoopUsageSink, ReportKind, ReportRequest, StderrUsageSink, Tier,
};
use airq_agent::journal::{JournalSink, JsonlJournalSink};
use airq_agent::project::{comparison_rows, forecast_rows, format_pm};
use airq_agent::{
    autofill, reconcile, AgentSession, ClientConfig, ExecuteResponse, Plan, Step, UiInputs,
};

#[derive(Parser)]
#[command(name = "airq", version, about = "Air-quality agent client")]
struct Cli {
    /// TOML config file (base_url, tier, api_key, timeout_seconds)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Backend base URL (overrides config and AIRQ_API_URL)
    #[arg(long, global = true)]
    base_url: Option<String>,
    /// Subscription tier sent as X-PLAN (free, pro, enterprise)
    #[arg(long, global = true)]
    tier: Option<String>,
    /// Append one JSON line per session action to this file
    #[arg(long, global = true)]
    journal: Option<PathBuf>,
    /// Print per-call usage records to stderr
    #[arg(long, global = true)]
    usage: bool,
    /// Debug logging (otherwise RUST_LOG, default warn)
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Backend and upstream health
    Health,
    /// Ingest recent readings for one city
    Scrape {
        #[arg(long, default_value = "Colombo")]
        city: String,
        #[arg(long, default_value_t = 7)]
        days: u32,
    },
    /// Compare cities over a window
    Compare {
        /// Comma-separated city list
        #[arg(long, default_value = "Colombo,Kandy")]
        cities: String,
        #[arg(long, default_value_t = 7)]
        days: u32,
    },
    /// Forecast several cities
    Forecast {
        /// Comma-separated city list
        #[arg(long, default_value = "Colombo,Kandy")]
        cities: String,
        #[arg(long, default_value_t = 7)]
        horizon: u32,
        #[arg(long, default_value_t = 30)]
        train_days: u32,
    },
    /// Ask the planner for a plan
    Plan {
        #[arg(long)]
        prompt: String,
    },
    /// Execute a plan file, or a prompt in one round trip
    Execute {
        #[arg(long, conflicts_with = "plan", required_unless_present = "plan")]
        prompt: Option<String>,
        /// JSON file: `{"plan": [...]}` or a bare step array
        #[arg(long)]
        plan: Option<PathBuf>,
    },
    /// Plan then execute, printing the resulting session state
    Ask {
        #[arg(long)]
        prompt: String,
    },
    /// Render a PDF report
    Report {
        #[arg(long, value_enum)]
        kind: CliReportKind,
        /// JSON file with the report payload
        #[arg(long)]
        payload: PathBuf,
        #[arg(long)]
        notes: Option<String>,
        #[arg(long)]
        out: PathBuf,
    },
    /// Show the inputs a plan file would pre-fill (offline)
    Autofill {
        #[arg(long)]
        plan: PathBuf,
    },
    /// Reconcile a saved execution response (offline)
    Reconcile {
        #[arg(long)]
        response: PathBuf,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum CliReportKind {
    Comparison,
    Forecast,
}

impl From<CliReportKind> for ReportKind {
    fn from(kind: CliReportKind) -> Self {
        match kind {
            CliReportKind::Comparison => ReportKind::Comparison,
            CliReportKind::Forecast => ReportKind::Forecast,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let (journal, worker) = match &cli.journal {
        Some(path) => {
            let (sink, worker) = JsonlJournalSink::new(path)?;
            (Some(Arc::new(sink) as Arc<dyn JournalSink>), Some(worker))
        }
        None => (None, None),
    };

    let outcome = run(&cli, journal).await;

    if let Some(worker) = worker {
        worker.join()?;
    }
    outcome
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(
    cli: &Cli,
    journal: Option<Arc<dyn JournalSink>>,
) -> Result<(), Box<dyn std::error::Error>> {
    match &cli.command {
        Commands::Autofill { plan } => {
            let plan = read_plan(plan)?;
            let patch = autofill::resolve(&plan);
            let mut inputs = UiInputs::default();
            patch.apply(&mut inputs);
            for step in &plan.steps {
                eprintln!("- {}", step.describe());
            }
            print_json(&json!({ "patch": patch, "inputs": inputs }))?;
            return Ok(());
        }
        Commands::Reconcile { response } => {
            let response: ExecuteResponse = read_json(response)?;
            let rec = reconcile(&response);
            let forecast_chart = rec.forecast.as_ref().map(forecast_rows);
            let comparison_chart = rec.comparison.as_ref().map(comparison_rows);
            print_json(&json!({
                "reconciliation": rec,
                "forecast_rows": forecast_chart,
                "comparison_rows": comparison_chart,
            }))?;
            return Ok(());
        }
        _ => {}
    }

    let config = load_config(cli)?;
    let api = build_api(&config, cli.usage)?;

    if let Commands::Report {
        kind,
        payload,
        notes,
        out,
    } = &cli.command
    {
        let payload: Value = read_json(payload)?;
        let req = ReportRequest::new((*kind).into(), payload).notes(notes.as_deref());
        let bytes = api.report(req).await?;
        std::fs::write(out, &bytes)?;
        eprintln!("wrote {} bytes to {}", bytes.len(), out.display());
        return Ok(());
    }

    let mut session = AgentSession::new(api);
    if let Some(journal) = journal {
        session = session.with_journal(journal);
    }

    let delta = match &cli.command {
        Commands::Health => {
            session.health().await;
            print_json(&session.state().health)?;
            return Ok(());
        }
        Commands::Scrape { city, days } => {
            let inputs = session.inputs_mut();
            inputs.scrape_city = city.clone();
            inputs.scrape_days = *days;
            let delta = session.scrape().await;
            print_json(&session.state().scrape)?;
            delta
        }
        Commands::Compare { cities, days } => {
            let inputs = session.inputs_mut();
            inputs.compare_cities = cities.clone();
            inputs.compare_days = *days;
            let delta = session.compare().await;
            let state = session.state();
            let rows = state.comparison.value().map(comparison_rows);
            if let Some(view) = state.comparison.value() {
                print_means(view.by_city.iter().map(|(c, s)| (c.as_str(), s.mean_pm25)));
            }
            print_json(&json!({ "comparison": state.comparison, "rows": rows }))?;
            delta
        }
        Commands::Forecast {
            cities,
            horizon,
            train_days,
        } => {
            let inputs = session.inputs_mut();
            inputs.forecast_cities = cities.clone();
            inputs.forecast_horizon = *horizon;
            inputs.forecast_train_days = *train_days;
            let delta = session.forecast().await;
            let state = session.state();
            let rows = state.forecast.value().map(forecast_rows);
            if let Some(view) = state.forecast.value() {
                print_means(view.summary.iter().map(|(c, s)| (c.as_str(), s.mean_yhat)));
            }
            print_json(&json!({ "forecast": state.forecast, "rows": rows }))?;
            delta
        }
        Commands::Plan { prompt } => {
            session.set_prompt(prompt.clone());
            let delta = session.plan().await;
            if let Some(plan) = session.state().phase.plan() {
                for step in &plan.steps {
                    eprintln!("- {}", step.describe());
                }
            }
            print_json(&json!({
                "phase": session.state().phase,
                "inputs": session.state().inputs,
                "error": delta.error(),
            }))?;
            delta
        }
        Commands::Execute { prompt, plan } => {
            if let Some(path) = plan {
                session.set_prompt(prompt.clone().unwrap_or_default());
                session.hold_plan(read_plan(path)?);
            } else if let Some(prompt) = prompt {
                session.set_prompt(prompt.clone());
            }
            let delta = session.execute().await;
            print_json(session.state())?;
            delta
        }
        Commands::Ask { prompt } => {
            let delta = session.ask(prompt.clone()).await;
            print_json(session.state())?;
            delta
        }
        Commands::Report { .. } | Commands::Autofill { .. } | Commands::Reconcile { .. } => {
            return Ok(());
        }
    };

    match delta.error() {
        Some(error) => Err(error.to_string().into()),
        None => Ok(()),
    }
}

/// Per-city means on stderr, one line each.
fn print_means<'a>(means: impl Iterator<Item = (&'a str, Option<f64>)>) {
    for (city, mean) in means {
        eprintln!("{city}: {}", format_pm(mean));
    }
}

fn load_config(cli: &Cli) -> Result<ClientConfig, Box<dyn std::error::Error>> {
    let config = match &cli.config {
        Some(path) => ClientConfig::from_path(path)?,
        None => ClientConfig::default(),
    };
    let mut config = config.with_env_overrides()?;
    if let Some(url) = &cli.base_url {
        config.base_url = url.clone();
    }
    if let Some(tier) = &cli.tier {
        config.tier = Tier::parse(tier);
    }
    Ok(config)
}

fn build_api(
    config: &ClientConfig,
    usage: bool,
) -> Result<Arc<dyn AirqApi>, Box<dyn std::error::Error>> {
    let backend = HttpBackend::from_config(config)?;
    let api: Arc<dyn AirqApi> = if usage {
        Arc::new(BackendGateway::new(backend, Arc::new(StderrUsageSink)).with_caller("cli"))
    } else {
        Arc::new(BackendGateway::new(backend, Arc::new(NoopUsageSink)).with_caller("cli"))
    };
    Ok(api)
}

/// Accepts `{"plan": [...]}` or a bare step array.
fn read_plan(path: &PathBuf) -> Result<Plan, Box<dyn std::error::Error>> {
    let value: Value = read_json(path)?;
    match value {
        Value::Array(_) => Ok(Plan::new(serde_json::from_value::<Vec<Step>>(value)?)),
        other => Ok(serde_json::from_value(other)?),
    }
}

fn read_json<T: serde::de::DeserializeOwned>(
    path: &PathBuf,
) -> Result<T, Box<dyn std::error::Error>> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
