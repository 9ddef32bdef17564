use clap::{Parser, Subcommand};
use crossterm::style::{Color, Stylize};
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use robodash::api::{Backend, HttpBackend, StartReply};
use robodash::config;
use robodash::controller::{ConnectionStatus, DashboardEvent, RunState};
use robodash::dashboard::{Dashboard, DashboardConfig};
use robodash::error::DashError;
use robodash::machine::MachineId;
use robodash::preferences::{
    OptionPayload, listed_settings, parse_assignment, parse_toggle, resolve_test, setting_text, workaround_options,
};
use robodash::results::{self, Panel, ResultPanels, ResultsView, format_percentage};
use robodash::screens::Screenshot;
use robodash::session::CaptureSession;
use robodash::stream::WsConnector;
use robodash::summary::RunSummary;

/// robodash - Start and follow LMS test robot batches
#[derive(Parser, Debug)]
#[command(
    name = "robodash",
    about = "Start, follow and inspect batches on a remote LMS test robot",
    after_help = "ENVIRONMENT VARIABLES:\n\
        ROBODASH_BACKEND_URL       Base URL of the robot master\n\
        ROBODASH_WORKERS           Number of numbered worker machines\n\
        ROBODASH_STATUS_INTERVAL   Status/settings poll interval (ms)\n\
        ROBODASH_RECONNECT_DELAY   Delay before re-attaching a dropped stream (ms)\n\
        ROBODASH_SCREENSHOT_TICK   Screenshot refresher tick (ms)\n\
        ROBODASH_MAX_RECONNECTS    Reconnect attempts before giving up (0 = never)\n\
        ROBODASH_SESSION_DIR       Base directory for capture sessions\n\
        ROBODASH_LOG               Log filter (falls back to RUST_LOG)"
)]
struct Args {
    /// Base URL of the robot master
    #[arg(long, global = true, env = "ROBODASH_BACKEND_URL", default_value = config::DEFAULT_BACKEND_URL)]
    backend: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Args, Debug, Clone)]
struct WatchArgs {
    /// Save every refreshed screenshot to a session directory
    #[arg(long)]
    save_screens: bool,

    /// Directory for saved screenshots (default: auto-generated in session dir)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Keep screenshots after completion (default: cleanup unless --output is specified)
    #[arg(long, short = 'k')]
    keep: bool,

    /// Print a JSON summary instead of the live log
    #[arg(long)]
    json: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List available tests
    Tests {
        #[arg(long)]
        json: bool,
    },

    /// Show settings and workarounds with their defaults
    Preferences {
        #[arg(long)]
        json: bool,
    },

    /// Show the batch currently running, if any
    Status,

    /// Show host settings (looping, free disk)
    Settings {
        #[arg(long)]
        json: bool,
    },

    /// Turn looping on or off
    Loop {
        /// on or off
        state: String,
    },

    /// Start a batch
    Start {
        /// Test name or identifier
        #[arg(short, long)]
        test: String,

        /// Workaround override, KEY=on|off (repeatable)
        #[arg(short, long)]
        workaround: Vec<String>,

        /// Setting override, KEY=VALUE (repeatable)
        #[arg(short, long)]
        setting: Vec<String>,

        /// Browser to run the test in
        #[arg(short, long)]
        browser: Option<String>,

        /// Follow the batch until it finishes
        #[arg(short, long)]
        follow: bool,

        #[command(flatten)]
        watch: WatchArgs,
    },

    /// Follow the running batch (waits for one to start)
    Watch {
        #[command(flatten)]
        watch: WatchArgs,
    },

    /// Show result summaries
    Results {
        #[arg(long)]
        coverage: bool,

        #[arg(long)]
        details: bool,

        #[arg(long)]
        performance: bool,

        #[arg(long)]
        longterm: bool,

        #[arg(long)]
        json: bool,
    },

    /// Delete all stored results
    DeleteResults,

    /// Save the current screenshot of one machine
    Screenshot {
        /// master or machine_N
        machine: String,

        /// Output file path
        #[arg(short, long, default_value = "./screenshot.png")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    init_tracing();
    let args = Args::parse();
    let backend = HttpBackend::new(&args.backend)?;

    match args.command {
        Some(Commands::Tests { json }) => {
            let catalog = backend.tests().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&catalog)?);
            } else {
                for (name, id) in &catalog {
                    println!("{:<40} {}", name, id);
                }
            }
        }

        Some(Commands::Preferences { json }) => {
            let prefs = backend.preferences().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&prefs)?);
            } else {
                println!("Settings:");
                for setting in listed_settings(&prefs) {
                    println!("  {:<24} {:<20} {}", setting.key, setting_text(&setting.value), setting.description);
                }
                println!("Workarounds:");
                for option in workaround_options(&prefs) {
                    let state = if option.enabled { "on" } else { "off" };
                    println!(
                        "  {:<24} {:<4} {:<5} {}",
                        option.key,
                        state,
                        option.code.as_deref().unwrap_or(""),
                        option.text
                    );
                }
            }
        }

        Some(Commands::Status) => match backend.status().await? {
            Some(batch) => println!("Running: batch {}", batch),
            None => println!("Idle"),
        },

        Some(Commands::Settings { json }) => {
            let host = backend.settings().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&host)?);
            } else {
                println!("Looping:   {}", if host.is_looping { "on" } else { "off" });
                println!("Disk free: {}", host.host_disk_free);
            }
        }

        Some(Commands::Loop { state }) => {
            let looping = parse_toggle(&state)?;
            backend.set_looping(looping).await?;
            println!("Looping {}", if looping { "enabled" } else { "disabled" });
        }

        Some(Commands::Start {
            test,
            workaround,
            setting,
            browser,
            follow,
            watch,
        }) => {
            let catalog = backend.tests().await?;
            let test_id = resolve_test(&catalog, &test).ok_or_else(|| format!("Unknown test '{}'", test))?;

            let prefs = backend.preferences().await?;
            let mut options = OptionPayload::from_preferences(&prefs);
            for raw in &workaround {
                let (key, value) = parse_assignment(raw)?;
                options.set_workaround(key, parse_toggle(&value)?);
            }
            for raw in &setting {
                let (key, value) = parse_assignment(raw)?;
                options.set_setting(key, value);
            }
            if let Some(browser) = browser {
                options.set_browser(browser);
            }

            if follow {
                run_watch(backend, watch, Some((test_id, options))).await?;
            } else {
                match backend.start(&options.to_request(test_id)).await? {
                    StartReply::Started(batch) => println!("Started batch {}", batch),
                    StartReply::Unavailable => return Err(DashError::BackendUnavailable.into()),
                }
            }
        }

        Some(Commands::Watch { watch }) => {
            run_watch(backend, watch, None).await?;
        }

        Some(Commands::Results {
            coverage,
            details,
            performance,
            longterm,
            json,
        }) => {
            let panels = ResultPanels::with(
                [
                    (coverage, Panel::Coverage),
                    (details, Panel::Details),
                    (performance, Panel::Performance),
                    (longterm, Panel::Longterm),
                ]
                .into_iter()
                .filter_map(|(open, panel)| open.then_some(panel)),
            );
            let view = results::fetch(&backend, &panels).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&view)?);
            } else {
                print_results(&backend, &view)?;
            }
        }

        Some(Commands::DeleteResults) => {
            backend.delete_results().await?;
            println!("Results deleted");
        }

        Some(Commands::Screenshot { machine, output }) => {
            let machine: MachineId = machine.parse()?;
            if !machine.has_screen() {
                return Err(DashError::InvalidMachine(machine.to_string()).into());
            }
            let payload = backend
                .screenshot(machine)
                .await?
                .ok_or_else(|| format!("No screenshot available for {}", machine))?;
            let shot = Screenshot::decode(machine, &payload)?;
            std::fs::write(&output, &shot.png)?;

            println!("Saved {} screenshot: {}", machine, output.display());
            println!("  Size: {}x{}", shot.width, shot.height);
        }

        None => {
            println!("robodash - Start and follow LMS test robot batches");
            println!();
            println!("Usage: robodash <COMMAND>");
            println!();
            println!("Commands:");
            println!("  tests           List available tests");
            println!("  start           Start a batch (--follow to watch it)");
            println!("  watch           Follow the running batch");
            println!("  status          Show the running batch");
            println!("  results         Show result summaries");
            println!("  screenshot      Save one machine's screenshot");
            println!();
            println!("Run with --help for more information.");
        }
    }

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(config::ENV_LOG)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Run the dashboard loop, optionally starting a batch, and follow one batch
/// to its end
async fn run_watch(
    backend: HttpBackend,
    args: WatchArgs,
    start: Option<(String, OptionPayload)>,
) -> Result<(), Box<dyn Error>> {
    let connector = Arc::new(WsConnector::new(backend.clone()));
    let (dashboard, handle) = Dashboard::new(Arc::new(backend), connector, DashboardConfig::default());
    let mut events = handle.subscribe();
    let task = tokio::spawn(dashboard.run());

    if let Some((test, options)) = start {
        let batch = handle.start(test, options).await?;
        eprintln!("Started batch {}", batch);
    } else if !args.json {
        eprintln!("Waiting for a running batch...");
    }

    let session = if args.save_screens {
        let session = match &args.output {
            Some(dir) => CaptureSession::in_dir(dir),
            None => CaptureSession::with_name("watch").keep(args.keep),
        };
        session.init()?;
        Some(session)
    } else {
        None
    };

    let mut summary = RunSummary::default();
    loop {
        let event = tokio::select! {
            event = events.recv() => event,
            _ = tokio::signal::ctrl_c() => break,
        };

        let event = match event {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "event printer fell behind");
                continue;
            }
            Err(RecvError::Closed) => break,
        };

        summary.record(&event);
        match &event {
            DashboardEvent::Log { origin, message } if !args.json => print_log(*origin, message),
            DashboardEvent::Screenshot(shot) => {
                if let Some(session) = &session {
                    summary.add_screenshot(session.save_screenshot(shot)?);
                }
            }
            DashboardEvent::Notice(message) => eprintln!("{}", message.as_str().yellow()),
            DashboardEvent::Connection { batch, status } if !args.json => match status {
                ConnectionStatus::Connected => eprintln!("Following batch {}", batch),
                ConnectionStatus::Reconnecting { attempt } => {
                    eprintln!("Connection lost, reconnecting (attempt {})", attempt)
                }
                ConnectionStatus::Failed => eprintln!("{}", "Gave up reconnecting".red()),
                ConnectionStatus::Closed => {}
            },
            DashboardEvent::StateChanged(RunState::Finished(batch, outcome)) if !args.json => {
                let label = outcome.label().to_string();
                let label = if outcome.is_ok() { label.green() } else { label.red() };
                println!("Batch {} finished: {}", batch, label);
            }
            _ => {}
        }

        if summary.is_complete() {
            break;
        }
    }

    handle.shutdown().await.ok();
    task.await??;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else if let Some(session) = &session {
        println!("\nSession: {} ({} screenshots)", session.dir.display(), summary.screenshots.len());
    }

    Ok(())
}

fn print_log(origin: MachineId, message: &str) {
    let [r, g, b] = origin.tag_color();
    println!("{} {}", format!("[{}]", origin).with(Color::Rgb { r, g, b }), message);
}

fn print_results(backend: &HttpBackend, view: &ResultsView) -> Result<(), Box<dyn Error>> {
    for (status, count) in &view.counts {
        println!("{:<12} {:>6} runs {:>8} users", status, count.runs, count.users);
    }
    println!("Total runs: {}", view.total_runs());

    if let Some(longterm) = &view.longterm {
        println!(
            "\nLong term: {} users OK, {} users failed over {} buckets",
            longterm.ok_users,
            longterm.fail_users,
            longterm.buckets.len()
        );
    }

    if !view.has_results() {
        return Ok(());
    }

    if let Some(coverage) = &view.coverage {
        println!(
            "\nCoverage: {} of {} cases ({})",
            coverage.observed,
            coverage.cases,
            format_percentage(coverage.percentage)
        );
        for question in &coverage.questions {
            println!("  {:<32} {}", question.name, format_percentage(question.percentage));
        }
    }

    if let Some(details) = &view.details {
        println!("\nRuns:");
        for detail in details {
            println!(
                "  {}  {:>8.1}s  {:<10} {}",
                detail.time,
                detail.elapsed,
                detail.success,
                backend.result_archive_url(&detail.batch)?
            );
        }
    }

    if let Some(performance) = &view.performance {
        if !performance.is_empty() {
            let mean = performance.iter().sum::<f64>() / performance.len() as f64;
            let max = performance.iter().copied().fold(f64::MIN, f64::max);
            println!("\nPerformance: {} runs, mean {:.1}s, max {:.1}s", performance.len(), mean, max);
        }
    }

    Ok(())
}
