//! flowfuzz - UI-level exploratory fuzzing for Android apps
//!
//! This is the binary entry point. The run logic lives in the workspace crates.

mod headless;
mod replay;
mod signals;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use flowfuzz_app::config::init_config_dir;
use flowfuzz_bridge::{DeviceBridge, PlatformBridge, ToolAvailability};
use flowfuzz_core::TaskStatus;

use headless::RunOptions;

/// flowfuzz - UI-level exploratory fuzzing for Android apps
#[derive(Parser, Debug)]
#[command(name = "flowfuzz", version)]
#[command(about = "UI-level exploratory fuzzing for Android apps", long_about = None)]
struct Args {
    /// Project directory holding `.flowfuzz/config.toml`
    #[arg(long, global = true, value_name = "PATH")]
    project: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a fuzz task and stream its events to stdout
    Run {
        /// Package name of the app under test
        #[arg(long)]
        app: String,

        /// JSON file with the test cases (`{"testCases": [...]}` or an array)
        #[arg(long, value_name = "FILE")]
        cases: PathBuf,

        /// Free-text description of the app
        #[arg(long, default_value = "")]
        description: String,

        /// Task id; generated when omitted
        #[arg(long)]
        task_id: Option<String>,

        /// Maximum number of test cases to run
        #[arg(long)]
        depth: Option<usize>,

        /// Focus-area tags
        #[arg(long = "focus", value_name = "TAG")]
        focus_areas: Vec<String>,

        /// Device serial (overrides the config file)
        #[arg(long)]
        serial: Option<String>,
    },

    /// Rebuild the flow graph of a captured event stream
    Replay {
        /// File containing `data: <json>` frames
        file: PathBuf,

        /// Test-case indexes to show collapsed
        #[arg(long, value_delimiter = ',', value_name = "INDEX")]
        collapse: Vec<usize>,

        /// Print the graph as JSON
        #[arg(long)]
        json: bool,
    },

    /// Write a default `.flowfuzz/config.toml`
    Init,

    /// List attached devices
    Devices,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    let args = Args::parse();

    let project = args
        .project
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    if let Err(e) = flowfuzz_core::logging::init() {
        eprintln!("Logging disabled: {e}");
    }

    match args.command {
        Command::Run {
            app,
            cases,
            description,
            task_id,
            depth,
            focus_areas,
            serial,
        } => {
            let options = RunOptions {
                app,
                cases,
                description,
                task_id,
                depth,
                focus_areas,
                serial,
            };
            let task = headless::run_headless(&project, options).await?;
            if task.status != TaskStatus::Completed {
                eprintln!("Task {} ended {}", task.id, task.status);
                std::process::exit(1);
            }
        }

        Command::Replay {
            file,
            collapse,
            json,
        } => replay::run_replay(&file, &collapse, json)?,

        Command::Init => {
            let path = init_config_dir(&project)?;
            eprintln!("✅ Config at {}", path.display());
        }

        Command::Devices => {
            let settings = flowfuzz_app::config::load_settings(&project);
            let tools = ToolAvailability::check(&settings.bridge).await;
            if let Some(message) = tools.unavailable_message() {
                eprintln!("❌ {message}");
                std::process::exit(1);
            }

            let bridge = PlatformBridge::connect(settings.bridge)?;
            let devices = bridge.list_devices().await?;
            if devices.is_empty() {
                eprintln!("No devices attached");
            }
            for device in devices {
                println!("{:<24} {:<14} {}", device.id, device.status.as_str(), device.display_name());
            }
        }
    }

    Ok(())
}
