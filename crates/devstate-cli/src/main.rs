mod commands;
mod sink;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use commands::{CONFIG_ERROR_PREFIX, EXIT_CONFIG_ERROR, EXIT_FAILURE, EXIT_FATAL};
use devstate_core::{Event, EventSink};
use devstate_schema::CONFIG_FILE_NAME;
use sink::{ConsoleSink, JsonLinesSink};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::Ordering;

#[derive(Debug, Parser)]
#[command(
    name = "devstate",
    version,
    about = "Bring a development environment to a ready state, dependencies first"
)]
struct Cli {
    /// Path to the devstate configuration file.
    #[arg(short, long, default_value = CONFIG_FILE_NAME, global = true)]
    config: PathBuf,

    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Resolve a state and everything it needs.
    Up {
        /// State to bring up (defaults to the config's `target`).
        target: Option<String>,
    },
    /// Print the dependency-first execution order without running anything.
    Plan {
        /// State to plan for (defaults to the config's `target`).
        target: Option<String>,
    },
    /// Run only a state's pre-check.
    Check {
        /// State to check.
        state: String,
    },
    /// List declared states.
    List,
    /// Generate shell completions for bash, zsh, fish, elvish, or powershell.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

fn main() -> ExitCode {
    let default_hook = panic::take_hook();
    panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            // A run cut short by a closed pipe has not reached its target.
            let code = if commands::up::RUN_IN_PROGRESS.load(Ordering::SeqCst) {
                EXIT_FAILURE
            } else {
                0
            };
            std::process::exit(code.into());
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("DEVSTATE_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    let json = cli.json;
    match panic::catch_unwind(AssertUnwindSafe(|| dispatch(cli))) {
        Ok(Ok(code)) => ExitCode::from(code),
        Ok(Err(msg)) => {
            eprintln!("error: {msg}");
            let code = if msg.starts_with(CONFIG_ERROR_PREFIX) {
                EXIT_CONFIG_ERROR
            } else {
                EXIT_FAILURE
            };
            ExitCode::from(code)
        }
        Err(payload) => {
            let event = Event::Fatal {
                message: panic_message(payload.as_ref()),
            };
            if json {
                JsonLinesSink::stdout().emit(&event);
            } else {
                ConsoleSink::stdout().emit(&event);
            }
            ExitCode::from(EXIT_FATAL)
        }
    }
}

fn dispatch(cli: Cli) -> Result<u8, String> {
    let config = cli.config.as_path();
    match cli.command {
        Commands::Up { target } => commands::up::run(config, target.as_deref(), cli.json),
        Commands::Plan { target } => commands::plan::run(config, target.as_deref(), cli.json),
        Commands::Check { state } => commands::check::run(config, &state, cli.json),
        Commands::List => commands::list::run(config, cli.json),
        Commands::Completions { shell } => commands::completions::run::<Cli>(shell),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("internal error: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("internal error: {s}")
    } else {
        "internal error".to_owned()
    }
}
