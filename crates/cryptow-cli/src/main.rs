mod commands;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use commands::{Failure, EXIT_FAILURE};
use cryptow_core::{install_signal_handler, Engine};
use cryptow_runtime::{check_prereqs, summarize_missing, ToolConfig};
use cryptow_store::StateLayout;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Mutex;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

#[derive(Debug, Parser)]
#[command(
    name = "cryptow",
    version,
    about = "Run commands with profile-scoped secrets and gocryptfs-encrypted storage"
)]
struct Cli {
    /// Directory holding profiles.yaml (default: $XDG_CONFIG_HOME/cryptow).
    #[arg(long, global = true, value_name = "DIR")]
    config_dir: Option<PathBuf>,

    /// Directory for state, default mounts and the log file
    /// (default: $XDG_DATA_HOME/cryptow).
    #[arg(long, global = true, value_name = "DIR")]
    data_dir: Option<PathBuf>,

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
    /// List configured profiles and their mount status.
    List,
    /// Create the encrypted stores of a profile's volumes.
    Init {
        profile: String,
        /// Generate the pass entries first (refuses to overwrite existing ones).
        #[arg(long, default_value_t = false)]
        gen_pass: bool,
        /// Length of generated passwords.
        #[arg(long, default_value_t = 32, value_parser = clap::value_parser!(u16).range(1..))]
        length: u16,
    },
    /// Mount a profile's encrypted volumes without running its command.
    Mount {
        profile: String,
        /// Describe actions without executing.
        #[arg(long, default_value_t = false)]
        dry_run: bool,
        /// Remove a stale lock before mounting.
        #[arg(long, default_value_t = false)]
        force: bool,
    },
    /// Unmount a profile's encrypted volumes.
    Unmount {
        profile: String,
        /// Describe actions without executing.
        #[arg(long, default_value_t = false)]
        dry_run: bool,
        /// Fall back to a lazy unmount and always clear the session state.
        #[arg(long, default_value_t = false)]
        force: bool,
    },
    /// Mount, run the profile's command, and unmount afterwards.
    Run {
        /// Describe actions without executing.
        #[arg(long, default_value_t = false)]
        dry_run: bool,
        /// Remove a stale lock before mounting.
        #[arg(long, default_value_t = false)]
        force: bool,
        /// Terminate the command after this many seconds (exit code 124).
        #[arg(long, value_name = "SECS", value_parser = clap::value_parser!(u64).range(1..))]
        timeout: Option<u64>,
        profile: String,
        /// Extra arguments appended to the profile command.
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Run diagnostic checks on tools, profiles and state.
    Doctor,
    /// Generate shell completions for bash, zsh, fish, elvish, or powershell.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
    /// Generate man pages in the specified directory.
    ManPages {
        /// Output directory for man pages.
        #[arg(default_value = "man")]
        dir: PathBuf,
    },
}

impl Commands {
    /// Commands that change on-disk or mount state and are worth recording in
    /// the log file.
    fn mutates_state(&self) -> bool {
        match self {
            Self::Init { .. } => true,
            Self::Mount { dry_run, .. }
            | Self::Unmount { dry_run, .. }
            | Self::Run { dry_run, .. } => !dry_run,
            _ => false,
        }
    }

    fn needs_tools(&self) -> bool {
        match self {
            Self::Init { .. } => true,
            Self::Mount { dry_run, .. } | Self::Run { dry_run, .. } => !dry_run,
            _ => false,
        }
    }
}

fn open_log_file(path: &Path) -> Option<File> {
    fs::create_dir_all(path.parent()?).ok()?;
    OpenOptions::new().create(true).append(true).open(path).ok()
}

fn init_logging(cli: &Cli, log_file: Option<&Path>) {
    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .with_filter(
            EnvFilter::try_from_env("CRYPTOW_LOG")
                .unwrap_or_else(|_| EnvFilter::new(default_level)),
        );
    let file_layer = log_file.and_then(open_log_file).map(|file| {
        fmt::layer()
            .with_writer(Mutex::new(file))
            .with_ansi(false)
            .with_target(false)
            .with_filter(LevelFilter::INFO)
    });
    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .init();
}

fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    let layout = match StateLayout::from_env(cli.config_dir.clone(), cli.data_dir.clone()) {
        Ok(layout) => layout,
        Err(e) => {
            init_logging(&cli, None);
            return report(Failure::from(cryptow_core::CoreError::from(e)));
        }
    };
    let log_file = layout.log_file();
    init_logging(&cli, cli.command.mutates_state().then_some(log_file.as_path()));

    if matches!(cli.command, Commands::Run { dry_run: false, .. }) {
        install_signal_handler();
    }

    let tools = ToolConfig::from_env();
    if cli.command.needs_tools()
        && tools.backend != "mock"
        && std::env::var("CRYPTOW_SKIP_PREREQS").as_deref() != Ok("1")
    {
        let missing = check_prereqs(&tools);
        if !missing.is_empty() {
            return report(Failure::new(EXIT_FAILURE, summarize_missing(&missing)));
        }
    }

    let engine = match Engine::new(layout, &tools) {
        Ok(engine) => engine,
        Err(e) => return report(e.into()),
    };
    let json_output = cli.json;

    let result = match cli.command {
        Commands::List => commands::list::run(&engine, json_output),
        Commands::Init {
            profile,
            gen_pass,
            length,
        } => commands::init::run(&engine, &profile, gen_pass, usize::from(length), json_output),
        Commands::Mount {
            profile,
            dry_run,
            force,
        } => commands::mount::run(&engine, &profile, dry_run, force, json_output),
        Commands::Unmount {
            profile,
            dry_run,
            force,
        } => commands::unmount::run(&engine, &profile, dry_run, force, json_output),
        Commands::Run {
            dry_run,
            force,
            timeout,
            profile,
            args,
        } => commands::run::run(
            &engine,
            &profile,
            commands::run::Flags {
                dry_run,
                force,
                timeout,
                args,
            },
            json_output,
        ),
        Commands::Doctor => commands::doctor::run(&engine, &tools, json_output),
        Commands::Completions { shell } => commands::completions::run::<Cli>(shell),
        Commands::ManPages { dir } => commands::man_pages::run::<Cli>(&dir),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(failure) => report(failure),
    }
}

fn report(failure: Failure) -> ExitCode {
    eprintln!("error: {}", failure.message);
    ExitCode::from(failure.code)
}
