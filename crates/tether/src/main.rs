use std::env;
use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use log::{LevelFilter, debug};

use tether::config::{self, ClientConfig};

mod commands;

use commands::chat::ChatCommand;
use commands::config::ConfigCommand;

fn main() {
    if let Err(err) = try_main() {
        let _ = writeln!(io::stderr(), "{err:?}");
        std::process::exit(1);
    }
}

fn try_main() -> Result<()> {
    let cli = Cli::parse();

    let config = cli.common.load_config()?;
    init_logging(&cli.common, &config);
    debug!("effective config: {:?}", config);

    match cli.command {
        Command::Chat(cmd) => commands::chat::run(config, cmd),
        Command::Config { command } => commands::config::handle(&cli.common, &config, command),
    }
}

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Tether - chat with an agent and watch it work.",
    propagate_version = true
)]
struct Cli {
    #[command(flatten)]
    common: CommonOpts,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Args)]
pub struct CommonOpts {
    /// Override the config file path
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<String>,
    /// Override the server base URL
    #[arg(long, value_name = "URL", global = true, env = "TETHER_SERVER")]
    server: Option<String>,
    /// Reduce output to only errors
    #[arg(short, long, action = clap::ArgAction::SetTrue, global = true)]
    quiet: bool,
    /// Increase logging verbosity (stackable)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    /// Enable debug logging (equivalent to -vv)
    #[arg(long, global = true)]
    debug: bool,
    /// Enable trace logging (overrides other levels)
    #[arg(long, global = true)]
    trace: bool,
    /// Output machine readable JSON
    #[arg(long, global = true)]
    pub json: bool,
    /// Emit log lines as JSON
    #[arg(long = "json-logs", global = true)]
    json_logs: bool,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start an interactive chat session
    Chat(ChatCommand),
    /// Inspect configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

impl CommonOpts {
    pub fn config_path(&self) -> Result<Option<PathBuf>> {
        match self.config.as_deref() {
            Some(path) => Ok(Some(config::expand_path(path)?)),
            None => Ok(config::default_config_path()),
        }
    }

    fn load_config(&self) -> Result<ClientConfig> {
        let path = self.config_path()?;
        let mut config = ClientConfig::load(path.as_deref()).with_context(|| match &path {
            Some(path) => format!("loading config from {}", path.display()),
            None => "loading config".to_string(),
        })?;
        if let Some(server) = &self.server {
            config.server.base_url = server.trim_end_matches('/').to_string();
        }
        Ok(config)
    }

    fn effective_log_level(&self, config: &ClientConfig) -> LevelFilter {
        if self.trace {
            LevelFilter::Trace
        } else if self.debug {
            LevelFilter::Debug
        } else {
            match self.verbose {
                0 => config.logging.level.parse().unwrap_or(LevelFilter::Warn),
                1 => LevelFilter::Debug,
                _ => LevelFilter::Trace,
            }
        }
    }
}

fn init_logging(common: &CommonOpts, config: &ClientConfig) {
    use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

    if common.quiet {
        log::set_max_level(LevelFilter::Off);
        return;
    }

    let level = common
        .effective_log_level(config)
        .to_string()
        .to_lowercase();
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("tether={level},tether_protocol={level}")));

    // Logs go to stderr so they never interleave with the conversation on stdout.
    if common.json_logs || config.logging.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(io::stderr))
            .try_init()
            .ok();
    } else {
        let disable_color = env::var_os("NO_COLOR").is_some() || !io::stderr().is_terminal();
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(io::stderr)
                    .with_ansi(!disable_color),
            )
            .try_init()
            .ok();
    }

    // Also init env_logger for compatibility with log crate users
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"));
    builder.filter_level(common.effective_log_level(config));
    builder.try_init().ok();
}
