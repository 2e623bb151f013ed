mod commands;
mod output;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use miette::Result;
use scrollback_core::{FetchOptions, Timestamp, config};
use tracing::info;

use crate::commands::history::HistoryArgs;
use crate::output::Output;

#[derive(Parser)]
#[command(name = "scrollback")]
#[command(about = "Read Discord channel history through a local segment cache")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    /// Cache directory (overrides config)
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Print a channel's history, filling cache gaps from Discord
    History(HistoryCommand),
    /// List the cached segments of a channel
    Segments {
        /// Channel id or alias from [channels]
        channel: String,
    },
    /// Repair the cache files left by an interrupted commit
    Recover {
        /// Channel id or alias from [channels]
        channel: String,
    },
    /// Delete everything cached for a channel
    Clear {
        /// Channel id or alias from [channels]
        channel: String,
    },
}

#[derive(Args)]
struct HistoryCommand {
    /// Channel id or alias from [channels]
    channel: String,

    /// Oldest time to include (RFC 3339 or YYYY-MM-DD); defaults to the beginning
    #[arg(long, value_parser = commands::parse_time)]
    start: Option<Timestamp>,

    /// Time to stop at (RFC 3339 or YYYY-MM-DD); defaults to now
    #[arg(long, value_parser = commands::parse_time)]
    end: Option<Timestamp>,

    /// Record who reacted with what (one extra request per reaction)
    #[arg(long)]
    reactions: bool,

    /// Record mentions and reply targets
    #[arg(long)]
    mentions: bool,

    /// Stop after printing this many records
    #[arg(short = 'l', long)]
    limit: Option<usize>,

    /// Print records as JSON lines
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if it exists
    let _ = dotenvy::dotenv();
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .rgb_colors(miette::RgbColors::Preferred)
                .with_cause_chain()
                .color(true)
                .context_lines(5)
                .tab_width(2)
                .break_words(true)
                .build(),
        )
    }))?;
    miette::set_panic_hook();
    let cli = Cli::parse();

    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("scrollback")
        .join("logs");
    let _guard = init_tracing(&log_dir, cli.debug);

    let mut config = if let Some(config_path) = &cli.config {
        info!("Loading config from: {:?}", config_path);
        config::load_config(config_path).await?
    } else {
        config::load_config_from_standard_locations().await?
    };
    if let Some(cache_dir) = &cli.cache_dir {
        config.cache.dir = cache_dir.clone();
    }

    let output = Output::new();
    match cli.command {
        Commands::History(cmd) => {
            let args = HistoryArgs {
                key: commands::resolve_channel(&config, &cmd.channel)?,
                start: cmd.start,
                end: cmd.end,
                options: FetchOptions {
                    reactions: cmd.reactions,
                    mentions: cmd.mentions,
                },
                limit: cmd.limit,
                json: cmd.json,
            };
            commands::history::run(&config, args, &output).await?;
        }
        Commands::Segments { channel } => {
            let key = commands::resolve_channel(&config, &channel)?;
            commands::cache::segments(&config, key, &output)?;
        }
        Commands::Recover { channel } => {
            let key = commands::resolve_channel(&config, &channel)?;
            commands::cache::recover(&config, key, &output)?;
        }
        Commands::Clear { channel } => {
            let key = commands::resolve_channel(&config, &channel)?;
            commands::cache::clear(&config, key, &output)?;
        }
    }

    Ok(())
}

/// Terminal logging at the requested verbosity plus a daily debug log file.
///
/// The returned guard flushes the file writer when dropped.
fn init_tracing(
    log_dir: &std::path::Path,
    debug: bool,
) -> tracing_appender::non_blocking::WorkerGuard {
    use tracing_appender::rolling;
    use tracing_subscriber::{
        EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt,
    };

    std::fs::create_dir_all(log_dir).ok();
    let file_appender = rolling::daily(log_dir, "scrollback.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if debug {
            EnvFilter::new("scrollback=debug,scrollback_core=debug,scrollback_discord=debug,warn")
        } else {
            EnvFilter::new("scrollback=info,scrollback_core=info,scrollback_discord=info,warn")
        }
    });

    let terminal_layer = if debug {
        fmt::layer()
            .with_file(true)
            .with_line_number(true)
            .with_timer(fmt::time::LocalTime::rfc_3339())
            .with_writer(std::io::stderr)
            .pretty()
            .boxed()
    } else {
        fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
            .compact()
            .boxed()
    };

    let file_env_filter = EnvFilter::new(
        "scrollback=debug,scrollback_core=debug,scrollback_discord=debug,serenity=info,info",
    );
    let file_layer = fmt::layer()
        .with_file(true)
        .with_line_number(true)
        .with_thread_ids(true)
        .with_timer(fmt::time::LocalTime::rfc_3339())
        .with_ansi(false)
        .with_writer(non_blocking);

    tracing_subscriber::registry()
        .with(terminal_layer.with_filter(env_filter))
        .with(file_layer.with_filter(file_env_filter))
        .init();

    info!(
        "Logging initialized. Logs are being written to: {:?}",
        log_dir.join("scrollback.log")
    );
    guard
}
