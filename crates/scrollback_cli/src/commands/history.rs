use std::time::{Duration, Instant};

use miette::{IntoDiagnostic, Result};
use scrollback_core::{FetchOptions, HistoryCache, Record, ScrollbackConfig, StreamKey, Timestamp};
use scrollback_discord::{DiscordConfig, DiscordHistory};

use crate::output::Output;

pub struct HistoryArgs {
    pub key: StreamKey,
    pub start: Option<Timestamp>,
    pub end: Option<Timestamp>,
    pub options: FetchOptions,
    pub limit: Option<usize>,
    pub json: bool,
}

/// Stream a channel's history through the cache and print it.
///
/// Ctrl-C stops the read early; whatever was fetched up to then is kept.
pub async fn run(config: &ScrollbackConfig, args: HistoryArgs, output: &Output) -> Result<()> {
    let discord = DiscordConfig::require_env()?;
    let source = DiscordHistory::from_config(&discord);
    let mut cache = HistoryCache::new(source, args.key.clone(), config.cache.clone());

    let mut reader = cache.get_history(args.start, args.end, args.options)?;
    let interval = Duration::from_secs_f64(config.log_interval_secs.max(0.0));
    let mut last_log = Instant::now();
    let mut printed = 0usize;

    loop {
        let next = tokio::select! {
            next = reader.next() => next?,
            _ = tokio::signal::ctrl_c() => {
                output.warning("Interrupted, saving what was read so far");
                break;
            }
        };
        let Some(record) = next else {
            break;
        };

        print_record(&record, args.json)?;
        printed += 1;

        if last_log.elapsed() >= interval {
            let stats = reader.stats();
            tracing::info!(
                key = %args.key,
                printed,
                cached = stats.replayed,
                fetched = stats.fetched,
                at = %record.timestamp,
                "reading history"
            );
            last_log = Instant::now();
        }

        if args.limit.is_some_and(|limit| printed >= limit) {
            break;
        }
    }

    let stats = reader.close()?;
    output.success(&format!("Read {printed} records from channel {}", args.key));
    output.info("From cache:", &stats.replayed.to_string());
    output.info("From Discord:", &stats.fetched.to_string());
    output.info("Requests (gaps):", &stats.fetches.to_string());
    Ok(())
}

fn print_record(record: &Record, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(record).into_diagnostic()?);
    } else {
        println!(
            "[{}] {}: {}",
            record.timestamp.format("%Y-%m-%d %H:%M:%S"),
            record.author,
            record.content
        );
    }
    Ok(())
}
