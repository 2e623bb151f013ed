//! Offline cache maintenance: nothing here talks to Discord.

use comfy_table::{Table, presets::UTF8_FULL};
use miette::Result;
use owo_colors::OwoColorize;
use scrollback_core::{LoadSource, ScrollbackConfig, SegmentStore, StreamKey};

use crate::output::Output;

pub fn segments(config: &ScrollbackConfig, key: StreamKey, output: &Output) -> Result<()> {
    let store = SegmentStore::load(&config.cache.dir, key);
    if store.segments().is_empty() {
        output.warning(&format!("Nothing cached for channel {}", store.key()));
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["#", "start", "end", "records"]);
    for (index, segment) in store.segments().iter().enumerate() {
        table.add_row(vec![
            index.to_string(),
            segment.start.to_rfc3339(),
            segment.end.to_rfc3339(),
            segment.len().to_string(),
        ]);
    }
    println!("{table}");

    output.info("Cache file:", &store.paths().canonical.display().to_string());
    output.info("Total records:", &store.record_count().to_string());
    Ok(())
}

/// Run load-time reconciliation and say what it found.
pub fn recover(config: &ScrollbackConfig, key: StreamKey, output: &Output) -> Result<()> {
    let (store, report) = SegmentStore::load_with_report(&config.cache.dir, key);

    let source = match report.source {
        LoadSource::Missing => "no cache file".to_string(),
        LoadSource::Canonical => "cache file is intact".green().to_string(),
        LoadSource::RestoredBackup => "restored from backup of an interrupted commit"
            .yellow()
            .to_string(),
        LoadSource::Corrupt => "cache file was corrupt, starting empty".red().to_string(),
    };
    output.status(&format!("Channel {}", store.key().bright_cyan()));
    output.info("State:", &source);
    if report.removed_stale_backup {
        output.list_item("removed a stale backup file");
    }
    if report.removed_temp {
        output.list_item("removed an unfinished temp file");
    }
    output.info("Segments:", &store.segments().len().to_string());
    output.info("Records:", &store.record_count().to_string());
    Ok(())
}

pub fn clear(config: &ScrollbackConfig, key: StreamKey, output: &Output) -> Result<()> {
    let mut store = SegmentStore::load(&config.cache.dir, key);
    let count = store.record_count();
    store.clear()?;
    output.success(&format!(
        "Cleared {count} cached records for channel {}",
        store.key()
    ));
    Ok(())
}
