//! Show song information.

use std::collections::BTreeMap;
use std::path::PathBuf;

use keyroll_common::config::AppConfig;

pub fn run(config: &AppConfig, song_path: PathBuf) -> anyhow::Result<()> {
    let song = super::load_song(&song_path)?;

    println!("Song: {}", song.name);
    println!("  Source: {}", song_path.display());
    println!("  Duration: {:.3}s", song.duration_secs());
    println!("  Notes: {}", song.notes.len());
    println!("  Sustain spans: {}", song.sustains.len());
    match song.key_span() {
        Some((low, high)) => println!("  Key range: {low}..={high}"),
        None => println!("  Key range: (no notes)"),
    }
    println!();

    let mut per_channel: BTreeMap<u8, usize> = BTreeMap::new();
    for note in &song.notes {
        *per_channel.entry(note.channel).or_default() += 1;
    }
    if !per_channel.is_empty() {
        println!("Channels:");
        for (channel, count) in &per_channel {
            println!("  {channel:>2}: {count} notes");
        }
        println!();
    }

    let export = &config.export;
    let rows = (song.duration_secs() * export.time_resolution).round();
    println!("Export at {} px/s:", export.time_resolution);
    println!("  Image: {}x{}", export.buffer_width, rows);

    let problems = song.validate();
    if !problems.is_empty() {
        println!();
        println!("Problems:");
        for problem in problems {
            println!("  - {problem}");
        }
    }

    Ok(())
}
