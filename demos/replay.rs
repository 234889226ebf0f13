//! Replays a tracker dump through the counter.
//!
//! Each input line is `<timestamp_ms>:<json array of tracks>`, e.g.
//! `1040:[{"id":3,"x":412.0,"y":230.5,"p":0.81}]`.
//!
//! Usage: replay <dump> <frame_width> <frame_height> [horizontal|vertical] [position] [config.json]

use std::io::BufRead;

use anyhow::{bail, Context};
use linecount::{CounterConfig, Granularity, LineCounter, Track, VirtualLine};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_target(false).init();

    let mut args = std::env::args().skip(1);
    let in_file_name = args.next().context("expected tracks file name")?;
    let width: u32 = args.next().context("expected frame width")?.parse()?;
    let height: u32 = args.next().context("expected frame height")?.parse()?;
    let orientation = args.next().unwrap_or_else(|| "horizontal".into());
    let position: f32 = match args.next() {
        Some(p) => p.parse()?,
        None => 0.5,
    };

    let config = match args.next() {
        Some(path) => CounterConfig::load(&path)?,
        None => CounterConfig::default(),
    };

    let line = match orientation.as_str() {
        "horizontal" => VirtualLine::horizontal((width, height), position)?,
        "vertical" => VirtualLine::vertical((width, height), position)?,
        other => bail!("unknown line orientation `{}`", other),
    };

    let mut counter = LineCounter::with_config(config)?;
    counter.set_line(line);

    let file = std::fs::File::open(&in_file_name)
        .with_context(|| format!("failed to open {}", in_file_name))?;

    let mut last_ts = 0.0;

    for line in std::io::BufReader::new(file).lines() {
        let line = line?;

        let Some((ts, tracks)) = line.split_once(':') else {
            eprintln!("wrong file format: expected `:`");
            continue;
        };

        let parsed = (ts.parse::<u64>(), serde_json::from_str::<Vec<Track>>(tracks));
        let (ts, tracks): (f64, Vec<Track>) = match parsed {
            (Ok(ts), Ok(tracks)) => (ts as f64 / 1000.0, tracks),
            (Ok(_), Err(err)) => {
                eprintln!("wrong file format: parse json failed: {}", err);
                continue;
            }
            (Err(_), _) => {
                eprintln!("wrong file format: parse timestamp failed");
                continue;
            }
        };

        for ev in counter.process_frame(&[], &tracks, ts)?.events {
            println!(
                "{:>10.3} #{:<5} {}",
                ev.timestamp,
                ev.track_id,
                ev.direction.as_str()
            );
        }

        last_ts = ts;
    }

    counter.finish(last_ts);

    for p in counter.get_rate_series(Granularity::Minute) {
        println!(
            "{:>8.0}s A->B {:>4} B->A {:>4}{}",
            p.window_start,
            p.a_to_b,
            p.b_to_a,
            if p.partial { " (partial)" } else { "" }
        );
    }

    println!("{}", serde_json::to_string_pretty(&counter.summary(last_ts))?);
    println!("{}", serde_json::to_string_pretty(&counter.diagnostics())?);

    Ok(())
}
