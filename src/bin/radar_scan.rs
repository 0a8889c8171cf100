//! Offline proximity scan
//!
//! Loads a radar database and lists the points within the detection radius
//! of a given position, nearest first. No devices are touched.

use anyhow::Context;
use clap::Parser;
use radar_sentinel::domain::Position;
use radar_sentinel::io::RadarDbFile;
use radar_sentinel::services::{PointStore, ProximityScanner};

#[derive(Parser, Debug)]
#[command(name = "radar-scan", about = "List radar sites near a position")]
struct Args {
    /// Radar database file
    #[arg(long, default_value = "radars.csv")]
    db: String,

    #[arg(long, allow_hyphen_values = true)]
    lat: f64,

    #[arg(long, allow_hyphen_values = true)]
    lon: f64,

    /// Detection radius in meters
    #[arg(long, default_value = "300")]
    radius: f64,

    /// Print one JSON alert payload per line
    #[arg(long)]
    json: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let (store, report) =
        PointStore::load(&RadarDbFile::new(&args.db)).with_context(|| format!("loading {}", args.db))?;
    eprintln!("{}: {} points, {} rows skipped", args.db, report.accepted, report.skipped);

    let position = Position::new(args.lat, args.lon);
    let candidates = ProximityScanner::new(args.radius).scan(&store, position);

    if candidates.is_empty() {
        eprintln!("no radar within {} m of {}", args.radius, position);
        return Ok(());
    }

    for candidate in &candidates {
        if args.json {
            println!("{}", serde_json::to_string(&candidate.to_payload())?);
        } else {
            let point = candidate.point;
            println!(
                "{:<12} {:>8.1} m  limit {:>3} km/h  ({:.5}, {:.5})",
                point.id.as_str(), candidate.distance_m, point.limit, point.lat, point.lon
            );
        }
    }

    Ok(())
}
