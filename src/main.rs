//! Command-line front end for the remora download engine.
//!
//! The engine takes explicit paths and a progress sink; this binary is the
//! collaborator that derives default paths from the torrent name, renders
//! the progress events as a terminal progress bar and reports the terminal
//! state.
//!
//! ## Usage
//!
//! ```bash
//! remora <torrent_file>
//! remora <torrent_file> -o <output_file>
//! ```
//!
//! Re-running the same command resumes an interrupted download from its
//! progress file.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use anyhow::{anyhow, Result};
use clap::Parser;
use crossbeam_channel::unbounded;
use indicatif::{ProgressBar, ProgressStyle};

use remora::{DownloadOutcome, TorrentFile, TorrentRegistry};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "A resumable BitTorrent download engine, written in Rust."
)]
struct Args {
    /// Path to the .torrent file
    torrent: String,

    /// Output filename (defaults to name from torrent)
    #[arg(short = 'o', long)]
    output: Option<String>,

    /// Progress file path (defaults to "<output>.progress.json")
    #[arg(long)]
    progress_file: Option<String>,
}

/// Sanitize a filename to prevent path traversal and basic issues.
fn sanitize_filename(filename: &str) -> String {
    let safe_name = filename.replace(['/', '\\'], "_");

    if safe_name.trim().is_empty() {
        "download".to_string()
    } else {
        safe_name
    }
}

fn run(args: Args) -> Result<()> {
    if !Path::new(&args.torrent).exists() {
        return Err(anyhow!("could not find torrent file: {}", args.torrent));
    }

    let torrent = TorrentFile::open(Path::new(&args.torrent))?;

    // The engine takes explicit paths; defaults are derived here
    let default_filename = sanitize_filename(&torrent.name);
    let output_path = PathBuf::from(args.output.unwrap_or(default_filename));
    let progress_path = args
        .progress_file
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(format!("{}.progress.json", output_path.display())));

    if progress_path.exists() {
        println!(
            "Resuming \"{}\" from \"{}\".",
            torrent.name,
            progress_path.display()
        );
    }

    println!(
        "Downloading \"{}\" ({} pieces).",
        torrent.name,
        torrent.piece_count()
    );

    let registry = Arc::new(TorrentRegistry::new());
    let (progress_tx, progress_rx) = unbounded();

    let engine = {
        let torrent = torrent.clone();
        let registry = Arc::clone(&registry);
        let output_path = output_path.clone();
        let progress_path = progress_path.clone();

        thread::spawn(move || {
            remora::start(&torrent, &output_path, &progress_path, &registry, progress_tx)
        })
    };

    let pb = ProgressBar::new(100);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}% {msg}")
            .unwrap()
            .progress_chars("#>-"),
    );

    // The event channel disconnects once the engine drops its sender
    for event in progress_rx.iter() {
        pb.set_position(event.progress.round() as u64);
        if event.paused {
            pb.set_message("paused");
        } else {
            pb.set_message(format!(
                "{:.1} KiB/s, {:.0}s left",
                event.speed, event.remaining_time
            ));
        }
    }

    let outcome = engine
        .join()
        .map_err(|_| anyhow!("download thread panicked"))??;

    match outcome {
        DownloadOutcome::Complete => {
            pb.finish_with_message("done");
            println!("Saved in \"{}\".", output_path.display());
        }
        DownloadOutcome::AlreadyComplete => {
            pb.finish_with_message("done");
            println!("\"{}\" is already fully downloaded.", output_path.display());
        }
        DownloadOutcome::Paused => {
            pb.finish_with_message("paused");
            println!("Download paused. Run the same command again to resume.");
        }
    }

    Ok(())
}

fn main() {
    // Initialize logger
    pretty_env_logger::init_timed();

    // Parse arguments
    let args = Args::parse();

    // Run program, eventually exit failure
    if let Err(error) = run(args) {
        eprintln!("Error: {}", error);
        std::process::exit(1);
    }

    std::process::exit(0);
}
