use std::{
    path::{Path, PathBuf},
    process::ExitCode,
    time::Duration,
};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use shezem_rs::{
    CancelToken, FingerprintConfig, FingerprintStore, NewSong, Sample, SearchConfig,
    db::SqliteStore, index_folder, ingest, recognize, song_from_path,
};
use tracing::error;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "shezem-rs",
    about = "Index audio files and identify recordings by their fingerprints",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Catalog database file
    #[arg(long, global = true, value_name = "DB_PATH", default_value = DEFAULT_DB_PATH)]
    db: PathBuf,

    /// JSON file with fingerprinting parameters
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override the FFT window size (power of two)
    #[arg(long, global = true)]
    window_size: Option<usize>,

    /// Override the hop between windows
    #[arg(long, global = true)]
    hop_size: Option<usize>,

    /// Verbose output (-v, -vv, -vvv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Index every mp3/wav file in a folder ("Artist - Title.ext" names)
    Index {
        #[arg(value_name = "PATH")]
        path: PathBuf,
    },

    /// Index a single file with explicit metadata
    Add {
        #[arg(value_name = "AUDIO_FILE")]
        file: PathBuf,

        #[arg(long)]
        title: Option<String>,

        #[arg(long)]
        artist: Option<String>,

        #[arg(long)]
        album: Option<String>,

        /// External media id (e.g. a video id) to attach to the song
        #[arg(long)]
        media_id: Option<String>,
    },

    /// Identify a recording against the catalog
    Search {
        #[arg(value_name = "AUDIO_FILE")]
        query_file: PathBuf,

        #[arg(short, long, default_value = "5")]
        rank: usize,

        /// Give up after this many milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Print matches as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show catalog size
    Stats,
}

const DEFAULT_DB_PATH: &str = ".db/db.db3";

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err:#}");
            eprintln!("Error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: u8) {
    let filter = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(cli: &Cli) -> Result<FingerprintConfig> {
    let mut config = match &cli.config {
        Some(path) => FingerprintConfig::from_json_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => FingerprintConfig::default(),
    };
    if let Some(window_size) = cli.window_size {
        config.window_size = window_size;
        config.hop_size = window_size / 2;
    }
    if let Some(hop_size) = cli.hop_size {
        config.hop_size = hop_size;
    }
    config.validate()?;
    Ok(config)
}

fn open_store(path: &Path) -> Result<SqliteStore> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
        && !parent.exists()
    {
        std::fs::create_dir_all(parent)?;
    }
    Ok(SqliteStore::open(path)?)
}

fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli)?;
    let store = open_store(&cli.db)?;
    let cancel = CancelToken::new();

    match &cli.command {
        Commands::Index { path } => {
            if !path.is_dir() {
                bail!("{} is not a directory", path.display());
            }
            let summary = index_folder(&store, path, &config, &cancel)?;
            println!(
                "Indexed {} songs ({} already present, {} failed). Catalog size: {}",
                summary.added,
                summary.skipped,
                summary.failed,
                store.song_count()?
            );
        }

        Commands::Add {
            file,
            title,
            artist,
            album,
            media_id,
        } => {
            let guessed = song_from_path(file);
            let sample = Sample::read(file)?;
            let song = NewSong {
                title: title.clone().unwrap_or(guessed.title),
                artist: artist.clone().unwrap_or(guessed.artist),
                album: album.clone(),
                duration_secs: sample.duration_secs(),
                external_media_id: media_id.clone(),
            };
            let song_id = ingest(&store, &song, &sample, &config, &cancel)?;
            println!("Added '{}' by {} (id {song_id})", song.title, song.artist);
        }

        Commands::Search {
            query_file,
            rank,
            timeout_ms,
            json,
        } => {
            let sample = Sample::read(query_file)?;
            let search = SearchConfig {
                rank: *rank,
                timeout: timeout_ms.map(Duration::from_millis),
            };
            let recognition = recognize(&store, &sample, &config, &search, &cancel)?;

            if *json {
                println!("{}", serde_json::to_string_pretty(&recognition.matches)?);
                return Ok(());
            }
            if recognition.matches.is_empty() {
                println!("No match found");
            }
            for (index, data) in recognition.matches.iter().enumerate() {
                println!(
                    "{}. {} - {} (score: {})",
                    index + 1,
                    data.artist,
                    data.title,
                    data.score
                );
            }
            println!("Search took {:.2}s", recognition.elapsed.as_secs_f64());
        }

        Commands::Stats => {
            println!("{} songs, {} fingerprints", store.song_count()?, store.fingerprint_count()?);
        }
    }
    Ok(())
}
