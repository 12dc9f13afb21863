use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::collections::HashSet;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use geotagger::catalog::{Catalog, EditMode, PhotoRecord, Row};
use geotagger::commit::{CommitOutcome, FailureAction, FailurePolicy};
use geotagger::config::Config;
use geotagger::exif::{ExifGeotagReader, ExifGeotagWriter};
use geotagger::favorites::Favorites;
use geotagger::geo::Coordinate;
use geotagger::session::{SaveSummary, Session};

#[derive(Parser, Debug)]
#[command(
    name = "geotagger",
    version,
    about = "Assign GPS coordinates and view destinations to photos and write them to EXIF"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Path to config file (default: config.json next to binary)
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the photos of a folder with their coordinates
    List {
        #[arg(value_name = "DIR")]
        dir: PathBuf,

        /// Only show photos that have no coordinates on disk
        #[arg(long)]
        missing_only: bool,

        /// Output results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Set the position (or destination) of some photos and save it
    Set {
        #[arg(value_name = "DIR")]
        dir: PathBuf,

        /// Comma-separated file names inside DIR
        #[arg(long, value_delimiter = ',', required = true)]
        files: Vec<String>,

        /// Coordinate to assign
        #[arg(
            long,
            value_name = "LAT,LON",
            allow_hyphen_values = true,
            conflicts_with = "favorite",
            required_unless_present = "favorite"
        )]
        at: Option<Coordinate>,

        /// Use the favorite bound to this hotkey
        #[arg(long, value_name = "KEY")]
        favorite: Option<char>,

        /// Set the point the photos are facing instead of where they were taken
        #[arg(long)]
        dest: bool,

        /// Preview changes without writing to files
        #[arg(long)]
        dry_run: bool,

        /// What to do when a file cannot be written
        #[arg(long, value_enum, default_value_t = OnError::Ask)]
        on_error: OnError,

        /// Output results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Manage favorite locations
    Favorites {
        #[command(subcommand)]
        action: FavoritesAction,
    },

    /// Write a default config.json and exit
    Init,
}

#[derive(Subcommand, Debug)]
enum FavoritesAction {
    /// Show all favorites
    List,
    /// Add a favorite
    Add {
        key: String,
        name: String,
        #[arg(value_name = "LAT,LON", allow_hyphen_values = true)]
        at: Coordinate,
    },
    /// Remove a favorite
    Remove { key: String, name: String },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum OnError {
    /// Prompt for retry, ignore or cancel
    Ask,
    Ignore,
    Cancel,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    match cli.command {
        Command::Init => {
            let path = cli.config.as_deref();
            Config::default().save(path)?;
            let save_path = match path {
                Some(p) => p.to_path_buf(),
                None => Config::config_path()?,
            };
            println!("Default config written to {}", save_path.display());
            Ok(())
        }
        Command::List {
            dir,
            missing_only,
            json,
        } => list(&dir, missing_only, json),
        Command::Set {
            dir,
            files,
            at,
            favorite,
            dest,
            dry_run,
            on_error,
            json,
        } => {
            let mut config = Config::load(cli.config.as_deref())?;
            // Override dry_run from CLI flag
            if dry_run {
                config.commit.dry_run = true;
            }
            let request = SetRequest {
                dir,
                files,
                at,
                favorite,
                mode: if dest {
                    EditMode::Destination
                } else {
                    EditMode::Primary
                },
                on_error,
            };
            let summary = set(config, request)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            }
            let failed = summary.report.count(CommitOutcome::Failed);
            if failed > 0 {
                anyhow::bail!("{failed} file(s) could not be saved");
            }
            Ok(())
        }
        Command::Favorites { action } => {
            let config = Config::load(cli.config.as_deref())?;
            favorites(&config, action)
        }
    }
}

fn open_favorites(config: &Config) -> Result<Favorites> {
    let store = config.favorites.store()?;
    log::debug!("Favorites file: {}", store.path().display());
    Favorites::open(Box::new(store))
}

fn list(dir: &Path, missing_only: bool, json: bool) -> Result<()> {
    let catalog = Catalog::scan(dir, &ExifGeotagReader)?;
    let rows = catalog.rows(missing_only);

    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    print_rows(&rows);
    log::info!(
        "{} photo(s), {}% with coordinates",
        catalog.len(),
        catalog.coordinate_progress()
    );
    Ok(())
}

struct SetRequest {
    dir: PathBuf,
    files: Vec<String>,
    at: Option<Coordinate>,
    favorite: Option<char>,
    mode: EditMode,
    on_error: OnError,
}

fn set(config: Config, request: SetRequest) -> Result<SaveSummary> {
    let backup_originals = config.commit.backup_originals;
    let dry_run = config.commit.dry_run;
    let favorites = open_favorites(&config)?;
    let mut session = Session::new(config, favorites);
    session.open_folder(&request.dir, &ExifGeotagReader)?;

    let target = match (request.at, request.favorite) {
        (Some(at), _) => at,
        (None, Some(key)) => session
            .jump_to_favorite(key)
            .with_context(|| format!("No favorite bound to key {key:?}"))?
            .coordinate,
        (None, None) => anyhow::bail!("Either --at or --favorite is required"),
    };

    let selected: HashSet<String> = request.files.iter().cloned().collect();
    for name in &selected {
        if session.catalog().get(name).is_none() {
            log::warn!("{name} is not an image in {}", request.dir.display());
        }
    }

    session.set_mode(request.mode);
    let updated = session.on_marker_moved(&selected, target.latitude, target.longitude);
    if updated == 0 {
        anyhow::bail!("None of the given files were found in {}", request.dir.display());
    }
    log::info!("{:?} coordinate {target} pending for {updated} file(s)", request.mode);
    if dry_run {
        log::info!("DRY RUN: no files will be modified");
    }

    let mut writer = ExifGeotagWriter::new(backup_originals);
    let summary = match request.on_error {
        OnError::Ask => session.save(&mut writer, &mut ask_on_failure),
        OnError::Ignore => session.save(&mut writer, &mut FailurePolicy(FailureAction::Ignore)),
        OnError::Cancel => session.save(&mut writer, &mut FailurePolicy(FailureAction::Cancel)),
    };

    if dry_run {
        print_preview(&summary);
    }
    for entry in &summary.report.entries {
        if let Some(ref err) = entry.error {
            log::error!("  {}: {err}", entry.file_path.display());
        }
    }
    log::info!("{}", summary.message);
    log::info!("{}% of photos have coordinates", summary.progress);
    Ok(summary)
}

fn favorites(config: &Config, action: FavoritesAction) -> Result<()> {
    let mut favorites = open_favorites(config)?;
    match action {
        FavoritesAction::List => {
            if favorites.is_empty() {
                println!("No favorites yet.");
            }
            for fav in favorites.sorted() {
                println!(
                    "  {BOLD}{}{RESET}  {:<24} {DIM}{}{RESET}",
                    fav.key,
                    fav.name,
                    fav.coordinate()
                );
            }
        }
        FavoritesAction::Add { key, name, at } => {
            favorites.add(&key, &name, at)?;
            log::info!("Added favorite {name:?} at {at}");
        }
        FavoritesAction::Remove { key, name } => {
            favorites.remove(&key, &name)?;
            log::info!("Removed favorite {name:?}");
        }
    }
    Ok(())
}

/// Interactive retry/ignore/cancel prompt. End of input cancels.
fn ask_on_failure(record: &PhotoRecord, error: &anyhow::Error) -> FailureAction {
    eprintln!("{RED}Failed to save EXIF to {}{RESET}: {error:#}", record.file_name);
    read_failure_action(&mut io::stdin().lock(), &mut io::stderr()).unwrap_or_else(|e| {
        log::warn!("Prompt failed, cancelling: {e}");
        FailureAction::Cancel
    })
}

fn read_failure_action(input: &mut impl BufRead, prompt: &mut impl Write) -> io::Result<FailureAction> {
    loop {
        write!(prompt, "[r]etry, [i]gnore, [c]ancel? ")?;
        prompt.flush()?;
        let mut line = String::new();
        if input.read_line(&mut line)? == 0 {
            return Ok(FailureAction::Cancel);
        }
        match line.trim().to_ascii_lowercase().as_str() {
            "r" | "retry" => return Ok(FailureAction::Retry),
            "i" | "ignore" => return Ok(FailureAction::Ignore),
            "c" | "cancel" => return Ok(FailureAction::Cancel),
            _ => continue,
        }
    }
}

// ANSI color codes
const GREEN: &str = "\x1b[32m";
const RED: &str = "\x1b[31m";
const DIM: &str = "\x1b[2m";
const RESET: &str = "\x1b[0m";
const BOLD: &str = "\x1b[1m";

/// Print the file table: name, capture date, modification date and the four
/// coordinate columns. Pending values are shown in green.
fn print_rows(rows: &[Row]) {
    println!();
    println!(
        "  {BOLD}{:<28} {:<20} {:<20} {:>12} {:>12} {:>12} {:>12}{RESET}",
        "File", "Taken", "Modified", "Latitude", "Longitude", "Dest lat", "Dest lon"
    );
    println!("  {DIM}{}{RESET}", "─".repeat(122));
    for row in rows {
        println!(
            "  {:<28} {:<20} {:<20} {} {} {} {}",
            row.file_name,
            row.date_time_original.as_deref().unwrap_or(""),
            row.modified,
            cell(&row.latitude),
            cell(&row.longitude),
            cell(&row.dest_latitude),
            cell(&row.dest_longitude),
        );
    }
    println!();
}

fn cell(value: &geotagger::catalog::Cell) -> String {
    match value {
        geotagger::catalog::Cell::Pending(v) => format!("{GREEN}{:>12.6}{RESET}", v),
        other => format!("{:>12}", other.to_string()),
    }
}

/// Print the tags a dry run would have written.
fn print_preview(summary: &SaveSummary) {
    println!();
    println!("  {BOLD}GPS tags (dry run):{RESET}");
    println!("  {DIM}{}{RESET}", "─".repeat(72));
    for entry in &summary.report.entries {
        let name = entry
            .file_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        match entry.outcome {
            CommitOutcome::Previewed => {
                println!("  {:<22} : {GREEN}{}{RESET}", name, entry.tags.tag_names().join(", "));
            }
            _ => println!("  {:<22} : {DIM}{:?}{RESET}", name, entry.outcome),
        }
    }
    println!("  {DIM}{}{RESET}", "─".repeat(72));
    println!();
}
