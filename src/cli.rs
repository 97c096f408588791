use std::io::{self, IsTerminal};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use clap::{Args, Parser, Subcommand};
use console::style;
use dialoguer::{Confirm, theme::ColorfulTheme};
use parking_lot::Mutex;
use tracing::{info, warn};
use walkdir::WalkDir;

use model_importer::import::{DuplicateDecision, DuplicateResolver};
use model_importer::{
    AppConfig, CancellationToken, DuplicateIndex, DuplicateMatch, DuplicatePolicy, FileManager, FileStatus,
    FingerprintAlgorithm, HashEngine, ImportFileInfo, ImportResult, InMemoryDuplicateIndex, Logger, ManagementMode,
    SessionOptions, init_config,
};

use crate::tui::{ByteProgressBar, ImportProgressBars};

#[derive(Parser, Debug)]
#[command(name = "model_importer", version, about = "Import model files into a managed library")]
pub(crate) struct Cli {
    /// Directory holding config.toml
    #[arg(long, global = true, default_value = "config")]
    config_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Import files, or every file under the given directories
    Import(ImportArgs),
    /// Print the fingerprint of each file
    Hash {
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// xxh64 or blake3, overriding the config
        #[arg(long)]
        algorithm: Option<String>,
    },
    /// Fingerprint a library and save it as a duplicate index snapshot
    Index {
        directory: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
    },
}

#[derive(Args, Debug)]
struct ImportArgs {
    #[arg(required = true)]
    paths: Vec<PathBuf>,

    /// organized or leave_in_place
    #[arg(long)]
    mode: Option<String>,

    /// Library root for organized imports
    #[arg(long)]
    root: Option<PathBuf>,

    /// skip, overwrite or prompt
    #[arg(long = "on-duplicate")]
    on_duplicate: Option<String>,

    /// Duplicate index snapshot to check against
    #[arg(long, conflicts_with = "index_dir")]
    index: Option<PathBuf>,

    /// Build the duplicate index by scanning this directory first
    #[arg(long)]
    index_dir: Option<PathBuf>,

    /// Undo everything without asking when any file fails
    #[arg(long)]
    rollback_on_failure: bool,

    /// Print the import result as JSON
    #[arg(long)]
    json: bool,
}

pub(crate) async fn run() -> Result<()> {
    let cli = Cli::parse();

    let config_manager = init_config(&cli.config_dir)
        .with_context(|| format!("Failed to load configuration from {}", cli.config_dir.display()))?;
    let config = config_manager.get_app_config();
    let logger = Logger::new(&config).context("Failed to initialize logging")?;

    match cli.command {
        Command::Import(args) => run_import(args, &config, &logger).await,
        Command::Hash { files, algorithm } => run_hash(files, algorithm, &config).await,
        Command::Index { directory, output } => run_index(directory, output, &config).await,
    }
}

/// Cancels `token` on the first Ctrl-C
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, canceling");
            token.request_cancel();
        }
    });
}

/// Files named directly are kept as given; directories are walked in name order
fn expand_paths(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            for entry in WalkDir::new(path).follow_links(false).sort_by_file_name() {
                let entry = entry.with_context(|| format!("Failed to walk {}", path.display()))?;
                if entry.file_type().is_file() {
                    files.push(entry.into_path());
                }
            }
        } else {
            files.push(path.clone());
        }
    }
    Ok(files)
}

async fn load_index(
    args: &ImportArgs,
    config: &AppConfig,
    cancel: &CancellationToken,
) -> Result<Arc<dyn DuplicateIndex>> {
    if let Some(path) = args.index.clone() {
        let index = tokio::task::spawn_blocking(move || InMemoryDuplicateIndex::load_json(&path))
            .await
            .context("Index loader stopped unexpectedly")??;
        return Ok(Arc::new(index));
    }

    if let Some(dir) = args.index_dir.clone() {
        println!("{} {}", style("Scanning library").cyan().bold(), dir.display());
        let engine = config.hash_engine();
        let cancel = cancel.clone();
        let index = tokio::task::spawn_blocking(move || InMemoryDuplicateIndex::scan_directory(&dir, &engine, &cancel))
            .await
            .context("Library scan stopped unexpectedly")??;
        return Ok(Arc::new(index));
    }

    Ok(Arc::new(InMemoryDuplicateIndex::new()))
}

async fn run_import(args: ImportArgs, config: &AppConfig, logger: &Logger) -> Result<()> {
    let mode = args
        .mode
        .as_deref()
        .map(ManagementMode::from_config_string)
        .unwrap_or_else(|| config.management_mode());
    let duplicate_policy = args
        .on_duplicate
        .as_deref()
        .map(DuplicatePolicy::from_config_string)
        .unwrap_or_else(|| config.duplicate_policy());
    let options = match mode {
        ManagementMode::Organized => {
            SessionOptions::organized(args.root.clone().unwrap_or_else(|| config.library_root()))
        }
        ManagementMode::LeaveInPlace => SessionOptions::leave_in_place(),
    }
    .with_duplicate_policy(duplicate_policy);

    let files = expand_paths(&args.paths)?;
    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    let index = load_index(&args, config, &cancel).await?;
    let bars = Arc::new(ImportProgressBars::new(files.len()));
    let resolver = Arc::new(PromptResolver::new(Arc::clone(&bars)));
    let manager = Arc::new(FileManager::new(config.file_manager_config()).with_resolver(resolver));

    let session = manager.start_session(files, options, index)?;
    info!(session_id = %session.id(), files = session.total_files(), "Starting import");

    let worker = {
        let manager = Arc::clone(&manager);
        let bars = Arc::clone(&bars);
        let cancel = cancel.clone();
        tokio::task::spawn_blocking(move || manager.run_session(session, &*bars, &cancel))
    };
    let result = worker.await.context("Import worker stopped unexpectedly")?;
    bars.finish();

    logger.log_import_result(&result);
    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_summary(&result);
    }

    if result.success() {
        return Ok(());
    }

    if !result.session().journal().is_empty() && should_roll_back(args.rollback_on_failure)? {
        let mut session = result.into_session();
        match manager.rollback_session(&mut session) {
            Ok(report) => println!(
                "{} removed {} files and {} directories",
                style("Rolled back:").yellow().bold(),
                report.files_removed,
                report.directories_removed
            ),
            Err(e) => {
                eprintln!("{} {}", style("Rollback incomplete:").red().bold(), e);
                for failure in &e.failures {
                    eprintln!("  {}", failure);
                }
            }
        }
    }

    bail!("Import did not complete successfully")
}

fn should_roll_back(rollback_on_failure: bool) -> Result<bool> {
    if rollback_on_failure {
        return Ok(true);
    }
    if !io::stdin().is_terminal() {
        return Ok(false);
    }
    Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt("The import did not finish cleanly. Undo the files it placed?")
        .default(false)
        .interact()
        .map_err(|e| anyhow!("Failed to read answer: {}", e))
}

fn print_summary(result: &ImportResult) {
    for file in result.session().files() {
        let path = file.original_path().display();
        match file.status() {
            FileStatus::Completed => {
                let destination = file.destination().map(Path::display);
                match destination {
                    Some(dest) => println!("{} {} -> {}", style("imported").green(), path, dest),
                    None => println!("{} {}", style("imported").green(), path),
                }
            }
            FileStatus::SkippedDuplicate => {
                let original = file.duplicate_of().map(|d| d.path().display().to_string()).unwrap_or_default();
                println!("{} {} (same as {})", style("skipped").yellow(), path, original);
            }
            _ => {
                let reason = file.error().map(ToString::to_string).unwrap_or_default();
                println!("{} {}: {}", style("failed").red(), path, reason);
            }
        }
    }

    let headline = if result.success() {
        style("Import complete").green().bold()
    } else {
        style("Import failed").red().bold()
    };
    println!(
        "{}: {} imported, {} skipped, {} failed ({} canceled) of {} in {:.1}s",
        headline,
        result.processed(),
        result.skipped(),
        result.failed(),
        result.canceled(),
        result.total(),
        result.duration().as_secs_f64()
    );
    if let Some(error) = result.error() {
        println!("{}", style(error).red());
    }
}

/// Asks on the terminal whether a duplicate should be imported anyway.
///
/// Non-interactive runs skip. An answer can be applied to every later
/// duplicate in the session.
struct PromptResolver {
    bars: Arc<ImportProgressBars>,
    remembered: Mutex<Option<DuplicateDecision>>,
}

impl PromptResolver {
    fn new(bars: Arc<ImportProgressBars>) -> Self {
        Self {
            bars,
            remembered: Mutex::new(None),
        }
    }

    fn ask(&self, file: &ImportFileInfo, duplicate: &DuplicateMatch) -> dialoguer::Result<(bool, bool)> {
        let theme = ColorfulTheme::default();
        let import = Confirm::with_theme(&theme)
            .with_prompt(format!(
                "{} has the same content as {}. Import it anyway?",
                file.original_path().display(),
                duplicate.path().display()
            ))
            .default(false)
            .interact()?;
        let remember = Confirm::with_theme(&theme)
            .with_prompt("Use this answer for the remaining duplicates?")
            .default(false)
            .interact()?;
        Ok((import, remember))
    }
}

impl DuplicateResolver for PromptResolver {
    fn resolve(&self, file: &ImportFileInfo, duplicate: &DuplicateMatch) -> DuplicateDecision {
        if let Some(decision) = *self.remembered.lock() {
            return decision;
        }
        if !io::stdin().is_terminal() {
            return DuplicateDecision::Skip;
        }

        match self.bars.suspend(|| self.ask(file, duplicate)) {
            Ok((import, remember)) => {
                let decision = if import {
                    DuplicateDecision::Import
                } else {
                    DuplicateDecision::Skip
                };
                if remember {
                    *self.remembered.lock() = Some(decision);
                }
                decision
            }
            Err(e) => {
                warn!(error = %e, "Duplicate prompt failed, skipping");
                DuplicateDecision::Skip
            }
        }
    }
}

async fn run_hash(files: Vec<PathBuf>, algorithm: Option<String>, config: &AppConfig) -> Result<()> {
    let mut engine = config.hash_engine();
    if let Some(name) = algorithm {
        engine = HashEngine::new(FingerprintAlgorithm::from_config_string(&name), engine.chunk_policy())
            .with_progress_step(engine.progress_step_percent());
    }

    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    let results = tokio::task::spawn_blocking(move || {
        files
            .iter()
            .map(|path| {
                let bar = ByteProgressBar::new(path.display().to_string());
                let result = engine.hash_file(path, &cancel, &bar);
                bar.finish();
                result
            })
            .collect::<Vec<_>>()
    })
    .await
    .context("Hash worker stopped unexpectedly")?;

    let mut failures = 0;
    for result in &results {
        match (&result.fingerprint, &result.failure) {
            (Some(fingerprint), _) => println!("{}  {}", fingerprint, result.source),
            (None, Some(failure)) => {
                failures += 1;
                eprintln!("{} {}: {}", style("Error").red().bold(), result.source, failure);
            }
            (None, None) => failures += 1,
        }
    }

    if failures > 0 {
        bail!("{} of {} files could not be hashed", failures, results.len());
    }
    Ok(())
}

async fn run_index(directory: PathBuf, output: PathBuf, config: &AppConfig) -> Result<()> {
    let engine = config.hash_engine();
    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    println!("{} {}", style("Scanning library").cyan().bold(), directory.display());
    let index = {
        let directory = directory.clone();
        tokio::task::spawn_blocking(move || InMemoryDuplicateIndex::scan_directory(&directory, &engine, &cancel))
            .await
            .context("Library scan stopped unexpectedly")??
    };

    index
        .save_json(&output)
        .with_context(|| format!("Failed to write {}", output.display()))?;
    println!(
        "{} {} records from {} to {}",
        style("Saved").green().bold(),
        index.len(),
        directory.display(),
        output.display()
    );
    Ok(())
}
