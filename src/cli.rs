use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};

use crate::archive::BackupStore;
use crate::auto_backup::{self, BackupScheduler, RetentionPolicy, SchedulerState};
use crate::config::{AppPaths, AppSettings};
use crate::database::{
    BackupCatalog, BackupQuery, BackupSort, BranchFilter, Playthrough, PlaythroughSave, SortColumn, SortDirection,
};
use crate::playthrough_index::PlaythroughIndex;

#[derive(Debug, Parser)]
#[command(name = "save-warden")]
#[command(about = "Automatic save game backups", long_about = None)]
pub struct Cli {
    /// Settings file to use instead of the default location
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Watch the save directory and back up new saves until Ctrl-C
    Run {
        /// Playthrough that new backups belong to
        #[arg(long)]
        playthrough: String,
        /// Branch within the playthrough
        #[arg(long)]
        branch: Option<String>,
    },
    /// Manage playthroughs
    #[command(subcommand)]
    Playthrough(PlaythroughCommand),
    /// List the backups of a playthrough
    Backups(BackupsArgs),
    /// Set flag, notes and branch of a backup
    Annotate {
        hash: String,
        #[arg(long)]
        flag: bool,
        #[arg(long, default_value = "")]
        notes: String,
        #[arg(long, default_value = "")]
        branch: String,
    },
    /// Move backups to another playthrough
    Move {
        /// Target playthrough name
        #[arg(long)]
        to: String,
        #[arg(required = true)]
        hashes: Vec<String>,
    },
    /// Mark old backups for deletion and/or delete marked backups.
    /// Without flags the startup prune settings decide.
    Prune {
        #[arg(long)]
        mark: bool,
        #[arg(long)]
        sweep: bool,
    },
    /// Catalogue archived files that are missing from the database
    Import,
    /// Copy a backup over a save slot
    Restore {
        backup_filename: String,
        /// Slot name, e.g. `save_001`
        slot: String,
    },
    /// Show which saves in the save directory are already backed up
    Inventory,
}

#[derive(Debug, Subcommand)]
pub enum PlaythroughCommand {
    List,
    Create {
        name: String,
        #[arg(long, default_value = "")]
        notes: String,
    },
    Delete {
        name: String,
    },
}

#[derive(Debug, Args)]
pub struct BackupsArgs {
    pub playthrough: String,
    /// Include backups marked for deletion
    #[arg(long)]
    pub all: bool,
    #[arg(long)]
    pub branch: Option<String>,
    /// Column to sort by, e.g. save-time, money, playtime
    #[arg(long)]
    pub sort: Option<String>,
    #[arg(long)]
    pub desc: bool,
}

pub async fn dispatch(cli: Cli) -> anyhow::Result<()> {
    let settings_path = cli.config.clone().unwrap_or_else(AppPaths::settings_file);
    let settings = AppSettings::load_or_default(&settings_path)
        .with_context(|| format!("Failed to load settings from {}", settings_path.display()))?;
    let store = BackupStore::new(&settings.app.save_path, &settings.app.backup_path);

    match cli.command {
        Commands::Run { playthrough, branch } => run_scheduler(&settings, &playthrough, branch.as_deref()).await,
        Commands::Playthrough(command) => {
            let mut catalog = open_catalog(&settings)?;
            playthrough_command(command, &mut catalog, &store)
        }
        Commands::Backups(args) => {
            let catalog = open_catalog(&settings)?;
            list_backups(&args, &catalog)
        }
        Commands::Annotate { hash, flag, notes, branch } => {
            let mut catalog = open_catalog(&settings)?;
            catalog.update_backup_options(flag, &notes, &branch, &hash)?;
            println!("Updated {}", hash);
            Ok(())
        }
        Commands::Move { to, hashes } => {
            let mut catalog = open_catalog(&settings)?;
            let target = find_playthrough(&catalog, &to)?;
            let report = PlaythroughIndex::new(&mut catalog, &store).move_backups(&hashes, target.id)?;
            for filename in &report.moved {
                println!("moved   {}", filename);
            }
            for failure in &report.failed {
                println!("failed  {} ({})", failure.file_hash, failure.reason);
            }
            Ok(())
        }
        Commands::Prune { mark, sweep } => {
            let mut catalog = open_catalog(&settings)?;
            if !mark && !sweep {
                let report = auto_backup::startup_prune(&settings, &mut catalog, &store)?;
                println!("{}", serde_json::to_string_pretty(&report)?);
                return Ok(());
            }
            let policy = RetentionPolicy::new(settings.retention_config());
            if mark {
                let report = policy.mark(&mut catalog)?;
                println!("Marked {} of {} old backups", report.marked, report.candidates);
            }
            if sweep {
                let report = policy.sweep(&mut catalog, &store)?;
                println!(
                    "Deleted {} backups, kept {} (save type not enabled), {} failed",
                    report.deleted, report.skipped, report.failed
                );
            }
            Ok(())
        }
        Commands::Import => {
            let mut catalog = open_catalog(&settings)?;
            let report = auto_backup::import_archive(&store, &mut catalog)?;
            println!(
                "Imported {} ({} to recycle bin), {} already catalogued, {} failed",
                report.imported, report.recycled, report.already_catalogued, report.failed
            );
            Ok(())
        }
        Commands::Restore { backup_filename, slot } => {
            let target = store
                .restore(&backup_filename, &slot)
                .with_context(|| format!("Failed to restore {}", backup_filename))?;
            println!("Restored to {}", target.display());
            Ok(())
        }
        Commands::Inventory => {
            let catalog = open_catalog(&settings)?;
            for entry in auto_backup::inventory_saves(&store, &catalog)? {
                let status = match &entry.backup {
                    Some(backup) => backup.backup_filename.as_str(),
                    None => "not backed up",
                };
                println!("{:<28} {}  {}", entry.file_name, &entry.hash[..12], status);
            }
            Ok(())
        }
    }
}

fn open_catalog(settings: &AppSettings) -> anyhow::Result<BackupCatalog> {
    BackupCatalog::open(&settings.app.db_path)
        .with_context(|| format!("Failed to open catalog at {}", settings.app.db_path.display()))
}

fn find_playthrough(catalog: &BackupCatalog, name: &str) -> anyhow::Result<Playthrough> {
    match catalog.get_playthrough_by_name(name)? {
        Some(playthrough) => Ok(playthrough),
        None => bail!("No playthrough named '{}'", name),
    }
}

fn playthrough_command(
    command: PlaythroughCommand,
    catalog: &mut BackupCatalog,
    store: &BackupStore,
) -> anyhow::Result<()> {
    match command {
        PlaythroughCommand::List => {
            for playthrough in catalog.get_playthroughs()? {
                println!("{:>4}  {}  {}", playthrough.id, playthrough.name, playthrough.notes);
            }
        }
        PlaythroughCommand::Create { name, notes } => match catalog.save_playthrough(&name, &notes, None, false)? {
            PlaythroughSave::Created(id) => println!("Created playthrough {} ({})", name, id),
            PlaythroughSave::Updated(id) => println!("Updated playthrough {} ({})", name, id),
            PlaythroughSave::NameTaken => bail!("A playthrough named '{}' already exists", name),
        },
        PlaythroughCommand::Delete { name } => {
            let playthrough = find_playthrough(catalog, &name)?;
            let report = PlaythroughIndex::new(catalog, store).delete_playthrough(playthrough.id)?;
            println!(
                "Deleted {}; {} backups moved to the recycle bin, {} could not be renamed",
                name,
                report.moved.len(),
                report.failed.len()
            );
        }
    }
    Ok(())
}

fn list_backups(args: &BackupsArgs, catalog: &BackupCatalog) -> anyhow::Result<()> {
    let playthrough = find_playthrough(catalog, &args.playthrough)?;
    let column = match &args.sort {
        Some(name) => SortColumn::parse(name).with_context(|| format!("Unknown sort column '{}'", name))?,
        None => SortColumn::SaveTime,
    };
    let query = BackupQuery {
        include_deleted: args.all,
        branch: args.branch.clone().map_or(BranchFilter::All, BranchFilter::Named),
        sort: BackupSort {
            column,
            direction: if args.desc { SortDirection::Desc } else { SortDirection::Asc },
        },
    };

    for backup in catalog.get_backups(playthrough.id, &query)? {
        println!(
            "{}  {:<26} {:<28} {:>8.1}h {:>14.0} {}{}{}",
            backup.save_time_local().format("%Y-%m-%d %H:%M:%S"),
            backup.backup_filename,
            backup.x4_filename,
            backup.playtime_hours(),
            backup.money,
            backup.branch,
            if backup.flag { " [flag]" } else { "" },
            if backup.delete { " [delete]" } else { "" },
        );
    }
    Ok(())
}

async fn run_scheduler(settings: &AppSettings, playthrough: &str, branch: Option<&str>) -> anyhow::Result<()> {
    let playthrough = {
        let catalog = open_catalog(settings)?;
        find_playthrough(&catalog, playthrough)?
    };

    let scheduler = BackupScheduler::new(settings.scheduler_settings(), playthrough.id, branch)?;
    let mut handle = scheduler.spawn();
    let cancel = handle.cancellation_token();
    println!("Backing up saves for '{}' (Ctrl-C to stop)", playthrough.name);

    let mut last_state = SchedulerState::Idle;
    let mut printed = 0;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c(), if !cancel.is_cancelled() => {
                println!("Stopping after the current save...");
                cancel.cancel();
            }
            snapshot = handle.next_progress() => {
                let Some(snapshot) = snapshot else { break };
                if snapshot.state != last_state {
                    println!("[loop {}] {:?}", snapshot.loops, snapshot.state);
                    last_state = snapshot.state;
                }
                let finished: Vec<_> = snapshot.saves.iter().filter(|s| s.backup_timespan.is_some()).collect();
                for save in finished.iter().skip(printed) {
                    println!(
                        "  {} -> {} ({:.2}s)",
                        save.x4save,
                        save.backup_filename,
                        save.backup_timespan.unwrap_or_default()
                    );
                }
                printed = finished.len();
            }
        }
    }

    let summary = handle.join().await?;
    println!("Session finished: {} loops, {} saves backed up", summary.loops, summary.saves.len());
    Ok(())
}
