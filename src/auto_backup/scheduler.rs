use std::time::Instant;

use chrono::{Local, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::archive::{BackupStore, ContentHasher, SaveCandidate, SaveDocumentExtractor};
use crate::auto_backup::{
    BackupAnnotation, BackupError, BackupResult, ProcessedSave, ProgressSnapshot, SchedulerSettings, SchedulerState,
};
use crate::database::{BackupCatalog, BackupInsert, NewBackup, DEFAULT_BRANCH};
use crate::logger;

/// Outcome of one poll over the save directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleReport {
    pub archived: usize,
    /// Candidates whose fingerprint was already catalogued.
    pub duplicates: usize,
    /// Candidates that failed and were left for the next cycle.
    pub skipped: usize,
    /// The cycle stopped early because cancellation was requested.
    pub cancelled: bool,
}

/// What a finished session leaves behind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: Uuid,
    pub loops: u64,
    pub saves: Vec<ProcessedSave>,
}

/// Keeps the current progress snapshot and publishes it on every change.
struct ProgressReporter {
    snapshot: ProgressSnapshot,
    sender: Option<UnboundedSender<ProgressSnapshot>>,
}

impl ProgressReporter {
    fn new(session_id: Uuid) -> Self {
        Self {
            snapshot: ProgressSnapshot {
                session_id,
                state: SchedulerState::Idle,
                countdown: 0,
                loops: 0,
                saves: Vec::new(),
                processing: false,
            },
            sender: None,
        }
    }

    fn publish(&self) {
        if let Some(sender) = &self.sender {
            // a consumer that went away must not stop the loop
            let _ = sender.send(self.snapshot.clone());
        }
    }

    fn set_state(&mut self, state: SchedulerState) {
        self.snapshot.state = state;
        self.publish();
    }

    fn set_countdown(&mut self, countdown: u64) {
        self.snapshot.countdown = countdown;
        self.publish();
    }

    fn start_save(&mut self, x4save: &str, backup_filename: &str, hash: &str) {
        self.snapshot.state = SchedulerState::Archiving;
        self.snapshot.processing = true;
        self.snapshot.saves.push(ProcessedSave {
            x4save: x4save.to_string(),
            backup_filename: backup_filename.to_string(),
            hash: hash.to_string(),
            backup_timespan: None,
        });
        self.publish();
    }

    /// Close the entry opened by `start_save`. Without a hash the entry was
    /// abandoned and is removed from the session list.
    fn finish_save(&mut self, hash: Option<&str>, seconds: f64) {
        match hash {
            Some(hash) => {
                if let Some(save) = self.snapshot.saves.last_mut() {
                    save.hash = hash.to_string();
                    save.backup_timespan = Some(seconds);
                }
            }
            None => {
                self.snapshot.saves.pop();
            }
        }
        self.snapshot.processing = false;
        self.snapshot.state = SchedulerState::Polling;
        self.publish();
    }
}

enum CandidateOutcome {
    Archived,
    Duplicate,
}

/// Polls the save directory and archives every save it has not seen.
///
/// New backups are attributed to one playthrough and branch, fixed when the
/// scheduler is built. Use [`BackupScheduler::spawn`] to run the loop in the
/// background or [`BackupScheduler::run_once`] for a single synchronous cycle.
pub struct BackupScheduler {
    settings: SchedulerSettings,
    playthrough_id: i64,
    branch: String,
    reporter: ProgressReporter,
}

impl BackupScheduler {
    pub fn new(settings: SchedulerSettings, playthrough_id: i64, branch: Option<&str>) -> BackupResult<Self> {
        if settings.tick.is_zero() {
            return Err(BackupError::Configuration("scheduler tick must be greater than zero".to_string()));
        }
        if settings.save_path.as_os_str().is_empty() {
            return Err(BackupError::Configuration("save directory is not configured".to_string()));
        }

        let catalog = BackupCatalog::open(&settings.db_path)?;
        let playthrough = catalog
            .get_playthrough_by_id(playthrough_id)?
            .ok_or_else(|| BackupError::Configuration(format!("playthrough {} does not exist", playthrough_id)))?;
        if playthrough.is_recycle_bin() {
            return Err(BackupError::Invariant("new backups cannot be added to the recycle bin".to_string()));
        }

        let branch = branch
            .map(str::trim)
            .filter(|b| !b.is_empty())
            .unwrap_or(DEFAULT_BRANCH)
            .to_string();

        Ok(Self {
            settings,
            playthrough_id,
            branch,
            reporter: ProgressReporter::new(Uuid::new_v4()),
        })
    }

    pub fn session_id(&self) -> Uuid {
        self.reporter.snapshot.session_id
    }

    pub fn snapshot(&self) -> &ProgressSnapshot {
        &self.reporter.snapshot
    }

    /// Prepare the temp directory and run one poll cycle on the current thread.
    pub fn run_once(&mut self) -> BackupResult<CycleReport> {
        self.settings.store().prepare()?;
        let report = poll_cycle(
            &self.settings,
            self.playthrough_id,
            &self.branch,
            &mut self.reporter,
            &CancellationToken::new(),
        )?;
        self.reporter.snapshot.loops += 1;
        self.reporter.snapshot.state = SchedulerState::Idle;
        Ok(report)
    }

    /// Start the polling loop on the tokio runtime.
    pub fn spawn(mut self) -> SchedulerHandle {
        let cancel = CancellationToken::new();
        let (progress_tx, progress_rx) = unbounded_channel();
        let (annotation_tx, annotation_rx) = unbounded_channel();
        self.reporter.sender = Some(progress_tx);

        let join = tokio::spawn(self.run(cancel.clone(), annotation_rx));
        SchedulerHandle {
            cancel,
            progress: progress_rx,
            annotations: annotation_tx,
            join,
        }
    }

    async fn run(
        mut self,
        cancel: CancellationToken,
        mut annotations: UnboundedReceiver<BackupAnnotation>,
    ) -> BackupResult<SessionSummary> {
        logger::info(
            "SCHEDULER",
            "Backup session started",
            Some(&format!("session {} playthrough {} branch {}", self.session_id(), self.playthrough_id, self.branch)),
        );

        let store = self.settings.store();
        tokio::task::spawn_blocking(move || store.prepare()).await??;

        'session: loop {
            self.reporter.set_state(SchedulerState::Waiting);
            let mut countdown = self.settings.poll_interval_seconds;
            while countdown > 0 {
                self.reporter.set_countdown(countdown);
                tokio::select! {
                    _ = cancel.cancelled() => break 'session,
                    _ = tokio::time::sleep(self.settings.tick) => {}
                }
                self.apply_annotations(&mut annotations).await;
                countdown -= 1;
            }
            self.reporter.set_countdown(0);
            if cancel.is_cancelled() {
                break;
            }

            self.reporter.set_state(SchedulerState::Polling);
            let settings = self.settings.clone();
            let branch = self.branch.clone();
            let playthrough_id = self.playthrough_id;
            let cycle_cancel = cancel.clone();
            let session_id = self.session_id();
            let mut reporter = std::mem::replace(&mut self.reporter, ProgressReporter::new(session_id));

            let (reporter, result) = tokio::task::spawn_blocking(move || {
                let result = poll_cycle(&settings, playthrough_id, &branch, &mut reporter, &cycle_cancel);
                (reporter, result)
            })
            .await?;
            self.reporter = reporter;
            self.reporter.snapshot.loops += 1;

            match result {
                Ok(report) => logger::info(
                    "SCHEDULER",
                    &format!("Cycle {} finished", self.reporter.snapshot.loops),
                    Some(&format!(
                        "archived {} duplicates {} skipped {}",
                        report.archived, report.duplicates, report.skipped
                    )),
                ),
                // the loop outlives a failed cycle; the next one retries
                Err(e) => logger::error("SCHEDULER", "Cycle aborted", Some(&e.to_string())),
            }

            self.apply_annotations(&mut annotations).await;
            if cancel.is_cancelled() {
                break;
            }
        }

        self.apply_annotations(&mut annotations).await;
        self.reporter.snapshot.processing = false;
        self.reporter.set_state(SchedulerState::Idle);
        logger::info(
            "SCHEDULER",
            "Backup session stopped",
            Some(&format!("{} loops, {} saves", self.reporter.snapshot.loops, self.reporter.snapshot.saves.len())),
        );

        Ok(SessionSummary {
            session_id: self.session_id(),
            loops: self.reporter.snapshot.loops,
            saves: self.reporter.snapshot.saves.clone(),
        })
    }

    /// Persist every annotation waiting in the queue, each on its own connection.
    async fn apply_annotations(&self, annotations: &mut UnboundedReceiver<BackupAnnotation>) {
        let mut pending = Vec::new();
        while let Ok(annotation) = annotations.try_recv() {
            pending.push(annotation);
        }
        if pending.is_empty() {
            return;
        }

        let db_path = self.settings.db_path.clone();
        let result = tokio::task::spawn_blocking(move || -> BackupResult<()> {
            let mut catalog = BackupCatalog::open(&db_path)?;
            for annotation in pending {
                if let Err(e) =
                    catalog.update_backup_options(annotation.flag, &annotation.notes, &annotation.branch, &annotation.hash)
                {
                    logger::warn("SCHEDULER", "Annotation rejected", Some(&format!("{}: {}", annotation.hash, e)));
                }
            }
            Ok(())
        })
        .await;

        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => logger::error("SCHEDULER", "Failed to save annotations", Some(&e.to_string())),
            Err(e) => logger::error("SCHEDULER", "Annotation task failed", Some(&e.to_string())),
        }
    }
}

/// Foreground side of a running scheduler.
pub struct SchedulerHandle {
    cancel: CancellationToken,
    progress: UnboundedReceiver<ProgressSnapshot>,
    annotations: UnboundedSender<BackupAnnotation>,
    join: JoinHandle<BackupResult<SessionSummary>>,
}

impl SchedulerHandle {
    /// Ask the loop to stop at its next checkpoint. An archive step in
    /// progress is finished first.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Next progress snapshot, `None` once the loop has stopped and the
    /// queue is drained.
    pub async fn next_progress(&mut self) -> Option<ProgressSnapshot> {
        self.progress.recv().await
    }

    /// Snapshots already queued, without waiting.
    pub fn drain_progress(&mut self) -> Vec<ProgressSnapshot> {
        let mut drained = Vec::new();
        while let Ok(snapshot) = self.progress.try_recv() {
            drained.push(snapshot);
        }
        drained
    }

    pub fn annotate(&self, annotation: BackupAnnotation) -> BackupResult<()> {
        self.annotations
            .send(annotation)
            .map_err(|_| BackupError::Join("scheduler has stopped".to_string()))
    }

    /// Wait for the loop to finish.
    pub async fn join(self) -> BackupResult<SessionSummary> {
        self.join.await?
    }
}

/// One pass over the save directory. Runs on a blocking thread with its own
/// catalog connection.
fn poll_cycle(
    settings: &SchedulerSettings,
    playthrough_id: i64,
    branch: &str,
    reporter: &mut ProgressReporter,
    cancel: &CancellationToken,
) -> BackupResult<CycleReport> {
    let mut catalog = BackupCatalog::open(&settings.db_path)?;
    let store = settings.store();
    let extractor = SaveDocumentExtractor::new(store.temp_dir());
    let candidates = store.list_candidates()?;

    let mut report = CycleReport::default();
    for candidate in candidates {
        if cancel.is_cancelled() {
            report.cancelled = true;
            logger::info("SCHEDULER", "Cancellation requested, stopping cycle", None);
            break;
        }

        let result = archive_candidate(
            &candidate,
            playthrough_id,
            branch,
            &mut catalog,
            &extractor,
            settings,
            reporter,
        );
        match result {
            Ok(CandidateOutcome::Archived) => report.archived += 1,
            Ok(CandidateOutcome::Duplicate) => report.duplicates += 1,
            Err(e) => {
                report.skipped += 1;
                if e.is_per_file() {
                    logger::warn("SCHEDULER", "Skipping save", Some(&format!("{}: {}", candidate.file_name, e)));
                } else {
                    logger::error("SCHEDULER", "Failed to archive save", Some(&format!("{}: {}", candidate.file_name, e)));
                }
            }
        }
    }
    Ok(report)
}

/// Hash, copy, extract and record a single save. Once the copy starts the
/// step runs to completion; cancellation is only checked between saves.
fn archive_candidate(
    candidate: &SaveCandidate,
    playthrough_id: i64,
    branch: &str,
    catalog: &mut BackupCatalog,
    extractor: &SaveDocumentExtractor,
    settings: &SchedulerSettings,
    reporter: &mut ProgressReporter,
) -> BackupResult<CandidateOutcome> {
    let hash = ContentHasher::digest_file(&candidate.path)?;
    if catalog.backup_exists(&hash)? {
        return Ok(CandidateOutcome::Duplicate);
    }

    let store = settings.store();
    let started = Instant::now();
    let backup_filename = store.archive_filename(playthrough_id, Local::now());
    reporter.start_save(&candidate.file_name, &backup_filename, &hash);

    let result = copy_and_record(
        candidate,
        &hash,
        &backup_filename,
        playthrough_id,
        branch,
        catalog,
        extractor,
        started,
        &store,
    );

    let seconds = started.elapsed().as_secs_f64();
    match result {
        Ok((CandidateOutcome::Archived, archived_hash)) => {
            reporter.finish_save(Some(&archived_hash), seconds);
            logger::info(
                "SCHEDULER",
                &format!("Backed up {}", candidate.file_name),
                Some(&format!("{} in {:.2}s", backup_filename, seconds)),
            );
            Ok(CandidateOutcome::Archived)
        }
        Ok((outcome, _)) => {
            reporter.finish_save(None, seconds);
            Ok(outcome)
        }
        Err(e) => {
            reporter.finish_save(None, seconds);
            Err(e)
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn copy_and_record(
    candidate: &SaveCandidate,
    hash: &str,
    backup_filename: &str,
    playthrough_id: i64,
    branch: &str,
    catalog: &mut BackupCatalog,
    extractor: &SaveDocumentExtractor,
    started: Instant,
    store: &BackupStore,
) -> BackupResult<(CandidateOutcome, String)> {
    let archived_path = store.copy_in(&candidate.path, backup_filename)?;

    // the game may have rewritten the save while it was being copied
    let archived_hash = ContentHasher::digest_file(&archived_path)?;
    if archived_hash != hash && catalog.backup_exists(&archived_hash)? {
        store.delete(backup_filename)?;
        return Ok((CandidateOutcome::Duplicate, archived_hash));
    }

    let metadata = match extractor.extract(&archived_path) {
        Ok(metadata) => metadata,
        Err(e) => {
            store.delete(backup_filename)?;
            return Err(e.into());
        }
    };

    let backup = NewBackup {
        playthrough_id,
        x4_filename: candidate.file_name.clone(),
        x4_save_time: metadata.save_time.unwrap_or(candidate.modified),
        file_hash: archived_hash.clone(),
        backup_time: Utc::now(),
        backup_filename: backup_filename.to_string(),
        backup_duration: started.elapsed().as_secs_f64(),
        metadata,
        flag: false,
        notes: String::new(),
        delete: false,
        branch: branch.to_string(),
    };
    match catalog.add_backup(&backup) {
        Ok(BackupInsert::Inserted) => Ok((CandidateOutcome::Archived, archived_hash)),
        Ok(BackupInsert::Duplicate) => {
            store.delete(backup_filename)?;
            Ok((CandidateOutcome::Duplicate, archived_hash))
        }
        Err(e) => {
            store.delete(backup_filename)?;
            Err(e.into())
        }
    }
}
