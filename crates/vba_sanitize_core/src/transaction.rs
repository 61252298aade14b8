//! Backup, patch, repack and swap a container as one recoverable operation.
//!
//! A [`Transaction`] walks an explicit state machine:
//!
//! ```text
//! Idle -> BackedUp -> Extracted -> Patched -> Repacked -> Swapped -> Verified
//!                         |                                            ^
//!                         +---- (entry missing / nothing to replace) --+
//! ```
//!
//! Any error between `BackedUp` and `Swapped` moves it to the absorbing
//! [`TransactionState::Failed`] state. The failure handler copies the backup over
//! the original whenever the original is missing or no longer matches the
//! backup, and the report carries a replaced count of zero. The backup file is
//! never deleted.
//!
//! Only a failure to create the backup is returned as an `Err` from
//! [`Transaction::run`]; without a backup there is nothing to roll back to, so
//! the container is left alone.

use crate::archive::{self, ContainerCodec, ZipCodec};
use crate::error::{Error, Result};
use crate::patcher::{self, Patch};
use crate::DEFAULT_TARGET_ENTRY;
use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use std::fs;
use std::io;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Suffix appended to the container path to form the backup path.
pub const BACKUP_SUFFIX: &str = ".backup";

/// `<container>.backup`
pub fn backup_path_for(container: &Utf8Path) -> Utf8PathBuf {
    Utf8PathBuf::from(format!("{container}{BACKUP_SUFFIX}"))
}

/// What to replace and where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SanitizeOptions {
    pub patch: Patch,
    /// Archive path of the blob to patch.
    pub target_entry: String,
}

impl SanitizeOptions {
    pub fn new(patch: Patch) -> Self {
        Self {
            patch,
            target_entry: DEFAULT_TARGET_ENTRY.to_string(),
        }
    }

    pub fn with_target_entry(mut self, target_entry: impl Into<String>) -> Self {
        self.target_entry = target_entry.into();
        self
    }
}

/// Non-failed states, in the order they are reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Stage {
    Idle,
    BackedUp,
    Extracted,
    Patched,
    Repacked,
    Swapped,
    Verified,
}

/// Result of the rollback attempted by the failure handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "outcome", content = "reason")]
pub enum RestoreOutcome {
    /// The original still matches the backup.
    NotNeeded,
    /// The backup was copied over the original.
    Restored,
    /// There was no backup to restore from.
    NoBackup,
    /// Copying the backup failed; the original may be missing or damaged.
    RestoreFailed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "state")]
pub enum TransactionState {
    Idle,
    BackedUp,
    Extracted,
    Patched,
    Repacked,
    Swapped,
    Verified,
    Failed {
        /// Last state reached before the failure.
        stage: Stage,
        reason: String,
        restore: RestoreOutcome,
    },
}

impl TransactionState {
    /// The stage this state corresponds to; for `Failed`, the stage that was
    /// current when the failure happened.
    pub fn stage(&self) -> Stage {
        match self {
            TransactionState::Idle => Stage::Idle,
            TransactionState::BackedUp => Stage::BackedUp,
            TransactionState::Extracted => Stage::Extracted,
            TransactionState::Patched => Stage::Patched,
            TransactionState::Repacked => Stage::Repacked,
            TransactionState::Swapped => Stage::Swapped,
            TransactionState::Verified => Stage::Verified,
            TransactionState::Failed { stage, .. } => *stage,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionState::Verified | TransactionState::Failed { .. }
        )
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, TransactionState::Failed { .. })
    }

    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(&self, next: &TransactionState) -> bool {
        use TransactionState::*;

        if self.is_terminal() {
            return false;
        }

        matches!(
            (self, next),
            (_, Failed { .. })
                | (Idle, BackedUp)
                | (BackedUp, Extracted)
                | (Extracted, Patched)
                | (Extracted, Verified)
                | (Patched, Repacked)
                | (Repacked, Swapped)
                | (Swapped, Verified)
        )
    }
}

/// Outcome of re-reading the target entry from the final container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "kind", content = "value")]
pub enum Verification {
    /// Occurrences of the search pattern still present.
    Remaining(usize),
    /// The container has no target entry.
    EntryMissing,
    /// The container could not be read back.
    Unavailable(String),
    /// Not performed because the transaction failed.
    Skipped,
}

impl Verification {
    pub fn remaining(&self) -> Option<usize> {
        match self {
            Verification::Remaining(count) => Some(*count),
            _ => None,
        }
    }
}

/// Progress information emitted on every state transition.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchProgress {
    pub container: Utf8PathBuf,
    pub state: TransactionState,
}

/// Summary of one transaction.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchReport {
    pub container: Utf8PathBuf,
    pub backup: Utf8PathBuf,
    pub target_entry: String,
    /// Terminal state.
    pub state: TransactionState,
    /// Substitutions that made it into the container; `0` on failure.
    pub replaced: usize,
    /// Matches left in the patched blob before repacking.
    pub count_after: Option<usize>,
    pub original_size: Option<u64>,
    pub patched_size: Option<u64>,
    pub verification: Verification,
}

impl PatchReport {
    fn new(container: &Utf8Path, backup: &Utf8Path, target_entry: &str) -> Self {
        Self {
            container: container.to_path_buf(),
            backup: backup.to_path_buf(),
            target_entry: target_entry.to_string(),
            state: TransactionState::Idle,
            replaced: 0,
            count_after: None,
            original_size: None,
            patched_size: None,
            verification: Verification::Skipped,
        }
    }

    /// Completed and no occurrences remain.
    pub fn is_success(&self) -> bool {
        self.state == TransactionState::Verified && self.verification == Verification::Remaining(0)
    }

    pub fn restore(&self) -> Option<&RestoreOutcome> {
        match &self.state {
            TransactionState::Failed { restore, .. } => Some(restore),
            _ => None,
        }
    }

    /// Size change of the target entry in bytes.
    pub fn size_delta(&self) -> Option<i64> {
        Some(self.patched_size? as i64 - self.original_size? as i64)
    }
}

type ProgressCallback = Arc<dyn Fn(PatchProgress) + Send + Sync>;

/// One backup/patch/repack/swap/verify run over a single container.
pub struct Transaction<C: ContainerCodec = ZipCodec> {
    container: Utf8PathBuf,
    backup: Utf8PathBuf,
    options: SanitizeOptions,
    codec: C,
    state: TransactionState,
    progress_callback: Option<ProgressCallback>,
}

impl Transaction<ZipCodec> {
    pub fn new(container: impl Into<Utf8PathBuf>, options: SanitizeOptions) -> Self {
        let container = container.into();
        Self {
            backup: backup_path_for(&container),
            container,
            options,
            codec: ZipCodec::default(),
            state: TransactionState::Idle,
            progress_callback: None,
        }
    }
}

impl<C: ContainerCodec> Transaction<C> {
    /// Replace the codec used to extract and repack the container.
    pub fn with_codec<D: ContainerCodec>(self, codec: D) -> Transaction<D> {
        Transaction {
            container: self.container,
            backup: self.backup,
            options: self.options,
            codec,
            state: self.state,
            progress_callback: self.progress_callback,
        }
    }

    /// Register a callback that receives every state transition.
    pub fn with_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(PatchProgress) + Send + Sync + 'static,
    {
        self.progress_callback = Some(Arc::new(callback));
        self
    }

    pub fn state(&self) -> &TransactionState {
        &self.state
    }

    pub fn backup_path(&self) -> &Utf8Path {
        &self.backup
    }

    /// Run the transaction to a terminal state.
    ///
    /// Returns `Err` only if the backup could not be created. Every later
    /// failure is reported through [`PatchReport::state`].
    pub fn run(mut self) -> Result<PatchReport> {
        let mut report =
            PatchReport::new(&self.container, &self.backup, &self.options.target_entry);

        info!(
            container = %self.container,
            entry = %self.options.target_entry,
            "starting transaction"
        );

        if let Err(err) = fs::copy(&self.container, &self.backup) {
            error!(backup = %self.backup, "failed to create backup: {}", err);
            self.transition(TransactionState::Failed {
                stage: Stage::Idle,
                reason: err.to_string(),
                restore: RestoreOutcome::NotNeeded,
            });
            return Err(Error::Backup {
                path: self.backup.clone(),
                source: err,
            });
        }
        self.transition(TransactionState::BackedUp);

        if let Err(err) = self.mutate(&mut report) {
            let stage = self.state.stage();
            error!(container = %self.container, ?stage, "transaction failed: {}", err);

            let restore = restore_from_backup(&self.container, &self.backup);
            match &restore {
                RestoreOutcome::Restored => {
                    warn!(container = %self.container, "restored original from backup");
                }
                RestoreOutcome::RestoreFailed(reason) => {
                    error!(container = %self.container, "restore from backup failed: {}", reason);
                }
                _ => {}
            }

            report.replaced = 0;
            report.count_after = None;
            report.original_size = None;
            report.patched_size = None;
            report.verification = Verification::Skipped;
            self.transition(TransactionState::Failed {
                stage,
                reason: err.to_string(),
                restore,
            });
        }

        report.state = self.state.clone();
        Ok(report)
    }

    fn mutate(&mut self, report: &mut PatchReport) -> Result<()> {
        let staging = self.codec.extract(&self.container)?;
        self.transition(TransactionState::Extracted);

        let target = self.options.target_entry.clone();
        let Some(blob) = patcher::load_entry(&staging, &target)? else {
            warn!(
                container = %self.container,
                entry = %target,
                "target entry not found, nothing to do"
            );
            report.verification = Verification::EntryMissing;
            self.transition(TransactionState::Verified);
            return Ok(());
        };

        let patched = self.options.patch.apply(&blob);
        report.original_size = Some(blob.len() as u64);
        report.patched_size = Some(patched.bytes.len() as u64);
        report.count_after = Some(patched.count_after);
        debug!(
            entry = %target,
            size = blob.len(),
            occurrences = patched.replaced,
            "loaded target entry"
        );

        if patched.replaced == 0 {
            info!(
                container = %self.container,
                "search pattern not found, container left untouched"
            );
            report.verification = self.verify_container();
            self.transition(TransactionState::Verified);
            return Ok(());
        }

        patcher::write_entry(&staging, &target, &patched.bytes)?;
        report.replaced = patched.replaced;
        self.transition(TransactionState::Patched);

        let output = self.codec.repack(&staging, &self.container)?;
        self.transition(TransactionState::Repacked);

        // The temp file is created owner-only; keep the container's own mode.
        let permissions = fs::metadata(&self.container)?.permissions();
        fs::set_permissions(&*output, permissions)?;
        output
            .persist(self.container.as_std_path())
            .map_err(|err| Error::Io(err.error))?;
        self.transition(TransactionState::Swapped);

        if let Err(err) = staging.close() {
            warn!("failed to remove staging directory: {}", err);
        }

        report.verification = self.verify_container();
        self.transition(TransactionState::Verified);
        Ok(())
    }

    fn verify_container(&self) -> Verification {
        verify(
            &self.container,
            &self.options.target_entry,
            self.options.patch.search(),
        )
    }

    fn transition(&mut self, next: TransactionState) {
        debug_assert!(
            self.state.can_transition_to(&next),
            "illegal transition {:?} -> {:?}",
            self.state,
            next
        );
        debug!(container = %self.container, from = ?self.state.stage(), to = ?next, "transition");

        self.state = next;
        if let Some(callback) = &self.progress_callback {
            callback(PatchProgress {
                container: self.container.clone(),
                state: self.state.clone(),
            });
        }
    }
}

/// Count occurrences of `needle` in `entry`, reading `container` from disk
/// without any staging.
pub fn verify(container: &Utf8Path, entry: &str, needle: &[u8]) -> Verification {
    let blob = match archive::read_entry(container, entry) {
        Ok(Some(blob)) => blob,
        Ok(None) => return Verification::EntryMissing,
        Err(err) => {
            warn!(container = %container, "verification failed: {}", err);
            return Verification::Unavailable(err.to_string());
        }
    };

    match patcher::count_occurrences(&blob, needle) {
        Ok(remaining) => {
            info!(container = %container, remaining, "verified container");
            Verification::Remaining(remaining)
        }
        Err(err) => Verification::Unavailable(err.to_string()),
    }
}

/// Put the backup back in place if the original is missing or differs from it.
pub fn restore_from_backup(container: &Utf8Path, backup: &Utf8Path) -> RestoreOutcome {
    if !backup.is_file() {
        return RestoreOutcome::NoBackup;
    }

    if let Ok(true) = files_identical(container, backup) {
        return RestoreOutcome::NotNeeded;
    }

    match fs::copy(backup, container) {
        Ok(_) => RestoreOutcome::Restored,
        Err(err) => RestoreOutcome::RestoreFailed(err.to_string()),
    }
}

fn files_identical(a: &Utf8Path, b: &Utf8Path) -> io::Result<bool> {
    if fs::metadata(a)?.len() != fs::metadata(b)?.len() {
        return Ok(false);
    }

    Ok(fs::read(a)? == fs::read(b)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_backup_path() {
        assert_eq!(
            backup_path_for(Utf8Path::new("dir/book.xlsm")),
            Utf8PathBuf::from("dir/book.xlsm.backup")
        );
    }

    #[test]
    fn test_legal_transitions() {
        use TransactionState::*;

        assert!(Idle.can_transition_to(&BackedUp));
        assert!(Extracted.can_transition_to(&Verified));
        assert!(Swapped.can_transition_to(&Verified));
        assert!(!Idle.can_transition_to(&Extracted));
        assert!(!Patched.can_transition_to(&Swapped));
        assert!(!Verified.can_transition_to(&Idle));

        let failed = Failed {
            stage: Stage::Patched,
            reason: "boom".to_string(),
            restore: RestoreOutcome::NotNeeded,
        };
        assert!(Repacked.can_transition_to(&failed));
        assert!(!failed.can_transition_to(&Verified));
        assert!(!Verified.can_transition_to(&failed));
        assert_eq!(failed.stage(), Stage::Patched);
    }

    #[test]
    fn test_restore_when_original_missing() {
        let dir = tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let container = root.join("book.xlsm");
        let backup = backup_path_for(&container);
        fs::write(&backup, b"pristine").unwrap();

        assert_eq!(
            restore_from_backup(&container, &backup),
            RestoreOutcome::Restored
        );
        assert_eq!(fs::read(&container).unwrap(), b"pristine");
        assert!(backup.exists());
    }

    #[test]
    fn test_restore_when_original_corrupt() {
        let dir = tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let container = root.join("book.xlsm");
        let backup = backup_path_for(&container);
        fs::write(&backup, b"pristine").unwrap();
        fs::write(&container, b"half-writ").unwrap();

        assert_eq!(
            restore_from_backup(&container, &backup),
            RestoreOutcome::Restored
        );
        assert_eq!(fs::read(&container).unwrap(), b"pristine");
    }

    #[test]
    fn test_restore_not_needed_when_identical() {
        let dir = tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let container = root.join("book.xlsm");
        let backup = backup_path_for(&container);
        fs::write(&backup, b"pristine").unwrap();
        fs::write(&container, b"pristine").unwrap();

        assert_eq!(
            restore_from_backup(&container, &backup),
            RestoreOutcome::NotNeeded
        );
    }

    #[test]
    fn test_restore_without_backup() {
        let dir = tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let container = root.join("book.xlsm");

        assert_eq!(
            restore_from_backup(&container, &backup_path_for(&container)),
            RestoreOutcome::NoBackup
        );
    }

    #[test]
    fn test_report_size_delta() {
        let mut report = PatchReport::new(
            Utf8Path::new("a.xlsm"),
            Utf8Path::new("a.xlsm.backup"),
            DEFAULT_TARGET_ENTRY,
        );
        assert_eq!(report.size_delta(), None);

        report.original_size = Some(100);
        report.patched_size = Some(96);
        assert_eq!(report.size_delta(), Some(-4));
    }

    #[test]
    fn test_verify_unavailable_for_missing_file() {
        let verification = verify(
            Utf8Path::new("/nonexistent/dir/book.xlsm"),
            DEFAULT_TARGET_ENTRY,
            b"QBIS",
        );
        assert!(matches!(verification, Verification::Unavailable(_)));
        assert_eq!(verification.remaining(), None);
    }
}
