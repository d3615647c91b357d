//! Copying every record of one vault into another, e.g. when moving a vault
//! to a new container or re-keying it under a new password.

use parking_lot::Mutex;
use std::sync::Arc;

use lockore_core::{BackgroundTask, CancelToken, LockoreError, LockoreResult};

use crate::storage::Storage;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MigrationProgress {
    pub done: usize,
    pub total: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationOutcome {
    Completed(usize),
    Canceled,
}

/// Which container survives [`finish_migration`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keep {
    Source,
    Target,
}

/// Copy every record of `from` into `to`. Both must be unlocked.
///
/// Records already copied stay in `to` when the copy is canceled or fails.
pub fn migrate(
    from: &mut Storage,
    to: &mut Storage,
    cancel: &CancelToken,
    progress: &mut dyn FnMut(MigrationProgress),
) -> LockoreResult<MigrationOutcome> {
    let heads = from.heads()?.to_vec();
    to.heads()?;

    let needed = from.storage_size()?;
    let free = to.storage_free()?;
    if needed > free {
        return Err(LockoreError::Storage(format!(
            "not enough space: need {needed} bytes, {free} free"
        )));
    }

    let total = heads.len();
    tracing::info!(records = total, "migration started");
    for (i, head) in heads.iter().enumerate() {
        if cancel.is_cancelled() {
            tracing::info!(copied = i, records = total, "migration canceled");
            return Ok(MigrationOutcome::Canceled);
        }
        let mut record = from.clone_record(head, None)?;
        to.insert(&mut record)?;
        progress(MigrationProgress { done: i + 1, total });
    }
    to.save()?;
    tracing::info!(records = total, "migration finished");
    Ok(MigrationOutcome::Completed(total))
}

/// Both stores handed back by a [`MigrationJob`], with the copy result.
pub struct MigrationResult {
    pub from: Storage,
    pub to: Storage,
    pub outcome: LockoreResult<MigrationOutcome>,
}

/// [`migrate`] on a background worker. The stores move into the worker and
/// come back from [`MigrationJob::join`].
pub struct MigrationJob {
    task: BackgroundTask<MigrationResult>,
    progress: Arc<Mutex<MigrationProgress>>,
}

impl MigrationJob {
    pub fn spawn(mut from: Storage, mut to: Storage) -> LockoreResult<Self> {
        let progress = Arc::new(Mutex::new(MigrationProgress::default()));
        let shared = Arc::clone(&progress);
        let task = BackgroundTask::spawn("lockore-migrate", move |cancel| {
            let outcome = migrate(&mut from, &mut to, &cancel, &mut |p| *shared.lock() = p);
            MigrationResult { from, to, outcome }
        })?;
        Ok(Self { task, progress })
    }

    pub fn cancel(&self) {
        self.task.cancel();
    }

    pub fn progress(&self) -> MigrationProgress {
        *self.progress.lock()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub fn join(self) -> LockoreResult<MigrationResult> {
        self.task.join()
    }
}

/// Wipe the container that is not kept and return the other one.
pub fn finish_migration(mut from: Storage, mut to: Storage, keep: Keep) -> LockoreResult<Storage> {
    match keep {
        Keep::Target => {
            from.wipe()?;
            Ok(to)
        }
        Keep::Source => {
            to.wipe()?;
            Ok(from)
        }
    }
}
