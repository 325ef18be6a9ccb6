// src/session.rs
//! Session manager: one open database, one operation at a time
//!
//! Loads and saves run on the caller's thread (or a spawned worker via
//! [`DatabaseManager::start_load`]). Observers get [`ManagerEvent`]s over
//! plain channels; there is no global state.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::database::Database;
use crate::enums::CancelReason;
use crate::error::{DatabaseError, Result};
use crate::keys::CompositeKey;
use crate::progress::Progress;
use crate::warnings::LoadWarnings;

const PROGRESS_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, PartialEq)]
pub enum ManagerEvent {
    WillLoad,
    ProgressChanged(f64),
    DidLoad { warnings: LoadWarnings },
    LoadCancelled,
    LoadFailed { reason: String },
    InvalidKey,
    WillSave,
    DidSave,
    SaveFailed { reason: String },
    WillClose,
    DidClose,
}

/// The open database and the name it was loaded under
#[derive(Debug)]
pub struct DatabaseSession {
    pub file_name: String,
    pub database: Database,
}

#[derive(Default)]
struct ManagerInner {
    busy: AtomicBool,
    session: Mutex<Option<DatabaseSession>>,
    subscribers: Mutex<Vec<Sender<ManagerEvent>>>,
    progress: Mutex<Progress>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Clears the busy flag however the operation ends
struct BusyGuard<'a> {
    busy: &'a AtomicBool,
    /// Progress of this operation, already reachable by `cancel`
    progress: Progress,
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

#[derive(Clone, Default)]
pub struct DatabaseManager {
    inner: Arc<ManagerInner>,
}

impl std::fmt::Debug for DatabaseManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseManager")
            .field("busy", &self.is_busy())
            .field("file_name", &self.file_name())
            .finish()
    }
}

impl DatabaseManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Receiver<ManagerEvent> {
        let (tx, rx) = mpsc::channel();
        lock(&self.inner.subscribers).push(tx);
        rx
    }

    fn notify(&self, event: ManagerEvent) {
        debug!(?event, "manager event");
        lock(&self.inner.subscribers).retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn is_busy(&self) -> bool {
        self.inner.busy.load(Ordering::Acquire)
    }

    fn begin(&self) -> Result<BusyGuard<'_>> {
        if self
            .inner
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(DatabaseError::load("another operation is in progress"));
        }
        let progress = Progress::new();
        *lock(&self.inner.progress) = progress.clone();
        Ok(BusyGuard {
            busy: &self.inner.busy,
            progress,
        })
    }

    /// Cancels the running load or save, if any
    pub fn cancel(&self, reason: CancelReason) {
        info!(%reason, "cancel requested");
        lock(&self.inner.progress).cancel(reason);
    }

    pub fn file_name(&self) -> Option<String> {
        lock(&self.inner.session)
            .as_ref()
            .map(|s| s.file_name.clone())
    }

    pub fn is_open(&self) -> bool {
        lock(&self.inner.session).is_some()
    }

    /// Runs `f` on the open database
    pub fn with_database<R>(&self, f: impl FnOnce(&mut Database) -> R) -> Option<R> {
        lock(&self.inner.session)
            .as_mut()
            .map(|session| f(&mut session.database))
    }

    /// Emits `ProgressChanged` while `work` runs
    fn with_progress_events<R>(&self, progress: &Progress, work: impl FnOnce() -> R) -> R {
        let done = AtomicBool::new(false);
        thread::scope(|scope| {
            scope.spawn(|| {
                let mut last = -1.0;
                while !done.load(Ordering::Acquire) {
                    let fraction = progress.fraction();
                    if fraction > last {
                        last = fraction;
                        self.notify(ManagerEvent::ProgressChanged(fraction));
                    }
                    thread::sleep(PROGRESS_POLL_INTERVAL);
                }
            });
            let result = work();
            done.store(true, Ordering::Release);
            result
        })
    }

    /// Loads `data` as the new session, closing the current one first
    pub fn load(&self, file_name: &str, data: &[u8], key: CompositeKey) -> Result<LoadWarnings> {
        let busy = self.begin()?;
        let progress = &busy.progress;
        self.close_session();
        self.notify(ManagerEvent::WillLoad);

        let result = self.with_progress_events(progress, || {
            Database::load(file_name, data, key, progress.clone())
        });
        match result {
            Ok((database, warnings)) => {
                *lock(&self.inner.session) = Some(DatabaseSession {
                    file_name: file_name.to_owned(),
                    database,
                });
                self.notify(ManagerEvent::ProgressChanged(1.0));
                self.notify(ManagerEvent::DidLoad {
                    warnings: warnings.clone(),
                });
                Ok(warnings)
            }
            Err(DatabaseError::Cancelled(CancelReason::UserRequest)) => {
                self.notify(ManagerEvent::LoadCancelled);
                Err(DatabaseError::Cancelled(CancelReason::UserRequest))
            }
            Err(DatabaseError::Cancelled(CancelReason::LowMemory)) => {
                let reason = CancelReason::LowMemory.to_string();
                warn!(file = file_name, "load stopped for lack of memory");
                self.notify(ManagerEvent::LoadFailed {
                    reason: reason.clone(),
                });
                Err(DatabaseError::load(reason))
            }
            Err(DatabaseError::InvalidKey) => {
                self.notify(ManagerEvent::InvalidKey);
                Err(DatabaseError::InvalidKey)
            }
            Err(err) => {
                self.notify(ManagerEvent::LoadFailed {
                    reason: err.to_string(),
                });
                Err(err)
            }
        }
    }

    pub fn load_file(&self, path: &Path, key: CompositeKey) -> Result<LoadWarnings> {
        let data = std::fs::read(path)
            .map_err(|e| DatabaseError::load(format!("{}: {e}", path.display())))?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        self.load(&file_name, &data, key)
    }

    /// Loads on a worker thread; the result also arrives as events
    pub fn start_load(
        &self,
        file_name: String,
        data: Vec<u8>,
        key: CompositeKey,
    ) -> JoinHandle<Result<LoadWarnings>> {
        let manager = self.clone();
        thread::spawn(move || manager.load(&file_name, &data, key))
    }

    /// Serializes the open database. The session is taken out of the lock
    /// for the duration, so readers never wait on the KDF.
    pub fn save(&self) -> Result<Vec<u8>> {
        let busy = self.begin()?;
        let progress = &busy.progress;
        let mut session = lock(&self.inner.session)
            .take()
            .ok_or_else(|| DatabaseError::save("no database is open"))?;
        self.notify(ManagerEvent::WillSave);
        session.database.set_progress(progress.clone());

        let result = self.with_progress_events(progress, || session.database.save());
        *lock(&self.inner.session) = Some(session);
        match result {
            Ok(bytes) => {
                self.notify(ManagerEvent::DidSave);
                Ok(bytes)
            }
            Err(err) => {
                self.notify(ManagerEvent::SaveFailed {
                    reason: err.to_string(),
                });
                Err(err)
            }
        }
    }

    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let bytes = self.save()?;
        std::fs::write(path, bytes)
            .map_err(|e| DatabaseError::save(format!("{}: {e}", path.display())))
    }

    fn close_session(&self) {
        let Some(mut session) = lock(&self.inner.session).take() else {
            return;
        };
        self.notify(ManagerEvent::WillClose);
        session.database.erase();
        info!(file = %session.file_name, "database closed");
        self.notify(ManagerEvent::DidClose);
    }

    /// Erases and drops the open database
    pub fn close(&self) -> Result<()> {
        let _busy = self.begin()?;
        self.close_session();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_operation_is_refused_while_busy() {
        let manager = DatabaseManager::new();
        let guard = manager.begin().unwrap();
        assert!(manager.is_busy());
        assert!(matches!(
            manager.save(),
            Err(DatabaseError::LoadError { .. })
        ));
        drop(guard);
        assert!(!manager.is_busy());
    }

    #[test]
    fn cancel_reaches_an_operation_as_soon_as_it_begins() {
        let manager = DatabaseManager::new();
        manager.cancel(CancelReason::UserRequest);
        let busy = manager.begin().unwrap();
        assert!(!busy.progress.is_cancelled());
        manager.cancel(CancelReason::UserRequest);
        assert_eq!(busy.progress.cancel_reason(), Some(CancelReason::UserRequest));
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let manager = DatabaseManager::new();
        let kept = manager.subscribe();
        drop(manager.subscribe());
        manager.notify(ManagerEvent::WillClose);
        assert_eq!(lock(&manager.inner.subscribers).len(), 1);
        assert_eq!(kept.try_recv().unwrap(), ManagerEvent::WillClose);
    }

    #[test]
    fn invalid_data_reports_load_failed() {
        let manager = DatabaseManager::new();
        let events = manager.subscribe();
        let result = manager.load("x", b"nope", CompositeKey::from_password("pw"));
        assert!(result.is_err());
        let events: Vec<_> = events.try_iter().collect();
        assert_eq!(events.first(), Some(&ManagerEvent::WillLoad));
        assert!(matches!(events.last(), Some(ManagerEvent::LoadFailed { .. })));
        assert!(!manager.is_open());
    }
}
