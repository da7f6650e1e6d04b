use crate::error::{ErrorKind, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// The batch-wide filesystem lock.
///
/// Every filesystem mutation that has to be atomic with respect to other jobs
/// (existence checks, directory creation, moving into place, deleting
/// sources) happens while holding it. It also owns the destination claims:
/// which job, identified by its sources, reserved which destination.
#[derive(Debug, Default)]
pub struct FsGuard {
    claims: Mutex<HashMap<PathBuf, Vec<PathBuf>>>,
}
impl FsGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes the lock. Keep the returned guard for the whole
    /// check-then-mutate section and never across an external process.
    pub fn lock(&self) -> Claims<'_> {
        // A panicking worker can't leave the map half-updated: every update
        // is a single insert.
        Claims { inner: self.claims.lock().unwrap_or_else(PoisonError::into_inner) }
    }

    /// Number of claimed destinations.
    pub fn len(&self) -> usize {
        self.lock().inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Exclusive access to the destination claims, and the proof of holding the
/// filesystem lock.
pub struct Claims<'a> {
    inner: MutexGuard<'a, HashMap<PathBuf, Vec<PathBuf>>>,
}
impl Claims<'_> {
    /// The sources of the job that claimed `destination`.
    pub fn owner(&self, destination: &Path) -> Option<&[PathBuf]> {
        self.inner.get(destination).map(Vec::as_slice)
    }

    /// Reserves `destination` for the job made of `sources`.
    ///
    /// Claiming again for the same sources succeeds, so a job that was
    /// planned can re-claim its destination when committing.
    pub fn claim(&mut self, destination: &Path, sources: &[PathBuf]) -> Result<()> {
        match self.owner(destination) {
            Some(owner) if owner != sources => {
                tracing::debug!(destination = %destination.display(), "Destination already claimed by another job");
                exn::bail!(ErrorKind::DestinationConflict(destination.to_path_buf()))
            },
            Some(_) => Ok(()),
            None => {
                self.inner.insert(destination.to_path_buf(), sources.to_vec());
                Ok(())
            },
        }
    }
}

/// Whether anything, including a dangling symlink, sits at `path`.
pub(crate) fn occupied(path: &Path) -> bool {
    path.symlink_metadata().is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claims_are_exclusive() {
        let guard = FsGuard::new();
        let a = vec![PathBuf::from("a.jpg")];
        let b = vec![PathBuf::from("b.jpg")];
        let destination = Path::new("out.jpg");

        guard.lock().claim(destination, &a).unwrap();
        let err = guard.lock().claim(destination, &b).unwrap_err();
        assert!(matches!(&*err, ErrorKind::DestinationConflict(path) if path == destination));
        assert_eq!(guard.lock().owner(destination), Some(a.as_slice()));
    }

    #[test]
    fn test_same_owner_can_claim_again() {
        let guard = FsGuard::new();
        let sources = vec![PathBuf::from("a.jpg"), PathBuf::from("b.jpg")];
        let mut claims = guard.lock();
        claims.claim(Path::new("out.jpg"), &sources).unwrap();
        claims.claim(Path::new("out.jpg"), &sources).unwrap();
        drop(claims);
        assert_eq!(guard.len(), 1);
    }
}
