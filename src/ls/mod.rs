//! Contains the structs and traits that define a `locksystem` backend.
//!
//! Note that the methods DO NOT return futures, they are synchronous.
//! A lock table lives in memory (`MemLs` does no I/O at all), so all
//! methods return instantly.
//!
//! A lock table is shared by all requests. Implementations must make
//! `lock` a single check-and-insert step, so that two overlapping
//! exclusive locks can never both be granted.
//!
//! Expired locks must never be honored. When they are purged is up to
//! the implementation.
use std::fmt::Debug;
use std::time::{Duration, SystemTime};

use xmltree::Element;

use crate::davpath::DavPath;

pub mod memls;

/// Type of the locks returned by DavLockSystem methods.
#[derive(Debug, Clone)]
pub struct DavLock {
    /// Token.
    pub token: String,
    /// Path/
    pub path: DavPath,
    /// Principal.
    pub principal: Option<String>,
    /// Owner.
    pub owner: Option<Element>,
    /// When the lock turns stale (absolute).
    pub timeout_at: Option<SystemTime>,
    /// When the lock turns stale (relative).
    pub timeout: Option<Duration>,
    /// When the lock was granted.
    pub created: SystemTime,
    /// Shared.
    pub shared: bool,
    /// Deep.
    pub deep: bool,
}

impl DavLock {
    /// Has this lock expired at `now`.
    pub fn is_expired(&self, now: SystemTime) -> bool {
        matches!(self.timeout_at, Some(t) if t <= now)
    }

    /// Does this lock apply to `path`.
    pub fn covers(&self, path: &DavPath) -> bool {
        self.path == *path || (self.deep && self.path.is_ancestor_of(path))
    }

    /// Seconds left before the lock expires, None if it never does.
    pub fn remaining(&self, now: SystemTime) -> Option<Duration> {
        self.timeout_at
            .map(|t| t.duration_since(now).unwrap_or(Duration::ZERO))
    }
}

/// Errors returned by the `refresh` and `unlock` methods.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LsError {
    /// No lock with this token (or it does not apply to the path).
    NotFound,
    /// The lock existed but has expired.
    Expired,
    /// The lock belongs to another principal.
    NotOwner,
}

impl std::fmt::Display for LsError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

impl std::error::Error for LsError {}

/// The trait that defines a locksystem.
pub trait DavLockSystem: Debug + Sync + Send {
    /// Lock a node. Returns `Ok(new_lock)` if succeeded,
    /// or `Err(conflicting_lock)` if failed.
    ///
    /// A `timeout` of `None` means "infinite".
    fn lock(
        &self,
        path: &DavPath,
        principal: Option<&str>,
        owner: Option<&Element>,
        timeout: Option<Duration>,
        shared: bool,
        deep: bool,
    ) -> Result<DavLock, DavLock>;

    /// Unlock a node. Fails if the token does not exist, does
    /// not apply to `path`, or was issued to another principal.
    fn unlock(&self, path: &DavPath, principal: Option<&str>, token: &str) -> Result<(), LsError>;

    /// Refresh lock. Returns updated lock if succeeded.
    ///
    /// Only the principal that owns the lock may refresh it.
    fn refresh(
        &self,
        path: &DavPath,
        principal: Option<&str>,
        token: &str,
        timeout: Option<Duration>,
    ) -> Result<DavLock, LsError>;

    /// Check if node is locked and if so, if we own all the locks.
    /// If not, returns every lock we do not own.
    ///
    /// With `deep`, locks on all descendants are checked as well.
    fn check(
        &self,
        path: &DavPath,
        principal: Option<&str>,
        ignore_principal: bool,
        deep: bool,
        submitted_tokens: &[String],
    ) -> Result<(), Vec<DavLock>>;

    /// Find and return all locks that cover a given path.
    fn discover(&self, path: &DavPath) -> Vec<DavLock>;

    /// Delete all locks at this path and below (after MOVE or DELETE)
    fn delete(&self, path: &DavPath) -> Result<(), ()>;
}
