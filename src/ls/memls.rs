//! Simple and ephemeral in-memory lock implementation.
//!
//! The lock table is a map from lock-root path to the locks rooted
//! there, behind one global mutex. Every call purges expired locks
//! first, so an expired lock is never seen by anyone.
//!
//! Locks are not persisted: after a restart every lock is gone.
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;
use uuid::Uuid;
use xmltree::Element;

use crate::davpath::{is_ancestor_or_self, DavPath};
use crate::ls::*;

/// Ephemeral in-memory LockSystem.
#[derive(Debug, Clone)]
pub struct MemLs(Arc<Mutex<MemLsInner>>);

#[derive(Debug, Default)]
struct MemLsInner {
    locks: BTreeMap<String, Vec<DavLock>>,
}

impl MemLs {
    /// Create a new "memls" locksystem.
    pub fn new() -> Arc<MemLs> {
        Arc::new(MemLs(Arc::new(Mutex::new(MemLsInner::default()))))
    }
}

impl MemLsInner {
    // drop every lock that has timed out.
    fn sweep(&mut self, now: SystemTime) {
        self.locks.retain(|_, v| {
            v.retain(|l| {
                let expired = l.is_expired(now);
                if expired {
                    debug!("lock {} on {} expired", l.token, l.path);
                }
                !expired
            });
            !v.is_empty()
        });
    }

    // locks on the path itself, and deep locks on its ancestors.
    fn covering(&self, path: &DavPath) -> Vec<&DavLock> {
        let mut res = Vec::new();
        let mut p = path.clone();
        loop {
            if let Some(v) = self.locks.get(p.as_str()) {
                res.extend(v.iter().filter(|l| l.deep || p == *path));
            }
            if p.is_root() {
                break;
            }
            p = p.parent();
        }
        res
    }

    // locks rooted strictly below the path.
    fn descendants<'a>(&'a self, path: &DavPath) -> impl Iterator<Item = &'a DavLock> + 'a {
        let base = path.as_str().to_string();
        let prefix = if path.is_root() {
            "/".to_string()
        } else {
            format!("{base}/")
        };
        self.locks
            .range(prefix.clone()..)
            .take_while(move |(k, _)| k.starts_with(&prefix))
            .filter(move |(k, _)| **k != base)
            .flat_map(|(_, v)| v.iter())
    }

    fn find(&self, token: &str) -> Option<&DavLock> {
        self.locks
            .values()
            .flat_map(|v| v.iter())
            .find(|l| l.token == token)
    }

    fn find_mut(&mut self, token: &str) -> Option<&mut DavLock> {
        self.locks
            .values_mut()
            .flat_map(|v| v.iter_mut())
            .find(|l| l.token == token)
    }

    fn remove(&mut self, token: &str) {
        self.locks.retain(|_, v| {
            v.retain(|l| l.token != token);
            !v.is_empty()
        });
    }

    // Like sweep, but tells whether `token` was one of the expired locks.
    fn sweep_with(&mut self, token: &str, now: SystemTime) -> Result<(), LsError> {
        let expired = matches!(self.find(token), Some(l) if l.is_expired(now));
        self.sweep(now);
        if expired {
            Err(LsError::Expired)
        } else {
            Ok(())
        }
    }
}

fn holds(lock: &DavLock, principal: Option<&str>, ignore_principal: bool, tokens: &[String]) -> bool {
    tokens.iter().any(|t| *t == lock.token)
        && (ignore_principal || lock.principal.as_deref() == principal)
}

impl DavLockSystem for MemLs {
    fn lock(
        &self,
        path: &DavPath,
        principal: Option<&str>,
        owner: Option<&Element>,
        timeout: Option<Duration>,
        shared: bool,
        deep: bool,
    ) -> Result<DavLock, DavLock> {
        let now = SystemTime::now();
        let inner = &mut *self.0.lock();
        inner.sweep(now);

        // any overlapping lock must be shared, and so must we.
        let compatible = |l: &DavLock| shared && l.shared;
        if let Some(l) = inner.covering(path).into_iter().find(|l| !compatible(l)) {
            trace!("lock {path}: conflicts with {} on {}", l.token, l.path);
            return Err(l.clone());
        }
        if deep {
            if let Some(l) = inner.descendants(path).find(|l| !compatible(l)) {
                trace!("lock {path}: conflicts with {} on {}", l.token, l.path);
                return Err(l.clone());
            }
        }

        let lock = DavLock {
            token: format!("urn:uuid:{}", Uuid::new_v4()),
            path: path.clone(),
            principal: principal.map(|s| s.to_string()),
            owner: owner.cloned(),
            timeout_at: timeout.map(|d| now + d),
            timeout,
            created: now,
            shared,
            deep,
        };
        debug!("lock {} created on {}", lock.token, path);
        inner
            .locks
            .entry(path.as_str().to_string())
            .or_default()
            .push(lock.clone());
        Ok(lock)
    }

    fn unlock(&self, path: &DavPath, principal: Option<&str>, token: &str) -> Result<(), LsError> {
        let inner = &mut *self.0.lock();
        inner.sweep_with(token, SystemTime::now())?;
        match inner.find(token) {
            Some(l) if !l.covers(path) => return Err(LsError::NotFound),
            Some(l) if l.principal.as_deref() != principal => return Err(LsError::NotOwner),
            Some(_) => {}
            None => return Err(LsError::NotFound),
        }
        debug!("unlock {token} on {path}");
        inner.remove(token);
        Ok(())
    }

    fn refresh(
        &self,
        path: &DavPath,
        principal: Option<&str>,
        token: &str,
        timeout: Option<Duration>,
    ) -> Result<DavLock, LsError> {
        let now = SystemTime::now();
        let inner = &mut *self.0.lock();
        inner.sweep_with(token, now)?;
        let lock = inner.find_mut(token).ok_or(LsError::NotFound)?;
        if !lock.covers(path) {
            return Err(LsError::NotFound);
        }
        if lock.principal.as_deref() != principal {
            return Err(LsError::NotOwner);
        }
        lock.timeout = timeout;
        lock.timeout_at = timeout.map(|d| now + d);
        trace!("refresh {token} on {path}: {timeout:?}");
        Ok(lock.clone())
    }

    fn check(
        &self,
        path: &DavPath,
        principal: Option<&str>,
        ignore_principal: bool,
        deep: bool,
        submitted_tokens: &[String],
    ) -> Result<(), Vec<DavLock>> {
        let inner = &mut *self.0.lock();
        inner.sweep(SystemTime::now());
        let held = |l: &DavLock| holds(l, principal, ignore_principal, submitted_tokens);

        let mut failed = Vec::new();

        // The covering locks are all shared, or there is just one
        // exclusive lock. Either way one submitted token is enough.
        let covering = inner.covering(path);
        if !covering.is_empty() && !covering.iter().any(|l| held(l)) {
            failed.extend(covering.into_iter().cloned());
        }

        if deep {
            for l in inner.descendants(path) {
                let same_root = inner.locks.get(l.path.as_str());
                let ok = same_root.map(|v| v.iter().any(held)).unwrap_or(false);
                if !ok {
                    failed.push(l.clone());
                }
            }
        }

        if failed.is_empty() {
            Ok(())
        } else {
            trace!("check {path}: {} unsatisfied lock(s)", failed.len());
            Err(failed)
        }
    }

    fn discover(&self, path: &DavPath) -> Vec<DavLock> {
        let inner = &mut *self.0.lock();
        inner.sweep(SystemTime::now());
        inner.covering(path).into_iter().cloned().collect()
    }

    fn delete(&self, path: &DavPath) -> Result<(), ()> {
        let inner = &mut *self.0.lock();
        inner
            .locks
            .retain(|k, _| !is_ancestor_or_self(path.as_str(), k));
        Ok(())
    }
}
