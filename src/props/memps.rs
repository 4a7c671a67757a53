//! Ephemeral in-memory property store.
//!
//! Keyed by `(path, namespace, name)` in a BTreeMap, so all properties
//! of a subtree are one range scan away.
//!
//! A batch is applied under a single mutex, so it is atomic with
//! respect to every other store operation.
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::davpath::is_ancestor_or_self;
use crate::props::{DavProp, DavPropStore, PropResult, PropWrite};

type Key = (String, String, String);

/// Ephemeral in-memory property store.
#[derive(Debug, Clone)]
pub struct MemPs(Arc<Mutex<BTreeMap<Key, DavProp>>>);

impl MemPs {
    /// Create a new, empty property store.
    pub fn new() -> Arc<MemPs> {
        Arc::new(MemPs(Arc::new(Mutex::new(BTreeMap::new()))))
    }
}

fn key(path: &str, ns: &str, name: &str) -> Key {
    (path.to_string(), ns.to_string(), name.to_string())
}

fn apply(map: &mut BTreeMap<Key, DavProp>, w: PropWrite) {
    match w {
        PropWrite::Set(path, prop) => {
            map.insert(key(&path, prop.ns(), &prop.name), prop);
        }
        PropWrite::Delete(path, ns, name) => {
            map.remove(&key(&path, &ns, &name));
        }
    }
}

impl DavPropStore for MemPs {
    fn get(&self, path: &str, ns: &str, name: &str) -> PropResult<Option<DavProp>> {
        let map = self.0.lock();
        Ok(map.get(&key(path, ns, name)).cloned())
    }

    fn set(&self, path: &str, prop: DavProp) -> PropResult<()> {
        let mut map = self.0.lock();
        apply(&mut map, PropWrite::Set(path.to_string(), prop));
        Ok(())
    }

    fn delete(&self, path: &str, ns: &str, name: &str) -> PropResult<()> {
        let mut map = self.0.lock();
        map.remove(&key(path, ns, name));
        Ok(())
    }

    fn list(&self, prefix: &str) -> PropResult<Vec<(String, DavProp)>> {
        let map = self.0.lock();
        let start = (prefix.to_string(), String::new(), String::new());
        // Keys sort by path, and every path below `prefix` starts with it,
        // but so do siblings like "/dir2" for "/dir": filter those out.
        let res = map
            .range((Bound::Included(start), Bound::Unbounded))
            .take_while(|((p, _, _), _)| p.starts_with(prefix))
            .filter(|((p, _, _), _)| is_ancestor_or_self(prefix, p))
            .map(|((p, _, _), prop)| (p.clone(), prop.clone()))
            .collect();
        Ok(res)
    }

    fn commit(&self, batch: Vec<PropWrite>) -> PropResult<()> {
        let mut map = self.0.lock();
        for w in batch {
            apply(&mut map, w);
        }
        Ok(())
    }
}
