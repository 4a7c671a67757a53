//! Contains the structs and traits that define a property store, and the
//! `PropManager` that overlays the computed (live) properties on top of it.
//!
//! Dead properties are stored per path as a serialized XML element. The
//! store is a plain key-value map from `(path, namespace, name)` to that
//! element; everything else (protection of live properties, atomic
//! PROPPATCH, keeping properties in sync with COPY/MOVE/DELETE) is done
//! by the `PropManager`.
use std::fmt::Debug;
use std::sync::Arc;

use http::StatusCode;
use parking_lot::Mutex;
use xmltree::Element;

use crate::davpath::{is_ancestor_or_self, DavPath};
use crate::xmltree_ext::ElementExt;

pub mod live;
pub mod memps;

pub use live::{LiveContext, LivePropFn, LiveProps};

/// A dead property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DavProp {
    /// Local name.
    pub name: String,
    /// Prefix as sent by the client.
    pub prefix: Option<String>,
    /// Namespace URI.
    pub namespace: Option<String>,
    /// The complete element, serialized.
    pub xml: Option<Vec<u8>>,
}

impl DavProp {
    /// Build a property from a client supplied element.
    pub fn from_element(elem: &Element) -> PropResult<DavProp> {
        let xml = elem
            .to_fragment()
            .map_err(|e| PropError::Unavailable(e.to_string()))?;
        Ok(DavProp {
            name: elem.name.clone(),
            prefix: elem.prefix.clone(),
            namespace: elem.namespace.clone(),
            xml: Some(xml),
        })
    }

    /// Namespace, empty string if there is none.
    pub fn ns(&self) -> &str {
        self.namespace.as_deref().unwrap_or("")
    }

    /// The property as an element, without its value.
    pub fn name_element(&self) -> Element {
        let mut e = Element::new(&self.name);
        e.prefix = self.prefix.clone();
        e.namespace = self.namespace.clone();
        e
    }

    /// The property as an element, including its value.
    pub fn to_element(&self) -> Option<Element> {
        let xml = self.xml.as_ref()?;
        match Element::parse2(&xml[..]) {
            Ok(e) => Some(e),
            Err(e) => {
                debug!("stored property {} unreadable: {:?}", self.name, e);
                None
            }
        }
    }
}

/// Errors returned by a property store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropError {
    /// Destination already has properties.
    Conflict,
    /// The backing store failed.
    Unavailable(String),
}

impl std::fmt::Display for PropError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            PropError::Conflict => write!(f, "conflict"),
            PropError::Unavailable(e) => write!(f, "unavailable: {e}"),
        }
    }
}

impl std::error::Error for PropError {}

pub type PropResult<T> = Result<T, PropError>;

/// One write in a batch.
#[derive(Debug, Clone)]
pub enum PropWrite {
    /// Set (create or replace) a property at a path.
    Set(String, DavProp),
    /// Delete property `(namespace, name)` at a path. Deleting a missing
    /// property is not an error.
    Delete(String, String, String),
}

/// The trait that defines a dead-property store.
///
/// Paths are the decoded paths of [`DavPath::as_str`].
pub trait DavPropStore: Debug + Send + Sync {
    /// Get one property.
    fn get(&self, path: &str, ns: &str, name: &str) -> PropResult<Option<DavProp>>;

    /// Set one property.
    fn set(&self, path: &str, prop: DavProp) -> PropResult<()>;

    /// Delete one property.
    fn delete(&self, path: &str, ns: &str, name: &str) -> PropResult<()>;

    /// All properties at `prefix` and below it.
    fn list(&self, prefix: &str) -> PropResult<Vec<(String, DavProp)>>;

    /// Apply a batch of writes, all or nothing.
    ///
    /// The default implementation applies the writes in order and
    /// puts the old values back if one of them fails.
    fn commit(&self, batch: Vec<PropWrite>) -> PropResult<()> {
        let mut undo: Vec<(String, String, String, Option<DavProp>)> = Vec::new();
        for w in batch {
            let (path, ns, name) = match &w {
                PropWrite::Set(path, prop) => (path.clone(), prop.ns().to_string(), prop.name.clone()),
                PropWrite::Delete(path, ns, name) => (path.clone(), ns.clone(), name.clone()),
            };
            let res = self.get(&path, &ns, &name).and_then(|old| {
                match w {
                    PropWrite::Set(path, prop) => self.set(&path, prop)?,
                    PropWrite::Delete(path, ns, name) => self.delete(&path, &ns, &name)?,
                }
                Ok(old)
            });
            match res {
                Ok(old) => undo.push((path, ns, name, old)),
                Err(e) => {
                    for (path, ns, name, old) in undo.into_iter().rev() {
                        let r = match old {
                            Some(prop) => self.set(&path, prop),
                            None => self.delete(&path, &ns, &name),
                        };
                        if let Err(e) = r {
                            error!("property rollback failed for {path}: {e}");
                        }
                    }
                    return Err(e);
                }
            }
        }
        Ok(())
    }
}

/// What a PROPFIND asks for.
#[derive(Debug, Clone)]
pub enum PropRequest {
    /// All properties, plus the listed extra ones.
    AllProp(Vec<Element>),
    /// Names only.
    PropName,
    /// These properties.
    Prop(Vec<Element>),
}

/// One PROPPATCH operation.
#[derive(Debug, Clone)]
pub struct PatchOp {
    /// `set` or `remove`.
    pub set: bool,
    /// The property. For `set` this includes the new value.
    pub prop: Element,
}

/// Overlays live properties on a dead-property store.
#[derive(Debug)]
pub struct PropManager {
    store: Arc<dyn DavPropStore>,
    live: LiveProps,
    patch_lock: Mutex<()>,
}

impl PropManager {
    pub fn new(store: Arc<dyn DavPropStore>, live: LiveProps) -> PropManager {
        PropManager {
            store,
            live,
            patch_lock: Mutex::new(()),
        }
    }

    /// The live property registry.
    pub fn live(&self) -> &LiveProps {
        &self.live
    }

    fn dead_props(&self, path: &str) -> PropResult<Vec<DavProp>> {
        Ok(self
            .store
            .list(path)?
            .into_iter()
            .filter(|(p, _)| p == path)
            .map(|(_, prop)| prop)
            .collect())
    }

    /// Resolve the properties of one resource.
    ///
    /// Returns `(status, element)` pairs. Names that are not found, or
    /// do not apply to this resource, come back as 404 with an empty
    /// element.
    pub fn get_properties(
        &self,
        ctx: &LiveContext,
        req: &PropRequest,
    ) -> PropResult<Vec<(StatusCode, Element)>> {
        let mut res = Vec::new();
        match req {
            PropRequest::PropName => {
                for lp in self.live.iter() {
                    if let Some(e) = (lp.func)(ctx) {
                        res.push((StatusCode::OK, e.name_only()));
                    }
                }
                for prop in self.dead_props(ctx.path.as_str())? {
                    res.push((StatusCode::OK, prop.name_element()));
                }
            }
            PropRequest::AllProp(include) => {
                for lp in self.live.iter() {
                    if let Some(e) = (lp.func)(ctx) {
                        res.push((StatusCode::OK, e));
                    }
                }
                for prop in self.dead_props(ctx.path.as_str())? {
                    match prop.to_element() {
                        Some(e) => res.push((StatusCode::OK, e)),
                        None => res.push((StatusCode::INTERNAL_SERVER_ERROR, prop.name_element())),
                    }
                }
                // "include" only adds names we did not return yet.
                for name in include {
                    let seen = res
                        .iter()
                        .any(|(_, e)| e.name == name.name && e.ns() == name.ns());
                    if !seen {
                        res.push(self.get_one(ctx, name)?);
                    }
                }
            }
            PropRequest::Prop(names) => {
                for name in names {
                    res.push(self.get_one(ctx, name)?);
                }
            }
        }
        Ok(res)
    }

    fn get_one(&self, ctx: &LiveContext, name: &Element) -> PropResult<(StatusCode, Element)> {
        if let Some(lp) = self.live.get(name.ns(), &name.name) {
            return Ok(match (lp.func)(ctx) {
                Some(e) => (StatusCode::OK, e),
                None => (StatusCode::NOT_FOUND, name.name_only()),
            });
        }
        Ok(
            match self.store.get(ctx.path.as_str(), name.ns(), &name.name)? {
                Some(prop) => match prop.to_element() {
                    Some(e) => (StatusCode::OK, e),
                    None => (StatusCode::INTERNAL_SERVER_ERROR, name.name_only()),
                },
                None => (StatusCode::NOT_FOUND, name.name_only()),
            },
        )
    }

    /// Apply a PROPPATCH to one resource, all or nothing.
    ///
    /// If any operation touches a live property, that operation gets 403,
    /// the others 424, and nothing is stored.
    pub fn patch_properties(
        &self,
        path: &DavPath,
        ops: Vec<PatchOp>,
    ) -> PropResult<Vec<(StatusCode, Element)>> {
        let protected = ops
            .iter()
            .any(|op| self.live.is_live(op.prop.ns(), &op.prop.name));
        if protected {
            return Ok(ops
                .iter()
                .map(|op| {
                    let status = if self.live.is_live(op.prop.ns(), &op.prop.name) {
                        StatusCode::FORBIDDEN
                    } else {
                        StatusCode::FAILED_DEPENDENCY
                    };
                    (status, op.prop.name_only())
                })
                .collect());
        }

        let mut batch = Vec::with_capacity(ops.len());
        let mut res = Vec::with_capacity(ops.len());
        for op in ops {
            if op.set {
                batch.push(PropWrite::Set(
                    path.as_str().to_string(),
                    DavProp::from_element(&op.prop)?,
                ));
            } else {
                batch.push(PropWrite::Delete(
                    path.as_str().to_string(),
                    op.prop.ns().to_string(),
                    op.prop.name.clone(),
                ));
            }
            res.push((StatusCode::OK, op.prop.name_only()));
        }

        let _guard = self.patch_lock.lock();
        self.store.commit(batch)?;
        Ok(res)
    }

    /// Copy the dead properties of one resource.
    pub fn copy_properties(&self, src: &DavPath, dst: &DavPath, overwrite: bool) -> PropResult<()> {
        let _guard = self.patch_lock.lock();
        let existing = self.dead_props(dst.as_str())?;
        if !existing.is_empty() && !overwrite {
            return Err(PropError::Conflict);
        }
        let dst_path = dst.as_str().to_string();
        let mut batch: Vec<PropWrite> = existing
            .into_iter()
            .map(|p| PropWrite::Delete(dst_path.clone(), p.ns().to_string(), p.name))
            .collect();
        for prop in self.dead_props(src.as_str())? {
            batch.push(PropWrite::Set(dst_path.clone(), prop));
        }
        if batch.is_empty() {
            return Ok(());
        }
        self.store.commit(batch)
    }

    /// Move the dead properties of a resource and everything below it.
    pub fn move_properties(&self, src: &DavPath, dst: &DavPath) -> PropResult<()> {
        let _guard = self.patch_lock.lock();
        let mut batch = Vec::new();
        for (path, prop) in self.store.list(src.as_str())? {
            let newpath = match rebase_str(&path, src.as_str(), dst.as_str()) {
                Some(p) => p,
                None => continue,
            };
            batch.push(PropWrite::Delete(path, prop.ns().to_string(), prop.name.clone()));
            batch.push(PropWrite::Set(newpath, prop));
        }
        if batch.is_empty() {
            return Ok(());
        }
        self.store.commit(batch)
    }

    /// Remove the dead properties of a resource and everything below it.
    pub fn remove_properties(&self, path: &DavPath) -> PropResult<()> {
        let _guard = self.patch_lock.lock();
        let batch: Vec<PropWrite> = self
            .store
            .list(path.as_str())?
            .into_iter()
            .map(|(p, prop)| PropWrite::Delete(p, prop.ns().to_string(), prop.name))
            .collect();
        if batch.is_empty() {
            return Ok(());
        }
        self.store.commit(batch)
    }
}

// "/a/b/c" rebased from "/a" to "/x" is "/x/b/c".
fn rebase_str(path: &str, from: &str, to: &str) -> Option<String> {
    if !is_ancestor_or_self(from, path) {
        return None;
    }
    let rest = if from == "/" { path } else { &path[from.len()..] };
    let rest = rest.trim_start_matches('/');
    if rest.is_empty() {
        return Some(to.to_string());
    }
    if to == "/" {
        Some(format!("/{rest}"))
    } else {
        Some(format!("{to}/{rest}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::{DavMetaData, FsResult};
    use crate::props::memps::MemPs;
    use std::time::SystemTime;

    #[derive(Debug)]
    struct Meta;

    impl DavMetaData for Meta {
        fn len(&self) -> u64 {
            4
        }
        fn modified(&self) -> FsResult<SystemTime> {
            Ok(SystemTime::UNIX_EPOCH)
        }
        fn is_dir(&self) -> bool {
            false
        }
    }

    fn manager() -> PropManager {
        PropManager::new(MemPs::new(), LiveProps::default())
    }

    fn elem(src: &str) -> Element {
        Element::parse2(src.as_bytes()).unwrap()
    }

    fn author(v: &str) -> Element {
        elem(&format!(r#"<Z:author xmlns:Z="urn:example">{v}</Z:author>"#))
    }

    fn get_author(pm: &PropManager, path: &DavPath) -> (StatusCode, Option<String>) {
        let meta = Meta;
        let ctx = LiveContext {
            path,
            meta: &meta,
            locks: &[],
        };
        let req = PropRequest::Prop(vec![author("").name_only()]);
        let (st, e) = pm.get_properties(&ctx, &req).unwrap().remove(0);
        (st, e.get_text().map(|t| t.to_string()))
    }

    #[test]
    fn set_then_get_dead_property() {
        let pm = manager();
        let path = DavPath::new("/a.txt").unwrap();
        let res = pm
            .patch_properties(
                &path,
                vec![PatchOp {
                    set: true,
                    prop: author("Ann"),
                }],
            )
            .unwrap();
        assert_eq!(res[0].0, StatusCode::OK);
        assert_eq!(get_author(&pm, &path), (StatusCode::OK, Some("Ann".into())));
    }

    #[test]
    fn missing_and_live_names() {
        let pm = manager();
        let path = DavPath::new("/a.txt").unwrap();
        let meta = Meta;
        let ctx = LiveContext {
            path: &path,
            meta: &meta,
            locks: &[],
        };
        let req = PropRequest::Prop(vec![
            Element::new2("D:getcontentlength"),
            Element::new2("D:nosuchprop"),
        ]);
        let res = pm.get_properties(&ctx, &req).unwrap();
        assert_eq!(res[0].0, StatusCode::OK);
        assert_eq!(res[0].1.get_text().unwrap(), "4");
        assert_eq!(res[1].0, StatusCode::NOT_FOUND);
    }

    #[test]
    fn patch_with_protected_property_stores_nothing() {
        let pm = manager();
        let path = DavPath::new("/a.txt").unwrap();
        let res = pm
            .patch_properties(
                &path,
                vec![
                    PatchOp {
                        set: true,
                        prop: author("Ann"),
                    },
                    PatchOp {
                        set: true,
                        prop: Element::new_text("D:getetag", "\"x\""),
                    },
                ],
            )
            .unwrap();
        assert_eq!(res[0].0, StatusCode::FAILED_DEPENDENCY);
        assert_eq!(res[1].0, StatusCode::FORBIDDEN);
        assert_eq!(get_author(&pm, &path).0, StatusCode::NOT_FOUND);
    }

    #[test]
    fn copy_keeps_source_and_refuses_overwrite() {
        let pm = manager();
        let src = DavPath::new("/a.txt").unwrap();
        let dst = DavPath::new("/b.txt").unwrap();
        let set = |p: &DavPath, v: &str| {
            pm.patch_properties(
                p,
                vec![PatchOp {
                    set: true,
                    prop: author(v),
                }],
            )
            .unwrap();
        };
        set(&src, "Ann");
        pm.copy_properties(&src, &dst, false).unwrap();
        assert_eq!(get_author(&pm, &src).1.as_deref(), Some("Ann"));
        assert_eq!(get_author(&pm, &dst).1.as_deref(), Some("Ann"));

        set(&src, "Bob");
        assert_eq!(
            pm.copy_properties(&src, &dst, false).unwrap_err(),
            PropError::Conflict
        );
        pm.copy_properties(&src, &dst, true).unwrap();
        assert_eq!(get_author(&pm, &dst).1.as_deref(), Some("Bob"));
    }

    #[test]
    fn move_and_remove_subtree() {
        let pm = manager();
        let a = DavPath::new("/dir/a.txt").unwrap();
        let other = DavPath::new("/dir2/x.txt").unwrap();
        for p in [&a, &other] {
            pm.patch_properties(
                p,
                vec![PatchOp {
                    set: true,
                    prop: author("Ann"),
                }],
            )
            .unwrap();
        }
        pm.move_properties(&DavPath::new("/dir").unwrap(), &DavPath::new("/new").unwrap())
            .unwrap();
        assert_eq!(get_author(&pm, &a).0, StatusCode::NOT_FOUND);
        let moved = DavPath::new("/new/a.txt").unwrap();
        assert_eq!(get_author(&pm, &moved).0, StatusCode::OK);
        // a sibling with a common name prefix is untouched.
        assert_eq!(get_author(&pm, &other).0, StatusCode::OK);

        pm.remove_properties(&DavPath::new("/new").unwrap()).unwrap();
        pm.remove_properties(&DavPath::new("/new").unwrap()).unwrap();
        assert_eq!(get_author(&pm, &moved).0, StatusCode::NOT_FOUND);
    }

    // A store without its own commit, that refuses properties named "bad".
    #[derive(Debug)]
    struct Picky(Arc<MemPs>);

    impl DavPropStore for Picky {
        fn get(&self, path: &str, ns: &str, name: &str) -> PropResult<Option<DavProp>> {
            self.0.get(path, ns, name)
        }
        fn set(&self, path: &str, prop: DavProp) -> PropResult<()> {
            if prop.name == "bad" {
                return Err(PropError::Unavailable("refused".into()));
            }
            self.0.set(path, prop)
        }
        fn delete(&self, path: &str, ns: &str, name: &str) -> PropResult<()> {
            self.0.delete(path, ns, name)
        }
        fn list(&self, prefix: &str) -> PropResult<Vec<(String, DavProp)>> {
            self.0.list(prefix)
        }
    }

    #[test]
    fn default_commit_rolls_back() {
        let pm = PropManager::new(Arc::new(Picky(MemPs::new())), LiveProps::default());
        let path = DavPath::new("/a.txt").unwrap();
        pm.patch_properties(
            &path,
            vec![PatchOp {
                set: true,
                prop: author("Ann"),
            }],
        )
        .unwrap();
        let bad = elem(r#"<Z:bad xmlns:Z="urn:example">1</Z:bad>"#);
        let err = pm
            .patch_properties(
                &path,
                vec![
                    PatchOp {
                        set: true,
                        prop: author("Bob"),
                    },
                    PatchOp { set: true, prop: bad },
                ],
            )
            .unwrap_err();
        assert!(matches!(err, PropError::Unavailable(_)));
        assert_eq!(get_author(&pm, &path).1.as_deref(), Some("Ann"));
    }

    #[test]
    fn rebase_paths() {
        assert_eq!(rebase_str("/a/b", "/a", "/x").as_deref(), Some("/x/b"));
        assert_eq!(rebase_str("/a", "/a", "/x").as_deref(), Some("/x"));
        assert_eq!(rebase_str("/ab", "/a", "/x"), None);
        assert_eq!(rebase_str("/a/b", "/a", "/").as_deref(), Some("/b"));
    }
}
