//! Live properties: computed from the resource on every request and
//! never stored. They are protected; PROPPATCH cannot touch them.
use std::fmt;
use std::time::SystemTime;

use xmltree::Element;

use crate::davpath::DavPath;
use crate::fs::DavMetaData;
use crate::ls::DavLock;
use crate::util::{systemtime_to_httpdate, systemtime_to_rfc3339};
use crate::xmltree_ext::{ElementExt, DAV_NS};

/// Everything a live property can be computed from.
pub struct LiveContext<'a> {
    pub path: &'a DavPath,
    pub meta: &'a dyn DavMetaData,
    /// Locks that cover `path`.
    pub locks: &'a [DavLock],
}

/// Computes one live property. `None` means "does not apply to this
/// resource", which is reported as 404.
pub type LivePropFn = fn(&LiveContext) -> Option<Element>;

#[derive(Clone)]
pub(crate) struct LiveProp {
    pub ns: String,
    pub name: String,
    pub func: LivePropFn,
}

/// Registry of live properties, looked up by `(namespace, name)`.
#[derive(Clone)]
pub struct LiveProps {
    props: Vec<LiveProp>,
}

impl fmt::Debug for LiveProps {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_list()
            .entries(self.props.iter().map(|p| format!("{{{}}}{}", p.ns, p.name)))
            .finish()
    }
}

impl Default for LiveProps {
    /// The DAV: live properties of RFC4918.
    fn default() -> LiveProps {
        let mut lp = LiveProps::empty();
        lp.register(DAV_NS, "creationdate", creationdate);
        lp.register(DAV_NS, "getcontentlength", getcontentlength);
        lp.register(DAV_NS, "getcontenttype", getcontenttype);
        lp.register(DAV_NS, "getetag", getetag);
        lp.register(DAV_NS, "getlastmodified", getlastmodified);
        lp.register(DAV_NS, "resourcetype", resourcetype);
        lp.register(DAV_NS, "lockdiscovery", lockdiscovery);
        lp.register(DAV_NS, "supportedlock", supportedlock);
        lp
    }
}

impl LiveProps {
    /// A registry without any properties.
    pub fn empty() -> LiveProps {
        LiveProps { props: Vec::new() }
    }

    /// Add (or replace) a live property.
    pub fn register(&mut self, ns: &str, name: &str, func: LivePropFn) {
        self.props.retain(|p| !(p.ns == ns && p.name == name));
        self.props.push(LiveProp {
            ns: ns.to_string(),
            name: name.to_string(),
            func,
        });
    }

    pub(crate) fn get(&self, ns: &str, name: &str) -> Option<&LiveProp> {
        self.props.iter().find(|p| p.ns == ns && p.name == name)
    }

    /// Is `(ns, name)` a live (protected) property.
    pub fn is_live(&self, ns: &str, name: &str) -> bool {
        self.get(ns, name).is_some()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &LiveProp> {
        self.props.iter()
    }
}

fn creationdate(ctx: &LiveContext) -> Option<Element> {
    let t = ctx.meta.created().or_else(|_| ctx.meta.modified()).ok()?;
    Some(Element::new_text("D:creationdate", systemtime_to_rfc3339(t)))
}

fn getcontentlength(ctx: &LiveContext) -> Option<Element> {
    if ctx.meta.is_dir() {
        return None;
    }
    Some(Element::new_text(
        "D:getcontentlength",
        ctx.meta.len().to_string(),
    ))
}

fn getcontenttype(ctx: &LiveContext) -> Option<Element> {
    if ctx.meta.is_dir() {
        return None;
    }
    Some(Element::new_text("D:getcontenttype", content_type(ctx.path)))
}

fn getetag(ctx: &LiveContext) -> Option<Element> {
    let tag = ctx.meta.etag()?;
    Some(Element::new_text("D:getetag", format!("\"{tag}\"")))
}

fn getlastmodified(ctx: &LiveContext) -> Option<Element> {
    let t = ctx.meta.modified().ok()?;
    Some(Element::new_text(
        "D:getlastmodified",
        systemtime_to_httpdate(t),
    ))
}

fn resourcetype(ctx: &LiveContext) -> Option<Element> {
    let mut e = Element::new2("D:resourcetype");
    if ctx.meta.is_dir() {
        e.push_element(Element::new2("D:collection"));
    }
    Some(e)
}

fn lockdiscovery(ctx: &LiveContext) -> Option<Element> {
    let mut e = Element::new2("D:lockdiscovery");
    for lock in ctx.locks {
        e.push_element(activelock_element(lock));
    }
    Some(e)
}

fn supportedlock(_ctx: &LiveContext) -> Option<Element> {
    let mut e = Element::new2("D:supportedlock");
    for scope in ["D:exclusive", "D:shared"] {
        let mut entry = Element::new2("D:lockentry");
        let mut lockscope = Element::new2("D:lockscope");
        lockscope.push_element(Element::new2(scope));
        entry.push_element(lockscope);
        let mut locktype = Element::new2("D:locktype");
        locktype.push_element(Element::new2("D:write"));
        entry.push_element(locktype);
        e.push_element(entry);
    }
    Some(e)
}

/// Content type guessed from the file name.
pub(crate) fn content_type(path: &DavPath) -> String {
    mime_guess::from_path(path.file_name())
        .first_or_octet_stream()
        .to_string()
}

/// The `<D:activelock>` element for a lock, as used in lockdiscovery
/// and in the LOCK response.
pub(crate) fn activelock_element(lock: &DavLock) -> Element {
    let mut actlock = Element::new2("D:activelock");

    let mut elem = Element::new2("D:lockscope");
    elem.push_element(match lock.shared {
        false => Element::new2("D:exclusive"),
        true => Element::new2("D:shared"),
    });
    actlock.push_element(elem);

    let mut elem = Element::new2("D:locktype");
    elem.push_element(Element::new2("D:write"));
    actlock.push_element(elem);

    actlock.push_element(Element::new_text(
        "D:depth",
        match lock.deep {
            false => "0",
            true => "infinity",
        },
    ));

    let timeout = match lock.remaining(SystemTime::now()) {
        None => "Infinite".to_string(),
        Some(d) => format!("Second-{}", d.as_secs()),
    };
    actlock.push_element(Element::new_text("D:timeout", timeout));

    let mut locktokenelem = Element::new2("D:locktoken");
    locktokenelem.push_element(Element::new_text("D:href", lock.token.clone()));
    actlock.push_element(locktokenelem);

    let mut lockroot = Element::new2("D:lockroot");
    lockroot.push_element(Element::new_text(
        "D:href",
        lock.path.as_url_string_with_prefix(),
    ));
    actlock.push_element(lockroot);

    if let Some(ref o) = lock.owner {
        actlock.push_element(o.clone());
    }

    actlock
}
