//! HTTP preconditions (If-Match and friends) and the WebDAV If: header.
use headers::HeaderMapExt;
use http::{Method, Request, StatusCode};

use crate::davheaders::{self, IfItem};
use crate::davpath::DavPath;
use crate::fs::{DavFileSystem, DavMetaData};
use crate::ls::DavLockSystem;

/// The etag of a resource as a typed header value.
pub(crate) fn typed_etag(meta: &dyn DavMetaData) -> Option<headers::ETag> {
    meta.etag()
        .and_then(|t| format!("\"{t}\"").parse::<headers::ETag>().ok())
}

// compare an etag from an If: header with the etag of the resource.
fn etag_matches(tag: &str, meta: &dyn DavMetaData) -> bool {
    let want = tag.trim_start_matches("W/").trim_matches('"');
    matches!(meta.etag(), Some(t) if t == want)
}

/// Evaluate the HTTP preconditions of RFC7232.
///
/// Returns the status to reply with if one of them fails. `meta` is
/// None if the resource does not exist.
pub(crate) fn http_if_match(req: &Request<()>, meta: Option<&dyn DavMetaData>) -> Option<StatusCode> {
    let etag = meta.and_then(typed_etag);
    let modified = meta.and_then(|m| m.modified().ok());
    let is_get = matches!(*req.method(), Method::GET | Method::HEAD);

    if let Some(im) = req.headers().typed_get::<headers::IfMatch>() {
        trace!("http_if_match: If-Match {:?}", im);
        let ok = match (&etag, meta) {
            (Some(e), _) => im.precondition_passes(e),
            (None, Some(_)) => im == headers::IfMatch::any(),
            (None, None) => false,
        };
        if !ok {
            return Some(StatusCode::PRECONDITION_FAILED);
        }
    } else if let Some(ius) = req.headers().typed_get::<headers::IfUnmodifiedSince>() {
        if let Some(m) = modified {
            if !ius.precondition_passes(m) {
                return Some(StatusCode::PRECONDITION_FAILED);
            }
        }
    }

    if let Some(inm) = req.headers().typed_get::<headers::IfNoneMatch>() {
        trace!("http_if_match: If-None-Match {:?}", inm);
        let failed = match (&etag, meta) {
            (Some(e), _) => !inm.precondition_passes(e),
            (None, Some(_)) => inm == headers::IfNoneMatch::any(),
            (None, None) => false,
        };
        if failed {
            return Some(if is_get {
                StatusCode::NOT_MODIFIED
            } else {
                StatusCode::PRECONDITION_FAILED
            });
        }
    } else if is_get {
        if let Some(ims) = req.headers().typed_get::<headers::IfModifiedSince>() {
            if let Some(m) = modified {
                if !ims.is_modified(m) {
                    return Some(StatusCode::NOT_MODIFIED);
                }
            }
        }
    }
    None
}

// resolve the resource tag of a tagged list.
fn resource_path(tag: &str, prefix: &str) -> Option<DavPath> {
    let path = match url::Url::parse(tag) {
        Ok(url) => url.path().to_string(),
        Err(_) => tag.to_string(),
    };
    DavPath::from_str_and_prefix(&path, prefix).ok()
}

/// Evaluate the If: header.
///
/// Returns whether it matched, and all state tokens it contains (the
/// "submitted" lock tokens). No header is a match without tokens.
/// A token matches only if a live lock with that token covers the
/// resource, so an expired token counts as absent.
pub(crate) async fn dav_if_match<'a>(
    req: &'a Request<()>,
    fs: &'a dyn DavFileSystem,
    ls: &'a dyn DavLockSystem,
    path: &'a DavPath,
) -> Result<(bool, Vec<String>), StatusCode> {
    let r = match req.headers().typed_try_get::<davheaders::If>() {
        Ok(Some(r)) => r,
        Ok(None) => return Ok((true, Vec::new())),
        Err(_) => return Err(StatusCode::BAD_REQUEST),
    };
    let tokens: Vec<String> = r.tokens().map(|t| t.to_string()).collect();

    for list in &r.0 {
        let rpath = match list.resource_tag {
            Some(ref tag) => match resource_path(tag, path.prefix()) {
                Some(p) => p,
                None => continue,
            },
            None => path.clone(),
        };
        let meta = fs.metadata(&rpath).await.ok();
        let locks = ls.discover(&rpath);

        let list_ok = list.conditions.iter().all(|c| {
            let found = match c.item {
                IfItem::StateToken(ref t) => locks.iter().any(|l| &l.token == t),
                IfItem::ETag(ref t) => meta.as_deref().map_or(false, |m| etag_matches(t, m)),
            };
            found != c.not
        });
        if list_ok {
            trace!("dav_if_match: list {:?} matched", list);
            return Ok((true, tokens));
        }
    }
    debug!("dav_if_match: no list matched for {}", path);
    Ok((false, tokens))
}

/// Run both the HTTP and the WebDAV preconditions, and return the
/// submitted lock tokens.
pub(crate) async fn if_match_get_tokens<'a>(
    req: &'a Request<()>,
    meta: Option<&'a dyn DavMetaData>,
    fs: &'a dyn DavFileSystem,
    ls: &'a dyn DavLockSystem,
    path: &'a DavPath,
) -> Result<Vec<String>, StatusCode> {
    if let Some(s) = http_if_match(req, meta) {
        return Err(s);
    }
    match dav_if_match(req, fs, ls, path).await? {
        (true, tokens) => Ok(tokens),
        (false, _) => Err(StatusCode::PRECONDITION_FAILED),
    }
}
