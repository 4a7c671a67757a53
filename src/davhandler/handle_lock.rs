use headers::HeaderMapExt;
use http::{Request, Response, StatusCode};
use xmltree::Element;

use crate::body::Body;
use crate::conditional::if_match_get_tokens;
use crate::davheaders::{self, Depth};
use crate::davpath::DavPath;
use crate::errors::DavError;
use crate::fs::OpenOptions;
use crate::ls::{DavLock, LsError};
use crate::props::live::activelock_element;
use crate::util::dav_xml_error;
use crate::xmltree_ext::ElementExt;
use crate::DavResult;

// `<D:prop><D:lockdiscovery>` with just this lock.
fn lock_response(lock: &DavLock, status: StatusCode) -> DavResult<Response<Body>> {
    let mut ld = Element::new2("D:lockdiscovery");
    ld.push_element(activelock_element(lock));
    let mut prop = Element::new2("D:prop");
    prop.push_element(ld);

    let mut res = Response::new(Body::from(prop.to_document()?));
    *res.status_mut() = status;
    res.headers_mut().typed_insert(headers::ContentType::xml());
    Ok(res)
}

// what a `<D:lockinfo>` asks for: (shared, owner).
fn parse_lockinfo(xmldata: &[u8]) -> DavResult<(bool, Option<Element>)> {
    let tree = Element::parse2(xmldata)?;
    if !tree.is_dav("lockinfo") {
        return Err(DavError::XmlParseError);
    }

    let mut shared = None;
    let mut write = false;
    let mut owner = None;
    for elem in tree.child_elems_into_iter() {
        if elem.ns() != crate::xmltree_ext::DAV_NS {
            continue;
        }
        let name = elem.name.clone();
        match name.as_str() {
            "lockscope" => {
                let scope = elem.child_elems_iter().next().ok_or(DavError::XmlParseError)?;
                shared = match (scope.is_dav("exclusive"), scope.is_dav("shared")) {
                    (true, _) => Some(false),
                    (_, true) => Some(true),
                    _ => return Err(DavError::XmlParseError),
                };
            }
            "locktype" => {
                let ltype = elem.child_elems_iter().next().ok_or(DavError::XmlParseError)?;
                if !ltype.is_dav("write") {
                    return Err(DavError::XmlParseError);
                }
                write = true;
            }
            "owner" => owner = Some(elem),
            _ => {}
        }
    }
    match (shared, write) {
        (Some(shared), true) => Ok((shared, owner)),
        _ => Err(DavError::XmlParseError),
    }
}

impl crate::DavHandler {
    pub(crate) async fn handle_lock(&self, req: &Request<()>, xmldata: &[u8]) -> DavResult<Response<Body>> {
        let mut path = self.path(req)?;
        let meta = self.fs.metadata(&path).await.ok();
        if let Some(ref m) = meta {
            path.add_slash_if(m.is_dir());
        }
        let timeout = self.timeout(req)?;

        if xmldata.is_empty() {
            return self.refresh_lock(req, &path, timeout);
        }

        let (shared, owner) = parse_lockinfo(xmldata)?;
        let deep = match self.depth(req, Depth::Infinity)? {
            Depth::Zero => false,
            Depth::Infinity => true,
            Depth::One => return Err(StatusCode::BAD_REQUEST.into()),
        };

        let tokens = if_match_get_tokens(req, meta.as_deref(), &*self.fs, &*self.ls, &path).await?;
        if meta.is_none() {
            if !self.has_parent(&path).await {
                return Err(StatusCode::CONFLICT.into());
            }
            // creating the member changes the parent collection.
            self.check_locked(&path.parent(), &tokens)?;
        }

        let lock = match self.ls.lock(&path, self.principal(), owner.as_ref(), timeout, shared, deep) {
            Ok(lock) => lock,
            Err(conflict) => {
                debug!("lock {}: conflicts with {}", path, conflict.path);
                let body = dav_xml_error(
                    "D:no-conflicting-lock",
                    Some(conflict.path.as_url_string_with_prefix()),
                )?;
                let mut res = Response::new(body);
                *res.status_mut() = StatusCode::LOCKED;
                res.headers_mut().typed_insert(headers::ContentType::xml());
                return Ok(res);
            }
        };

        // locking an unmapped url creates an empty resource.
        let mut status = StatusCode::OK;
        if meta.is_none() {
            let mut oo = OpenOptions::write();
            oo.create = true;
            if let Err(e) = self.fs.open(&path, oo).await {
                let _ = self.ls.unlock(&path, self.principal(), &lock.token);
                return Err(e.into());
            }
            status = StatusCode::CREATED;
        }

        let mut res = lock_response(&lock, status)?;
        res.headers_mut()
            .typed_insert(davheaders::LockToken(lock.token.clone()));
        Ok(res)
    }

    // LOCK without a body: refresh the lock named in the If: header.
    fn refresh_lock(
        &self,
        req: &Request<()>,
        path: &DavPath,
        timeout: Option<std::time::Duration>,
    ) -> DavResult<Response<Body>> {
        let ifh = match req.headers().typed_try_get::<davheaders::If>() {
            Ok(Some(ifh)) => ifh,
            _ => return Err(StatusCode::BAD_REQUEST.into()),
        };
        let mut seen = false;
        for token in ifh.tokens() {
            seen = true;
            if let Ok(lock) = self.ls.refresh(path, self.principal(), token, timeout) {
                return lock_response(&lock, StatusCode::OK);
            }
        }
        if !seen {
            return Err(StatusCode::BAD_REQUEST.into());
        }
        debug!("refresh {}: no matching lock", path);
        Err(StatusCode::PRECONDITION_FAILED.into())
    }

    pub(crate) async fn handle_unlock(&self, req: &Request<()>) -> DavResult<Response<Body>> {
        let path = self.path(req)?;
        let token = match req.headers().typed_get::<davheaders::LockToken>() {
            Some(t) => t.0,
            None => return Err(StatusCode::BAD_REQUEST.into()),
        };

        match self.ls.unlock(&path, self.principal(), &token) {
            Ok(()) => {
                let mut res = Response::new(Body::empty());
                *res.status_mut() = StatusCode::NO_CONTENT;
                Ok(res)
            }
            Err(LsError::NotOwner) => {
                debug!("unlock {} {}: not the owner", path, token);
                Err(StatusCode::FORBIDDEN.into())
            }
            Err(e) => {
                debug!("unlock {} {}: {}", path, token, e);
                let mut res = Response::new(dav_xml_error("D:lock-token-matches-request-uri", None)?);
                *res.status_mut() = StatusCode::CONFLICT;
                res.headers_mut().typed_insert(headers::ContentType::xml());
                Ok(res)
            }
        }
    }
}
