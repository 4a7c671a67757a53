//
// This module contains the main entry point of the library,
// DavHandler.
//
use std::error::Error as StdError;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use bytes::Buf;
use headers::HeaderMapExt;
use http::{Request, Response, StatusCode};
use http_body::Body as HttpBody;

use crate::body::Body;
use crate::davheaders::{self, DavTimeout, Depth};
use crate::davpath::{DavPath, ParseError};
use crate::ls::memls::MemLs;
use crate::props::memps::MemPs;
use crate::props::{DavPropStore, LivePropFn, LiveProps, PropManager};
use crate::util::{dav_method, DavMethod, DavMethodSet};

use crate::errors::DavError;
use crate::fs::*;
use crate::ls::*;
use crate::DavResult;

mod handle_copymove;
mod handle_delete;
mod handle_gethead;
mod handle_lock;
mod handle_mkcol;
mod handle_options;
mod handle_props;
mod handle_put;

#[cfg(all(test, feature = "memfs"))]
mod tests;

const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(600);
const DEFAULT_MAX_LOCK_TIMEOUT: Duration = Duration::from_secs(3600);
const DEFAULT_MAX_BODY_SIZE: usize = 65536;

/// Configuration of the handler.
#[derive(Clone)]
pub struct DavBuilder {
    /// Prefix to be stripped off when handling request.
    prefix: String,
    /// Filesystem backend.
    fs: FileSystem,
    /// Locksystem backend.
    ls: Option<LockSystem>,
    /// Dead property backend.
    ps: Option<PropStore>,
    /// Set of allowed methods (Defaults to "all methods")
    allow: DavMethodSet,
    /// Principal is webdav speak for "user", used to give locks an owner.
    principal: Option<String>,
    /// Lock timeout granted for "Infinite" or no Timeout header.
    lock_timeout: Duration,
    /// Upper bound for a requested lock timeout.
    max_lock_timeout: Duration,
    /// Max size of an XML request body.
    max_body_size: usize,
    /// Live property registry.
    live: LiveProps,
}

/// File system backend.
#[derive(Clone)]
pub enum FileSystem {
    #[cfg(any(docsrs, feature = "memfs"))]
    Mem,
    Custom(Arc<dyn DavFileSystem>),
}

impl FileSystem {
    fn build(self) -> Arc<dyn DavFileSystem> {
        match self {
            #[cfg(any(docsrs, feature = "memfs"))]
            FileSystem::Mem => crate::fs::memfs::MemFs::new(),
            FileSystem::Custom(fs) => fs,
        }
    }
}

/// Lock system backend.
#[derive(Default, Clone)]
pub enum LockSystem {
    #[default]
    Mem,
    Custom(Arc<dyn DavLockSystem>),
}

impl LockSystem {
    fn build(self) -> Arc<dyn DavLockSystem> {
        match self {
            LockSystem::Mem => MemLs::new(),
            LockSystem::Custom(ls) => ls,
        }
    }
}

/// Dead property backend.
#[derive(Default, Clone)]
pub enum PropStore {
    #[default]
    Mem,
    Custom(Arc<dyn DavPropStore>),
}

impl PropStore {
    fn build(self) -> Arc<dyn DavPropStore> {
        match self {
            PropStore::Mem => MemPs::new(),
            PropStore::Custom(ps) => ps,
        }
    }
}

impl DavBuilder {
    /// Create a new configuration builder.
    pub fn new(fs: FileSystem) -> DavBuilder {
        Self {
            prefix: String::new(),
            fs,
            ls: None,
            ps: None,
            allow: DavMethodSet::all(),
            principal: None,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            max_lock_timeout: DEFAULT_MAX_LOCK_TIMEOUT,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            live: LiveProps::default(),
        }
    }

    /// Use the configuration that was built to generate a DavHandler.
    pub fn build(self) -> DavHandler {
        self.into()
    }

    /// Prefix to be stripped off before translating the rest of
    /// the request path to a resource path.
    pub fn strip_prefix(self, prefix: impl Into<String>) -> Self {
        let mut this = self;
        this.prefix = prefix.into();
        this
    }

    /// Set the locksystem to use (default is `LockSystem::Mem`).
    pub fn locksystem(self, ls: LockSystem) -> Self {
        let mut this = self;
        this.ls = Some(ls);
        this
    }

    /// Set the dead property store to use (default is `PropStore::Mem`).
    pub fn propstore(self, ps: PropStore) -> Self {
        let mut this = self;
        this.ps = Some(ps);
        this
    }

    /// Which methods to allow (default is all methods).
    pub fn methods(self, allow: DavMethodSet) -> Self {
        let mut this = self;
        this.allow = allow;
        this
    }

    /// Set the name of the "webdav principal". This will be the owner of any created locks.
    pub fn principal(self, principal: impl Into<String>) -> Self {
        let mut this = self;
        this.principal = Some(principal.into());
        this
    }

    /// Timeout for locks that ask for "Infinite", or for nothing at all.
    pub fn lock_timeout(self, timeout: Duration) -> Self {
        let mut this = self;
        this.lock_timeout = timeout;
        this
    }

    /// Requested lock timeouts are clamped to this value.
    pub fn max_lock_timeout(self, timeout: Duration) -> Self {
        let mut this = self;
        this.max_lock_timeout = timeout;
        this
    }

    /// Max size of the XML body of PROPFIND, PROPPATCH and LOCK.
    pub fn max_body_size(self, size: usize) -> Self {
        let mut this = self;
        this.max_body_size = size;
        this
    }

    /// Add (or replace) a live property.
    pub fn live_property(self, ns: &str, name: &str, func: LivePropFn) -> Self {
        let mut this = self;
        this.live.register(ns, name, func);
        this
    }
}

/// The webdav handler struct.
///
/// The `new` and `build` etc methods are used to instantiate a handler.
///
/// The `handle` and `handle_with` methods are the methods that do the actual work.
#[derive(Clone)]
pub struct DavHandler {
    pub(crate) prefix: Arc<String>,
    pub(crate) fs: Arc<dyn DavFileSystem>,
    pub(crate) ls: Arc<dyn DavLockSystem>,
    pub(crate) props: Arc<PropManager>,
    pub(crate) allow: DavMethodSet,
    pub(crate) principal: Option<Arc<String>>,
    // serializes lock checks and the mutations that depend on them.
    pub(crate) gate: Arc<tokio::sync::Mutex<()>>,
    pub(crate) lock_timeout: Duration,
    pub(crate) max_lock_timeout: Duration,
    pub(crate) max_body_size: usize,
}

impl From<DavBuilder> for DavHandler {
    fn from(cfg: DavBuilder) -> Self {
        let store = cfg.ps.unwrap_or_default().build();
        Self {
            prefix: Arc::new(cfg.prefix),
            fs: cfg.fs.build(),
            ls: cfg.ls.unwrap_or_default().build(),
            props: Arc::new(PropManager::new(store, cfg.live)),
            allow: cfg.allow,
            principal: cfg.principal.map(Arc::new),
            gate: Arc::new(tokio::sync::Mutex::new(())),
            lock_timeout: cfg.lock_timeout,
            max_lock_timeout: cfg.max_lock_timeout,
            max_body_size: cfg.max_body_size,
        }
    }
}

impl DavHandler {
    /// Return a configuration builder.
    pub fn builder(fs: FileSystem) -> DavBuilder {
        DavBuilder::new(fs)
    }

    /// Handle a webdav request.
    pub async fn handle<ReqBody, ReqData, ReqError>(&self, req: Request<ReqBody>) -> Response<Body>
    where
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
        ReqBody: HttpBody<Data = ReqData, Error = ReqError>,
    {
        self.handle_inner(req).await
    }

    /// Handle a webdav request, overriding parts of the config.
    ///
    /// For example, the `principal` can be set for this request.
    pub async fn handle_with<ReqBody, ReqData, ReqError>(
        &self,
        req: Request<ReqBody>,
        prefix: Option<String>,
        principal: Option<String>,
    ) -> Response<Body>
    where
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
        ReqBody: HttpBody<Data = ReqData, Error = ReqError>,
    {
        let mut this = self.clone();
        if let Some(prefix) = prefix {
            this.prefix = Arc::new(format!(
                "{}/{}",
                this.prefix.strip_suffix('/').unwrap_or(&this.prefix),
                prefix.strip_prefix('/').unwrap_or(&prefix)
            ));
        }
        if let Some(principal) = principal {
            this.principal = Some(Arc::new(principal));
        }
        this.handle_inner(req).await
    }

}

impl DavHandler {
    // helper.
    pub(crate) async fn has_parent<'a>(&'a self, path: &'a DavPath) -> bool {
        let p = path.parent();
        self.fs
            .metadata(&p)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }

    // helper.
    pub(crate) fn path(&self, req: &Request<()>) -> DavResult<DavPath> {
        Ok(DavPath::from_uri_and_prefix(req.uri(), &self.prefix)?)
    }

    // helper.
    pub(crate) fn principal(&self) -> Option<&str> {
        self.principal.as_ref().map(|p| p.as_str())
    }

    // Depth: header, or `default` if there is none.
    pub(crate) fn depth(&self, req: &Request<()>, default: Depth) -> DavResult<Depth> {
        match req.headers().typed_try_get::<Depth>() {
            Ok(Some(d)) => Ok(d),
            Ok(None) => Ok(default),
            Err(_) => Err(StatusCode::BAD_REQUEST.into()),
        }
    }

    // Overwrite: header, `T` if there is none.
    pub(crate) fn overwrite(&self, req: &Request<()>) -> DavResult<bool> {
        match req.headers().typed_try_get::<davheaders::Overwrite>() {
            Ok(Some(o)) => Ok(o.0),
            Ok(None) => Ok(true),
            Err(_) => Err(StatusCode::BAD_REQUEST.into()),
        }
    }

    // The first Timeout: candidate, clamped.
    pub(crate) fn timeout(&self, req: &Request<()>) -> DavResult<Option<Duration>> {
        let first = match req.headers().typed_try_get::<davheaders::Timeout>() {
            Ok(Some(t)) => t.0.first().copied(),
            Ok(None) => None,
            Err(_) => return Err(StatusCode::BAD_REQUEST.into()),
        };
        Ok(Some(match first {
            Some(DavTimeout::Seconds(n)) => Duration::from_secs(n as u64).min(self.max_lock_timeout),
            Some(DavTimeout::Infinite) | None => self.lock_timeout,
        }))
    }

    // Is `path` itself (not its members) locked by someone else.
    pub(crate) fn check_locked(&self, path: &DavPath, tokens: &[String]) -> DavResult<()> {
        match self.ls.check(path, self.principal(), false, false, tokens) {
            Ok(()) => Ok(()),
            Err(locks) => {
                debug!("{}: {} lock(s) not held", path, locks.len());
                Err(StatusCode::LOCKED.into())
            }
        }
    }

    // Roots of the locks strictly below `path` that we do not hold.
    // A lock that covers `path` itself is a 423 for the whole request.
    pub(crate) fn locked_below(&self, path: &DavPath, tokens: &[String]) -> DavResult<Vec<DavPath>> {
        let locks = match self.ls.check(path, self.principal(), false, true, tokens) {
            Ok(()) => return Ok(Vec::new()),
            Err(locks) => locks,
        };
        if locks.iter().any(|l| l.covers(path)) {
            return Err(StatusCode::LOCKED.into());
        }
        let mut roots: Vec<DavPath> = locks.into_iter().map(|l| l.path).collect();
        roots.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        roots.dedup();
        let mut res: Vec<DavPath> = Vec::new();
        for r in roots {
            if !res.iter().any(|p| p.is_ancestor_or_self(&r)) {
                res.push(r);
            }
        }
        Ok(res)
    }

    // Destination: header, as a path on this store.
    pub(crate) fn destination(&self, req: &Request<()>) -> DavResult<DavPath> {
        let dest = match req.headers().typed_try_get::<davheaders::Destination>() {
            Ok(Some(d)) => d.0,
            _ => return Err(StatusCode::BAD_REQUEST.into()),
        };
        let path = if dest.starts_with('/') {
            dest
        } else {
            let url = url::Url::parse(&dest).map_err(|_| DavError::Status(StatusCode::BAD_REQUEST))?;
            // (host, port) the request was sent to. No port means the
            // default port of the scheme.
            let req_host = match req.headers().typed_get::<headers::Host>() {
                Some(h) => Some((h.hostname().to_string(), h.port())),
                None => req.uri().host().map(|h| (h.to_string(), req.uri().port_u16())),
            };
            if let (Some(host), Some((req_host, req_port))) = (url.host_str(), req_host) {
                let same_port = match req_port {
                    Some(p) => url.port_or_known_default() == Some(p),
                    None => url.port().is_none(),
                };
                if !host.eq_ignore_ascii_case(&req_host) || !same_port {
                    debug!("destination {} is on another host", dest);
                    return Err(DavError::CrossStore);
                }
            }
            url.path().to_string()
        };
        DavPath::from_str_and_prefix(&path, &self.prefix).map_err(|e| match e {
            ParseError::PrefixMismatch => DavError::CrossStore,
            e => e.into(),
        })
    }

    // drain request body and return it.
    pub(crate) async fn read_request<ReqBody, ReqData, ReqError>(
        &self,
        body: ReqBody,
        max_size: usize,
    ) -> DavResult<Vec<u8>>
    where
        ReqBody: HttpBody<Data = ReqData, Error = ReqError>,
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
    {
        let mut data = Vec::new();
        pin_utils::pin_mut!(body);
        while let Some(res) = body.data().await {
            let mut buf = res.map_err(|_| {
                DavError::IoError(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "UnexpectedEof",
                ))
            })?;
            while buf.has_remaining() {
                if data.len() + buf.remaining() > max_size {
                    return Err(StatusCode::PAYLOAD_TOO_LARGE.into());
                }
                let b = buf.chunk();
                let l = b.len();
                data.extend_from_slice(b);
                buf.advance(l);
            }
        }
        Ok(data)
    }

    // internal dispatcher.
    async fn handle_inner<ReqBody, ReqData, ReqError>(
        &self,
        req: Request<ReqBody>,
    ) -> Response<Body>
    where
        ReqBody: HttpBody<Data = ReqData, Error = ReqError>,
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
    {
        // Turn any DavError results into a HTTP error response.
        match self.handle2(req).await {
            Ok(resp) => {
                debug!("== END REQUEST result {}", resp.status());
                resp
            }
            Err(err) => {
                debug!("== END REQUEST result {:?}", err);
                let mut resp = Response::new(Body::empty());
                *resp.status_mut() = err.statuscode();
                resp.headers_mut().typed_insert(headers::ContentLength(0));
                if err.must_close() {
                    resp.headers_mut()
                        .typed_insert(headers::Connection::close());
                }
                resp
            }
        }
    }

    // internal dispatcher part 2.
    async fn handle2<ReqBody, ReqData, ReqError>(
        &self,
        req: Request<ReqBody>,
    ) -> DavResult<Response<Body>>
    where
        ReqBody: HttpBody<Data = ReqData, Error = ReqError>,
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
    {
        let (req, body) = {
            let (parts, body) = req.into_parts();
            (Request::from_parts(parts, ()), body)
        };

        // translate HTTP method to Webdav method.
        let method = match dav_method(req.method()) {
            Ok(m) => m,
            Err(e) => {
                debug!("refusing method {} request {}", req.method(), req.uri());
                return Err(e);
            }
        };

        // see if method is allowed.
        if !self.allow.contains_method(method) {
            debug!(
                "method {} not allowed on request {}",
                req.method(),
                req.uri()
            );
            return Err(DavError::StatusClose(StatusCode::METHOD_NOT_ALLOWED));
        }

        // make sure the request path is valid.
        let path = self.path(&req)?;

        // PUT is the only handler that reads the body itself. All the
        // other handlers either expected no body, or a pre-read Vec<u8>.
        let (body_strm, body_data) = match method {
            DavMethod::Put => (Some(body), Vec::new()),
            _ => (None, self.read_request(body, self.max_body_size).await?),
        };

        // Not all methods accept a body.
        match method {
            DavMethod::Put | DavMethod::PropFind | DavMethod::PropPatch | DavMethod::Lock => {}
            _ => {
                if !body_data.is_empty() {
                    return Err(StatusCode::UNSUPPORTED_MEDIA_TYPE.into());
                }
            }
        }

        debug!("== START REQUEST {:?} {}", method, path);

        // lock checks and the mutations that rely on them are serialized.
        let _gate = match method {
            DavMethod::Put
            | DavMethod::PropPatch
            | DavMethod::MkCol
            | DavMethod::Delete
            | DavMethod::Copy
            | DavMethod::Move
            | DavMethod::Lock
            | DavMethod::Unlock => Some(self.gate.lock().await),
            _ => None,
        };

        match (method, body_strm) {
            (DavMethod::Options, _) => self.handle_options(&req).await,
            (DavMethod::PropFind, _) => self.handle_propfind(&req, &body_data).await,
            (DavMethod::PropPatch, _) => self.handle_proppatch(&req, &body_data).await,
            (DavMethod::MkCol, _) => self.handle_mkcol(&req).await,
            (DavMethod::Delete, _) => self.handle_delete(&req).await,
            (DavMethod::Lock, _) => self.handle_lock(&req, &body_data).await,
            (DavMethod::Unlock, _) => self.handle_unlock(&req).await,
            (DavMethod::Head | DavMethod::Get, _) => self.handle_get(&req).await,
            (DavMethod::Copy | DavMethod::Move, _) => self.handle_copymove(&req, method).await,
            (DavMethod::Put, Some(body)) => self.handle_put(&req, body).await,
            (DavMethod::Put, None) => Err(StatusCode::INTERNAL_SERVER_ERROR.into()),
        }
    }
}
