use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use http::{Request, Response, StatusCode};
use xmltree::Element;

use crate::body::Body;
use crate::davpath::DavPath;
use crate::fs::memfs::MemFs;
use crate::fs::*;
use crate::props::memps::MemPs;
use crate::props::{DavProp, DavPropStore, LiveContext, PropError, PropResult};
use crate::xmltree_ext::ElementExt;
use crate::{DavHandler, DavMethodSet, FileSystem, PropStore};

const LOCKINFO_EXCL: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<D:lockinfo xmlns:D="DAV:">
  <D:lockscope><D:exclusive/></D:lockscope>
  <D:locktype><D:write/></D:locktype>
  <D:owner>litmus</D:owner>
</D:lockinfo>"#;

const LOCKINFO_SHARED: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<D:lockinfo xmlns:D="DAV:">
  <D:lockscope><D:shared/></D:lockscope>
  <D:locktype><D:write/></D:locktype>
</D:lockinfo>"#;

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn handler() -> DavHandler {
    init();
    DavHandler::builder(FileSystem::Mem).build()
}

async fn call(dav: &DavHandler, method: &str, uri: &str, headers: &[(&str, &str)], body: &str) -> Response<Body> {
    let mut b = Request::builder().method(method).uri(uri);
    for (k, v) in headers {
        b = b.header(*k, *v);
    }
    dav.handle(b.body(Body::from(body.as_bytes().to_vec())).unwrap()).await
}

// the same request, made by `who`.
async fn call_as(
    dav: &DavHandler,
    who: &str,
    method: &str,
    uri: &str,
    headers: &[(&str, &str)],
    body: &str,
) -> Response<Body> {
    let mut b = Request::builder().method(method).uri(uri);
    for (k, v) in headers {
        b = b.header(*k, *v);
    }
    let req = b.body(Body::from(body.as_bytes().to_vec())).unwrap();
    dav.handle_with(req, None, Some(who.to_string())).await
}

async fn status(dav: &DavHandler, method: &str, uri: &str, headers: &[(&str, &str)], body: &str) -> StatusCode {
    call(dav, method, uri, headers, body).await.status()
}

async fn body_string(res: Response<Body>) -> String {
    let body = res.into_body();
    futures_util::pin_mut!(body);
    let mut v = Vec::new();
    while let Some(b) = body.next().await {
        v.extend_from_slice(&b.unwrap());
    }
    String::from_utf8(v).unwrap()
}

fn lock_token(res: &Response<Body>) -> String {
    let h = res.headers().get("lock-token").unwrap().to_str().unwrap();
    h.trim_start_matches('<').trim_end_matches('>').to_string()
}

// href -> <D:response> of a multistatus body.
fn responses(xml: &str) -> Vec<(String, Element)> {
    let doc = Element::parse2(xml.as_bytes()).unwrap();
    assert!(doc.is_dav("multistatus"));
    doc.child_elems_into_iter()
        .map(|r| {
            let href = r.get_child("href").unwrap().get_text().unwrap().to_string();
            (href, r)
        })
        .collect()
}

fn find<'a>(resps: &'a [(String, Element)], href: &str) -> &'a Element {
    &resps.iter().find(|(h, _)| h == href).unwrap().1
}

fn plain_status(resp: &Element) -> String {
    resp.get_child("status").unwrap().get_text().unwrap().to_string()
}

// (status line, property element) of a property in a <D:response>.
fn prop(resp: &Element, name: &str) -> Option<(String, Element)> {
    for ps in resp.child_elems_iter().filter(|e| e.name == "propstat") {
        let st = ps.get_child("status").unwrap().get_text().unwrap().to_string();
        if let Some(p) = ps.get_child("prop").unwrap().get_child(name) {
            return Some((st, p.clone()));
        }
    }
    None
}

async fn put(dav: &DavHandler, uri: &str, data: &str) {
    let st = status(dav, "PUT", uri, &[], data).await;
    assert!(st == StatusCode::CREATED || st == StatusCode::NO_CONTENT, "PUT {uri}: {st}");
}

async fn mkcol(dav: &DavHandler, uri: &str) {
    assert_eq!(status(dav, "MKCOL", uri, &[], "").await, StatusCode::CREATED, "MKCOL {uri}");
}

async fn set_author(dav: &DavHandler, uri: &str, who: &str) -> Response<Body> {
    let body = format!(
        r#"<D:propertyupdate xmlns:D="DAV:" xmlns:X="urn:x">
             <D:set><D:prop><X:author>{who}</X:author></D:prop></D:set>
           </D:propertyupdate>"#
    );
    call(dav, "PROPPATCH", uri, &[], &body).await
}

async fn get_author(dav: &DavHandler, uri: &str) -> Option<String> {
    let body = r#"<D:propfind xmlns:D="DAV:" xmlns:X="urn:x"><D:prop><X:author/></D:prop></D:propfind>"#;
    let res = call(dav, "PROPFIND", uri, &[("depth", "0")], body).await;
    assert_eq!(res.status(), StatusCode::MULTI_STATUS);
    let resps = responses(&body_string(res).await);
    let (st, e) = prop(&resps[0].1, "author")?;
    if st.contains("200") {
        e.get_text().map(|t| t.to_string())
    } else {
        None
    }
}

#[tokio::test]
async fn options() {
    let dav = handler();
    let res = call(&dav, "OPTIONS", "/", &[], "").await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers().get("dav").unwrap(), "1,2");
    let allow = res.headers().get("allow").unwrap().to_str().unwrap().to_string();
    assert!(allow.contains("PROPFIND"));
    assert!(allow.contains("LOCK"));
    assert!(!allow.contains("DELETE"));
}

#[tokio::test]
async fn put_get_head() {
    let dav = handler();
    mkcol(&dav, "/docs/").await;
    assert_eq!(status(&dav, "PUT", "/docs/a.txt", &[], "hello").await, StatusCode::CREATED);
    assert_eq!(status(&dav, "PUT", "/docs/a.txt", &[], "hello!").await, StatusCode::NO_CONTENT);

    let res = call(&dav, "GET", "/docs/a.txt", &[], "").await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers().get("content-type").unwrap(), "text/plain");
    let etag = res.headers().get("etag").unwrap().to_str().unwrap().to_string();
    assert_eq!(body_string(res).await, "hello!");

    let res = call(&dav, "HEAD", "/docs/a.txt", &[], "").await;
    assert_eq!(res.headers().get("content-length").unwrap(), "6");
    assert_eq!(body_string(res).await, "");

    let st = status(&dav, "GET", "/docs/a.txt", &[("if-none-match", etag.as_str())], "").await;
    assert_eq!(st, StatusCode::NOT_MODIFIED);
    let st = status(&dav, "PUT", "/docs/a.txt", &[("if-match", "\"nope\"")], "x").await;
    assert_eq!(st, StatusCode::PRECONDITION_FAILED);

    assert_eq!(status(&dav, "GET", "/docs/", &[], "").await, StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(status(&dav, "GET", "/nope.txt", &[], "").await, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn put_and_mkcol_errors() {
    let dav = handler();
    assert_eq!(status(&dav, "PUT", "/no/such/file", &[], "x").await, StatusCode::CONFLICT);
    mkcol(&dav, "/c/").await;
    assert_eq!(status(&dav, "PUT", "/c/", &[], "x").await, StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(status(&dav, "MKCOL", "/c/", &[], "").await, StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(status(&dav, "MKCOL", "/x/y/", &[], "").await, StatusCode::CONFLICT);
    assert_eq!(
        status(&dav, "MKCOL", "/d/", &[], "<foo/>").await,
        StatusCode::UNSUPPORTED_MEDIA_TYPE
    );
}

#[tokio::test]
async fn disallowed_method() {
    init();
    let dav = DavHandler::builder(FileSystem::Mem)
        .methods(DavMethodSet::WEBDAV_RO)
        .build();
    let res = call(&dav, "PUT", "/a.txt", &[], "x").await;
    assert_eq!(res.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(res.headers().get("connection").unwrap(), "close");
    assert_eq!(status(&dav, "PROPFIND", "/", &[("depth", "0")], "").await, StatusCode::MULTI_STATUS);
}

#[tokio::test]
async fn locked_collection_needs_token() {
    let dav = handler();
    mkcol(&dav, "/docs/").await;

    let res = call(&dav, "LOCK", "/docs/", &[("depth", "infinity")], LOCKINFO_EXCL).await;
    assert_eq!(res.status(), StatusCode::OK);
    let token = lock_token(&res);
    assert!(token.starts_with("urn:uuid:"));
    let doc = Element::parse2(body_string(res).await.as_bytes()).unwrap();
    let al = doc
        .get_child("lockdiscovery")
        .and_then(|ld| ld.get_child("activelock"))
        .unwrap();
    assert_eq!(al.get_child("depth").unwrap().get_text().unwrap(), "infinity");
    let t = al.get_child("locktoken").unwrap().get_child("href").unwrap();
    assert_eq!(t.get_text().unwrap(), token.as_str());

    assert_eq!(status(&dav, "PUT", "/docs/a.txt", &[], "x").await, StatusCode::LOCKED);
    let ifh = format!("(<{token}>)");
    assert_eq!(
        status(&dav, "PUT", "/docs/a.txt", &[("if", ifh.as_str())], "x").await,
        StatusCode::CREATED
    );

    // someone else's token does not help.
    let st = status(&dav, "PUT", "/docs/b.txt", &[("if", "(<urn:uuid:nope>)")], "x").await;
    assert_eq!(st, StatusCode::PRECONDITION_FAILED);
}

#[tokio::test]
async fn lock_conflicts() {
    let dav = handler();
    put(&dav, "/f.txt", "x").await;

    let res = call(&dav, "LOCK", "/f.txt", &[], LOCKINFO_EXCL).await;
    assert_eq!(res.status(), StatusCode::OK);

    let res = call(&dav, "LOCK", "/f.txt", &[], LOCKINFO_EXCL).await;
    assert_eq!(res.status(), StatusCode::LOCKED);
    let body = body_string(res).await;
    let doc = Element::parse2(body.as_bytes()).unwrap();
    assert!(doc.is_dav("error"));
    assert!(doc.get_child("no-conflicting-lock").is_some());

    // a deep lock on the parent overlaps too.
    assert_eq!(status(&dav, "LOCK", "/", &[], LOCKINFO_EXCL).await, StatusCode::LOCKED);

    put(&dav, "/g.txt", "x").await;
    assert_eq!(status(&dav, "LOCK", "/g.txt", &[], LOCKINFO_SHARED).await, StatusCode::OK);
    assert_eq!(status(&dav, "LOCK", "/g.txt", &[], LOCKINFO_SHARED).await, StatusCode::OK);
    assert_eq!(status(&dav, "LOCK", "/g.txt", &[], LOCKINFO_EXCL).await, StatusCode::LOCKED);

    assert_eq!(
        status(&dav, "LOCK", "/g.txt", &[("depth", "1")], LOCKINFO_SHARED).await,
        StatusCode::BAD_REQUEST
    );
    assert_eq!(status(&dav, "LOCK", "/g.txt", &[], "<D:foo xmlns:D=\"DAV:\"/>").await, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn lock_unmapped_creates_resource() {
    let dav = handler();
    let res = call(&dav, "LOCK", "/new.txt", &[], LOCKINFO_EXCL).await;
    assert_eq!(res.status(), StatusCode::CREATED);
    let res = call(&dav, "GET", "/new.txt", &[], "").await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(body_string(res).await, "");
    assert_eq!(status(&dav, "LOCK", "/no/new.txt", &[], LOCKINFO_EXCL).await, StatusCode::CONFLICT);
}

#[tokio::test]
async fn unlock() {
    let dav = handler();
    put(&dav, "/f.txt", "x").await;
    let res = call(&dav, "LOCK", "/f.txt", &[], LOCKINFO_EXCL).await;
    let token = lock_token(&res);

    assert_eq!(status(&dav, "UNLOCK", "/f.txt", &[], "").await, StatusCode::BAD_REQUEST);
    let res = call(&dav, "UNLOCK", "/f.txt", &[("lock-token", "<urn:uuid:nope>")], "").await;
    assert_eq!(res.status(), StatusCode::CONFLICT);
    assert!(body_string(res).await.contains("lock-token-matches-request-uri"));

    assert_eq!(status(&dav, "PUT", "/f.txt", &[], "y").await, StatusCode::LOCKED);
    let lt = format!("<{token}>");
    assert_eq!(
        status(&dav, "UNLOCK", "/f.txt", &[("lock-token", lt.as_str())], "").await,
        StatusCode::NO_CONTENT
    );
    assert_eq!(status(&dav, "PUT", "/f.txt", &[], "y").await, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn refresh_and_expiry() {
    let dav = handler();
    put(&dav, "/r.txt", "x").await;
    put(&dav, "/e.txt", "x").await;

    let res = call(&dav, "LOCK", "/r.txt", &[("timeout", "Second-1")], LOCKINFO_EXCL).await;
    let token = lock_token(&res);
    assert_eq!(status(&dav, "LOCK", "/e.txt", &[("timeout", "Second-1")], LOCKINFO_EXCL).await, StatusCode::OK);

    let ifh = format!("(<{token}>)");
    let res = call(&dav, "LOCK", "/r.txt", &[("if", ifh.as_str()), ("timeout", "Second-60")], "").await;
    assert_eq!(res.status(), StatusCode::OK);
    assert!(body_string(res).await.contains("lockdiscovery"));

    let st = status(&dav, "LOCK", "/r.txt", &[("if", "(<urn:uuid:nope>)")], "").await;
    assert_eq!(st, StatusCode::PRECONDITION_FAILED);
    assert_eq!(status(&dav, "LOCK", "/r.txt", &[], "").await, StatusCode::BAD_REQUEST);

    tokio::time::sleep(Duration::from_millis(1500)).await;

    // refreshed: still locked. not refreshed: gone.
    assert_eq!(status(&dav, "PUT", "/r.txt", &[], "y").await, StatusCode::LOCKED);
    assert_eq!(status(&dav, "PUT", "/e.txt", &[], "y").await, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn lock_timeouts_are_clamped() {
    init();
    let dav = DavHandler::builder(FileSystem::Mem)
        .lock_timeout(Duration::from_secs(30))
        .max_lock_timeout(Duration::from_secs(100))
        .build();
    let req = |t: &str| Request::builder().header("timeout", t).body(()).unwrap();
    assert_eq!(dav.timeout(&req("Second-5")).unwrap(), Some(Duration::from_secs(5)));
    assert_eq!(dav.timeout(&req("Second-5000, Infinite")).unwrap(), Some(Duration::from_secs(100)));
    assert_eq!(dav.timeout(&req("Infinite, Second-5")).unwrap(), Some(Duration::from_secs(30)));
    assert_eq!(dav.timeout(&Request::new(())).unwrap(), Some(Duration::from_secs(30)));
    assert!(dav.timeout(&req("Minute-5")).is_err());

    put(&dav, "/t.txt", "x").await;
    let st = status(&dav, "LOCK", "/t.txt", &[("timeout", "soon")], LOCKINFO_EXCL).await;
    assert_eq!(st, StatusCode::BAD_REQUEST);
    assert_eq!(status(&dav, "PUT", "/t.txt", &[], "y").await, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn propfind() {
    let dav = handler();
    mkcol(&dav, "/docs/").await;
    put(&dav, "/docs/a.txt", "hello").await;
    mkcol(&dav, "/docs/sub/").await;
    put(&dav, "/docs/sub/deep.txt", "x").await;

    let res = call(&dav, "PROPFIND", "/docs/", &[("depth", "1")], "").await;
    assert_eq!(res.status(), StatusCode::MULTI_STATUS);
    let resps = responses(&body_string(res).await);
    let hrefs: Vec<&str> = resps.iter().map(|(h, _)| h.as_str()).collect();
    assert_eq!(hrefs, vec!["/docs/", "/docs/a.txt", "/docs/sub/"]);

    let (st, len) = prop(find(&resps, "/docs/a.txt"), "getcontentlength").unwrap();
    assert!(st.contains("200"));
    assert_eq!(len.get_text().unwrap(), "5");
    let (_, rt) = prop(find(&resps, "/docs/"), "resourcetype").unwrap();
    assert!(rt.get_child("collection").is_some());

    // default depth is infinity.
    let res = call(&dav, "PROPFIND", "/docs/", &[], "").await;
    assert_eq!(responses(&body_string(res).await).len(), 4);

    let body = r#"<D:propfind xmlns:D="DAV:"><D:prop><D:getetag/><D:nope/></D:prop></D:propfind>"#;
    let res = call(&dav, "PROPFIND", "/docs/a.txt", &[("depth", "0")], body).await;
    let resps = responses(&body_string(res).await);
    assert_eq!(resps.len(), 1);
    assert!(prop(&resps[0].1, "getetag").unwrap().0.contains("200"));
    assert!(prop(&resps[0].1, "nope").unwrap().0.contains("404"));

    let body = r#"<D:propfind xmlns:D="DAV:"><D:propname/></D:propfind>"#;
    let res = call(&dav, "PROPFIND", "/docs/a.txt", &[("depth", "0")], body).await;
    let resps = responses(&body_string(res).await);
    let (_, e) = prop(&resps[0].1, "getcontentlength").unwrap();
    assert!(e.get_text().is_none());

    assert_eq!(
        status(&dav, "PROPFIND", "/docs/", &[], "<D:propfind xmlns:D=\"DAV:\">").await,
        StatusCode::BAD_REQUEST
    );
    assert_eq!(status(&dav, "PROPFIND", "/nope/", &[], "").await, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn proppatch_is_atomic() {
    let dav = handler();
    put(&dav, "/f.txt", "x").await;

    let res = set_author(&dav, "/f.txt", "ann").await;
    assert_eq!(res.status(), StatusCode::MULTI_STATUS);
    let resps = responses(&body_string(res).await);
    assert!(prop(&resps[0].1, "author").unwrap().0.contains("200"));
    assert_eq!(get_author(&dav, "/f.txt").await.as_deref(), Some("ann"));

    let body = r#"<D:propertyupdate xmlns:D="DAV:" xmlns:X="urn:x">
        <D:set><D:prop><X:author>bob</X:author></D:prop></D:set>
        <D:set><D:prop><D:getetag>"x"</D:getetag></D:prop></D:set>
      </D:propertyupdate>"#;
    let res = call(&dav, "PROPPATCH", "/f.txt", &[], body).await;
    let resps = responses(&body_string(res).await);
    assert!(prop(&resps[0].1, "getetag").unwrap().0.contains("403"));
    assert!(prop(&resps[0].1, "author").unwrap().0.contains("424"));
    assert_eq!(get_author(&dav, "/f.txt").await.as_deref(), Some("ann"));

    let body = r#"<D:propertyupdate xmlns:D="DAV:" xmlns:X="urn:x">
        <D:remove><D:prop><X:author/></D:prop></D:remove>
      </D:propertyupdate>"#;
    assert_eq!(status(&dav, "PROPPATCH", "/f.txt", &[], body).await, StatusCode::MULTI_STATUS);
    assert_eq!(get_author(&dav, "/f.txt").await, None);

    let empty = r#"<D:propertyupdate xmlns:D="DAV:"/>"#;
    assert_eq!(status(&dav, "PROPPATCH", "/f.txt", &[], empty).await, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn proppatch_honors_locks() {
    let dav = handler();
    put(&dav, "/f.txt", "x").await;
    let token = lock_token(&call(&dav, "LOCK", "/f.txt", &[], LOCKINFO_EXCL).await);
    assert_eq!(set_author(&dav, "/f.txt", "ann").await.status(), StatusCode::LOCKED);

    let ifh = format!("(<{token}>)");
    let body = r#"<D:propertyupdate xmlns:D="DAV:" xmlns:X="urn:x">
        <D:set><D:prop><X:author>ann</X:author></D:prop></D:set>
      </D:propertyupdate>"#;
    assert_eq!(
        status(&dav, "PROPPATCH", "/f.txt", &[("if", ifh.as_str())], body).await,
        StatusCode::MULTI_STATUS
    );
}

#[tokio::test]
async fn custom_live_property() {
    fn quota(_: &LiveContext) -> Option<Element> {
        Some(Element::new_text("D:quota-used-bytes", "0"))
    }
    init();
    let dav = DavHandler::builder(FileSystem::Mem)
        .live_property("DAV:", "quota-used-bytes", quota)
        .build();

    let res = call(&dav, "PROPFIND", "/", &[("depth", "0")], "").await;
    let resps = responses(&body_string(res).await);
    assert!(prop(&resps[0].1, "quota-used-bytes").is_some());

    let body = r#"<D:propertyupdate xmlns:D="DAV:">
        <D:set><D:prop><D:quota-used-bytes>5</D:quota-used-bytes></D:prop></D:set>
      </D:propertyupdate>"#;
    let res = call(&dav, "PROPPATCH", "/", &[], body).await;
    let resps = responses(&body_string(res).await);
    assert!(prop(&resps[0].1, "quota-used-bytes").unwrap().0.contains("403"));
}

#[tokio::test]
async fn copy_tree_with_properties() {
    let dav = handler();
    mkcol(&dav, "/src/").await;
    put(&dav, "/src/a.txt", "aaa").await;
    mkcol(&dav, "/src/sub/").await;
    put(&dav, "/src/sub/b.txt", "bbb").await;
    set_author(&dav, "/src/a.txt", "ann").await;
    set_author(&dav, "/src/sub/", "sue").await;

    let hdrs = [("destination", "http://localhost/dst/"), ("host", "localhost")];
    assert_eq!(status(&dav, "COPY", "/src/", &hdrs, "").await, StatusCode::CREATED);

    let res = call(&dav, "GET", "/dst/sub/b.txt", &[], "").await;
    assert_eq!(body_string(res).await, "bbb");
    assert_eq!(get_author(&dav, "/dst/a.txt").await.as_deref(), Some("ann"));
    assert_eq!(get_author(&dav, "/dst/sub/").await.as_deref(), Some("sue"));
    // copied, not moved.
    assert_eq!(get_author(&dav, "/src/a.txt").await.as_deref(), Some("ann"));

    // depth 0 copies only the collection itself.
    let hdrs = [("destination", "/shallow/"), ("depth", "0")];
    assert_eq!(status(&dav, "COPY", "/src/", &hdrs, "").await, StatusCode::CREATED);
    assert_eq!(status(&dav, "GET", "/shallow/a.txt", &[], "").await, StatusCode::NOT_FOUND);

    // overwrite replaces the destination.
    put(&dav, "/src/a.txt", "new").await;
    assert_eq!(
        status(&dav, "COPY", "/src/a.txt", &[("destination", "/dst/sub/b.txt")], "").await,
        StatusCode::NO_CONTENT
    );
    let res = call(&dav, "GET", "/dst/sub/b.txt", &[], "").await;
    assert_eq!(body_string(res).await, "new");
}

#[tokio::test]
async fn copy_move_refusals() {
    let dav = handler();
    mkcol(&dav, "/a/").await;
    put(&dav, "/a/f.txt", "x").await;
    put(&dav, "/g.txt", "x").await;

    let st = status(&dav, "COPY", "/a/f.txt", &[("destination", "/g.txt"), ("overwrite", "F")], "").await;
    assert_eq!(st, StatusCode::PRECONDITION_FAILED);
    assert_eq!(status(&dav, "COPY", "/a/", &[("destination", "/a/")], "").await, StatusCode::FORBIDDEN);
    assert_eq!(status(&dav, "MOVE", "/a/", &[("destination", "/a/b/")], "").await, StatusCode::FORBIDDEN);
    assert_eq!(
        status(&dav, "COPY", "/g.txt", &[("destination", "/no/such/g.txt")], "").await,
        StatusCode::CONFLICT
    );
    let hdrs = [("destination", "http://elsewhere/g2.txt"), ("host", "localhost")];
    assert_eq!(status(&dav, "COPY", "/g.txt", &hdrs, "").await, StatusCode::BAD_GATEWAY);
    assert_eq!(status(&dav, "COPY", "/g.txt", &[], "").await, StatusCode::BAD_REQUEST);
    let hdrs = [("destination", "/b/"), ("depth", "0")];
    assert_eq!(status(&dav, "MOVE", "/a/", &hdrs, "").await, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn move_with_properties() {
    let dav = handler();
    put(&dav, "/x.txt", "x").await;
    set_author(&dav, "/x.txt", "ann").await;

    assert_eq!(
        status(&dav, "MOVE", "/x.txt", &[("destination", "/y.txt")], "").await,
        StatusCode::CREATED
    );
    assert_eq!(status(&dav, "GET", "/x.txt", &[], "").await, StatusCode::NOT_FOUND);
    assert_eq!(get_author(&dav, "/y.txt").await.as_deref(), Some("ann"));
}

#[tokio::test]
async fn move_around_locked_member() {
    let dav = handler();
    mkcol(&dav, "/m/").await;
    put(&dav, "/m/a.txt", "a").await;
    put(&dav, "/m/b.txt", "b").await;
    let res = call(&dav, "LOCK", "/m/b.txt", &[("depth", "0")], LOCKINFO_EXCL).await;
    assert_eq!(res.status(), StatusCode::OK);

    let res = call(&dav, "MOVE", "/m/", &[("destination", "/n/")], "").await;
    assert_eq!(res.status(), StatusCode::MULTI_STATUS);
    let resps = responses(&body_string(res).await);
    assert!(plain_status(find(&resps, "/m/b.txt")).contains("423"));
    assert!(plain_status(find(&resps, "/n/a.txt")).contains("201"));

    assert_eq!(status(&dav, "GET", "/n/a.txt", &[], "").await, StatusCode::OK);
    assert_eq!(status(&dav, "GET", "/m/a.txt", &[], "").await, StatusCode::NOT_FOUND);
    assert_eq!(status(&dav, "GET", "/m/b.txt", &[], "").await, StatusCode::OK);
    assert_eq!(status(&dav, "PROPFIND", "/m/", &[("depth", "0")], "").await, StatusCode::MULTI_STATUS);
}

#[tokio::test]
async fn locked_destination_member() {
    let dav = handler();
    mkcol(&dav, "/s/").await;
    put(&dav, "/s/f.txt", "new").await;
    mkcol(&dav, "/d/").await;
    put(&dav, "/d/f.txt", "old").await;
    call(&dav, "LOCK", "/d/f.txt", &[], LOCKINFO_EXCL).await;

    let res = call(&dav, "COPY", "/s/", &[("destination", "/d/")], "").await;
    assert_eq!(res.status(), StatusCode::MULTI_STATUS);
    let resps = responses(&body_string(res).await);
    assert_eq!(resps.len(), 1);
    assert!(plain_status(find(&resps, "/d/f.txt")).contains("423"));

    // nothing was touched.
    let res = call(&dav, "GET", "/d/f.txt", &[], "").await;
    assert_eq!(body_string(res).await, "old");
}

#[tokio::test]
async fn delete() {
    let dav = handler();
    assert_eq!(status(&dav, "DELETE", "/", &[], "").await, StatusCode::FORBIDDEN);

    mkcol(&dav, "/docs/").await;
    put(&dav, "/docs/a.txt", "a").await;
    put(&dav, "/docs/b.txt", "b").await;
    set_author(&dav, "/docs/b.txt", "ann").await;
    assert_eq!(status(&dav, "DELETE", "/docs/", &[("depth", "0")], "").await, StatusCode::BAD_REQUEST);

    let token = lock_token(&call(&dav, "LOCK", "/docs/a.txt", &[], LOCKINFO_EXCL).await);
    let res = call(&dav, "DELETE", "/docs/", &[], "").await;
    assert_eq!(res.status(), StatusCode::MULTI_STATUS);
    let resps = responses(&body_string(res).await);
    assert!(plain_status(find(&resps, "/docs/a.txt")).contains("423"));
    assert_eq!(status(&dav, "GET", "/docs/a.txt", &[], "").await, StatusCode::OK);
    assert_eq!(status(&dav, "GET", "/docs/b.txt", &[], "").await, StatusCode::NOT_FOUND);

    // dead properties went with the resource.
    put(&dav, "/docs/b.txt", "b").await;
    assert_eq!(get_author(&dav, "/docs/b.txt").await, None);

    let ifh = format!("</docs/a.txt> (<{token}>)");
    assert_eq!(
        status(&dav, "DELETE", "/docs/", &[("if", ifh.as_str())], "").await,
        StatusCode::NO_CONTENT
    );
    assert_eq!(status(&dav, "PROPFIND", "/docs/", &[], "").await, StatusCode::NOT_FOUND);

    // the lock went away with the resource.
    mkcol(&dav, "/docs/").await;
    put(&dav, "/docs/a.txt", "a").await;
}

#[tokio::test]
async fn prefix_is_stripped() {
    init();
    let dav = DavHandler::builder(FileSystem::Mem).strip_prefix("/dav").build();
    mkcol(&dav, "/dav/docs/").await;
    put(&dav, "/dav/docs/a%20b.txt", "x").await;

    let res = call(&dav, "PROPFIND", "/dav/docs/", &[("depth", "1")], "").await;
    let resps = responses(&body_string(res).await);
    let hrefs: Vec<&str> = resps.iter().map(|(h, _)| h.as_str()).collect();
    assert_eq!(hrefs, vec!["/dav/docs/", "/dav/docs/a%20b.txt"]);

    let hdrs = [("destination", "/elsewhere/x.txt")];
    assert_eq!(status(&dav, "MOVE", "/dav/docs/a%20b.txt", &hdrs, "").await, StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn lock_new_member_of_locked_collection() {
    let dav = handler();
    mkcol(&dav, "/docs/").await;
    let res = call_as(&dav, "alice", "LOCK", "/docs/", &[("depth", "0")], LOCKINFO_EXCL).await;
    assert_eq!(res.status(), StatusCode::OK);
    let token = lock_token(&res);

    let res = call_as(&dav, "bob", "PUT", "/docs/new.txt", &[], "x").await;
    assert_eq!(res.status(), StatusCode::LOCKED);
    let res = call_as(&dav, "bob", "LOCK", "/docs/other.txt", &[], LOCKINFO_EXCL).await;
    assert_eq!(res.status(), StatusCode::LOCKED);
    assert_eq!(status(&dav, "GET", "/docs/other.txt", &[], "").await, StatusCode::NOT_FOUND);

    // the owner of the collection lock may add members.
    let ifh = format!("</docs/> (<{token}>)");
    let hdrs = [("if", ifh.as_str())];
    let res = call_as(&dav, "alice", "LOCK", "/docs/other.txt", &hdrs, LOCKINFO_EXCL).await;
    assert_eq!(res.status(), StatusCode::CREATED);
}

#[tokio::test]
async fn unlock_by_another_principal() {
    let dav = handler();
    put(&dav, "/f.txt", "x").await;
    let res = call_as(&dav, "alice", "LOCK", "/f.txt", &[], LOCKINFO_EXCL).await;
    let lt = format!("<{}>", lock_token(&res));
    let hdrs = [("lock-token", lt.as_str())];

    let res = call_as(&dav, "bob", "UNLOCK", "/f.txt", &hdrs, "").await;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    let res = call_as(&dav, "alice", "UNLOCK", "/f.txt", &hdrs, "").await;
    assert_eq!(res.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn malformed_overwrite_is_rejected() {
    let dav = handler();
    put(&dav, "/a.txt", "new").await;
    put(&dav, "/b.txt", "old").await;

    let hdrs = [("destination", "/b.txt"), ("overwrite", "bogus")];
    assert_eq!(status(&dav, "COPY", "/a.txt", &hdrs, "").await, StatusCode::BAD_REQUEST);
    let hdrs = [("destination", "/b.txt"), ("overwrite", "F")];
    assert_eq!(status(&dav, "COPY", "/a.txt", &hdrs, "").await, StatusCode::PRECONDITION_FAILED);

    let res = call(&dav, "GET", "/b.txt", &[], "").await;
    assert_eq!(body_string(res).await, "old");
}

#[tokio::test]
async fn destination_on_another_port() {
    let dav = handler();
    put(&dav, "/a.txt", "x").await;

    let hdrs = [("host", "localhost:8080"), ("destination", "http://localhost:9999/b.txt")];
    assert_eq!(status(&dav, "COPY", "/a.txt", &hdrs, "").await, StatusCode::BAD_GATEWAY);
    let hdrs = [("host", "localhost"), ("destination", "http://localhost:8080/b.txt")];
    assert_eq!(status(&dav, "COPY", "/a.txt", &hdrs, "").await, StatusCode::BAD_GATEWAY);
    assert_eq!(status(&dav, "GET", "/b.txt", &[], "").await, StatusCode::NOT_FOUND);

    let hdrs = [("host", "localhost:8080"), ("destination", "http://localhost:8080/b.txt")];
    assert_eq!(status(&dav, "COPY", "/a.txt", &hdrs, "").await, StatusCode::CREATED);
    let hdrs = [("host", "localhost"), ("destination", "http://localhost:80/c.txt")];
    assert_eq!(status(&dav, "COPY", "/a.txt", &hdrs, "").await, StatusCode::CREATED);
}

// A filesystem that cannot rename anything out of /dst.
struct NoRenameFromDst(Arc<MemFs>);

impl DavFileSystem for NoRenameFromDst {
    fn open<'a>(&'a self, path: &'a DavPath, options: OpenOptions) -> FsFuture<'a, Box<dyn DavFile>> {
        self.0.open(path, options)
    }
    fn read_dir<'a>(
        &'a self,
        path: &'a DavPath,
        meta: ReadDirMeta,
    ) -> FsFuture<'a, FsStream<Box<dyn DavDirEntry>>> {
        self.0.read_dir(path, meta)
    }
    fn metadata<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, Box<dyn DavMetaData>> {
        self.0.metadata(path)
    }
    fn create_dir<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, ()> {
        self.0.create_dir(path)
    }
    fn remove_dir<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, ()> {
        self.0.remove_dir(path)
    }
    fn remove_file<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, ()> {
        self.0.remove_file(path)
    }
    fn rename<'a>(&'a self, from: &'a DavPath, to: &'a DavPath) -> FsFuture<'a, ()> {
        if from.as_str().starts_with("/dst") {
            return Box::pin(async { Err(FsError::Forbidden) });
        }
        self.0.rename(from, to)
    }
    fn copy<'a>(&'a self, from: &'a DavPath, to: &'a DavPath) -> FsFuture<'a, ()> {
        self.0.copy(from, to)
    }
}

// A property store that refuses properties under /dst and /keep.
#[derive(Debug)]
struct NoPropsAtDst(Arc<MemPs>);

impl DavPropStore for NoPropsAtDst {
    fn get(&self, path: &str, ns: &str, name: &str) -> PropResult<Option<DavProp>> {
        self.0.get(path, ns, name)
    }
    fn set(&self, path: &str, prop: DavProp) -> PropResult<()> {
        if path.starts_with("/dst") || path.starts_with("/keep") {
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

#[tokio::test]
async fn move_when_properties_cannot_follow() {
    init();
    let dav = DavHandler::builder(FileSystem::Custom(Arc::new(NoRenameFromDst(MemFs::new()))))
        .propstore(PropStore::Custom(Arc::new(NoPropsAtDst(MemPs::new()))))
        .build();
    put(&dav, "/src.txt", "x").await;
    assert_eq!(set_author(&dav, "/src.txt", "Ann").await.status(), StatusCode::MULTI_STATUS);

    // the resource is put back, and keeps its properties.
    let hdrs = [("destination", "/keep.txt")];
    assert_eq!(status(&dav, "MOVE", "/src.txt", &hdrs, "").await, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(status(&dav, "GET", "/keep.txt", &[], "").await, StatusCode::NOT_FOUND);
    assert_eq!(get_author(&dav, "/src.txt").await.as_deref(), Some("Ann"));

    // it cannot be put back.
    let hdrs = [("destination", "/dst.txt")];
    assert_eq!(status(&dav, "MOVE", "/src.txt", &hdrs, "").await, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(status(&dav, "GET", "/dst.txt", &[], "").await, StatusCode::OK);
}
