use headers::HeaderMapExt;
use http::header::HeaderValue;
use http::{Request, Response};

use crate::body::Body;
use crate::util::DavMethod;
use crate::DavResult;

impl crate::DavHandler {
    pub(crate) async fn handle_options(&self, req: &Request<()>) -> DavResult<Response<Body>> {
        let mut res = Response::new(Body::empty());

        let h = res.headers_mut();
        h.insert("DAV", HeaderValue::from_static("1,2"));
        h.insert("MS-Author-Via", HeaderValue::from_static("DAV"));
        h.typed_insert(headers::ContentLength(0));

        // Helper to add method to array if method is in fact allowed.
        let mm = |v: &mut Vec<&'static str>, m: &'static str, y: DavMethod| {
            if self.allow.contains_method(y) {
                v.push(m);
            }
        };

        let path = self.path(req)?;
        let meta = self.fs.metadata(&path).await;
        let is_unmapped = meta.is_err();
        let is_file = meta.map(|m| m.is_file()).unwrap_or_default();
        let is_star = path.is_star();

        let mut v = Vec::new();
        if is_unmapped && !is_star {
            mm(&mut v, "OPTIONS", DavMethod::Options);
            mm(&mut v, "MKCOL", DavMethod::MkCol);
            mm(&mut v, "PUT", DavMethod::Put);
            mm(&mut v, "LOCK", DavMethod::Lock);
        } else {
            if is_file || is_star {
                mm(&mut v, "HEAD", DavMethod::Head);
                mm(&mut v, "GET", DavMethod::Get);
                mm(&mut v, "PUT", DavMethod::Put);
            }
            mm(&mut v, "OPTIONS", DavMethod::Options);
            mm(&mut v, "PROPFIND", DavMethod::PropFind);
            mm(&mut v, "PROPPATCH", DavMethod::PropPatch);
            mm(&mut v, "COPY", DavMethod::Copy);
            if !path.is_root() {
                mm(&mut v, "MOVE", DavMethod::Move);
                mm(&mut v, "DELETE", DavMethod::Delete);
            }
            mm(&mut v, "LOCK", DavMethod::Lock);
            mm(&mut v, "UNLOCK", DavMethod::Unlock);
        }

        if let Ok(a) = HeaderValue::from_str(&v.join(", ")) {
            res.headers_mut().insert("allow", a);
        }

        Ok(res)
    }
}
