use std::io;

use headers::HeaderMapExt;
use http::header::{HeaderValue, CONTENT_TYPE};
use http::{Method, Request, Response, StatusCode};

use crate::body::Body;
use crate::conditional::{http_if_match, typed_etag};
use crate::fs::OpenOptions;
use crate::props::live::content_type;
use crate::DavResult;

pub(crate) const READ_BUF_SIZE: usize = 16384;

impl crate::DavHandler {
    pub(crate) async fn handle_get(&self, req: &Request<()>) -> DavResult<Response<Body>> {
        let head = req.method() == Method::HEAD;
        let path = self.path(req)?;

        let meta = self.fs.metadata(&path).await?;
        if meta.is_dir() {
            return Err(StatusCode::METHOD_NOT_ALLOWED.into());
        }

        let mut res = Response::new(Body::empty());
        if let Some(etag) = typed_etag(&*meta) {
            res.headers_mut().typed_insert(etag);
        }
        if let Ok(modified) = meta.modified() {
            res.headers_mut()
                .typed_insert(headers::LastModified::from(modified));
        }

        if let Some(status) = http_if_match(req, Some(&*meta)) {
            debug!("handle_get: {} precondition: {}", path, status);
            // 304 keeps the validators, 412 does not.
            if status == StatusCode::NOT_MODIFIED {
                *res.status_mut() = status;
                return Ok(res);
            }
            return Err(status.into());
        }

        let h = res.headers_mut();
        if let Ok(ct) = HeaderValue::from_str(&content_type(&path)) {
            h.insert(CONTENT_TYPE, ct);
        }
        h.typed_insert(headers::ContentLength(meta.len()));

        if head {
            return Ok(res);
        }

        let mut file = self.fs.open(&path, OpenOptions::read()).await?;
        *res.body_mut() = Body::stream(async_stream::stream! {
            loop {
                match file.read_bytes(READ_BUF_SIZE).await {
                    Ok(buf) if buf.is_empty() => break,
                    Ok(buf) => yield Ok(buf),
                    Err(e) => {
                        yield Err(io::Error::from(e));
                        break;
                    }
                }
            }
        });
        Ok(res)
    }
}
