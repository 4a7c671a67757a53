use std::error::Error as StdError;
use std::io;

use bytes::{Buf, Bytes};
use http::{Request, Response, StatusCode};
use http_body::Body as HttpBody;

use crate::body::Body;
use crate::conditional::if_match_get_tokens;
use crate::errors::DavError;
use crate::fs::OpenOptions;
use crate::DavResult;

impl crate::DavHandler {
    pub(crate) async fn handle_put<ReqBody, ReqData, ReqError>(
        &self,
        req: &Request<()>,
        body: ReqBody,
    ) -> DavResult<Response<Body>>
    where
        ReqBody: HttpBody<Data = ReqData, Error = ReqError>,
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
    {
        let path = self.path(req)?;
        let meta = self.fs.metadata(&path).await.ok();

        if path.is_collection() || meta.as_ref().map_or(false, |m| m.is_dir()) {
            return Err(StatusCode::METHOD_NOT_ALLOWED.into());
        }
        if meta.is_none() && !self.has_parent(&path).await {
            return Err(StatusCode::CONFLICT.into());
        }

        let tokens = if_match_get_tokens(req, meta.as_deref(), &*self.fs, &*self.ls, &path).await?;
        self.check_locked(&path, &tokens)?;
        if meta.is_none() {
            // a new member changes the parent collection.
            self.check_locked(&path.parent(), &tokens)?;
        }

        let mut oo = OpenOptions::write();
        oo.create = true;
        oo.truncate = true;
        let mut file = self.fs.open(&path, oo).await?;

        pin_utils::pin_mut!(body);
        while let Some(data) = body.data().await {
            let mut buf = data.map_err(|e| {
                debug!("handle_put: {}: reading body: {}", path, e);
                DavError::IoError(io::Error::new(io::ErrorKind::UnexpectedEof, "UnexpectedEof"))
            })?;
            while buf.has_remaining() {
                let chunk = Bytes::copy_from_slice(buf.chunk());
                buf.advance(chunk.len());
                file.write_bytes(chunk).await?;
            }
        }
        file.flush().await?;

        let mut res = Response::new(Body::empty());
        *res.status_mut() = match meta {
            Some(_) => StatusCode::NO_CONTENT,
            None => StatusCode::CREATED,
        };
        Ok(res)
    }
}
