use http::{Request, Response, StatusCode};

use crate::body::Body;
use crate::conditional::if_match_get_tokens;
use crate::DavResult;

impl crate::DavHandler {
    pub(crate) async fn handle_mkcol(&self, req: &Request<()>) -> DavResult<Response<Body>> {
        let path = self.path(req)?;

        if self.fs.metadata(&path).await.is_ok() {
            return Err(StatusCode::METHOD_NOT_ALLOWED.into());
        }
        if !self.has_parent(&path).await {
            return Err(StatusCode::CONFLICT.into());
        }

        let tokens = if_match_get_tokens(req, None, &*self.fs, &*self.ls, &path).await?;
        self.check_locked(&path, &tokens)?;
        self.check_locked(&path.parent(), &tokens)?;

        self.fs.create_dir(&path).await?;

        let mut res = Response::new(Body::empty());
        *res.status_mut() = StatusCode::CREATED;
        Ok(res)
    }
}
