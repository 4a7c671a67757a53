use futures_util::StreamExt;
use http::{Request, Response, StatusCode};

use crate::body::Body;
use crate::conditional::if_match_get_tokens;
use crate::davheaders::Depth;
use crate::davpath::DavPath;
use crate::errors::fserror_to_status;
use crate::fs::DavMetaData;
use crate::multistatus::MultiStatus;
use crate::walk::{walk, WalkOrder};
use crate::DavResult;

impl crate::DavHandler {
    // Remove `path` and everything below it, members first.
    //
    // Nodes at or below one of the `keep` paths are left alone, and so
    // are the ancestors of anything that could not be removed. Dead
    // properties and locks go away with the node.
    pub(crate) async fn delete_items(
        &self,
        path: &DavPath,
        meta: Box<dyn DavMetaData>,
        keep: &[DavPath],
        ms: &mut MultiStatus,
    ) {
        let strm = walk(&*self.fs, path, meta, None, WalkOrder::PostOrder);
        futures_util::pin_mut!(strm);

        while let Some(item) = strm.next().await {
            let item = match item {
                Ok(item) => item,
                Err((p, e)) => {
                    ms.add(p, fserror_to_status(&e));
                    continue;
                }
            };
            if keep.iter().any(|k| k.is_ancestor_or_self(&item.path)) || ms.has_failed_under(&item.path) {
                trace!("delete_items: leaving {}", item.path);
                continue;
            }
            let res = if item.meta.is_dir() {
                self.fs.remove_dir(&item.path).await
            } else {
                self.fs.remove_file(&item.path).await
            };
            match res {
                Ok(()) => {
                    if let Err(e) = self.props.remove_properties(&item.path) {
                        debug!("delete_items: {}: properties: {}", item.path, e);
                    }
                    let _ = self.ls.delete(&item.path);
                }
                Err(e) => {
                    debug!("delete_items: {}: {}", item.path, e);
                    ms.add(item.path, fserror_to_status(&e));
                }
            }
        }
    }

    pub(crate) async fn handle_delete(&self, req: &Request<()>) -> DavResult<Response<Body>> {
        let mut path = self.path(req)?;
        if path.is_root() {
            return Err(StatusCode::FORBIDDEN.into());
        }
        let depth = self.depth(req, Depth::Infinity)?;

        let meta = self.fs.metadata(&path).await?;
        if meta.is_dir() && depth != Depth::Infinity {
            return Err(StatusCode::BAD_REQUEST.into());
        }
        path.add_slash_if(meta.is_dir());

        let tokens = if_match_get_tokens(req, Some(&*meta), &*self.fs, &*self.ls, &path).await?;
        self.check_locked(&path.parent(), &tokens)?;
        let locked = self.locked_below(&path, &tokens)?;

        let mut ms = MultiStatus::new();
        for p in &locked {
            ms.add(p.clone(), StatusCode::LOCKED);
        }
        self.delete_items(&path, meta, &locked, &mut ms).await;
        ms.into_response(&path, StatusCode::NO_CONTENT)
    }
}
