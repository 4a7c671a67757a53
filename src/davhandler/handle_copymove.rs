use futures_util::StreamExt;
use http::{Request, Response, StatusCode};

use crate::body::Body;
use crate::conditional::if_match_get_tokens;
use crate::davheaders::Depth;
use crate::davpath::DavPath;
use crate::errors::{fserror_to_status, DavError};
use crate::fs::{DavMetaData, FsError};
use crate::multistatus::MultiStatus;
use crate::props::PropError;
use crate::util::DavMethod;
use crate::walk::{walk, WalkOrder};
use crate::DavResult;

impl crate::DavHandler {
    // Copy `src` to `dst`, collections first. A node that fails is
    // reported under its destination path and its members are skipped.
    async fn copy_items(
        &self,
        src: &DavPath,
        dst: &DavPath,
        meta: Box<dyn DavMetaData>,
        deep: bool,
        ms: &mut MultiStatus,
    ) {
        let depth = if deep { None } else { Some(0) };
        let strm = walk(&*self.fs, src, meta, depth, WalkOrder::PreOrder);
        futures_util::pin_mut!(strm);

        let mut failed: Vec<DavPath> = Vec::new();
        while let Some(item) = strm.next().await {
            let item = match item {
                Ok(item) => item,
                Err((p, e)) => {
                    if let Some(d) = p.rebase(src, dst) {
                        ms.add(d, fserror_to_status(&e));
                    }
                    failed.push(p);
                    continue;
                }
            };
            if failed.iter().any(|f| f.is_ancestor_of(&item.path)) {
                continue;
            }
            let target = match item.path.rebase(src, dst) {
                Some(t) => t,
                None => continue,
            };
            let res = if item.meta.is_dir() {
                self.fs.create_dir(&target).await
            } else {
                self.fs.copy(&item.path, &target).await
            };
            let res = match res {
                Ok(()) => self
                    .props
                    .copy_properties(&item.path, &target, true)
                    .map_err(DavError::from),
                Err(e) => Err(DavError::from(e)),
            };
            if let Err(e) = res {
                debug!("copy_items: {} -> {}: {}", item.path, target, e);
                ms.add(target, e.statuscode());
                failed.push(item.path);
            }
        }
    }

    // MOVE of a tree that has members locked by someone else. Everything
    // else is moved member by member; the locked members stay, and so
    // do the collections that contain them.
    async fn move_around_locks(
        &self,
        src: &DavPath,
        dst: &DavPath,
        meta: Box<dyn DavMetaData>,
        locked: &[DavPath],
        ms: &mut MultiStatus,
    ) {
        for p in locked {
            ms.add(p.clone(), StatusCode::LOCKED);
        }

        let strm = walk(&*self.fs, src, meta, None, WalkOrder::PreOrder);
        futures_util::pin_mut!(strm);

        let mut failed: Vec<DavPath> = Vec::new();
        let mut dirs: Vec<DavPath> = Vec::new();
        while let Some(item) = strm.next().await {
            let item = match item {
                Ok(item) => item,
                Err((p, e)) => {
                    ms.add(p.clone(), fserror_to_status(&e));
                    failed.push(p);
                    continue;
                }
            };
            if locked.iter().any(|l| l.is_ancestor_or_self(&item.path))
                || failed.iter().any(|f| f.is_ancestor_of(&item.path))
            {
                continue;
            }
            let target = match item.path.rebase(src, dst) {
                Some(t) => t,
                None => continue,
            };

            if item.meta.is_dir() {
                let res = match self.fs.create_dir(&target).await {
                    Ok(()) => self
                        .props
                        .copy_properties(&item.path, &target, true)
                        .map_err(DavError::from),
                    Err(e) => Err(DavError::from(e)),
                };
                match res {
                    Ok(()) => dirs.push(item.path),
                    Err(e) => {
                        ms.add(item.path.clone(), e.statuscode());
                        failed.push(item.path);
                    }
                }
                continue;
            }

            match self.fs.rename(&item.path, &target).await {
                Ok(()) => {
                    if let Err(e) = self.props.move_properties(&item.path, &target) {
                        let status = self.move_back(&item.path, &target, e).await;
                        ms.add(item.path.clone(), status);
                        failed.push(item.path);
                        continue;
                    }
                    let _ = self.ls.delete(&item.path);
                    ms.add(target, StatusCode::CREATED);
                }
                Err(e) => {
                    ms.add(item.path.clone(), fserror_to_status(&e));
                    failed.push(item.path);
                }
            }
        }

        // what is left of the source: the collections that are now empty.
        for d in dirs.iter().rev() {
            if locked.iter().chain(failed.iter()).any(|p| d.is_ancestor_or_self(p)) {
                continue;
            }
            match self.fs.remove_dir(d).await {
                Ok(()) => {
                    if let Err(e) = self.props.remove_properties(d) {
                        debug!("move_around_locks: {}: properties: {}", d, e);
                    }
                    let _ = self.ls.delete(d);
                }
                Err(e) => {
                    ms.add(d.clone(), fserror_to_status(&e));
                    failed.push(d.clone());
                }
            }
        }
    }

    // The properties of a renamed resource could not follow it: rename
    // it back. If that fails too the resource and its properties are now
    // apart, which is a 500 for that node.
    async fn move_back(&self, src: &DavPath, dst: &DavPath, e: PropError) -> StatusCode {
        match self.fs.rename(dst, src).await {
            Ok(()) => {
                debug!("MOVE {} -> {}: properties: {}", src, dst, e);
                DavError::from(e).statuscode()
            }
            Err(fe) => {
                error!("MOVE {} -> {}: properties: {}, moving back: {}", src, dst, e, fe);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub(crate) async fn handle_copymove(
        &self,
        req: &Request<()>,
        method: DavMethod,
    ) -> DavResult<Response<Body>> {
        let is_move = method == DavMethod::Move;
        let mut path = self.path(req)?;
        let mut dest = self.destination(req)?;

        let depth = self.depth(req, Depth::Infinity)?;
        let deep = match (is_move, depth) {
            (_, Depth::Infinity) => true,
            (false, Depth::Zero) => false,
            _ => return Err(StatusCode::BAD_REQUEST.into()),
        };
        let overwrite = self.overwrite(req)?;

        let meta = self.fs.metadata(&path).await?;
        path.add_slash_if(meta.is_dir());
        dest.add_slash_if(meta.is_dir());

        if path == dest || path.is_ancestor_of(&dest) || dest.is_ancestor_of(&path) {
            debug!("{:?} {} -> {}: overlapping paths", method, path, dest);
            return Err(StatusCode::FORBIDDEN.into());
        }
        if dest.is_root() || (is_move && path.is_root()) {
            return Err(StatusCode::FORBIDDEN.into());
        }
        if !self.has_parent(&dest).await {
            return Err(StatusCode::CONFLICT.into());
        }

        let dmeta = self.fs.metadata(&dest).await.ok();
        let exists = dmeta.is_some();
        if exists && !overwrite {
            return Err(StatusCode::PRECONDITION_FAILED.into());
        }

        let tokens = if_match_get_tokens(req, Some(&*meta), &*self.fs, &*self.ls, &path).await?;

        let src_locked = if is_move {
            self.check_locked(&path.parent(), &tokens)?;
            self.locked_below(&path, &tokens)?
        } else {
            Vec::new()
        };
        self.check_locked(&dest.parent(), &tokens)?;
        let dest_locked = self.locked_below(&dest, &tokens)?;
        if !dest_locked.is_empty() {
            let mut ms = MultiStatus::new();
            for p in dest_locked {
                ms.add(p, StatusCode::LOCKED);
            }
            return ms.into_response(&path, StatusCode::LOCKED);
        }

        let status = if exists {
            StatusCode::NO_CONTENT
        } else {
            StatusCode::CREATED
        };

        let mut ms = MultiStatus::new();
        if let Some(dmeta) = dmeta {
            self.delete_items(&dest, dmeta, &[], &mut ms).await;
            if !ms.all_ok() {
                return ms.into_response(&path, status);
            }
        }

        if !is_move {
            self.copy_items(&path, &dest, meta, deep, &mut ms).await;
            return ms.into_response(&path, status);
        }

        if !src_locked.is_empty() {
            self.move_around_locks(&path, &dest, meta, &src_locked, &mut ms).await;
            return ms.into_response(&path, status);
        }

        match self.fs.rename(&path, &dest).await {
            Ok(()) => {
                if let Err(e) = self.props.move_properties(&path, &dest) {
                    return Err(self.move_back(&path, &dest, e).await.into());
                }
                let _ = self.ls.delete(&path);
                ms.into_response(&path, status)
            }
            Err(FsError::NotImplemented) => {
                trace!("MOVE {} -> {}: copy and delete", path, dest);
                self.copy_items(&path, &dest, meta, true, &mut ms).await;
                if ms.all_ok() {
                    let meta = self.fs.metadata(&path).await?;
                    self.delete_items(&path, meta, &[], &mut ms).await;
                }
                ms.into_response(&path, status)
            }
            Err(e) => Err(e.into()),
        }
    }
}
