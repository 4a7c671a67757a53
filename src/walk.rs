//! Walk a subtree of a `DavFileSystem`.
//!
//! The walk keeps an explicit stack of pending nodes, and produces a lazy
//! stream of items. Members of a collection are visited in name order, so
//! two walks over an unchanged tree produce the same sequence.
use futures_util::stream::{Stream, StreamExt};

use crate::davpath::DavPath;
use crate::fs::{DavFileSystem, DavMetaData, FsError, ReadDirMeta};

/// One node of the walk.
#[derive(Debug)]
pub(crate) struct WalkItem {
    pub path: DavPath,
    pub meta: Box<dyn DavMetaData>,
}

/// A node that could not be visited (or listed), and why.
pub(crate) type WalkError = (DavPath, FsError);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WalkOrder {
    /// A collection before its members.
    PreOrder,
    /// A collection after its members.
    PostOrder,
}

struct Frame {
    path: DavPath,
    meta: Box<dyn DavMetaData>,
    level: u32,
    expanded: bool,
}

// list the members of a collection, sorted by name.
async fn members(
    fs: &dyn DavFileSystem,
    path: &DavPath,
    level: u32,
) -> Result<Vec<Result<Frame, WalkError>>, FsError> {
    let mut entries = fs.read_dir(path, ReadDirMeta::Data).await?;
    let mut v = Vec::new();
    while let Some(dirent) = entries.next().await {
        let name = dirent.name();
        let mut npath = path.clone();
        npath.push_segment(&name);
        match dirent.metadata().await {
            Ok(meta) => {
                npath.add_slash_if(meta.is_dir());
                v.push((
                    name,
                    Ok(Frame {
                        path: npath,
                        meta,
                        level: level + 1,
                        expanded: false,
                    }),
                ));
            }
            Err(e) => v.push((name, Err((npath, e)))),
        }
    }
    v.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(v.into_iter().map(|(_, f)| f).collect())
}

/// Walk the tree below `root`, which must exist and has metadata `meta`.
///
/// `depth` is the maximum level to descend to; `None` is unlimited.
pub(crate) fn walk<'a>(
    fs: &'a dyn DavFileSystem,
    root: &DavPath,
    meta: Box<dyn DavMetaData>,
    depth: Option<u32>,
    order: WalkOrder,
) -> impl Stream<Item = Result<WalkItem, WalkError>> + Send + 'a {
    let mut root = root.clone();
    root.add_slash_if(meta.is_dir());
    let first = Frame {
        path: root,
        meta,
        level: 0,
        expanded: false,
    };

    async_stream::stream! {
        let mut work = vec![first];
        while let Some(frame) = work.pop() {
            let descend = frame.meta.is_dir()
                && !frame.expanded
                && depth.map_or(true, |d| frame.level < d);

            if !descend {
                yield Ok(WalkItem { path: frame.path, meta: frame.meta });
                continue;
            }

            let children = match members(fs, &frame.path, frame.level).await {
                Ok(c) => c,
                Err(e) => {
                    debug!("walk: read_dir {} failed: {:?}", frame.path, e);
                    if order == WalkOrder::PreOrder {
                        yield Ok(WalkItem { path: frame.path.clone(), meta: frame.meta });
                    }
                    yield Err((frame.path, e));
                    continue;
                }
            };

            let mut pending = Vec::with_capacity(children.len());
            for child in children {
                match child {
                    Ok(f) => pending.push(f),
                    Err(e) => yield Err(e),
                }
            }

            match order {
                WalkOrder::PreOrder => {
                    yield Ok(WalkItem { path: frame.path, meta: frame.meta });
                }
                WalkOrder::PostOrder => {
                    work.push(Frame { expanded: true, ..frame });
                }
            }
            // reversed, so that the first member is popped first.
            work.extend(pending.into_iter().rev());
        }
    }
}
