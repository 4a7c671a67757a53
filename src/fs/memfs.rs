//! Simple in-memory filesystem.
//!
//! This implementation has state, so if you create a
//! new instance in a handler(), it will be empty every time.
//!
//! This means you have to create the instance once, using `MemFs::new`, store
//! it in your handler struct, and clone() it every time you pass
//! it to the DavHandler. As a MemFs struct is just a handle, cloning is cheap.
use std::sync::Arc;
use std::time::SystemTime;

use bytes::Bytes;
use futures_util::{future, FutureExt};
use parking_lot::Mutex;

use crate::davpath::DavPath;
use crate::fs::*;
use crate::tree;

type Tree = tree::Tree<String, MemFsNode>;

/// Ephemeral in-memory filesystem.
#[derive(Debug, Clone)]
pub struct MemFs {
    tree: Arc<Mutex<Tree>>,
}

#[derive(Debug, Clone)]
enum MemFsNode {
    Dir(MemFsDirNode),
    File(MemFsFileNode),
}

#[derive(Debug, Clone)]
struct MemFsDirNode {
    mtime: SystemTime,
    crtime: SystemTime,
}

#[derive(Debug, Clone)]
struct MemFsFileNode {
    mtime: SystemTime,
    crtime: SystemTime,
    data: Vec<u8>,
}

#[derive(Debug, Clone)]
struct MemFsDirEntry {
    mtime: SystemTime,
    crtime: SystemTime,
    is_dir: bool,
    name: Vec<u8>,
    size: u64,
}

#[derive(Debug)]
struct MemFsFile {
    tree: Arc<Mutex<Tree>>,
    node_id: u64,
    pos: usize,
    append: bool,
}

impl MemFs {
    /// Create a new "memfs" filesystem.
    pub fn new() -> Arc<MemFs> {
        let root = MemFsNode::new_dir();
        Arc::new(MemFs {
            tree: Arc::new(Mutex::new(Tree::new(root))),
        })
    }

    fn do_open(&self, tree: &mut Tree, path: &DavPath, options: OpenOptions) -> FsResult<Box<dyn DavFile>> {
        let node_id = match lookup(tree, path) {
            Ok(n) => {
                if options.create_new {
                    return Err(FsError::Exists);
                }
                n
            }
            Err(FsError::NotFound) => {
                if !options.create {
                    return Err(FsError::NotFound);
                }
                let parent_id = lookup(tree, &path.parent())?;
                if !tree.get_node(parent_id)?.is_dir() {
                    return Err(FsError::Forbidden);
                }
                tree.add_child(parent_id, path.file_name().to_string(), MemFsNode::new_file(), true)?
            }
            Err(e) => return Err(e),
        };
        let node = tree.get_node_mut(node_id)?;
        if node.is_dir() {
            return Err(FsError::Forbidden);
        }
        if options.truncate {
            node.truncate();
        }
        Ok(Box::new(MemFsFile {
            tree: self.tree.clone(),
            node_id,
            pos: 0,
            append: options.append,
        }))
    }
}

// Walk the path from the root.
fn lookup(tree: &Tree, path: &DavPath) -> FsResult<u64> {
    let mut node_id = tree::ROOT_ID;
    let mut is_dir = true;
    for seg in path.segments() {
        if !is_dir {
            return Err(FsError::Forbidden);
        }
        node_id = tree.get_child(node_id, seg)?;
        is_dir = tree.get_node(node_id)?.is_dir();
    }
    Ok(node_id)
}

impl DavFileSystem for MemFs {
    fn metadata<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, Box<dyn DavMetaData>> {
        async move {
            let tree = &*self.tree.lock();
            let node_id = lookup(tree, path)?;
            let meta = tree.get_node(node_id)?.as_dirent(path.file_name().as_bytes());
            Ok(Box::new(meta) as Box<dyn DavMetaData>)
        }
        .boxed()
    }

    fn read_dir<'a>(
        &'a self,
        path: &'a DavPath,
        _meta: ReadDirMeta,
    ) -> FsFuture<'a, FsStream<Box<dyn DavDirEntry>>> {
        async move {
            trace!("FS: read_dir {path:?}");
            let tree = &*self.tree.lock();
            let node_id = lookup(tree, path)?;
            if !tree.get_node(node_id)?.is_dir() {
                return Err(FsError::Forbidden);
            }
            let mut v: Vec<Box<dyn DavDirEntry>> = Vec::new();
            for (name, dnode_id) in tree.get_children(node_id)? {
                if let Ok(node) = tree.get_node(dnode_id) {
                    v.push(Box::new(node.as_dirent(name.as_bytes())));
                }
            }
            let strm = futures_util::stream::iter(v);
            Ok(Box::pin(strm) as FsStream<Box<dyn DavDirEntry>>)
        }
        .boxed()
    }

    fn open<'a>(&'a self, path: &'a DavPath, options: OpenOptions) -> FsFuture<'a, Box<dyn DavFile>> {
        async move {
            trace!("FS: open {path:?}");
            let tree = &mut *self.tree.lock();
            self.do_open(tree, path, options)
        }
        .boxed()
    }

    fn create_dir<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, ()> {
        async move {
            trace!("FS: create_dir {path:?}");
            let tree = &mut *self.tree.lock();
            let parent_id = lookup(tree, &path.parent())?;
            if !tree.get_node(parent_id)?.is_dir() {
                return Err(FsError::Forbidden);
            }
            tree.add_child(parent_id, path.file_name().to_string(), MemFsNode::new_dir(), false)?;
            tree.get_node_mut(parent_id)?.update_mtime(SystemTime::now());
            Ok(())
        }
        .boxed()
    }

    fn remove_dir<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, ()> {
        async move {
            trace!("FS: remove_dir {path:?}");
            let tree = &mut *self.tree.lock();
            let node_id = lookup(tree, path)?;
            if !tree.get_node(node_id)?.is_dir() {
                return Err(FsError::Forbidden);
            }
            tree.delete_node(node_id)
        }
        .boxed()
    }

    fn remove_file<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, ()> {
        async move {
            trace!("FS: remove_file {path:?}");
            let tree = &mut *self.tree.lock();
            let node_id = lookup(tree, path)?;
            if tree.get_node(node_id)?.is_dir() {
                return Err(FsError::Forbidden);
            }
            tree.delete_node(node_id)
        }
        .boxed()
    }

    fn rename<'a>(&'a self, from: &'a DavPath, to: &'a DavPath) -> FsFuture<'a, ()> {
        async move {
            trace!("FS: rename {from:?} {to:?}");
            let tree = &mut *self.tree.lock();
            let node_id = lookup(tree, from)?;
            let parent_id = lookup(tree, &to.parent())?;
            if !tree.get_node(parent_id)?.is_dir() {
                return Err(FsError::Forbidden);
            }
            tree.move_node(node_id, parent_id, to.file_name().to_string(), true)
        }
        .boxed()
    }

    fn copy<'a>(&'a self, from: &'a DavPath, to: &'a DavPath) -> FsFuture<'a, ()> {
        async move {
            trace!("FS: copy {from:?} {to:?}");
            let tree = &mut *self.tree.lock();
            let snode_id = lookup(tree, from)?;
            let node = match tree.get_node(snode_id)? {
                MemFsNode::Dir(_) => return Err(FsError::Forbidden),
                MemFsNode::File(f) => MemFsNode::File(MemFsFileNode {
                    mtime: SystemTime::now(),
                    crtime: SystemTime::now(),
                    data: f.data.clone(),
                }),
            };
            let parent_id = lookup(tree, &to.parent())?;
            if !tree.get_node(parent_id)?.is_dir() {
                return Err(FsError::Forbidden);
            }
            tree.add_child(parent_id, to.file_name().to_string(), node, true)?;
            Ok(())
        }
        .boxed()
    }
}

impl DavDirEntry for MemFsDirEntry {
    fn metadata(&self) -> FsFuture<Box<dyn DavMetaData>> {
        let meta = (*self).clone();
        Box::pin(future::ok(Box::new(meta) as Box<dyn DavMetaData>))
    }

    fn name(&self) -> Vec<u8> {
        self.name.clone()
    }
}

impl DavFile for MemFsFile {
    fn metadata(&mut self) -> FsFuture<Box<dyn DavMetaData>> {
        async move {
            let tree = &*self.tree.lock();
            let node = tree.get_node(self.node_id)?;
            let meta = node.as_dirent(b"");
            Ok(Box::new(meta) as Box<dyn DavMetaData>)
        }
        .boxed()
    }

    fn read_bytes(&mut self, count: usize) -> FsFuture<Bytes> {
        async move {
            let tree = &*self.tree.lock();
            let node = tree.get_node(self.node_id)?;
            let file = node.as_file()?;
            let start = std::cmp::min(self.pos, file.data.len());
            let end = std::cmp::min(start + count, file.data.len());
            self.pos = end;
            Ok(Bytes::copy_from_slice(&file.data[start..end]))
        }
        .boxed()
    }

    fn write_bytes(&mut self, buf: Bytes) -> FsFuture<()> {
        async move {
            let tree = &mut *self.tree.lock();
            let node = tree.get_node_mut(self.node_id)?;
            let file = node.as_file_mut()?;
            if self.append {
                self.pos = file.data.len();
            }
            let end = self.pos + buf.len();
            if end > file.data.len() {
                file.data.resize(end, 0);
            }
            file.data[self.pos..end].copy_from_slice(&buf);
            self.pos = end;
            file.mtime = SystemTime::now();
            Ok(())
        }
        .boxed()
    }

    fn flush(&mut self) -> FsFuture<()> {
        future::ok(()).boxed()
    }
}

impl DavMetaData for MemFsDirEntry {
    fn len(&self) -> u64 {
        self.size
    }

    fn created(&self) -> FsResult<SystemTime> {
        Ok(self.crtime)
    }

    fn modified(&self) -> FsResult<SystemTime> {
        Ok(self.mtime)
    }

    fn is_dir(&self) -> bool {
        self.is_dir
    }
}

impl MemFsNode {
    fn new_dir() -> MemFsNode {
        MemFsNode::Dir(MemFsDirNode {
            crtime: SystemTime::now(),
            mtime: SystemTime::now(),
        })
    }

    fn new_file() -> MemFsNode {
        MemFsNode::File(MemFsFileNode {
            crtime: SystemTime::now(),
            mtime: SystemTime::now(),
            data: Vec::new(),
        })
    }

    // helper to create MemFsDirEntry from a node.
    fn as_dirent(&self, name: &[u8]) -> MemFsDirEntry {
        let (is_dir, size, mtime, crtime) = match self {
            MemFsNode::File(file) => (false, file.data.len() as u64, file.mtime, file.crtime),
            MemFsNode::Dir(dir) => (true, 0, dir.mtime, dir.crtime),
        };
        MemFsDirEntry {
            name: name.to_vec(),
            mtime,
            crtime,
            is_dir,
            size,
        }
    }

    fn update_mtime(&mut self, tm: SystemTime) {
        match self {
            MemFsNode::Dir(d) => d.mtime = tm,
            MemFsNode::File(f) => f.mtime = tm,
        }
    }

    fn truncate(&mut self) {
        if let MemFsNode::File(f) = self {
            f.data.truncate(0);
            f.mtime = SystemTime::now();
        }
    }

    fn is_dir(&self) -> bool {
        matches!(self, MemFsNode::Dir(_))
    }

    fn as_file(&self) -> FsResult<&MemFsFileNode> {
        match self {
            MemFsNode::File(n) => Ok(n),
            _ => Err(FsError::Forbidden),
        }
    }

    fn as_file_mut(&mut self) -> FsResult<&mut MemFsFileNode> {
        match self {
            MemFsNode::File(n) => Ok(n),
            _ => Err(FsError::Forbidden),
        }
    }
}

// Used in tests to look at the whole tree at once.
#[cfg(test)]
impl MemFs {
    pub(crate) fn dump(&self) -> std::collections::HashMap<String, bool> {
        let tree = self.tree.lock();
        let mut out = std::collections::HashMap::new();
        let mut work = vec![(tree::ROOT_ID, String::new())];
        while let Some((id, path)) = work.pop() {
            if let Ok(children) = tree.get_children(id) {
                for (name, cid) in children {
                    let p = format!("{path}/{name}");
                    let is_dir = tree.get_node(cid).map(|n| n.is_dir()).unwrap_or(false);
                    out.insert(p.clone(), is_dir);
                    work.push((cid, p));
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    fn p(s: &str) -> DavPath {
        DavPath::new(s).unwrap()
    }

    #[tokio::test]
    async fn create_write_read() {
        let fs = MemFs::new();
        fs.create_dir(&p("/docs")).await.unwrap();
        let mut opts = OpenOptions::write();
        opts.create = true;
        let mut f = fs.open(&p("/docs/a.txt"), opts).await.unwrap();
        f.write_bytes(Bytes::from_static(b"hello")).await.unwrap();

        let meta = fs.metadata(&p("/docs/a.txt")).await.unwrap();
        assert_eq!(meta.len(), 5);
        assert!(meta.is_file());
        assert!(fs.is_collection(&p("/docs")).await.unwrap());

        let mut f = fs.open(&p("/docs/a.txt"), OpenOptions::read()).await.unwrap();
        assert_eq!(&f.read_bytes(3).await.unwrap()[..], b"hel");
        assert_eq!(&f.read_bytes(10).await.unwrap()[..], b"lo");
        assert!(f.read_bytes(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn read_dir_lists_members() {
        let fs = MemFs::new();
        fs.create_dir(&p("/a")).await.unwrap();
        fs.create_dir(&p("/a/b")).await.unwrap();
        let mut opts = OpenOptions::write();
        opts.create = true;
        fs.open(&p("/a/c"), opts).await.unwrap();
        let entries: Vec<_> = fs
            .read_dir(&p("/a"), ReadDirMeta::Data)
            .await
            .unwrap()
            .collect()
            .await;
        let mut names: Vec<_> = entries
            .iter()
            .map(|e| String::from_utf8(e.name()).unwrap())
            .collect();
        names.sort();
        assert_eq!(names, vec!["b", "c"]);
    }

    #[tokio::test]
    async fn errors_are_distinguishable() {
        let fs = MemFs::new();
        assert_eq!(fs.metadata(&p("/nope")).await.unwrap_err(), FsError::NotFound);
        assert!(!fs.exists(&p("/nope")).await.unwrap());
        fs.create_dir(&p("/a")).await.unwrap();
        assert_eq!(fs.create_dir(&p("/a")).await.unwrap_err(), FsError::Exists);
        fs.create_dir(&p("/a/b")).await.unwrap();
        assert_eq!(fs.remove_dir(&p("/a")).await.unwrap_err(), FsError::NotEmpty);
        assert_eq!(
            fs.create_dir(&p("/x/y")).await.unwrap_err(),
            FsError::NotFound
        );
    }

    #[tokio::test]
    async fn rename_moves_subtree() {
        let fs = MemFs::new();
        fs.create_dir(&p("/a")).await.unwrap();
        fs.create_dir(&p("/a/b")).await.unwrap();
        fs.rename(&p("/a"), &p("/z")).await.unwrap();
        let dump = fs.dump();
        assert_eq!(dump.get("/z/b"), Some(&true));
        assert!(!dump.contains_key("/a"));
    }
}
