//! Contains the structs and traits that define a filesystem backend.
//!
//! The engine never touches storage directly. Everything it knows about
//! resources comes through [`DavFileSystem`]: existence and live metadata,
//! the members of a collection, content, and the primitive mutations
//! (create collection, remove, copy, rename). Recursive operations are
//! driven by the handler, one resource at a time.
//!
//! You only need this module if you want to plug in your own storage.
use std::error::Error;
use std::fmt::Debug;
use std::io;
use std::pin::Pin;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use futures_util::{future, Future, FutureExt, Stream};

use crate::davpath::DavPath;

macro_rules! notimplemented_fut {
    ($method:expr) => {{
        trace!("FS: {} not implemented", $method);
        Box::pin(future::ready(Err(FsError::NotImplemented)))
    }};
}

#[cfg(any(docsrs, feature = "memfs"))]
#[cfg_attr(docsrs, doc(cfg(feature = "memfs")))]
pub mod memfs;

/// Errors generated by a filesystem implementation.
///
/// These are more result-codes than errors, really.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    /// Operation not implemented (501)
    NotImplemented,
    /// Something went wrong (500)
    GeneralFailure,
    /// tried to create something, but it existed (405 / 412) (yes, 405. RFC4918 says so)
    Exists,
    /// File / Directory not found (404)
    NotFound,
    /// Not allowed (403)
    Forbidden,
    /// Collection still has members (409)
    NotEmpty,
    /// The backing store could not be reached (503)
    Unavailable,
    /// Out of space (507)
    InsufficientStorage,
    /// Path lives on another store (502)
    IsRemote,
}

impl std::fmt::Display for FsError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

impl Error for FsError {
    fn description(&self) -> &str {
        "DavFileSystem error"
    }
}

impl From<FsError> for io::Error {
    fn from(e: FsError) -> Self {
        let kind = match e {
            FsError::NotFound => io::ErrorKind::NotFound,
            FsError::Forbidden => io::ErrorKind::PermissionDenied,
            FsError::Exists => io::ErrorKind::AlreadyExists,
            _ => io::ErrorKind::Other,
        };
        io::Error::new(kind, e)
    }
}

/// The Result type.
pub type FsResult<T> = std::result::Result<T, FsError>;

/// A webdav "filesystem" returns futures of this type.
pub type FsFuture<'a, T> = Pin<Box<dyn Future<Output = FsResult<T>> + Send + 'a>>;

/// Stream of directory entries.
pub type FsStream<T> = Pin<Box<dyn Stream<Item = T> + Send>>;

/// Used as argument to the read_dir() method.
/// It is:
///
/// - an optimization hint (the implementation may call metadata() and
///   store the result in the returned directory entry)
/// - a way to get metadata instead of symlink_metadata from
///   the directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadDirMeta {
    /// DavDirEntry.metadata() behaves as metadata()
    Data,
    /// No optimizations, otherwise like Data.
    None,
}

/// The trait that defines a filesystem.
///
/// Every call may fail; the handler maps each [`FsError`] to a status
/// code, per resource for recursive operations.
pub trait DavFileSystem: Sync + Send {
    /// Open a file.
    fn open<'a>(&'a self, path: &'a DavPath, options: OpenOptions)
        -> FsFuture<'a, Box<dyn DavFile>>;

    /// List the members of a collection.
    fn read_dir<'a>(
        &'a self,
        path: &'a DavPath,
        meta: ReadDirMeta,
    ) -> FsFuture<'a, FsStream<Box<dyn DavDirEntry>>>;

    /// Return the metadata of a file or directory.
    fn metadata<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, Box<dyn DavMetaData>>;

    /// Does the resource exist.
    ///
    /// Only a `NotFound` answer means "no"; other errors are passed on.
    fn exists<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, bool> {
        async move {
            match self.metadata(path).await {
                Ok(_) => Ok(true),
                Err(FsError::NotFound) => Ok(false),
                Err(e) => Err(e),
            }
        }
        .boxed()
    }

    /// Is the resource a collection.
    fn is_collection<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, bool> {
        async move { Ok(self.metadata(path).await?.is_dir()) }.boxed()
    }

    /// Create a directory.
    ///
    /// The default implementation returns FsError::NotImplemented.
    #[allow(unused_variables)]
    fn create_dir<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, ()> {
        notimplemented_fut!("create_dir")
    }

    /// Remove an empty directory.
    ///
    /// The default implementation returns FsError::NotImplemented.
    #[allow(unused_variables)]
    fn remove_dir<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, ()> {
        notimplemented_fut!("remove_dir")
    }

    /// Remove a file.
    ///
    /// The default implementation returns FsError::NotImplemented.
    #[allow(unused_variables)]
    fn remove_file<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, ()> {
        notimplemented_fut!("remove_file")
    }

    /// Rename a file or directory, including everything below it.
    ///
    /// Source and destination must be in the same directory hierarchy.
    /// If the destination exists it has already been removed by the caller.
    ///
    /// The default implementation returns FsError::NotImplemented, in
    /// which case the handler falls back to copy + delete.
    #[allow(unused_variables)]
    fn rename<'a>(&'a self, from: &'a DavPath, to: &'a DavPath) -> FsFuture<'a, ()> {
        notimplemented_fut!("rename")
    }

    /// Copy a single file (not a collection).
    ///
    /// The default implementation returns FsError::NotImplemented.
    #[allow(unused_variables)]
    fn copy<'a>(&'a self, from: &'a DavPath, to: &'a DavPath) -> FsFuture<'a, ()> {
        notimplemented_fut!("copy")
    }
}

/// One directory entry (or child node).
pub trait DavDirEntry: Send + Sync {
    /// Name of the entry.
    fn name(&self) -> Vec<u8>;

    /// Metadata of the entry.
    fn metadata(&self) -> FsFuture<Box<dyn DavMetaData>>;
}

/// A `DavFile` is the equivalent of `std::fs::File`, should be
/// readable/writeable/seekable, and be able to return its metadata.
pub trait DavFile: Debug + Send + Sync {
    fn metadata(&mut self) -> FsFuture<Box<dyn DavMetaData>>;
    fn write_bytes(&mut self, buf: Bytes) -> FsFuture<()>;
    /// Read at most `count` bytes. An empty result means end of file.
    fn read_bytes(&mut self, count: usize) -> FsFuture<Bytes>;
    fn flush(&mut self) -> FsFuture<()>;
}

/// File metadata. Basically type, length, and some timestamps.
///
/// Everything the live properties are computed from.
pub trait DavMetaData: Debug + Send + Sync {
    /// Size of the file.
    fn len(&self) -> u64;
    /// `Modified` timestamp.
    fn modified(&self) -> FsResult<SystemTime>;
    /// File or directory (aka collection).
    fn is_dir(&self) -> bool;

    /// Simplistic implementation of etag()
    ///
    /// Returns a simple etag that basically is `<length>-<timestamp_in_ms>`
    /// with the numbers in hex. Enough for most implementations.
    fn etag(&self) -> Option<String> {
        if let Ok(t) = self.modified() {
            if let Ok(t) = t.duration_since(UNIX_EPOCH) {
                let t = t.as_secs() * 1000000 + t.subsec_nanos() as u64 / 1000;
                let tag = if self.is_file() && self.len() > 0 {
                    format!("{:x}-{:x}", self.len(), t)
                } else {
                    format!("{t:x}")
                };
                return Some(tag);
            }
        }
        None
    }

    /// Is this a file and not a directory. Default: `!is_dir()`.
    fn is_file(&self) -> bool {
        !self.is_dir()
    }

    /// Is this file empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Creation time.
    fn created(&self) -> FsResult<SystemTime> {
        Err(FsError::NotImplemented)
    }
}

/// OpenOptions for `open()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenOptions {
    /// open for reading
    pub read: bool,
    /// open for writing
    pub write: bool,
    /// open in write-append mode
    pub append: bool,
    /// truncate file first when writing
    pub truncate: bool,
    /// create file if it doesn't exist
    pub create: bool,
    /// must create new file, fail if it already exists.
    pub create_new: bool,
}

impl OpenOptions {
    #[allow(dead_code)]
    pub(crate) fn new() -> OpenOptions {
        OpenOptions::default()
    }

    pub(crate) fn read() -> OpenOptions {
        OpenOptions {
            read: true,
            ..OpenOptions::default()
        }
    }

    pub(crate) fn write() -> OpenOptions {
        OpenOptions {
            write: true,
            ..OpenOptions::default()
        }
    }
}
