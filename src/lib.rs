//! ## Generic async WebDAV protocol engine
//!
//! [`Webdav`] (RFC4918) is defined as
//! HTTP (GET/HEAD/PUT/DELETE) plus a bunch of extension methods (PROPFIND, etc).
//! These extension methods are used to manage collections (like unix directories),
//! get information on collections (like unix `ls` or `readdir`), rename and
//! copy items, lock/unlock items, etc.
//!
//! A `handler` is a piece of code that takes a `http::Request`, processes it in some
//! way, and then generates a `http::Response`. This library is a `handler` that maps
//! the WebDAV protocol onto a tree of resources. The tree lives behind a trait, and
//! an in-memory implementation (`memfs`) is included.
//!
//! The handler works with the standard http types from the `http` and `http_body`
//! crates, so it can be used with any HTTP server that speaks those types.
//! Transport, authentication and TLS are up to that server.
//!
//! ## Backend interfaces.
//!
//! - the library contains a [HTTP handler][DavHandler].
//! - you supply a [filesystem][fs::DavFileSystem] for the resource tree.
//! - you can supply a [property store][props::DavPropStore] for dead properties.
//!   Live properties (`getetag`, `lockdiscovery`, ...) are computed from the
//!   resource and can be extended with [`DavBuilder::live_property`].
//! - you can supply a [locksystem][ls::DavLockSystem] that handles webdav locks.
//!
//! All three come with an ephemeral in-memory implementation:
//! [`MemFs`](fs::memfs::MemFs), [`MemPs`](props::memps::MemPs) and
//! [`MemLs`](ls::memls::MemLs).
//!
//! ## Locking.
//!
//! Write locks (exclusive and shared, depth 0 or infinity) with timeouts are
//! implemented. A mutating request has to present the tokens of the locks that
//! cover what it changes in the `If:` header. Expired locks are dropped lazily
//! and are never honored.
//!
//! ## Example.
//!
//! ```no_run
//! use dav_engine::{body::Body, DavHandler, FileSystem};
//!
//! #[tokio::main]
//! async fn main() {
//!     let dav = DavHandler::builder(FileSystem::Mem)
//!         .strip_prefix("/dav")
//!         .principal("alice")
//!         .build();
//!
//!     let req = http::Request::builder()
//!         .method("MKCOL")
//!         .uri("/dav/docs/")
//!         .body(Body::empty())
//!         .unwrap();
//!     let resp = dav.handle(req).await;
//!     assert_eq!(resp.status(), 201);
//! }
//! ```
//!
//! [`Webdav`]: https://tools.ietf.org/html/rfc4918

#![cfg_attr(docsrs, feature(doc_cfg))]

#[macro_use]
extern crate log;
#[macro_use]
extern crate lazy_static;

mod conditional;
mod davhandler;
mod davheaders;
mod errors;
mod multistatus;
#[cfg(any(docsrs, feature = "memfs"))]
mod tree;
mod util;
mod walk;
mod xmltree_ext;

pub mod body;
pub mod davpath;
pub mod fs;
pub mod ls;
pub mod props;

use crate::errors::{DavError, DavResult};

pub use crate::davhandler::{DavBuilder, DavHandler, FileSystem, LockSystem, PropStore};
pub use crate::util::{DavMethod, DavMethodSet};
