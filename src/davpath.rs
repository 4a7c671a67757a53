//! Utility module to handle the path part of an URL as a filesytem path.
//!
//! A `DavPath` is stored percent-decoded and normalized: no empty
//! segments, no `.` and `..`, and a trailing slash only as a hint that
//! the resource is a collection. The URL prefix the path was found under
//! (see `DavBuilder::strip_prefix`) is kept so hrefs can be generated.
use std::error::Error;

use percent_encoding::{percent_decode, utf8_percent_encode, AsciiSet, CONTROLS};

/// URL path, with hidden prefix.
///
/// Equality and hashing only look at the decoded path.
#[derive(Clone)]
pub struct DavPath {
    // decoded path without prefix, always starting with '/'.
    path: String,
    // mount prefix, no trailing slash.
    prefix: String,
    // ends in a slash.
    coll: bool,
}

/// Error returned by some of the DavPath methods.
#[derive(Debug)]
pub enum ParseError {
    /// cannot parse
    InvalidPath,
    /// outside of prefix
    PrefixMismatch,
    /// too many dotdots
    ForbiddenPath,
}

impl Error for ParseError {
    fn description(&self) -> &str {
        "DavPath parse error"
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

impl From<ParseError> for crate::DavError {
    fn from(e: ParseError) -> Self {
        match e {
            ParseError::InvalidPath => crate::DavError::InvalidPath,
            ParseError::PrefixMismatch => crate::DavError::IllegalPath,
            ParseError::ForbiddenPath => crate::DavError::ForbiddenPath,
        }
    }
}

// encode all non-unreserved characters, except '/'.
const PATH_ENCODE_SET: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'[')
    .add(b'\\')
    .add(b']')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}');

impl PartialEq for DavPath {
    fn eq(&self, other: &DavPath) -> bool {
        self.path == other.path
    }
}

impl Eq for DavPath {}

impl std::hash::Hash for DavPath {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.path.hash(state);
    }
}

impl std::fmt::Display for DavPath {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.as_url_string_with_prefix())
    }
}

impl std::fmt::Debug for DavPath {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{:?}", self.as_url_string_with_prefix())
    }
}

// Decode and normalize, "." and ".." are resolved.
fn normalize_path(rp: &str) -> Result<(String, bool), ParseError> {
    if !rp.starts_with('/') {
        return Err(ParseError::InvalidPath);
    }
    let decoded = percent_decode(rp.as_bytes())
        .decode_utf8()
        .map_err(|_| ParseError::InvalidPath)?;
    if decoded.contains('\0') {
        return Err(ParseError::InvalidPath);
    }
    let coll = decoded.ends_with('/') || decoded.ends_with("/.") || decoded.ends_with("/..");

    let mut segments: Vec<&str> = Vec::new();
    for seg in decoded.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                if segments.pop().is_none() {
                    return Err(ParseError::ForbiddenPath);
                }
            }
            s => segments.push(s),
        }
    }
    let path = format!("/{}", segments.join("/"));
    let coll = coll || path == "/";
    Ok((path, coll))
}

impl DavPath {
    /// from URL encoded string
    pub fn new(src: &str) -> Result<DavPath, ParseError> {
        let (path, coll) = normalize_path(src)?;
        Ok(DavPath {
            path,
            prefix: String::new(),
            coll,
        })
    }

    /// from URL encoded string and non-encoded prefix.
    pub fn from_str_and_prefix(src: &str, prefix: &str) -> Result<DavPath, ParseError> {
        let prefix = prefix.trim_end_matches('/');
        let rest = if prefix.is_empty() {
            src
        } else {
            let rest = src.strip_prefix(prefix).ok_or(ParseError::PrefixMismatch)?;
            if rest.is_empty() {
                "/"
            } else if !rest.starts_with('/') {
                return Err(ParseError::PrefixMismatch);
            } else {
                rest
            }
        };
        let mut davpath = DavPath::new(rest)?;
        davpath.prefix = prefix.to_string();
        Ok(davpath)
    }

    /// from request.uri
    pub(crate) fn from_uri_and_prefix(uri: &http::uri::Uri, prefix: &str) -> Result<Self, ParseError> {
        match uri.path() {
            "*" => Ok(DavPath {
                path: "*".to_string(),
                prefix: String::new(),
                coll: false,
            }),
            path if path.starts_with('/') => DavPath::from_str_and_prefix(path, prefix),
            _ => Err(ParseError::InvalidPath),
        }
    }

    /// Set prefix.
    pub fn set_prefix(&mut self, prefix: &str) {
        self.prefix = prefix.trim_end_matches('/').to_string();
    }

    /// Return the prefix.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// is this a "star" request (only used with OPTIONS)
    pub(crate) fn is_star(&self) -> bool {
        self.path == "*"
    }

    /// Is this the root of the tree.
    pub fn is_root(&self) -> bool {
        self.path == "/"
    }

    /// Decoded path without prefix and without trailing slash ("/" for the root).
    ///
    /// This is the key under which locks and properties are stored.
    pub fn as_str(&self) -> &str {
        &self.path
    }

    /// as URL encoded string, without prefix.
    pub fn as_url_string(&self) -> String {
        let mut s = utf8_percent_encode(&self.path, PATH_ENCODE_SET).to_string();
        if self.coll && !self.is_root() {
            s.push('/');
        }
        s
    }

    /// as URL encoded string, with prefix.
    pub fn as_url_string_with_prefix(&self) -> String {
        let mut s = utf8_percent_encode(&self.prefix, PATH_ENCODE_SET).to_string();
        s.push_str(&self.as_url_string());
        s
    }

    /// is this a collection i.e. does the original URL path end in "/".
    pub fn is_collection(&self) -> bool {
        self.coll
    }

    // add a slash if this is a collection.
    pub(crate) fn add_slash_if(&mut self, b: bool) {
        if b {
            self.coll = true;
        }
    }

    /// Add a segment to the end of the path.
    pub(crate) fn push_segment(&mut self, b: &[u8]) {
        let seg = String::from_utf8_lossy(b);
        if !self.is_root() {
            self.path.push('/');
        }
        self.path.push_str(&seg);
        self.coll = false;
    }

    /// Return the parent directory.
    pub fn parent(&self) -> DavPath {
        let path = match self.path.rfind('/') {
            Some(0) | None => "/".to_string(),
            Some(idx) => self.path[..idx].to_string(),
        };
        DavPath {
            path,
            prefix: self.prefix.clone(),
            coll: true,
        }
    }

    /// The last segment of the path, empty for the root.
    pub fn file_name(&self) -> &str {
        match self.path.rfind('/') {
            Some(idx) => &self.path[idx + 1..],
            None => "",
        }
    }

    /// The non-empty segments of the path.
    pub(crate) fn segments(&self) -> impl Iterator<Item = &str> {
        self.path.split('/').filter(|s| !s.is_empty())
    }

    /// Is `self` equal to `other`, or above it in the tree.
    pub fn is_ancestor_or_self(&self, other: &DavPath) -> bool {
        is_ancestor_or_self(&self.path, &other.path)
    }

    /// Is `self` strictly above `other` in the tree.
    pub fn is_ancestor_of(&self, other: &DavPath) -> bool {
        self.path != other.path && self.is_ancestor_or_self(other)
    }

    /// Map a path below `from` to the same relative place below `to`.
    ///
    /// Returns None if `self` is not below (or equal to) `from`.
    pub(crate) fn rebase(&self, from: &DavPath, to: &DavPath) -> Option<DavPath> {
        if !from.is_ancestor_or_self(self) {
            return None;
        }
        let rest = &self.path[from.path.len()..];
        let rest = rest.trim_start_matches('/');
        let mut path = to.path.clone();
        if !rest.is_empty() {
            if path != "/" {
                path.push('/');
            }
            path.push_str(rest);
        }
        Some(DavPath {
            path,
            prefix: to.prefix.clone(),
            coll: self.coll,
        })
    }
}

/// Is the string path `a` equal to, or an ancestor of, string path `b`.
pub(crate) fn is_ancestor_or_self(a: &str, b: &str) -> bool {
    if a == "/" || a == b {
        return true;
    }
    b.len() > a.len() && b.starts_with(a) && b.as_bytes()[a.len()] == b'/'
}
