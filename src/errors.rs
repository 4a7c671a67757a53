use std::error::Error;
use std::io::{self, ErrorKind};

use http::StatusCode;
use xml::reader::Error as XmlReaderError;
use xml::writer::Error as XmlWriterError;

use crate::fs::FsError;
use crate::props::PropError;

pub(crate) type DavResult<T> = Result<T, DavError>;

#[derive(Debug)]
pub(crate) enum DavError {
    XmlReadError,  // error reading/parsing xml
    XmlParseError, // error interpreting xml
    InvalidPath,   // error parsing path
    IllegalPath,   // path not valid here
    ForbiddenPath, // too many dotdots
    UnknownDavMethod,
    CrossStore, // destination on another host or mount
    Status(StatusCode),
    StatusClose(StatusCode),
    FsError(FsError),
    PropError(PropError),
    IoError(io::Error),
    XmlReaderError(XmlReaderError),
    XmlWriterError(XmlWriterError),
}

impl Error for DavError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            DavError::FsError(e) => Some(e),
            DavError::PropError(e) => Some(e),
            DavError::IoError(e) => Some(e),
            DavError::XmlReaderError(e) => Some(e),
            DavError::XmlWriterError(e) => Some(e),
            _ => None,
        }
    }
}

impl std::fmt::Display for DavError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            DavError::XmlReaderError(_) => write!(f, "XML parse error"),
            DavError::XmlWriterError(_) => write!(f, "XML generate error"),
            DavError::IoError(_) => write!(f, "I/O error"),
            DavError::PropError(e) => write!(f, "property store: {e}"),
            _ => write!(f, "{self:?}"),
        }
    }
}

impl From<FsError> for DavError {
    fn from(e: FsError) -> Self {
        DavError::FsError(e)
    }
}

impl From<PropError> for DavError {
    fn from(e: PropError) -> Self {
        DavError::PropError(e)
    }
}

impl From<DavError> for io::Error {
    fn from(e: DavError) -> Self {
        match e {
            DavError::IoError(e) => e,
            DavError::FsError(e) => e.into(),
            _ => io::Error::new(io::ErrorKind::Other, e),
        }
    }
}

impl From<io::Error> for DavError {
    fn from(e: io::Error) -> Self {
        DavError::IoError(e)
    }
}

impl From<StatusCode> for DavError {
    fn from(e: StatusCode) -> Self {
        DavError::Status(e)
    }
}

impl From<XmlReaderError> for DavError {
    fn from(e: XmlReaderError) -> Self {
        DavError::XmlReaderError(e)
    }
}

impl From<XmlWriterError> for DavError {
    fn from(e: XmlWriterError) -> Self {
        DavError::XmlWriterError(e)
    }
}

impl From<xmltree::ParseError> for DavError {
    fn from(_: xmltree::ParseError) -> Self {
        DavError::XmlReadError
    }
}

fn ioerror_to_status(ioerror: &io::Error) -> StatusCode {
    match ioerror.kind() {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::PermissionDenied => StatusCode::FORBIDDEN,
        ErrorKind::AlreadyExists => StatusCode::CONFLICT,
        ErrorKind::TimedOut => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::BAD_GATEWAY,
    }
}

pub(crate) fn fserror_to_status(e: &FsError) -> StatusCode {
    match e {
        FsError::NotImplemented => StatusCode::NOT_IMPLEMENTED,
        FsError::GeneralFailure => StatusCode::INTERNAL_SERVER_ERROR,
        FsError::Exists => StatusCode::METHOD_NOT_ALLOWED,
        FsError::NotFound => StatusCode::NOT_FOUND,
        FsError::Forbidden => StatusCode::FORBIDDEN,
        FsError::NotEmpty => StatusCode::CONFLICT,
        FsError::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        FsError::InsufficientStorage => StatusCode::INSUFFICIENT_STORAGE,
        FsError::IsRemote => StatusCode::BAD_GATEWAY,
    }
}

pub(crate) fn properror_to_status(e: &PropError) -> StatusCode {
    match e {
        PropError::Conflict => StatusCode::CONFLICT,
        PropError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

impl DavError {
    pub(crate) fn statuscode(&self) -> StatusCode {
        match self {
            DavError::XmlReadError => StatusCode::BAD_REQUEST,
            DavError::XmlParseError => StatusCode::BAD_REQUEST,
            DavError::InvalidPath => StatusCode::BAD_REQUEST,
            DavError::IllegalPath => StatusCode::BAD_GATEWAY,
            DavError::ForbiddenPath => StatusCode::FORBIDDEN,
            DavError::UnknownDavMethod => StatusCode::NOT_IMPLEMENTED,
            DavError::CrossStore => StatusCode::BAD_GATEWAY,
            DavError::Status(e) => *e,
            DavError::StatusClose(e) => *e,
            DavError::FsError(e) => fserror_to_status(e),
            DavError::PropError(e) => properror_to_status(e),
            DavError::IoError(e) => ioerror_to_status(e),
            DavError::XmlReaderError(_) => StatusCode::BAD_REQUEST,
            DavError::XmlWriterError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub(crate) fn must_close(&self) -> bool {
        !matches!(
            self,
            &DavError::Status(_)
                | &DavError::FsError(FsError::NotFound)
                | &DavError::FsError(FsError::Forbidden)
                | &DavError::FsError(FsError::Exists)
        )
    }
}
