use std::error::Error as StdError;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use rusoto_core::RusotoError;
use rusoto_s3::{
    AbortMultipartUploadError, CompleteMultipartUploadError, CreateMultipartUploadError,
    DeleteObjectsError, ListObjectsV2Error, PutObjectError, UploadPartError,
};
use tokio::io;

#[derive(Debug)]
pub struct StringError(String);
impl fmt::Display for StringError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
impl StdError for StringError {}
impl From<String> for StringError {
    fn from(s: String) -> StringError {
        StringError(s)
    }
}

/// Coarse failure classes reported by the storage platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    PermissionDenied,
    NotFound,
    Transient,
    Other,
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Kind::PermissionDenied => "permission denied",
            Kind::NotFound => "not found",
            Kind::Transient => "transient failure",
            Kind::Other => "request failed",
        };
        f.write_str(s)
    }
}

/// A working prefix whose deletion failed during clean.
#[derive(Debug)]
pub struct PrefixFailure {
    pub prefix: String,
    pub cause: Error,
}

#[derive(Debug)]
pub enum Error {
    Io(io::Error),
    Nix(nix::Error),
    Remote { kind: Kind, message: String },
    Timeout { op: String, after: Duration },
    SeedNotFound(PathBuf),
    Step { step: String, cause: Box<Error> },
    PartialUpload { key: String, uploaded: usize, total: usize, cause: Box<Error> },
    CleanFailed(Vec<PrefixFailure>),
    Config(StringError),
}

impl Error {
    pub fn remote<S: Into<String>>(kind: Kind, message: S) -> Self {
        Self::Remote { kind, message: message.into() }
    }

    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config(StringError(message.into()))
    }

    pub fn step<S: Into<String>>(step: S, cause: Error) -> Self {
        Self::Step { step: step.into(), cause: Box::new(cause) }
    }

    /// Classification used for exit codes and retry decisions.
    pub fn kind(&self) -> Kind {
        match self {
            Self::Remote { kind, .. } => *kind,
            Self::SeedNotFound(_) => Kind::NotFound,
            Self::Io(e) if e.kind() == io::ErrorKind::NotFound => Kind::NotFound,
            Self::Io(e) if e.kind() == io::ErrorKind::PermissionDenied => Kind::PermissionDenied,
            Self::Step { cause, .. } => cause.kind(),
            Self::Timeout { .. } => Kind::Transient,
            _ => Kind::Other,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Remote { kind: Kind::Transient, .. } | Self::Timeout { .. } => true,
            _ => false,
        }
    }

    fn is_timeout(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::Step { cause, .. } => cause.is_timeout(),
            _ => false,
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            Self::PartialUpload { .. } => 7,
            Self::CleanFailed(_) => 8,
            Self::Config(_) => 1,
            e if e.is_timeout() => 6,
            e => match e.kind() {
                Kind::PermissionDenied => 3,
                Kind::NotFound => 4,
                Kind::Transient => 5,
                Kind::Other => 1,
            },
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "{}", e),
            Self::Nix(e) => write!(f, "{}", e),
            Self::Remote { kind, message } => write!(f, "{}: {}", kind, message),
            Self::Timeout { op, after } => {
                write!(f, "{} timed out after {}s", op, after.as_secs_f64())
            }
            Self::SeedNotFound(path) => write!(f, "seed path not found: {}", path.display()),
            Self::Step { step, cause } => write!(f, "{} failed: {}", step, cause),
            Self::PartialUpload { key, uploaded, total, cause } => write!(
                f,
                "upload of {} failed after {}/{} seed objects: {}; \
                 bucket is in an intermediate state, re-run reset",
                key, uploaded, total, cause
            ),
            Self::CleanFailed(failures) => {
                write!(f, "failed to clean {} prefix(es):", failures.len())?;
                for failure in failures {
                    write!(f, "\n  {}: {}", failure.prefix, failure.cause)?;
                }
                Ok(())
            }
            Self::Config(e) => write!(f, "invalid configuration: {}", e),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Nix(e) => Some(e),
            Self::Step { cause, .. } => Some(cause.as_ref()),
            Self::PartialUpload { cause, .. } => Some(cause.as_ref()),
            Self::Config(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}
impl From<nix::Error> for Error {
    fn from(e: nix::Error) -> Self {
        Self::Nix(e)
    }
}

/// Maps modeled S3 service errors onto a failure class.
pub trait ServiceKind {
    fn service_kind(&self) -> Kind {
        Kind::Other
    }
}

impl ServiceKind for ListObjectsV2Error {
    fn service_kind(&self) -> Kind {
        match self {
            ListObjectsV2Error::NoSuchBucket(_) => Kind::NotFound,
        }
    }
}
impl ServiceKind for DeleteObjectsError {}
impl ServiceKind for PutObjectError {}
impl ServiceKind for CreateMultipartUploadError {}
impl ServiceKind for UploadPartError {}
impl ServiceKind for CompleteMultipartUploadError {}
impl ServiceKind for AbortMultipartUploadError {}

/// Classifies an S3 error code such as `AccessDenied` or `SlowDown`.
pub fn kind_of_code(code: &str) -> Kind {
    match code {
        "AccessDenied" | "AllAccessDisabled" | "InvalidAccessKeyId" | "SignatureDoesNotMatch"
        | "ExpiredToken" => Kind::PermissionDenied,
        "NoSuchBucket" | "NoSuchKey" | "NoSuchUpload" => Kind::NotFound,
        "SlowDown" | "InternalError" | "ServiceUnavailable" | "RequestTimeout" => Kind::Transient,
        _ => Kind::Other,
    }
}

pub fn kind_of_status(status: u16) -> Kind {
    match status {
        401 | 403 => Kind::PermissionDenied,
        404 => Kind::NotFound,
        408 | 429 | 500 | 502 | 503 | 504 => Kind::Transient,
        _ => Kind::Other,
    }
}

impl<E> From<RusotoError<E>> for Error
where
    E: ServiceKind + StdError + 'static,
{
    fn from(e: RusotoError<E>) -> Self {
        match e {
            RusotoError::Service(e) => Error::remote(e.service_kind(), e.to_string()),
            RusotoError::HttpDispatch(e) => Error::remote(Kind::Transient, e.to_string()),
            RusotoError::Credentials(e) => Error::remote(Kind::PermissionDenied, e.to_string()),
            RusotoError::Unknown(resp) => {
                let body = String::from_utf8_lossy(&resp.body).into_owned();
                let kind = match kind_of_status(resp.status.as_u16()) {
                    Kind::Other => error_code(&body).map(kind_of_code).unwrap_or(Kind::Other),
                    kind => kind,
                };
                Error::remote(kind, format!("HTTP {}: {}", resp.status.as_u16(), body.trim()))
            }
            e => Error::remote(Kind::Other, e.to_string()),
        }
    }
}

/// Extracts `<Code>...</Code>` from an S3 XML error body.
fn error_code(body: &str) -> Option<&str> {
    let start = body.find("<Code>")? + "<Code>".len();
    let end = body[start..].find("</Code>")? + start;
    Some(&body[start..end])
}
