use std::{
    convert::Infallible,
    fmt::{self, Display},
};

use serde::Serialize;
use sqlx::error::ErrorKind;
use warp::{
    http::StatusCode,
    reject::{self, Reject, Rejection},
    reply::{self, Reply},
};

/// Every failure the crate reports to a caller. The variant decides the
/// response status, the attached info is the human-readable message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HtmlError {
    InvalidRequest,
    ValidationFailed,
    NotFound,
    AlreadyExists,
    EdgeAbsent,
    SelfReferenceForbidden,
    Unauthorized,
    InvalidSession,
    Forbidden,
    InternalServerError,
}

impl HtmlError {
    pub fn new(self, info: &str) -> Error {
        Error {
            kind: self,
            info: Some(info.to_string()),
        }
    }

    pub fn default(self) -> Error {
        Error {
            kind: self,
            info: None,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            HtmlError::InvalidRequest
            | HtmlError::ValidationFailed
            | HtmlError::AlreadyExists
            | HtmlError::EdgeAbsent
            | HtmlError::SelfReferenceForbidden => StatusCode::BAD_REQUEST,
            HtmlError::NotFound => StatusCode::NOT_FOUND,
            HtmlError::Unauthorized | HtmlError::InvalidSession => StatusCode::UNAUTHORIZED,
            HtmlError::Forbidden => StatusCode::FORBIDDEN,
            HtmlError::InternalServerError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn fallback_info(&self) -> &'static str {
        match self {
            HtmlError::InvalidRequest => "Invalid request",
            HtmlError::ValidationFailed => "Invalid data",
            HtmlError::NotFound => "Not found",
            HtmlError::AlreadyExists => "Already exists",
            HtmlError::EdgeAbsent => "Nothing to remove",
            HtmlError::SelfReferenceForbidden => "Action cannot target yourself",
            HtmlError::Unauthorized => "Authentication credentials were not provided",
            HtmlError::InvalidSession => "Invalid session",
            HtmlError::Forbidden => "You don't have permission to perform this action",
            HtmlError::InternalServerError => "Internal server error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
    pub kind: HtmlError,
    pub info: Option<String>,
}

impl Error {
    pub fn message(&self) -> &str {
        self.info
            .as_deref()
            .unwrap_or_else(|| self.kind.fallback_info())
    }

    pub fn status(&self) -> StatusCode {
        self.kind.status()
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message())
    }
}

impl std::error::Error for Error {}
impl Reject for Error {}

pub struct QueryError {
    info: String,
    kind: Option<HtmlError>,
}

impl QueryError {
    pub fn new(info: String) -> Self {
        Self { info, kind: None }
    }
}

impl From<sqlx::Error> for QueryError {
    fn from(value: sqlx::Error) -> Self {
        match value {
            // Constraint violations are the storage layer's verdict on a request,
            // so they surface as client errors instead of 500s.
            sqlx::Error::Database(e) => {
                let kind = match e.kind() {
                    ErrorKind::UniqueViolation => Some(HtmlError::AlreadyExists),
                    ErrorKind::CheckViolation => Some(HtmlError::ValidationFailed),
                    ErrorKind::ForeignKeyViolation => Some(HtmlError::NotFound),
                    _ => None,
                };
                let info = match (kind, e.constraint()) {
                    (Some(_), Some(constraint)) => format!("Constraint violated: {constraint}"),
                    _ => format!("{e}"),
                };
                Self { info, kind }
            }
            sqlx::Error::RowNotFound => Self {
                info: String::from("Row not found"),
                kind: Some(HtmlError::NotFound),
            },
            sqlx::Error::PoolTimedOut => Self::new(String::from("Pool timed out")),
            sqlx::Error::PoolClosed => Self::new(String::from("Pool closed")),
            e => Self::new(format!("{e}")),
        }
    }
}

impl From<QueryError> for Error {
    fn from(value: QueryError) -> Self {
        match value.kind {
            Some(kind) => kind.new(&value.info),
            None => {
                log::error!("Query failed: {}", value.info);
                HtmlError::InternalServerError.new(&value.info)
            }
        }
    }
}

pub struct CacheError {
    info: String,
}

impl From<redis::RedisError> for CacheError {
    fn from(value: redis::RedisError) -> Self {
        Self {
            info: format!("{:?} - {:?}", value.code(), value.detail()),
        }
    }
}

impl CacheError {
    pub fn new(info: String) -> Self {
        Self { info }
    }
}

impl From<CacheError> for Error {
    fn from(value: CacheError) -> Self {
        log::error!("Cache failed: {}", value.info);
        HtmlError::InternalServerError.new(&value.info)
    }
}

/// Request payload that does not have the expected shape.
#[derive(Debug)]
pub struct TypeError {
    info: String,
}

impl TypeError {
    pub fn new(info: &str) -> Self {
        Self {
            info: info.to_string(),
        }
    }
}

impl From<TypeError> for Error {
    fn from(value: TypeError) -> Self {
        HtmlError::ValidationFailed.new(&value.info)
    }
}

impl Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({})", self.info)
    }
}

impl std::error::Error for TypeError {}

#[derive(Serialize)]
struct ErrorBody<'a> {
    errors: &'a str,
}

fn error_reply(status: StatusCode, message: &str) -> reply::WithStatus<reply::Json> {
    reply::with_status(reply::json(&ErrorBody { errors: message }), status)
}

/// Renders any rejection as `{"errors": "..."}` with a matching status code.
pub async fn recover(err: Rejection) -> Result<impl Reply, Infallible> {
    if let Some(e) = err.find::<Error>() {
        if e.kind == HtmlError::InternalServerError {
            log::error!("{e}");
            return Ok(error_reply(e.status(), e.kind.fallback_info()));
        }
        return Ok(error_reply(e.status(), e.message()));
    }

    if err.is_not_found() {
        return Ok(error_reply(StatusCode::NOT_FOUND, "Not found"));
    }

    if let Some(e) = err.find::<warp::filters::body::BodyDeserializeError>() {
        return Ok(error_reply(StatusCode::BAD_REQUEST, &e.to_string()));
    }

    if err.find::<reject::InvalidQuery>().is_some() {
        return Ok(error_reply(StatusCode::BAD_REQUEST, "Invalid query string"));
    }

    if err.find::<reject::PayloadTooLarge>().is_some() {
        return Ok(error_reply(
            StatusCode::PAYLOAD_TOO_LARGE,
            "Payload too large",
        ));
    }

    if err.find::<reject::MethodNotAllowed>().is_some() {
        return Ok(error_reply(
            StatusCode::METHOD_NOT_ALLOWED,
            "Method not allowed",
        ));
    }

    log::error!("Unhandled rejection: {err:?}");
    Ok(error_reply(
        StatusCode::INTERNAL_SERVER_ERROR,
        "Internal server error",
    ))
}
