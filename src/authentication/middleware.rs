use std::sync::Arc;

use warp::{reject::Rejection, Filter};

use crate::error::{Error, HtmlError};

use super::jwt::{SessionData, SessionKeys};

const AUTHORIZATION: &str = "authorization";

/// Accepts `Token <jwt>` as well as `Bearer <jwt>`.
fn parse_authorization(header: &str) -> Result<&str, Error> {
    header
        .strip_prefix("Token ")
        .or_else(|| header.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| HtmlError::InvalidSession.new("Invalid session; Malformed authorization header"))
}

fn read_session(keys: &SessionKeys, header: &str) -> Result<SessionData, Error> {
    let token = parse_authorization(header)?;
    keys.verify_jwt_session(token).map(SessionData::from)
}

pub fn with_session(
    keys: Arc<SessionKeys>,
) -> impl Filter<Extract = (SessionData,), Error = Rejection> + Clone {
    warp::header::optional::<String>(AUTHORIZATION).and_then(move |header: Option<String>| {
        let keys = keys.clone();
        async move {
            match header {
                Some(header) => read_session(&keys, &header).map_err(Rejection::from),
                None => Err(Rejection::from(HtmlError::Unauthorized.new(
                    "Authentication credentials were not provided",
                ))),
            }
        }
    })
}

/// Anonymous requests pass through as `None`. A header that is present but
/// invalid is still rejected.
pub fn with_possible_session(
    keys: Arc<SessionKeys>,
) -> impl Filter<Extract = (Option<SessionData>,), Error = Rejection> + Clone {
    warp::header::optional::<String>(AUTHORIZATION).and_then(move |header: Option<String>| {
        let keys = keys.clone();
        async move {
            match header {
                Some(header) => read_session(&keys, &header)
                    .map(Some)
                    .map_err(Rejection::from),
                None => Ok(None),
            }
        }
    })
}
