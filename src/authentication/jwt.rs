use chrono::Duration;
use chrono::Local;
use hmac::{Hmac, Mac};
use jwt::SignWithKey;
use jwt::VerifyWithKey;
use serde::Deserialize;
use serde::Serialize;
use sha2::Sha256;

use crate::database::schema::User;
use crate::error::{Error, HtmlError};
use crate::schema::{Id, UserRole};

use super::permissions::ActionType;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct JwtSessionData {
    pub user_id: Id,
    pub username: String,
    pub role: UserRole,
    iat: i64,
    exp: i64,
}

impl JwtSessionData {
    pub fn new(id: Id, username: String, role: UserRole, lifetime: Duration) -> Self {
        let now = Local::now();
        let iat = now.timestamp();
        let exp = (now + lifetime).timestamp();

        Self {
            user_id: id,
            username,
            role,
            iat,
            exp,
        }
    }
}

/// The acting user of a request.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SessionData {
    pub user_id: Id,
    pub username: String,
    pub role: UserRole,
    pub is_admin: bool,
}

impl SessionData {
    pub fn authenticate(&self, action: ActionType) -> Result<(), Error> {
        if !action.authenticate(self) {
            return Err(
                HtmlError::Forbidden.new("You don't have permission to perform this action")
            );
        }
        Ok(())
    }
}

impl From<JwtSessionData> for SessionData {
    fn from(value: JwtSessionData) -> Self {
        SessionData {
            username: value.username,
            user_id: value.user_id,
            is_admin: value.role == UserRole::Admin,
            role: value.role,
        }
    }
}

/// Signs and verifies session tokens.
#[derive(Clone)]
pub struct SessionKeys {
    key: Hmac<Sha256>,
    lifetime: Duration,
}

impl SessionKeys {
    pub fn new(secret: &[u8], lifetime: Duration) -> Result<Self, Error> {
        let key = Hmac::new_from_slice(secret)
            .map_err(|_| HtmlError::InternalServerError.new("Invalid session secret"))?;

        Ok(Self { key, lifetime })
    }

    pub fn generate_jwt_session(&self, user: &User) -> Result<String, Error> {
        let claims = JwtSessionData::new(
            user.id,
            user.username.to_owned(),
            user.role.to_owned(),
            self.lifetime,
        );

        claims.sign_with_key(&self.key).map_err(|e| {
            log::error!("Failed to sign session: {e}");
            HtmlError::InternalServerError.default()
        })
    }

    pub fn verify_jwt_session(&self, token: &str) -> Result<JwtSessionData, Error> {
        let session: JwtSessionData = token
            .verify_with_key(&self.key)
            .map_err(|_| HtmlError::InvalidSession.new("Invalid session; Invalid token"))?;

        let now = Local::now().timestamp();
        if (session.exp - now).is_negative() {
            return Err(HtmlError::InvalidSession.new("Invalid session; Token expired"));
        }

        Ok(session)
    }
}
