use std::{env, fmt::Display, str::FromStr};

use log::{info, warn};

use crate::error::{Error, HtmlError};

#[derive(Debug, Clone)]
pub struct SuperuserConfig {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    pub redis_url: String,
    pub jwt_secret: String,
    pub jwt_lifetime_hours: i64,
    pub media_root: String,
    pub media_url: String,
    pub superuser: Option<SuperuserConfig>,
}

impl Config {
    /// Reads the environment, after loading `.env` if there is one.
    pub fn load() -> Result<Self, Error> {
        if let Err(e) = dotenvy::dotenv() {
            info!("No .env file loaded: {e}");
        }

        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            port: try_load(&lookup, "PORT", "8000")?,
            database_url: require(&lookup, "DATABASE_URL")?,
            redis_url: try_load(&lookup, "REDIS_URL", "redis://127.0.0.1/")?,
            jwt_secret: require(&lookup, "JWT_SECRET")?,
            jwt_lifetime_hours: try_load(&lookup, "JWT_LIFETIME_HOURS", "24")?,
            media_root: try_load(&lookup, "MEDIA_ROOT", "media")?,
            media_url: try_load(&lookup, "MEDIA_URL", "/media/")?,
            superuser: load_superuser(&lookup),
        })
    }
}

fn require<F>(lookup: &F, key: &str) -> Result<String, Error>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key).filter(|v| !v.is_empty()).ok_or_else(|| {
        warn!("Environment variable {key} not found");
        HtmlError::InternalServerError.new(&format!("Missing environment variable {key}"))
    })
}

fn try_load<F, T>(lookup: &F, key: &str, default: &str) -> Result<T, Error>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: Display,
{
    lookup(key)
        .unwrap_or_else(|| {
            info!("{key} not set, using default: {default}");
            default.to_string()
        })
        .parse()
        .map_err(|e| {
            warn!("Invalid {key} value: {e}");
            HtmlError::InternalServerError.new(&format!("Invalid {key} value: {e}"))
        })
}

fn load_superuser<F>(lookup: &F) -> Option<SuperuserConfig>
where
    F: Fn(&str) -> Option<String>,
{
    match (
        lookup("SUPERUSER_USERNAME"),
        lookup("SUPERUSER_EMAIL"),
        lookup("SUPERUSER_PASSWORD"),
    ) {
        (Some(username), Some(email), Some(password)) => Some(SuperuserConfig {
            username,
            email,
            password,
        }),
        _ => None,
    }
}
