use crate::{
    authentication::{
        cryptography::{hash_password, verify_password},
        jwt::{SessionData, SessionKeys},
    },
    config::SuperuserConfig,
    error::{Error, HtmlError, QueryError},
    form::{LoginInput, RegisterInput, SetPasswordInput},
    pagination::{PageContext, Pagination},
    schema::{Id, User, UserProfile, UserProfileRow, UserRole},
    validation::{validate_email, validate_name, validate_username},
    EMAIL_MAX_LENGTH, PERSON_NAME_MAX_LENGTH, USERNAME_MAX_LENGTH,
};

use std::collections::HashMap;

use sqlx::{Pool, Postgres};

const PROFILE_COLUMNS: &str = "
    u.email, u.id, u.username, u.first_name, u.last_name,
    EXISTS (SELECT 1 FROM subscriptions s WHERE s.user_id = $1 AND s.author_id = u.id) AS is_subscribed
";

pub async fn get_user_by_id(pool: &Pool<Postgres>, user_id: Id) -> Result<Option<User>, Error> {
    let row: Option<User> = sqlx::query_as("SELECT * FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_optional(pool)
        .await
        .map_err(QueryError::from)?;

    Ok(row)
}

pub async fn get_user_by_email(pool: &Pool<Postgres>, email: &str) -> Result<Option<User>, Error> {
    let row: Option<User> = sqlx::query_as("SELECT * FROM users WHERE email = LOWER($1)")
        .bind(email)
        .fetch_optional(pool)
        .await
        .map_err(QueryError::from)?;

    Ok(row)
}

/// `viewer` decides `is_subscribed`, anonymous viewers see `false`.
pub async fn get_user_profile(
    user_id: Id,
    viewer: Option<Id>,
    pool: &Pool<Postgres>,
) -> Result<UserProfile, Error> {
    let row: Option<UserProfile> = sqlx::query_as(&format!(
        "SELECT {PROFILE_COLUMNS} FROM users u WHERE u.id = $2"
    ))
    .bind(viewer)
    .bind(user_id)
    .fetch_optional(pool)
    .await
    .map_err(QueryError::from)?;

    row.ok_or_else(|| HtmlError::NotFound.new("No user exists with specified id"))
}

/// Profiles of several users at once, keyed by id.
pub async fn get_user_profiles(
    user_ids: &[Id],
    viewer: Option<Id>,
    pool: &Pool<Postgres>,
) -> Result<HashMap<Id, UserProfile>, Error> {
    let rows: Vec<UserProfile> = sqlx::query_as(&format!(
        "SELECT {PROFILE_COLUMNS} FROM users u WHERE u.id = ANY($2)"
    ))
    .bind(viewer)
    .bind(user_ids)
    .fetch_all(pool)
    .await
    .map_err(QueryError::from)?;

    Ok(rows.into_iter().map(|profile| (profile.id, profile)).collect())
}

pub async fn fetch_users(
    viewer: Option<Id>,
    pagination: Pagination,
    pool: &Pool<Postgres>,
) -> Result<PageContext<UserProfile>, Error> {
    let rows: Vec<UserProfileRow> = sqlx::query_as(&format!(
        "SELECT {PROFILE_COLUMNS}, COUNT(*) OVER() AS count FROM users u ORDER BY u.username LIMIT $2 OFFSET $3"
    ))
    .bind(viewer)
    .bind(pagination.limit)
    .bind(pagination.offset())
    .fetch_all(pool)
    .await
    .map_err(QueryError::from)?;

    let total_count = match rows.first() {
        Some(row) => row.count,
        None if pagination.page > 1 => {
            let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users")
                .fetch_one(pool)
                .await
                .map_err(QueryError::from)?;
            count
        }
        None => 0,
    };
    let rows = rows.into_iter().map(UserProfile::from).collect();

    Ok(PageContext::from_rows(rows, total_count, pagination))
}

async fn insert_user(
    input: RegisterInput,
    role: UserRole,
    pool: &Pool<Postgres>,
) -> Result<UserProfile, Error> {
    let email = validate_email(&input.email, EMAIL_MAX_LENGTH)?;
    let username = validate_username(&input.username, USERNAME_MAX_LENGTH)?;
    let first_name = validate_name("first_name", &input.first_name, PERSON_NAME_MAX_LENGTH)?;
    let last_name = validate_name("last_name", &input.last_name, PERSON_NAME_MAX_LENGTH)?;
    validate_name("password", &input.password, PERSON_NAME_MAX_LENGTH)?;

    let password = hash_password(&input.password)?;

    let row: Option<UserProfile> = sqlx::query_as(
        "
        INSERT INTO users (email, username, first_name, last_name, password, role)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT DO NOTHING
        RETURNING email, id, username, first_name, last_name, FALSE AS is_subscribed
    ",
    )
    .bind(email)
    .bind(username)
    .bind(first_name)
    .bind(last_name)
    .bind(password)
    .bind(role)
    .fetch_optional(pool)
    .await
    .map_err(QueryError::from)?;

    match row {
        Some(profile) => {
            log::info!("Registered user {} ({})", profile.username, profile.id);
            Ok(profile)
        }
        None => Err(HtmlError::AlreadyExists
            .new("A user with that email or username already exists")),
    }
}

pub async fn register_user(input: RegisterInput, pool: &Pool<Postgres>) -> Result<UserProfile, Error> {
    insert_user(input, UserRole::User, pool).await
}

/// Creates the configured admin account unless the username is taken.
pub async fn ensure_superuser(config: &SuperuserConfig, pool: &Pool<Postgres>) -> Result<bool, Error> {
    let existing: Option<(Id,)> = sqlx::query_as("SELECT id FROM users WHERE username = $1")
        .bind(&config.username)
        .fetch_optional(pool)
        .await
        .map_err(QueryError::from)?;

    if existing.is_some() {
        log::info!("Superuser {} already exists", config.username);
        return Ok(false);
    }

    let input = RegisterInput {
        email: config.email.to_owned(),
        username: config.username.to_owned(),
        first_name: config.username.to_owned(),
        last_name: config.username.to_owned(),
        password: config.password.to_owned(),
    };
    insert_user(input, UserRole::Admin, pool).await?;
    log::info!("Created superuser {} ({})", config.username, config.email);

    Ok(true)
}

pub async fn login_user(
    input: LoginInput,
    keys: &SessionKeys,
    pool: &Pool<Postgres>,
) -> Result<String, Error> {
    let invalid = || HtmlError::InvalidRequest.new("Unable to log in with provided credentials");

    let user = get_user_by_email(pool, input.email.trim())
        .await?
        .ok_or_else(invalid)?;

    if !verify_password(&input.password, &user.password)? {
        return Err(invalid());
    }

    keys.generate_jwt_session(&user)
}

pub async fn set_password(
    session: &SessionData,
    input: SetPasswordInput,
    pool: &Pool<Postgres>,
) -> Result<(), Error> {
    let user = get_user_by_id(pool, session.user_id)
        .await?
        .ok_or_else(|| HtmlError::InvalidSession.new("Invalid session; Unknown user"))?;

    if !verify_password(&input.current_password, &user.password)? {
        return Err(HtmlError::ValidationFailed.new("current_password: Invalid password."));
    }
    validate_name("new_password", &input.new_password, PERSON_NAME_MAX_LENGTH)?;

    sqlx::query("UPDATE users SET password = $1 WHERE id = $2")
        .bind(hash_password(&input.new_password)?)
        .bind(user.id)
        .execute(pool)
        .await
        .map_err(QueryError::from)?;

    log::info!("User {} changed their password", user.id);
    Ok(())
}
