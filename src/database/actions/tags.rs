use std::collections::HashSet;

use redis::aio::MultiplexedConnection;
use sqlx::{Pool, Postgres};

use crate::{
    cache::cache::{rotate_catalog_cache, CacheKeyType, RedisValue},
    error::{Error, HtmlError, QueryError},
    form::{TagInput, TagPatch},
    schema::{Id, Tag},
    validation::{normalize_color, validate_name, validate_slug},
    NAME_MAX_LENGTH,
};

async fn query_tags(pool: Pool<Postgres>) -> Result<Vec<Tag>, Error> {
    let list: Vec<Tag> = sqlx::query_as("SELECT * FROM tags ORDER BY name")
        .fetch_all(&pool)
        .await
        .map_err(QueryError::from)?;

    Ok(list)
}

/// Every tag, served from the catalog cache when it is still current.
pub async fn list_tags(
    pool: &Pool<Postgres>,
    cache: &mut MultiplexedConnection,
) -> Result<Vec<Tag>, Error> {
    let pool = pool.clone();
    let list = RedisValue::get_or(CacheKeyType::Tags.new("all"), cache, move || {
        query_tags(pool)
    })
    .await?;

    Ok(list.value)
}

pub async fn get_tag(id: Id, pool: &Pool<Postgres>) -> Result<Tag, Error> {
    let tag: Option<Tag> = sqlx::query_as("SELECT * FROM tags WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(QueryError::from)?;

    tag.ok_or_else(|| HtmlError::NotFound.new("No tag exists with specified id"))
}

/// The subset of `ids` that names stored tags.
pub async fn known_tag_ids(ids: &[Id], pool: &Pool<Postgres>) -> Result<HashSet<Id>, Error> {
    let rows: Vec<(Id,)> = sqlx::query_as("SELECT id FROM tags WHERE id = ANY($1)")
        .bind(ids)
        .fetch_all(pool)
        .await
        .map_err(QueryError::from)?;

    Ok(rows.into_iter().map(|row| row.0).collect())
}

pub async fn create_tag(
    input: TagInput,
    pool: &Pool<Postgres>,
    cache: &mut MultiplexedConnection,
) -> Result<Tag, Error> {
    let name = validate_name("name", &input.name, NAME_MAX_LENGTH)?;
    let color = normalize_color(&input.color)?;
    let slug = validate_slug(&input.slug)?;

    let tag: Option<Tag> = sqlx::query_as(
        "INSERT INTO tags (name, color, slug) VALUES ($1, $2, $3) ON CONFLICT DO NOTHING RETURNING *",
    )
    .bind(name)
    .bind(color)
    .bind(slug)
    .fetch_optional(pool)
    .await
    .map_err(QueryError::from)?;

    let tag = tag.ok_or_else(|| {
        HtmlError::AlreadyExists.new("A tag with that name, color or slug already exists")
    })?;

    log::info!("Created tag {} ({})", tag.slug, tag.id);
    rotate_catalog_cache(cache).await?;

    Ok(tag)
}

pub async fn update_tag(
    id: Id,
    patch: TagPatch,
    pool: &Pool<Postgres>,
    cache: &mut MultiplexedConnection,
) -> Result<Tag, Error> {
    let current = get_tag(id, pool).await?;

    let name = match patch.name {
        Some(name) => validate_name("name", &name, NAME_MAX_LENGTH)?,
        None => current.name,
    };
    let color = match patch.color {
        Some(color) => normalize_color(&color)?,
        None => current.color,
    };
    let slug = match patch.slug {
        Some(slug) => validate_slug(&slug)?,
        None => current.slug,
    };

    let tag: Tag = sqlx::query_as(
        "UPDATE tags SET name = $1, color = $2, slug = $3 WHERE id = $4 RETURNING *",
    )
    .bind(name)
    .bind(color)
    .bind(slug)
    .bind(id)
    .fetch_one(pool)
    .await
    .map_err(QueryError::from)?;

    rotate_catalog_cache(cache).await?;

    Ok(tag)
}

/// Detaches the tag from every recipe before removing it.
pub async fn delete_tag(
    id: Id,
    pool: &Pool<Postgres>,
    cache: &mut MultiplexedConnection,
) -> Result<(), Error> {
    let mut tr = pool
        .begin()
        .await
        .map_err(|_| QueryError::new("Could not start transaction".to_owned()))?;

    sqlx::query("DELETE FROM recipe_tags WHERE tag_id = $1")
        .bind(id)
        .execute(&mut *tr)
        .await
        .map_err(QueryError::from)?;

    let result = sqlx::query("DELETE FROM tags WHERE id = $1")
        .bind(id)
        .execute(&mut *tr)
        .await
        .map_err(QueryError::from)?;

    if result.rows_affected() == 0 {
        return Err(HtmlError::NotFound.new("No tag exists with specified id"));
    }

    tr.commit()
        .await
        .map_err(|_| QueryError::new("Could not commit transaction".to_owned()))?;

    log::info!("Deleted tag {id}");
    rotate_catalog_cache(cache).await?;

    Ok(())
}
