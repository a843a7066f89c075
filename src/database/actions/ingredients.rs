use std::{collections::HashSet, path::Path};

use redis::aio::MultiplexedConnection;
use sqlx::{Pool, Postgres, QueryBuilder};

use crate::{
    cache::cache::{rotate_catalog_cache, CacheKeyType, RedisValue},
    error::{Error, HtmlError, QueryError},
    form::{IngredientInput, IngredientPatch},
    schema::{Id, Ingredient},
    validation::validate_name,
    NAME_MAX_LENGTH,
};

/// Escapes `LIKE` wildcards so user input only ever matches literally.
fn like_prefix(prefix: &str) -> String {
    let mut pattern = String::with_capacity(prefix.len() + 1);
    for c in prefix.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

async fn query_ingredients(
    prefix: String,
    pool: Pool<Postgres>,
) -> Result<Vec<Ingredient>, Error> {
    let list: Vec<Ingredient> =
        sqlx::query_as("SELECT * FROM ingredients WHERE LOWER(name) LIKE LOWER($1) ORDER BY name, id")
            .bind(like_prefix(&prefix))
            .fetch_all(&pool)
            .await
            .map_err(QueryError::from)?;

    Ok(list)
}

/// Case-insensitive prefix search over the catalog. An empty prefix lists
/// everything.
pub async fn fetch_ingredients(
    prefix: &str,
    pool: &Pool<Postgres>,
    cache: &mut MultiplexedConnection,
) -> Result<Vec<Ingredient>, Error> {
    let prefix = prefix.trim().to_lowercase();
    let pool = pool.clone();
    let key = CacheKeyType::Ingredients.new(prefix.to_owned());

    let list = RedisValue::get_or(key, cache, move || query_ingredients(prefix, pool)).await?;

    Ok(list.value)
}

pub async fn get_ingredient(id: Id, pool: &Pool<Postgres>) -> Result<Ingredient, Error> {
    let ingredient: Option<Ingredient> = sqlx::query_as("SELECT * FROM ingredients WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(QueryError::from)?;

    ingredient.ok_or_else(|| HtmlError::NotFound.new("No ingredient exists with specified id"))
}

pub async fn known_ingredient_ids(
    ids: &[Id],
    pool: &Pool<Postgres>,
) -> Result<HashSet<Id>, Error> {
    let rows: Vec<(Id,)> = sqlx::query_as("SELECT id FROM ingredients WHERE id = ANY($1)")
        .bind(ids)
        .fetch_all(pool)
        .await
        .map_err(QueryError::from)?;

    Ok(rows.into_iter().map(|row| row.0).collect())
}

pub async fn create_ingredient(
    input: IngredientInput,
    pool: &Pool<Postgres>,
    cache: &mut MultiplexedConnection,
) -> Result<Ingredient, Error> {
    let name = validate_name("name", &input.name, NAME_MAX_LENGTH)?;
    let unit = validate_name("measurement_unit", &input.measurement_unit, NAME_MAX_LENGTH)?;

    let ingredient: Ingredient = sqlx::query_as(
        "INSERT INTO ingredients (name, measurement_unit) VALUES ($1, $2) RETURNING *",
    )
    .bind(name)
    .bind(unit)
    .fetch_one(pool)
    .await
    .map_err(QueryError::from)?;

    log::info!("Created ingredient {} ({})", ingredient.name, ingredient.id);
    rotate_catalog_cache(cache).await?;

    Ok(ingredient)
}

pub async fn update_ingredient(
    id: Id,
    patch: IngredientPatch,
    pool: &Pool<Postgres>,
    cache: &mut MultiplexedConnection,
) -> Result<Ingredient, Error> {
    let current = get_ingredient(id, pool).await?;

    let name = match patch.name {
        Some(name) => validate_name("name", &name, NAME_MAX_LENGTH)?,
        None => current.name,
    };
    let unit = match patch.measurement_unit {
        Some(unit) => validate_name("measurement_unit", &unit, NAME_MAX_LENGTH)?,
        None => current.measurement_unit,
    };

    let ingredient: Ingredient = sqlx::query_as(
        "UPDATE ingredients SET name = $1, measurement_unit = $2 WHERE id = $3 RETURNING *",
    )
    .bind(name)
    .bind(unit)
    .bind(id)
    .fetch_one(pool)
    .await
    .map_err(QueryError::from)?;

    rotate_catalog_cache(cache).await?;

    Ok(ingredient)
}

/// Ingredients still used by a recipe cannot be removed.
pub async fn delete_ingredient(
    id: Id,
    pool: &Pool<Postgres>,
    cache: &mut MultiplexedConnection,
) -> Result<(), Error> {
    let used: (bool,) = sqlx::query_as(
        "SELECT EXISTS (SELECT 1 FROM recipe_ingredients WHERE ingredient_id = $1)",
    )
    .bind(id)
    .fetch_one(pool)
    .await
    .map_err(QueryError::from)?;

    if used.0 {
        return Err(HtmlError::InvalidRequest.new("Ingredient is used by a recipe"));
    }

    let result = sqlx::query("DELETE FROM ingredients WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await
        .map_err(QueryError::from)?;

    if result.rows_affected() == 0 {
        return Err(HtmlError::NotFound.new("No ingredient exists with specified id"));
    }

    log::info!("Deleted ingredient {id}");
    rotate_catalog_cache(cache).await?;

    Ok(())
}

/// Reads `name,unit` rows without a header. Blank rows are skipped.
pub fn read_ingredient_csv<R: std::io::Read>(reader: R) -> Result<Vec<(String, String)>, Error> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(reader);

    let mut rows = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record.map_err(|e| {
            HtmlError::InvalidRequest.new(&format!("Invalid csv on line {}: {e}", line + 1))
        })?;

        let name = record.get(0).map(str::trim).unwrap_or_default();
        let unit = record.get(1).map(str::trim).unwrap_or_default();

        match (name.is_empty(), unit.is_empty()) {
            (true, true) => continue,
            (false, false) => rows.push((name.to_string(), unit.to_string())),
            _ => {
                return Err(HtmlError::InvalidRequest.new(&format!(
                    "Invalid csv on line {}: expected name,unit",
                    line + 1
                )))
            }
        }
    }

    Ok(rows)
}

/// Bulk-loads a catalog file. Pairs already in the catalog are skipped, so
/// importing the same file twice is harmless. Returns the number of new rows.
pub async fn import_ingredients(
    path: &Path,
    pool: &Pool<Postgres>,
    cache: &mut MultiplexedConnection,
) -> Result<usize, Error> {
    let file = std::fs::File::open(path).map_err(|e| {
        log::error!("Could not open {}: {e}", path.display());
        HtmlError::InvalidRequest.new(&format!("Could not open {}", path.display()))
    })?;
    let rows = read_ingredient_csv(file)?;

    let existing: Vec<(String, String)> =
        sqlx::query_as("SELECT name, measurement_unit FROM ingredients")
            .fetch_all(pool)
            .await
            .map_err(QueryError::from)?;
    let mut seen: HashSet<(String, String)> = existing.into_iter().collect();

    let rows: Vec<(String, String)> = rows
        .into_iter()
        .filter(|row| seen.insert(row.to_owned()))
        .collect();

    for chunk in rows.chunks(65535 / 2) {
        let mut query_builder: QueryBuilder<Postgres> =
            QueryBuilder::new("INSERT INTO ingredients (name, measurement_unit) ");

        query_builder.push_values(chunk, |mut b, (name, unit)| {
            b.push_bind(name).push_bind(unit);
        });

        query_builder
            .build()
            .execute(pool)
            .await
            .map_err(QueryError::from)?;
    }

    log::info!("Imported {} ingredients from {}", rows.len(), path.display());
    rotate_catalog_cache(cache).await?;

    Ok(rows.len())
}
