use std::collections::HashMap;

use sqlx::{Pool, Postgres, QueryBuilder, Transaction};

use crate::{
    authentication::{jwt::SessionData, permissions::ActionType},
    error::{Error, HtmlError, QueryError},
    form::{IngredientAmount, RecipeFilter, RecipeInput, RecipePatch},
    images::ImageStore,
    pagination::{PageContext, Pagination},
    schema::{
        AuthoredRecipeShort, Id, LinkedRecipeTag, Recipe, RecipeDetail, RecipeFlags,
        RecipeIngredient, RecipeRow, RecipeShort, Tag,
    },
    validation::{
        validate_cooking_time, validate_ingredients, validate_recipe_name, validate_tags,
        validate_text,
    },
};

use super::{
    ingredients::known_ingredient_ids, tags::known_tag_ids, users::get_user_profiles,
};

pub async fn get_recipe(id: Id, pool: &Pool<Postgres>) -> Result<Recipe, Error> {
    let recipe: Option<Recipe> = sqlx::query_as("SELECT * FROM recipes WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(QueryError::from)?;

    recipe.ok_or_else(|| HtmlError::NotFound.new("No recipe exists with specified id"))
}

/// Authors manage their own recipes, admins manage every recipe.
pub fn authorize_recipe(recipe: &Recipe, session: &SessionData) -> Result<(), Error> {
    if recipe.author_id == session.user_id {
        session.authenticate(ActionType::ManageOwnRecipes)
    } else {
        session.authenticate(ActionType::ManageAllRecipes)
    }
}

/// Resolves the views of `recipes` for `viewer`, keeping their order.
/// Tags, ingredient lines, authors and flags are each loaded with one query
/// for the whole batch.
pub async fn load_recipe_details(
    recipes: Vec<Recipe>,
    viewer: Option<Id>,
    pool: &Pool<Postgres>,
) -> Result<Vec<RecipeDetail>, Error> {
    if recipes.is_empty() {
        return Ok(vec![]);
    }

    let ids: Vec<Id> = recipes.iter().map(|recipe| recipe.id).collect();
    let mut author_ids: Vec<Id> = recipes.iter().map(|recipe| recipe.author_id).collect();
    author_ids.sort_unstable();
    author_ids.dedup();

    let tag_rows: Vec<LinkedRecipeTag> = sqlx::query_as(
        "
        SELECT rt.recipe_id, t.id, t.name, t.color, t.slug
        FROM recipe_tags rt
        INNER JOIN tags t ON t.id = rt.tag_id
        WHERE rt.recipe_id = ANY($1)
        ORDER BY t.name
    ",
    )
    .bind(&ids)
    .fetch_all(pool)
    .await
    .map_err(QueryError::from)?;

    let ingredient_rows: Vec<RecipeIngredient> = sqlx::query_as(
        "
        SELECT ri.recipe_id, i.id, i.name, i.measurement_unit, ri.amount
        FROM recipe_ingredients ri
        INNER JOIN ingredients i ON i.id = ri.ingredient_id
        WHERE ri.recipe_id = ANY($1)
        ORDER BY ri.id
    ",
    )
    .bind(&ids)
    .fetch_all(pool)
    .await
    .map_err(QueryError::from)?;

    let flag_rows: Vec<RecipeFlags> = match viewer {
        Some(user_id) => sqlx::query_as(
            "
            SELECT r.id AS recipe_id,
                EXISTS (SELECT 1 FROM favorites f WHERE f.recipe_id = r.id AND f.user_id = $1) AS is_favorited,
                EXISTS (SELECT 1 FROM shopping_cart c WHERE c.recipe_id = r.id AND c.user_id = $1) AS is_in_shopping_cart
            FROM recipes r
            WHERE r.id = ANY($2)
        ",
        )
        .bind(user_id)
        .bind(&ids)
        .fetch_all(pool)
        .await
        .map_err(QueryError::from)?,
        None => vec![],
    };

    let authors = get_user_profiles(&author_ids, viewer, pool).await?;

    let mut tags: HashMap<Id, Vec<Tag>> = HashMap::new();
    for row in tag_rows {
        tags.entry(row.recipe_id).or_default().push(row.into());
    }
    let mut ingredients: HashMap<Id, Vec<RecipeIngredient>> = HashMap::new();
    for row in ingredient_rows {
        ingredients.entry(row.recipe_id).or_default().push(row);
    }
    let flags: HashMap<Id, RecipeFlags> = flag_rows
        .into_iter()
        .map(|row| (row.recipe_id, row))
        .collect();

    recipes
        .into_iter()
        .map(|recipe| {
            let author = match authors.get(&recipe.author_id) {
                Some(author) => author.to_owned(),
                None => {
                    log::error!("Recipe {} has no author row", recipe.id);
                    return Err(HtmlError::InternalServerError.default());
                }
            };
            let flags = flags.get(&recipe.id);

            Ok(RecipeDetail {
                id: recipe.id,
                tags: tags.remove(&recipe.id).unwrap_or_default(),
                author,
                ingredients: ingredients.remove(&recipe.id).unwrap_or_default(),
                is_favorited: flags.map(|f| f.is_favorited).unwrap_or(false),
                is_in_shopping_cart: flags.map(|f| f.is_in_shopping_cart).unwrap_or(false),
                name: recipe.name,
                image: recipe.image,
                text: recipe.text,
                cooking_time: recipe.cooking_time,
                pub_date: recipe.pub_date,
            })
        })
        .collect()
}

pub async fn get_recipe_detail(
    id: Id,
    viewer: Option<Id>,
    pool: &Pool<Postgres>,
) -> Result<RecipeDetail, Error> {
    let recipe = get_recipe(id, pool).await?;

    load_recipe_details(vec![recipe], viewer, pool)
        .await?
        .pop()
        .ok_or_else(|| HtmlError::NotFound.new("No recipe exists with specified id"))
}

/// Newest first. Tag slugs match any-of. The favorite and cart filters
/// select nothing for an anonymous viewer.
pub async fn fetch_recipes(
    filter: &RecipeFilter,
    viewer: Option<Id>,
    pagination: Pagination,
    pool: &Pool<Postgres>,
) -> Result<PageContext<RecipeDetail>, Error> {
    let user_id = match (viewer, filter.needs_viewer()) {
        (None, true) => return Ok(PageContext::no_rows()),
        (viewer, _) => viewer,
    };

    let mut query_builder: QueryBuilder<Postgres> =
        QueryBuilder::new("SELECT r.*, COUNT(*) OVER() AS count FROM recipes r WHERE TRUE");
    push_recipe_filters(&mut query_builder, filter, user_id);

    query_builder
        .push(" ORDER BY r.pub_date DESC, r.id DESC LIMIT ")
        .push_bind(pagination.limit)
        .push(" OFFSET ")
        .push_bind(pagination.offset());

    let rows: Vec<RecipeRow> = query_builder
        .build_query_as::<RecipeRow>()
        .fetch_all(pool)
        .await
        .map_err(QueryError::from)?;

    let total_count = match rows.first() {
        Some(row) => row.count,
        None if pagination.page > 1 => count_recipes(filter, user_id, pool).await?,
        None => 0,
    };
    let recipes = rows.into_iter().map(Recipe::from).collect();
    let details = load_recipe_details(recipes, user_id, pool).await?;

    Ok(PageContext::from_rows(details, total_count, pagination))
}

fn push_recipe_filters(
    query_builder: &mut QueryBuilder<'_, Postgres>,
    filter: &RecipeFilter,
    user_id: Option<Id>,
) {
    if let Some(author) = filter.author {
        query_builder.push(" AND r.author_id = ").push_bind(author);
    }
    if !filter.tags.is_empty() {
        query_builder
            .push(
                " AND EXISTS (SELECT 1 FROM recipe_tags rt INNER JOIN tags t ON t.id = rt.tag_id \
                 WHERE rt.recipe_id = r.id AND t.slug = ANY(",
            )
            .push_bind(filter.tags.to_owned())
            .push("))");
    }
    if let Some(user_id) = user_id {
        if filter.is_favorited {
            query_builder
                .push(" AND EXISTS (SELECT 1 FROM favorites f WHERE f.recipe_id = r.id AND f.user_id = ")
                .push_bind(user_id)
                .push(")");
        }
        if filter.is_in_shopping_cart {
            query_builder
                .push(" AND EXISTS (SELECT 1 FROM shopping_cart c WHERE c.recipe_id = r.id AND c.user_id = ")
                .push_bind(user_id)
                .push(")");
        }
    }
}

/// Size of the filtered collection, for pages past its end.
async fn count_recipes(
    filter: &RecipeFilter,
    user_id: Option<Id>,
    pool: &Pool<Postgres>,
) -> Result<i64, Error> {
    let mut query_builder: QueryBuilder<Postgres> =
        QueryBuilder::new("SELECT COUNT(*) FROM recipes r WHERE TRUE");
    push_recipe_filters(&mut query_builder, filter, user_id);

    let count = query_builder
        .build_query_scalar::<i64>()
        .fetch_one(pool)
        .await
        .map_err(QueryError::from)?;

    Ok(count)
}

async fn check_tags(tags: &[Id], pool: &Pool<Postgres>) -> Result<(), Error> {
    let known = known_tag_ids(tags, pool).await?;
    validate_tags(tags, &known)
}

async fn check_ingredients(
    ingredients: &[IngredientAmount],
    pool: &Pool<Postgres>,
) -> Result<(), Error> {
    let ids: Vec<Id> = ingredients.iter().map(|line| line.id).collect();
    let known = known_ingredient_ids(&ids, pool).await?;
    validate_ingredients(ingredients, &known)
}

async fn insert_recipe_tags(
    recipe_id: Id,
    tags: &[Id],
    tr: &mut Transaction<'_, Postgres>,
) -> Result<(), Error> {
    let mut query_builder: QueryBuilder<Postgres> =
        QueryBuilder::new("INSERT INTO recipe_tags (recipe_id, tag_id) ");

    query_builder.push_values(tags.iter(), |mut b, tag_id| {
        b.push_bind(recipe_id).push_bind(*tag_id);
    });

    query_builder
        .build()
        .execute(&mut **tr)
        .await
        .map_err(QueryError::from)?;

    Ok(())
}

async fn insert_recipe_ingredients(
    recipe_id: Id,
    ingredients: &[IngredientAmount],
    tr: &mut Transaction<'_, Postgres>,
) -> Result<(), Error> {
    let mut query_builder: QueryBuilder<Postgres> =
        QueryBuilder::new("INSERT INTO recipe_ingredients (recipe_id, ingredient_id, amount) ");

    query_builder.push_values(ingredients.iter(), |mut b, line| {
        // Bounds are validated before this point.
        b.push_bind(recipe_id)
            .push_bind(line.id)
            .push_bind(line.amount as i32);
    });

    query_builder
        .build()
        .execute(&mut **tr)
        .await
        .map_err(QueryError::from)?;

    Ok(())
}

pub async fn create_recipe(
    session: &SessionData,
    input: RecipeInput,
    images: &ImageStore,
    pool: &Pool<Postgres>,
) -> Result<RecipeDetail, Error> {
    session.authenticate(ActionType::CreateRecipes)?;

    let name = validate_recipe_name(&input.name)?;
    let text = validate_text("text", &input.text)?;
    let cooking_time = validate_cooking_time(input.cooking_time)?;
    check_tags(&input.tags, pool).await?;
    check_ingredients(&input.ingredients, pool).await?;

    let image = images.save(&input.image).await?;

    let result = insert_recipe(session.user_id, &name, &image, &text, cooking_time, &input, pool).await;
    let recipe_id = match result {
        Ok(id) => id,
        Err(e) => {
            images.remove(&image).await;
            return Err(e);
        }
    };

    log::info!("User {} created recipe {recipe_id}", session.user_id);
    get_recipe_detail(recipe_id, Some(session.user_id), pool).await
}

async fn insert_recipe(
    author_id: Id,
    name: &str,
    image: &str,
    text: &str,
    cooking_time: i32,
    input: &RecipeInput,
    pool: &Pool<Postgres>,
) -> Result<Id, Error> {
    let mut tr = pool
        .begin()
        .await
        .map_err(|_| QueryError::new("Could not start transaction".to_owned()))?;

    let (recipe_id,): (Id,) = sqlx::query_as(
        "INSERT INTO recipes (author_id, name, image, text, cooking_time) VALUES ($1, $2, $3, $4, $5) RETURNING id",
    )
    .bind(author_id)
    .bind(name)
    .bind(image)
    .bind(text)
    .bind(cooking_time)
    .fetch_one(&mut *tr)
    .await
    .map_err(QueryError::from)?;

    insert_recipe_tags(recipe_id, &input.tags, &mut tr).await?;
    insert_recipe_ingredients(recipe_id, &input.ingredients, &mut tr).await?;

    tr.commit()
        .await
        .map_err(|_| QueryError::new("Could not commit transaction".to_owned()))?;

    Ok(recipe_id)
}

/// Absent fields keep their stored value. A present `tags` or `ingredients`
/// list replaces the whole set. The author and publish date never change.
pub async fn update_recipe(
    id: Id,
    session: &SessionData,
    patch: RecipePatch,
    images: &ImageStore,
    pool: &Pool<Postgres>,
) -> Result<RecipeDetail, Error> {
    let current = get_recipe(id, pool).await?;
    authorize_recipe(&current, session)?;

    let name = match &patch.name {
        Some(name) => validate_recipe_name(name)?,
        None => current.name.to_owned(),
    };
    let text = match &patch.text {
        Some(text) => validate_text("text", text)?,
        None => current.text.to_owned(),
    };
    let cooking_time = match patch.cooking_time {
        Some(minutes) => validate_cooking_time(minutes)?,
        None => current.cooking_time,
    };
    if let Some(tags) = &patch.tags {
        check_tags(tags, pool).await?;
    }
    if let Some(ingredients) = &patch.ingredients {
        check_ingredients(ingredients, pool).await?;
    }

    let image = match &patch.image {
        Some(encoded) => images.save(encoded).await?,
        None => current.image.to_owned(),
    };

    let result = write_recipe_update(id, &name, &image, &text, cooking_time, &patch, pool).await;
    match result {
        Ok(()) if image != current.image => images.remove(&current.image).await,
        Ok(()) => (),
        Err(e) => {
            if image != current.image {
                images.remove(&image).await;
            }
            return Err(e);
        }
    }

    log::info!("User {} updated recipe {id}", session.user_id);
    get_recipe_detail(id, Some(session.user_id), pool).await
}

async fn write_recipe_update(
    id: Id,
    name: &str,
    image: &str,
    text: &str,
    cooking_time: i32,
    patch: &RecipePatch,
    pool: &Pool<Postgres>,
) -> Result<(), Error> {
    let mut tr = pool
        .begin()
        .await
        .map_err(|_| QueryError::new("Could not start transaction".to_owned()))?;

    sqlx::query("UPDATE recipes SET name = $1, image = $2, text = $3, cooking_time = $4 WHERE id = $5")
        .bind(name)
        .bind(image)
        .bind(text)
        .bind(cooking_time)
        .bind(id)
        .execute(&mut *tr)
        .await
        .map_err(QueryError::from)?;

    if let Some(tags) = &patch.tags {
        sqlx::query("DELETE FROM recipe_tags WHERE recipe_id = $1")
            .bind(id)
            .execute(&mut *tr)
            .await
            .map_err(QueryError::from)?;
        insert_recipe_tags(id, tags, &mut tr).await?;
    }
    if let Some(ingredients) = &patch.ingredients {
        sqlx::query("DELETE FROM recipe_ingredients WHERE recipe_id = $1")
            .bind(id)
            .execute(&mut *tr)
            .await
            .map_err(QueryError::from)?;
        insert_recipe_ingredients(id, ingredients, &mut tr).await?;
    }

    tr.commit()
        .await
        .map_err(|_| QueryError::new("Could not commit transaction".to_owned()))?;

    Ok(())
}

/// Removes the recipe together with its lines, tag links, favorites and
/// cart entries.
pub async fn delete_recipe(
    id: Id,
    session: &SessionData,
    images: &ImageStore,
    pool: &Pool<Postgres>,
) -> Result<(), Error> {
    let recipe = get_recipe(id, pool).await?;
    authorize_recipe(&recipe, session)?;

    let mut tr = pool
        .begin()
        .await
        .map_err(|_| QueryError::new("Could not start transaction".to_owned()))?;

    for table in ["favorites", "shopping_cart", "recipe_tags", "recipe_ingredients"] {
        sqlx::query(&format!("DELETE FROM {table} WHERE recipe_id = $1"))
            .bind(id)
            .execute(&mut *tr)
            .await
            .map_err(QueryError::from)?;
    }

    sqlx::query("DELETE FROM recipes WHERE id = $1")
        .bind(id)
        .execute(&mut *tr)
        .await
        .map_err(QueryError::from)?;

    tr.commit()
        .await
        .map_err(|_| QueryError::new("Could not commit transaction".to_owned()))?;

    images.remove(&recipe.image).await;
    log::info!("User {} deleted recipe {id}", session.user_id);

    Ok(())
}

/// Each author's newest recipes, at most `limit` per author when given.
pub async fn fetch_author_recipes(
    author_ids: &[Id],
    limit: Option<i64>,
    pool: &Pool<Postgres>,
) -> Result<HashMap<Id, Vec<RecipeShort>>, Error> {
    let rows: Vec<AuthoredRecipeShort> = sqlx::query_as(
        "
        SELECT author_id, id, name, image, cooking_time FROM (
            SELECT r.author_id, r.id, r.name, r.image, r.cooking_time,
                ROW_NUMBER() OVER (PARTITION BY r.author_id ORDER BY r.pub_date DESC, r.id DESC) AS position
            FROM recipes r
            WHERE r.author_id = ANY($1)
        ) ranked
        WHERE $2::BIGINT IS NULL OR position <= $2
        ORDER BY author_id, position
    ",
    )
    .bind(author_ids)
    .bind(limit)
    .fetch_all(pool)
    .await
    .map_err(QueryError::from)?;

    let mut recipes: HashMap<Id, Vec<RecipeShort>> = HashMap::new();
    for row in rows {
        recipes.entry(row.author_id).or_default().push(row.into());
    }

    Ok(recipes)
}

pub async fn count_author_recipes(
    author_ids: &[Id],
    pool: &Pool<Postgres>,
) -> Result<HashMap<Id, i64>, Error> {
    let rows: Vec<(Id, i64)> = sqlx::query_as(
        "SELECT author_id, COUNT(*) FROM recipes WHERE author_id = ANY($1) GROUP BY author_id",
    )
    .bind(author_ids)
    .fetch_all(pool)
    .await
    .map_err(QueryError::from)?;

    Ok(rows.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use sqlx::PgPool;

    use super::*;
    use crate::{
        actions::{
            fixtures::{catalog, count_rows, ingredient, prepare, recipe, recipe_input, tag, user},
            relations::{add_favorite, add_to_cart},
        },
        IMAGE_EXTENSIONS,
    };

    #[sqlx::test(migrations = false)]
    #[ignore = "Requires a Postgres server at DATABASE_URL"]
    async fn deleting_a_recipe_removes_everything_attached(pool: PgPool) {
        prepare(&pool).await;
        let media = tempfile::tempdir().unwrap();
        let images = ImageStore::new(media.path(), "/media/");
        let (dinner, salt) = catalog(&pool).await;
        let author = user("author", &pool).await;
        let reader = user("reader", &pool).await;
        let input = recipe_input("Soup", &[dinner], &[(salt, 5)]);
        let soup = recipe(&author, input, &images, &pool).await;
        add_favorite(&reader, soup.id, &pool).await.unwrap();
        add_to_cart(&reader, soup.id, &pool).await.unwrap();

        let stored = soup.image.strip_prefix("/media/").unwrap();
        assert!(media.path().join(stored).exists());
        assert!(IMAGE_EXTENSIONS.iter().any(|ext| stored.ends_with(ext)));

        let err = delete_recipe(soup.id, &reader, &images, &pool).await.unwrap_err();
        assert_eq!(err.kind, HtmlError::Forbidden);

        delete_recipe(soup.id, &author, &images, &pool).await.unwrap();

        for table in ["favorites", "shopping_cart", "recipe_tags", "recipe_ingredients"] {
            assert_eq!(count_rows(table, soup.id, &pool).await, 0, "{table}");
        }
        let err = get_recipe(soup.id, &pool).await.unwrap_err();
        assert_eq!(err.kind, HtmlError::NotFound);
        assert!(!media.path().join(stored).exists());
    }

    #[sqlx::test(migrations = false)]
    #[ignore = "Requires a Postgres server at DATABASE_URL"]
    async fn updates_replace_only_the_lists_they_carry(pool: PgPool) {
        prepare(&pool).await;
        let media = tempfile::tempdir().unwrap();
        let images = ImageStore::new(media.path(), "/media/");
        let (dinner, salt) = catalog(&pool).await;
        let lunch = tag("lunch", "#00AA33", &pool).await;
        let pepper = ingredient("pepper", "g", &pool).await;
        let author = user("author", &pool).await;
        let input = recipe_input("Soup", &[dinner], &[(salt, 5)]);
        let soup = recipe(&author, input, &images, &pool).await;

        let patch = RecipePatch {
            tags: Some(vec![lunch]),
            ..Default::default()
        };
        let updated = update_recipe(soup.id, &author, patch, &images, &pool).await.unwrap();
        let tags: Vec<Id> = updated.tags.iter().map(|tag| tag.id).collect();
        assert_eq!(tags, vec![lunch]);
        assert_eq!(updated.ingredients.len(), 1);
        assert_eq!(updated.ingredients[0].id, salt);
        assert_eq!(updated.author.id, author.user_id);
        assert_eq!(updated.pub_date, soup.pub_date);

        let patch = RecipePatch {
            ingredients: Some(vec![
                IngredientAmount { id: pepper, amount: 2 },
                IngredientAmount { id: salt, amount: 7 },
            ]),
            name: Some("Spicy soup".into()),
            ..Default::default()
        };
        let updated = update_recipe(soup.id, &author, patch, &images, &pool).await.unwrap();
        let mut lines: Vec<(Id, i32)> = updated
            .ingredients
            .iter()
            .map(|line| (line.id, line.amount))
            .collect();
        lines.sort_unstable();
        let mut expected = vec![(pepper, 2), (salt, 7)];
        expected.sort_unstable();
        assert_eq!(lines, expected);
        assert_eq!(updated.tags.len(), 1);
        assert_eq!(updated.name, "Spicy soup");
        assert_eq!(count_rows("recipe_ingredients", soup.id, &pool).await, 2);

        let patch = RecipePatch {
            tags: Some(vec![lunch, lunch]),
            ..Default::default()
        };
        let err = update_recipe(soup.id, &author, patch, &images, &pool).await.unwrap_err();
        assert_eq!(err.kind, HtmlError::ValidationFailed);
        assert_eq!(count_rows("recipe_tags", soup.id, &pool).await, 1);
    }

    #[sqlx::test(migrations = false)]
    #[ignore = "Requires a Postgres server at DATABASE_URL"]
    async fn recipe_pages_keep_the_total_past_the_end(pool: PgPool) {
        prepare(&pool).await;
        let media = tempfile::tempdir().unwrap();
        let images = ImageStore::new(media.path(), "/media/");
        let (dinner, salt) = catalog(&pool).await;
        let author = user("author", &pool).await;
        for name in ["Soup", "Stew", "Salad"] {
            let input = recipe_input(name, &[dinner], &[(salt, 5)]);
            recipe(&author, input, &images, &pool).await;
        }

        let filter = RecipeFilter::default();
        let page = fetch_recipes(&filter, None, Pagination::new(1, 2), &pool).await.unwrap();
        assert_eq!(page.count, 3);
        assert_eq!(page.results[0].name, "Salad");

        let page = fetch_recipes(&filter, None, Pagination::new(5, 2), &pool).await.unwrap();
        assert!(page.results.is_empty());
        assert_eq!(page.count, 3);
        assert_eq!(page.next, None);
        assert_eq!(page.previous, Some(2));

        let filter = RecipeFilter {
            tags: vec!["breakfast".into()],
            ..Default::default()
        };
        let page = fetch_recipes(&filter, None, Pagination::new(2, 2), &pool).await.unwrap();
        assert_eq!(page.count, 0);
        assert_eq!(page.previous, Some(1));
    }
}
