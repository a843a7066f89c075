use sqlx::{Pool, Postgres};

use crate::{
    form::{IngredientAmount, RecipeInput, RegisterInput},
    images::ImageStore,
    jwt::SessionData,
    schema::{Id, RecipeDetail, UserRole},
    setup::init_schema,
};

use super::{recipes::create_recipe, users::register_user};

pub const IMAGE: &str = "data:image/png;base64,iVBORw0KGgo=";

pub async fn prepare(pool: &Pool<Postgres>) {
    init_schema(pool).await.unwrap();
}

pub async fn user(username: &str, pool: &Pool<Postgres>) -> SessionData {
    let profile = register_user(
        RegisterInput {
            email: format!("{username}@example.com"),
            username: username.to_string(),
            first_name: "Test".into(),
            last_name: "Cook".into(),
            password: "correct-horse".into(),
        },
        pool,
    )
    .await
    .unwrap();

    SessionData {
        user_id: profile.id,
        username: profile.username,
        role: UserRole::User,
        is_admin: false,
    }
}

pub async fn tag(slug: &str, color: &str, pool: &Pool<Postgres>) -> Id {
    let (id,): (Id,) =
        sqlx::query_as("INSERT INTO tags (name, color, slug) VALUES ($1, $2, $1) RETURNING id")
            .bind(slug)
            .bind(color)
            .fetch_one(pool)
            .await
            .unwrap();
    id
}

pub async fn ingredient(name: &str, unit: &str, pool: &Pool<Postgres>) -> Id {
    let (id,): (Id,) = sqlx::query_as(
        "INSERT INTO ingredients (name, measurement_unit) VALUES ($1, $2) RETURNING id",
    )
    .bind(name)
    .bind(unit)
    .fetch_one(pool)
    .await
    .unwrap();
    id
}

pub fn recipe_input(name: &str, tags: &[Id], lines: &[(Id, i64)]) -> RecipeInput {
    RecipeInput {
        tags: tags.to_vec(),
        ingredients: lines
            .iter()
            .map(|&(id, amount)| IngredientAmount { id, amount })
            .collect(),
        name: name.to_string(),
        image: IMAGE.to_string(),
        text: "Mix everything and wait.".into(),
        cooking_time: 15,
    }
}

pub async fn recipe(
    author: &SessionData,
    input: RecipeInput,
    images: &ImageStore,
    pool: &Pool<Postgres>,
) -> RecipeDetail {
    create_recipe(author, input, images, pool).await.unwrap()
}

pub async fn count_rows(table: &str, recipe_id: Id, pool: &Pool<Postgres>) -> i64 {
    let (count,): (i64,) =
        sqlx::query_as(&format!("SELECT COUNT(*) FROM {table} WHERE recipe_id = $1"))
            .bind(recipe_id)
            .fetch_one(pool)
            .await
            .unwrap();
    count
}

/// One tag and one ingredient, enough for a valid recipe.
pub async fn catalog(pool: &Pool<Postgres>) -> (Id, Id) {
    (
        tag("dinner", "#AA3300", pool).await,
        ingredient("salt", "g", pool).await,
    )
}
