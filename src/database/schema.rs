use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::TypeError;

pub type Id = i32;

#[derive(Clone, Debug, PartialEq, PartialOrd, sqlx::Type, Serialize, Eq, Ord, Hash, Deserialize)]
#[sqlx(type_name = "user_role", rename_all = "lowercase")]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    User,
    Admin,
}

impl TryFrom<Value> for UserRole {
    type Error = TypeError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value.as_str() {
            Some(value) => match value {
                "user" => Ok(Self::User),
                "admin" => Ok(Self::Admin),
                _ => Err(TypeError::new("Invalid variant")),
            },
            None => Err(TypeError::new("Failed to parse value as string")),
        }
    }
}

#[derive(sqlx::FromRow, Debug, Clone)]
pub struct User {
    pub id: Id,
    pub email: String,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub password: String,
    pub role: UserRole,
}

/// A user as seen by `viewer`.
#[derive(sqlx::FromRow, Debug, Clone, Serialize, PartialEq)]
pub struct UserProfile {
    pub email: String,
    pub id: Id,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub is_subscribed: bool,
}

#[derive(sqlx::FromRow, Debug, Clone, Serialize)]
pub struct UserProfileRow {
    pub email: String,
    pub id: Id,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub is_subscribed: bool,

    pub count: i64,
}

impl From<UserProfileRow> for UserProfile {
    fn from(row: UserProfileRow) -> Self {
        Self {
            email: row.email,
            id: row.id,
            username: row.username,
            first_name: row.first_name,
            last_name: row.last_name,
            is_subscribed: row.is_subscribed,
        }
    }
}

#[derive(sqlx::FromRow, Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Tag {
    pub id: Id,
    pub name: String,
    pub color: String,
    pub slug: String,
}

#[derive(sqlx::FromRow, Debug, Clone)]
pub struct LinkedRecipeTag {
    pub recipe_id: Id,
    pub id: Id,
    pub name: String,
    pub color: String,
    pub slug: String,
}

impl From<LinkedRecipeTag> for Tag {
    fn from(row: LinkedRecipeTag) -> Self {
        Self {
            id: row.id,
            name: row.name,
            color: row.color,
            slug: row.slug,
        }
    }
}

#[derive(sqlx::FromRow, Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Ingredient {
    pub id: Id,
    pub name: String,
    pub measurement_unit: String,
}

#[derive(sqlx::FromRow, Debug, Clone)]
pub struct Recipe {
    pub id: Id,
    pub author_id: Id,
    pub name: String,
    pub image: String,
    pub text: String,
    pub cooking_time: i32,
    pub pub_date: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Debug, Clone)]
pub struct RecipeRow {
    pub id: Id,
    pub author_id: Id,
    pub name: String,
    pub image: String,
    pub text: String,
    pub cooking_time: i32,
    pub pub_date: DateTime<Utc>,

    pub count: i64,
}

impl From<RecipeRow> for Recipe {
    fn from(row: RecipeRow) -> Self {
        Self {
            id: row.id,
            author_id: row.author_id,
            name: row.name,
            image: row.image,
            text: row.text,
            cooking_time: row.cooking_time,
            pub_date: row.pub_date,
        }
    }
}

/// Minimal recipe projection returned by relation mutations and
/// subscription listings.
#[derive(sqlx::FromRow, Debug, Clone, Serialize, PartialEq)]
pub struct RecipeShort {
    pub id: Id,
    pub name: String,
    pub image: String,
    pub cooking_time: i32,
}

impl From<&Recipe> for RecipeShort {
    fn from(recipe: &Recipe) -> Self {
        Self {
            id: recipe.id,
            name: recipe.name.to_owned(),
            image: recipe.image.to_owned(),
            cooking_time: recipe.cooking_time,
        }
    }
}

#[derive(sqlx::FromRow, Debug, Clone)]
pub struct AuthoredRecipeShort {
    pub author_id: Id,
    pub id: Id,
    pub name: String,
    pub image: String,
    pub cooking_time: i32,
}

impl From<AuthoredRecipeShort> for RecipeShort {
    fn from(row: AuthoredRecipeShort) -> Self {
        Self {
            id: row.id,
            name: row.name,
            image: row.image,
            cooking_time: row.cooking_time,
        }
    }
}

/// One ingredient line of a recipe, joined with the catalog entry.
#[derive(sqlx::FromRow, Debug, Clone, Serialize, PartialEq)]
pub struct RecipeIngredient {
    #[serde(skip)]
    pub recipe_id: Id,
    pub id: Id,
    pub name: String,
    pub measurement_unit: String,
    pub amount: i32,
}

/// Read model of a recipe.
#[derive(Debug, Clone, Serialize)]
pub struct RecipeDetail {
    pub id: Id,
    pub tags: Vec<Tag>,
    pub author: UserProfile,
    pub ingredients: Vec<RecipeIngredient>,
    pub is_favorited: bool,
    pub is_in_shopping_cart: bool,
    pub name: String,
    pub image: String,
    pub text: String,
    pub cooking_time: i32,
    pub pub_date: DateTime<Utc>,
}

/// A followed author with their recipes.
#[derive(Debug, Clone, Serialize)]
pub struct Subscription {
    #[serde(flatten)]
    pub author: UserProfile,
    pub recipes: Vec<RecipeShort>,
    pub recipes_count: i64,
}

/// An ingredient line reached through a user's shopping cart.
#[derive(sqlx::FromRow, Debug, Clone, PartialEq, Eq)]
pub struct CartLine {
    pub name: String,
    pub measurement_unit: String,
    pub amount: i32,
}

#[derive(sqlx::FromRow, Debug, Clone, Copy)]
pub struct RecipeFlags {
    pub recipe_id: Id,
    pub is_favorited: bool,
    pub is_in_shopping_cart: bool,
}
