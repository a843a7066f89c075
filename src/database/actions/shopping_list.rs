use chrono::NaiveDate;
use sqlx::{Pool, Postgres};

use crate::{
    authentication::{jwt::SessionData, permissions::ActionType},
    error::{Error, QueryError},
    schema::{CartLine, Id},
    shopping_list::ShoppingList,
};

/// Every ingredient line of every recipe in the user's cart, read in one
/// statement.
pub async fn fetch_cart_lines(user_id: Id, pool: &Pool<Postgres>) -> Result<Vec<CartLine>, Error> {
    let lines: Vec<CartLine> = sqlx::query_as(
        "
        SELECT i.name, i.measurement_unit, ri.amount
        FROM shopping_cart c
        INNER JOIN recipe_ingredients ri ON ri.recipe_id = c.recipe_id
        INNER JOIN ingredients i ON i.id = ri.ingredient_id
        WHERE c.user_id = $1
    ",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await
    .map_err(QueryError::from)?;

    Ok(lines)
}

pub async fn build_shopping_list(
    session: &SessionData,
    date: NaiveDate,
    pool: &Pool<Postgres>,
) -> Result<ShoppingList, Error> {
    session.authenticate(ActionType::ManageOwnRelations)?;

    let lines = fetch_cart_lines(session.user_id, pool).await?;
    log::debug!(
        "Building shopping list for user {} from {} lines",
        session.user_id,
        lines.len()
    );

    Ok(ShoppingList::aggregate(date, lines))
}
