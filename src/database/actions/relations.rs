use sqlx::{Pool, Postgres};

use crate::{
    authentication::{jwt::SessionData, permissions::ActionType},
    error::{Error, HtmlError, QueryError},
    pagination::{PageContext, Pagination},
    schema::{Id, Recipe, RecipeShort, Subscription, UserProfile, UserProfileRow},
};

use super::{
    recipes::{count_author_recipes, fetch_author_recipes},
    users::get_user_profile,
};

/// The (user, recipe) relations. Both have the same contract and differ only
/// in storage and wording.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecipeEdge {
    Favorite,
    ShoppingCart,
}

impl RecipeEdge {
    fn table(self) -> &'static str {
        match self {
            RecipeEdge::Favorite => "favorites",
            RecipeEdge::ShoppingCart => "shopping_cart",
        }
    }

    fn already_present(self) -> &'static str {
        match self {
            RecipeEdge::Favorite => "Recipe is already in favorites",
            RecipeEdge::ShoppingCart => "Recipe is already in the shopping cart",
        }
    }

    fn absent(self) -> &'static str {
        match self {
            RecipeEdge::Favorite => "Recipe is not in favorites",
            RecipeEdge::ShoppingCart => "Recipe is not in the shopping cart",
        }
    }
}

/// Links `recipe_id` to the acting user and returns the recipe projection.
pub async fn add_recipe_edge(
    edge: RecipeEdge,
    session: &SessionData,
    recipe_id: Id,
    pool: &Pool<Postgres>,
) -> Result<RecipeShort, Error> {
    session.authenticate(ActionType::ManageOwnRelations)?;

    let mut tr = pool
        .begin()
        .await
        .map_err(|_| QueryError::new("Could not start transaction".to_owned()))?;

    let recipe: Option<Recipe> = sqlx::query_as("SELECT * FROM recipes WHERE id = $1")
        .bind(recipe_id)
        .fetch_optional(&mut *tr)
        .await
        .map_err(QueryError::from)?;
    let recipe =
        recipe.ok_or_else(|| HtmlError::NotFound.new("No recipe exists with specified id"))?;

    let result = sqlx::query(&format!(
        "INSERT INTO {} (user_id, recipe_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        edge.table()
    ))
    .bind(session.user_id)
    .bind(recipe_id)
    .execute(&mut *tr)
    .await
    .map_err(QueryError::from)?;

    if result.rows_affected() == 0 {
        return Err(HtmlError::AlreadyExists.new(edge.already_present()));
    }

    tr.commit()
        .await
        .map_err(|_| QueryError::new("Could not commit transaction".to_owned()))?;

    log::info!(
        "User {} added recipe {recipe_id} to {}",
        session.user_id,
        edge.table()
    );
    Ok(RecipeShort::from(&recipe))
}

pub async fn remove_recipe_edge(
    edge: RecipeEdge,
    session: &SessionData,
    recipe_id: Id,
    pool: &Pool<Postgres>,
) -> Result<(), Error> {
    session.authenticate(ActionType::ManageOwnRelations)?;

    let mut tr = pool
        .begin()
        .await
        .map_err(|_| QueryError::new("Could not start transaction".to_owned()))?;

    let exists: (bool,) = sqlx::query_as("SELECT EXISTS (SELECT 1 FROM recipes WHERE id = $1)")
        .bind(recipe_id)
        .fetch_one(&mut *tr)
        .await
        .map_err(QueryError::from)?;
    if !exists.0 {
        return Err(HtmlError::NotFound.new("No recipe exists with specified id"));
    }

    let result = sqlx::query(&format!(
        "DELETE FROM {} WHERE user_id = $1 AND recipe_id = $2",
        edge.table()
    ))
    .bind(session.user_id)
    .bind(recipe_id)
    .execute(&mut *tr)
    .await
    .map_err(QueryError::from)?;

    if result.rows_affected() == 0 {
        return Err(HtmlError::EdgeAbsent.new(edge.absent()));
    }

    tr.commit()
        .await
        .map_err(|_| QueryError::new("Could not commit transaction".to_owned()))?;

    log::info!(
        "User {} removed recipe {recipe_id} from {}",
        session.user_id,
        edge.table()
    );
    Ok(())
}

pub async fn add_favorite(
    session: &SessionData,
    recipe_id: Id,
    pool: &Pool<Postgres>,
) -> Result<RecipeShort, Error> {
    add_recipe_edge(RecipeEdge::Favorite, session, recipe_id, pool).await
}

pub async fn remove_favorite(
    session: &SessionData,
    recipe_id: Id,
    pool: &Pool<Postgres>,
) -> Result<(), Error> {
    remove_recipe_edge(RecipeEdge::Favorite, session, recipe_id, pool).await
}

pub async fn add_to_cart(
    session: &SessionData,
    recipe_id: Id,
    pool: &Pool<Postgres>,
) -> Result<RecipeShort, Error> {
    add_recipe_edge(RecipeEdge::ShoppingCart, session, recipe_id, pool).await
}

pub async fn remove_from_cart(
    session: &SessionData,
    recipe_id: Id,
    pool: &Pool<Postgres>,
) -> Result<(), Error> {
    remove_recipe_edge(RecipeEdge::ShoppingCart, session, recipe_id, pool).await
}

async fn attach_recipes(
    authors: Vec<UserProfile>,
    recipes_limit: Option<i64>,
    pool: &Pool<Postgres>,
) -> Result<Vec<Subscription>, Error> {
    let ids: Vec<Id> = authors.iter().map(|author| author.id).collect();
    let mut recipes = fetch_author_recipes(&ids, recipes_limit, pool).await?;
    let counts = count_author_recipes(&ids, pool).await?;

    Ok(authors
        .into_iter()
        .map(|author| Subscription {
            recipes: recipes.remove(&author.id).unwrap_or_default(),
            recipes_count: counts.get(&author.id).copied().unwrap_or(0),
            author,
        })
        .collect())
}

/// Checks run in a fixed order: unknown author, then self-subscription,
/// then an existing edge.
pub async fn subscribe(
    session: &SessionData,
    author_id: Id,
    recipes_limit: Option<i64>,
    pool: &Pool<Postgres>,
) -> Result<Subscription, Error> {
    session.authenticate(ActionType::ManageOwnRelations)?;

    let mut tr = pool
        .begin()
        .await
        .map_err(|_| QueryError::new("Could not start transaction".to_owned()))?;

    let exists: (bool,) = sqlx::query_as("SELECT EXISTS (SELECT 1 FROM users WHERE id = $1)")
        .bind(author_id)
        .fetch_one(&mut *tr)
        .await
        .map_err(QueryError::from)?;
    if !exists.0 {
        return Err(HtmlError::NotFound.new("No user exists with specified id"));
    }
    if author_id == session.user_id {
        return Err(HtmlError::SelfReferenceForbidden.new("You cannot subscribe to yourself"));
    }

    let result = sqlx::query(
        "INSERT INTO subscriptions (user_id, author_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
    )
    .bind(session.user_id)
    .bind(author_id)
    .execute(&mut *tr)
    .await
    .map_err(QueryError::from)?;

    if result.rows_affected() == 0 {
        return Err(HtmlError::AlreadyExists.new("You are already subscribed to this author"));
    }

    tr.commit()
        .await
        .map_err(|_| QueryError::new("Could not commit transaction".to_owned()))?;

    log::info!("User {} subscribed to {author_id}", session.user_id);

    let author = get_user_profile(author_id, Some(session.user_id), pool).await?;
    attach_recipes(vec![author], recipes_limit, pool)
        .await?
        .pop()
        .ok_or_else(|| HtmlError::InternalServerError.default())
}

pub async fn unsubscribe(
    session: &SessionData,
    author_id: Id,
    pool: &Pool<Postgres>,
) -> Result<(), Error> {
    session.authenticate(ActionType::ManageOwnRelations)?;

    let mut tr = pool
        .begin()
        .await
        .map_err(|_| QueryError::new("Could not start transaction".to_owned()))?;

    let exists: (bool,) = sqlx::query_as("SELECT EXISTS (SELECT 1 FROM users WHERE id = $1)")
        .bind(author_id)
        .fetch_one(&mut *tr)
        .await
        .map_err(QueryError::from)?;
    if !exists.0 {
        return Err(HtmlError::NotFound.new("No user exists with specified id"));
    }

    let result = sqlx::query("DELETE FROM subscriptions WHERE user_id = $1 AND author_id = $2")
        .bind(session.user_id)
        .bind(author_id)
        .execute(&mut *tr)
        .await
        .map_err(QueryError::from)?;

    if result.rows_affected() == 0 {
        return Err(HtmlError::EdgeAbsent.new("You are not subscribed to this author"));
    }

    tr.commit()
        .await
        .map_err(|_| QueryError::new("Could not commit transaction".to_owned()))?;

    log::info!("User {} unsubscribed from {author_id}", session.user_id);
    Ok(())
}

async fn count_subscriptions(user_id: Id, pool: &Pool<Postgres>) -> Result<i64, Error> {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM subscriptions WHERE user_id = $1")
        .bind(user_id)
        .fetch_one(pool)
        .await
        .map_err(QueryError::from)?;

    Ok(count)
}

/// Authors the acting user follows, ordered by username.
pub async fn fetch_subscriptions(
    session: &SessionData,
    pagination: Pagination,
    recipes_limit: Option<i64>,
    pool: &Pool<Postgres>,
) -> Result<PageContext<Subscription>, Error> {
    session.authenticate(ActionType::ManageOwnRelations)?;

    let rows: Vec<UserProfileRow> = sqlx::query_as(
        "
        SELECT u.email, u.id, u.username, u.first_name, u.last_name,
            TRUE AS is_subscribed, COUNT(*) OVER() AS count
        FROM subscriptions s
        INNER JOIN users u ON u.id = s.author_id
        WHERE s.user_id = $1
        ORDER BY u.username
        LIMIT $2 OFFSET $3
    ",
    )
    .bind(session.user_id)
    .bind(pagination.limit)
    .bind(pagination.offset())
    .fetch_all(pool)
    .await
    .map_err(QueryError::from)?;

    let total_count = match rows.first() {
        Some(row) => row.count,
        None if pagination.page > 1 => count_subscriptions(session.user_id, pool).await?,
        None => 0,
    };
    let authors = rows.into_iter().map(UserProfile::from).collect();
    let subscriptions = attach_recipes(authors, recipes_limit, pool).await?;

    Ok(PageContext::from_rows(subscriptions, total_count, pagination))
}

#[cfg(test)]
mod tests {
    use sqlx::PgPool;

    use super::*;
    use crate::{
        actions::fixtures::{catalog, prepare, recipe, recipe_input, user},
        images::ImageStore,
    };

    #[sqlx::test(migrations = false)]
    #[ignore = "Requires a Postgres server at DATABASE_URL"]
    async fn recipe_edges_report_duplicates_and_absences(pool: PgPool) {
        prepare(&pool).await;
        let media = tempfile::tempdir().unwrap();
        let images = ImageStore::new(media.path(), "/media/");
        let (dinner, salt) = catalog(&pool).await;
        let author = user("author", &pool).await;
        let reader = user("reader", &pool).await;
        let input = recipe_input("Soup", &[dinner], &[(salt, 5)]);
        let soup = recipe(&author, input, &images, &pool).await;

        let short = add_favorite(&reader, soup.id, &pool).await.unwrap();
        assert_eq!(short.id, soup.id);
        assert_eq!(short.name, "Soup");

        let err = add_favorite(&reader, soup.id, &pool).await.unwrap_err();
        assert_eq!(err.kind, HtmlError::AlreadyExists);

        remove_favorite(&reader, soup.id, &pool).await.unwrap();
        let err = remove_favorite(&reader, soup.id, &pool).await.unwrap_err();
        assert_eq!(err.kind, HtmlError::EdgeAbsent);

        let err = remove_from_cart(&reader, soup.id, &pool).await.unwrap_err();
        assert_eq!(err.kind, HtmlError::EdgeAbsent);
        add_to_cart(&reader, soup.id, &pool).await.unwrap();
        let err = add_to_cart(&reader, soup.id, &pool).await.unwrap_err();
        assert_eq!(err.kind, HtmlError::AlreadyExists);

        let err = add_favorite(&reader, soup.id + 100, &pool).await.unwrap_err();
        assert_eq!(err.kind, HtmlError::NotFound);
        let err = remove_from_cart(&reader, soup.id + 100, &pool).await.unwrap_err();
        assert_eq!(err.kind, HtmlError::NotFound);
    }

    #[sqlx::test(migrations = false)]
    #[ignore = "Requires a Postgres server at DATABASE_URL"]
    async fn subscriptions_follow_the_check_order(pool: PgPool) {
        prepare(&pool).await;
        let follower = user("follower", &pool).await;
        let author = user("author", &pool).await;

        let err = subscribe(&follower, follower.user_id, None, &pool).await.unwrap_err();
        assert_eq!(err.kind, HtmlError::SelfReferenceForbidden);

        let err = subscribe(&follower, author.user_id + 100, None, &pool).await.unwrap_err();
        assert_eq!(err.kind, HtmlError::NotFound);

        let subscription = subscribe(&follower, author.user_id, None, &pool).await.unwrap();
        assert!(subscription.author.is_subscribed);
        assert_eq!(subscription.recipes_count, 0);

        let err = subscribe(&follower, author.user_id, None, &pool).await.unwrap_err();
        assert_eq!(err.kind, HtmlError::AlreadyExists);

        // Still forbidden after other edges exist.
        let err = subscribe(&follower, follower.user_id, None, &pool).await.unwrap_err();
        assert_eq!(err.kind, HtmlError::SelfReferenceForbidden);

        unsubscribe(&follower, author.user_id, &pool).await.unwrap();
        let err = unsubscribe(&follower, author.user_id, &pool).await.unwrap_err();
        assert_eq!(err.kind, HtmlError::EdgeAbsent);
    }

    #[sqlx::test(migrations = false)]
    #[ignore = "Requires a Postgres server at DATABASE_URL"]
    async fn subscription_pages_keep_the_total_past_the_end(pool: PgPool) {
        prepare(&pool).await;
        let media = tempfile::tempdir().unwrap();
        let images = ImageStore::new(media.path(), "/media/");
        let (dinner, salt) = catalog(&pool).await;
        let follower = user("follower", &pool).await;
        for name in ["anna", "bert", "cleo"] {
            let author = user(name, &pool).await;
            for dish in ["Soup", "Stew"] {
                let input = recipe_input(dish, &[dinner], &[(salt, 5)]);
                recipe(&author, input, &images, &pool).await;
            }
            subscribe(&follower, author.user_id, None, &pool).await.unwrap();
        }

        let page = fetch_subscriptions(&follower, Pagination::new(1, 2), Some(1), &pool)
            .await
            .unwrap();
        assert_eq!(page.count, 3);
        assert_eq!(page.next, Some(2));
        assert_eq!(page.results[0].author.username, "anna");
        assert_eq!(page.results[0].recipes.len(), 1);
        assert_eq!(page.results[0].recipes_count, 2);

        let page = fetch_subscriptions(&follower, Pagination::new(5, 2), None, &pool)
            .await
            .unwrap();
        assert!(page.results.is_empty());
        assert_eq!(page.count, 3);
        assert_eq!(page.previous, Some(2));
    }
}
