use std::sync::Arc;

use chrono::Local;
use serde::Serialize;
use warp::{
    http::StatusCode,
    reject::Rejection,
    reply::{self, Reply, Response},
};

use crate::{
    actions,
    authentication::{jwt::SessionData, permissions::ActionType},
    error::{Error, HtmlError},
    form::{
        Form, FormData, IngredientInput, IngredientPatch, LoginInput, QueryData, QueryForm,
        RecipeFilter, RecipeInput, RecipePatch, RegisterInput, SetPasswordInput, TagInput,
        TagPatch,
    },
    pagination::Pagination,
    schema::Id,
    state::State,
    RECIPE_COUNT_PER_PAGE, SHOPPING_LIST_FILENAME, USER_COUNT_PER_PAGE,
};

type HandlerResult = Result<Response, Rejection>;

fn json_reply<T: Serialize>(value: &T, status: StatusCode) -> Response {
    reply::with_status(reply::json(value), status).into_response()
}

fn ok<T: Serialize>(value: &T) -> HandlerResult {
    Ok(json_reply(value, StatusCode::OK))
}

fn created<T: Serialize>(value: &T) -> HandlerResult {
    Ok(json_reply(value, StatusCode::CREATED))
}

fn no_content() -> HandlerResult {
    Ok(StatusCode::NO_CONTENT.into_response())
}

fn parse<T>(data: FormData) -> Result<T, Error>
where
    T: TryFrom<Form, Error = crate::error::TypeError>,
{
    T::try_from(Form::from_data(data)).map_err(Error::from)
}

fn viewer_id(session: &Option<SessionData>) -> Option<Id> {
    session.as_ref().map(|session| session.user_id)
}

/// Zero and an absent value both mean every recipe.
fn recipes_limit(query: &QueryForm) -> Result<Option<i64>, Error> {
    match query.get_number::<i64>("recipes_limit")? {
        Some(limit) if limit < 0 => Err(HtmlError::ValidationFailed
            .new("recipes_limit: Ensure this value is greater than or equal to 0.")),
        Some(0) | None => Ok(None),
        limit => Ok(limit),
    }
}

#[derive(Serialize)]
struct AuthToken {
    auth_token: String,
}

// Users

pub async fn list_users(
    session: Option<SessionData>,
    query: QueryData,
    state: Arc<State>,
) -> HandlerResult {
    let query = QueryForm::from_data(query);
    let pagination = Pagination::from_query(&query, USER_COUNT_PER_PAGE).map_err(Error::from)?;

    let page = actions::fetch_users(viewer_id(&session), pagination, &state.pool).await?;
    ok(&page)
}

pub async fn register(data: FormData, state: Arc<State>) -> HandlerResult {
    let input: RegisterInput = parse(data)?;

    let profile = actions::register_user(input, &state.pool).await?;
    created(&profile)
}

pub async fn login(data: FormData, state: Arc<State>) -> HandlerResult {
    let input: LoginInput = parse(data)?;

    let auth_token = actions::login_user(input, &state.keys, &state.pool).await?;
    ok(&AuthToken { auth_token })
}

pub async fn current_user(session: SessionData, state: Arc<State>) -> HandlerResult {
    let profile =
        actions::get_user_profile(session.user_id, Some(session.user_id), &state.pool).await?;
    ok(&profile)
}

pub async fn user_detail(
    id: Id,
    session: Option<SessionData>,
    state: Arc<State>,
) -> HandlerResult {
    let profile = actions::get_user_profile(id, viewer_id(&session), &state.pool).await?;
    ok(&profile)
}

pub async fn set_password(session: SessionData, data: FormData, state: Arc<State>) -> HandlerResult {
    let input: SetPasswordInput = parse(data)?;

    actions::set_password(&session, input, &state.pool).await?;
    no_content()
}

pub async fn subscribe(
    id: Id,
    session: SessionData,
    query: QueryData,
    state: Arc<State>,
) -> HandlerResult {
    let limit = recipes_limit(&QueryForm::from_data(query))?;

    let subscription = actions::subscribe(&session, id, limit, &state.pool).await?;
    created(&subscription)
}

pub async fn unsubscribe(id: Id, session: SessionData, state: Arc<State>) -> HandlerResult {
    actions::unsubscribe(&session, id, &state.pool).await?;
    no_content()
}

pub async fn subscriptions(
    session: SessionData,
    query: QueryData,
    state: Arc<State>,
) -> HandlerResult {
    let query = QueryForm::from_data(query);
    let pagination = Pagination::from_query(&query, USER_COUNT_PER_PAGE).map_err(Error::from)?;
    let limit = recipes_limit(&query)?;

    let page = actions::fetch_subscriptions(&session, pagination, limit, &state.pool).await?;
    ok(&page)
}

// Tags

pub async fn list_tags(state: Arc<State>) -> HandlerResult {
    let tags = actions::list_tags(&state.pool, &mut state.cache()).await?;
    ok(&tags)
}

pub async fn tag_detail(id: Id, state: Arc<State>) -> HandlerResult {
    let tag = actions::get_tag(id, &state.pool).await?;
    ok(&tag)
}

pub async fn create_tag(session: SessionData, data: FormData, state: Arc<State>) -> HandlerResult {
    session.authenticate(ActionType::ManageCatalog)?;
    let input: TagInput = parse(data)?;

    let tag = actions::create_tag(input, &state.pool, &mut state.cache()).await?;
    created(&tag)
}

pub async fn update_tag(
    id: Id,
    session: SessionData,
    data: FormData,
    state: Arc<State>,
) -> HandlerResult {
    session.authenticate(ActionType::ManageCatalog)?;
    let patch: TagPatch = parse(data)?;

    let tag = actions::update_tag(id, patch, &state.pool, &mut state.cache()).await?;
    ok(&tag)
}

pub async fn delete_tag(id: Id, session: SessionData, state: Arc<State>) -> HandlerResult {
    session.authenticate(ActionType::ManageCatalog)?;

    actions::delete_tag(id, &state.pool, &mut state.cache()).await?;
    no_content()
}

// Ingredients

pub async fn list_ingredients(query: QueryData, state: Arc<State>) -> HandlerResult {
    let query = QueryForm::from_data(query);
    let prefix = query.get_str("name").unwrap_or_default();

    let ingredients = actions::fetch_ingredients(prefix, &state.pool, &mut state.cache()).await?;
    ok(&ingredients)
}

pub async fn ingredient_detail(id: Id, state: Arc<State>) -> HandlerResult {
    let ingredient = actions::get_ingredient(id, &state.pool).await?;
    ok(&ingredient)
}

pub async fn create_ingredient(
    session: SessionData,
    data: FormData,
    state: Arc<State>,
) -> HandlerResult {
    session.authenticate(ActionType::ManageCatalog)?;
    let input: IngredientInput = parse(data)?;

    let ingredient = actions::create_ingredient(input, &state.pool, &mut state.cache()).await?;
    created(&ingredient)
}

pub async fn update_ingredient(
    id: Id,
    session: SessionData,
    data: FormData,
    state: Arc<State>,
) -> HandlerResult {
    session.authenticate(ActionType::ManageCatalog)?;
    let patch: IngredientPatch = parse(data)?;

    let ingredient =
        actions::update_ingredient(id, patch, &state.pool, &mut state.cache()).await?;
    ok(&ingredient)
}

pub async fn delete_ingredient(id: Id, session: SessionData, state: Arc<State>) -> HandlerResult {
    session.authenticate(ActionType::ManageCatalog)?;

    actions::delete_ingredient(id, &state.pool, &mut state.cache()).await?;
    no_content()
}

// Recipes

pub async fn list_recipes(
    session: Option<SessionData>,
    query: QueryData,
    state: Arc<State>,
) -> HandlerResult {
    let query = QueryForm::from_data(query);
    let pagination = Pagination::from_query(&query, RECIPE_COUNT_PER_PAGE).map_err(Error::from)?;
    let filter = RecipeFilter::try_from(&query).map_err(Error::from)?;

    let page =
        actions::fetch_recipes(&filter, viewer_id(&session), pagination, &state.pool).await?;
    ok(&page)
}

pub async fn recipe_detail(
    id: Id,
    session: Option<SessionData>,
    state: Arc<State>,
) -> HandlerResult {
    let recipe = actions::get_recipe_detail(id, viewer_id(&session), &state.pool).await?;
    ok(&recipe)
}

pub async fn create_recipe(
    session: SessionData,
    data: FormData,
    state: Arc<State>,
) -> HandlerResult {
    let input: RecipeInput = parse(data)?;

    let recipe = actions::create_recipe(&session, input, &state.images, &state.pool).await?;
    created(&recipe)
}

pub async fn update_recipe(
    id: Id,
    session: SessionData,
    data: FormData,
    state: Arc<State>,
) -> HandlerResult {
    let patch: RecipePatch = parse(data)?;

    let recipe = actions::update_recipe(id, &session, patch, &state.images, &state.pool).await?;
    ok(&recipe)
}

/// Full replacement: every field of a new recipe is required.
pub async fn replace_recipe(
    id: Id,
    session: SessionData,
    data: FormData,
    state: Arc<State>,
) -> HandlerResult {
    let input: RecipeInput = parse(data)?;

    let recipe =
        actions::update_recipe(id, &session, input.into(), &state.images, &state.pool).await?;
    ok(&recipe)
}

pub async fn delete_recipe(id: Id, session: SessionData, state: Arc<State>) -> HandlerResult {
    actions::delete_recipe(id, &session, &state.images, &state.pool).await?;
    no_content()
}

pub async fn add_favorite(id: Id, session: SessionData, state: Arc<State>) -> HandlerResult {
    let recipe = actions::add_favorite(&session, id, &state.pool).await?;
    created(&recipe)
}

pub async fn remove_favorite(id: Id, session: SessionData, state: Arc<State>) -> HandlerResult {
    actions::remove_favorite(&session, id, &state.pool).await?;
    no_content()
}

pub async fn add_to_cart(id: Id, session: SessionData, state: Arc<State>) -> HandlerResult {
    let recipe = actions::add_to_cart(&session, id, &state.pool).await?;
    created(&recipe)
}

pub async fn remove_from_cart(id: Id, session: SessionData, state: Arc<State>) -> HandlerResult {
    actions::remove_from_cart(&session, id, &state.pool).await?;
    no_content()
}

pub async fn download_shopping_cart(session: SessionData, state: Arc<State>) -> HandlerResult {
    let date = Local::now().date_naive();
    let list = actions::build_shopping_list(&session, date, &state.pool).await?;
    let body: String = (&list).into();

    Ok(reply::with_header(
        reply::with_header(body, "content-type", "text/plain; charset=utf-8"),
        "content-disposition",
        format!("attachment; filename=\"{SHOPPING_LIST_FILENAME}\""),
    )
    .into_response())
}
