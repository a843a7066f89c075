use std::{convert::Infallible, sync::Arc};

use warp::{
    filters::BoxedFilter,
    reply::{Reply, Response},
    Filter,
};

use crate::{
    error::recover,
    form::{FormData, QueryData},
    middleware::{with_possible_session, with_session},
    schema::Id,
    state::State,
    MAX_BODY_SIZE,
};

use super::handlers;

fn with_state(state: Arc<State>) -> impl Filter<Extract = (Arc<State>,), Error = Infallible> + Clone {
    warp::any().map(move || state.clone())
}

fn json_body() -> impl Filter<Extract = (FormData,), Error = warp::Rejection> + Clone {
    warp::body::content_length_limit(MAX_BODY_SIZE).and(warp::body::json())
}

fn query() -> impl Filter<Extract = (QueryData,), Error = Infallible> + Clone {
    warp::query::<QueryData>().or(warp::any().map(QueryData::new)).unify()
}

fn user_routes(state: Arc<State>) -> BoxedFilter<(Response,)> {
    let session = with_session(state.keys.clone());
    let possible_session = with_possible_session(state.keys.clone());

    let list = warp::path!("api" / "users")
        .and(warp::get())
        .and(possible_session.clone())
        .and(query())
        .and(with_state(state.clone()))
        .and_then(handlers::list_users);

    let register = warp::path!("api" / "users")
        .and(warp::post())
        .and(json_body())
        .and(with_state(state.clone()))
        .and_then(handlers::register);

    let me = warp::path!("api" / "users" / "me")
        .and(warp::get())
        .and(session.clone())
        .and(with_state(state.clone()))
        .and_then(handlers::current_user);

    let set_password = warp::path!("api" / "users" / "set_password")
        .and(warp::post())
        .and(session.clone())
        .and(json_body())
        .and(with_state(state.clone()))
        .and_then(handlers::set_password);

    let subscriptions = warp::path!("api" / "users" / "subscriptions")
        .and(warp::get())
        .and(session.clone())
        .and(query())
        .and(with_state(state.clone()))
        .and_then(handlers::subscriptions);

    let detail = warp::path!("api" / "users" / Id)
        .and(warp::get())
        .and(possible_session)
        .and(with_state(state.clone()))
        .and_then(handlers::user_detail);

    let subscribe = warp::path!("api" / "users" / Id / "subscribe")
        .and(warp::post())
        .and(session.clone())
        .and(query())
        .and(with_state(state.clone()))
        .and_then(handlers::subscribe);

    let unsubscribe = warp::path!("api" / "users" / Id / "subscribe")
        .and(warp::delete())
        .and(session)
        .and(with_state(state.clone()))
        .and_then(handlers::unsubscribe);

    let login = warp::path!("api" / "auth" / "token" / "login")
        .and(warp::post())
        .and(json_body())
        .and(with_state(state))
        .and_then(handlers::login);

    list.or(register)
        .unify()
        .or(me)
        .unify()
        .or(set_password)
        .unify()
        .or(subscriptions)
        .unify()
        .or(detail)
        .unify()
        .or(subscribe)
        .unify()
        .or(unsubscribe)
        .unify()
        .or(login)
        .unify()
        .boxed()
}

fn tag_routes(state: Arc<State>) -> BoxedFilter<(Response,)> {
    let session = with_session(state.keys.clone());

    let list = warp::path!("api" / "tags")
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(handlers::list_tags);

    let detail = warp::path!("api" / "tags" / Id)
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(handlers::tag_detail);

    let create = warp::path!("api" / "tags")
        .and(warp::post())
        .and(session.clone())
        .and(json_body())
        .and(with_state(state.clone()))
        .and_then(handlers::create_tag);

    let update = warp::path!("api" / "tags" / Id)
        .and(warp::patch())
        .and(session.clone())
        .and(json_body())
        .and(with_state(state.clone()))
        .and_then(handlers::update_tag);

    let delete = warp::path!("api" / "tags" / Id)
        .and(warp::delete())
        .and(session)
        .and(with_state(state))
        .and_then(handlers::delete_tag);

    list.or(detail)
        .unify()
        .or(create)
        .unify()
        .or(update)
        .unify()
        .or(delete)
        .unify()
        .boxed()
}

fn ingredient_routes(state: Arc<State>) -> BoxedFilter<(Response,)> {
    let session = with_session(state.keys.clone());

    let list = warp::path!("api" / "ingredients")
        .and(warp::get())
        .and(query())
        .and(with_state(state.clone()))
        .and_then(handlers::list_ingredients);

    let detail = warp::path!("api" / "ingredients" / Id)
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(handlers::ingredient_detail);

    let create = warp::path!("api" / "ingredients")
        .and(warp::post())
        .and(session.clone())
        .and(json_body())
        .and(with_state(state.clone()))
        .and_then(handlers::create_ingredient);

    let update = warp::path!("api" / "ingredients" / Id)
        .and(warp::patch())
        .and(session.clone())
        .and(json_body())
        .and(with_state(state.clone()))
        .and_then(handlers::update_ingredient);

    let delete = warp::path!("api" / "ingredients" / Id)
        .and(warp::delete())
        .and(session)
        .and(with_state(state))
        .and_then(handlers::delete_ingredient);

    list.or(detail)
        .unify()
        .or(create)
        .unify()
        .or(update)
        .unify()
        .or(delete)
        .unify()
        .boxed()
}

fn recipe_routes(state: Arc<State>) -> BoxedFilter<(Response,)> {
    let session = with_session(state.keys.clone());
    let possible_session = with_possible_session(state.keys.clone());

    let list = warp::path!("api" / "recipes")
        .and(warp::get())
        .and(possible_session.clone())
        .and(query())
        .and(with_state(state.clone()))
        .and_then(handlers::list_recipes);

    let create = warp::path!("api" / "recipes")
        .and(warp::post())
        .and(session.clone())
        .and(json_body())
        .and(with_state(state.clone()))
        .and_then(handlers::create_recipe);

    let download = warp::path!("api" / "recipes" / "download_shopping_cart")
        .and(warp::get())
        .and(session.clone())
        .and(with_state(state.clone()))
        .and_then(handlers::download_shopping_cart);

    let detail = warp::path!("api" / "recipes" / Id)
        .and(warp::get())
        .and(possible_session)
        .and(with_state(state.clone()))
        .and_then(handlers::recipe_detail);

    let update = warp::path!("api" / "recipes" / Id)
        .and(warp::patch())
        .and(session.clone())
        .and(json_body())
        .and(with_state(state.clone()))
        .and_then(handlers::update_recipe);

    let replace = warp::path!("api" / "recipes" / Id)
        .and(warp::put())
        .and(session.clone())
        .and(json_body())
        .and(with_state(state.clone()))
        .and_then(handlers::replace_recipe);

    let delete = warp::path!("api" / "recipes" / Id)
        .and(warp::delete())
        .and(session.clone())
        .and(with_state(state.clone()))
        .and_then(handlers::delete_recipe);

    let add_favorite = warp::path!("api" / "recipes" / Id / "favorite")
        .and(warp::post())
        .and(session.clone())
        .and(with_state(state.clone()))
        .and_then(handlers::add_favorite);

    let remove_favorite = warp::path!("api" / "recipes" / Id / "favorite")
        .and(warp::delete())
        .and(session.clone())
        .and(with_state(state.clone()))
        .and_then(handlers::remove_favorite);

    let add_to_cart = warp::path!("api" / "recipes" / Id / "shopping_cart")
        .and(warp::post())
        .and(session.clone())
        .and(with_state(state.clone()))
        .and_then(handlers::add_to_cart);

    let remove_from_cart = warp::path!("api" / "recipes" / Id / "shopping_cart")
        .and(warp::delete())
        .and(session)
        .and(with_state(state))
        .and_then(handlers::remove_from_cart);

    list.or(create)
        .unify()
        .or(download)
        .unify()
        .or(detail)
        .unify()
        .or(update)
        .unify()
        .or(replace)
        .unify()
        .or(delete)
        .unify()
        .or(add_favorite)
        .unify()
        .or(remove_favorite)
        .unify()
        .or(add_to_cart)
        .unify()
        .or(remove_from_cart)
        .unify()
        .boxed()
}

fn media_routes(state: &State) -> BoxedFilter<(Response,)> {
    warp::path("media")
        .and(warp::fs::dir(state.images.root().to_owned()))
        .map(|file: warp::fs::File| file.into_response())
        .boxed()
}

/// The whole HTTP API. Every rejection is rendered by [`recover`].
pub fn routes(state: Arc<State>) -> impl Filter<Extract = impl Reply, Error = Infallible> + Clone {
    let media = media_routes(&state);

    user_routes(state.clone())
        .or(tag_routes(state.clone()))
        .unify()
        .or(ingredient_routes(state.clone()))
        .unify()
        .or(recipe_routes(state))
        .unify()
        .or(media)
        .unify()
        .with(warp::log("foodgram::api"))
        .recover(recover)
}
