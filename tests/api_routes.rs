use std::sync::Arc;

use chrono::Duration;
use serde_json::{json, Value};
use sqlx::PgPool;
use warp::http::StatusCode;

use foodgram_sdk::{
    connect_redis, images::ImageStore, jwt::SessionKeys, routes, setup::init_schema, State,
};

async fn state(pool: PgPool, media: &tempfile::TempDir) -> Arc<State> {
    init_schema(&pool).await.unwrap();
    let redis_url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1/".into());

    Arc::new(State {
        pool,
        cache: connect_redis(&redis_url).await.unwrap(),
        images: ImageStore::new(media.path(), "/media/"),
        keys: Arc::new(SessionKeys::new(b"routes-secret", Duration::hours(1)).unwrap()),
    })
}

fn body(response: &warp::http::Response<warp::hyper::body::Bytes>) -> Value {
    serde_json::from_slice(response.body()).unwrap()
}

#[sqlx::test(migrations = false)]
#[ignore = "Requires Postgres at DATABASE_URL and redis at REDIS_URL"]
async fn user_flow_over_http(pool: PgPool) {
    let media = tempfile::tempdir().unwrap();
    let api = routes(state(pool, &media).await);

    let registered = warp::test::request()
        .method("POST")
        .path("/api/users/")
        .json(&json!({
            "email": "cook@example.com",
            "username": "cook",
            "first_name": "Anna",
            "last_name": "Cook",
            "password": "correct-horse"
        }))
        .reply(&api)
        .await;
    assert_eq!(registered.status(), StatusCode::CREATED);
    let user_id = body(&registered)["id"].as_i64().unwrap();

    let login = warp::test::request()
        .method("POST")
        .path("/api/auth/token/login/")
        .json(&json!({"email": "cook@example.com", "password": "correct-horse"}))
        .reply(&api)
        .await;
    assert_eq!(login.status(), StatusCode::OK);
    let token = body(&login)["auth_token"].as_str().unwrap().to_string();

    let me = warp::test::request()
        .path("/api/users/me/")
        .header("authorization", format!("Token {token}"))
        .reply(&api)
        .await;
    assert_eq!(me.status(), StatusCode::OK);
    assert_eq!(body(&me)["username"], "cook");

    let own = warp::test::request()
        .method("POST")
        .path(&format!("/api/users/{user_id}/subscribe/"))
        .header("authorization", format!("Token {token}"))
        .reply(&api)
        .await;
    assert_eq!(own.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body(&own)["errors"], "You cannot subscribe to yourself");

    let cart = warp::test::request()
        .path("/api/recipes/download_shopping_cart/")
        .header("authorization", format!("Token {token}"))
        .reply(&api)
        .await;
    assert_eq!(cart.status(), StatusCode::OK);
    assert_eq!(
        cart.headers()["content-type"],
        "text/plain; charset=utf-8"
    );
}

#[sqlx::test(migrations = false)]
#[ignore = "Requires Postgres at DATABASE_URL and redis at REDIS_URL"]
async fn paths_resolve_with_and_without_trailing_slash(pool: PgPool) {
    let media = tempfile::tempdir().unwrap();
    let api = routes(state(pool, &media).await);

    for path in ["/api/tags", "/api/tags/", "/api/ingredients/?name=sa"] {
        let response = warp::test::request().path(path).reply(&api).await;
        assert_eq!(response.status(), StatusCode::OK, "{path}");
        assert_eq!(body(&response), json!([]));
    }

    let recipes = warp::test::request().path("/api/recipes/").reply(&api).await;
    assert_eq!(recipes.status(), StatusCode::OK);
    assert_eq!(body(&recipes)["count"], 0);

    let anonymous_cart = warp::test::request()
        .path("/api/recipes/download_shopping_cart/")
        .reply(&api)
        .await;
    assert_eq!(anonymous_cart.status(), StatusCode::UNAUTHORIZED);

    let anonymous_favorite = warp::test::request()
        .method("POST")
        .path("/api/recipes/1/favorite/")
        .reply(&api)
        .await;
    assert_eq!(anonymous_favorite.status(), StatusCode::UNAUTHORIZED);

    let missing = warp::test::request().path("/api/recipes/7/").reply(&api).await;
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);

    let huge_page = warp::test::request()
        .path(&format!("/api/recipes/?page={}&limit=100", i64::MAX))
        .reply(&api)
        .await;
    assert_eq!(huge_page.status(), StatusCode::BAD_REQUEST);
}
