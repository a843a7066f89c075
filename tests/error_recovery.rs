use std::collections::HashMap;

use warp::{http::StatusCode, Filter, Rejection};

use foodgram_sdk::{
    error::{recover, Error, HtmlError},
    form::{Form, RecipeInput},
};

fn errors(body: &[u8]) -> String {
    let value: serde_json::Value = serde_json::from_slice(body).unwrap();
    value["errors"].as_str().unwrap().to_string()
}

fn failing(error: Error) -> impl Filter<Extract = (&'static str,), Error = Rejection> + Clone {
    warp::any().and_then(move || {
        let error = error.clone();
        async move { Err::<&'static str, Rejection>(Rejection::from(error)) }
    })
}

#[tokio::test]
async fn business_errors_render_their_message() {
    let cases = [
        (
            HtmlError::AlreadyExists.new("Recipe is already in favorites"),
            StatusCode::BAD_REQUEST,
        ),
        (
            HtmlError::EdgeAbsent.new("Recipe is not in favorites"),
            StatusCode::BAD_REQUEST,
        ),
        (
            HtmlError::SelfReferenceForbidden.new("You cannot subscribe to yourself"),
            StatusCode::BAD_REQUEST,
        ),
        (
            HtmlError::NotFound.new("No recipe exists with specified id"),
            StatusCode::NOT_FOUND,
        ),
        (HtmlError::Forbidden.default(), StatusCode::FORBIDDEN),
    ];

    for (error, status) in cases {
        let message = error.message().to_string();
        let filter = failing(error).recover(recover);

        let response = warp::test::request().reply(&filter).await;

        assert_eq!(response.status(), status);
        assert_eq!(errors(response.body()), message);
    }
}

#[tokio::test]
async fn internal_errors_hide_their_details() {
    let filter = failing(HtmlError::InternalServerError.new("connection refused at 10.0.0.3"))
        .recover(recover);

    let response = warp::test::request().reply(&filter).await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(errors(response.body()), "Internal server error");
}

#[tokio::test]
async fn unknown_paths_are_not_found() {
    let filter = warp::path!("api" / "tags").map(|| "tags").recover(recover);

    let response = warp::test::request().path("/api/nothing/").reply(&filter).await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(errors(response.body()), "Not found");
}

#[tokio::test]
async fn invalid_json_is_a_bad_request() {
    let filter = warp::body::json::<HashMap<String, serde_json::Value>>()
        .map(|_data| "ok")
        .recover(recover);

    let response = warp::test::request()
        .method("POST")
        .header("content-type", "application/json")
        .body("{\"name\": ")
        .reply(&filter)
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn malformed_recipe_bodies_are_validation_failures() {
    let filter = warp::body::json::<HashMap<String, serde_json::Value>>()
        .and_then(|data| async move {
            RecipeInput::try_from(Form::from_data(data))
                .map(|_input| "ok")
                .map_err(|e| Rejection::from(Error::from(e)))
        })
        .recover(recover);

    let response = warp::test::request()
        .method("POST")
        .json(&serde_json::json!({
            "tags": [1],
            "ingredients": [],
            "name": "Soup",
            "image": "data:image/png;base64,AA==",
            "text": "Boil",
            "cooking_time": "soon"
        }))
        .reply(&filter)
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        errors(response.body()),
        "cooking_time: A valid integer is required."
    );
}
