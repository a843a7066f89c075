mod database {
    pub mod actions;
    pub mod error;
    pub mod form;
    pub mod pagination;
    pub mod schema;
    pub mod setup;
}
mod authentication {
    pub mod cryptography;
    pub mod jwt;
    pub mod middleware;
    pub mod permissions;
}
mod domain {
    pub mod images;
    pub mod shopping_list;
    pub mod validation;
}
mod api {
    pub mod handlers;
    pub mod routes;
}
mod config;
mod constants;
mod state;

mod cache {
    pub mod cache;
}

pub use api::routes::routes;
pub use authentication::*;
pub use cache::cache::*;
pub use config::*;
pub use constants::*;
pub use database::*;
pub use domain::*;
pub use state::*;
