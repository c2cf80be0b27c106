pub mod agent;

use axum::Router;

pub fn configure() -> Router {
    Router::new().merge(agent::routes())
}
