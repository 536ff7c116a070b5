//! HTTP routing for the resource bus.

pub mod respond;
mod routes;
mod state;

pub use routes::{
    create_router, create_router_with_body_limit, create_router_with_observability,
    DEFAULT_BODY_LIMIT,
};
pub use state::AppState;
