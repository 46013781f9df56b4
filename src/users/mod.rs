use axum::Router;

use crate::state::AppState;

pub mod account;
mod dto;
pub(crate) mod extractors;
mod handlers;
mod password;
pub mod session;
pub mod store;
pub mod tokens;

pub fn router() -> Router<AppState> {
    handlers::routes()
}
