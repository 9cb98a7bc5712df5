pub mod auth;
pub mod resources;
pub mod status;

use crate::error::AppError;

pub async fn not_found() -> AppError {
    AppError::not_found("route")
}
