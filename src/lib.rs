pub mod app;
pub mod audit;
pub mod authz;
pub mod db;
pub mod docs;
pub mod errors;
pub mod extract;
pub mod jwt;
pub mod models;
pub mod routes;
pub mod session;
pub mod ssl;
pub mod utils;

// Re-export commonly used items for tests
pub use app::{create_app, router, AppState};
