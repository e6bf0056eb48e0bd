pub mod board;
pub mod handlers;
pub mod types;

pub use handlers::configure_pipelines_routes;
