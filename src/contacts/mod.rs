pub mod dnd;
pub mod handlers;
pub mod import;
pub mod types;

pub use handlers::configure_contacts_routes;
