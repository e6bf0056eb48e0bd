pub mod api_router;
pub mod channels;
pub mod contacts;
pub mod conversations;
pub mod core;
pub mod crm;
pub mod llm;
pub mod pipelines;
