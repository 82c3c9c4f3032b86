pub mod analysis;
pub mod chat;
pub mod errors;
pub mod events;
pub mod image;
pub mod models;
pub mod presentation;
pub mod schema;
