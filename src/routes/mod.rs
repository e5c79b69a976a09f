pub mod auth;
pub mod events;
pub mod health;
pub mod swap;
pub mod ws;
