//! Database models split into separate files.
//! This module re-exports individual model modules so imports like
//! `use crate::db::models::*;` work.

pub mod slot;
pub mod swap_request;
pub mod user;

pub use self::slot::*;
pub use self::swap_request::*;
pub use self::user::*;
