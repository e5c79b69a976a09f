pub mod auth;
pub mod init;
pub mod notifier;
pub mod swaps;
