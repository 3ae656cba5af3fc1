//! Framework-agnostic business logic.
//!
//! Every function takes a database handle and plain arguments; the HTTP layer
//! in [`crate::api`] only parses requests and formats responses.

pub mod ai_services;
pub mod app_settings;
pub mod billing;
pub mod distribution_log;
pub mod generation;
pub mod groups;
pub mod invitation;
pub mod prompts;
pub mod subscription;
pub mod template;
pub mod tree;
pub mod users;
