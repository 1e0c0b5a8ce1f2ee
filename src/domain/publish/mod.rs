//! Publish domain: models, status translation, and DB queries

pub mod models;
pub mod queries;
pub mod status;

pub use models::{PlatformTarget, PostStatus, PublishMode, PublishRequest};
