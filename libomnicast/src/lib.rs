//! Omnicast - publish one post to many social platforms
//!
//! This library links social accounts through OAuth, stores their tokens
//! encrypted, and fans a post out to every targeted account, either right
//! away or when an external queue calls back at the scheduled time.

pub mod accounts;
pub mod config;
pub mod db;
pub mod error;
pub mod http;
pub mod logging;
pub mod oauth;
pub mod platforms;
pub mod publisher;
pub mod scheduling;
pub mod service;
pub mod types;
pub mod vault;

// Re-export commonly used types
pub use config::Config;
pub use db::Database;
pub use error::{OmnicastError, Result};
pub use publisher::{PublishOrchestrator, PublishReport, PublishRun, PublishTrigger};
pub use service::OmnicastService;
pub use types::{AccountLink, Platform, Post, PostContent, PostStatus, PublishLogEntry};
pub use vault::CredentialVault;
