//! Service layer for Omnicast
//!
//! `OmnicastService` is the facade the HTTP layer and the sweep binary work
//! through. It owns the shared resources and wires the sub-services together:
//!
//! - `AccountRegistry`: OAuth connect flows and linked accounts
//! - `PostService`: owner-scoped post management
//! - `PublishOrchestrator` / `PublishExecutor`: publish runs
//! - `SchedulerBridge`: external queue, webhook and sweep
//! - `EventBus`: progress events
//!
//! # Example
//!
//! ```no_run
//! use libomnicast::service::OmnicastService;
//! use libomnicast::Config;
//!
//! # async fn example() -> libomnicast::Result<()> {
//! let service = OmnicastService::from_config(Config::load()?).await?;
//! let report = service.scheduler().sweep(chrono::Utc::now().timestamp()).await?;
//! println!("Swept {} jobs", report.claimed);
//! # Ok(())
//! # }
//! ```

pub mod events;
pub mod executor;
pub mod posts;

use secrecy::ExposeSecret;
use std::sync::Arc;
use tracing::warn;

use self::events::{EventBus, EventReceiver};
use self::executor::PublishExecutor;
use self::posts::PostService;
use crate::accounts::AccountRegistry;
use crate::config::Config;
use crate::db::Database;
use crate::error::{ConfigError, OmnicastError, Result};
use crate::oauth::{HttpProviderFactory, ProviderFactory};
use crate::platforms::{build_http_client, AdapterFactory, HttpAdapterFactory};
use crate::publisher::PublishOrchestrator;
use crate::scheduling::{HttpQueueClient, QueueClient, SchedulerBridge, SignatureVerifier};
use crate::vault::CredentialVault;

/// Main service facade
///
/// Every sub-service shares the same `Arc<Database>` and `Arc<Config>`.
pub struct OmnicastService {
    config: Arc<Config>,
    db: Arc<Database>,
    accounts: Arc<AccountRegistry>,
    posts: PostService,
    executor: PublishExecutor,
    scheduler: Arc<SchedulerBridge>,
    event_bus: EventBus,
}

impl OmnicastService {
    /// Build the production service: SQLite, HTTP adapters and providers,
    /// and the external queue when one is configured
    pub async fn from_config(config: Config) -> Result<Self> {
        config.validate()?;

        let db_path = config.database_path();
        let db_path_str = db_path
            .to_str()
            .ok_or_else(|| ConfigError::MissingField("Invalid database path".to_string()))?;
        let db = Database::new(db_path_str).await?;

        let adapters = Arc::new(HttpAdapterFactory::new(&config.platforms)?);
        let providers = Arc::new(HttpProviderFactory::new(&config.platforms)?);
        let http = build_http_client(config.platforms.http_timeout_secs)?;
        let queue = HttpQueueClient::from_config(http, &config.scheduler)
            .map(|client| Arc::new(client) as Arc<dyn QueueClient>);

        Self::from_parts(config, db, adapters, providers, queue)
    }

    /// Assemble a service from explicit collaborators
    pub fn from_parts(
        config: Config,
        db: Database,
        adapters: Arc<dyn AdapterFactory>,
        providers: Arc<dyn ProviderFactory>,
        queue: Option<Arc<dyn QueueClient>>,
    ) -> Result<Self> {
        let key = config
            .vault
            .key
            .as_ref()
            .ok_or_else(|| ConfigError::MissingField("vault.key".to_string()))?;
        let vault = Arc::new(CredentialVault::from_base64_key(key.expose_secret())?);

        let verifier = match SignatureVerifier::from_config(&config.scheduler) {
            Ok(verifier) => Some(verifier),
            Err(OmnicastError::Config(ConfigError::MissingField(field))) => {
                warn!(field = %field, "No signing key configured; scheduler webhook deliveries will be rejected");
                None
            }
            Err(e) => return Err(e),
        };

        let db = Arc::new(db);
        let config = Arc::new(config);
        let event_bus = EventBus::new(100);

        let orchestrator =
            PublishOrchestrator::new(Arc::clone(&db), Arc::clone(&vault), adapters, event_bus.clone());
        let executor = PublishExecutor::new(orchestrator);
        let scheduler = Arc::new(SchedulerBridge::new(
            Arc::clone(&db),
            executor.clone(),
            queue,
            verifier,
            config.scheduler.max_attempts,
        ));
        let accounts = Arc::new(AccountRegistry::new(Arc::clone(&db), vault, providers));
        let posts = PostService::new(Arc::clone(&db), Arc::clone(&scheduler), executor.clone());

        Ok(Self {
            config,
            db,
            accounts,
            posts,
            executor,
            scheduler,
            event_bus,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn accounts(&self) -> &AccountRegistry {
        &self.accounts
    }

    pub fn posts(&self) -> &PostService {
        &self.posts
    }

    pub fn executor(&self) -> &PublishExecutor {
        &self.executor
    }

    pub fn scheduler(&self) -> &SchedulerBridge {
        &self.scheduler
    }

    /// Subscribe to publish progress events
    pub fn subscribe(&self) -> EventReceiver {
        self.event_bus.subscribe()
    }
}
