//! Service wiring shared by the server and the one-shot commands

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::config::{Config, StoreBackend};
use crate::db;
use crate::services::bulk_sms::BulkSmsProcessor;
use crate::services::delivery::DeliveryChannel;
use crate::services::dispatcher::Dispatcher;
use crate::services::notifier::Notifier;
use crate::services::pos::{OtpService, PosSmsService};
use crate::services::rate_limiter::InMemorySendLimiter;
use crate::services::sms_transport::{HttpSmsTransport, LogSmsTransport, SmsTransport};
use crate::services::template::MessageRenderer;
use crate::services::trigger_engine::TriggerEngine;
use crate::store::{MemoryStore, PgStore, Stores};

/// Open the configured store backend, migrating Postgres first
pub async fn open_stores(config: &Config) -> Result<Stores> {
    match &config.store_backend {
        StoreBackend::Postgres => {
            let url = config
                .database_url
                .as_deref()
                .context("DATABASE_URL must be set")?;
            let pool = db::create_pool(url, config.db_max_connections).await?;
            info!("Connected to PostgreSQL");

            db::run_migrations(&pool).await?;
            Ok(Stores::postgres(Arc::new(PgStore::new(pool))))
        }
        StoreBackend::Memory { seed_file } => {
            let store = match seed_file {
                Some(path) => {
                    info!(seed_file = %path.display(), "Loading in-memory store seed");
                    MemoryStore::from_seed_file(path)?
                }
                None => MemoryStore::new(),
            };
            warn!("Using in-memory store, data is lost on restart");
            Ok(Stores::memory(Arc::new(store)))
        }
    }
}

/// Every service the worker runs, built once at startup
pub struct App {
    pub stores: Stores,
    pub channel: Arc<DeliveryChannel>,
    pub engine: Arc<TriggerEngine>,
    pub dispatcher: Arc<Dispatcher>,
    pub bulk: Arc<BulkSmsProcessor>,
    pub pos_sms: Arc<PosSmsService>,
    pub otp: Arc<OtpService>,
}

impl App {
    pub fn build(config: &Config, stores: Stores, notifier: Arc<dyn Notifier>) -> Result<Self> {
        let transport: Arc<dyn SmsTransport> = match &config.gateway {
            Some(gateway) => {
                info!(url = %gateway.url, "Using HTTP SMS gateway");
                Arc::new(HttpSmsTransport::new(gateway.clone()).context("Failed to build SMS gateway client")?)
            }
            None => {
                warn!("SMS_GATEWAY_URL not set, messages will only be logged");
                Arc::new(LogSmsTransport)
            }
        };

        let limiter = Arc::new(InMemorySendLimiter::new(config.rate_limit_max, config.rate_limit_window));
        let channel = Arc::new(DeliveryChannel::new(transport, limiter, config.retry));
        let renderer = Arc::new(MessageRenderer::new());

        let engine = Arc::new(TriggerEngine::new(stores.clone(), renderer.clone(), channel.clone()));
        let dispatcher = Arc::new(Dispatcher::new(
            stores.messages.clone(),
            stores.business.clone(),
            channel.clone(),
        ));
        let bulk = Arc::new(
            BulkSmsProcessor::new(
                stores.campaigns.clone(),
                stores.business.clone(),
                channel.clone(),
                renderer.clone(),
                notifier,
            )
            .with_send_delay(config.bulk_send_delay),
        );

        let pos_settings = Arc::new(config.pos.clone());
        let pos_sms = Arc::new(PosSmsService::new(
            pos_settings.clone(),
            stores.business.clone(),
            stores.messages.clone(),
            dispatcher.clone(),
            renderer.clone(),
        ));
        let otp = Arc::new(OtpService::new(pos_settings, stores.business.clone(), channel.clone(), renderer));

        Ok(Self {
            stores,
            channel,
            engine,
            dispatcher,
            bulk,
            pos_sms,
            otp,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::notifier::LogNotifier;

    fn memory_config() -> Config {
        Config::from_lookup(|key| match key {
            "STORE_BACKEND" => Some("memory".to_string()),
            _ => None,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn memory_backend_builds_without_gateway() {
        let config = memory_config();
        let stores = open_stores(&config).await.unwrap();
        let app = App::build(&config, stores, Arc::new(LogNotifier)).unwrap();

        assert!(!app.channel.gateway_configured());
        let report = app.engine.run_cycle().await.unwrap();
        assert_eq!(report.rules_evaluated, 0);
    }
}
