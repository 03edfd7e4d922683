use std::sync::Arc;
use std::time::Duration;

use aws_config::BehaviorVersion;
use tracing::info;

use crate::config::Config;
use crate::field_names::FieldNameCache;
use crate::upstream::aws::{AwsCampaigns, AwsCases, AwsConnect, AwsDynamo, AwsSns};
use crate::upstream::{CampaignDirectory, CaseStore, ContactDirectory, Notifier, RecordStore};
use crate::writer::{EnrichmentWriter, TableLabelLookup, WriterSettings};

/// Everything a handler needs. Built once per process and shared across events.
pub struct AppContext {
    pub config: Config,
    pub contacts: Arc<dyn ContactDirectory>,
    pub campaigns: Arc<dyn CampaignDirectory>,
    pub cases: Arc<dyn CaseStore>,
    pub notifier: Arc<dyn Notifier>,
    pub store: Arc<dyn RecordStore>,
    pub field_names: FieldNameCache,
}

impl AppContext {
    pub fn new(
        config: Config,
        contacts: Arc<dyn ContactDirectory>,
        campaigns: Arc<dyn CampaignDirectory>,
        cases: Arc<dyn CaseStore>,
        notifier: Arc<dyn Notifier>,
        store: Arc<dyn RecordStore>,
    ) -> Self {
        let field_names = FieldNameCache::new(
            config.field_name_cache_size,
            Duration::from_secs(config.field_name_cache_ttl_secs),
        );

        Self {
            config,
            contacts,
            campaigns,
            cases,
            notifier,
            store,
            field_names,
        }
    }

    /// Build a context backed by the real services, using the ambient AWS
    /// credentials and region.
    pub async fn from_aws(config: Config) -> Self {
        let sdk_config = aws_config::load_defaults(BehaviorVersion::latest()).await;
        info!(
            region = sdk_config.region().map(|r| r.as_ref()).unwrap_or("unset"),
            "AWS clients configured"
        );

        Self::new(
            config,
            Arc::new(AwsConnect::new(aws_sdk_connect::Client::new(&sdk_config))),
            Arc::new(AwsCampaigns::new(aws_sdk_connectcampaigns::Client::new(
                &sdk_config,
            ))),
            Arc::new(AwsCases::new(aws_sdk_connectcases::Client::new(&sdk_config))),
            Arc::new(AwsSns::new(aws_sdk_sns::Client::new(&sdk_config))),
            Arc::new(AwsDynamo::new(aws_sdk_dynamodb::Client::new(&sdk_config))),
        )
    }

    pub fn timeout(&self) -> Duration {
        self.config.upstream_timeout.0
    }

    pub fn writer(&self) -> EnrichmentWriter {
        EnrichmentWriter::new(self.store.clone(), WriterSettings::from_config(&self.config))
    }

    pub fn label_lookup(&self) -> Option<TableLabelLookup> {
        TableLabelLookup::new(self.store.clone(), &self.config)
    }
}
