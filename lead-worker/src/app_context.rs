use std::sync::Arc;

use aws_config::BehaviorVersion;
use aws_sdk_s3::Client as AwsS3SdkClient;
use lead_common::archive::ArchiveClient;
use lead_common::store::{ObjectStore, S3Store};
use tracing::warn;

use crate::config::Config;
use crate::delivery::DeliveryClient;
use crate::error::DeliveryError;
use crate::pipeline::LeadPipeline;

pub struct AppContext {
    pub pipeline: LeadPipeline,
    pub config: Config,
}

impl AppContext {
    pub async fn new(config: &Config) -> Result<Self, DeliveryError> {
        let mut aws_config_builder = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.object_storage_region.clone()));

        if let Some(endpoint) = &config.object_storage_endpoint {
            aws_config_builder = aws_config_builder.endpoint_url(endpoint);
        }

        let aws_config = aws_config_builder.load().await;

        let mut s3_config_builder = aws_sdk_s3::config::Builder::from(&aws_config);
        if config.object_storage_endpoint.is_some() {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let s3_client = AwsS3SdkClient::from_conf(s3_config_builder.build());
        let store: Arc<dyn ObjectStore> = Arc::new(S3Store::new(s3_client));
        Self::with_store(config, store)
    }

    /// Wire the pipeline on top of an already built object store.
    pub fn with_store(config: &Config, store: Arc<dyn ObjectStore>) -> Result<Self, DeliveryError> {
        let settings = config.delivery_settings();
        if settings.base_url.is_none() || settings.api_key.is_none() {
            warn!("downstream API is not configured, every delivery will fail until it is");
        }

        let pipeline = LeadPipeline::new(
            ArchiveClient::new(store),
            DeliveryClient::new(settings)?,
            &config.raw_bucket,
            &config.processed_bucket,
        );

        Ok(Self {
            pipeline,
            config: config.clone(),
        })
    }
}
