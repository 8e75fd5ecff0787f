use std::sync::Arc;

use common::utils::config::AppConfig;
use retrieval_pipeline::SearchService;

#[derive(Clone)]
pub struct ApiState {
    pub service: Arc<SearchService>,
    pub config: AppConfig,
}

impl ApiState {
    pub fn new(service: Arc<SearchService>, config: &AppConfig) -> Self {
        Self {
            service,
            config: config.clone(),
        }
    }
}
