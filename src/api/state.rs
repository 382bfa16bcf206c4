use std::sync::Arc;

use crate::services::{GenerationScheduler, RecommendationService};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub recommendations: Arc<RecommendationService>,
    pub scheduler: Arc<GenerationScheduler>,
}

impl AppState {
    pub fn new(recommendations: Arc<RecommendationService>, scheduler: Arc<GenerationScheduler>) -> Self {
        Self {
            recommendations,
            scheduler,
        }
    }
}
