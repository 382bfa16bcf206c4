mod identity;
mod interaction;
mod item;
mod score;

pub use identity::{UserId, EXTERNAL_USER_PREFIX};
pub use interaction::{parse_timestamp, AggregatedScore, InteractionEvent, InteractionKind};
pub use item::ItemMetadata;
pub use score::{
    BaselineRecommendation, CfScore, ContentScore, FeatureContribution, HybridScore,
    PredictionRecord,
};
