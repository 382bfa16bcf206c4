pub mod aggregation;
pub mod artifacts;
pub mod collaborative;
pub mod content;
pub mod evaluation;
pub mod hybrid;
pub mod linalg;
pub mod pipeline;
pub mod ratings_matrix;
pub mod recommendations;
pub mod retry;
pub mod scheduler;
pub mod sink;
pub mod sparse;

pub use pipeline::{Recommender, RecommenderSettings, TrainingMode};
pub use recommendations::{Recommendation, RecommendationService};
pub use scheduler::GenerationScheduler;
