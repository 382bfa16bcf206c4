mod common;

use axum::{
    body::{to_bytes, Body},
    http::{Method, Request, StatusCode},
    Router,
};
use chrono::{Duration as ChronoDuration, Utc};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

use common::{artifact_store, MemoryDocuments, MemoryLocks, MemoryPredictions};
use streamline_recommender::api::{create_router, AppState};
use streamline_recommender::models::{BaselineRecommendation, PredictionRecord, UserId};
use streamline_recommender::services::artifacts::{ArtifactKey, ArtifactVersion};
use streamline_recommender::services::scheduler::{GenerationRunner, SchedulerSettings};
use streamline_recommender::services::sink::{PredictionSink, SinkSettings};
use streamline_recommender::services::{GenerationScheduler, RecommendationService};
use streamline_recommender::AppResult;

struct InstantRunner;

#[async_trait::async_trait]
impl GenerationRunner for InstantRunner {
    async fn generate_for_user(&self, _user_id: &UserId) -> AppResult<()> {
        Ok(())
    }
}

fn stored(user_id: UserId, item: &str, age_hours: i64) -> PredictionRecord {
    PredictionRecord {
        user_id,
        item_id: item.to_string(),
        predicted_score: 0.87,
        cf_score: Some(0.9),
        content_score: Some(0.4),
        explanation: None,
        updated_at: Utc::now() - ChronoDuration::hours(age_hours),
    }
}

async fn test_app(dir: &std::path::Path) -> Router {
    let artifacts = artifact_store(dir);
    let baseline = vec![BaselineRecommendation {
        item_id: "m6".to_string(),
        content_score: 0.33,
    }];
    artifacts
        .save(ArtifactKey::BaselineRecommendations, &baseline, ArtifactVersion::Latest)
        .await
        .unwrap();

    let predictions = Arc::new(MemoryPredictions::default());
    predictions
        .rows
        .lock()
        .unwrap()
        .insert((1, "m1".to_string()), stored(UserId::Internal(1), "m1", 1));
    predictions
        .rows
        .lock()
        .unwrap()
        .insert((2, "m1".to_string()), stored(UserId::Internal(2), "m1", 48));
    let documents = Arc::new(MemoryDocuments::default());
    documents
        .docs
        .lock()
        .unwrap()
        .insert(("lb_ana".to_string(), "m2".to_string()), stored(UserId::external("ana"), "m2", 1));

    let sink = Arc::new(PredictionSink::new(predictions, documents, SinkSettings::default()));
    let scheduler = Arc::new(GenerationScheduler::new(
        Arc::new(MemoryLocks::default()),
        sink.clone(),
        Arc::new(InstantRunner),
        SchedulerSettings::default(),
    ));
    let service = Arc::new(RecommendationService::new(sink, artifacts));

    create_router(AppState::new(service, scheduler))
}

async fn send(app: &Router, method: Method, uri: &str) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(Request::builder().method(method).uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, body)
}

#[tokio::test]
async fn test_health_check() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(dir.path()).await;

    let (status, body) = send(&app, Method::GET, "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_lookup_requires_movie_id() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(dir.path()).await;

    let (status, _) = send(&app, Method::GET, "/api/v1/recommendations/1").await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_lookup_personalized_for_both_user_kinds() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(dir.path()).await;

    let (status, body) = send(&app, Method::GET, "/api/v1/recommendations/1?movie_id=m1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["source"], "personalized");
    assert_eq!(body["user_id"], "1");
    assert_eq!(body["predicted_score"], 0.87);

    let (status, body) = send(&app, Method::GET, "/api/v1/recommendations/lb_ana?movie_id=m2").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user_id"], "lb_ana");
}

#[tokio::test]
async fn test_lookup_falls_back_to_baseline_then_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(dir.path()).await;

    let (status, body) = send(&app, Method::GET, "/api/v1/recommendations/1?movie_id=m6").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["source"], "baseline");
    assert_eq!(body["content_score"], 0.33);

    let (status, _) = send(&app, Method::GET, "/api/v1/recommendations/1?movie_id=m9").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_generation_is_skipped_for_recent_recommendations() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(dir.path()).await;

    let (status, body) = send(&app, Method::POST, "/api/v1/recommendations/1/generate").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "already_recent");
}

#[tokio::test]
async fn test_generation_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(dir.path()).await;

    let (status, body) = send(&app, Method::GET, "/api/v1/recommendations/2/generate").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "not_started");

    let (status, body) = send(&app, Method::POST, "/api/v1/recommendations/2/generate").await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["status"], "started");
    let task_id = body["task_id"].clone();

    let mut state = Value::Null;
    for _ in 0..50 {
        let (_, body) = send(&app, Method::GET, "/api/v1/recommendations/2/generate").await;
        assert_eq!(body["task_id"], task_id);
        state = body["state"].clone();
        if state == "completed" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(state, "completed");

    let (status, body) = send(&app, Method::DELETE, "/api/v1/recommendations/2/generate").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["cancelled"], false);
}

#[tokio::test]
async fn test_similar_items_without_published_features() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(dir.path()).await;

    let (status, _) = send(&app, Method::GET, "/api/v1/items/m1/similar?limit=3").await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
}
