use std::fmt::Display;

use crate::models::UserId;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RedisKey {
    /// Single-flight lock around a user's generation run
    GenerationLock(UserId),
    /// Hash of item id to prediction document
    Recommendations(String),
    /// RFC 3339 time of the last write to a user's recommendations
    RecommendationsUpdatedAt(String),
}

impl Display for RedisKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RedisKey::GenerationLock(user_id) => write!(f, "user:{}:recommendation_lock", user_id),
            RedisKey::Recommendations(handle) => write!(f, "recs:{}", handle),
            RedisKey::RecommendationsUpdatedAt(handle) => write!(f, "recs:{}:updated_at", handle),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_lock_key() {
        let key = RedisKey::GenerationLock(UserId::Internal(42));
        assert_eq!(format!("{}", key), "user:42:recommendation_lock");
    }

    #[test]
    fn test_generation_lock_key_external() {
        let key = RedisKey::GenerationLock(UserId::External("lb_ana".to_string()));
        assert_eq!(format!("{}", key), "user:lb_ana:recommendation_lock");
    }

    #[test]
    fn test_recommendation_keys() {
        assert_eq!(
            format!("{}", RedisKey::Recommendations("lb_ana".to_string())),
            "recs:lb_ana"
        );
        assert_eq!(
            format!("{}", RedisKey::RecommendationsUpdatedAt("lb_ana".to_string())),
            "recs:lb_ana:updated_at"
        );
    }
}
