use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::{doc, Bson, DateTime};
use mongodb::Database;

use crate::models::{Attempt, AttemptContext, HintStat, StatKey};

/// Persistence boundary for attempts and hint statistics. Attempts are an
/// append-only log per context; stats are additive counters keyed by
/// (language, cluster, level, variant).
#[async_trait]
pub trait HintStore: Send + Sync {
    async fn insert_attempt(&self, attempt: &Attempt) -> Result<()>;

    async fn last_attempt_for_context(&self, ctx: &AttemptContext) -> Result<Option<Attempt>>;

    /// Atomically claims the feedback fields of an attempt whose fields are
    /// still null. Returns false when another request already attributed
    /// feedback to the same row, so concurrent requests in the same context
    /// cannot double-attribute.
    async fn claim_feedback(&self, attempt_id: &str, improved: bool, delta_score: f64)
        -> Result<bool>;

    /// Single atomic insert-or-additive-update; concurrent bumps never lose
    /// an increment to a read-then-write race.
    async fn bump_stats(
        &self,
        key: &StatKey,
        exposure_inc: i64,
        improvement_inc: i64,
        delta_inc: f64,
    ) -> Result<()>;

    /// Stats rows for one (language, cluster, level), ordered by exposures
    /// desc, improvements desc, total_delta desc.
    async fn stats_for(
        &self,
        language: &str,
        cluster_key: &str,
        hint_level: i32,
    ) -> Result<Vec<HintStat>>;

    /// Most exposed stats rows across all keys, for the debugging endpoint.
    async fn top_stats(&self, limit: i64) -> Result<Vec<HintStat>>;
}

pub struct MongoHintStore {
    mongo: Database,
}

impl MongoHintStore {
    pub fn new(mongo: Database) -> Self {
        Self { mongo }
    }

    fn attempts(&self) -> mongodb::Collection<Attempt> {
        self.mongo.collection("attempts")
    }

    fn stats(&self) -> mongodb::Collection<HintStat> {
        self.mongo.collection("hint_stats")
    }
}

#[async_trait]
impl HintStore for MongoHintStore {
    async fn insert_attempt(&self, attempt: &Attempt) -> Result<()> {
        self.attempts()
            .insert_one(attempt)
            .await
            .context("Failed to insert attempt")?;
        tracing::debug!("Attempt saved: id={}", attempt.id);
        Ok(())
    }

    async fn last_attempt_for_context(&self, ctx: &AttemptContext) -> Result<Option<Attempt>> {
        let filter = doc! {
            "student_id": &ctx.student_id,
            "language": &ctx.language,
            "quiz_id": ctx.quiz_id,
            "question_id": ctx.question_id,
            "question_slot": ctx.question_slot,
        };
        let found = self
            .attempts()
            .find_one(filter)
            .sort(doc! { "created_at": -1, "attempt_no": -1 })
            .await
            .context("Failed to query last attempt for context")?;
        Ok(found)
    }

    async fn claim_feedback(
        &self,
        attempt_id: &str,
        improved: bool,
        delta_score: f64,
    ) -> Result<bool> {
        // The null filter is the optimistic guard: only one of two racing
        // requests can flip the fields away from null.
        let result = self
            .attempts()
            .update_one(
                doc! { "_id": attempt_id, "improved_vs_previous": Bson::Null },
                doc! { "$set": {
                    "improved_vs_previous": improved,
                    "delta_score": delta_score,
                } },
            )
            .await
            .context("Failed to claim attempt feedback")?;
        Ok(result.modified_count == 1)
    }

    async fn bump_stats(
        &self,
        key: &StatKey,
        exposure_inc: i64,
        improvement_inc: i64,
        delta_inc: f64,
    ) -> Result<()> {
        self.stats()
            .update_one(
                doc! {
                    "language": &key.language,
                    "cluster_key": &key.cluster_key,
                    "hint_level": key.hint_level,
                    "hint_variant": &key.hint_variant,
                },
                doc! {
                    "$inc": {
                        "exposures": exposure_inc,
                        "improvements": improvement_inc,
                        "total_delta": delta_inc,
                    },
                    "$set": { "updated_at": DateTime::now() },
                },
            )
            .upsert(true)
            .await
            .context("Failed to bump hint stats")?;
        Ok(())
    }

    async fn stats_for(
        &self,
        language: &str,
        cluster_key: &str,
        hint_level: i32,
    ) -> Result<Vec<HintStat>> {
        let filter = doc! {
            "language": language,
            "cluster_key": cluster_key,
            "hint_level": hint_level,
        };
        let cursor = self
            .stats()
            .find(filter)
            .sort(doc! { "exposures": -1, "improvements": -1, "total_delta": -1 })
            .await
            .context("Failed to query hint stats")?;
        let rows = cursor
            .try_collect()
            .await
            .context("Failed to read hint stats cursor")?;
        Ok(rows)
    }

    async fn top_stats(&self, limit: i64) -> Result<Vec<HintStat>> {
        let cursor = self
            .stats()
            .find(doc! {})
            .sort(doc! { "exposures": -1, "improvements": -1 })
            .limit(limit)
            .await
            .context("Failed to query top hint stats")?;
        let rows = cursor
            .try_collect()
            .await
            .context("Failed to read top hint stats cursor")?;
        Ok(rows)
    }
}

/// In-memory store used by the engine tests and local experimentation.
/// Mirrors the Mongo semantics, including the claim guard.
#[derive(Default)]
pub struct MemoryHintStore {
    attempts: Mutex<Vec<Attempt>>,
    stats: Mutex<HashMap<StatKey, HintStat>>,
}

impl MemoryHintStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attempt_count(&self) -> usize {
        self.attempts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Attempt ids in insertion (chronological) order.
    pub fn all_attempt_ids(&self) -> Vec<String> {
        self.attempts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|a| a.id.clone())
            .collect()
    }

    pub fn attempt_by_id(&self, attempt_id: &str) -> Option<Attempt> {
        self.attempts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|a| a.id == attempt_id)
            .cloned()
    }

    pub fn stat_for_key(&self, key: &StatKey) -> Option<HintStat> {
        self.stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }
}

#[async_trait]
impl HintStore for MemoryHintStore {
    async fn insert_attempt(&self, attempt: &Attempt) -> Result<()> {
        self.attempts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(attempt.clone());
        Ok(())
    }

    async fn last_attempt_for_context(&self, ctx: &AttemptContext) -> Result<Option<Attempt>> {
        let attempts = self
            .attempts
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        // insertion order is chronological
        Ok(attempts
            .iter()
            .rev()
            .find(|a| {
                a.student_id == ctx.student_id
                    && a.language == ctx.language
                    && a.quiz_id == ctx.quiz_id
                    && a.question_id == ctx.question_id
                    && a.question_slot == ctx.question_slot
            })
            .cloned())
    }

    async fn claim_feedback(
        &self,
        attempt_id: &str,
        improved: bool,
        delta_score: f64,
    ) -> Result<bool> {
        let mut attempts = self
            .attempts
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let Some(attempt) = attempts.iter_mut().find(|a| a.id == attempt_id) else {
            return Ok(false);
        };
        if attempt.improved_vs_previous.is_some() {
            return Ok(false);
        }
        attempt.improved_vs_previous = Some(improved);
        attempt.delta_score = Some(delta_score);
        Ok(true)
    }

    async fn bump_stats(
        &self,
        key: &StatKey,
        exposure_inc: i64,
        improvement_inc: i64,
        delta_inc: f64,
    ) -> Result<()> {
        let mut stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
        let row = stats
            .entry(key.clone())
            .or_insert_with(|| HintStat::zero_for(key));
        row.exposures += exposure_inc;
        row.improvements += improvement_inc;
        row.total_delta += delta_inc;
        row.updated_at = DateTime::now();
        Ok(())
    }

    async fn stats_for(
        &self,
        language: &str,
        cluster_key: &str,
        hint_level: i32,
    ) -> Result<Vec<HintStat>> {
        let stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
        let mut rows: Vec<HintStat> = stats
            .values()
            .filter(|s| {
                s.language == language
                    && s.cluster_key == cluster_key
                    && s.hint_level == hint_level
            })
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            b.exposures
                .cmp(&a.exposures)
                .then(b.improvements.cmp(&a.improvements))
                .then(b.total_delta.total_cmp(&a.total_delta))
        });
        Ok(rows)
    }

    async fn top_stats(&self, limit: i64) -> Result<Vec<HintStat>> {
        let stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
        let mut rows: Vec<HintStat> = stats.values().cloned().collect();
        rows.sort_by_key(|s| (Reverse(s.exposures), Reverse(s.improvements)));
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(variant: &str) -> StatKey {
        StatKey {
            language: "c".to_string(),
            cluster_key: "c_segfault".to_string(),
            hint_level: 1,
            hint_variant: variant.to_string(),
        }
    }

    #[tokio::test]
    async fn stat_aggregation_is_commutative() {
        let forward = MemoryHintStore::new();
        forward.bump_stats(&key("default"), 1, 0, 0.0).await.unwrap();
        forward.bump_stats(&key("default"), 0, 1, 3.0).await.unwrap();

        let reversed = MemoryHintStore::new();
        reversed.bump_stats(&key("default"), 0, 1, 3.0).await.unwrap();
        reversed.bump_stats(&key("default"), 1, 0, 0.0).await.unwrap();

        let a = forward.stat_for_key(&key("default")).unwrap();
        let b = reversed.stat_for_key(&key("default")).unwrap();
        assert_eq!(a.exposures, b.exposures);
        assert_eq!(a.improvements, b.improvements);
        assert_eq!(a.total_delta, b.total_delta);
        assert_eq!((a.exposures, a.improvements, a.total_delta), (1, 1, 3.0));
    }

    #[tokio::test]
    async fn stats_rows_are_unique_per_key() {
        let store = MemoryHintStore::new();
        store.bump_stats(&key("default"), 1, 0, 0.0).await.unwrap();
        store.bump_stats(&key("default"), 1, 0, 0.0).await.unwrap();
        store.bump_stats(&key("guided"), 1, 0, 0.0).await.unwrap();

        let rows = store.stats_for("c", "c_segfault", 1).await.unwrap();
        assert_eq!(rows.len(), 2);
        let default_row = rows
            .iter()
            .find(|r| r.hint_variant == "default")
            .unwrap();
        assert_eq!(default_row.exposures, 2);
    }

    #[tokio::test]
    async fn stats_are_ordered_by_exposures_then_improvements() {
        let store = MemoryHintStore::new();
        store.bump_stats(&key("a"), 2, 0, 0.0).await.unwrap();
        store.bump_stats(&key("b"), 5, 1, 1.0).await.unwrap();
        store.bump_stats(&key("c"), 5, 3, 2.0).await.unwrap();

        let rows = store.stats_for("c", "c_segfault", 1).await.unwrap();
        let order: Vec<&str> = rows.iter().map(|r| r.hint_variant.as_str()).collect();
        assert_eq!(order, vec!["c", "b", "a"]);
    }

    #[tokio::test]
    async fn feedback_claim_succeeds_exactly_once() {
        use crate::models::Attempt;

        let store = MemoryHintStore::new();
        let attempt = Attempt {
            id: "a1".to_string(),
            created_at: DateTime::now(),
            mode: "training".to_string(),
            language: "c".to_string(),
            course_id: 0,
            quiz_id: 0,
            question_id: 0,
            question_slot: 0,
            question_name: String::new(),
            student_id: "s1".to_string(),
            attempt_id: 0,
            attempt_no: 1,
            source_code: String::new(),
            source_hash: String::new(),
            score: 4.0,
            max_score: 10.0,
            compile_error_text: String::new(),
            runtime_error_text: String::new(),
            failed_tests: Vec::new(),
            full_feedback_text: String::new(),
            cluster_key: Some("c_segfault".to_string()),
            hint_level: Some(1),
            hint_type: Some("runtime_memory".to_string()),
            hint_variant: Some("default".to_string()),
            hint_text: Some("hint".to_string()),
            confidence: Some(0.95),
            improved_vs_previous: None,
            delta_score: None,
        };
        store.insert_attempt(&attempt).await.unwrap();

        assert!(store.claim_feedback("a1", true, 3.0).await.unwrap());
        // second claim loses the race
        assert!(!store.claim_feedback("a1", false, -1.0).await.unwrap());

        let stored = store.attempt_by_id("a1").unwrap();
        assert_eq!(stored.improved_vs_previous, Some(true));
        assert_eq!(stored.delta_score, Some(3.0));
    }
}
