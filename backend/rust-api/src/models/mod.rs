use mongodb::bson::DateTime;
use serde::{Deserialize, Serialize};

/// One submission's full record. Attempts are append-only per context;
/// the feedback fields start as null and are claimed at most once by the
/// next request in the same context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attempt {
    #[serde(rename = "_id")]
    pub id: String,
    /// Native BSON datetime so `created_at` sorts by value, not by string.
    pub created_at: DateTime,
    pub mode: String,
    pub language: String,
    pub course_id: i64,
    pub quiz_id: i64,
    pub question_id: i64,
    pub question_slot: i64,
    pub question_name: String,
    pub student_id: String,
    pub attempt_id: i64,
    pub attempt_no: i64,
    pub source_code: String,
    pub source_hash: String,
    pub score: f64,
    pub max_score: f64,
    pub compile_error_text: String,
    pub runtime_error_text: String,
    pub failed_tests: Vec<String>,
    pub full_feedback_text: String,
    pub cluster_key: Option<String>,
    pub hint_level: Option<i32>,
    pub hint_type: Option<String>,
    pub hint_variant: Option<String>,
    pub hint_text: Option<String>,
    pub confidence: Option<f64>,
    pub improved_vs_previous: Option<bool>,
    pub delta_score: Option<f64>,
}

/// The tuple identifying one ongoing exercise attempt sequence.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AttemptContext {
    pub student_id: String,
    pub language: String,
    pub quiz_id: i64,
    pub question_id: i64,
    pub question_slot: i64,
}

/// Unique key of one hint_stats row.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StatKey {
    pub language: String,
    pub cluster_key: String,
    pub hint_level: i32,
    pub hint_variant: String,
}

/// Aggregate counters for one (language, cluster, level, variant).
/// Created on first reference, updated additively, never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HintStat {
    pub language: String,
    pub cluster_key: String,
    pub hint_level: i32,
    pub hint_variant: String,
    pub exposures: i64,
    pub improvements: i64,
    pub total_delta: f64,
    pub updated_at: DateTime,
}

impl HintStat {
    pub fn zero_for(key: &StatKey) -> Self {
        Self {
            language: key.language.clone(),
            cluster_key: key.cluster_key.clone(),
            hint_level: key.hint_level,
            hint_variant: key.hint_variant.clone(),
            exposures: 0,
            improvements: 0,
            total_delta: 0.0,
            updated_at: DateTime::now(),
        }
    }
}

pub mod hint;

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::{to_document, Bson};

    #[test]
    fn attempt_created_at_serializes_as_a_bson_datetime() {
        let attempt = Attempt {
            id: "a1".to_string(),
            created_at: DateTime::now(),
            mode: "training".to_string(),
            language: "c".to_string(),
            course_id: 1,
            quiz_id: 10,
            question_id: 100,
            question_slot: 1,
            question_name: String::new(),
            student_id: "s1".to_string(),
            attempt_id: 1,
            attempt_no: 1,
            source_code: String::new(),
            source_hash: String::new(),
            score: 4.0,
            max_score: 10.0,
            compile_error_text: String::new(),
            runtime_error_text: String::new(),
            failed_tests: Vec::new(),
            full_feedback_text: String::new(),
            cluster_key: None,
            hint_level: None,
            hint_type: None,
            hint_variant: None,
            hint_text: None,
            confidence: None,
            improved_vs_previous: None,
            delta_score: None,
        };
        let doc = to_document(&attempt).unwrap();
        // A string here would make the created_at sort lexicographic.
        assert!(matches!(doc.get("created_at"), Some(Bson::DateTime(_))));
        assert!(matches!(doc.get("improved_vs_previous"), Some(Bson::Null)));
    }
}
