use serde::{Deserialize, Serialize};

/// Grading feedback forwarded by the CodeRunner plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeRunnerPayload {
    #[serde(default)]
    pub score: f64,
    #[serde(default = "default_max_score")]
    pub max_score: f64,
    #[serde(default)]
    pub compile_error_text: String,
    #[serde(default)]
    pub runtime_error_text: String,
    #[serde(default)]
    pub failed_tests: Vec<String>,
    #[serde(default)]
    pub full_feedback_text: String,
}

fn default_max_score() -> f64 {
    1.0
}

/// Matches the serde field defaults, so an empty JSON payload and a
/// `..Default::default()` construction agree on `max_score`.
impl Default for CodeRunnerPayload {
    fn default() -> Self {
        Self {
            score: 0.0,
            max_score: default_max_score(),
            compile_error_text: String::new(),
            runtime_error_text: String::new(),
            failed_tests: Vec::new(),
            full_feedback_text: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HintRequest {
    /// training|exam
    #[serde(default = "default_mode")]
    pub mode: String,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default)]
    pub course_id: i64,
    #[serde(default)]
    pub quiz_id: i64,
    #[serde(default)]
    pub question_id: i64,
    #[serde(default)]
    pub question_slot: i64,
    #[serde(default)]
    pub question_name: String,
    #[serde(default = "default_student_id")]
    pub student_id: String,
    #[serde(default)]
    pub attempt_id: i64,
    #[serde(default)]
    pub attempt_no: i64,
    #[serde(default)]
    pub source_code: String,
    pub coderunner: CodeRunnerPayload,
}

fn default_mode() -> String {
    "training".to_string()
}

fn default_language() -> String {
    "c".to_string()
}

fn default_student_id() -> String {
    "anon".to_string()
}

/// Feedback-loop projection returned when the previous attempt in the same
/// context carried a hint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningInfo {
    pub previous_hint_improved_score: bool,
    pub previous_delta_score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HintResponse {
    pub enabled: bool,
    pub hint_level: i32,
    pub hint_type: String,
    pub cluster_key: String,
    pub hint_text: String,
    pub confidence: f64,
    pub hint_variant: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub learning: Option<LearningInfo>,
}

impl HintResponse {
    /// Short-circuit response for non-training modes: no classification,
    /// no persistence.
    pub fn disabled(hint_text: &str) -> Self {
        Self {
            enabled: false,
            hint_level: 1,
            hint_type: "generic".to_string(),
            cluster_key: "c_generic".to_string(),
            hint_text: hint_text.to_string(),
            confidence: 0.0,
            hint_variant: "default".to_string(),
            learning: None,
        }
    }

    /// Fixed generic hint for languages outside the supported set.
    pub fn unsupported_language(language: &str) -> Self {
        Self {
            enabled: true,
            hint_level: 1,
            hint_type: "generic".to_string(),
            cluster_key: format!("{}_unsupported_mvp", language),
            hint_text: "MVP attivo soprattutto per C. Per questo linguaggio posso dare solo un \
                        indizio generico: riparti dal primo test che fallisce e controlla casi \
                        limite e formato output."
                .to_string(),
            confidence: 0.25,
            hint_variant: "default".to_string(),
            learning: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_payload_matches_an_empty_json_payload() {
        let parsed: CodeRunnerPayload = serde_json::from_str("{}").unwrap();
        let built = CodeRunnerPayload::default();
        assert_eq!(built.max_score, parsed.max_score);
        assert_eq!(built.max_score, 1.0);
        assert_eq!(built.score, parsed.score);
        assert!(built.failed_tests.is_empty());
    }
}
