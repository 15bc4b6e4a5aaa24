use std::sync::Arc;

use anyhow::Result;
use mongodb::bson::DateTime;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::metrics::{FEEDBACK_EVENTS_TOTAL, HINTS_SERVED_TOTAL, HINT_REQUESTS_SKIPPED_TOTAL};
use crate::models::hint::{HintRequest, HintResponse, LearningInfo};
use crate::models::{Attempt, AttemptContext, StatKey};
use crate::services::analyzer::{self, AnalysisResult};
use crate::services::catalog::CatalogCache;
use crate::services::progression;
use crate::services::selector::VariantSelector;
use crate::services::store::HintStore;

pub const SUPPORTED_LANGUAGE: &str = "c";
const TRAINING_MODE: &str = "training";

/// Tolerance for floating noise when comparing consecutive scores.
const IMPROVEMENT_TOLERANCE: f64 = 1e-9;

/// Orchestrates one hint request: classify, learn from the previous attempt,
/// decide level, select a variant, resolve text, persist.
pub struct HintEngine {
    store: Arc<dyn HintStore>,
    catalogs: CatalogCache,
    selector: VariantSelector,
}

impl HintEngine {
    pub fn new(store: Arc<dyn HintStore>, catalogs: CatalogCache) -> Self {
        Self::with_selector(store, catalogs, VariantSelector::new())
    }

    pub fn with_selector(
        store: Arc<dyn HintStore>,
        catalogs: CatalogCache,
        selector: VariantSelector,
    ) -> Self {
        Self {
            store,
            catalogs,
            selector,
        }
    }

    pub async fn handle_hint(&self, req: &HintRequest) -> Result<HintResponse> {
        if req.mode != TRAINING_MODE {
            HINT_REQUESTS_SKIPPED_TOTAL
                .with_label_values(&["exam_mode"])
                .inc();
            return Ok(HintResponse::disabled("Hints disabled (exam mode)."));
        }

        let language = if req.language.is_empty() {
            SUPPORTED_LANGUAGE.to_string()
        } else {
            req.language.to_lowercase()
        };
        if language != SUPPORTED_LANGUAGE {
            HINT_REQUESTS_SKIPPED_TOTAL
                .with_label_values(&["unsupported_language"])
                .inc();
            return Ok(HintResponse::unsupported_language(&language));
        }

        let analysis = analyzer::analyze(req);
        tracing::debug!(
            "Classified submission: student={}, cluster={}, confidence={:.2}",
            req.student_id,
            analysis.cluster_key,
            analysis.confidence
        );

        let ctx = AttemptContext {
            student_id: req.student_id.clone(),
            language: language.clone(),
            quiz_id: req.quiz_id,
            question_id: req.question_id,
            question_slot: req.question_slot,
        };
        let previous = self.store.last_attempt_for_context(&ctx).await?;

        // Learn from the previous hint's effectiveness now that the next
        // score is known.
        let learning = self
            .record_feedback(previous.as_ref(), req.coderunner.score)
            .await?;

        let hint_level = progression::decide_level(previous.as_ref());
        let catalog = self.catalogs.load(&language);
        let variants = catalog.variant_names(&analysis.cluster_key);
        let stats = self
            .store
            .stats_for(&language, &analysis.cluster_key, hint_level)
            .await?;
        let hint_variant = self.selector.choose(&variants, &stats);
        let hint_text = catalog.resolve_text(&analysis.cluster_key, hint_level, &hint_variant);

        let attempt = build_attempt(req, &language, &analysis, hint_level, &hint_variant, &hint_text);
        self.store.insert_attempt(&attempt).await?;

        // Count the exposure of the selected hint.
        let key = StatKey {
            language: language.clone(),
            cluster_key: analysis.cluster_key.clone(),
            hint_level,
            hint_variant: hint_variant.clone(),
        };
        self.store.bump_stats(&key, 1, 0, 0.0).await?;

        HINTS_SERVED_TOTAL
            .with_label_values(&[&analysis.cluster_key, &hint_level.to_string()])
            .inc();

        tracing::info!(
            "Hint served: student={}, cluster={}, level={}, variant={}",
            req.student_id,
            analysis.cluster_key,
            hint_level,
            hint_variant
        );

        Ok(HintResponse {
            enabled: true,
            hint_level,
            hint_type: analysis.hint_type,
            cluster_key: analysis.cluster_key,
            hint_text,
            confidence: round_to(analysis.confidence, 3),
            hint_variant,
            learning,
        })
    }

    /// Attributes the current submission's score change to the hint shown on
    /// the previous attempt. The claim is transactional: when two requests
    /// for the same context race, only one flips the feedback fields and
    /// updates the stats.
    async fn record_feedback(
        &self,
        previous: Option<&Attempt>,
        current_score: f64,
    ) -> Result<Option<LearningInfo>> {
        let Some(prev) = previous else {
            return Ok(None);
        };
        let (Some(hint_level), Some(hint_variant)) =
            (prev.hint_level, prev.hint_variant.as_deref())
        else {
            return Ok(None);
        };

        let delta = current_score - prev.score;
        let improved = delta > IMPROVEMENT_TOLERANCE;

        if !self.store.claim_feedback(&prev.id, improved, delta).await? {
            tracing::warn!(
                "Attempt {} already carries feedback, skipping attribution",
                prev.id
            );
            return Ok(None);
        }

        let key = StatKey {
            language: prev.language.clone(),
            cluster_key: prev
                .cluster_key
                .clone()
                .unwrap_or_else(|| "unknown".to_string()),
            hint_level,
            hint_variant: hint_variant.to_string(),
        };
        // Exposures are untouched here; they were counted when the hint was shown.
        self.store
            .bump_stats(&key, 0, if improved { 1 } else { 0 }, delta)
            .await?;

        FEEDBACK_EVENTS_TOTAL
            .with_label_values(&[if improved { "improved" } else { "not_improved" }])
            .inc();

        Ok(Some(LearningInfo {
            previous_hint_improved_score: improved,
            previous_delta_score: round_to(delta, 4),
        }))
    }
}

fn build_attempt(
    req: &HintRequest,
    language: &str,
    analysis: &AnalysisResult,
    hint_level: i32,
    hint_variant: &str,
    hint_text: &str,
) -> Attempt {
    Attempt {
        id: Uuid::new_v4().to_string(),
        created_at: DateTime::now(),
        mode: req.mode.clone(),
        language: language.to_string(),
        course_id: req.course_id,
        quiz_id: req.quiz_id,
        question_id: req.question_id,
        question_slot: req.question_slot,
        question_name: req.question_name.clone(),
        student_id: req.student_id.clone(),
        attempt_id: req.attempt_id,
        attempt_no: req.attempt_no,
        source_code: req.source_code.clone(),
        source_hash: source_hash(&req.source_code),
        score: req.coderunner.score,
        max_score: req.coderunner.max_score,
        compile_error_text: req.coderunner.compile_error_text.clone(),
        runtime_error_text: req.coderunner.runtime_error_text.clone(),
        failed_tests: req.coderunner.failed_tests.clone(),
        full_feedback_text: req.coderunner.full_feedback_text.clone(),
        cluster_key: Some(analysis.cluster_key.clone()),
        hint_level: Some(hint_level),
        hint_type: Some(analysis.hint_type.clone()),
        hint_variant: Some(hint_variant.to_string()),
        hint_text: Some(hint_text.to_string()),
        confidence: Some(analysis.confidence),
        improved_vs_previous: None,
        delta_score: None,
    }
}

/// First 16 hex chars of the SHA-256 of the submitted source.
pub fn source_hash(source: &str) -> String {
    let digest = Sha256::digest(source.as_bytes());
    hex::encode(digest)[..16].to_string()
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}
