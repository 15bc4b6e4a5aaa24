use lazy_static::lazy_static;
use regex::{Regex, RegexBuilder};
use serde::Serialize;

use crate::models::hint::HintRequest;

/// Classification verdict for one submission. Pure data; the signal bag is
/// informational and its shape is not contractually stable.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisResult {
    pub language: String,
    pub cluster_key: String,
    pub hint_type: String,
    pub confidence: f64,
    pub signals: SignalBag,
}

#[derive(Debug, Clone, Serialize)]
pub struct SignalBag {
    pub compile_patterns: Vec<String>,
    pub runtime_patterns: Vec<String>,
    pub failed_test_cues: Vec<String>,
    pub code_features: CodeFeatures,
    pub score_ratio: f64,
}

/// Lightweight textual features over the submitted source. No AST.
#[derive(Debug, Clone, Serialize)]
pub struct CodeFeatures {
    pub uses_malloc: bool,
    pub uses_free: bool,
    pub null_check_after_malloc: bool,
    pub has_for_loop: bool,
    pub has_while_loop: bool,
    pub uses_array_index: bool,
    pub uses_pointer_deref: bool,
    pub uses_address_of: bool,
    pub line_count: usize,
}

/// One classification rule. Rules are evaluated in declaration order and the
/// first match wins, so priority lives in the table, not in control flow.
struct SignalRule {
    pattern: &'static str,
    cluster: &'static str,
    hint_type: &'static str,
    confidence: f64,
}

/// Runtime memory-safety faults. These take absolute precedence over compile
/// diagnostics: a memory bug is the highest-value teaching moment.
const RUNTIME_RULES: &[SignalRule] = &[
    SignalRule {
        pattern: r"segmentation fault|sigsegv",
        cluster: "c_segfault",
        hint_type: "runtime_memory",
        confidence: 0.95,
    },
    SignalRule {
        pattern: r"addresssanitizer.*heap-use-after-free|use-after-free",
        cluster: "c_use_after_free",
        hint_type: "memory",
        confidence: 0.98,
    },
    SignalRule {
        pattern: r"addresssanitizer.*double-free|double free",
        cluster: "c_double_free",
        hint_type: "memory",
        confidence: 0.98,
    },
    SignalRule {
        pattern: r"addresssanitizer.*invalid free|free\(\): invalid pointer",
        cluster: "c_invalid_free",
        hint_type: "memory",
        confidence: 0.97,
    },
    SignalRule {
        pattern: r"stack-buffer-overflow|heap-buffer-overflow|out of bounds",
        cluster: "c_out_of_bounds",
        hint_type: "bounds",
        confidence: 0.94,
    },
    SignalRule {
        pattern: r"null pointer|dereference of null|addresssanitizer.*null",
        cluster: "c_null_dereference",
        hint_type: "pointers",
        confidence: 0.92,
    },
];

/// Compile diagnostics worth tutoring (not pure syntax punctuation).
const COMPILE_RULES: &[SignalRule] = &[
    SignalRule {
        pattern: r"undeclared(?:\s+identifier)?|was not declared|implicit declaration",
        cluster: "c_undeclared_identifier",
        hint_type: "compile_symbol",
        confidence: 0.92,
    },
    SignalRule {
        pattern: r"conflicting types for|incompatible type|incompatible pointer type",
        cluster: "c_type_mismatch",
        hint_type: "types",
        confidence: 0.9,
    },
    SignalRule {
        pattern: r"too (?:few|many) arguments to function|passing argument .* from incompatible pointer type",
        cluster: "c_parameter_mismatch",
        hint_type: "signature",
        confidence: 0.9,
    },
    SignalRule {
        pattern: r"conflicting types for .*|previous declaration of .* with type",
        cluster: "c_prototype_conflict",
        hint_type: "prototype",
        confidence: 0.9,
    },
    SignalRule {
        pattern: r"return type .* is not compatible|return makes .* from .* without a cast",
        cluster: "c_return_type_mismatch",
        hint_type: "return_type",
        confidence: 0.86,
    },
    SignalRule {
        pattern: r"subscripted value is neither array nor pointer|invalid type argument of unary \*",
        cluster: "c_pointer_deref_misuse",
        hint_type: "pointers",
        confidence: 0.88,
    },
    SignalRule {
        pattern: r"free\(|invalid conversion .*free",
        cluster: "c_free_misuse_compile",
        hint_type: "memory",
        confidence: 0.76,
    },
    SignalRule {
        pattern: r"warning: unused variable",
        cluster: "c_warning_unused_variable",
        hint_type: "warning_unused",
        confidence: 0.55,
    },
];

const UNUSED_VARIABLE_CLUSTER: &str = "c_warning_unused_variable";

/// Lexical cue over failed-test identifiers. Keyword sets are bilingual
/// (English + Italian) to match the grading platform's vocabulary.
struct FailedTestCue {
    name: &'static str,
    keywords: &'static [&'static str],
    cluster: &'static str,
    hint_type: &'static str,
    confidence: f64,
}

const FAILED_TEST_CUES: &[FailedTestCue] = &[
    FailedTestCue {
        name: "edge_case_empty",
        keywords: &["empty", "vuoto", "n=0", "zero"],
        cluster: "c_logic_edge_case_empty",
        hint_type: "edge_case",
        confidence: 0.8,
    },
    FailedTestCue {
        name: "edge_case_single",
        keywords: &["single", "uno", "1 elemento", "one element"],
        cluster: "c_logic_edge_case_single",
        hint_type: "edge_case",
        confidence: 0.76,
    },
    FailedTestCue {
        name: "output_format",
        keywords: &["format", "output", "newline", "spazio", "space"],
        cluster: "c_output_format",
        hint_type: "output_format",
        confidence: 0.75,
    },
    FailedTestCue {
        name: "bounds",
        keywords: &["bounds", "index", "ultimo", "last", "first"],
        cluster: "c_logic_bounds_off_by_one",
        hint_type: "bounds",
        confidence: 0.79,
    },
];

lazy_static! {
    static ref RUNTIME_MATCHERS: Vec<(Regex, &'static SignalRule)> = compile_rules(RUNTIME_RULES);
    static ref COMPILE_MATCHERS: Vec<(Regex, &'static SignalRule)> = compile_rules(COMPILE_RULES);
    static ref NULL_CHECK_RE: Regex =
        Regex::new(r"if\s*\([^)]*==\s*null|if\s*\([^)]*!\s*\w+\)").unwrap();
}

fn compile_rules(rules: &'static [SignalRule]) -> Vec<(Regex, &'static SignalRule)> {
    rules
        .iter()
        .map(|rule| {
            let re = RegexBuilder::new(rule.pattern)
                .case_insensitive(true)
                .dot_matches_new_line(true)
                .build()
                .unwrap();
            (re, rule)
        })
        .collect()
}

/// Maps one submission's feedback signals to a diagnostic cluster, hint type
/// and confidence prior. Total and deterministic: identical inputs always
/// produce an identical result.
pub fn analyze(req: &HintRequest) -> AnalysisResult {
    let cr = &req.coderunner;
    let merged_compile =
        format!("{}\n{}", cr.compile_error_text, cr.full_feedback_text).to_lowercase();
    let merged_runtime =
        format!("{}\n{}", cr.runtime_error_text, cr.full_feedback_text).to_lowercase();
    let failed_join = cr.failed_tests.join("\n").to_lowercase();

    let mut signals = SignalBag {
        compile_patterns: Vec::new(),
        runtime_patterns: Vec::new(),
        failed_test_cues: Vec::new(),
        code_features: extract_code_features(&req.source_code),
        score_ratio: safe_ratio(cr.score, cr.max_score),
    };

    // 1) Runtime memory issues first.
    for (re, rule) in RUNTIME_MATCHERS.iter() {
        if re.is_match(&merged_runtime) {
            signals.runtime_patterns.push(rule.cluster.to_string());
            return verdict(rule, signals);
        }
    }

    // 2) Compile diagnostics, conceptually useful ones.
    for (re, rule) in COMPILE_MATCHERS.iter() {
        if re.is_match(&merged_compile) {
            signals.compile_patterns.push(rule.cluster.to_string());
            // A full-credit submission does not need a warning-level hint.
            if rule.cluster == UNUSED_VARIABLE_CLUSTER && signals.score_ratio >= 0.99 {
                break;
            }
            return verdict(rule, signals);
        }
    }

    // 3) Logic/case-limit cues from failed-test identifiers.
    if !failed_join.is_empty() {
        for cue in FAILED_TEST_CUES {
            if cue.keywords.iter().any(|k| failed_join.contains(k)) {
                signals.failed_test_cues.push(cue.name.to_string());
                return AnalysisResult {
                    language: "c".to_string(),
                    cluster_key: cue.cluster.to_string(),
                    hint_type: cue.hint_type.to_string(),
                    confidence: cue.confidence,
                    signals,
                };
            }
        }
    }

    // 4) Code-structure fallback when tests fail but messages are generic.
    if signals.score_ratio < 0.99 {
        let feats = &signals.code_features;
        if feats.uses_free && !feats.null_check_after_malloc && feats.uses_malloc {
            return structural("c_memory_malloc_no_null_check", "memory", 0.62, signals);
        }
        if feats.has_for_loop && feats.uses_array_index {
            return structural("c_logic_loop_bounds_generic", "logic_loop", 0.58, signals);
        }
        return structural("c_logic_generic_failed_tests", "logic_generic", 0.45, signals);
    }

    // 5) Full score or no useful signal.
    structural("c_no_hint_needed", "none", 0.2, signals)
}

fn verdict(rule: &SignalRule, signals: SignalBag) -> AnalysisResult {
    AnalysisResult {
        language: "c".to_string(),
        cluster_key: rule.cluster.to_string(),
        hint_type: rule.hint_type.to_string(),
        confidence: rule.confidence,
        signals,
    }
}

fn structural(cluster: &str, hint_type: &str, confidence: f64, signals: SignalBag) -> AnalysisResult {
    AnalysisResult {
        language: "c".to_string(),
        cluster_key: cluster.to_string(),
        hint_type: hint_type.to_string(),
        confidence,
        signals,
    }
}

/// score/max_score clamped to [0,1]. Fails closed to 0.0 on a non-positive
/// divisor or non-finite input, never to the caller.
pub fn safe_ratio(score: f64, max_score: f64) -> f64 {
    if !score.is_finite() || !max_score.is_finite() || max_score <= 0.0 {
        return 0.0;
    }
    (score / max_score).clamp(0.0, 1.0)
}

fn extract_code_features(code: &str) -> CodeFeatures {
    let lower = code.to_lowercase();
    CodeFeatures {
        uses_malloc: lower.contains("malloc("),
        uses_free: lower.contains("free("),
        null_check_after_malloc: NULL_CHECK_RE.is_match(&lower),
        has_for_loop: code.contains("for (") || code.contains("for("),
        has_while_loop: code.contains("while (") || code.contains("while("),
        uses_array_index: code.contains('[') && code.contains(']'),
        uses_pointer_deref: code.contains('*'),
        uses_address_of: code.contains('&'),
        line_count: code.lines().count(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::hint::CodeRunnerPayload;

    fn request(coderunner: CodeRunnerPayload, source_code: &str) -> HintRequest {
        HintRequest {
            mode: "training".to_string(),
            language: "c".to_string(),
            course_id: 1,
            quiz_id: 10,
            question_id: 100,
            question_slot: 1,
            question_name: "somma".to_string(),
            student_id: "s1".to_string(),
            attempt_id: 1,
            attempt_no: 1,
            source_code: source_code.to_string(),
            coderunner,
        }
    }

    #[test]
    fn undeclared_identifier_is_classified_with_fixed_prior() {
        let req = request(
            CodeRunnerPayload {
                score: 0.0,
                max_score: 10.0,
                compile_error_text: "error: 'x' undeclared (first use in this function)"
                    .to_string(),
                ..Default::default()
            },
            "int main(void) { return x; }",
        );
        let result = analyze(&req);
        assert_eq!(result.cluster_key, "c_undeclared_identifier");
        assert_eq!(result.hint_type, "compile_symbol");
        assert_eq!(result.confidence, 0.92);
    }

    #[test]
    fn runtime_fault_takes_precedence_over_compile_match() {
        let req = request(
            CodeRunnerPayload {
                score: 0.0,
                max_score: 10.0,
                compile_error_text: "error: 'x' undeclared".to_string(),
                runtime_error_text: "AddressSanitizer: heap-use-after-free on address 0x6020"
                    .to_string(),
                ..Default::default()
            },
            "",
        );
        let result = analyze(&req);
        assert_eq!(result.cluster_key, "c_use_after_free");
        assert_eq!(result.confidence, 0.98);
    }

    #[test]
    fn classification_is_deterministic() {
        let req = request(
            CodeRunnerPayload {
                score: 2.0,
                max_score: 10.0,
                runtime_error_text: "Segmentation fault (core dumped)".to_string(),
                ..Default::default()
            },
            "int a[5];",
        );
        let first = analyze(&req);
        let second = analyze(&req);
        assert_eq!(first.cluster_key, second.cluster_key);
        assert_eq!(first.hint_type, second.hint_type);
        assert_eq!(first.confidence, second.confidence);
        assert_eq!(first.signals.score_ratio, second.signals.score_ratio);
    }

    #[test]
    fn unused_warning_is_skipped_at_full_credit() {
        let req = request(
            CodeRunnerPayload {
                score: 9.9,
                max_score: 10.0,
                compile_error_text: "warning: unused variable 'tmp'".to_string(),
                ..Default::default()
            },
            "",
        );
        let result = analyze(&req);
        assert_eq!(result.cluster_key, "c_no_hint_needed");
        assert_eq!(result.confidence, 0.2);
    }

    #[test]
    fn unused_warning_fires_just_below_full_credit() {
        let req = request(
            CodeRunnerPayload {
                score: 9.89999,
                max_score: 10.0,
                compile_error_text: "warning: unused variable 'tmp'".to_string(),
                ..Default::default()
            },
            "",
        );
        let result = analyze(&req);
        assert_eq!(result.cluster_key, "c_warning_unused_variable");
        assert_eq!(result.confidence, 0.55);
    }

    #[test]
    fn failed_test_cues_follow_priority_order() {
        // "empty" and "format" both present; the empty-input set wins.
        let req = request(
            CodeRunnerPayload {
                score: 3.0,
                max_score: 10.0,
                failed_tests: vec![
                    "test_empty_array".to_string(),
                    "test_output_format".to_string(),
                ],
                ..Default::default()
            },
            "",
        );
        let result = analyze(&req);
        assert_eq!(result.cluster_key, "c_logic_edge_case_empty");
        assert_eq!(result.confidence, 0.8);
    }

    #[test]
    fn italian_failed_test_names_are_recognized() {
        let req = request(
            CodeRunnerPayload {
                score: 3.0,
                max_score: 10.0,
                failed_tests: vec!["caso array vuoto".to_string()],
                ..Default::default()
            },
            "",
        );
        assert_eq!(analyze(&req).cluster_key, "c_logic_edge_case_empty");
    }

    #[test]
    fn structural_fallback_flags_malloc_without_null_check() {
        let req = request(
            CodeRunnerPayload {
                score: 1.0,
                max_score: 10.0,
                ..Default::default()
            },
            "int *p = malloc(n * sizeof(int));\nfree(p);",
        );
        let result = analyze(&req);
        assert_eq!(result.cluster_key, "c_memory_malloc_no_null_check");
        assert_eq!(result.confidence, 0.62);
    }

    #[test]
    fn structural_fallback_flags_indexed_loop() {
        let req = request(
            CodeRunnerPayload {
                score: 1.0,
                max_score: 10.0,
                ..Default::default()
            },
            "for (int i = 0; i <= n; i++) { a[i] = 0; }",
        );
        let result = analyze(&req);
        assert_eq!(result.cluster_key, "c_logic_loop_bounds_generic");
        assert_eq!(result.confidence, 0.58);
    }

    #[test]
    fn generic_cluster_when_nothing_matches_and_tests_fail() {
        let req = request(
            CodeRunnerPayload {
                score: 1.0,
                max_score: 10.0,
                ..Default::default()
            },
            "int main(void) { return 0; }",
        );
        let result = analyze(&req);
        assert_eq!(result.cluster_key, "c_logic_generic_failed_tests");
        assert_eq!(result.confidence, 0.45);
    }

    #[test]
    fn full_score_without_signals_needs_no_hint() {
        let req = request(
            CodeRunnerPayload {
                score: 10.0,
                max_score: 10.0,
                ..Default::default()
            },
            "int main(void) { return 0; }",
        );
        let result = analyze(&req);
        assert_eq!(result.cluster_key, "c_no_hint_needed");
        assert_eq!(result.hint_type, "none");
        assert_eq!(result.confidence, 0.2);
    }

    #[test]
    fn safe_ratio_fails_closed() {
        assert_eq!(safe_ratio(5.0, 0.0), 0.0);
        assert_eq!(safe_ratio(5.0, -1.0), 0.0);
        assert_eq!(safe_ratio(f64::NAN, 10.0), 0.0);
        assert_eq!(safe_ratio(5.0, f64::INFINITY), 0.0);
        assert_eq!(safe_ratio(15.0, 10.0), 1.0);
        assert_eq!(safe_ratio(5.0, 10.0), 0.5);
    }
}
