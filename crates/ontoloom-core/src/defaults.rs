//! Centralized default constants for ontoloom.
//!
//! **This module is the single source of truth** for shared default values.
//! Crates reference these constants instead of defining their own magic
//! numbers. Organized by domain area; document each value where it is
//! chosen.

// =============================================================================
// PLACEHOLDERS
// =============================================================================

/// Placeholder replaced with the subject concept.
pub const PLACEHOLDER_CONCEPT: &str = "<<<concept>>>";

/// Placeholder replaced with specificity instructions (or removed).
pub const PLACEHOLDER_SPECIFICITY: &str = "<<<beceptivity>>>";

/// Placeholder replaced with the subject string in confirmation prompts.
pub const PLACEHOLDER_SUBJ_STR: &str = "<<<subj_str>>>";

/// Placeholder replaced with the object string under confirmation or refinement.
pub const PLACEHOLDER_OBJ_STR: &str = "<<<obj_str>>>";

/// Placeholder replaced with the original relation prompt during refinement.
pub const PLACEHOLDER_ORIG_PROMPT: &str = "<<<orig_prompt>>>";

// =============================================================================
// PROMPT PROTOCOL
// =============================================================================

/// Separator name used for delimited (non-JSON) output.
pub const SEPARATOR_NAME: &str = "tab";

/// Token wrapped around each delimited response line.
pub const RESPONSE_SURROUNDER: &str = "__resp__";

/// Relation name of the confirmation ("are you sure") sub-prompt.
pub const CONFIRMATION_RELATION: &str = "ays";

/// Relation name of the refinement sub-prompt.
pub const REFINEMENT_RELATION: &str = "response";

/// Relation name carrying the model's reasoning in a second specificity lookup.
pub const SPECIFICITY_REASONING_RELATION: &str = "no_write_logic";

/// Relation name carrying the score in a second specificity lookup.
pub const SPECIFICITY_RESULT_RELATION: &str = "beceptivity_result";

/// General instructions prepended to every relation-set prompt.
pub const INSTRUCTIONS: &str = "Provide no other verbiage, words, explanation, or examples other than exactly what is requested. If a part of the request doesn't make sense, (e.g., what is the color of sound?) then don't return anything for that part. For any response that is not a request for you to explain your thinking or provide your reasoning, then:

a) Make the response specific, not a general category, class, or group.
b) If the response (or an item in the response, if the response is a list) would represent a class or category of items, list out all the items instead of providing the class or category of items.
c) Do not use 'or' or 'and' in your response items.
d) Do not add any other information.
e) Do NOT use line breaks.
f) Provide the response in lowercase.
";

// =============================================================================
// SPECIFICITY ("beceptivity")
// =============================================================================

/// Top of the specificity scale.
pub const SPECIFICITY_MAX_VAL: f64 = 10.0;

/// Bottom of the specificity scale.
pub const SPECIFICITY_MIN_VAL: f64 = 1.0;

/// Values below the cutoff denote a category rather than a specific concept.
pub const SPECIFICITY_CUTOFF: f64 = 7.0;

/// Score used when a second lookup returns nothing.
pub const SPECIFICITY_VAL_IF_NONE: f64 = 0.0;

/// Name of the default specificity scale (keys persisted specificity records).
pub const SPECIFICITY_SCALE_NAME: &str = "Default beceptivity range 1-10 cutoff 7 v001";

/// Default refinement loop bound per candidate.
pub const SPECIFICITY_MAX_LOOPS: u32 = 1;

/// Instructions substituted for the specificity placeholder.
pub const SPECIFICITY_INSTRUCTIONS: &str = "If asked for specificity of your responses, then:

a) Provide an integer value of 1 if your associated response is vague, broad, poorly specified, is a more general term having multiple specific subtypes (e.g., nutritional deficiency), more of a category than a very specific concept, or is a response for which you could have put one or more parenthetical examples. Otherwise, provide 10.
b) Even if a float is allowed, please only provide an integer for this number.
c) Some concepts normally specify a location, and those types of concepts are typically considered a category if the location is missing. For example, \"bruising\" might be considered a category since it usually would be expected to include a location for clear communication. On the other hand, \"forearm bruising\" or \"diffuse bruising\" would be considered specific concepts because they provide location information. This consideration would not apply to concepts for which location is not expected, like \"vomiting.\"
d) This number is UNRELATED to any prioritization or ordering of the responses.
";

// =============================================================================
// CONFIDENCE ADJUDICATION
// =============================================================================

/// Value substituted for a failed or uncoercible confirmation sample.
pub const CONFIRMATION_VAL_IF_ERROR: f64 = 1.0;

// =============================================================================
// LLM SESSION
// =============================================================================

/// Attempts per LLM gateway call before the error propagates.
pub const LLM_MAX_ATTEMPTS: u32 = 3;

/// Fixed delay between LLM gateway attempts, in milliseconds.
pub const LLM_RETRY_DELAY_MS: u64 = 1000;

/// Default session spend ceiling, in dollars.
pub const LLM_MAX_SPEND: f64 = 5.0;

/// Default per-request timeout for HTTP backends.
pub const LLM_TIMEOUT_SECS: u64 = 60;

// =============================================================================
// STRING EXPANSION
// =============================================================================

/// Expansion style used when a definition names no style of its own.
pub const EXPANSION_STYLE: &str = "simple";

/// Version of the default expansion style.
pub const EXPANSION_STYLE_VERSION: f64 = 1.0;

/// Lead-in of every built-in expansion prompt.
pub const EXPANSION_PROMPT_START: &str = "For the upcoming request, put your response in a list with no other words or explanation. Make the response specific, not a general category, class, or group. If an item in the response would represent a class of items, list out all the items instead of providing the class of items. Do not use 'or' or 'and' in your response items. Do not add any other information. Do NOT use line breaks. If the request doesn't make sense, (e.g., what is the color of sound?) then don't return anything. My request: ";

/// Request part of the `simple` expansion style.
pub const EXPANSION_SIMPLE_PROMPT: &str = "Please provide three alternative versions of the term at the end of this prompt. The two versions should be the most basic versions. Provide no other verbiage other than the versions of the term. Do not number the terms, just make each key the term, not a number. The term is: <<<concept>>>";

// =============================================================================
// MATCHING
// =============================================================================

/// Cosine distance cutoff; pairs at or above it are never eligible.
pub const MATCH_DISTANCE_CUTOFF: f64 = 0.4;

/// Ranks strictly below this bound are kept (so 4 keeps ranks 1..=3).
pub const MATCH_TOP_HIT_COUNT: i64 = 4;

/// Column alias of left-side vectors in the ranking query.
pub const MATCH_LEFT_VEC: &str = "obj_vec";

/// Column alias of right-side vectors in the ranking query.
pub const MATCH_RIGHT_VEC: &str = "code_vec";

// =============================================================================
// PROGRESS
// =============================================================================

/// Emit a progress/ETA report every this many items.
pub const PROGRESS_REPORT_INCREMENT: usize = 1;

// =============================================================================
// DATABASE
// =============================================================================

/// Schema holding every ontoloom table.
pub const DB_SCHEMA: &str = "ontoloom";

/// Default maximum number of pooled connections.
pub const DB_MAX_CONNECTIONS: u32 = 5;

/// Default pool acquire timeout in seconds.
pub const DB_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default embedding dimension for stored string vectors.
pub const EMBED_DIMENSION: usize = 768;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_specificity_scale_is_consistent() {
        assert!(SPECIFICITY_MIN_VAL < SPECIFICITY_CUTOFF);
        assert!(SPECIFICITY_CUTOFF < SPECIFICITY_MAX_VAL);
        assert!(SPECIFICITY_SCALE_NAME.contains("1-10"));
        assert!(SPECIFICITY_SCALE_NAME.contains("cutoff 7"));
    }

    #[test]
    fn test_placeholders_are_distinct() {
        let all = [
            PLACEHOLDER_CONCEPT,
            PLACEHOLDER_SPECIFICITY,
            PLACEHOLDER_SUBJ_STR,
            PLACEHOLDER_OBJ_STR,
            PLACEHOLDER_ORIG_PROMPT,
        ];
        for (i, a) in all.iter().enumerate() {
            for b in &all[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_match_defaults() {
        assert!(MATCH_DISTANCE_CUTOFF > 0.0 && MATCH_DISTANCE_CUTOFF < 2.0);
        assert!(MATCH_TOP_HIT_COUNT > 1);
    }
}
