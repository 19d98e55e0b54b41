//! Structured logging schema and field name constants for ontoloom.
//!
//! All crates use these constants for consistent structured logging fields,
//! so a log aggregator can query a relation population run or a matching run
//! by the same field names across every subsystem.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Run aborted, requires operator attention |
//! | WARN  | Recoverable issue, fallback value or skip applied |
//! | INFO  | Run lifecycle (start, progress/ETA, completion) |
//! | DEBUG | Decision points: verdicts, adequacy, expansions, query assembly |
//! | TRACE | Full prompts, raw model output, per-row match results |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Background task identifier (`{kind}_{uuid}`).
pub const TASK_ID: &str = "task_id";

/// Subsystem originating the log event.
/// Values: "relations", "search", "db", "inference", "jobs", "cli"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "populator", "adjudicator", "specificity", "session", "engine"
pub const COMPONENT: &str = "component";

/// Logical operation name.
/// Examples: "populate", "adjudicate", "expand", "rank", "upsert"
pub const OPERATION: &str = "op";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Relation population run (populator) name.
pub const POPULATOR: &str = "populator";

/// Subject concept text under processing.
pub const CONCEPT: &str = "concept";

/// Relation name.
pub const RELATION: &str = "relation";

/// Candidate or final object string.
pub const OBJECT: &str = "object";

/// Matcher configuration id.
pub const MATCHER_ID: &str = "matcher_id";

/// Left-side item id under matching.
pub const FROM_ITEM: &str = "from_item";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Number of items in a run.
pub const ITEM_COUNT: &str = "item_count";

/// Number of items skipped so far.
pub const SKIP_COUNT: &str = "skip_count";

/// Number of rows returned by a query.
pub const RESULT_COUNT: &str = "result_count";

/// Specificity-loop index.
pub const LOOP_NUM: &str = "loop_num";

/// Attempt number of a retried call.
pub const ATTEMPT: &str = "attempt";

/// Byte length of a prompt.
pub const PROMPT_LEN: &str = "prompt_len";

/// Byte length of a model response.
pub const RESPONSE_LEN: &str = "response_len";

// ─── Inference fields ──────────────────────────────────────────────────────

/// Model name used for inference.
pub const MODEL: &str = "model";

/// Cost of one call.
pub const COST: &str = "cost";

/// Accumulated session spend.
pub const SPEND: &str = "spend";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Boolean success/failure indicator.
pub const SUCCESS: &str = "success";

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";
