//! Confidence adjudication ("are you sure").
//!
//! A candidate object string is re-submitted to the model up to
//! `confirmation_count` times through a single-relation `ays` prompt, and
//! the samples are reduced to one verdict by the relation's
//! [`AdjudicationRule`]:
//!
//! | Rule | Samples | Verdict |
//! |------|---------|---------|
//! | vote | 0 / 1 | candidate kept, or rejected; decided early when possible |
//! | avg | numbers | mean of the samples |
//! | sum | numbers | sum of the samples |
//! | categorical | strings | most frequent value, seeded with the candidate |
//!
//! Vote decides as soon as `yes >= count / 2` (accept) or
//! `no > count / 2` (reject). With an even count this lets a tie accept,
//! which behaves as if the original answer were an implicit first yes.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, instrument, warn};

use ontoloom_core::{
    defaults, AdjudicationRule, Error, LlmGateway, PlaceholderKey, RelationSetSpec, RelationSpec,
    Result,
};

use crate::protocol;

/// Outcome of adjudicating one candidate.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    /// Object text that proceeds (the candidate, or a categorical winner).
    Text(String),
    /// Numeric reduction from the average or sum rules.
    Score(f64),
}

impl Verdict {
    /// Object text carried forward into refinement and persistence.
    pub fn into_text(self) -> String {
        match self {
            Verdict::Text(s) => s,
            Verdict::Score(v) => format_score(v),
        }
    }
}

/// Render a score the way it is stored as object text ("3.0", "2.5").
pub fn format_score(v: f64) -> String {
    if v.fract() == 0.0 && v.is_finite() {
        format!("{:.1}", v)
    } else {
        v.to_string()
    }
}

/// Re-asks the model about candidates and reduces the answers.
pub struct ConfidenceAdjudicator {
    gateway: Arc<dyn LlmGateway>,
    fail_fast: bool,
}

impl ConfidenceAdjudicator {
    pub fn new(gateway: Arc<dyn LlmGateway>) -> Self {
        Self {
            gateway,
            fail_fast: true,
        }
    }

    /// Propagate exhausted confirmation calls instead of substituting the
    /// relation's error value.
    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    /// Adjudicate `candidate` for `subject` under `relation`.
    ///
    /// Returns `None` when a vote rejects the candidate.
    #[instrument(skip(self, set, relation), fields(
        subsystem = "relations",
        component = "adjudicator",
        op = "adjudicate",
        relation = %relation.relation,
        rule = %relation.adjudication,
        count = relation.confirmation_count,
    ))]
    pub async fn adjudicate(
        &self,
        set: &RelationSetSpec,
        relation: &RelationSpec,
        subject: &str,
        candidate: &str,
    ) -> Result<Option<Verdict>> {
        if relation.confirmation_count == 0 {
            return Ok(Some(Verdict::Text(candidate.to_string())));
        }

        let prompt = relation.confirmation_prompt.as_deref().ok_or_else(|| {
            Error::Config(format!(
                "relation '{}' asks for confirmation without a confirmation prompt",
                relation.relation
            ))
        })?;
        if set.placeholders.subj_str.is_empty() || set.placeholders.obj_str.is_empty() {
            return Err(Error::Config(
                "confirmation needs non-empty subject and object placeholders".into(),
            ));
        }

        let mut ays = set.derive_output("ays_rels_prompt_obj");
        ays.add(RelationSpec::new(defaults::CONFIRMATION_RELATION, prompt).single())?;
        let template = protocol::build(&ays)?;
        let rendered = template.render(&[
            (PlaceholderKey::SubjStr, Some(subject)),
            (PlaceholderKey::ObjStr, Some(candidate)),
            (PlaceholderKey::Concept, Some(subject)),
        ])?;

        let count = relation.confirmation_count;
        let rule = relation.adjudication;
        let mut tally = Tally::new(rule, candidate, relation.val_if_error);

        for rep in 0..count {
            let answer = match self.gateway.get_response(&rendered, &template.shape).await {
                Ok(resp) => resp
                    .responses
                    .get(defaults::CONFIRMATION_RELATION)
                    .and_then(|objs| objs.first())
                    .map(|o| o.text.clone()),
                Err(e) if e.is_fatal() || self.fail_fast => return Err(e),
                Err(e) => {
                    warn!(rep, error = %e, "Confirmation call failed, using error value");
                    None
                }
            };
            debug!(rep, subject, candidate, answer = ?answer, "Confirmation sample");
            tally.push(answer.as_deref());

            if rule == AdjudicationRule::Vote {
                if let Some(decision) = tally.vote_decision(count) {
                    debug!(accepted = decision, samples = rep + 1, "Vote decided");
                    return Ok(decision.then(|| Verdict::Text(candidate.to_string())));
                }
            }
        }

        tally.finish(count)
    }
}

/// Samples collected for one candidate.
#[derive(Debug)]
struct Tally {
    rule: AdjudicationRule,
    candidate: String,
    val_if_error: f64,
    numbers: Vec<f64>,
    labels: Vec<String>,
}

impl Tally {
    fn new(rule: AdjudicationRule, candidate: &str, val_if_error: f64) -> Self {
        Self {
            rule,
            candidate: candidate.to_string(),
            val_if_error,
            numbers: Vec::new(),
            labels: Vec::new(),
        }
    }

    /// Record one answer; `None` means the call produced nothing usable.
    fn push(&mut self, answer: Option<&str>) {
        match self.rule {
            AdjudicationRule::Categorical => {
                // The error value of a categorical vote is the candidate itself.
                let label = answer.unwrap_or(self.candidate.as_str()).to_string();
                self.labels.push(label);
            }
            AdjudicationRule::Vote => {
                let v = answer
                    .and_then(|a| coerce(a, true, self.val_if_error))
                    .unwrap_or(self.val_if_error);
                let v = if v == 0.0 || v == 1.0 { v } else { self.val_if_error };
                self.numbers.push(v);
            }
            AdjudicationRule::Average | AdjudicationRule::Sum => {
                let v = answer
                    .and_then(|a| coerce(a, false, self.val_if_error))
                    .unwrap_or(self.val_if_error);
                self.numbers.push(v);
            }
        }
    }

    /// `Some(true)` accept, `Some(false)` reject, `None` undecided.
    fn vote_decision(&self, count: u32) -> Option<bool> {
        let half = count as f64 / 2.0;
        let yes: f64 = self.numbers.iter().sum();
        let no = self.numbers.iter().filter(|v| **v == 0.0).count() as f64;
        if yes >= half {
            Some(true)
        } else if no > half {
            Some(false)
        } else {
            None
        }
    }

    fn finish(self, count: u32) -> Result<Option<Verdict>> {
        match self.rule {
            AdjudicationRule::Vote => Err(Error::Config(format!(
                "vote over {} samples reached no decision; val_if_error must be 0 or 1, got {}",
                count, self.val_if_error
            ))),
            AdjudicationRule::Average => {
                let n = self.numbers.len().max(1) as f64;
                Ok(Some(Verdict::Score(self.numbers.iter().sum::<f64>() / n)))
            }
            AdjudicationRule::Sum => Ok(Some(Verdict::Score(self.numbers.iter().sum()))),
            AdjudicationRule::Categorical => {
                Ok(Some(Verdict::Text(categorical_winner(&self.candidate, &self.labels))))
            }
        }
    }
}

/// Coerce an answer to a number: integers for votes, floats otherwise.
fn coerce(answer: &str, integer: bool, val_if_error: f64) -> Option<f64> {
    let a = answer.trim();
    let parsed = if integer {
        a.parse::<i64>().ok().map(|v| v as f64)
    } else {
        a.parse::<f64>().ok()
    };
    if parsed.is_none() {
        warn!(
            subsystem = "relations",
            component = "adjudicator",
            answer = a,
            fallback = val_if_error,
            "Could not coerce confirmation answer, using error value"
        );
    }
    parsed
}

/// Most frequent label, seeded with `candidate` at count 1.
///
/// Ties go to the most recently seen label.
pub fn categorical_winner(candidate: &str, labels: &[String]) -> String {
    let mut counts: HashMap<&str, u32> = HashMap::new();
    counts.insert(candidate, 1);
    let mut best = candidate;
    let mut best_count = 1;
    for label in labels {
        let c = counts.entry(label.as_str()).or_insert(0);
        *c += 1;
        if *c >= best_count {
            best = label.as_str();
            best_count = *c;
        }
    }
    best.to_string()
}
