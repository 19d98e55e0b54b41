//! Specificity refinement ("beceptivity" loop).
//!
//! Each candidate that survives adjudication enters a bounded loop. At loop
//! index `n` every pending string is checked with [`SpecificityRefiner::is_adequate`]:
//! adequate strings are emitted, inadequate ones are replaced through
//! [`SpecificityRefiner::expand`] by more specific alternatives that become
//! the next loop's working set. At the terminal index (`max_loops`) nothing
//! is expanded any more, so the loop always ends after `max_loops + 1`
//! passes.
//!
//! Scores come from one of three sources:
//! - `llm_response`: inline with the relation response
//! - `llm_2nd_response`: a separate two-relation prompt per string, cached in
//!   the specificity store when one is configured
//! - `query`: not implemented; always an error

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::OnceCell;
use tracing::{debug, instrument};
use uuid::Uuid;

use ontoloom_core::{
    defaults, CandidateObject, Error, LlmGateway, PlaceholderKey, RelationSetSpec, RelationSpec,
    Result, SpecificityRepository, SpecificityScale, SpecificitySource,
};

use crate::protocol::{self, PromptTemplate};

/// Run-scoped cache of adequacy verdicts keyed by object text.
///
/// Once a string has a verdict it is reused for the rest of the run, even
/// when the same text comes back through another lineage.
#[derive(Debug, Default, Clone)]
pub struct SpecificityMemo {
    verdicts: HashMap<String, bool>,
}

impl SpecificityMemo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, text: &str) -> Option<bool> {
        self.verdicts.get(text).copied()
    }

    pub fn insert(&mut self, text: impl Into<String>, adequate: bool) {
        self.verdicts.insert(text.into(), adequate);
    }

    pub fn len(&self) -> usize {
        self.verdicts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.verdicts.is_empty()
    }
}

/// Result of refining one candidate.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Refinement {
    /// Strings found adequate, in emission order.
    pub adequate: Vec<String>,
    /// Strings still inadequate at the terminal loop index.
    pub dropped: Vec<String>,
    /// Loop passes that had work to do.
    pub passes: u32,
}

/// Drives adequacy checks and expansions for one relation population run.
pub struct SpecificityRefiner {
    gateway: Arc<dyn LlmGateway>,
    store: Option<Arc<dyn SpecificityRepository>>,
    scale_id: OnceCell<Uuid>,
}

impl SpecificityRefiner {
    pub fn new(gateway: Arc<dyn LlmGateway>) -> Self {
        Self {
            gateway,
            store: None,
            scale_id: OnceCell::new(),
        }
    }

    /// Persist and reuse second-lookup scores through `store`.
    pub fn with_store(mut self, store: Arc<dyn SpecificityRepository>) -> Self {
        self.store = Some(store);
        self
    }

    /// Run the loop for one candidate.
    ///
    /// `top_level` is the adjudicated object string; every expansion is
    /// prefixed with it.
    #[instrument(skip(self, set, relation, memo), fields(
        subsystem = "relations",
        component = "specificity",
        op = "refine",
        relation = %relation.relation,
        max_loops = relation.max_loops,
    ))]
    pub async fn refine(
        &self,
        set: &RelationSetSpec,
        relation: &RelationSpec,
        concept: &str,
        top_level: &str,
        inline_score: Option<f64>,
        memo: &mut SpecificityMemo,
    ) -> Result<Refinement> {
        let mut out = Refinement::default();
        let mut working = vec![CandidateObject {
            text: top_level.to_string(),
            specificity: inline_score,
        }];

        for loop_num in 0..=relation.max_loops {
            if working.is_empty() {
                break;
            }
            out.passes += 1;
            let mut next: Vec<CandidateObject> = Vec::new();

            for item in &working {
                let adequate = self
                    .is_adequate(set, relation, &item.text, item.specificity, loop_num, memo)
                    .await?;
                if adequate {
                    out.adequate.push(item.text.clone());
                } else if loop_num < relation.max_loops {
                    let alternatives = self
                        .expand(set, relation, concept, top_level, &item.text)
                        .await?;
                    for alt in alternatives {
                        merge_candidate(&mut next, alt);
                    }
                } else {
                    debug!(object = %item.text, loop_num, "Dropping string still too general at max loop");
                    out.dropped.push(item.text.clone());
                }
            }
            working = next;
        }

        Ok(out)
    }

    /// Decide whether `text` is specific enough at loop index `loop_num`.
    pub async fn is_adequate(
        &self,
        set: &RelationSetSpec,
        relation: &RelationSpec,
        text: &str,
        inline_score: Option<f64>,
        loop_num: u32,
        memo: &mut SpecificityMemo,
    ) -> Result<bool> {
        if !relation.needs_specificity() {
            return Ok(true);
        }

        let source = set.specificity.source;
        if source == SpecificitySource::PureSpecificity {
            return Err(Error::Config(format!(
                "specificity source '{:?}' cannot drive relation '{}'",
                source, relation.relation
            )));
        }
        if relation.max_loops == 0 {
            return Err(Error::Config(format!(
                "relation '{}' sets a minimum specificity but allows zero refinement loops",
                relation.relation
            )));
        }

        if let Some(verdict) = memo.get(text) {
            return Ok(verdict);
        }

        if loop_num == relation.max_loops && relation.assume_adequate_on_max_loop {
            debug!(object = text, loop_num, "Assuming adequate on max loop");
            return Ok(true);
        }

        let score = match source {
            SpecificitySource::LlmResponse => inline_score,
            SpecificitySource::LlmSecondResponse => Some(self.second_lookup(set, text).await?),
            SpecificitySource::Query => {
                return Err(Error::NotImplemented(
                    "query for specificity is not implemented".into(),
                ))
            }
            SpecificitySource::PureSpecificity => None,
        };
        let score = score.ok_or_else(|| {
            Error::MalformedResponse(format!(
                "no numeric specificity for '{}' under relation '{}'",
                text, relation.relation
            ))
        })?;

        let adequate = score >= relation.min_specificity;
        memo.insert(text, adequate);
        debug!(
            object = text,
            score,
            min = relation.min_specificity,
            adequate,
            "Specificity checked"
        );
        Ok(adequate)
    }

    /// Ask for more specific alternatives to `current`.
    ///
    /// Alternatives come back as `"{top_level} - {alternative}"`.
    pub async fn expand(
        &self,
        set: &RelationSetSpec,
        relation: &RelationSpec,
        concept: &str,
        top_level: &str,
        current: &str,
    ) -> Result<Vec<CandidateObject>> {
        let obj_token = &set.placeholders.obj_str;
        let prompt = match &relation.more_specific_prompt {
            Some(p) if !obj_token.is_empty() && p.contains(obj_token.as_str()) => p.clone(),
            Some(_) => {
                return Err(Error::Config(format!(
                    "more-specific prompt of relation '{}' must contain the object placeholder {}",
                    relation.relation, obj_token
                )))
            }
            None => default_expansion_prompt(relation, obj_token),
        };

        let mut follow_up = RelationSpec::new(defaults::REFINEMENT_RELATION, prompt)
            .with_min_specificity(relation.min_specificity)
            .with_max_loops(relation.max_loops);
        if !relation.multi {
            follow_up = follow_up.single();
        }
        let mut expansion = set.derive("bec_rels_prompt_obj");
        expansion.add(follow_up)?;
        let template = protocol::build(&expansion)?;
        let rendered = template.render(&[
            (PlaceholderKey::Concept, Some(concept)),
            (PlaceholderKey::ObjStr, Some(current)),
            (PlaceholderKey::OrigPrompt, Some(relation.prompt.as_str())),
        ])?;

        let resp = self.gateway.get_response(&rendered, &template.shape).await?;
        let alternatives: Vec<CandidateObject> = resp
            .responses
            .require(defaults::REFINEMENT_RELATION)?
            .iter()
            .map(|alt| CandidateObject {
                text: format!("{} - {}", top_level, alt.text),
                specificity: alt.specificity,
            })
            .collect();
        debug!(
            subsystem = "relations",
            component = "specificity",
            op = "expand",
            concept,
            current,
            alternatives = alternatives.len(),
            "Expanded overly general string"
        );
        Ok(alternatives)
    }

    /// Score `text` with a separate prompt, consulting the store first.
    pub async fn second_lookup(&self, set: &RelationSetSpec, text: &str) -> Result<f64> {
        let template = second_lookup_template(set)?;

        let scale_id = match &self.store {
            Some(store) => Some(*self.scale_id(store, set, &template).await?),
            None => None,
        };
        if let (Some(store), Some(scale_id)) = (&self.store, scale_id) {
            if let Some(v) = store.lookup(scale_id, text).await? {
                debug!(object = text, score = v, "Specificity from store");
                return Ok(v);
            }
        }

        let rendered = template.render(&[(PlaceholderKey::Concept, Some(text))])?;
        let resp = self.gateway.get_response(&rendered, &template.shape).await?;
        let items = resp
            .responses
            .require(defaults::SPECIFICITY_RESULT_RELATION)?;

        let value = match items {
            [] => return Ok(set.specificity.val_if_none),
            [one] => one.text.trim().parse::<f64>().map_err(|_| {
                Error::MalformedResponse(format!(
                    "specificity '{}' for '{}' is not a number",
                    one.text, text
                ))
            })?,
            many => {
                return Err(Error::MalformedResponse(format!(
                    "got {} specificity values for '{}', expected one",
                    many.len(),
                    text
                )))
            }
        };

        if let (Some(store), Some(scale_id)) = (&self.store, scale_id) {
            store.record(scale_id, text, value).await?;
        }
        Ok(value)
    }

    async fn scale_id(
        &self,
        store: &Arc<dyn SpecificityRepository>,
        set: &RelationSetSpec,
        template: &PromptTemplate,
    ) -> Result<&Uuid> {
        self.scale_id
            .get_or_try_init(|| async {
                store
                    .register_scale(&SpecificityScale {
                        name: set.specificity.scale_name.clone(),
                        prompt: template.text.clone(),
                        min_val: defaults::SPECIFICITY_MIN_VAL,
                        max_val: set.specificity.max_val,
                    })
                    .await
            })
            .await
    }
}

/// Insert `alt` into `next`, replacing the score of an existing equal text.
fn merge_candidate(next: &mut Vec<CandidateObject>, alt: CandidateObject) {
    match next.iter_mut().find(|c| c.text == alt.text) {
        Some(existing) => existing.specificity = alt.specificity,
        None => next.push(alt),
    }
}

fn default_expansion_prompt(relation: &RelationSpec, obj_token: &str) -> String {
    let wanted = if relation.multi {
        "keys ALL more specific instances"
    } else {
        "key the single best more specific instance"
    };
    format!(
        "For this prompt:\n{}\nan answer was\n{obj}\nwhich you previously said was overly \
         general. If it is not overly general, then return it as the key to your response. If it \
         is overly general, please provide as your {} of {obj} that ALSO answer the prompt.\n",
        relation.prompt,
        wanted,
        obj = obj_token
    )
}

/// Two-relation prompt: free reasoning first, then the bare score.
fn second_lookup_template(set: &RelationSetSpec) -> Result<PromptTemplate> {
    let mut lookup = set
        .derive(set.specificity.scale_name.clone())
        .with_specificity_source(SpecificitySource::PureSpecificity);
    lookup.add(
        RelationSpec::new(
            defaults::SPECIFICITY_REASONING_RELATION,
            "What would a typical person consider the specificity of the term at the end of the \
             prompt? For your response, the key should be your reasoning, including the logic of \
             your thinking, and the value should be null.",
        )
        .single()
        .no_write(),
    )?;
    lookup.add(
        RelationSpec::new(
            defaults::SPECIFICITY_RESULT_RELATION,
            format!(
                "Based on your previous response, provide the specificity (a number between 1 \
                 and {}) as the key, and null for the value. Provide no other verbiage.",
                set.specificity.max_val
            ),
        )
        .single(),
    )?;
    protocol::build(&lookup)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memo_reuses_verdicts() {
        let mut memo = SpecificityMemo::new();
        assert!(memo.is_empty());
        memo.insert("infection", false);
        assert_eq!(memo.get("infection"), Some(false));
        assert_eq!(memo.get("bacterial infection"), None);
        memo.insert("infection", true);
        assert_eq!(memo.len(), 1);
    }

    #[test]
    fn test_merge_keeps_first_position_and_latest_score() {
        let mut next = vec![CandidateObject {
            text: "a - x".into(),
            specificity: Some(2.0),
        }];
        merge_candidate(
            &mut next,
            CandidateObject {
                text: "a - y".into(),
                specificity: None,
            },
        );
        merge_candidate(
            &mut next,
            CandidateObject {
                text: "a - x".into(),
                specificity: Some(9.0),
            },
        );
        assert_eq!(next.len(), 2);
        assert_eq!(next[0].specificity, Some(9.0));
    }

    #[test]
    fn test_default_expansion_prompt_wording() {
        let multi = RelationSpec::new("causes", "What causes it?");
        let p = default_expansion_prompt(&multi, "<<<obj_str>>>");
        assert!(p.starts_with("For this prompt:\nWhat causes it?\nan answer was\n<<<obj_str>>>\n"));
        assert!(p.contains("keys ALL more specific instances of <<<obj_str>>>"));

        let single = RelationSpec::new("site", "Where?").single();
        let p = default_expansion_prompt(&single, "<<<obj_str>>>");
        assert!(p.contains("key the single best more specific instance"));
    }

    #[test]
    fn test_second_lookup_template_relations() {
        let set = RelationSetSpec::new("s").with_json_output(true);
        let t = second_lookup_template(&set).unwrap();
        assert_eq!(t.shape.fields.len(), 2);
        assert_eq!(t.shape.fields[0].relation, defaults::SPECIFICITY_REASONING_RELATION);
        assert_eq!(t.shape.fields[1].relation, defaults::SPECIFICITY_RESULT_RELATION);
        assert!(t.text.contains("a number between 1 and 10)"));
        assert!(t.text.contains(defaults::SPECIFICITY_INSTRUCTIONS));
    }
}
