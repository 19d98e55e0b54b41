//! Prompt/response protocol.
//!
//! [`build`] turns a [`RelationSetSpec`] into the literal prompt text plus
//! the [`ResponseShape`] the reply is parsed against. Nothing is cached on
//! the relation set: every call regenerates the text from the current relations.
//!
//! Prompt layout:
//!
//! ```text
//! {instructions}
//! {specificity placeholder}
//! {output format preamble}
//! My request is:
//! {one block per relation, in order}
//! ```
//!
//! When no relation prompt mentions the concept placeholder, the whole text
//! is wrapped with a lead-in and a trailing "The term or phrase is: ..." line.

use ontoloom_core::{
    Error, PlaceholderKey, Placeholders, RelationSetSpec, RelationSpec, ResponseShape, Result,
    ShapeField, SpecificitySource,
};

/// Rendered-once prompt text with the shape its reply must follow.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptTemplate {
    pub text: String,
    pub shape: ResponseShape,
    placeholders: Placeholders,
}

impl PromptTemplate {
    /// Substitute per-call content into the template.
    pub fn render(&self, content: &[(PlaceholderKey, Option<&str>)]) -> Result<String> {
        self.placeholders.fill(&self.text, content)
    }

    pub fn placeholders(&self) -> &Placeholders {
        &self.placeholders
    }
}

/// Build the prompt text and response shape for a relation set.
pub fn build(set: &RelationSetSpec) -> Result<PromptTemplate> {
    set.validate()?;

    let ph = &set.placeholders;
    if ph.concept.is_empty() {
        return Err(Error::Config(format!(
            "relation set '{}' has an empty concept placeholder",
            set.name
        )));
    }
    if ph.specificity.is_empty() {
        return Err(Error::Config(format!(
            "relation set '{}' has an empty specificity placeholder",
            set.name
        )));
    }

    let mut text = format!("{}\n{}\n", set.instructions, ph.specificity);

    if set.json_output {
        text.push_str(
            "Please provide results as a json dictionary having the following keys and values:\n",
        );
    } else {
        text.push_str(&format!(
            "\nFor each requested response, put the response on a single line, and surround \
             the response at the beginning of the line and the end of the line with the \
             characters on the next line:\n{}\n",
            set.surrounder
        ));
    }
    text.push_str("My request is:\n");

    let mut fields = Vec::with_capacity(set.relations().len());
    for (idx, relation) in set.relations().iter().enumerate() {
        let inline = set.inline_specificity(relation);
        text.push_str(&relation_block(set, relation, idx, inline));
        fields.push(
            ShapeField::new(relation.relation.clone(), relation.multi, inline)
                .with_remap(relation.response_remap.clone()),
        );
    }

    if !text.contains(ph.concept.as_str()) {
        text = format!(
            "\nThis prompt relates to the term or phrase at the end of this prompt. If the \
             prompt asks for a string, remember that the string may or may not be the string \
             representation of a number, depending on what the prompt asks for.\n{}\nThe term \
             or phrase is: {}\n",
            text, ph.concept
        );
    }

    let instructions = needs_specificity_instructions(set).then_some(set.specificity.instructions.as_str());
    let text = ph.fill(&text, &[(PlaceholderKey::Specificity, instructions)])?;

    Ok(PromptTemplate {
        text,
        shape: ResponseShape {
            fields,
            json: set.json_output,
            separator: set.separator,
            surrounder: set.surrounder.clone(),
            case_change: set.case_change,
        },
        placeholders: ph.clone(),
    })
}

/// Specificity instructions are only kept when some relation reports its
/// score inline, or the whole set is a specificity lookup.
fn needs_specificity_instructions(set: &RelationSetSpec) -> bool {
    set.specificity.source == SpecificitySource::PureSpecificity
        || set.relations().iter().any(|r| set.inline_specificity(r))
}

fn relation_block(set: &RelationSetSpec, rel: &RelationSpec, idx: usize, inline: bool) -> String {
    let sep = set.separator.name();
    let name = &rel.relation;
    let prompt = &rel.prompt;

    match (rel.multi, inline, set.json_output) {
        (true, true, true) => format!(
            "\nKey: {name}\nValue: The value for this key is itself a dictionary where each key \
             is a string and each value is a float denoting the specificity of the key. Each key \
             is in prioritized order and is the response to: {prompt}"
        ),
        (true, true, false) => format!(
            "\nRequest response #{idx}: Provide a {sep}-delimited list in prioritized order that \
             is the response to: {prompt}\nRequest response #{idx}b: Provide a {sep}-delimited \
             list containing the specificity of each corresponding item in response #{idx}."
        ),
        (true, false, true) => format!(
            "\nKey: {name}\nValue: The value for this key is itself a dictionary where each key \
             is a string and each value is null. Each key, in prioritized order, is the response \
             to: {prompt}"
        ),
        (true, false, false) => format!(
            "\nRequest response #{idx}: Provide a {sep}-delimited list in prioritized order that \
             is the response to: {prompt}"
        ),
        (false, true, true) => format!(
            "\nKey: {name}\nValue: The value for this key is itself a dictionary with a single \
             string key with a value that is a float denoting the specificity of the key. The key \
             is the response to: {prompt}"
        ),
        (false, true, false) => format!(
            "\nRequest response #{idx}: Provide a string that is the response to: {prompt}\n\
             Request response #{idx}b: Provide a string that is the specificity of the item in \
             response #{idx}"
        ),
        (false, false, true) => format!(
            "\nKey: {name}\nValue: The value for this key is itself a dictionary with a single \
             key that is a string and a value of that key is null. Make the key of the dictionary \
             NOT the term at the end of the prompt but instead your answer to the following: \
             {prompt}"
        ),
        (false, false, false) => format!(
            "\nRequest response #{idx}: Provide a string that is the response to: {prompt}"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ontoloom_core::{defaults, CaseChange, Separator, SpecificitySettings};

    fn symptoms_set(json: bool) -> RelationSetSpec {
        RelationSetSpec::new("symptoms")
            .with_json_output(json)
            .with_relation(
                RelationSpec::new("has_symptom", "What symptoms does it cause?")
                    .with_min_specificity(7.0),
            )
            .unwrap()
            .with_relation(RelationSpec::new("onset", "How fast is the onset?").single())
            .unwrap()
    }

    #[test]
    fn test_json_prompt_layout() {
        let t = build(&symptoms_set(true)).unwrap();
        assert!(t.text.starts_with("\nThis prompt relates to the term or phrase"));
        assert!(t.text.contains("Please provide results as a json dictionary"));
        assert!(t.text.contains("My request is:\n"));
        assert!(t.text.contains(
            "Key: has_symptom\nValue: The value for this key is itself a dictionary where each key is a string and each value is a float"
        ));
        assert!(t.text.contains("Make the key of the dictionary NOT the term"));
        assert!(t.text.ends_with("The term or phrase is: <<<concept>>>\n"));
        // has_symptom reports specificity inline, so instructions are kept
        assert!(t.text.contains(defaults::SPECIFICITY_INSTRUCTIONS));
        assert!(!t.text.contains(defaults::PLACEHOLDER_SPECIFICITY));
    }

    #[test]
    fn test_shape_matches_relations() {
        let t = build(&symptoms_set(true)).unwrap();
        assert!(t.shape.json);
        assert_eq!(t.shape.fields.len(), 2);
        assert_eq!(t.shape.fields[0], ShapeField::new("has_symptom", true, true));
        assert_eq!(t.shape.fields[1], ShapeField::new("onset", false, false));
    }

    #[test]
    fn test_delimited_prompt_numbers_requests() {
        let t = build(&symptoms_set(false)).unwrap();
        assert!(t.text.contains("surround the response at the beginning of the line"));
        assert!(t.text.contains("\n__resp__\n"));
        assert!(t.text.contains(
            "Request response #0: Provide a tab-delimited list in prioritized order that is the response to: What symptoms does it cause?"
        ));
        assert!(t.text.contains("Request response #0b: Provide a tab-delimited list containing the specificity"));
        assert!(t.text.contains("Request response #1: Provide a string that is the response to: How fast is the onset?"));
        assert!(!t.text.contains("#1b"));
    }

    #[test]
    fn test_specificity_placeholder_removed_when_unused() {
        let set = RelationSetSpec::new("plain")
            .with_relation(RelationSpec::new("treated_by", "What treats it?"))
            .unwrap();
        let t = build(&set).unwrap();
        assert!(!t.text.contains(defaults::SPECIFICITY_INSTRUCTIONS));
        assert!(!t.text.contains(defaults::PLACEHOLDER_SPECIFICITY));
    }

    #[test]
    fn test_second_response_source_keeps_specificity_out_of_prompt() {
        let set = RelationSetSpec::new("plain")
            .with_specificity_source(SpecificitySource::LlmSecondResponse)
            .with_relation(RelationSpec::new("treated_by", "What treats it?").with_min_specificity(7.0))
            .unwrap();
        let t = build(&set).unwrap();
        assert!(!t.shape.fields[0].inline_specificity);
        assert!(!t.text.contains(defaults::SPECIFICITY_INSTRUCTIONS));
    }

    #[test]
    fn test_pure_specificity_set_keeps_instructions() {
        let set = RelationSetSpec::new("scale")
            .with_specificity_source(SpecificitySource::PureSpecificity)
            .with_relation(RelationSpec::new("beceptivity_result", "Give the specificity.").single())
            .unwrap();
        let t = build(&set).unwrap();
        assert!(t.text.contains(defaults::SPECIFICITY_INSTRUCTIONS));
    }

    #[test]
    fn test_concept_in_relation_prompt_skips_wrapping() {
        let set = RelationSetSpec::new("inline")
            .with_relation(RelationSpec::new("causes", "What does <<<concept>>> cause?"))
            .unwrap();
        let t = build(&set).unwrap();
        assert!(!t.text.contains("The term or phrase is:"));
        let rendered = t
            .render(&[(PlaceholderKey::Concept, Some("fever"))])
            .unwrap();
        assert!(rendered.contains("What does fever cause?"));
    }

    #[test]
    fn test_adding_relation_regenerates_prompt() {
        let mut set = RelationSetSpec::new("grow");
        set.add(RelationSpec::new("a", "first?")).unwrap();
        let before = build(&set).unwrap();
        set.add(RelationSpec::new("b", "second?")).unwrap();
        let after = build(&set).unwrap();
        assert!(!before.text.contains("second?"));
        assert!(after.text.contains("second?"));
        assert_eq!(after.shape.fields.len(), 2);
    }

    #[test]
    fn test_incomplete_specificity_settings_is_config_error() {
        let settings = SpecificitySettings {
            instructions: String::new(),
            ..Default::default()
        };
        let set = RelationSetSpec::new("broken")
            .with_specificity(settings)
            .with_relation(RelationSpec::new("a", "first?").with_min_specificity(5.0))
            .unwrap();
        assert!(matches!(build(&set), Err(Error::Config(_))));
    }

    #[test]
    fn test_empty_concept_placeholder_is_config_error() {
        let mut set = RelationSetSpec::new("broken")
            .with_relation(RelationSpec::new("a", "first?"))
            .unwrap();
        set.placeholders.concept = String::new();
        assert!(matches!(build(&set), Err(Error::Config(_))));
    }

    #[test]
    fn test_shape_carries_set_settings_and_remap() {
        let mut remap = std::collections::BTreeMap::new();
        remap.insert("1".to_string(), "acute".to_string());
        let set = RelationSetSpec::new("s")
            .with_separator(Separator::Pipe)
            .with_case_change(CaseChange::None)
            .with_relation(RelationSpec::new("onset", "1 or 2?").single().with_response_remap(remap.clone()))
            .unwrap();
        let t = build(&set).unwrap();
        assert_eq!(t.shape.separator, Separator::Pipe);
        assert_eq!(t.shape.case_change, CaseChange::None);
        assert_eq!(t.shape.fields[0].remap, Some(remap));
    }
}
