//! Domain models for relation population and candidate matching.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::defaults;
use crate::error::{Error, Result};

/// Embedding vector type (re-exported from pgvector).
pub use pgvector::Vector;

// =============================================================================
// ENUMERATIONS
// =============================================================================

/// Case normalisation applied to returned object strings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseChange {
    #[default]
    Lower,
    Upper,
    None,
}

impl CaseChange {
    pub fn apply(&self, s: &str) -> String {
        match self {
            CaseChange::Lower => s.to_lowercase(),
            CaseChange::Upper => s.to_uppercase(),
            CaseChange::None => s.to_string(),
        }
    }
}

/// Separator token for delimited (non-JSON) output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Separator {
    #[default]
    Tab,
    Pipe,
    Comma,
}

impl Separator {
    /// Name used inside prompt text ("a tab-delimited list").
    pub fn name(&self) -> &'static str {
        match self {
            Separator::Tab => "tab",
            Separator::Pipe => "pipe",
            Separator::Comma => "comma",
        }
    }

    /// Character that splits list items.
    pub fn token(&self) -> char {
        match self {
            Separator::Tab => '\t',
            Separator::Pipe => '|',
            Separator::Comma => ',',
        }
    }
}

/// Where a specificity score comes from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SpecificitySource {
    /// Inline with the relation response.
    #[default]
    #[serde(rename = "llm_response")]
    LlmResponse,
    /// A second LLM lookup keyed by string.
    #[serde(rename = "llm_2nd_response")]
    LlmSecondResponse,
    /// A direct store query (no implementation).
    #[serde(rename = "query")]
    Query,
    /// The relation set itself is a specificity lookup.
    #[serde(rename = "is_pure_beceptivity")]
    PureSpecificity,
}

/// Rule reducing repeated confirmation samples to one verdict.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AdjudicationRule {
    #[default]
    #[serde(rename = "vote")]
    Vote,
    #[serde(rename = "avg")]
    Average,
    #[serde(rename = "sum")]
    Sum,
    #[serde(rename = "categorical")]
    Categorical,
}

impl FromStr for AdjudicationRule {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "vote" => Ok(Self::Vote),
            "avg" | "average" => Ok(Self::Average),
            "sum" => Ok(Self::Sum),
            "categorical" => Ok(Self::Categorical),
            other => Err(Error::Config(format!("unknown adjudication rule '{}'", other))),
        }
    }
}

impl fmt::Display for AdjudicationRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Vote => "vote",
            Self::Average => "avg",
            Self::Sum => "sum",
            Self::Categorical => "categorical",
        };
        f.write_str(s)
    }
}

/// How subject concepts are selected for a full run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectorType {
    Terminology,
    CodeSet,
    Query,
}

impl FromStr for SelectorType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "terminology" => Ok(Self::Terminology),
            "code_set" => Ok(Self::CodeSet),
            "query" => Ok(Self::Query),
            other => Err(Error::Config(format!("unknown selector type '{}'", other))),
        }
    }
}

/// Which strings an expansion run expands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrSelectorType {
    /// Main and other strings of every code in a terminology.
    Terminology,
    /// Main and other strings of every code in a code set.
    CodeSet,
    /// Object strings written by a relation populator, by populator name.
    Rel,
}

impl StrSelectorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Terminology => "terminology",
            Self::CodeSet => "code_set",
            Self::Rel => "rel",
        }
    }
}

/// Vector slot compared by the matching engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VectorSlot {
    Cls,
    #[default]
    Mean,
}

impl VectorSlot {
    /// Column holding this slot in `str_vectors`.
    pub fn column(&self) -> &'static str {
        match self {
            VectorSlot::Cls => "cls",
            VectorSlot::Mean => "mean",
        }
    }
}

impl FromStr for VectorSlot {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "cls" => Ok(Self::Cls),
            "mean" => Ok(Self::Mean),
            other => Err(Error::Config(format!("unknown vector type '{}'", other))),
        }
    }
}

/// Left-side (extracted object string) vector sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeftSource {
    ObjMainStr,
    ObjExpansionSummaryVec,
}

/// Right-side (target code) vector sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RightSource {
    CodeMainStr,
    CodeOtherStrs,
    CodeSummaryVec,
    CodeExpansionSummaryVec,
}

impl FromStr for LeftSource {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "obj_main_str" => Ok(Self::ObjMainStr),
            "obj_expansion_summary_vec" => Ok(Self::ObjExpansionSummaryVec),
            other => Err(Error::Config(format!("unknown left vector source '{}'", other))),
        }
    }
}

impl FromStr for RightSource {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "code_main_str" => Ok(Self::CodeMainStr),
            "code_other_strs" => Ok(Self::CodeOtherStrs),
            "code_summary_vec" => Ok(Self::CodeSummaryVec),
            "code_expansion_summary_vec" => Ok(Self::CodeExpansionSummaryVec),
            other => Err(Error::Config(format!("unknown right vector source '{}'", other))),
        }
    }
}

// =============================================================================
// PLACEHOLDERS
// =============================================================================

/// Names of the substitutable prompt placeholders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlaceholderKey {
    Concept,
    Specificity,
    SubjStr,
    ObjStr,
    OrigPrompt,
}

/// Literal tokens standing in for each placeholder inside prompt text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Placeholders {
    pub concept: String,
    #[serde(rename = "beceptivity")]
    pub specificity: String,
    pub subj_str: String,
    pub obj_str: String,
    pub orig_prompt: String,
}

impl Default for Placeholders {
    fn default() -> Self {
        Self {
            concept: defaults::PLACEHOLDER_CONCEPT.to_string(),
            specificity: defaults::PLACEHOLDER_SPECIFICITY.to_string(),
            subj_str: defaults::PLACEHOLDER_SUBJ_STR.to_string(),
            obj_str: defaults::PLACEHOLDER_OBJ_STR.to_string(),
            orig_prompt: defaults::PLACEHOLDER_ORIG_PROMPT.to_string(),
        }
    }
}

impl Placeholders {
    pub fn token(&self, key: PlaceholderKey) -> &str {
        match key {
            PlaceholderKey::Concept => &self.concept,
            PlaceholderKey::Specificity => &self.specificity,
            PlaceholderKey::SubjStr => &self.subj_str,
            PlaceholderKey::ObjStr => &self.obj_str,
            PlaceholderKey::OrigPrompt => &self.orig_prompt,
        }
    }

    /// Substitute each given placeholder; `None` substitutes the empty string.
    ///
    /// Errors when a token is empty, since replacing "" would splice the
    /// value between every character of the prompt.
    pub fn fill(&self, template: &str, content: &[(PlaceholderKey, Option<&str>)]) -> Result<String> {
        let mut out = template.to_string();
        for (key, value) in content {
            let token = self.token(*key);
            if token.is_empty() {
                return Err(Error::Config(format!(
                    "placeholder {:?} has an empty token",
                    key
                )));
            }
            out = out.replace(token, value.unwrap_or(""));
        }
        Ok(out)
    }
}

// =============================================================================
// RELATION SPECIFICATIONS
// =============================================================================

fn default_true() -> bool {
    true
}

fn default_max_loops() -> u32 {
    defaults::SPECIFICITY_MAX_LOOPS
}

fn default_val_if_error() -> f64 {
    defaults::CONFIRMATION_VAL_IF_ERROR
}

/// One requested relation type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationSpec {
    /// Relation name; also the response key.
    pub relation: String,
    /// Prompt asking for the objects of this relation.
    pub prompt: String,
    /// Multiple objects (true) or a single object (false).
    #[serde(default = "default_true")]
    pub multi: bool,
    /// Minimum acceptable specificity; 0 disables refinement.
    #[serde(default)]
    pub min_specificity: f64,
    /// Refinement loop bound.
    #[serde(default = "default_max_loops")]
    pub max_loops: u32,
    #[serde(default = "default_true")]
    pub assume_adequate_on_max_loop: bool,
    /// Number of confirmation samples; 0 disables confirmation.
    #[serde(default)]
    pub confirmation_count: u32,
    #[serde(default)]
    pub adjudication: AdjudicationRule,
    /// Confirmation prompt using the subject/object placeholders.
    #[serde(default)]
    pub confirmation_prompt: Option<String>,
    /// Sample value substituted on failure or failed coercion.
    #[serde(default = "default_val_if_error")]
    pub val_if_error: f64,
    /// Remaps the single returned key to stored text.
    #[serde(default)]
    pub response_remap: Option<BTreeMap<String, String>>,
    /// Capture the answer in the prompt but never persist it.
    #[serde(default)]
    pub no_write: bool,
    /// Replaces the default refinement prompt; must contain the object placeholder.
    #[serde(default)]
    pub more_specific_prompt: Option<String>,
}

impl RelationSpec {
    pub fn new(relation: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            relation: relation.into(),
            prompt: prompt.into(),
            multi: true,
            min_specificity: 0.0,
            max_loops: defaults::SPECIFICITY_MAX_LOOPS,
            assume_adequate_on_max_loop: true,
            confirmation_count: 0,
            adjudication: AdjudicationRule::Vote,
            confirmation_prompt: None,
            val_if_error: defaults::CONFIRMATION_VAL_IF_ERROR,
            response_remap: None,
            no_write: false,
            more_specific_prompt: None,
        }
    }

    pub fn single(mut self) -> Self {
        self.multi = false;
        self
    }

    pub fn with_min_specificity(mut self, min: f64) -> Self {
        self.min_specificity = min;
        self
    }

    pub fn with_max_loops(mut self, loops: u32) -> Self {
        self.max_loops = loops;
        self
    }

    pub fn with_assume_adequate_on_max_loop(mut self, assume: bool) -> Self {
        self.assume_adequate_on_max_loop = assume;
        self
    }

    pub fn with_confirmation(
        mut self,
        count: u32,
        rule: AdjudicationRule,
        prompt: impl Into<String>,
    ) -> Self {
        self.confirmation_count = count;
        self.adjudication = rule;
        self.confirmation_prompt = Some(prompt.into());
        self
    }

    pub fn with_val_if_error(mut self, val: f64) -> Self {
        self.val_if_error = val;
        self
    }

    pub fn with_response_remap(mut self, remap: BTreeMap<String, String>) -> Self {
        self.response_remap = Some(remap);
        self
    }

    pub fn with_more_specific_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.more_specific_prompt = Some(prompt.into());
        self
    }

    pub fn no_write(mut self) -> Self {
        self.no_write = true;
        self
    }

    /// Whether the refinement loop engages for this relation.
    pub fn needs_specificity(&self) -> bool {
        self.min_specificity > 0.0
    }

    /// Check field combinations that can be rejected before any LLM call.
    pub fn validate(&self) -> Result<()> {
        if self.relation.trim().is_empty() {
            return Err(Error::Config("relation name must not be empty".into()));
        }
        if self.confirmation_count > 0
            && self
                .confirmation_prompt
                .as_deref()
                .map_or(true, |p| p.trim().is_empty())
        {
            return Err(Error::Config(format!(
                "relation '{}' asks for {} confirmations but has no confirmation prompt",
                self.relation, self.confirmation_count
            )));
        }
        if self.multi && self.response_remap.is_some() {
            return Err(Error::Config(format!(
                "relation '{}' has a response remap table, which requires a single response",
                self.relation
            )));
        }
        if self.needs_specificity() && self.max_loops == 0 {
            return Err(Error::Config(format!(
                "relation '{}' sets a minimum specificity but allows zero refinement loops",
                self.relation
            )));
        }
        Ok(())
    }
}

/// Shared specificity settings of a relation set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpecificitySettings {
    pub source: SpecificitySource,
    pub instructions: String,
    pub max_val: f64,
    pub cutoff: f64,
    pub val_if_none: f64,
    /// Scale name; keys persisted specificity records.
    pub scale_name: String,
}

impl Default for SpecificitySettings {
    fn default() -> Self {
        Self {
            source: SpecificitySource::LlmResponse,
            instructions: defaults::SPECIFICITY_INSTRUCTIONS.to_string(),
            max_val: defaults::SPECIFICITY_MAX_VAL,
            cutoff: defaults::SPECIFICITY_CUTOFF,
            val_if_none: defaults::SPECIFICITY_VAL_IF_NONE,
            scale_name: defaults::SPECIFICITY_SCALE_NAME.to_string(),
        }
    }
}

impl SpecificitySettings {
    /// Whether every field a specificity request needs is present.
    pub fn is_complete(&self) -> bool {
        !self.instructions.trim().is_empty()
            && self.max_val > 0.0
            && self.cutoff > 0.0
            && !self.scale_name.trim().is_empty()
    }
}

/// Ordered collection of relation specs plus shared prompt settings.
///
/// Prompt text is never stored; it is derived from the fields whenever it is
/// needed, so adding a relation can never leave a stale prompt behind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationSetSpec {
    pub name: String,
    relations: Vec<RelationSpec>,
    #[serde(default)]
    pub case_change: CaseChange,
    #[serde(default)]
    pub json_output: bool,
    #[serde(default)]
    pub separator: Separator,
    #[serde(default = "default_surrounder")]
    pub surrounder: String,
    #[serde(default = "default_instructions")]
    pub instructions: String,
    #[serde(default)]
    pub specificity: SpecificitySettings,
    #[serde(default)]
    pub placeholders: Placeholders,
}

fn default_surrounder() -> String {
    defaults::RESPONSE_SURROUNDER.to_string()
}

fn default_instructions() -> String {
    defaults::INSTRUCTIONS.to_string()
}

impl RelationSetSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            relations: Vec::new(),
            case_change: CaseChange::Lower,
            json_output: false,
            separator: Separator::Tab,
            surrounder: default_surrounder(),
            instructions: default_instructions(),
            specificity: SpecificitySettings::default(),
            placeholders: Placeholders::default(),
        }
    }

    /// Start an empty set that inherits every shared setting of `self`.
    pub fn derive(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            relations: Vec::new(),
            ..self.clone()
        }
    }

    /// Start an empty set that inherits only the output format: JSON or
    /// delimited lines, separator, surrounder and placeholders. Instructions,
    /// case change and specificity settings are the defaults.
    pub fn derive_output(&self, name: impl Into<String>) -> Self {
        Self {
            json_output: self.json_output,
            separator: self.separator,
            surrounder: self.surrounder.clone(),
            placeholders: self.placeholders.clone(),
            ..Self::new(name)
        }
    }

    pub fn with_json_output(mut self, json: bool) -> Self {
        self.json_output = json;
        self
    }

    pub fn with_case_change(mut self, case_change: CaseChange) -> Self {
        self.case_change = case_change;
        self
    }

    pub fn with_separator(mut self, separator: Separator) -> Self {
        self.separator = separator;
        self
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = instructions.into();
        self
    }

    pub fn with_specificity(mut self, settings: SpecificitySettings) -> Self {
        self.specificity = settings;
        self
    }

    pub fn with_specificity_source(mut self, source: SpecificitySource) -> Self {
        self.specificity.source = source;
        self
    }

    /// Append a relation after validating it.
    pub fn add(&mut self, relation: RelationSpec) -> Result<()> {
        relation.validate()?;
        if self.relations.iter().any(|r| r.relation == relation.relation) {
            return Err(Error::Config(format!(
                "relation '{}' appears twice in set '{}'",
                relation.relation, self.name
            )));
        }
        self.relations.push(relation);
        Ok(())
    }

    /// Builder form of [`add`](Self::add).
    pub fn with_relation(mut self, relation: RelationSpec) -> Result<Self> {
        self.add(relation)?;
        Ok(self)
    }

    pub fn relations(&self) -> &[RelationSpec] {
        &self.relations
    }

    pub fn relation(&self, name: &str) -> Option<&RelationSpec> {
        self.relations.iter().find(|r| r.relation == name)
    }

    /// Whether a relation's specificity is expected inline with its objects.
    pub fn inline_specificity(&self, relation: &RelationSpec) -> bool {
        relation.needs_specificity() && self.specificity.source == SpecificitySource::LlmResponse
    }

    /// Validate every relation plus the set-level specificity settings.
    pub fn validate(&self) -> Result<()> {
        for (i, relation) in self.relations.iter().enumerate() {
            relation.validate()?;
            if self.relations[..i].iter().any(|r| r.relation == relation.relation) {
                return Err(Error::Config(format!(
                    "relation '{}' appears twice in set '{}'",
                    relation.relation, self.name
                )));
            }
            if relation.needs_specificity() && !self.specificity.is_complete() {
                return Err(Error::Config(format!(
                    "relation '{}' sets min specificity {} but the set lacks specificity \
                     instructions, max value, cutoff, or scale name",
                    relation.relation, relation.min_specificity
                )));
            }
        }
        Ok(())
    }
}

// =============================================================================
// CONCEPTS AND TRIPLES
// =============================================================================

/// Selector type plus its value (terminology name, code set name, or SQL).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConceptSelection {
    pub selector_type: SelectorType,
    pub value: String,
}

/// A subject under processing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConceptItem {
    /// Originating code id (full-run mode only).
    pub code_id: Option<Uuid>,
    /// Originating code value (full-run mode only).
    pub code: Option<String>,
    pub text: String,
}

impl ConceptItem {
    /// A literal test-mode subject with no backing code.
    pub fn literal(text: impl Into<String>) -> Self {
        Self {
            code_id: None,
            code: None,
            text: text.into(),
        }
    }
}

/// One object string returned by the model, with optional inline specificity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateObject {
    pub text: String,
    pub specificity: Option<f64>,
}

/// Final unit of output.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Triple {
    pub subject: String,
    pub relation: String,
    pub object: String,
    /// 1-based rank per (subject, relation) in emission order.
    pub priority: u32,
}

/// Registration of one relation population configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PopulatorRecord {
    /// Unique populator name.
    pub name: String,
    pub selection: ConceptSelection,
    /// Serialized relation set spec the run used.
    pub relation_set_json: String,
    pub model: String,
    pub notes: Option<String>,
}

/// Triple as written to the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTriple {
    pub subject_code_id: Uuid,
    pub populator_id: Uuid,
    pub populator_name: String,
    pub relation: String,
    pub object: String,
    pub priority: u32,
}

/// Ids produced by persisting a triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SavedTriple {
    pub triple_id: Uuid,
    pub object_str_id: Uuid,
}

/// A persisted specificity scale definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpecificityScale {
    pub name: String,
    pub prompt: String,
    pub min_val: f64,
    pub max_val: f64,
}

// =============================================================================
// MATCHING
// =============================================================================

fn default_top_hit_count() -> i64 {
    defaults::MATCH_TOP_HIT_COUNT
}

/// Declares the vector sources compared in one matching run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchQuerySpec {
    /// Relation population run whose objects are matched.
    pub from_populator_id: Uuid,
    /// Relation whose objects are matched.
    pub from_relation: String,
    pub left_sources: Vec<LeftSource>,
    pub right_sources: Vec<RightSource>,
    #[serde(default)]
    pub vector_slot: VectorSlot,
    /// Expansion-string styles admitted by expansion-summary sources.
    #[serde(default)]
    pub expansion_styles: Vec<String>,
    pub target_code_set: String,
    pub embedder_id: Uuid,
    #[serde(default = "default_top_hit_count")]
    pub top_hit_count: i64,
}

impl MatchQuerySpec {
    pub fn validate(&self) -> Result<()> {
        if self.left_sources.is_empty() {
            return Err(Error::Config("matching needs at least one left source".into()));
        }
        if self.right_sources.is_empty() {
            return Err(Error::Config("matching needs at least one right source".into()));
        }
        if self.top_hit_count < 2 {
            return Err(Error::Config(format!(
                "top_hit_count {} keeps no ranks (ranks below it are kept)",
                self.top_hit_count
            )));
        }
        Ok(())
    }

    pub fn has_left(&self, source: LeftSource) -> bool {
        self.left_sources.contains(&source)
    }

    pub fn has_right(&self, source: RightSource) -> bool {
        self.right_sources.contains(&source)
    }
}

/// One ranked row returned by the ranking query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedCandidate {
    pub code_id: Uuid,
    pub rank: i64,
    pub distance: f64,
}

/// Persisted match output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub matcher_id: Uuid,
    pub from_item_id: Uuid,
    pub matched_code_id: Uuid,
    pub rank: i64,
    pub distance: f64,
}

/// Value bound to a positional query parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum QueryParam {
    Text(String),
    Uuid(Uuid),
    Int(i64),
    Null,
}

/// SQL text with `$n` placeholders and the values to bind, in order.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundQuery {
    pub sql: String,
    pub params: Vec<QueryParam>,
}

// =============================================================================
// STRING EXPANSION
// =============================================================================

fn default_expansion_style() -> String {
    defaults::EXPANSION_STYLE.to_string()
}

fn default_expansion_style_version() -> f64 {
    defaults::EXPANSION_STYLE_VERSION
}

/// `1.0` renders as `1.0`, not `1`.
fn format_version(v: f64) -> String {
    if v.fract() == 0.0 && v.is_finite() {
        format!("{:.1}", v)
    } else {
        v.to_string()
    }
}

/// Strings selected for expansion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrSelection {
    pub selector_type: StrSelectorType,
    pub value: String,
}

/// One string picked by a [`StrSelection`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceStr {
    pub str_id: Uuid,
    pub text: String,
}

/// A styled expansion-string run over a string selection.
///
/// Each selected string gets one expansion set holding the alternative
/// versions the model returns for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpansionDefinition {
    /// Populator name; derived from selection and style when absent.
    #[serde(default)]
    pub name: Option<String>,
    pub selection: StrSelection,
    #[serde(default = "default_expansion_style")]
    pub style: String,
    #[serde(default = "default_expansion_style_version")]
    pub style_version: f64,
    /// Custom request text; must contain the concept placeholder.
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl ExpansionDefinition {
    pub fn new(selection: StrSelection) -> Self {
        Self {
            name: None,
            selection,
            style: default_expansion_style(),
            style_version: default_expansion_style_version(),
            prompt: None,
            notes: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_style(mut self, style: impl Into<String>, version: f64) -> Self {
        self.style = style.into();
        self.style_version = version;
        self
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }

    /// Registered populator name.
    pub fn populator_name(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!(
                "{}_{}_{}_expansion_set",
                self.selection.value,
                self.style,
                format_version(self.style_version)
            ),
        }
    }

    /// Response key the model fills with alternative versions.
    pub fn relation_name(&self) -> String {
        format!(
            "has_expansion_strs_{}_v{}",
            self.style,
            format_version(self.style_version)
        )
    }

    /// The request text: the custom prompt, or the built-in text of the style.
    pub fn request_prompt(&self) -> Result<String> {
        if let Some(prompt) = &self.prompt {
            return Ok(prompt.clone());
        }
        match self.style.as_str() {
            "simple" => Ok(format!(
                "{}{}",
                defaults::EXPANSION_PROMPT_START,
                defaults::EXPANSION_SIMPLE_PROMPT
            )),
            other => Err(Error::Config(format!(
                "expansion style '{}' has no built-in prompt; set one",
                other
            ))),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.style.trim().is_empty() {
            return Err(Error::Config("expansion style must not be empty".into()));
        }
        if self.selection.value.trim().is_empty() {
            return Err(Error::Config("expansion selection needs a value".into()));
        }
        if self.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
            return Err(Error::Config("expansion populator name must not be empty".into()));
        }
        if !self.style_version.is_finite() {
            return Err(Error::Config("expansion style_version must be finite".into()));
        }
        let prompt = self.request_prompt()?;
        if !prompt.contains(defaults::PLACEHOLDER_CONCEPT) {
            return Err(Error::Config(format!(
                "expansion prompt must contain {}",
                defaults::PLACEHOLDER_CONCEPT
            )));
        }
        Ok(())
    }
}

/// Registration of one expansion populator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpansionPopulatorRecord {
    pub name: String,
    pub selection: StrSelection,
    pub style: String,
    pub style_version: f64,
    pub prompt: String,
    pub model: String,
    pub notes: Option<String>,
}
