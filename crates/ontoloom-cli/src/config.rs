//! YAML run definitions.
//!
//! A populator file names the concept selection and either embeds its
//! relation set or points at a relation-set file:
//!
//! ```yaml
//! name: disease_findings_v1
//! selection:
//!   selector_type: code_set
//!   value: conditions
//! relation_set: relation_sets/findings.yaml
//! llm:
//!   backend: openai
//!   gen_model: gpt-4o-mini
//!   max_spend: 2.50
//! embedder:
//!   name: mini
//!   backend: ollama
//!   embed_model: all-minilm
//! ```
//!
//! Relative paths resolve against the directory of the file that names them.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use ontoloom_core::{
    defaults, ConceptSelection, Error, ExpansionDefinition, MatchQuerySpec, RelationSetSpec,
    Result, StrSelection, StrSelectorType,
};
use ontoloom_inference::{EmbedderConfig, LlmConfig};
use ontoloom_relations::PopulatorDefinition;

fn read_yaml<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("cannot read {}: {}", path.display(), e))
    })?;
    Ok(serde_yaml::from_str(&text)?)
}

fn base_dir(path: &Path) -> PathBuf {
    path.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Load and validate a relation-set file.
pub fn load_relation_set(path: &Path) -> Result<RelationSetSpec> {
    let set: RelationSetSpec = read_yaml(path)?;
    set.validate()?;
    Ok(set)
}

/// A relation set given inline or by file path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RelationSetConfig {
    Path(PathBuf),
    Inline(RelationSetSpec),
}

impl RelationSetConfig {
    pub fn resolve(&self, base: &Path) -> Result<RelationSetSpec> {
        match self {
            RelationSetConfig::Path(path) if path.is_absolute() => load_relation_set(path),
            RelationSetConfig::Path(path) => load_relation_set(&base.join(path)),
            RelationSetConfig::Inline(set) => {
                set.validate()?;
                Ok(set.clone())
            }
        }
    }
}

fn default_fail_fast() -> bool {
    true
}

fn default_report_increment() -> usize {
    defaults::PROGRESS_REPORT_INCREMENT
}

/// A populator file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PopulatorConfig {
    pub name: String,
    pub selection: ConceptSelection,
    pub relation_set: RelationSetConfig,
    #[serde(default)]
    pub notes: Option<String>,
    /// Generation backend; falls back to `LLM_BACKEND` and friends.
    #[serde(default)]
    pub llm: Option<LlmConfig>,
    /// Embedder for persisted object strings.
    #[serde(default)]
    pub embedder: Option<EmbedderConfig>,
    #[serde(default = "default_fail_fast")]
    pub fail_fast: bool,
    #[serde(default = "default_report_increment")]
    pub report_increment: usize,
    #[serde(skip)]
    base: PathBuf,
}

impl PopulatorConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let mut config: Self = read_yaml(path)?;
        config.base = base_dir(path);
        if config.name.trim().is_empty() {
            return Err(Error::Config(format!(
                "populator in {} has an empty name",
                path.display()
            )));
        }
        Ok(config)
    }

    /// The run definition with its relation set loaded.
    pub fn definition(&self) -> Result<PopulatorDefinition> {
        Ok(PopulatorDefinition {
            name: self.name.clone(),
            selection: self.selection.clone(),
            relation_set: self.relation_set.resolve(&self.base)?,
            notes: self.notes.clone(),
        })
    }

    pub fn llm_config(&self) -> Result<LlmConfig> {
        match &self.llm {
            Some(llm) => {
                llm.validate()?;
                Ok(llm.clone())
            }
            None => LlmConfig::from_env(),
        }
    }
}

/// A matcher file: the query spec plus engine settings.
///
/// ```yaml
/// from_populator_id: 0191e0c6-58b2-7c8e-9a51-6f1c2b3d4e5f
/// from_relation: may_be_caused_by
/// left_sources: [obj_main_str, obj_expansion_summary_vec]
/// right_sources: [code_main_str]
/// expansion_styles: [synonyms]
/// target_code_set: conditions
/// embedder_id: 0191e0c6-58b2-7c8e-9a51-6f1c2b3d4e60
/// distance_cutoff: 0.35
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatcherConfig {
    #[serde(flatten)]
    pub spec: MatchQuerySpec,
    #[serde(default)]
    pub distance_cutoff: Option<f64>,
    #[serde(default = "default_report_increment")]
    pub report_increment: usize,
}

impl MatcherConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let config: Self = read_yaml(path)?;
        config.spec.validate()?;
        if let Some(cutoff) = config.distance_cutoff {
            if !(cutoff > 0.0 && cutoff <= 2.0) {
                return Err(Error::Config(format!(
                    "distance_cutoff must be in (0, 2], got {}",
                    cutoff
                )));
            }
        }
        Ok(config)
    }
}

/// An expansion file: the run definition plus its model and embedder.
///
/// ```yaml
/// selection:
///   selector_type: rel
///   value: disease_findings_v1
/// style: simple
/// style_version: 1.0
/// embedder:
///   name: mini
///   backend: ollama
///   embed_model: all-minilm
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpansionConfig {
    #[serde(flatten)]
    pub definition: ExpansionDefinition,
    #[serde(default)]
    pub llm: Option<LlmConfig>,
    /// Embeds expansion strings and their originals for the summaries.
    pub embedder: EmbedderConfig,
    #[serde(default = "default_fail_fast")]
    pub fail_fast: bool,
    #[serde(default = "default_report_increment")]
    pub report_increment: usize,
}

impl ExpansionConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let config: Self = read_yaml(path)?;
        config.definition.validate()?;
        Ok(config)
    }

    pub fn llm_config(&self) -> Result<LlmConfig> {
        match &self.llm {
            Some(llm) => {
                llm.validate()?;
                Ok(llm.clone())
            }
            None => LlmConfig::from_env(),
        }
    }
}

/// A code summary file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeSummaryConfig {
    pub selection: StrSelection,
    pub embedder: EmbedderConfig,
    #[serde(default = "default_report_increment")]
    pub report_increment: usize,
}

impl CodeSummaryConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let config: Self = read_yaml(path)?;
        if config.selection.selector_type == StrSelectorType::Rel {
            return Err(Error::Config(format!(
                "{}: code summaries need a terminology or code_set selection",
                path.display()
            )));
        }
        Ok(config)
    }
}

/// Database settings read from the environment.
#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub url: String,
    pub schema: String,
}

impl DatabaseSettings {
    /// `DATABASE_URL` (required) and `ONTOLOOM_SCHEMA`.
    pub fn from_env() -> Result<Self> {
        let url = std::env::var("DATABASE_URL")
            .map_err(|_| Error::Config("DATABASE_URL is not set".into()))?;
        let schema =
            std::env::var("ONTOLOOM_SCHEMA").unwrap_or_else(|_| defaults::DB_SCHEMA.to_string());
        Ok(Self { url, schema })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ontoloom_core::{SelectorType, VectorSlot};
    use std::io::Write;

    const RELATION_SET: &str = r#"
name: causes
json_output: true
relations:
  - relation: may_be_caused_by
    prompt: "What can cause it?"
"#;

    fn write(dir: &Path, name: &str, text: &str) -> PathBuf {
        let path = dir.join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(text.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_populator_resolves_relative_relation_set() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sets")).unwrap();
        write(&dir.path().join("sets"), "causes.yaml", RELATION_SET);
        let path = write(
            dir.path(),
            "populator.yaml",
            r#"
name: causes_v1
selection:
  selector_type: code_set
  value: conditions
relation_set: sets/causes.yaml
llm:
  backend: mock
"#,
        );

        let config = PopulatorConfig::from_file(&path).unwrap();
        assert!(config.fail_fast);
        assert_eq!(config.selection.selector_type, SelectorType::CodeSet);

        let definition = config.definition().unwrap();
        assert_eq!(definition.relation_set.name, "causes");
        assert!(definition.relation_set.relation("may_be_caused_by").is_some());
        assert_eq!(config.llm_config().unwrap().backend.name(), "mock");
    }

    #[test]
    fn test_populator_accepts_inline_relation_set() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "populator.yaml",
            r#"
name: causes_inline
selection:
  selector_type: terminology
  value: ICD10
relation_set:
  name: causes
  relations:
    - relation: may_be_caused_by
      prompt: "What can cause it?"
fail_fast: false
"#,
        );

        let config = PopulatorConfig::from_file(&path).unwrap();
        assert!(!config.fail_fast);
        assert!(matches!(config.relation_set, RelationSetConfig::Inline(_)));
        assert_eq!(config.definition().unwrap().relation_set.name, "causes");
    }

    #[test]
    fn test_missing_relation_set_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "populator.yaml",
            "name: p\nselection:\n  selector_type: query\n  value: SELECT 1\nrelation_set: nowhere.yaml\n",
        );
        let config = PopulatorConfig::from_file(&path).unwrap();
        assert!(matches!(config.definition(), Err(Error::Config(_))));
    }

    #[test]
    fn test_matcher_config_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let populator = uuid::Uuid::new_v4();
        let embedder = uuid::Uuid::new_v4();
        let path = write(
            dir.path(),
            "matcher.yaml",
            &format!(
                "from_populator_id: {}\nfrom_relation: may_be_caused_by\nleft_sources: [obj_main_str]\nright_sources: [code_main_str]\ntarget_code_set: conditions\nembedder_id: {}\n",
                populator, embedder
            ),
        );

        let config = MatcherConfig::from_file(&path).unwrap();
        assert_eq!(config.spec.from_populator_id, populator);
        assert_eq!(config.spec.vector_slot, VectorSlot::Mean);
        assert_eq!(config.spec.top_hit_count, defaults::MATCH_TOP_HIT_COUNT);
        assert!(config.distance_cutoff.is_none());
    }

    #[test]
    fn test_matcher_cutoff_out_of_range() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "matcher.yaml",
            &format!(
                "from_populator_id: {}\nfrom_relation: r\nleft_sources: [obj_main_str]\nright_sources: [code_main_str]\ntarget_code_set: s\nembedder_id: {}\ndistance_cutoff: 3.5\n",
                uuid::Uuid::nil(),
                uuid::Uuid::nil()
            ),
        );
        assert!(matches!(MatcherConfig::from_file(&path), Err(Error::Config(_))));
    }

    #[test]
    fn test_expansion_config_flattens_definition() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "expansion.yaml",
            r#"
selection:
  selector_type: rel
  value: causes_v1
embedder:
  name: mini
  backend: mock
llm:
  backend: mock
"#,
        );

        let config = ExpansionConfig::from_file(&path).unwrap();
        assert_eq!(config.definition.style, "simple");
        assert_eq!(
            config.definition.populator_name(),
            "causes_v1_simple_1.0_expansion_set"
        );
        assert_eq!(config.embedder.name, "mini");
        assert!(config.fail_fast);
        assert_eq!(config.llm_config().unwrap().backend.name(), "mock");
    }

    #[test]
    fn test_expansion_config_rejects_style_without_prompt() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "expansion.yaml",
            "selection:\n  selector_type: code_set\n  value: c\nstyle: lay\nembedder:\n  name: m\n  backend: mock\n",
        );
        assert!(matches!(ExpansionConfig::from_file(&path), Err(Error::Config(_))));
    }

    #[test]
    fn test_code_summary_config_rejects_rel_selection() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "summary.yaml",
            "selection:\n  selector_type: rel\n  value: causes_v1\nembedder:\n  name: m\n  backend: mock\n",
        );
        assert!(matches!(CodeSummaryConfig::from_file(&path), Err(Error::Config(_))));
    }
}
