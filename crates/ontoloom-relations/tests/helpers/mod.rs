//! Shared fixtures for relation population tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use uuid::Uuid;

use ontoloom_inference::MockLlmBackend;
use ontoloom_relations::{
    ConceptItem, ConceptSelection, ConceptSelector, ExpansionPopulatorRecord,
    ExpansionRepository, LlmSession, NewTriple, PopulatorRecord, RelationRepository, Result,
    SavedTriple, SelectorType, SourceStr, SpecificityRepository, SpecificityScale, StatusSink,
    StrSelection, StringVectorRepository, Vector, VectorSlot,
};

/// In-memory stand-in for every store the populator talks to.
#[derive(Default)]
pub struct MemoryStore {
    items: Vec<ConceptItem>,
    sources: Vec<SourceStr>,
    state: Mutex<MemoryState>,
}

#[derive(Default)]
pub struct MemoryState {
    pub populators: HashMap<String, Uuid>,
    pub strings: HashMap<String, Uuid>,
    pub triples: Vec<NewTriple>,
    pub embedders: HashMap<String, Uuid>,
    pub vectors: HashMap<(Uuid, Uuid), (VectorSlot, Vector)>,
    pub scales: HashMap<String, Uuid>,
    pub scores: HashMap<(Uuid, String), f64>,
    pub score_lookups: usize,
    pub expansion_populators: HashMap<String, ExpansionPopulatorRecord>,
    /// (original string, populator) -> set id
    pub expansion_sets: HashMap<(Uuid, Uuid), Uuid>,
    /// (set, member string, priority) in insertion order
    pub expansion_members: Vec<(Uuid, Uuid, u32)>,
    pub set_summaries: HashMap<(Uuid, Uuid), Vector>,
    pub code_summary_calls: Vec<(StrSelection, Uuid)>,
}

impl MemoryStore {
    /// Store whose selector returns one coded item per term.
    pub fn with_terms(terms: &[&str]) -> Arc<Self> {
        let items = terms
            .iter()
            .enumerate()
            .map(|(i, t)| ConceptItem {
                code_id: Some(Uuid::new_v4()),
                code: Some(format!("C{:03}", i + 1)),
                text: t.to_string(),
            })
            .collect();
        Arc::new(Self {
            items,
            sources: Vec::new(),
            state: Mutex::default(),
        })
    }

    /// Store whose string selection returns one interned string per text.
    pub fn with_strs(texts: &[&str]) -> Arc<Self> {
        let mut strings = HashMap::new();
        let mut sources = Vec::new();
        for t in texts {
            let str_id = *strings.entry(t.to_string()).or_insert_with(Uuid::new_v4);
            sources.push(SourceStr {
                str_id,
                text: t.to_string(),
            });
        }
        Arc::new(Self {
            items: Vec::new(),
            sources,
            state: Mutex::new(MemoryState {
                strings,
                ..Default::default()
            }),
        })
    }

    /// Texts of the members of the set expanding `orig`, by priority.
    pub fn expansions_of(&self, orig: &str) -> Vec<String> {
        let state = self.state();
        let Some(orig_id) = state.strings.get(orig).copied() else {
            return Vec::new();
        };
        let set_ids: Vec<Uuid> = state
            .expansion_sets
            .iter()
            .filter(|((o, _), _)| *o == orig_id)
            .map(|(_, set)| *set)
            .collect();
        let mut members: Vec<(u32, Uuid)> = state
            .expansion_members
            .iter()
            .filter(|(set, _, _)| set_ids.contains(set))
            .map(|(_, str_id, priority)| (*priority, *str_id))
            .collect();
        members.sort();
        members
            .into_iter()
            .filter_map(|(_, id)| {
                state
                    .strings
                    .iter()
                    .find(|(_, v)| **v == id)
                    .map(|(k, _)| k.clone())
            })
            .collect()
    }

    pub fn state(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap()
    }
}

#[async_trait]
impl ConceptSelector for MemoryStore {
    async fn select(&self, _selection: &ConceptSelection) -> Result<Vec<ConceptItem>> {
        Ok(self.items.clone())
    }
}

#[async_trait]
impl RelationRepository for MemoryStore {
    async fn register_populator(&self, populator: &PopulatorRecord) -> Result<Uuid> {
        let mut state = self.state();
        Ok(*state
            .populators
            .entry(populator.name.clone())
            .or_insert_with(Uuid::new_v4))
    }

    async fn has_relations(&self, subject_code_id: Uuid, populator_id: Uuid) -> Result<bool> {
        Ok(self
            .state()
            .triples
            .iter()
            .any(|t| t.subject_code_id == subject_code_id && t.populator_id == populator_id))
    }

    async fn save_triple(&self, triple: &NewTriple) -> Result<SavedTriple> {
        let mut state = self.state();
        let object_str_id = *state
            .strings
            .entry(triple.object.clone())
            .or_insert_with(Uuid::new_v4);
        state.triples.push(triple.clone());
        Ok(SavedTriple {
            triple_id: Uuid::new_v4(),
            object_str_id,
        })
    }
}

#[async_trait]
impl StringVectorRepository for MemoryStore {
    async fn register_embedder(&self, name: &str, _model: &str, _dimension: usize) -> Result<Uuid> {
        Ok(*self
            .state()
            .embedders
            .entry(name.to_string())
            .or_insert_with(Uuid::new_v4))
    }

    async fn has_vector(&self, str_id: Uuid, embedder_id: Uuid) -> Result<bool> {
        Ok(self.state().vectors.contains_key(&(str_id, embedder_id)))
    }

    async fn store_vector(
        &self,
        str_id: Uuid,
        embedder_id: Uuid,
        slot: VectorSlot,
        vector: Vector,
    ) -> Result<()> {
        self.state()
            .vectors
            .insert((str_id, embedder_id), (slot, vector));
        Ok(())
    }
}

#[async_trait]
impl SpecificityRepository for MemoryStore {
    async fn register_scale(&self, scale: &SpecificityScale) -> Result<Uuid> {
        Ok(*self
            .state()
            .scales
            .entry(scale.name.clone())
            .or_insert_with(Uuid::new_v4))
    }

    async fn lookup(&self, scale_id: Uuid, text: &str) -> Result<Option<f64>> {
        let mut state = self.state();
        state.score_lookups += 1;
        Ok(state.scores.get(&(scale_id, text.to_string())).copied())
    }

    async fn record(&self, scale_id: Uuid, text: &str, value: f64) -> Result<()> {
        self.state().scores.insert((scale_id, text.to_string()), value);
        Ok(())
    }
}

#[async_trait]
impl ExpansionRepository for MemoryStore {
    async fn register_expansion_populator(
        &self,
        record: &ExpansionPopulatorRecord,
    ) -> Result<Uuid> {
        let mut state = self.state();
        state
            .expansion_populators
            .insert(record.name.clone(), record.clone());
        Ok(*state
            .populators
            .entry(format!("expansion:{}", record.name))
            .or_insert_with(Uuid::new_v4))
    }

    async fn select_strs(&self, _selection: &StrSelection) -> Result<Vec<SourceStr>> {
        Ok(self.sources.clone())
    }

    async fn ensure_set(&self, orig_str_id: Uuid, populator_id: Uuid) -> Result<Uuid> {
        Ok(*self
            .state()
            .expansion_sets
            .entry((orig_str_id, populator_id))
            .or_insert_with(Uuid::new_v4))
    }

    async fn has_expansions(&self, set_id: Uuid) -> Result<bool> {
        Ok(self
            .state()
            .expansion_members
            .iter()
            .any(|(set, _, _)| *set == set_id))
    }

    async fn add_expansion(&self, set_id: Uuid, text: &str, priority: u32) -> Result<Uuid> {
        let mut state = self.state();
        let str_id = *state
            .strings
            .entry(text.to_string())
            .or_insert_with(Uuid::new_v4);
        if !state
            .expansion_members
            .iter()
            .any(|(set, s, _)| *set == set_id && *s == str_id)
        {
            state.expansion_members.push((set_id, str_id, priority));
        }
        Ok(str_id)
    }

    /// Mean over the original and its members, once all have vectors.
    async fn summarize_sets(&self, populator_id: Uuid, embedder_id: Uuid) -> Result<u64> {
        let mut state = self.state();
        let sets: Vec<(Uuid, Uuid)> = state
            .expansion_sets
            .iter()
            .filter(|((_, p), _)| *p == populator_id)
            .map(|((orig, _), set)| (*orig, *set))
            .collect();
        let mut written = 0;
        for (orig, set) in sets {
            if state.set_summaries.contains_key(&(set, embedder_id)) {
                continue;
            }
            let mut ids = vec![orig];
            ids.extend(
                state
                    .expansion_members
                    .iter()
                    .filter(|(s, _, _)| *s == set)
                    .map(|(_, id, _)| *id),
            );
            if ids.len() == 1 {
                continue;
            }
            let vectors: Option<Vec<Vec<f32>>> = ids
                .iter()
                .map(|id| {
                    state
                        .vectors
                        .get(&(*id, embedder_id))
                        .map(|(_, v)| v.as_slice().to_vec())
                })
                .collect();
            let Some(vectors) = vectors else { continue };
            let n = vectors.len() as f32;
            let mut mean = vec![0.0f32; vectors[0].len()];
            for v in &vectors {
                for (m, x) in mean.iter_mut().zip(v) {
                    *m += x / n;
                }
            }
            state
                .set_summaries
                .insert((set, embedder_id), Vector::from(mean));
            written += 1;
        }
        Ok(written)
    }

    async fn summarize_codes(&self, selection: &StrSelection, embedder_id: Uuid) -> Result<u64> {
        let mut state = self.state();
        state
            .code_summary_calls
            .push((selection.clone(), embedder_id));
        Ok(self.sources.len() as u64)
    }
}

/// Status sink collecting every line.
#[derive(Default)]
pub struct CollectingSink {
    pub lines: Mutex<Vec<String>>,
}

impl CollectingSink {
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }
}

impl StatusSink for CollectingSink {
    fn emit_status(&self, message: &str) {
        self.lines.lock().unwrap().push(message.to_string());
    }
}

/// Session over a mock backend with no retry delay.
pub fn session(backend: &MockLlmBackend, max_spend: f64) -> Arc<LlmSession> {
    Arc::new(
        LlmSession::new(Arc::new(backend.clone()), max_spend)
            .with_retry(1, std::time::Duration::ZERO),
    )
}

pub fn terminology(name: &str) -> ConceptSelection {
    ConceptSelection {
        selector_type: SelectorType::Terminology,
        value: name.to_string(),
    }
}
