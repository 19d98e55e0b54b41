//! Expansion-string runs against a scripted model and in-memory store.

mod helpers;

use std::sync::Arc;

use helpers::{session, CollectingSink, MemoryStore};
use ontoloom_inference::{MockEmbeddingBackend, MockLlmBackend};
use ontoloom_relations::{
    defaults, CancellationFlag, CodeSummarizer, EmbeddingTarget, Error, ExpansionDefinition,
    ExpansionPopulator, StrSelection, StrSelectorType,
};

const RELATION: &str = "has_expansion_strs_simple_v1.0";

fn definition() -> ExpansionDefinition {
    ExpansionDefinition::new(StrSelection {
        selector_type: StrSelectorType::Rel,
        value: "causes_v1".into(),
    })
}

fn embedding(store: &Arc<MemoryStore>) -> EmbeddingTarget {
    EmbeddingTarget {
        name: "mock".into(),
        embedder: Arc::new(MockEmbeddingBackend::new(8)),
        vectors: store.clone(),
    }
}

fn populator(backend: &MockLlmBackend, store: &Arc<MemoryStore>) -> ExpansionPopulator {
    ExpansionPopulator::new(session(backend, 5.0), store.clone(), embedding(store))
}

fn reply(items: &[&str]) -> String {
    let keys: Vec<String> = items.iter().map(|i| format!("\"{}\": null", i)).collect();
    format!("{{\"{}\": {{{}}}}}", RELATION, keys.join(", "))
}

#[tokio::test]
async fn test_expansions_are_stored_embedded_and_summarized() {
    let store = MemoryStore::with_strs(&["heart attack"]);
    let backend = MockLlmBackend::new()
        .with_fixed_response(reply(&["Myocardial infarction", "Heart attack", "MI"]));

    let report = populator(&backend, &store)
        .populate(&definition(), &CancellationFlag::new())
        .await
        .unwrap();

    assert_eq!(report.populator_name, "causes_v1_simple_1.0_expansion_set");
    assert_eq!(report.processed, 1);
    // the echo of the original is dropped
    assert_eq!(report.expansions_written, 2);
    assert_eq!(report.vectors_written, 3);
    assert_eq!(report.summaries_written, 1);
    assert_eq!(
        store.expansions_of("heart attack"),
        vec!["myocardial infarction".to_string(), "mi".to_string()]
    );

    let prompt = &backend.get_calls()[0].prompt;
    assert!(prompt.contains(defaults::EXPANSION_PROMPT_START));
    assert!(prompt.contains("The term is: heart attack"));
    assert!(prompt.contains(&format!("Key: {}", RELATION)));

    let state = store.state();
    let record = &state.expansion_populators["causes_v1_simple_1.0_expansion_set"];
    assert_eq!(record.style, "simple");
    assert_eq!(record.model, "mock-llm");
    assert!(record.prompt.ends_with("The term is: <<<concept>>>"));
}

#[tokio::test]
async fn test_rerun_skips_sets_that_have_expansions() {
    let store = MemoryStore::with_strs(&["fever", "cough"]);
    let backend = MockLlmBackend::new().with_fixed_response(reply(&["pyrexia"]));
    let populator = populator(&backend, &store);

    let first = populator
        .populate(&definition(), &CancellationFlag::new())
        .await
        .unwrap();
    assert_eq!(first.processed, 2);
    assert_eq!(first.summaries_written, 2);

    let second = populator
        .populate(&definition(), &CancellationFlag::new())
        .await
        .unwrap();
    assert_eq!(second.populator_id, first.populator_id);
    assert_eq!(second.skipped, 2);
    assert_eq!(second.processed, 0);
    assert_eq!(second.summaries_written, 0);
    assert_eq!(backend.call_count(), 2);
}

#[tokio::test]
async fn test_empty_reply_leaves_set_open_for_next_run() {
    let store = MemoryStore::with_strs(&["fever"]);
    let backend = MockLlmBackend::new()
        .with_queued_response(reply(&[]))
        .with_fixed_response(reply(&["pyrexia"]));
    let populator = populator(&backend, &store);

    let first = populator
        .populate(&definition(), &CancellationFlag::new())
        .await
        .unwrap();
    assert_eq!(first.expansions_written, 0);
    assert_eq!(first.summaries_written, 0);

    let second = populator
        .populate(&definition(), &CancellationFlag::new())
        .await
        .unwrap();
    assert_eq!(second.skipped, 0);
    assert_eq!(second.summaries_written, 1);
    assert_eq!(store.expansions_of("fever"), vec!["pyrexia".to_string()]);
}

#[tokio::test]
async fn test_malformed_reply_stops_by_default() {
    let store = MemoryStore::with_strs(&["cough", "fever"]);
    let backend = MockLlmBackend::new()
        .with_rule("The term is: cough", "{\"something_else\": {\"x\": null}}")
        .with_fixed_response(reply(&["pyrexia"]));

    let err = populator(&backend, &store)
        .populate(&definition(), &CancellationFlag::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::MalformedResponse(_)));
    assert_eq!(backend.call_count(), 1);
}

#[tokio::test]
async fn test_keep_going_counts_failed_strings() {
    let store = MemoryStore::with_strs(&["cough", "fever"]);
    let backend = MockLlmBackend::new()
        .with_rule("The term is: cough", "{\"something_else\": {\"x\": null}}")
        .with_fixed_response(reply(&["pyrexia"]));

    let report = populator(&backend, &store)
        .with_fail_fast(false)
        .populate(&definition(), &CancellationFlag::new())
        .await
        .unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(report.processed, 1);
    assert_eq!(report.summaries_written, 1);
    assert!(store.expansions_of("cough").is_empty());
}

#[tokio::test]
async fn test_cancelled_run_calls_no_model() {
    let store = MemoryStore::with_strs(&["fever"]);
    let backend = MockLlmBackend::new().with_fixed_response(reply(&["pyrexia"]));
    let sink = Arc::new(CollectingSink::default());
    let cancel = CancellationFlag::new();
    cancel.cancel();

    let report = populator(&backend, &store)
        .with_status_sink(sink.clone())
        .populate(&definition(), &cancel)
        .await
        .unwrap();
    assert!(report.cancelled);
    assert_eq!(report.summaries_written, 0);
    assert_eq!(backend.call_count(), 0);
    assert!(sink
        .lines()
        .contains(&"Cancelled population of expansion strings.".to_string()));
}

#[tokio::test]
async fn test_unknown_style_without_prompt_is_config_error() {
    let store = MemoryStore::with_strs(&["fever"]);
    let backend = MockLlmBackend::new();
    let definition = definition().with_style("lay", 1.0);

    let err = populator(&backend, &store)
        .populate(&definition, &CancellationFlag::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Config(_)));
    assert!(store.state().expansion_populators.is_empty());
}

#[tokio::test]
async fn test_code_summaries_embed_every_selected_string() {
    let store = MemoryStore::with_strs(&["fever", "pyrexia"]);
    let selection = StrSelection {
        selector_type: StrSelectorType::CodeSet,
        value: "conditions".into(),
    };

    let report = CodeSummarizer::new(store.clone(), embedding(&store))
        .summarize(&selection, &CancellationFlag::new())
        .await
        .unwrap();
    assert_eq!(report.item_count, 2);
    assert_eq!(report.vectors_written, 2);
    assert_eq!(store.state().vectors.len(), 2);
    assert_eq!(store.state().code_summary_calls.len(), 1);
    assert_eq!(store.state().code_summary_calls[0].0, selection);
}

#[tokio::test]
async fn test_code_summaries_reject_rel_selection() {
    let store = MemoryStore::with_strs(&["fever"]);
    let err = CodeSummarizer::new(store.clone(), embedding(&store))
        .summarize(&definition().selection, &CancellationFlag::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}
