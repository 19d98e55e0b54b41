//! Integration tests for the PostgreSQL repositories.
//!
//! **IMPORTANT**: These tests require a migrated PostgreSQL database with
//! pgvector. Set `DATABASE_URL` (or use the default test URL) and run
//! `ontoloom migrate` first, then `cargo test -- --ignored`.

use std::sync::Arc;

use ontoloom_db::test_fixtures::{connect_test, main_str_id, seed_code, unique};
use ontoloom_db::{
    CancellationFlag, ConceptSelection, ConceptSelector, Database, LeftSource, MatchQuerySpec,
    NewTriple, PopulatorRecord, RelationRepository, RightSource, SelectorType,
    SpecificityRepository, SpecificityScale, StringVectorRepository, Vector, VectorSlot,
};
use chrono::{DateTime, Utc};
use ontoloom_db::{upsert_row, Field, Fields, UpsertTarget};
use ontoloom_search::MatchingEngine;
use sqlx::Row;
use uuid::Uuid;

async fn setup() -> Database {
    let _ = dotenvy::dotenv();
    connect_test().await.expect("Failed to connect to test database")
}

fn populator(name: &str, notes: Option<&str>) -> PopulatorRecord {
    PopulatorRecord {
        name: name.to_string(),
        selection: ConceptSelection {
            selector_type: SelectorType::CodeSet,
            value: "symptoms".to_string(),
        },
        relation_set_json: r#"{"name":"causes"}"#.to_string(),
        model: "mock".to_string(),
        notes: notes.map(str::to_string),
    }
}

#[tokio::test]
#[ignore = "requires a migrated database"]
async fn test_register_populator_is_idempotent() {
    let db = setup().await;
    let name = unique("populator");

    let first = db
        .relations
        .register_populator(&populator(&name, Some("v1")))
        .await
        .unwrap();
    // Null notes keep the stored value
    let second = db
        .relations
        .register_populator(&populator(&name, None))
        .await
        .unwrap();
    assert_eq!(first, second);

    let notes: Option<String> = sqlx::query_scalar(&format!(
        "SELECT notes FROM {}.populators WHERE id = $1",
        db.schema
    ))
    .bind(first)
    .fetch_one(&db.pool)
    .await
    .unwrap();
    assert_eq!(notes.as_deref(), Some("v1"));
}

#[tokio::test]
#[ignore = "requires a migrated database"]
async fn test_upsert_row_reflects_generated_defaults() {
    let db = setup().await;
    let name = unique("populator");
    let target = UpsertTarget {
        schema: &db.schema,
        table: "populators",
        key_sets: &[&["name"]],
    };
    let fields = |notes: Option<&str>| {
        Fields::new()
            .with("name", Field::Text(Some(name.clone())))
            .with("selector_type", Field::Text(Some("code_set".into())))
            .with("selector_value", Field::Text(Some("symptoms".into())))
            .with("relation_set", Field::Json(Some(serde_json::json!({"name": "causes"}))))
            .with("model", Field::Text(Some("mock".into())))
            .with("notes", Field::Text(notes.map(str::to_string)))
    };

    let inserted = upsert_row(&db.pool, target, fields(Some("v1"))).await.unwrap();
    let created_at: DateTime<Utc> = inserted.try_get("created_at").unwrap();

    // Unchanged and updated rows both come back whole
    let unchanged = upsert_row(&db.pool, target, fields(None)).await.unwrap();
    assert_eq!(unchanged.try_get::<DateTime<Utc>, _>("created_at").unwrap(), created_at);
    assert_eq!(unchanged.try_get::<Option<String>, _>("notes").unwrap().as_deref(), Some("v1"));

    let updated = upsert_row(&db.pool, target, fields(Some("v2"))).await.unwrap();
    assert_eq!(
        updated.try_get::<Uuid, _>("id").unwrap(),
        inserted.try_get::<Uuid, _>("id").unwrap()
    );
    assert_eq!(updated.try_get::<Option<String>, _>("notes").unwrap().as_deref(), Some("v2"));
    assert_eq!(updated.try_get::<DateTime<Utc>, _>("created_at").unwrap(), created_at);
}

#[tokio::test]
#[ignore = "requires a migrated database"]
async fn test_save_triple_upserts_on_unique_key() {
    let db = setup().await;
    let terminology = unique("term");
    let subject = seed_code(&db, &terminology, "R50", &unique("fever"), None)
        .await
        .unwrap();
    let populator_id = db
        .relations
        .register_populator(&populator(&unique("populator"), None))
        .await
        .unwrap();
    assert!(!db.relations.has_relations(subject, populator_id).await.unwrap());

    let mut triple = NewTriple {
        subject_code_id: subject,
        populator_id,
        populator_name: "causes".to_string(),
        relation: "may_be_caused_by".to_string(),
        object: unique("infection"),
        priority: 1,
    };
    let first = db.relations.save_triple(&triple).await.unwrap();
    triple.priority = 2;
    let second = db.relations.save_triple(&triple).await.unwrap();

    assert_eq!(first, second);
    assert!(db.relations.has_relations(subject, populator_id).await.unwrap());

    let priority: i64 = sqlx::query_scalar(&format!(
        "SELECT priority FROM {}.rels WHERE id = $1",
        db.schema
    ))
    .bind(first.triple_id)
    .fetch_one(&db.pool)
    .await
    .unwrap();
    assert_eq!(priority, 2);
}

#[tokio::test]
#[ignore = "requires a migrated database"]
async fn test_specificity_scores_are_cached_per_scale() {
    let db = setup().await;
    let scale_id = db
        .specificity
        .register_scale(&SpecificityScale {
            name: unique("scale"),
            prompt: "How specific is <<<obj_str>>>?".to_string(),
            min_val: 1.0,
            max_val: 10.0,
        })
        .await
        .unwrap();
    let text = unique("bacterial infection");

    assert_eq!(db.specificity.lookup(scale_id, &text).await.unwrap(), None);
    db.specificity.record(scale_id, &text, 6.0).await.unwrap();
    db.specificity.record(scale_id, &text, 8.0).await.unwrap();
    assert_eq!(db.specificity.lookup(scale_id, &text).await.unwrap(), Some(8.0));
}

#[tokio::test]
#[ignore = "requires a migrated database"]
async fn test_selector_orders_terminology_by_code() {
    let db = setup().await;
    let terminology = unique("term");
    seed_code(&db, &terminology, "B02", &unique("zoster"), None)
        .await
        .unwrap();
    seed_code(&db, &terminology, "A01", &unique("typhoid"), None)
        .await
        .unwrap();

    let items = db
        .selector
        .select(&ConceptSelection {
            selector_type: SelectorType::Terminology,
            value: terminology,
        })
        .await
        .unwrap();
    let codes: Vec<Option<String>> = items.into_iter().map(|i| i.code).collect();
    assert_eq!(codes, vec![Some("A01".to_string()), Some("B02".to_string())]);
}

#[tokio::test]
#[ignore = "requires a migrated database"]
async fn test_matching_keeps_only_candidates_below_cutoff() {
    let db = setup().await;
    let terminology = unique("term");
    let subject_set = unique("subjects");
    let target_set = unique("targets");
    let embedder_id = db
        .vectors
        .register_embedder(&unique("embedder"), "test-model", 2)
        .await
        .unwrap();

    // Subject with one extracted object
    let subject = seed_code(&db, &terminology, "S1", &unique("fever"), Some(&subject_set))
        .await
        .unwrap();
    let populator_id = db
        .relations
        .register_populator(&populator(&unique("populator"), None))
        .await
        .unwrap();
    let saved = db
        .relations
        .save_triple(&NewTriple {
            subject_code_id: subject,
            populator_id,
            populator_name: "causes".to_string(),
            relation: "may_be_caused_by".to_string(),
            object: unique("infection"),
            priority: 1,
        })
        .await
        .unwrap();
    db.vectors
        .store_vector(
            saved.object_str_id,
            embedder_id,
            VectorSlot::Mean,
            Vector::from(vec![1.0, 0.0]),
        )
        .await
        .unwrap();

    // Targets at cosine distance 0.1 and 0.5
    let near = seed_code(&db, &terminology, "T1", &unique("near"), Some(&target_set))
        .await
        .unwrap();
    let far = seed_code(&db, &terminology, "T2", &unique("far"), Some(&target_set))
        .await
        .unwrap();
    for (code_id, vector) in [(near, vec![0.9, 0.435_889_9]), (far, vec![0.5, 0.866_025_4])] {
        let str_id = main_str_id(&db, code_id).await.unwrap();
        db.vectors
            .store_vector(str_id, embedder_id, VectorSlot::Mean, Vector::from(vector))
            .await
            .unwrap();
    }

    let spec = MatchQuerySpec {
        from_populator_id: populator_id,
        from_relation: "may_be_caused_by".to_string(),
        left_sources: vec![LeftSource::ObjMainStr],
        right_sources: vec![RightSource::CodeMainStr],
        vector_slot: VectorSlot::Mean,
        expansion_styles: vec![],
        target_code_set: target_set,
        embedder_id,
        top_hit_count: 4,
    };
    let engine = MatchingEngine::new(Arc::new(db.matches.clone()));
    let report = engine.run(&spec, &CancellationFlag::new()).await.unwrap();
    assert_eq!(report.item_count, 1);
    assert_eq!(report.records_written, 1);

    let rows: Vec<(Uuid, i64, f64)> = sqlx::query_as(&format!(
        "SELECT matched_code_id, ranking, distance FROM {}.rel_code_matches \
         WHERE matcher_id = $1 ORDER BY ranking",
        db.schema
    ))
    .bind(report.matcher_id)
    .fetch_all(&db.pool)
    .await
    .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].0, near);
    assert_eq!(rows[0].1, 1);
    assert!((rows[0].2 - 0.1).abs() < 1e-4);

    // Already-matched items are not processed again
    let again = engine.run(&spec, &CancellationFlag::new()).await.unwrap();
    assert_eq!(again.matcher_id, report.matcher_id);
    assert_eq!(again.item_count, 0);
}
