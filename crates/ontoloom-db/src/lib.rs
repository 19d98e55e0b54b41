//! # ontoloom-db
//!
//! PostgreSQL + pgvector persistence layer for ontoloom.
//!
//! This crate provides:
//! - Connection pool management
//! - Upsert-by-unique-key shared by every repository
//! - Concept selection (terminology, code set, free SQL)
//! - Repositories for populators and triples, string vectors, expansion
//!   sets and summary vectors, specificity scores and code matches
//! - Bound-query execution for the matching engine
//!
//! ## Example
//!
//! ```rust,ignore
//! use ontoloom_db::Database;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::connect("postgres://localhost/ontoloom").await?;
//!     let found = db.relations.has_relations(code_id, populator_id).await?;
//!     Ok(())
//! }
//! ```

pub mod expansions;
pub mod matches;
pub mod pool;
pub mod relations;
pub mod schema;
pub mod selector;
pub mod specificity;
pub mod upsert;
pub mod vectors;

// Test fixtures for integration tests
pub mod test_fixtures;

// Re-export core types
pub use ontoloom_core::*;

pub use expansions::PgExpansionRepository;
pub use matches::PgMatchRepository;
pub use pool::{create_pool, create_pool_with_config, log_pool_metrics, PoolConfig};
pub use relations::PgRelationRepository;
pub use schema::validate_schema_name;
pub use selector::PgSelector;
pub use specificity::PgSpecificityRepository;
pub use upsert::{ensure_str, upsert, upsert_row, Field, Fields, UpsertTarget};
pub use vectors::PgStringVectorRepository;

/// Combined database context with all repositories.
#[derive(Clone)]
pub struct Database {
    /// The underlying connection pool.
    pub pool: sqlx::Pool<sqlx::Postgres>,
    /// Schema every repository reads and writes.
    pub schema: String,
    /// Concept selection for full runs.
    pub selector: PgSelector,
    /// Populator registrations and triples.
    pub relations: PgRelationRepository,
    /// Embedders and string vectors.
    pub vectors: PgStringVectorRepository,
    /// Expansion sets and summary vectors.
    pub expansions: PgExpansionRepository,
    /// Specificity scales and cached scores.
    pub specificity: PgSpecificityRepository,
    /// Matchers and match rows.
    pub matches: PgMatchRepository,
}

impl Database {
    /// Create a Database on the default schema from a connection pool.
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>) -> Self {
        Self::build(pool, defaults::DB_SCHEMA.to_string())
    }

    /// Create a Database scoped to `schema`.
    pub fn with_schema(pool: sqlx::Pool<sqlx::Postgres>, schema: &str) -> Result<Self> {
        validate_schema_name(schema)?;
        Ok(Self::build(pool, schema.to_string()))
    }

    fn build(pool: sqlx::Pool<sqlx::Postgres>, schema: String) -> Self {
        Self {
            selector: PgSelector::new(pool.clone(), schema.clone()),
            relations: PgRelationRepository::new(pool.clone(), schema.clone()),
            vectors: PgStringVectorRepository::new(pool.clone(), schema.clone()),
            expansions: PgExpansionRepository::new(pool.clone(), schema.clone()),
            specificity: PgSpecificityRepository::new(pool.clone(), schema.clone()),
            matches: PgMatchRepository::new(pool.clone(), schema.clone()),
            schema,
            pool,
        }
    }

    /// Create a new Database instance by connecting to the given URL.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = create_pool(url).await?;
        Ok(Self::new(pool))
    }

    /// Create with custom pool configuration.
    pub async fn connect_with_config(url: &str, config: PoolConfig) -> Result<Self> {
        let pool = create_pool_with_config(url, config).await?;
        Ok(Self::new(pool))
    }

    /// Run pending migrations.
    #[cfg(feature = "migrations")]
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Database(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(())
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &sqlx::Pool<sqlx::Postgres> {
        &self.pool
    }
}
