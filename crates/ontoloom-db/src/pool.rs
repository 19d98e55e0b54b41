//! Connection pool setup.
//!
//! Population runs hold one connection at a time, but matching runs issue
//! long ranking queries; `statement_timeout` bounds those per connection.

use std::str::FromStr;
use std::time::{Duration, Instant};

use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use tracing::{debug, info, warn};

use ontoloom_core::{defaults, Error, Result};

/// `application_name` reported to PostgreSQL.
pub const APPLICATION_NAME: &str = "ontoloom";

/// Pool settings.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolConfig {
    pub max_connections: u32,
    /// How long to wait for a free connection.
    pub connect_timeout: Duration,
    /// Server-side limit for any single statement; `None` leaves the
    /// server default.
    pub statement_timeout: Option<Duration>,
    pub application_name: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: defaults::DB_MAX_CONNECTIONS,
            connect_timeout: Duration::from_secs(defaults::DB_CONNECT_TIMEOUT_SECS),
            statement_timeout: None,
            application_name: APPLICATION_NAME.to_string(),
        }
    }
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

impl PoolConfig {
    /// Overrides from `DATABASE_MAX_CONNECTIONS`,
    /// `DATABASE_CONNECT_TIMEOUT_SECS` and `DATABASE_STATEMENT_TIMEOUT_SECS`.
    /// Unset or unparsable values keep the defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(n) = env_u64("DATABASE_MAX_CONNECTIONS") {
            config.max_connections = n.clamp(1, u32::MAX as u64) as u32;
        }
        if let Some(secs) = env_u64("DATABASE_CONNECT_TIMEOUT_SECS") {
            config.connect_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64("DATABASE_STATEMENT_TIMEOUT_SECS") {
            config = config.with_statement_timeout(Duration::from_secs(secs));
        }
        config
    }

    pub fn with_max_connections(mut self, n: u32) -> Self {
        self.max_connections = n.max(1);
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// A zero duration clears the limit.
    pub fn with_statement_timeout(mut self, timeout: Duration) -> Self {
        self.statement_timeout = (!timeout.is_zero()).then_some(timeout);
        self
    }

    fn connect_options(&self, database_url: &str) -> Result<PgConnectOptions> {
        let mut options = PgConnectOptions::from_str(database_url)
            .map_err(|e| Error::Config(format!("invalid database URL: {}", e)))?
            .application_name(&self.application_name);
        if let Some(timeout) = self.statement_timeout {
            let millis = timeout.as_millis().to_string();
            options = options.options([("statement_timeout", millis.as_str())]);
        }
        Ok(options)
    }
}

/// Connect with [`PoolConfig::default`].
pub async fn create_pool(database_url: &str) -> Result<PgPool> {
    create_pool_with_config(database_url, PoolConfig::default()).await
}

pub async fn create_pool_with_config(database_url: &str, config: PoolConfig) -> Result<PgPool> {
    let start = Instant::now();
    let options = config.connect_options(database_url)?;

    info!(
        subsystem = "db",
        component = "pool",
        op = "create",
        max_connections = config.max_connections,
        connect_timeout_secs = config.connect_timeout.as_secs(),
        statement_timeout_ms = config.statement_timeout.map(|t| t.as_millis() as u64),
        "Creating database connection pool"
    );

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(config.connect_timeout)
        .connect_with(options)
        .await
        .map_err(Error::Database)?;

    info!(
        subsystem = "db",
        component = "pool",
        pool_size = pool.size(),
        duration_ms = start.elapsed().as_millis() as u64,
        "Database connection pool established"
    );
    Ok(pool)
}

/// Log pool usage at the end of a run; warns when every connection is busy.
pub fn log_pool_metrics(pool: &PgPool) {
    let size = pool.size();
    let idle = pool.num_idle();
    debug!(
        subsystem = "db",
        component = "pool",
        op = "metrics",
        pool_size = size,
        pool_idle = idle,
        "Pool usage"
    );
    if idle == 0 && size > 0 {
        warn!(
            subsystem = "db",
            component = "pool",
            pool_size = size,
            "No idle connections left in the pool"
        );
    }
}
