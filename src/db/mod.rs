pub mod models;
pub mod store;

use anyhow::{bail, Result};
use sqlx::any::AnyPoolOptions;
use sqlx::AnyPool;
use tracing::debug;

/// SQL flavour behind `DATABASE_URL`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Postgres,
    Sqlite,
}

impl Backend {
    pub fn from_url(database_url: &str) -> Result<Self> {
        if database_url.starts_with("postgres://") || database_url.starts_with("postgresql://") {
            Ok(Self::Postgres)
        } else if database_url.starts_with("sqlite:") {
            Ok(Self::Sqlite)
        } else {
            bail!("unsupported DATABASE_URL scheme (expected postgres:// or sqlite:)")
        }
    }

    fn schema(&self) -> &'static [&'static str] {
        match self {
            Backend::Postgres => POSTGRES_SCHEMA,
            Backend::Sqlite => SQLITE_SCHEMA,
        }
    }
}

const POSTGRES_SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS HVAC_Temperature (
        id          BIGSERIAL PRIMARY KEY,
        timestamp   TIMESTAMP NOT NULL,
        temperature TEXT      NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS HVAC_Events (
        id        BIGSERIAL PRIMARY KEY,
        timestamp TIMESTAMP NOT NULL,
        event     TEXT      NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS ix_hvac_temperature_timestamp ON HVAC_Temperature (timestamp)",
    "CREATE INDEX IF NOT EXISTS ix_hvac_temperature_temperature ON HVAC_Temperature (temperature)",
    "CREATE INDEX IF NOT EXISTS ix_hvac_events_timestamp ON HVAC_Events (timestamp)",
    "CREATE INDEX IF NOT EXISTS ix_hvac_events_event ON HVAC_Events (event)",
];

const SQLITE_SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS HVAC_Temperature (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        timestamp   TIMESTAMP NOT NULL,
        temperature TEXT      NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS HVAC_Events (
        id        INTEGER PRIMARY KEY AUTOINCREMENT,
        timestamp TIMESTAMP NOT NULL,
        event     TEXT      NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS ix_hvac_temperature_timestamp ON HVAC_Temperature (timestamp)",
    "CREATE INDEX IF NOT EXISTS ix_hvac_temperature_temperature ON HVAC_Temperature (temperature)",
    "CREATE INDEX IF NOT EXISTS ix_hvac_events_timestamp ON HVAC_Events (timestamp)",
    "CREATE INDEX IF NOT EXISTS ix_hvac_events_event ON HVAC_Events (event)",
];

pub async fn create_pool(database_url: &str) -> Result<AnyPool> {
    sqlx::any::install_default_drivers();

    let backend = Backend::from_url(database_url)?;
    let options = if backend == Backend::Sqlite && database_url.contains(":memory:") {
        // Every in-memory connection is its own database; keep exactly one alive.
        AnyPoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        AnyPoolOptions::new().max_connections(10)
    };

    let pool = options.connect(database_url).await?;
    Ok(pool)
}

/// Create the audit tables and their indexes if they do not exist yet.
pub async fn run_migrations(pool: &AnyPool, backend: Backend) -> Result<()> {
    for &statement in backend.schema() {
        sqlx::query(statement).execute(pool).await?;
    }
    debug!(?backend, "Schema is up to date");
    Ok(())
}
