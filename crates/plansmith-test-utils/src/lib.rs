//! PostgreSQL fixtures for plansmith integration tests.
//!
//! One server is shared per test binary and every test gets its own
//! freshly migrated database on it. Set `PLANSMITH_TEST_PG_URL` to point at
//! an already running server; otherwise a container is started through
//! testcontainers on first use.

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::{Executor, PgPool};
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;
use uuid::Uuid;

use plansmith_db::pool;

/// Environment variable naming an external server root URL.
pub const EXTERNAL_URL_VAR: &str = "PLANSMITH_TEST_PG_URL";

struct Server {
    root_url: String,
    /// Keeps the container running for the life of the binary.
    _container: Option<ContainerAsync<Postgres>>,
}

static SERVER: OnceCell<Server> = OnceCell::const_new();

async fn start_server() -> Server {
    if let Ok(root_url) = std::env::var(EXTERNAL_URL_VAR) {
        return Server {
            root_url,
            _container: None,
        };
    }

    let container = Postgres::default()
        .with_tag("18")
        .start()
        .await
        .expect("failed to start PostgreSQL container");
    let host = container.get_host().await.expect("container host");
    let port = container
        .get_host_port_ipv4(5432)
        .await
        .expect("container port");

    Server {
        root_url: format!("postgresql://postgres:postgres@{host}:{port}"),
        _container: Some(container),
    }
}

/// Server root URL, without a database name.
pub async fn pg_url() -> &'static str {
    &SERVER.get_or_init(start_server).await.root_url
}

async fn maintenance_pool() -> PgPool {
    let url = format!("{}/postgres", pg_url().await);
    PgPoolOptions::new()
        .max_connections(1)
        .acquire_timeout(Duration::from_secs(30))
        .connect(&url)
        .await
        .expect("failed to connect to maintenance database")
}

/// A migrated, uniquely named database. Call [`TestDb::teardown`] at the
/// end of the test.
pub struct TestDb {
    pub pool: PgPool,
    pub name: String,
}

impl TestDb {
    pub async fn create() -> Self {
        let name = format!("plansmith_test_{}", Uuid::new_v4().simple());

        let maint = maintenance_pool().await;
        maint
            .execute(format!("CREATE DATABASE {name}").as_str())
            .await
            .unwrap_or_else(|e| panic!("failed to create {name}: {e}"));
        maint.close().await;

        let url = format!("{}/{name}", pg_url().await);
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(30))
            .connect(&url)
            .await
            .unwrap_or_else(|e| panic!("failed to connect to {name}: {e}"));

        pool::run_migrations(&pool)
            .await
            .expect("migrations should apply to a fresh database");

        Self { pool, name }
    }

    /// Close the pool and drop the database, terminating stray connections.
    pub async fn teardown(self) {
        self.pool.close().await;

        let maint = maintenance_pool().await;
        let terminate = format!(
            "SELECT pg_terminate_backend(pid) FROM pg_stat_activity \
             WHERE datname = '{}' AND pid <> pg_backend_pid()",
            self.name
        );
        let _ = maint.execute(terminate.as_str()).await;
        let _ = maint
            .execute(format!("DROP DATABASE IF EXISTS {}", self.name).as_str())
            .await;
        maint.close().await;
    }
}
