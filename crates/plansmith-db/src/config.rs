use std::env;

/// Database configuration.
///
/// Reads from the `PLANSMITH_DATABASE_URL` environment variable, falling
/// back to `postgresql://localhost:5432/plansmith` when unset.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Full PostgreSQL connection URL.
    pub database_url: String,
}

impl DbConfig {
    pub const DEFAULT_URL: &str = "postgresql://localhost:5432/plansmith";

    /// Environment variable holding the connection URL.
    pub const ENV_VAR: &str = "PLANSMITH_DATABASE_URL";

    pub fn from_env() -> Self {
        let database_url = env::var(Self::ENV_VAR).unwrap_or_else(|_| Self::DEFAULT_URL.to_owned());
        Self { database_url }
    }

    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
        }
    }

    /// Database name: the last path segment of the URL, without query
    /// parameters.
    pub fn database_name(&self) -> Option<&str> {
        self.database_url
            .rsplit('/')
            .next()
            .map(|s| s.split('?').next().unwrap_or(s))
            .filter(|s| !s.is_empty())
    }

    /// URL of the `postgres` maintenance database on the same server, used
    /// to create the target database.
    pub fn maintenance_url(&self) -> String {
        match self.database_url.rfind('/') {
            Some(pos) => format!("{}/postgres", &self.database_url[..pos]),
            None => self.database_url.clone(),
        }
    }
}

impl Default for DbConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_url() {
        let cfg = DbConfig::new(DbConfig::DEFAULT_URL);
        assert_eq!(cfg.database_name(), Some("plansmith"));
    }

    #[test]
    fn database_name_ignores_query() {
        let cfg = DbConfig::new("postgresql://db:5432/accounts?sslmode=require");
        assert_eq!(cfg.database_name(), Some("accounts"));
    }

    #[test]
    fn maintenance_url_replaces_db() {
        let cfg = DbConfig::new("postgresql://u:p@localhost:5432/plansmith");
        assert_eq!(cfg.maintenance_url(), "postgresql://u:p@localhost:5432/postgres");
    }

    #[test]
    fn trailing_slash_has_no_name() {
        let cfg = DbConfig::new("postgresql://localhost:5432/");
        assert_eq!(cfg.database_name(), None);
    }
}
