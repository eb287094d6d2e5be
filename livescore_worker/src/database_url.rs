//! The worker's Postgres connection string.
//!
//! The URL usually carries a password, and sometimes credentials in its query string too. [`DatabaseUrl`] only hands
//! the raw value to the connection pool; everything that gets printed goes through [`DatabaseUrl::redacted`].
use std::fmt::{self, Debug, Display};

use url::Url;

use crate::errors::WorkerError;

const MASK: &str = "****";

#[derive(Clone, Default, PartialEq, Eq)]
pub struct DatabaseUrl(String);

impl DatabaseUrl {
    /// Accepts `postgres://` and `postgresql://` URLs.
    pub fn parse(raw: &str) -> Result<Self, WorkerError> {
        let url = Url::parse(raw)
            .map_err(|e| WorkerError::ConfigurationError(format!("LSW_DATABASE_URL is not a valid URL. {e}")))?;
        match url.scheme() {
            "postgres" | "postgresql" => Ok(Self(raw.to_string())),
            scheme => Err(WorkerError::ConfigurationError(format!(
                "LSW_DATABASE_URL must be a postgres:// URL, but the scheme is {scheme}"
            ))),
        }
    }

    pub fn is_set(&self) -> bool {
        !self.0.is_empty()
    }

    /// The URL exactly as configured, password included.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// The URL with its password and query string masked.
    pub fn redacted(&self) -> String {
        if self.0.is_empty() {
            return "Not set".into();
        }
        let Ok(mut url) = Url::parse(&self.0) else {
            return MASK.into();
        };
        if url.password().is_some() && url.set_password(Some(MASK)).is_err() {
            return MASK.into();
        }
        if url.query().is_some() {
            url.set_query(Some(MASK));
        }
        url.to_string()
    }
}

impl Display for DatabaseUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted())
    }
}

impl Debug for DatabaseUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DatabaseUrl({})", self.redacted())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn passwords_are_masked() {
        let url = DatabaseUrl::parse("postgres://worker:hunter2@db:5432/livescore").unwrap();
        assert_eq!(url.to_string(), "postgres://worker:****@db:5432/livescore");
        assert_eq!(format!("{url:?}"), "DatabaseUrl(postgres://worker:****@db:5432/livescore)");
        assert_eq!(url.expose(), "postgres://worker:hunter2@db:5432/livescore");
    }

    #[test]
    fn query_strings_are_masked() {
        let url = DatabaseUrl::parse("postgresql://db/livescore?user=worker&password=hunter2").unwrap();
        assert_eq!(url.redacted(), "postgresql://db/livescore?****");
    }

    #[test]
    fn urls_without_credentials_are_shown_as_is() {
        let url = DatabaseUrl::parse("postgres://localhost/livescore").unwrap();
        assert_eq!(url.to_string(), "postgres://localhost/livescore");
    }

    #[test]
    fn only_postgres_urls_are_accepted() {
        assert!(matches!(DatabaseUrl::parse("mysql://db/livescore"), Err(WorkerError::ConfigurationError(_))));
        let err = DatabaseUrl::parse("worker:hunter2 at db").unwrap_err();
        assert!(!err.to_string().contains("hunter2"));
    }

    #[test]
    fn unset_urls() {
        let url = DatabaseUrl::default();
        assert!(!url.is_set());
        assert_eq!(url.to_string(), "Not set");
    }
}
