//! Database product identification.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::config::ConfigError;

/// Database products the pipeline knows how to parse and paginate for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DbType {
    Mysql,
    Mariadb,
    Sqlite,
    H2,
    Hsql,
    Postgresql,
    Oracle,
    Oracle12c,
    /// SQL Server 2012 and later (`OFFSET ... FETCH`).
    Sqlserver,
    /// SQL Server 2005/2008 (`TOP` + `ROW_NUMBER()`).
    Sqlserver2005,
    Db2,
    Sybase,
    Other,
}

impl DbType {
    /// Every variant, in declaration order.
    pub const ALL: [DbType; 13] = [
        DbType::Mysql,
        DbType::Mariadb,
        DbType::Sqlite,
        DbType::H2,
        DbType::Hsql,
        DbType::Postgresql,
        DbType::Oracle,
        DbType::Oracle12c,
        DbType::Sqlserver,
        DbType::Sqlserver2005,
        DbType::Db2,
        DbType::Sybase,
        DbType::Other,
    ];

    /// Lowercase identifier used in configuration.
    pub fn as_str(&self) -> &'static str {
        match self {
            DbType::Mysql => "mysql",
            DbType::Mariadb => "mariadb",
            DbType::Sqlite => "sqlite",
            DbType::H2 => "h2",
            DbType::Hsql => "hsql",
            DbType::Postgresql => "postgresql",
            DbType::Oracle => "oracle",
            DbType::Oracle12c => "oracle12c",
            DbType::Sqlserver => "sqlserver",
            DbType::Sqlserver2005 => "sqlserver2005",
            DbType::Db2 => "db2",
            DbType::Sybase => "sybase",
            DbType::Other => "other",
        }
    }

    /// Detect the database product from a connection URL.
    ///
    /// Understands both JDBC-style URLs (`jdbc:mysql://...`) and native
    /// driver URLs (`postgres://...`, `sqlite:...`). Unknown URLs map to
    /// [`DbType::Other`].
    pub fn from_url(url: &str) -> DbType {
        let url = url.trim().to_ascii_lowercase();
        let scheme_matches = |names: &[&str]| {
            names.iter().any(|name| {
                url.contains(&format!(":{name}:"))
                    || url.starts_with(&format!("{name}:"))
            })
        };

        if scheme_matches(&["mysql", "cobar"]) {
            DbType::Mysql
        } else if scheme_matches(&["mariadb"]) {
            DbType::Mariadb
        } else if scheme_matches(&["sqlite"]) {
            DbType::Sqlite
        } else if scheme_matches(&["h2"]) {
            DbType::H2
        } else if scheme_matches(&["hsqldb"]) {
            DbType::Hsql
        } else if scheme_matches(&["postgresql", "postgres"]) {
            DbType::Postgresql
        } else if scheme_matches(&["oracle"]) {
            DbType::Oracle
        } else if scheme_matches(&["sqlserver2012"]) {
            DbType::Sqlserver
        } else if scheme_matches(&["sqlserver", "microsoft", "mssql"]) {
            DbType::Sqlserver2005
        } else if scheme_matches(&["db2"]) {
            DbType::Db2
        } else if scheme_matches(&["sybase"]) {
            DbType::Sybase
        } else {
            DbType::Other
        }
    }
}

impl fmt::Display for DbType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DbType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        DbType::ALL
            .into_iter()
            .find(|db| db.as_str() == wanted)
            .ok_or_else(|| ConfigError::Config(format!("unknown database type: {s}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_jdbc_url() {
        assert_eq!(DbType::from_url("jdbc:mysql://localhost:3306/app"), DbType::Mysql);
        assert_eq!(DbType::from_url("jdbc:postgresql://db/app"), DbType::Postgresql);
        assert_eq!(DbType::from_url("jdbc:oracle:thin:@host:1521:xe"), DbType::Oracle);
        assert_eq!(
            DbType::from_url("jdbc:sqlserver://host;databaseName=app"),
            DbType::Sqlserver2005
        );
        assert_eq!(DbType::from_url("jdbc:h2:mem:test"), DbType::H2);
    }

    #[test]
    fn test_from_native_url() {
        assert_eq!(DbType::from_url("postgres://user@localhost/app"), DbType::Postgresql);
        assert_eq!(DbType::from_url("sqlite::memory:"), DbType::Sqlite);
        assert_eq!(DbType::from_url("MYSQL://root@localhost/app"), DbType::Mysql);
        assert_eq!(DbType::from_url("redis://localhost"), DbType::Other);
    }

    #[test]
    fn test_parse_and_display() {
        for db in DbType::ALL {
            assert_eq!(db.as_str().parse::<DbType>().unwrap(), db);
        }
        assert_eq!("PostgreSQL".parse::<DbType>().unwrap(), DbType::Postgresql);
        assert!("cassandra".parse::<DbType>().is_err());
    }
}
