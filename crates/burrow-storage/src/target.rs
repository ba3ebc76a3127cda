use std::path::PathBuf;

/// Which backend a deployment runs on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageTarget {
    Volatile,
    Journal(PathBuf),
    Relational(String),
}

impl StorageTarget {
    /// Picks a backend from the configured connection settings.
    ///
    /// A database DSN wins over a journal path; with neither set the
    /// volatile backend is used. Blank values count as unset.
    pub fn select(database_dsn: Option<&str>, file_storage_path: Option<&str>) -> Self {
        fn present(value: Option<&str>) -> Option<&str> {
            value.map(str::trim).filter(|v| !v.is_empty())
        }

        if let Some(dsn) = present(database_dsn) {
            return StorageTarget::Relational(dsn.to_string());
        }
        if let Some(path) = present(file_storage_path) {
            return StorageTarget::Journal(PathBuf::from(path));
        }
        StorageTarget::Volatile
    }

    pub fn name(&self) -> &'static str {
        match self {
            StorageTarget::Volatile => "memory",
            StorageTarget::Journal(_) => "journal",
            StorageTarget::Relational(_) => "postgres",
        }
    }
}
