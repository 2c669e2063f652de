//! Creation of new, empty migration files.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rand::Rng;

use crate::error::MigrateError;

/// Timestamp prefix for migration file names. The rendered form sorts
/// lexicographically identically to chronologically, so file-name order is
/// creation order.
pub const FILE_NAME_DATETIME_FORMAT: &str = "%Y_%m_%dT%H_%M_%S";

const SUFFIX_LETTERS: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";
const SUFFIX_LEN: usize = 5;

const STUB_TEMPLATE: &str = "-- migration: up\n\n-- migration: down";

/// Writes empty SQL migration stubs into a directory.
pub struct SqlCreator {
    dir: PathBuf,
}

impl SqlCreator {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// Create `<timestamp>__<name>__<suffix>.sql` containing the marker
    /// template and return its path.
    ///
    /// The random suffix keeps names unique when two migrations are created
    /// within the same second.
    pub fn create(&self, migration_name: &str) -> Result<PathBuf, MigrateError> {
        let dir = absolute_dir(&self.dir)?;
        let file_name = migration_file_name(Utc::now(), migration_name, &random_suffix());
        let path = dir.join(format!("{file_name}.sql"));
        fs::write(&path, STUB_TEMPLATE)?;
        Ok(path)
    }
}

/// Render the canonical migration file name (without extension).
#[must_use]
pub fn migration_file_name(
    create_dt: DateTime<Utc>,
    migration_name: &str,
    suffix: &str,
) -> String {
    format!(
        "{}__{}__{}",
        create_dt.format(FILE_NAME_DATETIME_FORMAT),
        migration_name,
        suffix
    )
}

fn random_suffix() -> String {
    let mut rng = rand::thread_rng();
    (0..SUFFIX_LEN)
        .map(|_| SUFFIX_LETTERS[rng.gen_range(0..SUFFIX_LETTERS.len())] as char)
        .collect()
}

fn absolute_dir(dir: &Path) -> Result<PathBuf, MigrateError> {
    if dir.is_absolute() {
        Ok(dir.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(dir))
    }
}
