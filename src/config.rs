//! Environment and data-directory resolution
//!
//! Nothing outside this module reads process environment variables.

use std::path::PathBuf;

use crate::error::{PhloemError, Result};

/// Environment variable overriding the data directory
pub const DATA_DIR_ENV: &str = "PHLOEM_DATA_DIR";

/// Truthy value forces the local embedder and forbids network use
pub const AIR_GAPPED_ENV: &str = "PHLOEM_AIR_GAPPED";

/// Embedder selector ("local" is the only in-core choice)
pub const EMBEDDINGS_ENV: &str = "PHLOEM_EMBEDDINGS";

/// Name of the main database file inside the data directory
pub const DB_FILE_NAME: &str = "memories.db";

/// Resolve the data directory: $PHLOEM_DATA_DIR, else ~/.phloem
pub fn data_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
        if !dir.trim().is_empty() {
            return Ok(PathBuf::from(dir));
        }
    }
    let home = dirs::home_dir()
        .ok_or_else(|| PhloemError::Config("cannot determine home directory".to_string()))?;
    Ok(home.join(".phloem"))
}

/// Create the data directory with owner-only permissions and return its path
pub fn ensure_data_dir() -> Result<PathBuf> {
    let dir = data_dir()?;
    std::fs::create_dir_all(&dir)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o700);
        std::fs::set_permissions(&dir, perms)?;
    }

    Ok(dir)
}

/// Path of the main database file
pub fn db_path() -> Result<PathBuf> {
    Ok(ensure_data_dir()?.join(DB_FILE_NAME))
}

/// Whether the air-gapped flag is set to a truthy value
pub fn air_gapped() -> bool {
    std::env::var(AIR_GAPPED_ENV)
        .map(|v| is_truthy(&v))
        .unwrap_or(false)
}

fn is_truthy(value: &str) -> bool {
    let value = value.trim().to_lowercase();
    !value.is_empty() && value != "0" && value != "false" && value != "no"
}

/// Embedder selector from the environment, if set
pub fn embeddings_selector() -> Option<String> {
    std::env::var(EMBEDDINGS_ENV)
        .ok()
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
}
