//! YAML document loading.

use std::io;
use std::path::Path;

use serde_yaml::Value;
use thiserror::Error;
use tracing::{debug, error};

/// Errors reading a configuration document.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the file.
    #[error("failed to read config file: {0}")]
    Io(#[from] io::Error),

    /// Failed to parse the YAML document.
    #[error("failed to parse YAML config: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// Read a YAML document, distinguishing a missing file (`Ok(None)`) from
/// IO or parse failure.
pub fn read_document(path: &Path) -> Result<Option<Value>, ConfigError> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    Ok(Some(serde_yaml::from_str(&text)?))
}

/// Read a YAML document, reporting failure instead of propagating it.
///
/// A missing file is ordinary (most modules run on defaults alone) and is
/// logged at debug; an unreadable or unparsable file is reported as an
/// error. Either way the caller proceeds as if the file were absent.
pub fn load_config(path: &Path) -> Option<Value> {
    match read_document(path) {
        Ok(Some(doc)) => Some(doc),
        Ok(None) => {
            debug!("no configuration file {}, using defaults", path.display());
            None
        }
        Err(e) => {
            error!("cannot use configuration file {}: {}", path.display(), e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_document_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = read_document(&dir.path().join("absent.conf")).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_read_document_valid_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mod.conf");
        std::fs::write(&path, "update_every: 5\njobA:\n  host: 127.0.0.1\n").unwrap();

        let doc = read_document(&path).unwrap().unwrap();
        let mapping = doc.as_mapping().unwrap();
        assert_eq!(mapping.len(), 2);
    }

    #[test]
    fn test_read_document_parse_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.conf");
        std::fs::write(&path, "update_every: [unterminated\n").unwrap();

        let result = read_document(&path);
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_load_config_swallows_failures() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.conf");
        std::fs::write(&path, ": not yaml :\n  - ][\n").unwrap();

        assert!(load_config(&path).is_none());
        assert!(load_config(&dir.path().join("absent.conf")).is_none());
    }
}
