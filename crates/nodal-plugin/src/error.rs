//! Error types for nodal-plugin.

use std::path::PathBuf;

use thiserror::Error;

use crate::host::PluginHandle;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to load {path}: {cause}")]
    Open { path: PathBuf, cause: String },

    #[error("module does not export {0}")]
    MissingSymbol(String),

    #[error("module info has no name or version")]
    MissingModuleInfo,

    #[error("module {module} was built for interface {found}, host expects {expected}")]
    VersionMismatch {
        module: String,
        expected: String,
        found: String,
    },

    #[error("malformed version string: {0:?}")]
    MalformedVersion(String),

    #[error("factory of module {module} failed with code {code}")]
    FactoryFailed { module: String, code: i32 },

    #[error("module {0} exports no devices")]
    NoDevices(String),

    #[error("module {module} reports {count} devices, more than the host accepts")]
    TooManyDevices { module: String, count: usize },

    #[error("module {0} is already loaded")]
    AlreadyLoaded(String),

    #[error("no loaded module with handle {0}")]
    UnknownHandle(PluginHandle),

    #[error("device {device} is still used by models {}", models.join(", "))]
    InUse { device: String, models: Vec<String> },
}

pub type Result<T> = std::result::Result<T, LoadError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        let err = LoadError::InUse {
            device: "nlres".into(),
            models: vec!["n1".into(), "n2".into()],
        };
        assert_eq!(err.to_string(), "device nlres is still used by models n1, n2");

        let err = LoadError::VersionMismatch {
            module: "nlres".into(),
            expected: "1.0.0".into(),
            found: "2.0.0".into(),
        };
        assert!(err.to_string().contains("expects 1.0.0"));
    }
}
