//! Interface version gate.
//!
//! A module may be loaded when its `major.minor` equals the host's; a
//! different patch level is accepted with a warning.

use std::fmt;
use std::str::FromStr;

use crate::error::{LoadError, Result};

/// A `major.minor.patch` interface version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AbiVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl FromStr for AbiVersion {
    type Err = LoadError;

    fn from_str(s: &str) -> Result<Self> {
        let malformed = || LoadError::MalformedVersion(s.to_string());
        let mut parts = s.trim().split('.');
        let mut next = || -> Result<u32> {
            parts
                .next()
                .and_then(|p| p.parse().ok())
                .ok_or_else(malformed)
        };
        let version = AbiVersion {
            major: next()?,
            minor: next()?,
            patch: next()?,
        };
        if parts.next().is_some() {
            return Err(malformed());
        }
        Ok(version)
    }
}

impl fmt::Display for AbiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// How a module's version relates to the host's.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compatibility {
    Exact,
    /// Same `major.minor`, different patch.
    PatchDiffers,
}

/// Check the version `found` reported by `module` against `host`.
pub fn check_version(module: &str, found: &str, host: &str) -> Result<Compatibility> {
    let ours: AbiVersion = host.parse()?;
    let theirs: AbiVersion = found.parse()?;
    if (ours.major, ours.minor) != (theirs.major, theirs.minor) {
        return Err(LoadError::VersionMismatch {
            module: module.to_string(),
            expected: ours.to_string(),
            found: theirs.to_string(),
        });
    }
    if ours.patch != theirs.patch {
        log::warn!(
            "module {} was built for interface {}, host is {}; loading anyway",
            module,
            theirs,
            ours
        );
        return Ok(Compatibility::PatchDiffers);
    }
    Ok(Compatibility::Exact)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        let v: AbiVersion = "1.2.3".parse().unwrap();
        assert_eq!((v.major, v.minor, v.patch), (1, 2, 3));
        assert_eq!(v.to_string(), "1.2.3");
        for bad in ["", "1.2", "1.2.3.4", "1.x.0", "one.two.three"] {
            assert!(
                matches!(bad.parse::<AbiVersion>(), Err(LoadError::MalformedVersion(_))),
                "{:?} parsed",
                bad
            );
        }
    }

    #[test]
    fn test_gate() {
        assert_eq!(check_version("m", "1.0.0", "1.0.0").unwrap(), Compatibility::Exact);
        assert_eq!(
            check_version("m", "1.0.7", "1.0.0").unwrap(),
            Compatibility::PatchDiffers
        );
        assert!(matches!(
            check_version("m", "1.1.0", "1.0.0"),
            Err(LoadError::VersionMismatch { .. })
        ));
        assert!(matches!(
            check_version("m", "2.0.0", "1.0.0"),
            Err(LoadError::VersionMismatch { .. })
        ));
    }
}
