//! Engine version gating
//!
//! Some remediations only work on newer engine versions (the unicode fixes
//! use REGEXP_REPLACE, which MySQL grew in 8.0). The gate parses the leading
//! major version out of the engine's self-reported version string and rejects
//! an operation before any of its fixes execute.

use crate::catalog::Category;
use crate::error::{Error, Result};

/// An operation with a minimum supported major version
#[derive(Debug, Clone, Copy)]
pub struct Operation {
    pub name: &'static str,
    pub min_major: u32,
}

/// Unicode remediation relies on REGEXP_REPLACE
pub const UNICODE_FIX: Operation = Operation {
    name: "unicode fixes",
    min_major: 8,
};

/// The gating operation for a category's fixes, if the category is
/// version-dependent
pub fn requirement_for(category: Category) -> Option<&'static Operation> {
    match category {
        Category::Unicode => Some(&UNICODE_FIX),
        _ => None,
    }
}

/// Parse the leading major version from a raw version string
/// (e.g. `"8.0.36-log"` -> 8)
fn parse_major(raw: &str) -> Option<u32> {
    let first = raw.split('.').next()?;
    let digits: String = first.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

/// Reject the operation unless the engine's major version supports it
pub fn enforce(raw_version: &str, operation: &Operation) -> Result<()> {
    let unsupported = || Error::VersionUnsupported {
        detected: raw_version.to_string(),
        required: operation.min_major,
        operation: operation.name,
    };

    let major = parse_major(raw_version).ok_or_else(unsupported)?;
    if major < operation.min_major {
        return Err(unsupported());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn old_mysql_is_rejected_for_unicode_fixes() {
        let err = enforce("5.7.31", &UNICODE_FIX).unwrap_err();
        match err {
            Error::VersionUnsupported { detected, required, .. } => {
                assert_eq!(detected, "5.7.31");
                assert_eq!(required, 8);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn mysql_8_passes_the_unicode_gate() {
        enforce("8.0.36", &UNICODE_FIX).unwrap();
        enforce("8.0.36-log", &UNICODE_FIX).unwrap();
        enforce("11.2.0", &UNICODE_FIX).unwrap();
    }

    #[test]
    fn garbage_version_strings_are_rejected() {
        assert!(enforce("", &UNICODE_FIX).is_err());
        assert!(enforce("mariadb", &UNICODE_FIX).is_err());
    }

    #[test]
    fn only_unicode_is_version_gated() {
        assert!(requirement_for(Category::Unicode).is_some());
        assert!(requirement_for(Category::Artifacts).is_none());
        assert!(requirement_for(Category::Varchar).is_none());
        assert!(requirement_for(Category::VarcharExtended).is_none());
    }
}
