//! Server version definitions.

use core::fmt;
use core::str::FromStr;

use crate::error::ProtocolError;

/// Database server version as reported in the `FullVersionString` connect option.
///
/// The textual form is `major.minor.revision.patch.build`; trailing components
/// may be omitted and default to zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct HdbVersion {
    /// Major release (1 = HANA 1, 2 = HANA 2, 4 = cloud).
    pub major: u64,
    /// Minor release.
    pub minor: u64,
    /// Support package revision.
    pub revision: u64,
    /// Patch level.
    pub patch: u64,
    /// Build number.
    pub build: u64,
}

impl HdbVersion {
    /// Create a version from its components.
    #[must_use]
    pub const fn new(major: u64, minor: u64, revision: u64, patch: u64, build: u64) -> Self {
        Self {
            major,
            minor,
            revision,
            patch,
            build,
        }
    }

    /// Whether this is a HANA 1 server.
    #[must_use]
    pub const fn is_hana1(&self) -> bool {
        self.major == 1
    }

    /// Whether the version carries no information.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

impl FromStr for HdbVersion {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = [0u64; 5];
        // build can carry trailing text, e.g. "1599046000 (fa/CE2020.34)"
        let trimmed = s.split_whitespace().next().unwrap_or("");
        if trimmed.is_empty() {
            return Ok(Self::default());
        }
        for (i, component) in trimmed.split('.').enumerate().take(5) {
            parts[i] = component
                .parse()
                .map_err(|_| ProtocolError::Malformed(format!("invalid version string {s:?}")))?;
        }
        Ok(Self::new(parts[0], parts[1], parts[2], parts[3], parts[4]))
    }
}

impl fmt::Display for HdbVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}.{}",
            self.major, self.minor, self.revision, self.patch, self.build
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full() {
        let v: HdbVersion = "2.00.056.00.1624618329".parse().unwrap();
        assert_eq!(v, HdbVersion::new(2, 0, 56, 0, 1_624_618_329));
        assert_eq!(v.to_string(), "2.0.56.0.1624618329");
    }

    #[test]
    fn test_parse_partial_and_suffix() {
        let v: HdbVersion = "4.00.000.00.1599046000 (fa/CE2020.34)".parse().unwrap();
        assert_eq!(v.major, 4);
        let short: HdbVersion = "1.00".parse().unwrap();
        assert!(short.is_hana1());
        assert!("".parse::<HdbVersion>().unwrap().is_empty());
    }

    #[test]
    fn test_ordering() {
        let a: HdbVersion = "2.00.045".parse().unwrap();
        let b: HdbVersion = "2.00.056".parse().unwrap();
        assert!(a < b);
        assert!("x.1".parse::<HdbVersion>().is_err());
    }
}
