//! Version constraint parsing and checking.
//!
//! Used for two things: a manifest's `compatible_with` minimum host version,
//! and the version constraints an extension declares for external packages.
//!
//! Supported syntax:
//!
//! - comparison operators `>=`, `>`, `<=`, `<`, `==`, `=`, `!=`
//! - caret (`^1.2`) and tilde (`~1.2`) ranges
//! - wildcards (`*`, `1.*`, `1.2.*`)
//! - AND groups separated by commas or whitespace (`>=1.0, <2.0`)
//! - OR alternatives separated by `||` (`^1.0 || ^2.0`)
//!
//! Short versions are padded: `1.2` is `1.2.0`, `1` is `1.0.0`.
//!
//! # Examples
//!
//! ```
//! use ext_registry::version::VersionConstraint;
//!
//! let constraint = VersionConstraint::parse(">=2.1").unwrap();
//! assert!(constraint.satisfies("2.1.0"));
//! assert!(!constraint.satisfies("2.0.9"));
//!
//! let constraint = VersionConstraint::parse("^1.4 || ^2.0").unwrap();
//! assert!(constraint.satisfies("2.3.0"));
//! assert!(!constraint.satisfies("3.0.0"));
//! ```

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CompareOp {
    Gte,
    Gt,
    Lte,
    Lt,
    Eq,
    Ne,
}

/// A single version specifier: an operator paired with a version.
#[derive(Debug, Clone)]
struct Specifier {
    op: CompareOp,
    version: semver::Version,
}

impl Specifier {
    fn new(op: CompareOp, version: semver::Version) -> Self {
        Self { op, version }
    }

    fn matches(&self, candidate: &semver::Version) -> bool {
        match self.op {
            CompareOp::Gte => candidate >= &self.version,
            CompareOp::Gt => candidate > &self.version,
            CompareOp::Lte => candidate <= &self.version,
            CompareOp::Lt => candidate < &self.version,
            CompareOp::Eq => candidate == &self.version,
            CompareOp::Ne => candidate != &self.version,
        }
    }
}

/// A parsed version constraint that can be checked against concrete versions.
///
/// Holds one or more alternatives; a version satisfies the constraint when
/// every specifier of at least one alternative matches it. An alternative
/// with no specifiers matches everything.
#[derive(Debug, Clone)]
pub struct VersionConstraint {
    alternatives: Vec<Vec<Specifier>>,
    raw: String,
}

impl VersionConstraint {
    /// Parse a version constraint string.
    pub fn parse(constraint: &str) -> Result<Self> {
        let raw = constraint.trim().to_string();
        if raw.is_empty() {
            return Err(Error::VersionConstraintParse {
                constraint: raw,
                reason: "empty constraint".to_string(),
            });
        }

        let mut alternatives = Vec::new();
        for alternative in raw.split("||") {
            let mut specifiers = Vec::new();
            for token in tokenize(alternative) {
                specifiers.extend(parse_token(&token)?);
            }
            alternatives.push(specifiers);
        }

        Ok(Self { alternatives, raw })
    }

    /// Check if a version string satisfies this constraint.
    ///
    /// Returns `false` if the version string cannot be parsed.
    pub fn satisfies(&self, version: &str) -> bool {
        match normalize_version(version) {
            Ok(parsed) => self.satisfies_version(&parsed),
            Err(_) => false,
        }
    }

    /// Check if a `semver::Version` satisfies this constraint.
    pub fn satisfies_version(&self, version: &semver::Version) -> bool {
        self.alternatives
            .iter()
            .any(|group| group.iter().all(|spec| spec.matches(version)))
    }

    /// Return the original constraint string.
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl std::fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Split an AND group into tokens, gluing a bare operator to the version after it
/// so that `>= 1.2` and `>=1.2` read the same.
fn tokenize(group: &str) -> Vec<String> {
    let mut tokens: Vec<String> = Vec::new();
    let mut pending_op: Option<String> = None;

    for piece in group.split(|c: char| c == ',' || c.is_whitespace()) {
        if piece.is_empty() {
            continue;
        }
        if piece.chars().all(|c| matches!(c, '<' | '>' | '=' | '!' | '^' | '~')) {
            pending_op = Some(piece.to_string());
            continue;
        }
        match pending_op.take() {
            Some(op) => tokens.push(format!("{op}{piece}")),
            None => tokens.push(piece.to_string()),
        }
    }

    tokens
}

fn parse_token(token: &str) -> Result<Vec<Specifier>> {
    let invalid = |reason: String| Error::VersionConstraintParse {
        constraint: token.to_string(),
        reason,
    };

    if token == "*" {
        return Ok(Vec::new());
    }

    if let Some(rest) = token.strip_prefix('^') {
        let (lower, parts) = parse_partial(rest).map_err(invalid)?;
        let upper = if lower.major > 0 || parts == 1 {
            semver::Version::new(lower.major + 1, 0, 0)
        } else if lower.minor > 0 || parts == 2 {
            semver::Version::new(0, lower.minor + 1, 0)
        } else {
            semver::Version::new(0, 0, lower.patch + 1)
        };
        return Ok(vec![
            Specifier::new(CompareOp::Gte, lower),
            Specifier::new(CompareOp::Lt, upper),
        ]);
    }

    if let Some(rest) = token.strip_prefix('~') {
        let (lower, parts) = parse_partial(rest).map_err(invalid)?;
        let upper = if parts == 1 {
            semver::Version::new(lower.major + 1, 0, 0)
        } else {
            semver::Version::new(lower.major, lower.minor + 1, 0)
        };
        return Ok(vec![
            Specifier::new(CompareOp::Gte, lower),
            Specifier::new(CompareOp::Lt, upper),
        ]);
    }

    if let Some(prefix) = token.strip_suffix(".*") {
        let (lower, parts) = parse_partial(prefix).map_err(invalid)?;
        let upper = if parts == 1 {
            semver::Version::new(lower.major + 1, 0, 0)
        } else {
            semver::Version::new(lower.major, lower.minor + 1, 0)
        };
        return Ok(vec![
            Specifier::new(CompareOp::Gte, lower),
            Specifier::new(CompareOp::Lt, upper),
        ]);
    }

    let (op, version_str) = if let Some(rest) = token.strip_prefix(">=") {
        (CompareOp::Gte, rest)
    } else if let Some(rest) = token.strip_prefix("<=") {
        (CompareOp::Lte, rest)
    } else if let Some(rest) = token.strip_prefix("!=") {
        (CompareOp::Ne, rest)
    } else if let Some(rest) = token.strip_prefix("==") {
        (CompareOp::Eq, rest)
    } else if let Some(rest) = token.strip_prefix('=') {
        (CompareOp::Eq, rest)
    } else if let Some(rest) = token.strip_prefix('>') {
        (CompareOp::Gt, rest)
    } else if let Some(rest) = token.strip_prefix('<') {
        (CompareOp::Lt, rest)
    } else {
        // Bare version implies ==
        (CompareOp::Eq, token)
    };

    let version = normalize_version(version_str).map_err(invalid)?;
    Ok(vec![Specifier::new(op, version)])
}

/// Parse `1`, `1.2` or `1.2.3` and report how many components were given.
fn parse_partial(s: &str) -> std::result::Result<(semver::Version, usize), String> {
    let s = s.trim().trim_start_matches('v');
    let parts = s.split('.').count();
    normalize_version(s).map(|v| (v, parts))
}

/// Normalize a version string to semver by padding missing minor/patch components.
///
/// - `"2.4"` -> `"2.4.0"`
/// - `"v2"` -> `"2.0.0"`
pub fn normalize_version(s: &str) -> std::result::Result<semver::Version, String> {
    let s = s.trim().trim_start_matches('v');

    if let Ok(v) = semver::Version::parse(s) {
        return Ok(v);
    }

    let padded = match s.split('.').count() {
        1 => format!("{s}.0.0"),
        2 => format!("{s}.0"),
        _ => s.to_string(),
    };
    semver::Version::parse(&padded).map_err(|e| format!("invalid version '{s}': {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_parse_empty_rejected() {
        assert!(VersionConstraint::parse("").is_err());
        assert!(VersionConstraint::parse("   ").is_err());
    }

    #[test]
    fn test_parse_garbage_rejected() {
        assert!(VersionConstraint::parse(">=abc").is_err());
    }

    #[rstest]
    #[case(">=2.1", "2.1.0", true)]
    #[case(">=2.1", "2.0.9", false)]
    #[case(">= 2.1", "3.0.0", true)]
    #[case("<3", "2.9.9", true)]
    #[case("<3", "3.0.0", false)]
    #[case(">=1.0, <2.0", "1.5.0", true)]
    #[case(">=1.0 <2.0", "2.0.0", false)]
    #[case("==1.2.3", "1.2.3", true)]
    #[case("=1.2.3", "1.2.4", false)]
    #[case("!=1.2", "1.2.0", false)]
    #[case("1.2.3", "1.2.3", true)]
    #[case("*", "0.0.1", true)]
    #[case("1.2.*", "1.2.9", true)]
    #[case("1.2.*", "1.3.0", false)]
    #[case("^1.4", "1.9.0", true)]
    #[case("^1.4", "2.0.0", false)]
    #[case("^0.3", "0.3.7", true)]
    #[case("^0.3", "0.4.0", false)]
    #[case("~1.4", "1.4.9", true)]
    #[case("~1.4", "1.5.0", false)]
    #[case("^1.0 || ^2.0", "2.3.0", true)]
    #[case("^1.0 || ^2.0", "3.0.0", false)]
    fn test_satisfies(#[case] constraint: &str, #[case] version: &str, #[case] expected: bool) {
        let c = VersionConstraint::parse(constraint).unwrap();
        assert_eq!(c.satisfies(version), expected, "{constraint} vs {version}");
    }

    #[test]
    fn test_satisfies_invalid_version_returns_false() {
        let c = VersionConstraint::parse(">=1.0").unwrap();
        assert!(!c.satisfies("not-a-version"));
    }

    #[test]
    fn test_normalize_pads_components() {
        assert_eq!(normalize_version("2").unwrap(), semver::Version::new(2, 0, 0));
        assert_eq!(normalize_version("2.4").unwrap(), semver::Version::new(2, 4, 0));
        assert_eq!(normalize_version(" v2.4.1 ").unwrap(), semver::Version::new(2, 4, 1));
    }

    #[test]
    fn test_display_keeps_raw() {
        let c = VersionConstraint::parse(">=1.0, <2.0").unwrap();
        assert_eq!(format!("{c}"), ">=1.0, <2.0");
    }
}
