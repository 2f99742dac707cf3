//! Artifact identifier parsing and archive filename filtering.
//!
//! # Invariants
//! - The suffix filter is ASCII case-insensitive and exact: trailing
//!   whitespace in a filename is never accepted.
//! - A parsed classifier is always lowercase (the grammar only admits
//!   `[a-z-]`), so identifier ordering can compare it directly.
//!
//! # Design Notes
//! - The identifier is the pairing key between the last-build and build
//!   directories. Ordering is case-insensitive on artifact id and type so
//!   that two artifacts differing only in case collide loudly instead of
//!   merging against the wrong partner.

use std::cmp::Ordering;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

/// Archive suffixes eligible for timestamp merging. `.pom` files and other
/// build outputs are deliberately not included.
const ARTIFACT_SUFFIXES: [&str; 4] = [".aar", ".jar", ".war", ".zip"];

/// Returns true when the filename names a mergeable archive.
pub fn is_artifact_filename(name: &str) -> bool {
    ARTIFACT_SUFFIXES
        .iter()
        .any(|suffix| ends_with_ignore_ascii_case(name.as_bytes(), suffix.as_bytes()))
}

fn ends_with_ignore_ascii_case(hay: &[u8], suf: &[u8]) -> bool {
    if suf.len() > hay.len() {
        return false;
    }
    hay[hay.len() - suf.len()..].eq_ignore_ascii_case(suf)
}

/// The version starts at the first hyphen followed by a digit.
static VERSION_START: LazyLock<Regex> = LazyLock::new(|| Regex::new("-[0-9]").unwrap());

/// The type is everything after the final period, ASCII letters only.
static TYPE_SUFFIX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^.*\.([a-zA-Z]+)$").unwrap());

/// The classifier is a final `-<lowercase-or-hyphen>` run, matched after
/// the type suffix has been stripped.
static CLASSIFIER_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^.*?-([a-z-]+)$").unwrap());

/// A filename could not be decomposed into `(artifactId, classifier, type)`.
#[derive(Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum IdentifierError {
    /// No `-<digit>` version separator, or nothing before it.
    ArtifactId { filename: String },
    /// No `.<letters>` type suffix.
    Type { filename: String },
}

impl fmt::Display for IdentifierError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ArtifactId { filename } => {
                write!(f, "unable to parse artifactId: {filename}")
            }
            Self::Type { filename } => write!(f, "unable to parse type: {filename}"),
        }
    }
}

impl std::error::Error for IdentifierError {}

/// Pairing key `(artifactId, classifier, type)` parsed from an archive
/// filename. The version is deliberately not part of the key: successive
/// builds of the same artifact carry different versions.
#[derive(Clone, Debug)]
pub struct Identifier {
    artifact_id: String,
    classifier: String,
    kind: String,
}

impl Identifier {
    pub fn parse(filename: &str) -> Result<Self, IdentifierError> {
        let artifact_id = parse_artifact_id(filename)?.to_string();
        let kind = parse_type(filename)?.to_string();
        let classifier = parse_classifier(filename, &kind).to_string();
        Ok(Self {
            artifact_id,
            classifier,
            kind,
        })
    }

    pub fn artifact_id(&self) -> &str {
        &self.artifact_id
    }

    /// The optional classifier; empty when the filename carries none.
    pub fn classifier(&self) -> &str {
        &self.classifier
    }

    /// The archive type (`jar`, `zip`, ...), preserving the filename's case.
    pub fn kind(&self) -> &str {
        &self.kind
    }
}

/// Everything up to the first hyphen-digit boundary.
pub fn parse_artifact_id(filename: &str) -> Result<&str, IdentifierError> {
    match VERSION_START.find(filename) {
        Some(m) if m.start() >= 1 => Ok(&filename[..m.start()]),
        _ => Err(IdentifierError::ArtifactId {
            filename: filename.to_string(),
        }),
    }
}

/// The ASCII-letter run after the final period.
pub fn parse_type(filename: &str) -> Result<&str, IdentifierError> {
    TYPE_SUFFIX
        .captures(filename)
        .map(|c| c.get(1).unwrap().as_str())
        .ok_or_else(|| IdentifierError::Type {
            filename: filename.to_string(),
        })
}

/// The trailing lowercase run before the type suffix, or empty.
pub fn parse_classifier<'a>(filename: &'a str, kind: &str) -> &'a str {
    debug_assert!(filename.len() >= kind.len() + 1);
    let without_type = &filename[..filename.len() - (kind.len() + 1)];
    CLASSIFIER_SUFFIX
        .captures(without_type)
        .map(|c| c.get(1).unwrap().as_str())
        .unwrap_or("")
}

fn cmp_ignore_ascii_case(a: &str, b: &str) -> Ordering {
    let left = a.bytes().map(|b| b.to_ascii_lowercase());
    let right = b.bytes().map(|b| b.to_ascii_lowercase());
    left.cmp(right)
}

impl Ord for Identifier {
    fn cmp(&self, other: &Self) -> Ordering {
        cmp_ignore_ascii_case(&self.artifact_id, &other.artifact_id)
            .then_with(|| self.classifier.cmp(&other.classifier))
            .then_with(|| cmp_ignore_ascii_case(&self.kind, &other.kind))
    }
}

impl PartialOrd for Identifier {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Identifier {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Identifier {}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-*", self.artifact_id)?;
        if !self.classifier.is_empty() {
            write!(f, "-{}", self.classifier)?;
        }
        write!(f, ".{}", self.kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_accepts_archive_suffixes_case_insensitively() {
        for name in [
            "blarg.aar", "blarg.Aar", ".aar", "blarg.jar", "blarg.Jar", ".Jar", "blarg.war",
            "blarg.War", "blarg.zip", "blarg.Zip", ".zip",
        ] {
            assert!(is_artifact_filename(name), "expected accept: {name:?}");
        }
    }

    #[test]
    fn filter_rejects_non_archives() {
        for name in [
            "blarg.pom",
            "blarg.Pom",
            ".pom",
            "jar",
            "war",
            "zip",
            "blarg.jar ",
            "blarg.zip ",
            "blarg.tar.gz",
        ] {
            assert!(!is_artifact_filename(name), "expected reject: {name:?}");
        }
    }

    #[test]
    fn artifact_id_stops_at_version() {
        assert_eq!(
            parse_artifact_id("artifact-1.2.3-SNAPSHOT.jar").unwrap(),
            "artifact"
        );
        assert_eq!(
            parse_artifact_id("multi-part-name-2.0.jar").unwrap(),
            "multi-part-name"
        );
    }

    #[test]
    fn artifact_id_requires_prefix_and_version() {
        assert!(parse_artifact_id("-1.2.3-SNAPSHOT.jar").is_err());
        assert!(parse_artifact_id("artifact-v1.2.3-SNAPSHOT.jar").is_err());
        assert!(parse_artifact_id("artifact.jar").is_err());
    }

    #[test]
    fn type_is_letters_after_final_period() {
        assert_eq!(parse_type("artifact-1.2.3-SNAPSHOT.jar").unwrap(), "jar");
        assert_eq!(parse_type("artifact-1.2.3-SNAPSHOT.Jar").unwrap(), "Jar");
        assert_eq!(
            parse_type("artifact-1.2.3-SNAPSHOT.jar.zip").unwrap(),
            "zip"
        );
        assert!(parse_type("artifact-1").is_err());
        assert!(parse_type("artifact-1.2").is_err());
    }

    #[test]
    fn classifier_is_trailing_lowercase_run() {
        let id = Identifier::parse("artifact-1.2.3-SNAPSHOT.jar").unwrap();
        assert_eq!(
            (id.artifact_id(), id.classifier(), id.kind()),
            ("artifact", "", "jar")
        );

        let id = Identifier::parse("artifact-1.2.3-SNAPSHOT-javadoc.jar").unwrap();
        assert_eq!(id.classifier(), "javadoc");

        let id = Identifier::parse("artifact-1.2.3-SNAPSHOT-test-javadoc.jar").unwrap();
        assert_eq!(id.classifier(), "test-javadoc");
    }

    #[test]
    fn ordering_ignores_ascii_case_on_id_and_type() {
        let a = Identifier::parse("Artifact-1.0.jar").unwrap();
        let b = Identifier::parse("artifact-2.0.Jar").unwrap();
        assert_eq!(a, b);

        let c = Identifier::parse("artifact-2.0-javadoc.jar").unwrap();
        assert_ne!(a, c);
        assert!(a < c);
    }

    #[test]
    fn display_masks_the_version() {
        let id = Identifier::parse("artifact-1.2.3-SNAPSHOT-javadoc.jar").unwrap();
        assert_eq!(id.to_string(), "artifact-*-javadoc.jar");
        let id = Identifier::parse("artifact-1.2.3.zip").unwrap();
        assert_eq!(id.to_string(), "artifact-*.zip");
    }
}
