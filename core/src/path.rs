use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::internal::*;

/// An immutable dotted-path key naming a rewritable callable:
/// `module.Class.member` or just `module.function`.
///
/// Cheap to clone; comparison and hashing are on the full path.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QualifiedName(Arc<str>);

impl QualifiedName {
    pub fn new(path: impl AsRef<str>) -> PortResult<QualifiedName> {
        let path = path.as_ref();
        ensure!(!path.is_empty(), "empty qualified name");
        ensure!(
            path.split('.').all(|seg| !seg.is_empty()),
            "empty segment in qualified name `{path}'"
        );
        Ok(QualifiedName(path.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The final segment: the function or method name.
    pub fn member(&self) -> &str {
        self.0.rsplit('.').next().unwrap()
    }

    /// Everything before the final segment, empty for a bare name.
    pub fn scope(&self) -> &str {
        match self.0.rfind('.') {
            Some(ix) => &self.0[..ix],
            None => "",
        }
    }
}

impl FromStr for QualifiedName {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> PortResult<QualifiedName> {
        QualifiedName::new(s)
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn splits_scope_and_member() {
        let name = QualifiedName::new("vision.detection.DetectionTransformer.forward").unwrap();
        assert_eq!(name.member(), "forward");
        assert_eq!(name.scope(), "vision.detection.DetectionTransformer");
    }

    #[test]
    fn bare_name_has_empty_scope() {
        let name = QualifiedName::new("forward").unwrap();
        assert_eq!(name.member(), "forward");
        assert_eq!(name.scope(), "");
    }

    #[test]
    fn rejects_malformed_paths() {
        assert!(QualifiedName::new("").is_err());
        assert!(QualifiedName::new("a..b").is_err());
        assert!(QualifiedName::new(".a").is_err());
    }
}
