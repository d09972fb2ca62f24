use std::fmt;

/// A position inside a composite value: the chain of member names from the
/// root of a projection down to a leaf, e.g. `C1.T1.V1`.
///
/// Paths are plain values. They carry no aliases, so a path computed before
/// a select is wrapped still addresses the same column afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ModelPath {
    segments: Vec<String>,
}

impl ModelPath {
    pub const EMPTY: ModelPath = ModelPath { segments: Vec::new() };

    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            segments: segments.into_iter().map(Into::into).collect(),
        }
    }

    pub fn single(segment: impl Into<String>) -> Self {
        Self {
            segments: vec![segment.into()],
        }
    }

    pub fn from_dotted(path: &str) -> Self {
        if path.is_empty() {
            return Self::EMPTY;
        }
        Self::new(path.split('.'))
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn first(&self) -> Option<&str> {
        self.segments.first().map(String::as_str)
    }

    pub fn last(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    pub fn append(&self, segment: impl Into<String>) -> Self {
        let mut segments = self.segments.clone();
        segments.push(segment.into());
        Self { segments }
    }

    pub fn prepend(&self, segment: impl Into<String>) -> Self {
        let mut segments = Vec::with_capacity(self.segments.len() + 1);
        segments.push(segment.into());
        segments.extend(self.segments.iter().cloned());
        Self { segments }
    }

    /// `self` followed by `other`.
    pub fn concat(&self, other: &ModelPath) -> Self {
        let mut segments = self.segments.clone();
        segments.extend(other.segments.iter().cloned());
        Self { segments }
    }

    /// Segment-wise prefix test; `A` is not a prefix of `Ab`.
    pub fn starts_with(&self, prefix: &ModelPath) -> bool {
        self.segments.len() >= prefix.segments.len()
            && self.segments.iter().zip(&prefix.segments).all(|(a, b)| a == b)
    }

    pub fn ends_with(&self, suffix: &ModelPath) -> bool {
        self.segments.len() >= suffix.segments.len()
            && self
                .segments
                .iter()
                .rev()
                .zip(suffix.segments.iter().rev())
                .all(|(a, b)| a == b)
    }

    /// The remainder after `prefix`, if `prefix` is a proper prefix.
    pub fn strip_prefix(&self, prefix: &ModelPath) -> Option<ModelPath> {
        if self.segments.len() > prefix.segments.len() && self.starts_with(prefix) {
            Some(Self {
                segments: self.segments[prefix.segments.len()..].to_vec(),
            })
        } else {
            None
        }
    }

    /// Output column name for this path: segments joined with `_`.
    pub fn column_alias(&self) -> String {
        self.segments.join("_")
    }
}

impl fmt::Display for ModelPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("."))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dotted_round_trip() {
        let p = ModelPath::from_dotted("C1.T1.V1");
        assert_eq!(p.len(), 3);
        assert_eq!(p.to_string(), "C1.T1.V1");
        assert!(ModelPath::from_dotted("").is_empty());
    }

    #[test]
    fn test_prefix_and_suffix() {
        let p = ModelPath::from_dotted("C1.T1.V1");
        assert!(p.starts_with(&ModelPath::from_dotted("C1.T1")));
        assert!(!p.starts_with(&ModelPath::from_dotted("C")));
        assert!(p.ends_with(&ModelPath::from_dotted("T1.V1")));
        assert!(p.starts_with(&ModelPath::EMPTY));
    }

    #[test]
    fn test_strip_prefix_is_proper() {
        let p = ModelPath::from_dotted("a.b");
        assert_eq!(p.strip_prefix(&ModelPath::single("a")), Some(ModelPath::single("b")));
        assert_eq!(p.strip_prefix(&p), None);
    }

    #[test]
    fn test_append_prepend_concat() {
        let p = ModelPath::single("b");
        assert_eq!(p.prepend("a").append("c").to_string(), "a.b.c");
        assert_eq!(p.concat(&ModelPath::from_dotted("x.y")).to_string(), "b.x.y");
    }

    #[test]
    fn test_column_alias_joins_with_underscore() {
        assert_eq!(ModelPath::from_dotted("Student.Name").column_alias(), "Student_Name");
    }
}
