//! Navigation paths into a time-series tree.

use smallvec::SmallVec;
use std::fmt;

use tickflow_common::ScalarValue;

/// One navigation step: a positional child (bundle field / list element /
/// ref target) or a dict key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathSeg {
    Child(usize),
    Key(ScalarValue),
}

pub type TsPath = SmallVec<[PathSeg; 2]>;

/// `a` is a (non-strict) prefix of `b`.
pub fn is_prefix(a: &[PathSeg], b: &[PathSeg]) -> bool {
    a.len() <= b.len() && a.iter().zip(b.iter()).all(|(x, y)| x == y)
}

/// Paths overlap when either is a prefix of the other: a write below a
/// subscription must wake it, and so must a write above it (a container
/// write touches every child).
pub fn overlaps(a: &[PathSeg], b: &[PathSeg]) -> bool {
    is_prefix(a, b) || is_prefix(b, a)
}

pub fn format_path(path: &[PathSeg]) -> String {
    let mut out = String::new();
    for seg in path {
        match seg {
            PathSeg::Child(i) => out.push_str(&format!(".{i}")),
            PathSeg::Key(k) => out.push_str(&format!("[{k}]")),
        }
    }
    out
}

impl fmt::Display for PathSeg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSeg::Child(i) => write!(f, ".{i}"),
            PathSeg::Key(k) => write!(f, "[{k}]"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_and_overlap() {
        let root: Vec<PathSeg> = vec![];
        let a = vec![PathSeg::Child(0)];
        let ab = vec![PathSeg::Child(0), PathSeg::Key("x".into())];
        let b = vec![PathSeg::Child(1)];

        assert!(is_prefix(&root, &a));
        assert!(is_prefix(&a, &ab));
        assert!(!is_prefix(&ab, &a) || a.len() >= ab.len());
        assert!(overlaps(&a, &ab));
        assert!(overlaps(&ab, &a));
        assert!(!overlaps(&a, &b));
    }
}
