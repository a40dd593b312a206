//! Node identifiers and lazy node enumeration.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Ordinal identifier of a keg node.
///
/// A node with id `42` lives in the `"42"` directory of its keg. Ordering is
/// numeric, so `NodeId(2) < NodeId(10)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(u64);

impl NodeId {
    /// Create a node id from its numeric value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Numeric value of the id.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// The id following this one, or `None` at `u64::MAX`.
    #[must_use]
    pub const fn checked_next(self) -> Option<Self> {
        match self.0.checked_add(1) {
            Some(value) => Some(Self(value)),
            None => None,
        }
    }

    /// Extract the first all-digit segment of a slash-separated path.
    ///
    /// Returns `None` when no segment qualifies, which is a normal outcome
    /// for paths like `"keg"` or `"dex/tags.yaml"`.
    ///
    /// # Examples
    ///
    /// ```
    /// use keg_storage::NodeId;
    ///
    /// assert_eq!(NodeId::from_path("12/README.md"), Some(NodeId::new(12)));
    /// assert_eq!(NodeId::from_path("../3"), Some(NodeId::new(3)));
    /// assert_eq!(NodeId::from_path("dex/nodes.tsv"), None);
    /// ```
    #[must_use]
    pub fn from_path(path: &str) -> Option<Self> {
        path.split(['/', '\\'])
            .find_map(|segment| segment.parse::<Self>().ok())
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Error returned when a string is not a valid node id.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid node id: {0:?}")]
pub struct ParseNodeIdError(String);

impl FromStr for NodeId {
    type Err = ParseNodeIdError;

    /// Parse an all-digit string. Signs, whitespace and empty strings are rejected.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ParseNodeIdError(s.to_owned()));
        }
        s.parse::<u64>()
            .map(Self)
            .map_err(|_| ParseNodeIdError(s.to_owned()))
    }
}

impl From<u64> for NodeId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Ascending, deduplicated sequence of node ids produced by
/// [`Storage::list_nodes`](crate::Storage::list_nodes).
///
/// Backends collect entry names once per call, so iteration itself never
/// touches the backend and a new call always starts from the beginning.
#[derive(Debug, Clone)]
pub struct NodeIds {
    inner: std::vec::IntoIter<NodeId>,
}

impl NodeIds {
    /// Build a sequence from top-level entry names, keeping only node ids.
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::from_ids(
            names
                .into_iter()
                .filter_map(|name| name.as_ref().parse::<NodeId>().ok()),
        )
    }

    /// Build a sequence from ids in any order.
    pub fn from_ids(ids: impl IntoIterator<Item = NodeId>) -> Self {
        let mut ids: Vec<NodeId> = ids.into_iter().collect();
        ids.sort_unstable();
        ids.dedup();
        Self {
            inner: ids.into_iter(),
        }
    }

    /// An empty sequence.
    #[must_use]
    pub fn empty() -> Self {
        Self::from_ids([])
    }
}

impl Iterator for NodeIds {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl DoubleEndedIterator for NodeIds {
    fn next_back(&mut self) -> Option<NodeId> {
        self.inner.next_back()
    }
}

impl ExactSizeIterator for NodeIds {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordering_is_numeric() {
        assert!(NodeId::new(2) < NodeId::new(10));
        assert!(NodeId::new(10) > NodeId::new(9));
        assert_eq!(NodeId::new(5), NodeId::new(5));
    }

    #[test]
    fn test_from_str_accepts_digits_only() {
        assert_eq!("0".parse::<NodeId>(), Ok(NodeId::new(0)));
        assert_eq!("0042".parse::<NodeId>(), Ok(NodeId::new(42)));
        assert!("".parse::<NodeId>().is_err());
        assert!("+1".parse::<NodeId>().is_err());
        assert!("12a".parse::<NodeId>().is_err());
        assert!(" 1".parse::<NodeId>().is_err());
    }

    #[test]
    fn test_checked_next_stops_at_max() {
        assert_eq!(NodeId::new(41).checked_next(), Some(NodeId::new(42)));
        assert_eq!(NodeId::new(u64::MAX).checked_next(), None);
    }

    #[test]
    fn test_from_str_rejects_overflow() {
        assert!("99999999999999999999999".parse::<NodeId>().is_err());
    }

    #[test]
    fn test_from_path_first_digit_segment() {
        assert_eq!(NodeId::from_path("12/README.md"), Some(NodeId::new(12)));
        assert_eq!(
            NodeId::from_path("/home/user/keg/7/meta.yaml"),
            Some(NodeId::new(7))
        );
        assert_eq!(NodeId::from_path("a/3/4"), Some(NodeId::new(3)));
    }

    #[test]
    fn test_from_path_without_id() {
        assert_eq!(NodeId::from_path("keg"), None);
        assert_eq!(NodeId::from_path("dex/tags.yaml"), None);
        assert_eq!(NodeId::from_path(""), None);
        assert_eq!(NodeId::from_path("v1.2/notes"), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(NodeId::new(13).to_string(), "13");
    }

    #[test]
    fn test_node_ids_sorted_and_filtered() {
        let ids: Vec<_> =
            NodeIds::from_names(["13", "dex", "2", "0", "keg", "5", "1", ".git"]).collect();

        assert_eq!(
            ids,
            [0, 1, 2, 5, 13].map(NodeId::new).to_vec()
        );
    }

    #[test]
    fn test_node_ids_dedup() {
        let ids: Vec<_> = NodeIds::from_names(["3", "03", "3"]).collect();

        assert_eq!(ids, vec![NodeId::new(3)]);
    }

    #[test]
    fn test_node_ids_exact_size() {
        let ids = NodeIds::from_names(["1", "2", "x"]);

        assert_eq!(ids.len(), 2);
    }
}
