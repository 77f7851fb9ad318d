//! Identity and ordering types for pairlink.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One of the two tracker instances being kept in sync.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    /// The first tracker instance.
    One,
    /// The second tracker instance.
    Two,
}

impl Side {
    /// The counterpart side.
    pub fn opposite(self) -> Self {
        match self {
            Self::One => Self::Two,
            Self::Two => Self::One,
        }
    }

    /// Numeric label used in payloads and logs ("1" / "2").
    pub fn as_str(self) -> &'static str {
        match self {
            Self::One => "1",
            Self::Two => "2",
        }
    }

    /// Parse a numeric side label.
    pub fn from_number(n: u8) -> Option<Self> {
        match n {
            1 => Some(Self::One),
            2 => Some(Self::Two),
            _ => None,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Side({})", self.as_str())
    }
}

/// A tracker-issued issue key (e.g. `P1-10`).
///
/// Opaque to the engine; only ever compared for equality and used as a
/// lookup key.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct IssueId(String);

impl IssueId {
    /// Wrap a tracker-issued key.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// The raw key string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for IssueId {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

impl fmt::Display for IssueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for IssueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IssueId({})", self.0)
    }
}

/// A tracker-issued comment identifier.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CommentId(String);

impl CommentId {
    /// Wrap a tracker-issued comment id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The raw id string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CommentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for CommentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CommentId({})", self.0)
    }
}

/// An opaque, monotonically comparable marker identifying a specific state
/// of an issue on one side.
///
/// Trackers report these as update timestamps (epoch milliseconds) or
/// version counters. The engine never interprets the value beyond ordering.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct Revision(i64);

impl Revision {
    /// Create a revision from a raw marker value.
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// The raw marker value.
    pub fn value(self) -> i64 {
        self.0
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Revision({})", self.0)
    }
}

/// Direction of a mirrored write between the two sides.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Side one is the source of truth; side two is overwritten.
    OneToTwo,
    /// Side two is the source of truth; side one is overwritten.
    TwoToOne,
}

impl Direction {
    /// The side the data flows from.
    pub fn source(self) -> Side {
        match self {
            Self::OneToTwo => Side::One,
            Self::TwoToOne => Side::Two,
        }
    }

    /// The side the data flows to.
    pub fn target(self) -> Side {
        self.source().opposite()
    }

    /// The direction originating at `source`.
    pub fn from_source(source: Side) -> Self {
        match source {
            Side::One => Self::OneToTwo,
            Side::Two => Self::TwoToOne,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OneToTwo => f.write_str("1->2"),
            Self::TwoToOne => f.write_str("2->1"),
        }
    }
}

impl fmt::Debug for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Direction({})", self)
    }
}

/// The identifier tying together the two sides' representations of one
/// logical issue.
///
/// Until both sides exist the key carries only the single known side;
/// once the mirror is created the record is re-keyed to the full pair.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PairKey {
    /// Issue key on side one, if known.
    pub one: Option<IssueId>,
    /// Issue key on side two, if known.
    pub two: Option<IssueId>,
}

impl PairKey {
    /// A provisional key from the single known side.
    pub fn provisional(side: Side, id: IssueId) -> Self {
        match side {
            Side::One => Self {
                one: Some(id),
                two: None,
            },
            Side::Two => Self {
                one: None,
                two: Some(id),
            },
        }
    }

    /// A complete key from both sides.
    pub fn full(one: IssueId, two: IssueId) -> Self {
        Self {
            one: Some(one),
            two: Some(two),
        }
    }

    /// The issue key on the given side, if known.
    pub fn issue(&self, side: Side) -> Option<&IssueId> {
        match side {
            Side::One => self.one.as_ref(),
            Side::Two => self.two.as_ref(),
        }
    }

    /// Whether both sides are known.
    pub fn is_complete(&self) -> bool {
        self.one.is_some() && self.two.is_some()
    }
}

impl fmt::Display for PairKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let one = self.one.as_ref().map(IssueId::as_str).unwrap_or("-");
        let two = self.two.as_ref().map(IssueId::as_str).unwrap_or("-");
        write!(f, "{one}#{two}")
    }
}

impl fmt::Debug for PairKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PairKey({})", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn side_opposite() {
        assert_eq!(Side::One.opposite(), Side::Two);
        assert_eq!(Side::Two.opposite(), Side::One);
    }

    #[test]
    fn side_from_number() {
        assert_eq!(Side::from_number(1), Some(Side::One));
        assert_eq!(Side::from_number(2), Some(Side::Two));
        assert_eq!(Side::from_number(3), None);
    }

    #[test]
    fn revision_ordering() {
        assert!(Revision::new(100) < Revision::new(200));
        assert_eq!(Revision::new(5), Revision::new(5));
    }

    #[test]
    fn direction_source_and_target() {
        assert_eq!(Direction::OneToTwo.source(), Side::One);
        assert_eq!(Direction::OneToTwo.target(), Side::Two);
        assert_eq!(Direction::from_source(Side::Two), Direction::TwoToOne);
    }

    #[test]
    fn provisional_key_display_uses_placeholder() {
        let key = PairKey::provisional(Side::One, IssueId::from("P1-10"));
        assert_eq!(key.to_string(), "P1-10#-");
        assert!(!key.is_complete());
    }

    #[test]
    fn full_key_display() {
        let key = PairKey::full(IssueId::from("P1-10"), IssueId::from("P2-7"));
        assert_eq!(key.to_string(), "P1-10#P2-7");
        assert!(key.is_complete());
        assert_eq!(key.issue(Side::Two), Some(&IssueId::from("P2-7")));
    }
}
