use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::domain::utils::id::Rank;
use crate::error::{Error, Result};

/// Ordered set of ranks with a canonical, range-collapsed string form
/// (`"0-3,7,9-10"`). Equal sets always encode identically.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Idset {
    ids: BTreeSet<Rank>,
}

impl Idset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set holding `0..size`.
    pub fn range(size: Rank) -> Self {
        Self { ids: (0..size).collect() }
    }

    pub fn set(&mut self, id: Rank) -> bool {
        self.ids.insert(id)
    }

    pub fn clear(&mut self, id: Rank) -> bool {
        self.ids.remove(&id)
    }

    pub fn test(&self, id: Rank) -> bool {
        self.ids.contains(&id)
    }

    pub fn first(&self) -> Option<Rank> {
        self.ids.first().copied()
    }

    pub fn last(&self) -> Option<Rank> {
        self.ids.last().copied()
    }

    /// Smallest member strictly greater than `id`.
    pub fn next(&self, id: Rank) -> Option<Rank> {
        self.ids.range(id.saturating_add(1)..).next().copied().filter(|next| *next > id)
    }

    pub fn count(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = Rank> + '_ {
        self.ids.iter().copied()
    }

    pub fn union(&self, other: &Idset) -> Idset {
        Idset { ids: self.ids.union(&other.ids).copied().collect() }
    }

    pub fn difference(&self, other: &Idset) -> Idset {
        Idset { ids: self.ids.difference(&other.ids).copied().collect() }
    }

    pub fn intersect(&self, other: &Idset) -> Idset {
        Idset { ids: self.ids.intersection(&other.ids).copied().collect() }
    }

    pub fn is_subset(&self, other: &Idset) -> bool {
        self.ids.is_subset(&other.ids)
    }

    /// Members that are `>= size`, if any.
    pub fn out_of_range(&self, size: Rank) -> Option<Idset> {
        let over: Idset = Idset { ids: self.ids.range(size..).copied().collect() };
        if over.is_empty() { None } else { Some(over) }
    }

    /// Fails with `InvalidArgument` if any member is `>= size`.
    pub fn check_bounds(&self, size: Rank) -> Result<()> {
        match self.out_of_range(size) {
            Some(over) => Err(Error::InvalidArgument(format!("{} {} out of range (size={})", rank_noun(&over), over, size))),
            None => Ok(()),
        }
    }

    /// Decodes `s` and checks every member against `size`. Ranges are
    /// checked before they are expanded.
    pub fn decode_bounded(s: &str, size: Rank) -> Result<Idset> {
        Idset::parse(s, Some(size))
    }

    fn parse(s: &str, bound: Option<Rank>) -> Result<Idset> {
        let mut body = s.trim();
        if let Some(inner) = body.strip_prefix('[').and_then(|rest| rest.strip_suffix(']')) {
            body = inner.trim();
        }

        let mut idset = Idset::new();
        if body.is_empty() {
            return Ok(idset);
        }

        for part in body.split(',') {
            let part = part.trim();
            let (lo, hi) = match part.split_once('-') {
                Some((lo, hi)) => (parse_id(lo, s)?, parse_id(hi, s)?),
                None => {
                    let id = parse_id(part, s)?;
                    (id, id)
                }
            };
            if lo > hi {
                return Err(Error::InvalidArgument(format!("invalid idset '{}': range {}-{} is reversed", s, lo, hi)));
            }
            if let Some(size) = bound.filter(|size| hi >= *size) {
                let first = lo.max(size);
                let over = if first == hi { format!("rank {}", hi) } else { format!("ranks {}-{}", first, hi) };
                return Err(Error::InvalidArgument(format!("{} out of range (size={})", over, size)));
            }
            idset.ids.extend(lo..=hi);
        }
        Ok(idset)
    }

    pub fn encode(&self) -> String {
        self.to_string()
    }
}

/// `"rank"` or `"ranks"` depending on the set size, for error messages.
pub fn rank_noun(idset: &Idset) -> &'static str {
    if idset.count() == 1 { "rank" } else { "ranks" }
}

/// Computes `(added, removed)` between `old` and `new` in a single merge
/// pass. A side with no change is `None`.
pub fn diff(old: &Idset, new: &Idset) -> (Option<Idset>, Option<Idset>) {
    let mut added = Idset::new();
    let mut removed = Idset::new();

    let mut old_iter = old.iter().peekable();
    let mut new_iter = new.iter().peekable();

    loop {
        match (old_iter.peek().copied(), new_iter.peek().copied()) {
            (Some(o), Some(n)) if o == n => {
                old_iter.next();
                new_iter.next();
            }
            (Some(o), Some(n)) if o < n => {
                removed.set(o);
                old_iter.next();
            }
            (Some(_), Some(n)) => {
                added.set(n);
                new_iter.next();
            }
            (Some(o), None) => {
                removed.set(o);
                old_iter.next();
            }
            (None, Some(n)) => {
                added.set(n);
                new_iter.next();
            }
            (None, None) => break,
        }
    }

    let added = if added.is_empty() { None } else { Some(added) };
    let removed = if removed.is_empty() { None } else { Some(removed) };
    (added, removed)
}

impl FromIterator<Rank> for Idset {
    fn from_iter<I: IntoIterator<Item = Rank>>(iter: I) -> Self {
        Idset { ids: iter.into_iter().collect() }
    }
}

impl fmt::Display for Idset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        let mut iter = self.ids.iter().copied().peekable();

        while let Some(lo) = iter.next() {
            let mut hi = lo;
            while let Some(&next) = iter.peek() {
                if next != hi + 1 {
                    break;
                }
                hi = next;
                iter.next();
            }
            if !first {
                f.write_str(",")?;
            }
            first = false;
            if lo == hi {
                write!(f, "{}", lo)?;
            } else {
                write!(f, "{}-{}", lo, hi)?;
            }
        }
        Ok(())
    }
}

impl FromStr for Idset {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Idset::parse(s, None)
    }
}

fn parse_id(token: &str, whole: &str) -> Result<Rank> {
    let token = token.trim();
    if token.is_empty() || !token.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Error::InvalidArgument(format!("invalid idset '{}'", whole)));
    }
    token.parse::<Rank>().map_err(|_| Error::InvalidArgument(format!("invalid idset '{}'", whole)))
}

impl Serialize for Idset {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.encode())
    }
}

impl<'de> Deserialize<'de> for Idset {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Idset::from_str(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(s: &str) -> Idset {
        Idset::from_str(s).unwrap()
    }

    #[test]
    fn test_encode_is_canonical() {
        let a: Idset = [9, 2, 3, 4, 5].into_iter().collect();
        let b: Idset = [5, 4, 3, 9, 2].into_iter().collect();
        assert_eq!(a.encode(), "2-5,9");
        assert_eq!(a.encode(), b.encode());
        assert_eq!(Idset::new().encode(), "");
    }

    #[test]
    fn test_decode_variants() {
        assert_eq!(ids("0-3,7").count(), 5);
        assert_eq!(ids("[1-2]").encode(), "1-2");
        assert_eq!(ids(" 3 , 1 ").encode(), "1,3");
        assert!(ids("").is_empty());
        assert!(Idset::from_str("3-1").is_err());
        assert!(Idset::from_str("a-b").is_err());
        assert!(Idset::from_str("1,,2").is_err());
    }

    #[test]
    fn test_decode_encode_round_trip() {
        for s in ["0", "0-1023", "1,3,5-7,100"] {
            assert_eq!(ids(s).encode(), s);
        }
    }

    #[test]
    fn test_bounds() {
        assert!(Idset::decode_bounded("0-3", 4).is_ok());
        let err = Idset::decode_bounded("2-5", 4).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert!(err.to_string().contains("4-5"));
    }

    #[test]
    fn test_bounded_decode_rejects_huge_ranges_before_expanding() {
        let err = Idset::decode_bounded("0-4294967295", 4).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert!(err.to_string().contains("4-4294967295"), "{}", err);
        assert!(Idset::decode_bounded("1,4000000000", 4).is_err());
        assert_eq!(Idset::decode_bounded("", 4).unwrap(), Idset::new());
    }

    #[test]
    fn test_first_next() {
        let set = ids("2,5,9");
        assert_eq!(set.first(), Some(2));
        assert_eq!(set.next(2), Some(5));
        assert_eq!(set.next(5), Some(9));
        assert_eq!(set.next(9), None);
        assert_eq!(set.next(Rank::MAX), None);
    }

    #[test]
    fn test_diff_properties() {
        let a = ids("0-5,9");
        let b = ids("3-7");
        let (added, removed) = diff(&a, &b);
        let added = added.unwrap();
        let removed = removed.unwrap();

        assert_eq!(added.encode(), "6-7");
        assert_eq!(removed.encode(), "0-2,9");
        assert_eq!(a.union(&added), b.union(&removed));
        assert!(added.is_subset(&b));

        assert_eq!(diff(&a, &a), (None, None));
        assert_eq!(diff(&Idset::new(), &b).1, None);
        assert_eq!(diff(&a, &Idset::new()).0, None);
    }

    #[test]
    fn test_serde_as_string() {
        let set = ids("0-2");
        let json = serde_json::to_string(&set).unwrap();
        assert_eq!(json, "\"0-2\"");
        let back: Idset = serde_json::from_str(&json).unwrap();
        assert_eq!(back, set);
    }
}
