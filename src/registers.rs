use crate::sensor::Address;
use std::{
    collections::{BTreeSet, HashSet},
    fmt,
};

/// Largest number of holding registers a single Modbus read request may return.
pub const MAX_RANGE_LENGTH: u16 = 125;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum RangeError {
    #[error("register range {first:#06x}-{last:#06x} ends before it starts")]
    Inverted { first: Address, last: Address },

    #[error("maximum register range length must be positive")]
    ZeroLength,
}

/// Contiguous span of registers that has to be read to serve the sensors of some metric groups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterRange {
    groups: BTreeSet<String>,
    first: Address,
    last: Address,
}

impl RegisterRange {
    pub fn new<I, S>(groups: I, first: Address, last: Address) -> Result<Self, RangeError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if first > last {
            return Err(RangeError::Inverted { first, last });
        }

        Ok(Self { groups: groups.into_iter().map(Into::into).collect(), first, last })
    }

    pub fn first(&self) -> Address {
        self.first
    }

    pub fn last(&self) -> Address {
        self.last
    }

    pub fn groups(&self) -> &BTreeSet<String> {
        &self.groups
    }

    /// Number of registers, `u32` since a range may span the whole address space.
    pub fn len(&self) -> u32 {
        (self.last - self.first) as u32 + 1
    }

    pub fn contains(&self, address: Address) -> bool {
        (self.first..=self.last).contains(&address)
    }

    /// A range without groups matches nothing.
    pub fn in_any_group(&self, active_groups: &HashSet<String>) -> bool {
        self.groups.iter().any(|group| active_groups.contains(group))
    }

    pub fn is_same_range(&self, other: &RegisterRange) -> bool {
        self.first == other.first && self.last == other.last
    }

    /// Cuts the range into consecutive pieces of at most `max_len` registers, the last one possibly shorter.
    pub fn split(&self, max_len: u16) -> Vec<RegisterRange> {
        let max_len = max_len.max(1) as u32;
        let last = self.last as u32;

        (self.first as u32..=last)
            .step_by(max_len as usize)
            .map(|first| RegisterRange {
                groups: self.groups.clone(),
                first: first as Address,
                last: (first + max_len - 1).min(last) as Address,
            })
            .collect()
    }
}

impl fmt::Display for RegisterRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let groups: Vec<&str> = self.groups.iter().map(String::as_str).collect();

        write!(
            f,
            "metrics group: {{{}}}, range: {:#06x}-{:#06x}",
            groups.join(", "),
            self.first,
            self.last
        )
    }
}

/// Fetch plan for a set of active metric groups: filtered, deduplicated and split into bounded requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterRanges {
    ranges: Vec<RegisterRange>,
}

impl RegisterRanges {
    pub fn new(
        catalog: &[RegisterRange],
        active_groups: &HashSet<String>,
        max_range_length: u16,
    ) -> Result<Self, RangeError> {
        if max_range_length == 0 {
            return Err(RangeError::ZeroLength);
        }

        let filtered = catalog.iter().filter(|range| range.in_any_group(active_groups));

        let mut unique: Vec<&RegisterRange> = Vec::new();
        for range in filtered {
            if !unique.iter().any(|kept| kept.is_same_range(range)) {
                unique.push(range);
            }
        }

        let ranges = unique
            .into_iter()
            .flat_map(|range| {
                if range.len() <= max_range_length as u32 {
                    vec![range.clone()]
                } else {
                    range.split(max_range_length)
                }
            })
            .collect();

        Ok(Self { ranges })
    }

    pub fn ranges(&self) -> &[RegisterRange] {
        &self.ranges
    }

    pub fn contains(&self, address: Address) -> bool {
        self.ranges.iter().any(|range| range.contains(address))
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}

impl<'a> IntoIterator for &'a RegisterRanges {
    type Item = &'a RegisterRange;
    type IntoIter = std::slice::Iter<'a, RegisterRange>;

    fn into_iter(self) -> Self::IntoIter {
        self.ranges.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(group: &str, first: Address, last: Address) -> RegisterRange {
        RegisterRange::new([group], first, last).unwrap()
    }

    fn groups(names: &[&str]) -> HashSet<String> {
        names.iter().map(|&name| name.to_owned()).collect()
    }

    fn spans(ranges: &RegisterRanges) -> Vec<(String, Address, Address)> {
        ranges
            .into_iter()
            .map(|r| (r.groups().iter().next().cloned().unwrap_or_default(), r.first(), r.last()))
            .collect()
    }

    #[test]
    fn consolidates_dedups_and_splits() {
        let catalog = [range("g1", 10, 20), range("g1", 10, 20), range("g2", 30, 45)];
        let ranges = RegisterRanges::new(&catalog, &groups(&["g1", "g2"]), 10).unwrap();

        assert_eq!(
            spans(&ranges),
            vec![
                ("g1".to_owned(), 10, 19),
                ("g1".to_owned(), 20, 20),
                ("g2".to_owned(), 30, 39),
                ("g2".to_owned(), 40, 45),
            ]
        );
    }

    #[test]
    fn filters_inactive_groups() {
        let catalog = [range("string", 0x3b, 0x70), range("battery", 0xb6, 0xc0)];
        let ranges = RegisterRanges::new(&catalog, &groups(&["battery"]), MAX_RANGE_LENGTH).unwrap();

        assert_eq!(spans(&ranges), vec![("battery".to_owned(), 0xb6, 0xc0)]);
        assert!(ranges.contains(0xbe));
        assert!(!ranges.contains(0x3c));
    }

    #[test]
    fn first_duplicate_wins() {
        let catalog = [range("g2", 5, 8), range("g1", 5, 8), range("g1", 5, 9)];
        let ranges = RegisterRanges::new(&catalog, &groups(&["g1", "g2"]), 100).unwrap();

        assert_eq!(spans(&ranges), vec![("g2".to_owned(), 5, 8), ("g1".to_owned(), 5, 9)]);
    }

    #[test]
    fn duplicates_are_only_dropped_among_active_ranges() {
        let catalog = [range("g2", 5, 8), range("g1", 5, 8)];
        let ranges = RegisterRanges::new(&catalog, &groups(&["g1"]), 100).unwrap();

        assert_eq!(spans(&ranges), vec![("g1".to_owned(), 5, 8)]);
    }

    #[test]
    fn empty_group_matches_nothing() {
        let catalog = [RegisterRange::new(Vec::<String>::new(), 0, 3).unwrap()];

        assert!(RegisterRanges::new(&catalog, &groups(&["g1"]), 10).unwrap().is_empty());
    }

    #[test]
    fn multi_group_range_matches_any() {
        let catalog = [RegisterRange::new(["micro", "string"], 0, 3).unwrap()];
        let ranges = RegisterRanges::new(&catalog, &groups(&["string"]), 10).unwrap();

        assert_eq!(ranges.ranges().len(), 1);
        assert_eq!(ranges.ranges()[0].groups().len(), 2);
    }

    #[test]
    fn split_covers_range_without_gaps() {
        let parent = RegisterRange::new(["a", "b"], 100, 349).unwrap();
        let parts = parent.split(125);

        assert_eq!(parts.len(), 2);
        assert_eq!((parts[0].first(), parts[0].last()), (100, 224));
        assert_eq!((parts[1].first(), parts[1].last()), (225, 349));
        assert!(parts.iter().all(|part| part.groups() == parent.groups()));
        assert_eq!(parts.iter().map(RegisterRange::len).sum::<u32>(), parent.len());
    }

    #[test]
    fn split_reaches_end_of_address_space() {
        let parts = range("g", 0xfff0, 0xffff).split(10);

        assert_eq!((parts[0].first(), parts[0].last()), (0xfff0, 0xfff9));
        assert_eq!((parts[1].first(), parts[1].last()), (0xfffa, 0xffff));
        assert_eq!(range("g", 0, 0xffff).len(), 0x10000);
    }

    #[test]
    fn short_ranges_pass_through() {
        let catalog = [range("g", 0, 9)];
        let ranges = RegisterRanges::new(&catalog, &groups(&["g"]), 10).unwrap();

        assert_eq!(ranges.ranges(), &catalog);
    }

    #[test]
    fn rejects_invalid_input() {
        assert_eq!(
            RegisterRange::new(["g"], 5, 4).unwrap_err(),
            RangeError::Inverted { first: 5, last: 4 }
        );
        assert_eq!(
            RegisterRanges::new(&[], &groups(&["g"]), 0).unwrap_err(),
            RangeError::ZeroLength
        );
    }

    #[test]
    fn displays_hex_span() {
        let r = RegisterRange::new(["string", "micro"], 0x3b, 0x70).unwrap();
        assert_eq!(r.to_string(), "metrics group: {micro, string}, range: 0x003b-0x0070");
    }
}
