//! Queue entry ordering and capacity arithmetic.

use coordkit_service::path::split_sequence;

use crate::constants::ENTRY_PREFIX;

/// Entry names in FIFO (sequence) order. Other children are ignored.
pub fn sorted_entries(children: &[String]) -> Vec<String> {
    let mut entries: Vec<(u64, &String)> = children
        .iter()
        .filter_map(|name| match split_sequence(name) {
            Some((ENTRY_PREFIX, sequence)) => Some((sequence, name)),
            _ => None,
        })
        .collect();
    entries.sort();
    entries.into_iter().map(|(_, name)| name.clone()).collect()
}

/// Returns true if another entry fits.
#[inline]
pub fn has_capacity(size: u32, capacity: u32) -> bool {
    size < capacity
}

/// Free slots left; zero when over capacity.
#[inline]
pub fn remaining_capacity(size: u32, capacity: u32) -> u32 {
    capacity.saturating_sub(size)
}
