//! Ordering of sequential sibling nodes.

use crate::competitor::CompetitorKind;

/// A parsed sequential sibling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sibling<K> {
    /// Node name (last path component).
    pub name: String,
    /// Competitor kind encoded in the name prefix.
    pub kind: K,
    /// Service-assigned sequence.
    pub sequence: u64,
}

/// Parse and sort sibling names by sequence.
///
/// Names that do not parse as a kind of `K` are ignored.
pub fn sort_siblings<K: CompetitorKind>(names: &[String]) -> Vec<Sibling<K>> {
    let mut siblings: Vec<Sibling<K>> = names
        .iter()
        .filter_map(|name| {
            K::parse(name).map(|(kind, sequence)| Sibling {
                name: name.clone(),
                kind,
                sequence,
            })
        })
        .collect();
    siblings.sort_by(|a, b| a.sequence.cmp(&b.sequence).then_with(|| a.name.cmp(&b.name)));
    siblings
}

/// Nearest sibling preceding `own_sequence` that `own_kind` must wait for.
///
/// `None` means the competitor holds the resource. Watching only this node
/// (not every predecessor) avoids the herd effect.
pub fn find_blocking_predecessor<K: CompetitorKind>(
    siblings: &[Sibling<K>],
    own_sequence: u64,
    own_kind: K,
) -> Option<&Sibling<K>> {
    siblings
        .iter()
        .rev()
        .filter(|sibling| sibling.sequence < own_sequence)
        .find(|sibling| own_kind.blocks(sibling.kind))
}

/// Returns true if `own_name` is among the siblings.
pub fn is_registered<K>(siblings: &[Sibling<K>], own_name: &str) -> bool {
    siblings.iter().any(|sibling| sibling.name == own_name)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::lock::ExclusiveKind;
    use crate::rwlock::RwKind;

    fn names(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn sorts_by_sequence_and_ignores_foreign_names() {
        let siblings = sort_siblings::<RwKind>(&names(&[
            "write-0000000003",
            "read-0000000001",
            "ready",
            "lock-0000000000",
            "read-0000000002",
        ]));
        let order: Vec<_> = siblings.iter().map(|s| s.sequence).collect();
        assert_eq!(order, vec![1, 2, 3]);
        assert_eq!(siblings[2].kind, RwKind::Write);
    }

    #[test]
    fn exclusive_waits_on_immediate_predecessor() {
        let siblings = sort_siblings::<ExclusiveKind>(&names(&["lock-0000000000", "lock-0000000004", "lock-0000000007"]));
        assert_eq!(find_blocking_predecessor(&siblings, 0, ExclusiveKind), None);
        let pred = find_blocking_predecessor(&siblings, 7, ExclusiveKind).unwrap();
        assert_eq!(pred.name, "lock-0000000004");
    }

    #[test]
    fn readers_skip_readers() {
        let siblings = sort_siblings::<RwKind>(&names(&[
            "write-0000000000",
            "read-0000000001",
            "read-0000000002",
            "write-0000000003",
            "read-0000000004",
        ]));
        // First reader waits on the writer before it.
        assert_eq!(find_blocking_predecessor(&siblings, 1, RwKind::Read).unwrap().name, "write-0000000000");
        // Second reader also only waits on that writer.
        assert_eq!(find_blocking_predecessor(&siblings, 2, RwKind::Read).unwrap().name, "write-0000000000");
        // Writer waits on the nearest node of any kind.
        assert_eq!(find_blocking_predecessor(&siblings, 3, RwKind::Write).unwrap().name, "read-0000000002");
        // Reader after a writer waits on that writer.
        assert_eq!(find_blocking_predecessor(&siblings, 4, RwKind::Read).unwrap().name, "write-0000000003");
    }

    #[test]
    fn missing_own_node_detected() {
        let siblings = sort_siblings::<ExclusiveKind>(&names(&["lock-0000000001"]));
        assert!(is_registered(&siblings, "lock-0000000001"));
        assert!(!is_registered(&siblings, "lock-0000000000"));
    }

    proptest! {
        #[test]
        fn reader_blocked_iff_earlier_writer(kinds in prop::collection::vec(any::<bool>(), 1..20)) {
            let all: Vec<String> = kinds
                .iter()
                .enumerate()
                .map(|(i, is_write)| format!("{}{:010}", if *is_write { "write-" } else { "read-" }, i))
                .collect();
            let siblings = sort_siblings::<RwKind>(&all);
            let own = (kinds.len() - 1) as u64;
            let earlier_writer = kinds[..kinds.len() - 1].iter().any(|w| *w);
            prop_assert_eq!(find_blocking_predecessor(&siblings, own, RwKind::Read).is_some(), earlier_writer);
            prop_assert_eq!(find_blocking_predecessor(&siblings, own, RwKind::Write).is_some(), own > 0);
        }

        #[test]
        fn predecessor_precedes_own(sequences in prop::collection::btree_set(0u64..1_000_000, 1..30)) {
            let all: Vec<String> = sequences.iter().map(|s| format!("lock-{s:010}")).collect();
            let siblings = sort_siblings::<ExclusiveKind>(&all);
            for sibling in &siblings {
                if let Some(pred) = find_blocking_predecessor(&siblings, sibling.sequence, ExclusiveKind) {
                    prop_assert!(pred.sequence < sibling.sequence);
                    prop_assert!(!siblings.iter().any(|s| s.sequence > pred.sequence && s.sequence < sibling.sequence));
                }
            }
        }
    }
}
