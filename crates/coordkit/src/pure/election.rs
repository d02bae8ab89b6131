//! Leader election standing.

use crate::election::CandidateKind;
use crate::pure::ordering::sort_siblings;

/// Where a candidate stands among the live candidates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Standing {
    /// Smallest live sequence: the leader.
    Leader,
    /// Waits for `predecessor`, the next smaller live candidate.
    Follower {
        /// Name of the candidate to watch.
        predecessor: String,
    },
    /// The candidate's own node is gone.
    Missing,
}

/// Compute a candidate's standing from the election node's children.
pub fn election_standing(children: &[String], own_name: &str) -> Standing {
    let candidates = sort_siblings::<CandidateKind>(children);
    match candidates.iter().position(|c| c.name == own_name) {
        None => Standing::Missing,
        Some(0) => Standing::Leader,
        Some(idx) => Standing::Follower {
            predecessor: candidates[idx - 1].name.clone(),
        },
    }
}
