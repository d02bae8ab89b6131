//! Barrier membership and readiness.

use crate::constants::MEMBER_PREFIX;
use crate::constants::READY_MARKER;

/// What one children read of the barrier node shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BarrierView {
    /// Live member nodes.
    pub members: u32,
    /// The ready marker exists.
    pub ready: bool,
}

/// Summarize the barrier node's children.
pub fn barrier_view(children: &[String]) -> BarrierView {
    let mut view = BarrierView::default();
    for child in children {
        if child == READY_MARKER {
            view.ready = true;
        } else if child.starts_with(MEMBER_PREFIX) {
            view.members = view.members.saturating_add(1);
        }
    }
    view
}

/// Entering completes once the marker exists or the barrier is full.
#[inline]
pub fn is_enter_complete(view: BarrierView, size: u32) -> bool {
    view.ready || view.members >= size
}

/// The member that sees a full barrier without a marker creates it.
#[inline]
pub fn should_create_marker(view: BarrierView, size: u32) -> bool {
    !view.ready && view.members >= size
}

/// Leaving completes once every member deregistered.
#[inline]
pub fn is_leave_complete(view: BarrierView) -> bool {
    view.members == 0
}
