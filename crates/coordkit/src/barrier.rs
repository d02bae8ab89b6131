//! One-shot N-party barrier.
//!
//! A "double barrier":
//!
//! 1. **Enter**: each participant registers an ephemeral `member-<uuid>`
//!    node and waits until `size` members are present. The first to see a
//!    full barrier creates the persistent `ready` marker.
//! 2. **Work**: all participants proceed.
//! 3. **Leave**: each participant removes its member node and waits until no
//!    members remain; the marker is then removed.
//!
//! Members and the marker are children of the barrier node, so one children
//! read observes membership and readiness together. A slow member that wakes
//! after others already started leaving still sees the marker.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use coordkit_service::CreateMode;
use coordkit_service::path;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::debug;
use tracing::info;
use tracing::warn;
use uuid::Uuid;

use crate::await_condition::Awaited;
use crate::await_condition::ChildrenProbe;
use crate::await_condition::await_until;
use crate::await_condition::deadline_after;
use crate::constants::MAX_BARRIER_SIZE;
use crate::constants::MEMBER_PREFIX;
use crate::constants::READY_MARKER;
use crate::error::CoordinationError;
use crate::error::CoordinationResult;
use crate::error::ServiceResultExt;
use crate::error::validate_name;
use crate::pure::barrier_view;
use crate::pure::is_enter_complete;
use crate::pure::is_leave_complete;
use crate::pure::should_create_marker;
use crate::session::SessionContext;

/// Local lifecycle of a barrier participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BarrierPhase {
    /// Not entered (also after a timed-out enter).
    Created,
    /// Registered, waiting for the barrier to fill.
    Entering,
    /// The barrier filled.
    Entered,
    /// Deregistered, waiting for the others to leave.
    Leaving,
    /// Left; the barrier can no longer be used.
    Destroyed,
}

impl BarrierPhase {
    /// Convert the phase to a string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            BarrierPhase::Created => "created",
            BarrierPhase::Entering => "entering",
            BarrierPhase::Entered => "entered",
            BarrierPhase::Leaving => "leaving",
            BarrierPhase::Destroyed => "destroyed",
        }
    }
}

impl fmt::Display for BarrierPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Local phase plus the live view of the barrier node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BarrierStatus {
    /// This participant's phase.
    pub phase: BarrierPhase,
    /// Live member nodes.
    pub members: u32,
    /// Required number of members.
    pub size: u32,
    /// The ready marker exists.
    pub ready: bool,
}

/// One participant's handle on a barrier.
pub struct Barrier {
    session: Arc<SessionContext>,
    name: String,
    path: String,
    member_path: String,
    size: u32,
    /// Serializes enter/leave on this instance.
    ops: tokio::sync::Mutex<()>,
    phase: Mutex<BarrierPhase>,
}

impl Barrier {
    /// Bind a barrier named `name` requiring `size` participants.
    pub async fn new(session: Arc<SessionContext>, name: &str, size: u32) -> CoordinationResult<Self> {
        validate_name(name)?;
        if size == 0 || size > MAX_BARRIER_SIZE {
            return Err(CoordinationError::InvalidName {
                name: name.to_string(),
                reason: format!("barrier size must be in 1..={MAX_BARRIER_SIZE}, got {size}"),
            });
        }
        session.check_connected()?;

        let barrier_path = path::join(&session.config().barrier_root, name);
        session.ensure_path(&barrier_path).await?;
        let member_path = path::join(&barrier_path, &format!("{MEMBER_PREFIX}{}", Uuid::new_v4()));

        Ok(Self {
            session,
            name: name.to_string(),
            path: barrier_path,
            member_path,
            size,
            ops: tokio::sync::Mutex::new(()),
            phase: Mutex::new(BarrierPhase::Created),
        })
    }

    /// Barrier name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Required number of participants.
    pub fn size(&self) -> u32 {
        self.size
    }

    /// This participant's member node.
    pub fn member_path(&self) -> &str {
        &self.member_path
    }

    /// Current local phase.
    pub fn phase(&self) -> BarrierPhase {
        *self.phase.lock()
    }

    fn set_phase(&self, phase: BarrierPhase) {
        *self.phase.lock() = phase;
    }

    /// Local phase plus a fresh read of the barrier node.
    pub async fn status(&self) -> CoordinationResult<BarrierStatus> {
        let phase = self.phase();
        self.session.check_connected()?;
        let children = self
            .session
            .client()
            .get_children(&self.path, false)
            .await
            .or_unavailable(self.session.session_id(), "read barrier")?;
        let view = barrier_view(&children);
        Ok(BarrierStatus {
            phase,
            members: view.members,
            size: self.size,
            ready: view.ready,
        })
    }

    /// Block until `size` participants entered. Entering twice is a no-op.
    pub async fn enter(&self) -> CoordinationResult<()> {
        self.enter_until(None).await?;
        Ok(())
    }

    /// Enter within `timeout`. On timeout the member node is removed, the
    /// phase reverts to `Created` and `false` is returned.
    pub async fn enter_timeout(&self, timeout: Duration) -> CoordinationResult<bool> {
        self.enter_until(Some(deadline_after(timeout))).await
    }

    /// Block until every participant left, then retire the barrier.
    pub async fn leave(&self) -> CoordinationResult<()> {
        self.leave_until(None).await?;
        Ok(())
    }

    /// Leave within `timeout`. On timeout the phase stays `Leaving` and a
    /// later call resumes waiting.
    pub async fn leave_timeout(&self, timeout: Duration) -> CoordinationResult<bool> {
        self.leave_until(Some(deadline_after(timeout))).await
    }

    async fn enter_until(&self, deadline: Option<Instant>) -> CoordinationResult<bool> {
        let _op = self.ops.lock().await;
        match self.phase() {
            BarrierPhase::Destroyed => return Err(self.destroyed()),
            BarrierPhase::Entered => {
                debug!(name = %self.name, "already entered");
                return Ok(true);
            }
            BarrierPhase::Leaving => {
                return Err(CoordinationError::ProtocolViolation {
                    reason: format!("cannot enter barrier '{}' while leaving", self.name),
                });
            }
            BarrierPhase::Created | BarrierPhase::Entering => {}
        }
        self.session.check_connected()?;

        self.set_phase(BarrierPhase::Entering);
        if let Err(err) = self.register_member().await {
            self.set_phase(BarrierPhase::Created);
            return Err(err);
        }

        let size = self.size;
        let probe = ChildrenProbe::new(&self.path);
        let outcome = await_until(
            &self.session,
            &probe,
            |children| is_enter_complete(barrier_view(children), size),
            deadline,
        )
        .await;

        match outcome {
            Ok(Awaited::Satisfied(children)) => {
                if should_create_marker(barrier_view(&children), size)
                    && let Err(err) = self.create_marker().await
                {
                    self.set_phase(BarrierPhase::Created);
                    if let Err(cleanup) = self.remove_member().await {
                        warn!(name = %self.name, error = %cleanup, "failed to remove barrier member");
                    }
                    return Err(err);
                }
                self.set_phase(BarrierPhase::Entered);
                info!(name = %self.name, size, "barrier entered");
                Ok(true)
            }
            Ok(Awaited::TimedOut) => {
                debug!(name = %self.name, "barrier enter timed out");
                self.set_phase(BarrierPhase::Created);
                self.remove_member().await?;
                Ok(false)
            }
            Err(err) => {
                self.set_phase(BarrierPhase::Created);
                if let Err(cleanup) = self.remove_member().await {
                    warn!(name = %self.name, error = %cleanup, "failed to remove barrier member");
                }
                Err(err)
            }
        }
    }

    async fn leave_until(&self, deadline: Option<Instant>) -> CoordinationResult<bool> {
        let _op = self.ops.lock().await;
        match self.phase() {
            BarrierPhase::Destroyed => return Err(self.destroyed()),
            BarrierPhase::Created | BarrierPhase::Entering => {
                return Err(CoordinationError::ProtocolViolation {
                    reason: format!("cannot leave barrier '{}' before entering", self.name),
                });
            }
            BarrierPhase::Entered | BarrierPhase::Leaving => {}
        }
        self.session.check_connected()?;

        self.set_phase(BarrierPhase::Leaving);
        self.remove_member().await?;

        let probe = ChildrenProbe::new(&self.path);
        match await_until(&self.session, &probe, |children| is_leave_complete(barrier_view(children)), deadline).await? {
            Awaited::Satisfied(_) => {
                self.remove_marker().await?;
                self.set_phase(BarrierPhase::Destroyed);
                info!(name = %self.name, "barrier left");
                Ok(true)
            }
            Awaited::TimedOut => {
                debug!(name = %self.name, "barrier leave timed out");
                Ok(false)
            }
        }
    }

    async fn register_member(&self) -> CoordinationResult<()> {
        match self.session.client().create(&self.member_path, Vec::new(), CreateMode::Ephemeral).await {
            Ok(_) => {
                debug!(name = %self.name, member = %self.member_path, "registered barrier member");
                Ok(())
            }
            Err(err) if err.is_node_exists() => Ok(()),
            Err(err) => Err(CoordinationError::from_service(err, self.session.session_id(), "enter barrier")),
        }
    }

    async fn remove_member(&self) -> CoordinationResult<()> {
        match self.session.client().delete(&self.member_path, None).await {
            Ok(()) => Ok(()),
            Err(err) if err.is_no_node() => Ok(()),
            Err(err) => Err(CoordinationError::from_service(err, self.session.session_id(), "leave barrier")),
        }
    }

    async fn create_marker(&self) -> CoordinationResult<()> {
        let marker = path::join(&self.path, READY_MARKER);
        match self.session.client().create(&marker, Vec::new(), CreateMode::Persistent).await {
            Ok(_) => {
                info!(name = %self.name, "barrier ready");
                Ok(())
            }
            Err(err) if err.is_node_exists() => Ok(()),
            Err(err) => Err(CoordinationError::from_service(err, self.session.session_id(), "mark barrier ready")),
        }
    }

    async fn remove_marker(&self) -> CoordinationResult<()> {
        let marker = path::join(&self.path, READY_MARKER);
        match self.session.client().delete(&marker, None).await {
            Ok(()) => Ok(()),
            Err(err) if err.is_no_node() => Ok(()),
            Err(err) => Err(CoordinationError::from_service(err, self.session.session_id(), "retire barrier")),
        }
    }

    fn destroyed(&self) -> CoordinationError {
        CoordinationError::Destroyed {
            primitive: "barrier",
            name: self.name.clone(),
        }
    }
}

impl fmt::Debug for Barrier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Barrier")
            .field("name", &self.name)
            .field("size", &self.size)
            .field("member", &self.member_path)
            .finish()
    }
}
