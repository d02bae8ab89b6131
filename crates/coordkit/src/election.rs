//! Continuous leader election.
//!
//! Candidates register ephemeral `candidate-NNNNNNNNNN` nodes under
//! `{election_root}/{name}`. The live candidate with the smallest sequence is
//! the master. Every other candidate watches only its immediate predecessor,
//! so a departure wakes exactly one follower.
//!
//! ```ignore
//! let elector = LeaderElector::new(session, "scheduler", Arc::new(MyListener)).await?;
//! elector.join_election().await?;
//!
//! let mut role = elector.subscribe();
//! while role.changed().await.is_ok() {
//!     if *role.borrow() == ElectionRole::Master {
//!         // run leader-only work
//!     }
//! }
//! ```

use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::panic::catch_unwind;
use std::sync::Arc;

use anyhow::anyhow;
use coordkit_service::CreateMode;
use coordkit_service::path;
use tokio::sync::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::competitor::CompetitorKind;
use crate::constants::CANDIDATE_PREFIX;
use crate::error::CoordinationError;
use crate::error::CoordinationResult;
use crate::error::ServiceResultExt;
use crate::error::validate_name;
use crate::pure::Standing;
use crate::pure::election_standing;
use crate::session::SessionContext;
use crate::session::WatchKey;
use crate::session::WatchRegistration;

/// Candidate nodes of an election.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CandidateKind;

impl CompetitorKind for CandidateKind {
    fn prefix(self) -> &'static str {
        CANDIDATE_PREFIX
    }

    fn parse(name: &str) -> Option<(Self, u64)> {
        match path::split_sequence(name)? {
            (CANDIDATE_PREFIX, sequence) => Some((CandidateKind, sequence)),
            _ => None,
        }
    }

    fn blocks(self, _other: Self) -> bool {
        true
    }
}

/// This candidate's current role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElectionRole {
    /// Not participating yet.
    Idle,
    /// The leader.
    Master,
    /// Waiting behind another candidate.
    Slave,
    /// Left the election.
    Quit,
}

impl ElectionRole {
    /// Convert the role to a string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ElectionRole::Idle => "idle",
            ElectionRole::Master => "master",
            ElectionRole::Slave => "slave",
            ElectionRole::Quit => "quit",
        }
    }
}

impl fmt::Display for ElectionRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Callbacks for election outcomes.
///
/// Callbacks run on the task that made the decision and should return
/// quickly. An `Err` or panic from `on_master`/`on_slave` is passed to
/// `on_error`; failures of `on_error` itself are only logged.
pub trait ElectionListener: Send + Sync + 'static {
    /// This candidate became the master. Called at most once per candidacy.
    fn on_master(&self) -> anyhow::Result<()>;

    /// This candidate is a follower. Called on every decision that leaves it
    /// behind another candidate.
    fn on_slave(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// A callback or the background standby failed.
    fn on_error(&self, error: &anyhow::Error) -> anyhow::Result<()> {
        let _ = error;
        Ok(())
    }
}

/// Routes listener failures and panics to `on_error`.
struct DelegatingListener {
    election: String,
    inner: Arc<dyn ElectionListener>,
}

impl DelegatingListener {
    fn master(&self) {
        self.invoke("on_master", |listener| listener.on_master());
    }

    fn slave(&self) {
        self.invoke("on_slave", |listener| listener.on_slave());
    }

    fn invoke(&self, callback: &str, f: impl FnOnce(&dyn ElectionListener) -> anyhow::Result<()>) {
        let err = match catch_unwind(AssertUnwindSafe(|| f(self.inner.as_ref()))) {
            Ok(Ok(())) => return,
            Ok(Err(err)) => err,
            Err(panic) => anyhow!("{callback} panicked: {}", panic_message(panic.as_ref())),
        };
        warn!(election = %self.election, callback, error = %err, "election listener failed");
        self.error(&err);
    }

    fn error(&self, err: &anyhow::Error) {
        match catch_unwind(AssertUnwindSafe(|| self.inner.on_error(err))) {
            Ok(Ok(())) => {}
            Ok(Err(failure)) => {
                error!(election = %self.election, error = %failure, "election listener on_error failed")
            }
            Err(panic) => error!(
                election = %self.election,
                panic = panic_message(panic.as_ref()),
                "election listener on_error panicked"
            ),
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[derive(Debug, Clone)]
struct Candidate {
    path: String,
    name: String,
}

#[derive(Default)]
struct ElectorState {
    candidate: Option<Candidate>,
    master_notified: bool,
    standby: Option<JoinHandle<()>>,
    quit: bool,
}

enum Decision {
    Master,
    Standby(WatchRegistration),
}

struct ElectorInner {
    session: Arc<SessionContext>,
    name: String,
    path: String,
    listener: DelegatingListener,
    state: Mutex<ElectorState>,
    role: watch::Sender<ElectionRole>,
}

/// One candidate in a named election.
///
/// The elector owns its session: [`quit_election`](Self::quit_election)
/// closes it.
pub struct LeaderElector {
    inner: Arc<ElectorInner>,
}

impl LeaderElector {
    /// Bind a candidate for the election named `name`.
    pub async fn new(
        session: Arc<SessionContext>,
        name: &str,
        listener: Arc<dyn ElectionListener>,
    ) -> CoordinationResult<Self> {
        validate_name(name)?;
        session.check_connected()?;
        let election_path = path::join(&session.config().election_root, name);
        session.ensure_path(&election_path).await?;

        let (role, _) = watch::channel(ElectionRole::Idle);
        Ok(Self {
            inner: Arc::new(ElectorInner {
                session,
                name: name.to_string(),
                path: election_path,
                listener: DelegatingListener {
                    election: name.to_string(),
                    inner: listener,
                },
                state: Mutex::new(ElectorState::default()),
                role,
            }),
        })
    }

    /// Election name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Current role.
    pub fn role(&self) -> ElectionRole {
        *self.inner.role.borrow()
    }

    /// Returns true if this candidate is the master.
    pub fn is_master(&self) -> bool {
        self.role() == ElectionRole::Master
    }

    /// Subscribe to role changes.
    pub fn subscribe(&self) -> watch::Receiver<ElectionRole> {
        self.inner.role.subscribe()
    }

    /// Path of this candidate's node, if registered.
    pub async fn candidate_path(&self) -> Option<String> {
        self.inner.state.lock().await.candidate.as_ref().map(|c| c.path.clone())
    }

    /// Join (or re-evaluate) the election.
    ///
    /// Returns once the first decision is made: `on_master` or `on_slave` has
    /// run. A follower keeps watching its predecessor in the background and
    /// re-decides whenever it leaves.
    ///
    /// On failure the candidacy is abandoned (as by `quit_election`) and the
    /// error returned. If the session is closed locally meanwhile, the
    /// candidacy is abandoned and `Ok` returned.
    pub async fn join_election(&self) -> CoordinationResult<()> {
        let inner = &self.inner;
        let mut state = inner.state.lock().await;
        if state.quit {
            return Err(CoordinationError::Destroyed {
                primitive: "election",
                name: inner.name.clone(),
            });
        }
        inner.session.check_connected()?;

        if let Some(standby) = state.standby.take() {
            standby.abort();
        }

        match inner.decide(&mut state).await {
            Ok(Decision::Master) => Ok(()),
            Ok(Decision::Standby(registration)) => {
                state.standby = Some(tokio::spawn(standby_loop(Arc::clone(inner), registration)));
                Ok(())
            }
            Err(err) if err.is_cancelled() => {
                debug!(election = %inner.name, "join cancelled by session close");
                if let Err(cleanup) = inner.quit_locked(&mut state).await {
                    debug!(election = %inner.name, error = %cleanup, "cleanup after cancelled join failed");
                }
                Ok(())
            }
            Err(err) => {
                if let Err(cleanup) = inner.quit_locked(&mut state).await {
                    warn!(election = %inner.name, error = %cleanup, "cleanup after failed join failed");
                }
                Err(err)
            }
        }
    }

    /// Leave the election: remove the candidate node, stop the standby task
    /// and close the session. Idempotent.
    pub async fn quit_election(&self) -> CoordinationResult<()> {
        let mut state = self.inner.state.lock().await;
        self.inner.quit_locked(&mut state).await
    }
}

impl Drop for LeaderElector {
    fn drop(&mut self) {
        if let Ok(mut state) = self.inner.state.try_lock()
            && let Some(standby) = state.standby.take()
        {
            standby.abort();
        }
    }
}

impl fmt::Debug for LeaderElector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LeaderElector").field("name", &self.inner.name).field("role", &self.role()).finish()
    }
}

impl ElectorInner {
    /// Run one election decision, registering a candidate if needed.
    async fn decide(&self, state: &mut ElectorState) -> CoordinationResult<Decision> {
        let session_id = self.session.session_id();
        loop {
            let candidate = match &state.candidate {
                Some(candidate) => candidate.clone(),
                None => {
                    let candidate = self.register().await?;
                    state.candidate = Some(candidate.clone());
                    state.master_notified = false;
                    candidate
                }
            };

            let children = self
                .session
                .client()
                .get_children(&self.path, false)
                .await
                .or_unavailable(session_id, "list candidates")?;

            match election_standing(&children, &candidate.name) {
                Standing::Missing => {
                    debug!(election = %self.name, node = %candidate.name, "candidate node missing, registering again");
                    state.candidate = None;
                }
                Standing::Leader => {
                    if !state.master_notified {
                        state.master_notified = true;
                        self.role.send_replace(ElectionRole::Master);
                        info!(election = %self.name, node = %candidate.name, "became master");
                        self.listener.master();
                    }
                    return Ok(Decision::Master);
                }
                Standing::Follower { predecessor } => {
                    self.role.send_replace(ElectionRole::Slave);
                    debug!(election = %self.name, node = %candidate.name, %predecessor, "following");
                    self.listener.slave();

                    let predecessor_path = path::join(&self.path, &predecessor);
                    let registration = self.session.register(WatchKey::node(&predecessor_path));
                    let exists = self
                        .session
                        .client()
                        .exists(&predecessor_path, true)
                        .await
                        .or_unavailable(session_id, "watch predecessor")?;
                    if exists.is_some() {
                        return Ok(Decision::Standby(registration));
                    }
                    debug!(election = %self.name, %predecessor, "predecessor gone before watch, deciding again");
                }
            }
        }
    }

    async fn register(&self) -> CoordinationResult<Candidate> {
        let requested = path::join(&self.path, CANDIDATE_PREFIX);
        let actual = self
            .session
            .client()
            .create(&requested, Vec::new(), CreateMode::EphemeralSequential)
            .await
            .or_unavailable(self.session.session_id(), "register candidate")?;
        let name = path::name(&actual).to_string();
        debug!(election = %self.name, node = %name, "registered candidate");
        Ok(Candidate { path: actual, name })
    }

    async fn quit_locked(&self, state: &mut ElectorState) -> CoordinationResult<()> {
        if state.quit {
            return Ok(());
        }
        state.quit = true;
        if let Some(standby) = state.standby.take() {
            standby.abort();
        }

        let mut result = Ok(());
        if let Some(candidate) = state.candidate.take() {
            match self.session.client().delete(&candidate.path, None).await {
                Ok(()) => {}
                Err(err) if err.is_no_node() => {}
                Err(err) => {
                    let err = CoordinationError::from_service(err, self.session.session_id(), "remove candidate");
                    // The service already removed the node with the session.
                    if !err.is_session_expired() && !err.is_cancelled() {
                        result = Err(err);
                    }
                }
            }
        }
        self.role.send_replace(ElectionRole::Quit);
        info!(election = %self.name, "left election");

        let closed = self.session.close().await;
        result.and(closed)
    }
}

/// Follower loop: wait for the predecessor to go, then decide again.
async fn standby_loop(inner: Arc<ElectorInner>, mut registration: WatchRegistration) {
    loop {
        let fired = tokio::select! {
            fired = registration.fired() => fired.is_some(),
            _ = inner.session.terminated() => false,
        };
        if !fired {
            let err = inner.session.termination_error("election standby");
            if err.is_session_expired() {
                inner.listener.error(&anyhow::Error::new(err));
            }
            return;
        }

        let mut state = inner.state.lock().await;
        if state.quit {
            return;
        }
        match inner.decide(&mut state).await {
            Ok(Decision::Master) => return,
            Ok(Decision::Standby(next)) => registration = next,
            Err(err) if err.is_cancelled() => return,
            Err(err) => {
                warn!(election = %inner.name, error = %err, "election standby failed");
                inner.listener.error(&anyhow::Error::new(err));
                return;
            }
        }
    }
}
