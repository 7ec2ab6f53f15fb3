//! Per-peer session state (§5 "Session"): the inbound/outbound queues, connection parameters and
//! lifecycle state, guarded by a single mutex. `PacketHistory` is deliberately not a `Session`
//! field — only the worker thread that owns a session's `StreamLoop` ever touches it, so it lives
//! there instead of behind a lock nobody else needs (see `DESIGN.md`).
use crate::defaults;
use crate::fake::{self, TerminateReason};
use crate::inbound::{InboundQueue, IN_QUEUE_DEFAULT_MAX_SIZE};
use crate::outbound::{OutboundQueue, OUT_QUEUE_DEFAULT_MAX_SIZE, DEFAULT_PRIORITY};
use crate::wire;
use crate::command::Command;
use crate::error::{CoreError, CoreResult};
use std::sync::Mutex;

/// Locally assigned, process-unique session identifier. Not part of the wire protocol.
pub type SessionId = u32;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum DataSecurity {
    None,
    Tls,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum TransportKind {
    Udp,
    Tcp,
    WebSocket,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum CommandCompression {
    None,
    AddressShare,
}

/// Negotiation flags accepted by connect (§6 "Negotiation flags accepted by connect").
#[derive(Debug, Clone, Copy)]
pub struct ConnectFlags {
    pub security: DataSecurity,
    pub transport: TransportKind,
    pub compression: CommandCompression,
}

impl Default for ConnectFlags {
    fn default() -> ConnectFlags {
        ConnectFlags {
            security: DataSecurity::None,
            transport: TransportKind::Tcp,
            compression: CommandCompression::AddressShare,
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Lifecycle {
    Connecting,
    Active,
    Terminated,
}

/// FPS negotiation state (§4.5 "Negotiation for FPS").
#[derive(Debug, Clone, Copy)]
pub struct FpsState {
    /// What the host (application) wants the tick rate to be.
    pub host_desired: f32,
    /// What's currently in effect.
    pub current: f32,
    /// What the peer last reported as its own rate.
    pub peer: f32,
    /// Set when a peer change has been received and not yet confirmed.
    pub confirm_pending: bool,
}

impl FpsState {
    fn new(initial: f32) -> FpsState {
        FpsState {
            host_desired: initial,
            current: initial,
            peer: initial,
            confirm_pending: false,
        }
    }
}

/// Fields guarded by `Session`'s single mutex (§5: "a mutex guarding queue access").
pub struct SessionState {
    pub inbound: InboundQueue,
    pub outbound: OutboundQueue,
    pub fps: FpsState,
    pub lifecycle: Lifecycle,
    pub user_id: u32,
    pub avatar_id: u32,
    /// Set once by `set_client_info`; a second call is rejected rather than silently overwriting
    /// an already-reported identity (Open Question, resolved in `DESIGN.md`).
    pub client_info: Option<(String, String)>,
}

pub struct Session {
    pub id: SessionId,
    pub host: String,
    pub service: String,
    pub flags: ConnectFlags,
    state: Mutex<SessionState>,
}

impl Session {
    pub fn new(id: SessionId, host: String, service: String, flags: ConnectFlags, fps: f32) -> Session {
        Session {
            id,
            host,
            service,
            flags,
            state: Mutex::new(SessionState {
                inbound: InboundQueue::new(IN_QUEUE_DEFAULT_MAX_SIZE),
                outbound: OutboundQueue::new(OUT_QUEUE_DEFAULT_MAX_SIZE),
                fps: FpsState::new(fps),
                lifecycle: Lifecycle::Connecting,
                user_id: 0,
                avatar_id: 0,
                client_info: None,
            }),
        }
    }

    pub fn state(&self) -> std::sync::MutexGuard<'_, SessionState> {
        self.state.lock().expect("session mutex poisoned")
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.state().lifecycle
    }

    /// Marks the session active and delivers the `connect_accept` fake command (§5: issued once
    /// connect negotiation succeeds).
    pub fn accept(&self, user_id: u32) {
        let mut state = self.state();
        state.lifecycle = Lifecycle::Active;
        state.user_id = user_id;
        let cmd = fake::connect_accept(self.id as u16, user_id);
        state.inbound.push(cmd);
    }

    /// Producer-side push onto the outbound queue (§4.2 "push always succeeds" does not apply
    /// here — `QueueFull` is surfaced synchronously per §7). A push after termination is a no-op:
    /// the queue behind it has already been torn down.
    pub fn push_outbound(&self, prio: u8, cmd: Command) -> CoreResult<()> {
        let mut state = self.state();
        if state.lifecycle == Lifecycle::Terminated {
            return Ok(());
        }
        state.outbound.push_tail(prio, cmd, true)
    }

    /// Convenience wrapper pushing at the default priority (§6 "Default values").
    pub fn push(&self, cmd: Command) -> CoreResult<()> {
        self.push_outbound(DEFAULT_PRIORITY, cmd)
    }

    /// Ends the session for one of the four terminating conditions (§7 "Fatal (session-
    /// terminating): Malformed, TransportLost, Timeout, AuthFailed", plus a clean client/server
    /// terminate). Both queues are replaced (discarding anything resident) and a single
    /// `connect_terminate` fake command is delivered to the now-empty inbound queue, matching §5:
    /// "both queues are destroyed ... and a synthetic connect-terminate command is delivered to
    /// the application's inbound."
    pub fn terminate(&self, reason: TerminateReason) {
        let mut state = self.state();
        if state.lifecycle == Lifecycle::Terminated {
            return;
        }
        state.outbound = OutboundQueue::new(state.outbound.max_size());
        state.inbound = InboundQueue::new(state.inbound.max_size());
        state.inbound.push(fake::connect_terminate(reason));
        state.lifecycle = Lifecycle::Terminated;
    }

    /// Sets the session's reported client name/version. Returns `false` without changing anything
    /// if client info was already set (it is a one-time declaration, not a mutable property).
    pub fn set_client_info(&self, name: String, version: String) -> bool {
        let mut state = self.state();
        if state.client_info.is_some() {
            return false;
        }
        state.client_info = Some((name, version));
        true
    }

    pub fn client_info(&self) -> Option<(String, String)> {
        self.state().client_info.clone()
    }

    pub fn in_queue_max_size(&self) -> usize {
        self.state().inbound.max_size()
    }

    pub fn set_in_queue_max_size(&self, max_size: usize) {
        self.state().inbound.set_max_size(max_size);
    }

    pub fn out_queue_max_size(&self) -> usize {
        self.state().outbound.max_size()
    }

    pub fn set_out_queue_max_size(&self, max_size: usize) {
        self.state().outbound.set_max_size(max_size);
    }

    /// Enqueues a system `user_auth_request` (opcode 7) carrying `username` and an opaque
    /// authentication blob (§6 system commands 1..9). The exchange semantics (what the bytes mean,
    /// how the peer verifies them) are out of scope here (§1 Non-goals) — this method only builds
    /// and enqueues the wire command within the length limits `defaults` declares.
    pub fn user_authenticate(&self, username: &str, method: u8, data: &[u8]) -> CoreResult<()> {
        if username.len() > defaults::MAX_USERNAME_LEN || data.len() > defaults::MAX_AUTH_DATA_LEN {
            return Err(CoreError::Malformed(crate::error::MalformedReason::Truncated));
        }
        let mut payload = Vec::with_capacity(1 + 1 + username.len() + 1 + data.len());
        payload.push(method);
        wire::write_string8(&mut payload, username.as_bytes());
        wire::write_string8(&mut payload, data);
        self.push_outbound(DEFAULT_PRIORITY, Command::new(7, payload))
    }

    /// Applies a peer FPS change (opcode `change_r`, received from the stream loop's decode step)
    /// and arms the confirm-pending flag (§4.5 "Negotiation for FPS").
    pub fn on_peer_fps_change(&self, new_fps: f32) {
        let mut state = self.state();
        state.fps.peer = new_fps;
        state.fps.confirm_pending = true;
    }

    /// Applies a peer confirm (opcode `confirm_r`) and, if it matches what the host wants, clears
    /// `confirm_pending` so the stream loop stops re-sending change commands.
    pub fn on_peer_fps_confirm(&self, confirmed: f32) {
        let mut state = self.state();
        state.fps.current = confirmed;
        if (confirmed - state.fps.host_desired).abs() < f32::EPSILON {
            state.fps.confirm_pending = false;
        }
    }

    pub fn set_desired_fps(&self, fps: f32) {
        self.state().fps.host_desired = fps;
    }

    pub fn fps(&self) -> FpsState {
        self.state().fps
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_session() -> Session {
        Session::new(1, "localhost".into(), "verse".into(), ConnectFlags::default(), 60.0)
    }

    #[test]
    fn test_accept_delivers_connect_accept_fake() {
        let session = new_session();
        session.accept(42);
        assert_eq!(session.lifecycle(), Lifecycle::Active);
        let cmd = session.state().inbound.pop().unwrap();
        assert_eq!(cmd.opcode, fake::op::CONNECT_ACCEPT);
    }

    #[test]
    fn test_terminate_clears_queues_and_delivers_terminate_fake() {
        let session = new_session();
        session.accept(1);
        session.push(Command::new(33, 10000u32.to_be_bytes().to_vec())).unwrap();
        session.terminate(TerminateReason::ClientTerminate);

        assert_eq!(session.lifecycle(), Lifecycle::Terminated);
        let mut state = session.state();
        assert_eq!(state.outbound.count(), 0);
        let cmd = state.inbound.pop().unwrap();
        assert_eq!(cmd.opcode, fake::op::CONNECT_TERMINATE);
        assert_eq!(cmd.payload, vec![TerminateReason::ClientTerminate as u8]);
    }

    #[test]
    fn test_push_after_terminate_is_a_no_op() {
        let session = new_session();
        session.terminate(TerminateReason::ServerTerminate);
        session.push(Command::new(33, 1u32.to_be_bytes().to_vec())).unwrap();
        assert_eq!(session.state().outbound.count(), 0);
    }

    #[test]
    fn test_set_client_info_is_one_time() {
        let session = new_session();
        assert!(session.set_client_info("client".into(), "1.0".into()));
        assert!(!session.set_client_info("other".into(), "2.0".into()));
        assert_eq!(session.client_info(), Some(("client".into(), "1.0".into())));
    }

    #[test]
    fn test_fps_negotiation_clears_pending_on_matching_confirm() {
        let session = new_session();
        session.set_desired_fps(30.0);
        session.on_peer_fps_change(25.0);
        assert!(session.fps().confirm_pending);
        session.on_peer_fps_confirm(30.0);
        assert!(!session.fps().confirm_pending);
        assert_eq!(session.fps().current, 30.0);
    }

    #[test]
    fn test_user_authenticate_rejects_oversized_username() {
        let session = new_session();
        let long = "a".repeat(defaults::MAX_USERNAME_LEN + 1);
        assert!(session.user_authenticate(&long, 0, &[]).is_err());
    }
}
