//! The per-session stream loop (§4.5): receive → decode → enqueue; fps negotiation; pack outbound
//! under the send window; emit. Socket plumbing itself is out of scope (§1 Non-goals) — `Transport`
//! is the seam that keeps it that way, grounded in `t51core::net::channel::Channel` wrapping a
//! `TcpStream` behind `ingress`/`egress`-style calls on a `Buffer` (see `crate::buffer`).
use crate::codec::{pack_run, unpack_batch};
use crate::command::Command;
use crate::defaults;
use crate::error::{CoreError, CoreResult};
use crate::fake::TerminateReason;
use crate::frame::{MessageFlags, MessageHeader, HEADER_SIZE, PROTOCOL_VERSION};
use crate::history::{AckNakKind, PacketHistory};
use crate::inbound::InboundQueue;
use crate::outbound::{real_prio, DEFAULT_PRIORITY, MAX_PRIORITY};
use crate::session::Session;
use byteorder::{BigEndian, ByteOrder};
use slog::Logger;
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Feature id carried by `change_l`/`change_r`/`confirm_l`/`confirm_r` (opcodes 3..6). The
/// protocol only negotiates one feature (tick rate) at this layer, so a single constant stands in
/// for what the wire format leaves room to extend.
const FEATURE_FPS: u8 = 0;

/// The socket-facing seam a `StreamLoop` drives. Implementors own the actual read/write calls;
/// this core never touches a socket directly (§1 Non-goals: "TCP/TLS/UDP/DTLS socket plumbing").
pub trait Transport {
    /// Reads one framed message into `buf`, returning the number of bytes read, `Ok(0)` if nothing
    /// is available right now, or an `io::Error` (including `WouldBlock`) on failure.
    fn try_recv(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Writes `buf` in full or returns an error; partial writes are the transport's problem to
    /// retry, not the stream loop's.
    fn try_send(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Bytes already queued for send but not yet acknowledged by the OS (§4.5 step 3).
    fn outstanding_write_bytes(&self) -> usize;

    /// Total socket send-buffer capacity (§4.5 step 3: "send window = socket buffer size −
    /// outstanding").
    fn send_buffer_size(&self) -> usize;
}

pub struct StreamLoop<T: Transport> {
    pub session: Arc<Session>,
    transport: T,
    history: PacketHistory,
    logger: Logger,
    /// Whether this endpoint emits synthetic create/destroy acks on durable acknowledgement
    /// (§4.4 `remove_packet`'s `is_server` parameter) — true for the `versed` server, false for a
    /// client binding against it.
    is_server: bool,
    next_packet_id: u32,
    recv_buf: Vec<u8>,
    last_activity: Instant,
}

impl<T: Transport> StreamLoop<T> {
    pub fn new(session: Arc<Session>, transport: T, logger: Logger, is_server: bool) -> StreamLoop<T> {
        StreamLoop {
            session,
            transport,
            history: PacketHistory::new(),
            logger,
            is_server,
            next_packet_id: 1,
            recv_buf: vec![0u8; 65536],
            last_activity: Instant::now(),
        }
    }

    /// Runs one full tick (§4.5, steps 1..5). Returns a fatal `CoreError` when the session must be
    /// terminated (caller is expected to call `Session::terminate` and drop the loop); recoverable
    /// conditions (e.g. `QueueFull` on an internally-generated push) are logged and swallowed.
    ///
    /// A session that has sent nothing received for `defaults::INACTIVITY_TIMEOUT_SECS` is
    /// terminated here (§5 "four terminating conditions ... Timeout") before anything else runs.
    pub fn tick(&mut self) -> CoreResult<()> {
        if self.last_activity.elapsed() >= Duration::from_secs(defaults::INACTIVITY_TIMEOUT_SECS) {
            self.session.terminate(TerminateReason::Timeout);
            return Err(CoreError::Timeout);
        }
        self.receive()?;
        self.negotiate_fps();
        self.send()?;
        Ok(())
    }

    /// Step 1: receive a framed message, decode it, and route each command to its consumer —
    /// ack/nak into packet history, fps change/confirm into session state, everything else into
    /// the application's inbound queue. A frame carrying at least one command outside the ack/nak
    /// opcodes is itself acknowledged back to the peer (§4.4 "Ack/Nak History"), referencing the
    /// header's `pay_id`. Pure ack/nak frames are never acknowledged — acking an ack would chase
    /// its own tail forever.
    fn receive(&mut self) -> CoreResult<()> {
        let n = match self.transport.try_recv(&mut self.recv_buf) {
            Ok(0) => return Ok(()),
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
            Err(e) => return Err(CoreError::from(e)),
        };
        self.last_activity = Instant::now();
        let data = &self.recv_buf[..n];
        let header = MessageHeader::decode(data)?;
        let body_end = HEADER_SIZE + header.length as usize;
        if data.len() < body_end {
            return Err(CoreError::Malformed(crate::error::MalformedReason::Truncated));
        }
        let body = &data[HEADER_SIZE..body_end];

        let mut staging = InboundQueue::new(header.length as usize + 1);
        unpack_batch(body, &mut staging)?;

        let mut needs_ack = false;
        while let Some(cmd) = staging.pop() {
            if cmd.opcode != 1 && cmd.opcode != 2 {
                needs_ack = true;
            }
            self.route_decoded(cmd);
        }

        if needs_ack {
            self.history.ack_nak().add_cmd(AckNakKind::Ack, header.pay_id);
            let ack = Command::new(1, header.pay_id.to_be_bytes().to_vec());
            if let Err(err) = self.session.push_outbound(MAX_PRIORITY, ack) {
                slog::debug!(self.logger, "ack command dropped"; "error" => %err);
            }
        }
        Ok(())
    }

    fn route_decoded(&mut self, cmd: Command) {
        match cmd.opcode {
            1 => {
                let pay_id = BigEndian::read_u32(&cmd.payload[0..4]);
                let mut state = self.session.state();
                self.history.remove_packet(pay_id, &mut state.inbound, self.is_server);
            }
            2 => {
                let pay_id = BigEndian::read_u32(&cmd.payload[0..4]);
                let mut state = self.session.state();
                self.history.resend_packet(pay_id, &mut state.outbound);
            }
            4 => {
                // change_r: the peer is proposing a new fps.
                let value = BigEndian::read_f32(&cmd.payload[1..5]);
                self.session.on_peer_fps_change(value);
            }
            6 => {
                // confirm_r: the peer confirms our proposed fps.
                let value = BigEndian::read_f32(&cmd.payload[1..5]);
                self.session.on_peer_fps_confirm(value);
            }
            _ => {
                self.session.state().inbound.push(cmd);
            }
        }
    }

    /// Step 2: if fps negotiation is pending, enqueue a change or confirm system command
    /// (§4.5 "Negotiation for FPS").
    fn negotiate_fps(&mut self) {
        let fps = self.session.fps();
        let change_needed = (fps.current - fps.host_desired).abs() > f32::EPSILON;

        if change_needed {
            if let Err(err) = self.session.push(change_command(3, fps.host_desired)) {
                slog::debug!(self.logger, "fps change command dropped"; "error" => %err);
            }
        }
        if fps.confirm_pending {
            if let Err(err) = self.session.push(change_command(5, fps.peer)) {
                slog::debug!(self.logger, "fps confirm command dropped"; "error" => %err);
            }
            self.session.state().fps.confirm_pending = false;
        }
    }

    /// Steps 3..5: query the send window, pack as much of the outbound queue as fits, and emit one
    /// framed message. Does nothing if there is nothing to send.
    fn send(&mut self) -> CoreResult<()> {
        let window = self
            .transport
            .send_buffer_size()
            .saturating_sub(self.transport.outstanding_write_bytes());
        if window == 0 {
            return Ok(());
        }
        let window = window.min(u16::MAX as usize) as u16;

        let mut body = Vec::new();
        let mut sent: Vec<(Command, u8)> = Vec::new();
        {
            let mut state = self.session.state();
            pack_priorities(&mut state.outbound, &mut body, window, &mut sent);
        }
        if body.is_empty() {
            return Ok(());
        }

        let packet_id = self.next_packet_id;
        self.next_packet_id += 1;

        let mut frame = Vec::with_capacity(HEADER_SIZE + body.len());
        let header = MessageHeader {
            version: PROTOCOL_VERSION,
            flags: MessageFlags::ACK_REQUIRED,
            length: body.len() as u16,
            pay_id: packet_id,
        };
        header.encode(&mut frame);
        frame.extend_from_slice(&body);
        self.transport.try_send(&frame)?;

        // Ack/nak commands ride the same outbound queue as everything else but are never tracked
        // in history themselves (§4.4 ADDED) — over the reliable transports this core targets they
        // cannot be lost, and tracking them would mean every ack-of-a-frame demands its own ack,
        // which never quiesces.
        let has_trackable_content = sent.iter().any(|(cmd, _)| cmd.opcode != 1 && cmd.opcode != 2);
        if has_trackable_content {
            self.history.add_packet(packet_id);
            for (cmd, prio) in sent {
                self.history.add_cmd(packet_id, cmd, prio);
            }
        }
        Ok(())
    }
}

fn change_command(opcode: u8, value: f32) -> Command {
    let mut payload = vec![0u8; 5];
    payload[0] = FEATURE_FPS;
    BigEndian::write_f32(&mut payload[1..5], value);
    Command::new(opcode, payload)
}

/// Allocates `window` bytes across non-empty priorities, highest first, and packs each bucket's
/// share of commands into `body` (§4.3 "Priority scheduling"). Packed commands are appended to
/// `sent` (with their priority) so the caller can record them in packet history once a packet id
/// has been assigned.
fn pack_priorities(
    out: &mut crate::outbound::OutboundQueue,
    body: &mut Vec<u8>,
    window: u16,
    sent: &mut Vec<(Command, u8)>,
) {
    let sum_high = out.prio_sum_high();
    let sum_low = out.prio_sum_low();
    let mut remaining_total = window as usize;

    for prio in (0..=255u8).rev() {
        if remaining_total == 0 {
            break;
        }
        if out.count_prio(prio) == 0 {
            continue;
        }

        let sum = if prio >= DEFAULT_PRIORITY { sum_high } else { sum_low };
        if sum <= 0.0 {
            continue;
        }
        let bucket_window = ((window as f64) * real_prio(prio) / sum) as usize;
        let mut remaining = bucket_window.min(remaining_total).min(u16::MAX as usize) as u16;

        loop {
            if remaining == 0 {
                break;
            }
            let popped = out.pop(prio, remaining);
            let (cmd, report) = match popped {
                Some(v) => v,
                None => break,
            };

            let opcode = cmd.opcode;
            let mut group = vec![cmd];
            for _ in 1..report.run_count {
                match out.pop(prio, remaining) {
                    Some((c, _)) => group.push(c),
                    None => break,
                }
            }

            let refs: Vec<&Command> = group.iter().collect();
            let written = match pack_run(body, opcode, report.share, &refs) {
                Ok(n) => n,
                Err(_) => break, // unknown opcode: drop this group rather than poison the buffer.
            };

            let written = written.min(remaining as usize) as u16;
            remaining = remaining.saturating_sub(written);
            remaining_total = remaining_total.saturating_sub(written as usize);

            for cmd in group {
                sent.push((cmd, prio));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::ConnectFlags;
    use std::collections::VecDeque;

    fn test_logger() -> Logger {
        Logger::root(slog::Discard, slog::o!())
    }

    fn node_destroy(node_id: u32) -> Command {
        Command::new(33, node_id.to_be_bytes().to_vec())
    }

    struct LoopbackTransport {
        inbox: VecDeque<Vec<u8>>,
        sent: Vec<Vec<u8>>,
    }

    impl Transport for LoopbackTransport {
        fn try_recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.inbox.pop_front() {
                Some(frame) => {
                    buf[..frame.len()].copy_from_slice(&frame);
                    Ok(frame.len())
                }
                None => Ok(0),
            }
        }

        fn try_send(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.sent.push(buf.to_vec());
            Ok(buf.len())
        }

        fn outstanding_write_bytes(&self) -> usize {
            0
        }

        fn send_buffer_size(&self) -> usize {
            65536
        }
    }

    fn new_session() -> Arc<Session> {
        Arc::new(Session::new(1, "h".into(), "s".into(), ConnectFlags::default(), 60.0))
    }

    #[test]
    fn test_tick_with_nothing_queued_sends_nothing() {
        let session = new_session();
        let transport = LoopbackTransport { inbox: VecDeque::new(), sent: Vec::new() };
        let mut stream = StreamLoop::new(session, transport, test_logger(), true);
        stream.tick().unwrap();
        assert!(stream.transport.sent.is_empty());
    }

    #[test]
    fn test_tick_past_inactivity_timeout_terminates_session() {
        let session = new_session();
        let transport = LoopbackTransport { inbox: VecDeque::new(), sent: Vec::new() };
        let mut stream = StreamLoop::new(session.clone(), transport, test_logger(), true);
        stream.last_activity = Instant::now() - Duration::from_secs(defaults::INACTIVITY_TIMEOUT_SECS + 1);

        let err = stream.tick().unwrap_err();
        assert_eq!(err, CoreError::Timeout);
        assert_eq!(session.lifecycle(), crate::session::Lifecycle::Terminated);
    }

    #[test]
    fn test_tick_packs_and_emits_queued_command() {
        let session = new_session();
        session.push(node_destroy(10000)).unwrap();

        let transport = LoopbackTransport { inbox: VecDeque::new(), sent: Vec::new() };
        let mut stream = StreamLoop::new(session.clone(), transport, test_logger(), true);
        stream.tick().unwrap();

        assert_eq!(stream.transport.sent.len(), 1);
        let frame = &stream.transport.sent[0];
        let header = MessageHeader::decode(frame).unwrap();
        assert_eq!(header.length as usize, frame.len() - HEADER_SIZE);
        assert_eq!(session.state().outbound.count(), 0);
    }

    #[test]
    fn test_receive_routes_ack_into_history() {
        let session = new_session();
        session.push(node_destroy(1)).unwrap();

        let transport = LoopbackTransport { inbox: VecDeque::new(), sent: Vec::new() };
        let mut stream = StreamLoop::new(session.clone(), transport, test_logger(), true);
        stream.tick().unwrap(); // emits packet id 1

        let mut ack_body = Vec::new();
        pack_run(&mut ack_body, 1, 0, &[&Command::new(1, 1u32.to_be_bytes().to_vec())]).unwrap();
        let mut frame = Vec::new();
        MessageHeader {
            version: PROTOCOL_VERSION,
            flags: MessageFlags::NONE,
            length: ack_body.len() as u16,
            pay_id: 99,
        }
        .encode(&mut frame);
        frame.extend_from_slice(&ack_body);
        stream.transport.inbox.push_back(frame);

        stream.tick().unwrap();
        assert_eq!(stream.history.outstanding_bytes(), 0);
        // The received frame was pure ack content, so it must not itself be acknowledged: no
        // second frame goes out beyond the one sent by the first tick.
        assert_eq!(stream.transport.sent.len(), 1);
    }

    #[test]
    fn test_receive_of_real_command_emits_ack_for_its_pay_id() {
        let session = new_session();
        let transport = LoopbackTransport { inbox: VecDeque::new(), sent: Vec::new() };
        let mut stream = StreamLoop::new(session.clone(), transport, test_logger(), true);

        let mut body = Vec::new();
        pack_run(&mut body, 33, 0, &[&node_destroy(42)]).unwrap();
        let mut frame = Vec::new();
        MessageHeader {
            version: PROTOCOL_VERSION,
            flags: MessageFlags::ACK_REQUIRED,
            length: body.len() as u16,
            pay_id: 7,
        }
        .encode(&mut frame);
        frame.extend_from_slice(&body);
        stream.transport.inbox.push_back(frame);

        stream.tick().unwrap();

        assert_eq!(stream.transport.sent.len(), 1);
        let sent_frame = &stream.transport.sent[0];
        let header = MessageHeader::decode(sent_frame).unwrap();
        let body = &sent_frame[HEADER_SIZE..(HEADER_SIZE + header.length as usize)];
        let mut inbound = InboundQueue::new(1_048_576);
        unpack_batch(body, &mut inbound).unwrap();
        let ack = inbound.pop().unwrap();
        assert_eq!(ack.opcode, 1);
        assert_eq!(ack.payload, 7u32.to_be_bytes().to_vec());
    }
}
