// MIT License - Copyright (c) 2026 telenot-bridge authors
// Per-connection protocol state machine, command engine and reader loop

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

use crate::constants::{INPUT_CONTACTS, USED_OUTPUTS_BASE};
use crate::diff::BitDiffEngine;
use crate::discovery::{DiscoveryPhase, DiscoveryQueues};
use crate::error::{Result, TelenotError};
use crate::event::{BridgeEvent, DiscoveredAddresses, EventSender};
use crate::frame::{FrameAccumulator, Telegram};
use crate::gate::ReadinessGate;
use crate::message::MessageType;
use crate::protocol::{
    decode_area_state, decode_contact_name, decode_system_state, partition_outputs,
    used_addresses, Command,
};
use crate::transport::{BoxedReader, BoxedWriter};

/// What the connection has to do after one telegram.
#[derive(Debug, Default)]
pub struct Reaction {
    pub events: Vec<BridgeEvent>,
    /// Telegram to write back, if any.
    pub reply: Option<Command>,
    /// Open the readiness gate once the reply is on the wire.
    pub ready_after_reply: bool,
}

impl Reaction {
    fn ack() -> Self {
        Self {
            reply: Some(Command::ConfirmAck),
            ..Default::default()
        }
    }
}

/// Protocol state of one bridge: channel snapshots, discovery queues and
/// the refresh flag.
///
/// `handle` is pure bookkeeping; it never touches I/O, so the whole
/// dispatch table can be driven from tests.
#[derive(Debug, Default)]
pub struct ProtocolState {
    diff: BitDiffEngine,
    discovery: DiscoveryQueues,
    refresh: bool,
}

impl ProtocolState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report every address again on the next `MP` and `SB` telegrams.
    pub fn request_refresh(&mut self) {
        self.refresh = true;
    }

    pub fn refresh_requested(&self) -> bool {
        self.refresh
    }

    /// A new connection starts with empty snapshots.
    pub fn reset_snapshots(&mut self) {
        self.diff.reset();
    }

    /// Called when the used-state request is about to be written.
    pub fn start_discovery(&mut self) {
        self.discovery.start();
    }

    pub fn discovery_phase(&self) -> DiscoveryPhase {
        self.discovery.phase()
    }

    pub fn discovered(&self) -> DiscoveredAddresses {
        self.discovery.discovered().clone()
    }

    /// Dispatch one telegram.
    pub fn handle(&mut self, telegram: &Telegram, gate: &ReadinessGate) -> Reaction {
        let msg_type = telegram.msg_type();
        let mut reaction = Reaction::ack();

        match msg_type {
            MessageType::SendNorm => match self.discovery.next_request() {
                Some(address) if gate.try_claim() => {
                    debug!("Requesting name of address 0x{:04x}", address);
                    reaction.reply = Some(Command::ContactInfo { address });
                }
                _ => gate.set_busy(),
            },
            MessageType::ConfirmAck => {
                gate.set_busy();
                reaction.reply = None;
            }
            MessageType::MpContacts => match self.diff.diff_mp(telegram, self.refresh) {
                Ok(events) => reaction
                    .events
                    .extend(events.into_iter().map(BridgeEvent::Address)),
                Err(e) => parse_warning(&e, telegram),
            },
            MessageType::SbStatus => {
                match self.diff.diff_sb_status(telegram, self.refresh) {
                    Ok(diff) => {
                        reaction
                            .events
                            .extend(diff.areas.into_iter().map(BridgeEvent::SecurityArea));
                        reaction
                            .events
                            .extend(diff.outputs.into_iter().map(BridgeEvent::Address));
                        self.refresh = false;
                    }
                    Err(e) => parse_warning(&e, telegram),
                }
                reaction.ready_after_reply = true;
            }
            t if t.is_area_state() => match decode_area_state(telegram) {
                Ok(record) => reaction.events.push(BridgeEvent::AreaState(record)),
                Err(e) => parse_warning(&e, telegram),
            },
            t if t.is_system_state() => {
                match decode_system_state(telegram) {
                    Ok(record) => reaction.events.push(BridgeEvent::SystemState(record)),
                    Err(e) => parse_warning(&e, telegram),
                }
                reaction.ready_after_reply = true;
            }
            MessageType::UsedInputs => match used_addresses(telegram, *INPUT_CONTACTS.start()) {
                Ok(addresses) => self.discovery.on_used_inputs(addresses),
                Err(e) => parse_warning(&e, telegram),
            },
            MessageType::UsedOutputs => {
                match used_addresses(telegram, USED_OUTPUTS_BASE) {
                    Ok(addresses) => {
                        let partition = partition_outputs(&addresses);
                        reaction.events.push(BridgeEvent::SecurityAreasDiscovered(
                            partition.security_areas.clone(),
                        ));
                        self.discovery.on_used_outputs(partition);
                    }
                    Err(e) => parse_warning(&e, telegram),
                }
                reaction.ready_after_reply = true;
            }
            t if t.is_contact_info() || t == MessageType::NotUsedContact => {
                self.pair_contact(telegram, &mut reaction.events);
                reaction.ready_after_reply = true;
            }
            MessageType::Restart => {
                info!("Panel restarted");
                reaction.ready_after_reply = true;
            }
            MessageType::Invalid => {
                warn!("Received {} telegram: {}", msg_type, telegram.hex());
                reaction.ready_after_reply = true;
            }
            _ => {
                debug!("Ignoring {} telegram: {}", msg_type, telegram.hex());
                reaction.ready_after_reply = true;
            }
        }

        if let Some(found) = self.discovery.check_complete() {
            reaction.events.push(BridgeEvent::DiscoveryComplete(found));
        }
        reaction
    }

    fn pair_contact(&mut self, telegram: &Telegram, events: &mut Vec<BridgeEvent>) {
        let msg_type = telegram.msg_type();
        let Some((kind, address)) = self.discovery.take_head(msg_type) else {
            debug!("No queued address for {} telegram", msg_type);
            return;
        };
        if msg_type == MessageType::NotUsedContact {
            debug!("Address 0x{:04x} is not in use", address);
            return;
        }
        match decode_contact_name(telegram) {
            Ok(name) => {
                debug!("Address 0x{:04x} is named {:?}", address, name);
                let contact = self.discovery.record_name(kind, address, name);
                events.push(BridgeEvent::ContactDiscovered(contact));
            }
            Err(e) => parse_warning(&e, telegram),
        }
    }
}

fn parse_warning(err: &TelenotError, telegram: &Telegram) {
    warn!("Error {} while parsing telegram {}", err, telegram.hex());
}

/// Owns the write half of one connection and serialises access to it.
pub struct CommandEngine {
    writer: Arc<Mutex<BoxedWriter>>,
    gate: ReadinessGate,
    state: Arc<Mutex<ProtocolState>>,
    send_timeout: Duration,
    /// Time the last well-framed telegram arrived
    last_received: Arc<Mutex<Instant>>,
    /// Signalled when a write fails
    failure: Arc<Notify>,
}

impl CommandEngine {
    pub fn new(writer: BoxedWriter, state: Arc<Mutex<ProtocolState>>, send_timeout: Duration) -> Self {
        Self {
            writer: Arc::new(Mutex::new(writer)),
            gate: ReadinessGate::new(),
            state,
            send_timeout,
            last_received: Arc::new(Mutex::new(Instant::now())),
            failure: Arc::new(Notify::new()),
        }
    }

    pub fn gate(&self) -> &ReadinessGate {
        &self.gate
    }

    pub fn state(&self) -> Arc<Mutex<ProtocolState>> {
        self.state.clone()
    }

    pub async fn last_received(&self) -> Instant {
        *self.last_received.lock().await
    }

    /// Resolves once a write has failed on this connection.
    pub async fn failed(&self) {
        self.failure.notified().await
    }

    /// Send a command once the panel is ready.
    ///
    /// Waits up to the send timeout for the readiness gate. On timeout the
    /// command is dropped and [`TelenotError::CommandTimeout`] returned; it
    /// is never retried.
    pub async fn send_command(&self, command: &Command) -> Result<()> {
        // encode first so a bad parameter never claims the gate
        let bytes = command.to_bytes()?;
        let label = command.log_label();

        if !self.gate.claim(self.send_timeout).await {
            warn!("Panel not ready, dropping {}", label);
            return Err(TelenotError::CommandTimeout {
                command: label,
                timeout_ms: self.send_timeout.as_millis() as u64,
            });
        }

        debug!("Sending {}", label);
        self.write_bytes(&bytes).await
    }

    /// Request the used-state bitmaps and restart discovery.
    pub async fn request_used_state(&self) -> Result<()> {
        self.state.lock().await.start_discovery();
        info!("Starting discovery");
        self.send_command(&Command::UsedState).await
    }

    /// Handle one telegram from the reader: dispatch, publish, reply.
    pub async fn process(&self, telegram: &Telegram, event_tx: &EventSender) -> Result<()> {
        let msg_type = telegram.msg_type();
        if msg_type != MessageType::Invalid {
            debug!("Received {} telegram", msg_type);
            *self.last_received.lock().await = Instant::now();
        }
        trace!("<- {}", telegram.hex());

        let reaction = {
            let mut state = self.state.lock().await;
            state.handle(telegram, &self.gate)
        };

        for event in reaction.events {
            let _ = event_tx.send(event);
        }
        if let Some(reply) = reaction.reply {
            self.write_bytes(&reply.to_bytes()?).await?;
        }
        if reaction.ready_after_reply {
            self.gate.set_ready();
        }
        Ok(())
    }

    /// Shut down the write half. Errors are ignored; the connection is going away.
    pub async fn close(&self) {
        if let Err(e) = self.writer.lock().await.shutdown().await {
            debug!("Error closing panel connection: {}", e);
        }
    }

    async fn write_bytes(&self, bytes: &[u8]) -> Result<()> {
        trace!("-> {}", hex::encode(bytes));
        let mut writer = self.writer.lock().await;
        let result = match writer.write_all(bytes).await {
            Ok(()) => writer.flush().await,
            Err(e) => Err(e),
        };
        result.map_err(|e| {
            error!("Failed to write to panel: {}", e);
            self.failure.notify_one();
            TelenotError::Io(e)
        })
    }
}

/// Spawn the reader task for one connection.
///
/// The task ends with the reason the connection is unusable: an I/O error,
/// end of stream, or a failed reply write.
pub fn spawn_reader_task(
    mut reader: BoxedReader,
    engine: Arc<CommandEngine>,
    event_tx: EventSender,
) -> JoinHandle<TelenotError> {
    tokio::spawn(async move {
        let mut buf = vec![0u8; 2048];
        let mut accumulator = FrameAccumulator::new();

        loop {
            let n = match reader.read(&mut buf).await {
                Ok(0) => {
                    info!("End of input stream detected");
                    return TelenotError::Disconnected;
                }
                Ok(n) => n,
                Err(e) => {
                    error!("Reader: read error: {}", e);
                    return TelenotError::Io(e);
                }
            };

            for telegram in accumulator.push(&buf[..n]) {
                if let Err(e) = engine.process(&telegram, &event_tx).await {
                    return e;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{CONFIRM_ACK, SEND_NORM};
    use crate::event::{event_channel, ContactKind, EventReceiver, GroupTag};
    use crate::frame::seal;
    use tokio_test::io::Builder;

    fn telegram(body: &str) -> Telegram {
        Telegram::from_hex(seal(body).unwrap())
    }

    fn sb_status(sb: &str) -> Telegram {
        telegram(&format!(
            "683636687302052400050002{}{sb:f<16}{}",
            "00".repeat(6),
            "ff".repeat(32)
        ))
    }

    fn used_inputs(bitmap: &str) -> Telegram {
        telegram(&format!("680e0e6873020a2400000071{bitmap:f<12}"))
    }

    fn used_outputs(bitmap: &str) -> Telegram {
        telegram(&format!("681818687302142400050072{bitmap:f<32}"))
    }

    fn contact_info(address: u16, name: &str) -> Telegram {
        let name_hex = hex::encode(name);
        let body = format!(
            "73020a0c00{address:04x}{}{:02x}00{name_hex}",
            "0".repeat(14),
            name.len()
        );
        let len = body.len() / 2;
        telegram(&format!("68{len:02x}{len:02x}68{body}"))
    }

    fn bytes(hex_str: &str) -> Vec<u8> {
        hex::decode(hex_str).unwrap()
    }

    #[test]
    fn test_send_norm_without_work_acks_and_closes_gate() {
        let mut state = ProtocolState::new();
        let gate = ReadinessGate::new();
        gate.set_ready();

        let reaction = state.handle(&Telegram::from_hex(SEND_NORM), &gate);
        assert_eq!(reaction.reply, Some(Command::ConfirmAck));
        assert!(!reaction.ready_after_reply);
        assert!(!gate.is_ready());
    }

    #[test]
    fn test_confirm_ack_closes_gate_without_reply() {
        let mut state = ProtocolState::new();
        let gate = ReadinessGate::new();
        gate.set_ready();
        let reaction = state.handle(&Telegram::from_hex(CONFIRM_ACK), &gate);
        assert!(reaction.reply.is_none());
        assert!(!gate.is_ready());
    }

    #[test]
    fn test_sb_status_opens_gate_and_clears_refresh() {
        let mut state = ProtocolState::new();
        let gate = ReadinessGate::new();
        state.request_refresh();

        let reaction = state.handle(&sb_status(""), &gate);
        assert_eq!(reaction.reply, Some(Command::ConfirmAck));
        assert!(reaction.ready_after_reply);
        assert!(!state.refresh_requested());
        let areas = reaction
            .events
            .iter()
            .filter(|e| matches!(e, BridgeEvent::SecurityArea(_)))
            .count();
        assert_eq!(areas, 8);

        // unchanged: nothing but the ack
        let reaction = state.handle(&sb_status(""), &gate);
        assert!(reaction.events.is_empty());
    }

    #[test]
    fn test_mp_does_not_touch_gate() {
        let mut state = ProtocolState::new();
        let gate = ReadinessGate::new();
        let mp = telegram(&format!("682626687302052400000001{}", "ff".repeat(30)));
        let reaction = state.handle(&mp, &gate);
        assert!(!reaction.ready_after_reply);
        assert_eq!(reaction.events.len(), 240);
        assert!(matches!(
            reaction.events[0],
            BridgeEvent::Address(crate::event::AddressEvent {
                group: GroupTag::Mp,
                address: 0,
                value: true
            })
        ));
    }

    #[test]
    fn test_unknown_and_restart_open_gate() {
        let mut state = ProtocolState::new();
        let gate = ReadinessGate::new();
        for t in [
            telegram("68030368010203"),
            telegram("680909687302010000ffff0153"),
        ] {
            let reaction = state.handle(&t, &gate);
            assert_eq!(reaction.reply, Some(Command::ConfirmAck));
            assert!(reaction.ready_after_reply);
        }
    }

    #[test]
    fn test_discovery_walk() {
        let mut state = ProtocolState::new();
        let gate = ReadinessGate::new();
        state.start_discovery();

        // inputs 1 and 3 used (0xf5 reversed = 1,0,1,0,...)
        let r = state.handle(&used_inputs("f5"), &gate);
        assert!(!r.ready_after_reply);
        // reporting area 1392 used
        let mut outputs = "ff".repeat(14);
        outputs.push_str("fe");
        let r = state.handle(&used_outputs(&outputs), &gate);
        assert!(r.ready_after_reply);
        assert!(matches!(&r.events[..], [BridgeEvent::SecurityAreasDiscovered(a)] if a.is_empty()));
        gate.set_ready();

        let poll = Telegram::from_hex(SEND_NORM);
        let r = state.handle(&poll, &gate);
        assert_eq!(r.reply, Some(Command::ContactInfo { address: 1 }));
        assert!(!gate.is_ready());

        // gate busy: the poll is only acknowledged and the head stays
        let r = state.handle(&poll, &gate);
        assert_eq!(r.reply, Some(Command::ConfirmAck));

        let r = state.handle(&contact_info(1, "Flur"), &gate);
        assert!(r.ready_after_reply);
        match &r.events[..] {
            [BridgeEvent::ContactDiscovered(c)] => {
                assert_eq!((c.kind, c.address, c.name.as_str()), (ContactKind::Input, 1, "Flur"));
            }
            other => panic!("unexpected events {other:?}"),
        }
        gate.set_ready();

        assert_eq!(
            state.handle(&poll, &gate).reply,
            Some(Command::ContactInfo { address: 3 })
        );
        state.handle(&contact_info(3, "Bad"), &gate);
        gate.set_ready();

        assert_eq!(
            state.handle(&poll, &gate).reply,
            Some(Command::ContactInfo { address: 1392 })
        );
        let r = state.handle(&contact_info(1392, "Keller"), &gate);
        match &r.events[..] {
            [BridgeEvent::ContactDiscovered(c), BridgeEvent::DiscoveryComplete(found)] => {
                assert_eq!(c.kind, ContactKind::ReportingArea);
                assert_eq!(found.inputs, vec![1, 3]);
                assert_eq!(found.reporting_areas, vec![1392]);
                assert_eq!(found.contacts.len(), 3);
            }
            other => panic!("unexpected events {other:?}"),
        }
        assert_eq!(state.discovery_phase(), DiscoveryPhase::Idle);
    }

    fn drain(rx: &mut EventReceiver) -> Vec<BridgeEvent> {
        let mut events = Vec::new();
        while let Ok(e) = rx.try_recv() {
            events.push(e);
        }
        events
    }

    #[tokio::test]
    async fn test_reader_acks_poll() {
        let reader = Builder::new().read(&bytes(SEND_NORM)).build();
        let writer = Builder::new().write(&bytes(CONFIRM_ACK)).build();
        let state = Arc::new(Mutex::new(ProtocolState::new()));
        let engine = Arc::new(CommandEngine::new(
            Box::new(writer),
            state,
            Duration::from_secs(20),
        ));
        engine.gate().set_ready();
        let (tx, _rx) = event_channel(16);

        let reason = spawn_reader_task(Box::new(reader), engine.clone(), tx)
            .await
            .unwrap();
        assert!(matches!(reason, TelenotError::Disconnected));
        assert!(!engine.gate().is_ready());
    }

    #[tokio::test]
    async fn test_reader_handles_split_frames() {
        let sb = bytes(sb_status("fe").hex());
        let (head, tail) = sb.split_at(10);
        let reader = Builder::new().read(head).read(tail).build();
        let writer = Builder::new().write(&bytes(CONFIRM_ACK)).build();
        let engine = Arc::new(CommandEngine::new(
            Box::new(writer),
            Arc::new(Mutex::new(ProtocolState::new())),
            Duration::from_secs(20),
        ));
        let (tx, mut rx) = event_channel(512);

        spawn_reader_task(Box::new(reader), engine.clone(), tx)
            .await
            .unwrap();
        assert!(engine.gate().is_ready());
        let events = drain(&mut rx);
        let first_area = events.iter().find_map(|e| match e {
            BridgeEvent::SecurityArea(a) => Some(*a),
            _ => None,
        });
        assert!(first_area.unwrap().status().is_disarmed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_times_out_without_writing() {
        // no write expected: the mock panics on any write
        let writer = Builder::new().build();
        let engine = CommandEngine::new(
            Box::new(writer),
            Arc::new(Mutex::new(ProtocolState::new())),
            Duration::from_secs(20),
        );

        let err = engine
            .send_command(&Command::DisarmArea { area: 1 })
            .await
            .unwrap_err();
        match err {
            TelenotError::CommandTimeout { command, timeout_ms } => {
                assert_eq!(command, "DISARM area 1");
                assert_eq!(timeout_ms, 20_000);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_send_when_ready_writes_once() {
        let disarm = Command::DisarmArea { area: 1 }.to_bytes().unwrap();
        let writer = Builder::new().write(&disarm).build();
        let engine = CommandEngine::new(
            Box::new(writer),
            Arc::new(Mutex::new(ProtocolState::new())),
            Duration::from_secs(20),
        );
        engine.gate().set_ready();

        engine
            .send_command(&Command::DisarmArea { area: 1 })
            .await
            .unwrap();
        assert!(!engine.gate().is_ready());
    }

    #[tokio::test]
    async fn test_invalid_parameter_does_not_claim_gate() {
        let engine = CommandEngine::new(
            Box::new(Builder::new().build()),
            Arc::new(Mutex::new(ProtocolState::new())),
            Duration::from_secs(20),
        );
        engine.gate().set_ready();
        assert!(matches!(
            engine.send_command(&Command::ResetAlarm { area: 9 }).await,
            Err(TelenotError::InvalidParameter { .. })
        ));
        assert!(engine.gate().is_ready());
    }
}
