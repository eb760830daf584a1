// serialcan/src/channel.rs
//
// Implements the CAN channel over an SLCAN serial adapter.
//
// This file is part of the Rust 'serialcan-rs' library.
//
// Licensed under the MIT license:
//   <LICENSE or http://opensource.org/licenses/MIT>
// This file may not be copied, modified, or distributed except according
// to those terms.

//! The CAN channel.
//!
//! A [`CanChannel`] binds one serial transport, one reception queue and
//! one status aggregator, and walks the lifecycle
//!
//! ```text
//! (uninitialized) --init--> Stopped --start--> Running
//!                              ^                  |
//!                              +------reset-------+
//!            any state --exit--> Closed (terminal)
//! ```
//!
//! Construction *is* initialization: the uninitialized state exists only
//! before [`CanChannel::init`] returns. Operations issued in the wrong
//! state fail without side effects; no bytes reach the wire.
//!
//! A dedicated reader thread pumps the transport: received lines are
//! decoded and routed — frames into the queue, command replies to the
//! thread waiting in a request/response round-trip, asynchronous status
//! reports into the aggregator. [`CanChannel::kill`] is the only
//! cross-cutting cancellation primitive; it wakes any thread blocked in
//! [`CanChannel::read`] or a command round-trip.

use crate::{
    bitrate::{self, BitrateDescriptor, BusSpeed, ControllerTiming},
    codec::{decode_adapter_flags, Decoded, FrameCodec},
    frame::CanFrame,
    queue::MessageQueue,
    status::{StatusAggregator, StatusRegister},
    transport::{LineSplitter, SerialPortConfig, SerialTransport, Transport},
    Dialect, Error, OperationMode, Result,
};
use log::{debug, warn};
use std::{
    io,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Condvar, Mutex,
    },
    thread,
    time::{Duration, Instant},
};

/// Frames the reception queue holds before dropping new arrivals.
const QUEUE_SIZE: usize = 65_536;

/// How long a command round-trip waits for its ACK/NACK.
const COMMAND_TIMEOUT: Duration = Duration::from_millis(100);

/// Idle timeout of the reader loop; bounds the shutdown latency.
const READER_IDLE: Duration = Duration::from_millis(50);

/// Result of probing a serial device for an SLCAN adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    /// An adapter answered on the port.
    Present,
    /// The port exists but is held by another process or channel.
    Occupied,
    /// The port cannot be probed without disturbing it.
    NotTestable,
}

/// Lifecycle state of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Initialized, controller stopped.
    Stopped,
    /// Controller started, frames flowing.
    Running,
    /// Resources released; every further operation fails.
    Closed,
}

/// Frames transmitted, received and error events seen since `start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameCounters {
    /// Frames successfully written.
    pub tx: u64,
    /// Frames delivered to the caller.
    pub rx: u64,
    /// Status/error frames delivered to the caller.
    pub err: u64,
}

/// A reply slot for the half-duplex command round-trips.
///
/// One command is in flight at a time; the reader completes the slot
/// when a non-frame line arrives while it is armed.
#[derive(Debug, Default)]
struct ResponseSlot {
    state: Mutex<SlotState>,
    cond: Condvar,
}

#[derive(Debug, Default)]
struct SlotState {
    armed: bool,
    reply: Option<Decoded>,
    kill_generation: u64,
}

impl ResponseSlot {
    fn arm(&self) {
        let mut state = self.state.lock().unwrap();
        state.armed = true;
        state.reply = None;
    }

    fn disarm(&self) {
        let mut state = self.state.lock().unwrap();
        state.armed = false;
        state.reply = None;
    }

    /// Delivers a reply to an armed slot. Returns `false` when no
    /// command is waiting, i.e. the line was asynchronous.
    fn complete(&self, reply: Decoded) -> bool {
        let mut state = self.state.lock().unwrap();
        if !state.armed {
            return false;
        }
        state.armed = false;
        state.reply = Some(reply);
        drop(state);
        self.cond.notify_all();
        true
    }

    fn wait(&self, timeout: Duration) -> Result<Decoded> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock().unwrap();
        let generation = state.kill_generation;
        loop {
            if let Some(reply) = state.reply.take() {
                return Ok(reply);
            }
            if state.kill_generation != generation {
                return Err(Error::Canceled);
            }
            let now = Instant::now();
            if now >= deadline {
                state.armed = false;
                return Err(Error::Timeout);
            }
            let (guard, _) = self.cond.wait_timeout(state, deadline - now).unwrap();
            state = guard;
        }
    }

    fn kill(&self) {
        let mut state = self.state.lock().unwrap();
        state.kill_generation += 1;
        state.armed = false;
        drop(state);
        self.cond.notify_all();
    }
}

/// State shared between the reader loop and caller threads.
#[derive(Debug)]
struct Shared {
    queue: MessageQueue,
    status: StatusAggregator,
    response: ResponseSlot,
    /// Transport failed; the channel is dead until `exit`.
    fatal: AtomicBool,
    /// Tells the reader loop to finish.
    shutdown: AtomicBool,
    /// Wire bits seen since the last busload query.
    bus_bits: AtomicU64,
    /// Reception of error/status frames in-band enabled.
    push_status_frames: AtomicBool,
}

/// A handle to one CAN channel over a serial SLCAN adapter.
///
/// The handle owns its transport, queue and reader thread exclusively;
/// dropping it closes the channel.
pub struct CanChannel {
    shared: Arc<Shared>,
    writer: Box<dyn Transport>,
    codec: FrameCodec,
    dialect: Dialect,
    mode: OperationMode,
    state: ChannelState,
    timing: Option<ControllerTiming>,
    filter: Option<(u32, u32)>,
    counters: FrameCounters,
    busload_mark: Instant,
    reader: Option<thread::JoinHandle<()>>,
}

impl CanChannel {
    /// Opens the serial device and initializes a channel on it in the
    /// requested operation mode. The controller is left stopped.
    ///
    /// When the configured dialect cannot realize the mode (e.g. CAN FD
    /// on a Lawicel adapter), initialization fails before any byte is
    /// written to the transport.
    pub fn init(config: &SerialPortConfig, mode: OperationMode) -> Result<Self> {
        if config.dialect != Dialect::Auto {
            mode.check_capability(config.dialect.capability())?;
        } else {
            mode.validate()?;
        }
        let transport = SerialTransport::open(config)?;
        Self::init_with_transport(Box::new(transport), config.dialect, mode)
    }

    /// Initializes a channel over an already-open transport.
    ///
    /// This is the injection point for adapter simulations and exotic
    /// byte streams (TCP-serial bridges and the like); [`Self::init`] is
    /// the common path.
    pub fn init_with_transport(
        transport: Box<dyn Transport>,
        dialect: Dialect,
        mode: OperationMode,
    ) -> Result<Self> {
        if dialect != Dialect::Auto {
            mode.check_capability(dialect.capability())?;
        } else {
            mode.validate()?;
        }

        let mut reader_half = transport.try_clone_reader()?;
        reader_half.set_read_timeout(READER_IDLE)?;

        let shared = Arc::new(Shared {
            queue: MessageQueue::new(QUEUE_SIZE),
            status: StatusAggregator::new(),
            response: ResponseSlot::default(),
            fatal: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            bus_bits: AtomicU64::new(0),
            push_status_frames: AtomicBool::new(mode.contains(OperationMode::ERR)),
        });

        let reader = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name("serialcan-reader".into())
                .spawn(move || reader_loop(reader_half, shared))
                .map_err(Error::from)?
        };

        let mut channel = Self {
            shared,
            writer: transport,
            codec: FrameCodec::new(dialect),
            dialect,
            mode,
            state: ChannelState::Stopped,
            timing: None,
            filter: None,
            counters: FrameCounters::default(),
            busload_mark: Instant::now(),
            reader: Some(reader),
        };

        if dialect == Dialect::Auto {
            let detected = channel.detect_dialect()?;
            mode.check_capability(detected.capability())?;
            channel.dialect = detected;
            channel.codec = FrameCodec::new(detected);
        } else if dialect.ack_feedback() {
            // a version reply doubles as the protocol check
            match channel.command(&dialect.cmd_version())? {
                Decoded::Version { hardware, software } => {
                    debug!("adapter version: hw {:02X} sw {:02X}", hardware, software);
                }
                _ => {
                    channel.teardown();
                    return Err(Error::NotSupported);
                }
            }
        }

        // the controller may still be running from a previous user
        let close = channel.dialect.cmd_close_channel();
        let _ = channel.command(&close);

        Ok(channel)
    }

    /// Distinguishes Lawicel from CANable firmware by the version query:
    /// Lawicel acknowledges it, CANable firmware does not.
    fn detect_dialect(&mut self) -> Result<Dialect> {
        self.shared.response.arm();
        self.write_wire(&Dialect::Lawicel.cmd_version())?;
        match self.shared.response.wait(COMMAND_TIMEOUT) {
            Ok(Decoded::Version { .. }) => Ok(Dialect::Lawicel),
            Ok(_) | Err(Error::Timeout) => Ok(Dialect::Canable),
            Err(e) => Err(e),
        }
    }

    /// The resolved dialect of the adapter.
    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// The operation mode selected at initialization.
    pub fn mode(&self) -> OperationMode {
        self.mode
    }

    /// The current lifecycle state.
    pub fn state(&self) -> ChannelState {
        self.state
    }

    /// Starts the controller with the requested bit-rate.
    ///
    /// Clears the reception queue, the status register and the frame
    /// counters; a channel always starts clean.
    pub fn start(&mut self, descriptor: BitrateDescriptor) -> Result<()> {
        self.guard_open()?;
        if self.state == ChannelState::Running {
            return Err(Error::AlreadyStarted);
        }
        let timing = bitrate::resolve(descriptor, self.mode.fd_enabled())?;

        for command in self.dialect.rate_commands(&timing)? {
            self.command_expect_ack(&command)
                .map_err(|e| if e.is_fatal() { e } else { Error::IllegalBitrate })?;
        }
        if self.dialect.supports_filter() {
            if let Some((code, mask)) = self.filter {
                self.command_expect_ack(&self.dialect.cmd_acceptance_code(code))?;
                self.command_expect_ack(&self.dialect.cmd_acceptance_mask(mask))?;
            }
        }
        self.command_expect_ack(&self.dialect.cmd_open_channel(self.mode))?;

        self.shared.queue.clear();
        self.shared.status.reset();
        self.shared.status.note_stopped(false);
        self.shared.bus_bits.store(0, Ordering::Relaxed);
        self.counters = FrameCounters::default();
        self.busload_mark = Instant::now();
        self.timing = Some(timing);
        self.state = ChannelState::Running;
        debug!("channel started at {} bit/s", timing.nominal_bitrate());
        Ok(())
    }

    /// Stops the controller. Frames still queued are discarded by the
    /// next `start`; reads require a running channel.
    pub fn reset(&mut self) -> Result<()> {
        self.guard_running()?;
        let close = self.dialect.cmd_close_channel();
        self.command_expect_ack(&close)?;
        self.state = ChannelState::Stopped;
        self.shared.status.note_stopped(true);
        Ok(())
    }

    /// Transmits a frame, waiting up to `timeout` for the transmitter.
    ///
    /// A zero timeout sends without waiting for the adapter's transmit
    /// confirmation. When the confirmation does not arrive in time the
    /// transmitter-busy condition is latched and returned; retrying is
    /// the caller's decision.
    pub fn write(&mut self, frame: &CanFrame, timeout: Duration) -> Result<()> {
        self.guard_running()?;
        self.check_tx_mode(frame)?;
        if self.shared.status.bus_condition().bus_off {
            return Err(Error::BusOff);
        }
        let bytes = self.codec.encode(frame)?;

        let wait_confirmation = self.dialect.ack_feedback() && !timeout.is_zero();
        if wait_confirmation {
            self.shared.response.arm();
        }
        self.write_wire(&bytes)?;
        if wait_confirmation {
            match self.shared.response.wait(timeout) {
                Ok(Decoded::TxConfirmation) | Ok(Decoded::Ack) => {}
                Ok(Decoded::Nack) | Err(Error::Timeout) => {
                    self.shared.status.note_tx_outcome(true);
                    return Err(Error::TransmitterBusy);
                }
                Ok(_) => {
                    self.shared.status.note_tx_outcome(true);
                    return Err(Error::TransmitterBusy);
                }
                Err(e) => return Err(e),
            }
        }
        self.shared.status.note_tx_outcome(false);
        self.shared
            .bus_bits
            .fetch_add(frame_bits(frame), Ordering::Relaxed);
        self.counters.tx += 1;
        Ok(())
    }

    /// Reads the oldest received frame.
    ///
    /// `Some(Duration::ZERO)` polls, `Some(d)` waits up to `d`, `None`
    /// blocks until a frame arrives or [`Self::kill`] is called.
    pub fn read(&mut self, timeout: Option<Duration>) -> Result<CanFrame> {
        self.guard_running()?;
        let frame = self.shared.queue.pop(timeout)?;
        if frame.is_status() {
            self.counters.err += 1;
        } else {
            self.counters.rx += 1;
        }
        Ok(frame)
    }

    /// Computes the status register.
    ///
    /// On a running channel with a Lawicel adapter the controller flags
    /// are fetched from the device first, so the live condition bits are
    /// current. Latched bits (overrun, message lost) clear once read.
    pub fn status(&mut self) -> Result<StatusRegister> {
        self.guard_open()?;
        if self.state == ChannelState::Running && self.dialect.ack_feedback() {
            let cmd = self.dialect.cmd_status_flags();
            if let Decoded::StatusFlags(byte) = self.command(&cmd)? {
                let (condition, lost) = decode_adapter_flags(byte);
                self.shared.status.note_bus_condition(condition);
                if lost {
                    self.shared.status.note_message_lost();
                }
            }
        }
        Ok(self.shared.status.compute(self.shared.queue.is_empty()))
    }

    /// Estimates the bus load since the previous query, in percent,
    /// along with the status register.
    pub fn busload(&mut self) -> Result<(f64, StatusRegister)> {
        self.guard_open()?;
        let load = match (self.state, self.timing) {
            (ChannelState::Running, Some(timing)) => {
                let bits = self.shared.bus_bits.swap(0, Ordering::Relaxed) as f64;
                let elapsed = self.busload_mark.elapsed().as_secs_f64();
                self.busload_mark = Instant::now();
                if elapsed > 0.0 {
                    (100.0 * bits / (elapsed * timing.nominal_bitrate() as f64)).min(100.0)
                } else {
                    0.0
                }
            }
            _ => 0.0,
        };
        let register = self.status()?;
        Ok((load, register))
    }

    /// The resolved bit-rate timing and bus speed of the last `start`.
    pub fn bitrate(&self) -> Result<(ControllerTiming, BusSpeed)> {
        self.guard_open()?;
        let timing = self.timing.ok_or(Error::NotStarted)?;
        Ok((timing, timing.speed()))
    }

    /// The frame counters since the last `start`.
    pub fn counters(&self) -> FrameCounters {
        self.counters
    }

    /// The number of malformed wire lines dropped since initialization.
    pub fn dropped_lines(&self) -> u64 {
        self.shared.status.dropped_lines()
    }

    /// Queries the adapter hardware and software version (Lawicel).
    pub fn version(&mut self) -> Result<(u8, u8)> {
        self.guard_open()?;
        if !self.dialect.ack_feedback() {
            return Err(Error::NotSupported);
        }
        match self.command(&self.dialect.cmd_version())? {
            Decoded::Version { hardware, software } => Ok((hardware, software)),
            _ => Err(Error::IllegalParameter),
        }
    }

    /// Queries the adapter serial number (Lawicel).
    pub fn serial_number(&mut self) -> Result<u32> {
        self.guard_open()?;
        if !self.dialect.ack_feedback() {
            return Err(Error::NotSupported);
        }
        match self.command(&self.dialect.cmd_serial_number())? {
            Decoded::SerialNumber(number) => Ok(number),
            _ => Err(Error::IllegalParameter),
        }
    }

    /// Stores the acceptance filter to program at the next `start`
    /// (Lawicel; the controller must be stopped).
    pub fn set_acceptance_filter(&mut self, code: u32, mask: u32) -> Result<()> {
        self.guard_open()?;
        if self.state == ChannelState::Running {
            return Err(Error::AlreadyStarted);
        }
        if !self.dialect.supports_filter() {
            return Err(Error::NotSupported);
        }
        self.filter = Some((code, mask));
        Ok(())
    }

    /// Clears the stored acceptance filter (accept everything).
    pub fn reset_acceptance_filter(&mut self) -> Result<()> {
        self.guard_open()?;
        if self.state == ChannelState::Running {
            return Err(Error::AlreadyStarted);
        }
        self.filter = None;
        Ok(())
    }

    /// Wakes every thread blocked in [`Self::read`] or in a command
    /// round-trip with a cancellation error. Callable from any state and
    /// any thread; does not alter queue contents or channel state.
    pub fn kill(&self) -> Result<()> {
        self.shared.queue.kill();
        self.shared.response.kill();
        Ok(())
    }

    /// A clonable handle for cancelling blocked operations on this
    /// channel from another thread, e.g. a shutdown or signal handler
    /// path, while the channel itself is borrowed by a blocking call.
    pub fn kill_handle(&self) -> KillHandle {
        KillHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Closes the channel and releases the transport and the reader
    /// thread. Idempotent: closing a closed channel succeeds.
    pub fn exit(&mut self) -> Result<()> {
        if self.state == ChannelState::Closed {
            return Ok(());
        }
        if self.state == ChannelState::Running && !self.shared.fatal.load(Ordering::Relaxed) {
            // best effort: leave the controller stopped
            let close = self.dialect.cmd_close_channel();
            let _ = self.command_expect_ack(&close);
        }
        self.teardown();
        Ok(())
    }

    fn teardown(&mut self) {
        self.shared.shutdown.store(true, Ordering::Relaxed);
        self.shared.queue.kill();
        self.shared.response.kill();
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
        self.shared.queue.clear();
        self.state = ChannelState::Closed;
    }

    // ===== guards and round-trip plumbing =====

    fn guard_open(&self) -> Result<()> {
        if self.state == ChannelState::Closed {
            return Err(Error::NotInitialized);
        }
        if self.shared.fatal.load(Ordering::Relaxed) {
            return Err(Error::Resource);
        }
        Ok(())
    }

    fn guard_running(&self) -> Result<()> {
        self.guard_open()?;
        if self.state != ChannelState::Running {
            return Err(Error::NotStarted);
        }
        Ok(())
    }

    /// Mode-dependent frame admission, on top of the frame invariants.
    fn check_tx_mode(&self, frame: &CanFrame) -> Result<()> {
        if frame.is_extended() && self.mode.contains(OperationMode::NXTD) {
            return Err(Error::IllegalParameter);
        }
        if frame.is_remote() && self.mode.contains(OperationMode::NRTR) {
            return Err(Error::IllegalParameter);
        }
        if frame.is_fd() && !self.mode.fd_enabled() {
            return Err(Error::IllegalParameter);
        }
        if frame.is_brs() && !self.mode.contains(OperationMode::BRSE) {
            return Err(Error::IllegalParameter);
        }
        Ok(())
    }

    fn write_wire(&mut self, bytes: &[u8]) -> Result<()> {
        self.writer.write_bytes(bytes).map_err(|e| {
            self.shared.fatal.store(true, Ordering::Relaxed);
            Error::from(e)
        })
    }

    /// One command round-trip. Dialects without ACK feedback fire and
    /// forget; the reply is then a synthetic ACK.
    fn command(&mut self, bytes: &[u8]) -> Result<Decoded> {
        if !self.dialect.ack_feedback() {
            self.write_wire(bytes)?;
            return Ok(Decoded::Ack);
        }
        self.shared.response.arm();
        if let Err(e) = self.write_wire(bytes) {
            self.shared.response.disarm();
            return Err(e);
        }
        self.shared.response.wait(COMMAND_TIMEOUT)
    }

    fn command_expect_ack(&mut self, bytes: &[u8]) -> Result<()> {
        match self.command(bytes)? {
            Decoded::Ack | Decoded::TxConfirmation => Ok(()),
            Decoded::Nack => Err(Error::IllegalParameter),
            other => {
                debug!("unexpected command reply: {:?}", other);
                Err(Error::IllegalParameter)
            }
        }
    }
}

impl Drop for CanChannel {
    fn drop(&mut self) {
        let _ = self.exit();
    }
}

/// Cancels blocked operations on a [`CanChannel`] it was taken from.
///
/// The handle stays valid after the channel closes; killing a closed
/// channel is a no-op.
#[derive(Clone)]
pub struct KillHandle {
    shared: Arc<Shared>,
}

impl KillHandle {
    /// Wakes every thread blocked on the channel with a cancellation
    /// error. Idempotent and safe to call concurrently with any channel
    /// operation.
    pub fn kill(&self) {
        self.shared.queue.kill();
        self.shared.response.kill();
    }
}

impl embedded_can::nb::Can for CanChannel {
    type Frame = CanFrame;
    type Error = Error;

    fn transmit(&mut self, frame: &Self::Frame) -> nb::Result<Option<Self::Frame>, Self::Error> {
        match self.write(frame, Duration::ZERO) {
            Ok(()) => Ok(None),
            Err(Error::TransmitterBusy) => Err(nb::Error::WouldBlock),
            Err(e) => Err(nb::Error::Other(e)),
        }
    }

    fn receive(&mut self) -> nb::Result<Self::Frame, Self::Error> {
        match self.read(Some(Duration::ZERO)) {
            Ok(frame) => Ok(frame),
            Err(Error::ReceiverEmpty) => Err(nb::Error::WouldBlock),
            Err(e) => Err(nb::Error::Other(e)),
        }
    }
}

/// Probes a serial device for an SLCAN adapter without initializing a
/// channel on it.
///
/// Fails with [`Error::NotSupported`] before touching the device when
/// the dialect cannot realize `mode`.
pub fn probe(config: &SerialPortConfig, mode: OperationMode) -> Result<Presence> {
    if config.dialect != Dialect::Auto {
        mode.check_capability(config.dialect.capability())?;
    } else {
        mode.validate()?;
    }
    match SerialTransport::open(config) {
        Ok(_) => Ok(Presence::Present),
        Err(e)
            if matches!(
                e.kind(),
                io::ErrorKind::PermissionDenied | io::ErrorKind::AddrInUse
            ) =>
        {
            Ok(Presence::Occupied)
        }
        Err(e) => Err(Error::from(e)),
    }
}

/// The dedicated reception loop: transport bytes → lines → decoded
/// items → queue / response slot / status aggregator.
fn reader_loop(mut transport: Box<dyn Transport>, shared: Arc<Shared>) {
    let codec = FrameCodec::new(Dialect::Auto);
    let mut splitter = LineSplitter::new();
    let mut buf = [0u8; 512];
    loop {
        if shared.shutdown.load(Ordering::Relaxed) {
            break;
        }
        let n = match transport.read_bytes(&mut buf) {
            Ok(0) => continue,
            Ok(n) => n,
            Err(e) => {
                warn!("serial transport failed: {}", e);
                shared.fatal.store(true, Ordering::Relaxed);
                shared.queue.kill();
                shared.response.kill();
                break;
            }
        };
        for line in splitter.feed(&buf[..n]) {
            match codec.decode(&line) {
                Some(Decoded::Frame(frame)) => {
                    shared
                        .bus_bits
                        .fetch_add(frame_bits(&frame), Ordering::Relaxed);
                    if !shared.queue.push(frame) {
                        shared.status.note_message_lost();
                        shared.status.note_queue_overrun();
                    }
                }
                Some(reply) => {
                    if !shared.response.complete(reply.clone()) {
                        handle_async(&shared, reply);
                    }
                }
                None => {
                    shared.status.note_dropped_line();
                    warn!("dropped malformed line ({} bytes)", line.bytes.len());
                }
            }
        }
    }
}

/// An adapter line that no command was waiting for: status reports feed
/// the aggregator and, with error frames enabled, surface in-band as
/// status frames. Everything else is stale and ignored.
fn handle_async(shared: &Shared, reply: Decoded) {
    if let Decoded::StatusFlags(byte) = reply {
        let (condition, lost) = decode_adapter_flags(byte);
        shared.status.note_bus_condition(condition);
        if lost {
            shared.status.note_message_lost();
        }
        if shared.push_status_frames.load(Ordering::Relaxed) {
            let mut register = StatusRegister::empty();
            register.set(StatusRegister::BUS_OFF, condition.bus_off);
            register.set(StatusRegister::WARNING_LEVEL, condition.warning_level);
            register.set(StatusRegister::BUS_ERROR, condition.bus_error_flag);
            register.set(StatusRegister::MESSAGE_LOST, lost);
            shared.queue.push(CanFrame::status_frame(register.as_byte()));
        }
    }
}

/// Rough wire length of a frame, for the bus load estimate: arbitration
/// and control overhead plus the payload, stuffing ignored.
fn frame_bits(frame: &CanFrame) -> u64 {
    let overhead: u64 = if frame.is_extended() { 67 } else { 47 };
    overhead + 8 * frame.len() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    /// A transport connected to nothing: reads stay idle, writes vanish.
    /// With the CANable dialect (no ACK feedback) this is enough to
    /// exercise the state machine.
    struct NullTransport;

    impl Transport for NullTransport {
        fn write_bytes(&mut self, _bytes: &[u8]) -> io::Result<()> {
            Ok(())
        }

        fn read_bytes(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            thread::sleep(Duration::from_millis(2));
            Ok(0)
        }

        fn set_read_timeout(&mut self, _timeout: Duration) -> io::Result<()> {
            Ok(())
        }

        fn try_clone_reader(&self) -> io::Result<Box<dyn Transport>> {
            Ok(Box::new(NullTransport))
        }
    }

    fn null_channel(mode: OperationMode) -> CanChannel {
        CanChannel::init_with_transport(Box::new(NullTransport), Dialect::Canable, mode).unwrap()
    }

    #[test]
    fn fd_mode_on_classic_dialect_fails_before_any_io() {
        let mode = OperationMode::FDOE | OperationMode::BRSE;
        let result =
            CanChannel::init_with_transport(Box::new(NullTransport), Dialect::Lawicel, mode);
        assert!(matches!(result, Err(Error::NotSupported)));
    }

    #[test]
    fn operations_respect_the_state_machine() {
        let mut channel = null_channel(OperationMode::DEFAULT);
        assert_eq!(channel.state(), ChannelState::Stopped);

        // stopped: no traffic, no reset
        let frame = CanFrame::from_raw_id(0x123, &[]).unwrap();
        assert!(matches!(
            channel.write(&frame, Duration::ZERO),
            Err(Error::NotStarted)
        ));
        assert!(matches!(
            channel.read(Some(Duration::ZERO)),
            Err(Error::NotStarted)
        ));
        assert!(matches!(channel.reset(), Err(Error::NotStarted)));

        channel.start(BitrateDescriptor::Index(bitrate::INDEX_250K)).unwrap();
        assert_eq!(channel.state(), ChannelState::Running);
        assert!(matches!(
            channel.start(BitrateDescriptor::Index(bitrate::INDEX_250K)),
            Err(Error::AlreadyStarted)
        ));

        channel.reset().unwrap();
        assert_eq!(channel.state(), ChannelState::Stopped);
    }

    #[test]
    fn exit_is_idempotent_and_terminal() {
        let mut channel = null_channel(OperationMode::DEFAULT);
        channel.exit().unwrap();
        assert_eq!(channel.state(), ChannelState::Closed);
        channel.exit().unwrap();

        assert!(matches!(
            channel.start(BitrateDescriptor::Index(bitrate::INDEX_500K)),
            Err(Error::NotInitialized)
        ));
        assert!(matches!(channel.status(), Err(Error::NotInitialized)));
    }

    #[test]
    fn mode_gates_outgoing_frames() {
        let mut channel = null_channel(OperationMode::NXTD | OperationMode::NRTR);
        channel.start(BitrateDescriptor::Index(bitrate::INDEX_500K)).unwrap();

        let extended = CanFrame::from_raw_id(0x1234_5678, &[]).unwrap();
        assert!(matches!(
            channel.write(&extended, Duration::ZERO),
            Err(Error::IllegalParameter)
        ));
        let remote = CanFrame::remote_from_raw_id(0x123, 0).unwrap();
        assert!(matches!(
            channel.write(&remote, Duration::ZERO),
            Err(Error::IllegalParameter)
        ));
        let plain = CanFrame::from_raw_id(0x123, &[1]).unwrap();
        channel.write(&plain, Duration::ZERO).unwrap();
        assert_eq!(channel.counters().tx, 1);
    }

    #[test]
    fn kill_unblocks_a_blocking_read() {
        let mut channel = null_channel(OperationMode::DEFAULT);
        channel.start(BitrateDescriptor::Index(bitrate::INDEX_500K)).unwrap();

        let handle = channel.kill_handle();
        let killer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            handle.kill();
        });
        let result = channel.read(None);
        killer.join().unwrap();
        assert!(matches!(result, Err(Error::Canceled)));

        // and the channel keeps working afterwards
        assert!(matches!(
            channel.read(Some(Duration::ZERO)),
            Err(Error::ReceiverEmpty)
        ));
    }

    #[test]
    fn start_clears_counters() {
        let mut channel = null_channel(OperationMode::DEFAULT);
        channel.start(BitrateDescriptor::Index(bitrate::INDEX_500K)).unwrap();
        let frame = CanFrame::from_raw_id(0x42, &[0; 8]).unwrap();
        channel.write(&frame, Duration::ZERO).unwrap();
        assert_eq!(channel.counters().tx, 1);

        channel.reset().unwrap();
        channel.start(BitrateDescriptor::Index(bitrate::INDEX_500K)).unwrap();
        assert_eq!(channel.counters(), FrameCounters::default());
    }

    #[test]
    fn bitrate_query_reports_the_resolved_timing() {
        let mut channel = null_channel(OperationMode::DEFAULT);
        assert!(matches!(channel.bitrate(), Err(Error::NotStarted)));
        channel.start(BitrateDescriptor::Index(bitrate::INDEX_125K)).unwrap();
        let (timing, speed) = channel.bitrate().unwrap();
        assert_eq!(timing.nominal_bitrate(), 125_000);
        assert!((speed.nominal_speed - 125_000.0).abs() < 1.0);
    }
}
