// serialcan/tests/common/mod.rs
//
// An in-process SLCAN adapter simulation for the integration tests.
//
// This file is part of the Rust 'serialcan-rs' library.
//
// Licensed under the MIT license:
//   <LICENSE or http://opensource.org/licenses/MIT>
// This file may not be copied, modified, or distributed except according
// to those terms.

//! A mock adapter implementing the SLCAN grammar behind the `Transport`
//! trait: commands are parsed byte-wise off the write path, replies and
//! looped-back frames appear on the read path. Lawicel mode answers every
//! command with ACK/NACK and confirms transmissions with `z`/`Z`;
//! CANable mode stays silent on commands and just echoes frames.

use serialcan::Transport;
use std::{
    collections::VecDeque,
    io,
    sync::{Arc, Condvar, Mutex},
    time::{Duration, Instant},
};

const CR: u8 = b'\r';
const BELL: u8 = 0x07;

/// Which command set the simulated firmware speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockDialect {
    Lawicel,
    Canable,
}

#[derive(Debug)]
struct AdapterState {
    dialect: MockDialect,
    /// Bytes produced by the adapter, pending driver reads.
    output: VecDeque<u8>,
    /// Partial command line being written by the driver.
    input: Vec<u8>,
    /// Every complete command line received, for assertions.
    commands: Vec<Vec<u8>>,
    bitrate_set: bool,
    open: bool,
    /// The flag byte reported on the `F` command.
    status_byte: u8,
    read_timeout: Duration,
    /// Simulate a dead serial line: reads fail.
    broken: bool,
}

/// Handle to the simulated adapter; clones share the same state.
#[derive(Clone)]
pub struct MockAdapter {
    state: Arc<(Mutex<AdapterState>, Condvar)>,
}

impl MockAdapter {
    pub fn new(dialect: MockDialect) -> Self {
        Self {
            state: Arc::new((
                Mutex::new(AdapterState {
                    dialect,
                    output: VecDeque::new(),
                    input: Vec::new(),
                    commands: Vec::new(),
                    bitrate_set: false,
                    open: false,
                    status_byte: 0x00,
                    read_timeout: Duration::from_millis(50),
                    broken: false,
                }),
                Condvar::new(),
            )),
        }
    }

    /// All complete command lines the adapter has received.
    pub fn commands(&self) -> Vec<Vec<u8>> {
        self.state.0.lock().unwrap().commands.clone()
    }

    /// Total bytes written by the driver, including partial lines.
    pub fn bytes_received(&self) -> usize {
        let state = self.state.0.lock().unwrap();
        state.commands.iter().map(|c| c.len() + 1).sum::<usize>() + state.input.len()
    }

    /// Sets the flag byte reported on the next `F` query.
    pub fn set_status_byte(&self, byte: u8) {
        self.state.0.lock().unwrap().status_byte = byte;
    }

    /// Pushes raw bytes onto the driver's read path, as if the adapter
    /// had sent them spontaneously.
    pub fn inject(&self, bytes: &[u8]) {
        let (lock, cond) = &*self.state;
        let mut state = lock.lock().unwrap();
        state.output.extend(bytes.iter().copied());
        drop(state);
        cond.notify_all();
    }

    /// Breaks the simulated serial line: further reads fail.
    pub fn break_line(&self) {
        let (lock, cond) = &*self.state;
        lock.lock().unwrap().broken = true;
        cond.notify_all();
    }

    fn process_command(state: &mut AdapterState, line: Vec<u8>) {
        state.commands.push(line.clone());
        let lawicel = state.dialect == MockDialect::Lawicel;
        let mut reply: Vec<u8> = Vec::new();
        match line.first() {
            Some(b'S') | Some(b's') | Some(b'Y') => {
                if state.open {
                    reply.push(BELL);
                } else {
                    state.bitrate_set = true;
                    reply.push(CR);
                }
            }
            Some(b'O') | Some(b'L') => {
                if state.open || !state.bitrate_set {
                    reply.push(BELL);
                } else {
                    state.open = true;
                    reply.push(CR);
                }
            }
            Some(b'C') => {
                if state.open {
                    state.open = false;
                    reply.push(CR);
                } else {
                    reply.push(BELL);
                }
            }
            Some(b'F') => {
                if lawicel {
                    reply.extend_from_slice(format!("F{:02X}\r", state.status_byte).as_bytes());
                }
            }
            Some(b'V') => {
                if lawicel {
                    reply.extend_from_slice(b"V1014\r");
                }
            }
            Some(b'N') => {
                if lawicel {
                    reply.extend_from_slice(b"NA123\r");
                }
            }
            Some(b'M') | Some(b'm') => {
                if lawicel {
                    reply.push(if state.open { BELL } else { CR });
                }
            }
            Some(b't' | b'T' | b'r' | b'R' | b'd' | b'D' | b'b' | b'B') => {
                if state.open {
                    if lawicel {
                        let confirm = if line[0].is_ascii_uppercase() { b'Z' } else { b'z' };
                        reply.push(confirm);
                        reply.push(CR);
                    }
                    // loop the frame back onto the bus
                    reply.extend_from_slice(&line);
                    reply.push(CR);
                } else if lawicel {
                    reply.push(BELL);
                }
            }
            _ => {
                if lawicel {
                    reply.push(BELL);
                }
            }
        }
        state.output.extend(reply);
    }
}

impl Transport for MockAdapter {
    fn write_bytes(&mut self, bytes: &[u8]) -> io::Result<()> {
        let (lock, cond) = &*self.state;
        let mut state = lock.lock().unwrap();
        if state.broken {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "line broken"));
        }
        for &byte in bytes {
            if byte == CR {
                let line = std::mem::take(&mut state.input);
                Self::process_command(&mut state, line);
            } else {
                state.input.push(byte);
            }
        }
        drop(state);
        cond.notify_all();
        Ok(())
    }

    fn read_bytes(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let (lock, cond) = &*self.state;
        let mut state = lock.lock().unwrap();
        let deadline = Instant::now() + state.read_timeout;
        while state.output.is_empty() {
            if state.broken {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "line broken"));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(0);
            }
            let (guard, _) = cond.wait_timeout(state, deadline - now).unwrap();
            state = guard;
        }
        let mut n = 0;
        while n < buf.len() {
            match state.output.pop_front() {
                Some(byte) => {
                    buf[n] = byte;
                    n += 1;
                }
                None => break,
            }
        }
        Ok(n)
    }

    fn set_read_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.state.0.lock().unwrap().read_timeout = timeout;
        Ok(())
    }

    fn try_clone_reader(&self) -> io::Result<Box<dyn Transport>> {
        Ok(Box::new(self.clone()))
    }
}
