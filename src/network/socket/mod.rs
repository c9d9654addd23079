//! Logical sockets over the AT command engine
//!
//! The modem owns the real TCP/UDP sockets and identifies them by small
//! integers. [`SocketStack`] mirrors each modem socket with a logical socket,
//! buffers received bytes locally and hands out generation-checked
//! [`SocketHandle`]s, so a handle to a closed socket can never reach a later
//! socket that happens to get the same modem identifier.
//!
//! The modem-specific command vocabulary comes from a [`SocketDialect`].

use heapless::{Deque, String};

use crate::diag::Diagnostics;
use crate::network::at::{Category, CategorySet, Command, Engine, ListenerId, Notification, Response};
use crate::network::error::{EngineError, OpenFailure, SocketError};
use crate::network::{CancelToken, Channel};
use crate::time::Clock;

const COMPONENT: &str = "socket";

/// Logical socket slots; also the largest modem identifier accepted plus one
pub const MAX_SOCKETS: usize = 7;
/// Receive buffer per socket
pub const RX_CAPACITY: usize = 1024;
/// Longest remote host name
pub const HOST_LEN: usize = 64;

/// Transport protocol of a socket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
}

/// Lifecycle state of a logical socket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub enum SocketState {
    #[default]
    Closed,
    Opening,
    Open,
    /// Close requested and not yet confirmed, or closed by the remote end
    /// with received data still buffered
    Closing,
    /// The command channel failed underneath the socket
    Error,
}

/// Reference to an open logical socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SocketHandle {
    id: u8,
    generation: u16,
}

impl SocketHandle {
    /// Modem-assigned identifier.
    pub fn id(&self) -> u8 {
        self.id
    }
}

/// Remote host and port of a socket
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String<HOST_LEN>,
    pub port: u16,
}

impl Endpoint {
    /// `None` when the host is empty, too long, or contains a quote.
    pub fn new(host: &str, port: u16) -> Option<Self> {
        if host.is_empty() || host.contains('"') || port == 0 {
            return None;
        }
        let mut name = String::new();
        name.push_str(host).ok()?;
        Some(Self { host: name, port })
    }
}

/// Socket event decoded from a notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketEvent {
    /// `len` bytes are waiting on the modem for socket `id`
    DataAvailable { id: u8, len: usize },
    /// The modem closed socket `id`
    Closed { id: u8 },
}

/// Modem-specific socket commands.
pub trait SocketDialect {
    /// Command that creates a socket.
    fn create(&self, protocol: Protocol) -> Result<Command, EngineError>;
    /// Modem identifier assigned by a successful create.
    fn parse_created(&self, response: &Response) -> Option<u8>;
    /// Command that connects socket `id`.
    fn connect(&self, id: u8, host: &str, port: u16) -> Result<Command, EngineError>;
    /// Data-prompt command that writes `len` bytes to socket `id`.
    fn write(&self, id: u8, len: usize) -> Result<Command, EngineError>;
    /// Bytes the modem reports as written.
    fn parse_written(&self, response: &Response) -> Option<usize>;
    /// Largest payload of one write command.
    fn max_write(&self) -> usize;
    /// Command that reads up to `len` buffered bytes from socket `id`.
    fn read(&self, id: u8, protocol: Protocol, len: usize) -> Result<Command, EngineError>;
    /// Payload carried by a read response.
    fn parse_read<'r>(&self, response: &'r Response, protocol: Protocol) -> Option<&'r [u8]>;
    /// Largest payload of one read command.
    fn max_read(&self) -> usize;
    /// Command that closes socket `id`. An asynchronous close completes with a
    /// close notification.
    fn close(&self, id: u8, asynchronous: bool) -> Result<Command, EngineError>;
    /// Decode a socket notification.
    fn parse_event(&self, notification: &Notification) -> Option<SocketEvent>;
}

/// Socket operations used by application protocols.
pub trait Sockets {
    /// Open a connection to `host:port`.
    fn open(&mut self, host: &str, port: u16, protocol: Protocol) -> Result<SocketHandle, SocketError> {
        self.open_cancellable(host, port, protocol, None)
    }

    /// [`Sockets::open`] that stops with `Cancelled` once `cancel` is set.
    fn open_cancellable(
        &mut self,
        host: &str,
        port: u16,
        protocol: Protocol,
        cancel: Option<&CancelToken>,
    ) -> Result<SocketHandle, SocketError>;

    /// Send `bytes`, returning how many were accepted.
    fn send(&mut self, handle: SocketHandle, bytes: &[u8]) -> Result<usize, SocketError>;

    /// Copy received bytes into `buf` without blocking. `Ok(0)` means nothing
    /// is buffered yet.
    fn receive(&mut self, handle: SocketHandle, buf: &mut [u8]) -> Result<usize, SocketError>;

    /// Release the socket. Closing an already closed socket is not an error.
    fn close(&mut self, handle: SocketHandle) -> Result<(), SocketError>;

    fn state(&self, handle: SocketHandle) -> SocketState;

    fn now_ms(&self) -> u64;

    fn delay_ms(&mut self, ms: u32);

    fn diagnostics(&self) -> Diagnostics {
        Diagnostics::silent()
    }
}

impl<T: Sockets + ?Sized> Sockets for &mut T {
    fn open_cancellable(
        &mut self,
        host: &str,
        port: u16,
        protocol: Protocol,
        cancel: Option<&CancelToken>,
    ) -> Result<SocketHandle, SocketError> {
        (**self).open_cancellable(host, port, protocol, cancel)
    }

    fn send(&mut self, handle: SocketHandle, bytes: &[u8]) -> Result<usize, SocketError> {
        (**self).send(handle, bytes)
    }

    fn receive(&mut self, handle: SocketHandle, buf: &mut [u8]) -> Result<usize, SocketError> {
        (**self).receive(handle, buf)
    }

    fn close(&mut self, handle: SocketHandle) -> Result<(), SocketError> {
        (**self).close(handle)
    }

    fn state(&self, handle: SocketHandle) -> SocketState {
        (**self).state(handle)
    }

    fn now_ms(&self) -> u64 {
        (**self).now_ms()
    }

    fn delay_ms(&mut self, ms: u32) {
        (**self).delay_ms(ms)
    }

    fn diagnostics(&self) -> Diagnostics {
        (**self).diagnostics()
    }
}

/// Socket layer options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocketConfig {
    /// Timeout of the connect command
    pub connect_timeout_ms: u32,
    /// Retries of a write that timed out, failed, or was not accepted
    pub write_retries: u8,
    /// Base delay between write retries; grows with every retry
    pub write_retry_delay_ms: u32,
    /// Close with the asynchronous form and wait for the close notification
    pub async_close: bool,
    /// How long a close may stay unconfirmed before it is forced
    pub close_timeout_ms: u32,
    /// Read commands issued per socket per service pass
    pub max_reads_per_pass: u8,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 30_000,
            write_retries: 20,
            write_retry_delay_ms: 200,
            async_close: true,
            close_timeout_ms: 10_000,
            max_reads_per_pass: 4,
        }
    }
}

#[derive(Debug, Default)]
struct Slot {
    state: SocketState,
    generation: u16,
    protocol: Protocol,
    remote: Option<Endpoint>,
    rx: Deque<u8, RX_CAPACITY>,
    pending: usize,
    closed_by_remote: bool,
    closing_since: u64,
    /// Read failure held back until the buffered bytes are handed out
    deferred: Option<SocketError>,
}

impl Slot {
    fn reopen(&mut self, id: u8, protocol: Protocol, remote: Endpoint) -> SocketHandle {
        self.generation = self.generation.wrapping_add(1);
        self.state = SocketState::Opening;
        self.protocol = protocol;
        self.remote = Some(remote);
        self.rx.clear();
        self.pending = 0;
        self.closed_by_remote = false;
        self.deferred = None;
        SocketHandle {
            id,
            generation: self.generation,
        }
    }

    /// Open, or closed by the remote with data still to pull or hand out.
    fn readable(&self) -> bool {
        self.state == SocketState::Open || (self.state == SocketState::Closing && self.closed_by_remote)
    }

    fn release(&mut self) {
        self.state = SocketState::Closed;
        self.rx.clear();
        self.pending = 0;
        self.deferred = None;
    }
}

/// Logical sockets multiplexed over one [`Engine`].
#[derive(Debug)]
pub struct SocketStack<CH, CL, D> {
    engine: Engine<CH, CL>,
    dialect: D,
    config: SocketConfig,
    slots: [Slot; MAX_SOCKETS],
    listener: ListenerId,
    diag: Diagnostics,
}

impl<CH: Channel, CL: Clock, D: SocketDialect> SocketStack<CH, CL, D> {
    /// Take over `engine` and subscribe to socket notifications.
    pub fn new(mut engine: Engine<CH, CL>, dialect: D, config: SocketConfig) -> Result<Self, EngineError> {
        let listener =
            engine.register_listener(CategorySet::of(&[Category::SocketData, Category::SocketClosed]))?;
        let diag = engine.diagnostics();
        Ok(Self {
            engine,
            dialect,
            config,
            slots: core::array::from_fn(|_| Slot::default()),
            listener,
            diag,
        })
    }

    pub fn engine(&self) -> &Engine<CH, CL> {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut Engine<CH, CL> {
        &mut self.engine
    }

    pub fn dialect(&self) -> &D {
        &self.dialect
    }

    pub fn dialect_mut(&mut self) -> &mut D {
        &mut self.dialect
    }

    pub fn config(&self) -> &SocketConfig {
        &self.config
    }

    pub fn into_parts(self) -> (Engine<CH, CL>, D) {
        (self.engine, self.dialect)
    }

    /// Remote endpoint of a live handle.
    pub fn remote(&self, handle: SocketHandle) -> Option<&Endpoint> {
        self.slots[self.index(handle)?].remote.as_ref()
    }

    /// Bytes buffered locally for `handle`.
    pub fn buffered(&self, handle: SocketHandle) -> usize {
        self.index(handle).map_or(0, |id| self.slots[id].rx.len())
    }

    /// Process notifications, finish overdue closes and pull pending data
    /// into every socket's receive buffer.
    pub fn service(&mut self) -> Result<(), SocketError> {
        self.pump()?;
        self.settle_closing()?;
        for id in 0..MAX_SOCKETS {
            if self.slots[id].readable() && self.slots[id].pending > 0 {
                self.fill(id)?;
            }
        }
        Ok(())
    }

    /// Mark every live socket as failed after the channel is lost.
    pub fn reset(&mut self) {
        for slot in self.slots.iter_mut() {
            slot.release();
            slot.closed_by_remote = false;
        }
    }

    fn index(&self, handle: SocketHandle) -> Option<usize> {
        let id = handle.id as usize;
        let slot = self.slots.get(id)?;
        (slot.generation == handle.generation && slot.remote.is_some()).then_some(id)
    }

    fn pump(&mut self) -> Result<(), SocketError> {
        if let Err(error) = self.engine.service() {
            return Err(self.engine_failure(error));
        }
        self.process_events();
        Ok(())
    }

    fn execute(&mut self, command: Command, cancel: Option<&CancelToken>) -> Result<Response, SocketError> {
        match self.engine.execute_cancellable(command, cancel) {
            Ok(response) => Ok(response),
            Err(error) => Err(self.engine_failure(error)),
        }
    }

    fn engine_failure(&mut self, error: EngineError) -> SocketError {
        if error == EngineError::ChannelLost {
            for slot in self.slots.iter_mut() {
                if slot.state != SocketState::Closed {
                    slot.state = SocketState::Error;
                }
            }
        }
        error.into()
    }

    fn process_events(&mut self) {
        while let Some(notification) = self.engine.next_notification(self.listener) {
            match self.dialect.parse_event(&notification) {
                Some(SocketEvent::DataAvailable { id, len }) => self.on_data(id as usize, len),
                Some(SocketEvent::Closed { id }) => self.on_closed(id as usize),
                None => log_debug!(self.diag, COMPONENT, "ignored {}", notification.line()),
            }
        }
    }

    fn on_data(&mut self, id: usize, len: usize) {
        let Some(slot) = self.slots.get_mut(id) else {
            log_warn!(self.diag, COMPONENT, "data notification for unknown socket {}", id);
            return;
        };
        if slot.state == SocketState::Open {
            slot.pending = len;
            log_trace!(self.diag, COMPONENT, "socket {} has {} bytes waiting", id, len);
        } else {
            log_debug!(self.diag, COMPONENT, "socket {} is {:?}, ignoring {} waiting bytes", id, slot.state, len);
        }
    }

    fn on_closed(&mut self, id: usize) {
        let Some(slot) = self.slots.get_mut(id) else {
            log_warn!(self.diag, COMPONENT, "close notification for unknown socket {}", id);
            return;
        };
        match slot.state {
            SocketState::Open | SocketState::Opening => {
                slot.closed_by_remote = true;
                if slot.state == SocketState::Opening {
                    slot.pending = 0;
                }
                slot.state = if slot.rx.is_empty() && slot.pending == 0 {
                    SocketState::Closed
                } else {
                    SocketState::Closing
                };
                log_info!(
                    self.diag,
                    COMPONENT,
                    "socket {} closed by remote, {} bytes buffered, {} on the modem",
                    id,
                    slot.rx.len(),
                    slot.pending
                );
            }
            SocketState::Closing if !slot.closed_by_remote => {
                slot.release();
                log_debug!(self.diag, COMPONENT, "socket {} closed", id);
            }
            _ => log_debug!(self.diag, COMPONENT, "close notification for idle socket {}", id),
        }
    }

    /// Force closes the modem never confirmed.
    fn settle_closing(&mut self) -> Result<(), SocketError> {
        let now = self.engine.now_ms();
        for id in 0..MAX_SOCKETS {
            let slot = &self.slots[id];
            let overdue = now.saturating_sub(slot.closing_since) >= self.config.close_timeout_ms as u64;
            if slot.state != SocketState::Closing || slot.closed_by_remote || !overdue {
                continue;
            }
            log_warn!(self.diag, COMPONENT, "socket {} close unconfirmed, forcing", id);
            let command = self.dialect.close(id as u8, false)?;
            match self.execute(command, None)? {
                Response::Timeout => self.slots[id].closing_since = now,
                _ => self.slots[id].release(),
            }
        }
        Ok(())
    }

    /// Pull data announced by the modem into the receive buffer of `id`,
    /// never more than the buffer can hold.
    fn fill(&mut self, id: usize) -> Result<(), SocketError> {
        for _ in 0..self.config.max_reads_per_pass {
            let slot = &self.slots[id];
            if !slot.readable() || slot.pending == 0 {
                return Ok(());
            }
            let room = RX_CAPACITY - slot.rx.len();
            if room == 0 {
                log_debug!(
                    self.diag,
                    COMPONENT,
                    "socket {} buffer full, leaving {} bytes on the modem",
                    id,
                    slot.pending
                );
                return Ok(());
            }
            let want = slot.pending.min(room).min(self.dialect.max_read());
            let protocol = slot.protocol;

            let command = self.dialect.read(id as u8, protocol, want)?;
            let response = self.execute(command, None)?;
            let code = match &response {
                Response::Ok(_) => None,
                Response::Error(code, _) => Some(*code),
                Response::Timeout => return Err(SocketError::Timeout),
            };
            if let Some(code) = code {
                self.slots[id].pending = 0;
                return Err(SocketError::Rejected(code));
            }

            let data = self.dialect.parse_read(&response, protocol).unwrap_or(&[]);
            let slot = &mut self.slots[id];
            let taken = data.len().min(RX_CAPACITY - slot.rx.len());
            for &byte in &data[..taken] {
                let _ = slot.rx.push_back(byte);
            }
            slot.pending = if data.is_empty() {
                0
            } else {
                slot.pending.saturating_sub(data.len())
            };
            log_trace!(self.diag, COMPONENT, "socket {} read {} bytes", id, data.len());
            let exhausted = data.is_empty();
            self.process_events();
            if exhausted {
                return Ok(());
            }
        }
        Ok(())
    }

    fn write_once(&mut self, id: usize, part: &[u8]) -> Result<usize, SocketError> {
        let command = self.dialect.write(id as u8, part.len())?;
        let response = match self.engine.execute_with_data(command, part, None) {
            Ok(response) => response,
            Err(error) => return Err(self.engine_failure(error)),
        };
        match response {
            Response::Ok(_) => Ok(self.dialect.parse_written(&response).unwrap_or(0).min(part.len())),
            Response::Error(code, _) => Err(SocketError::Rejected(code)),
            Response::Timeout => Err(SocketError::Timeout),
        }
    }

    /// Release the modem socket after a failed open.
    fn discard(&mut self, id: usize) {
        let released = match self.dialect.close(id as u8, false) {
            Ok(command) => self.execute(command, None).map(|_| ()),
            Err(error) => Err(error.into()),
        };
        if let Err(error) = released {
            log_warn!(self.diag, COMPONENT, "could not release modem socket {}: {:?}", id, error);
        }
    }
}

impl<CH: Channel, CL: Clock, D: SocketDialect> Sockets for SocketStack<CH, CL, D> {
    fn open_cancellable(
        &mut self,
        host: &str,
        port: u16,
        protocol: Protocol,
        cancel: Option<&CancelToken>,
    ) -> Result<SocketHandle, SocketError> {
        let endpoint = Endpoint::new(host, port).ok_or(SocketError::InvalidArgument)?;
        self.pump()?;
        self.settle_closing()?;
        if !self.slots.iter().any(|slot| slot.state == SocketState::Closed) {
            return Err(SocketError::NoSlots);
        }

        // The create runs to completion so a socket the modem assigns late is
        // still known and can be released.
        let create = self.dialect.create(protocol)?;
        let created = self.execute(create, None)?;
        if cancel.is_some_and(CancelToken::is_cancelled) {
            if let Some(id) = self.dialect.parse_created(&created).filter(|_| created.is_ok()) {
                log_info!(self.diag, COMPONENT, "open cancelled, releasing modem socket {}", id);
                self.discard(id as usize);
            }
            return Err(SocketError::Cancelled);
        }
        let id = match &created {
            Response::Ok(_) => match self.dialect.parse_created(&created) {
                Some(id) if (id as usize) < MAX_SOCKETS => id as usize,
                Some(id) => {
                    log_warn!(self.diag, COMPONENT, "modem assigned out-of-range socket {}", id);
                    self.discard(id as usize);
                    return Err(SocketError::OpenFailed(OpenFailure::BadResponse));
                }
                None => return Err(SocketError::OpenFailed(OpenFailure::BadResponse)),
            },
            Response::Error(code, _) => return Err(SocketError::OpenFailed(OpenFailure::Rejected(*code))),
            Response::Timeout => return Err(SocketError::OpenFailed(OpenFailure::Timeout)),
        };

        if self.slots[id].state != SocketState::Closed {
            log_warn!(
                self.diag,
                COMPONENT,
                "modem reused socket {} while it is still {:?}",
                id,
                self.slots[id].state
            );
            self.discard(id);
            return Err(SocketError::OpenFailed(OpenFailure::IdCollision));
        }

        let connect = match self.dialect.connect(id as u8, host, port) {
            Ok(command) => command.with_timeout(self.config.connect_timeout_ms),
            Err(_) => {
                self.discard(id);
                return Err(SocketError::InvalidArgument);
            }
        };
        let handle = self.slots[id].reopen(id as u8, protocol, endpoint);
        log_info!(self.diag, COMPONENT, "socket {} connecting to {}:{}", id, host, port);

        let result = self.execute(connect, cancel);
        self.process_events();
        let failure = match result {
            Ok(Response::Ok(_)) if self.slots[id].state == SocketState::Opening => {
                self.slots[id].state = SocketState::Open;
                log_info!(self.diag, COMPONENT, "socket {} open", id);
                return Ok(handle);
            }
            Ok(Response::Ok(_)) => SocketError::OpenFailed(OpenFailure::Refused),
            Ok(Response::Error(code, _)) => SocketError::OpenFailed(OpenFailure::Rejected(code)),
            Ok(Response::Timeout) => SocketError::OpenFailed(OpenFailure::Timeout),
            Err(error) => error,
        };
        log_warn!(self.diag, COMPONENT, "socket {} failed to open: {:?}", id, failure);
        if self.slots[id].state == SocketState::Opening {
            self.discard(id);
            if self.slots[id].state == SocketState::Opening {
                self.slots[id].release();
            }
        }
        Err(failure)
    }

    fn send(&mut self, handle: SocketHandle, bytes: &[u8]) -> Result<usize, SocketError> {
        self.process_events();
        let id = self.index(handle).ok_or(SocketError::NotConnected)?;
        if self.slots[id].state != SocketState::Open {
            return Err(SocketError::NotConnected);
        }

        let max = self.dialect.max_write().max(1);
        let mut sent = 0;
        let mut retries = 0u8;
        while sent < bytes.len() {
            let end = (sent + max).min(bytes.len());
            let failure = match self.write_once(id, &bytes[sent..end]) {
                Ok(written) if written > 0 => {
                    sent += written;
                    retries = 0;
                    self.process_events();
                    if self.slots[id].state != SocketState::Open {
                        break;
                    }
                    continue;
                }
                Ok(_) => SocketError::Timeout,
                Err(error @ (SocketError::Timeout | SocketError::Rejected(_) | SocketError::Busy)) => error,
                Err(error) => return Err(error),
            };

            retries += 1;
            if retries > self.config.write_retries {
                log_warn!(self.diag, COMPONENT, "socket {} send gave up after {} retries", id, retries - 1);
                return if sent > 0 { Ok(sent) } else { Err(failure) };
            }
            let delay = self.config.write_retry_delay_ms.saturating_mul(retries as u32);
            log_debug!(
                self.diag,
                COMPONENT,
                "socket {} write failed ({:?}), retry {} in {} ms",
                id,
                failure,
                retries,
                delay
            );
            self.engine.delay_ms(delay);
            self.process_events();
            if self.slots[id].state != SocketState::Open {
                break;
            }
        }
        if sent == 0 && !bytes.is_empty() {
            return Err(SocketError::NotConnected);
        }
        Ok(sent)
    }

    fn receive(&mut self, handle: SocketHandle, buf: &mut [u8]) -> Result<usize, SocketError> {
        let id = self.index(handle).ok_or(SocketError::NotConnected)?;
        if self.slots[id].rx.is_empty() {
            if let Some(error) = self.slots[id].deferred.take() {
                return Err(error);
            }
        }
        self.pump()?;
        let mut filled = self.fill(id);
        if let Err(error) = filled {
            let slot = &mut self.slots[id];
            if slot.closed_by_remote && slot.state == SocketState::Closing {
                log_warn!(
                    self.diag,
                    COMPONENT,
                    "socket {} lost {} bytes after remote close: {:?}",
                    id,
                    slot.pending,
                    error
                );
                slot.pending = 0;
                filled = Ok(());
            }
        }

        let slot = &mut self.slots[id];
        let mut copied = 0;
        while copied < buf.len() {
            let Some(byte) = slot.rx.pop_front() else {
                break;
            };
            buf[copied] = byte;
            copied += 1;
        }
        let drained_after_remote_close =
            slot.closed_by_remote && slot.state == SocketState::Closing && slot.rx.is_empty() && slot.pending == 0;
        if drained_after_remote_close {
            slot.state = SocketState::Closed;
        }
        if copied > 0 {
            if let Err(error) = filled {
                log_debug!(self.diag, COMPONENT, "socket {} read failed, reporting after {} bytes: {:?}", id, copied, error);
                self.slots[id].deferred = Some(error);
            }
            return Ok(copied);
        }
        filled?;
        let slot = &self.slots[id];
        match slot.state {
            SocketState::Open | SocketState::Opening => Ok(0),
            SocketState::Closed if slot.closed_by_remote => Err(SocketError::RemoteClosed),
            SocketState::Error => Err(SocketError::ChannelLost),
            _ => Err(SocketError::NotConnected),
        }
    }

    fn close(&mut self, handle: SocketHandle) -> Result<(), SocketError> {
        self.process_events();
        let Some(id) = self.index(handle) else {
            return Ok(());
        };
        let now = self.engine.now_ms();
        let slot = &mut self.slots[id];
        match slot.state {
            SocketState::Closed => return Ok(()),
            SocketState::Error => {
                slot.release();
                return Ok(());
            }
            SocketState::Closing if slot.closed_by_remote => {
                slot.release();
                return Ok(());
            }
            SocketState::Closing => return Ok(()),
            SocketState::Open | SocketState::Opening => {}
        }
        slot.release();
        slot.state = SocketState::Closing;
        slot.closing_since = now;

        let asynchronous = self.config.async_close;
        let command = self.dialect.close(id as u8, asynchronous)?;
        match self.execute(command, None)? {
            Response::Ok(_) if asynchronous => {
                log_debug!(self.diag, COMPONENT, "socket {} closing", id);
            }
            Response::Ok(_) => {
                self.slots[id].release();
                log_info!(self.diag, COMPONENT, "socket {} closed", id);
            }
            Response::Error(code, _) => {
                log_warn!(
                    self.diag,
                    COMPONENT,
                    "modem rejected close of socket {} ({:?}), treating it as closed",
                    id,
                    code
                );
                self.slots[id].release();
            }
            Response::Timeout => {
                log_warn!(self.diag, COMPONENT, "close of socket {} timed out", id);
                return Err(SocketError::Timeout);
            }
        }
        self.process_events();
        Ok(())
    }

    fn state(&self, handle: SocketHandle) -> SocketState {
        self.index(handle).map_or(SocketState::Closed, |id| self.slots[id].state)
    }

    fn now_ms(&self) -> u64 {
        self.engine.now_ms()
    }

    fn delay_ms(&mut self, ms: u32) {
        self.engine.delay_ms(ms)
    }

    fn diagnostics(&self) -> Diagnostics {
        self.diag
    }
}
