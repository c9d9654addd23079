//! Command execution, response collection and notification routing

use heapless::{Deque, Vec};

use super::grammar::{Grammar, LineKind, Outcome};
use super::line::{Framed, LINE_CAPACITY, Line, LineReader};
use super::{
    Category, CategorySet, Command, ERROR_MESSAGE_LEN, INBOX_DEPTH, ListenerId, Lines, MAX_COMMAND_LEN,
    MAX_LISTENERS, Notification, QUEUE_DEPTH, Response, Tag,
};
use crate::diag::Diagnostics;
use crate::network::error::EngineError;
use crate::network::{CancelToken, Channel};
use crate::time::{Clock, Deadline};

const COMPONENT: &str = "at";
const READ_CHUNK: usize = 64;
const MAX_CHUNKS_PER_PUMP: usize = 32;
const MAX_WRITE_STALLS: u32 = 100;
const RECORD_LEN: usize = LINE_CAPACITY + 4;

/// Engine timing and capture options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Delay between channel polls while waiting for a reply
    pub poll_interval_ms: u32,
    /// Silence required before the next command after a timeout or cancellation
    pub resync_quiet_ms: u32,
    /// Upper bound on resynchronization, even if the modem keeps talking
    pub resync_max_ms: u32,
    /// Append every command and received line to the `"at"` record stream
    pub capture_transcript: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 10,
            resync_quiet_ms: 250,
            resync_max_ms: 2_000,
            capture_transcript: false,
        }
    }
}

/// Response of a command submitted with [`Engine::submit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub tag: Tag,
    pub response: Response,
}

#[derive(Debug)]
struct InFlight {
    command: Command,
    deadline: Deadline,
    lines: Lines,
    awaiting_prompt: bool,
    prompt_seen: bool,
    blocking: bool,
}

#[derive(Debug)]
struct Listener {
    id: ListenerId,
    categories: CategorySet,
    inbox: Deque<Notification, INBOX_DEPTH>,
    dropped: u32,
}

#[derive(Debug, Clone, Copy)]
struct Resync {
    quiet_until: u64,
    limit: u64,
}

/// Single-flight AT command engine over a byte channel.
///
/// At most one command is on the wire at a time. Every received line is
/// either part of that command's response or an unsolicited notification;
/// notifications are copied to every listener subscribed to their category,
/// in arrival order. After a timeout or cancellation the engine waits for the
/// line to go quiet before issuing the next command, so a late reply is never
/// attributed to the wrong command.
#[derive(Debug)]
pub struct Engine<CH, CL> {
    channel: CH,
    clock: CL,
    grammar: Grammar,
    config: EngineConfig,
    diag: Diagnostics,
    reader: LineReader,
    in_flight: Option<InFlight>,
    finished: Option<Completion>,
    queue: Deque<Command, QUEUE_DEPTH>,
    completed: Vec<Completion, QUEUE_DEPTH>,
    listeners: Vec<Listener, MAX_LISTENERS>,
    next_tag: Tag,
    next_listener: u8,
    resync: Option<Resync>,
    lost: bool,
}

impl<CH: Channel, CL: Clock> Engine<CH, CL> {
    pub fn new(channel: CH, clock: CL, grammar: Grammar, config: EngineConfig) -> Self {
        Self {
            channel,
            clock,
            reader: LineReader::new(grammar.payloads),
            grammar,
            config,
            diag: Diagnostics::silent(),
            in_flight: None,
            finished: None,
            queue: Deque::new(),
            completed: Vec::new(),
            listeners: Vec::new(),
            next_tag: 1,
            next_listener: 0,
            resync: None,
            lost: false,
        }
    }

    pub fn with_diagnostics(mut self, diag: Diagnostics) -> Self {
        self.diag = diag;
        self
    }

    pub fn diagnostics(&self) -> Diagnostics {
        self.diag
    }

    pub fn grammar(&self) -> &Grammar {
        &self.grammar
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    pub fn delay_ms(&mut self, ms: u32) {
        self.clock.delay_ms(ms)
    }

    /// Whether the channel has failed. A lost engine rejects every command
    /// until [`Engine::reset`].
    pub fn is_lost(&self) -> bool {
        self.lost
    }

    /// No command in flight or queued.
    pub fn is_idle(&self) -> bool {
        self.in_flight.is_none() && self.queue.is_empty()
    }

    /// Forget all command state, e.g. after the modem was power-cycled.
    /// Listeners stay registered; their inboxes are kept.
    pub fn reset(&mut self) {
        self.lost = false;
        self.reader.clear();
        self.in_flight = None;
        self.finished = None;
        self.queue.clear();
        self.completed.clear();
        self.resync = None;
        log_info!(self.diag, COMPONENT, "engine reset");
    }

    pub fn into_parts(self) -> (CH, CL) {
        (self.channel, self.clock)
    }

    /// Run `command` to completion. Previously submitted commands are
    /// finished first, in submission order.
    pub fn execute(&mut self, command: Command) -> Result<Response, EngineError> {
        self.run(command, None, None)
    }

    /// [`Engine::execute`] that gives up with [`EngineError::Cancelled`]
    /// once `cancel` is set.
    pub fn execute_cancellable(
        &mut self,
        command: Command,
        cancel: Option<&CancelToken>,
    ) -> Result<Response, EngineError> {
        self.run(command, None, cancel)
    }

    /// Run a command that answers with a data prompt, then stream `data`
    /// before waiting for the final result.
    pub fn execute_with_data(
        &mut self,
        command: Command,
        data: &[u8],
        cancel: Option<&CancelToken>,
    ) -> Result<Response, EngineError> {
        self.run(command, Some(data), cancel)
    }

    /// Run `command` and turn anything but `OK` into an error.
    pub fn execute_ok(&mut self, command: Command) -> Result<Lines, EngineError> {
        match self.execute(command)? {
            Response::Ok(lines) => Ok(lines),
            Response::Error(code, _) => Err(EngineError::Rejected(code)),
            Response::Timeout => Err(EngineError::Timeout),
        }
    }

    /// Run `command` up to `attempts` times, pausing `delay_ms` between tries,
    /// until it answers `OK`. The last response is returned either way.
    pub fn execute_with_retry(
        &mut self,
        command: Command,
        attempts: u8,
        delay_ms: u32,
    ) -> Result<Response, EngineError> {
        let attempts = attempts.max(1);
        let mut attempt = 1;
        loop {
            let response = self.execute(command.clone())?;
            if response.is_ok() || attempt >= attempts {
                return Ok(response);
            }
            log_debug!(
                self.diag,
                COMPONENT,
                "{} failed (attempt {}/{}), retrying in {} ms",
                command.text(),
                attempt,
                attempts,
                delay_ms
            );
            attempt += 1;
            self.clock.delay_ms(delay_ms);
        }
    }

    /// Queue `command` without waiting. Drive it with [`Engine::poll`].
    pub fn submit(&mut self, mut command: Command) -> Result<Tag, EngineError> {
        self.ensure_alive()?;
        let occupied = self.queue.len()
            + self.completed.len()
            + usize::from(self.in_flight.is_some())
            + usize::from(self.finished.is_some());
        if occupied >= QUEUE_DEPTH {
            return Err(EngineError::Busy);
        }
        command.tag = self.allocate_tag();
        let tag = command.tag;
        self.queue.push_back(command).map_err(|_| EngineError::Busy)?;
        Ok(tag)
    }

    /// Make progress on submitted commands without blocking. Returns a
    /// completion when one is ready.
    pub fn poll(&mut self) -> Result<Option<Completion>, EngineError> {
        if !self.completed.is_empty() {
            return Ok(Some(self.completed.remove(0)));
        }
        self.ensure_alive()?;
        self.pump()?;
        if let Some(done) = self.finished.take() {
            return Ok(Some(done));
        }
        if let Some(flight) = self.in_flight.as_ref() {
            if !flight.deadline.expired(&self.clock) {
                return Ok(None);
            }
            let tag = flight.command.tag;
            self.abandon("timed out");
            return Ok(Some(Completion {
                tag,
                response: Response::Timeout,
            }));
        }
        if self.queue.is_empty() || !self.resync_settled() {
            return Ok(None);
        }
        if let Some(next) = self.queue.pop_front() {
            self.start(next, false, false)?;
        }
        Ok(None)
    }

    /// Claim the completion of a submitted command that finished while a
    /// blocking call was draining the queue.
    pub fn take_completion(&mut self, tag: Tag) -> Option<Response> {
        let index = self.completed.iter().position(|done| done.tag == tag)?;
        Some(self.completed.remove(index).response)
    }

    /// Read whatever the modem has sent and route notifications. Returns the
    /// number of bytes consumed.
    pub fn service(&mut self) -> Result<usize, EngineError> {
        self.ensure_alive()?;
        self.pump()
    }

    /// Subscribe to notifications in `categories`.
    pub fn register_listener(&mut self, categories: CategorySet) -> Result<ListenerId, EngineError> {
        let id = ListenerId(self.next_listener);
        self.listeners
            .push(Listener {
                id,
                categories,
                inbox: Deque::new(),
                dropped: 0,
            })
            .map_err(|_| EngineError::ListenersExhausted)?;
        self.next_listener = self.next_listener.wrapping_add(1);
        Ok(id)
    }

    pub fn unregister_listener(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|listener| listener.id != id);
        self.listeners.len() != before
    }

    /// Oldest undelivered notification for `id`.
    pub fn next_notification(&mut self, id: ListenerId) -> Option<Notification> {
        self.listeners
            .iter_mut()
            .find(|listener| listener.id == id)?
            .inbox
            .pop_front()
    }

    /// Notifications dropped from `id`'s inbox because it was full.
    pub fn dropped_notifications(&self, id: ListenerId) -> u32 {
        self.listeners
            .iter()
            .find(|listener| listener.id == id)
            .map_or(0, |listener| listener.dropped)
    }

    fn ensure_alive(&self) -> Result<(), EngineError> {
        if self.lost {
            return Err(EngineError::ChannelLost);
        }
        Ok(())
    }

    fn allocate_tag(&mut self) -> Tag {
        let tag = self.next_tag;
        self.next_tag = self.next_tag.wrapping_add(1).max(1);
        tag
    }

    fn run(
        &mut self,
        mut command: Command,
        payload: Option<&[u8]>,
        cancel: Option<&CancelToken>,
    ) -> Result<Response, EngineError> {
        self.ensure_alive()?;
        self.drain()?;
        self.settle()?;
        if cancel.is_some_and(CancelToken::is_cancelled) {
            return Err(EngineError::Cancelled);
        }
        command.tag = self.allocate_tag();
        self.start(command, payload.is_some(), true)?;
        self.wait(payload, cancel)
    }

    /// Finish submitted commands ahead of a blocking call.
    fn drain(&mut self) -> Result<(), EngineError> {
        loop {
            if self.in_flight.is_none() {
                if let Some(done) = self.finished.take() {
                    self.store(done);
                }
                if self.queue.is_empty() {
                    return Ok(());
                }
                self.settle()?;
                let Some(next) = self.queue.pop_front() else {
                    return Ok(());
                };
                self.start(next, false, false)?;
            }
            let Some(tag) = self.in_flight.as_ref().map(|flight| flight.command.tag) else {
                continue;
            };
            let response = self.wait(None, None)?;
            self.store(Completion { tag, response });
        }
    }

    fn store(&mut self, done: Completion) {
        let tag = done.tag;
        if self.completed.push(done).is_err() {
            log_warn!(self.diag, COMPONENT, "[#{}] completion dropped, nobody claimed earlier ones", tag);
        }
    }

    fn start(&mut self, command: Command, expects_prompt: bool, blocking: bool) -> Result<(), EngineError> {
        log_debug!(self.diag, COMPONENT, "[#{}] >> {}", command.tag, command.text());
        self.capture(b">> ", command.text().as_bytes());

        let mut wire: Vec<u8, { MAX_COMMAND_LEN + 1 }> = Vec::new();
        // Command text is bounded by MAX_COMMAND_LEN, so both always fit.
        let _ = wire.extend_from_slice(command.text().as_bytes());
        let _ = wire.push(b'\r');

        self.finished = None;
        self.write_all(&wire)?;

        self.in_flight = Some(InFlight {
            deadline: Deadline::after(&self.clock, command.timeout_ms),
            command,
            lines: Lines::new(),
            awaiting_prompt: expects_prompt,
            prompt_seen: false,
            blocking,
        });
        Ok(())
    }

    /// Block until the in-flight command completes, writing `payload` once
    /// its prompt arrives.
    fn wait(&mut self, mut payload: Option<&[u8]>, cancel: Option<&CancelToken>) -> Result<Response, EngineError> {
        loop {
            let read = self.pump()?;
            if let Some(done) = self.finished.take() {
                return Ok(done.response);
            }
            let Some((tag, prompt_seen, expired)) = self.in_flight.as_ref().map(|flight| {
                (
                    flight.command.tag,
                    flight.prompt_seen,
                    flight.deadline.expired(&self.clock),
                )
            }) else {
                return Ok(Response::Timeout);
            };

            if prompt_seen {
                if let Some(data) = payload.take() {
                    log_debug!(self.diag, COMPONENT, "[#{}] >> {} payload bytes", tag, data.len());
                    self.write_all(data)?;
                    continue;
                }
            }
            if cancel.is_some_and(CancelToken::is_cancelled) {
                self.abandon("cancelled");
                return Err(EngineError::Cancelled);
            }
            if expired {
                self.abandon("timed out");
                return Ok(Response::Timeout);
            }
            if read == 0 {
                self.clock.delay_ms(self.config.poll_interval_ms);
            }
        }
    }

    /// Drop the in-flight command and start resynchronizing.
    fn abandon(&mut self, reason: &str) {
        let Some(flight) = self.in_flight.take() else {
            return;
        };
        let now = self.clock.now_ms();
        self.resync = Some(Resync {
            quiet_until: now + self.config.resync_quiet_ms as u64,
            limit: now + self.config.resync_max_ms as u64,
        });
        log_warn!(
            self.diag,
            COMPONENT,
            "[#{}] {} {}, resynchronizing",
            flight.command.tag,
            flight.command.text(),
            reason
        );
    }

    /// Whether resynchronization is over; clears it once it is.
    fn resync_settled(&mut self) -> bool {
        let Some(resync) = self.resync else {
            return true;
        };
        let now = self.clock.now_ms();
        if now < resync.quiet_until && now < resync.limit {
            return false;
        }
        self.resync = None;
        if self.reader.is_mid_line() {
            log_debug!(self.diag, COMPONENT, "discarding partial line after resynchronization");
            self.reader.clear();
        }
        log_debug!(self.diag, COMPONENT, "resynchronized");
        true
    }

    /// Block until resynchronization is over.
    fn settle(&mut self) -> Result<(), EngineError> {
        while !self.resync_settled() {
            self.pump()?;
            self.clock.delay_ms(self.config.poll_interval_ms);
        }
        Ok(())
    }

    fn pump(&mut self) -> Result<usize, EngineError> {
        let mut chunk = [0u8; READ_CHUNK];
        let mut total = 0;
        for _ in 0..MAX_CHUNKS_PER_PUMP {
            let read = match self.channel.read(&mut chunk) {
                Ok(read) => read.min(chunk.len()),
                Err(error) => {
                    log_error!(self.diag, COMPONENT, "channel read failed: {:?}", error);
                    self.lose();
                    return Err(EngineError::ChannelLost);
                }
            };
            if read == 0 {
                break;
            }
            total += read;
            log_trace!(self.diag, COMPONENT, "<< {} bytes", read);
            for &byte in &chunk[..read] {
                let prompt = match &self.in_flight {
                    Some(flight) if flight.awaiting_prompt => Some(self.grammar.prompt),
                    _ => None,
                };
                if let Some(event) = self.reader.push(byte, prompt) {
                    self.handle(event);
                }
            }
        }
        if total > 0 {
            let now = self.clock.now_ms();
            let quiet = self.config.resync_quiet_ms as u64;
            if let Some(resync) = self.resync.as_mut() {
                resync.quiet_until = (now + quiet).min(resync.limit);
            }
        }
        Ok(total)
    }

    fn handle(&mut self, event: Framed) {
        match event {
            Framed::Prompt => {
                if let Some(flight) = self.in_flight.as_mut() {
                    flight.awaiting_prompt = false;
                    flight.prompt_seen = true;
                    log_trace!(self.diag, COMPONENT, "[#{}] prompt", flight.command.tag);
                }
            }
            Framed::Line {
                line,
                overflowed,
                binary,
            } => self.handle_line(line, overflowed, binary),
        }
    }

    fn handle_line(&mut self, line: Line, overflowed: bool, binary: bool) {
        self.capture(b"<< ", &line);
        if overflowed {
            log_warn!(self.diag, COMPONENT, "dropped line longer than {} bytes", LINE_CAPACITY);
            return;
        }

        let outstanding = self.in_flight.as_ref().map(|flight| flight.command.text());
        let kind = self.grammar.classify(&line, binary, outstanding);
        match kind {
            LineKind::Garbled => {
                log_warn!(self.diag, COMPONENT, "dropped garbled line ({} bytes)", line.len());
            }
            LineKind::Echo => {}
            LineKind::Final(outcome) => match self.in_flight.take() {
                Some(flight) => self.complete(flight, outcome, &line),
                None => log_debug!(self.diag, COMPONENT, "discarded stray result {}", printable(&line)),
            },
            LineKind::Intermediate => {
                let Some(flight) = self.in_flight.as_mut() else {
                    return;
                };
                if flight.lines.push(line).is_err() {
                    log_warn!(
                        self.diag,
                        COMPONENT,
                        "[#{}] response has more than {} lines, dropping the rest",
                        flight.command.tag,
                        flight.lines.len()
                    );
                }
            }
            LineKind::Notification(Category::Unclassified) if self.resync.is_some() => {
                log_debug!(self.diag, COMPONENT, "discarded late line {}", printable(&line));
            }
            LineKind::Notification(category) => self.dispatch(category, &line),
        }
    }

    fn complete(&mut self, flight: InFlight, outcome: Outcome, line: &[u8]) {
        let tag = flight.command.tag;
        let response = match outcome {
            Outcome::Ok => {
                log_debug!(self.diag, COMPONENT, "[#{}] OK ({} lines)", tag, flight.lines.len());
                Response::Ok(flight.lines)
            }
            Outcome::Error(code) => {
                let text = core::str::from_utf8(line).unwrap_or("");
                let message = match self.grammar.describe(code) {
                    Some(known) => known,
                    None => self.grammar.error_text(text),
                };
                log_debug!(self.diag, COMPONENT, "[#{}] {} -> {}", tag, flight.command.text(), text);
                Response::Error(code, truncated(message))
            }
        };
        self.finished = Some(Completion { tag, response });
    }

    fn dispatch(&mut self, category: Category, line: &[u8]) {
        let Ok(text) = core::str::from_utf8(line) else {
            log_debug!(self.diag, COMPONENT, "dropped unsolicited binary line ({} bytes)", line.len());
            return;
        };
        let notification = Notification::new(category, text.trim());
        let mut delivered = false;
        for listener in self.listeners.iter_mut() {
            if !listener.categories.contains(category) {
                continue;
            }
            if listener.inbox.is_full() {
                listener.inbox.pop_front();
                listener.dropped += 1;
                log_warn!(self.diag, COMPONENT, "listener {:?} inbox full, dropped oldest", listener.id);
            }
            let _ = listener.inbox.push_back(notification.clone());
            delivered = true;
        }
        if !delivered {
            log_debug!(self.diag, COMPONENT, "no listener for {:?}: {}", category, notification.line());
        }
    }

    fn write_all(&mut self, mut bytes: &[u8]) -> Result<(), EngineError> {
        let mut stalls = 0;
        while !bytes.is_empty() {
            match self.channel.write(bytes) {
                Ok(0) => {
                    stalls += 1;
                    if stalls > MAX_WRITE_STALLS {
                        log_error!(self.diag, COMPONENT, "channel stopped accepting bytes");
                        self.lose();
                        return Err(EngineError::ChannelLost);
                    }
                    self.clock.delay_ms(self.config.poll_interval_ms);
                }
                Ok(written) => {
                    bytes = &bytes[written.min(bytes.len())..];
                    stalls = 0;
                }
                Err(error) => {
                    log_error!(self.diag, COMPONENT, "channel write failed: {:?}", error);
                    self.lose();
                    return Err(EngineError::ChannelLost);
                }
            }
        }
        if let Err(error) = self.channel.flush() {
            log_error!(self.diag, COMPONENT, "channel flush failed: {:?}", error);
            self.lose();
            return Err(EngineError::ChannelLost);
        }
        Ok(())
    }

    /// Mark the channel dead and time out everything outstanding.
    fn lose(&mut self) {
        if self.lost {
            return;
        }
        self.lost = true;
        self.reader.clear();
        self.resync = None;
        let mut abandoned = 0;
        if let Some(flight) = self.in_flight.take() {
            abandoned += 1;
            if !flight.blocking {
                self.store(Completion {
                    tag: flight.command.tag,
                    response: Response::Timeout,
                });
            }
        }
        while let Some(command) = self.queue.pop_front() {
            abandoned += 1;
            self.store(Completion {
                tag: command.tag,
                response: Response::Timeout,
            });
        }
        log_error!(
            self.diag,
            COMPONENT,
            "command channel lost, {} outstanding command(s) timed out",
            abandoned
        );
    }

    fn capture(&self, direction: &[u8], bytes: &[u8]) {
        if !self.config.capture_transcript || !self.diag.records_enabled() {
            return;
        }
        let mut record: Vec<u8, RECORD_LEN> = Vec::new();
        let room = RECORD_LEN - direction.len() - 1;
        let _ = record.extend_from_slice(direction);
        let _ = record.extend_from_slice(&bytes[..bytes.len().min(room)]);
        let _ = record.push(b'\n');
        self.diag.record(COMPONENT, &record);
    }
}

fn printable(line: &[u8]) -> &str {
    core::str::from_utf8(line).unwrap_or("<binary>")
}

fn truncated(text: &str) -> heapless::String<ERROR_MESSAGE_LEN> {
    let mut out = heapless::String::new();
    for c in text.chars() {
        if out.push(c).is_err() {
            break;
        }
    }
    out
}
