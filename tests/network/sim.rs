//! Scripted SARA-R modem and virtual clock for integration tests.
//!
//! The engine writes commands into [`SimChannel`]; each complete command is
//! matched against the registered rules (latest rule first) and the rule's
//! actions decide what the modem sends back and when. Time only moves when
//! the library calls `delay_ms` on [`SimClock`].

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;
use std::sync::Mutex;

use libcellular::diag::{RecordError, RecordSink};
use libcellular::modem::sara_r::SaraR;
use libcellular::network::at::{Engine, EngineConfig};
use libcellular::network::{CancelToken, Read, Write};
use libcellular::time::Clock;

pub type Shared = Rc<RefCell<Sim>>;

/// What the modem does in answer to a command
pub enum Action {
    /// Send bytes right away
    Reply(Vec<u8>),
    /// Send bytes after the given number of milliseconds
    After(u64, Vec<u8>),
    /// Send the data prompt, swallow `len` raw bytes, then send `then`
    Prompt { len: usize, then: Vec<u8> },
}

type Handler = Box<dyn FnMut(&str) -> Vec<Action>>;

struct Rule {
    prefix: String,
    handler: Handler,
}

struct Scheduled {
    at: u64,
    seq: u64,
    bytes: Vec<u8>,
}

struct DataPhase {
    remaining: usize,
    collected: Vec<u8>,
    then: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Broken;

pub struct Sim {
    pub now: u64,
    /// Commands received, without the trailing CR
    pub commands: Vec<String>,
    /// Raw payloads received after a data prompt
    pub payloads: Vec<Vec<u8>>,
    /// Largest read handed to the engine at once
    pub max_read: usize,
    pub fail_reads: bool,
    rules: Vec<Rule>,
    visible: VecDeque<u8>,
    scheduled: Vec<Scheduled>,
    seq: u64,
    line: Vec<u8>,
    data: Option<DataPhase>,
    cancel: Option<(u64, Rc<CancelToken>)>,
}

impl Sim {
    /// A modem that answers `OK` to every command.
    pub fn new() -> Self {
        let mut sim = Self {
            now: 0,
            commands: Vec::new(),
            payloads: Vec::new(),
            max_read: usize::MAX,
            fail_reads: false,
            rules: Vec::new(),
            visible: VecDeque::new(),
            scheduled: Vec::new(),
            seq: 0,
            line: Vec::new(),
            data: None,
            cancel: None,
        };
        sim.on("AT", |_| vec![ok()]);
        sim
    }

    /// Answer commands starting with `prefix`. Later rules win.
    pub fn on<F>(&mut self, prefix: &str, handler: F)
    where
        F: FnMut(&str) -> Vec<Action> + 'static,
    {
        self.rules.push(Rule {
            prefix: prefix.to_string(),
            handler: Box::new(handler),
        });
    }

    /// Never answer commands starting with `prefix`.
    pub fn silence(&mut self, prefix: &str) {
        self.on(prefix, |_| Vec::new());
    }

    /// Make `bytes` readable now.
    pub fn inject(&mut self, bytes: &[u8]) {
        self.visible.extend(bytes.iter().copied());
    }

    /// Make `bytes` readable once the clock reaches `at`.
    pub fn inject_at(&mut self, at: u64, bytes: &[u8]) {
        self.schedule(at, bytes.to_vec());
    }

    /// Set `token` once the clock reaches `at`.
    pub fn cancel_at(&mut self, at: u64, token: Rc<CancelToken>) {
        self.cancel = Some((at, token));
    }

    /// Commands received that start with `prefix`.
    pub fn count(&self, prefix: &str) -> usize {
        self.commands.iter().filter(|command| command.starts_with(prefix)).count()
    }

    pub fn last_command(&self) -> Option<&str> {
        self.commands.last().map(String::as_str)
    }

    /// Position of the first command equal to `command`.
    pub fn position(&self, command: &str) -> Option<usize> {
        self.commands.iter().position(|sent| sent == command)
    }

    /// Everything written after data prompts, concatenated.
    pub fn uploaded(&self) -> Vec<u8> {
        self.payloads.concat()
    }

    fn schedule(&mut self, at: u64, bytes: Vec<u8>) {
        self.seq += 1;
        self.scheduled.push(Scheduled { at, seq: self.seq, bytes });
    }

    fn advance(&mut self, ms: u64) {
        self.now += ms;
        if self.cancel.as_ref().is_some_and(|(at, _)| self.now >= *at) {
            if let Some((_, token)) = self.cancel.take() {
                token.cancel();
            }
        }
    }

    fn release_due(&mut self) {
        let now = self.now;
        let mut due: Vec<Scheduled> = Vec::new();
        let mut index = 0;
        while index < self.scheduled.len() {
            if self.scheduled[index].at <= now {
                due.push(self.scheduled.remove(index));
            } else {
                index += 1;
            }
        }
        due.sort_by_key(|item| (item.at, item.seq));
        for item in due {
            self.visible.extend(item.bytes);
        }
    }

    fn receive(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            if let Some(phase) = self.data.as_mut() {
                phase.collected.push(byte);
                phase.remaining -= 1;
                if phase.remaining == 0 {
                    if let Some(phase) = self.data.take() {
                        self.payloads.push(phase.collected);
                        self.visible.extend(phase.then);
                    }
                }
                continue;
            }
            if byte == b'\r' {
                let command = String::from_utf8_lossy(&self.line).into_owned();
                self.line.clear();
                self.command(&command);
            } else {
                self.line.push(byte);
            }
        }
    }

    fn command(&mut self, command: &str) {
        self.commands.push(command.to_string());
        let Some(index) = self.rules.iter().rposition(|rule| command.starts_with(&rule.prefix)) else {
            return;
        };
        let actions = (self.rules[index].handler)(command);
        for action in actions {
            match action {
                Action::Reply(bytes) => self.visible.extend(bytes),
                Action::After(ms, bytes) => {
                    let at = self.now + ms;
                    self.schedule(at, bytes);
                }
                Action::Prompt { len, then } => {
                    self.visible.push_back(b'@');
                    self.data = Some(DataPhase {
                        remaining: len,
                        collected: Vec::new(),
                        then,
                    });
                }
            }
        }
    }
}

pub struct SimChannel(pub Shared);

impl fmt::Debug for SimChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SimChannel")
    }
}

impl Read for SimChannel {
    type Error = Broken;

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        let mut sim = self.0.borrow_mut();
        if sim.fail_reads {
            return Err(Broken);
        }
        sim.release_due();
        let len = buf.len().min(sim.max_read).min(sim.visible.len());
        for slot in buf.iter_mut().take(len) {
            *slot = sim.visible.pop_front().unwrap_or_default();
        }
        Ok(len)
    }
}

impl Write for SimChannel {
    type Error = Broken;

    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        self.0.borrow_mut().receive(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

pub struct SimClock(pub Shared);

impl fmt::Debug for SimClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SimClock")
    }
}

impl Clock for SimClock {
    fn now_ms(&self) -> u64 {
        self.0.borrow().now
    }

    fn delay_ms(&mut self, ms: u32) {
        self.0.borrow_mut().advance(ms as u64);
    }
}

pub type SimEngine = Engine<SimChannel, SimClock>;

pub fn rig() -> (Shared, SimEngine) {
    rig_with(EngineConfig::default())
}

pub fn rig_with(config: EngineConfig) -> (Shared, SimEngine) {
    let sim = Rc::new(RefCell::new(Sim::new()));
    let engine = Engine::new(
        SimChannel(sim.clone()),
        SimClock(sim.clone()),
        SaraR::new().grammar(),
        config,
    );
    (sim, engine)
}

pub fn ok() -> Action {
    Action::Reply(b"\r\nOK\r\n".to_vec())
}

pub fn error() -> Action {
    Action::Reply(b"\r\nERROR\r\n".to_vec())
}

pub fn cme(code: u16) -> Action {
    Action::Reply(format!("\r\n+CME ERROR: {}\r\n", code).into_bytes())
}

/// Information lines followed by `OK`.
pub fn lines(lines: &[&str]) -> Action {
    let mut bytes = Vec::new();
    for line in lines {
        bytes.extend_from_slice(format!("\r\n{}\r\n", line).as_bytes());
    }
    bytes.extend_from_slice(b"\r\nOK\r\n");
    Action::Reply(bytes)
}

/// An unsolicited line as the modem frames it.
pub fn urc(line: &str) -> Vec<u8> {
    format!("\r\n{}\r\n", line).into_bytes()
}

/// Numeric parameter `index` of a command like `AT+USORD=0,192`.
pub fn arg(command: &str, index: usize) -> usize {
    command
        .split_once('=')
        .and_then(|(_, args)| args.split(',').nth(index))
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(0)
}

/// `+USORD` answer carrying `data` for socket `id`.
pub fn read_reply(id: usize, data: &[u8]) -> Action {
    let mut bytes = format!("\r\n+USORD: {},{},\"", id, data.len()).into_bytes();
    bytes.extend_from_slice(data);
    bytes.extend_from_slice(b"\"\r\n\r\nOK\r\n");
    Action::Reply(bytes)
}

/// Accept every `AT+USOWR` and acknowledge the full length.
pub fn accept_writes(sim: &mut Sim) {
    sim.on("AT+USOWR=", |command| {
        let (id, len) = (arg(command, 0), arg(command, 1));
        vec![Action::Prompt {
            len,
            then: format!("\r\n+USOWR: {},{}\r\n\r\nOK\r\n", id, len).into_bytes(),
        }]
    });
}

/// Bytes the remote peer has sent and the modem holds until read.
pub type Inbox = Rc<RefCell<VecDeque<u8>>>;

/// Serve `AT+USORD` for socket `id` from `inbox`.
pub fn serve_reads(sim: &mut Sim, inbox: &Inbox) {
    let inbox = inbox.clone();
    sim.on("AT+USORD=", move |command| {
        let (id, want) = (arg(command, 0), arg(command, 1));
        let mut inbox = inbox.borrow_mut();
        let take = want.min(inbox.len());
        let data: Vec<u8> = inbox.drain(..take).collect();
        vec![read_reply(id, &data)]
    });
}

/// When the peer of [`serve_http_closing`] closes the connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerClose {
    /// Never
    Open,
    /// 30 ms after the last segment is announced
    Later,
    /// In the same burst as the last segment's announcement
    WithLastSegment,
}

/// A TCP peer behind socket 0 that closes 30 ms after its last segment
/// when `close` is set.
pub fn serve_http(sim: &Shared, segments: Vec<Vec<u8>>, close: bool) {
    let close = if close { PeerClose::Later } else { PeerClose::Open };
    serve_http_closing(sim, segments, close);
}

/// A TCP peer behind socket 0.
///
/// `AT+USOCR` always yields socket 0. After the first write the peer answers
/// with `segments`, announcing one every 30 ms, and closes the connection as
/// `close` says.
pub fn serve_http_closing(sim: &Shared, segments: Vec<Vec<u8>>, close: PeerClose) {
    let inbox: Inbox = Rc::new(RefCell::new(VecDeque::new()));
    let mut sim = sim.borrow_mut();
    sim.on("AT+USOCR=", |_| vec![lines(&["+USOCR: 0"])]);
    sim.on("AT+USOCO=", |_| vec![ok()]);
    sim.on("AT+USOCL=", |_| vec![ok()]);
    serve_reads(&mut sim, &inbox);

    let mut answered = false;
    let peer = inbox.clone();
    sim.on("AT+USOWR=", move |command| {
        let len = arg(command, 1);
        let mut actions = vec![Action::Prompt {
            len,
            then: format!("\r\n+USOWR: 0,{}\r\n\r\nOK\r\n", len).into_bytes(),
        }];
        if !answered {
            answered = true;
            let mut delay = 0;
            for (index, segment) in segments.iter().enumerate() {
                delay += 30;
                peer.borrow_mut().extend(segment.iter().copied());
                let mut burst = urc(&format!("+UUSORD: 0,{}", segment.len()));
                if close == PeerClose::WithLastSegment && index + 1 == segments.len() {
                    burst.extend(urc("+UUSOCL: 0"));
                }
                actions.push(Action::After(delay, burst));
            }
            if close == PeerClose::Later {
                actions.push(Action::After(delay + 30, urc("+UUSOCL: 0")));
            }
        }
        actions
    });
}

/// Record sink that keeps everything in memory.
#[derive(Debug, Default)]
pub struct Transcript {
    records: Mutex<Vec<(String, Vec<u8>)>>,
}

impl Transcript {
    pub fn leaked() -> &'static Transcript {
        Box::leak(Box::new(Transcript::default()))
    }

    pub fn text(&self) -> String {
        let records = self.records.lock().unwrap();
        let bytes: Vec<u8> = records.iter().flat_map(|(_, bytes)| bytes.iter().copied()).collect();
        String::from_utf8_lossy(&bytes).into_owned()
    }

    pub fn streams(&self) -> Vec<String> {
        self.records.lock().unwrap().iter().map(|(stream, _)| stream.clone()).collect()
    }
}

impl RecordSink for Transcript {
    fn append_record(&self, stream: &str, bytes: &[u8]) -> Result<(), RecordError> {
        self.records.lock().unwrap().push((stream.to_string(), bytes.to_vec()));
        Ok(())
    }
}
