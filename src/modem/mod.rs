//! Modem integration
//!
//! A [`Dialect`] describes one modem family as data: its response grammar,
//! the command plans for bring-up, registration and bearer activation, and
//! the socket vocabulary ([`SocketDialect`]). [`Modem`] drives those plans
//! over an [`Engine`], tracks registration and data-session state from the
//! modem's notifications, answers device queries and keeps the last GNSS fix.
//!
//! Bring-up follows a fixed order:
//!
//! 1. [`Modem::power_on`]: wait for boot, probe with `AT`, identify the model
//!    and run the startup plan
//! 2. [`Modem::register`]: run the registration plan, then poll registration
//!    with exponential backoff
//! 3. [`Modem::activate_data_session`]: wait for packet attach and run the
//!    bearer plan
//!
//! [`Modem::connect`] performs all three. Power cycling after a failure is
//! left to the caller.

use heapless::{String, Vec};
use serde::Deserialize;

use crate::diag::Diagnostics;
use crate::gps::{GnssConfig, GnssReceiver, PositionReport};
use crate::network::at::{Category, CategorySet, Command, Engine, Grammar, ListenerId, Notification, Response};
use crate::network::error::{EngineError, SocketError};
use crate::network::socket::{SocketConfig, SocketStack};
use crate::network::{Channel, Read};
use crate::time::{Backoff, BackoffConfig, Clock};

pub use crate::network::socket::SocketDialect;

mod error;
pub mod sara_r;

pub use error::IntegrationError;

const COMPONENT: &str = "modem";

/// Steps in one command plan
pub const MAX_PLAN_STEPS: usize = 12;
/// Longest IMEI or IMSI kept
pub const IDENTITY_LEN: usize = 20;

const GNSS_READ_CHUNK: usize = 64;
const GNSS_MAX_READS: usize = 16;

/// One command of a plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    /// Command to run
    pub command: Command,
    /// Pause after the command succeeded
    pub settle_ms: u32,
    /// Tries before the step counts as failed
    pub attempts: u8,
}

impl Step {
    /// Single attempt, no pause.
    pub fn new(command: Command) -> Self {
        Self {
            command,
            settle_ms: 0,
            attempts: 1,
        }
    }

    /// Pause `settle_ms` after the command succeeded.
    pub fn settle(mut self, settle_ms: u32) -> Self {
        self.settle_ms = settle_ms;
        self
    }

    /// Try the command up to `attempts` times.
    pub fn attempts(mut self, attempts: u8) -> Self {
        self.attempts = attempts;
        self
    }
}

/// Ordered commands that must all answer `OK`
pub type Plan = Vec<Step, MAX_PLAN_STEPS>;

/// Packet data network to register with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Apn<'a> {
    /// Access point name
    pub name: &'a str,
    /// User name for PAP/CHAP
    pub user: Option<&'a str>,
    /// Password for PAP/CHAP
    pub password: Option<&'a str>,
    /// PDP context identifier
    pub cid: u8,
}

impl<'a> Apn<'a> {
    /// APN without credentials on context 1.
    pub const fn new(name: &'a str) -> Self {
        Self {
            name,
            user: None,
            password: None,
            cid: 1,
        }
    }

    /// Add PAP/CHAP credentials.
    pub const fn with_credentials(mut self, user: &'a str, password: &'a str) -> Self {
        self.user = Some(user);
        self.password = Some(password);
        self
    }

    /// Use PDP context `cid`.
    pub const fn with_cid(mut self, cid: u8) -> Self {
        self.cid = cid;
        self
    }

    /// Whether credentials are set.
    pub fn has_credentials(&self) -> bool {
        self.user.is_some_and(|user| !user.is_empty()) || self.password.is_some_and(|pw| !pw.is_empty())
    }

    /// Reject values that cannot be embedded in a quoted AT parameter.
    pub fn validate(&self) -> Result<(), IntegrationError> {
        let quotable = |text: &str| !text.contains('"') && !text.bytes().any(|b| b.is_ascii_control());
        let valid = !self.name.is_empty()
            && quotable(self.name)
            && self.user.is_none_or(quotable)
            && self.password.is_none_or(quotable)
            && self.cid > 0;
        if valid { Ok(()) } else { Err(IntegrationError::InvalidSettings) }
    }
}

/// Provisioning record, usually stored as JSON.
///
/// ```rust
/// use libcellular::modem::Settings;
///
/// let settings = Settings::from_json(br#"{"apn":"iot.example","user":"u","password":"p","cid":2}"#).unwrap();
/// let apn = settings.apn();
/// assert_eq!(apn.name, "iot.example");
/// assert_eq!(apn.cid, 2);
/// assert!(apn.has_credentials());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Settings<'a> {
    /// Access point name
    pub apn: &'a str,
    /// User name
    #[serde(default, borrow)]
    pub user: Option<&'a str>,
    /// Password
    #[serde(default, borrow)]
    pub password: Option<&'a str>,
    /// PDP context identifier; 1 when absent
    #[serde(default)]
    pub cid: Option<u8>,
    /// Mobile network operator profile
    #[serde(default)]
    pub mno_profile: Option<u16>,
    /// Registration polls before giving up
    #[serde(default)]
    pub registration_retries: Option<u8>,
}

impl<'a> Settings<'a> {
    /// Parse and validate settings from JSON.
    pub fn from_json(json: &'a [u8]) -> Result<Self, IntegrationError> {
        let (settings, _) =
            serde_json_core::from_slice::<Settings<'a>>(json).map_err(|_| IntegrationError::InvalidSettings)?;
        settings.apn().validate()?;
        Ok(settings)
    }

    /// The APN these settings describe.
    pub fn apn(&self) -> Apn<'a> {
        Apn {
            name: self.apn,
            user: self.user,
            password: self.password,
            cid: self.cid.unwrap_or(1),
        }
    }

    /// Copy the registration budget into `config`.
    pub fn apply(&self, config: &mut ModemConfig) {
        if let Some(retries) = self.registration_retries {
            config.registration.max_retries = retries;
        }
    }

    /// Select the operator profile on `dialect`, if one is set.
    pub fn configure<D: Dialect>(&self, dialect: &mut D) {
        if let Some(profile) = self.mno_profile {
            dialect.set_mno_profile(profile);
        }
    }
}

/// Network registration state (3GPP TS 27.007 `<stat>`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub enum RegistrationStatus {
    /// Not registered and not searching
    #[default]
    NotRegistered,
    /// Registered on the home network
    Home,
    /// Searching for an operator
    Searching,
    /// Registration denied
    Denied,
    /// Unknown, e.g. out of coverage
    Unknown,
    /// Registered while roaming
    Roaming,
    /// Attached for emergency bearer services only
    EmergencyOnly,
}

impl RegistrationStatus {
    /// Status from the numeric `<stat>` parameter.
    pub fn from_stat(stat: u8) -> Self {
        match stat {
            0 => RegistrationStatus::NotRegistered,
            1 => RegistrationStatus::Home,
            2 => RegistrationStatus::Searching,
            3 => RegistrationStatus::Denied,
            5 => RegistrationStatus::Roaming,
            8 => RegistrationStatus::EmergencyOnly,
            _ => RegistrationStatus::Unknown,
        }
    }

    /// Home or roaming.
    pub fn is_registered(&self) -> bool {
        matches!(self, RegistrationStatus::Home | RegistrationStatus::Roaming)
    }
}

/// Received signal quality from `AT+CSQ`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalQuality {
    /// RSSI index 0-31, 99 when unknown
    pub rssi: u8,
    /// Bit error rate index 0-7, 99 when unknown
    pub ber: u8,
}

impl SignalQuality {
    /// Signal strength in dBm, if known.
    pub fn dbm(&self) -> Option<i16> {
        match self.rssi {
            0..=31 => Some(-113 + 2 * self.rssi as i16),
            _ => None,
        }
    }
}

/// Network time from `AT+CCLK?`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkTime {
    /// Four-digit year
    pub year: u16,
    /// Month (1-12)
    pub month: u8,
    /// Day (1-31)
    pub day: u8,
    /// Hour (0-23)
    pub hour: u8,
    /// Minute (0-59)
    pub minute: u8,
    /// Second (0-59)
    pub second: u8,
    /// Local time offset from UTC in minutes
    pub utc_offset_minutes: i16,
}

impl NetworkTime {
    /// Parse `"yy/MM/dd,hh:mm:ss±zz"`, where `zz` counts quarter hours.
    /// Quotes around the value are optional.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim().trim_matches('"');
        let (date, time) = text.split_once(',')?;
        let (clock, offset) = match time.find(['+', '-']) {
            Some(at) => time.split_at(at),
            None => (time, ""),
        };

        let mut date = date.split('/').map(|part| part.parse::<u8>().ok());
        let (year, month, day) = (date.next()??, date.next()??, date.next()??);
        let mut clock = clock.split(':').map(|part| part.parse::<u8>().ok());
        let (hour, minute, second) = (clock.next()??, clock.next()??, clock.next()??);
        let quarters: i16 = match offset {
            "" => 0,
            offset => offset.strip_prefix('+').unwrap_or(offset).parse().ok()?,
        };

        let valid = (1..=12).contains(&month) && (1..=31).contains(&day) && hour < 24 && minute < 60 && second < 61;
        valid.then_some(Self {
            year: 2000 + year as u16,
            month,
            day,
            hour,
            minute,
            second,
            utc_offset_minutes: quarters * 15,
        })
    }
}

/// Command vocabulary and bring-up sequence of one modem family.
pub trait Dialect: SocketDialect {
    /// Human-readable model name for diagnostics.
    fn name(&self) -> &'static str;
    /// Response grammar; pass it to [`Engine::new`].
    fn grammar(&self) -> Grammar;
    /// Time the modem needs after power-up before it answers.
    fn startup_delay_ms(&self) -> u32 {
        0
    }
    /// Identification query.
    fn identify(&self) -> Result<Command, EngineError>;
    /// Learn the model from the identification response.
    fn on_identified(&mut self, response: &Response);
    /// Commands run once the modem answers.
    fn startup_plan(&self) -> Result<Plan, EngineError>;
    /// Operator profile to select during registration. Dialects without
    /// operator profiles ignore it.
    fn set_mno_profile(&mut self, _profile: u16) {}
    /// Commands that configure `apn` and start network registration.
    fn registration_plan(&self, apn: &Apn<'_>) -> Result<Plan, EngineError>;
    /// Registration status query.
    fn registration_query(&self) -> Result<Command, EngineError>;
    /// Status carried by a registration line. `solicited` lines answer the
    /// query and lead with the reporting mode.
    fn parse_registration(&self, line: &str, solicited: bool) -> Option<RegistrationStatus>;
    /// Packet service attach query.
    fn attach_query(&self) -> Result<Command, EngineError>;
    /// Whether the attach query reports attachment.
    fn parse_attached(&self, response: &Response) -> Option<bool>;
    /// Commands that activate the packet data bearer.
    fn bearer_plan(&self, apn: &Apn<'_>) -> Result<Plan, EngineError>;
    /// `Some(true)` for a data session activation notification, `Some(false)`
    /// for a deactivation.
    fn parse_session_event(&self, notification: &Notification) -> Option<bool>;
    /// Command that puts the modem into minimum functionality.
    fn power_down(&self) -> Result<Command, EngineError>;
}

/// Integration options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModemConfig {
    /// `AT` probes before the modem counts as unresponsive
    pub probe_attempts: u8,
    /// Pause between probes
    pub probe_interval_ms: u32,
    /// Timeout of one probe
    pub probe_timeout_ms: u32,
    /// Pause between attempts of a plan step
    pub step_retry_delay_ms: u32,
    /// Registration polling
    pub registration: BackoffConfig,
    /// Packet attach polling
    pub attach: BackoffConfig,
    /// Socket layer options
    pub sockets: SocketConfig,
    /// GNSS options
    pub gnss: GnssConfig,
}

impl Default for ModemConfig {
    fn default() -> Self {
        Self {
            probe_attempts: 7,
            probe_interval_ms: 1_000,
            probe_timeout_ms: 1_000,
            step_retry_delay_ms: 1_000,
            registration: BackoffConfig {
                initial_ms: 500,
                max_ms: 8_000,
                multiplier: 2,
                max_retries: 30,
            },
            attach: BackoffConfig {
                initial_ms: 1_000,
                max_ms: 4_000,
                multiplier: 2,
                max_retries: 15,
            },
            sockets: SocketConfig::default(),
            gnss: GnssConfig::default(),
        }
    }
}

fn lost_or(fallback: IntegrationError) -> impl Fn(EngineError) -> IntegrationError {
    move |error| match error {
        EngineError::ChannelLost => IntegrationError::ChannelLost,
        _ => fallback,
    }
}

/// A cellular modem: bring-up, state tracking, device queries and sockets.
#[derive(Debug)]
pub struct Modem<CH, CL, D> {
    stack: SocketStack<CH, CL, D>,
    config: ModemConfig,
    listener: ListenerId,
    registration: RegistrationStatus,
    session_active: bool,
    imei: Option<String<IDENTITY_LEN>>,
    imsi: Option<String<IDENTITY_LEN>>,
    gnss: GnssReceiver,
    diag: Diagnostics,
}

impl<CH: Channel, CL: Clock, D: Dialect> Modem<CH, CL, D> {
    /// Take over `engine`, which must have been built with `dialect`'s grammar.
    pub fn new(engine: Engine<CH, CL>, dialect: D, config: ModemConfig) -> Result<Self, IntegrationError> {
        let diag = engine.diagnostics();
        let mut stack = SocketStack::new(engine, dialect, config.sockets)?;
        let listener = stack.engine_mut().register_listener(CategorySet::of(&[
            Category::Registration,
            Category::DataSession,
            Category::Device,
        ]))?;
        Ok(Self {
            stack,
            config,
            listener,
            registration: RegistrationStatus::NotRegistered,
            session_active: false,
            imei: None,
            imsi: None,
            gnss: GnssReceiver::new(config.gnss).with_diagnostics(diag),
            diag,
        })
    }

    pub fn config(&self) -> &ModemConfig {
        &self.config
    }

    pub fn dialect(&self) -> &D {
        self.stack.dialect()
    }

    pub fn engine(&self) -> &Engine<CH, CL> {
        self.stack.engine()
    }

    pub fn engine_mut(&mut self) -> &mut Engine<CH, CL> {
        self.stack.engine_mut()
    }

    /// Socket stack for application protocols.
    pub fn sockets(&mut self) -> &mut SocketStack<CH, CL, D> {
        &mut self.stack
    }

    pub fn into_parts(self) -> (Engine<CH, CL>, D) {
        self.stack.into_parts()
    }

    /// Wait for boot, probe, identify and run the startup plan.
    pub fn power_on(&mut self) -> Result<(), IntegrationError> {
        let boot = self.stack.dialect().startup_delay_ms();
        if boot > 0 {
            log_info!(self.diag, COMPONENT, "waiting {} ms for the modem to boot", boot);
            self.stack.engine_mut().delay_ms(boot);
        }

        let probe = Command::new("AT")?.with_timeout(self.config.probe_timeout_ms);
        let (attempts, interval) = (self.config.probe_attempts, self.config.probe_interval_ms);
        let response = self
            .stack
            .engine_mut()
            .execute_with_retry(probe, attempts, interval)
            .map_err(lost_or(IntegrationError::NotResponding))?;
        if !response.is_ok() {
            log_error!(self.diag, COMPONENT, "no answer after {} probes", attempts);
            return Err(IntegrationError::NotResponding);
        }

        let identify = self.stack.dialect().identify()?;
        let response = self
            .stack
            .engine_mut()
            .execute_with_retry(identify, 3, interval)
            .map_err(lost_or(IntegrationError::NotResponding))?;
        if response.is_ok() {
            self.stack.dialect_mut().on_identified(&response);
        } else {
            log_warn!(self.diag, COMPONENT, "identification failed: {:?}", response);
        }
        log_info!(self.diag, COMPONENT, "detected {}", self.stack.dialect().name());

        let plan = self.stack.dialect().startup_plan()?;
        self.run_plan(plan, IntegrationError::NotResponding)?;
        self.registration = RegistrationStatus::NotRegistered;
        self.session_active = false;
        log_info!(self.diag, COMPONENT, "modem ready");
        Ok(())
    }

    /// Configure `apn`, start registration and wait until the modem is
    /// registered, polling with exponential backoff.
    pub fn register(&mut self, apn: &Apn<'_>) -> Result<(), IntegrationError> {
        apn.validate()?;
        let plan = self.stack.dialect().registration_plan(apn)?;
        self.run_plan(plan, IntegrationError::RegistrationFailed)?;

        let mut backoff = Backoff::new(self.config.registration);
        loop {
            let status = self.query_registration()?;
            if status.is_registered() {
                log_info!(self.diag, COMPONENT, "registered ({:?})", status);
                return Ok(());
            }
            let Some(delay) = backoff.next_delay() else {
                log_error!(
                    self.diag,
                    COMPONENT,
                    "not registered after {} polls, last status {:?}",
                    backoff.retries() as u32 + 1,
                    status
                );
                return Err(IntegrationError::RegistrationFailed);
            };
            log_debug!(self.diag, COMPONENT, "registration {:?}, polling again in {} ms", status, delay);
            self.stack.engine_mut().delay_ms(delay);
        }
    }

    /// Registration as of the last query or notification.
    pub fn is_registered(&self) -> bool {
        self.registration.is_registered()
    }

    pub fn registration(&self) -> RegistrationStatus {
        self.registration
    }

    /// Whether the packet data bearer is up.
    pub fn is_session_active(&self) -> bool {
        self.session_active
    }

    /// Ask the modem for its registration status.
    pub fn query_registration(&mut self) -> Result<RegistrationStatus, IntegrationError> {
        self.service()?;
        let query = self.stack.dialect().registration_query()?;
        let response = self
            .stack
            .engine_mut()
            .execute(query)
            .map_err(lost_or(IntegrationError::QueryFailed))?;
        let dialect = self.stack.dialect();
        let reported = response
            .lines()
            .iter()
            .filter_map(|line| core::str::from_utf8(line).ok())
            .find_map(|line| dialect.parse_registration(line, true));
        match reported {
            Some(status) => self.registration = status,
            None => log_debug!(self.diag, COMPONENT, "registration query answered {:?}", response),
        }
        Ok(self.registration)
    }

    /// Wait for packet attach, then activate the data bearer for `apn`.
    pub fn activate_data_session(&mut self, apn: &Apn<'_>) -> Result<(), IntegrationError> {
        apn.validate()?;
        if !self.registration.is_registered() && !self.query_registration()?.is_registered() {
            log_error!(self.diag, COMPONENT, "cannot activate a data session while {:?}", self.registration);
            return Err(IntegrationError::BearerActivationFailed);
        }

        let mut backoff = Backoff::new(self.config.attach);
        loop {
            let query = self.stack.dialect().attach_query()?;
            let response = self
                .stack
                .engine_mut()
                .execute(query)
                .map_err(lost_or(IntegrationError::BearerActivationFailed))?;
            if self.stack.dialect().parse_attached(&response) == Some(true) {
                log_info!(self.diag, COMPONENT, "attached to packet service");
                break;
            }
            let Some(delay) = backoff.next_delay() else {
                log_error!(self.diag, COMPONENT, "packet attach did not complete");
                return Err(IntegrationError::BearerActivationFailed);
            };
            self.stack.engine_mut().delay_ms(delay);
        }

        let plan = self.stack.dialect().bearer_plan(apn)?;
        self.run_plan(plan, IntegrationError::BearerActivationFailed)?;
        self.session_active = true;
        log_info!(self.diag, COMPONENT, "data session active on {}", apn.name);
        Ok(())
    }

    /// Take the registration budget and operator profile from `settings`.
    /// Call before [`Modem::register`].
    pub fn provision(&mut self, settings: &Settings<'_>) {
        settings.apply(&mut self.config);
        settings.configure(self.stack.dialect_mut());
        log_debug!(self.diag, COMPONENT, "provisioned for {}", settings.apn);
    }

    /// Power on, register and activate the data session.
    pub fn connect(&mut self, apn: &Apn<'_>) -> Result<(), IntegrationError> {
        self.power_on()?;
        self.register(apn)?;
        self.activate_data_session(apn)
    }

    /// Drop all sockets and put the modem into minimum functionality.
    pub fn disconnect(&mut self) -> Result<(), IntegrationError> {
        self.stack.reset();
        let command = self.stack.dialect().power_down()?;
        let response = self
            .stack
            .engine_mut()
            .execute(command)
            .map_err(lost_or(IntegrationError::QueryFailed))?;
        self.session_active = false;
        self.registration = RegistrationStatus::NotRegistered;
        if !response.is_ok() {
            log_warn!(self.diag, COMPONENT, "power down answered {:?}", response);
            return Err(IntegrationError::QueryFailed);
        }
        log_info!(self.diag, COMPONENT, "disconnected");
        Ok(())
    }

    /// Modem serial number (`AT+CGSN`).
    pub fn imei(&mut self) -> Result<&str, IntegrationError> {
        if self.imei.is_none() {
            self.imei = Some(self.identity("AT+CGSN")?);
        }
        Ok(self.imei.as_deref().unwrap_or_default())
    }

    /// Subscriber identity (`AT+CIMI`).
    pub fn imsi(&mut self) -> Result<&str, IntegrationError> {
        if self.imsi.is_none() {
            self.imsi = Some(self.identity("AT+CIMI")?);
        }
        Ok(self.imsi.as_deref().unwrap_or_default())
    }

    fn identity(&mut self, query: &str) -> Result<String<IDENTITY_LEN>, IntegrationError> {
        let lines = self.stack.engine_mut().execute_ok(Command::new(query)?)?;
        let value = lines
            .iter()
            .filter_map(|line| core::str::from_utf8(line).ok())
            .map(str::trim)
            .find(|text| !text.is_empty() && text.bytes().all(|b| b.is_ascii_digit()))
            .ok_or(IntegrationError::QueryFailed)?;
        let mut identity = String::new();
        identity.push_str(value).map_err(|_| IntegrationError::QueryFailed)?;
        Ok(identity)
    }

    /// Received signal quality (`AT+CSQ`).
    pub fn signal_quality(&mut self) -> Result<SignalQuality, IntegrationError> {
        let lines = self.stack.engine_mut().execute_ok(Command::new("AT+CSQ")?)?;
        let response = Response::Ok(lines);
        let params = response.field("+CSQ:").ok_or(IntegrationError::QueryFailed)?;
        Ok(SignalQuality {
            rssi: crate::network::at::param_number(params, 0).ok_or(IntegrationError::QueryFailed)?,
            ber: crate::network::at::param_number(params, 1).unwrap_or(99),
        })
    }

    /// Network-provided local time (`AT+CCLK?`).
    pub fn network_time(&mut self) -> Result<NetworkTime, IntegrationError> {
        let lines = self.stack.engine_mut().execute_ok(Command::new("AT+CCLK?")?)?;
        let response = Response::Ok(lines);
        response
            .field("+CCLK:")
            .and_then(NetworkTime::parse)
            .ok_or(IntegrationError::QueryFailed)
    }

    /// Feed GNSS receiver output. Returns the number of new fixes.
    pub fn feed_gnss(&mut self, bytes: &[u8]) -> usize {
        let now = self.stack.engine().now_ms();
        self.gnss.push(bytes, now)
    }

    /// Drain whatever `source` has buffered into the GNSS receiver.
    pub fn poll_gnss<R: Read>(&mut self, source: &mut R) -> Result<usize, R::Error> {
        let mut chunk = [0u8; GNSS_READ_CHUNK];
        let mut fixes = 0;
        for _ in 0..GNSS_MAX_READS {
            let read = source.read(&mut chunk)?.min(chunk.len());
            if read == 0 {
                break;
            }
            fixes += self.feed_gnss(&chunk[..read]);
        }
        Ok(fixes)
    }

    /// Last good fix, flagged stale once it is older than
    /// [`GnssConfig::stale_after_ms`].
    pub fn current_position(&self) -> Option<PositionReport> {
        self.gnss.position(self.stack.engine().now_ms())
    }

    pub fn gnss(&self) -> &GnssReceiver {
        &self.gnss
    }

    /// Process notifications and move pending socket data. Socket-level
    /// failures are logged; only a lost channel is returned.
    pub fn service(&mut self) -> Result<(), IntegrationError> {
        match self.stack.service() {
            Ok(()) => {}
            Err(SocketError::ChannelLost) => return Err(IntegrationError::ChannelLost),
            Err(error) => log_warn!(self.diag, COMPONENT, "socket service failed: {:?}", error),
        }
        self.process_notifications();
        Ok(())
    }

    fn process_notifications(&mut self) {
        while let Some(notification) = self.stack.engine_mut().next_notification(self.listener) {
            let dialect = self.stack.dialect();
            match notification.category() {
                Category::Registration => match dialect.parse_registration(notification.line(), false) {
                    Some(status) => {
                        if status != self.registration {
                            log_info!(self.diag, COMPONENT, "registration {:?} -> {:?}", self.registration, status);
                        }
                        self.registration = status;
                    }
                    None => log_debug!(self.diag, COMPONENT, "ignored {}", notification.line()),
                },
                Category::DataSession => match dialect.parse_session_event(&notification) {
                    Some(active) => {
                        log_info!(
                            self.diag,
                            COMPONENT,
                            "data session {}",
                            if active { "activated" } else { "deactivated" }
                        );
                        self.session_active = active;
                    }
                    None => log_debug!(self.diag, COMPONENT, "ignored {}", notification.line()),
                },
                _ => log_debug!(self.diag, COMPONENT, "event {}", notification.line()),
            }
        }
    }

    fn run_plan(&mut self, plan: Plan, failure: IntegrationError) -> Result<(), IntegrationError> {
        let retry_delay = self.config.step_retry_delay_ms;
        for step in plan {
            let response = self
                .stack
                .engine_mut()
                .execute_with_retry(step.command.clone(), step.attempts, retry_delay)
                .map_err(lost_or(failure))?;
            if !response.is_ok() {
                log_error!(
                    self.diag,
                    COMPONENT,
                    "{} failed: {:?}",
                    step.command.text(),
                    response
                );
                return Err(failure);
            }
            if step.settle_ms > 0 {
                self.stack.engine_mut().delay_ms(step.settle_ms);
            }
        }
        self.service()
    }
}
