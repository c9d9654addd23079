//! u-blox SARA-R4/R5 series (LTE Cat M1 / NB-IoT)
//!
//! Socket commands use the `+USO*` family: `AT+USOWR` answers with an `@`
//! prompt before the payload, `AT+USORD`/`AT+USORF` return the payload as a
//! quoted, length-prefixed parameter, and `+UUSORD`/`+UUSOCL` announce
//! incoming data and remote closes.

use super::{Apn, Dialect, Plan, RegistrationStatus, Step};
use crate::network::at::{
    Category, Command, Grammar, LINE_CAPACITY, Notification, PayloadRule, Response, UrcRule, param_number,
};
use crate::network::error::EngineError;
use crate::network::socket::{Protocol, SocketDialect, SocketEvent};

/// Default mobile network operator profile (NTT DOCOMO)
pub const DEFAULT_MNO_PROFILE: u16 = 20;

const MAX_WRITE: usize = 512;
// Header of the longest `+USORF` line plus the closing quote.
const MAX_READ: usize = LINE_CAPACITY - 64;

const URCS: &[UrcRule] = &[
    UrcRule::new("+UUSORD:", Category::SocketData),
    UrcRule::new("+UUSORF:", Category::SocketData),
    UrcRule::new("+UUSOCL:", Category::SocketClosed),
    UrcRule::new("+CEREG:", Category::Registration).solicited_by("AT+CEREG?"),
    UrcRule::new("+UUPSDA:", Category::DataSession),
    UrcRule::new("+UUPSDD:", Category::DataSession),
    UrcRule::new("RING", Category::IncomingCall),
    UrcRule::new("+CMTI:", Category::IncomingCall),
];

const PAYLOADS: &[PayloadRule] = &[
    PayloadRule {
        prefix: "+USORD:",
        length_field: 1,
    },
    PayloadRule {
        prefix: "+USORF:",
        length_field: 3,
    },
];

const CME_MESSAGES: &[(u16, &str)] = &[
    (3, "operation not allowed"),
    (4, "operation not supported"),
    (10, "SIM not inserted"),
    (13, "SIM failure"),
    (14, "SIM busy"),
    (30, "no network service"),
    (100, "unknown"),
    (107, "GPRS services not allowed"),
    (111, "PLMN not allowed"),
    (132, "service option not supported"),
    (148, "unspecified GPRS error"),
    (149, "PDP authentication failure"),
];

const GRAMMAR: Grammar = Grammar {
    ok: &["OK"],
    errors: &["ERROR", "ABORTED"],
    cme_prefix: "+CME ERROR:",
    cms_prefix: "+CMS ERROR:",
    urcs: URCS,
    payloads: PAYLOADS,
    prompt: b'@',
    cme_messages: CME_MESSAGES,
};

/// SARA-R model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Model {
    /// SARA-R410M
    R410,
    /// SARA-R510M8S / R510S
    R510,
    /// Not identified yet; bring-up follows the R510 sequence
    #[default]
    Unknown,
}

/// SARA-R dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaraR {
    model: Model,
    mno_profile: u16,
}

impl Default for SaraR {
    fn default() -> Self {
        Self::new()
    }
}

impl SaraR {
    /// Model detected during [`Modem::power_on`](super::Modem::power_on).
    pub const fn new() -> Self {
        Self {
            model: Model::Unknown,
            mno_profile: DEFAULT_MNO_PROFILE,
        }
    }

    pub const fn r410() -> Self {
        Self {
            model: Model::R410,
            mno_profile: DEFAULT_MNO_PROFILE,
        }
    }

    pub const fn r510() -> Self {
        Self {
            model: Model::R510,
            mno_profile: DEFAULT_MNO_PROFILE,
        }
    }

    /// Select the `AT+UMNOPROF` profile used during registration.
    pub const fn with_mno_profile(mut self, profile: u16) -> Self {
        self.mno_profile = profile;
        self
    }

    pub fn model(&self) -> Model {
        self.model
    }

    /// Grammar to build the [`Engine`](crate::network::at::Engine) with.
    pub const fn grammar(&self) -> Grammar {
        GRAMMAR
    }
}

fn step(args: core::fmt::Arguments<'_>, timeout_ms: u32) -> Result<Step, EngineError> {
    Ok(Step::new(Command::format(args)?.with_timeout(timeout_ms)))
}

fn push(plan: &mut Plan, step: Step) -> Result<(), EngineError> {
    plan.push(step).map_err(|_| EngineError::CommandTooLong)
}

/// Quoted payload of a read response, located through its length parameter.
fn payload<'r>(response: &'r Response, prefix: &str, length_field: usize) -> Option<&'r [u8]> {
    let line = response
        .lines()
        .iter()
        .find(|line| line.starts_with(prefix.as_bytes()))?;
    let mut fields = line[prefix.len()..].splitn(length_field + 2, |&byte| byte == b',');
    let len: usize = core::str::from_utf8(fields.nth(length_field)?).ok()?.trim().parse().ok()?;
    if len == 0 {
        return Some(&[]);
    }
    let data = fields.next()?.strip_prefix(b"\"")?;
    if data.get(len) != Some(&b'"') {
        return None;
    }
    data.get(..len)
}

impl SocketDialect for SaraR {
    fn create(&self, protocol: Protocol) -> Result<Command, EngineError> {
        match protocol {
            Protocol::Tcp => Command::new("AT+USOCR=6"),
            Protocol::Udp => Command::new("AT+USOCR=17"),
        }
    }

    fn parse_created(&self, response: &Response) -> Option<u8> {
        param_number(response.field("+USOCR:")?, 0)
    }

    fn connect(&self, id: u8, host: &str, port: u16) -> Result<Command, EngineError> {
        Command::format(format_args!("AT+USOCO={},\"{}\",{}", id, host, port))
    }

    fn write(&self, id: u8, len: usize) -> Result<Command, EngineError> {
        Ok(Command::format(format_args!("AT+USOWR={},{}", id, len))?.with_timeout(10_000))
    }

    fn parse_written(&self, response: &Response) -> Option<usize> {
        param_number(response.field("+USOWR:")?, 1)
    }

    fn max_write(&self) -> usize {
        MAX_WRITE
    }

    fn read(&self, id: u8, protocol: Protocol, len: usize) -> Result<Command, EngineError> {
        match protocol {
            Protocol::Tcp => Command::format(format_args!("AT+USORD={},{}", id, len)),
            Protocol::Udp => Command::format(format_args!("AT+USORF={},{}", id, len)),
        }
    }

    fn parse_read<'r>(&self, response: &'r Response, protocol: Protocol) -> Option<&'r [u8]> {
        match protocol {
            Protocol::Tcp => payload(response, "+USORD:", 1),
            Protocol::Udp => payload(response, "+USORF:", 3),
        }
    }

    fn max_read(&self) -> usize {
        MAX_READ
    }

    fn close(&self, id: u8, asynchronous: bool) -> Result<Command, EngineError> {
        let command = if asynchronous {
            Command::format(format_args!("AT+USOCL={},1", id))?
        } else {
            Command::format(format_args!("AT+USOCL={}", id))?
        };
        Ok(command.with_timeout(10_000))
    }

    fn parse_event(&self, notification: &Notification) -> Option<SocketEvent> {
        let params = notification.params();
        if notification.is("+UUSORD:") || notification.is("+UUSORF:") {
            return Some(SocketEvent::DataAvailable {
                id: param_number(params, 0)?,
                len: param_number(params, 1)?,
            });
        }
        if notification.is("+UUSOCL:") {
            return Some(SocketEvent::Closed {
                id: param_number(params, 0)?,
            });
        }
        None
    }
}

impl Dialect for SaraR {
    fn name(&self) -> &'static str {
        match self.model {
            Model::R410 => "SARA-R410",
            Model::R510 => "SARA-R510",
            Model::Unknown => "SARA-R (unknown model)",
        }
    }

    fn grammar(&self) -> Grammar {
        GRAMMAR
    }

    fn startup_delay_ms(&self) -> u32 {
        1_000
    }

    fn identify(&self) -> Result<Command, EngineError> {
        Ok(Command::new("ATI")?.with_timeout(15_000))
    }

    fn on_identified(&mut self, response: &Response) {
        let mentions = |model: &str| {
            response
                .lines()
                .iter()
                .any(|line| line.windows(model.len()).any(|window| window == model.as_bytes()))
        };
        self.model = if mentions("R510") {
            Model::R510
        } else if mentions("R410") {
            Model::R410
        } else {
            Model::Unknown
        };
    }

    fn set_mno_profile(&mut self, profile: u16) {
        self.mno_profile = profile;
    }

    fn startup_plan(&self) -> Result<Plan, EngineError> {
        let mut plan = Plan::new();
        push(&mut plan, Step::new(Command::new("ATE0")?))?;
        push(&mut plan, Step::new(Command::new("AT+CMEE=1")?))?;
        push(&mut plan, Step::new(Command::new("AT+CEREG=1")?))?;
        push(&mut plan, step(format_args!("AT+CFUN=0"), 15_000)?.attempts(3))?;
        Ok(plan)
    }

    fn registration_plan(&self, apn: &Apn<'_>) -> Result<Plan, EngineError> {
        let mut plan = Plan::new();
        let cid = apn.cid;
        push(&mut plan, step(format_args!("AT+UMNOPROF={}", self.mno_profile), 20_000)?.settle(2_000))?;
        match self.model {
            Model::R410 => {
                push(&mut plan, step(format_args!("AT+CFUN=15"), 60_000)?.settle(10_000))?;
                push(&mut plan, step(format_args!("AT+COPS=2"), 120_000)?.attempts(2))?;
                push(
                    &mut plan,
                    step(format_args!("AT+CGDCONT={},\"IP\",\"{}\"", cid, apn.name), 60_000)?,
                )?;
            }
            Model::R510 | Model::Unknown => {
                push(&mut plan, step(format_args!("AT+CFUN=16"), 40_000)?.settle(10_000))?;
                push(&mut plan, step(format_args!("AT+CFUN=0"), 40_000)?)?;
                push(
                    &mut plan,
                    step(format_args!("AT+CGDCONT={},\"IPV4V6\",\"{}\"", cid, apn.name), 20_000)?,
                )?;
            }
        }
        if apn.has_credentials() {
            push(
                &mut plan,
                step(
                    format_args!(
                        "AT+UAUTHREQ={},1,\"{}\",\"{}\"",
                        cid,
                        apn.user.unwrap_or(""),
                        apn.password.unwrap_or("")
                    ),
                    10_000,
                )?,
            )?;
        }
        match self.model {
            Model::R410 => push(&mut plan, step(format_args!("AT+COPS=0"), 20_000)?.settle(1_000))?,
            Model::R510 | Model::Unknown => push(&mut plan, step(format_args!("AT+CFUN=1"), 20_000)?.settle(1_000))?,
        }
        Ok(plan)
    }

    fn registration_query(&self) -> Result<Command, EngineError> {
        Ok(Command::new("AT+CEREG?")?.with_timeout(1_200))
    }

    fn parse_registration(&self, line: &str, solicited: bool) -> Option<RegistrationStatus> {
        let params = line.trim().strip_prefix("+CEREG:")?;
        let index = if solicited { 1 } else { 0 };
        param_number(params, index).map(RegistrationStatus::from_stat)
    }

    fn attach_query(&self) -> Result<Command, EngineError> {
        Ok(Command::new("AT+CGATT?")?.with_timeout(30_000))
    }

    fn parse_attached(&self, response: &Response) -> Option<bool> {
        param_number::<u8>(response.field("+CGATT:")?, 0).map(|state| state == 1)
    }

    fn bearer_plan(&self, apn: &Apn<'_>) -> Result<Plan, EngineError> {
        let mut plan = Plan::new();
        if self.model == Model::R410 {
            return Ok(plan);
        }
        push(&mut plan, step(format_args!("AT+UPSD=0,0,0"), 20_000)?)?;
        push(&mut plan, step(format_args!("AT+UPSD=0,100,{}", apn.cid), 20_000)?)?;
        push(&mut plan, step(format_args!("AT+UPSDA=0,3"), 20_000)?)?;
        Ok(plan)
    }

    fn parse_session_event(&self, notification: &Notification) -> Option<bool> {
        if notification.is("+UUPSDA:") {
            return Some(param_number::<u8>(notification.params(), 0) == Some(0));
        }
        if notification.is("+UUPSDD:") {
            return Some(false);
        }
        None
    }

    fn power_down(&self) -> Result<Command, EngineError> {
        Ok(Command::new("AT+CFUN=0")?.with_timeout(30_000))
    }
}
