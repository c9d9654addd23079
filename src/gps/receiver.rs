use heapless::Vec;

use super::nmea::{Coordinate, Date, NMEA_MAX_LENGTH, NmeaError, NmeaParser, Sentence, UtcTime};
use super::{FixQuality, GnssConfig, PositionFix, PositionReport};
use crate::diag::Diagnostics;

const COMPONENT: &str = "gnss";

/// Frames an NMEA byte stream and keeps the last good fix.
///
/// A sentence that fails to parse or carries a wrong checksum is counted and
/// dropped; it never touches the stored fix. Sentences that report "no fix"
/// are valid but leave the stored fix alone as well, so it simply ages.
#[derive(Debug)]
pub struct GnssReceiver {
    parser: NmeaParser,
    config: GnssConfig,
    buffer: Vec<u8, NMEA_MAX_LENGTH>,
    collecting: bool,
    last_fix: Option<PositionFix>,
    last_date: Option<Date>,
    accepted: u32,
    rejected: u32,
    diag: Diagnostics,
}

impl Default for GnssReceiver {
    fn default() -> Self {
        Self::new(GnssConfig::default())
    }
}

impl GnssReceiver {
    pub fn new(config: GnssConfig) -> Self {
        Self {
            parser: NmeaParser::new(config.require_checksum),
            config,
            buffer: Vec::new(),
            collecting: false,
            last_fix: None,
            last_date: None,
            accepted: 0,
            rejected: 0,
            diag: Diagnostics::silent(),
        }
    }

    pub fn with_diagnostics(mut self, diag: Diagnostics) -> Self {
        self.diag = diag;
        self
    }

    pub fn config(&self) -> &GnssConfig {
        &self.config
    }

    /// Feed raw receiver output. Partial sentences are kept until the rest
    /// arrives. Returns the number of fixes accepted.
    pub fn push(&mut self, bytes: &[u8], now_ms: u64) -> usize {
        let mut fixes = 0;
        for &byte in bytes {
            match byte {
                b'$' => {
                    self.buffer.clear();
                    self.collecting = true;
                    let _ = self.buffer.push(byte);
                }
                b'\n' if self.collecting => {
                    self.collecting = false;
                    let line = core::mem::take(&mut self.buffer);
                    match core::str::from_utf8(&line) {
                        Ok(sentence) => {
                            if let Ok(true) = self.push_sentence(sentence, now_ms) {
                                fixes += 1;
                            }
                        }
                        Err(_) => self.reject(NmeaError::ParseError),
                    }
                }
                _ if self.collecting => {
                    if self.buffer.push(byte).is_err() {
                        self.collecting = false;
                        self.buffer.clear();
                        self.reject(NmeaError::InvalidLength);
                    }
                }
                _ => {}
            }
        }
        fixes
    }

    /// Process one complete sentence. `Ok(true)` when it produced a new fix.
    pub fn push_sentence(&mut self, sentence: &str, now_ms: u64) -> Result<bool, NmeaError> {
        let parsed = match self.parser.parse(sentence) {
            Ok(parsed) => parsed,
            Err(NmeaError::UnsupportedSentence) => return Err(NmeaError::UnsupportedSentence),
            Err(error) => {
                self.reject(error);
                return Err(error);
            }
        };

        let fix = match parsed {
            Sentence::Gga(gga) => {
                let (Some(latitude), Some(longitude)) = (gga.latitude, gga.longitude) else {
                    return Ok(false);
                };
                if !gga.quality.has_fix() {
                    return Ok(false);
                }
                PositionFix {
                    time: gga.time,
                    date: self.last_date,
                    latitude: latitude.to_decimal_degrees(),
                    longitude: longitude.to_decimal_degrees(),
                    altitude_m: gga.altitude_m,
                    quality: gga.quality,
                    satellites: gga.satellites,
                    received_at_ms: now_ms,
                }
            }
            Sentence::Rmc(rmc) => {
                if rmc.date.is_some() {
                    self.last_date = rmc.date;
                }
                match (rmc.valid, rmc.latitude, rmc.longitude) {
                    (true, Some(latitude), Some(longitude)) => {
                        self.merge(rmc.time, latitude, longitude, now_ms)
                    }
                    _ => return Ok(false),
                }
            }
            Sentence::Gll(gll) => match (gll.valid, gll.latitude, gll.longitude) {
                (true, Some(latitude), Some(longitude)) => self.merge(gll.time, latitude, longitude, now_ms),
                _ => return Ok(false),
            },
        };

        self.accepted = self.accepted.wrapping_add(1);
        log_trace!(
            self.diag,
            COMPONENT,
            "fix {:.5},{:.5} ({:?}, {} satellites)",
            fix.latitude,
            fix.longitude,
            fix.quality,
            fix.satellites
        );
        self.last_fix = Some(fix);
        Ok(true)
    }

    /// Position-only sentences refine a fix of the same epoch and otherwise
    /// start a new one.
    fn merge(&self, time: UtcTime, latitude: Coordinate, longitude: Coordinate, now_ms: u64) -> PositionFix {
        let base = self.last_fix.filter(|fix| fix.time == time);
        PositionFix {
            time,
            date: self.last_date,
            latitude: latitude.to_decimal_degrees(),
            longitude: longitude.to_decimal_degrees(),
            altitude_m: base.and_then(|fix| fix.altitude_m),
            quality: base.map_or(FixQuality::Gps, |fix| fix.quality),
            satellites: base.map_or(0, |fix| fix.satellites),
            received_at_ms: now_ms,
        }
    }

    fn reject(&mut self, error: NmeaError) {
        self.rejected = self.rejected.wrapping_add(1);
        log_debug!(self.diag, COMPONENT, "dropped sentence: {:?}", error);
    }

    /// Last good fix with its age at `now_ms`.
    pub fn position(&self, now_ms: u64) -> Option<PositionReport> {
        let fix = self.last_fix?;
        let age_ms = now_ms.saturating_sub(fix.received_at_ms);
        Some(PositionReport {
            fix,
            age_ms,
            stale: age_ms > self.config.stale_after_ms as u64,
        })
    }

    pub fn last_fix(&self) -> Option<&PositionFix> {
        self.last_fix.as_ref()
    }

    /// Fixes accepted so far.
    pub fn accepted(&self) -> u32 {
        self.accepted
    }

    /// Sentences dropped for bad framing, checksum or content.
    pub fn rejected(&self) -> u32 {
        self.rejected
    }

    /// Forget the fix and any partial sentence.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.collecting = false;
        self.last_fix = None;
        self.last_date = None;
    }
}
