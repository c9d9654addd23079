//! NMEA 0183 sentence parser
//!
//! Parses the position-bearing sentences (GGA, RMC and GLL) from any talker
//! (`GP`, `GN`, `GL`, `GA`, ...). Sentences are accepted with or without the
//! trailing `\r\n`.

use heapless::Vec;
use serde::Serialize;

use super::FixQuality;

/// Maximum length of an NMEA sentence including \r\n
pub const NMEA_MAX_LENGTH: usize = 82;

const MAX_FIELDS: usize = 24;

/// Sentence formatter, the three letters after the talker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SentenceKind {
    /// GGA - fix data
    Gga,
    /// RMC - recommended minimum data
    Rmc,
    /// GLL - geographic position
    Gll,
    /// Anything else
    Other,
}

/// Hemisphere of a coordinate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Hemisphere {
    /// North
    North,
    /// South
    South,
    /// East
    East,
    /// West
    West,
}

impl Hemisphere {
    fn from_field(field: &str) -> Result<Self, NmeaError> {
        match field {
            "N" => Ok(Hemisphere::North),
            "S" => Ok(Hemisphere::South),
            "E" => Ok(Hemisphere::East),
            "W" => Ok(Hemisphere::West),
            _ => Err(NmeaError::ParseError),
        }
    }
}

/// Latitude or longitude as transmitted: degrees and decimal minutes
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinate {
    /// Whole degrees
    pub degrees: u16,
    /// Decimal minutes
    pub minutes: f64,
    /// Sign of the coordinate
    pub hemisphere: Hemisphere,
}

impl Coordinate {
    /// Signed decimal degrees; south and west are negative.
    pub fn to_decimal_degrees(&self) -> f64 {
        let decimal = self.degrees as f64 + self.minutes / 60.0;
        match self.hemisphere {
            Hemisphere::South | Hemisphere::West => -decimal,
            Hemisphere::North | Hemisphere::East => decimal,
        }
    }
}

/// UTC time of day
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct UtcTime {
    /// Hour (0-23)
    pub hour: u8,
    /// Minute (0-59)
    pub minute: u8,
    /// Second (0-60)
    pub second: u8,
    /// Fractional second in milliseconds
    pub millis: u16,
}

/// Calendar date
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Date {
    /// Day of month (1-31)
    pub day: u8,
    /// Month (1-12)
    pub month: u8,
    /// Four-digit year
    pub year: u16,
}

/// GGA - fix data
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Gga {
    /// UTC time of the fix
    pub time: UtcTime,
    /// Latitude; `None` while there is no fix
    pub latitude: Option<Coordinate>,
    /// Longitude; `None` while there is no fix
    pub longitude: Option<Coordinate>,
    /// Fix quality indicator
    pub quality: FixQuality,
    /// Satellites used in the fix
    pub satellites: u8,
    /// Horizontal dilution of precision
    pub hdop: Option<f32>,
    /// Altitude above mean sea level in meters
    pub altitude_m: Option<f32>,
}

/// RMC - recommended minimum data
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rmc {
    /// UTC time of the fix
    pub time: UtcTime,
    /// Status `A`
    pub valid: bool,
    /// Latitude
    pub latitude: Option<Coordinate>,
    /// Longitude
    pub longitude: Option<Coordinate>,
    /// Speed over ground in knots
    pub speed_knots: Option<f32>,
    /// Course over ground in degrees
    pub course_deg: Option<f32>,
    /// Date of the fix
    pub date: Option<Date>,
}

/// GLL - geographic position
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Gll {
    /// Latitude
    pub latitude: Option<Coordinate>,
    /// Longitude
    pub longitude: Option<Coordinate>,
    /// UTC time of the position
    pub time: UtcTime,
    /// Status `A`
    pub valid: bool,
}

/// Parsed sentence
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Sentence {
    /// GGA sentence
    Gga(Gga),
    /// RMC sentence
    Rmc(Rmc),
    /// GLL sentence
    Gll(Gll),
}

/// NMEA parsing errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NmeaError {
    /// Sentence is too short or too long
    InvalidLength,
    /// Sentence doesn't start with '$'
    InvalidStart,
    /// Address field is not five uppercase letters followed by a comma
    InvalidPrefix,
    /// No `*hh` checksum although one is required
    MissingChecksum,
    /// Checksum validation failed
    InvalidChecksum,
    /// A field could not be parsed
    ParseError,
    /// Sentence type is not supported
    UnsupportedSentence,
}

#[cfg(feature = "defmt")]
impl defmt::Format for NmeaError {
    fn format(&self, f: defmt::Formatter) {
        match self {
            NmeaError::InvalidLength => defmt::write!(f, "InvalidLength"),
            NmeaError::InvalidStart => defmt::write!(f, "InvalidStart"),
            NmeaError::InvalidPrefix => defmt::write!(f, "InvalidPrefix"),
            NmeaError::MissingChecksum => defmt::write!(f, "MissingChecksum"),
            NmeaError::InvalidChecksum => defmt::write!(f, "InvalidChecksum"),
            NmeaError::ParseError => defmt::write!(f, "ParseError"),
            NmeaError::UnsupportedSentence => defmt::write!(f, "UnsupportedSentence"),
        }
    }
}

/// NMEA sentence parser
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NmeaParser {
    require_checksum: bool,
}

impl Default for NmeaParser {
    fn default() -> Self {
        Self::new(true)
    }
}

impl NmeaParser {
    /// Parser that rejects sentences without `*hh` when `require_checksum`
    /// is set. A checksum that is present is always verified.
    pub const fn new(require_checksum: bool) -> Self {
        Self { require_checksum }
    }

    /// XOR of every byte between `$` and `*`.
    pub fn checksum(sentence: &str) -> u8 {
        sentence
            .bytes()
            .skip_while(|&byte| byte == b'$')
            .take_while(|&byte| byte != b'*' && byte != b'\r' && byte != b'\n')
            .fold(0, |sum, byte| sum ^ byte)
    }

    /// Formatter of a sentence, ignoring the talker.
    pub fn kind(sentence: &str) -> SentenceKind {
        match sentence.get(3..6) {
            Some("GGA") => SentenceKind::Gga,
            Some("RMC") => SentenceKind::Rmc,
            Some("GLL") => SentenceKind::Gll,
            _ => SentenceKind::Other,
        }
    }

    /// Validate framing and checksum, returning the fields after the address.
    fn fields<'s>(&self, sentence: &'s str) -> Result<Vec<&'s str, MAX_FIELDS>, NmeaError> {
        let sentence = sentence.trim_end_matches(['\r', '\n']);
        if sentence.len() < 7 || sentence.len() + 2 > NMEA_MAX_LENGTH {
            return Err(NmeaError::InvalidLength);
        }
        let bytes = sentence.as_bytes();
        if bytes[0] != b'$' {
            return Err(NmeaError::InvalidStart);
        }
        if !bytes[1..6].iter().all(u8::is_ascii_uppercase) || bytes[6] != b',' {
            return Err(NmeaError::InvalidPrefix);
        }

        let body = match sentence.rsplit_once('*') {
            Some((body, checksum)) => {
                let expected = u8::from_str_radix(checksum, 16).map_err(|_| NmeaError::InvalidChecksum)?;
                if checksum.len() != 2 || Self::checksum(body) != expected {
                    return Err(NmeaError::InvalidChecksum);
                }
                body
            }
            None if self.require_checksum => return Err(NmeaError::MissingChecksum),
            None => sentence,
        };

        let mut fields = Vec::new();
        for field in body[7..].split(',') {
            fields.push(field).map_err(|_| NmeaError::ParseError)?;
        }
        Ok(fields)
    }

    /// Parse one sentence.
    pub fn parse(&self, sentence: &str) -> Result<Sentence, NmeaError> {
        let fields = self.fields(sentence)?;
        let field = |index: usize| fields.get(index).copied().unwrap_or("");
        match Self::kind(sentence) {
            SentenceKind::Gga => Ok(Sentence::Gga(Gga {
                time: parse_time(field(0))?,
                latitude: parse_coordinate(field(1), field(2))?,
                longitude: parse_coordinate(field(3), field(4))?,
                quality: FixQuality::from_indicator(optional::<u8>(field(5))?.unwrap_or(0)),
                satellites: optional(field(6))?.unwrap_or(0),
                hdop: optional(field(7))?,
                altitude_m: optional(field(8))?,
            })),
            SentenceKind::Rmc => Ok(Sentence::Rmc(Rmc {
                time: parse_time(field(0))?,
                valid: field(1) == "A",
                latitude: parse_coordinate(field(2), field(3))?,
                longitude: parse_coordinate(field(4), field(5))?,
                speed_knots: optional(field(6))?,
                course_deg: optional(field(7))?,
                date: match field(8) {
                    "" => None,
                    date => Some(parse_date(date)?),
                },
            })),
            SentenceKind::Gll => Ok(Sentence::Gll(Gll {
                latitude: parse_coordinate(field(0), field(1))?,
                longitude: parse_coordinate(field(2), field(3))?,
                time: parse_time(field(4))?,
                valid: field(5) == "A",
            })),
            SentenceKind::Other => Err(NmeaError::UnsupportedSentence),
        }
    }
}

fn optional<T: core::str::FromStr>(field: &str) -> Result<Option<T>, NmeaError> {
    if field.is_empty() {
        return Ok(None);
    }
    field.parse().map(Some).map_err(|_| NmeaError::ParseError)
}

/// Parse `ddmm.mmmm` / `dddmm.mmmm` with its hemisphere field. Both empty
/// means no position.
pub fn parse_coordinate(value: &str, hemisphere: &str) -> Result<Option<Coordinate>, NmeaError> {
    if value.is_empty() && hemisphere.is_empty() {
        return Ok(None);
    }
    let dot = value.find('.').unwrap_or(value.len());
    if dot < 3 {
        return Err(NmeaError::ParseError);
    }
    let (degrees, minutes) = value.split_at(dot - 2);
    let degrees: u16 = degrees.parse().map_err(|_| NmeaError::ParseError)?;
    let minutes: f64 = minutes.parse().map_err(|_| NmeaError::ParseError)?;
    if !(0.0..60.0).contains(&minutes) {
        return Err(NmeaError::ParseError);
    }
    Ok(Some(Coordinate {
        degrees,
        minutes,
        hemisphere: Hemisphere::from_field(hemisphere)?,
    }))
}

/// Parse `hhmmss` or `hhmmss.sss`.
pub fn parse_time(value: &str) -> Result<UtcTime, NmeaError> {
    let (whole, fraction) = value.split_once('.').unwrap_or((value, ""));
    if whole.len() != 6 || !whole.bytes().all(|b| b.is_ascii_digit()) {
        return Err(NmeaError::ParseError);
    }
    let number = |range: core::ops::Range<usize>| whole[range].parse::<u8>().map_err(|_| NmeaError::ParseError);
    let time = UtcTime {
        hour: number(0..2)?,
        minute: number(2..4)?,
        second: number(4..6)?,
        millis: parse_millis(fraction)?,
    };
    if time.hour > 23 || time.minute > 59 || time.second > 60 {
        return Err(NmeaError::ParseError);
    }
    Ok(time)
}

fn parse_millis(fraction: &str) -> Result<u16, NmeaError> {
    if !fraction.bytes().all(|b| b.is_ascii_digit()) {
        return Err(NmeaError::ParseError);
    }
    let mut millis = 0u16;
    for (i, digit) in fraction.bytes().chain(core::iter::repeat(b'0')).take(3).enumerate() {
        millis += (digit - b'0') as u16 * [100, 10, 1][i];
    }
    Ok(millis)
}

/// Parse `ddmmyy`; years before 80 are taken as 20xx.
pub fn parse_date(value: &str) -> Result<Date, NmeaError> {
    if value.len() != 6 || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(NmeaError::ParseError);
    }
    let number = |range: core::ops::Range<usize>| value[range].parse::<u8>().map_err(|_| NmeaError::ParseError);
    let day = number(0..2)?;
    let month = number(2..4)?;
    let short = number(4..6)? as u16;
    if day == 0 || day > 31 || month == 0 || month > 12 {
        return Err(NmeaError::ParseError);
    }
    let year = if short >= 80 { 1900 + short } else { 2000 + short };
    Ok(Date { day, month, year })
}
