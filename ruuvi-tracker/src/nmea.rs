//! NMEA 0183 decoding, only what the tracker needs.
//!
//! A sentence is `$<talker><type>,<field>,...*HH\r\n`, the checksum `HH` being the XOR of every
//! byte between `$` and `*` in two hex digits. The decoder works on complete lines, the line
//! terminator may or may not still be attached.

use core::fmt::Write;
use core::str;

use heapless::{String, Vec};

/// Longest sentence the standard allows, `$` and `\r\n` included.
pub const MAX_SENTENCE: usize = 82;

const MAX_FIELDS: usize = 24;

/// Errors of the decoder. None of them is fatal, the GPS driver drops the sentence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum NmeaError {
    /// No `$` in the line.
    #[error("start of sentence not found")]
    MissingStart,
    /// No `*` after the payload.
    #[error("checksum not found")]
    MissingChecksum,
    /// The two characters after `*` are not hex digits.
    #[error("malformed checksum")]
    BadChecksumDigits,
    /// The transmitted checksum does not match the payload.
    #[error("checksum mismatch, computed {computed:02X} received {received:02X}")]
    ChecksumMismatch {
        /// XOR of the payload.
        computed: u8,
        /// What the sentence carried.
        received: u8,
    },
    /// The sentence ends before this field.
    #[error("field {0} missing")]
    MissingField(u8),
    /// This field could not be parsed.
    #[error("field {0} malformed")]
    BadField(u8),
    /// A parser was handed another sentence type.
    #[error("unexpected sentence type")]
    WrongSentence,
    /// The sentence does not fit [`MAX_SENTENCE`].
    #[error("sentence too long")]
    TooLong,
}

/// Sentence types the decoder understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum Sentence {
    /// Recommended minimum data: position, speed, heading, date and time.
    Rmc,
    /// Fix data: satellites and altitude.
    Gga,
    /// DOP and active satellites: fix type and dilution of precision.
    Gsa,
    /// Time and date, with a four digit year.
    Zda,
    /// Anything else, ignored.
    Other,
}

/// Fix dimension reported by GSA.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum FixType {
    /// No fix.
    #[default]
    None,
    /// Position without altitude.
    TwoD,
    /// Position and altitude.
    ThreeD,
}

/// UTC date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct Date {
    /// Full year. RMC only carries two digits, taken as 20xx.
    pub year: u16,
    /// 1 to 12.
    pub month: u8,
    /// 1 to 31.
    pub day: u8,
}

/// UTC time of day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct Time {
    /// 0 to 23.
    pub hour: u8,
    /// 0 to 59.
    pub minute: u8,
    /// 0 to 60.
    pub second: u8,
    /// 0 to 999.
    pub millisecond: u16,
}

/// Last known position, time and quality, updated in place sentence by sentence.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct Fix {
    /// Fix dimension.
    pub fix_type: FixType,
    /// Satellites in use.
    pub satellites: u8,
    /// Latitude in decimal degrees, south negative.
    pub lat: Option<f64>,
    /// Longitude in decimal degrees, west negative.
    pub lon: Option<f64>,
    /// Ground speed in knots.
    pub speed: Option<f64>,
    /// Course over ground in degrees.
    pub heading: Option<f64>,
    /// Altitude above mean sea level in meters.
    pub altitude: Option<f64>,
    /// Position dilution of precision.
    pub pdop: Option<f64>,
    /// Horizontal dilution of precision.
    pub hdop: Option<f64>,
    /// Vertical dilution of precision.
    pub vdop: Option<f64>,
    /// UTC date.
    pub date: Option<Date>,
    /// UTC time.
    pub time: Option<Time>,
    /// When the fix was last changed, set by the driver.
    pub last_update: Option<ruuvi_time::Instant>,
}

impl Fix {
    /// True once position, date and time are all known.
    pub fn is_valid(&self) -> bool {
        self.lat.is_some() && self.lon.is_some() && self.date.is_some() && self.time.is_some()
    }

    /// Verify the checksum of `line` and apply it, unknown sentence types are ignored.
    pub fn update(&mut self, line: &[u8]) -> Result<Sentence, NmeaError> {
        let computed = checksum(line)?;
        let received = transmitted_checksum(line)?;
        if computed != received {
            return Err(NmeaError::ChecksumMismatch { computed, received });
        }

        let sentence = sentence_type(line)?;
        match sentence {
            Sentence::Rmc => parse_rmc(line, self)?,
            Sentence::Gga => parse_gga(line, self)?,
            Sentence::Gsa => parse_gsa(line, self)?,
            Sentence::Zda => parse_zda(line, self)?,
            Sentence::Other => {}
        }
        Ok(sentence)
    }

    fn clear_position(&mut self) {
        self.lat = None;
        self.lon = None;
    }
}

/// The bytes between `$` and `*` (or the end of line), and the index right after them.
fn payload(line: &[u8]) -> Result<(&[u8], usize), NmeaError> {
    let start = line
        .iter()
        .position(|&b| b == b'$')
        .ok_or(NmeaError::MissingStart)?
        + 1;
    let end = line[start..]
        .iter()
        .position(|&b| matches!(b, b'*' | b'\r' | b'\n'))
        .map_or(line.len(), |n| start + n);
    Ok((&line[start..end], end))
}

/// XOR of the bytes between `$` and `*`, or the end of the line if there is no `*`.
pub fn checksum(line: &[u8]) -> Result<u8, NmeaError> {
    let (payload, _) = payload(line)?;
    Ok(payload.iter().fold(0, |sum, b| sum ^ b))
}

fn transmitted_checksum(line: &[u8]) -> Result<u8, NmeaError> {
    let (_, end) = payload(line)?;
    if line.get(end) != Some(&b'*') {
        return Err(NmeaError::MissingChecksum);
    }
    let digits = line
        .get(end + 1..end + 3)
        .and_then(|digits| str::from_utf8(digits).ok())
        .ok_or(NmeaError::BadChecksumDigits)?;
    u8::from_str_radix(digits, 16).map_err(|_| NmeaError::BadChecksumDigits)
}

/// True if the `*HH` suffix matches the payload, hex digits in either case.
pub fn verify(line: &[u8]) -> Result<bool, NmeaError> {
    Ok(checksum(line)? == transmitted_checksum(line)?)
}

/// `sentence` (starting with `$`, without `*` or terminator) with its `*HH` appended.
pub fn with_checksum(sentence: &str) -> Result<String<MAX_SENTENCE>, NmeaError> {
    let sum = checksum(sentence.as_bytes())?;
    let mut out = String::new();
    write!(out, "{}*{:02X}", sentence, sum).map_err(|_| NmeaError::TooLong)?;
    Ok(out)
}

/// The sentence type of `line`, from its address field.
pub fn sentence_type(line: &[u8]) -> Result<Sentence, NmeaError> {
    let (payload, _) = payload(line)?;
    let address = payload.split(|&b| b == b',').next().unwrap_or(&[]);
    if address.len() != 5 || !matches!(&address[..2], b"GP" | b"GL" | b"GN") {
        return Ok(Sentence::Other);
    }
    Ok(match &address[2..] {
        b"RMC" => Sentence::Rmc,
        b"GGA" => Sentence::Gga,
        b"GSA" => Sentence::Gsa,
        b"ZDA" => Sentence::Zda,
        _ => Sentence::Other,
    })
}

struct Fields<'a> {
    fields: Vec<&'a [u8], MAX_FIELDS>,
}

impl<'a> Fields<'a> {
    fn new(line: &'a [u8], expected: Sentence) -> Result<Self, NmeaError> {
        if sentence_type(line)? != expected {
            return Err(NmeaError::WrongSentence);
        }
        let (payload, _) = payload(line)?;
        let fields = payload
            .split(|&b| b == b',')
            .take(MAX_FIELDS)
            .collect();
        Ok(Self { fields })
    }

    fn get(&self, index: u8) -> Result<&'a [u8], NmeaError> {
        self.fields
            .get(index as usize)
            .copied()
            .ok_or(NmeaError::MissingField(index))
    }

    fn text(&self, index: u8) -> Result<&'a str, NmeaError> {
        str::from_utf8(self.get(index)?).map_err(|_| NmeaError::BadField(index))
    }

    fn number(&self, index: u8) -> Result<Option<f64>, NmeaError> {
        let text = self.text(index)?;
        if text.is_empty() {
            return Ok(None);
        }
        text.parse()
            .map(Some)
            .map_err(|_| NmeaError::BadField(index))
    }

    /// `ddmm.mmmm` or `dddmm.mmmm` with its hemisphere field right after.
    fn coordinate(&self, index: u8, negative: u8) -> Result<Option<f64>, NmeaError> {
        let Some(value) = self.number(index)? else {
            return Ok(None);
        };
        let degrees = (value / 100.0) as i64 as f64;
        let decimal = degrees + (value - degrees * 100.0) / 60.0;
        match self.get(index + 1)? {
            [b] if *b == negative => Ok(Some(-decimal)),
            [_] => Ok(Some(decimal)),
            _ => Err(NmeaError::BadField(index + 1)),
        }
    }

    fn time(&self, index: u8) -> Result<Option<Time>, NmeaError> {
        let field = self.get(index)?;
        if field.is_empty() {
            return Ok(None);
        }
        let bad = NmeaError::BadField(index);
        let (clock, fraction) = match field.iter().position(|&b| b == b'.') {
            Some(dot) => (&field[..dot], &field[dot + 1..]),
            None => (field, &[][..]),
        };
        if clock.len() != 6 {
            return Err(bad);
        }
        let mut millisecond = 0u16;
        let mut scale = 100;
        for &b in fraction.iter().take(3) {
            millisecond += digit(b).ok_or(bad)? as u16 * scale;
            scale /= 10;
        }
        Ok(Some(Time {
            hour: two_digits(&clock[0..2]).ok_or(bad)?,
            minute: two_digits(&clock[2..4]).ok_or(bad)?,
            second: two_digits(&clock[4..6]).ok_or(bad)?,
            millisecond,
        }))
    }

    fn date(&self, index: u8) -> Result<Option<Date>, NmeaError> {
        let field = self.get(index)?;
        if field.is_empty() {
            return Ok(None);
        }
        let bad = NmeaError::BadField(index);
        if field.len() != 6 {
            return Err(bad);
        }
        Ok(Some(Date {
            day: two_digits(&field[0..2]).ok_or(bad)?,
            month: two_digits(&field[2..4]).ok_or(bad)?,
            year: 2000 + two_digits(&field[4..6]).ok_or(bad)? as u16,
        }))
    }
}

fn four_digits(field: &[u8]) -> Option<u16> {
    match field {
        [a, b, c, d] => {
            let century = u16::from(two_digits(&[*a, *b])?);
            Some(century * 100 + u16::from(two_digits(&[*c, *d])?))
        }
        _ => None,
    }
}

fn digit(b: u8) -> Option<u8> {
    b.is_ascii_digit().then(|| b - b'0')
}

fn two_digits(field: &[u8]) -> Option<u8> {
    match field {
        [tens, ones] => Some(digit(*tens)? * 10 + digit(*ones)?),
        _ => None,
    }
}

/// Apply an RMC sentence: time, date, and with status `A` position, speed and heading. Status
/// `V` (receiver warning) clears the position.
pub fn parse_rmc(line: &[u8], fix: &mut Fix) -> Result<(), NmeaError> {
    let fields = Fields::new(line, Sentence::Rmc)?;
    let time = fields.time(1)?;
    let date = fields.date(9)?;

    match fields.get(2)? {
        b"A" => {
            let lat = fields.coordinate(3, b'S')?;
            let lon = fields.coordinate(5, b'W')?;
            let speed = fields.number(7)?;
            let heading = fields.number(8)?;
            fix.lat = lat;
            fix.lon = lon;
            fix.speed = speed;
            fix.heading = heading;
        }
        b"V" => fix.clear_position(),
        _ => return Err(NmeaError::BadField(2)),
    }
    fix.time = time;
    fix.date = date;
    Ok(())
}

/// Apply a GGA sentence: satellites in use and altitude.
pub fn parse_gga(line: &[u8], fix: &mut Fix) -> Result<(), NmeaError> {
    let fields = Fields::new(line, Sentence::Gga)?;
    let satellites = match fields.text(7)? {
        "" => 0,
        text => text.parse().map_err(|_| NmeaError::BadField(7))?,
    };
    let altitude = fields.number(9)?;
    fix.satellites = satellites;
    fix.altitude = altitude;
    Ok(())
}

/// Apply a GSA sentence: fix type and dilution of precision. No fix clears the position.
pub fn parse_gsa(line: &[u8], fix: &mut Fix) -> Result<(), NmeaError> {
    let fields = Fields::new(line, Sentence::Gsa)?;
    let fix_type = match fields.get(2)? {
        b"1" => FixType::None,
        b"2" => FixType::TwoD,
        b"3" => FixType::ThreeD,
        _ => return Err(NmeaError::BadField(2)),
    };
    let pdop = fields.number(15)?;
    let hdop = fields.number(16)?;
    let vdop = fields.number(17)?;

    fix.fix_type = fix_type;
    if fix_type == FixType::None {
        fix.clear_position();
    }
    fix.pdop = pdop;
    fix.hdop = hdop;
    fix.vdop = vdop;
    Ok(())
}

/// Apply a ZDA sentence: time and date. Empty date fields leave the date unknown.
pub fn parse_zda(line: &[u8], fix: &mut Fix) -> Result<(), NmeaError> {
    let fields = Fields::new(line, Sentence::Zda)?;
    let time = fields.time(1)?;
    let date = match (fields.get(2)?, fields.get(3)?, fields.get(4)?) {
        (b"", b"", b"") => None,
        (day, month, year) => Some(Date {
            day: two_digits(day).ok_or(NmeaError::BadField(2))?,
            month: two_digits(month).ok_or(NmeaError::BadField(3))?,
            year: four_digits(year).ok_or(NmeaError::BadField(4))?,
        }),
    };
    fix.time = time;
    fix.date = date;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const RMC: &[u8] =
        b"$GPRMC,193202.000,A,6007.2666,N,02423.8747,E,0.16,354.15,140315,,,A*68\r\n";
    const GGA: &[u8] =
        b"$GPGGA,193202.000,6007.2666,N,02423.8747,E,1,08,1.01,25.3,M,17.8,M,,*5B";
    const GSA: &[u8] = b"$GPGSA,A,3,10,07,05,02,29,04,08,13,,,,,1.72,1.03,1.38*0A";

    fn close(a: Option<f64>, b: f64) -> bool {
        a.is_some_and(|a| (a - b) * (a - b) < 1e-12)
    }

    #[test]
    fn checksum_with_and_without_star() {
        assert_eq!(checksum(RMC), Ok(0x68));
        assert_eq!(checksum(b"$PMTK161,0"), Ok(0x28));
        assert_eq!(checksum(b"garbage $PMTK161,0\r\n"), Ok(0x28));
        assert_eq!(checksum(b"PMTK161,0"), Err(NmeaError::MissingStart));
    }

    #[test]
    fn verify_is_case_insensitive() {
        assert_eq!(verify(b"$GPGSA,A,3,10,07,05,02,29,04,08,13,,,,,1.72,1.03,1.38*0a"), Ok(true));
        assert_eq!(verify(GSA), Ok(true));
        assert_eq!(verify(b"$PMTK161,0*29"), Ok(false));
        assert_eq!(verify(b"$PMTK161,0"), Err(NmeaError::MissingChecksum));
        assert_eq!(verify(b"$PMTK161,0*Z8"), Err(NmeaError::BadChecksumDigits));
        assert_eq!(verify(b"$PMTK161,0*2"), Err(NmeaError::BadChecksumDigits));
    }

    #[test]
    fn pmtk_commands() {
        assert_eq!(
            with_checksum("$PMTK300,1000,0,0,0,0").unwrap().as_str(),
            "$PMTK300,1000,0,0,0,0*1C"
        );
        assert_eq!(with_checksum("$PMTK161,0").unwrap().as_str(), "$PMTK161,0*28");
    }

    #[test]
    fn rmc_position_date_and_time() {
        let mut fix = Fix::default();
        assert_eq!(fix.update(RMC), Ok(Sentence::Rmc));
        assert!(close(fix.lat, 60.121110));
        assert!(close(fix.lon, 24.397911666666666));
        assert_eq!(fix.speed, Some(0.16));
        assert_eq!(fix.heading, Some(354.15));
        assert_eq!(
            fix.date,
            Some(Date {
                year: 2015,
                month: 3,
                day: 14
            })
        );
        assert_eq!(
            fix.time,
            Some(Time {
                hour: 19,
                minute: 32,
                second: 2,
                millisecond: 0
            })
        );
        assert!(fix.is_valid());
    }

    #[test]
    fn southern_and_western_hemispheres() {
        let mut fix = Fix::default();
        let line = b"$GNRMC,000001.000,A,3351.0000,S,15112.5000,W,1.0,90.0,010100,,,A*41";
        assert_eq!(fix.update(line), Ok(Sentence::Rmc));
        assert!(close(fix.lat, -33.85));
        assert!(close(fix.lon, -151.208333333333333));
        assert_eq!(fix.date.map(|d| d.year), Some(2000));
    }

    #[test]
    fn warning_status_clears_position() {
        let mut fix = Fix::default();
        fix.update(RMC).unwrap();
        assert_eq!(fix.update(b"$GPRMC,193203.000,V,,,,,,,140315,,,N*45"), Ok(Sentence::Rmc));
        assert_eq!(fix.lat, None);
        assert_eq!(fix.lon, None);
        assert_eq!(fix.time.map(|t| t.second), Some(3));
        assert!(!fix.is_valid());
    }

    #[test]
    fn gga_and_gsa() {
        let mut fix = Fix::default();
        fix.update(RMC).unwrap();
        assert_eq!(fix.update(GGA), Ok(Sentence::Gga));
        assert_eq!(fix.satellites, 8);
        assert_eq!(fix.altitude, Some(25.3));

        assert_eq!(fix.update(GSA), Ok(Sentence::Gsa));
        assert_eq!(fix.fix_type, FixType::ThreeD);
        assert_eq!(fix.pdop, Some(1.72));
        assert_eq!(fix.hdop, Some(1.03));
        assert_eq!(fix.vdop, Some(1.38));

        assert_eq!(fix.update(b"$GPGSA,A,1,,,,,,,,,,,,,,,*1E"), Ok(Sentence::Gsa));
        assert_eq!(fix.fix_type, FixType::None);
        assert_eq!(fix.lat, None);
        assert_eq!(fix.pdop, None);
    }

    #[test]
    fn rejects_bad_input() {
        let mut fix = Fix::default();
        assert_eq!(
            fix.update(b"$GPRMC,193202.000,A,6007.2666,N,02423.8747,E,0.16,354.15,140315,,,A*76"),
            Err(NmeaError::ChecksumMismatch {
                computed: 0x68,
                received: 0x76
            })
        );
        assert_eq!(fix, Fix::default());
        assert_eq!(fix.update(b"$GPTXT,01,01,02,ANTSTATUS=OK*3B"), Ok(Sentence::Other));
        assert_eq!(parse_gga(RMC, &mut fix), Err(NmeaError::WrongSentence));
        assert_eq!(
            parse_rmc(b"$GPRMC,193202.000,A,6007.2666", &mut fix),
            Err(NmeaError::MissingField(9))
        );
        assert_eq!(fix, Fix::default());
    }

    #[test]
    fn zda_time_and_full_year() {
        let mut fix = Fix::default();
        fix.update(RMC).unwrap();
        assert_eq!(fix.update(b"$GNZDA,000105.500,01,01,2100,,*4A"), Ok(Sentence::Zda));
        assert_eq!(
            fix.date,
            Some(Date {
                year: 2100,
                month: 1,
                day: 1
            })
        );
        assert_eq!(
            fix.time,
            Some(Time {
                hour: 0,
                minute: 1,
                second: 5,
                millisecond: 500
            })
        );
        // Position is not touched.
        assert!(fix.is_valid());

        assert_eq!(fix.update(b"$GPZDA,,,,,,*48"), Ok(Sentence::Zda));
        assert_eq!(fix.date, None);
        assert_eq!(fix.time, None);
        assert_eq!(
            parse_zda(b"$GPZDA,193202.000,14,03,15,,", &mut fix),
            Err(NmeaError::BadField(4))
        );
        assert_eq!(parse_zda(b"$GPZDA,193202.000,14", &mut fix), Err(NmeaError::MissingField(3)));
    }

    #[test]
    fn fractional_seconds() {
        let mut fix = Fix::default();
        parse_rmc(b"$GPRMC,235959.25,V,,,,,,,311299,,,N", &mut fix).unwrap();
        assert_eq!(
            fix.time,
            Some(Time {
                hour: 23,
                minute: 59,
                second: 59,
                millisecond: 250
            })
        );
    }
}
