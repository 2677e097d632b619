//! Wire formats of the telemetry characteristics (battery, clock, name).
//!
//! ```text
//! Battery (read):     [voltageHi][voltageLo][percent][charging]
//! Clock (read/write): [sec][min][hour][weekday 1-7][day][month][year-2000]
//!                     followed by optional [tzHour: i8][tzMinute: i8]
//! Device name:        raw UTF-8, at most 19 bytes on write
//! ```

/// Battery characteristic length.
pub const BATTERY_LEN: usize = 4;

/// Clock payload length without timezone.
pub const CLOCK_LEN: usize = 7;

/// Clock payload length with timezone.
pub const CLOCK_TZ_LEN: usize = 9;

/// Maximum device name length accepted by the firmware.
pub const MAX_DEVICE_NAME_LEN: usize = 19;

const SECS_PER_DAY: i64 = 86_400;

/// Decoded battery characteristic.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatteryStatus {
    /// Cell voltage in volts.
    pub voltage: f32,
    /// State of charge, 0-100.
    pub percent: u8,
    pub charging: bool,
}

impl BatteryStatus {
    /// Parse the 4-byte battery value. Extra trailing bytes are ignored.
    pub fn parse(raw: &[u8]) -> Option<Self> {
        if raw.len() < BATTERY_LEN {
            return None;
        }
        let millivolts = u16::from_be_bytes([raw[0], raw[1]]);
        Some(Self {
            voltage: f32::from(millivolts) / 1000.0,
            percent: raw[2],
            charging: raw[3] != 0,
        })
    }
}

/// Wall-clock time as stored by the device RTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceClock {
    pub seconds: u8,
    pub minutes: u8,
    pub hours: u8,
    /// ISO weekday, Monday = 1 … Sunday = 7.
    pub weekday: u8,
    pub day: u8,
    pub month: u8,
    pub year_since_2000: u8,
    /// UTC offset as (hours, minutes), both carrying the offset's sign.
    pub timezone: Option<(i8, i8)>,
}

impl DeviceClock {
    /// Build a clock from a Unix timestamp and a UTC offset in minutes.
    ///
    /// Calendar fields are local time. The year travels as a one-byte offset
    /// from 2000, so `None` is returned for dates before 2000 or after 2255.
    pub fn from_unix(unix_secs: i64, utc_offset_minutes: i32) -> Option<Self> {
        let local = unix_secs + i64::from(utc_offset_minutes) * 60;
        let days = local.div_euclid(SECS_PER_DAY);
        let secs_of_day = local.rem_euclid(SECS_PER_DAY);

        let (year, month, day) = civil_from_days(days);
        let year_since_2000 = u8::try_from(year - 2000).ok()?;

        // 1970-01-01 was a Thursday (ISO 4).
        let weekday = (days + 3).rem_euclid(7) + 1;

        let tz_hours = i8::try_from(utc_offset_minutes / 60).ok()?;
        let tz_minutes = i8::try_from(utc_offset_minutes % 60).ok()?;

        Some(Self {
            seconds: (secs_of_day % 60) as u8,
            minutes: ((secs_of_day / 60) % 60) as u8,
            hours: (secs_of_day / 3600) as u8,
            weekday: weekday as u8,
            day,
            month,
            year_since_2000,
            timezone: Some((tz_hours, tz_minutes)),
        })
    }

    /// Encode to 7 bytes, or 9 when a timezone is present.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(CLOCK_TZ_LEN);
        buf.extend_from_slice(&[
            self.seconds,
            self.minutes,
            self.hours,
            self.weekday,
            self.day,
            self.month,
            self.year_since_2000,
        ]);
        if let Some((hours, minutes)) = self.timezone {
            buf.push(hours as u8);
            buf.push(minutes as u8);
        }
        buf
    }

    /// Decode a 7- or 9-byte clock value. Other lengths are rejected.
    pub fn decode(raw: &[u8]) -> Option<Self> {
        let timezone = match raw.len() {
            CLOCK_LEN => None,
            CLOCK_TZ_LEN => Some((raw[7] as i8, raw[8] as i8)),
            _ => return None,
        };
        Some(Self {
            seconds: raw[0],
            minutes: raw[1],
            hours: raw[2],
            weekday: raw[3],
            day: raw[4],
            month: raw[5],
            year_since_2000: raw[6],
            timezone,
        })
    }

    /// Full year.
    #[inline]
    pub fn year(&self) -> u16 {
        2000 + u16::from(self.year_since_2000)
    }
}

/// Days since 1970-01-01 to (year, month, day) in the proleptic Gregorian
/// calendar.
fn civil_from_days(days: i64) -> (i64, u8, u8) {
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = doy - (153 * mp + 2) / 5 + 1;
    let month = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = yoe + era * 400 + i64::from(month <= 2);
    (year, month as u8, day as u8)
}

/// Encode a device name, truncating to 19 bytes on a character boundary.
pub fn encode_device_name(name: &str) -> Vec<u8> {
    let mut end = name.len().min(MAX_DEVICE_NAME_LEN);
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    name.as_bytes()[..end].to_vec()
}

/// Decode a device name read from the device. Invalid UTF-8 is replaced.
pub fn decode_device_name(raw: &[u8]) -> String {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..end]).into_owned()
}
