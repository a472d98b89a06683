use chrono::{
    offset::{LocalResult, TimeZone, Utc},
    DateTime, Datelike, Timelike,
};
use std::fmt;
use std::io::{self, Write};

use byteorder::{WriteBytesExt, LE};
use winnow::{
    binary::{le_u16, le_u64},
    seq, PResult, Parser, Partial,
};

/// A timestamp in MS-DOS format
///
/// Represents dates from year 1980 to 2107, with 2 second precision.
#[derive(Clone, Copy, Eq, PartialEq, Default)]
pub struct MsdosTimestamp {
    /// Time in 2-second intervals
    pub time: u16,

    /// Date in MS-DOS format, cf. <https://docs.microsoft.com/en-us/windows/win32/api/winbase/nf-winbase-dosdatetimetofiletime>
    pub date: u16,
}

impl fmt::Debug for MsdosTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.to_datetime() {
            Some(dt) => write!(f, "MsdosTimestamp({})", dt),
            None => write!(f, "MsdosTimestamp(?)"),
        }
    }
}

impl MsdosTimestamp {
    /// Parser for MS-DOS timestamps
    pub fn parser(i: &mut Partial<&'_ [u8]>) -> PResult<Self> {
        seq! {Self {
            time: le_u16,
            date: le_u16,
        }}
        .parse_next(i)
    }

    /// Serialize, mirroring [MsdosTimestamp::parser]
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u16::<LE>(self.time)?;
        w.write_u16::<LE>(self.date)
    }

    /// Attempts to convert to a chrono UTC date time
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        // see https://docs.microsoft.com/en-us/windows/win32/api/winbase/nf-winbase-dosdatetimetofiletime
        let date = match {
            // bits 0-4: day of the month (1-31)
            let d = (self.date & 0b1_1111) as u32;
            // bits 5-8: month (1 = january, 2 = february and so on)
            let m = ((self.date >> 5) & 0b1111) as u32;
            // bits 9-15: year offset from 1980
            let y = ((self.date >> 9) + 1980) as i32;
            Utc.with_ymd_and_hms(y, m, d, 0, 0, 0)
        } {
            LocalResult::Single(date) => date,
            _ => return None,
        };

        // bits 0-4: second divided by 2
        let s = (self.time & 0b1_1111) as u32 * 2;
        // bits 5-10: minute (0-59)
        let m = (self.time >> 5 & 0b11_1111) as u32;
        // bits 11-15: hour (0-23 on a 24-hour clock)
        let h = (self.time >> 11) as u32;
        date.with_hour(h)?.with_minute(m)?.with_second(s)
    }

    /// Convert a calendar time, clamping anything outside the representable
    /// range to 1980-01-01 00:00:00 or 2107-12-31 23:59:58.
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        let year = dt.year();
        if year < 1980 {
            return Self { time: 0, date: 1 << 5 | 1 };
        }
        if year > 2107 {
            return Self {
                // 23:59:58
                time: 23 << 11 | 59 << 5 | 29,
                date: 127 << 9 | 12 << 5 | 31,
            };
        }

        let date = ((year - 1980) as u16) << 9 | (dt.month() as u16) << 5 | dt.day() as u16;
        // seconds 59-60 round down to 58, not up into the next minute
        let time =
            (dt.hour() as u16) << 11 | (dt.minute() as u16) << 5 | (dt.second().min(58) / 2) as u16;
        Self { time, date }
    }
}

/// A timestamp in NTFS format.
#[derive(Clone, Copy, Eq, PartialEq)]
pub struct NtfsTimestamp {
    /// Timestamp in 100ns intervals since 1601-01-01 00:00:00 UTC
    pub timestamp: u64,
}

/// Windows timestamp resolution: 100ns ticks
const NTFS_TICKS_PER_SECOND: u64 = 10_000_000;

/// Seconds between 1601-01-01 and 1970-01-01
const NTFS_EPOCH_OFFSET: i64 = 11_644_473_600;

impl fmt::Debug for NtfsTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.to_datetime() {
            Some(dt) => write!(f, "NtfsTimestamp({})", dt),
            None => write!(f, "NtfsTimestamp(?)"),
        }
    }
}

impl NtfsTimestamp {
    /// Parse an NTFS timestamp from a byte slice
    pub fn parser(i: &mut Partial<&'_ [u8]>) -> PResult<Self> {
        le_u64.map(|timestamp| Self { timestamp }).parse_next(i)
    }

    /// Serialize, mirroring [NtfsTimestamp::parser]
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u64::<LE>(self.timestamp)
    }

    /// Attempts to convert to a chrono UTC date time
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        let secs = (self.timestamp / NTFS_TICKS_PER_SECOND) as i64;
        let nsecs = ((self.timestamp % NTFS_TICKS_PER_SECOND) * 100) as u32;
        match Utc.timestamp_opt(secs - NTFS_EPOCH_OFFSET, nsecs) {
            LocalResult::Single(date) => Some(date),
            _ => None,
        }
    }

    /// Convert a calendar time; anything before 1601 clamps to 0.
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        let secs = dt.timestamp() + NTFS_EPOCH_OFFSET;
        if secs < 0 {
            return Self { timestamp: 0 };
        }
        let ticks = (secs as u64) * NTFS_TICKS_PER_SECOND
            + (dt.timestamp_subsec_nanos() as u64).min(999_999_999) / 100;
        Self { timestamp: ticks }
    }
}

/// Convert a 32-bit UNIX timestamp (seconds since epoch) to calendar time.
pub fn unix_to_datetime(secs: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0).single()
}

/// Convert calendar time to a 32-bit UNIX timestamp, clamping to the
/// representable range.
pub fn datetime_to_unix(dt: DateTime<Utc>) -> i32 {
    dt.timestamp().clamp(i32::MIN as i64, i32::MAX as i64) as i32
}

pub(crate) fn zero_datetime() -> DateTime<Utc> {
    Utc.timestamp_opt(0, 0).single().unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(
        (y, mo, d): (i32, u32, u32),
        (h, mi, s): (u32, u32, u32),
    ) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).single().unwrap()
    }

    #[test]
    fn msdos_round_trip_two_second_resolution() {
        let dt = utc((2018, 11, 17), (10, 38, 30));
        let ts = MsdosTimestamp::from_datetime(dt);
        assert_eq!(ts.to_datetime(), Some(dt));

        // odd seconds round down
        let dt = utc((2018, 11, 17), (10, 38, 31));
        let ts = MsdosTimestamp::from_datetime(dt);
        assert_eq!(ts.to_datetime(), Some(utc((2018, 11, 17), (10, 38, 30))));
    }

    #[test]
    fn msdos_clamps_out_of_range() {
        let ts = MsdosTimestamp::from_datetime(utc((1969, 7, 20), (20, 17, 0)));
        assert_eq!(ts.to_datetime(), Some(utc((1980, 1, 1), (0, 0, 0))));

        let ts = MsdosTimestamp::from_datetime(utc((2150, 1, 1), (0, 0, 0)));
        assert_eq!(ts.to_datetime(), Some(utc((2107, 12, 31), (23, 59, 58))));
    }

    #[test]
    fn ntfs_round_trip() {
        let dt = utc((2018, 11, 17), (10, 38, 30));
        let ts = NtfsTimestamp::from_datetime(dt);
        assert_eq!(ts.to_datetime(), Some(dt));
    }

    #[test]
    fn ntfs_clamps_before_1601() {
        let ts = NtfsTimestamp::from_datetime(utc((1500, 1, 1), (0, 0, 0)));
        assert_eq!(ts.timestamp, 0);
    }

    #[test]
    fn unix_clamps_to_32_bits() {
        let dt = utc((2200, 1, 1), (0, 0, 0));
        assert_eq!(datetime_to_unix(dt), i32::MAX);
    }
}
