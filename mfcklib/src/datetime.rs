/*
 * mfck - datetime module.
 *
 * Copyright 2021 Lennart Lovstrand
 *
 * This file is part of mfck.
 *
 * mfck is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * mfck is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with mfck. If not, see <http://www.gnu.org/licenses/>.
 */

/*!
 * The ctime-style timestamp carried on mbox envelope lines:
 * `Www Mmm DD HH:MM[:SS] [ZONE ]YYYY[ ZONE]`.
 *
 * Parsed into a broken-down calendar time; no epoch conversion is ever
 * needed, so none is done.
 */

use crate::parser::Cursor;

pub const WEEKDAYS: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];
pub const MONTHS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

/// Broken-down calendar time as it appeared on an envelope line. Only
/// meaningful alongside a non-empty envelope sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvelopeDate {
    /// 0 = Sunday.
    pub wday: u8,
    /// 1-based day of month.
    pub mday: u8,
    /// 1-based month.
    pub mon: u8,
    pub year: u16,
    pub hour: u8,
    pub min: u8,
    pub sec: Option<u8>,
    /// Named or signed-numeric timezone, wherever it appeared.
    pub zone: Option<String>,
}

impl EnvelopeDate {
    /// The asctime(3) rendering used when an envelope line has to be
    /// reconstructed: `Www Mmm DD HH:MM:SS YYYY` with a space-padded day.
    pub fn to_ctime(&self) -> String {
        format!(
            "{} {} {:2} {:02}:{:02}:{:02} {}",
            WEEKDAYS[usize::from(self.wday) % 7],
            MONTHS[usize::from(self.mon - 1) % 12],
            self.mday,
            self.hour,
            self.min,
            self.sec.unwrap_or(0),
            self.year
        )
    }

    /// RFC-822 rendering, used when synthesizing a `Date:` header from the
    /// envelope.
    pub fn to_rfc822(&self) -> String {
        let mut out = format!(
            "{}, {:2} {} {} {:02}:{:02}:{:02}",
            WEEKDAYS[usize::from(self.wday) % 7],
            self.mday,
            MONTHS[usize::from(self.mon - 1) % 12],
            self.year,
            self.hour,
            self.min,
            self.sec.unwrap_or(0)
        );
        if let Some(zone) = self.zone.as_ref() {
            out.push(' ');
            out.push_str(zone);
        }
        out
    }
}

fn take_name3<const N: usize>(cur: &mut Cursor, table: [&str; N]) -> Option<u8> {
    for (i, name) in table.iter().enumerate() {
        if cur.take_literal(name.as_bytes(), false) {
            return Some(i as u8);
        }
    }
    None
}

fn take_two_digits(cur: &mut Cursor, max: u64) -> Option<u8> {
    let start = cur.pos();
    let val = cur.take_integer()?;
    if cur.pos() - start > 2 || val > max {
        cur.set_pos(start);
        return None;
    }
    Some(val as u8)
}

/// A timezone token: `+HHMM`/`-HHMM`, or a short alphabetic name. The name
/// is capped at five letters so trailing envelope garbage (`remote from
/// host`) is never mistaken for one.
fn take_zone(cur: &mut Cursor) -> Option<String> {
    let start = cur.pos();
    match cur.peek() {
        Some(sign @ (b'+' | b'-')) => {
            cur.advance(1);
            let digits_start = cur.pos();
            if cur.take_integer().is_some() && cur.pos() - digits_start == 4 {
                let mut zone = String::with_capacity(5);
                zone.push(sign as char);
                zone.push_str(std::str::from_utf8(&cur.base()[digits_start..cur.pos()]).unwrap());
                return Some(zone);
            }
            cur.set_pos(start);
            None
        }
        Some(c) if c.is_ascii_alphabetic() => {
            let mut len = 0;
            while matches!(cur.peek(), Some(c) if c.is_ascii_alphabetic()) {
                cur.advance(1);
                len += 1;
            }
            if len > 5 {
                cur.set_pos(start);
                return None;
            }
            Some(String::from_utf8(cur.base()[start..cur.pos()].to_vec()).unwrap())
        }
        _ => None,
    }
}

/// Parse the ctime of an envelope line at the cursor. On failure the cursor
/// is rewound to where it started.
pub fn parse_ctime(cur: &mut Cursor) -> Option<EnvelopeDate> {
    let start = cur.pos();
    let parsed = (|| {
        let wday = take_name3(cur, WEEKDAYS)?;
        if !cur.take_spaces() {
            return None;
        }
        let mon = take_name3(cur, MONTHS)? + 1;
        if !cur.take_spaces() {
            return None;
        }
        let mday = take_two_digits(cur, 31)?;
        if mday == 0 || !cur.take_spaces() {
            return None;
        }
        let hour = take_two_digits(cur, 23)?;
        if !cur.take_literal(b":", true) {
            return None;
        }
        let min = take_two_digits(cur, 59)?;
        let sec = if cur.take_literal(b":", true) {
            Some(take_two_digits(cur, 60)?)
        } else {
            None
        };
        // The zone may sit on either side of the year.
        let mut zone = None;
        if cur.take_spaces() {
            zone = take_zone(cur);
            if zone.is_some() && !cur.take_spaces() {
                return None;
            }
        }
        let digits_start = cur.pos();
        let year = cur.take_integer()?;
        if cur.pos() - digits_start != 4 {
            return None;
        }
        if zone.is_none() {
            let after_year = cur.pos();
            if cur.take_spaces() {
                zone = take_zone(cur);
                if zone.is_none() {
                    cur.set_pos(after_year);
                }
            } else {
                cur.set_pos(after_year);
            }
        }
        Some(EnvelopeDate {
            wday,
            mday,
            mon,
            year: year as u16,
            hour,
            min,
            sec,
            zone,
        })
    })();
    if parsed.is_none() {
        cur.set_pos(start);
    }
    parsed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(input: &[u8]) -> Option<EnvelopeDate> {
        let mut cur = Cursor::new(input);
        parse_ctime(&mut cur)
    }

    #[test]
    fn plain_asctime() {
        let date = parse(b"Wed Jan  1 00:00:00 2020").unwrap();
        assert_eq!(date.wday, 3);
        assert_eq!(date.mon, 1);
        assert_eq!(date.mday, 1);
        assert_eq!(date.sec, Some(0));
        assert_eq!(date.zone, None);
        assert_eq!(date.to_ctime(), "Wed Jan  1 00:00:00 2020");
    }

    #[test]
    fn seconds_are_optional() {
        let date = parse(b"Mon Mar 15 10:45 1999").unwrap();
        assert_eq!(date.sec, None);
        assert_eq!(date.to_ctime(), "Mon Mar 15 10:45:00 1999");
    }

    #[test]
    fn zone_before_or_after_year() {
        let before = parse(b"Fri Dec 24 23:59:59 GMT 2004").unwrap();
        assert_eq!(before.zone.as_deref(), Some("GMT"));
        assert_eq!(before.year, 2004);

        let after = parse(b"Fri Dec 24 23:59:59 2004 +0100").unwrap();
        assert_eq!(after.zone.as_deref(), Some("+0100"));
        assert_eq!(after.to_rfc822(), "Fri, 24 Dec 2004 23:59:59 +0100");
    }

    #[test]
    fn trailing_garbage_is_not_a_zone() {
        let mut cur = Cursor::new(b"Tue Jul  4 12:00:00 2000 remote from host\n");
        let date = parse_ctime(&mut cur).unwrap();
        assert_eq!(date.zone, None);
        assert_eq!(&cur.remaining()[..7], b" remote");
    }

    #[test]
    fn rejects_and_rewinds() {
        for bad in [
            &b"Xyz Jan  1 00:00:00 2020"[..],
            &b"Wed Foo  1 00:00:00 2020"[..],
            &b"Wed Jan 99 00:00:00 2020"[..],
            &b"Wed Jan  1 25:00:00 2020"[..],
            &b"Wed Jan  1 00:00:00 20"[..],
            &b"Wed Jan  1 000000 2020"[..],
        ] {
            let mut cur = Cursor::new(bad);
            assert!(parse_ctime(&mut cur).is_none(), "{:?}", bad);
            assert_eq!(cur.pos(), 0, "{:?}", bad);
        }
    }
}
