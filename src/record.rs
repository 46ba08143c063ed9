// SPDX-License-Identifier: Apache-2.0 OR MIT
// Record frame codec: fixed header + variable tail, transferred by ownership

use crate::error::Error;
use crate::level::Level;
use chrono::{DateTime, Datelike, Local, Timelike};
use std::fmt::Write as _;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// A single heap-allocated record frame. Header first, then the four
/// variable strings concatenated without separators.
pub type Frame = Box<[u8]>;

// Header layout (native endian):
//   level      u8      [0]
//   secs       u64     [1..9]
//   nanos      u32     [9..13]
//   tid        i32     [13..17]   (-1 when unavailable)
//   rank       u16     [17..19]
//   line       u32     [19..23]
//   file_len   u16     [23..25]
//   func_len   u16     [25..27]
//   logger_len u16     [27..29]
//   msg_len    u32     [29..33]
pub(crate) const HEADER_LEN: usize = 33;

/// Decoded fixed-size portion of a record frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHead {
    pub level: Level,
    /// Wall-clock seconds since the epoch; zero when the clock read failed.
    pub secs: u64,
    pub nanos: u32,
    /// Kernel thread id; None on platforms where it cannot be obtained.
    pub tid: Option<i32>,
    /// Caller-assigned 16-bit producer tag.
    pub rank: u16,
    pub line: u32,
}

/// Read the wall clock with nanosecond resolution. A clock that reads
/// before the epoch yields the zero timestamp; records keep flowing.
pub(crate) fn wall_clock() -> (u64, u32) {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(d) => (d.as_secs(), d.subsec_nanos()),
        Err(_) => (0, 0),
    }
}

/// Encode one record into a single frame allocation. Ownership of the frame
/// transfers to the data channel; nothing is copied again on the way out.
#[allow(clippy::too_many_arguments)]
pub fn encode(
    level: Level,
    timestamp: (u64, u32),
    tid: Option<i32>,
    rank: u16,
    file: &str,
    line: u32,
    func: &str,
    logger: &str,
    msg: &str,
) -> Frame {
    // Oversized location strings are clamped to what the header can carry.
    let file = clamp(file, u16::MAX as usize);
    let func = clamp(func, u16::MAX as usize);
    let logger = clamp(logger, u16::MAX as usize);
    let msg = clamp(msg, u32::MAX as usize);

    let mut buf = vec![0u8; HEADER_LEN + file.len() + func.len() + logger.len() + msg.len()];

    buf[0] = level.as_u8();
    buf[1..9].copy_from_slice(&timestamp.0.to_ne_bytes());
    buf[9..13].copy_from_slice(&timestamp.1.to_ne_bytes());
    buf[13..17].copy_from_slice(&tid.unwrap_or(-1).to_ne_bytes());
    buf[17..19].copy_from_slice(&rank.to_ne_bytes());
    buf[19..23].copy_from_slice(&line.to_ne_bytes());
    buf[23..25].copy_from_slice(&(file.len() as u16).to_ne_bytes());
    buf[25..27].copy_from_slice(&(func.len() as u16).to_ne_bytes());
    buf[27..29].copy_from_slice(&(logger.len() as u16).to_ne_bytes());
    buf[29..33].copy_from_slice(&(msg.len() as u32).to_ne_bytes());

    let mut at = HEADER_LEN;
    for part in [file, func, logger, msg] {
        buf[at..at + part.len()].copy_from_slice(part.as_bytes());
        at += part.len();
    }

    buf.into_boxed_slice()
}

/// Decode a frame into its header and the four tail strings, slicing
/// zero-copy out of the frame.
pub fn decode(frame: &Frame) -> Result<(RecordHead, &str, &str, &str, &str), Error> {
    if frame.len() < HEADER_LEN {
        return Err(Error::protocol(
            format!("frame of at least {HEADER_LEN} bytes"),
            format!("{} bytes", frame.len()),
        ));
    }

    let u16_at = |at: usize| u16::from_ne_bytes([frame[at], frame[at + 1]]);
    let u32_at = |at: usize| {
        u32::from_ne_bytes([frame[at], frame[at + 1], frame[at + 2], frame[at + 3]])
    };

    let level = Level::from_u8(frame[0])
        .ok_or_else(|| Error::protocol("level 0..=11", format!("level {}", frame[0])))?;
    let mut secs_bytes = [0u8; 8];
    secs_bytes.copy_from_slice(&frame[1..9]);
    let tid = i32::from_ne_bytes([frame[13], frame[14], frame[15], frame[16]]);

    let head = RecordHead {
        level,
        secs: u64::from_ne_bytes(secs_bytes),
        nanos: u32_at(9),
        tid: (tid >= 0).then_some(tid),
        rank: u16_at(17),
        line: u32_at(19),
    };

    let file_len = u16_at(23) as usize;
    let func_len = u16_at(25) as usize;
    let logger_len = u16_at(27) as usize;
    let msg_len = u32_at(29) as usize;

    let expected = HEADER_LEN + file_len + func_len + logger_len + msg_len;
    if frame.len() != expected {
        return Err(Error::protocol(
            format!("frame of {expected} bytes"),
            format!("{} bytes", frame.len()),
        ));
    }

    let file_at = HEADER_LEN;
    let func_at = file_at + file_len;
    let logger_at = func_at + func_len;
    let msg_at = logger_at + logger_len;

    Ok((
        head,
        tail(frame, file_at, file_len)?,
        tail(frame, func_at, func_len)?,
        tail(frame, logger_at, logger_len)?,
        tail(frame, msg_at, msg_len)?,
    ))
}

fn tail(frame: &[u8], from: usize, len: usize) -> Result<&str, Error> {
    std::str::from_utf8(&frame[from..from + len])
        .map_err(|_| Error::protocol("utf-8 tail", "invalid utf-8"))
}

/// Truncate to at most `max` bytes without splitting a UTF-8 sequence.
fn clamp(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Last path segment of `path`, everything after the final `/`.
pub fn basename(path: &str) -> &str {
    match path.rfind('/') {
        Some(at) => &path[at + 1..],
        None => path,
    }
}

/// Append exactly one rendered output line for one newline-free message
/// segment. Multi-line messages are split by the writer and rendered
/// segment by segment with the same head.
///
/// Schema: `L|YYYYMMDDTHHMMSS.NNNNNNNNN|PPPPP.TTTTT=RRRRR:PROG|FILE:LINE@FUNC|LOGGER|MSG\n`
/// (without a kernel tid the pid field becomes `PPPPP:RRRRR:PROG`).
#[allow(clippy::too_many_arguments)]
pub fn render_line(
    out: &mut String,
    head: &RecordHead,
    prog: &str,
    pid: u32,
    file: &str,
    func: &str,
    logger: &str,
    segment: &str,
) {
    let when = UNIX_EPOCH + Duration::new(head.secs, head.nanos);
    let local: DateTime<Local> = when.into();

    // Writing into a String cannot fail.
    let _ = write!(
        out,
        "{}|{:04}{:02}{:02}T{:02}{:02}{:02}.{:09}|{:05}",
        head.level.as_char(),
        local.year(),
        local.month(),
        local.day(),
        local.hour(),
        local.minute(),
        local.second(),
        head.nanos,
        pid,
    );
    match head.tid {
        Some(tid) => {
            let _ = write!(out, ".{:05}={:05}:{}", tid, head.rank, prog);
        }
        None => {
            let _ = write!(out, ":{:05}:{}", head.rank, prog);
        }
    }
    let _ = write!(
        out,
        "|{}:{}@{}|{}|{}\n",
        file, head.line, func, logger, segment
    );
}
