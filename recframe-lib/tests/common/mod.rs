#![allow(dead_code)]
use std::io::Cursor;

use recframe::{Batch, DecodedRecord, Diagnostic, FormatConfig, ParserSession, ReaderSource};

pub type MemSession = ParserSession<ReaderSource<Cursor<Vec<u8>>>>;

pub const NORTEK_BASE: u16 = 0xb58c;

/// Log to the test output, filtered by `RECFRAME_LOG`.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_env("RECFRAME_LOG"))
        .with_test_writer()
        .try_init();
}

pub fn session(config: &FormatConfig, dat: &[u8]) -> MemSession {
    init_logging();
    ParserSession::new(ReaderSource::new(Cursor::new(dat.to_vec())), config).unwrap()
}

/// Fetch everything remaining, `batch` records at a time.
pub fn fetch_all(session: &mut MemSession, batch: usize) -> (Vec<DecodedRecord>, Vec<Diagnostic>) {
    let mut all = Batch::default();
    loop {
        let Batch {
            records,
            diagnostics,
        } = session.fetch(batch).unwrap();
        let done = records.is_empty() && diagnostics.is_empty();
        all.records.extend(records);
        all.diagnostics.extend(diagnostics);
        if done {
            return (all.records, all.diagnostics);
        }
    }
}

pub fn word_sum(base: u16, dat: &[u8]) -> u16 {
    dat.chunks_exact(2)
        .fold(base, |acc, w| acc.wrapping_add(u16::from_le_bytes([w[0], w[1]])))
}

fn bcd(v: u8) -> u8 {
    ((v / 10) << 4) | (v % 10)
}

/// Aquadopp record of `len` bytes with a valid trailing checksum.
pub fn aquadopp(id: u8, len: usize, fill: impl FnOnce(&mut [u8])) -> Vec<u8> {
    let mut rec = vec![0u8; len];
    rec[0] = 0xa5;
    rec[1] = id;
    rec[2..4].copy_from_slice(&((len / 2) as u16).to_le_bytes());
    fill(&mut rec);
    let sum = word_sum(NORTEK_BASE, &rec[..len - 2]);
    rec[len - 2..].copy_from_slice(&sum.to_le_bytes());
    rec
}

fn sample(id: u8, second: u8) -> Vec<u8> {
    aquadopp(id, 42, |rec| {
        // 2014-06-15 12:30:ss
        rec[4..10].copy_from_slice(&[bcd(30), bcd(second), bcd(15), bcd(12), bcd(14), bcd(6)]);
        rec[14..16].copy_from_slice(&120u16.to_le_bytes());
        rec[30..32].copy_from_slice(&i16::from(second).to_le_bytes());
    })
}

/// Velocity record timed 2014-06-15 12:30:`second`, with `second` as beam 1 velocity.
pub fn velocity(second: u8) -> Vec<u8> {
    sample(0x01, second)
}

pub fn diagnostic_data(second: u8) -> Vec<u8> {
    sample(0x80, second)
}

pub fn diagnostic_header(records_to_follow: u16) -> Vec<u8> {
    aquadopp(0x06, 36, |rec| {
        rec[4..6].copy_from_slice(&records_to_follow.to_le_bytes());
    })
}

/// Unix seconds of 2014-06-15 12:30:`second`.
pub fn velocity_time(second: u8) -> f64 {
    1_402_835_400.0 + f64::from(second)
}

/// AD2CP record with valid header and payload checksums.
pub fn ad2cp(id: u8, payload: &[u8]) -> Vec<u8> {
    let mut rec = vec![0xa5, 0x0a, id, 0x10];
    rec.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    rec.extend_from_slice(&word_sum(NORTEK_BASE, payload).to_le_bytes());
    let header_sum = word_sum(NORTEK_BASE, &rec);
    rec.extend_from_slice(&header_sum.to_le_bytes());
    rec.extend_from_slice(payload);
    rec
}

/// One cell, three beam current profile timed 2014-01-01 00:00:`second`.
pub fn ad2cp_profile(second: u8) -> Vec<u8> {
    ad2cp_profile_beams(second, 1, 3)
}

/// Current profile of `cells` cells of `beams` beams, with `second` as the first
/// velocity.
pub fn ad2cp_profile_beams(second: u8, cells: u16, beams: u16) -> Vec<u8> {
    let n = usize::from(cells * beams);
    let mut payload = vec![0u8; 68 + 4 * n];
    payload[0] = 3;
    payload[8..14].copy_from_slice(&[114, 0, 1, 0, 0, second]);
    payload[34..36].copy_from_slice(&((beams << 12) | cells).to_le_bytes());
    payload[68..70].copy_from_slice(&i16::from(second).to_le_bytes());
    ad2cp(0x16, &payload)
}

/// Profiler file: a file header, `records`, then the start and stop times.
pub fn profiler_file(records: &[u8], time_on: u32, time_off: u32) -> Vec<u8> {
    let mut dat = vec![0x00, 0x01, 0x02, 0x03];
    dat.extend_from_slice(records);
    dat.extend_from_slice(&time_on.to_be_bytes());
    dat.extend_from_slice(&time_off.to_be_bytes());
    dat
}

/// MotionPak angular rate record.
pub fn motionpak_angular_rate(timer: u32) -> Vec<u8> {
    let mut rec = vec![0xcf];
    for v in [0.1f32, 0.2, 0.3, 1.0, 2.0, 3.0] {
        rec.extend_from_slice(&v.to_be_bytes());
    }
    rec.extend_from_slice(&timer.to_be_bytes());
    let sum = rec.iter().map(|b| u32::from(*b)).sum::<u32>() % 65_535;
    rec.extend_from_slice(&(sum as u16).to_be_bytes());
    rec
}

/// A logged NMEA sentence with a checksum covering the `$`.
pub fn nmea_line(stamp: &str, body: &str) -> String {
    let sentence = format!("${body}");
    let sum = sentence.bytes().fold(0u8, |acc, b| acc ^ b);
    format!("{stamp} {sentence}*{sum:02X}\n")
}
