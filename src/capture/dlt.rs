//! DLT message encoding
//!
//! Produces verbose log messages as sent over TCP (no storage header):
//! ```text
//! standard header   HTYP MCNT LEN(be16) ECU(4) TMSP(be32)
//! extended header   MSIN NOAR APID(4) CTID(4)
//! payload           per argument: TYPEINFO(le32) LEN(le16) UTF-8 bytes NUL
//! ```

use std::time::Instant;

use super::Severity;

/// Use extended header
const HTYP_UEH: u8 = 0x01;
/// ECU id present
const HTYP_WEID: u8 = 0x04;
/// Timestamp present
const HTYP_WTMS: u8 = 0x10;
/// Protocol version 1
const HTYP_VERSION_1: u8 = 0x20;

/// Verbose mode bit of MSIN; message type "log" is zero
const MSIN_VERBOSE: u8 = 0x01;

/// Type info of a UTF-8 string argument
const TYPE_INFO_STRING_UTF8: u32 = 0x0000_0200 | 0x0000_8000;

/// Longest string argument written, in bytes
const MAX_ARG_LEN: usize = 4096;

/// Standard header with ECU id and timestamp
const STANDARD_HEADER_LEN: usize = 4 + 4 + 4;
const EXTENDED_HEADER_LEN: usize = 10;

/// Encoder keeping the per-stream message counter
#[derive(Debug)]
pub struct DltEncoder {
    ecu_id: [u8; 4],
    app_id: [u8; 4],
    context_id: [u8; 4],
    counter: u8,
    started: Instant,
}

/// Right-pad an id to four bytes, cutting longer ids
fn id4(id: &str) -> [u8; 4] {
    let mut out = [0u8; 4];
    for (slot, byte) in out.iter_mut().zip(id.bytes()) {
        *slot = byte;
    }
    out
}

/// Cut a string to at most `max` bytes on a char boundary
fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

impl DltEncoder {
    pub fn new(ecu_id: &str, app_id: &str, context_id: &str) -> Self {
        Self {
            ecu_id: id4(ecu_id),
            app_id: id4(app_id),
            context_id: id4(context_id),
            counter: 0,
            started: Instant::now(),
        }
    }

    /// Encode one verbose log message
    pub fn encode(&mut self, args: &[&str], severity: Severity) -> Vec<u8> {
        let args: Vec<&str> = args
            .iter()
            .take(u8::MAX as usize)
            .map(|a| truncate(a, MAX_ARG_LEN))
            .collect();

        let mut payload = Vec::new();
        for arg in &args {
            payload.extend_from_slice(&TYPE_INFO_STRING_UTF8.to_le_bytes());
            payload.extend_from_slice(&((arg.len() + 1) as u16).to_le_bytes());
            payload.extend_from_slice(arg.as_bytes());
            payload.push(0);
        }

        let total = STANDARD_HEADER_LEN + EXTENDED_HEADER_LEN + payload.len();
        // 0.1 ms ticks since the encoder was created
        let timestamp = (self.started.elapsed().as_micros() / 100) as u32;

        let mut msg = Vec::with_capacity(total);
        msg.push(HTYP_UEH | HTYP_WEID | HTYP_WTMS | HTYP_VERSION_1);
        msg.push(self.counter);
        msg.extend_from_slice(&(total as u16).to_be_bytes());
        msg.extend_from_slice(&self.ecu_id);
        msg.extend_from_slice(&timestamp.to_be_bytes());

        msg.push(MSIN_VERBOSE | (severity.dlt_level() << 4));
        msg.push(args.len() as u8);
        msg.extend_from_slice(&self.app_id);
        msg.extend_from_slice(&self.context_id);

        msg.extend_from_slice(&payload);

        self.counter = self.counter.wrapping_add(1);
        msg
    }
}
