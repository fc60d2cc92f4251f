//! Allocation-free integer formatting
//!
//! `core::fmt` is avoided on the crash path: it goes through trait objects,
//! and the handler must not call through dispatch tables that a wild write
//! may have corrupted. These formatters fill a fixed buffer from the right
//! and hand back the used tail.

const HEX_DIGITS: &[u8; 16] = b"0123456789abcdef";

/// Buffer length that fits `u64::MAX` in decimal (20 digits)
pub const DEC_BUF_LEN: usize = 20;

/// Buffer length that fits `0x` plus 16 hex digits
pub const HEX_BUF_LEN: usize = 2 + 2 * core::mem::size_of::<u64>();

/// Prefix printed before every stack frame address
const FRAME_PREFIX: &[u8] = b"    @ ";

/// Format `val` in decimal, returning the written digits
pub fn format_dec(mut val: u64, buf: &mut [u8; DEC_BUF_LEN]) -> &[u8] {
    let mut pos = buf.len();
    loop {
        pos -= 1;
        // `val % 10` is always < 10
        #[allow(clippy::cast_possible_truncation)]
        let digit = (val % 10) as u8;
        buf[pos] = b'0' + digit;
        val /= 10;
        if val == 0 {
            break;
        }
    }
    &buf[pos..]
}

/// Format `val` as `0x`-prefixed lowercase hex without zero padding
pub fn format_hex(mut val: u64, buf: &mut [u8; HEX_BUF_LEN]) -> &[u8] {
    let mut pos = buf.len();
    loop {
        pos -= 1;
        #[allow(clippy::cast_possible_truncation)]
        let nibble = (val & 0x0f) as usize;
        buf[pos] = HEX_DIGITS[nibble];
        val >>= 4;
        if val == 0 {
            break;
        }
    }
    pos -= 1;
    buf[pos] = b'x';
    pos -= 1;
    buf[pos] = b'0';
    &buf[pos..]
}

/// Formats frame addresses as `    @ 00007f3a2b4c0780`
///
/// Owns its buffer so the crash path can keep one on the stack and reuse it
/// for every frame.
pub struct AddressFormatter {
    buf: [u8; FRAME_PREFIX.len() + 16],
}

impl AddressFormatter {
    #[must_use]
    pub const fn new() -> Self {
        let mut buf = [b'0'; FRAME_PREFIX.len() + 16];
        let mut i = 0;
        while i < FRAME_PREFIX.len() {
            buf[i] = FRAME_PREFIX[i];
            i += 1;
        }
        Self { buf }
    }

    /// Render `addr` zero-padded to 16 hex digits behind the frame prefix
    pub fn format(&mut self, mut addr: u64) -> &[u8] {
        let digits = &mut self.buf[FRAME_PREFIX.len()..];
        for slot in digits.iter_mut().rev() {
            #[allow(clippy::cast_possible_truncation)]
            let nibble = (addr & 0x0f) as usize;
            *slot = HEX_DIGITS[nibble];
            addr >>= 4;
        }
        &self.buf
    }
}

impl Default for AddressFormatter {
    fn default() -> Self {
        Self::new()
    }
}
