//! Controller/touch event history: a small ring buffer of 2-5 byte wire
//! events, serialized newest-first.

use crate::error::{Result, TakionError};
use crate::models::controller::Button;

#[derive(Debug, Clone, Copy)]
pub struct FeedbackEvent {
    pub buf: [u8; 5],
    pub len: usize,
}

impl FeedbackEvent {
    pub fn bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    /// Button press/release event. Most buttons report a third state
    /// byte (3 bytes); L3/R3/Options/Share/Touchpad/Ps are a single
    /// 2-byte event with the state folded into the opcode.
    pub fn button(button: Button, pressed: bool) -> Result<Self> {
        let mut buf = [0u8; 5];
        buf[0] = 0x80;
        let state = pressed as u8;
        let (second, len): (u8, usize) = match button {
            Button::DpadUp => (0x80, 3),
            Button::DpadLeft => (0x82, 3),
            Button::DpadRight => (0x83, 3),
            Button::DpadDown => (0x81, 3),
            Button::L1 => (0x84, 3),
            Button::R1 => (0x85, 3),
            Button::L3 => return Ok(Self::with_state(if pressed { 0xaf } else { 0x8f })),
            Button::R3 => return Ok(Self::with_state(if pressed { 0xb0 } else { 0x90 })),
            Button::Options => return Ok(Self::with_state(if pressed { 0xac } else { 0x8c })),
            Button::Share => return Ok(Self::with_state(if pressed { 0xad } else { 0x8d })),
            Button::Touchpad => return Ok(Self::with_state(if pressed { 0xb1 } else { 0x91 })),
            Button::Ps => return Ok(Self::with_state(if pressed { 0xae } else { 0x8e })),
            Button::Cross => (0x88, 3),
            Button::Moon => (0x89, 3),
            Button::Box => (0x8a, 3),
            Button::Pyramid => (0x8b, 3),
            Button::AnalogL2 => (0x86, 3),
            Button::AnalogR2 => (0x87, 3),
        };
        buf[1] = second;
        if len == 3 {
            buf[2] = state;
        }
        Ok(Self { buf, len })
    }

    fn with_state(second: u8) -> Self {
        let mut buf = [0u8; 5];
        buf[0] = 0x80;
        buf[1] = second;
        Self { buf, len: 2 }
    }

    /// Touchpad down/up event: 5 bytes, 12-bit coordinates packed across
    /// the last 2.5 bytes.
    pub fn touch(down: bool, pointer_id: u8, x: u16, y: u16) -> Self {
        let mut buf = [0u8; 5];
        buf[0] = if down { 0xd0 } else { 0xc0 };
        buf[1] = pointer_id & 0x7f;
        buf[2] = (x >> 4) as u8;
        buf[3] = (((x & 0xf) << 4) as u8) | (y >> 8) as u8;
        buf[4] = y as u8;
        Self { buf, len: 5 }
    }
}

/// Ring buffer of feedback events. `push` inserts logically "before" the
/// current newest entry so iteration order stays newest-first, matching
/// the source's `begin` walk-back insertion.
pub struct HistoryBuffer {
    events: Vec<FeedbackEvent>,
    size: usize,
    begin: usize,
    len: usize,
}

impl HistoryBuffer {
    pub fn new(size: usize) -> Self {
        Self {
            events: vec![
                FeedbackEvent {
                    buf: [0; 5],
                    len: 0
                };
                size
            ],
            size,
            begin: 0,
            len: 0,
        }
    }

    pub fn push(&mut self, event: FeedbackEvent) {
        self.begin = (self.begin + self.size - 1) % self.size;
        self.len += 1;
        if self.len >= self.size {
            self.len = self.size;
        }
        self.events[self.begin] = event;
    }

    /// Serializes buffered events, newest-first, into `out`. Returns the
    /// number of bytes written, or `BufferTooSmall` without partial output
    /// if `out` can't hold every buffered event.
    pub fn format(&self, out: &mut [u8]) -> Result<usize> {
        let mut written = 0;
        for i in 0..self.len {
            let event = &self.events[(self.begin + i) % self.size];
            if written + event.len > out.len() {
                return Err(TakionError::BufferTooSmall);
            }
            out[written..written + event.len].copy_from_slice(event.bytes());
            written += event.len;
        }
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_keeps_last_n_newest_first() {
        let mut hist = HistoryBuffer::new(16);
        for i in 0..20u8 {
            hist.push(FeedbackEvent::touch(true, i, i as u16, i as u16));
        }
        let mut out = [0u8; 16 * 5];
        let n = hist.format(&mut out).unwrap();
        assert_eq!(n, 16 * 5);
        // Newest pushed (id 19) must appear first.
        assert_eq!(out[1], 19);
        assert_eq!(out[6], 18);
    }

    #[test]
    fn buffer_too_small_yields_no_partial_write() {
        let mut hist = HistoryBuffer::new(4);
        for i in 0..4u8 {
            hist.push(FeedbackEvent::touch(true, i, 0, 0));
        }
        let mut out = [0u8; 4]; // needs 20 bytes
        let err = hist.format(&mut out).unwrap_err();
        assert!(matches!(err, TakionError::BufferTooSmall));
    }

    #[test]
    fn l3_button_event_is_single_state_byte_variant() {
        let ev = FeedbackEvent::button(Button::L3, true).unwrap();
        assert_eq!(ev.len, 2);
        assert_eq!(ev.buf[1], 0xaf);
    }

    #[test]
    fn dpad_and_bumper_events_carry_trailing_state_byte() {
        let ev = FeedbackEvent::button(Button::DpadUp, true).unwrap();
        assert_eq!(ev.len, 3);
        assert_eq!(ev.buf[1], 0x80);
        assert_eq!(ev.buf[2], 1);

        let ev = FeedbackEvent::button(Button::R1, false).unwrap();
        assert_eq!(ev.len, 3);
        assert_eq!(ev.buf[1], 0x85);
        assert_eq!(ev.buf[2], 0);
    }

    #[test]
    fn analog_trigger_events_are_three_bytes() {
        let ev = FeedbackEvent::button(Button::AnalogL2, true).unwrap();
        assert_eq!(ev.len, 3);
        assert_eq!(ev.buf[1], 0x86);
        assert_eq!(ev.buf[2], 1);

        let ev = FeedbackEvent::button(Button::AnalogR2, false).unwrap();
        assert_eq!(ev.len, 3);
        assert_eq!(ev.buf[1], 0x87);
        assert_eq!(ev.buf[2], 0);
    }
}
