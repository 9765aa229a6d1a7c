//! Packages encoder-produced 40-byte Opus frames into Takion mic packets.
//!
//! The frame-buffer copy sequence below reproduces the reference sender's
//! exact (and slightly redundant) update order byte-for-byte rather than
//! the cleaner "keep last two frames" scheme it looks like it's going for
//! — see the design notes on why this isn't simplified away.

use std::sync::Mutex;

pub const BUF_SIZE_PER_UNIT: usize = 40;
const FRAME_BUF_SIZE: usize = 3 * BUF_SIZE_PER_UNIT;
const UNITS_IN_FRAME_TOTAL: u32 = 3;
const UNITS_IN_FRAME_FEC_RAW: u32 = 10273;

/// A pre-encoded, already-framed mic packet ready for the Takion
/// unreliable channel.
#[derive(Debug, Clone)]
pub struct MicPacket {
    pub bytes: Vec<u8>,
}

struct State {
    frame_index: u16,
    framea: Option<[u8; BUF_SIZE_PER_UNIT]>,
    frameb: Option<[u8; BUF_SIZE_PER_UNIT]>,
}

/// Packages fixed-size encoded audio frames into Takion mic packets.
/// `opus_data` is called with already-encoded frames; the encoder itself
/// lives outside this crate.
pub struct AudioSender {
    ps5: bool,
    state: Mutex<State>,
}

impl AudioSender {
    pub fn new(ps5: bool) -> Self {
        Self {
            ps5,
            state: Mutex::new(State {
                frame_index: 0,
                framea: None,
                frameb: None,
            }),
        }
    }

    /// Feeds one encoder-produced frame. Frames whose length isn't exactly
    /// [`BUF_SIZE_PER_UNIT`] are dropped (no entropy to multiplex). Returns
    /// `None` while warming up the 2-frame history, `Some(packet)` once a
    /// full packet has been assembled.
    pub fn opus_data(&self, frame: &[u8]) -> Option<MicPacket> {
        if frame.len() != BUF_SIZE_PER_UNIT {
            return None;
        }
        let mut n = [0u8; BUF_SIZE_PER_UNIT];
        n.copy_from_slice(frame);

        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        if state.frameb.is_none() {
            state.frameb = Some(n);
            return None;
        }
        if state.framea.is_none() {
            state.framea = Some(n);
            return None;
        }

        let frameb = state.frameb.unwrap();
        let framea = state.framea.unwrap();

        let mut frame_buf = [0u8; FRAME_BUF_SIZE];
        frame_buf[0..BUF_SIZE_PER_UNIT].copy_from_slice(&frameb);
        frame_buf[BUF_SIZE_PER_UNIT..2 * BUF_SIZE_PER_UNIT].copy_from_slice(&framea);
        frame_buf[2 * BUF_SIZE_PER_UNIT..].copy_from_slice(&n);
        // Reproduces the source verbatim: slot 0 gets immediately
        // overwritten with the newest frame after already being filled
        // with the old frameb above.
        frame_buf[0..BUF_SIZE_PER_UNIT].copy_from_slice(&n);

        state.framea = Some(n);
        state.frameb = state.framea;

        let packet = self.build_packet(state.frame_index, &frame_buf);
        state.frame_index = state.frame_index.wrapping_add(1);
        Some(packet)
    }

    fn build_packet(&self, frame_index: u16, frame_buf: &[u8; FRAME_BUF_SIZE]) -> MicPacket {
        let ps5_extra = if self.ps5 { 1 } else { 0 };
        let mut buf = Vec::with_capacity(19 + ps5_extra + FRAME_BUF_SIZE);

        let packet_type: u8 = 3; // TAKION_PACKET_TYPE_AUDIO
        let packet_index = frame_index;
        let next_frame_index = frame_index.wrapping_add(1);
        let unit_index: u32 = 0;
        let units_number = (UNITS_IN_FRAME_FEC_RAW & 0xffff)
            | (((UNITS_IN_FRAME_TOTAL - 1) & 0xff) << 0x10)
            | ((unit_index & 0xff) << 0x18);

        buf.push(packet_type);
        buf.extend_from_slice(&packet_index.to_be_bytes());
        buf.extend_from_slice(&next_frame_index.to_be_bytes());
        buf.extend_from_slice(&units_number.to_be_bytes());
        buf.push(5); // codec
        buf.extend_from_slice(&0u32.to_be_bytes()); // gmac, filled upstream
        buf.extend_from_slice(&0u32.to_be_bytes()); // key_pos
        buf.push(0);
        if self.ps5 {
            buf.push(0);
        }
        buf.extend_from_slice(frame_buf);

        MicPacket { bytes: buf }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drops_mismatched_frame_sizes() {
        let sender = AudioSender::new(false);
        assert!(sender.opus_data(&[0u8; 10]).is_none());
    }

    #[test]
    fn first_two_frames_only_warm_up_history() {
        let sender = AudioSender::new(false);
        assert!(sender.opus_data(&[1u8; BUF_SIZE_PER_UNIT]).is_none());
        assert!(sender.opus_data(&[2u8; BUF_SIZE_PER_UNIT]).is_none());
    }

    #[test]
    fn third_frame_produces_a_packet_with_header() {
        let sender = AudioSender::new(true);
        sender.opus_data(&[1u8; BUF_SIZE_PER_UNIT]);
        sender.opus_data(&[2u8; BUF_SIZE_PER_UNIT]);
        let packet = sender.opus_data(&[3u8; BUF_SIZE_PER_UNIT]).unwrap();
        assert_eq!(packet.bytes[0], 3);
        // ps5 packets carry one extra zero byte before the payload.
        assert_eq!(packet.bytes.len(), 20 + FRAME_BUF_SIZE);
    }

    #[test]
    fn frame_index_wraps_at_u16_max() {
        let sender = AudioSender::new(false);
        sender.opus_data(&[1u8; BUF_SIZE_PER_UNIT]);
        sender.opus_data(&[2u8; BUF_SIZE_PER_UNIT]);
        {
            let mut st = sender.state.lock().unwrap();
            st.frame_index = u16::MAX;
        }
        sender.opus_data(&[3u8; BUF_SIZE_PER_UNIT]);
        assert_eq!(sender.state.lock().unwrap().frame_index, 0);
    }
}
