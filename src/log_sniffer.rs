//! Log sniffing: capture a level-masked subset of trace events into an
//! in-memory buffer while still letting everything reach the normal
//! tracing-subscriber output — e.g. to surface a session's error lines in
//! a CLI's final report.
//!
//! Grounded on `lib/src/log.c`'s `ChiakiLogSniffer`: a `sniff_level_mask`
//! decides what gets appended to the buffer, but every message still
//! reaches the wrapped logger unconditionally (there, `forward_log`; here,
//! whatever other `tracing_subscriber::Layer`s are registered alongside
//! this one — a `Layer` composes rather than wraps, so "forwarding" falls
//! out of the subscriber stack instead of an explicit callthrough). The
//! accumulation shape (newline-joined, `"[C] message"` per line) ports
//! `log_sniffer_push`'s buffer format; the buffer-capacity idiom is
//! `tui::log_capture::LogBuffer`'s `Mutex`-guarded growable store,
//! generalized from a line ring to a level-filtered accumulator.

use std::fmt::Write as _;
use std::sync::Mutex;

use tracing::field::{Field, Visit};
use tracing::Level;
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

/// Matches `chiaki_log_level_char`'s level-to-letter mapping.
fn level_char(level: &Level) -> char {
    match *level {
        Level::TRACE => 'V',
        Level::DEBUG => 'D',
        Level::INFO => 'I',
        Level::WARN => 'W',
        Level::ERROR => 'E',
    }
}

fn level_bit(level: &Level) -> u32 {
    match *level {
        Level::TRACE => 1 << 0,
        Level::DEBUG => 1 << 1,
        Level::INFO => 1 << 2,
        Level::WARN => 1 << 3,
        Level::ERROR => 1 << 4,
    }
}

pub const LEVEL_ALL: u32 = 0b11111;
pub const LEVEL_WARN_AND_ERROR: u32 = level_bit(&Level::WARN) | level_bit(&Level::ERROR);

#[derive(Default)]
struct MessageVisitor {
    message: String,
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{value:?}");
        }
    }
}

/// A `tracing_subscriber` layer that appends events matching
/// `sniff_level_mask` into a growable buffer, newline-joined.
pub struct LogSniffer {
    sniff_level_mask: u32,
    buf: Mutex<String>,
}

impl LogSniffer {
    pub fn new(sniff_level_mask: u32) -> Self {
        Self {
            sniff_level_mask,
            buf: Mutex::new(String::new()),
        }
    }

    /// Appends one line if `level` passes `sniff_level_mask` and `msg`
    /// isn't empty, matching `log_sniffer_push`'s own gating.
    fn push(&self, level: &Level, msg: &str) {
        if msg.is_empty() || level_bit(level) & self.sniff_level_mask == 0 {
            return;
        }
        let mut buf = self.buf.lock().unwrap_or_else(|e| e.into_inner());
        if !buf.is_empty() {
            buf.push('\n');
        }
        buf.push('[');
        buf.push(level_char(level));
        buf.push_str("] ");
        buf.push_str(msg);
    }

    /// Returns the accumulated buffer contents without clearing it,
    /// matching `chiaki_log_sniffer`'s read-without-consume access.
    pub fn contents(&self) -> String {
        self.buf.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn clear(&self) {
        self.buf.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

impl<S> Layer<S> for LogSniffer
where
    S: tracing::Subscriber,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let level = event.metadata().level();
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        self.push(level, &visitor.message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_bit_mask_filters_below_threshold() {
        let sniffer = LogSniffer::new(LEVEL_WARN_AND_ERROR);
        sniffer.push(&Level::INFO, "informational, below the warn/error mask");
        assert!(sniffer.contents().is_empty());
    }

    #[test]
    fn push_joins_with_newline_and_level_prefix() {
        let sniffer = LogSniffer::new(LEVEL_ALL);
        sniffer.push(&Level::WARN, "first");
        sniffer.push(&Level::ERROR, "second");
        assert_eq!(sniffer.contents(), "[W] first\n[E] second");
    }

    #[test]
    fn empty_message_is_not_appended() {
        let sniffer = LogSniffer::new(LEVEL_ALL);
        sniffer.push(&Level::INFO, "");
        assert!(sniffer.contents().is_empty());
    }

    #[test]
    fn clear_empties_the_buffer() {
        let sniffer = LogSniffer::new(LEVEL_ALL);
        sniffer.push(&Level::ERROR, "boom");
        sniffer.clear();
        assert!(sniffer.contents().is_empty());
    }
}
