//! Per-type reassembly window: groups units by `frame_index`, attempts FEC
//! recovery, and delivers frames to the upper layer strictly in order.

use std::collections::BTreeMap;

use super::fec::FecGroup;
use crate::transport::seq_num_16_lt;

/// A fully reassembled frame, ready for the media sink.
pub struct ReassembledFrame {
    pub frame_index: u16,
    pub data: Vec<u8>,
    pub recovered: bool,
}

pub struct ReassemblyWindow {
    unit_size: usize,
    groups: BTreeMap<u16, FecGroup>,
    last_delivered: Option<u16>,
    pub frames_lost: u64,
    /// How many frame_index slots we tolerate being "behind" before giving
    /// up on a stalled group and skipping it.
    max_gap: u16,
}

impl ReassemblyWindow {
    pub fn new(unit_size: usize, max_gap: u16) -> Self {
        Self {
            unit_size,
            groups: BTreeMap::new(),
            last_delivered: None,
            frames_lost: 0,
            max_gap,
        }
    }

    pub fn push_unit(&mut self, frame_index: u16, unit_index: u8, units_total: u8, data: Vec<u8>) {
        if let Some(last) = self.last_delivered {
            if !seq_num_16_lt(last, frame_index) && last != frame_index {
                return; // stale, already delivered past this point
            }
        }
        let group = self
            .groups
            .entry(frame_index)
            .or_insert_with(|| FecGroup::new(self.unit_size, units_total as usize));
        group.add_unit(unit_index as usize, data);
    }

    /// Pulls every frame that's ready to deliver, in `frame_index` order,
    /// dropping/declaring-lost any frame that has fallen outside the
    /// reassembly window.
    pub fn drain_ready(&mut self) -> Vec<ReassembledFrame> {
        let mut out = Vec::new();
        let indices: Vec<u16> = self.groups.keys().copied().collect();
        for idx in indices {
            let too_old = match self.last_delivered {
                Some(last) => {
                    let gap = idx.wrapping_sub(last);
                    gap > self.max_gap && gap < 0x8000
                }
                None => false,
            };
            let ready = self.groups.get(&idx).map(|g| g.ready()).unwrap_or(false);
            if ready {
                if let Some(group) = self.groups.remove(&idx) {
                    if let Some(units) = group.decode() {
                        let recovered = group_had_missing(&group);
                        let data = units.concat();
                        self.last_delivered = Some(idx);
                        out.push(ReassembledFrame {
                            frame_index: idx,
                            data,
                            recovered,
                        });
                    }
                }
            } else if too_old {
                self.frames_lost += 1;
                self.groups.remove(&idx);
                self.last_delivered = Some(idx);
            }
        }
        out
    }
}

fn group_had_missing(group: &FecGroup) -> bool {
    group.received_data_units() < group.units_total
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivers_complete_frame_in_order() {
        let mut window = ReassemblyWindow::new(4, 16);
        window.push_unit(0, 0, 1, vec![9, 9, 9, 9]);
        let frames = window.drain_ready();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].frame_index, 0);
        assert!(!frames[0].recovered);
    }

    #[test]
    fn stale_frame_dropped_after_delivery() {
        let mut window = ReassemblyWindow::new(4, 16);
        window.push_unit(0, 0, 1, vec![1; 4]);
        window.drain_ready();
        // Late-arriving unit for a frame index already delivered is ignored.
        window.push_unit(0, 0, 1, vec![2; 4]);
        assert!(window.drain_ready().is_empty());
    }

    #[test]
    fn gives_up_on_frame_outside_window() {
        let mut window = ReassemblyWindow::new(4, 2);
        window.push_unit(0, 0, 1, vec![1; 4]);
        window.drain_ready();
        window.push_unit(10, 0, 3, vec![1; 4]); // incomplete, 1 of 3 units
        let frames = window.drain_ready();
        assert!(frames.is_empty());
        assert_eq!(window.frames_lost, 1);
    }
}
