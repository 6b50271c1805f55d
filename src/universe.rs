//! DMX universes: a contiguous byte buffer addressed by its named channels.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::{Duration, Instant};

use crate::channel::{ByteOrder, Channel, ChannelData};
use crate::error::{DmxError, Result};
use crate::node::Node;
use crate::output_correction::CorrectionFn;

pub(crate) struct UniverseData {
    pub(crate) id: u16,
    pub(crate) data: Vec<u8>,
    pub(crate) data_changed: bool,
    pub(crate) correction: Option<CorrectionFn>,
    pub(crate) channels: Vec<(String, Rc<RefCell<ChannelData>>)>,
    /// sACN's per-universe sequence byte. Unused by Art-Net (node-scoped,
    /// see [`crate::sequence::SequenceCounter`]) and by KiNet (no sequence
    /// numbering). Starts at 1 (`impl_sacn/universe.py`), wraps to 0.
    pub(crate) sacn_sequence: Cell<u8>,
    /// Timestamp of the last frame actually sent for this universe, by
    /// either the process task's dirty-flush or the refresh task's
    /// keepalive. `None` before the first send ever happens.
    pub(crate) last_send: Cell<Option<Instant>>,
}

impl UniverseData {
    fn new(id: u16) -> Self {
        UniverseData {
            id,
            data: vec![0u8; 2],
            data_changed: true,
            correction: None,
            channels: Vec::new(),
            sacn_sequence: Cell::new(1),
            last_send: Cell::new(None),
        }
    }

    fn ensure_buffer_len(&mut self, stop: u16) {
        let needed = (stop as usize + 1) & !1; // round up to even
        let needed = needed.max(2);
        if needed > self.data.len() {
            self.data.resize(needed, 0);
        }
    }
}

/// A DMX universe: up to 512 bytes of addressable channel data, sent as one
/// frame by the owning node.
///
/// Cheap to clone: an `Rc`-backed handle, paired with the `Node` it belongs
/// to.
#[derive(Clone)]
pub struct Universe {
    pub(crate) node: Node,
    pub(crate) data: Rc<RefCell<UniverseData>>,
}

impl Universe {
    pub(crate) fn construct(id: u16) -> Rc<RefCell<UniverseData>> {
        Rc::new(RefCell::new(UniverseData::new(id)))
    }

    pub(crate) fn from_parts(node: Node, data: Rc<RefCell<UniverseData>>) -> Self {
        Universe { node, data }
    }

    /// The universe/subnet id this universe was registered under.
    pub fn id(&self) -> u16 {
        self.data.borrow().id
    }

    /// Number of channels registered in this universe.
    pub fn len(&self) -> usize {
        self.data.borrow().channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current buffer length in bytes (even, `2..=512`).
    pub fn buffer_len(&self) -> usize {
        self.data.borrow().data.len()
    }

    /// Copy of the current universe buffer, for inspection/testing.
    pub fn buffer_snapshot(&self) -> Vec<u8> {
        self.data.borrow().data.clone()
    }

    /// Register a new channel at `start` (1-indexed), `width` logical
    /// samples of `byte_size` bytes each. `name` defaults to `start`'s
    /// decimal representation when empty.
    ///
    /// Fails if the requested range falls outside `1..=512`, overlaps an
    /// existing channel, or the (possibly defaulted) name is already in
    /// use — all checked before any state is mutated.
    pub fn add_channel(
        &self,
        start: u16,
        width: usize,
        name: &str,
        byte_size: u8,
        byte_order: ByteOrder,
    ) -> Result<Channel> {
        let chan_data = Channel::construct(start, width, byte_size, byte_order)?;
        let (chan_start, chan_stop) = {
            let d = chan_data.borrow();
            (d.start, d.stop)
        };

        let name = if name.is_empty() {
            format!("{}/{}", chan_start, width)
        } else {
            name.to_string()
        };

        let mut universe = self.data.borrow_mut();
        for (existing_name, existing) in &universe.channels {
            if *existing_name == name {
                return Err(DmxError::ChannelExists(name));
            }
            let e = existing.borrow();
            if chan_start <= e.stop && e.start <= chan_stop {
                return Err(DmxError::OverlappingChannel(existing_name.clone()));
            }
        }

        universe.ensure_buffer_len(chan_stop);
        universe.channels.push((name, Rc::clone(&chan_data)));
        drop(universe);

        Ok(Channel::from_parts(self.clone(), chan_data))
    }

    /// Look up a previously registered channel by name.
    pub fn get_channel(&self, name: &str) -> Result<Channel> {
        let universe = self.data.borrow();
        universe
            .channels
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, data)| Channel::from_parts(self.clone(), Rc::clone(data)))
            .ok_or_else(|| DmxError::ChannelNotFound(name.to_string()))
    }

    /// All registered channels, in registration order.
    pub fn channels(&self) -> Vec<Channel> {
        self.data
            .borrow()
            .channels
            .iter()
            .map(|(_, data)| Channel::from_parts(self.clone(), Rc::clone(data)))
            .collect()
    }

    /// Set (or clear) the universe-level output correction, applied to
    /// channels that don't set their own. Recomputes every channel's
    /// corrected values immediately.
    pub fn set_output_correction(&self, func: Option<CorrectionFn>) {
        self.data.borrow_mut().correction = func;
        for channel in self.channels() {
            channel.apply_output_correction();
        }
    }

    pub(crate) fn ensure_process_task_running(&self) {
        self.node.ensure_process_task_running();
    }

    /// If the buffer has changed since the last call, returns a copy and
    /// clears the dirty flag; otherwise `None`. Used by the node's refresh
    /// task to decide whether a frame needs sending.
    pub(crate) fn take_changed_buffer(&self) -> Option<Vec<u8>> {
        let mut universe = self.data.borrow_mut();
        if universe.data_changed {
            universe.data_changed = false;
            Some(universe.data.clone())
        } else {
            None
        }
    }

    /// Returns the current sACN sequence byte then advances it, wrapping at 256.
    pub(crate) fn next_sacn_sequence(&self) -> u8 {
        let universe = self.data.borrow();
        let seq = universe.sacn_sequence.get();
        universe.sacn_sequence.set(seq.wrapping_add(1));
        seq
    }

    /// Elapsed time since this universe last had a frame sent, or `None`
    /// if it has never been sent (which the refresh task treats as due
    /// immediately).
    pub(crate) fn elapsed_since_last_send(&self, now: Instant) -> Option<Duration> {
        self.data.borrow().last_send.get().map(|t| now.saturating_duration_since(t))
    }

    /// Records that a frame was just sent for this universe.
    pub(crate) fn mark_sent(&self, at: Instant) {
        self.data.borrow().last_send.set(Some(at));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::ArtNetNode;

    fn test_node() -> ArtNetNode {
        ArtNetNode::new("127.0.0.1", 0x1936).with_start_refresh_task(false)
    }

    #[test]
    fn add_channel_rejects_overlap() {
        let node = test_node();
        let universe = node.add_universe(1).unwrap();
        universe.add_channel(1, 3, "rgb", 1, ByteOrder::Little).unwrap();
        let err = universe.add_channel(3, 2, "overlap", 1, ByteOrder::Little).unwrap_err();
        assert!(matches!(err, DmxError::OverlappingChannel(_)));
    }

    #[test]
    fn add_channel_defaults_name_to_start_and_width() {
        let node = test_node();
        let universe = node.add_universe(1).unwrap();
        universe.add_channel(5, 1, "", 1, ByteOrder::Little).unwrap();
        assert!(universe.get_channel("5/1").is_ok());

        universe.add_channel(6, 3, "", 1, ByteOrder::Little).unwrap();
        assert!(universe.get_channel("6/3").is_ok());
    }

    #[test]
    fn add_channel_rejects_duplicate_name() {
        let node = test_node();
        let universe = node.add_universe(1).unwrap();
        universe.add_channel(1, 1, "dimmer", 1, ByteOrder::Little).unwrap();
        let err = universe.add_channel(10, 1, "dimmer", 1, ByteOrder::Little).unwrap_err();
        assert!(matches!(err, DmxError::ChannelExists(_)));
    }

    #[test]
    fn buffer_grows_to_cover_highest_channel_rounded_even() {
        let node = test_node();
        let universe = node.add_universe(1).unwrap();
        universe.add_channel(5, 1, "", 1, ByteOrder::Little).unwrap();
        assert_eq!(universe.buffer_len(), 6);
    }
}
