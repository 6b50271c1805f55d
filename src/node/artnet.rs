//! Art-Net (ArtDMX, protocol version 14).

use crate::sequence::SequenceCounter;

pub(crate) const ID: &[u8; 8] = b"Art-Net\0";
pub(crate) const OP_DMX: u16 = 0x5000;
pub(crate) const PROTOCOL_VERSION: u16 = 14;

/// Highest legal Art-Net universe id: a 15-bit Port-Address (Net 7 bits,
/// Sub-Net + Universe 8 bits).
pub const MAX_UNIVERSE: u16 = 32_767;

/// Build one ArtDMX packet: 18-byte header followed by `data`, which must
/// already be an even length in `2..=512` (the universe buffer guarantees
/// this).
pub(crate) fn build_frame(universe_id: u16, sequence: u8, data: &[u8]) -> Vec<u8> {
    debug_assert!(data.len() % 2 == 0 && (2..=512).contains(&data.len()));

    let mut frame = Vec::with_capacity(18 + data.len());
    frame.extend_from_slice(ID);
    frame.extend_from_slice(&OP_DMX.to_le_bytes());
    frame.push((PROTOCOL_VERSION >> 8) as u8);
    frame.push((PROTOCOL_VERSION & 0xff) as u8);
    frame.push(sequence);
    frame.push(0); // Physical
    frame.push((universe_id & 0xff) as u8); // SubUni
    frame.push(((universe_id >> 8) & 0x7f) as u8); // Net
    frame.push((data.len() >> 8) as u8); // LengthHi
    frame.push((data.len() & 0xff) as u8); // LengthLo
    frame.extend_from_slice(data);
    frame
}

/// A node speaking Art-Net over UDP (default port 6454).
pub struct ArtNetNode(super::Node);

impl ArtNetNode {
    /// `max_fps = 25`, `refresh_every = 2s`, sequence counter enabled, no
    /// broadcast, refresh task started immediately — upstream's defaults
    /// (`base_node.py`, `impl_artnet/node.py`).
    pub fn new(host: &str, port: u16) -> Self {
        Self::try_new(
            host,
            port,
            None,
            true,
            false,
            super::DEFAULT_MAX_FPS,
            super::DEFAULT_REFRESH_EVERY,
            true,
        )
        .expect("invalid Art-Net destination")
    }

    /// `sequence_counter` disables the per-frame sequence number (sending a
    /// constant `0`) when `false` — some older Art-Net nodes reject
    /// incrementing sequences. `broadcast` enables sending to a broadcast
    /// destination address. `start_refresh_task` mirrors upstream's
    /// constructor default of `true` (see [`super::Node::start_refresh`]).
    #[allow(clippy::too_many_arguments)]
    pub fn try_new(
        host: &str,
        port: u16,
        source_address: Option<(&str, u16)>,
        sequence_counter: bool,
        broadcast: bool,
        max_fps: u32,
        refresh_every: std::time::Duration,
        start_refresh_task: bool,
    ) -> std::io::Result<Self> {
        let dst = super::resolve(host, port)?;
        let source = super::resolve_source(source_address)?;
        let sequence = if sequence_counter {
            SequenceCounter::new(1, 255)
        } else {
            SequenceCounter::new(0, 0)
        };
        let protocol = super::Protocol::ArtNet { sequence };
        let node = super::Node::new_internal(
            protocol,
            dst,
            source,
            broadcast,
            max_fps,
            refresh_every,
            start_refresh_task,
        )?;
        Ok(ArtNetNode(node))
    }

    /// Explicitly start or stop the refresh task after construction.
    pub fn with_start_refresh_task(self, start: bool) -> Self {
        if start {
            self.0.start_refresh();
        } else {
            self.0.stop_refresh();
        }
        self
    }
}

impl std::ops::Deref for ArtNetNode {
    type Target = super::Node;
    fn deref(&self) -> &super::Node {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_layout_matches_spec() {
        let frame = build_frame(0x0102, 7, &[0xaa; 4]);
        assert_eq!(&frame[0..8], ID);
        assert_eq!(&frame[8..10], &OP_DMX.to_le_bytes());
        assert_eq!(frame[10], 0);
        assert_eq!(frame[11], 14);
        assert_eq!(frame[12], 7); // sequence
        assert_eq!(frame[13], 0); // physical
        assert_eq!(frame[14], 0x02); // sub-uni
        assert_eq!(frame[15], 0x01); // net
        assert_eq!(frame[16], 0);
        assert_eq!(frame[17], 4);
        assert_eq!(&frame[18..], &[0xaa; 4]);
    }
}
