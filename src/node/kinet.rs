//! KiNet v1 "DMX-out" frames.
//!
//! KiNet has no universe concept of its own; a node speaks to one physical
//! power-supply port, identified at registration time only — unlike
//! Art-Net/sACN, the universe/port id never appears in the frame itself
//! (the upstream implementation this was ported from hard-codes the
//! header's `port` field to zero and never writes the registered id
//! anywhere in the wire bytes).

const MAGIC: u32 = 0x0401_dc4a;
const VERSION: u16 = 0x0100;
const TYPE_DMX_OUT: u16 = 0x0101;

/// Highest legal KiNet universe id, matching Art-Net's Port-Address range
/// (the upstream node accepts the same bound; the id is purely a local
/// registry key, see the module docs).
pub const MAX_UNIVERSE: u16 = 32_767;

/// Build one KiNet v1 DMX-out packet: a 20-byte constant header followed by
/// a one-byte DMX slot count and the slots themselves (no fixed-size
/// padding — only `data.len()` bytes are sent).
///
/// `data.len()` must fit in a `u8` (KiNet's slot-count field is one byte);
/// callers never register universes wider than 512 bytes anyway, but the
/// DMX-out wire format itself tops out at 255 slots per frame.
pub(crate) fn build_frame(data: &[u8]) -> Vec<u8> {
    debug_assert!(data.len() <= u8::MAX as usize, "KiNet DMX-out slot count must fit in a byte");

    let mut frame = Vec::with_capacity(20 + 1 + data.len());
    frame.extend_from_slice(&MAGIC.to_be_bytes());
    frame.extend_from_slice(&VERSION.to_be_bytes());
    frame.extend_from_slice(&TYPE_DMX_OUT.to_be_bytes());
    frame.extend_from_slice(&0u32.to_be_bytes()); // sequence: always 0
    frame.push(0); // port: always 0, not the registered universe id
    frame.push(0); // padding
    frame.extend_from_slice(&0u16.to_be_bytes()); // flags
    frame.extend_from_slice(&0xffff_ffffu32.to_be_bytes()); // timer
    frame.push(data.len() as u8); // slot count
    frame.extend_from_slice(data);
    frame
}

/// A node speaking KiNet v1 over UDP (default port 6038).
pub struct KiNetNode(super::Node);

impl KiNetNode {
    /// `max_fps = 25`, `refresh_every = 2s`, refresh task started
    /// immediately — upstream's defaults (`base_node.py`).
    pub fn new(host: &str, port: u16) -> Self {
        Self::try_new(
            host,
            port,
            None,
            super::DEFAULT_MAX_FPS,
            super::DEFAULT_REFRESH_EVERY,
            true,
        )
        .expect("invalid KiNet destination")
    }

    /// `start_refresh_task` mirrors upstream's constructor default of
    /// `true` (see [`super::Node::start_refresh`]).
    pub fn try_new(
        host: &str,
        port: u16,
        source_address: Option<(&str, u16)>,
        max_fps: u32,
        refresh_every: std::time::Duration,
        start_refresh_task: bool,
    ) -> std::io::Result<Self> {
        let dst = super::resolve(host, port)?;
        let source = super::resolve_source(source_address)?;
        let node = super::Node::new_internal(
            super::Protocol::Kinet,
            dst,
            source,
            false,
            max_fps,
            refresh_every,
            start_refresh_task,
        )?;
        Ok(KiNetNode(node))
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

impl std::ops::Deref for KiNetNode {
    type Target = super::Node;
    fn deref(&self) -> &super::Node {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_layout_and_no_padding() {
        let frame = build_frame(&[1, 2, 3]);
        assert_eq!(frame.len(), 20 + 1 + 3);
        assert_eq!(u32::from_be_bytes(frame[0..4].try_into().unwrap()), MAGIC);
        assert_eq!(&frame[4..6], &VERSION.to_be_bytes());
        assert_eq!(&frame[6..8], &TYPE_DMX_OUT.to_be_bytes());
        assert_eq!(&frame[8..12], &[0, 0, 0, 0]); // sequence
        assert_eq!(frame[12], 0); // port, always zero
        assert_eq!(frame[13], 0); // padding
        assert_eq!(&frame[14..16], &[0, 0]); // flags
        assert_eq!(&frame[16..20], &[0xff, 0xff, 0xff, 0xff]); // timer
        assert_eq!(frame[20], 3); // slot count
        assert_eq!(&frame[21..], &[1, 2, 3]);
    }

    #[test]
    fn single_slot_matches_reference_bytes() {
        let frame = build_frame(&[0x0a]);
        assert_eq!(
            frame,
            vec![
                0x04, 0x01, 0xdc, 0x4a, 0x01, 0x00, 0x01, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xff,
                0xff, 0xff, 0xff, 0x01, 0x0a,
            ]
        );
    }
}
