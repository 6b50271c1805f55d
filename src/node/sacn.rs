//! sACN / E1.31: root layer + framing layer + DMP layer.

use uuid::Uuid;

use crate::error::{DmxError, Result};

/// Truncates `name` to at most 64 UTF-8-safe bytes, for the source-name
/// field of a framing layer. The upstream implementation this was ported
/// from rejects an overlong name outright; we truncate instead since
/// `DmxError` has no dedicated variant for it and public constructors must
/// not return `DmxError::Other`.
fn truncate_source_name(name: &str) -> String {
    if name.len() <= 64 {
        return name.to_string();
    }
    let mut end = 64;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    name[..end].to_string()
}

const ACN_IDENTIFIER: [u8; 12] = *b"ASC-E1.17\0\0\0";
const VECTOR_ROOT_E131_DATA: u32 = 0x0000_0004;
const VECTOR_E131_DATA_PACKET: u32 = 0x0000_0002;
const VECTOR_DMP_SET_PROPERTY: u8 = 0x02;

/// Highest legal sACN universe id. Lowest is 1 (checked by the caller).
pub const MAX_UNIVERSE: u16 = 63_998;

fn flags_and_length(len: usize) -> [u8; 2] {
    let len = len as u16 & 0x0fff;
    (0x7000u16 | len).to_be_bytes()
}

/// Build one sACN data packet. `data` is the DMX payload (start code not
/// included; prepended here as `0x00`) and need not be padded — callers
/// pass the universe's live buffer length.
pub(crate) fn build_frame(
    cid: &[u8; 16],
    source_name: &str,
    priority: u8,
    universe_id: u16,
    sequence: u8,
    data: &[u8],
) -> Vec<u8> {
    let dmp_value_count = 1 + data.len(); // start code + slots
    let dmp_len = 10 + dmp_value_count;
    let framing_len = 77 + dmp_len;
    let root_len = 22 + framing_len; // from Vector (inclusive) through end

    let mut frame = Vec::with_capacity(16 + root_len);

    // Root layer
    frame.extend_from_slice(&0x0010u16.to_be_bytes()); // preamble size
    frame.extend_from_slice(&0x0000u16.to_be_bytes()); // postamble size
    frame.extend_from_slice(&ACN_IDENTIFIER);
    frame.extend_from_slice(&flags_and_length(root_len));
    frame.extend_from_slice(&VECTOR_ROOT_E131_DATA.to_be_bytes());
    frame.extend_from_slice(cid);

    // Framing layer
    frame.extend_from_slice(&flags_and_length(framing_len));
    frame.extend_from_slice(&VECTOR_E131_DATA_PACKET.to_be_bytes());
    let mut name_field = [0u8; 64];
    let name_bytes = source_name.as_bytes();
    let n = name_bytes.len().min(64);
    name_field[..n].copy_from_slice(&name_bytes[..n]);
    frame.extend_from_slice(&name_field);
    frame.push(priority);
    frame.extend_from_slice(&0u16.to_be_bytes()); // sync address
    frame.push(sequence);
    frame.push(0); // options
    frame.extend_from_slice(&universe_id.to_be_bytes());

    // DMP layer
    frame.extend_from_slice(&flags_and_length(dmp_len));
    frame.push(VECTOR_DMP_SET_PROPERTY);
    frame.push(0xa1); // address type & data type
    frame.extend_from_slice(&0u16.to_be_bytes()); // first property address
    frame.extend_from_slice(&1u16.to_be_bytes()); // address increment
    frame.extend_from_slice(&(dmp_value_count as u16).to_be_bytes());
    frame.push(0); // DMX start code
    frame.extend_from_slice(data);

    frame
}

/// A node speaking sACN/E1.31 over UDP (default port 5568).
pub struct SacnNode(super::Node);

impl SacnNode {
    /// `max_fps = 25`, `refresh_every = 2s`, random CID, refresh task
    /// started immediately — upstream's defaults (`base_node.py`,
    /// `impl_sacn/node.py`).
    pub fn new(host: &str, port: u16, source_name: impl Into<String>) -> Self {
        Self::try_new(
            host,
            port,
            source_name,
            100,
            None,
            None,
            super::DEFAULT_MAX_FPS,
            super::DEFAULT_REFRESH_EVERY,
            true,
        )
        .expect("invalid sACN destination")
    }

    /// `cid`, if supplied, must be exactly 16 bytes (E1.31's component
    /// identifier); otherwise a random v4 UUID is generated. `priority`
    /// defaults callers should pass `100` (E1.31's default).
    /// `start_refresh_task` mirrors upstream's constructor default of
    /// `true` (see [`super::Node::start_refresh`]).
    #[allow(clippy::too_many_arguments)]
    pub fn try_new(
        host: &str,
        port: u16,
        source_name: impl Into<String>,
        priority: u8,
        source_address: Option<(&str, u16)>,
        cid: Option<&[u8]>,
        max_fps: u32,
        refresh_every: std::time::Duration,
        start_refresh_task: bool,
    ) -> Result<Self> {
        let cid = match cid {
            Some(bytes) => {
                let arr: [u8; 16] = bytes
                    .try_into()
                    .map_err(|_| DmxError::InvalidCid(bytes.len()))?;
                arr
            }
            None => *Uuid::new_v4().as_bytes(),
        };
        let dst = super::resolve(host, port)?;
        let source = super::resolve_source(source_address)?;
        let protocol = super::Protocol::Sacn {
            cid,
            source_name: truncate_source_name(&source_name.into()),
            priority,
        };
        let node = super::Node::new_internal(
            protocol,
            dst,
            source,
            false,
            max_fps,
            refresh_every,
            start_refresh_task,
        )?;
        Ok(SacnNode(node))
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

impl std::ops::Deref for SacnNode {
    type Target = super::Node;
    fn deref(&self) -> &super::Node {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_matches_e131() {
        let cid = [0x11u8; 16];
        let frame = build_frame(&cid, "test-source", 100, 1, 3, &[1, 2, 3, 4]);
        assert_eq!(&frame[0..2], &0x0010u16.to_be_bytes());
        assert_eq!(&frame[4..16], &ACN_IDENTIFIER);
        assert_eq!(&frame[22..38], &cid);
        let framing_vector = u32::from_be_bytes(frame[40..44].try_into().unwrap());
        assert_eq!(framing_vector, VECTOR_E131_DATA_PACKET);
        assert_eq!(&frame[40 + 4..40 + 4 + 11], b"test-source");
        let priority_pos = 40 + 4 + 64;
        assert_eq!(frame[priority_pos], 100);
        assert_eq!(frame[priority_pos + 3], 3); // sequence
        let universe_pos = priority_pos + 5;
        assert_eq!(u16::from_be_bytes(frame[universe_pos..universe_pos + 2].try_into().unwrap()), 1);
        let dmp_pos = universe_pos + 2;
        assert_eq!(frame[dmp_pos + 2], VECTOR_DMP_SET_PROPERTY);
        assert_eq!(&frame[frame.len() - 4..], &[1, 2, 3, 4]);
        assert_eq!(frame[frame.len() - 5], 0); // start code
    }

    #[test]
    fn truncate_source_name_respects_utf8_boundaries() {
        let truncated = truncate_source_name(&"a".repeat(70));
        assert_eq!(truncated.len(), 64);

        let multibyte = "é".repeat(40); // 2 bytes each, 80 bytes total
        let truncated = truncate_source_name(&multibyte);
        assert!(truncated.len() <= 64);
        assert!(truncated.is_char_boundary(truncated.len()));
    }

    #[test]
    fn rejects_cid_of_wrong_length() {
        let err = SacnNode::try_new(
            "127.0.0.1",
            5568,
            "src",
            100,
            None,
            Some(&[1, 2, 3]),
            super::super::DEFAULT_MAX_FPS,
            super::super::DEFAULT_REFRESH_EVERY,
            false,
        )
        .unwrap_err();
        assert!(matches!(err, DmxError::InvalidCid(3)));
    }
}
