//! Per-packet context handed through the pipeline stages.

use emunet_core::{FlowKey, MacAddr};

/// Ethernet header: destination(6) + source(6) + ethertype(2).
pub const ETH_HEADER_LEN: usize = 14;

/// One egress packet as the classifier sees it.
#[derive(Debug, Clone)]
pub struct PacketContext<'a> {
    pub frame: &'a [u8],
    /// Interface the packet is leaving through.
    pub ifindex: u32,
    /// Length in bytes used for pacing; defaults to the frame length.
    pub len: u32,
    /// Earliest departure time in monotonic ns. `None` = send immediately.
    pub tstamp_ns: Option<u64>,
}

impl<'a> PacketContext<'a> {
    pub fn new(frame: &'a [u8], ifindex: u32) -> Self {
        Self {
            frame,
            ifindex,
            len: u32::try_from(frame.len()).unwrap_or(u32::MAX),
            tstamp_ns: None,
        }
    }

    pub fn with_len(mut self, len: u32) -> Self {
        self.len = len;
        self
    }

    pub fn with_tstamp(mut self, tstamp_ns: u64) -> Self {
        self.tstamp_ns = Some(tstamp_ns);
        self
    }

    /// Source address from the Ethernet header, `None` for short frames.
    pub fn src_mac(&self) -> Option<MacAddr> {
        let header = self.frame.get(..ETH_HEADER_LEN)?;
        let mut mac = [0u8; 6];
        mac.copy_from_slice(&header[6..12]);
        Some(MacAddr::new(mac))
    }

    pub fn flow_key(&self) -> Option<FlowKey> {
        self.src_mac().map(|mac| FlowKey::new(self.ifindex, mac))
    }
}

/// Build a minimal Ethernet frame of `len` bytes with the given source.
pub fn synthetic_frame(src: MacAddr, len: usize) -> Vec<u8> {
    let mut frame = vec![0u8; len.max(ETH_HEADER_LEN)];
    frame[..6].copy_from_slice(&[0xff; 6]);
    frame[6..12].copy_from_slice(&src.octets());
    // IPv4 ethertype
    frame[12] = 0x08;
    frame[13] = 0x00;
    frame
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_source_mac_and_builds_key() {
        let src = MacAddr::new([0x02, 0x42, 0, 0, 0, 7]);
        let frame = synthetic_frame(src, 100);
        let pkt = PacketContext::new(&frame, 9);
        assert_eq!(pkt.len, 100);
        assert_eq!(pkt.src_mac(), Some(src));
        let key = pkt.flow_key().unwrap();
        assert_eq!(key.ifindex(), 9);
        assert_eq!(key.src_mac(), src);
    }

    #[test]
    fn short_frame_has_no_key() {
        let frame = [0u8; 13];
        let pkt = PacketContext::new(&frame, 1);
        assert!(pkt.src_mac().is_none());
        assert!(pkt.flow_key().is_none());
    }
}
