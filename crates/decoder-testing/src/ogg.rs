//! Ogg/Opus fixtures.

/// Ogg CRC-32: polynomial 0x04C11DB7, no reflection, zero init.
pub fn crc32(data: &[u8]) -> u32 {
    data.iter().fold(0u32, |mut crc, &b| {
        crc ^= u32::from(b) << 24;
        for _ in 0..8 {
            crc = if crc & 0x8000_0000 != 0 {
                (crc << 1) ^ 0x04C1_1DB7
            } else {
                crc << 1
            };
        }
        crc
    })
}

/// One page holding `packets`, each terminated within the page.
pub fn page(serial: u32, sequence: u32, header_type: u8, granule: i64, packets: &[Vec<u8>]) -> Vec<u8> {
    let mut lacing = Vec::new();
    for p in packets {
        let mut left = p.len();
        while left >= 255 {
            lacing.push(255);
            left -= 255;
        }
        lacing.push(left as u8);
    }
    let mut out = b"OggS".to_vec();
    out.push(0);
    out.push(header_type);
    out.extend_from_slice(&granule.to_le_bytes());
    out.extend_from_slice(&serial.to_le_bytes());
    out.extend_from_slice(&sequence.to_le_bytes());
    out.extend_from_slice(&[0u8; 4]);
    out.push(lacing.len() as u8);
    out.extend_from_slice(&lacing);
    for p in packets {
        out.extend_from_slice(p);
    }
    let crc = crc32(&out);
    out[22..26].copy_from_slice(&crc.to_le_bytes());
    out
}

/// `OpusHead` with mapping family 0.
pub fn opus_head(channels: u8, pre_skip: u16, output_gain: i16) -> Vec<u8> {
    let mut p = b"OpusHead".to_vec();
    p.push(1);
    p.push(channels);
    p.extend_from_slice(&pre_skip.to_le_bytes());
    p.extend_from_slice(&48_000u32.to_le_bytes());
    p.extend_from_slice(&output_gain.to_le_bytes());
    p.push(0);
    p
}

/// `OpusTags` with the given `KEY=value` comments.
pub fn opus_tags(comments: &[&str]) -> Vec<u8> {
    let vendor = b"decoder-testing";
    let mut p = b"OpusTags".to_vec();
    p.extend_from_slice(&(vendor.len() as u32).to_le_bytes());
    p.extend_from_slice(vendor);
    p.extend_from_slice(&(comments.len() as u32).to_le_bytes());
    for c in comments {
        p.extend_from_slice(&(c.len() as u32).to_le_bytes());
        p.extend_from_slice(c.as_bytes());
    }
    p
}

/// Options for [`opus_bytes`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpusSpec {
    /// Channel count in `OpusHead`.
    pub channels: u8,
    /// Pre-skip in 48 kHz samples.
    pub pre_skip: u16,
    /// Output gain, Q7.8 dB.
    pub output_gain: i16,
    /// Comments in `OpusTags`.
    pub comments: Vec<String>,
    /// Audio packets to write.
    pub packets: u32,
    /// 48 kHz frames per packet.
    pub packet_frames: u32,
    /// Audio packets per page.
    pub packets_per_page: u32,
    /// Granule of the final page; `None` for `packets * packet_frames`.
    pub final_granule: Option<i64>,
}

impl Default for OpusSpec {
    fn default() -> Self {
        Self {
            channels: 2,
            pre_skip: 312,
            output_gain: 0,
            comments: Vec::new(),
            packets: 100,
            packet_frames: 960,
            packets_per_page: 10,
            final_granule: None,
        }
    }
}

/// A complete Ogg/Opus stream. Audio packets carry their index in the
/// first four bytes, padded to 40 bytes. Page granules count every decoded
/// sample, pre-skip included.
pub fn opus_bytes(spec: &OpusSpec) -> Vec<u8> {
    const SERIAL: u32 = 0x1234_5678;
    let mut out = page(SERIAL, 0, 0x02, 0, &[opus_head(spec.channels, spec.pre_skip, spec.output_gain)]);
    let comments: Vec<&str> = spec.comments.iter().map(String::as_str).collect();
    out.extend_from_slice(&page(SERIAL, 1, 0, 0, &[opus_tags(&comments)]));

    let packets: Vec<Vec<u8>> = (0..spec.packets)
        .map(|i| {
            let mut p = i.to_be_bytes().to_vec();
            p.resize(40, 0);
            p
        })
        .collect();
    let per_page = spec.packets_per_page.max(1) as usize;
    let pages = packets.chunks(per_page).count();
    let mut written = 0u64;
    for (n, chunk) in packets.chunks(per_page).enumerate() {
        written += chunk.len() as u64 * u64::from(spec.packet_frames);
        let last = n + 1 == pages;
        let granule = match spec.final_granule {
            Some(g) if last => g,
            _ => written as i64,
        };
        let header_type = if last { 0x04 } else { 0 };
        out.extend_from_slice(&page(SERIAL, n as u32 + 2, header_type, granule, chunk));
    }
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use decoder::ogg::PageHeader;

    #[test]
    fn crc_of_empty_is_zero() {
        assert_eq!(crc32(&[]), 0);
    }

    #[test]
    fn page_header_parses() {
        let p = page(7, 3, 0, 960, &[vec![1, 2, 3]]);
        let h = PageHeader::parse(&p).unwrap();
        assert_eq!(h.serial, 7);
        assert_eq!(h.sequence, 3);
        assert_eq!(h.granule, 960);
        assert_eq!(h.segments, 1);
    }

    #[test]
    fn long_packet_laces_with_255() {
        let p = page(1, 0, 0, 0, &[vec![0u8; 600]]);
        assert_eq!(&p[26..30], &[3, 255, 255, 90]);
    }
}
