//! DSF and DSDIFF fixtures.

use byteorder::{BigEndian, LittleEndian, WriteBytesExt};

/// DSD64 clock rate.
pub const DSD64: u32 = 2_822_400;

/// Byte `i` of channel `ch` in the test payload. Distinct per channel and
/// never the silence pattern, so padding is easy to spot.
pub fn dsd_byte(ch: usize, i: usize) -> u8 {
    let v = ((i * 7 + ch * 101) % 251) as u8;
    if v == 0x69 {
        0x6A
    } else {
        v
    }
}

/// Options for [`dsf_bytes`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DsfSpec {
    /// DSD clock rate.
    pub rate: u32,
    /// Bytes per channel per block.
    pub block_size: u32,
    /// Bytes of payload per channel.
    pub bytes_per_channel: usize,
    /// 1 = LSB first (bit-reversed on disk), 8 = MSB first.
    pub bits_per_sample: u32,
}

impl Default for DsfSpec {
    fn default() -> Self {
        Self {
            rate: DSD64,
            block_size: 4096,
            bytes_per_channel: 4096 * 3,
            bits_per_sample: 8,
        }
    }
}

/// A stereo DSF file. The logical (MSB-first) payload is [`dsd_byte`];
/// with `bits_per_sample == 1` it is stored bit-reversed. The last block
/// is zero-filled to the block size.
pub fn dsf_bytes(spec: &DsfSpec) -> Vec<u8> {
    let block = spec.block_size as usize;
    let blocks = spec.bytes_per_channel.div_ceil(block);
    let data_len = blocks * block * 2;
    let stored = |b: u8| if spec.bits_per_sample == 1 { b.reverse_bits() } else { b };

    let mut out = Vec::with_capacity(92 + data_len);
    out.extend_from_slice(b"DSD ");
    out.write_u64::<LittleEndian>(28).ok();
    out.write_u64::<LittleEndian>((92 + data_len) as u64).ok();
    out.write_u64::<LittleEndian>(0).ok(); // no metadata

    out.extend_from_slice(b"fmt ");
    out.write_u64::<LittleEndian>(52).ok();
    out.write_u32::<LittleEndian>(1).ok(); // version
    out.write_u32::<LittleEndian>(0).ok(); // raw DSD
    out.write_u32::<LittleEndian>(2).ok(); // channel type: stereo
    out.write_u32::<LittleEndian>(2).ok();
    out.write_u32::<LittleEndian>(spec.rate).ok();
    out.write_u32::<LittleEndian>(spec.bits_per_sample).ok();
    out.write_u64::<LittleEndian>(spec.bytes_per_channel as u64 * 8).ok();
    out.write_u32::<LittleEndian>(spec.block_size).ok();
    out.write_u32::<LittleEndian>(0).ok();

    out.extend_from_slice(b"data");
    out.write_u64::<LittleEndian>((12 + data_len) as u64).ok();
    for b in 0..blocks {
        for ch in 0..2 {
            for j in 0..block {
                let i = b * block + j;
                let byte = if i < spec.bytes_per_channel {
                    stored(dsd_byte(ch, i))
                } else {
                    0
                };
                out.push(byte);
            }
        }
    }
    out
}

fn chunk(id: &[u8; 4], body: &[u8], out: &mut Vec<u8>) {
    out.extend_from_slice(id);
    out.write_u64::<BigEndian>(body.len() as u64).ok();
    out.extend_from_slice(body);
    if body.len() % 2 == 1 {
        out.push(0);
    }
}

/// A stereo DSDIFF file with `bytes_per_channel` interleaved bytes per
/// channel. `compression` goes into `CMPR` (`DSD ` for raw).
pub fn dff_bytes(rate: u32, bytes_per_channel: usize, compression: &[u8; 4]) -> Vec<u8> {
    let mut prop = b"SND ".to_vec();
    chunk(b"FS  ", &rate.to_be_bytes(), &mut prop);
    let mut chnl = 2u16.to_be_bytes().to_vec();
    chnl.extend_from_slice(b"SLFTSRGT");
    chunk(b"CHNL", &chnl, &mut prop);
    let mut cmpr = compression.to_vec();
    cmpr.push(14);
    cmpr.extend_from_slice(b"not compressed");
    chunk(b"CMPR", &cmpr, &mut prop);

    let mut body = b"DSD ".to_vec();
    chunk(b"FVER", &0x0105_0000u32.to_be_bytes(), &mut body);
    chunk(b"PROP", &prop, &mut body);
    let data: Vec<u8> = (0..bytes_per_channel)
        .flat_map(|i| [dsd_byte(0, i), dsd_byte(1, i)])
        .collect();
    chunk(b"DSD ", &data, &mut body);

    let mut out = b"FRM8".to_vec();
    out.write_u64::<BigEndian>(body.len() as u64).ok();
    out.extend_from_slice(&body);
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use decoder::engine::dsd::{parse_dff, parse_dsf};
    use std::io::Cursor;

    #[test]
    fn dsf_header_parses() {
        let bytes = dsf_bytes(&DsfSpec::default());
        let h = parse_dsf(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(h.dsd_rate, DSD64);
        assert_eq!(h.data_start, 92);
        assert_eq!(h.block_size, 4096);
        assert!(!h.lsb_first);
    }

    #[test]
    fn dff_header_parses() {
        let bytes = dff_bytes(DSD64, 100, b"DSD ");
        let len = bytes.len() as u64;
        let h = parse_dff(&mut Cursor::new(bytes), len).unwrap();
        assert_eq!(h.dsd_rate, DSD64);
        assert_eq!(h.data_len, 200);
    }
}
