//! Elementary-stream video framing and codec sequence-header parsing.
//!
//! [`framer::SequenceFramer`] splits a byte stream into start-code-delimited units; the per-codec
//! submodules decode the picture-size/aspect-ratio/frame-rate fields out of those units once a
//! sequence/SPS has been located.

pub mod framer;
pub mod h264;
pub mod h265;
pub mod mpeg2;

pub use framer::{ebsp_to_rbsp, SequenceFramer, MAX_SEQUENCE_SIZE};

/// Codec discriminant selecting which start-code convention and parser a [`VideoParser`] uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoCodec {
    Mpeg2,
    H264,
    H265,
}

/// Picture geometry and timing recovered from a codec's sequence header, normalized across
/// MPEG-2/H.264/H.265 so callers don't need to match on [`VideoCodec`] themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PictureGeometry {
    pub horizontal_size: u32,
    pub vertical_size: u32,
    pub sample_aspect_ratio: Option<(u32, u32)>,
}

/// Drives a [`SequenceFramer`] configured for one codec and decodes the first sequence header /
/// SPS found in each unit it frames, caching the most recent result.
pub struct VideoParser {
    codec: VideoCodec,
    framer: SequenceFramer,
    geometry: Option<PictureGeometry>,
}

impl VideoParser {
    /// Creates a parser for `codec`, configuring the internal framer with that codec's start
    /// code convention (MPEG-2 frames on its own `00 00 01 B3` sequence header code; H.264/H.265
    /// frame on any `00 00 01` prefix, since access units are NAL-unit delimited rather than
    /// codec-specific-start-code delimited).
    pub fn new(codec: VideoCodec) -> Self {
        let framer = match codec {
            VideoCodec::Mpeg2 => SequenceFramer::new(mpeg2::SEQUENCE_HEADER_START_CODE, 0xFFFF_FFFF),
            VideoCodec::H264 | VideoCodec::H265 => SequenceFramer::new(0x0000_0100, 0xFFFF_FF00),
        };
        Self {
            codec,
            framer,
            geometry: None,
        }
    }

    /// Feeds a chunk of elementary-stream bytes, updating [`VideoParser::geometry`] whenever a
    /// complete unit yields a decodable sequence header.
    pub fn feed(&mut self, bytes: &[u8]) {
        let codec = self.codec;
        let geometry = &mut self.geometry;
        self.framer.feed(bytes, |unit| {
            let decoded = match codec {
                VideoCodec::Mpeg2 => mpeg2::parse_sequence(unit).map(|h| PictureGeometry {
                    horizontal_size: h.display_size().0,
                    vertical_size: h.display_size().1,
                    sample_aspect_ratio: h.aspect_ratio(),
                }),
                VideoCodec::H264 => h264::parse_access_unit(unit).map(|h| PictureGeometry {
                    horizontal_size: h.display_width(),
                    vertical_size: h.display_height(),
                    sample_aspect_ratio: h.sample_aspect_ratio(),
                }),
                VideoCodec::H265 => h265::parse_access_unit(unit).map(|h| PictureGeometry {
                    horizontal_size: h.display_width(),
                    vertical_size: h.display_height(),
                    sample_aspect_ratio: h.sample_aspect_ratio(),
                }),
            };
            if let Some(g) = decoded {
                *geometry = Some(g);
            }
        });
    }

    /// Most recently decoded picture geometry, if any.
    pub fn geometry(&self) -> Option<PictureGeometry> {
        self.geometry
    }

    /// Discards all buffered framing and decoded state.
    pub fn reset(&mut self) {
        self.framer.reset();
        self.geometry = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn h264_parser_recovers_geometry_across_feed_calls() {
        // Reuse the scenario-S2 SPS bytes built in h264::tests, fed through two calls.
        // profile_idc baseline(66), level 30, width_mbs_minus1=79, height_map_minus1=44
        let mut w = TestBitWriter::new();
        w.put(66, 8);
        w.put(0, 8);
        w.put(30, 8);
        w.put_ue(0);
        w.put_ue(0);
        w.put_ue(0);
        w.put_ue(0);
        w.put_ue(1);
        w.put(0, 1);
        w.put_ue(79);
        w.put_ue(44);
        w.put(1, 1);
        w.put(0, 1);
        w.put(0, 1);
        w.put(0, 1);
        let sps_bits = w.finish();
        let mut nal = vec![0x00, 0x00, 0x01, h264::NAL_TYPE_SPS];
        nal.extend_from_slice(&sps_bits);
        nal.extend_from_slice(&[0x00, 0x00, 0x01, h264::NAL_TYPE_AUD, 0xF0]);

        let mut parser = VideoParser::new(VideoCodec::H264);
        parser.feed(&nal[..nal.len() / 2]);
        parser.feed(&nal[nal.len() / 2..]);

        let geometry = parser.geometry().unwrap();
        assert_eq!(geometry.horizontal_size, 1280);
        assert_eq!(geometry.vertical_size, 720);
    }

    struct TestBitWriter {
        bytes: Vec<u8>,
        buf: u32,
        len: u32,
    }

    impl TestBitWriter {
        fn new() -> Self {
            Self {
                bytes: Vec::new(),
                buf: 0,
                len: 0,
            }
        }
        fn put(&mut self, value: u32, nbits: u32) {
            let mask = if nbits == 32 { u32::MAX } else { (1u32 << nbits) - 1 };
            self.buf = (self.buf << nbits) | (value & mask);
            self.len += nbits;
            while self.len >= 8 {
                let shift = self.len - 8;
                self.bytes.push(((self.buf >> shift) & 0xFF) as u8);
                self.len -= 8;
            }
        }
        fn put_ue(&mut self, value: u32) {
            let code_num = value + 1;
            let bits = 32 - code_num.leading_zeros();
            for _ in 0..bits - 1 {
                self.put(0, 1);
            }
            self.put(code_num, bits);
        }
        fn finish(mut self) -> Vec<u8> {
            if self.len > 0 {
                let pad = 8 - self.len;
                self.buf <<= pad;
                self.bytes.push((self.buf & 0xFF) as u8);
            }
            self.bytes
        }
    }
}
