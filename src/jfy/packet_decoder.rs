use crate::jfy::packet::{FRAME_OVERHEAD, HEADER, LENGTH_OFFSET};

use bytes::{Buf, BytesMut};
use log::debug;
use tokio_util::codec::Decoder;

/// Splits the serial byte stream into frames. Bytes ahead of a frame header
/// are discarded; whether a frame's contents are valid is left to the parser.
#[derive(Debug, Default)]
pub struct PacketDecoder;

impl PacketDecoder {
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for PacketDecoder {
    type Item = BytesMut;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<BytesMut>, Self::Error> {
        // addresses never take the header value, so in a run of header
        // bytes the frame starts at the last pair
        let start = (0..src.len().saturating_sub(1)).find(|&i| {
            src[i..i + 2] == HEADER && src.get(i + 2) != Some(&HEADER[0])
        });

        match start {
            Some(0) => {}
            Some(pos) => {
                debug!("discarding {} bytes ahead of frame header", pos);
                src.advance(pos);
            }
            None => {
                // keep a trailing header byte, the rest of the header may follow
                let keep = usize::from(src.last() == Some(&HEADER[0]));
                let discard = src.len() - keep;
                if discard > 0 {
                    debug!("discarding {} bytes with no frame header", discard);
                    src.advance(discard);
                }
                return Ok(None);
            }
        }

        if src.len() <= LENGTH_OFFSET {
            return Ok(None);
        }

        let frame_len = FRAME_OVERHEAD + src[LENGTH_OFFSET] as usize;
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        Ok(Some(src.split_to(frame_len)))
    }
}
