//! SLIP framing (RFC 1055).
//!
//! ```text
//!   END | escaped datagram | END
//! ```
//!
//! Inside a frame, `END` (0xC0) is sent as `ESC ESC_END` (0xDB 0xDC) and
//! `ESC` (0xDB) as `ESC ESC_ESC` (0xDB 0xDD).

use crate::Result;

/// Frame delimiter.
pub const END: u8 = 0xC0;
/// Escape byte.
pub const ESC: u8 = 0xDB;
/// Follows `ESC` to stand for a literal `END`.
pub const ESC_END: u8 = 0xDC;
/// Follows `ESC` to stand for a literal `ESC`.
pub const ESC_ESC: u8 = 0xDD;

/// Encodes one datagram as a complete SLIP frame, delimiters included.
pub fn encode(datagram: &[u8]) -> Vec<u8> {
    // Worst case every byte needs escaping.
    let mut frame = Vec::with_capacity(datagram.len() * 2 + 2);

    frame.push(END);

    for &byte in datagram {
        match byte {
            END => frame.extend_from_slice(&[ESC, ESC_END]),
            ESC => frame.extend_from_slice(&[ESC, ESC_ESC]),
            byte => frame.push(byte),
        }
    }

    frame.push(END);

    frame
}

/// Incremental SLIP decoder for one serial line.
///
/// Bytes may arrive in arbitrary chunks: a frame, a delimiter, or even an
/// escape sequence can be split across calls to [SlipDecoder::feed]. The
/// decoder keeps the unescaped bytes of the frame in progress and whether the
/// last byte seen was an unresolved `ESC`.
#[derive(Debug, Default)]
pub struct SlipDecoder {
    buf: Vec<u8>,
    escaped: bool,
}

impl SlipDecoder {
    /// Creates a decoder with an empty accumulation buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Consumes `chunk`, calling `deliver` once for every frame it completes.
    ///
    /// Empty frames (back-to-back delimiters) are ignored. An `ESC` at the end
    /// of `chunk` is held until the next call.
    ///
    /// # Errors
    ///
    /// If `deliver` fails, the error is logged, the decoder is reset to an
    /// empty buffer, and decoding continues with the rest of `chunk`. The first
    /// such error is returned once the whole chunk has been consumed.
    pub fn feed<F>(&mut self, chunk: &[u8], mut deliver: F) -> Result<()>
    where
        F: FnMut(Vec<u8>) -> Result<()>,
    {
        let mut first_err = None;

        for &byte in chunk {
            if self.escaped {
                self.escaped = false;

                match byte {
                    ESC_END => self.buf.push(END),
                    ESC_ESC => self.buf.push(ESC),
                    // Protocol violation: keep the byte as is.
                    byte => self.buf.push(byte),
                }

                continue;
            }

            match byte {
                END => {
                    if self.buf.is_empty() {
                        continue;
                    }

                    let frame = std::mem::take(&mut self.buf);

                    if let Err(err) = deliver(frame) {
                        crate::warn!("datagram handler failed, frame dropped: {err}");
                        self.reset();

                        first_err.get_or_insert(err);
                    }
                }
                ESC => self.escaped = true,
                byte => self.buf.push(byte),
            }
        }

        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Discards the frame in progress.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.escaped = false;
    }

    /// Returns the number of unescaped bytes buffered for the frame in
    /// progress.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use proptest::prelude::*;

    fn decode_chunks(chunks: &[&[u8]]) -> Vec<Vec<u8>> {
        let mut decoder = SlipDecoder::new();
        let mut frames = Vec::new();

        for chunk in chunks {
            decoder
                .feed(chunk, |frame| {
                    frames.push(frame);
                    Ok(())
                })
                .unwrap();
        }

        frames
    }

    proptest! {
        #[test]
        fn slip_arbitrary_chunking_yields_one_frame(
            datagram in prop::collection::vec(
                prop_oneof![Just(END), Just(ESC), any::<u8>()],
                1..128,
            ),
            cuts in prop::collection::vec(any::<prop::sample::Index>(), 0..8),
        ) {
            let frame = encode(&datagram);

            let mut cuts: Vec<usize> = cuts.iter().map(|c| c.index(frame.len() + 1)).collect();
            cuts.sort_unstable();

            let mut chunks = Vec::new();
            let mut start = 0;
            for cut in cuts {
                chunks.push(&frame[start..cut]);
                start = cut;
            }
            chunks.push(&frame[start..]);

            prop_assert_eq!(decode_chunks(&chunks), vec![datagram]);
        }
    }

    #[test]
    fn slip_encode_escapes() {
        assert_eq!(
            encode(b"\xc0\xdb\x01"),
            vec![END, ESC, ESC_END, ESC, ESC_ESC, 0x01, END]
        );
    }

    #[test]
    fn slip_split_mid_escape() {
        let frames = decode_chunks(&[&[END, 0x01, ESC], &[ESC_END, 0x02, END]]);
        assert_eq!(frames, vec![vec![0x01, END, 0x02]]);
    }

    #[test]
    fn slip_lone_delimiter_flushes() {
        let frames = decode_chunks(&[&[0x01, 0x02], &[END]]);
        assert_eq!(frames, vec![vec![0x01, 0x02]]);
    }

    #[test]
    fn slip_back_to_back_delimiters_ignored() {
        let frames = decode_chunks(&[&[END, END, END], &[END]]);
        assert!(frames.is_empty());
    }

    #[test]
    fn slip_multiple_frames_in_one_chunk() {
        let frames = decode_chunks(&[&[END, 0x01, END, END, 0x02, 0x03, END, 0x04]]);
        assert_eq!(frames, vec![vec![0x01], vec![0x02, 0x03]]);
    }

    #[test]
    fn slip_handler_failure_resets_and_continues() {
        let mut decoder = SlipDecoder::new();
        let mut frames = Vec::new();

        let chunk = [END, 0x01, END, 0x02, END, 0x03];
        let res = decoder.feed(&chunk, |frame| {
            if frame == [0x01] {
                return Err(Error::NoLocalAddress);
            }
            frames.push(frame);
            Ok(())
        });

        assert!(matches!(res, Err(Error::NoLocalAddress)));
        assert_eq!(frames, vec![vec![0x02]]);
        assert_eq!(decoder.pending(), 1);

        decoder
            .feed(&[END], |frame| {
                frames.push(frame);
                Ok(())
            })
            .unwrap();
        assert_eq!(frames, vec![vec![0x02], vec![0x03]]);
    }
}
