use encoding_rs::{CoderResult, Decoder, DecoderResult};

use crate::error::DecodeError;

use super::types::{DecodePolicy, TextMode};

/// Incremental decoder for one stream. Multi-byte sequences split across
/// chunk boundaries are carried over to the next call.
pub struct StreamDecoder {
    decoder: Decoder,
    mode: TextMode,
    consumed: usize,
}

impl StreamDecoder {
    pub fn new(mode: TextMode) -> Self {
        Self {
            decoder: mode.encoding.new_decoder_without_bom_handling(),
            mode,
            consumed: 0,
        }
    }

    /// Decode `chunk` and append the text to `dst`. `last` flushes any
    /// incomplete trailing sequence.
    pub fn decode(
        &mut self,
        chunk: &[u8],
        dst: &mut String,
        last: bool,
    ) -> Result<(), DecodeError> {
        match self.mode.policy {
            DecodePolicy::Replace => {
                self.decode_replacing(chunk, dst, last);
                Ok(())
            }
            DecodePolicy::Strict | DecodePolicy::Ignore => self.decode_checked(chunk, dst, last),
        }
    }

    fn decode_replacing(&mut self, mut src: &[u8], dst: &mut String, last: bool) {
        loop {
            reserve(dst, self.decoder.max_utf8_buffer_length(src.len()), src.len());
            let (result, read, _replaced) = self.decoder.decode_to_string(src, dst, last);
            src = &src[read..];
            self.consumed += read;
            match result {
                CoderResult::InputEmpty => return,
                CoderResult::OutputFull => continue,
            }
        }
    }

    fn decode_checked(
        &mut self,
        mut src: &[u8],
        dst: &mut String,
        last: bool,
    ) -> Result<(), DecodeError> {
        loop {
            reserve(
                dst,
                self.decoder
                    .max_utf8_buffer_length_without_replacement(src.len()),
                src.len(),
            );
            let (result, read) = self
                .decoder
                .decode_to_string_without_replacement(src, dst, last);
            src = &src[read..];
            self.consumed += read;
            match result {
                DecoderResult::InputEmpty => return Ok(()),
                DecoderResult::OutputFull => continue,
                DecoderResult::Malformed(bad, after) => {
                    if self.mode.policy == DecodePolicy::Ignore {
                        continue;
                    }
                    let offset = self
                        .consumed
                        .saturating_sub(bad as usize + after as usize);
                    return Err(DecodeError {
                        encoding: self.mode.encoding.name(),
                        offset,
                    });
                }
            }
        }
    }
}

fn reserve(dst: &mut String, needed: Option<usize>, src_len: usize) {
    let needed = needed.unwrap_or_else(|| src_len.saturating_mul(3).saturating_add(16));
    dst.reserve(needed);
}

/// Decode a complete buffer with the same rules the streaming decoder uses.
pub fn decode_all(bytes: &[u8], mode: TextMode) -> Result<String, DecodeError> {
    let mut out = String::new();
    StreamDecoder::new(mode).decode(bytes, &mut out, true)?;
    Ok(out)
}
