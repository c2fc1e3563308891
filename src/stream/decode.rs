//! Incremental UTF-8 decoding of transport chunks.

use std::char::REPLACEMENT_CHARACTER;

/// Converts raw byte chunks into text as they arrive.
///
/// A multi-byte character split across chunk boundaries is held back until
/// the rest of it arrives. Byte sequences that can never become valid UTF-8
/// are replaced with U+FFFD so a corrupt byte cannot stall the stream.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    remainder: Vec<u8>,
}

impl Utf8Decoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode one chunk and return the text that is complete so far.
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        let mut out = String::with_capacity(chunk.len());
        self.decode_into(chunk, &mut out);
        out
    }

    /// Decode one chunk, appending complete text to `out`.
    pub fn decode_into(&mut self, chunk: &[u8], out: &mut String) {
        if chunk.is_empty() {
            return;
        }
        if self.remainder.is_empty() {
            push_lossy(chunk, out, &mut self.remainder);
        } else {
            let mut joined = std::mem::take(&mut self.remainder);
            joined.extend_from_slice(chunk);
            push_lossy(&joined, out, &mut self.remainder);
        }
    }

    /// Bytes of an unfinished character still waiting for more input.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.remainder.len()
    }

    /// Flush at end of stream. An unfinished character becomes U+FFFD.
    pub fn finish(&mut self) -> Option<String> {
        if self.remainder.is_empty() {
            return None;
        }
        self.remainder.clear();
        Some(REPLACEMENT_CHARACTER.to_string())
    }
}

fn push_lossy(mut bytes: &[u8], out: &mut String, remainder: &mut Vec<u8>) {
    loop {
        match std::str::from_utf8(bytes) {
            Ok(text) => {
                out.push_str(text);
                return;
            }
            Err(e) => {
                let valid_up_to = e.valid_up_to();
                // Safety: valid_up_to is guaranteed to be a valid UTF-8 boundary.
                let text = unsafe { std::str::from_utf8_unchecked(&bytes[..valid_up_to]) };
                out.push_str(text);
                match e.error_len() {
                    Some(invalid_len) => {
                        out.push(REPLACEMENT_CHARACTER);
                        bytes = &bytes[valid_up_to + invalid_len..];
                    }
                    None => {
                        // Truncated sequence at the end; wait for the next chunk.
                        remainder.extend_from_slice(&bytes[valid_up_to..]);
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ascii_passes_through() {
        let mut decoder = Utf8Decoder::new();
        assert_eq!(decoder.decode(b"data: hi\n"), "data: hi\n");
        assert_eq!(decoder.pending_len(), 0);
        assert!(decoder.finish().is_none());
    }

    #[test]
    fn test_multibyte_split_at_every_boundary() {
        let text = "节奏控制 🚀 ok";
        let bytes = text.as_bytes();
        for split in 0..=bytes.len() {
            let mut decoder = Utf8Decoder::new();
            let mut out = decoder.decode(&bytes[..split]);
            out.push_str(&decoder.decode(&bytes[split..]));
            assert_eq!(out, text, "split at byte {split}");
            assert!(decoder.finish().is_none());
        }
    }

    #[test]
    fn test_one_byte_at_a_time() {
        let text = "héllo wörld ✓";
        let mut decoder = Utf8Decoder::new();
        let mut out = String::new();
        for byte in text.as_bytes() {
            decoder.decode_into(std::slice::from_ref(byte), &mut out);
        }
        assert_eq!(out, text);
    }

    #[test]
    fn test_held_back_bytes_are_not_emitted_early() {
        let euro = "€".as_bytes();
        let mut decoder = Utf8Decoder::new();
        assert_eq!(decoder.decode(&euro[..2]), "");
        assert_eq!(decoder.pending_len(), 2);
        assert_eq!(decoder.decode(&euro[2..]), "€");
    }

    #[test]
    fn test_invalid_bytes_become_replacement_characters() {
        let mut decoder = Utf8Decoder::new();
        let out = decoder.decode(b"a\xffb\xc3\x28c");
        assert_eq!(out, "a\u{fffd}b\u{fffd}(c");
        assert_eq!(decoder.pending_len(), 0);
    }

    #[test]
    fn test_finish_flushes_truncated_tail() {
        let mut decoder = Utf8Decoder::new();
        let out = decoder.decode(&"ok€".as_bytes()[..3]);
        assert_eq!(out, "ok");
        assert_eq!(decoder.finish().as_deref(), Some("\u{fffd}"));
        assert!(decoder.finish().is_none());
    }
}
