//! Pure decompression of the LZF format used for compressed snapshot strings.

use crate::error::{Error, Result};

/// Decompresses `input` into exactly `out_len` bytes.
///
/// The stream is a sequence of one-byte control tokens. A token below 32
/// starts a literal run of `token + 1` bytes; anything else is a
/// back-reference into the output produced so far, with a minimum copy
/// length of 2.
pub(crate) fn decompress(input: &[u8], out_len: usize) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(out_len);
    let mut i = 0;
    while i < input.len() {
        let ctrl = input[i] as usize;
        i += 1;
        if ctrl < 32 {
            let run = ctrl + 1;
            if i + run > input.len() {
                return Err(Error::Truncated);
            }
            out.extend_from_slice(&input[i..i + run]);
            i += run;
        } else {
            let mut len = ctrl >> 5;
            if len == 7 {
                len += *input.get(i).ok_or(Error::Truncated)? as usize;
                i += 1;
            }
            let low = *input.get(i).ok_or(Error::Truncated)? as usize;
            i += 1;
            let offset = ((ctrl & 0x1F) << 8 | low) + 1;
            if offset > out.len() {
                return Err(Error::InvalidLzf);
            }
            // Copy byte by byte: the reference may overlap the bytes this
            // copy itself produces.
            let mut pos = out.len() - offset;
            for _ in 0..len + 2 {
                let byte = out[pos];
                out.push(byte);
                pos += 1;
            }
        }
    }
    if out.len() != out_len {
        return Err(Error::InvalidLzf);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::decompress;
    use crate::error::Error;

    // Literal-run-only compressor, enough to produce valid streams for
    // round-trip checks.
    fn compress_literals(data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        for chunk in data.chunks(32) {
            out.push((chunk.len() - 1) as u8);
            out.extend_from_slice(chunk);
        }
        out
    }

    #[test]
    fn literal_run() {
        let out = decompress(&[0x02, b'a', b'b', b'c'], 3).unwrap();
        assert_eq!(out, b"abc");
    }

    #[test]
    fn back_reference() {
        // "a" followed by a five byte copy of itself
        let out = decompress(&[0x00, b'a', 0x60, 0x00], 6).unwrap();
        assert_eq!(out, b"aaaaaa");
    }

    #[test]
    fn long_back_reference() {
        // control 0xE0 extends the copy length with the next byte
        let out = decompress(&[0x00, b'a', 0xE0, 0x02, 0x00], 12).unwrap();
        assert_eq!(out, b"aaaaaaaaaaaa");
    }

    #[test]
    fn overlapping_copy_repeats_pattern() {
        let out = decompress(&[0x01, b'a', b'b', 0x60, 0x01], 7).unwrap();
        assert_eq!(out, b"abababa");
    }

    #[test]
    fn truncated_literal_run() {
        assert!(matches!(decompress(&[0x05, b'a'], 6), Err(Error::Truncated)));
    }

    #[test]
    fn reference_before_start_of_output() {
        assert!(matches!(decompress(&[0x20, 0x05], 3), Err(Error::InvalidLzf)));
    }

    #[test]
    fn output_length_must_match() {
        assert!(matches!(decompress(&[0x00, b'a'], 2), Err(Error::InvalidLzf)));
    }

    proptest! {
        #[test]
        fn round_trips_literal_runs(data in proptest::collection::vec(any::<u8>(), 0..512)) {
            let compressed = compress_literals(&data);
            prop_assert_eq!(decompress(&compressed, data.len()).unwrap(), data);
        }
    }
}
