//! Ogg page framing (RFC 3533 section 6): sync word discovery and
//! segment-table reconstruction into packet lengths.
//!
//! Page CRCs are parsed but never verified, matching the reference decoder.

use crate::DecoderError;

const OGG_SYNC: &[u8; 4] = b"OggS";
const PAGE_HEADER_LEN: usize = 27;

/// The fixed fields of an Ogg page header (minus the segment table, which is
/// reconstructed separately into packet lengths).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(super) struct PageHeader {
    pub(super) bos: bool,
}

/// Finds the next `OggS` capture pattern in `buf`.
///
/// Returns the byte offset of the match. The four sync bytes themselves are not
/// consumed by this search; a caller that wants to start parsing a page must still
/// slice `buf` from the returned offset.
pub(super) fn find_sync_word(buf: &[u8]) -> Result<usize, DecoderError> {
    buf.windows(OGG_SYNC.len())
        .position(|w| w == OGG_SYNC)
        .ok_or(DecoderError::OggSyncNotFound)
}

/// Parses a page header starting at `buf[0]`, which must already be positioned at the
/// `OggS` capture pattern (the caller is expected to have resynced with
/// [`find_sync_word`] first; a mismatch here means the caller handed us a buffer that
/// is no longer aligned with our internal bookkeeping).
///
/// Returns the header, the number of bytes the fixed header and segment table occupy,
/// and the packet lengths reconstructed from the lacing values. A page whose segment
/// table ends in a run of `255` values with no terminating value describes a packet
/// continued on the next page; this decoder, like the reference, does not stitch
/// packets across page boundaries, so that trailing run is simply not reported as a
/// packet.
pub(super) fn parse_header(buf: &[u8]) -> Result<(PageHeader, usize, Vec<usize>), DecoderError> {
    if buf.len() < PAGE_HEADER_LEN {
        return Err(DecoderError::BadArgument("Ogg page header is truncated"));
    }
    if &buf[0..4] != OGG_SYNC {
        return Err(DecoderError::DecoderAsync);
    }

    let header_type = buf[5];
    let segment_count = buf[26] as usize;

    if buf.len() < PAGE_HEADER_LEN + segment_count {
        return Err(DecoderError::BadArgument("Ogg segment table is truncated"));
    }
    let lacing = &buf[PAGE_HEADER_LEN..PAGE_HEADER_LEN + segment_count];

    let mut lengths = Vec::with_capacity(segment_count);
    let mut run = 0usize;
    for &value in lacing {
        run += value as usize;
        if value != 255 {
            lengths.push(run);
            run = 0;
        }
    }

    let header = PageHeader {
        bos: header_type & 0x02 != 0,
    };

    Ok((header, PAGE_HEADER_LEN + segment_count, lengths))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page_with_lacing(lacing: &[u8], header_type: u8) -> Vec<u8> {
        let mut buf = vec![0u8; PAGE_HEADER_LEN];
        buf[0..4].copy_from_slice(OGG_SYNC);
        buf[5] = header_type;
        buf[26] = lacing.len() as u8;
        buf.extend_from_slice(lacing);
        buf.extend(std::iter::repeat(0u8).take(lacing.iter().map(|&b| b as usize).sum()));
        buf
    }

    #[test]
    fn find_sync_word_locates_offset() {
        let mut buf = vec![1, 2, 3];
        buf.extend_from_slice(OGG_SYNC);
        assert_eq!(find_sync_word(&buf).unwrap(), 3);
    }

    #[test]
    fn find_sync_word_missing_is_error() {
        assert!(find_sync_word(&[1, 2, 3]).is_err());
    }

    #[test]
    fn segment_table_reconstructs_packet_lengths() {
        // [255, 255, 10, 50] -> packets [520, 50]
        let buf = page_with_lacing(&[255, 255, 10, 50], 0);
        let (_, header_len, lengths) = parse_header(&buf).unwrap();
        assert_eq!(header_len, PAGE_HEADER_LEN + 4);
        assert_eq!(lengths, vec![520, 50]);
    }

    #[test]
    fn trailing_255_run_yields_no_final_packet() {
        let buf = page_with_lacing(&[255, 10], 0);
        let (_, _, lengths) = parse_header(&buf).unwrap();
        assert_eq!(lengths, vec![265]);

        let buf = page_with_lacing(&[10, 255], 0);
        let (_, _, lengths) = parse_header(&buf).unwrap();
        assert_eq!(lengths, vec![10]);
    }

    #[test]
    fn bos_flag_is_read() {
        let buf = page_with_lacing(&[5], 0x02);
        let (header, _, _) = parse_header(&buf).unwrap();
        assert!(header.bos);

        let buf = page_with_lacing(&[5], 0x00);
        let (header, _, _) = parse_header(&buf).unwrap();
        assert!(!header.bos);
    }

    #[test]
    fn desynced_buffer_is_rejected() {
        let mut buf = vec![0u8; PAGE_HEADER_LEN];
        buf[0..4].copy_from_slice(b"xxxx");
        assert!(matches!(parse_header(&buf), Err(DecoderError::DecoderAsync)));
    }
}
