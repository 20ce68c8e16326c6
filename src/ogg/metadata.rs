//! `OpusHead` / `OpusTags` parsing (RFC 7845 sections 5.1, 5.2).

use crate::DecoderError;

const OPUS_HEAD_SIGNATURE: &[u8] = b"OpusHead";
const OPUS_TAGS_SIGNATURE: &[u8] = b"OpusTags";
const OPUS_HEAD_LEN: usize = 19;

/// Fields extracted from an `OpusHead` packet.
pub(super) struct OpusHead {
    pub(super) channel_count: u8,
    pub(super) pre_skip: u16,
}

/// Parses an `OpusHead` packet.
///
/// Returns `Ok(None)` if `packet` does not start with the `OpusHead` signature: that
/// just means it is a different kind of packet, not a parse failure.
pub(super) fn parse_head(packet: &[u8]) -> Result<Option<OpusHead>, DecoderError> {
    if !packet.starts_with(OPUS_HEAD_SIGNATURE) {
        return Ok(None);
    }
    if packet.len() < OPUS_HEAD_LEN {
        return Err(DecoderError::BadArgument("OpusHead packet is too small"));
    }

    let channel_count = packet[9];
    let pre_skip = u16::from_le_bytes([packet[10], packet[11]]);
    let input_sample_rate = u32::from_le_bytes([packet[12], packet[13], packet[14], packet[15]]);
    // Bytes 16-17 (output gain, Q7.8 dB) are intentionally not applied: like the
    // reference decoder, we leave output scaling to the caller.
    let channel_mapping = packet[18];

    if channel_count == 0 || channel_count > 2 {
        return Err(DecoderError::ChannelsUnsupported);
    }
    if input_sample_rate != 48_000 {
        return Err(DecoderError::InvalidSampleRate);
    }
    if channel_mapping > 1 {
        return Err(DecoderError::ExtraChannelsUnsupported);
    }

    Ok(Some(OpusHead {
        channel_count,
        pre_skip,
    }))
}

/// A cursor over a byte slice with checked, panic-free reads.
struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn skip(&mut self, n: usize) -> Option<()> {
        if self.pos + n > self.buf.len() {
            return None;
        }
        self.pos += n;
        Some(())
    }

    fn u32_le(&mut self) -> Option<u32> {
        let bytes: [u8; 4] = self.buf.get(self.pos..self.pos + 4)?.try_into().ok()?;
        self.pos += 4;
        Some(u32::from_le_bytes(bytes))
    }

    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        let slice = self.buf.get(self.pos..self.pos + n)?;
        self.pos += n;
        Some(slice)
    }
}

/// Parses an `OpusTags` packet and extracts the stream title.
///
/// Returns `None` if `packet` is not an `OpusTags` packet, or if it carries neither an
/// `artist=` nor a `title=` comment. Comment keys are matched case-sensitively, as the
/// reference decoder does. When both are present the title is `"<artist> - <title>"`;
/// otherwise whichever one was found is returned on its own.
pub(super) fn parse_tags(packet: &[u8]) -> Option<String> {
    if !packet.starts_with(OPUS_TAGS_SIGNATURE) {
        return None;
    }

    let mut cursor = Cursor::new(packet);
    cursor.skip(8)?;
    let vendor_len = cursor.u32_le()? as usize;
    cursor.skip(vendor_len)?;
    let comment_count = cursor.u32_le()?;

    let mut artist: Option<String> = None;
    let mut title: Option<String> = None;

    for _ in 0..comment_count {
        let len = cursor.u32_le()? as usize;
        let raw = cursor.take(len)?;
        let text = String::from_utf8_lossy(raw);

        if let Some(value) = text.strip_prefix("artist=") {
            artist = Some(value.to_owned());
        } else if let Some(value) = text.strip_prefix("title=") {
            title = Some(value.to_owned());
        }
    }

    match (artist, title) {
        (Some(a), Some(t)) => Some(format!("{a} - {t}")),
        (Some(a), None) => Some(a),
        (None, Some(t)) => Some(t),
        (None, None) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opus_head(channels: u8, pre_skip: u16, sample_rate: u32, mapping: u8) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(OPUS_HEAD_SIGNATURE);
        buf.push(1); // version
        buf.push(channels);
        buf.extend_from_slice(&pre_skip.to_le_bytes());
        buf.extend_from_slice(&sample_rate.to_le_bytes());
        buf.extend_from_slice(&0i16.to_le_bytes()); // output gain
        buf.push(mapping);
        buf
    }

    fn comment(text: &str) -> Vec<u8> {
        let mut buf = (text.len() as u32).to_le_bytes().to_vec();
        buf.extend_from_slice(text.as_bytes());
        buf
    }

    fn opus_tags(comments: &[&str]) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(OPUS_TAGS_SIGNATURE);
        let vendor = b"test vendor";
        buf.extend_from_slice(&(vendor.len() as u32).to_le_bytes());
        buf.extend_from_slice(vendor);
        buf.extend_from_slice(&(comments.len() as u32).to_le_bytes());
        for c in comments {
            buf.extend_from_slice(&comment(c));
        }
        buf
    }

    #[test]
    fn parses_a_valid_head() {
        let buf = opus_head(2, 312, 48_000, 0);
        let head = parse_head(&buf).unwrap().unwrap();
        assert_eq!(head.channel_count, 2);
        assert_eq!(head.pre_skip, 312);
    }

    #[test]
    fn rejects_wrong_sample_rate() {
        let buf = opus_head(2, 0, 44_100, 0);
        assert!(matches!(
            parse_head(&buf),
            Err(DecoderError::InvalidSampleRate)
        ));
    }

    #[test]
    fn rejects_too_many_channels() {
        let buf = opus_head(3, 0, 48_000, 0);
        assert!(matches!(
            parse_head(&buf),
            Err(DecoderError::ChannelsUnsupported)
        ));
    }

    #[test]
    fn rejects_extended_channel_mapping() {
        let buf = opus_head(2, 0, 48_000, 2);
        assert!(matches!(
            parse_head(&buf),
            Err(DecoderError::ExtraChannelsUnsupported)
        ));
    }

    #[test]
    fn non_head_packet_is_not_an_error() {
        assert!(parse_head(b"OpusTags...").unwrap().is_none());
    }

    #[test]
    fn extracts_artist_and_title() {
        let buf = opus_tags(&["artist=Foo", "title=Bar"]);
        assert_eq!(parse_tags(&buf).as_deref(), Some("Foo - Bar"));
    }

    #[test]
    fn extracts_title_only() {
        let buf = opus_tags(&["title=Bar"]);
        assert_eq!(parse_tags(&buf).as_deref(), Some("Bar"));
    }

    #[test]
    fn ignores_unrelated_comments() {
        let buf = opus_tags(&["encoder=libopus", "album=Baz"]);
        assert_eq!(parse_tags(&buf), None);
    }

    #[test]
    fn case_sensitive_key_match() {
        let buf = opus_tags(&["Artist=Foo"]);
        assert_eq!(parse_tags(&buf), None);
    }
}
