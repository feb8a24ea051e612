/// Maps a NUL-free byte run from the image to display text.
pub trait TextCodec {
    fn decode_text(&self, bytes: &[u8]) -> String;
}

/// Script text codec. WHATWG Shift_JIS rather than strict JIS X 0208, since
/// scripts use the NEC/IBM extension rows (circled digits and the like).
#[derive(Debug, Clone, Copy, Default)]
pub struct ShiftJisCodec;

impl TextCodec for ShiftJisCodec {
    fn decode_text(&self, bytes: &[u8]) -> String {
        let (s, _, had_errors) = encoding_rs::SHIFT_JIS.decode(bytes);
        if had_errors {
            log::warn!("undecodable bytes in script text {:02X?}", bytes);
        }
        s.into_owned()
    }
}

impl<F> TextCodec for F
where
    F: Fn(&[u8]) -> String,
{
    fn decode_text(&self, bytes: &[u8]) -> String {
        self(bytes)
    }
}
