//! Container reader: the fixed header, the script header and the two tables
//! the decoder consults (strings and entrypoints).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::codec::TextCodec;
use crate::error::DesirError;
use crate::reader::Reader;

pub const MAGIC: &[u8; 3] = b"SIR";
const VERSION_PTR32: u8 = b'0';
const VERSION_PTR64: u8 = b'1';
const SCRIPT_HEADER_PTR_OFFSET: usize = 4;
const ENTRYPOINT_RECORD_SIZE: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptHeader {
    pub filename_offset: u32,
    pub entrypoint_table_offset: u32,
    pub string_count: u32,
    pub string_table_offset: u32,
    pub label_table_offset: u32,
    pub variable_table_offset: u32,
}

/// A loaded script image. Immutable once parsed.
#[derive(Debug, Clone)]
pub struct ScriptImage {
    bytes: Vec<u8>,
    pointer_width: usize,
    header: ScriptHeader,
}

impl ScriptImage {
    pub fn parse(bytes: Vec<u8>) -> Result<Self, DesirError> {
        let mut r = Reader::new(&bytes);
        let magic = r.get_bytes(3)?;
        if magic != MAGIC {
            return Err(DesirError::BadMagic([magic[0], magic[1], magic[2]]));
        }
        let pointer_width = match r.get_u8()? {
            VERSION_PTR32 => 4,
            VERSION_PTR64 => return Err(DesirError::UnsupportedFormatVersion(VERSION_PTR64)),
            other => return Err(DesirError::UnknownFormatVersion(other)),
        };

        let mut r = Reader::at(&bytes, SCRIPT_HEADER_PTR_OFFSET);
        let script_header_offset = r.get_u32()?;

        let mut r = Reader::at(&bytes, script_header_offset as usize);
        let header = ScriptHeader {
            filename_offset: r.get_u32()?,
            entrypoint_table_offset: r.get_u32()?,
            string_count: r.get_u32()?,
            string_table_offset: r.get_u32()?,
            label_table_offset: r.get_u32()?,
            variable_table_offset: r.get_u32()?,
        };
        log::debug!("script header at 0x{script_header_offset:X}: {header:?}");

        Ok(Self {
            bytes,
            pointer_width,
            header,
        })
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn pointer_width(&self) -> usize {
        self.pointer_width
    }

    pub fn header(&self) -> &ScriptHeader {
        &self.header
    }

    pub fn reader_at(&self, pos: usize) -> Reader<'_> {
        Reader::at(&self.bytes, pos)
    }

    /// The script's own (ASCII) file name, used to name the listing.
    pub fn filename(&self) -> Result<String, DesirError> {
        let offset = self.header.filename_offset as usize;
        let raw = self.reader_at(offset).get_cstr()?;
        if !raw.is_ascii() {
            return Err(DesirError::InvalidFilename(offset));
        }
        Ok(raw.iter().map(|&b| b as char).collect())
    }

    // Only the 4-byte layout survives `parse`.
    fn read_pointer(&self, pos: usize) -> Result<usize, DesirError> {
        Ok(self.reader_at(pos).get_u32()? as usize)
    }
}

/// Resolves string ids through the image's string table.
pub struct StringTable<'a> {
    image: &'a ScriptImage,
    codec: &'a dyn TextCodec,
}

impl<'a> StringTable<'a> {
    pub fn new(image: &'a ScriptImage, codec: &'a dyn TextCodec) -> Self {
        Self { image, codec }
    }

    pub fn count(&self) -> u32 {
        self.image.header.string_count
    }

    pub fn resolve(&self, id: u16) -> Result<String, DesirError> {
        let id = u32::from(id);
        if id >= self.count() {
            return Err(DesirError::StringIdOutOfRange { id, count: self.count() });
        }
        let slot = self.image.header.string_table_offset as usize + self.image.pointer_width * id as usize;
        let text_offset = self.image.read_pointer(slot)?;
        self.text_at(text_offset)
    }

    /// Decodes the NUL-terminated run at an absolute offset.
    pub fn text_at(&self, offset: usize) -> Result<String, DesirError> {
        let raw = self.image.reader_at(offset).get_cstr()?;
        Ok(self.codec.decode_text(raw))
    }
}

/// Function entrypoints, keyed by instruction address.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntrypointTable {
    entries: BTreeMap<u32, String>,
}

impl EntrypointTable {
    pub fn read(image: &ScriptImage, strings: &StringTable<'_>) -> Result<Self, DesirError> {
        let mut entries: BTreeMap<u32, String> = BTreeMap::new();
        let mut pos = image.header.entrypoint_table_offset as usize;
        loop {
            let mut r = image.reader_at(pos);
            let address = r.get_u32()?;
            let name_offset = r.get_u32()?;
            pos += ENTRYPOINT_RECORD_SIZE;
            if address == 0 && name_offset == 0 {
                break;
            }
            let name = strings.text_at(name_offset as usize)?;
            log::debug!("entrypoint 0x{address:04X} {name}");
            if let Some(first) = entries.get(&address) {
                return Err(DesirError::DuplicateEntrypoint {
                    address,
                    first: first.clone(),
                    second: name,
                });
            }
            entries.insert(address, name);
        }
        Ok(Self { entries })
    }

    pub fn get(&self, address: u32) -> Option<&str> {
        self.entries.get(&address).map(String::as_str)
    }

    /// Entry addresses in ascending order.
    pub fn addresses(&self) -> impl Iterator<Item = u32> + '_ {
        self.entries.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &str)> + '_ {
        self.entries.iter().map(|(a, n)| (*a, n.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(u32, String)> for EntrypointTable {
    fn from_iter<I: IntoIterator<Item = (u32, String)>>(iter: I) -> Self {
        Self { entries: iter.into_iter().collect() }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Assembles small script images for tests.

    use byteorder::{ByteOrder, LittleEndian};

    pub struct ImageBuilder {
        pub code: Vec<u8>,
        pub strings: Vec<Vec<u8>>,
        pub entrypoints: Vec<(u32, Vec<u8>)>,
        pub filename: Vec<u8>,
    }

    impl ImageBuilder {
        pub fn new(code: &[u8]) -> Self {
            Self {
                code: code.to_vec(),
                strings: Vec::new(),
                entrypoints: Vec::new(),
                filename: b"b32".to_vec(),
            }
        }

        pub fn string(mut self, s: &str) -> Self {
            self.strings.push(s.as_bytes().to_vec());
            self
        }

        pub fn entry(mut self, address: u32, name: &str) -> Self {
            self.entrypoints.push((address, name.as_bytes().to_vec()));
            self
        }

        /// Layout: fixed header (0x10 bytes), code, blobs, script header,
        /// string table, entrypoint table.
        pub fn build(&self) -> Vec<u8> {
            let mut out = vec![0u8; 0x10];
            out[..4].copy_from_slice(b"SIR0");
            out.extend_from_slice(&self.code);

            let filename_offset = blob(&mut out, &self.filename);
            let string_offsets: Vec<u32> = self.strings.iter().map(|s| blob(&mut out, s)).collect();
            let name_offsets: Vec<u32> = self.entrypoints.iter().map(|(_, n)| blob(&mut out, n)).collect();

            let header_offset = out.len() as u32;
            let string_table_offset = header_offset + 24;
            let entrypoint_table_offset = string_table_offset + 4 * string_offsets.len() as u32;
            for v in [
                filename_offset,
                entrypoint_table_offset,
                string_offsets.len() as u32,
                string_table_offset,
                0,
                0,
            ] {
                push_u32(&mut out, v);
            }
            for off in string_offsets {
                push_u32(&mut out, off);
            }
            for ((addr, _), name) in self.entrypoints.iter().zip(name_offsets) {
                push_u32(&mut out, *addr);
                push_u32(&mut out, name);
            }
            push_u32(&mut out, 0);
            push_u32(&mut out, 0);

            LittleEndian::write_u32(&mut out[4..8], header_offset);
            out
        }
    }

    fn blob(out: &mut Vec<u8>, s: &[u8]) -> u32 {
        let at = out.len() as u32;
        out.extend_from_slice(s);
        out.push(0);
        at
    }

    fn push_u32(out: &mut Vec<u8>, v: u32) {
        let mut b = [0u8; 4];
        LittleEndian::write_u32(&mut b, v);
        out.extend_from_slice(&b);
    }
}

#[cfg(test)]
mod tests {
    use super::testing::ImageBuilder;
    use super::*;
    use crate::codec::ShiftJisCodec;
    use test_log::test;

    #[test]
    fn parses_header_and_filename() {
        let bytes = ImageBuilder::new(&[0x45]).string("a").build();
        let image = ScriptImage::parse(bytes).unwrap();
        assert_eq!(image.pointer_width(), 4);
        assert_eq!(image.header().string_count, 1);
        assert_eq!(image.filename().unwrap(), "b32");
    }

    #[test]
    fn non_ascii_filename_is_rejected() {
        let mut b = ImageBuilder::new(&[0x45]);
        b.filename = vec![b'b', 0x82, 0xa0];
        let image = ScriptImage::parse(b.build()).unwrap();
        assert!(matches!(image.filename(), Err(DesirError::InvalidFilename(0x11))));
    }

    #[test]
    fn rejects_bad_magic_and_versions() {
        let mut bytes = ImageBuilder::new(&[0x45]).build();
        bytes[0] = b'X';
        assert!(matches!(ScriptImage::parse(bytes.clone()), Err(DesirError::BadMagic(_))));
        bytes[0] = b'S';
        bytes[3] = b'1';
        assert!(matches!(
            ScriptImage::parse(bytes.clone()),
            Err(DesirError::UnsupportedFormatVersion(b'1'))
        ));
        bytes[3] = b'7';
        assert!(matches!(ScriptImage::parse(bytes), Err(DesirError::UnknownFormatVersion(b'7'))));
    }

    #[test]
    fn resolves_strings_and_rejects_out_of_range_ids() {
        let bytes = ImageBuilder::new(&[0x45]).string("first").string("second").build();
        let image = ScriptImage::parse(bytes).unwrap();
        let strings = StringTable::new(&image, &ShiftJisCodec);
        assert_eq!(strings.resolve(0).unwrap(), "first");
        assert_eq!(strings.resolve(1).unwrap(), "second");
        assert!(matches!(
            strings.resolve(2),
            Err(DesirError::StringIdOutOfRange { id: 2, count: 2 })
        ));
    }

    #[test]
    fn reads_entrypoints_until_sentinel() {
        let bytes = ImageBuilder::new(&[0x45]).entry(0x10, "main").entry(0x20, "sub").build();
        let image = ScriptImage::parse(bytes).unwrap();
        let strings = StringTable::new(&image, &ShiftJisCodec);
        let table = EntrypointTable::read(&image, &strings).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.get(0x20), Some("sub"));
        assert_eq!(table.addresses().collect::<Vec<_>>(), vec![0x10, 0x20]);
    }

    #[test]
    fn duplicate_entrypoint_is_fatal() {
        let bytes = ImageBuilder::new(&[0x45]).entry(0x10, "a").entry(0x10, "b").build();
        let image = ScriptImage::parse(bytes).unwrap();
        let strings = StringTable::new(&image, &ShiftJisCodec);
        match EntrypointTable::read(&image, &strings) {
            Err(DesirError::DuplicateEntrypoint { address, first, second }) => {
                assert_eq!(address, 0x10);
                assert_eq!(first, "a");
                assert_eq!(second, "b");
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
