//! Per-block-file metadata records.

use votad_primitives::encoding::{DecodeError, Decoder, Encoder};

pub(crate) const META_LAST_BLOCK_FILE_KEY: &[u8] = b"blockfiles:last_file";
pub(crate) const META_REINDEXING_KEY: &[u8] = b"blockfiles:reindexing";

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct BlockFileInfo {
    pub blocks: u32,
    pub size: u64,
    pub undo_size: u64,
    pub height_first: i32,
    pub height_last: i32,
    pub time_first: u32,
    pub time_last: u32,
}

impl BlockFileInfo {
    pub fn encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::new();
        encoder.write_u32_le(self.blocks);
        encoder.write_u64_le(self.size);
        encoder.write_u64_le(self.undo_size);
        encoder.write_i32_le(self.height_first);
        encoder.write_i32_le(self.height_last);
        encoder.write_u32_le(self.time_first);
        encoder.write_u32_le(self.time_last);
        encoder.into_inner()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut decoder = Decoder::new(bytes);
        let blocks = decoder.read_u32_le()?;
        let size = decoder.read_u64_le()?;
        let undo_size = decoder.read_u64_le()?;
        let height_first = decoder.read_i32_le()?;
        let height_last = decoder.read_i32_le()?;
        let time_first = decoder.read_u32_le()?;
        let time_last = decoder.read_u32_le()?;
        if !decoder.is_empty() {
            return Err(DecodeError::TrailingBytes);
        }
        Ok(Self {
            blocks,
            size,
            undo_size,
            height_first,
            height_last,
            time_first,
            time_last,
        })
    }
}

pub fn block_file_key(file_id: u32) -> [u8; 4] {
    file_id.to_le_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_info_roundtrip() {
        let info = BlockFileInfo {
            blocks: 12,
            size: 4_000_000,
            undo_size: 80_000,
            height_first: 100,
            height_last: 111,
            time_first: 1_600_000_000,
            time_last: 1_600_001_000,
        };
        assert_eq!(BlockFileInfo::decode(&info.encode()), Ok(info));
    }
}
