//! Transaction output reference.

use crate::encoding::{DecodeError, Decoder, Encoder};
use crate::Hash256;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct OutPoint {
    pub txid: Hash256,
    pub vout: u32,
}

impl OutPoint {
    pub fn new(txid: Hash256, vout: u32) -> Self {
        Self { txid, vout }
    }

    pub fn null() -> Self {
        Self {
            txid: [0u8; 32],
            vout: u32::MAX,
        }
    }

    pub fn encode_into(&self, encoder: &mut Encoder) {
        encoder.write_hash(&self.txid);
        encoder.write_u32_le(self.vout);
    }

    pub fn decode_from(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let txid = decoder.read_hash()?;
        let vout = decoder.read_u32_le()?;
        Ok(Self { txid, vout })
    }
}
