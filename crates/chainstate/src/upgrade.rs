//! One-way upgrade from the legacy per-transaction coins layout to the
//! per-output layout.

use std::sync::atomic::{AtomicBool, Ordering};

use votad_primitives::encoding::{DecodeError, Decoder, Encoder};
use votad_primitives::outpoint::OutPoint;
use votad_storage::{Column, KeyValueStore, WriteBatch};

use crate::coins::{next_key, CoinRecord, OutPointKey};
use crate::error::ChainstateError;
use crate::progress::{keyspace_percent, ProgressSink};
use crate::txindex::MigrationStatus;

const MAX_SCRIPT_SIZE: usize = 10_000;
const UPGRADE_BATCH_BYTES: usize = 16 << 20;
const UPGRADE_SCAN_PAGE: usize = 4096;

/// One output slot of a legacy record.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LegacyTxOut {
    pub value: i64,
    pub script_pubkey: Vec<u8>,
}

/// Legacy coins record: one entry per transaction, spent outputs stored as
/// empty slots.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LegacyCoinsRecord {
    pub is_coinbase: bool,
    pub height: u32,
    pub outputs: Vec<Option<LegacyTxOut>>,
}

impl LegacyCoinsRecord {
    pub fn encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::new();
        encoder.write_u8(if self.is_coinbase { 1 } else { 0 });
        encoder.write_u32_le(self.height);
        encoder.write_varint(self.outputs.len() as u64);
        for output in &self.outputs {
            match output {
                Some(txout) => {
                    encoder.write_u8(1);
                    encoder.write_i64_le(txout.value);
                    encoder.write_var_bytes(&txout.script_pubkey);
                }
                None => encoder.write_u8(0),
            }
        }
        encoder.into_inner()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut decoder = Decoder::new(bytes);
        let is_coinbase = decoder.read_u8()? != 0;
        let height = decoder.read_u32_le()?;
        let count = decoder.read_varint()?;
        let mut outputs = Vec::with_capacity(count.min(1024) as usize);
        for _ in 0..count {
            if decoder.read_u8()? == 0 {
                outputs.push(None);
                continue;
            }
            let value = decoder.read_i64_le()?;
            let script_pubkey = decoder.read_var_bytes()?;
            outputs.push(Some(LegacyTxOut {
                value,
                script_pubkey,
            }));
        }
        if !decoder.is_empty() {
            return Err(DecodeError::TrailingBytes);
        }
        Ok(Self {
            is_coinbase,
            height,
            outputs,
        })
    }
}

/// Provably unspendable outputs are dropped rather than carried forward.
pub fn is_unspendable(script_pubkey: &[u8]) -> bool {
    script_pubkey.first() == Some(&0x6a) || script_pubkey.len() > MAX_SCRIPT_SIZE
}

/// Rewrite the legacy per-transaction coin table into per-output records,
/// erasing each legacy record once its outputs are staged.
///
/// Resumable: the legacy table shrinks from the front as batches land, so a
/// restarted run continues from the first surviving record. Returns
/// [`MigrationStatus::Interrupted`] when `shutdown` is raised.
pub fn upgrade_coins<S: KeyValueStore>(
    store: &S,
    shutdown: &AtomicBool,
    progress: &dyn ProgressSink,
) -> Result<MigrationStatus, ChainstateError> {
    votad_log::log_info!("Upgrading coin database... [0%]");
    progress.progress("Upgrading coin database", 0);

    let mut batch = WriteBatch::new();
    let mut compact_from: Vec<u8> = Vec::new();
    let mut resume: Vec<u8> = Vec::new();
    let mut last_key: Vec<u8> = Vec::new();
    let mut count = 0u64;
    let mut report_done = 0u32;
    let mut interrupted = false;

    'rewrite: loop {
        let page = store.scan_from(Column::CoinsLegacy, &resume, UPGRADE_SCAN_PAGE)?;
        if page.is_empty() {
            break;
        }
        for (key, value) in &page {
            if shutdown.load(Ordering::Relaxed) {
                interrupted = true;
                break 'rewrite;
            }

            count += 1;
            if count % 256 == 0 {
                let percent = keyspace_percent(key);
                progress.progress("Upgrading coin database", percent);
                if report_done < percent / 10 {
                    votad_log::log_info!("Upgrading coin database... [{percent}%]");
                    report_done = percent / 10;
                }
            }

            let txid: [u8; 32] = key.as_slice().try_into().map_err(|_| {
                ChainstateError::corrupt("coins_legacy", key, "invalid txid key")
            })?;
            let record = LegacyCoinsRecord::decode(value)
                .map_err(|err| ChainstateError::corrupt("coins_legacy", key, err))?;

            for (vout, output) in record.outputs.iter().enumerate() {
                let Some(txout) = output else { continue };
                if is_unspendable(&txout.script_pubkey) {
                    continue;
                }
                let coin = CoinRecord {
                    value: txout.value,
                    script_pubkey: txout.script_pubkey.clone(),
                    height: record.height,
                    is_coinbase: record.is_coinbase,
                };
                let out_key = OutPointKey::new(&OutPoint::new(txid, vout as u32));
                batch.put(Column::Coin, out_key.as_bytes(), coin.encode());
            }
            batch.delete(Column::CoinsLegacy, key.as_slice());
            last_key.clone_from(key);

            if batch.size_estimate() > UPGRADE_BATCH_BYTES {
                store.write_batch(&batch)?;
                batch.clear();
                store.compact_range(Column::CoinsLegacy, &compact_from, key)?;
                compact_from.clone_from(key);
            }
        }
        resume = next_key(&last_key);
    }

    store.write_batch(&batch)?;
    store.compact_range(Column::CoinsLegacy, &compact_from, &last_key)?;

    if interrupted {
        votad_log::log_info!("Upgrading coin database... [CANCELLED]");
        return Ok(MigrationStatus::Interrupted);
    }

    progress.progress("Upgrading coin database", 100);
    votad_log::log_info!("Upgrading coin database... [DONE]");
    Ok(MigrationStatus::Completed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_record_roundtrip() {
        let record = LegacyCoinsRecord {
            is_coinbase: true,
            height: 42,
            outputs: vec![
                Some(LegacyTxOut {
                    value: 5_000_000_000,
                    script_pubkey: vec![0x76, 0xa9, 0x14],
                }),
                None,
                Some(LegacyTxOut {
                    value: 1,
                    script_pubkey: vec![0x51],
                }),
            ],
        };
        assert_eq!(LegacyCoinsRecord::decode(&record.encode()), Ok(record));
    }

    #[test]
    fn op_return_and_oversize_scripts_are_unspendable() {
        assert!(is_unspendable(&[0x6a]));
        assert!(is_unspendable(&[0x6a, 0x04, 1, 2, 3, 4]));
        assert!(is_unspendable(&vec![0x51; MAX_SCRIPT_SIZE + 1]));
        assert!(!is_unspendable(&[0x51]));
        assert!(!is_unspendable(&vec![0x51; MAX_SCRIPT_SIZE]));
    }
}
