//! Progress reporting for long-running table migrations.

/// Sink for user-visible progress of migrations and upgrades.
pub trait ProgressSink {
    fn progress(&self, title: &str, percent: u32);
}

/// Discards all progress reports.
pub struct NullProgress;

impl ProgressSink for NullProgress {
    fn progress(&self, _title: &str, _percent: u32) {}
}

/// Estimate completion through a uniformly distributed keyspace from the high
/// 16 bits of the current key.
pub fn keyspace_percent(key: &[u8]) -> u32 {
    let high = match (key.first(), key.get(1)) {
        (Some(first), Some(second)) => ((*first as u32) << 8) + (*second as u32),
        (Some(first), None) => (*first as u32) << 8,
        _ => 0,
    };
    ((high as f64) * 100.0 / 65_536.0 + 0.5) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyspace_percent_bounds() {
        assert_eq!(keyspace_percent(&[]), 0);
        assert_eq!(keyspace_percent(&[0x00, 0x00]), 0);
        assert_eq!(keyspace_percent(&[0x80, 0x00]), 50);
        assert_eq!(keyspace_percent(&[0xff, 0xff]), 100);
    }
}
