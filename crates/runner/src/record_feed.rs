//! Record Feed - upstream market records from a line-oriented stream
//!
//! Each line is one JSON-encoded [`UpstreamRecord`]. Lines that do not
//! parse are logged and skipped; the stream is never aborted for bad input.

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tripwire_engine::{FeedSender, UpstreamRecord};

/// Counters for one pumped stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeedStats {
    pub forwarded: u64,
    pub skipped: u64,
}

pub fn parse_record(line: &str) -> Option<UpstreamRecord> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    match serde_json::from_str(line) {
        Ok(record) => Some(record),
        Err(e) => {
            log::warn!("Skipping unparseable record: {}", e);
            None
        }
    }
}

/// Forward every record in `reader` to the engine until end of stream
pub async fn pump_records<R>(reader: R, sender: FeedSender) -> std::io::Result<FeedStats>
where
    R: AsyncBufRead + Unpin,
{
    let mut stats = FeedStats::default();
    let mut lines = reader.lines();

    while let Some(line) = lines.next_line().await? {
        match parse_record(&line) {
            Some(record) => {
                sender.push(record);
                stats.forwarded += 1;
            }
            None if line.trim().is_empty() => {}
            None => stats.skipped += 1,
        }
    }

    log::info!(
        "Record stream ended: {} forwarded, {} skipped",
        stats.forwarded,
        stats.skipped
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_record() {
        let record = parse_record(
            r#"{"type":"order_book","symbol":"BTC","bid_depth":10,"ask_depth":5,"timestamp_ms":1700000000000}"#,
        )
        .unwrap();
        assert_eq!(record.symbol(), "BTC");

        assert!(parse_record("   ").is_none());
        assert!(parse_record("{\"type\":\"weather\"}").is_none());
    }
}
