//! Random access over a captured trace buffer.

use tracing::debug;

use crate::error::{try_reserve, ModelError, Result};
use crate::trace::event::{decode, Event};
use crate::trace::record::{RecordHeader, HEADER_SIZE};

/// An immutable trace buffer plus the byte offset and effective time of
/// every record in it.
///
/// Records without a timestamp of their own inherit the time of the last
/// timed record before them, so `times` is non-decreasing and can be
/// binary-searched.
#[derive(Debug)]
pub struct TraceEventLog {
    data: Vec<u8>,
    offsets: Vec<usize>,
    times: Vec<i64>,
}

impl TraceEventLog {
    /// Index a buffer by walking its record headers.
    pub fn from_buffer(data: Vec<u8>) -> Result<Self> {
        let mut offsets = Vec::new();
        let mut offset = 0;
        while offset < data.len() {
            let header =
                RecordHeader::read(&data[offset..]).ok_or_else(|| ModelError::MalformedRecord {
                    offset,
                    reason: "truncated header".to_string(),
                })?;
            try_reserve(&mut offsets, 1, "indexing trace records")?;
            offsets.push(offset);
            offset += HEADER_SIZE + usize::from(header.size());
        }
        Self::with_offsets(data, offsets)
    }

    /// Build a log from a buffer and an offset table produced elsewhere.
    ///
    /// Offsets must be strictly increasing and every record must lie within
    /// the buffer and decode cleanly.
    pub fn with_offsets(data: Vec<u8>, offsets: Vec<usize>) -> Result<Self> {
        let mut record_times = Vec::new();
        try_reserve(&mut record_times, offsets.len(), "indexing trace record times")?;

        let mut last_timed: Option<i64> = None;
        let mut last_offset = None;
        for (index, &offset) in offsets.iter().enumerate() {
            if last_offset.is_some_and(|last| offset <= last) {
                return Err(ModelError::InvalidOffsetTable { index });
            }
            last_offset = Some(offset);

            let time = decode_at(&data, offset)?.time();
            if let Some(time) = time {
                if last_timed.is_some_and(|last| time < last) {
                    return Err(ModelError::NonMonotonicTime { index });
                }
                last_timed = Some(time);
            }
            record_times.push(time);
        }

        // Untimed records take the time of the last timed record before
        // them; leading ones take the first timed record's time.
        let mut last_time = record_times.iter().flatten().next().copied().unwrap_or(0);
        let times = record_times
            .into_iter()
            .map(|time| {
                if let Some(time) = time {
                    last_time = time;
                }
                last_time
            })
            .collect();

        debug!("Indexed {} trace records ({} bytes)", offsets.len(), data.len());
        Ok(Self {
            data,
            offsets,
            times,
        })
    }

    /// Number of records in the log.
    pub fn count(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Decode the record at `index`, or `None` if out of range.
    pub fn event_at(&self, index: usize) -> Option<Event<'_>> {
        let offset = *self.offsets.get(index)?;
        decode_at(&self.data, offset).ok()
    }

    /// Byte offset of the record at `index`.
    pub fn offset_at(&self, index: usize) -> Option<usize> {
        self.offsets.get(index).copied()
    }

    /// Effective time of the record at `index`.
    pub fn time_at(&self, index: usize) -> Option<i64> {
        self.times.get(index).copied()
    }

    /// Index of the first record whose effective time is `>= time`; equals
    /// `count()` when every record is earlier.
    pub fn closest_index_at_or_after(&self, time: i64) -> usize {
        self.times.partition_point(|&t| t < time)
    }

    /// Effective time of the first record, if any.
    pub fn first_time(&self) -> Option<i64> {
        self.times.first().copied()
    }

    /// Effective time of the last record, if any.
    pub fn last_time(&self) -> Option<i64> {
        self.times.last().copied()
    }

    /// Iterate `(index, event)` pairs starting at `start`.
    pub fn iter_from(&self, start: usize) -> impl Iterator<Item = (usize, Event<'_>)> + '_ {
        (start..self.count()).filter_map(move |index| Some((index, self.event_at(index)?)))
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

fn decode_at(data: &[u8], offset: usize) -> Result<Event<'_>> {
    let malformed = |reason: String| ModelError::MalformedRecord { offset, reason };

    let header = data
        .get(offset..)
        .and_then(RecordHeader::read)
        .ok_or_else(|| malformed("truncated header".to_string()))?;
    let start = offset + HEADER_SIZE;
    let end = start + usize::from(header.size());
    let payload = data.get(start..end).ok_or_else(|| {
        malformed(format!(
            "record claims {} payload bytes past the end of the buffer",
            header.size()
        ))
    })?;
    decode(header, payload).map_err(malformed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::writer::TraceWriter;

    fn sample_log() -> TraceEventLog {
        let mut writer = TraceWriter::new();
        writer.team_added(1, "kernel_team");
        writer.thread_added(1, 10, "idle");
        writer.thread_scheduled(100, 10, -1);
        writer.thread_enqueued(200, 10, 10);
        writer.thread_removed(1, 10);
        writer.thread_scheduled(300, 10, 10);
        writer.into_log().unwrap()
    }

    #[test]
    fn test_effective_times_and_search() {
        let log = sample_log();
        assert_eq!(log.count(), 6);
        assert_eq!(log.time_at(0), Some(100));
        assert_eq!(log.time_at(2), Some(100));
        assert_eq!(log.time_at(4), Some(200));
        assert_eq!(log.first_time(), Some(100));
        assert_eq!(log.last_time(), Some(300));

        assert_eq!(log.closest_index_at_or_after(0), 0);
        assert_eq!(log.closest_index_at_or_after(100), 0);
        assert_eq!(log.closest_index_at_or_after(101), 3);
        assert_eq!(log.closest_index_at_or_after(150), 3);
        assert_eq!(log.closest_index_at_or_after(200), 3);
        assert_eq!(log.closest_index_at_or_after(301), 6);
    }

    #[test]
    fn test_untimed_only_log_starts_at_zero() {
        let mut writer = TraceWriter::new();
        writer.team_added(1, "kernel_team");
        writer.thread_added(1, 10, "idle");
        let log = writer.into_log().unwrap();
        assert_eq!(log.time_at(0), Some(0));
        assert_eq!(log.time_at(1), Some(0));
        assert_eq!(log.first_time(), Some(0));
    }

    #[test]
    fn test_out_of_range_is_none() {
        let log = sample_log();
        assert!(log.event_at(6).is_none());
        assert!(log.time_at(100).is_none());
        assert!(matches!(log.event_at(1), Some(Event::ThreadAdded { thread: 10, .. })));
    }

    #[test]
    fn test_truncated_buffer_is_rejected() {
        let mut writer = TraceWriter::new();
        writer.thread_scheduled(100, 10, -1);
        let mut data = writer.into_bytes();
        data.truncate(data.len() - 3);

        let err = TraceEventLog::from_buffer(data).unwrap_err();
        assert!(matches!(err, ModelError::MalformedRecord { offset: 0, .. }));
    }

    #[test]
    fn test_time_going_backwards_is_rejected() {
        let mut writer = TraceWriter::new();
        writer.thread_scheduled(100, 10, -1);
        writer.thread_scheduled(50, 11, 10);
        let err = TraceEventLog::from_buffer(writer.into_bytes()).unwrap_err();
        assert_eq!(err, ModelError::NonMonotonicTime { index: 1 });
    }

    #[test]
    fn test_unknown_records_are_kept() {
        let mut writer = TraceWriter::new();
        writer.raw_record(99, &[1, 2, 3]);
        writer.thread_scheduled(5, 1, -1);
        let log = writer.into_log().unwrap();
        assert_eq!(log.count(), 2);
        assert_eq!(log.event_at(0), Some(Event::Unknown { kind: 99 }));
        assert_eq!(log.time_at(0), Some(5));
        assert!(matches!(log.event_at(1), Some(Event::ThreadScheduled(_))));
    }

    #[test]
    fn test_offset_table_must_increase() {
        let mut writer = TraceWriter::new();
        writer.thread_enqueued(1, 1, 0);
        writer.thread_enqueued(2, 1, 0);
        let data = writer.into_bytes();
        let err = TraceEventLog::with_offsets(data, vec![20, 0]).unwrap_err();
        assert_eq!(err, ModelError::InvalidOffsetTable { index: 1 });
    }
}
