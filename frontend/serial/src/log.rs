use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use common::CommunicationError;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogDirection {
    Inbound,
    Outbound,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SerialLogEntry {
    pub direction: LogDirection,
    pub timestamp: DateTime<Utc>,
    pub text: String,
}

/// Most recent lines exchanged with the controller, oldest evicted first
pub struct SerialLog {
    entries: Mutex<VecDeque<SerialLogEntry>>,
    capacity: usize,
}

impl SerialLog {
    pub fn new(capacity: usize) -> Self {
        SerialLog {
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn push(&self, direction: LogDirection, text: &str) -> SerialLogEntry {
        let entry = SerialLogEntry {
            direction,
            timestamp: Utc::now(),
            text: text.to_owned(),
        };

        let mut entries = self.entries.lock();
        if self.capacity > 0 {
            while entries.len() >= self.capacity {
                entries.pop_front();
            }
            entries.push_back(entry.clone());
        }

        entry
    }

    /// Snapshot in insertion order
    pub fn recent(&self) -> Vec<SerialLogEntry> {
        self.entries.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

/// Accumulates raw reads and hands out complete lines
pub struct LineBuffer {
    buffer: Vec<u8>,
    last_end: usize,
}

impl LineBuffer {
    pub fn new(capacity: usize) -> Self {
        LineBuffer {
            buffer: vec![0; capacity.max(1)],
            last_end: 0,
        }
    }

    /// Space the next read should fill
    pub fn spare(&mut self) -> &mut [u8] {
        &mut self.buffer[self.last_end..]
    }

    /// Accounts for `read` new bytes and calls `on_line` with every complete
    /// line, terminator included. A partial line that fills the whole buffer
    /// is discarded.
    pub fn commit<F: FnMut(&[u8])>(&mut self, read: usize, mut on_line: F) -> Result<(), CommunicationError> {
        let available = (self.last_end + read).min(self.buffer.len());

        let mut removed = 0;
        for frame in self.buffer[..available].split_inclusive(common::end_of_frame) {
            match frame.last() {
                Some(byte) if common::end_of_frame(byte) => on_line(frame),
                _ => {
                    removed = frame.len();
                    break;
                }
            }
        }

        if removed == self.buffer.len() {
            self.last_end = 0;
            return Err(CommunicationError::BufferFull);
        }

        self.buffer.copy_within(available - removed..available, 0);
        self.last_end = removed;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(lines: &mut LineBuffer, bytes: &[u8]) -> Result<Vec<String>, CommunicationError> {
        let spare = lines.spare();
        spare[..bytes.len()].copy_from_slice(bytes);

        let mut out = Vec::new();
        lines.commit(bytes.len(), |frame| out.push(String::from_utf8_lossy(frame).into_owned()))?;
        Ok(out)
    }

    #[test]
    fn log_evicts_oldest() {
        let log = SerialLog::new(3);
        for i in 0..5 {
            log.push(LogDirection::Inbound, &format!("line {}", i));
        }

        let texts: Vec<_> = log.recent().into_iter().map(|entry| entry.text).collect();
        assert_eq!(texts, ["line 2", "line 3", "line 4"]);
    }

    #[test]
    fn log_keeps_direction_and_order() {
        let log = SerialLog::new(10);
        log.push(LogDirection::Outbound, "drive 0 0");
        log.push(LogDirection::Inbound, "ok");

        let entries = log.recent();
        assert_eq!(entries[0].direction, LogDirection::Outbound);
        assert_eq!(entries[1].direction, LogDirection::Inbound);
        assert!(entries[0].timestamp <= entries[1].timestamp);
    }

    #[test]
    fn lines_split_across_reads() {
        let mut lines = LineBuffer::new(32);
        assert_eq!(feed(&mut lines, b"mode 0\nmo").unwrap(), ["mode 0\n"]);
        assert_eq!(feed(&mut lines, b"de 1\n\n").unwrap(), ["mode 1\n", "\n"]);
        assert!(feed(&mut lines, b"").unwrap().is_empty());
    }

    #[test]
    fn overlong_line_is_dropped() {
        let mut lines = LineBuffer::new(8);
        assert_eq!(feed(&mut lines, b"12345678"), Err(CommunicationError::BufferFull));
        assert_eq!(feed(&mut lines, b"ok\n").unwrap(), ["ok\n"]);
    }
}
