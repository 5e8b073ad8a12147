//! Fixed-size error ring.
//!
//! Each context keeps a bounded trace of the errors the current top-level
//! operation accumulated while bubbling up. The ring has a fixed capacity
//! with mod-N wrap-around: old entries are overwritten, never reallocated,
//! and the ring is cleared on entry to every public context operation.

use std::fmt::Write as _;

use ksig_core::error::KsiError;

/// One annotated error record.
#[derive(Debug, Clone)]
pub struct ErrorEntry {
    /// Stable description of the error class.
    pub status: &'static str,
    /// External code where one exists (service wire status, HTTP status).
    pub external_status: i64,
    pub file: &'static str,
    pub line: u32,
    pub message: String,
}

/// Bounded trace of errors, most recent last.
#[derive(Debug)]
pub struct ErrorRing {
    slots: Vec<ErrorEntry>,
    capacity: usize,
    /// Total pushes since the last clear; `count % capacity` is the next
    /// slot to overwrite.
    count: usize,
}

/// Default ring capacity, matching the configurable context default.
pub const DEFAULT_CAPACITY: usize = 16;

impl ErrorRing {
    pub fn new(capacity: usize) -> Self {
        ErrorRing {
            slots: Vec::with_capacity(capacity.max(1)),
            capacity: capacity.max(1),
            count: 0,
        }
    }

    /// Records an error with its call-site annotation.
    pub fn push(&mut self, error: &KsiError, file: &'static str, line: u32) {
        let external_status = match error {
            KsiError::Service { wire_status, .. } => *wire_status as i64,
            KsiError::HttpError(status) => i64::from(*status),
            _ => 0,
        };
        let entry = ErrorEntry {
            status: error.status_text(),
            external_status,
            file,
            line,
            message: error.to_string(),
        };
        let slot = self.count % self.capacity;
        if slot < self.slots.len() {
            self.slots[slot] = entry;
        } else {
            self.slots.push(entry);
        }
        self.count += 1;
    }

    /// Forgets everything; called at the entry of each top-level
    /// operation.
    pub fn clear(&mut self) {
        self.slots.clear();
        self.count = 0;
    }

    /// Total errors pushed since the last clear (may exceed capacity).
    pub fn total(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// The earliest retained entry.
    pub fn first(&self) -> Option<&ErrorEntry> {
        self.slots.first()
    }

    /// The most recent entry.
    pub fn last(&self) -> Option<&ErrorEntry> {
        if self.count == 0 {
            return None;
        }
        self.slots.get((self.count - 1) % self.capacity)
    }

    /// Retained entries, most recent first.
    pub fn iter_recent_first(&self) -> impl Iterator<Item = &ErrorEntry> {
        let count = self.count;
        let capacity = self.capacity;
        let retained = self.slots.len();
        (0..retained).map(move |i| {
            let index = (count - 1 - i) % capacity;
            &self.slots[index]
        })
    }

    /// Renders the trace for logs, most recent entry first.
    pub fn status_dump(&self) -> String {
        let mut out = String::from("error trace:\n");
        if self.count == 0 {
            out.push_str("  no errors\n");
            return out;
        }
        for (i, entry) in self.iter_recent_first().enumerate() {
            let _ = writeln!(
                out,
                "  {:3}) {}:{} - ({}/{}) {}",
                self.count - i,
                entry.file,
                entry.line,
                entry.status,
                entry.external_status,
                entry.message
            );
        }
        if self.count > self.capacity {
            out.push_str("  ... (more errors)\n");
        }
        out
    }
}

impl Default for ErrorRing {
    fn default() -> Self {
        ErrorRing::new(DEFAULT_CAPACITY)
    }
}
