use std::sync::Mutex;

/// Append-only log of progress lines for one erase job.
///
/// The single shared mutable resource between the background erase task and
/// foreground observers: one appender, many readers. Lines are appended
/// whole under the lock, so a reader never observes a torn line.
#[derive(Debug, Default)]
pub struct JobLog {
    lines: Mutex<Vec<String>>,
}

impl JobLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, line: impl Into<String>) {
        let line = line.into();
        log::debug!("job log: {line}");
        self.lines.lock().unwrap().push(line);
    }

    /// Copy of every line appended so far, in order.
    pub fn snapshot(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.lines.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Lines appended at or after `index`; lets a foreground consumer tail
    /// the log incrementally.
    pub fn read_from(&self, index: usize) -> Vec<String> {
        let lines = self.lines.lock().unwrap();
        lines.get(index..).unwrap_or(&[]).to_vec()
    }
}
