use super::{verify_chain, AuditEvent, AuditSink};
use crate::error::AuditError;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Append-only JSONL audit log. One event per line.
///
/// Only newline-terminated lines count. An unterminated last line is the
/// remains of an interrupted append: verification ignores it and [`open`]
/// cuts it off before appending.
///
/// [`open`]: FileAuditLog::open
#[derive(Debug)]
pub struct FileAuditLog {
    path: PathBuf,
    inner: Mutex<FileState>,
}

#[derive(Debug)]
struct FileState {
    file: File,
    last_hash: [u8; 32],
}

impl FileAuditLog {
    /// Open (or create) the log, continuing the chain from its last event.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AuditError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut last_hash = [0u8; 32];
        if path.exists() {
            let scan = scan(&path)?;
            last_hash = scan.events.last().map_or([0u8; 32], |e| e.hash);
            if scan.torn_bytes > 0 {
                warn!(
                    path = %path.display(),
                    bytes = scan.torn_bytes,
                    "dropping torn audit tail"
                );
                OpenOptions::new().write(true).open(&path)?.set_len(scan.complete_len)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            inner: Mutex::new(FileState { file, last_hash }),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Verify the chain stored at `path`. Returns the number of events checked.
    /// A torn last line is not counted.
    pub fn verify_file(path: impl AsRef<Path>) -> Result<usize, AuditError> {
        let scan = scan(path.as_ref())?;
        verify_chain(&scan.events)?;
        Ok(scan.events.len())
    }
}

impl AuditSink for FileAuditLog {
    fn record(&self, event: AuditEvent) -> Result<AuditEvent, AuditError> {
        let mut state = self.inner.lock();
        let event = event.chained(state.last_hash);
        let mut line = serde_json::to_string(&event)?;
        line.push('\n');
        state.file.write_all(line.as_bytes())?;
        state.file.flush()?;
        state.last_hash = event.hash;
        Ok(event)
    }
}

struct Scan {
    events: Vec<AuditEvent>,
    complete_len: u64,
    torn_bytes: usize,
}

fn scan(path: &Path) -> Result<Scan, AuditError> {
    let bytes = std::fs::read(path)?;
    let complete = bytes.iter().rposition(|b| *b == b'\n').map_or(0, |i| i + 1);
    let mut events = Vec::new();
    for line in bytes[..complete].split(|b| *b == b'\n') {
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        events.push(serde_json::from_slice(line)?);
    }
    Ok(Scan {
        events,
        complete_len: complete as u64,
        torn_bytes: bytes.len() - complete,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::{AuditOperation, AuditOutcome};
    use crate::types::Actor;

    fn event() -> AuditEvent {
        AuditEvent::new(Actor::system(), AuditOperation::Commit, AuditOutcome::Succeeded)
    }

    #[test]
    fn reopen_continues_the_chain() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");

        let log = FileAuditLog::open(&path).unwrap();
        log.record(event()).unwrap();
        drop(log);

        let log = FileAuditLog::open(&path).unwrap();
        log.record(event()).unwrap();
        assert_eq!(FileAuditLog::verify_file(&path).unwrap(), 2);
    }

    #[test]
    fn edited_line_is_detected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let log = FileAuditLog::open(&path).unwrap();
        log.record(event()).unwrap();
        log.record(event()).unwrap();
        drop(log);

        let text = std::fs::read_to_string(&path).unwrap();
        std::fs::write(&path, text.replacen("\"succeeded\"", "\"failed\"", 1)).unwrap();
        assert!(matches!(
            FileAuditLog::verify_file(&path),
            Err(AuditError::IntegrityViolation { index: 0 })
        ));
    }

    #[test]
    fn torn_tail_is_ignored_and_cut_on_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let log = FileAuditLog::open(&path).unwrap();
        log.record(event()).unwrap();
        log.record(event()).unwrap();
        drop(log);

        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"{\"id\":\"trunc").unwrap();
        drop(file);
        assert_eq!(FileAuditLog::verify_file(&path).unwrap(), 2);

        let log = FileAuditLog::open(&path).unwrap();
        log.record(event()).unwrap();
        drop(log);
        assert_eq!(FileAuditLog::verify_file(&path).unwrap(), 3);
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(!text.contains("trunc"));
    }

    #[test]
    fn corrupt_complete_line_still_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let log = FileAuditLog::open(&path).unwrap();
        log.record(event()).unwrap();
        drop(log);

        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"not json\n").unwrap();
        drop(file);
        assert!(matches!(
            FileAuditLog::verify_file(&path),
            Err(AuditError::Serialization(_))
        ));
    }
}
