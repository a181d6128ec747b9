//! Cleartext audit log.
//!
//! Appends one line per processed message to a file. The log stores every
//! plaintext next to its ciphertext preview, so it defeats the encryption
//! layer by construction. It is only opened when explicitly configured.

use std::{
    fs::{self, File, OpenOptions},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

use parking_lot::Mutex;
use parley_core::AuditRecord;

use crate::error::ChatError;

const RULE: &str =
    "================================================================================";

/// Append-only audit log shared by an endpoint's workers.
#[derive(Debug, Clone)]
pub struct AuditLog {
    path: PathBuf,
    file: Arc<Mutex<BufWriter<File>>>,
}

impl AuditLog {
    /// Open `path` for appending, creating parent directories.
    ///
    /// A header is written when the file is new or empty.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ChatError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let is_empty = file.metadata()?.len() == 0;
        let mut writer = BufWriter::new(file);

        if is_empty {
            writeln!(writer, "{RULE}")?;
            writeln!(writer, "PARLEY CONVERSATION LOG (CLEARTEXT)")?;
            writeln!(writer, "{RULE}")?;
            writeln!(
                writer,
                "Format: [DateTime] | [Direction] | [Message] | [Encrypted (HEX)] | \
                 [Encryption Details] | [Data Length]"
            )?;
            writeln!(writer, "{RULE}")?;
            writer.flush()?;
        }

        tracing::warn!(
            path = %path.display(),
            "audit log enabled: messages are stored in cleartext"
        );
        Ok(Self { path, file: Arc::new(Mutex::new(writer)) })
    }

    /// Path of the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record, stamped with local time.
    pub fn append(&self, record: &AuditRecord) -> Result<(), ChatError> {
        let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
        let line = record.to_line(&timestamp);

        let mut file = self.file.lock();
        writeln!(file, "{line}")?;
        file.flush()?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use bytes::Bytes;
    use parley_core::Direction;
    use parley_proto::Envelope;

    use super::*;

    fn record(text: &str) -> AuditRecord {
        let envelope = Envelope::new(
            Bytes::from(vec![0x11; 16]),
            Bytes::from(vec![0x22; text.len() + 16]),
            Bytes::from(vec![0x33; 16]),
        );
        AuditRecord::new(Direction::Sent, "Server", "Client", text.as_bytes(), &envelope)
    }

    #[test]
    fn header_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("messages.txt");

        AuditLog::open(&path).unwrap().append(&record("first")).unwrap();
        AuditLog::open(&path).unwrap().append(&record("second")).unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents.matches("PARLEY CONVERSATION LOG").count(), 1);

        let entries: Vec<_> = contents.lines().filter(|l| l.starts_with('[')).collect();
        assert_eq!(entries.len(), 2);
        assert!(entries[0].contains("| Server -> Client | first |"));
        assert!(entries[1].contains("| Server -> Client | second |"));
    }

    #[test]
    fn clones_append_to_the_same_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.txt");

        let log = AuditLog::open(&path).unwrap();
        let clone = log.clone();
        log.append(&record("a")).unwrap();
        clone.append(&record("b")).unwrap();

        let contents = fs::read_to_string(log.path()).unwrap();
        assert!(contents.contains("| a |"));
        assert!(contents.contains("| b |"));
    }
}
