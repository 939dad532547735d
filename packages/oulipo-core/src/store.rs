use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

use tracing::debug;

use crate::error::{Error, Result};
use crate::ids::Identifier;
use crate::span::InvariantSpan;

fn io_error<E: std::fmt::Display>(e: E) -> Error {
    Error::ContentStoreIo(e.to_string())
}

fn poisoned() -> Error {
    Error::ContentStoreIo("invariant store lock poisoned".into())
}

/// Append-only store of invariant content for one home document.
///
/// Offsets and widths are UTF-8 byte counts; the first byte is at position 1. Appends through a
/// shared reference are serialized by the implementation.
pub trait InvariantStore {
    fn home_document(&self) -> &Identifier;

    /// Append `text` after all existing content and return the span that now names it.
    fn append(&self, text: &str) -> Result<InvariantSpan>;

    /// Read back the content named by `span`.
    fn text(&self, span: &InvariantSpan) -> Result<String>;

    /// Total number of bytes stored.
    fn len(&self) -> Result<u64>;

    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

fn check_append(text: &str) -> Result<()> {
    if text.is_empty() {
        return Err(Error::InvalidOperation("cannot append empty text".into()));
    }
    Ok(())
}

fn check_readable(span: &InvariantSpan, len: u64) -> Result<()> {
    span.validate()?;
    if span.end() - 1 > len {
        return Err(Error::ContentStoreIo(format!(
            "span {}+{} reads past end of store ({len} bytes)",
            span.start, span.width
        )));
    }
    Ok(())
}

/// In-memory store, useful for tests and replay into scratch state.
#[derive(Debug)]
pub struct MemoryInvariantStore {
    home: Identifier,
    content: RwLock<String>,
}

impl MemoryInvariantStore {
    pub fn new(home: Identifier) -> Self {
        Self {
            home,
            content: RwLock::new(String::new()),
        }
    }
}

impl InvariantStore for MemoryInvariantStore {
    fn home_document(&self) -> &Identifier {
        &self.home
    }

    fn append(&self, text: &str) -> Result<InvariantSpan> {
        check_append(text)?;
        let mut content = self.content.write().map_err(|_| poisoned())?;
        let start = content.len() as u64 + 1;
        content.push_str(text);
        Ok(InvariantSpan {
            start,
            width: text.len() as u64,
            home: self.home.clone(),
        })
    }

    fn text(&self, span: &InvariantSpan) -> Result<String> {
        let content = self.content.read().map_err(|_| poisoned())?;
        check_readable(span, content.len() as u64)?;
        let from = (span.start - 1) as usize;
        let to = from + span.width as usize;
        content
            .get(from..to)
            .map(str::to_owned)
            .ok_or_else(|| {
                Error::ContentStoreIo(format!(
                    "span {}+{} does not fall on character boundaries",
                    span.start, span.width
                ))
            })
    }

    fn len(&self) -> Result<u64> {
        Ok(self.content.read().map_err(|_| poisoned())?.len() as u64)
    }
}

/// Store backed by an append-only file. Each append is synced before its span is returned.
#[derive(Debug)]
pub struct FileInvariantStore {
    home: Identifier,
    path: PathBuf,
    file: Mutex<File>,
}

impl FileInvariantStore {
    /// Open or create the store at `path`; existing content is kept and appended to.
    pub fn open(home: Identifier, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&path)
            .map_err(io_error)?;
        Ok(Self {
            home,
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl InvariantStore for FileInvariantStore {
    fn home_document(&self) -> &Identifier {
        &self.home
    }

    fn append(&self, text: &str) -> Result<InvariantSpan> {
        check_append(text)?;
        let mut file = self.file.lock().map_err(|_| poisoned())?;
        let position = file.seek(SeekFrom::End(0)).map_err(io_error)?;
        file.write_all(text.as_bytes()).map_err(io_error)?;
        file.sync_data().map_err(io_error)?;
        debug!(home = %self.home, start = position + 1, width = text.len(), "appended invariant text");
        Ok(InvariantSpan {
            start: position + 1,
            width: text.len() as u64,
            home: self.home.clone(),
        })
    }

    fn text(&self, span: &InvariantSpan) -> Result<String> {
        let mut file = self.file.lock().map_err(|_| poisoned())?;
        let len = file.metadata().map_err(io_error)?.len();
        check_readable(span, len)?;
        file.seek(SeekFrom::Start(span.start - 1)).map_err(io_error)?;
        let mut buf = vec![0u8; span.width as usize];
        file.read_exact(&mut buf).map_err(io_error)?;
        String::from_utf8(buf).map_err(io_error)
    }

    fn len(&self) -> Result<u64> {
        let file = self.file.lock().map_err(|_| poisoned())?;
        Ok(file.metadata().map_err(io_error)?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn home() -> Identifier {
        Identifier::new("ted://1.999.0.56831.0.1924.1.1")
    }

    fn exercise(store: &dyn InvariantStore) {
        let hello = store.append("Hello").unwrap();
        assert_eq!((hello.start, hello.width), (1, 5));
        let world = store.append("World").unwrap();
        assert_eq!((world.start, world.width), (6, 5));
        let middle = InvariantSpan::new(5, 5, home()).unwrap();
        assert_eq!(store.text(&middle).unwrap(), "oWorl");
        assert_eq!(store.len().unwrap(), 10);
        assert!(matches!(
            store.text(&InvariantSpan::new(8, 5, home()).unwrap()),
            Err(Error::ContentStoreIo(_))
        ));
        assert!(matches!(store.append(""), Err(Error::InvalidOperation(_))));

        let far = InvariantSpan::new(u64::MAX - 10, 5, home()).unwrap();
        assert!(matches!(store.text(&far), Err(Error::ContentStoreIo(_))));
        let wrapping = InvariantSpan {
            start: u64::MAX,
            width: 2,
            home: home(),
        };
        assert!(matches!(store.text(&wrapping), Err(Error::MalformedSpan(_))));
    }

    #[test]
    fn memory_store_appends_and_reads() {
        exercise(&MemoryInvariantStore::new(home()));
    }

    #[test]
    fn file_store_appends_and_reads() {
        let dir = tempfile::tempdir().unwrap();
        exercise(&FileInvariantStore::open(home(), dir.path().join("invariant.txt")).unwrap());
    }

    #[test]
    fn file_store_resumes_after_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("invariant.txt");
        FileInvariantStore::open(home(), &path)
            .unwrap()
            .append("abc")
            .unwrap();
        let reopened = FileInvariantStore::open(home(), &path).unwrap();
        let span = reopened.append("def").unwrap();
        assert_eq!(span.start, 4);
        assert_eq!(
            reopened.text(&InvariantSpan::new(1, 6, home()).unwrap()).unwrap(),
            "abcdef"
        );
    }

    #[test]
    fn memory_store_rejects_split_characters() {
        let store = MemoryInvariantStore::new(home());
        store.append("é").unwrap();
        assert!(matches!(
            store.text(&InvariantSpan::new(1, 1, home()).unwrap()),
            Err(Error::ContentStoreIo(_))
        ));
    }
}
