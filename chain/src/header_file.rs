use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Random-access file of fixed-size header records.
///
/// Files are opened per operation; the owning branch serializes every
/// mutating call behind its own mutex. Writes are durable before they
/// return.
#[derive(Debug)]
pub struct HeaderFile {
    path: PathBuf,
}

impl HeaderFile {
    pub fn new(path: PathBuf) -> Self {
        HeaderFile { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Creates the file, truncating any previous content.
    pub fn create_empty(&self) -> io::Result<()> {
        OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.path)
            .map(|_| ())
    }

    /// Current length in bytes; a missing file counts as empty.
    pub fn size(&self) -> io::Result<u64> {
        match fs::metadata(&self.path) {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e),
        }
    }

    pub fn read_at(&self, offset: u64, len: usize) -> io::Result<Vec<u8>> {
        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; len];
        file.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Writes `data` at `offset` and fsyncs.
    ///
    /// With `truncate` set, a write that does not land exactly at the end of
    /// the file first cuts the file down (or zero-extends it) to `offset`,
    /// so the file ends exactly at `offset + data.len()`. Without it, bytes
    /// are overlaid in place and the file never shrinks.
    pub fn write_at(&self, offset: u64, data: &[u8], truncate: bool) -> io::Result<()> {
        let mut file = OpenOptions::new().read(true).write(true).open(&self.path)?;
        if truncate && offset != file.metadata()?.len() {
            file.set_len(offset)?;
        }
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        file.flush()?;
        file.sync_all()?;
        Ok(())
    }

    pub fn rename(&mut self, new_path: PathBuf) -> io::Result<()> {
        fs::rename(&self.path, &new_path)?;
        self.path = new_path;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_file(dir: &tempfile::TempDir, name: &str) -> HeaderFile {
        HeaderFile::new(dir.path().join(name))
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let file = header_file(&dir, "headers");
        assert!(!file.exists());
        assert_eq!(file.size().unwrap(), 0);
    }

    #[test]
    fn test_write_read_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let file = header_file(&dir, "headers");
        file.create_empty().unwrap();

        file.write_at(0, &[1u8; 16], true).unwrap();
        file.write_at(16, &[2u8; 16], true).unwrap();
        assert_eq!(file.size().unwrap(), 32);
        assert_eq!(file.read_at(16, 16).unwrap(), vec![2u8; 16]);
    }

    #[test]
    fn test_truncating_write_drops_tail() {
        let dir = tempfile::tempdir().unwrap();
        let file = header_file(&dir, "headers");
        file.create_empty().unwrap();

        file.write_at(0, &[1u8; 48], true).unwrap();
        file.write_at(16, &[2u8; 16], true).unwrap();
        assert_eq!(file.size().unwrap(), 32);
    }

    #[test]
    fn test_overlay_write_keeps_tail() {
        let dir = tempfile::tempdir().unwrap();
        let file = header_file(&dir, "headers");
        file.create_empty().unwrap();

        file.write_at(0, &[1u8; 48], true).unwrap();
        file.write_at(16, &[2u8; 16], false).unwrap();
        assert_eq!(file.size().unwrap(), 48);
        assert_eq!(file.read_at(32, 16).unwrap(), vec![1u8; 16]);
    }

    #[test]
    fn test_sparse_write_leaves_zero_hole() {
        let dir = tempfile::tempdir().unwrap();
        let file = header_file(&dir, "headers");
        file.create_empty().unwrap();

        file.write_at(32, &[3u8; 16], true).unwrap();
        assert_eq!(file.size().unwrap(), 48);
        assert_eq!(file.read_at(0, 32).unwrap(), vec![0u8; 32]);
    }

    #[test]
    fn test_short_read_fails() {
        let dir = tempfile::tempdir().unwrap();
        let file = header_file(&dir, "headers");
        file.create_empty().unwrap();

        file.write_at(0, &[1u8; 8], true).unwrap();
        assert!(file.read_at(0, 16).is_err());
    }

    #[test]
    fn test_rename_moves_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = header_file(&dir, "headers");
        file.create_empty().unwrap();
        file.write_at(0, &[7u8; 8], true).unwrap();

        file.rename(dir.path().join("renamed")).unwrap();
        assert_eq!(file.path(), dir.path().join("renamed"));
        assert_eq!(file.read_at(0, 8).unwrap(), vec![7u8; 8]);
        assert!(!dir.path().join("headers").exists());
    }
}
