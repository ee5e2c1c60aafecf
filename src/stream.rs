//! [FileStream] gives one `Read + Write + Seek` face to loose files and to entries inside package archives.
//!
//! Positions are always logical: for an archive entry, position zero is the start of the entry, and for a compressed
//! entry positions count uncompressed bytes.
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Arc;

use byteorder::{LittleEndian, ReadBytesExt};

use crate::*;

/// Frames claiming to be bigger than this are treated as corrupt rather than allocated.
const MAX_PACKED_BLOCK: usize = 16 * 1024 * 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileMode {
    Read,
    Write,
    ReadWrite,
}

/// A loose file.  Reads go through a read-ahead buffer, so the OS cursor runs ahead of the logical position; the two
/// flags record when the cursor must be put back before switching between reading and writing.
#[derive(Debug)]
struct PlainFile {
    file: BufReader<File>,
    read_sync_needed: bool,
    write_sync_needed: bool,
}

impl PlainFile {
    fn read(&mut self, buf: &mut [u8], position: u64) -> io::Result<usize> {
        if self.read_sync_needed {
            self.file.seek(SeekFrom::Start(position))?;
            self.read_sync_needed = false;
        }
        let n = self.file.read(buf)?;
        self.write_sync_needed = true;
        Ok(n)
    }

    fn write(&mut self, buf: &[u8], position: u64) -> io::Result<usize> {
        if self.write_sync_needed {
            // Also throws away the read-ahead buffer.
            self.file.seek(SeekFrom::Start(position))?;
            self.write_sync_needed = false;
        }
        let n = self.file.get_mut().write(buf)?;
        self.read_sync_needed = true;
        Ok(n)
    }

    fn seek(&mut self, position: u64) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(position))?;
        self.read_sync_needed = false;
        self.write_sync_needed = false;
        Ok(())
    }
}

/// A block-framed compressed entry.  Reads are served out of `block`, which holds the current decoded frame.
#[derive(Debug)]
struct CompressedEntry {
    source: BufReader<File>,
    codec: Arc<dyn BlockCodec>,
    offset: u64,
    block: Vec<u8>,
    block_pos: usize,
}

impl CompressedEntry {
    fn refill(&mut self, remaining: u64) -> io::Result<()> {
        let packed_len = self.source.read_u32::<LittleEndian>()? as usize;
        if packed_len > MAX_PACKED_BLOCK {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("compressed block of {} bytes is implausibly large", packed_len),
            ));
        }
        let mut packed = vec![0; packed_len];
        self.source.read_exact(&mut packed)?;
        let max_len = remaining.min(usize::MAX as u64) as usize;
        self.block = self.codec.decompress_block(&packed, max_len)?;
        self.block_pos = 0;
        if self.block.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "compressed block decoded to nothing",
            ));
        }
        Ok(())
    }

    /// Fill all of `buf`.  The caller has already clamped it to the logical bytes left, `remaining`.
    fn read(&mut self, buf: &mut [u8], mut remaining: u64) -> io::Result<usize> {
        let mut done = 0;
        while done < buf.len() {
            if self.block_pos >= self.block.len() {
                self.refill(remaining)?;
            }
            let n = (buf.len() - done).min(self.block.len() - self.block_pos);
            buf[done..done + n].copy_from_slice(&self.block[self.block_pos..self.block_pos + n]);
            self.block_pos += n;
            done += n;
            remaining -= n as u64;
        }
        Ok(done)
    }

    /// Go back to the first frame and drop the decoded block.
    fn rewind(&mut self) -> io::Result<()> {
        self.source.seek(SeekFrom::Start(self.offset))?;
        self.block.clear();
        self.block_pos = 0;
        Ok(())
    }
}

#[derive(Debug)]
enum Backing {
    PlainFile(PlainFile),
    ArchiveEntry { file: BufReader<File>, offset: u64 },
    CompressedArchiveEntry(CompressedEntry),
}

#[derive(Debug)]
pub struct FileStream {
    name: String,
    mode: FileMode,
    size: u64,
    position: u64,
    /// Stored checksum, for archive entries.
    entry_checksum: Option<u32>,
    backing: Backing,
}

fn not_readable() -> io::Error {
    io::Error::new(io::ErrorKind::PermissionDenied, "stream is not open for reading")
}

impl FileStream {
    /// Open a loose file.
    pub fn open(path: &Path, mode: FileMode) -> io::Result<FileStream> {
        let file = match mode {
            FileMode::Read => File::open(path)?,
            FileMode::Write => OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(path)?,
            FileMode::ReadWrite => OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .open(path)?,
        };
        let size = file.metadata()?.len();
        Ok(FileStream {
            name: path.to_string_lossy().replace('\\', "/"),
            mode,
            size,
            position: 0,
            entry_checksum: None,
            backing: Backing::PlainFile(PlainFile {
                file: BufReader::new(file),
                read_sync_needed: false,
                write_sync_needed: false,
            }),
        })
    }

    /// Open an entry of a package for reading.
    pub fn from_package(archive: &PackageArchive, name: &str) -> io::Result<FileStream> {
        let entry = archive.entry(name).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} has no entry {}", archive.name(), name),
            )
        })?;
        let file = BufReader::new(open_entry_file(archive, entry)?);
        let backing = if archive.is_compressed() {
            Backing::CompressedArchiveEntry(CompressedEntry {
                source: file,
                codec: archive.codec().clone(),
                offset: entry.offset,
                block: vec![],
                block_pos: 0,
            })
        } else {
            Backing::ArchiveEntry {
                file,
                offset: entry.offset,
            }
        };
        Ok(FileStream {
            name: name.to_string(),
            mode: FileMode::Read,
            size: entry.size as u64,
            position: 0,
            entry_checksum: Some(entry.checksum),
            backing,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn set_name(&mut self, name: &str) {
        self.name = name.to_string();
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn mode(&self) -> FileMode {
        self.mode
    }

    pub fn is_eof(&self) -> bool {
        self.position >= self.size
    }

    pub fn is_packaged(&self) -> bool {
        !matches!(self.backing, Backing::PlainFile(_))
    }

    pub fn is_compressed(&self) -> bool {
        matches!(self.backing, Backing::CompressedArchiveEntry(_))
    }

    /// Read everything from the current position to the end.
    pub fn read_all(&mut self) -> io::Result<Vec<u8>> {
        let mut out = Vec::with_capacity((self.size - self.position) as usize);
        self.read_to_end(&mut out)?;
        Ok(out)
    }

    /// SDBM checksum of the whole contents.  Archive entries answer from the entry table; loose files are read
    /// through and the position restored.
    pub fn checksum(&mut self) -> io::Result<u32> {
        if let Some(c) = self.entry_checksum {
            return Ok(c);
        }
        let saved = self.position;
        self.seek(SeekFrom::Start(0))?;
        let mut hash = 0;
        let mut chunk = [0u8; 4096];
        loop {
            let n = self.read(&mut chunk)?;
            if n == 0 {
                break;
            }
            hash = sdbm_hash(hash, &chunk[..n]);
        }
        self.seek(SeekFrom::Start(saved))?;
        Ok(hash)
    }
}

impl Read for FileStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.mode == FileMode::Write {
            return Err(not_readable());
        }
        let remaining = self.size.saturating_sub(self.position);
        let want = (buf.len() as u64).min(remaining) as usize;
        if want == 0 {
            return Ok(0);
        }
        let buf = &mut buf[..want];

        let n = match &mut self.backing {
            Backing::PlainFile(f) => f.read(buf, self.position)?,
            Backing::ArchiveEntry { file, .. } => file.read(buf)?,
            Backing::CompressedArchiveEntry(c) => c.read(buf, remaining)?,
        };
        self.position += n as u64;
        Ok(n)
    }
}

impl Write for FileStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.mode == FileMode::Read {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "stream is not open for writing",
            ));
        }
        let file = match &mut self.backing {
            Backing::PlainFile(f) => f,
            _ => {
                return Err(io::Error::new(
                    io::ErrorKind::Unsupported,
                    "package entries are read-only",
                ))
            }
        };
        let n = file.write(buf, self.position)?;
        self.position += n as u64;
        self.size = self.size.max(self.position);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.backing {
            Backing::PlainFile(f) => f.file.get_mut().flush(),
            _ => Ok(()),
        }
    }
}

impl Seek for FileStream {
    /// Positions are clamped to the logical size.
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(n) => Some(n),
            SeekFrom::End(d) => (self.size as i64).checked_add(d).and_then(|x| u64::try_from(x).ok()),
            SeekFrom::Current(d) => (self.position as i64)
                .checked_add(d)
                .and_then(|x| u64::try_from(x).ok()),
        }
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "seek to a negative position"))?
        .min(self.size);

        match &mut self.backing {
            Backing::PlainFile(f) => f.seek(target)?,
            Backing::ArchiveEntry { file, offset } => {
                file.seek(SeekFrom::Start(*offset + target))?;
            }
            Backing::CompressedArchiveEntry(c) => {
                // Frames can only be decoded front to back: going backwards starts over, going forwards decodes and
                // discards.
                if target < self.position {
                    c.rewind()?;
                    self.position = 0;
                }
                let mut scratch = [0u8; 4096];
                while self.position < target {
                    let want = ((target - self.position) as usize).min(scratch.len());
                    if self.read(&mut scratch[..want])? == 0 {
                        break;
                    }
                }
                return Ok(self.position);
            }
        }
        self.position = target;
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 % 251) as u8).collect()
    }

    fn package(dir: &Path, compressed: bool, files: &[(&str, Vec<u8>)]) -> PackageArchive {
        let path = dir.join(if compressed { "c.pak" } else { "u.pak" });
        let mut builder = PackageBuilder::new().compressed(compressed);
        for (name, data) in files {
            builder.add_file(name, data.clone());
        }
        builder.write_to_path(&path).unwrap();
        PackageArchive::open(&path).unwrap()
    }

    #[test]
    fn test_archive_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let files = vec![
            ("big.bin", pattern(BLOCK_SIZE * 3 + 17)),
            ("small.txt", b"hello".to_vec()),
            ("empty", vec![]),
        ];
        for &compressed in &[false, true] {
            let archive = package(tmp.path(), compressed, &files);
            for (name, data) in &files {
                assert_eq!(archive.entry(name).unwrap().size as usize, data.len());
                let mut stream = FileStream::from_package(&archive, name).unwrap();
                assert!(stream.is_packaged());
                assert_eq!(stream.is_compressed(), compressed);
                assert_eq!(stream.size() as usize, data.len());
                assert_eq!(&stream.read_all().unwrap(), data);
                assert!(stream.is_eof());
                // Reading at the end is not an error.
                assert_eq!(stream.read(&mut [0u8; 8]).unwrap(), 0);
            }
        }
    }

    #[test]
    fn test_compressed_reads_span_blocks() {
        let tmp = tempfile::tempdir().unwrap();
        let data = pattern(BLOCK_SIZE * 2 + 100);
        let archive = package(tmp.path(), true, &[("x", data.clone())]);
        let mut stream = FileStream::from_package(&archive, "x").unwrap();

        let mut first = vec![0u8; BLOCK_SIZE - 10];
        assert_eq!(stream.read(&mut first).unwrap(), first.len());
        // This read starts in one block and finishes in the next.
        let mut second = vec![0u8; 20];
        assert_eq!(stream.read(&mut second).unwrap(), 20);
        assert_eq!(&second[..], &data[BLOCK_SIZE - 10..BLOCK_SIZE + 10]);

        // Asking for too much is clamped to what's left.
        let mut rest = vec![0u8; data.len()];
        let n = stream.read(&mut rest).unwrap();
        assert_eq!(n, data.len() - BLOCK_SIZE - 10);
        assert_eq!(&rest[..n], &data[BLOCK_SIZE + 10..]);
    }

    #[test]
    fn test_seeking() {
        let tmp = tempfile::tempdir().unwrap();
        let data = pattern(BLOCK_SIZE * 2 + 5);
        for &compressed in &[false, true] {
            let archive = package(tmp.path(), compressed, &[("x", data.clone())]);
            let mut stream = FileStream::from_package(&archive, "x").unwrap();
            let mut buf = [0u8; 4];

            assert_eq!(stream.seek(SeekFrom::Start(BLOCK_SIZE as u64 + 1)).unwrap(), BLOCK_SIZE as u64 + 1);
            stream.read_exact(&mut buf).unwrap();
            assert_eq!(&buf, &data[BLOCK_SIZE + 1..BLOCK_SIZE + 5]);

            // Backwards.
            stream.seek(SeekFrom::Start(2)).unwrap();
            stream.read_exact(&mut buf).unwrap();
            assert_eq!(&buf, &data[2..6]);

            stream.seek(SeekFrom::Current(10)).unwrap();
            assert_eq!(stream.position(), 16);
            stream.read_exact(&mut buf).unwrap();
            assert_eq!(&buf, &data[16..20]);

            // Never past the end.
            assert_eq!(stream.seek(SeekFrom::Start(u64::MAX)).unwrap(), data.len() as u64);
            assert_eq!(stream.seek(SeekFrom::End(-2)).unwrap(), data.len() as u64 - 2);
            assert!(stream.seek(SeekFrom::Current(-(data.len() as i64))).is_err());
        }
    }

    #[test]
    fn test_package_entries_are_read_only() {
        let tmp = tempfile::tempdir().unwrap();
        let archive = package(tmp.path(), false, &[("x", b"abc".to_vec())]);
        let mut stream = FileStream::from_package(&archive, "x").unwrap();
        assert!(stream.write(b"z").is_err());
        assert!(FileStream::from_package(&archive, "missing").is_err());
    }

    #[test]
    fn test_checksums() {
        let tmp = tempfile::tempdir().unwrap();
        let data = b"checksummed".to_vec();
        let archive = package(tmp.path(), true, &[("x", data.clone())]);
        let mut packaged = FileStream::from_package(&archive, "x").unwrap();
        assert_eq!(packaged.checksum().unwrap(), sdbm_hash(0, &data));

        let path = tmp.path().join("loose");
        std::fs::write(&path, &data).unwrap();
        let mut loose = FileStream::open(&path, FileMode::Read).unwrap();
        loose.seek(SeekFrom::Start(3)).unwrap();
        assert_eq!(loose.checksum().unwrap(), sdbm_hash(0, &data));
        assert_eq!(loose.position(), 3);
    }

    #[test]
    fn test_write_then_read() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("w");
        {
            let mut stream = FileStream::open(&path, FileMode::Write).unwrap();
            assert_eq!(stream.size(), 0);
            stream.write_all(b"hello world").unwrap();
            assert_eq!(stream.size(), 11);
            assert!(stream.read(&mut [0u8; 4]).is_err());
            stream.flush().unwrap();
        }
        let mut stream = FileStream::open(&path, FileMode::Read).unwrap();
        assert_eq!(stream.name(), path.to_string_lossy().replace('\\', "/"));
        assert_eq!(stream.read_all().unwrap(), b"hello world");
        assert!(stream.write(b"x").is_err());
    }

    /// Interleaved reads and writes on one stream must land at the logical position, even though reads buffer ahead.
    #[test]
    fn test_interleaved_read_write() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("rw");
        std::fs::write(&path, b"abcdefgh").unwrap();

        let mut stream = FileStream::open(&path, FileMode::ReadWrite).unwrap();
        let mut buf = [0u8; 2];
        stream.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ab");
        stream.write_all(b"XY").unwrap();
        stream.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ef");
        stream.write_all(b"Z").unwrap();
        stream.flush().unwrap();
        assert_eq!(stream.position(), 7);
        drop(stream);

        assert_eq!(std::fs::read(&path).unwrap(), b"abXYefZh");
    }

    #[test]
    fn test_write_extends_size() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("grow");
        std::fs::write(&path, b"abc").unwrap();

        let mut stream = FileStream::open(&path, FileMode::ReadWrite).unwrap();
        stream.seek(SeekFrom::End(0)).unwrap();
        stream.write_all(b"def").unwrap();
        assert_eq!(stream.size(), 6);
        stream.seek(SeekFrom::Start(0)).unwrap();
        assert_eq!(stream.read_all().unwrap(), b"abcdef");
    }
}
