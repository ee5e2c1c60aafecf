//! Package archives: a single sealed file holding many named byte ranges behind an entry table.
//!
//! The layout is little endian with no padding:
//!
//! ```text
//! [magic: b"RPAK"]
//! [entry_count: u32]
//! entry_count times:
//!     [name: UTF-8, NUL terminated]
//!     [offset: u64]     byte offset of the data from the start of the archive
//!     [size: u32]       uncompressed size
//!     [checksum: u32]   SDBM hash of the uncompressed bytes
//! [compressed_flag: u8]
//! [aggregate_checksum: u32]
//! entry data...
//! ```
//!
//! In a compressed archive each entry's data is a run of `[block_size: u32][block_bytes]` frames which decode to
//! `size` bytes in total.
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::*;

/// Keyed by [NameCase::key]; the value keeps the name as written.
type EntryMap = std::collections::HashMap<String, (String, PackageEntry), ahash::RandomState>;

pub const PACKAGE_MAGIC: [u8; 4] = *b"RPAK";

/// How entry names are compared on lookup.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NameCase {
    Sensitive,
    /// ASCII case-insensitive.
    Insensitive,
}

impl NameCase {
    fn key(self, name: &str) -> String {
        match self {
            NameCase::Sensitive => name.to_string(),
            NameCase::Insensitive => name.to_ascii_lowercase(),
        }
    }
}

impl Default for NameCase {
    fn default() -> NameCase {
        NameCase::Sensitive
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PackageEntry {
    pub offset: u64,
    pub size: u32,
    pub checksum: u32,
}

/// Fold bytes into an SDBM hash.
pub fn sdbm_hash(seed: u32, bytes: &[u8]) -> u32 {
    bytes.iter().fold(seed, |h, &b| {
        (b as u32)
            .wrapping_add(h << 6)
            .wrapping_add(h << 16)
            .wrapping_sub(h)
    })
}

/// An opened package.  Immutable once opened; shared between streams through `Arc`.
#[derive(Debug)]
pub struct PackageArchive {
    name: String,
    path: PathBuf,
    entries: EntryMap,
    total_size: u64,
    total_data_size: u64,
    checksum: u32,
    compressed: bool,
    name_case: NameCase,
    codec: Arc<dyn BlockCodec>,
}

fn read_name<R: BufRead>(reader: &mut R, index: u32) -> Result<String, ArchiveError> {
    let mut raw = vec![];
    reader.read_until(0, &mut raw)?;
    if raw.pop() != Some(0) {
        return Err(ArchiveError::Truncated);
    }
    String::from_utf8(raw).map_err(|_| ArchiveError::InvalidName { index })
}

impl PackageArchive {
    /// Open with case-sensitive lookups and the deflate codec.
    pub fn open(path: &Path) -> Result<PackageArchive, ArchiveError> {
        PackageArchive::open_with(path, NameCase::Sensitive, Arc::new(DeflateCodec))
    }

    /// Open a package, parsing the whole entry table.  Any malformation is a hard failure.
    pub fn open_with(
        path: &Path,
        name_case: NameCase,
        codec: Arc<dyn BlockCodec>,
    ) -> Result<PackageArchive, ArchiveError> {
        let file = File::open(path).map_err(ArchiveError::Io)?;
        let total_size = file.metadata().map_err(ArchiveError::Io)?.len();
        let mut reader = BufReader::new(file);

        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if magic != PACKAGE_MAGIC {
            return Err(ArchiveError::BadMagic(magic));
        }

        let count = reader.read_u32::<LittleEndian>()?;
        let mut parsed = Vec::with_capacity(count.min(4096) as usize);
        for index in 0..count {
            let name = read_name(&mut reader, index)?;
            let entry = PackageEntry {
                offset: reader.read_u64::<LittleEndian>()?,
                size: reader.read_u32::<LittleEndian>()?,
                checksum: reader.read_u32::<LittleEndian>()?,
            };
            parsed.push((name, entry));
        }

        let compressed = match reader.read_u8()? {
            0 => false,
            1 => true,
            x => return Err(ArchiveError::InvalidFlag(x)),
        };
        let checksum = reader.read_u32::<LittleEndian>()?;

        let mut entries = EntryMap::default();
        let mut total_data_size = 0u64;
        for (name, entry) in parsed {
            // Compressed data is shorter than `size`, so only the start can be checked without walking the frames.
            let end = if compressed {
                entry.offset
            } else {
                entry.offset.saturating_add(entry.size as u64)
            };
            if end > total_size {
                return Err(ArchiveError::EntryOutOfBounds {
                    name,
                    offset: entry.offset,
                    size: entry.size,
                    archive_size: total_size,
                });
            }
            total_data_size += entry.size as u64;
            if let Some((old, _)) = entries.insert(name_case.key(&name), (name.clone(), entry)) {
                tracing::debug!(package = %path.display(), "Entry {} shadows {}", name, old);
            }
        }

        let archive = PackageArchive {
            name: dir_string(path).trim_end_matches('/').to_string(),
            path: path.to_path_buf(),
            entries,
            total_size,
            total_data_size,
            checksum,
            compressed,
            name_case,
            codec,
        };
        tracing::debug!(
            package = %archive.name,
            entries = archive.entries.len(),
            compressed,
            "Opened package"
        );
        Ok(archive)
    }

    /// Name of the package, the path it was opened from with `/` separators.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Sum of the uncompressed entry sizes.
    pub fn total_data_size(&self) -> u64 {
        self.total_data_size
    }

    pub fn checksum(&self) -> u32 {
        self.checksum
    }

    pub fn is_compressed(&self) -> bool {
        self.compressed
    }

    pub fn name_case(&self) -> NameCase {
        self.name_case
    }

    pub fn num_entries(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn codec(&self) -> &Arc<dyn BlockCodec> {
        &self.codec
    }

    pub fn exists(&self, name: &str) -> bool {
        self.entries.contains_key(&self.name_case.key(name))
    }

    pub fn entry(&self, name: &str) -> Option<&PackageEntry> {
        self.entries.get(&self.name_case.key(name)).map(|(_, e)| e)
    }

    /// Entry names as stored in the archive, sorted.
    pub fn entry_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.values().map(|(n, _)| n.as_str()).collect();
        names.sort_unstable();
        names
    }
}

/// Writes package archives.
#[derive(Debug)]
pub struct PackageBuilder {
    files: Vec<(String, Vec<u8>)>,
    compressed: bool,
    codec: Arc<dyn BlockCodec>,
}

impl Default for PackageBuilder {
    fn default() -> PackageBuilder {
        PackageBuilder {
            files: vec![],
            compressed: false,
            codec: Arc::new(DeflateCodec),
        }
    }
}

impl PackageBuilder {
    pub fn new() -> PackageBuilder {
        Default::default()
    }

    pub fn compressed(mut self, compressed: bool) -> PackageBuilder {
        self.compressed = compressed;
        self
    }

    pub fn codec(mut self, codec: Arc<dyn BlockCodec>) -> PackageBuilder {
        self.codec = codec;
        self
    }

    pub fn add_file(&mut self, name: &str, data: impl Into<Vec<u8>>) -> &mut PackageBuilder {
        self.files.push((sanitize_name(name, &[]), data.into()));
        self
    }

    /// Add every file under `root`, named by its path relative to `root`.
    pub fn add_dir(&mut self, root: &Path) -> std::io::Result<&mut PackageBuilder> {
        let mut pending = vec![root.to_path_buf()];
        let mut found = vec![];
        while let Some(dir) = pending.pop() {
            for item in std::fs::read_dir(&dir)? {
                let item = item?;
                let path = item.path();
                if item.file_type()?.is_dir() {
                    pending.push(path);
                } else {
                    found.push(path);
                }
            }
        }
        found.sort();

        for path in found {
            let relative = relative_path::RelativePathBuf::from_path(path.strip_prefix(root).unwrap_or(path.as_path()))
                .map_err(|_| std::io::Error::new(std::io::ErrorKind::Other, "Invalid path"))?;
            let data = std::fs::read(&path)?;
            self.add_file(relative.as_str(), data);
        }
        Ok(self)
    }

    fn frame(&self, data: &[u8]) -> std::io::Result<Vec<u8>> {
        if !self.compressed {
            return Ok(data.to_vec());
        }
        let mut out = vec![];
        for block in data.chunks(BLOCK_SIZE) {
            let packed = self.codec.compress_block(block)?;
            out.write_u32::<LittleEndian>(packed.len() as u32)?;
            out.extend_from_slice(&packed);
        }
        Ok(out)
    }

    /// Write the archive, returning its aggregate checksum.
    pub fn write<W: Write>(&self, writer: W) -> std::io::Result<u32> {
        let mut writer = BufWriter::new(writer);
        let framed = self
            .files
            .iter()
            .map(|(_, data)| self.frame(data))
            .collect::<std::io::Result<Vec<_>>>()?;

        let header_len = 4
            + 4
            + self
                .files
                .iter()
                .map(|(name, _)| name.len() as u64 + 1 + 8 + 4 + 4)
                .sum::<u64>()
            + 1
            + 4;

        writer.write_all(&PACKAGE_MAGIC)?;
        writer.write_u32::<LittleEndian>(self.files.len() as u32)?;
        let mut offset = header_len;
        let mut aggregate = 0u32;
        for ((name, data), stored) in self.files.iter().zip(framed.iter()) {
            let checksum = sdbm_hash(0, data);
            aggregate = sdbm_hash(aggregate, &checksum.to_le_bytes());
            writer.write_all(name.as_bytes())?;
            writer.write_u8(0)?;
            writer.write_u64::<LittleEndian>(offset)?;
            writer.write_u32::<LittleEndian>(data.len() as u32)?;
            writer.write_u32::<LittleEndian>(checksum)?;
            offset += stored.len() as u64;
        }
        writer.write_u8(self.compressed as u8)?;
        writer.write_u32::<LittleEndian>(aggregate)?;
        for stored in framed {
            writer.write_all(&stored)?;
        }
        writer.flush()?;
        Ok(aggregate)
    }

    pub fn write_to_path(&self, path: &Path) -> std::io::Result<u32> {
        self.write(File::create(path)?)
    }
}

/// Read an entry's raw stored bytes (still framed, for compressed archives).
pub(crate) fn open_entry_file(archive: &PackageArchive, entry: &PackageEntry) -> std::io::Result<File> {
    let mut file = File::open(archive.path())?;
    file.seek(SeekFrom::Start(entry.offset))?;
    Ok(file)
}
