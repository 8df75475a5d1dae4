use crate::{
    error::ExtractError,
    maps::{folder_has_entries, ArchiveExtractor, ExtractSummary},
};
use std::{
    fs::{self, File},
    io::{self, BufWriter, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};
use thiserror::Error;

const SIGNATURE: u32 = 0x55aa_1234;
const HEADER_V1_LEN: u64 = 12;
const HEADER_V2_LEN: u64 = 28;
const ENTRY_TERMINATOR: u16 = 0xffff;
const DIR_ARCHIVE_INDEX: u16 = 0x7fff;
const BLANK: &str = " ";

#[derive(Debug, Error)]
pub enum VpkError {
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("not a VPK file (signature {0:#010x})")]
    BadSignature(u32),
    #[error("unsupported VPK version {0}")]
    UnsupportedVersion(u32),
    #[error("VPK directory tree is truncated")]
    Truncated,
    #[error("VPK directory tree holds a non UTF-8 name")]
    InvalidName,
    #[error("entry {0} is not terminated")]
    BadTerminator(String),
    #[error("entry {0} escapes the output folder")]
    UnsafePath(String),
    #[error("entry {entry} failed CRC check (expected {expected:#010x}, got {actual:#010x})")]
    CrcMismatch {
        entry: String,
        expected: u32,
        actual: u32,
    },
}

impl VpkError {
    fn io(path: &Path, source: io::Error) -> Self {
        VpkError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VpkEntry {
    pub path: String,
    pub crc: u32,
    pub preload: Vec<u8>,
    pub archive_index: u16,
    pub offset: u32,
    pub length: u32,
}

#[derive(Debug, Clone)]
pub struct VpkArchive {
    path: PathBuf,
    version: u32,
    data_start: u64,
    entries: Vec<VpkEntry>,
}

impl VpkArchive {
    pub fn open(path: &Path) -> Result<Self, VpkError> {
        let mut file = File::open(path).map_err(|err| VpkError::io(path, err))?;
        let mut header = [0u8; HEADER_V1_LEN as usize];
        file.read_exact(&mut header)
            .map_err(|err| map_eof(path, err))?;
        let signature = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        if signature != SIGNATURE {
            return Err(VpkError::BadSignature(signature));
        }
        let version = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
        let tree_size = u32::from_le_bytes([header[8], header[9], header[10], header[11]]);
        let header_len = match version {
            1 => HEADER_V1_LEN,
            2 => HEADER_V2_LEN,
            other => return Err(VpkError::UnsupportedVersion(other)),
        };
        let file_len = file.metadata().map_err(|err| VpkError::io(path, err))?.len();
        if header_len + u64::from(tree_size) > file_len {
            return Err(VpkError::Truncated);
        }

        file.seek(SeekFrom::Start(header_len))
            .map_err(|err| VpkError::io(path, err))?;
        let mut tree = vec![0u8; tree_size as usize];
        file.read_exact(&mut tree)
            .map_err(|err| map_eof(path, err))?;

        let entries = parse_tree(&tree)?;
        Ok(Self {
            path: path.to_path_buf(),
            version,
            data_start: header_len + u64::from(tree_size),
            entries,
        })
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn entries(&self) -> &[VpkEntry] {
        &self.entries
    }

    // foo_dir.vpk keeps index 3 in foo_003.vpk.
    pub fn archive_path(&self, index: u16) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let stem = name
            .strip_suffix("_dir.vpk")
            .or_else(|| name.strip_suffix(".vpk"))
            .unwrap_or(&name);
        self.path.with_file_name(format!("{stem}_{index:03}.vpk"))
    }

    pub fn read(&self, entry: &VpkEntry) -> Result<Vec<u8>, VpkError> {
        let mut data = entry.preload.clone();

        if entry.length > 0 {
            let (source, offset) = if entry.archive_index == DIR_ARCHIVE_INDEX {
                (self.path.clone(), self.data_start + u64::from(entry.offset))
            } else {
                (self.archive_path(entry.archive_index), u64::from(entry.offset))
            };
            let mut file = File::open(&source).map_err(|err| VpkError::io(&source, err))?;
            let available = file.metadata().map_err(|err| VpkError::io(&source, err))?.len();
            // Header lengths are untrusted until the data is known to be there.
            if offset + u64::from(entry.length) > available {
                return Err(VpkError::Truncated);
            }
            file.seek(SeekFrom::Start(offset))
                .map_err(|err| VpkError::io(&source, err))?;
            let start = data.len();
            data.resize(start + entry.length as usize, 0);
            file.read_exact(&mut data[start..])
                .map_err(|err| map_eof(&source, err))?;
        }

        let actual = crc32fast::hash(&data);
        if actual != entry.crc {
            return Err(VpkError::CrcMismatch {
                entry: entry.path.clone(),
                expected: entry.crc,
                actual,
            });
        }
        Ok(data)
    }
}

fn map_eof(path: &Path, err: io::Error) -> VpkError {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        VpkError::Truncated
    } else {
        VpkError::io(path, err)
    }
}

struct TreeCursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> TreeCursor<'a> {
    fn string(&mut self) -> Result<&'a str, VpkError> {
        let rest = self.bytes.get(self.pos..).ok_or(VpkError::Truncated)?;
        let len = rest
            .iter()
            .position(|byte| *byte == 0)
            .ok_or(VpkError::Truncated)?;
        self.pos += len + 1;
        std::str::from_utf8(&rest[..len]).map_err(|_| VpkError::InvalidName)
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], VpkError> {
        let end = self.pos.checked_add(len).ok_or(VpkError::Truncated)?;
        let slice = self.bytes.get(self.pos..end).ok_or(VpkError::Truncated)?;
        self.pos = end;
        Ok(slice)
    }

    fn u16(&mut self) -> Result<u16, VpkError> {
        let bytes = self.take(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    fn u32(&mut self) -> Result<u32, VpkError> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }
}

fn parse_tree(tree: &[u8]) -> Result<Vec<VpkEntry>, VpkError> {
    let mut cursor = TreeCursor { bytes: tree, pos: 0 };
    let mut entries = Vec::new();

    loop {
        let extension = cursor.string()?;
        if extension.is_empty() {
            break;
        }
        loop {
            let directory = cursor.string()?;
            if directory.is_empty() {
                break;
            }
            loop {
                let name = cursor.string()?;
                if name.is_empty() {
                    break;
                }
                let path = join_entry_path(directory, name, extension);
                let crc = cursor.u32()?;
                let preload_len = cursor.u16()?;
                let archive_index = cursor.u16()?;
                let offset = cursor.u32()?;
                let length = cursor.u32()?;
                if cursor.u16()? != ENTRY_TERMINATOR {
                    return Err(VpkError::BadTerminator(path));
                }
                let preload = cursor.take(usize::from(preload_len))?.to_vec();
                entries.push(VpkEntry {
                    path,
                    crc,
                    preload,
                    archive_index,
                    offset,
                    length,
                });
            }
        }
    }

    Ok(entries)
}

fn join_entry_path(directory: &str, name: &str, extension: &str) -> String {
    let file = if extension == BLANK {
        name.to_string()
    } else {
        format!("{name}.{extension}")
    };
    if directory == BLANK {
        file
    } else {
        format!("{directory}/{file}")
    }
}

pub fn safe_output_path(root: &Path, entry: &str) -> Result<PathBuf, VpkError> {
    let mut out = root.to_path_buf();
    let mut pushed = false;
    for segment in entry.split(['/', '\\']) {
        match segment {
            "" | "." => continue,
            ".." => return Err(VpkError::UnsafePath(entry.to_string())),
            segment if segment.contains(':') => {
                return Err(VpkError::UnsafePath(entry.to_string()))
            }
            segment => {
                out.push(segment);
                pushed = true;
            }
        }
    }
    if !pushed || entry.starts_with(['/', '\\']) {
        return Err(VpkError::UnsafePath(entry.to_string()));
    }
    Ok(out)
}

struct OutputGuard {
    path: PathBuf,
    armed: bool,
}

impl OutputGuard {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for OutputGuard {
    fn drop(&mut self) {
        if self.armed {
            let _ = fs::remove_dir_all(&self.path);
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct VpkExtractor;

impl ArchiveExtractor for VpkExtractor {
    fn extract(
        &self,
        archive: &Path,
        dest: &Path,
        progress: &mut dyn FnMut(usize, usize, &str) -> bool,
    ) -> Result<ExtractSummary, ExtractError> {
        if !archive.is_file() {
            return Err(ExtractError::ArchiveMissing(archive.to_path_buf()));
        }
        if dest.is_dir() {
            if folder_has_entries(dest) {
                return Ok(ExtractSummary {
                    files: 0,
                    already_present: true,
                });
            }
            fs::remove_dir_all(dest).map_err(|err| ExtractError::Failed(err.to_string()))?;
        }

        let vpk = VpkArchive::open(archive).map_err(|err| ExtractError::Failed(err.to_string()))?;
        let total = vpk.entries().len();
        if total == 0 {
            return Err(ExtractError::EmptyArchive(archive.to_path_buf()));
        }
        tracing::info!(
            archive = %archive.display(),
            version = vpk.version(),
            files = total,
            "extracting map"
        );

        fs::create_dir_all(dest).map_err(|err| ExtractError::Failed(err.to_string()))?;
        let mut guard = OutputGuard::new(dest.to_path_buf());

        for (idx, entry) in vpk.entries().iter().enumerate() {
            let entry_error = |message: String| ExtractError::Entry {
                entry: entry.path.clone(),
                message,
            };
            let target = safe_output_path(dest, &entry.path).map_err(|err| entry_error(err.to_string()))?;
            let data = vpk.read(entry).map_err(|err| entry_error(err.to_string()))?;
            write_entry(&target, &data).map_err(|err| entry_error(err.to_string()))?;
            if !progress(idx + 1, total, &entry.path) {
                tracing::info!(archive = %archive.display(), "extraction cancelled");
                return Err(ExtractError::Cancelled);
            }
        }

        guard.disarm();
        tracing::info!(files = total, "map extracted");
        Ok(ExtractSummary {
            files: total,
            already_present: false,
        })
    }
}

fn write_entry(target: &Path, data: &[u8]) -> io::Result<()> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut writer = BufWriter::new(File::create(target)?);
    writer.write_all(data)?;
    writer.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    struct FixtureFile<'a> {
        extension: &'a str,
        directory: &'a str,
        name: &'a str,
        data: &'a [u8],
        preload: usize,
    }

    fn file<'a>(directory: &'a str, name: &'a str, extension: &'a str, data: &'a [u8]) -> FixtureFile<'a> {
        FixtureFile {
            extension,
            directory,
            name,
            data,
            preload: 0,
        }
    }

    fn build_vpk(version: u32, files: &[FixtureFile<'_>]) -> Vec<u8> {
        let mut tree = Vec::new();
        let mut data = Vec::new();
        for fixture in files {
            let (preload, rest) = fixture.data.split_at(fixture.preload);
            for part in [fixture.extension, fixture.directory, fixture.name] {
                tree.extend_from_slice(part.as_bytes());
                tree.push(0);
            }
            tree.extend_from_slice(&crc32fast::hash(fixture.data).to_le_bytes());
            tree.extend_from_slice(&(preload.len() as u16).to_le_bytes());
            tree.extend_from_slice(&DIR_ARCHIVE_INDEX.to_le_bytes());
            tree.extend_from_slice(&(data.len() as u32).to_le_bytes());
            tree.extend_from_slice(&(rest.len() as u32).to_le_bytes());
            tree.extend_from_slice(&ENTRY_TERMINATOR.to_le_bytes());
            tree.extend_from_slice(preload);
            data.extend_from_slice(rest);
            tree.extend_from_slice(&[0, 0]);
        }
        tree.push(0);

        let mut out = Vec::new();
        out.extend_from_slice(&SIGNATURE.to_le_bytes());
        out.extend_from_slice(&version.to_le_bytes());
        out.extend_from_slice(&(tree.len() as u32).to_le_bytes());
        if version == 2 {
            out.extend_from_slice(&(data.len() as u32).to_le_bytes());
            out.extend_from_slice(&[0u8; 12]);
        }
        out.extend_from_slice(&tree);
        out.extend_from_slice(&data);
        out
    }

    fn fixture_files() -> Vec<FixtureFile<'static>> {
        vec![
            file("maps", "station", "bsp", b"VBSP map bytes"),
            FixtureFile {
                preload: 4,
                ..file("materials/walls", "brick", "vmt", b"LightmappedGeneric {}")
            },
            file(" ", "addoninfo", "txt", b"\"AddonInfo\" {}"),
            file(" ", "README", " ", b"plain"),
        ]
    }

    fn write_fixture(dir: &Path, bytes: &[u8]) -> PathBuf {
        let path = dir.join("workshop_dir.vpk");
        fs::write(&path, bytes).unwrap();
        path
    }

    #[test]
    fn reads_directory_tree() {
        for version in [1, 2] {
            let dir = tempfile::tempdir().unwrap();
            let path = write_fixture(dir.path(), &build_vpk(version, &fixture_files()));
            let vpk = VpkArchive::open(&path).unwrap();
            assert_eq!(vpk.version(), version);
            let names: Vec<&str> = vpk.entries().iter().map(|e| e.path.as_str()).collect();
            assert_eq!(
                names,
                vec!["maps/station.bsp", "materials/walls/brick.vmt", "addoninfo.txt", "README"]
            );
            assert_eq!(vpk.read(&vpk.entries()[1]).unwrap(), b"LightmappedGeneric {}");
        }
    }

    #[test]
    fn extracts_every_file_with_progress() {
        let dir = tempfile::tempdir().unwrap();
        let archive = write_fixture(dir.path(), &build_vpk(2, &fixture_files()));
        let dest = dir.path().join("workshop_dir");
        let mut seen = Vec::new();
        let summary = VpkExtractor
            .extract(&archive, &dest, &mut |current, total, name| {
                seen.push((current, total, name.to_string()));
                true
            })
            .unwrap();
        assert_eq!(summary.files, 4);
        assert_eq!(fs::read(dest.join("maps").join("station.bsp")).unwrap(), b"VBSP map bytes");
        assert_eq!(fs::read(dest.join("README")).unwrap(), b"plain");
        assert_eq!(seen.last(), Some(&(4, 4, "README".to_string())));
    }

    #[test]
    fn cancellation_removes_partial_output() {
        let dir = tempfile::tempdir().unwrap();
        let archive = write_fixture(dir.path(), &build_vpk(2, &fixture_files()));
        let dest = dir.path().join("workshop_dir");
        let err = VpkExtractor
            .extract(&archive, &dest, &mut |current, _, _| current < 2)
            .unwrap_err();
        assert!(matches!(err, ExtractError::Cancelled));
        assert!(!dest.exists());
    }

    #[test]
    fn crc_mismatch_fails_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let mut bytes = build_vpk(1, &fixture_files());
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        let archive = write_fixture(dir.path(), &bytes);
        let dest = dir.path().join("workshop_dir");
        let err = VpkExtractor.extract(&archive, &dest, &mut |_, _, _| true).unwrap_err();
        assert!(matches!(err, ExtractError::Entry { ref entry, .. } if entry == "README"));
        assert!(!dest.exists());
    }

    #[test]
    fn oversized_tree_length_is_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let mut bytes = build_vpk(1, &fixture_files());
        bytes[8..12].copy_from_slice(&u32::MAX.to_le_bytes());
        let path = write_fixture(dir.path(), &bytes);
        assert!(matches!(VpkArchive::open(&path), Err(VpkError::Truncated)));
    }

    #[test]
    fn entry_past_end_of_file_is_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fixture(dir.path(), &build_vpk(2, &fixture_files()));
        let vpk = VpkArchive::open(&path).unwrap();
        let mut entry = vpk.entries()[0].clone();
        entry.length = u32::MAX;
        assert!(matches!(vpk.read(&entry), Err(VpkError::Truncated)));
    }

    #[test]
    fn empty_archive_is_an_error_without_output() {
        let dir = tempfile::tempdir().unwrap();
        let archive = write_fixture(dir.path(), &build_vpk(2, &[]));
        let dest = dir.path().join("workshop_dir");
        let err = VpkExtractor.extract(&archive, &dest, &mut |_, _, _| true).unwrap_err();
        assert!(matches!(err, ExtractError::EmptyArchive(_)));
        assert!(!dest.exists());
    }

    #[test]
    fn existing_non_empty_folder_counts_as_extracted() {
        let dir = tempfile::tempdir().unwrap();
        let archive = write_fixture(dir.path(), &build_vpk(2, &fixture_files()));
        let dest = dir.path().join("workshop_dir");
        fs::create_dir_all(&dest).unwrap();
        fs::write(dest.join("keep"), b"x").unwrap();
        let summary = VpkExtractor.extract(&archive, &dest, &mut |_, _, _| true).unwrap();
        assert!(summary.already_present);
        assert!(!dest.join("maps").exists());
    }

    #[test]
    fn rejects_bad_headers_and_escaping_paths() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fixture(dir.path(), b"PK\x03\x04not a vpk at all");
        assert!(matches!(VpkArchive::open(&path), Err(VpkError::BadSignature(_))));

        let mut bytes = build_vpk(1, &fixture_files());
        bytes[4] = 9;
        let path = write_fixture(dir.path(), &bytes);
        assert!(matches!(VpkArchive::open(&path), Err(VpkError::UnsupportedVersion(9))));

        let bytes = build_vpk(1, &fixture_files());
        let path = write_fixture(dir.path(), &bytes[..20]);
        assert!(matches!(VpkArchive::open(&path), Err(VpkError::Truncated)));

        assert!(safe_output_path(Path::new("/out"), "../evil.txt").is_err());
        assert!(safe_output_path(Path::new("/out"), "/etc/passwd").is_err());
        assert!(safe_output_path(Path::new("/out"), "C:/x").is_err());
        assert_eq!(
            safe_output_path(Path::new("/out"), "maps/a.bsp").unwrap(),
            Path::new("/out").join("maps").join("a.bsp")
        );
    }

    #[test]
    fn numbered_archive_names() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fixture(dir.path(), &build_vpk(2, &fixture_files()));
        let vpk = VpkArchive::open(&path).unwrap();
        assert_eq!(vpk.archive_path(3), dir.path().join("workshop_003.vpk"));
    }
}
