//! Module lookup inside zip-based archives (`.zip`, `.egg`, `.whl`)
//!
//! Only the central directory is read: member names are all that is needed
//! to decide whether a module lives in the archive. ZIP64 archives are not
//! supported and are treated as containing nothing.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;
use tracing::debug;

const EOCD_SIGNATURE: u32 = 0x0605_4b50;
const CENTRAL_SIGNATURE: u32 = 0x0201_4b50;
const EOCD_LEN: usize = 22;
const CENTRAL_HEADER_LEN: usize = 46;
const MAX_COMMENT_LEN: usize = 0xFFFF;

/// Whether the path names an archive the interpreter can import from
pub fn is_archive(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("zip") | Some("egg") | Some("whl")
    )
}

/// Whether `member` (slash separated, no extension) is a module or package in the archive
pub fn contains_module(archive: &Path, member: &str) -> bool {
    let names = match member_names(archive) {
        Ok(names) => names,
        Err(e) => {
            debug!("cannot read archive {}: {}", archive.display(), e);
            return false;
        }
    };

    let package_prefix = format!("{member}/");
    let candidates = [
        format!("{member}/__init__.py"),
        format!("{member}.py"),
        format!("{member}.pyc"),
    ];

    names
        .iter()
        .any(|name| candidates.contains(name) || name.starts_with(&package_prefix))
}

/// List member names from the archive's central directory
pub fn member_names(archive: &Path) -> io::Result<Vec<String>> {
    let mut file = File::open(archive)?;
    let file_len = file.metadata()?.len();

    let tail_len = file_len.min((EOCD_LEN + MAX_COMMENT_LEN) as u64);
    file.seek(SeekFrom::Start(file_len - tail_len))?;
    let mut tail = vec![0u8; tail_len as usize];
    file.read_exact(&mut tail)?;

    let eocd = find_eocd(&tail).ok_or_else(|| invalid("end of central directory not found"))?;
    let entries = u16_at(&tail, eocd + 10) as usize;
    let cd_size = u32_at(&tail, eocd + 12);
    let cd_offset = u32_at(&tail, eocd + 16);

    if cd_offset == u32::MAX || cd_size == u32::MAX {
        return Err(invalid("ZIP64 archives are not supported"));
    }
    if u64::from(cd_offset) + u64::from(cd_size) > file_len {
        return Err(invalid("central directory lies outside the file"));
    }

    file.seek(SeekFrom::Start(u64::from(cd_offset)))?;
    let mut directory = vec![0u8; cd_size as usize];
    file.read_exact(&mut directory)?;

    let mut names = Vec::with_capacity(entries);
    let mut pos = 0;
    for _ in 0..entries {
        if pos + CENTRAL_HEADER_LEN > directory.len() || u32_at(&directory, pos) != CENTRAL_SIGNATURE {
            return Err(invalid("corrupt central directory entry"));
        }
        let name_len = u16_at(&directory, pos + 28) as usize;
        let extra_len = u16_at(&directory, pos + 30) as usize;
        let comment_len = u16_at(&directory, pos + 32) as usize;

        let name_start = pos + CENTRAL_HEADER_LEN;
        let name_end = name_start + name_len;
        if name_end > directory.len() {
            return Err(invalid("truncated member name"));
        }
        names.push(String::from_utf8_lossy(&directory[name_start..name_end]).into_owned());

        pos = name_end + extra_len + comment_len;
    }

    Ok(names)
}

fn find_eocd(tail: &[u8]) -> Option<usize> {
    if tail.len() < EOCD_LEN {
        return None;
    }
    (0..=tail.len() - EOCD_LEN)
        .rev()
        .find(|&pos| u32_at(tail, pos) == EOCD_SIGNATURE)
}

fn u16_at(buf: &[u8], pos: usize) -> u16 {
    u16::from_le_bytes([buf[pos], buf[pos + 1]])
}

fn u32_at(buf: &[u8], pos: usize) -> u32 {
    u32::from_le_bytes([buf[pos], buf[pos + 1], buf[pos + 2], buf[pos + 3]])
}

fn invalid(message: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message.to_string())
}

/// Write a minimal stored (uncompressed) zip archive; test fixtures only
#[cfg(test)]
pub(crate) fn write_test_archive(path: &Path, members: &[(&str, &str)]) -> io::Result<()> {
    let mut out = Vec::new();
    let mut central = Vec::new();

    for (name, data) in members {
        let offset = out.len() as u32;
        // local file header
        out.extend_from_slice(&0x0403_4b50u32.to_le_bytes());
        out.extend_from_slice(&[20, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
        out.extend_from_slice(&0u32.to_le_bytes()); // crc (unchecked here)
        out.extend_from_slice(&(data.len() as u32).to_le_bytes());
        out.extend_from_slice(&(data.len() as u32).to_le_bytes());
        out.extend_from_slice(&(name.len() as u16).to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(data.as_bytes());

        central.extend_from_slice(&CENTRAL_SIGNATURE.to_le_bytes());
        central.extend_from_slice(&[20, 0, 20, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
        central.extend_from_slice(&0u32.to_le_bytes());
        central.extend_from_slice(&(data.len() as u32).to_le_bytes());
        central.extend_from_slice(&(data.len() as u32).to_le_bytes());
        central.extend_from_slice(&(name.len() as u16).to_le_bytes());
        central.extend_from_slice(&[0, 0, 0, 0, 0, 0, 0, 0]);
        central.extend_from_slice(&0u32.to_le_bytes());
        central.extend_from_slice(&offset.to_le_bytes());
        central.extend_from_slice(name.as_bytes());
    }

    let cd_offset = out.len() as u32;
    let cd_size = central.len() as u32;
    out.extend_from_slice(&central);
    out.extend_from_slice(&EOCD_SIGNATURE.to_le_bytes());
    out.extend_from_slice(&[0, 0, 0, 0]);
    out.extend_from_slice(&(members.len() as u16).to_le_bytes());
    out.extend_from_slice(&(members.len() as u16).to_le_bytes());
    out.extend_from_slice(&cd_size.to_le_bytes());
    out.extend_from_slice(&cd_offset.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());

    std::fs::write(path, out)
}
