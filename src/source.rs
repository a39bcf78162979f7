//! Comment export input: plain, bzip2 or zstd TSV, streamed as recombined logical records.

use crate::tsv::Recombined;
use crate::util::open_with_backoff;
use anyhow::{Context, Result};
use bzip2::read::MultiBzDecoder;
use std::fmt;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use zstd::stream::read::Decoder as ZstdDecoder;

/// The export file named as the job's source does not exist.
#[derive(Debug)]
pub struct SourceMissing(pub PathBuf);

impl fmt::Display for SourceMissing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "missing input file: {}", self.0.display())
    }
}

impl std::error::Error for SourceMissing {}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Compression {
    None,
    Bzip2,
    Zstd,
}

impl Compression {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("bz2") => Compression::Bzip2,
            Some("zst") => Compression::Zstd,
            _ => Compression::None,
        }
    }
}

/// Open `path` for line reading, decoding on the fly according to its extension.
pub fn open_source(path: &Path, read_buf_bytes: usize) -> Result<Box<dyn BufRead + Send>> {
    if !path.exists() {
        return Err(SourceMissing(path.to_path_buf()).into());
    }
    let file = open_with_backoff(path, 16, 50).with_context(|| format!("open {}", path.display()))?;
    let cap = read_buf_bytes.max(8 * 1024);
    let inner: Box<dyn Read + Send> = match Compression::from_path(path) {
        Compression::None => Box::new(file),
        Compression::Bzip2 => Box::new(MultiBzDecoder::new(file)),
        Compression::Zstd => {
            let mut dec = ZstdDecoder::new(file).with_context(|| format!("zstd init {}", path.display()))?;
            dec.window_log_max(31)?;
            Box::new(dec)
        }
    };
    Ok(Box::new(BufReader::with_capacity(cap, inner)))
}

/// Physical lines with `\n` / `\r\n` stripped. Bytes that are not valid UTF-8 are
/// replaced with U+FFFD; the export is not guaranteed to be clean.
pub fn physical_lines<R: BufRead>(reader: R) -> impl Iterator<Item = std::io::Result<String>> {
    reader.split(b'\n').map(|r| {
        r.map(|mut bytes| {
            if bytes.last() == Some(&b'\r') {
                bytes.pop();
            }
            match String::from_utf8(bytes) {
                Ok(line) => line,
                Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
            }
        })
    })
}

/// Logical export records from `path`, continuation lines already joined.
pub fn comment_records(path: &Path, read_buf_bytes: usize) -> Result<impl Iterator<Item = Result<String>>> {
    let reader = open_source(path, read_buf_bytes)?;
    let display = path.display().to_string();
    Ok(Recombined::new(physical_lines(reader))
        .map(move |r| r.with_context(|| format!("read {display}")))
        .filter(|r| !matches!(r, Ok(line) if line.is_empty())))
}
