//! Transparent decompression of batch files.
//!
//! Daily extracts arrive plain, gzip- or zstd-compressed. The codec is picked from
//! the file extension first and from the leading magic bytes otherwise, so a
//! renamed `.csv` that is really gzip still reads correctly.

use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

/// Compression formats a batch file may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    #[cfg(feature = "compression-gzip")]
    Gzip,
    #[cfg(feature = "compression-zstd")]
    Zstd,
}

impl Codec {
    const ALL: &'static [Codec] = &[
        #[cfg(feature = "compression-gzip")]
        Codec::Gzip,
        #[cfg(feature = "compression-zstd")]
        Codec::Zstd,
    ];

    pub fn name(self) -> &'static str {
        match self {
            #[cfg(feature = "compression-gzip")]
            Codec::Gzip => "gzip",
            #[cfg(feature = "compression-zstd")]
            Codec::Zstd => "zstd",
        }
    }

    fn extensions(self) -> &'static [&'static str] {
        match self {
            #[cfg(feature = "compression-gzip")]
            Codec::Gzip => &[".gz", ".gzip"],
            #[cfg(feature = "compression-zstd")]
            Codec::Zstd => &[".zst", ".zstd"],
        }
    }

    fn magic(self) -> &'static [u8] {
        match self {
            #[cfg(feature = "compression-gzip")]
            Codec::Gzip => &[0x1f, 0x8b],
            #[cfg(feature = "compression-zstd")]
            Codec::Zstd => &[0x28, 0xb5, 0x2f, 0xfd],
        }
    }

    /// Codec implied by the file name, case-insensitively.
    pub fn from_path(path: impl AsRef<Path>) -> Option<Codec> {
        let name = path.as_ref().to_string_lossy().to_lowercase();
        Self::ALL
            .iter()
            .copied()
            .find(|c| c.extensions().iter().any(|ext| name.ends_with(ext)))
    }

    fn from_magic<R: BufRead>(reader: &mut R) -> Option<Codec> {
        let head = reader.fill_buf().ok()?;
        Self::ALL
            .iter()
            .copied()
            .find(|c| head.starts_with(c.magic()))
    }

    fn decoder(self, reader: Box<dyn Read>) -> std::io::Result<Box<dyn Read>> {
        match self {
            #[cfg(feature = "compression-gzip")]
            Codec::Gzip => Ok(Box::new(flate2::read::MultiGzDecoder::new(reader))),
            #[cfg(feature = "compression-zstd")]
            Codec::Zstd => Ok(Box::new(zstd::stream::read::Decoder::new(reader)?)),
        }
    }

    fn encoder(self, writer: Box<dyn Write>) -> std::io::Result<Box<dyn Write>> {
        match self {
            #[cfg(feature = "compression-gzip")]
            Codec::Gzip => Ok(Box::new(flate2::write::GzEncoder::new(
                writer,
                flate2::Compression::default(),
            ))),
            #[cfg(feature = "compression-zstd")]
            Codec::Zstd => Ok(Box::new(
                zstd::stream::write::Encoder::new(writer, 3)?.auto_finish(),
            )),
        }
    }
}

/// Wrap `reader` in a decoder if `path_hint` or the stream's first bytes name a codec.
pub fn decompressing_reader<R: Read + 'static>(
    reader: R,
    path_hint: impl AsRef<Path>,
) -> Result<Box<dyn Read>> {
    let mut buffered = BufReader::new(reader);
    let codec = Codec::from_path(&path_hint).or_else(|| Codec::from_magic(&mut buffered));
    match codec {
        Some(codec) => codec
            .decoder(Box::new(buffered))
            .with_context(|| format!("open {} stream", codec.name())),
        None => Ok(Box::new(buffered)),
    }
}

/// Open a file for reading, decompressing as needed.
pub fn open_reader(path: impl AsRef<Path>) -> Result<Box<dyn Read>> {
    let path = path.as_ref();
    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    decompressing_reader(file, path)
}

/// Create a file for writing, compressing when the extension names a codec.
pub fn create_writer(path: impl AsRef<Path>) -> Result<Box<dyn Write>> {
    let path = path.as_ref();
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create dir {}", parent.display()))?;
    }
    let file = File::create(path).with_context(|| format!("create {}", path.display()))?;
    let writer: Box<dyn Write> = Box::new(BufWriter::new(file));
    match Codec::from_path(path) {
        Some(codec) => codec
            .encoder(writer)
            .with_context(|| format!("open {} encoder for {}", codec.name(), path.display())),
        None => Ok(writer),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn extension_detection_is_case_insensitive() {
        #[cfg(feature = "compression-gzip")]
        assert_eq!(Codec::from_path("sales_2024.CSV.GZ"), Some(Codec::Gzip));
        #[cfg(feature = "compression-zstd")]
        assert_eq!(Codec::from_path("sales.csv.zst"), Some(Codec::Zstd));
        assert_eq!(Codec::from_path("sales.csv"), None);
    }

    #[test]
    fn plain_stream_passes_through() -> Result<()> {
        let mut out = String::new();
        decompressing_reader(Cursor::new(b"a,b\n1,2\n".to_vec()), "x.csv")?
            .read_to_string(&mut out)?;
        assert_eq!(out, "a,b\n1,2\n");
        Ok(())
    }

    #[cfg(feature = "compression-gzip")]
    #[test]
    fn gzip_detected_by_magic_bytes() -> Result<()> {
        let mut enc = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::fast());
        enc.write_all(b"transaction_id\nT1\n")?;
        let bytes = enc.finish()?;

        let mut out = String::new();
        decompressing_reader(Cursor::new(bytes), "renamed.csv")?.read_to_string(&mut out)?;
        assert_eq!(out, "transaction_id\nT1\n");
        Ok(())
    }
}
