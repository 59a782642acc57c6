//! In-place gzip encoding of dump files.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use uuid::Uuid;

use crate::DumpError;

/// Gzips `path` at maximum compression, replacing its contents. Returns the new size.
pub fn encode(path: &Path) -> Result<u64, DumpError> {
    rewrite(path, |source, staged| {
        let mut encoder = GzEncoder::new(BufWriter::new(staged), Compression::best());
        io::copy(&mut BufReader::new(source), &mut encoder)?;
        encoder.finish()?.flush()
    })
    .map_err(|source| DumpError::Compression {
        path: path.to_owned(),
        source,
    })
}

/// Reverses [`encode`]. A truncated or corrupt stream leaves `path` untouched.
pub fn decode(path: &Path) -> Result<u64, DumpError> {
    rewrite(path, |source, staged| {
        let mut decoder = MultiGzDecoder::new(BufReader::new(source));
        let mut out = BufWriter::new(staged);
        io::copy(&mut decoder, &mut out)?;
        out.flush()
    })
    .map_err(|source| DumpError::Decompression {
        path: path.to_owned(),
        source,
    })
}

fn rewrite(path: &Path, transform: impl FnOnce(File, File) -> io::Result<()>) -> io::Result<u64> {
    let staged = staging_path(path);
    let result = File::open(path)
        .and_then(|source| Ok((source, File::create(&staged)?)))
        .and_then(|(source, target)| transform(source, target))
        .and_then(|()| fs::rename(&staged, path))
        .and_then(|()| fs::metadata(path).map(|m| m.len()));
    if result.is_err() {
        let _ = fs::remove_file(&staged);
    }
    result
}

fn staging_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.{}", Uuid::new_v4().simple()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_then_decode_restores_contents() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join("dump.sql");
        let body = "INSERT INTO t VALUES (1);\n".repeat(500);
        fs::write(&path, &body).expect("write");

        let compressed = encode(&path).expect("encode");
        assert!(compressed < body.len() as u64);
        assert_eq!(&fs::read(&path).expect("read")[..2], &[0x1f, 0x8b]);

        decode(&path).expect("decode");
        assert_eq!(fs::read_to_string(&path).expect("read"), body);
        assert_eq!(fs::read_dir(tmp.path()).expect("ls").count(), 1);
    }

    #[test]
    fn corrupt_archive_fails_and_keeps_file() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join("broken.sql.gz");
        fs::write(&path, b"definitely not gzip").expect("write");

        let err = decode(&path).expect_err("corrupt");
        assert!(matches!(err, DumpError::Decompression { .. }));
        assert_eq!(fs::read(&path).expect("read"), b"definitely not gzip");
        assert_eq!(fs::read_dir(tmp.path()).expect("ls").count(), 1);
    }

    #[test]
    fn truncated_archive_fails() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join("dump.sql");
        fs::write(&path, "SELECT 1;\n".repeat(1000)).expect("write");
        encode(&path).expect("encode");

        let bytes = fs::read(&path).expect("read");
        fs::write(&path, &bytes[..bytes.len() / 2]).expect("truncate");
        assert!(matches!(decode(&path), Err(DumpError::Decompression { .. })));
    }

    #[test]
    fn missing_file_is_a_compression_error() {
        let tmp = tempfile::tempdir().expect("tempdir");
        assert!(matches!(
            encode(&tmp.path().join("absent.sql")),
            Err(DumpError::Compression { .. })
        ));
    }
}
