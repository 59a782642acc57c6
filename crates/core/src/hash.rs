use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use sha2::{Digest, Sha256};

/// Streams a file through SHA-256 and returns the hex digest with the byte count.
pub fn file_checksum(path: &Path) -> io::Result<(String, u64)> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    let mut total = 0u64;
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        total += n as u64;
    }
    Ok((hex::encode(hasher.finalize()), total))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_streams_large_files() {
        let tmp = tempfile::NamedTempFile::new().expect("tempfile");
        let payload = vec![7u8; 200_000];
        std::fs::write(tmp.path(), &payload).expect("write");

        let (digest, size) = file_checksum(tmp.path()).expect("checksum");
        assert_eq!(digest, hex::encode(Sha256::digest(&payload)));
        assert_eq!(size, 200_000);
    }

    #[test]
    fn checksum_changes_with_content() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let a = tmp.path().join("a.sql");
        let b = tmp.path().join("b.sql");
        std::fs::write(&a, b"v1").expect("write");
        std::fs::write(&b, b"v2").expect("write");
        assert_ne!(file_checksum(&a).expect("a").0, file_checksum(&b).expect("b").0);
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(file_checksum(Path::new("/definitely/missing.sql")).is_err());
    }
}
