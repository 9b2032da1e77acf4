//! Checksums for downloaded source files
//!
//! Every file pulled from the portal is fingerprinted before it is parsed so
//! the stored records can be traced back to the exact bytes they came from.

use crate::error::Result;
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::Path;

const READ_BUFFER_SIZE: usize = 8192;

/// Hex SHA-256 digest of a file on disk
pub fn compute_file_checksum(path: impl AsRef<Path>) -> Result<String> {
    let mut file = std::fs::File::open(path)?;
    compute_checksum(&mut file)
}

/// Hex SHA-256 digest of any readable source, streamed in fixed chunks
pub fn compute_checksum<R: Read>(reader: &mut R) -> Result<String> {
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; READ_BUFFER_SIZE];

    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::error::CommonError;
    use std::io::{Cursor, Write};

    const HELLO_WORLD_SHA256: &str =
        "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";

    #[test]
    fn test_compute_checksum_sha256() {
        let mut cursor = Cursor::new(b"hello world");
        assert_eq!(compute_checksum(&mut cursor).unwrap(), HELLO_WORLD_SHA256);
    }

    #[test]
    fn test_file_checksum_matches_stream_checksum() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"hello world").unwrap();

        assert_eq!(compute_file_checksum(file.path()).unwrap(), HELLO_WORLD_SHA256);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = compute_file_checksum("/definitely/not/here.csv").unwrap_err();
        assert!(matches!(err, CommonError::Io(_)));
    }
}
