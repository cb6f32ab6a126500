//! Pluggable blob encodings.
//!
//! Every byte written into the blob area passes through the repository's
//! active [`StorageStrategy`]. Transfers are synchronous stream copies; any
//! failure aborts the whole transfer and the caller discards the partial
//! output.

use std::fmt;
use std::io::{self, Read, Write};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// zstd level used for blob compression
const ZSTD_LEVEL: i32 = 3;

/// How blob bytes are encoded on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageStrategy {
    /// bytes are copied verbatim
    Direct,
    /// bytes are zstd compressed
    #[default]
    Zstd,
}

impl StorageStrategy {
    /// Encode `reader` into `writer`.
    pub fn compress<R: Read, W: Write>(&self, mut reader: R, mut writer: W) -> io::Result<()> {
        match self {
            StorageStrategy::Direct => {
                io::copy(&mut reader, &mut writer)?;
            }
            StorageStrategy::Zstd => zstd::stream::copy_encode(reader, &mut writer, ZSTD_LEVEL)?,
        }
        writer.flush()
    }

    /// Decode `reader` into `writer`.
    pub fn decompress<R: Read, W: Write>(&self, mut reader: R, mut writer: W) -> io::Result<()> {
        match self {
            StorageStrategy::Direct => {
                io::copy(&mut reader, &mut writer)?;
            }
            StorageStrategy::Zstd => zstd::stream::copy_decode(reader, &mut writer)?,
        }
        writer.flush()
    }

    /// Wrap `reader` so that reading from it yields decoded bytes.
    pub fn decoder<'a, R: Read + 'a>(&self, reader: R) -> io::Result<Box<dyn Read + 'a>> {
        Ok(match self {
            StorageStrategy::Direct => Box::new(reader),
            StorageStrategy::Zstd => Box::new(zstd::stream::read::Decoder::new(reader)?),
        })
    }

    /// Encode an in-memory buffer.
    pub fn compress_bytes(&self, data: &[u8]) -> io::Result<Vec<u8>> {
        let mut out = Vec::with_capacity(data.len());
        self.compress(data, &mut out)?;
        Ok(out)
    }

    /// Decode an in-memory buffer.
    pub fn decompress_bytes(&self, data: &[u8]) -> io::Result<Vec<u8>> {
        let mut out = Vec::with_capacity(data.len());
        self.decompress(data, &mut out)?;
        Ok(out)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StorageStrategy::Direct => "direct",
            StorageStrategy::Zstd => "zstd",
        }
    }
}

impl fmt::Display for StorageStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "direct" | "copy" => Ok(StorageStrategy::Direct),
            "zstd" => Ok(StorageStrategy::Zstd),
            other => Err(format!("unknown storage strategy: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direct_is_identity() {
        let data = b"plain bytes".to_vec();
        let encoded = StorageStrategy::Direct.compress_bytes(&data).unwrap();
        assert_eq!(encoded, data);
    }

    #[test]
    fn test_zstd_shrinks_repetitive_data() {
        let data = vec![b'a'; 16 * 1024];
        let encoded = StorageStrategy::Zstd.compress_bytes(&data).unwrap();
        assert!(encoded.len() < data.len());
        let decoded = StorageStrategy::Zstd.decompress_bytes(&encoded).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn test_zstd_rejects_garbage() {
        assert!(StorageStrategy::Zstd.decompress_bytes(b"not a zstd frame").is_err());
    }

    #[test]
    fn test_decoder_streams_plain_bytes() {
        let data = b"stream me".repeat(100);
        for strategy in [StorageStrategy::Direct, StorageStrategy::Zstd] {
            let encoded = strategy.compress_bytes(&data).unwrap();
            let mut decoded = Vec::new();
            strategy.decoder(&encoded[..]).unwrap().read_to_end(&mut decoded).unwrap();
            assert_eq!(decoded, data);
        }
    }

    #[test]
    fn test_parse_names() {
        assert_eq!("zstd".parse::<StorageStrategy>().unwrap(), StorageStrategy::Zstd);
        assert_eq!("Direct".parse::<StorageStrategy>().unwrap(), StorageStrategy::Direct);
        assert!("gzip".parse::<StorageStrategy>().is_err());
        assert_eq!(StorageStrategy::default().to_string(), "zstd");
    }
}
