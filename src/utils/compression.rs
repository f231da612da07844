//! Wire compressors for `OP_COMPRESSED` messages.
//!
//! Only `noop` and `zstd` are supported. Decompression output is bounded so a
//! hostile peer cannot claim a small frame that inflates without limit.

use std::io::Read;

use crate::error::{DriverError, Result};

/// Default zstd level used when the configuration does not name one
pub const DEFAULT_ZSTD_LEVEL: i32 = 1;

/// Compressors negotiated during the connection handshake
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Compressor {
    Noop,
    Zstd { level: i32 },
}

impl Compressor {
    /// Wire id carried in the `OP_COMPRESSED` header
    pub fn id(&self) -> u8 {
        match self {
            Compressor::Noop => 0,
            Compressor::Zstd { .. } => 3,
        }
    }

    /// Name used in the handshake `compression` list
    pub fn name(&self) -> &'static str {
        match self {
            Compressor::Noop => "noop",
            Compressor::Zstd { .. } => "zstd",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "noop" => Some(Compressor::Noop),
            "zstd" => Some(Compressor::Zstd {
                level: DEFAULT_ZSTD_LEVEL,
            }),
            _ => None,
        }
    }

    /// Resolve a wire id. snappy (1) and zlib (2) are reported as unsupported.
    pub fn from_id(id: u8) -> Result<Self> {
        match id {
            0 => Ok(Compressor::Noop),
            3 => Ok(Compressor::Zstd {
                level: DEFAULT_ZSTD_LEVEL,
            }),
            other => Err(DriverError::Compression(format!(
                "unsupported compressor id {other}"
            ))),
        }
    }

    pub fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        match self {
            Compressor::Noop => Ok(data.to_vec()),
            Compressor::Zstd { level } => {
                let mut out = Vec::with_capacity(data.len() / 2);
                zstd::stream::copy_encode(data, &mut out, *level)
                    .map_err(|e| DriverError::Compression(format!("zstd encode: {e}")))?;
                Ok(out)
            }
        }
    }

    /// Decompress, refusing to produce more than `max_output` bytes
    pub fn decompress(&self, data: &[u8], max_output: usize) -> Result<Vec<u8>> {
        match self {
            Compressor::Noop => {
                if data.len() > max_output {
                    return Err(too_large(max_output));
                }
                Ok(data.to_vec())
            }
            Compressor::Zstd { .. } => {
                let mut reader = zstd::stream::Decoder::new(data)
                    .map_err(|e| DriverError::Compression(format!("zstd decode: {e}")))?;
                let mut out = Vec::new();
                let mut chunk = [0u8; 8192];
                loop {
                    let n = reader
                        .read(&mut chunk)
                        .map_err(|e| DriverError::Compression(format!("zstd decode: {e}")))?;
                    if n == 0 {
                        break;
                    }
                    out.extend_from_slice(&chunk[..n]);
                    if out.len() > max_output {
                        return Err(too_large(max_output));
                    }
                }
                Ok(out)
            }
        }
    }
}

fn too_large(max_output: usize) -> DriverError {
    DriverError::Compression(format!(
        "decompressed output exceeds {max_output} bytes"
    ))
}

/// Commands that are never sent compressed
pub fn is_uncompressible_command(name: &str) -> bool {
    matches!(
        name,
        "hello"
            | "isMaster"
            | "ismaster"
            | "saslStart"
            | "saslContinue"
            | "getnonce"
            | "authenticate"
            | "createUser"
            | "updateUser"
            | "copydbSaslStart"
            | "copydbgetnonce"
            | "copydb"
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_zstd_roundtrip() {
        let original = b"document document document document document".repeat(20);
        let zstd = Compressor::Zstd { level: 3 };
        let compressed = zstd.compress(&original).unwrap();
        assert!(compressed.len() < original.len());
        assert_eq!(zstd.decompress(&compressed, 1 << 20).unwrap(), original);
    }

    #[test]
    fn test_decompression_bomb_rejected() {
        let original = vec![0u8; 1 << 20];
        let zstd = Compressor::Zstd { level: 1 };
        let compressed = zstd.compress(&original).unwrap();
        assert!(zstd.decompress(&compressed, 4096).is_err());
    }

    #[test]
    fn test_malformed_zstd_rejected() {
        let zstd = Compressor::Zstd { level: 1 };
        assert!(zstd.decompress(&[0xde, 0xad, 0xbe, 0xef, 0x00], 1024).is_err());
    }

    #[test]
    fn test_ids_and_names() {
        assert_eq!(Compressor::from_id(0).unwrap(), Compressor::Noop);
        assert_eq!(Compressor::from_id(3).unwrap().name(), "zstd");
        assert!(Compressor::from_id(1).is_err());
        assert!(Compressor::from_id(2).is_err());
        assert_eq!(Compressor::from_name("ZSTD").map(|c| c.id()), Some(3));
        assert!(Compressor::from_name("snappy").is_none());
    }

    #[test]
    fn test_handshake_commands_are_uncompressible() {
        assert!(is_uncompressible_command("isMaster"));
        assert!(is_uncompressible_command("saslContinue"));
        assert!(!is_uncompressible_command("find"));
    }
}
