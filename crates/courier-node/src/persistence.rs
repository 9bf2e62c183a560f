use std::fs;
use std::path::Path;

use crate::error::LedgerError;
use crate::ledger::LedgerSnapshot;

/// Encodes a [`LedgerSnapshot`] to CBOR bytes.
pub fn encode_snapshot_cbor(snapshot: &LedgerSnapshot) -> Result<Vec<u8>, LedgerError> {
    let mut out = Vec::new();
    ciborium::into_writer(snapshot, &mut out).map_err(|e| LedgerError::Encode(e.to_string()))?;
    Ok(out)
}

/// Decodes a [`LedgerSnapshot`] from CBOR bytes.
pub fn decode_snapshot_cbor(bytes: &[u8]) -> Result<LedgerSnapshot, LedgerError> {
    ciborium::from_reader(bytes).map_err(|e| LedgerError::Decode(e.to_string()))
}

/// Saves a snapshot to `path` via a temporary file and rename.
pub fn save_snapshot_to_path(
    path: impl AsRef<Path>,
    snapshot: &LedgerSnapshot,
) -> Result<(), LedgerError> {
    let bytes = encode_snapshot_cbor(snapshot)?;
    let path = path.as_ref();
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes).map_err(LedgerError::Write)?;
    fs::rename(&tmp, path).map_err(LedgerError::Write)
}

pub fn load_snapshot_from_path(path: impl AsRef<Path>) -> Result<LedgerSnapshot, LedgerError> {
    let bytes = fs::read(path.as_ref()).map_err(LedgerError::Read)?;
    decode_snapshot_cbor(&bytes)
}

/// Loads a snapshot if the file exists; otherwise returns an empty one.
pub fn load_snapshot_or_default(path: impl AsRef<Path>) -> Result<LedgerSnapshot, LedgerError> {
    if !path.as_ref().exists() {
        return Ok(LedgerSnapshot::default());
    }
    load_snapshot_from_path(path)
}

#[cfg(test)]
mod tests {
    use crate::error::LedgerError;
    use crate::ledger::LedgerSnapshot;

    use super::{
        decode_snapshot_cbor, encode_snapshot_cbor, load_snapshot_from_path,
        load_snapshot_or_default, save_snapshot_to_path,
    };

    fn sample() -> LedgerSnapshot {
        LedgerSnapshot {
            delivered: vec!["00000001".into(), "9A1F0C1E-2B7D-4C6A-8F00-1D2E3F405162".into()],
        }
    }

    #[test]
    fn snapshot_round_trip_cbor() {
        let encoded = encode_snapshot_cbor(&sample()).expect("snapshot should encode");
        let decoded = decode_snapshot_cbor(&encoded).expect("snapshot should decode");
        assert_eq!(decoded, sample());
    }

    #[test]
    fn garbage_fails_to_decode() {
        let err = decode_snapshot_cbor(&[0xFF, 0x00, 0x13]).expect_err("not cbor");
        assert!(matches!(err, LedgerError::Decode(_)));
    }

    #[test]
    fn file_helpers_round_trip_and_default() {
        let dir = tempfile::tempdir().expect("temp dir");
        let file = dir.path().join("ledger.cbor");

        save_snapshot_to_path(&file, &sample()).expect("snapshot should be saved");
        let loaded = load_snapshot_from_path(&file).expect("snapshot should load");
        assert_eq!(loaded, sample());
        assert!(!file.with_extension("tmp").exists());

        let missing = dir.path().join("missing.cbor");
        let defaulted = load_snapshot_or_default(&missing).expect("missing file defaults");
        assert!(defaulted.delivered.is_empty());
    }
}
