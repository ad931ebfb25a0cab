//! Durable vector slab: the `.faiss` tier binaries.
//!
//! Fixed little-endian layout: 4-byte magic, u32 version, u32 dimension,
//! u64 count, then `count * dimension` f32 values. The count stored here is
//! authoritative over the JSON state file after a crash.

use std::io::{Read, Write};
use std::path::Path;

use crate::IndexError;

const MAGIC: [u8; 4] = *b"VSLB";
const VERSION: u32 = 1;

pub fn write_slab(path: &Path, dim: usize, vectors: &[Vec<f32>]) -> Result<(), IndexError> {
    let mut flat: Vec<f32> = Vec::with_capacity(vectors.len() * dim);
    for v in vectors {
        flat.extend_from_slice(v);
    }

    let tmp = path.with_extension("tmp");
    {
        let mut file = std::fs::File::create(&tmp)?;
        file.write_all(&MAGIC)?;
        file.write_all(&VERSION.to_le_bytes())?;
        file.write_all(&(dim as u32).to_le_bytes())?;
        file.write_all(&(vectors.len() as u64).to_le_bytes())?;
        file.write_all(bytemuck::cast_slice(&flat))?;
        file.sync_all()?;
    }
    std::fs::rename(&tmp, path)?;
    Ok(())
}

pub fn read_slab(path: &Path, expected_dim: usize) -> Result<Vec<Vec<f32>>, IndexError> {
    let corrupt = |reason: &str| IndexError::Corrupt {
        path: path.display().to_string(),
        reason: reason.to_string(),
    };

    let mut file = std::fs::File::open(path)?;
    let mut header = [0u8; 20];
    file.read_exact(&mut header)
        .map_err(|_| corrupt("truncated header"))?;

    if header[0..4] != MAGIC {
        return Err(corrupt("bad magic"));
    }
    let version = u32::from_le_bytes(header[4..8].try_into().expect("fixed slice"));
    if version != VERSION {
        return Err(corrupt("unsupported version"));
    }
    let dim = u32::from_le_bytes(header[8..12].try_into().expect("fixed slice")) as usize;
    if dim != expected_dim {
        return Err(IndexError::DimensionMismatch {
            expected: expected_dim,
            got: dim,
        });
    }
    let count = u64::from_le_bytes(header[12..20].try_into().expect("fixed slice")) as usize;

    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)?;
    if bytes.len() < count * dim * 4 {
        return Err(corrupt("truncated vector data"));
    }
    bytes.truncate(count * dim * 4);

    let flat: Vec<f32> = bytemuck::pod_collect_to_vec(&bytes);
    Ok(flat.chunks_exact(dim).map(|c| c.to_vec()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slab_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vectors.faiss");
        let vectors = vec![vec![1.0f32, 0.0, 0.5], vec![-0.25f32, 2.0, 0.0]];

        write_slab(&path, 3, &vectors).unwrap();
        let back = read_slab(&path, 3).unwrap();
        assert_eq!(back, vectors);
    }

    #[test]
    fn dimension_mismatch_is_detected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vectors.faiss");
        write_slab(&path, 2, &[vec![1.0f32, 0.0]]).unwrap();
        assert!(matches!(
            read_slab(&path, 3),
            Err(IndexError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn garbage_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vectors.faiss");
        std::fs::write(&path, b"not a slab at all").unwrap();
        assert!(matches!(read_slab(&path, 3), Err(IndexError::Corrupt { .. })));
    }

    #[test]
    fn empty_slab_is_valid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vectors.faiss");
        write_slab(&path, 4, &[]).unwrap();
        assert!(read_slab(&path, 4).unwrap().is_empty());
    }
}
