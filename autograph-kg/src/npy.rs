//! Minimal NumPy `.npy` v1 support for 2-D little-endian f32 arrays, enough
//! to stay compatible with the embedding files the graph stores.

use std::io::{Read, Write};
use std::path::Path;

use crate::KgError;

const MAGIC: &[u8] = b"\x93NUMPY";

pub fn write_npy(path: &Path, rows: &[Vec<f32>], dim: usize) -> Result<(), KgError> {
    let mut header = format!(
        "{{'descr': '<f4', 'fortran_order': False, 'shape': ({}, {}), }}",
        rows.len(),
        dim
    );
    // Total header (magic + version + len + dict + '\n') pads to 64 bytes.
    let unpadded = MAGIC.len() + 2 + 2 + header.len() + 1;
    let padding = (64 - unpadded % 64) % 64;
    header.push_str(&" ".repeat(padding));
    header.push('\n');

    let tmp = path.with_extension("tmp");
    {
        let mut file = std::fs::File::create(&tmp)?;
        file.write_all(MAGIC)?;
        file.write_all(&[0x01, 0x00])?;
        file.write_all(&(header.len() as u16).to_le_bytes())?;
        file.write_all(header.as_bytes())?;
        for row in rows {
            for v in row {
                file.write_all(&v.to_le_bytes())?;
            }
        }
        file.sync_all()?;
    }
    std::fs::rename(&tmp, path)?;
    Ok(())
}

pub fn read_npy(path: &Path) -> Result<Vec<Vec<f32>>, KgError> {
    let corrupt = |reason: &str| KgError::Corrupt(format!("{}: {reason}", path.display()));

    let mut file = std::fs::File::open(path)?;
    let mut magic = [0u8; 8];
    file.read_exact(&mut magic).map_err(|_| corrupt("truncated"))?;
    if &magic[..6] != MAGIC {
        return Err(corrupt("bad magic"));
    }

    let mut len_bytes = [0u8; 2];
    file.read_exact(&mut len_bytes)
        .map_err(|_| corrupt("truncated header length"))?;
    let header_len = u16::from_le_bytes(len_bytes) as usize;

    let mut header = vec![0u8; header_len];
    file.read_exact(&mut header)
        .map_err(|_| corrupt("truncated header"))?;
    let header = String::from_utf8_lossy(&header);

    if !header.contains("'descr': '<f4'") {
        return Err(corrupt("unsupported dtype"));
    }
    if header.contains("'fortran_order': True") {
        return Err(corrupt("fortran order unsupported"));
    }

    let (rows, dim) = parse_shape(&header).ok_or_else(|| corrupt("unparseable shape"))?;

    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)?;
    if bytes.len() < rows * dim * 4 {
        return Err(corrupt("truncated data"));
    }

    let mut out = Vec::with_capacity(rows);
    for r in 0..rows {
        let mut row = Vec::with_capacity(dim);
        for c in 0..dim {
            let base = (r * dim + c) * 4;
            row.push(f32::from_le_bytes(
                bytes[base..base + 4].try_into().expect("fixed slice"),
            ));
        }
        out.push(row);
    }
    Ok(out)
}

fn parse_shape(header: &str) -> Option<(usize, usize)> {
    let start = header.find("'shape':")?;
    let open = header[start..].find('(')? + start;
    let close = header[open..].find(')')? + open;
    let dims: Vec<usize> = header[open + 1..close]
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse().ok())
        .collect::<Option<Vec<_>>>()?;
    match dims.as_slice() {
        [rows, cols] => Some((*rows, *cols)),
        [rows] => Some((*rows, 1)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn npy_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("embeddings.npy");
        let rows = vec![vec![0.5f32, -1.0, 2.25], vec![0.0f32, 1.0, -0.125]];

        write_npy(&path, &rows, 3).unwrap();
        let back = read_npy(&path).unwrap();
        assert_eq!(back, rows);
    }

    #[test]
    fn empty_matrix_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("embeddings.npy");
        write_npy(&path, &[], 4).unwrap();
        assert!(read_npy(&path).unwrap().is_empty());
    }

    #[test]
    fn header_is_64_byte_aligned() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("embeddings.npy");
        write_npy(&path, &[vec![1.0f32]], 1).unwrap();
        let bytes = std::fs::read(&path).unwrap();
        let header_len = u16::from_le_bytes([bytes[8], bytes[9]]) as usize;
        assert_eq!((10 + header_len) % 64, 0);
    }

    #[test]
    fn garbage_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("embeddings.npy");
        std::fs::write(&path, b"definitely not npy").unwrap();
        assert!(matches!(read_npy(&path), Err(KgError::Corrupt(_))));
    }
}
