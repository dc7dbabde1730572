//! Image header fields merged into the index.

use flate2::read::GzDecoder;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use crate::error::Error;

/// Field names produced by header readers. These are never written back as
/// sidecar merge targets because they describe the image itself.
pub const HEADER_FIELDS: [&str; 8] = [
    "Dim1Size",
    "Dim2Size",
    "Dim3Size",
    "Dim4Size",
    "NumVolumes",
    "VoxelSizeDim1",
    "VoxelSizeDim2",
    "VoxelSizeDim3",
];

/// Reads derived fields from a scan's image header.
pub trait HeaderReader: Send + Sync {
    fn read(&self, path: &Path) -> Result<BTreeMap<String, Value>, Error>;
}

/// NIfTI-1 / NIfTI-2 header reader. `.gz` files are decompressed on the fly;
/// only the fixed-size header is read.
pub struct NiftiHeaderReader;

const NIFTI1_HEADER: usize = 348;
const NIFTI2_HEADER: usize = 540;

impl HeaderReader for NiftiHeaderReader {
    fn read(&self, path: &Path) -> Result<BTreeMap<String, Value>, Error> {
        let file = File::open(path)?;
        let name = path.to_string_lossy();
        let mut reader: Box<dyn Read> = if name.ends_with(".gz") {
            Box::new(GzDecoder::new(file))
        } else {
            Box::new(file)
        };

        let mut buf = vec![0u8; NIFTI2_HEADER];
        let read = read_up_to(&mut reader, &mut buf)?;
        buf.truncate(read);
        parse_header(&buf).ok_or_else(|| {
            Error::Other(format!("{} does not carry a NIfTI header", path.display()))
        })
    }
}

fn read_up_to(reader: &mut dyn Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..])? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}

#[derive(Clone, Copy)]
enum Endian {
    Little,
    Big,
}

fn i32_at(buf: &[u8], at: usize, e: Endian) -> i32 {
    let b = [buf[at], buf[at + 1], buf[at + 2], buf[at + 3]];
    match e {
        Endian::Little => i32::from_le_bytes(b),
        Endian::Big => i32::from_be_bytes(b),
    }
}

fn i16_at(buf: &[u8], at: usize, e: Endian) -> i64 {
    let b = [buf[at], buf[at + 1]];
    match e {
        Endian::Little => i16::from_le_bytes(b) as i64,
        Endian::Big => i16::from_be_bytes(b) as i64,
    }
}

fn i64_at(buf: &[u8], at: usize, e: Endian) -> i64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(&buf[at..at + 8]);
    match e {
        Endian::Little => i64::from_le_bytes(b),
        Endian::Big => i64::from_be_bytes(b),
    }
}

fn f32_at(buf: &[u8], at: usize, e: Endian) -> f64 {
    let b = [buf[at], buf[at + 1], buf[at + 2], buf[at + 3]];
    match e {
        Endian::Little => f32::from_le_bytes(b) as f64,
        Endian::Big => f32::from_be_bytes(b) as f64,
    }
}

fn f64_at(buf: &[u8], at: usize, e: Endian) -> f64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(&buf[at..at + 8]);
    match e {
        Endian::Little => f64::from_le_bytes(b),
        Endian::Big => f64::from_be_bytes(b),
    }
}

/// Decode `dim` and `pixdim` from a raw header.
pub fn parse_header(buf: &[u8]) -> Option<BTreeMap<String, Value>> {
    if buf.len() < NIFTI1_HEADER {
        return None;
    }
    let (dims, pixdims): ([i64; 8], [f64; 8]) = if let Some(e) = detect(buf, NIFTI1_HEADER as i32)
    {
        let mut dims = [0i64; 8];
        let mut pix = [0f64; 8];
        for i in 0..8 {
            dims[i] = i16_at(buf, 40 + 2 * i, e);
            pix[i] = f32_at(buf, 76 + 4 * i, e);
        }
        (dims, pix)
    } else if buf.len() >= NIFTI2_HEADER {
        let e = detect(buf, NIFTI2_HEADER as i32)?;
        let mut dims = [0i64; 8];
        let mut pix = [0f64; 8];
        for i in 0..8 {
            dims[i] = i64_at(buf, 16 + 8 * i, e);
            pix[i] = f64_at(buf, 104 + 8 * i, e);
        }
        (dims, pix)
    } else {
        return None;
    };

    let ndim = dims[0].clamp(0, 7);
    let volumes = if ndim >= 4 { dims[4].max(1) } else { 1 };

    let mut fields = BTreeMap::new();
    for axis in 1..=3usize {
        let size = if (axis as i64) <= ndim { dims[axis] } else { 1 };
        fields.insert(format!("Dim{}Size", axis), json!(size));
        fields.insert(format!("VoxelSizeDim{}", axis), json!(round6(pixdims[axis])));
    }
    fields.insert("Dim4Size".to_string(), json!(volumes));
    fields.insert("NumVolumes".to_string(), json!(volumes));
    Some(fields)
}

fn detect(buf: &[u8], expected: i32) -> Option<Endian> {
    if i32_at(buf, 0, Endian::Little) == expected {
        Some(Endian::Little)
    } else if i32_at(buf, 0, Endian::Big) == expected {
        Some(Endian::Big)
    } else {
        None
    }
}

fn round6(v: f64) -> f64 {
    (v * 1e6).round() / 1e6
}

#[cfg(test)]
pub(crate) fn synthetic_nifti1(dims: [i16; 8], pixdims: [f32; 8]) -> Vec<u8> {
    let mut buf = vec![0u8; NIFTI1_HEADER + 4];
    buf[0..4].copy_from_slice(&(NIFTI1_HEADER as i32).to_le_bytes());
    for i in 0..8 {
        buf[40 + 2 * i..42 + 2 * i].copy_from_slice(&dims[i].to_le_bytes());
        buf[76 + 4 * i..80 + 4 * i].copy_from_slice(&pixdims[i].to_le_bytes());
    }
    buf[344..348].copy_from_slice(b"n+1\0");
    buf
}
