//! Minimal hand-written marshalling helpers.
//!
//! A codegen step over a shared wire schema would generate these in a
//! larger deployment; no such tool runs in this environment, so each
//! message type below implements [`WireEncode`]/[`WireDecode`] directly,
//! in the style of a lean pair of `ToBytes`/`FromBytes` traits.

use byteorder::{ReadBytesExt, WriteBytesExt, LE};
use std::io::Read;

use crate::{Error, Result};

pub trait WireEncode {
    fn encode(&self, out: &mut Vec<u8>);
}

pub trait WireDecode: Sized {
    fn decode(buf: &mut &[u8]) -> Result<Self>;
}

pub fn write_u8(out: &mut Vec<u8>, v: u8) {
    out.push(v);
}

pub fn write_u16(out: &mut Vec<u8>, v: u16) {
    out.write_u16::<LE>(v).expect("Vec<u8> writes never fail");
}

pub fn write_u32(out: &mut Vec<u8>, v: u32) {
    out.write_u32::<LE>(v).expect("Vec<u8> writes never fail");
}

pub fn write_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    write_u16(out, bytes.len() as u16);
    out.extend_from_slice(bytes);
}

pub fn write_fixed(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(bytes);
}

pub fn read_u8(buf: &mut &[u8]) -> Result<u8> {
    buf.read_u8()
        .map_err(|_| Error::Parse("truncated u8".into()))
}

pub fn read_u16(buf: &mut &[u8]) -> Result<u16> {
    buf.read_u16::<LE>()
        .map_err(|_| Error::Parse("truncated u16".into()))
}

pub fn read_u32(buf: &mut &[u8]) -> Result<u32> {
    buf.read_u32::<LE>()
        .map_err(|_| Error::Parse("truncated u32".into()))
}

pub fn read_bytes(buf: &mut &[u8]) -> Result<Vec<u8>> {
    let len = read_u16(buf)? as usize;
    read_fixed(buf, len)
}

pub fn read_fixed(buf: &mut &[u8], len: usize) -> Result<Vec<u8>> {
    let mut out = vec![0u8; len];
    buf.read_exact(&mut out)
        .map_err(|_| Error::Parse("truncated field".into()))?;
    Ok(out)
}

pub fn read_array<const N: usize>(buf: &mut &[u8]) -> Result<[u8; N]> {
    let mut out = [0u8; N];
    buf.read_exact(&mut out)
        .map_err(|_| Error::Parse("truncated fixed-size field".into()))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_round_trip() {
        let mut out = Vec::new();
        write_bytes(&mut out, b"hello world");
        let mut slice = out.as_slice();
        let back = read_bytes(&mut slice).unwrap();
        assert_eq!(back, b"hello world");
        assert!(slice.is_empty());
    }
}
