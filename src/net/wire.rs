//! Low-level wire codec.
//!
//! Every multibyte integer travels big-endian. Strings are a `u16` length
//! followed by the bytes; float vectors are a `u32` count followed by
//! IEEE-754 singles. Fixed-size arrays whose length both sides already
//! know are written raw, without a prefix.

use std::io::{Read, Write};

use crate::constants::net::MAX_VECTOR_LEN;
use crate::error::{EngineError, EngineResult, IoContext};

pub fn read_u8(r: &mut impl Read) -> EngineResult<u8> {
    let mut buf = [0u8; 1];
    r.read_exact(&mut buf).io_context("read u8")?;
    Ok(buf[0])
}

pub fn write_u8(w: &mut impl Write, value: u8) -> EngineResult<()> {
    w.write_all(&[value]).io_context("write u8")
}

pub fn read_u16(r: &mut impl Read) -> EngineResult<u16> {
    let mut buf = [0u8; 2];
    r.read_exact(&mut buf).io_context("read u16")?;
    Ok(u16::from_be_bytes(buf))
}

pub fn write_u16(w: &mut impl Write, value: u16) -> EngineResult<()> {
    w.write_all(&value.to_be_bytes()).io_context("write u16")
}

pub fn read_u32(r: &mut impl Read) -> EngineResult<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf).io_context("read u32")?;
    Ok(u32::from_be_bytes(buf))
}

pub fn write_u32(w: &mut impl Write, value: u32) -> EngineResult<()> {
    w.write_all(&value.to_be_bytes()).io_context("write u32")
}

pub fn read_f32(r: &mut impl Read) -> EngineResult<f32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf).io_context("read f32")?;
    Ok(f32::from_be_bytes(buf))
}

pub fn write_f32(w: &mut impl Write, value: f32) -> EngineResult<()> {
    w.write_all(&value.to_be_bytes()).io_context("write f32")
}

/// Length-prefixed string: `len:u16` then `len` bytes
pub fn read_string(r: &mut impl Read) -> EngineResult<String> {
    let len = read_u16(r)? as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf).io_context("read string")?;
    String::from_utf8(buf).map_err(|_| EngineError::Protocol {
        message: "string is not valid UTF-8".to_string(),
    })
}

pub fn write_string(w: &mut impl Write, value: &str) -> EngineResult<()> {
    if value.len() > u16::MAX as usize {
        return Err(EngineError::Protocol {
            message: format!("string of {} bytes exceeds u16 length", value.len()),
        });
    }
    write_u16(w, value.len() as u16)?;
    w.write_all(value.as_bytes()).io_context("write string")
}

/// NUL-terminated string, used by the file listing
pub fn read_cstr(r: &mut impl Read) -> EngineResult<String> {
    let mut bytes = Vec::new();
    loop {
        let b = read_u8(r)?;
        if b == 0 {
            break;
        }
        bytes.push(b);
    }
    String::from_utf8(bytes).map_err(|_| EngineError::Protocol {
        message: "c-string is not valid UTF-8".to_string(),
    })
}

pub fn write_cstr(w: &mut impl Write, value: &str) -> EngineResult<()> {
    if value.as_bytes().contains(&0) {
        return Err(EngineError::Protocol {
            message: "c-string contains NUL".to_string(),
        });
    }
    w.write_all(value.as_bytes()).io_context("write c-string")?;
    write_u8(w, 0)
}

/// Length-prefixed float vector: `len:u32` then `len` singles
pub fn read_f32_vec(r: &mut impl Read) -> EngineResult<Vec<f32>> {
    let len = read_u32(r)?;
    if len > MAX_VECTOR_LEN {
        return Err(EngineError::Protocol {
            message: format!("float vector of {} elements exceeds limit", len),
        });
    }
    read_f32_array(r, len as usize)
}

pub fn write_f32_vec(w: &mut impl Write, values: &[f32]) -> EngineResult<()> {
    write_u32(w, values.len() as u32)?;
    write_f32_array(w, values)
}

/// Raw float array, count known out of band
pub fn read_f32_array(r: &mut impl Read, count: usize) -> EngineResult<Vec<f32>> {
    let mut buf = vec![0u8; count * 4];
    r.read_exact(&mut buf).io_context("read f32 array")?;
    Ok(buf
        .chunks_exact(4)
        .map(|c| f32::from_be_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

pub fn write_f32_array(w: &mut impl Write, values: &[f32]) -> EngineResult<()> {
    let mut buf = Vec::with_capacity(values.len() * 4);
    for v in values {
        buf.extend_from_slice(&v.to_be_bytes());
    }
    w.write_all(&buf).io_context("write f32 array")
}

/// Raw u32 array, count known out of band
pub fn read_u32_array(r: &mut impl Read, count: usize) -> EngineResult<Vec<u32>> {
    let mut buf = vec![0u8; count * 4];
    r.read_exact(&mut buf).io_context("read u32 array")?;
    Ok(buf
        .chunks_exact(4)
        .map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

pub fn write_u32_array(w: &mut impl Write, values: &[u32]) -> EngineResult<()> {
    let mut buf = Vec::with_capacity(values.len() * 4);
    for v in values {
        buf.extend_from_slice(&v.to_be_bytes());
    }
    w.write_all(&buf).io_context("write u32 array")
}

/// Raw u16 array, big-endian elements
pub fn read_u16_array(r: &mut impl Read, count: usize) -> EngineResult<Vec<u16>> {
    let mut buf = vec![0u8; count * 2];
    r.read_exact(&mut buf).io_context("read u16 array")?;
    Ok(buf
        .chunks_exact(2)
        .map(|c| u16::from_be_bytes([c[0], c[1]]))
        .collect())
}

pub fn write_u16_array(w: &mut impl Write, values: &[u16]) -> EngineResult<()> {
    let mut buf = Vec::with_capacity(values.len() * 2);
    for v in values {
        buf.extend_from_slice(&v.to_be_bytes());
    }
    w.write_all(&buf).io_context("write u16 array")
}

pub fn read_bytes(r: &mut impl Read, count: usize) -> EngineResult<Vec<u8>> {
    let mut buf = vec![0u8; count];
    r.read_exact(&mut buf).io_context("read bytes")?;
    Ok(buf)
}

pub fn write_bytes(w: &mut impl Write, bytes: &[u8]) -> EngineResult<()> {
    w.write_all(bytes).io_context("write bytes")
}
