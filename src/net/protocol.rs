//! Request protocol of the brick server.
//!
//! Every request is one command byte followed by command-specific fields;
//! responses are command-specific (see the server). The same structs are
//! broadcast to the worker ranks after rank 0 parses them.

use std::io::{Read, Write};

use glam::UVec3;

use crate::dataset::{BrickData, BrickKey, BrickMetadata, ScalarType};
use crate::error::{EngineError, EngineResult};
use crate::net::wire;

/// Command byte of every request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CommandCode {
    Open = 0,
    Close = 1,
    Brick = 2,
    ListFiles = 3,
    Shutdown = 4,
    Rotation = 5,
    BatchSize = 6,
}

impl TryFrom<u8> for CommandCode {
    type Error = EngineError;

    fn try_from(value: u8) -> EngineResult<Self> {
        Ok(match value {
            0 => CommandCode::Open,
            1 => CommandCode::Close,
            2 => CommandCode::Brick,
            3 => CommandCode::ListFiles,
            4 => CommandCode::Shutdown,
            5 => CommandCode::Rotation,
            6 => CommandCode::BatchSize,
            other => {
                return Err(EngineError::Protocol {
                    message: format!("unknown command byte 0x{:02x}", other),
                })
            }
        })
    }
}

/// Element type of a streamed brick payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NetDataType {
    U8 = 0,
    U16 = 1,
    U32 = 2,
}

impl NetDataType {
    pub fn size_bytes(&self) -> usize {
        match self {
            NetDataType::U8 => 1,
            NetDataType::U16 => 2,
            NetDataType::U32 => 4,
        }
    }

    pub fn to_scalar(self) -> ScalarType {
        match self {
            NetDataType::U8 => ScalarType::U8,
            NetDataType::U16 => ScalarType::U16,
            NetDataType::U32 => ScalarType::U32,
        }
    }

    pub fn from_scalar(scalar: ScalarType) -> Option<Self> {
        match scalar {
            ScalarType::U8 => Some(NetDataType::U8),
            ScalarType::U16 => Some(NetDataType::U16),
            ScalarType::U32 => Some(NetDataType::U32),
            _ => None,
        }
    }
}

impl TryFrom<u8> for NetDataType {
    type Error = EngineError;

    fn try_from(value: u8) -> EngineResult<Self> {
        Ok(match value {
            0 => NetDataType::U8,
            1 => NetDataType::U16,
            2 => NetDataType::U32,
            other => {
                return Err(EngineError::Protocol {
                    message: format!("unknown payload type {}", other),
                })
            }
        })
    }
}

/// One parsed request
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Open { path: String },
    Close { path: String },
    ListFiles,
    BatchSize { size: u32 },
    Rotation { matrix: [f32; 16], data_type: NetDataType },
    Brick { data_type: NetDataType, lod: u32, index: u32 },
    Shutdown,
}

impl Request {
    pub fn code(&self) -> CommandCode {
        match self {
            Request::Open { .. } => CommandCode::Open,
            Request::Close { .. } => CommandCode::Close,
            Request::ListFiles => CommandCode::ListFiles,
            Request::BatchSize { .. } => CommandCode::BatchSize,
            Request::Rotation { .. } => CommandCode::Rotation,
            Request::Brick { .. } => CommandCode::Brick,
            Request::Shutdown => CommandCode::Shutdown,
        }
    }

    /// Read the fields of a request whose command byte is already consumed
    pub fn read_body(code: CommandCode, r: &mut impl Read) -> EngineResult<Self> {
        Ok(match code {
            CommandCode::Open => Request::Open {
                path: wire::read_string(r)?,
            },
            CommandCode::Close => Request::Close {
                path: wire::read_string(r)?,
            },
            CommandCode::ListFiles => Request::ListFiles,
            CommandCode::BatchSize => Request::BatchSize {
                size: wire::read_u32(r)?,
            },
            CommandCode::Rotation => {
                let floats = wire::read_f32_vec(r)?;
                let matrix: [f32; 16] = floats.try_into().map_err(|_| EngineError::Protocol {
                    message: "rotation matrix must hold 16 floats".to_string(),
                })?;
                let data_type = NetDataType::try_from(wire::read_u8(r)?)?;
                Request::Rotation { matrix, data_type }
            }
            CommandCode::Brick => Request::Brick {
                data_type: NetDataType::try_from(wire::read_u8(r)?)?,
                lod: wire::read_u32(r)?,
                index: wire::read_u32(r)?,
            },
            CommandCode::Shutdown => Request::Shutdown,
        })
    }

    /// Read a complete request including the command byte
    pub fn read_from(r: &mut impl Read) -> EngineResult<Self> {
        let code = CommandCode::try_from(wire::read_u8(r)?)?;
        Self::read_body(code, r)
    }

    pub fn write_to(&self, w: &mut impl Write) -> EngineResult<()> {
        wire::write_u8(w, self.code() as u8)?;
        match self {
            Request::Open { path } | Request::Close { path } => wire::write_string(w, path),
            Request::ListFiles | Request::Shutdown => Ok(()),
            Request::BatchSize { size } => wire::write_u32(w, *size),
            Request::Rotation { matrix, data_type } => {
                wire::write_f32_vec(w, matrix)?;
                wire::write_u8(w, *data_type as u8)
            }
            Request::Brick {
                data_type,
                lod,
                index,
            } => {
                wire::write_u8(w, *data_type as u8)?;
                wire::write_u32(w, *lod)?;
                wire::write_u32(w, *index)
            }
        }
    }
}

/// Response to OPEN: the complete brick catalog of the dataset
#[derive(Debug, Clone, PartialEq)]
pub struct OpenResponse {
    /// Brick-grid dimensions per LOD, finest first
    pub layouts: Vec<UVec3>,
    /// Key and metadata of every brick, in server iteration order
    pub bricks: Vec<(BrickKey, BrickMetadata)>,
}

impl OpenResponse {
    pub fn write_to(&self, w: &mut impl Write) -> EngineResult<()> {
        wire::write_u32(w, self.layouts.len() as u32)?;
        let layout_words: Vec<u32> = self
            .layouts
            .iter()
            .flat_map(|l| [l.x, l.y, l.z])
            .collect();
        wire::write_u32_array(w, &layout_words)?;

        let n = self.bricks.len();
        wire::write_u32(w, n as u32)?;
        let lods: Vec<u32> = self.bricks.iter().map(|(k, _)| k.lod as u32).collect();
        let idxs: Vec<u32> = self.bricks.iter().map(|(k, _)| k.index as u32).collect();
        wire::write_u32_array(w, &lods)?;
        wire::write_u32_array(w, &idxs)?;

        let mut centers = Vec::with_capacity(3 * n);
        let mut extents = Vec::with_capacity(3 * n);
        let mut voxels = Vec::with_capacity(3 * n);
        for (_, md) in &self.bricks {
            centers.extend_from_slice(&md.center.to_array());
            extents.extend_from_slice(&md.extents.to_array());
            voxels.extend_from_slice(&md.n_voxels.to_array());
        }
        wire::write_f32_array(w, &centers)?;
        wire::write_f32_array(w, &extents)?;
        wire::write_u32_array(w, &voxels)
    }

    pub fn read_from(r: &mut impl Read) -> EngineResult<Self> {
        let lod_count = wire::read_u32(r)? as usize;
        let layout_words = wire::read_u32_array(r, lod_count * 3)?;
        let layouts = layout_words
            .chunks_exact(3)
            .map(|c| UVec3::new(c[0], c[1], c[2]))
            .collect();

        let n = wire::read_u32(r)? as usize;
        let lods = wire::read_u32_array(r, n)?;
        let idxs = wire::read_u32_array(r, n)?;
        let centers = wire::read_f32_array(r, 3 * n)?;
        let extents = wire::read_f32_array(r, 3 * n)?;
        let voxels = wire::read_u32_array(r, 3 * n)?;

        let mut bricks = Vec::with_capacity(n);
        for i in 0..n {
            let key = BrickKey::new(0, lods[i] as usize, idxs[i] as usize);
            // The catalog does not carry texture clamp boxes; the client
            // defaults to the full texture.
            let md = BrickMetadata {
                center: glam::Vec3::new(centers[3 * i], centers[3 * i + 1], centers[3 * i + 2]),
                extents: glam::Vec3::new(extents[3 * i], extents[3 * i + 1], extents[3 * i + 2]),
                n_voxels: UVec3::new(voxels[3 * i], voxels[3 * i + 1], voxels[3 * i + 2]),
                tex_min: glam::Vec3::ZERO,
                tex_max: glam::Vec3::ONE,
            };
            bricks.push((key, md));
        }
        Ok(Self { layouts, bricks })
    }
}

/// One frame of a typed brick stream
#[derive(Debug, Clone, PartialEq)]
pub struct BrickFrame {
    pub lod: u32,
    pub index: u32,
    pub n_voxels: UVec3,
    pub data: BrickData,
}

/// Write a typed brick stream: `count:u32` then the frames
pub fn write_brick_stream(
    w: &mut impl Write,
    data_type: NetDataType,
    frames: &[BrickFrame],
) -> EngineResult<()> {
    wire::write_u32(w, frames.len() as u32)?;
    for frame in frames {
        write_brick_frame(w, data_type, frame)?;
    }
    Ok(())
}

fn write_brick_frame(
    w: &mut impl Write,
    data_type: NetDataType,
    frame: &BrickFrame,
) -> EngineResult<()> {
    if frame.data.scalar_type() != data_type.to_scalar() {
        return Err(EngineError::WrongType {
            requested: data_type.to_scalar(),
            actual: frame.data.scalar_type(),
        });
    }
    wire::write_u32(w, frame.lod)?;
    wire::write_u32(w, frame.index)?;
    wire::write_u32_array(w, &frame.n_voxels.to_array())?;
    let bytes = frame.data.len() * data_type.size_bytes();
    wire::write_u32(w, bytes as u32)?;
    match &frame.data {
        BrickData::U8(v) => wire::write_bytes(w, v),
        BrickData::U16(v) => wire::write_u16_array(w, v),
        BrickData::U32(v) => wire::write_u32_array(w, v),
        _ => unreachable!("tag checked above"),
    }
}

/// Read a typed brick stream written by [`write_brick_stream`]
pub fn read_brick_stream(
    r: &mut impl Read,
    data_type: NetDataType,
) -> EngineResult<Vec<BrickFrame>> {
    let count = wire::read_u32(r)? as usize;
    let mut frames = Vec::with_capacity(count);
    for _ in 0..count {
        let lod = wire::read_u32(r)?;
        let index = wire::read_u32(r)?;
        let v = wire::read_u32_array(r, 3)?;
        let n_voxels = UVec3::new(v[0], v[1], v[2]);
        let bytes = wire::read_u32(r)? as usize;
        let expected =
            n_voxels.x as usize * n_voxels.y as usize * n_voxels.z as usize * data_type.size_bytes();
        if bytes != expected {
            return Err(EngineError::Protocol {
                message: format!(
                    "brick frame advertises {} bytes, voxel count implies {}",
                    bytes, expected
                ),
            });
        }
        let count = bytes / data_type.size_bytes();
        let data = match data_type {
            NetDataType::U8 => BrickData::U8(wire::read_bytes(r, count)?.into()),
            NetDataType::U16 => BrickData::U16(wire::read_u16_array(r, count)?.into()),
            NetDataType::U32 => BrickData::U32(wire::read_u32_array(r, count)?.into()),
        };
        frames.push(BrickFrame {
            lod,
            index,
            n_voxels,
            data,
        });
    }
    Ok(frames)
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;
    use std::io::Cursor;
    use std::sync::Arc;

    fn roundtrip(request: Request) {
        let mut buf = Vec::new();
        request.write_to(&mut buf).unwrap();
        let back = Request::read_from(&mut Cursor::new(buf)).unwrap();
        assert_eq!(back, request);
    }

    #[test]
    fn test_request_roundtrip_every_variant() {
        roundtrip(Request::Open {
            path: "engine.uvf".to_string(),
        });
        roundtrip(Request::Close {
            path: String::new(),
        });
        roundtrip(Request::ListFiles);
        roundtrip(Request::BatchSize { size: 64 });
        roundtrip(Request::Rotation {
            matrix: std::array::from_fn(|i| i as f32 * 0.25),
            data_type: NetDataType::U16,
        });
        roundtrip(Request::Brick {
            data_type: NetDataType::U32,
            lod: 3,
            index: 1205,
        });
        roundtrip(Request::Shutdown);
    }

    #[test]
    fn test_request_path_boundary_lengths() {
        for len in [0usize, 1, 255, 256, 65535] {
            roundtrip(Request::Open {
                path: "p".repeat(len),
            });
        }
    }

    #[test]
    fn test_unknown_command_is_protocol_error() {
        let err = Request::read_from(&mut Cursor::new([0xffu8])).unwrap_err();
        assert!(matches!(err, EngineError::Protocol { .. }));
    }

    #[test]
    fn test_rotation_wrong_matrix_len_rejected() {
        let mut buf = Vec::new();
        wire::write_u8(&mut buf, CommandCode::Rotation as u8).unwrap();
        wire::write_f32_vec(&mut buf, &[1.0; 9]).unwrap();
        wire::write_u8(&mut buf, 0).unwrap();
        let err = Request::read_from(&mut Cursor::new(buf)).unwrap_err();
        assert!(matches!(err, EngineError::Protocol { .. }));
    }

    #[test]
    fn test_open_response_roundtrip() {
        let md = |i: f32| BrickMetadata {
            center: Vec3::splat(i),
            extents: Vec3::splat(0.5),
            n_voxels: UVec3::splat(8),
            tex_min: Vec3::ZERO,
            tex_max: Vec3::ONE,
        };
        let response = OpenResponse {
            layouts: vec![UVec3::new(2, 2, 2), UVec3::ONE],
            bricks: (0..9)
                .map(|i| {
                    let key = if i < 8 {
                        BrickKey::new(0, 0, i)
                    } else {
                        BrickKey::new(0, 1, 0)
                    };
                    (key, md(i as f32))
                })
                .collect(),
        };
        let mut buf = Vec::new();
        response.write_to(&mut buf).unwrap();
        let back = OpenResponse::read_from(&mut Cursor::new(buf)).unwrap();
        assert_eq!(back, response);
    }

    #[test]
    fn test_brick_stream_u16_payload_size() {
        // Two 4x4x4 bricks of u16: each frame carries 128 payload bytes.
        let frames: Vec<BrickFrame> = (0..2)
            .map(|i| BrickFrame {
                lod: 0,
                index: i,
                n_voxels: UVec3::splat(4),
                data: BrickData::U16(Arc::new(vec![i as u16; 64])),
            })
            .collect();
        let mut buf = Vec::new();
        write_brick_stream(&mut buf, NetDataType::U16, &frames).unwrap();

        // count + 2 * (lod + idx + n_voxels[3] + bytes + 128 payload)
        assert_eq!(buf.len(), 4 + 2 * (4 + 4 + 12 + 4 + 128));

        let back = read_brick_stream(&mut Cursor::new(buf), NetDataType::U16).unwrap();
        assert_eq!(back.len(), 2);
        assert_eq!(back, frames);
        assert_eq!(back[0].data.byte_len(), 128);
    }

    #[test]
    fn test_brick_stream_type_mismatch_refused() {
        let frame = BrickFrame {
            lod: 0,
            index: 0,
            n_voxels: UVec3::splat(2),
            data: BrickData::U8(Arc::new(vec![0; 8])),
        };
        let mut buf = Vec::new();
        let err = write_brick_stream(&mut buf, NetDataType::U16, &[frame]).unwrap_err();
        assert!(matches!(err, EngineError::WrongType { .. }));
    }
}
