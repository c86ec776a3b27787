//! Binary chunks
//!
//! A chunk is one unit of emitted binary: a literal byte string, an integer
//! of fixed width and endianness, a pointer resolved against a labeled
//! stream at link time, or a composite of sub-chunks. `size()` is stable
//! between construction and emission; a composite recomputes its sum on each
//! query.

use crate::codegen::stream::{StreamArena, StreamId};
use crate::error::{Error, Result};
use std::fmt;
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Little,
    Big,
}

/// Serialize the `width` least-significant bytes of `value`.
pub fn encode_int(value: u64, width: u8, endian: Endian) -> Vec<u8> {
    let mut out = Vec::with_capacity(width as usize);
    for i in 0..width {
        out.push((value >> (8 * i)) as u8);
    }
    if endian == Endian::Big {
        out.reverse();
    }
    out
}

fn check_width(width: u8) -> Result<()> {
    if (1..=4).contains(&width) {
        Ok(())
    } else {
        Err(Error::Argument(format!("Invalid chunk width {width}")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntChunk {
    pub value: u64,
    pub width: u8,
    pub endian: Endian,
}

/// Address transform applied to a resolved pointer before serialization.
/// Receives the target address and the pointer's own address (its stream
/// base plus its recorded offset), so self-relative encodings are possible.
pub type AddrMap = Rc<dyn Fn(u64, u64) -> Result<u64>>;

#[derive(Clone)]
pub struct PointerChunk {
    pub target: StreamId,
    pub label: String,
    pub width: u8,
    pub endian: Endian,
    pub map: Option<AddrMap>,
    /// Offset within the owning stream, recorded when the chunk is pushed.
    pub offset: u64,
}

impl fmt::Debug for PointerChunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PointerChunk")
            .field("target", &self.target)
            .field("label", &self.label)
            .field("width", &self.width)
            .field("endian", &self.endian)
            .field("mapped", &self.map.is_some())
            .field("offset", &self.offset)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub enum Chunk {
    Bytes(Vec<u8>),
    Int(IntChunk),
    Pointer(PointerChunk),
    Composite(Vec<Chunk>),
}

impl Chunk {
    pub fn bytes(data: impl Into<Vec<u8>>) -> Chunk {
        Chunk::Bytes(data.into())
    }

    /// A single byte, stored as a 1-byte little-endian integer chunk.
    pub fn byte(value: u8) -> Chunk {
        Chunk::Int(IntChunk {
            value: value as u64,
            width: 1,
            endian: Endian::Little,
        })
    }

    pub fn int(value: u64, width: u8, endian: Endian) -> Result<Chunk> {
        check_width(width)?;
        Ok(Chunk::Int(IntChunk {
            value,
            width,
            endian,
        }))
    }

    pub fn pointer(target: StreamId, label: &str, width: u8, endian: Endian) -> Result<Chunk> {
        check_width(width)?;
        Ok(Chunk::Pointer(PointerChunk {
            target,
            label: label.to_string(),
            width,
            endian,
            map: None,
            offset: 0,
        }))
    }

    /// A pointer with an address transform (forced byte order already comes
    /// from `endian`; transforms cover pattern-table indices and
    /// self-relative encodings).
    pub fn mapped_pointer(
        target: StreamId,
        label: &str,
        width: u8,
        endian: Endian,
        map: AddrMap,
    ) -> Result<Chunk> {
        check_width(width)?;
        Ok(Chunk::Pointer(PointerChunk {
            target,
            label: label.to_string(),
            width,
            endian,
            map: Some(map),
            offset: 0,
        }))
    }

    pub fn composite(parts: Vec<Chunk>) -> Chunk {
        Chunk::Composite(parts)
    }

    pub fn size(&self) -> u64 {
        match self {
            Chunk::Bytes(data) => data.len() as u64,
            Chunk::Int(c) => c.width as u64,
            Chunk::Pointer(c) => c.width as u64,
            Chunk::Composite(parts) => parts.iter().map(Chunk::size).sum(),
        }
    }

    /// Emit the chunk's bytes. `origin` is the chunk's own resolved address
    /// within the output image.
    pub fn compile(&self, streams: &StreamArena, origin: u64) -> Result<Vec<u8>> {
        match self {
            Chunk::Bytes(data) => Ok(data.clone()),
            Chunk::Int(c) => Ok(encode_int(c.value, c.width, c.endian)),
            Chunk::Pointer(c) => {
                let target = streams
                    .try_get(c.target)
                    .ok_or_else(|| Error::Command("Unknown pointer target".into()))?;
                let base = target.base().ok_or_else(|| {
                    Error::Runtime("Pointer target has no base address".into())
                })?;
                let offset = target.get_label(&c.label).ok_or_else(|| {
                    Error::Command(format!("Unknown label '{}'", c.label))
                })?;
                let mut addr = base + offset;
                if let Some(map) = &c.map {
                    addr = map(addr, origin)?;
                }
                Ok(encode_int(addr, c.width, c.endian))
            }
            Chunk::Composite(parts) => {
                let mut out = Vec::with_capacity(self.size() as usize);
                let mut at = origin;
                for part in parts {
                    out.extend(part.compile(streams, at)?);
                    at += part.size();
                }
                Ok(out)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_int_orders() {
        assert_eq!(encode_int(0x8010, 2, Endian::Little), vec![0x10, 0x80]);
        assert_eq!(encode_int(0x8010, 2, Endian::Big), vec![0x80, 0x10]);
        assert_eq!(encode_int(0x123456, 3, Endian::Little), vec![0x56, 0x34, 0x12]);
        assert_eq!(encode_int(0x1FF, 1, Endian::Little), vec![0xFF]);
    }

    #[test]
    fn test_width_is_checked() {
        assert!(Chunk::int(0, 0, Endian::Little).is_err());
        assert!(Chunk::int(0, 5, Endian::Little).is_err());
        assert!(Chunk::int(0, 4, Endian::Little).is_ok());
    }

    #[test]
    fn test_composite_size_is_sum() {
        let c = Chunk::composite(vec![
            Chunk::bytes(vec![1, 2, 3]),
            Chunk::byte(4),
            Chunk::int(0, 2, Endian::Big).unwrap(),
        ]);
        assert_eq!(c.size(), 6);
    }

    #[test]
    fn test_composite_emission_concatenates() {
        let streams = StreamArena::new();
        let c = Chunk::composite(vec![Chunk::bytes(vec![1, 2]), Chunk::byte(3)]);
        assert_eq!(c.compile(&streams, 0).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_mapped_pointer_transforms_address() {
        use crate::codegen::stream::START_LABEL;
        let mut streams = StreamArena::new();
        let target = streams.alloc();
        streams.get_mut(target).set_base(0x8040);

        // index into a table of 16-byte entries based at $8000
        let map: AddrMap = Rc::new(|addr, _origin| Ok((addr - 0x8000) / 16));
        let c = Chunk::mapped_pointer(target, START_LABEL, 1, Endian::Little, map).unwrap();
        assert_eq!(c.compile(&streams, 0).unwrap(), vec![4]);
    }

    #[test]
    fn test_mapped_pointer_sees_its_own_origin() {
        use crate::codegen::stream::START_LABEL;
        let mut streams = StreamArena::new();
        let target = streams.alloc();
        streams.get_mut(target).set_base(0x8030);

        // self-relative branch offset
        let map: AddrMap = Rc::new(|addr, origin| Ok(addr.wrapping_sub(origin) & 0xFF));
        let c = Chunk::mapped_pointer(target, START_LABEL, 1, Endian::Little, map).unwrap();
        assert_eq!(c.compile(&streams, 0x8020).unwrap(), vec![0x10]);
    }
}
