use crate::error::{Error, Result};
use crate::span::VariantSpan;
use crate::wire::{WireReader, WireWriter};

/// Index into a document file's address or media pool.
pub type PoolIndex = usize;

/// Leading tag byte of an encoded op.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    Swap = 0x00,
    Put = 0x01,
    Copy = 0x02,
    Delete = 0x03,
    InsertText = 0x04,
    Move = 0x05,
    PutInvariantMedia = 0x06,
    PutInvariantSpan = 0x08,
    ApplyOverlay = 0x10,
    ToggleOverlay = 0x11,
    PutOverlay = 0x12,
    PutOverlayMedia = 0x13,
}

impl OpCode {
    pub const ALL: [OpCode; 12] = [
        OpCode::Swap,
        OpCode::Put,
        OpCode::Copy,
        OpCode::Delete,
        OpCode::InsertText,
        OpCode::Move,
        OpCode::PutInvariantMedia,
        OpCode::PutInvariantSpan,
        OpCode::ApplyOverlay,
        OpCode::ToggleOverlay,
        OpCode::PutOverlay,
        OpCode::PutOverlayMedia,
    ];

    pub fn from_u8(value: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|code| code.as_u8() == value)
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// One logged edit. Addresses and media hashes are referenced by index into the pools of the
/// document file that carries the op.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Op {
    Swap {
        first: VariantSpan,
        second: VariantSpan,
    },
    /// Put a span of the home document's invariant content, or an untagged overlay of `width`
    /// when `invariant_start` is `None` (encoded as -1).
    Put {
        to: u64,
        invariant_start: Option<u64>,
        width: u64,
    },
    Copy {
        to: u64,
        span: VariantSpan,
    },
    Delete {
        span: VariantSpan,
    },
    InsertText {
        to: u64,
        text: String,
    },
    Move {
        to: u64,
        span: VariantSpan,
    },
    PutInvariantSpan {
        to: u64,
        invariant_start: u64,
        width: u64,
        home: PoolIndex,
    },
    PutInvariantMedia {
        to: u64,
        media: PoolIndex,
        address: PoolIndex,
    },
    PutOverlay {
        span: VariantSpan,
        tags: Vec<PoolIndex>,
    },
    PutOverlayMedia {
        to: u64,
        media: PoolIndex,
        address: PoolIndex,
        tags: Vec<PoolIndex>,
    },
    ApplyOverlay {
        span: VariantSpan,
        tags: Vec<PoolIndex>,
    },
    ToggleOverlay {
        span: VariantSpan,
        tag: PoolIndex,
    },
}

fn check_to(to: u64) -> Result<u64> {
    if to < 1 {
        return Err(Error::MalformedSpan(format!("position must be >= 1, got {to}")));
    }
    Ok(to)
}

fn write_span(w: &mut WireWriter, span: &VariantSpan) -> Result<()> {
    span.validate()?;
    w.u64(span.start);
    w.u64(span.width);
    Ok(())
}

fn read_span(r: &mut WireReader<'_>) -> Result<VariantSpan> {
    let start = r.u64("span start")?;
    let width = r.u64("span width")?;
    VariantSpan::new(start, width)
}

fn write_tags(w: &mut WireWriter, tags: &[PoolIndex]) -> Result<()> {
    w.index(tags.len())?;
    for &tag in tags {
        w.index(tag)?;
    }
    Ok(())
}

fn read_tags(r: &mut WireReader<'_>) -> Result<Vec<PoolIndex>> {
    let count = r.index("tag count")?;
    let mut tags = Vec::with_capacity(count.min(1024));
    for _ in 0..count {
        tags.push(r.index("tag index")?);
    }
    Ok(tags)
}

impl Op {
    pub fn code(&self) -> OpCode {
        match self {
            Op::Swap { .. } => OpCode::Swap,
            Op::Put { .. } => OpCode::Put,
            Op::Copy { .. } => OpCode::Copy,
            Op::Delete { .. } => OpCode::Delete,
            Op::InsertText { .. } => OpCode::InsertText,
            Op::Move { .. } => OpCode::Move,
            Op::PutInvariantSpan { .. } => OpCode::PutInvariantSpan,
            Op::PutInvariantMedia { .. } => OpCode::PutInvariantMedia,
            Op::PutOverlay { .. } => OpCode::PutOverlay,
            Op::PutOverlayMedia { .. } => OpCode::PutOverlayMedia,
            Op::ApplyOverlay { .. } => OpCode::ApplyOverlay,
            Op::ToggleOverlay { .. } => OpCode::ToggleOverlay,
        }
    }

    /// Address-pool indices referenced by this op.
    pub fn address_indices(&self) -> Vec<PoolIndex> {
        match self {
            Op::PutInvariantSpan { home, .. } => vec![*home],
            Op::PutInvariantMedia { address, .. } => vec![*address],
            Op::PutOverlayMedia { address, tags, .. } => {
                let mut all = vec![*address];
                all.extend(tags);
                all
            }
            Op::PutOverlay { tags, .. } | Op::ApplyOverlay { tags, .. } => tags.clone(),
            Op::ToggleOverlay { tag, .. } => vec![*tag],
            _ => Vec::new(),
        }
    }

    /// Media-pool indices referenced by this op.
    pub fn media_indices(&self) -> Vec<PoolIndex> {
        match self {
            Op::PutInvariantMedia { media, .. } | Op::PutOverlayMedia { media, .. } => {
                vec![*media]
            }
            _ => Vec::new(),
        }
    }

    /// Encode this op on its own: tag byte followed by its payload.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut writer = WireWriter::new();
        self.write(&mut writer)?;
        Ok(writer.into_bytes())
    }

    /// Decode exactly one op from `bytes`.
    pub fn decode(bytes: &[u8]) -> Result<Op> {
        let mut reader = WireReader::new(bytes);
        let op = Op::read(&mut reader)?;
        if !reader.is_empty() {
            return Err(Error::Decode("trailing bytes after op".into()));
        }
        Ok(op)
    }

    pub(crate) fn write(&self, w: &mut WireWriter) -> Result<()> {
        w.u8(self.code().as_u8());
        match self {
            Op::Swap { first, second } => {
                write_span(w, first)?;
                write_span(w, second)?;
            }
            Op::Put {
                to,
                invariant_start,
                width,
            } => {
                w.u64(check_to(*to)?);
                let start = match invariant_start {
                    Some(start) => i64::try_from(check_to(*start)?).map_err(|_| {
                        Error::InvalidOperation(format!("invariant start {start} exceeds i64"))
                    })?,
                    None => -1,
                };
                w.i64(start);
                w.u64(*width);
            }
            Op::Copy { to, span } | Op::Move { to, span } => {
                w.u64(check_to(*to)?);
                write_span(w, span)?;
            }
            Op::Delete { span } => write_span(w, span)?,
            Op::InsertText { to, text } => {
                w.u64(check_to(*to)?);
                w.string(text)?;
            }
            Op::PutInvariantSpan {
                to,
                invariant_start,
                width,
                home,
            } => {
                w.u64(check_to(*to)?);
                w.u64(check_to(*invariant_start)?);
                w.u64(*width);
                w.index(*home)?;
            }
            Op::PutInvariantMedia { to, media, address } => {
                w.u64(check_to(*to)?);
                w.index(*media)?;
                w.index(*address)?;
            }
            Op::PutOverlay { span, tags } | Op::ApplyOverlay { span, tags } => {
                write_span(w, span)?;
                write_tags(w, tags)?;
            }
            Op::PutOverlayMedia {
                to,
                media,
                address,
                tags,
            } => {
                w.u64(check_to(*to)?);
                w.index(*media)?;
                w.index(*address)?;
                write_tags(w, tags)?;
            }
            Op::ToggleOverlay { span, tag } => {
                write_span(w, span)?;
                w.index(*tag)?;
            }
        }
        Ok(())
    }

    pub(crate) fn read(r: &mut WireReader<'_>) -> Result<Op> {
        let tag = r.u8("op code")?;
        let code = OpCode::from_u8(tag)
            .ok_or_else(|| Error::Decode(format!("unknown op code 0x{tag:02x}")))?;
        let op = match code {
            OpCode::Swap => Op::Swap {
                first: read_span(r)?,
                second: read_span(r)?,
            },
            OpCode::Put => {
                let to = check_to(r.u64("put target")?)?;
                let raw_start = r.i64("put start")?;
                let invariant_start = match raw_start {
                    -1 => None,
                    start if start < 0 => {
                        return Err(Error::Decode(format!("negative put start {start}")))
                    }
                    start => Some(check_to(start as u64)?),
                };
                let width = r.u64("put width")?;
                if width < 1 {
                    return Err(Error::MalformedSpan("put width must be >= 1".into()));
                }
                Op::Put {
                    to,
                    invariant_start,
                    width,
                }
            }
            OpCode::Copy => Op::Copy {
                to: check_to(r.u64("copy target")?)?,
                span: read_span(r)?,
            },
            OpCode::Delete => Op::Delete {
                span: read_span(r)?,
            },
            OpCode::InsertText => Op::InsertText {
                to: check_to(r.u64("insert target")?)?,
                text: r.string("insert text")?,
            },
            OpCode::Move => Op::Move {
                to: check_to(r.u64("move target")?)?,
                span: read_span(r)?,
            },
            OpCode::PutInvariantSpan => {
                let to = check_to(r.u64("put target")?)?;
                let invariant_start = check_to(r.u64("invariant start")?)?;
                let width = r.u64("invariant width")?;
                if width < 1 {
                    return Err(Error::MalformedSpan("invariant width must be >= 1".into()));
                }
                Op::PutInvariantSpan {
                    to,
                    invariant_start,
                    width,
                    home: r.index("home document index")?,
                }
            }
            OpCode::PutInvariantMedia => Op::PutInvariantMedia {
                to: check_to(r.u64("put target")?)?,
                media: r.index("media index")?,
                address: r.index("media address index")?,
            },
            OpCode::PutOverlay => Op::PutOverlay {
                span: read_span(r)?,
                tags: read_tags(r)?,
            },
            OpCode::PutOverlayMedia => Op::PutOverlayMedia {
                to: check_to(r.u64("put target")?)?,
                media: r.index("media index")?,
                address: r.index("media address index")?,
                tags: read_tags(r)?,
            },
            OpCode::ApplyOverlay => Op::ApplyOverlay {
                span: read_span(r)?,
                tags: read_tags(r)?,
            },
            OpCode::ToggleOverlay => Op::ToggleOverlay {
                span: read_span(r)?,
                tag: r.index("tag index")?,
            },
        };
        Ok(op)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span(start: u64, width: u64) -> VariantSpan {
        VariantSpan::new(start, width).unwrap()
    }

    #[test]
    fn codes_match_wire_table() {
        assert_eq!(OpCode::Swap.as_u8(), 0x00);
        assert_eq!(OpCode::Put.as_u8(), 0x01);
        assert_eq!(OpCode::Copy.as_u8(), 0x02);
        assert_eq!(OpCode::Delete.as_u8(), 0x03);
        assert_eq!(OpCode::InsertText.as_u8(), 0x04);
        assert_eq!(OpCode::Move.as_u8(), 0x05);
        assert_eq!(OpCode::from_u8(0x13), Some(OpCode::PutOverlayMedia));
        assert_eq!(OpCode::from_u8(0x07), None);
    }

    #[test]
    fn delete_layout() {
        let bytes = Op::Delete { span: span(200, 10) }.encode().unwrap();
        let mut expected = vec![0x03];
        expected.extend_from_slice(&200u64.to_be_bytes());
        expected.extend_from_slice(&10u64.to_be_bytes());
        assert_eq!(bytes, expected);
    }

    #[test]
    fn put_without_start_encodes_minus_one() {
        let op = Op::Put {
            to: 4,
            invariant_start: None,
            width: 7,
        };
        let bytes = op.encode().unwrap();
        assert_eq!(&bytes[9..17], &(-1i64).to_be_bytes());
        assert_eq!(Op::decode(&bytes).unwrap(), op);
    }

    #[test]
    fn decode_rejects_unknown_code_and_trailing_bytes() {
        assert!(matches!(Op::decode(&[0x7f]), Err(Error::Decode(_))));
        let mut bytes = Op::Delete { span: span(1, 1) }.encode().unwrap();
        bytes.push(0);
        assert!(matches!(Op::decode(&bytes), Err(Error::Decode(_))));
    }

    #[test]
    fn decode_rejects_zero_positions() {
        let mut bytes = vec![0x03];
        bytes.extend_from_slice(&0u64.to_be_bytes());
        bytes.extend_from_slice(&5u64.to_be_bytes());
        assert!(matches!(Op::decode(&bytes), Err(Error::MalformedSpan(_))));
    }

    #[test]
    fn decode_rejects_spans_past_u64() {
        let mut bytes = vec![0x03];
        bytes.extend_from_slice(&1u64.to_be_bytes());
        bytes.extend_from_slice(&u64::MAX.to_be_bytes());
        assert!(matches!(Op::decode(&bytes), Err(Error::MalformedSpan(_))));
    }

    #[test]
    fn decode_rejects_negative_tag_index() {
        let mut bytes = vec![0x11];
        bytes.extend_from_slice(&1u64.to_be_bytes());
        bytes.extend_from_slice(&1u64.to_be_bytes());
        bytes.extend_from_slice(&(-1i32).to_be_bytes());
        assert!(matches!(Op::decode(&bytes), Err(Error::Decode(_))));
    }
}
