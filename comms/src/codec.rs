//! Implements the framing used between nodes: an 8 byte big endian length followed by the body.
//!
//! A parameter set body is laid out as
//! `count:u32 (ndim:u32 dim:u64{ndim} data:f32{product(dims)}){count}`.

use ndarray::{ArrayD, IxDyn};

use crate::{FrameErr, LEN_TYPE_SIZE, LenType, ParameterSet, Result, Tensor};

type CountType = u32;
type DimType = u64;

const COUNT_SIZE: usize = size_of::<CountType>();
const DIM_SIZE: usize = size_of::<DimType>();
const ELEM_SIZE: usize = size_of::<f32>();

/// Writes a message body into a growing buffer.
pub trait Serialize {
    fn serialize(&self, buf: &mut Vec<u8>);
}

/// Reads a message body back from a `Reader`.
pub trait Deserialize: Sized {
    /// Reads exactly one value, leaving the reader right after it.
    fn read(reader: &mut Reader<'_>) -> Result<Self>;

    /// Decodes a whole body, failing if any byte is left unread.
    fn deserialize(body: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(body);
        let value = Self::read(&mut reader)?;
        reader.finish()?;
        Ok(value)
    }
}

/// A bounds checked cursor over a frame body.
#[derive(Debug)]
pub struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    /// The amount of bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    /// Consumes the next `n` bytes.
    ///
    /// # Errors
    /// `FrameErr::Truncated` if less than `n` bytes remain.
    pub fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.buf.len() < n {
            return Err(FrameErr::Truncated {
                needed: n,
                available: self.buf.len(),
            });
        }

        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn u32(&mut self) -> Result<u32> {
        let bytes = self.take(size_of::<u32>())?;
        // SAFETY: `take` returned exactly 4 bytes.
        Ok(u32::from_be_bytes(bytes.try_into().unwrap()))
    }

    pub fn u64(&mut self) -> Result<u64> {
        let bytes = self.take(size_of::<u64>())?;
        // SAFETY: `take` returned exactly 8 bytes.
        Ok(u64::from_be_bytes(bytes.try_into().unwrap()))
    }

    /// Succeeds only if every byte was consumed.
    pub fn finish(self) -> Result<()> {
        match self.buf.len() {
            0 => Ok(()),
            extra => Err(FrameErr::TrailingBytes { extra }),
        }
    }
}

impl Serialize for Tensor {
    fn serialize(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&(self.ndim() as CountType).to_be_bytes());
        for &dim in self.shape() {
            buf.extend_from_slice(&(dim as DimType).to_be_bytes());
        }

        let data = self.as_standard_layout();
        // SAFETY: `as_standard_layout` always yields a contiguous array.
        let slice = data.as_slice().unwrap();
        buf.extend_from_slice(bytemuck::cast_slice(slice));
    }
}

impl Deserialize for Tensor {
    fn read(reader: &mut Reader<'_>) -> Result<Self> {
        let ndim = reader.u32()? as usize;

        let needed = ndim.saturating_mul(DIM_SIZE);
        if needed > reader.remaining() {
            return Err(FrameErr::Truncated {
                needed,
                available: reader.remaining(),
            });
        }

        let raw_shape = (0..ndim)
            .map(|_| reader.u64())
            .collect::<Result<Vec<_>>>()?;

        let overflow = || FrameErr::ShapeOverflow {
            shape: raw_shape.clone(),
        };

        let shape = raw_shape
            .iter()
            .map(|&dim| usize::try_from(dim).map_err(|_| overflow()))
            .collect::<Result<Vec<_>>>()?;

        let elements = shape
            .iter()
            .try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
            .ok_or_else(overflow)?;

        let available_bytes = reader.remaining();
        let bytes = elements
            .checked_mul(ELEM_SIZE)
            .filter(|&bytes| bytes <= available_bytes)
            .ok_or_else(|| FrameErr::ShapePayloadMismatch {
                shape: shape.clone(),
                elements,
                available_bytes,
            })?;

        let data = bytemuck::allocation::pod_collect_to_vec::<u8, f32>(reader.take(bytes)?);

        // SAFETY: `data` holds exactly `product(shape)` elements, checked above.
        Ok(ArrayD::from_shape_vec(IxDyn(&shape), data).unwrap())
    }
}

impl Serialize for ParameterSet {
    fn serialize(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&(self.len() as CountType).to_be_bytes());
        for tensor in self.tensors() {
            tensor.serialize(buf);
        }
    }
}

impl Deserialize for ParameterSet {
    fn read(reader: &mut Reader<'_>) -> Result<Self> {
        let count = reader.u32()? as usize;

        // Every tensor takes at least its ndim field, don't trust `count` further than that.
        let mut tensors = Vec::with_capacity(count.min(reader.remaining() / COUNT_SIZE));
        for _ in 0..count {
            tensors.push(Tensor::read(reader)?);
        }

        Ok(Self::new(tensors))
    }
}

/// Writes `msg` as a complete length prefixed frame.
///
/// # Arguments
/// * `msg` - A serializable message body.
///
/// # Returns
/// The bytes of the frame, prefix included.
pub fn encode_frame<T: Serialize>(msg: &T) -> Vec<u8> {
    let mut buf = vec![0; LEN_TYPE_SIZE];
    msg.serialize(&mut buf);

    let len = (buf.len() - LEN_TYPE_SIZE) as LenType;
    buf[..LEN_TYPE_SIZE].copy_from_slice(&len.to_be_bytes());
    buf
}

/// Decodes one complete frame held entirely in `frame`.
///
/// # Errors
/// A `FrameErr` if the prefix is missing, disagrees with the buffer length or
/// the body itself is malformed.
pub fn decode_frame<T: Deserialize>(frame: &[u8]) -> Result<T> {
    if frame.len() < LEN_TYPE_SIZE {
        return Err(FrameErr::Truncated {
            needed: LEN_TYPE_SIZE,
            available: frame.len(),
        });
    }

    let (prefix, body) = frame.split_at(LEN_TYPE_SIZE);
    // SAFETY: We splitted the buffer to be of size `LEN_TYPE_SIZE` just above.
    let declared = LenType::from_be_bytes(prefix.try_into().unwrap());

    if declared != body.len() as LenType {
        return Err(FrameErr::LengthMismatch {
            declared: usize::try_from(declared).unwrap_or(usize::MAX),
            available: body.len(),
        });
    }

    T::deserialize(body)
}

/// Encodes a parameter set as a self delimiting frame.
pub fn encode(params: &ParameterSet) -> Vec<u8> {
    encode_frame(params)
}

/// Decodes a frame produced by `encode`.
pub fn decode(frame: &[u8]) -> Result<ParameterSet> {
    decode_frame(frame)
}

#[cfg(test)]
mod tests {
    use ndarray::{Array, ArrayD, IxDyn};
    use rand::Rng;

    use super::*;

    fn random_params(rng: &mut impl Rng) -> ParameterSet {
        let count = rng.random_range(0..5);
        (0..count)
            .map(|_| {
                let ndim = rng.random_range(0..4);
                let shape: Vec<usize> = (0..ndim).map(|_| rng.random_range(0..4)).collect();
                let len: usize = shape.iter().product();
                let data = (0..len).map(|_| rng.random_range(-10.0..10.0)).collect();
                ArrayD::from_shape_vec(IxDyn(&shape), data).unwrap()
            })
            .collect()
    }

    fn sample() -> ParameterSet {
        ParameterSet::new(vec![
            Array::from_shape_vec((2, 2), vec![1.0, -2.0, 3.5, 0.25])
                .unwrap()
                .into_dyn(),
            Array::from_vec(vec![0.5, 1.5]).into_dyn(),
        ])
    }

    #[test]
    fn test_roundtrip_random_sets() {
        let mut rng = rand::rng();

        for _ in 0..64 {
            let params = random_params(&mut rng);
            assert_eq!(decode(&encode(&params)).unwrap(), params);
        }
    }

    #[test]
    fn test_roundtrip_non_standard_layout() {
        let transposed = Array::from_shape_vec((2, 3), (0..6).map(|x| x as f32).collect())
            .unwrap()
            .reversed_axes()
            .into_dyn();
        let params = ParameterSet::new(vec![transposed]);

        assert_eq!(decode(&encode(&params)).unwrap(), params);
    }

    #[test]
    fn test_frame_layout() {
        let params = ParameterSet::new(vec![Array::from_vec(vec![1.0f32]).into_dyn()]);
        let frame = encode(&params);

        // prefix + count + ndim + one dim + one f32
        assert_eq!(frame.len(), 8 + 4 + 4 + 8 + 4);
        assert_eq!(&frame[..8], &20u64.to_be_bytes());
        assert_eq!(&frame[8..12], &1u32.to_be_bytes());
    }

    #[test]
    fn test_every_truncation_fails() {
        let frame = encode(&sample());

        for cut in 0..frame.len() {
            let err = decode(&frame[..cut]).unwrap_err();
            assert!(err.is_malformed(), "cut at {cut} gave {err}");
        }
    }

    #[test]
    fn test_prefix_longer_than_buffer() {
        let mut frame = encode(&sample());
        frame.truncate(frame.len() - 3);

        assert!(matches!(
            decode(&frame),
            Err(FrameErr::LengthMismatch { .. })
        ));
    }

    #[test]
    fn test_trailing_bytes_after_prefix() {
        let mut frame = encode(&sample());
        frame.push(0);

        assert!(matches!(
            decode(&frame),
            Err(FrameErr::LengthMismatch { .. })
        ));
    }

    #[test]
    fn test_shape_disagrees_with_payload() {
        let params = ParameterSet::new(vec![Array::from_vec(vec![1.0f32, 2.0]).into_dyn()]);
        let mut body = Vec::new();
        params.serialize(&mut body);

        // Bump the single dimension from 2 to 3 elements.
        body[8..16].copy_from_slice(&3u64.to_be_bytes());

        let mut frame = (body.len() as u64).to_be_bytes().to_vec();
        frame.extend_from_slice(&body);

        assert!(matches!(
            decode(&frame),
            Err(FrameErr::ShapePayloadMismatch { elements: 3, .. })
        ));
    }

    #[test]
    fn test_shape_smaller_than_payload() {
        let params = ParameterSet::new(vec![Array::from_vec(vec![1.0f32, 2.0]).into_dyn()]);
        let mut body = Vec::new();
        params.serialize(&mut body);
        body[8..16].copy_from_slice(&1u64.to_be_bytes());

        assert!(matches!(
            ParameterSet::deserialize(&body),
            Err(FrameErr::TrailingBytes { extra: 4 })
        ));
    }

    #[test]
    fn test_huge_shape_overflows() {
        let mut body = Vec::new();
        body.extend_from_slice(&1u32.to_be_bytes());
        body.extend_from_slice(&2u32.to_be_bytes());
        body.extend_from_slice(&u64::MAX.to_be_bytes());
        body.extend_from_slice(&u64::MAX.to_be_bytes());

        let err = ParameterSet::deserialize(&body).unwrap_err();
        assert!(matches!(
            err,
            FrameErr::ShapeOverflow { .. } | FrameErr::ShapePayloadMismatch { .. }
        ));
    }

    #[test]
    fn test_empty_set_roundtrip() {
        let params = ParameterSet::default();
        let frame = encode(&params);

        assert_eq!(frame.len(), 8 + 4);
        assert_eq!(decode(&frame).unwrap(), params);
    }
}
