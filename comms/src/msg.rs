//! Messages exchanged between a subordinate node and its parent.

use crate::{Deserialize, FrameErr, ParameterSet, Reader, Result, Serialize};

const NO_WEIGHT: u8 = 0;
const WEIGHT: u8 = 1;

/// The one message a subordinate sends per round: its aggregated parameters and,
/// optionally, the amount of samples they stand for.
#[derive(Debug, Clone, PartialEq)]
pub struct Submit {
    pub weight: Option<u64>,
    pub params: ParameterSet,
}

impl Serialize for Submit {
    fn serialize(&self, buf: &mut Vec<u8>) {
        match self.weight {
            Some(weight) => {
                buf.push(WEIGHT);
                buf.extend_from_slice(&weight.to_be_bytes());
            }
            None => buf.push(NO_WEIGHT),
        }

        self.params.serialize(buf);
    }
}

impl Deserialize for Submit {
    fn read(reader: &mut Reader<'_>) -> Result<Self> {
        let weight = match reader.u8()? {
            NO_WEIGHT => None,
            WEIGHT => Some(reader.u64()?),
            byte => {
                return Err(FrameErr::InvalidTag {
                    what: "weight flag",
                    byte,
                });
            }
        };

        let params = ParameterSet::read(reader)?;
        Ok(Self { weight, params })
    }
}

/// The single byte a parent answers with after reading a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ack {
    Accepted,
    Rejected,
}

impl Ack {
    pub fn to_byte(self) -> u8 {
        match self {
            Ack::Accepted => 0x00,
            Ack::Rejected => 0x01,
        }
    }

    pub fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            0x00 => Ok(Ack::Accepted),
            0x01 => Ok(Ack::Rejected),
            byte => Err(FrameErr::InvalidTag { what: "ack", byte }),
        }
    }
}

#[cfg(test)]
mod tests {
    use ndarray::Array;

    use super::*;
    use crate::{decode_frame, encode_frame};

    fn params() -> ParameterSet {
        ParameterSet::new(vec![Array::from_vec(vec![1.0f32, 2.0, 3.0]).into_dyn()])
    }

    #[test]
    fn test_submit_with_and_without_weight() {
        for weight in [None, Some(0), Some(1200)] {
            let msg = Submit {
                weight,
                params: params(),
            };

            let decoded: Submit = decode_frame(&encode_frame(&msg)).unwrap();
            assert_eq!(decoded, msg);
        }
    }

    #[test]
    fn test_submit_invalid_weight_flag() {
        let msg = Submit {
            weight: None,
            params: params(),
        };

        let mut frame = encode_frame(&msg);
        frame[8] = 7;

        assert!(matches!(
            decode_frame::<Submit>(&frame),
            Err(FrameErr::InvalidTag { byte: 7, .. })
        ));
    }

    #[test]
    fn test_ack_bytes() {
        for ack in [Ack::Accepted, Ack::Rejected] {
            assert_eq!(Ack::from_byte(ack.to_byte()).unwrap(), ack);
        }

        assert!(Ack::from_byte(0xff).is_err());
    }
}
