use std::fmt::Debug;

use prost::Message;
use snafu::location;

use crate::error::{Error, Result};
use crate::pb::Envelope;

/// Current wire format version.
pub const WIRE_VERSION: u8 = 1;

/// Turns envelopes into datagrams and back.
///
/// Codecs authenticating their frames fail with [`Error::Security`] on a rejected frame,
/// every other failure is a marshalling error.
pub trait WireCodec: Debug + Send + Sync {
    fn to_wire_form(&self, envelope: &Envelope) -> Result<Vec<u8>>;

    fn from_wire_form(&self, bytes: &[u8]) -> Result<Envelope>;
}

/// Wire format: `[version: u8][payload: protobuf encoded Envelope]`.
#[derive(Copy, Clone, Debug, Default)]
pub struct ProstCodec;

impl WireCodec for ProstCodec {
    fn to_wire_form(&self, envelope: &Envelope) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(1 + envelope.encoded_len());
        buf.push(WIRE_VERSION);
        envelope.encode(&mut buf)?;
        Ok(buf)
    }

    fn from_wire_form(&self, bytes: &[u8]) -> Result<Envelope> {
        let Some((&version, payload)) = bytes.split_first() else {
            return Err(Error::InvalidData {
                message: "empty datagram".to_string(),
                location: location!(),
            });
        };

        if version != WIRE_VERSION {
            return Err(Error::InvalidData {
                message: format!("unknown wire version {version}"),
                location: location!(),
            });
        }

        Ok(Envelope::decode(payload)?)
    }
}

#[cfg(test)]
mod tests {
    use crate::error::Error;
    use crate::pb::{self, envelope::Action, Envelope};

    use super::{ProstCodec, WireCodec, WIRE_VERSION};

    fn create_envelope() -> Envelope {
        Envelope {
            cluster_id: "default".to_string(),
            sender: Some(pb::Identity {
                magic: 1,
                id: 2,
                epoch: 3,
            }),
            sender_addr: "127.0.0.1:7000".to_string(),
            sequence: 9,
            action: Some(Action::Syn(pb::Syn {
                cluster_id: "default".to_string(),
                digests: vec![pb::Digest {
                    address: "127.0.0.1:7000".to_string(),
                    generation: 1,
                    max_version: 4,
                }],
            })),
        }
    }

    #[test]
    fn test_codec_round_trip() {
        let envelope = create_envelope();
        let bytes = ProstCodec.to_wire_form(&envelope).unwrap();

        assert_eq!(bytes[0], WIRE_VERSION);
        assert_eq!(ProstCodec.from_wire_form(&bytes).unwrap(), envelope);
    }

    #[test]
    fn test_codec_rejects_unknown_version_and_garbage() {
        let mut bytes = ProstCodec.to_wire_form(&create_envelope()).unwrap();
        bytes[0] = WIRE_VERSION + 1;

        assert!(matches!(
            ProstCodec.from_wire_form(&bytes),
            Err(Error::InvalidData { .. })
        ));
        assert!(matches!(
            ProstCodec.from_wire_form(&[]),
            Err(Error::InvalidData { .. })
        ));
        assert!(matches!(
            ProstCodec.from_wire_form(&[WIRE_VERSION, 0xff, 0xff, 0xff]),
            Err(Error::ProstDecode { .. })
        ));
    }
}
