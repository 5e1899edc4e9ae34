//! MsgPack payload codec using `rmp-serde`.
//!
//! Structs are always written with `to_vec_named` (struct-as-map) so a peer
//! can add fields to a payload without breaking older decoders.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;

/// MessagePack codec for frame payloads.
pub struct MsgPackCodec;

impl MsgPackCodec {
    /// Encode a value to MsgPack bytes.
    ///
    /// # Errors
    ///
    /// Returns error if the value cannot be serialized.
    #[inline]
    pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(value)?)
    }

    /// Decode MsgPack bytes to a value.
    ///
    /// # Errors
    ///
    /// Returns error if the bytes cannot be deserialized to type T.
    #[inline]
    pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AbciError;
    use crate::types::{RequestDeliverTx, RequestInfo, ResponseInitChain};
    use bytes::Bytes;

    #[test]
    fn test_structs_use_map_format() {
        let info = RequestInfo {
            version: "0.34".to_string(),
            block_version: 11,
            p2p_version: 8,
        };

        let encoded = MsgPackCodec::encode(&info).unwrap();

        // 0x83 = fixmap with 3 entries; positional encoding would be 0x93
        assert_eq!(encoded[0], 0x83);
        let decoded: RequestInfo = MsgPackCodec::decode(&encoded).unwrap();
        assert_eq!(decoded, info);
    }

    #[test]
    fn test_bytes_fields_use_bin_format() {
        let request = RequestDeliverTx::new(Bytes::from_static(&[1, 2, 3]));
        let encoded = MsgPackCodec::encode(&request).unwrap();

        // fixmap(1), fixstr "tx", bin8 len 3
        assert_eq!(encoded[0], 0x81);
        assert_eq!(&encoded[4..], &[0xc4, 0x03, 1, 2, 3]);
    }

    #[test]
    fn test_option_none_roundtrip() {
        let response = ResponseInitChain::default();
        let encoded = MsgPackCodec::encode(&response).unwrap();
        let decoded: ResponseInitChain = MsgPackCodec::decode(&encoded).unwrap();
        assert!(decoded.consensus_params.is_none());
    }

    #[test]
    fn test_decode_error_on_invalid_data() {
        let result: Result<RequestInfo> = MsgPackCodec::decode(b"not valid msgpack");
        assert!(matches!(result, Err(AbciError::Codec(_))));
    }
}
