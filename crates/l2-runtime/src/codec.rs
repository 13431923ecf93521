//! Batch calldata framing
//!
//! `base64(gzip(rlp([record, record, ...])))`, one record per transaction.

use crate::error::CodecError;
use crate::transaction::SignedTransaction;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use rlp::{Rlp, RlpStream};
use std::io::{Read, Write};

/// Encode transactions into batch calldata
pub fn encode_batch(txs: &[SignedTransaction]) -> Result<String, CodecError> {
    let mut stream = RlpStream::new_list(txs.len());
    for tx in txs {
        tx.append_record(&mut stream);
    }
    let encoded = stream.out();

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(&encoded)
        .map_err(|e| CodecError::Serialization(e.to_string()))?;
    let compressed = encoder
        .finish()
        .map_err(|e| CodecError::Serialization(e.to_string()))?;

    Ok(BASE64.encode(compressed))
}

/// Decode batch calldata, recomputing every transaction hash
pub fn decode_batch(calldata: &str) -> Result<Vec<SignedTransaction>, CodecError> {
    let compressed = BASE64
        .decode(calldata.trim())
        .map_err(|e| CodecError::Decode(format!("base64: {}", e)))?;

    let mut encoded = Vec::new();
    GzDecoder::new(compressed.as_slice())
        .read_to_end(&mut encoded)
        .map_err(|e| CodecError::Decode(format!("gzip: {}", e)))?;

    let outer = Rlp::new(&encoded);
    if !outer.is_list() {
        return Err(CodecError::Decode("batch payload is not a list".to_string()));
    }

    outer
        .iter()
        .map(|record| SignedTransaction::decode_record(&record))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::{sign, verify, UnsignedTransaction};
    use k256::ecdsa::SigningKey;
    use l1_integration::{Address, U256};

    fn signed_batch() -> Vec<SignedTransaction> {
        let key = SigningKey::from_slice(&[5u8; 32]).unwrap();
        (0..3u64)
            .map(|n| {
                let mut tx = UnsignedTransaction::transfer(
                    Address::repeat_byte(n as u8 + 1),
                    U256::from(10 * (n + 1)),
                    U256::from(n),
                    1,
                );
                tx.data = vec![n as u8; n as usize];
                sign(&tx, &key).unwrap().0
            })
            .collect()
    }

    #[test]
    fn test_batch_roundtrip_preserves_transactions() {
        let txs = signed_batch();
        let calldata = encode_batch(&txs).unwrap();
        let decoded = decode_batch(&calldata).unwrap();

        assert_eq!(decoded, txs);
        for tx in &decoded {
            assert!(verify(tx, &tx.signature));
        }
    }

    #[test]
    fn test_empty_batch_encodes() {
        let calldata = encode_batch(&[]).unwrap();
        assert!(decode_batch(&calldata).unwrap().is_empty());
    }

    #[test]
    fn test_non_gzip_payload_is_rejected() {
        let calldata = BASE64.encode(b"definitely not gzip");
        assert!(matches!(decode_batch(&calldata), Err(CodecError::Decode(_))));
        assert!(matches!(decode_batch("%%%"), Err(CodecError::Decode(_))));
    }

    #[test]
    fn test_tampered_hash_is_recomputed() {
        let mut txs = signed_batch();
        txs[0].transaction.hash = Default::default();
        let decoded = decode_batch(&encode_batch(&txs).unwrap()).unwrap();
        assert_eq!(decoded[0].hash(), decoded[0].body().signing_hash());
    }
}
