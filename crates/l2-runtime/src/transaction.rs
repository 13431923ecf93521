//! Transaction types, signing and signature recovery
//!
//! The canonical serialization of a transaction is the EIP-155 legacy signing
//! payload `rlp([nonce, gasPrice, gasLimit, to, amount, data, chainId, 0, 0])`
//! and its keccak256 is the transaction hash. The fee is carried alongside the
//! transaction but is not part of the signed payload.

use crate::error::CodecError;
use crate::merkle::keccak256;
use k256::ecdsa::{RecoveryId, Signature as EcdsaSignature, SigningKey, VerifyingKey};
use l1_integration::{Address, H256, U256};
use rlp::{Rlp, RlpStream};
use serde::{Deserialize, Serialize};

/// Transfer fields chosen by the sender
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsignedTransaction {
    pub to: Address,
    pub amount: U256,
    pub fee: U256,
    pub nonce: U256,
    pub data: Vec<u8>,
    pub gas_price: U256,
    pub gas_limit: U256,
    pub chain_id: u64,
}

impl UnsignedTransaction {
    /// Plain value transfer with no payload and zero gas fields
    pub fn transfer(to: Address, amount: U256, nonce: U256, chain_id: u64) -> Self {
        Self {
            to,
            amount,
            fee: U256::zero(),
            nonce,
            data: Vec::new(),
            gas_price: U256::zero(),
            gas_limit: U256::zero(),
            chain_id,
        }
    }

    fn append_payload(&self, stream: &mut RlpStream) {
        stream.append(&self.nonce);
        stream.append(&self.gas_price);
        stream.append(&self.gas_limit);
        stream.append(&self.to);
        stream.append(&self.amount);
        stream.append(&self.data);
        stream.append(&self.chain_id);
    }

    /// Canonical serialization used for hashing and signing
    pub fn signing_payload(&self) -> Vec<u8> {
        let mut stream = RlpStream::new_list(9);
        self.append_payload(&mut stream);
        stream.append(&0u8);
        stream.append(&0u8);
        stream.out().to_vec()
    }

    /// keccak256 of the canonical serialization
    pub fn signing_hash(&self) -> H256 {
        keccak256(&self.signing_payload())
    }
}

/// An unsigned transaction bound to its sender and hash
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub from: Address,
    /// Always the signing hash of `body`
    pub hash: H256,
    pub body: UnsignedTransaction,
}

/// Recoverable secp256k1 signature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    /// Normalized recovery value, 27 or 28
    pub v: u64,
    pub r: U256,
    pub s: U256,
}

impl Signature {
    fn recovery_id(&self) -> Option<RecoveryId> {
        let id = match self.v {
            0 | 1 => self.v,
            27 | 28 => self.v - 27,
            _ => return None,
        };
        RecoveryId::from_byte(id as u8)
    }

    fn to_ecdsa(self) -> Option<EcdsaSignature> {
        let mut bytes = [0u8; 64];
        self.r.to_big_endian(&mut bytes[..32]);
        self.s.to_big_endian(&mut bytes[32..]);
        EcdsaSignature::from_slice(&bytes).ok()
    }
}

/// A transaction with its signature attached
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTransaction {
    pub transaction: Transaction,
    pub signature: Signature,
}

impl SignedTransaction {
    pub fn hash(&self) -> H256 {
        self.transaction.hash
    }

    pub fn sender(&self) -> Address {
        self.transaction.from
    }

    pub fn body(&self) -> &UnsignedTransaction {
        &self.transaction.body
    }

    /// Signed serialization: the signing payload with `v, r, s` in place of
    /// `chainId, 0, 0` trailing fields.
    pub fn signed_payload(&self) -> Vec<u8> {
        let mut stream = RlpStream::new_list(10);
        self.body().append_payload(&mut stream);
        stream.append(&self.signature.v);
        stream.append(&self.signature.r);
        stream.append(&self.signature.s);
        stream.out().to_vec()
    }

    /// Leaf of the batch transaction tree
    pub fn leaf_hash(&self) -> H256 {
        keccak256(&self.signed_payload())
    }

    /// Per-transaction record inside a batch
    pub(crate) fn append_record(&self, stream: &mut RlpStream) {
        let body = self.body();
        stream.begin_list(12);
        stream.append(&self.sender());
        stream.append(&body.to);
        stream.append(&body.amount);
        stream.append(&body.fee);
        stream.append(&body.nonce);
        stream.append(&body.data);
        stream.append(&body.gas_price);
        stream.append(&body.gas_limit);
        stream.append(&body.chain_id);
        stream.append(&self.signature.v);
        stream.append(&self.signature.r);
        stream.append(&self.signature.s);
    }

    /// Inverse of `append_record`. The hash is recomputed, never trusted.
    pub(crate) fn decode_record(record: &Rlp) -> Result<Self, CodecError> {
        let count = record.item_count().map_err(decode_err)?;
        if count != 12 {
            return Err(CodecError::Decode(format!(
                "transaction record must have 12 fields, got {}",
                count
            )));
        }

        let body = UnsignedTransaction {
            to: record.val_at(1).map_err(decode_err)?,
            amount: record.val_at(2).map_err(decode_err)?,
            fee: record.val_at(3).map_err(decode_err)?,
            nonce: record.val_at(4).map_err(decode_err)?,
            data: record.val_at(5).map_err(decode_err)?,
            gas_price: record.val_at(6).map_err(decode_err)?,
            gas_limit: record.val_at(7).map_err(decode_err)?,
            chain_id: record.val_at(8).map_err(decode_err)?,
        };

        Ok(Self {
            transaction: Transaction {
                from: record.val_at(0).map_err(decode_err)?,
                hash: body.signing_hash(),
                body,
            },
            signature: Signature {
                v: record.val_at(9).map_err(decode_err)?,
                r: record.val_at(10).map_err(decode_err)?,
                s: record.val_at(11).map_err(decode_err)?,
            },
        })
    }
}

fn decode_err(e: rlp::DecoderError) -> CodecError {
    CodecError::Decode(e.to_string())
}

/// Address controlled by a public key: last 20 bytes of keccak256 of the
/// uncompressed point without its 0x04 prefix.
pub fn public_key_address(key: &VerifyingKey) -> Address {
    let point = key.to_encoded_point(false);
    let digest = keccak256(&point.as_bytes()[1..]);
    Address::from_slice(&digest.as_bytes()[12..])
}

/// Address of a signing key
pub fn address_of(key: &SigningKey) -> Address {
    public_key_address(key.verifying_key())
}

/// Undo the EIP-155 offset so `v` holds `27 + recovery id`.
fn normalize_v(recovery_id: u64, chain_id: u64) -> Result<u64, CodecError> {
    if chain_id == 0 {
        return Ok(27 + recovery_id);
    }

    let offset = chain_id
        .checked_mul(2)
        .and_then(|doubled| doubled.checked_add(35 + recovery_id))
        .ok_or_else(|| CodecError::Serialization(format!("chain id {} out of range", chain_id)))?;

    if offset >= 37 {
        Ok(offset - (2 * chain_id + 8))
    } else {
        Ok(offset)
    }
}

/// Sign a transaction.
///
/// Returns the signed transaction (sender and hash filled in) together with
/// the detached signature.
pub fn sign(
    tx: &UnsignedTransaction,
    key: &SigningKey,
) -> Result<(SignedTransaction, Signature), CodecError> {
    let hash = tx.signing_hash();

    let (sig, recid) = key
        .sign_prehash_recoverable(hash.as_bytes())
        .map_err(|e| CodecError::Signing(e.to_string()))?;

    let bytes = sig.to_bytes();
    let signature = Signature {
        v: normalize_v(recid.to_byte() as u64, tx.chain_id)?,
        r: U256::from_big_endian(&bytes[..32]),
        s: U256::from_big_endian(&bytes[32..]),
    };

    let signed = SignedTransaction {
        transaction: Transaction {
            from: address_of(key),
            hash,
            body: tx.clone(),
        },
        signature,
    };

    Ok((signed, signature))
}

/// Recover the signer of `hash`
pub fn recover_signer(hash: &H256, signature: &Signature) -> Option<Address> {
    let recid = signature.recovery_id()?;
    let sig = signature.to_ecdsa()?;
    let key = VerifyingKey::recover_from_prehash(hash.as_bytes(), &sig, recid).ok()?;
    Some(public_key_address(&key))
}

/// Check a signed transaction.
///
/// The carried hash must equal the recomputed one and the recovered signer
/// must equal `from`.
pub fn verify(signed: &SignedTransaction, signature: &Signature) -> bool {
    let expected = signed.body().signing_hash();
    if signed.hash() != expected {
        tracing::warn!(
            "Transaction hash mismatch: carried {:?}, recomputed {:?}",
            signed.hash(),
            expected
        );
        return false;
    }

    recover_signer(&expected, signature).is_some_and(|signer| signer == signed.sender())
}

/// `verify`, surfaced as an error for callers that propagate with `?`
pub fn ensure_verified(signed: &SignedTransaction) -> Result<(), CodecError> {
    if verify(signed, &signed.signature) {
        Ok(())
    } else {
        Err(CodecError::SignatureMismatch)
    }
}
