// Binary wire format (all integers big-endian):
//
//   version u8 | nonce u64 | gas_limit u64 | has_recipient u8 [| recipient 20]
//   | amount 4 x u64 (most significant limb first) | payload_len u32 | payload
//   | sender_key 32 | signature 64
//
// The signing message is everything before the signature.

use super::{MAX_PAYLOAD_SIZE, TX_VERSION};
use crate::crypto::{
    Address, PublicKey, Signature, ADDRESS_SIZE, PUBLIC_KEY_SIZE, SIGNATURE_SIZE,
};
use crate::error::{HarnessError, HarnessResult};
use primitive_types::U256;

pub(super) struct DecodedTransaction {
    pub sender_key: PublicKey,
    pub recipient: Option<Address>,
    pub nonce: u64,
    pub gas_limit: u64,
    pub amount: U256,
    pub payload: Vec<u8>,
    pub signature: Signature,
}

pub(super) fn signing_bytes(
    sender_key: &PublicKey,
    recipient: Option<&Address>,
    nonce: u64,
    gas_limit: u64,
    amount: &U256,
    payload: &[u8],
) -> Vec<u8> {
    let mut out = Vec::with_capacity(
        1 + 8 + 8 + 1 + ADDRESS_SIZE + 32 + 4 + payload.len() + PUBLIC_KEY_SIZE + SIGNATURE_SIZE,
    );
    out.push(TX_VERSION);
    out.extend_from_slice(&nonce.to_be_bytes());
    out.extend_from_slice(&gas_limit.to_be_bytes());
    match recipient {
        Some(addr) => {
            out.push(1);
            out.extend_from_slice(addr.as_bytes());
        }
        None => out.push(0),
    }
    for limb in amount.0.iter().rev() {
        out.extend_from_slice(&limb.to_be_bytes());
    }
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(payload);
    out.extend_from_slice(sender_key.as_bytes());
    out
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize) -> HarnessResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| {
                HarnessError::Encoding(format!(
                    "unexpected end of input at offset {} (need {} bytes)",
                    self.pos, n
                ))
            })?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn read_array<const N: usize>(&mut self) -> HarnessResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn read_u8(&mut self) -> HarnessResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn read_u32(&mut self) -> HarnessResult<u32> {
        Ok(u32::from_be_bytes(self.read_array()?))
    }

    fn read_u64(&mut self) -> HarnessResult<u64> {
        Ok(u64::from_be_bytes(self.read_array()?))
    }

    fn is_empty(&self) -> bool {
        self.pos == self.bytes.len()
    }
}

pub(super) fn decode(bytes: &[u8]) -> HarnessResult<DecodedTransaction> {
    let mut reader = Reader::new(bytes);

    let version = reader.read_u8()?;
    if version != TX_VERSION {
        return Err(HarnessError::Encoding(format!(
            "unsupported version {}",
            version
        )));
    }

    let nonce = reader.read_u64()?;
    let gas_limit = reader.read_u64()?;
    let recipient = match reader.read_u8()? {
        0 => None,
        1 => Some(Address::new(reader.read_array()?)),
        flag => {
            return Err(HarnessError::Encoding(format!(
                "invalid recipient flag {}",
                flag
            )))
        }
    };

    let mut limbs = [0u64; 4];
    for limb in limbs.iter_mut().rev() {
        *limb = reader.read_u64()?;
    }

    let payload_len = reader.read_u32()? as usize;
    if payload_len > MAX_PAYLOAD_SIZE {
        return Err(HarnessError::Encoding(format!(
            "payload of {} bytes exceeds limit of {}",
            payload_len, MAX_PAYLOAD_SIZE
        )));
    }
    let payload = reader.take(payload_len)?.to_vec();
    let sender_key = PublicKey::from_bytes(reader.read_array()?);
    let signature = Signature::from_bytes(reader.read_array()?);

    if !reader.is_empty() {
        return Err(HarnessError::Encoding("trailing bytes".to_string()));
    }

    Ok(DecodedTransaction {
        sender_key,
        recipient,
        nonce,
        gas_limit,
        amount: U256(limbs),
        payload,
        signature,
    })
}
