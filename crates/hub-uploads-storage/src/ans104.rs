//! ANS-104 data items, the unit a bundler node accepts
//!
//! Binary layout (integers little-endian):
//!
//! ```text
//! u16 signature type | signature | owner
//! | u8 target flag [| target(32)] | u8 anchor flag [| anchor(32)]
//! | u64 tag count | u64 tag bytes length | avro tags | data
//! ```
//!
//! Only Arweave signatures (type 1, 512-byte RSA-PSS) are produced.

use crate::arweave::{ArweaveWallet, DeepHashItem, OWNER_LENGTH, b64url, deep_hash};
use crate::types::Tag;
use crate::{Result, StorageError};
use bytes::{BufMut, Bytes, BytesMut};
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::digest::Output;
use sha2::{Digest, Sha256, Sha384};

/// Signature type of an Arweave-signed data item
pub const SIGNATURE_TYPE_ARWEAVE: u16 = 1;

const MAX_TAGS: usize = 128;
const MAX_TAG_NAME_BYTES: usize = 1024;
const MAX_TAG_VALUE_BYTES: usize = 3072;

/// Encode tags as an Avro array of `{name: bytes, value: bytes}` records
///
/// No tags encode to no bytes at all rather than an empty Avro array.
pub fn encode_tags(tags: &[Tag]) -> Result<Vec<u8>> {
    if tags.len() > MAX_TAGS {
        return Err(StorageError::InvalidData(format!(
            "{} tags exceed the limit of {}",
            tags.len(),
            MAX_TAGS
        )));
    }
    if tags.is_empty() {
        return Ok(Vec::new());
    }

    let mut out = Vec::new();
    write_avro_long(tags.len() as i64, &mut out);
    for tag in tags {
        if tag.name.is_empty() || tag.name.len() > MAX_TAG_NAME_BYTES {
            return Err(StorageError::InvalidData(format!(
                "tag name must be 1 to {} bytes",
                MAX_TAG_NAME_BYTES
            )));
        }
        if tag.value.is_empty() || tag.value.len() > MAX_TAG_VALUE_BYTES {
            return Err(StorageError::InvalidData(format!(
                "value of tag {} must be 1 to {} bytes",
                tag.name, MAX_TAG_VALUE_BYTES
            )));
        }
        write_avro_bytes(tag.name.as_bytes(), &mut out);
        write_avro_bytes(tag.value.as_bytes(), &mut out);
    }
    out.push(0);
    Ok(out)
}

/// Zigzag varint
fn write_avro_long(value: i64, out: &mut Vec<u8>) {
    let mut zigzag = ((value << 1) ^ (value >> 63)) as u64;
    loop {
        let byte = (zigzag & 0x7f) as u8;
        zigzag >>= 7;
        if zigzag == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

fn write_avro_bytes(data: &[u8], out: &mut Vec<u8>) {
    write_avro_long(data.len() as i64, out);
    out.extend_from_slice(data);
}

/// A signed data item
#[derive(Clone, Debug)]
pub struct DataItem {
    signature: Vec<u8>,
    owner: Vec<u8>,
    target: Option<[u8; 32]>,
    anchor: Option<[u8; 32]>,
    tag_count: u64,
    tags: Vec<u8>,
    data: Bytes,
}

impl DataItem {
    /// Build a data item over `data` and sign it with `wallet`
    ///
    /// Every item gets a fresh random anchor, so uploading the same bytes
    /// twice yields two distinct ids.
    pub fn sign(wallet: &ArweaveWallet, tags: &[Tag], data: Bytes) -> Result<Self> {
        let mut anchor = [0u8; 32];
        OsRng.fill_bytes(&mut anchor);

        let mut item = Self::unsigned(wallet.owner().to_vec(), tags, data, anchor)?;
        item.signature = wallet.sign(&item.signature_data())?;
        Ok(item)
    }

    fn unsigned(owner: Vec<u8>, tags: &[Tag], data: Bytes, anchor: [u8; 32]) -> Result<Self> {
        Ok(Self {
            signature: Vec::new(),
            owner,
            target: None,
            anchor: Some(anchor),
            tag_count: tags.len() as u64,
            tags: encode_tags(tags)?,
            data,
        })
    }

    /// Deep hash of the signed fields
    pub fn signature_data(&self) -> Output<Sha384> {
        let signature_type = SIGNATURE_TYPE_ARWEAVE.to_string();
        deep_hash(&DeepHashItem::List(vec![
            DeepHashItem::Blob(b"dataitem"),
            DeepHashItem::Blob(b"1"),
            DeepHashItem::Blob(signature_type.as_bytes()),
            DeepHashItem::Blob(&self.owner),
            DeepHashItem::Blob(self.target.as_ref().map_or(&[][..], |t| &t[..])),
            DeepHashItem::Blob(self.anchor.as_ref().map_or(&[][..], |a| &a[..])),
            DeepHashItem::Blob(&self.tags),
            DeepHashItem::Blob(&self.data),
        ]))
    }

    /// Item id: base64url SHA-256 of the signature
    pub fn id(&self) -> String {
        b64url(&Sha256::digest(&self.signature))
    }

    /// Serialized size in bytes
    pub fn encoded_len(&self) -> usize {
        2 + self.signature.len()
            + self.owner.len()
            + 1
            + self.target.map_or(0, |t| t.len())
            + 1
            + self.anchor.map_or(0, |a| a.len())
            + 16
            + self.tags.len()
            + self.data.len()
    }

    /// Serialize the item for `POST /tx/{token}`
    pub fn to_bytes(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(self.encoded_len());
        out.put_u16_le(SIGNATURE_TYPE_ARWEAVE);
        out.put_slice(&self.signature);
        out.put_slice(&self.owner);
        put_optional(&mut out, self.target.as_ref());
        put_optional(&mut out, self.anchor.as_ref());
        out.put_u64_le(self.tag_count);
        out.put_u64_le(self.tags.len() as u64);
        out.put_slice(&self.tags);
        out.put_slice(&self.data);
        out.freeze()
    }
}

fn put_optional(out: &mut BytesMut, value: Option<&[u8; 32]>) {
    match value {
        Some(value) => {
            out.put_u8(1);
            out.put_slice(value);
        }
        None => out.put_u8(0),
    }
}

#[cfg(test)]
struct ItemReader<'a> {
    rest: &'a [u8],
}

#[cfg(test)]
impl<'a> ItemReader<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.rest.len() < len {
            return Err(StorageError::InvalidData("truncated data item".to_string()));
        }
        let (head, tail) = self.rest.split_at(len);
        self.rest = tail;
        Ok(head)
    }

    fn u64(&mut self) -> Result<u64> {
        let mut le = [0u8; 8];
        le.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(le))
    }

    fn optional(&mut self) -> Result<Option<[u8; 32]>> {
        match self.take(1)?[0] {
            0 => Ok(None),
            1 => {
                let mut value = [0u8; 32];
                value.copy_from_slice(self.take(32)?);
                Ok(Some(value))
            }
            flag => Err(StorageError::InvalidData(format!("bad presence flag {}", flag))),
        }
    }
}

#[cfg(test)]
impl DataItem {
    /// Parse a serialized Arweave-signed item
    pub(crate) fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut reader = ItemReader { rest: bytes };

        let signature_type = reader.take(2)?;
        if u16::from_le_bytes([signature_type[0], signature_type[1]]) != SIGNATURE_TYPE_ARWEAVE {
            return Err(StorageError::InvalidData("not an arweave signature".to_string()));
        }
        let signature = reader.take(OWNER_LENGTH)?.to_vec();
        let owner = reader.take(OWNER_LENGTH)?.to_vec();
        let target = reader.optional()?;
        let anchor = reader.optional()?;
        let tag_count = reader.u64()?;
        let tags_len = reader.u64()? as usize;
        let tags = reader.take(tags_len)?.to_vec();
        let data = Bytes::copy_from_slice(reader.rest);

        Ok(Self {
            signature,
            owner,
            target,
            anchor,
            tag_count,
            tags,
            data,
        })
    }

    pub(crate) fn owner(&self) -> &[u8] {
        &self.owner
    }

    pub(crate) fn signature(&self) -> &[u8] {
        &self.signature
    }

    pub(crate) fn tags(&self) -> (u64, &[u8]) {
        (self.tag_count, &self.tags)
    }

    pub(crate) fn data(&self) -> &[u8] {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arweave::testing::{TEST_WALLET, hex, verify};

    #[test]
    fn test_encode_tags() {
        let tags = encode_tags(&[Tag::content_type("text/plain")]).unwrap();
        assert_eq!(
            hex(&tags),
            "0218436f6e74656e742d5479706514746578742f706c61696e00"
        );
        assert!(encode_tags(&[]).unwrap().is_empty());
    }

    #[rstest::rstest]
    #[case::empty_name(vec![Tag::new("", "x")])]
    #[case::empty_value(vec![Tag::new("Content-Type", "")])]
    #[case::long_value(vec![Tag::content_type("x".repeat(MAX_TAG_VALUE_BYTES + 1))])]
    #[case::too_many(vec![Tag::new("a", "b"); MAX_TAGS + 1])]
    fn test_invalid_tags(#[case] tags: Vec<Tag>) {
        assert!(matches!(encode_tags(&tags), Err(StorageError::InvalidData(_))));
    }

    #[test]
    fn test_signature_data_vector() {
        let wallet = ArweaveWallet::parse(TEST_WALLET).unwrap();
        let anchor: [u8; 32] = std::array::from_fn(|i| i as u8);

        let item = DataItem::unsigned(
            wallet.owner().to_vec(),
            &[Tag::content_type("text/plain")],
            Bytes::from_static(b"hello"),
            anchor,
        )
        .unwrap();

        assert_eq!(
            hex(&item.signature_data()),
            "643b64dd1614f714e4ff8f24c3fe7a96d634916baaccd6f296269d3132d21a203b55459240f4b11434671e5aeeeed04a"
        );
    }

    #[test]
    fn test_signed_item_layout() {
        let wallet = ArweaveWallet::parse(TEST_WALLET).unwrap();
        let item = DataItem::sign(
            &wallet,
            &[Tag::content_type("application/json")],
            Bytes::from_static(b"{}"),
        )
        .unwrap();

        let bytes = item.to_bytes();
        assert_eq!(bytes.len(), item.encoded_len());
        assert_eq!(&bytes[..2], &[1, 0]);
        // no target, anchor present
        assert_eq!(bytes[2 + 2 * OWNER_LENGTH], 0);
        assert_eq!(bytes[3 + 2 * OWNER_LENGTH], 1);
        assert!(bytes.ends_with(b"{}"));

        let parsed = DataItem::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.owner(), wallet.owner());
        assert_eq!(parsed.tags().0, 1);
        assert_eq!(parsed.id(), item.id());
        assert!(verify(
            parsed.owner(),
            &parsed.signature_data(),
            parsed.signature()
        ));
    }

    #[test]
    fn test_anchor_makes_ids_unique() {
        let wallet = ArweaveWallet::parse(TEST_WALLET).unwrap();
        let a = DataItem::sign(&wallet, &[], Bytes::from_static(b"same")).unwrap();
        let b = DataItem::sign(&wallet, &[], Bytes::from_static(b"same")).unwrap();
        assert_ne!(a.id(), b.id());
        assert_eq!(a.id().len(), 43);
    }
}
