//! Minimal CARv1 (content-addressed archive) reader and writer
//!
//! Layout: `varint(len) | dag-cbor header {roots, version}` followed by any
//! number of `varint(len) | cid | block bytes` sections.

use crate::cid_utils::{DAG_CBOR_CODEC, block_cid};
use crate::{Result, StorageError};
use bytes::Bytes;
use cid::Cid;
use ipld_core::ipld::Ipld;
use std::collections::BTreeMap;
use std::io::Cursor;

/// A block read from or written to a CAR archive
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CarBlock {
    pub cid: Cid,
    pub data: Bytes,
}

impl CarBlock {
    /// Encode `ipld` as a dag-cbor block
    pub fn dag_cbor(ipld: &Ipld) -> Result<Self> {
        let data = serde_ipld_dagcbor::to_vec(ipld)
            .map_err(|e| StorageError::InvalidData(format!("dag-cbor encoding failed: {}", e)))?;
        Ok(Self {
            cid: block_cid(DAG_CBOR_CODEC, &data)?,
            data: Bytes::from(data),
        })
    }

    /// Decode the block as dag-cbor
    pub fn decode(&self) -> Result<Ipld> {
        serde_ipld_dagcbor::from_slice(&self.data)
            .map_err(|e| invalid(format!("block {} is not dag-cbor: {}", self.cid, e)))
    }
}

/// A fully parsed CARv1 archive
#[derive(Clone, Debug)]
pub struct CarArchive {
    pub roots: Vec<Cid>,
    pub blocks: Vec<CarBlock>,
}

impl CarArchive {
    /// Parse an archive held in memory
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut offset = 0;

        let header_len = read_varint(bytes, &mut offset)? as usize;
        let header = take(bytes, &mut offset, header_len)?;
        let roots = parse_header(header)?;

        let mut blocks = Vec::new();
        while offset < bytes.len() {
            let section_len = read_varint(bytes, &mut offset)? as usize;
            let section = take(bytes, &mut offset, section_len)?;

            let mut cursor = Cursor::new(section);
            let cid = Cid::read_bytes(&mut cursor)
                .map_err(|e| invalid(format!("bad block CID: {}", e)))?;
            let data = &section[cursor.position() as usize..];

            blocks.push(CarBlock {
                cid,
                data: Bytes::copy_from_slice(data),
            });
        }

        Ok(Self { roots, blocks })
    }

    /// Look up a block by CID
    pub fn get(&self, cid: &Cid) -> Option<&CarBlock> {
        self.blocks.iter().find(|block| block.cid == *cid)
    }

    /// Decode the first root block as IPLD
    pub fn root_ipld(&self) -> Result<Ipld> {
        let root = self
            .roots
            .first()
            .ok_or_else(|| invalid("archive has no roots"))?;
        self.decode(root)
    }

    /// Decode a block of the archive as IPLD
    pub fn decode(&self, cid: &Cid) -> Result<Ipld> {
        self.get(cid)
            .ok_or_else(|| invalid(format!("block {} missing from archive", cid)))?
            .decode()
    }
}

/// Serialize `blocks` into a CARv1 archive with the given roots
pub fn write_car<'a>(
    roots: &[Cid],
    blocks: impl IntoIterator<Item = &'a CarBlock>,
) -> Result<Vec<u8>> {
    let mut header = BTreeMap::new();
    header.insert(
        "roots".to_string(),
        Ipld::List(roots.iter().map(|cid| Ipld::Link(*cid)).collect()),
    );
    header.insert("version".to_string(), Ipld::Integer(1));
    let header = serde_ipld_dagcbor::to_vec(&Ipld::Map(header))
        .map_err(|e| invalid(format!("header encoding failed: {}", e)))?;

    let mut out = Vec::new();
    write_varint(header.len() as u64, &mut out);
    out.extend_from_slice(&header);

    for block in blocks {
        let cid = block.cid.to_bytes();
        write_varint((cid.len() + block.data.len()) as u64, &mut out);
        out.extend_from_slice(&cid);
        out.extend_from_slice(&block.data);
    }
    Ok(out)
}

fn parse_header(header: &[u8]) -> Result<Vec<Cid>> {
    let ipld: Ipld = serde_ipld_dagcbor::from_slice(header)
        .map_err(|e| invalid(format!("bad header: {}", e)))?;

    let Ipld::Map(map) = ipld else {
        return Err(invalid("header is not a map"));
    };

    match map.get("version") {
        Some(Ipld::Integer(1)) => {}
        other => return Err(invalid(format!("unsupported CAR version: {:?}", other))),
    }

    let roots = match map.get("roots") {
        Some(Ipld::List(roots)) => roots
            .iter()
            .map(|root| match root {
                Ipld::Link(cid) => Ok(*cid),
                _ => Err(invalid("root is not a link")),
            })
            .collect::<Result<Vec<_>>>()?,
        _ => return Err(invalid("header has no roots")),
    };

    if roots.is_empty() {
        return Err(invalid("header has no roots"));
    }

    Ok(roots)
}

/// Read an unsigned LEB128 varint
fn read_varint(bytes: &[u8], offset: &mut usize) -> Result<u64> {
    let mut value: u64 = 0;
    for shift in (0..64).step_by(7) {
        let byte = *bytes
            .get(*offset)
            .ok_or_else(|| invalid("truncated varint"))?;
        *offset += 1;
        value |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
    }
    Err(invalid("varint overflow"))
}

/// Append an unsigned LEB128 varint
pub(crate) fn write_varint(mut value: u64, out: &mut Vec<u8>) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

fn take<'a>(bytes: &'a [u8], offset: &mut usize, len: usize) -> Result<&'a [u8]> {
    let end = offset
        .checked_add(len)
        .filter(|end| *end <= bytes.len())
        .ok_or_else(|| invalid("truncated section"))?;
    let slice = &bytes[*offset..end];
    *offset = end;
    Ok(slice)
}

fn invalid(reason: impl Into<String>) -> StorageError {
    StorageError::InvalidArchive(reason.into())
}
