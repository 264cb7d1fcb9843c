//! UnixFS file DAGs
//!
//! Content is cut into raw leaves and, when there is more than one, linked
//! together by dag-pb file nodes in a balanced tree. A single leaf is its
//! own root, so small files are addressed by their raw CID.

use crate::car::{CarBlock, write_varint};
use crate::cid_utils::{DAG_PB_CODEC, block_cid, raw_cid};
use crate::Result;
use bytes::Bytes;
use cid::Cid;

/// Leaf size
pub const CHUNK_SIZE: usize = 1024 * 1024;

/// Maximum links per file node
pub const MAX_LINKS: usize = 1024;

/// UnixFS `Data.Type` of a file node
const UNIXFS_FILE: u64 = 2;

/// A file encoded as a DAG, blocks in leaf-first order
#[derive(Clone, Debug)]
pub struct FileDag {
    pub root: Cid,
    pub blocks: Vec<CarBlock>,
}

/// A node of the tree under construction
struct Child {
    cid: Cid,
    file_size: u64,
    tree_size: u64,
}

/// Encode `data` as a UnixFS file
pub fn build_file(data: &Bytes) -> Result<FileDag> {
    build(data, CHUNK_SIZE, MAX_LINKS)
}

fn build(data: &Bytes, chunk_size: usize, max_links: usize) -> Result<FileDag> {
    let mut blocks = Vec::new();
    let mut level = Vec::new();

    let mut offset = 0;
    loop {
        let end = (offset + chunk_size).min(data.len());
        let chunk = data.slice(offset..end);
        let cid = raw_cid(&chunk)?;
        level.push(Child {
            cid,
            file_size: chunk.len() as u64,
            tree_size: chunk.len() as u64,
        });
        blocks.push(CarBlock { cid, data: chunk });

        offset = end;
        if offset >= data.len() {
            break;
        }
    }

    while level.len() > 1 {
        let mut parents = Vec::with_capacity(level.len().div_ceil(max_links));
        for group in level.chunks(max_links) {
            let node = file_node(group);
            let cid = block_cid(DAG_PB_CODEC, &node)?;
            parents.push(Child {
                cid,
                file_size: group.iter().map(|c| c.file_size).sum(),
                tree_size: node.len() as u64 + group.iter().map(|c| c.tree_size).sum::<u64>(),
            });
            blocks.push(CarBlock {
                cid,
                data: Bytes::from(node),
            });
        }
        level = parents;
    }

    Ok(FileDag {
        root: level[0].cid,
        blocks,
    })
}

/// dag-pb `PBNode` with one link per child and UnixFS file data
///
/// Links (field 2) precede Data (field 1), as dag-pb requires.
fn file_node(children: &[Child]) -> Vec<u8> {
    let mut unixfs = Vec::new();
    put_varint_field(1, UNIXFS_FILE, &mut unixfs);
    put_varint_field(3, children.iter().map(|c| c.file_size).sum(), &mut unixfs);
    for child in children {
        put_varint_field(4, child.file_size, &mut unixfs);
    }

    let mut node = Vec::new();
    for child in children {
        let mut link = Vec::new();
        put_bytes_field(1, &child.cid.to_bytes(), &mut link);
        put_varint_field(3, child.tree_size, &mut link);
        put_bytes_field(2, &link, &mut node);
    }
    put_bytes_field(1, &unixfs, &mut node);
    node
}

fn put_varint_field(field: u64, value: u64, out: &mut Vec<u8>) {
    write_varint(field << 3, out);
    write_varint(value, out);
}

fn put_bytes_field(field: u64, value: &[u8], out: &mut Vec<u8>) {
    write_varint((field << 3) | 2, out);
    write_varint(value.len() as u64, out);
    out.extend_from_slice(value);
}
