//! Merkle Patricia Trie node decoding
//!
//! Trie nodes arrive from peers as their canonical RLP encoding. This module
//! decodes them into [`TrieNode`] values and walks each node to find what it
//! references: child nodes stored under their own hash, and the values held at
//! leaves (which, for the account trie, point at storage tries and code).
//!
//! Encoding rules:
//! - a branch is a 17-item list: 16 child references and an optional value
//! - leaves and extensions are 2-item lists whose first item is a hex-prefix
//!   (compact) encoded path; the prefix flag tells them apart
//! - a child whose encoding is shorter than 32 bytes is embedded inline,
//!   otherwise it is referenced by the Keccak256 hash of its encoding

use bytes::Bytes;
use protocore_types::{H256, HASH_SIZE};
use rlp::{DecoderError, Prototype, Rlp, RlpStream};
use std::collections::VecDeque;

use crate::{Result, StorageError};

/// Nibble representation for trie paths
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Nibbles(Vec<u8>);

impl Nibbles {
    /// Create nibbles from bytes, high nibble first
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Nibbles(bytes.iter().flat_map(|b| [b >> 4, b & 0x0f]).collect())
    }

    /// Create nibbles from individual nibble values (only the low 4 bits are kept)
    pub fn from_nibbles(nibbles: &[u8]) -> Self {
        Nibbles(nibbles.iter().map(|n| n & 0x0f).collect())
    }

    /// Number of nibbles
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The raw nibble values
    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    /// Hex-prefix encoding.
    ///
    /// The first nibble carries the flags: bit 1 marks a leaf, bit 0 an odd
    /// path length. Even paths are padded with a zero nibble after the flag.
    pub fn encode_compact(&self, is_leaf: bool) -> Vec<u8> {
        let odd = self.0.len() % 2 == 1;
        let flag = (u8::from(is_leaf) << 1) | u8::from(odd);

        let mut result = Vec::with_capacity(self.0.len() / 2 + 1);
        let rest = if odd {
            result.push((flag << 4) | self.0[0]);
            &self.0[1..]
        } else {
            result.push(flag << 4);
            &self.0[..]
        };
        result.extend(rest.chunks(2).map(|pair| (pair[0] << 4) | pair[1]));
        result
    }

    /// Decode a hex-prefix encoded path, returning the nibbles and the leaf flag
    pub fn decode_compact(data: &[u8]) -> std::result::Result<(Nibbles, bool), DecoderError> {
        let Some((&first, rest)) = data.split_first() else {
            return Err(DecoderError::Custom("empty trie node path"));
        };

        let flag = first >> 4;
        if flag > 3 {
            return Err(DecoderError::Custom("invalid hex-prefix flag"));
        }
        let is_leaf = flag & 0x02 != 0;
        let odd = flag & 0x01 != 0;

        let mut nibbles = Vec::with_capacity(rest.len() * 2 + 1);
        if odd {
            nibbles.push(first & 0x0f);
        }
        for &byte in rest {
            nibbles.push(byte >> 4);
            nibbles.push(byte & 0x0f);
        }

        Ok((Nibbles(nibbles), is_leaf))
    }
}

/// Reference from a node to one of its children
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeRef {
    /// Child stored separately under the hash of its encoding
    Hash(H256),
    /// Child small enough to be embedded in its parent
    Inline(Box<TrieNode>),
}

impl NodeRef {
    /// Reference `node` the way its parent would encode it.
    pub fn to_node(node: TrieNode) -> Self {
        let encoded = node.encode();
        if encoded.len() < HASH_SIZE {
            NodeRef::Inline(Box::new(node))
        } else {
            NodeRef::Hash(H256::keccak256(&encoded))
        }
    }

    fn append_to(&self, s: &mut RlpStream) {
        match self {
            NodeRef::Hash(hash) => {
                s.append(hash);
            }
            NodeRef::Inline(node) => {
                s.append_raw(&node.encode(), 1);
            }
        }
    }

    fn visit(&self) -> Visit<'_> {
        match self {
            NodeRef::Hash(hash) => Visit::Hash(*hash),
            NodeRef::Inline(node) => Visit::Node(node),
        }
    }
}

/// Something a trie node points at
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrieReference {
    /// A descendant node stored under its own hash
    Node(H256),
    /// A value held at a leaf or branch
    Value(Bytes),
}

/// Trie node types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrieNode {
    /// Empty node
    Empty,
    /// Leaf node with path suffix and value
    Leaf {
        /// Remaining key nibbles
        path: Nibbles,
        /// Value stored at this leaf
        value: Bytes,
    },
    /// Extension node with shared path prefix
    Extension {
        /// Shared key nibbles
        path: Nibbles,
        /// The branch the path leads to
        child: NodeRef,
    },
    /// Branch node with 16 children and optional value
    Branch {
        /// Children (16 slots for each nibble 0-f)
        children: Box<[Option<NodeRef>; 16]>,
        /// Value if a key terminates at this node
        value: Option<Bytes>,
    },
}

enum Visit<'a> {
    Node(&'a TrieNode),
    Hash(H256),
}

impl TrieNode {
    /// A branch with no children and no value
    pub fn empty_branch() -> Self {
        TrieNode::Branch {
            children: Box::new(std::array::from_fn(|_| None)),
            value: None,
        }
    }

    /// Decode a node from its RLP encoding
    pub fn decode(data: &[u8]) -> Result<Self> {
        let rlp = Rlp::new(data);
        let info = rlp.payload_info()?;
        if info.total() != data.len() {
            return Err(StorageError::Trie(format!(
                "trailing bytes after node: encoded {} of {}",
                info.total(),
                data.len()
            )));
        }
        Ok(Self::decode_rlp(&rlp)?)
    }

    fn decode_rlp(rlp: &Rlp<'_>) -> std::result::Result<Self, DecoderError> {
        match rlp.prototype()? {
            Prototype::Data(0) => Ok(TrieNode::Empty),
            Prototype::List(17) => {
                let mut children: [Option<NodeRef>; 16] = std::array::from_fn(|_| None);
                for (index, slot) in children.iter_mut().enumerate() {
                    *slot = Self::decode_ref(&rlp.at(index)?)?;
                }
                let value = rlp.at(16)?.data()?;
                Ok(TrieNode::Branch {
                    children: Box::new(children),
                    value: (!value.is_empty()).then(|| Bytes::copy_from_slice(value)),
                })
            }
            Prototype::List(2) => {
                let (path, is_leaf) = Nibbles::decode_compact(rlp.at(0)?.data()?)?;
                if is_leaf {
                    Ok(TrieNode::Leaf {
                        path,
                        value: Bytes::copy_from_slice(rlp.at(1)?.data()?),
                    })
                } else {
                    let child = Self::decode_ref(&rlp.at(1)?)?
                        .ok_or(DecoderError::Custom("extension node without child"))?;
                    Ok(TrieNode::Extension { path, child })
                }
            }
            _ => Err(DecoderError::Custom("unexpected trie node shape")),
        }
    }

    fn decode_ref(item: &Rlp<'_>) -> std::result::Result<Option<NodeRef>, DecoderError> {
        if item.is_list() {
            if item.as_raw().len() >= HASH_SIZE {
                return Err(DecoderError::Custom("inline node too large"));
            }
            return Ok(Some(NodeRef::Inline(Box::new(Self::decode_rlp(item)?))));
        }
        match item.data()?.len() {
            0 => Ok(None),
            HASH_SIZE => Ok(Some(NodeRef::Hash(item.as_val()?))),
            _ => Err(DecoderError::Custom("invalid child reference length")),
        }
    }

    /// Encode the node as RLP
    pub fn encode(&self) -> Vec<u8> {
        let mut stream = RlpStream::new();
        self.append_to(&mut stream);
        stream.out().to_vec()
    }

    fn append_to(&self, s: &mut RlpStream) {
        match self {
            TrieNode::Empty => {
                s.append_empty_data();
            }
            TrieNode::Leaf { path, value } => {
                s.begin_list(2);
                s.append(&path.encode_compact(true));
                s.append(&value.to_vec());
            }
            TrieNode::Extension { path, child } => {
                s.begin_list(2);
                s.append(&path.encode_compact(false));
                child.append_to(s);
            }
            TrieNode::Branch { children, value } => {
                s.begin_list(17);
                for child in children.iter() {
                    match child {
                        Some(child) => child.append_to(s),
                        None => {
                            s.append_empty_data();
                        }
                    }
                }
                match value {
                    Some(value) => {
                        s.append(&value.to_vec());
                    }
                    None => {
                        s.append_empty_data();
                    }
                }
            }
        }
    }

    /// Compute the hash of this node
    pub fn hash(&self) -> H256 {
        H256::keccak256(&self.encode())
    }

    /// Everything this node references, breadth first through inline children.
    ///
    /// A node's own value comes before its children; children keep slot order.
    pub fn references(&self) -> Vec<TrieReference> {
        let mut references = Vec::new();
        let mut queue = VecDeque::from([Visit::Node(self)]);

        while let Some(visit) = queue.pop_front() {
            let node = match visit {
                Visit::Hash(hash) => {
                    references.push(TrieReference::Node(hash));
                    continue;
                }
                Visit::Node(node) => node,
            };

            match node {
                TrieNode::Empty => {}
                TrieNode::Leaf { value, .. } => {
                    references.push(TrieReference::Value(value.clone()));
                }
                TrieNode::Extension { child, .. } => queue.push_back(child.visit()),
                TrieNode::Branch { children, value } => {
                    if let Some(value) = value {
                        references.push(TrieReference::Value(value.clone()));
                    }
                    queue.extend(children.iter().flatten().map(NodeRef::visit));
                }
            }
        }

        references
    }
}
