//! Tests for BlockHeader and BlockAddedEvent

use protocore_types::{BlockAddedEvent, BlockHeader, H256};

#[test]
fn test_block_header_default() {
    let header = BlockHeader::default();
    assert_eq!(header.number, 0);
    assert!(header.parent_hash.is_zero());
    assert!(header.state_root.is_zero());
}

#[test]
fn test_block_header_hash() {
    let header = BlockHeader::new(10, H256::keccak256(b"parent"), H256::keccak256(b"state"));
    let hash = header.hash();
    assert!(!hash.is_zero());
    assert_eq!(hash, header.hash());

    let mut other = header.clone();
    other.number = 11;
    assert_ne!(header.hash(), other.hash());
}

#[test]
fn test_block_header_rlp_decode() {
    let header = BlockHeader {
        parent_hash: H256::keccak256(b"parent"),
        number: 1234,
        state_root: H256::keccak256(b"state"),
        timestamp: 1_700_000_000,
    };
    let decoded = BlockHeader::rlp_decode(&rlp::encode(&header)).unwrap();
    assert_eq!(decoded, header);

    assert!(BlockHeader::rlp_decode(&[0xc0]).is_err());
}

#[test]
fn test_block_added_event() {
    let header = BlockHeader::new(200, H256::ZERO, H256::ZERO);

    let head = BlockAddedEvent::head_advanced(header.clone());
    assert!(head.is_new_canonical_head());
    assert_eq!(head.block_number(), 200);

    let fork = BlockAddedEvent::fork(header);
    assert!(!fork.is_new_canonical_head());
}
