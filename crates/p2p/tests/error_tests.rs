//! Tests for error types in the protocore-p2p crate.

use protocore_p2p::Error;

#[test]
fn test_error_display() {
    let err = Error::Channel("channel closed".to_string());
    assert!(err.to_string().contains("channel error"));

    let err = Error::MaxPeersReached;
    assert_eq!(err.to_string(), "maximum peer limit reached");
}
