// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// PROPERTY-BASED TESTS — tally-network
//
// The decoder faces untrusted peers: arbitrary input must produce either
// a valid request or MalformedMessage, never a panic.
//
// Run: cargo test --release -p tally-network --test prop_network
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use proptest::prelude::*;
use tally_core::{Block, Transaction};
use tally_network::codec::{decode_chain, Request};
use tally_network::NetworkError;

proptest! {
    /// PROPERTY: decoding arbitrary text never panics
    #[test]
    fn prop_decode_arbitrary_never_panics(line in ".{0,256}") {
        match Request::decode(&line) {
            Ok(_) | Err(NetworkError::MalformedMessage(_)) => {}
            Err(other) => prop_assert!(false, "unexpected error kind {:?}", other),
        }
        let _ = decode_chain(&line);
    }

    /// PROPERTY: NEW_BLOCK followed by garbage is rejected
    #[test]
    fn prop_new_block_garbage_rejected(payload in "[^{\\[]{1,128}") {
        let line = format!("NEW_BLOCK{}", payload);
        prop_assert!(Request::decode(&line).is_err());
    }

    /// PROPERTY: encoded blocks decode back to themselves
    #[test]
    fn prop_block_frame_decodes(
        amount in 0u128..1_000_000,
        ts in 1u64..2_000_000_000_000,
        producer in proptest::option::of("[a-z]{1,8}"),
    ) {
        let genesis = Block::genesis();
        let tx = Transaction::with_timestamp("alice", "bob", amount, ts, None);
        let block = Block::with_timestamp(1, genesis.hash, ts, vec![tx], producer)
            .expect("genesis hash is well formed");
        let frame = Request::NewBlock(Box::new(block.clone())).encode().expect("encode");
        prop_assert_eq!(Request::decode(&frame).expect("decode"), Request::NewBlock(Box::new(block)));
    }
}
