// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// PROPERTY-BASED TESTS — tally-crypto
//
// Verifies digest and credential invariants:
// - Digest determinism and fixed width
// - Structured input never collides on field re-splits
// - Keyed credential sign/verify integrity
//
// Run: cargo test --release -p tally-crypto --test prop_crypto
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use proptest::prelude::*;
use tally_crypto::{
    digest, is_digest_hex, Credential, DigestInput, KeyedDigestCredential, DIGEST_HEX_LEN,
};

proptest! {
    /// PROPERTY: digest is deterministic and always 64 hex chars
    #[test]
    fn prop_digest_deterministic(data in proptest::collection::vec(any::<u8>(), 0..512)) {
        let h1 = digest(&data);
        let h2 = digest(&data);
        prop_assert_eq!(&h1, &h2);
        prop_assert_eq!(h1.len(), DIGEST_HEX_LEN);
        prop_assert!(is_digest_hex(&h1));
    }

    /// PROPERTY: moving the boundary between two string fields changes the digest
    #[test]
    fn prop_field_split_changes_digest(s in "[a-z]{2,24}", cut in 1usize..24) {
        let cut = cut.min(s.len() - 1);
        let (a, b) = s.split_at(cut);
        let whole = DigestInput::new().str(&s).str("").finish();
        let split = DigestInput::new().str(a).str(b).finish();
        prop_assert_ne!(whole, split);
    }

    /// PROPERTY: a credential verifies its own signatures and rejects edits
    #[test]
    fn prop_credential_roundtrip(
        key in proptest::collection::vec(any::<u8>(), 1..64),
        msg in proptest::collection::vec(any::<u8>(), 0..256),
        flip in any::<u8>(),
    ) {
        let cred = KeyedDigestCredential::new("holder", key);
        let sig = cred.sign(&msg);
        prop_assert!(cred.verify(&msg, &sig));

        let mut tampered = msg.clone();
        tampered.push(flip);
        prop_assert!(!cred.verify(&tampered, &sig));
    }
}
