// SPDX-License-Identifier: Apache-2.0

//! Property tests for the record codec and commit store (§8).

use outbox_wal::{Codec, CommitStore, Record, RecordType};
use proptest::prelude::*;
use tempfile::tempdir;

fn arb_record_type() -> impl Strategy<Value = RecordType> {
    prop_oneof![Just(RecordType::Event), Just(RecordType::Log)]
}

fn arb_codec() -> impl Strategy<Value = Codec> {
    prop_oneof![Just(Codec::Json), Just(Codec::Proto)]
}

proptest! {
    #[test]
    fn decode_of_encode_is_identity(
        seq in any::<u64>(),
        record_type in arb_record_type(),
        codec in arb_codec(),
        payload in prop::collection::vec(any::<u8>(), 0..4096),
    ) {
        let record = Record { seq, record_type, codec, payload };
        let encoded = record.encode();
        prop_assert_eq!(Record::decode(&encoded), Some(record));
    }

    #[test]
    fn any_single_bit_flip_breaks_decode(
        seq in any::<u64>(),
        payload in prop::collection::vec(any::<u8>(), 1..256),
        flip_byte in 0usize..256,
        flip_bit in 0u8..8,
    ) {
        let record = Record { seq, record_type: RecordType::Event, codec: Codec::Json, payload };
        let mut encoded = record.encode();
        let byte_index = flip_byte % encoded.len();
        encoded[byte_index] ^= 1 << flip_bit;
        prop_assert_eq!(Record::decode(&encoded), None);
    }

    #[test]
    fn commit_store_round_trips_any_value(seq in any::<u64>()) {
        let dir = tempdir().unwrap();
        let store = CommitStore::open(dir.path().to_path_buf());
        store.write(seq).unwrap();
        prop_assert_eq!(store.read().unwrap(), seq);
    }
}
