//! Property tests for the scalar codecs and the content hash.

use agentdb_core::capability::compute_content_hash;
use agentdb_core::compress::binary::BinaryCodec;
use agentdb_core::compress::codec::{decode_f16, decode_f32, encode_f16, encode_f32};
use agentdb_core::vector::{mean_squared_error, normalize};
use proptest::prelude::*;

fn unit_vector_strategy(dim: usize) -> impl Strategy<Value = Vec<f32>> {
    proptest::collection::vec(-1.0f32..1.0, dim).prop_filter_map("zero vector", |mut v| {
        normalize(&mut v);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        ((norm - 1.0).abs() < 0.01).then_some(v)
    })
}

proptest! {
    #[test]
    fn f32_codec_is_lossless(v in unit_vector_strategy(64)) {
        let decoded = decode_f32(&encode_f32(&v), 64).unwrap();
        prop_assert_eq!(v, decoded);
    }

    #[test]
    fn f16_codec_stays_within_warm_bound(v in unit_vector_strategy(64)) {
        let decoded = decode_f16(&encode_f16(&v), 64).unwrap();
        prop_assert!(mean_squared_error(&v, &decoded) <= 0.0001);
    }

    #[test]
    fn binary_codec_emits_one_bit_per_dimension(v in unit_vector_strategy(64)) {
        let codec = BinaryCodec::zero(64);
        let data = codec.encode(&v).unwrap();
        prop_assert_eq!(data.len(), 8);
        let decoded = codec.decode(&data, 64).unwrap();
        prop_assert_eq!(decoded.len(), 64);
        // Sign pattern is preserved for every dimension.
        for (orig, dec) in v.iter().zip(decoded.iter()) {
            prop_assert_eq!(*orig >= 0.0, *dec > 0.0);
        }
    }

    #[test]
    fn content_hash_is_pure(contents in proptest::collection::vec("[a-z ]{0,40}", 1..6)) {
        let dir = tempfile::TempDir::new().unwrap();
        for (i, body) in contents.iter().enumerate() {
            std::fs::write(dir.path().join(format!("agent{i}.md")), body).unwrap();
        }
        let first = compute_content_hash(dir.path()).unwrap();
        let second = compute_content_hash(dir.path()).unwrap();
        prop_assert_eq!(&first, &second);

        // Touching any file's contents changes the digest.
        std::fs::write(dir.path().join("agent0.md"), "MUTATED-42").unwrap();
        let third = compute_content_hash(dir.path()).unwrap();
        prop_assert_ne!(&first, &third);
    }
}
