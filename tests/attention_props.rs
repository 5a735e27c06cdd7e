use ante::decoder::Decoder;
use proptest::prelude::*;
use quickcheck::quickcheck;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn setup(seed: u64, src_len: usize) -> (Decoder, Vec<Vec<f32>>, Vec<f32>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let dec = Decoder::new(6, 4, 8, 5, 3, &mut rng);
    let enc: Vec<Vec<f32>> = (0..src_len)
        .map(|_| (0..8).map(|_| rng.gen_range(-2.0..2.0)).collect())
        .collect();
    let hidden: Vec<f32> = (0..5).map(|_| rng.gen_range(-2.0..2.0)).collect();
    (dec, enc, hidden)
}

proptest! {
    #[test]
    fn weights_form_distribution(seed in any::<u64>(), len in 1usize..20, boost in -3.0f32..3.0) {
        let (dec, enc, hidden) = setup(seed, len);
        let w = dec.attention_weights(&enc, &hidden, boost);
        prop_assert_eq!(w.len(), len);
        prop_assert!(w.iter().all(|&x| x >= 0.0 && x.is_finite()));
        prop_assert!((w.iter().sum::<f32>() - 1.0).abs() < 1e-4);
    }
}

quickcheck! {
    fn unit_boost_matches_default_decode(seed: u64) -> bool {
        let (dec, enc, _) = setup(seed, 4);
        let a = dec.generate(&[enc.clone()], 3, 1.0).unwrap();
        let b = dec
            .forward(
                &[enc],
                ante::DecodeTarget::Steps(3),
                ante::DecodeOptions::default(),
                &mut StdRng::seed_from_u64(seed),
            )
            .unwrap();
        a.attention == b.attention && a.hard == b.hard
    }
}

#[test]
fn single_position_gets_all_weight() {
    let (dec, enc, hidden) = setup(1, 1);
    for boost in [-3.0, 0.0, 1.0, 3.0] {
        assert_eq!(dec.attention_weights(&enc, &hidden, boost), vec![1.0]);
    }
}

#[test]
fn zero_boost_is_uniform() {
    let (dec, enc, hidden) = setup(2, 5);
    let w = dec.attention_weights(&enc, &hidden, 0.0);
    assert!(w.iter().all(|&x| (x - 0.2).abs() < 1e-6));
}
