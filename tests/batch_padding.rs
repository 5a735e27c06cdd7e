use ante::batch::{build_batch, sample_pair, LengthBudget};
use ante::corpus::{Blob, Corpus, LinkRecord, VariantIndex, write_sentences};
use ante::{AnteError, PairSource, Result, SentencePair, Variant, PAD};
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};

/// Pairs whose source and target lengths are drawn from fixed lists.
struct Lengths {
    source: Vec<usize>,
    target: Vec<usize>,
}

impl PairSource for Lengths {
    fn draw(&self, _variant: Variant, rng: &mut dyn RngCore) -> Result<SentencePair> {
        let i = rng.gen_range(0..self.source.len());
        Ok(SentencePair {
            source: (0..self.source[i] as u32).map(|t| t % 5).collect(),
            target: (0..self.target[i] as u32).map(|t| t % 7).collect(),
        })
    }
}

#[test]
fn batch_is_padded_with_sentinel() {
    let src = Lengths {
        source: vec![9, 8, 10],
        target: vec![8, 11, 9],
    };
    let mut rng = StdRng::seed_from_u64(11);
    let batch = build_batch(&src, 16, Variant::Secondary, Some(12.0), 100, &mut rng).unwrap();
    assert_eq!(batch.source.rows(), 16);
    assert_eq!(batch.target.rows(), 16);
    for r in 0..16 {
        let row = batch.target.row(r);
        assert_eq!(row.len(), batch.target.cols());
        let content = batch.target.content(r).len();
        assert!(row[..content].iter().all(|&t| t != PAD));
        assert!(row[content..].iter().all(|&t| t == PAD));
    }
    let longest = (0..16).map(|r| batch.source.content(r).len()).max().unwrap();
    assert_eq!(batch.source.cols(), longest);
}

#[test]
fn either_side_within_bounds_is_accepted() {
    let src = Lengths {
        source: vec![40],
        target: vec![8],
    };
    let mut rng = StdRng::seed_from_u64(0);
    let pair = sample_pair(&src, Variant::Auxiliary, LengthBudget::fixed(10.0), 5, &mut rng).unwrap();
    assert_eq!(pair.source.len(), 40);
}

#[test]
fn exhausted_sampling_reports_attempts() {
    let src = Lengths {
        source: vec![50],
        target: vec![50],
    };
    let mut rng = StdRng::seed_from_u64(0);
    let err = build_batch(&src, 1, Variant::Secondary, None, 25, &mut rng).unwrap_err();
    assert!(matches!(err, AnteError::SamplingExhausted { attempts: 25 }));
}

#[test]
fn corpus_pairs_end_with_terminators() {
    let (prim, prim_spans) = write_sentences(&[vec![1, 2, 3, 4, 1, 2, 3, 4, 1]]);
    let (aux, aux_spans) = write_sentences(&[vec![5, 6, 5, 6, 5, 6, 5, 6]]);
    let rec = LinkRecord {
        source_offset: prim_spans[0].0,
        source_len: prim_spans[0].1,
        target_offset: aux_spans[0].0,
        target_len: aux_spans[0].1,
    };
    let index = VariantIndex::new(Blob::from(rec.to_le_bytes().to_vec()), aux.into(), 9).unwrap();
    let corpus = Corpus::new(prim.into(), 8).with_variant(Variant::Auxiliary, index);

    let mut rng = StdRng::seed_from_u64(2);
    let batch = build_batch(&corpus, 3, Variant::Auxiliary, Some(12.0), 10, &mut rng).unwrap();
    for r in 0..3 {
        assert_eq!(batch.source.content(r).last(), Some(&8));
        assert_eq!(batch.target.content(r).last(), Some(&9));
    }
    assert!(matches!(
        corpus.draw(Variant::Secondary, &mut rng),
        Err(AnteError::Corpus(_))
    ));
}
