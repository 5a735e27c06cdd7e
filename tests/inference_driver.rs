use ante::inference::{run_inference, GreedyDecode, GreedyOutput, BUDGETS};
use ante::{Result, Token};
use std::cell::RefCell;

const TERMINATOR: Token = 9;

/// Emits token 1 everywhere except the terminator at `stop`, if any.
struct Scripted {
    stop: Option<usize>,
    budgets: RefCell<Vec<usize>>,
}

impl Scripted {
    fn new(stop: Option<usize>) -> Self {
        Self {
            stop,
            budgets: RefCell::new(Vec::new()),
        }
    }
}

impl GreedyDecode for Scripted {
    fn decode_greedy(&self, steps: usize, _boost: f32) -> Result<GreedyOutput> {
        self.budgets.borrow_mut().push(steps);
        let hard: Vec<Token> = (0..steps)
            .map(|i| if Some(i) == self.stop { TERMINATOR } else { 1 })
            .collect();
        let mut step = vec![0.0f32; 10];
        step[1] = 50.0;
        Ok(GreedyOutput {
            outputs: vec![step; steps],
            attention: vec![vec![1.0]; steps],
            hard,
        })
    }
}

#[test]
fn terminator_within_first_budget() {
    let dec = Scripted::new(Some(2));
    let t = run_inference(&dec, TERMINATOR, 1.0).unwrap();
    assert!(t.did_cutoff);
    assert_eq!(t.tokens, vec![1, 1]);
    assert_eq!(t.attention.len(), 2);
    assert_eq!(t.outputs.len(), 2);
    assert_eq!(*dec.budgets.borrow(), vec![5]);
}

#[test]
fn terminator_found_after_growing_budget() {
    let dec = Scripted::new(Some(17));
    let t = run_inference(&dec, TERMINATOR, 1.0).unwrap();
    assert!(t.did_cutoff);
    assert_eq!(t.tokens.len(), 17);
    assert_eq!(*dec.budgets.borrow(), vec![5, 10, 20]);
}

#[test]
fn no_terminator_returns_full_budget() {
    let dec = Scripted::new(None);
    let t = run_inference(&dec, TERMINATOR, 1.0).unwrap();
    assert!(!t.did_cutoff);
    assert_eq!(t.tokens.len(), 80);
    assert_eq!(*dec.budgets.borrow(), BUDGETS.to_vec());
    assert!(t.confidence > 0.99);
}

#[test]
fn terminator_first_gives_empty_result() {
    let dec = Scripted::new(Some(0));
    let t = run_inference(&dec, TERMINATOR, 1.0).unwrap();
    assert!(t.did_cutoff);
    assert!(t.tokens.is_empty());
    assert_eq!(t.confidence, 1.0);
}
