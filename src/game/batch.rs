//! game::batch — shuffled index batches for the joint training loop.
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

/// Iterator over shuffled index batches covering `0..n` exactly once per
/// epoch. The last batch may be short.
pub struct BatchIter {
    order: Vec<usize>,
    batch_size: usize,
    pos: usize,
}

impl BatchIter {
    pub fn new(n: usize, batch_size: usize, rng: &mut StdRng) -> Self {
        let mut order: Vec<usize> = (0..n).collect();
        order.shuffle(rng);
        Self { order, batch_size: batch_size.max(1), pos: 0 }
    }
}

impl Iterator for BatchIter {
    type Item = Vec<usize>;

    fn next(&mut self) -> Option<Vec<usize>> {
        if self.pos >= self.order.len() {
            return None;
        }
        let end = (self.pos + self.batch_size).min(self.order.len());
        let batch = self.order[self.pos..end].to_vec();
        self.pos = end;
        Some(batch)
    }
}
