use alloc::vec::Vec;

/// A lazy, bounded enumerator of position fillings.
///
/// Every yielded sequence has exactly one symbol per position, drawn from that
/// position's choice list, and contains every `required` symbol at least once.
/// Sequences come out in lexicographic order of choice indices.
///
/// ## Bounded Exploration
/// The walk is a depth-first search over an explicit index stack rather than
/// nested loops. A prefix is abandoned as soon as the number of still-missing
/// required symbols exceeds the positions left to fill, so almost every step
/// makes progress towards a yield. `step_budget` caps the total number of
/// placement attempts; once it is spent the enumerator reports itself
/// `starved` and stops, which guarantees termination for any input.
#[derive(Clone, Debug)]
pub struct Placements<T> {
    choices: Vec<Vec<T>>,
    required: Vec<T>,
    /// Choice index per filled position.
    path: Vec<usize>,
    /// Occurrences of each required symbol in `path`, parallel to `required`.
    counts: Vec<usize>,
    missing: usize,
    steps: usize,
    step_budget: usize,
    started: bool,
    done: bool,
    starved: bool,
}

impl<T: Clone + Ord> Placements<T> {
    pub fn new(choices: Vec<Vec<T>>, mut required: Vec<T>, step_budget: usize) -> Self {
        required.sort();
        required.dedup();
        let missing = required.len();
        let counts = alloc::vec![0; required.len()];
        Self {
            path: Vec::with_capacity(choices.len()),
            choices,
            required,
            counts,
            missing,
            steps: 0,
            step_budget,
            started: false,
            done: false,
            starved: false,
        }
    }

    /// Number of positions in every yielded sequence.
    pub fn positions(&self) -> usize {
        self.choices.len()
    }

    /// Placement attempts spent so far.
    pub fn steps(&self) -> usize {
        self.steps
    }

    /// True once the step budget ran out before the search space did.
    pub fn is_starved(&self) -> bool {
        self.starved
    }

    /// Rewinds to the first sequence, restoring the full step budget.
    pub fn restart(&mut self) {
        self.path.clear();
        self.counts.iter_mut().for_each(|c| *c = 0);
        self.missing = self.required.len();
        self.steps = 0;
        self.started = false;
        self.done = false;
        self.starved = false;
    }

    fn push(&mut self, idx: usize) {
        let pos = self.path.len();
        self.path.push(idx);
        if let Ok(r) = self.required.binary_search(&self.choices[pos][idx]) {
            self.counts[r] += 1;
            if self.counts[r] == 1 {
                self.missing -= 1;
            }
        }
    }

    fn pop(&mut self) -> Option<usize> {
        let idx = self.path.pop()?;
        let pos = self.path.len();
        if let Ok(r) = self.required.binary_search(&self.choices[pos][idx]) {
            self.counts[r] -= 1;
            if self.counts[r] == 0 {
                self.missing += 1;
            }
        }
        Some(idx)
    }

    fn materialize(&self) -> Vec<T> {
        self.path
            .iter()
            .enumerate()
            .map(|(pos, &idx)| self.choices[pos][idx].clone())
            .collect()
    }
}

impl<T: Clone + Ord> Iterator for Placements<T> {
    type Item = Vec<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        if self.choices.is_empty() {
            self.done = true;
            return (self.missing == 0).then(Vec::new);
        }

        let mut start = if self.started {
            match self.pop() {
                Some(idx) => idx + 1,
                None => {
                    self.done = true;
                    return None;
                }
            }
        } else {
            self.started = true;
            0
        };

        loop {
            let pos = self.path.len();
            let mut placed = false;

            while start < self.choices[pos].len() {
                if self.steps >= self.step_budget {
                    self.done = true;
                    self.starved = true;
                    return None;
                }
                self.steps += 1;
                self.push(start);

                let remaining = self.choices.len() - self.path.len();
                if self.missing <= remaining {
                    placed = true;
                    break;
                }
                self.pop();
                start += 1;
            }

            if placed {
                if self.path.len() == self.choices.len() {
                    return Some(self.materialize());
                }
                start = 0;
            } else {
                match self.pop() {
                    Some(idx) => start = idx + 1,
                    None => {
                        self.done = true;
                        return None;
                    }
                }
            }
        }
    }
}

static_assertions::assert_impl_all!(Placements<u32>: Send, Sync, Clone);
