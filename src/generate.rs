//! Synthetic tables for exercising the reducer.
//!
//! A [`TableGenerator`] owns its random source, so two generators seeded alike produce the same
//! tables regardless of what else the program does with randomness.
//!
//! ```
//! use factorial_cleaner::generate::{SizeCategory, TableGenerator};
//! use rand::rngs::StdRng;
//! use rand::SeedableRng;
//!
//! let mut a = TableGenerator::new(StdRng::seed_from_u64(7));
//! let mut b = TableGenerator::new(StdRng::seed_from_u64(7));
//! assert_eq!(a.generate(SizeCategory::Small), b.generate(SizeCategory::Small));
//! ```

use crate::{LevelSets, Row, Table};
use rand::seq::index::sample;
use rand::Rng;
use std::collections::{BTreeSet, HashSet};

/// How large a generated table should be.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SizeCategory {
    /// 2 to 3 factors with at most 3 to 6 levels each.
    Small,
    /// 3 to 4 factors with at most 6 to 10 levels each.
    Medium,
    /// 2 to 4 factors with at most 8 to 12 levels each.
    Large,
}

impl SizeCategory {
    /// Maps 1, 2 and 3 to small, medium and large.
    pub fn from_number(number: u8) -> Option<Self> {
        match number {
            1 => Some(SizeCategory::Small),
            2 => Some(SizeCategory::Medium),
            3 => Some(SizeCategory::Large),
            _ => None,
        }
    }
}

/// A complete design and a copy of it with some rows knocked out.
#[derive(Clone, Debug, PartialEq)]
pub struct GeneratedTables {
    /// One row for every combination of the generated levels.
    pub full: Table<i64>,
    /// A subset of `full`, in the same order.
    pub reduced: Table<i64>,
}

/// Generates random factorial tables with level codes in 1..=100 and responses in 0..100.
#[derive(Clone, Debug)]
pub struct TableGenerator<R: Rng> {
    rng: R,
}

impl<R: Rng> TableGenerator<R> {
    /// Creates a generator drawing from `rng`.
    pub fn new(rng: R) -> Self {
        TableGenerator { rng }
    }

    /// Picks a factor count and a per-factor level limit for the given size.
    pub fn shape(&mut self, size: SizeCategory) -> (usize, usize) {
        match size {
            SizeCategory::Small => (self.rng.gen_range(2..4), self.rng.gen_range(3..7)),
            SizeCategory::Medium => (self.rng.gen_range(3..5), self.rng.gen_range(6..11)),
            SizeCategory::Large => (self.rng.gen_range(2..5), self.rng.gen_range(8..13)),
        }
    }

    /// Draws between one and `max_levels` level codes. Repeated draws collapse, so the set may
    /// come out smaller.
    pub fn random_levels(&mut self, max_levels: usize) -> BTreeSet<i64> {
        let count = self.rng.gen_range(1..=max_levels.max(1));
        let rng = &mut self.rng;
        (0..count).map(|_| rng.gen_range(1..=100i64)).collect()
    }

    /// One row per combination of `levels`, each with a random response.
    pub fn full_table(&mut self, levels: &LevelSets<i64>) -> Table<i64> {
        let skeleton = levels.skeleton();
        let mut table = Table::with_capacity(levels.factor_count(), skeleton.len());
        for combination in skeleton.iter() {
            let response = self.rng.gen_range(0..100i64);
            table.push_row(Row::from_combination(combination.clone(), response));
        }
        table
    }

    /// A copy of `table` without `amount` rows chosen uniformly at random.
    pub fn remove_rows(&mut self, table: &Table<i64>, amount: usize) -> Table<i64> {
        let amount = amount.min(table.len());
        let removed: HashSet<usize> = sample(&mut self.rng, table.len(), amount)
            .into_iter()
            .collect();

        let mut reduced = Table::with_capacity(table.factor_count(), table.len() - amount);
        for (position, row) in table.iter().enumerate() {
            if !removed.contains(&position) {
                reduced.push_row(row.clone());
            }
        }
        reduced
    }

    /// Generates a full design of the given size, then removes between a fifth (less one) and a
    /// half of its rows.
    pub fn generate(&mut self, size: SizeCategory) -> GeneratedTables {
        let (factor_count, max_levels) = self.shape(size);
        let levels: LevelSets<i64> = (0..factor_count)
            .map(|_| self.random_levels(max_levels))
            .collect();
        let full = self.full_table(&levels);

        let rows = full.len() as f64;
        let fewest = ((rows * 0.2) as usize).saturating_sub(1);
        let most = (rows * 0.5) as usize;
        let amount = self.rng.gen_range(fewest..=most.max(fewest));
        let reduced = self.remove_rows(&full, amount);

        GeneratedTables { full, reduced }
    }
}
