#![warn(missing_docs)]
#![doc(test(no_crate_inject))]
#![doc(test(attr(deny(unused, future_incompatible))))]

//! This crate prepares observational data for a factorial analysis of variance by reducing it to
//! a complete factorial design.
//!
//! A table is a collection of [`Row`]s, each holding one level code per categorical factor plus an
//! integer response. The table is *full* when every combination of the observed factor levels
//! (the [`Skeleton`]) occurs at least once. Rows can only be removed, never invented, so a
//! [`Reducer`] searches for whole level-groups whose removal closes the gap between the table and
//! its skeleton while keeping the [`loss`] of response information small.
//!
//! No statistics are computed on the cleaned result. The goal is only a structurally complete
//! design, checked by presence or absence of each combination.
//!
//! ```
//! use factorial_cleaner::{clean, Table};
//!
//! let mut table = Table::new(2);
//! table
//!     .add_row(&[1, 1], 10)?
//!     .add_row(&[1, 2], 20)?
//!     .add_row(&[2, 1], 30)?
//!     .add_row(&[2, 2], 40)?
//!     .add_row(&[2, 2], 45)?;
//!
//! let cleaned = clean(&table, 2)?;
//! assert!(cleaned.full);
//! assert_eq!(cleaned.duplicates_removed, 1);
//! assert_eq!(cleaned.table.len(), 4);
//! # Ok::<(), factorial_cleaner::Error>(())
//! ```

use smallvec::SmallVec;
use sorted_iter::assume::AssumeSortedByItemExt;
use sorted_iter::SortedIterator;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use std::iter;
use thiserror::Error;

pub mod generate;
mod reduce;
pub mod scenario;

pub use reduce::{
    clean, CleanedTable, ReductionConfig, Reducer, SkeletonPolicy, Step, Termination,
};

/// Errors raised when a table or configuration is structurally invalid.
///
/// Failing to reach a full design is not an error; see [`Termination`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// A row does not carry exactly one level per declared factor.
    #[error("row {row} has {found} factor levels but the table declares {expected} factors")]
    InvalidArity {
        /// Position the row has, or would have had, in the table.
        row: usize,
        /// The table's declared factor count.
        expected: usize,
        /// Number of levels the row actually carries.
        found: usize,
    },

    /// Declared level sets describe a different number of factors than the table.
    #[error("level sets describe {found} factors but the table declares {expected}")]
    LevelSetMismatch {
        /// The table's declared factor count.
        expected: usize,
        /// Number of level sets supplied.
        found: usize,
    },

    /// A [`ReductionConfig`] value is out of range.
    #[error("invalid reduction config: {message}")]
    InvalidConfig {
        /// Description of what is invalid.
        message: String,
    },
}

/// Result alias for this crate's [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Types which can be used as factor-level codes.
pub trait Level: Sized + Copy + std::hash::Hash + Ord + fmt::Debug {
    /// SmallVec contains two `usize` fields which overlap with the inline vector, so combinations
    /// will have minimum size if this array occupies the same number of bytes.
    ///
    /// It can be declared like this for any implementation, or you can have the [`level_type!`]
    /// macro do it for you.
    ///
    /// ```ignore
    /// use std::mem::size_of;
    /// type SmallArray = [Self; 2 * size_of::<usize>() / size_of::<Self>()];
    /// ```
    type SmallArray: smallvec::Array<Item = Self> + Clone + fmt::Debug + std::hash::Hash + Ord;
}

/// Generates implementations of the [`Level`] trait which set the associated `SmallArray` type to
/// the biggest array that will fit within a [`SmallVec`][smallvec::SmallVec]'s minimum size.
///
/// It also generates a test with the given `$testname` that checks that the generated definition
/// is as small as the smallest `SmallVec`.
///
/// ```ignore
/// level_type![unsigned_level_size, u8, u16, u32, u64, usize];
/// ```
#[macro_export]
macro_rules! level_type {
    ($testname:ident, $($t:ty),*) => {
        $(
            impl $crate::Level for $t {
                type SmallArray = [
                    Self;
                    2 * ::std::mem::size_of::<usize>() / ::std::mem::size_of::<Self>()
                ];
            }
        )*

        #[cfg(test)]
        #[test]
        fn $testname() {
            use $crate::Combination;
            use smallvec::SmallVec;
            use std::mem::size_of;
            $(
                assert_eq!(
                    size_of::<Combination<$t>>(),
                    size_of::<SmallVec<[(); 0]>>()
                );
            )*
        }
    };
}

level_type![unsigned_level_size, u8, u16, u32, u64, usize];
level_type![signed_level_size, i8, i16, i32, i64, isize];

/// One level per factor, in factor order: the factor-only projection of a [`Row`].
///
/// Unlike a set, a combination keeps its levels in the order the factors were declared and may
/// repeat a value across factors. Combinations compare lexicographically.
#[derive(Clone, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Combination<L: Level>(SmallVec<L::SmallArray>);

impl<L: Level> Combination<L> {
    /// Creates a combination from levels given in factor order.
    pub fn new(levels: &[L]) -> Self {
        Combination(SmallVec::from_slice(levels))
    }

    /// The number of factors in the combination.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` for the combination of zero factors.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The level of the given factor, if the combination has that many factors.
    ///
    /// ```
    /// use factorial_cleaner::Combination;
    ///
    /// let c = Combination::new(&[3, 1]);
    /// assert_eq!(c.get(0), Some(3));
    /// assert_eq!(c.get(1), Some(1));
    /// assert_eq!(c.get(2), None);
    /// ```
    pub fn get(&self, factor: usize) -> Option<L> {
        self.0.get(factor).copied()
    }

    /// Returns an iterator over the levels in factor order.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = L> + ExactSizeIterator + Clone + '_ {
        self.0.iter().copied()
    }

    /// The levels as a slice, in factor order.
    pub fn as_slice(&self) -> &[L] {
        &self.0
    }

    fn extended(&self, level: L) -> Self {
        let mut levels = SmallVec::with_capacity(self.len() + 1);
        levels.extend_from_slice(&self.0);
        levels.push(level);
        Combination(levels)
    }
}

impl<L: Level> fmt::Debug for Combination<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tuple = f.debug_tuple("");
        for level in self.0.iter() {
            tuple.field(level);
        }
        tuple.finish()
    }
}

impl<L: Level> iter::FromIterator<L> for Combination<L> {
    fn from_iter<I: IntoIterator<Item = L>>(iter: I) -> Self {
        Combination(SmallVec::from_iter(iter))
    }
}

/// An observation: one level per factor followed by an integer response.
///
/// Rows compare equal only when the levels and the response all match. Completeness only looks
/// at the [`Combination`] of levels.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Row<L: Level> {
    levels: Combination<L>,
    response: i64,
}

impl<L: Level> Row<L> {
    /// Creates a row from its factor levels and response.
    pub fn new(levels: &[L], response: i64) -> Self {
        Row {
            levels: Combination::new(levels),
            response,
        }
    }

    /// Creates a row whose levels are the given combination.
    pub fn from_combination(levels: Combination<L>, response: i64) -> Self {
        Row { levels, response }
    }

    /// The factor-only projection of this row.
    pub fn combination(&self) -> &Combination<L> {
        &self.levels
    }

    /// The row's response value.
    pub fn response(&self) -> i64 {
        self.response
    }

    /// The number of factor levels in this row.
    pub fn arity(&self) -> usize {
        self.levels.len()
    }

    /// The level this row holds for `factor`.
    ///
    /// # Panics
    ///
    /// Panics if `factor` is not less than the row's arity.
    pub fn level(&self, factor: usize) -> L {
        self.levels.0[factor]
    }
}

impl<L: Level + fmt::Display> fmt::Display for Row<L> {
    /// Formats the row as tab-separated fields, response last.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for level in self.levels.0.iter() {
            write!(f, "{}\t", level)?;
        }
        write!(f, "{}", self.response)
    }
}

/// An ordered collection of [`Row`]s which all have the same number of factors.
///
/// Tables only ever shrink by whole rows; the reduction algorithm never edits a row in place.
#[derive(Clone, Debug, PartialEq)]
pub struct Table<L: Level> {
    factor_count: usize,
    rows: Vec<Row<L>>,
}

impl<L: Level> Table<L> {
    /// Creates an empty table for rows with `factor_count` factors.
    pub fn new(factor_count: usize) -> Self {
        Table {
            factor_count,
            rows: Vec::new(),
        }
    }

    /// Creates an empty table with room for at least `capacity` rows.
    pub fn with_capacity(factor_count: usize, capacity: usize) -> Self {
        Table {
            factor_count,
            rows: Vec::with_capacity(capacity),
        }
    }

    /// Collects rows into a table, rejecting the first row with the wrong arity.
    pub fn from_rows<I: IntoIterator<Item = Row<L>>>(factor_count: usize, rows: I) -> Result<Self> {
        let mut table = Table::new(factor_count);
        for row in rows {
            table.push(row)?;
        }
        Ok(table)
    }

    /// The number of factors every row carries.
    pub fn factor_count(&self) -> usize {
        self.factor_count
    }

    /// The number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns `true` if the table has no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// The rows in their current order.
    pub fn rows(&self) -> &[Row<L>] {
        &self.rows
    }

    /// Returns an iterator over the rows.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Row<L>> + ExactSizeIterator + '_ {
        self.rows.iter()
    }

    /// Returns an iterator over the responses, in row order.
    pub fn responses(&self) -> impl Iterator<Item = i64> + '_ {
        self.rows.iter().map(Row::response)
    }

    /// Appends a row.
    ///
    /// ```
    /// use factorial_cleaner::{Error, Row, Table};
    ///
    /// let mut table = Table::new(2);
    /// assert!(table.push(Row::new(&[1, 2], 7)).is_ok());
    /// assert_eq!(
    ///     table.push(Row::new(&[1, 2, 3], 7)),
    ///     Err(Error::InvalidArity { row: 1, expected: 2, found: 3 })
    /// );
    /// ```
    pub fn push(&mut self, row: Row<L>) -> Result<&mut Self> {
        if row.arity() != self.factor_count {
            return Err(Error::InvalidArity {
                row: self.rows.len(),
                expected: self.factor_count,
                found: row.arity(),
            });
        }
        self.push_row(row);
        Ok(self)
    }

    /// Appends a row built from the given levels and response.
    pub fn add_row(&mut self, levels: &[L], response: i64) -> Result<&mut Self> {
        self.push(Row::new(levels, response))
    }

    // Callers guarantee the arity.
    fn push_row(&mut self, row: Row<L>) {
        debug_assert_eq!(row.arity(), self.factor_count);
        self.rows.push(row);
    }

    /// Returns `true` if the table contains this exact row, response included.
    pub fn contains(&self, row: &Row<L>) -> bool {
        self.rows.contains(row)
    }

    /// Removes every row whose combination already appeared earlier in the table, keeping the
    /// first-seen row for each combination. Returns the number of rows removed.
    ///
    /// ```
    /// use factorial_cleaner::{Row, Table};
    ///
    /// let mut table = Table::new(1);
    /// table.add_row(&[1], 5)?.add_row(&[1], 95)?.add_row(&[2], 50)?;
    ///
    /// assert_eq!(table.dedup(), 1);
    /// assert_eq!(table.rows(), &[Row::new(&[1], 5), Row::new(&[2], 50)]);
    /// # Ok::<(), factorial_cleaner::Error>(())
    /// ```
    pub fn dedup(&mut self) -> usize {
        let before = self.rows.len();
        let mut seen = HashSet::with_capacity(before);
        self.rows.retain(|row| seen.insert(row.levels.clone()));
        before - self.rows.len()
    }

    /// Returns `true` if no two rows share a combination.
    pub fn is_deduplicated(&self) -> bool {
        let mut seen = HashSet::with_capacity(self.rows.len());
        self.rows.iter().all(|row| seen.insert(&row.levels))
    }

    /// The distinct combinations present in the table.
    pub fn combinations(&self) -> BTreeSet<Combination<L>> {
        self.rows.iter().map(|row| row.levels.clone()).collect()
    }

    /// The set of levels each factor takes somewhere in the table.
    ///
    /// ```
    /// use factorial_cleaner::Table;
    ///
    /// let mut table = Table::new(2);
    /// table.add_row(&[3, 1], 0)?.add_row(&[1, 1], 0)?.add_row(&[3, 2], 0)?;
    ///
    /// let levels = table.level_sets();
    /// assert_eq!(levels.get(0).unwrap().iter().collect::<Vec<_>>(), vec![&1, &3]);
    /// assert_eq!(levels.get(1).unwrap().iter().collect::<Vec<_>>(), vec![&1, &2]);
    /// # Ok::<(), factorial_cleaner::Error>(())
    /// ```
    pub fn level_sets(&self) -> LevelSets<L> {
        let mut sets = vec![BTreeSet::new(); self.factor_count];
        for row in self.rows.iter() {
            for (set, level) in sets.iter_mut().zip(row.levels.iter()) {
                set.insert(level);
            }
        }
        LevelSets(sets)
    }

    /// Returns a copy of this table without any row that holds `level` for `factor`.
    pub fn without_level(&self, factor: usize, level: L) -> Table<L> {
        Table {
            factor_count: self.factor_count,
            rows: self
                .rows
                .iter()
                .filter(|row| row.level(factor) != level)
                .cloned()
                .collect(),
        }
    }

    /// Shrinks the capacity of the table as much as possible.
    pub fn shrink_to_fit(&mut self) {
        self.rows.shrink_to_fit();
    }
}

impl<L: Level + fmt::Display> fmt::Display for Table<L> {
    /// Formats the table as tab-separated lines, one per row, without a header.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for row in self.rows.iter() {
            writeln!(f, "{}", row)?;
        }
        Ok(())
    }
}

/// For each factor, in factor order, a set of levels.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LevelSets<L: Level>(Vec<BTreeSet<L>>);

impl<L: Level> LevelSets<L> {
    /// Creates level sets from one set per factor.
    pub fn new(sets: Vec<BTreeSet<L>>) -> Self {
        LevelSets(sets)
    }

    /// The number of factors.
    pub fn factor_count(&self) -> usize {
        self.0.len()
    }

    /// The levels of the given factor.
    pub fn get(&self, factor: usize) -> Option<&BTreeSet<L>> {
        self.0.get(factor)
    }

    /// Returns an iterator over the per-factor sets in factor order.
    pub fn iter(&self) -> impl ExactSizeIterator<Item = &BTreeSet<L>> + '_ {
        self.0.iter()
    }

    /// The number of combinations the full design over these levels has.
    pub fn combination_count(&self) -> usize {
        if self.0.is_empty() {
            0
        } else {
            self.0.iter().map(BTreeSet::len).product()
        }
    }

    /// Builds the full design over these levels. See [`Skeleton::cartesian`].
    pub fn skeleton(&self) -> Skeleton<L> {
        Skeleton::cartesian(self)
    }

    /// Every `(factor, level)` in `self` that `other` lacks, ordered by factor then level.
    ///
    /// ```
    /// use factorial_cleaner::Table;
    ///
    /// let mut before = Table::new(2);
    /// before.add_row(&[1, 1], 0)?.add_row(&[2, 2], 0)?.add_row(&[3, 1], 0)?;
    /// let after = before.without_level(0, 3);
    ///
    /// assert_eq!(before.level_sets().difference(&after.level_sets()), vec![(0, 3)]);
    /// # Ok::<(), factorial_cleaner::Error>(())
    /// ```
    pub fn difference(&self, other: &Self) -> Vec<(usize, L)> {
        let empty = BTreeSet::new();
        let mut result = Vec::new();
        for (factor, set) in self.0.iter().enumerate() {
            let theirs = other.0.get(factor).unwrap_or(&empty);
            result.extend(
                set.iter()
                    .assume_sorted_by_item()
                    .difference(theirs.iter().assume_sorted_by_item())
                    .map(|level| (factor, *level)),
            );
        }
        result
    }
}

impl<L: Level> iter::FromIterator<BTreeSet<L>> for LevelSets<L> {
    fn from_iter<I: IntoIterator<Item = BTreeSet<L>>>(iter: I) -> Self {
        LevelSets(iter.into_iter().collect())
    }
}

/// The full factorial design over some level sets: every combination that a full table must
/// contain.
///
/// Combinations are kept sorted and unique, so membership tests and set differences against a
/// table are linear merges.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Skeleton<L: Level> {
    combinations: Vec<Combination<L>>,
}

impl<L: Level> Skeleton<L> {
    /// Enumerates every combination formed by choosing one level from each set, with factors in
    /// the order given.
    ///
    /// With no factors, or with any factor that has no levels, there are no combinations.
    ///
    /// ```
    /// use factorial_cleaner::{Combination, LevelSets, Skeleton};
    ///
    /// let levels: LevelSets<u8> = LevelSets::new(vec![
    ///     [1, 2, 3].iter().copied().collect(),
    ///     [1, 2].iter().copied().collect(),
    /// ]);
    ///
    /// let skeleton = Skeleton::cartesian(&levels);
    /// assert_eq!(skeleton.len(), 6);
    /// assert!(skeleton.contains(&Combination::new(&[3, 2])));
    /// assert!(!skeleton.contains(&Combination::new(&[2, 3])));
    ///
    /// assert!(Skeleton::<u8>::cartesian(&LevelSets::new(vec![])).is_empty());
    /// ```
    pub fn cartesian(levels: &LevelSets<L>) -> Skeleton<L> {
        if levels.0.is_empty() {
            return Skeleton {
                combinations: Vec::new(),
            };
        }

        // Both the prefixes and each level set are in ascending order, so extending every prefix
        // with every level in turn yields the product already sorted.
        let mut combinations = vec![Combination::new(&[])];
        for set in levels.0.iter() {
            let mut next = Vec::with_capacity(combinations.len() * set.len());
            for prefix in combinations.iter() {
                next.extend(set.iter().map(|level| prefix.extended(*level)));
            }
            combinations = next;
        }
        Skeleton { combinations }
    }

    /// The number of combinations in the design.
    pub fn len(&self) -> usize {
        self.combinations.len()
    }

    /// Returns `true` if the design has no combinations.
    pub fn is_empty(&self) -> bool {
        self.combinations.is_empty()
    }

    /// Returns `true` if the design includes this combination.
    pub fn contains(&self, combination: &Combination<L>) -> bool {
        self.combinations.binary_search(combination).is_ok()
    }

    /// Returns an iterator over the combinations in ascending order.
    pub fn iter(&self) -> impl ExactSizeIterator<Item = &Combination<L>> + Clone + '_ {
        self.combinations.iter()
    }
}

/// Returns `true` if every combination of the skeleton occurs in the table.
///
/// An empty table is never full, even against an empty skeleton.
///
/// ```
/// use factorial_cleaner::{is_full, Table};
///
/// let mut table = Table::new(2);
/// table.add_row(&[1, 1], 0)?.add_row(&[1, 2], 0)?.add_row(&[2, 1], 0)?;
/// let skeleton = table.level_sets().skeleton();
/// assert!(!is_full(&table, &skeleton));
///
/// table.add_row(&[2, 2], 0)?;
/// assert!(is_full(&table, &skeleton));
///
/// assert!(!is_full(&Table::new(2), &skeleton));
/// # Ok::<(), factorial_cleaner::Error>(())
/// ```
pub fn is_full<L: Level>(table: &Table<L>, skeleton: &Skeleton<L>) -> bool {
    !table.is_empty() && missing_count(table, skeleton) == 0
}

/// The combinations of the skeleton that do not occur in the table.
///
/// ```
/// use factorial_cleaner::{missing_combinations, Combination, Table};
///
/// let mut table = Table::new(2);
/// table
///     .add_row(&[1, 1], 10)?
///     .add_row(&[1, 2], 20)?
///     .add_row(&[2, 1], 30)?
///     .add_row(&[2, 2], 40)?
///     .add_row(&[3, 1], 50)?;
///
/// let missing = missing_combinations(&table, &table.level_sets().skeleton());
/// assert_eq!(missing.into_iter().collect::<Vec<_>>(), vec![Combination::new(&[3, 2])]);
/// # Ok::<(), factorial_cleaner::Error>(())
/// ```
pub fn missing_combinations<L: Level>(
    table: &Table<L>,
    skeleton: &Skeleton<L>,
) -> BTreeSet<Combination<L>> {
    let present = present_combinations(table);
    skeleton
        .iter()
        .assume_sorted_by_item()
        .difference(present.iter().copied().assume_sorted_by_item())
        .cloned()
        .collect()
}

/// The number of combinations [`missing_combinations`] would return, without collecting them.
pub fn missing_count<L: Level>(table: &Table<L>, skeleton: &Skeleton<L>) -> usize {
    let present = present_combinations(table);
    let covered = skeleton
        .iter()
        .assume_sorted_by_item()
        .intersection(present.iter().copied().assume_sorted_by_item())
        .count();
    skeleton.len() - covered
}

fn present_combinations<L: Level>(table: &Table<L>) -> BTreeSet<&Combination<L>> {
    table.rows.iter().map(|row| &row.levels).collect()
}

/// For every factor, how many rows currently hold each level.
///
/// The reduction engine builds this once per run and then decrements it for each removed row
/// instead of recounting the whole table. Levels whose count drops to zero are forgotten.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FrequencyIndex<L: Level> {
    counts: Vec<BTreeMap<L, usize>>,
}

impl<L: Level> FrequencyIndex<L> {
    /// Counts the levels of every factor across the table.
    pub fn new(table: &Table<L>) -> Self {
        let mut counts = vec![BTreeMap::new(); table.factor_count];
        for row in table.rows.iter() {
            for (levels, level) in counts.iter_mut().zip(row.levels.iter()) {
                *levels.entry(level).or_insert(0) += 1;
            }
        }
        FrequencyIndex { counts }
    }

    /// The number of factors indexed.
    pub fn factor_count(&self) -> usize {
        self.counts.len()
    }

    /// How many rows hold `level` for `factor`.
    pub fn count(&self, factor: usize, level: L) -> usize {
        self.counts
            .get(factor)
            .and_then(|levels| levels.get(&level))
            .copied()
            .unwrap_or(0)
    }

    /// The levels of `factor` held by the fewest rows, in ascending order of level.
    ///
    /// ```
    /// use factorial_cleaner::{FrequencyIndex, Table};
    ///
    /// let mut table = Table::new(1);
    /// table.add_row(&[4], 0)?.add_row(&[2], 0)?.add_row(&[3], 0)?.add_row(&[3], 0)?;
    ///
    /// let index = FrequencyIndex::new(&table);
    /// assert_eq!(index.rarest_levels(0), vec![2, 4]);
    /// assert_eq!(index.rarest_levels(1), Vec::<i32>::new());
    /// # Ok::<(), factorial_cleaner::Error>(())
    /// ```
    pub fn rarest_levels(&self, factor: usize) -> Vec<L> {
        let levels = match self.counts.get(factor) {
            Some(levels) => levels,
            None => return Vec::new(),
        };
        let fewest = match levels.values().copied().min() {
            Some(fewest) => fewest,
            None => return Vec::new(),
        };
        levels
            .iter()
            .filter(|(_, count)| **count == fewest)
            .map(|(level, _)| *level)
            .collect()
    }

    /// Accounts for one row leaving the table.
    pub fn remove_row(&mut self, row: &Row<L>) {
        for (levels, level) in self.counts.iter_mut().zip(row.levels.iter()) {
            if let Some(count) = levels.get_mut(&level) {
                *count -= 1;
                if *count == 0 {
                    levels.remove(&level);
                }
            }
        }
    }

    /// The levels that still have at least one row, per factor.
    pub fn level_sets(&self) -> LevelSets<L> {
        self.counts
            .iter()
            .map(|levels| levels.keys().copied().collect::<BTreeSet<_>>())
            .collect()
    }
}

/// The information destroyed by shrinking `before` into `after`: the sum of squared deviations,
/// from the mean response of `before`, of every response whose row is in `before` but not in
/// `after`.
///
/// Rows far from the mean say more about the factors' effects than rows near it, so removing them
/// costs more. Tables of zero or one row have no meaningful deviation, and so no loss.
///
/// ```
/// use factorial_cleaner::{loss, Table};
///
/// let mut before = Table::new(1);
/// before.add_row(&[1], 10)?.add_row(&[2], 20)?.add_row(&[3], 60)?;
///
/// // The mean is 30, so dropping the 60 costs 30 squared.
/// assert_eq!(loss(&before, &before.without_level(0, 3)), 900.0);
/// assert_eq!(loss(&before, &before), 0.0);
/// # Ok::<(), factorial_cleaner::Error>(())
/// ```
pub fn loss<L: Level>(before: &Table<L>, after: &Table<L>) -> f64 {
    use statrs::statistics::Statistics;

    if before.len() <= 1 {
        return 0.0;
    }
    let mean = before.responses().map(|r| r as f64).mean();

    let mut kept: HashMap<&Row<L>, usize> = HashMap::with_capacity(after.len());
    for row in after.rows.iter() {
        *kept.entry(row).or_insert(0) += 1;
    }

    let mut total = 0.0;
    for row in before.rows.iter() {
        match kept.get_mut(row) {
            Some(count) if *count > 0 => *count -= 1,
            _ => total += (row.response as f64 - mean).powi(2),
        }
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(rows: &[(&[i64], i64)]) -> Table<i64> {
        let factors = rows.first().map_or(0, |(levels, _)| levels.len());
        Table::from_rows(
            factors,
            rows.iter().map(|(levels, response)| Row::new(levels, *response)),
        )
        .unwrap()
    }

    #[test]
    fn cartesian_has_no_duplicates_and_follows_factor_order() {
        let levels = LevelSets::new(vec![
            [2, 1].iter().copied().collect(),
            [5].iter().copied().collect(),
            [7, 6].iter().copied().collect(),
        ]);
        let skeleton = levels.skeleton();
        let all: Vec<_> = skeleton.iter().map(|c| c.as_slice().to_vec()).collect();
        assert_eq!(
            all,
            vec![
                vec![1, 5, 6],
                vec![1, 5, 7],
                vec![2, 5, 6],
                vec![2, 5, 7]
            ]
        );
        assert_eq!(skeleton.len(), levels.combination_count());
    }

    #[test]
    fn cartesian_with_an_empty_factor_is_empty() {
        let levels: LevelSets<i64> =
            LevelSets::new(vec![[1, 2].iter().copied().collect(), BTreeSet::new()]);
        assert!(levels.skeleton().is_empty());
        assert_eq!(levels.combination_count(), 0);
    }

    #[test]
    fn missing_count_ignores_rows_outside_the_skeleton() {
        let t = table(&[(&[1, 1], 0), (&[9, 9], 0)]);
        let skeleton = LevelSets::new(vec![
            [1, 2].iter().copied().collect(),
            [1].iter().copied().collect(),
        ])
        .skeleton();
        assert_eq!(missing_count(&t, &skeleton), 1);
        assert_eq!(
            missing_combinations(&t, &skeleton),
            [Combination::new(&[2, 1])].iter().cloned().collect::<BTreeSet<_>>()
        );
    }

    #[test]
    fn frequency_index_forgets_exhausted_levels() {
        let t = table(&[(&[1, 1], 0), (&[1, 2], 0), (&[2, 2], 0)]);
        let mut index = FrequencyIndex::new(&t);
        assert_eq!(index.count(0, 1), 2);
        assert_eq!(index.rarest_levels(1), vec![1]);

        index.remove_row(&t.rows()[0]);
        assert_eq!(index.count(0, 1), 1);
        assert_eq!(index.count(1, 1), 0);
        assert_eq!(index.rarest_levels(0), vec![1, 2]);
        assert_eq!(index.rarest_levels(1), vec![2]);
        assert_eq!(
            index.level_sets(),
            LevelSets::new(vec![
                [1, 2].iter().copied().collect(),
                [2].iter().copied().collect(),
            ])
        );
    }

    #[test]
    fn frequency_index_matches_a_rebuild_after_removal() {
        let t = table(&[(&[1, 1], 0), (&[1, 2], 0), (&[2, 1], 0), (&[3, 2], 0)]);
        let mut index = FrequencyIndex::new(&t);
        let reduced = t.without_level(1, 2);
        for row in t.iter().filter(|row| row.level(1) == 2) {
            index.remove_row(row);
        }
        assert_eq!(index, FrequencyIndex::new(&reduced));
    }

    #[test]
    fn loss_counts_duplicate_rows_once_each() {
        let before = table(&[(&[1], 0), (&[1], 0), (&[2], 30)]);
        let after = table(&[(&[1], 0), (&[2], 30)]);
        // Mean is 10; the one dropped zero deviates by 10.
        assert_eq!(loss(&before, &after), 100.0);
    }

    #[test]
    fn loss_of_a_single_row_is_zero() {
        let before = table(&[(&[1], 1000)]);
        assert_eq!(loss(&before, &Table::new(1)), 0.0);
    }

    #[test]
    fn dedup_keeps_order_of_first_occurrences() {
        let mut t = table(&[(&[2], 1), (&[1], 2), (&[2], 3), (&[1], 4), (&[3], 5)]);
        assert!(!t.is_deduplicated());
        assert_eq!(t.dedup(), 2);
        assert!(t.is_deduplicated());
        assert_eq!(t.responses().collect::<Vec<_>>(), vec![1, 2, 5]);
    }

    #[test]
    fn rows_format_as_tab_separated_fields() {
        let t = table(&[(&[1, 2], 30), (&[3, 4], -5)]);
        assert_eq!(t.to_string(), "1\t2\t30\n3\t4\t-5\n");
        assert_eq!(format!("{:?}", t.rows()[0].combination()), "(1, 2)");
    }
}
