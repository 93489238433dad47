//! The completion-driven reduction engine.

use crate::{
    missing_combinations, missing_count, Combination, Error, FrequencyIndex, Level, LevelSets,
    Result, Skeleton, Table,
};
use log::{debug, info, warn};
use std::cmp::Ordering;
use std::collections::BTreeSet;

/// Which combinations a table has to contain to count as full while it is being reduced.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SkeletonPolicy {
    /// The design is the product of the levels observed before reduction starts, and never
    /// changes. Removing rows can only uncover more gaps in a fixed design, so an incomplete table
    /// stays incomplete and the engine stops without removing anything.
    Fixed,

    /// After every accepted removal, the design is rebuilt from the levels that still have rows.
    /// Dropping every row of a rare level also drops that level's combinations from the design,
    /// which is how removal alone can complete a table.
    Shrinking,
}

impl Default for SkeletonPolicy {
    fn default() -> Self {
        SkeletonPolicy::Fixed
    }
}

/// Limits on how hard a [`Reducer`] searches and how much it may throw away.
#[derive(Clone, Copy, Debug, PartialEq)]
#[non_exhaustive]
pub struct ReductionConfig {
    /// Accepted steps allowed before the search gives up. Defaults to 50.
    pub depth_cap: usize,

    /// Removal candidates scored at each step. Candidates that would empty the table or exceed
    /// the loss threshold are skipped without counting. Defaults to 3.
    pub max_candidates_per_step: usize,

    /// Upper bound on the total [`loss`][crate::loss] of all accepted steps, if any.
    pub loss_threshold: Option<f64>,

    /// See [`SkeletonPolicy`]. Defaults to [`SkeletonPolicy::Fixed`].
    pub skeleton_policy: SkeletonPolicy,
}

impl Default for ReductionConfig {
    fn default() -> Self {
        ReductionConfig {
            depth_cap: 50,
            max_candidates_per_step: 3,
            loss_threshold: None,
            skeleton_policy: SkeletonPolicy::Fixed,
        }
    }
}

impl ReductionConfig {
    /// Sets [`depth_cap`][Self::depth_cap].
    pub fn with_depth_cap(mut self, depth_cap: usize) -> Self {
        self.depth_cap = depth_cap;
        self
    }

    /// Sets [`max_candidates_per_step`][Self::max_candidates_per_step].
    pub fn with_max_candidates_per_step(mut self, candidates: usize) -> Self {
        self.max_candidates_per_step = candidates;
        self
    }

    /// Sets [`loss_threshold`][Self::loss_threshold].
    pub fn with_loss_threshold(mut self, threshold: Option<f64>) -> Self {
        self.loss_threshold = threshold;
        self
    }

    /// Sets [`skeleton_policy`][Self::skeleton_policy].
    pub fn with_skeleton_policy(mut self, policy: SkeletonPolicy) -> Self {
        self.skeleton_policy = policy;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.max_candidates_per_step == 0 {
            return Err(Error::InvalidConfig {
                message: "at least one candidate per step is required".to_owned(),
            });
        }
        if let Some(threshold) = self.loss_threshold {
            if !(threshold.is_finite() && threshold >= 0.0) {
                return Err(Error::InvalidConfig {
                    message: format!(
                        "loss threshold {} is not a finite, non-negative number",
                        threshold
                    ),
                });
            }
        }
        Ok(())
    }
}

/// Why a reduction run stopped.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Termination {
    /// Every combination of the design is present.
    Full,

    /// No candidate removal reduced the number of missing combinations.
    Stuck,

    /// The depth cap ran out before the table became full.
    DepthExceeded,

    /// The input had no rows.
    EmptyInput,
}

/// One accepted removal: every row holding `level` for `factor` was dropped.
#[derive(Clone, Debug, PartialEq)]
pub struct Step<L: Level> {
    /// Index of the factor whose level was removed.
    pub factor: usize,
    /// The removed level.
    pub level: L,
    /// How many rows held that level.
    pub rows_removed: usize,
    /// Missing combinations before this step.
    pub missing_before: usize,
    /// Missing combinations after this step.
    pub missing_after: usize,
    /// The [`loss`][crate::loss] of this step alone.
    pub loss: f64,
}

/// The outcome of cleaning one table.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct CleanedTable<L: Level> {
    /// The reduced table: a deduplicated subset of the input rows.
    pub table: Table<L>,
    /// The design the reduced table was last judged against.
    pub skeleton: Skeleton<L>,
    /// Combinations of [`skeleton`][Self::skeleton] absent from the reduced table.
    pub missing: BTreeSet<Combination<L>>,
    /// Whether the reduced table contains every combination of its design.
    pub full: bool,
    /// Total [`loss`][crate::loss] of the accepted steps.
    pub loss: f64,
    /// Rows removed by the search, not counting duplicates.
    pub rows_removed: usize,
    /// Rows removed before the search because their combination had already been seen.
    pub duplicates_removed: usize,
    /// Levels of the starting design that have no rows left, as `(factor, level)`. Under
    /// [`SkeletonPolicy::Shrinking`] this includes declared levels the input never held.
    pub dropped_levels: Vec<(usize, L)>,
    /// Why the search stopped.
    pub termination: Termination,
    /// The accepted removals, in order.
    pub steps: Vec<Step<L>>,
}

struct Candidate<L: Level> {
    factor: usize,
    level: L,
    table: Table<L>,
    index: FrequencyIndex<L>,
    skeleton: Option<Skeleton<L>>,
    missing: usize,
    loss: f64,
    rows_removed: usize,
}

impl<L: Level> Candidate<L> {
    fn rank(a: &Self, b: &Self) -> Ordering {
        a.missing
            .cmp(&b.missing)
            .then_with(|| a.loss.total_cmp(&b.loss))
            .then_with(|| a.rows_removed.cmp(&b.rows_removed))
            .then_with(|| (a.factor, a.level).cmp(&(b.factor, b.level)))
    }
}

/// Removes whole level-groups from a table until it forms a complete factorial design, or until
/// no removal helps.
///
/// Each step looks at the rarest levels of every factor, tries deleting all rows of a few of
/// them, and keeps the deletion that leaves the fewest combinations missing, preferring lower
/// [`loss`][crate::loss] and then fewer deleted rows. A step is only accepted if it strictly
/// reduces the number of missing combinations, so the search always terminates.
///
/// ```
/// use factorial_cleaner::{ReductionConfig, Reducer, SkeletonPolicy, Table, Termination};
///
/// let mut table = Table::new(2);
/// table
///     .add_row(&[1, 1], 10)?
///     .add_row(&[1, 2], 20)?
///     .add_row(&[2, 1], 30)?
///     .add_row(&[2, 2], 40)?
///     .add_row(&[3, 1], 50)?;
///
/// // Against the observed design, (3, 2) can never be supplied.
/// let fixed = Reducer::default().clean(&table);
/// assert_eq!(fixed.termination, Termination::Stuck);
/// assert_eq!(fixed.rows_removed, 0);
///
/// // Letting the design shrink, dropping factor 1's level 2 completes a 3x1 design.
/// let config = ReductionConfig::default().with_skeleton_policy(SkeletonPolicy::Shrinking);
/// let shrunk = Reducer::new(config)?.clean(&table);
/// assert!(shrunk.full);
/// assert_eq!(shrunk.dropped_levels, vec![(1, 2)]);
/// assert_eq!(shrunk.table.len(), 3);
/// # Ok::<(), factorial_cleaner::Error>(())
/// ```
#[derive(Clone, Debug, Default)]
pub struct Reducer {
    config: ReductionConfig,
}

impl Reducer {
    /// Creates a reducer, rejecting a config with no candidates per step or with a loss threshold
    /// that is negative or not finite.
    pub fn new(config: ReductionConfig) -> Result<Self> {
        config.validate()?;
        Ok(Reducer { config })
    }

    /// The configuration this reducer runs with.
    pub fn config(&self) -> &ReductionConfig {
        &self.config
    }

    /// Cleans a table against the design formed by its own observed levels.
    pub fn clean<L: Level>(&self, input: &Table<L>) -> CleanedTable<L> {
        let mut table = input.clone();
        let duplicates_removed = table.dedup();
        let levels = table.level_sets();
        self.run(table, levels, duplicates_removed)
    }

    /// Cleans a table against the design formed by the given levels, which may include levels the
    /// table never observed.
    ///
    /// Under [`SkeletonPolicy::Shrinking`] a declared level without rows leaves the design before
    /// the search starts and is reported in [`dropped_levels`][CleanedTable::dropped_levels].
    pub fn clean_with_levels<L: Level>(
        &self,
        input: &Table<L>,
        levels: LevelSets<L>,
    ) -> Result<CleanedTable<L>> {
        if levels.factor_count() != input.factor_count() {
            return Err(Error::LevelSetMismatch {
                expected: input.factor_count(),
                found: levels.factor_count(),
            });
        }
        let mut table = input.clone();
        let duplicates_removed = table.dedup();
        Ok(self.run(table, levels, duplicates_removed))
    }

    fn run<L: Level>(
        &self,
        mut table: Table<L>,
        levels: LevelSets<L>,
        duplicates_removed: usize,
    ) -> CleanedTable<L> {
        if duplicates_removed > 0 {
            info!("removed {} duplicate rows before cleaning", duplicates_removed);
        }

        let observed = table.level_sets();
        let starting_rows = table.len();
        // A shrinking design only ever holds levels that still have rows.
        let mut skeleton = match self.config.skeleton_policy {
            SkeletonPolicy::Fixed => levels.skeleton(),
            SkeletonPolicy::Shrinking => {
                let empty = levels.difference(&observed);
                if !empty.is_empty() {
                    info!("declared levels without rows leave the design: {:?}", empty);
                }
                observed.skeleton()
            }
        };
        let mut steps = Vec::new();
        let mut total_loss = 0.0;

        let termination = if table.is_empty() {
            warn!("nothing to clean: the table has no rows");
            Termination::EmptyInput
        } else {
            let mut index = FrequencyIndex::new(&table);
            let mut missing = missing_count(&table, &skeleton);
            let mut depth = 0;

            // Accepted steps strictly reduce `missing`, so the current table is always the best
            // one seen so far.
            loop {
                debug_assert!(table.is_deduplicated());
                debug!(
                    "depth {}: {} rows, {} of {} combinations missing",
                    depth,
                    table.len(),
                    missing,
                    skeleton.len()
                );

                if missing == 0 {
                    break Termination::Full;
                }
                if depth > self.config.depth_cap {
                    break Termination::DepthExceeded;
                }

                let best = self
                    .candidates(&index)
                    .into_iter()
                    .filter_map(|(factor, level)| {
                        self.evaluate(&table, &skeleton, &index, total_loss, factor, level)
                    })
                    .take(self.config.max_candidates_per_step)
                    .min_by(Candidate::rank);

                let best = match best {
                    Some(best) if best.missing < missing => best,
                    _ => break Termination::Stuck,
                };

                debug!(
                    "depth {}: removing level {:?} of factor {} drops {} rows, missing {} -> {}",
                    depth, best.level, best.factor, best.rows_removed, missing, best.missing
                );
                steps.push(Step {
                    factor: best.factor,
                    level: best.level,
                    rows_removed: best.rows_removed,
                    missing_before: missing,
                    missing_after: best.missing,
                    loss: best.loss,
                });
                total_loss += best.loss;
                missing = best.missing;
                table = best.table;
                index = best.index;
                if let Some(shrunk) = best.skeleton {
                    skeleton = shrunk;
                }
                depth += 1;
            }
        };

        let missing = missing_combinations(&table, &skeleton);
        match termination {
            Termination::Full if steps.is_empty() => {
                info!("table is already full; no cleaning needed")
            }
            Termination::Full => info!(
                "table is full after removing {} rows in {} steps",
                starting_rows - table.len(),
                steps.len()
            ),
            Termination::Stuck | Termination::DepthExceeded => warn!(
                "could not complete the design ({:?}): {} combinations still missing",
                termination,
                missing.len()
            ),
            Termination::EmptyInput => {}
        }

        CleanedTable {
            dropped_levels: match self.config.skeleton_policy {
                SkeletonPolicy::Fixed => observed.difference(&table.level_sets()),
                SkeletonPolicy::Shrinking => levels.difference(&table.level_sets()),
            },
            rows_removed: starting_rows - table.len(),
            full: termination == Termination::Full,
            loss: total_loss,
            duplicates_removed,
            termination,
            steps,
            missing,
            skeleton,
            table,
        }
    }

    /// The rarest levels of every factor, ordered by how few rows hold them, then by factor and
    /// level.
    fn candidates<L: Level>(&self, index: &FrequencyIndex<L>) -> Vec<(usize, L)> {
        let mut ranked = Vec::new();
        for factor in 0..index.factor_count() {
            for level in index.rarest_levels(factor) {
                ranked.push((index.count(factor, level), factor, level));
            }
        }
        ranked.sort_unstable();
        ranked
            .into_iter()
            .map(|(_, factor, level)| (factor, level))
            .collect()
    }

    fn evaluate<L: Level>(
        &self,
        table: &Table<L>,
        skeleton: &Skeleton<L>,
        index: &FrequencyIndex<L>,
        spent: f64,
        factor: usize,
        level: L,
    ) -> Option<Candidate<L>> {
        let reduced = table.without_level(factor, level);
        if reduced.is_empty() {
            debug!("  factor {} level {:?}: would empty the table", factor, level);
            return None;
        }

        let loss = crate::loss(table, &reduced);
        if let Some(threshold) = self.config.loss_threshold {
            if spent + loss > threshold {
                debug!(
                    "  factor {} level {:?}: loss {:.2} exceeds the remaining budget",
                    factor, level, loss
                );
                return None;
            }
        }

        let mut index = index.clone();
        for row in table.iter().filter(|row| row.level(factor) == level) {
            index.remove_row(row);
        }

        let (missing, skeleton) = match self.config.skeleton_policy {
            SkeletonPolicy::Fixed => (missing_count(&reduced, skeleton), None),
            SkeletonPolicy::Shrinking => {
                let shrunk = index.level_sets().skeleton();
                (missing_count(&reduced, &shrunk), Some(shrunk))
            }
        };
        debug!(
            "  factor {} level {:?}: {} missing, loss {:.2}",
            factor, level, missing, loss
        );

        Some(Candidate {
            factor,
            level,
            rows_removed: table.len() - reduced.len(),
            table: reduced,
            index,
            skeleton,
            missing,
            loss,
        })
    }
}

/// Cleans `table` with the default [`Reducer`] after checking that every row has exactly
/// `factor_count` levels.
///
/// ```
/// use factorial_cleaner::{clean, Error, Table};
///
/// let table: Table<u8> = Table::new(3);
/// assert!(matches!(clean(&table, 3), Ok(cleaned) if !cleaned.full));
///
/// let mut table = Table::new(2);
/// table.add_row(&[1, 1], 0)?;
/// assert_eq!(
///     clean(&table, 3).map(|cleaned| cleaned.full),
///     Err(Error::InvalidArity { row: 0, expected: 3, found: 2 })
/// );
/// # Ok::<(), Error>(())
/// ```
pub fn clean<L: Level>(table: &Table<L>, factor_count: usize) -> Result<CleanedTable<L>> {
    for (row, levels) in table.iter().enumerate() {
        if levels.arity() != factor_count {
            return Err(Error::InvalidArity {
                row,
                expected: factor_count,
                found: levels.arity(),
            });
        }
    }
    Ok(Reducer::default().clean(table))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{is_full, Row};

    // Two 3-level factors where (2,3), (3,2) and (3,3) are missing.
    fn staircase() -> Table<i64> {
        let mut table = Table::new(2);
        for (levels, response) in [
            ([1, 1], 10),
            ([1, 2], 20),
            ([2, 1], 30),
            ([2, 2], 40),
            ([3, 1], 50),
            ([1, 3], 60),
        ]
        .iter()
        {
            table.add_row(levels, *response).unwrap();
        }
        table
    }

    fn shrinking() -> ReductionConfig {
        ReductionConfig::default().with_skeleton_policy(SkeletonPolicy::Shrinking)
    }

    #[test]
    fn candidates_prefer_rarer_levels_then_lower_factors() {
        let table = staircase();
        let index = FrequencyIndex::new(&table);
        let reducer = Reducer::default();
        assert_eq!(reducer.candidates(&index), vec![(0, 3), (1, 3)]);
    }

    #[test]
    fn candidates_over_budget_do_not_use_up_the_step() {
        // The second step's rarest level costs 784 and would exceed the budget; the next one costs
        // 68 and fits.
        let config = shrinking()
            .with_max_candidates_per_step(1)
            .with_loss_threshold(Some(300.0));
        let cleaned = Reducer::new(config).unwrap().clean(&staircase());
        assert_eq!(cleaned.termination, Termination::Full);
        let taken: Vec<_> = cleaned.steps.iter().map(|step| (step.factor, step.level)).collect();
        assert_eq!(taken, vec![(0, 3), (0, 2)]);
        assert_eq!(cleaned.loss, 225.0 + 68.0);
    }

    #[test]
    fn shrinking_starts_from_the_levels_that_have_rows() {
        let mut table = Table::new(1);
        table
            .add_row(&[1], 10)
            .unwrap()
            .add_row(&[2], 20)
            .unwrap()
            .add_row(&[3], 30)
            .unwrap();
        let declared = LevelSets::new(vec![[1, 2, 3, 4].iter().copied().collect()]);

        let cleaned = Reducer::new(shrinking())
            .unwrap()
            .clean_with_levels(&table, declared)
            .unwrap();
        assert!(cleaned.steps.is_empty());
        assert_eq!(cleaned.table, table);
        assert_eq!(cleaned.skeleton.len(), 3);
        assert_eq!(cleaned.dropped_levels, vec![(0, 4)]);
    }

    #[test]
    fn fixed_design_never_removes_rows() {
        let table = staircase();
        let cleaned = Reducer::default().clean(&table);
        assert_eq!(cleaned.termination, Termination::Stuck);
        assert!(!cleaned.full);
        assert_eq!(cleaned.table, table);
        assert_eq!(cleaned.missing.len(), 3);
        assert!(cleaned.steps.is_empty());
        assert_eq!(cleaned.loss, 0.0);
    }

    #[test]
    fn shrinking_design_takes_the_cheapest_improving_steps() {
        let cleaned = Reducer::new(shrinking()).unwrap().clean(&staircase());
        assert_eq!(cleaned.termination, Termination::Full);

        // Dropping (3, *) costs 225 against 625 for (*, 3); after that, dropping (2, *) costs 68
        // against 784 for (*, 3).
        let taken: Vec<_> = cleaned
            .steps
            .iter()
            .map(|step| (step.factor, step.level, step.missing_before, step.missing_after))
            .collect();
        assert_eq!(taken, vec![(0, 3, 3, 1), (0, 2, 1, 0)]);
        assert_eq!(cleaned.loss, 225.0 + 68.0);
        assert_eq!(cleaned.dropped_levels, vec![(0, 2), (0, 3)]);
        assert_eq!(
            cleaned.table.rows(),
            &[Row::new(&[1, 1], 10), Row::new(&[1, 2], 20), Row::new(&[1, 3], 60)]
        );
        assert!(is_full(&cleaned.table, &cleaned.skeleton));
        assert_eq!(cleaned.rows_removed, 3);
    }

    #[test]
    fn depth_cap_returns_the_best_table_so_far() {
        let config = shrinking().with_depth_cap(0);
        let cleaned = Reducer::new(config).unwrap().clean(&staircase());
        assert_eq!(cleaned.termination, Termination::DepthExceeded);
        assert!(!cleaned.full);
        assert_eq!(cleaned.steps.len(), 1);
        assert_eq!(cleaned.table.len(), 5);
        assert_eq!(cleaned.missing.len(), 1);
    }

    #[test]
    fn loss_threshold_limits_accepted_steps() {
        let reduce = |threshold: f64| {
            Reducer::new(shrinking().with_loss_threshold(Some(threshold)))
                .unwrap()
                .clean(&staircase())
        };

        let none = reduce(100.0);
        assert_eq!(none.termination, Termination::Stuck);
        assert_eq!(none.rows_removed, 0);

        let one = reduce(250.0);
        assert_eq!(one.termination, Termination::Stuck);
        assert_eq!(one.steps.len(), 1);
        assert_eq!(one.missing.len(), 1);

        let all = reduce(300.0);
        assert_eq!(all.termination, Termination::Full);
        assert!(all.loss <= 300.0);
    }

    #[test]
    fn candidates_that_would_empty_the_table_are_discarded() {
        // Factor 0 has a single level, so removing it would remove everything.
        let mut table = Table::new(3);
        table.add_row(&[1, 1, 1], 0).unwrap().add_row(&[1, 2, 2], 0).unwrap();
        let skeleton = table.level_sets().skeleton();
        let index = FrequencyIndex::new(&table);
        let reducer = Reducer::new(shrinking().with_max_candidates_per_step(10)).unwrap();

        assert!(reducer.candidates(&index).contains(&(0, 1)));
        assert!(reducer
            .evaluate(&table, &skeleton, &index, 0.0, 0, 1)
            .is_none());

        let cleaned = reducer.clean(&table);
        assert!(cleaned.full);
        assert_eq!(cleaned.table.len(), 1);
    }

    #[test]
    fn invalid_configs_are_rejected() {
        let zero = ReductionConfig::default().with_max_candidates_per_step(0);
        assert!(matches!(Reducer::new(zero), Err(Error::InvalidConfig { .. })));

        let negative = ReductionConfig::default().with_loss_threshold(Some(-1.0));
        assert!(matches!(Reducer::new(negative), Err(Error::InvalidConfig { .. })));

        let nan = ReductionConfig::default().with_loss_threshold(Some(f64::NAN));
        assert!(matches!(Reducer::new(nan), Err(Error::InvalidConfig { .. })));
    }

    #[test]
    fn declared_levels_must_match_the_factor_count() {
        let levels = LevelSets::new(vec![[1].iter().copied().collect()]);
        assert_eq!(
            Reducer::default()
                .clean_with_levels(&staircase(), levels)
                .map(|cleaned| cleaned.full),
            Err(Error::LevelSetMismatch {
                expected: 2,
                found: 1
            })
        );
    }
}
