//! A fixed battery of regression scenarios: complete designs of known shape with a known share of
//! their rows knocked out, cleaned and compared against the original design.

use crate::generate::TableGenerator;
use crate::{is_full, missing_count, LevelSets, Reducer, Result, Termination};
use rand::Rng;
use std::collections::BTreeSet;
use std::fmt;

/// A design of `levels[i]` levels (coded `1..=levels[i]`) for each factor `i`, with
/// `missing_fraction` of its rows removed before cleaning.
#[derive(Clone, Debug, PartialEq)]
pub struct Scenario {
    /// Number of levels of each factor.
    pub levels: Vec<usize>,
    /// Share of the design's rows to remove, between 0 and 1.
    pub missing_fraction: f64,
}

/// What happened when a [`Scenario`] was run.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScenarioReport {
    /// Rows in the complete design.
    pub original_rows: usize,
    /// Rows left after random removal.
    pub reduced_rows: usize,
    /// Rows left after cleaning.
    pub cleaned_rows: usize,
    /// Rows the reducer removed.
    pub removed_during_cleaning: usize,
    /// Combinations of the complete design absent from the cleaned table.
    pub lost_combinations: usize,
    /// Whether the cleaned table covers the complete design.
    pub full: bool,
    /// Why the reducer stopped.
    pub termination: Termination,
}

impl Scenario {
    /// Creates a scenario.
    pub fn new(levels: Vec<usize>, missing_fraction: f64) -> Self {
        Scenario {
            levels,
            missing_fraction,
        }
    }

    /// The standard battery of five designs.
    pub fn battery() -> Vec<Scenario> {
        vec![
            Scenario::new(vec![3, 2], 0.167),
            Scenario::new(vec![2, 2, 2], 0.25),
            Scenario::new(vec![3, 3, 2], 0.296),
            Scenario::new(vec![4, 3], 0.125),
            Scenario::new(vec![2, 2, 3], 0.20),
        ]
    }

    /// The number of factors in the design.
    pub fn factor_count(&self) -> usize {
        self.levels.len()
    }

    /// The complete design's level sets.
    pub fn level_sets(&self) -> LevelSets<i64> {
        self.levels
            .iter()
            .map(|&count| (1..=count as i64).collect::<BTreeSet<_>>())
            .collect()
    }

    /// Builds the complete design with random responses, removes the scenario's share of rows at
    /// random, and cleans what is left against the complete design.
    pub fn run<R: Rng>(
        &self,
        generator: &mut TableGenerator<R>,
        reducer: &Reducer,
    ) -> Result<ScenarioReport> {
        let levels = self.level_sets();
        let design = levels.skeleton();
        let full = generator.full_table(&levels);
        let amount = (full.len() as f64 * self.missing_fraction) as usize;
        let reduced = generator.remove_rows(&full, amount);

        let cleaned = reducer.clean_with_levels(&reduced, levels)?;

        Ok(ScenarioReport {
            original_rows: full.len(),
            reduced_rows: reduced.len(),
            cleaned_rows: cleaned.table.len(),
            removed_during_cleaning: reduced.len() - cleaned.table.len(),
            lost_combinations: missing_count(&cleaned.table, &design),
            full: is_full(&cleaned.table, &design),
            termination: cleaned.termination,
        })
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Factors={}, Levels=", self.factor_count())?;
        for (factor, count) in self.levels.iter().enumerate() {
            if factor > 0 {
                f.write_str("x")?;
            }
            write!(f, "{}", count)?;
        }
        write!(f, ", Missing={:.1}%", self.missing_fraction * 100.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ReductionConfig, SkeletonPolicy};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn battery_describes_itself() {
        let descriptions: Vec<_> = Scenario::battery().iter().map(|s| s.to_string()).collect();
        assert_eq!(descriptions[0], "Factors=2, Levels=3x2, Missing=16.7%");
        assert_eq!(descriptions[2], "Factors=3, Levels=3x3x2, Missing=29.6%");
        assert_eq!(descriptions.len(), 5);
    }

    #[test]
    fn fixed_design_scenarios_keep_every_row() {
        let mut generator = TableGenerator::new(StdRng::seed_from_u64(11));
        let reducer = Reducer::default();
        for scenario in Scenario::battery() {
            let report = scenario.run(&mut generator, &reducer).unwrap();
            let design: usize = scenario.levels.iter().product();
            assert_eq!(report.original_rows, design);
            assert_eq!(
                report.reduced_rows,
                design - (design as f64 * scenario.missing_fraction) as usize
            );
            assert_eq!(report.removed_during_cleaning, 0);
            assert_eq!(report.lost_combinations, design - report.reduced_rows);
            assert_eq!(report.full, report.lost_combinations == 0);
        }
    }

    #[test]
    fn shrinking_scenarios_keep_a_nonempty_subset() {
        let mut generator = TableGenerator::new(StdRng::seed_from_u64(12));
        let config = ReductionConfig::default().with_skeleton_policy(SkeletonPolicy::Shrinking);
        let reducer = Reducer::new(config).unwrap();
        for scenario in Scenario::battery() {
            let report = scenario.run(&mut generator, &reducer).unwrap();
            assert_eq!(
                report.cleaned_rows + report.removed_during_cleaning,
                report.reduced_rows
            );
            assert!(report.cleaned_rows > 0);
            assert!(report.lost_combinations >= report.original_rows - report.reduced_rows);
        }
    }
}
