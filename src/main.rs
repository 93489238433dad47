use clap::{Args, Parser, Subcommand};
use csv_core::{ReadFieldResult, ReaderBuilder};
use factorial_cleaner::generate::{SizeCategory, TableGenerator};
use factorial_cleaner::scenario::Scenario;
use factorial_cleaner::{CleanedTable, ReductionConfig, Reducer, SkeletonPolicy, Table};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str;

#[derive(Parser)]
#[command(name = "factorial-cleaner")]
#[command(about = "Reduce a table of observations to a complete factorial design")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Clean a tab-separated table whose last column is the response
    Clean {
        /// Input table; standard input when omitted
        input: Option<PathBuf>,

        /// Write the cleaned table here
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Number of factor columns (every column but the last by default)
        #[arg(long)]
        factors: Option<usize>,

        #[command(flatten)]
        reduction: ReductionArgs,
    },

    /// Generate a random incomplete table, clean it and save the result
    Generate {
        /// Size category: 1 (small), 2 (medium) or 3 (large)
        #[arg(short, long, value_parser = clap::value_parser!(u8).range(1..=3))]
        size: u8,

        /// Random seed for reproducibility
        #[arg(long)]
        seed: Option<u64>,

        /// Write the cleaned table here
        #[arg(short, long, default_value = "output.txt")]
        output: PathBuf,

        #[command(flatten)]
        reduction: ReductionArgs,
    },

    /// Run the regression scenario battery
    Scenarios {
        /// Random seed for reproducibility
        #[arg(long)]
        seed: Option<u64>,

        #[command(flatten)]
        reduction: ReductionArgs,
    },
}

#[derive(Args)]
struct ReductionArgs {
    /// Maximum number of removal steps
    #[arg(long, default_value_t = 50)]
    depth_cap: usize,

    /// Removal candidates scored per step
    #[arg(long, default_value_t = 3)]
    max_candidates: usize,

    /// Give up rather than lose more than this much response information
    #[arg(long)]
    loss_threshold: Option<f64>,

    /// Let the design shrink when a level loses all of its rows
    #[arg(long)]
    shrink_skeleton: bool,
}

impl ReductionArgs {
    fn reducer(&self) -> io::Result<Reducer> {
        let policy = if self.shrink_skeleton {
            SkeletonPolicy::Shrinking
        } else {
            SkeletonPolicy::Fixed
        };
        let config = ReductionConfig::default()
            .with_depth_cap(self.depth_cap)
            .with_max_candidates_per_step(self.max_candidates)
            .with_loss_threshold(self.loss_threshold)
            .with_skeleton_policy(policy);
        Reducer::new(config).map_err(invalid_data)
    }
}

fn invalid_data<E>(error: E) -> io::Error
where
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    io::Error::new(io::ErrorKind::InvalidData, error)
}

/// Accumulates parsed records into a table, treating a leading non-numeric record as a header.
struct Loader {
    factors: Option<usize>,
    names: Option<Vec<String>>,
    table: Option<Table<i64>>,
}

impl Loader {
    fn record(&mut self, fields: &[String], line: u64) -> io::Result<()> {
        if fields.iter().all(|field| field.is_empty()) {
            return Ok(());
        }
        if fields.len() < 2 {
            return Err(invalid_data(format!(
                "line {}: need at least one factor column and a response",
                line
            )));
        }

        let parsed: Result<Vec<i64>, _> = fields.iter().map(|field| field.parse()).collect();
        let values = match parsed {
            Ok(values) => values,
            Err(_) if self.table.is_none() && self.names.is_none() => {
                self.names = Some(fields.to_vec());
                return Ok(());
            }
            Err(e) => return Err(invalid_data(format!("line {}: {}", line, e))),
        };

        let (levels, response) = values.split_at(values.len() - 1);
        let factors = self.factors.unwrap_or(levels.len());
        self.table
            .get_or_insert_with(|| Table::new(factors))
            .add_row(levels, response[0])
            .map_err(|e| invalid_data(format!("line {}: {}", line, e)))?;
        Ok(())
    }
}

fn load_data<I: io::Read>(
    mut input: I,
    factors: Option<usize>,
) -> io::Result<(Option<Vec<String>>, Table<i64>)> {
    let mut inputbuf = [0; 16384];
    let mut fieldbuf = [0; 1024];
    let mut fieldlen = 0;
    let mut record = Vec::new();
    let mut loader = Loader {
        factors,
        names: None,
        table: None,
    };
    let mut tsv = ReaderBuilder::new().delimiter(b'\t').build();

    loop {
        let read = input.read(&mut inputbuf)?;
        let mut bytes = &inputbuf[..read];
        loop {
            let (result, nin, nout) = tsv.read_field(bytes, &mut fieldbuf[fieldlen..]);
            bytes = &bytes[nin..];
            fieldlen += nout;
            match result {
                ReadFieldResult::InputEmpty => break,
                ReadFieldResult::OutputFull => {
                    return Err(invalid_data(format!(
                        "field too long on line {}",
                        tsv.line()
                    )));
                }
                ReadFieldResult::Field { record_end } => {
                    let field = str::from_utf8(&fieldbuf[..fieldlen]).map_err(invalid_data)?;
                    record.push(field.trim().to_owned());
                    fieldlen = 0;

                    if record_end {
                        loader.record(&record, tsv.line())?;
                        record.clear();
                    }
                }
                ReadFieldResult::End => {
                    let names = loader.names;
                    let mut table = loader
                        .table
                        .unwrap_or_else(|| Table::new(factors.unwrap_or(0)));
                    table.shrink_to_fit();
                    return Ok((names, table));
                }
            }
        }
    }
}

fn column_names(names: Option<Vec<String>>, factor_count: usize) -> Vec<String> {
    match names {
        Some(names) if names.len() == factor_count + 1 => names,
        _ => (1..=factor_count)
            .map(|factor| format!("Factor{}", factor))
            .chain(std::iter::once("Result".to_owned()))
            .collect(),
    }
}

fn save_data(path: &Path, names: &[String], table: &Table<i64>) -> io::Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    writeln!(out, "{}", names.join("\t"))?;
    write!(out, "{}", table)?;
    out.flush()
}

fn print_table(title: &str, names: &[String], table: &Table<i64>) {
    println!();
    println!("{} (rows: {}):", title, table.len());
    println!("{}", names.join("\t"));
    print!("{}", table);
}

fn print_report(names: &[String], cleaned: &CleanedTable<i64>) {
    println!();
    println!("report:");
    println!("  duplicates removed: {}", cleaned.duplicates_removed);
    println!("  rows removed: {}", cleaned.rows_removed);
    for step in cleaned.steps.iter() {
        println!(
            "    {} = {}: {} rows, missing {} -> {}, loss {:.2}",
            names[step.factor],
            step.level,
            step.rows_removed,
            step.missing_before,
            step.missing_after,
            step.loss
        );
    }
    if !cleaned.dropped_levels.is_empty() {
        let dropped: Vec<_> = cleaned
            .dropped_levels
            .iter()
            .map(|(factor, level)| format!("{} = {}", names[*factor], level))
            .collect();
        println!("  dropped levels: {}", dropped.join(", "));
    }
    println!("  total loss: {:.2}", cleaned.loss);
    println!(
        "  design: {} combinations, {} missing",
        cleaned.skeleton.len(),
        cleaned.missing.len()
    );
    if !cleaned.missing.is_empty() {
        println!("  missing combinations: {:?}", cleaned.missing);
    }
    println!("  stopped: {:?}", cleaned.termination);
    println!("  structure full: {}", if cleaned.full { "yes" } else { "no" });
}

fn clean_command(
    input: Option<PathBuf>,
    output: Option<PathBuf>,
    factors: Option<usize>,
    reducer: Reducer,
) -> io::Result<()> {
    let (names, table) = match input {
        Some(path) => load_data(File::open(path)?, factors)?,
        None => load_data(io::stdin().lock(), factors)?,
    };
    let names = column_names(names, table.factor_count());

    let cleaned = reducer.clean(&table);
    print_table("cleaned table", &names, &cleaned.table);
    print_report(&names, &cleaned);

    if let Some(path) = output {
        save_data(&path, &names, &cleaned.table)?;
        println!();
        println!("table saved to {}", path.display());
    }
    Ok(())
}

fn generate_command(
    size: u8,
    seed: Option<u64>,
    output: PathBuf,
    reducer: Reducer,
) -> io::Result<()> {
    let size = SizeCategory::from_number(size)
        .ok_or_else(|| invalid_data(format!("unknown size category {}", size)))?;
    let mut generator = TableGenerator::new(rng(seed));
    let tables = generator.generate(size);
    let names = column_names(None, tables.full.factor_count());

    print_table("full table", &names, &tables.full);
    print_table("reduced table", &names, &tables.reduced);

    let cleaned = reducer.clean(&tables.reduced);
    print_table("cleaned table", &names, &cleaned.table);
    print_report(&names, &cleaned);

    save_data(&output, &names, &cleaned.table)?;
    println!();
    println!("table saved to {}", output.display());
    Ok(())
}

fn scenarios_command(seed: Option<u64>, reducer: Reducer) -> io::Result<()> {
    let mut generator = TableGenerator::new(rng(seed));
    for (number, scenario) in Scenario::battery().iter().enumerate() {
        let report = scenario
            .run(&mut generator, &reducer)
            .map_err(invalid_data)?;
        println!();
        println!("test #{}: {}", number + 1, scenario);
        println!("  original rows: {}", report.original_rows);
        println!("  reduced rows: {}", report.reduced_rows);
        println!("  cleaned rows: {}", report.cleaned_rows);
        println!("  removed during cleaning: {}", report.removed_during_cleaning);
        println!("  lost combinations: {}", report.lost_combinations);
        println!("  stopped: {:?}", report.termination);
        println!("  structure full: {}", if report.full { "yes" } else { "no" });
    }
    Ok(())
}

fn rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

fn main() -> io::Result<()> {
    env_logger::init();

    match Cli::parse().command {
        Commands::Clean {
            input,
            output,
            factors,
            reduction,
        } => clean_command(input, output, factors, reduction.reducer()?),
        Commands::Generate {
            size,
            seed,
            output,
            reduction,
        } => generate_command(size, seed, output, reduction.reducer()?),
        Commands::Scenarios { seed, reduction } => {
            scenarios_command(seed, reduction.reducer()?)
        }
    }
}
