use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use log::info;

use fmconf::calculator::ConfigurationCalculator;
use fmconf::hardware::{AvailableEdgeHardware, HardwareClass};
use fmconf::loader;
use fmconf::merger::Merger;
use fmconf::serialize;
use fmconf::slicer::{slice_model, Threshold};
use fmconf::solver::Interrupt;

const SAMPLE: &str = include_str!("sample.json");

#[derive(Debug, Parser)]
#[command(author, version, about = "Slice, enumerate and merge a feature model for one edge node")]
struct Cli {
    /// Feature model in JSON (defaults to a built-in sample).
    #[arg(value_name = "FILE")]
    input: Option<PathBuf>,

    /// Slicing threshold on the estimated configuration count (unbounded if omitted).
    #[arg(long, value_name = "INT")]
    threshold: Option<u64>,

    /// Capacity of the edge node in every hardware class.
    #[arg(long, value_name = "INT", default_value = "4")]
    capacity: u32,

    /// Number of hardware classes to check, in canonical order.
    #[arg(long, value_name = "INT", default_value_t = HardwareClass::COUNT)]
    classes: usize,

    /// Abandon enumeration and merging after this many milliseconds.
    #[arg(long, value_name = "MS")]
    timeout_ms: Option<u64>,

    /// Write the merged execution graph in DOT format.
    #[arg(long, value_name = "FILE")]
    dot: Option<PathBuf>,

    /// Write the calculated configurations as CSV.
    #[arg(long, value_name = "FILE")]
    csv: Option<PathBuf>,

    /// Enumerate the whole model at once instead of per slice.
    #[clap(long)]
    unsliced: bool,
}

fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    simplelog::TermLogger::init(
        simplelog::LevelFilter::Info,
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    )?;

    let time_total = std::time::Instant::now();

    let args = Cli::parse();
    println!("args = {:?}", args);

    let model = match &args.input {
        Some(path) => loader::from_path(path)?,
        None => loader::from_json(SAMPLE)?,
    };
    println!(
        "model: {} features, {} constraints, start = {:?}",
        model.len(),
        model.constraints().len(),
        model.start().map(|s| model.name(s))
    );

    let interrupt = match args.timeout_ms {
        Some(ms) => Interrupt::none().with_timeout(Duration::from_millis(ms)),
        None => Interrupt::none(),
    };
    let mut calculator = ConfigurationCalculator::new().with_interrupt(interrupt.clone());

    let time_calculate = std::time::Instant::now();
    let calculated = if args.unsliced {
        calculator.calculate_unsliced(&model)
    } else {
        let threshold = args.threshold.map_or(Threshold::Unbounded, Threshold::Limit);
        let sliced = slice_model(&model, threshold);
        for (i, slice) in sliced.slices.iter().enumerate() {
            let names: Vec<&str> = slice.iter().map(|&f| model.name(f)).collect();
            println!("slice {}: {:?}", i, names);
        }
        calculator.calculate_sliced(&model, &sliced)
    };
    println!(
        "calculated {} configurations in {} slices ({} combinations at most) in {:.2?}",
        calculated.configuration_count(),
        calculated.slices.len(),
        calculated.combination_bound(),
        time_calculate.elapsed()
    );
    if !calculated.complete {
        println!("enumeration was interrupted; results are partial");
    }

    if let Some(path) = &args.csv {
        std::fs::write(path, serialize::to_csv(&calculated)?)?;
        info!("wrote configurations to {}", path.display());
    }

    let edge = AvailableEdgeHardware::uniform(args.capacity);
    let time_merge = std::time::Instant::now();
    let outcome = Merger::new(&calculated)
        .with_interrupt(interrupt)
        .merge(&edge, args.classes);
    println!(
        "merge: {} valid combinations, {} non-available features, {} pruned abstract features in {:.2?}",
        outcome.valid_combinations,
        outcome.non_available.len(),
        outcome.pruned.len(),
        time_merge.elapsed()
    );

    match &outcome.graph {
        Some(graph) => {
            println!("graph: {} vertices, {} edges", graph.vertex_count(), graph.edge_count());
            for (_, vertex) in graph.vertices() {
                println!(
                    "- {} (service {}, stage {}, indices {}/{}){}",
                    vertex.label,
                    vertex.service,
                    vertex.stage,
                    vertex.application_index,
                    vertex.approximation_index,
                    if vertex.decision_making { " [decision]" } else { "" }
                );
            }
            if let Some(path) = &args.dot {
                std::fs::write(path, graph.to_dot()?)?;
                info!("wrote execution graph to {}", path.display());
            }
        }
        None => println!("no valid combination fits this edge node"),
    }

    println!("Total time: {:.2?}", time_total.elapsed());
    Ok(())
}
