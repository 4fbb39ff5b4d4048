use std::path::PathBuf;

use clap::Parser;
use colored::Colorize;
use log::info;

mod export;
mod grid_solve;
mod import;
mod line_solve;
mod puzzle;

/// Solves multi-color nonograms: every line's candidates are narrowed against each other, then
/// the surviving rows are woven together to find every solution.
#[derive(Parser, Debug)]
#[command(name = "pbn-weave", version, about, author)]
struct Args {
    /// Puzzle files: .xpm or .txt pictures, webpbn .xml/.pbn clues, or any raster image.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Don't display the title
    #[arg(short = 't', long)]
    hide_title: bool,

    /// Don't display the preliminary solution
    #[arg(short = 'p', long)]
    hide_prelim: bool,

    /// Don't display the final solution(s)
    #[arg(short = 'f', long)]
    hide_final: bool,

    /// Don't display the number of propagation iterations
    #[arg(short = 'i', long)]
    hide_iterations: bool,

    /// Don't display the count (number of solutions)
    #[arg(short = 'c', long)]
    hide_count: bool,

    /// Stop after this many solutions
    #[arg(short = 'n', long, value_parser = clap::value_parser!(u64).range(1..))]
    max_solutions: Option<u64>,

    /// Don't filter a line's candidates while it has more than this many
    #[arg(long)]
    filter_limit: Option<usize>,

    /// Show the domain image after every propagation pass
    #[arg(long)]
    trace: bool,

    /// Show a spinner while searching
    #[arg(long)]
    progress: bool,

    /// Print the clues as webpbn XML instead of solving
    #[arg(long)]
    emit_clues: bool,
}

/// Prints results in the order they're found.
struct Printer<'a> {
    args: &'a Args,
    palette: &'a puzzle::Palette,
    found: usize,
}

impl<'a> grid_solve::Observer for Printer<'a> {
    fn propagated(&mut self, iterations: usize, preliminary: &grid_solve::DomainImage) {
        if !self.args.hide_prelim {
            print!("{}", export::emit_domain(preliminary, self.palette));
            println!();
        }
        if !self.args.hide_iterations {
            println!("{} iterations", iterations);
        }
    }

    fn solution(&mut self, grid: &puzzle::Grid) {
        self.found += 1;
        if !self.args.hide_final {
            println!("{}", self.found);
            print!("{}", export::emit_grid(grid, self.palette));
            println!();
        }
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let config = grid_solve::SolveConfig {
        max_solutions: args
            .max_solutions
            .map_or(usize::MAX, |n| usize::try_from(n).unwrap_or(usize::MAX)),
        filter_limit: args.filter_limit,
        trace: args.trace,
        progress: args.progress,
    };

    for input in &args.inputs {
        if !args.hide_title {
            println!("{}", input.display());
        }

        let puzzle = import::read_puzzle(input)?;

        if args.emit_clues {
            print!("{}", export::emit_webpbn(&puzzle));
            continue;
        }

        let mut printer = Printer {
            args: &args,
            palette: &puzzle.palette,
            found: 0,
        };
        let report = grid_solve::solve_observed(&puzzle, &config, &mut printer)?;
        info!(
            "{}: {} iterations, {} cells known after propagation, {} search nodes",
            input.display(),
            report.iterations,
            report.preliminary.known_cells(),
            report.nodes
        );

        if !args.hide_count {
            let count = format!("{} solutions", report.solutions);
            if report.solutions == 0 {
                println!("{}", count.red());
            } else if report.hit_limit {
                println!("{} {}", count.yellow(), "(stopped at the limit)".dimmed());
            } else {
                println!("{}", count.green());
            }
        }
    }

    Ok(())
}
