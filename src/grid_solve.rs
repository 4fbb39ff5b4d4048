use anyhow::{bail, Context};
use colored::Colorize;
use log::{debug, info, trace};
use ndarray::{Array2, ArrayView1};

use crate::{
    line_solve::{candidates, fits, Cell, Line},
    puzzle::{Grid, Palette, Puzzle},
};

/// For each cell, every color some remaining candidate could put there.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct DomainImage {
    cells: Array2<Cell>,
}

impl DomainImage {
    fn empty(rows: usize, cols: usize) -> DomainImage {
        DomainImage {
            cells: Array2::from_elem((rows, cols), Cell::new_impossible()),
        }
    }

    /// The union of every row candidate, row by row.
    pub fn from_row_candidates(rows: &[Vec<Line>], ncols: usize) -> DomainImage {
        let mut res = DomainImage::empty(rows.len(), ncols);
        for (r, possibles) in rows.iter().enumerate() {
            for line in possibles {
                for (c, color) in line.iter().enumerate() {
                    res.cells[(r, c)].actually_could_be(*color);
                }
            }
        }
        res
    }

    /// The union of every column candidate, transposed into place.
    pub fn from_col_candidates(cols: &[Vec<Line>], nrows: usize) -> DomainImage {
        let mut res = DomainImage::empty(nrows, cols.len());
        for (c, possibles) in cols.iter().enumerate() {
            for line in possibles {
                for (r, color) in line.iter().enumerate() {
                    res.cells[(r, c)].actually_could_be(*color);
                }
            }
        }
        res
    }

    pub fn intersect(&self, other: &DomainImage) -> DomainImage {
        DomainImage {
            cells: ndarray::Zip::from(&self.cells)
                .and(&other.cells)
                .map_collect(|a, b| a.intersect(*b)),
        }
    }

    pub fn nrows(&self) -> usize {
        self.cells.nrows()
    }

    pub fn ncols(&self) -> usize {
        self.cells.ncols()
    }

    pub fn get(&self, r: usize, c: usize) -> Cell {
        self.cells[(r, c)]
    }

    pub fn row(&self, r: usize) -> ArrayView1<Cell> {
        self.cells.row(r)
    }

    pub fn column(&self, c: usize) -> ArrayView1<Cell> {
        self.cells.column(c)
    }

    pub fn is_subset_of(&self, other: &DomainImage) -> bool {
        self.cells
            .iter()
            .zip(other.cells.iter())
            .all(|(a, b)| a.is_subset_of(*b))
    }

    pub fn known_cells(&self) -> usize {
        self.cells.iter().filter(|cell| cell.is_known()).count()
    }
}

#[derive(Clone, Debug)]
pub struct SolveConfig {
    /// Stop weaving once this many solutions have been found.
    pub max_solutions: usize,
    /// Lanes with more candidates than this are left unfiltered during propagation.
    pub filter_limit: Option<usize>,
    /// Print the domain image after every propagation pass.
    pub trace: bool,
    pub progress: bool,
}

impl Default for SolveConfig {
    fn default() -> Self {
        SolveConfig {
            max_solutions: usize::MAX,
            filter_limit: None,
            trace: false,
            progress: false,
        }
    }
}

#[derive(Debug)]
pub struct Report {
    /// Propagation passes that eliminated at least one candidate.
    pub iterations: usize,
    pub solutions: usize,
    /// Tentative row assignments made while weaving.
    pub nodes: u64,
    /// The search stopped at `max_solutions` rather than running out of candidates.
    pub hit_limit: bool,
    /// What propagation alone could determine.
    pub preliminary: DomainImage,
}

/// Everything one solve owns: candidate sets, the grid being woven, and the counters.
pub struct Solver<'a> {
    puzzle: &'a Puzzle,
    config: &'a SolveConfig,
    rows: Vec<Vec<Line>>,
    cols: Vec<Vec<Line>>,
    grid: Grid,
    solutions: usize,
    nodes: u64,
    stopped: bool,
}

impl<'a> Solver<'a> {
    pub fn new(puzzle: &'a Puzzle, config: &'a SolveConfig) -> anyhow::Result<Solver<'a>> {
        let (height, width) = (puzzle.rows.len(), puzzle.cols.len());

        let mut rows = Vec::with_capacity(height);
        for (idx, clue) in puzzle.rows.iter().enumerate() {
            rows.push(candidates(clue, width).with_context(|| {
                format!("Row {} ({})", idx + 1, clue.describe(&puzzle.palette))
            })?);
        }
        let mut cols = Vec::with_capacity(width);
        for (idx, clue) in puzzle.cols.iter().enumerate() {
            cols.push(candidates(clue, height).with_context(|| {
                format!("Column {} ({})", idx + 1, clue.describe(&puzzle.palette))
            })?);
        }

        Ok(Solver {
            puzzle,
            config,
            rows,
            cols,
            grid: Grid::new(height, width),
            solutions: 0,
            nodes: 0,
            stopped: false,
        })
    }

    #[allow(dead_code)] // Only tests look inside.
    pub fn row_candidates(&self) -> &[Vec<Line>] {
        &self.rows
    }

    #[allow(dead_code)]
    pub fn col_candidates(&self) -> &[Vec<Line>] {
        &self.cols
    }

    fn candidate_counts(&self) -> (usize, usize) {
        (
            self.rows.iter().map(Vec::len).sum(),
            self.cols.iter().map(Vec::len).sum(),
        )
    }

    /// One propagation pass. Returns the domain image it filtered against, and whether any
    /// candidate was eliminated.
    pub fn trim(&mut self) -> (DomainImage, bool) {
        let (height, width) = (self.rows.len(), self.cols.len());
        let image = DomainImage::from_row_candidates(&self.rows, width)
            .intersect(&DomainImage::from_col_candidates(&self.cols, height));

        let limit = self.config.filter_limit.unwrap_or(usize::MAX);
        let mut changed = false;

        for (r, possibles) in self.rows.iter_mut().enumerate() {
            if possibles.len() > limit {
                trace!("R{}: {} candidates; not filtering", r + 1, possibles.len());
                continue;
            }
            let before = possibles.len();
            possibles.retain(|line| fits(line, image.row(r)));
            changed |= possibles.len() != before;
        }

        for (c, possibles) in self.cols.iter_mut().enumerate() {
            if possibles.len() > limit {
                trace!("C{}: {} candidates; not filtering", c + 1, possibles.len());
                continue;
            }
            let before = possibles.len();
            possibles.retain(|line| fits(line, image.column(c)));
            changed |= possibles.len() != before;
        }

        (image, changed)
    }

    /// Trims until nothing changes. Returns the number of passes that changed something, and
    /// the final domain image.
    pub fn propagate(&mut self) -> (usize, DomainImage) {
        let mut iterations = 0;
        let mut prev: Option<DomainImage> = None;
        loop {
            let (image, changed) = self.trim();
            let (row_cands, col_cands) = self.candidate_counts();
            debug!(
                "pass {}: {} known cells, {} row candidates, {} column candidates",
                iterations + 1,
                image.known_cells(),
                row_cands,
                col_cands
            );
            if let Some(prev) = &prev {
                debug_assert!(image.is_subset_of(prev), "propagation widened a cell");
            }
            if self.config.trace {
                display_pass(iterations + 1, prev.as_ref(), &image, &self.puzzle.palette);
            }
            if !changed {
                return (iterations, image);
            }
            iterations += 1;
            prev = Some(image);
        }
    }

    /// Is there still some column candidate agreeing with every row placed so far?
    fn check_weave(&self, this_row: usize) -> bool {
        let grid = &self.grid;
        self.cols.iter().enumerate().all(|(c, possibles)| {
            possibles
                .iter()
                .any(|line| (0..=this_row).all(|r| line[r] == grid.get(r, c)))
        })
    }

    /// Tries every combination of row candidates, top to bottom, abandoning a row as soon as
    /// some column can no longer be completed.
    pub fn weave(&mut self, observer: &mut dyn Observer) {
        let height = self.rows.len();
        if height == 0 {
            return;
        }
        let progress = if self.config.progress {
            indicatif::ProgressBar::new_spinner()
        } else {
            indicatif::ProgressBar::hidden()
        };

        // For each row, the index of the next candidate to try.
        let mut next = vec![0_usize; height];
        let mut this_row = 0;

        while !self.stopped {
            if next[this_row] == self.rows[this_row].len() {
                // Out of candidates: back up.
                next[this_row] = 0;
                if this_row == 0 {
                    break;
                }
                this_row -= 1;
                continue;
            }

            let idx = next[this_row];
            next[this_row] += 1;
            self.grid.set_row(this_row, &self.rows[this_row][idx]);
            self.nodes += 1;

            if self.nodes % 4096 == 0 {
                progress.set_message(format!(
                    "nodes: {: >10}  solutions: {: >6}  row: {: >4}",
                    self.nodes,
                    self.solutions,
                    this_row + 1
                ));
                progress.tick();
            }

            if !self.check_weave(this_row) {
                continue;
            }

            if this_row == height - 1 {
                self.solutions += 1;
                observer.solution(&self.grid);
                if self.solutions >= self.config.max_solutions {
                    self.stopped = true;
                }
            } else {
                this_row += 1;
            }
        }

        progress.finish_and_clear();
        debug!(
            "weaving done: {} nodes, {} solutions{}",
            self.nodes,
            self.solutions,
            if self.stopped { " (limit reached)" } else { "" }
        );
    }
}

fn display_pass(pass: usize, prev: Option<&DomainImage>, image: &DomainImage, palette: &Palette) {
    println!("{}", format!("pass {}:", pass).bold());
    for r in 0..image.nrows() {
        for c in 0..image.ncols() {
            let cell = image.get(r, c);
            let ch = match cell.known_or() {
                Some(color) => palette.get(&color).map_or('#', |ci| ci.ch),
                None if cell.contradictory() => '!',
                None => '?',
            };
            let narrowed = prev.map_or(false, |p| p.get(r, c) != cell);
            if narrowed {
                print!("{}", ch.to_string().underline());
            } else {
                print!("{}", ch);
            }
        }
        println!();
    }
    println!();
}

/// Receives what a solve discovers, as it discovers it.
pub trait Observer {
    /// Called once propagation reaches its fixpoint, before any solution.
    fn propagated(&mut self, _iterations: usize, _preliminary: &DomainImage) {}

    fn solution(&mut self, grid: &Grid);
}

struct OnSolution<F>(F);

impl<F: FnMut(&Grid)> Observer for OnSolution<F> {
    fn solution(&mut self, grid: &Grid) {
        (self.0)(grid)
    }
}

/// Finds solutions to `puzzle`, handing each to `on_solution` in discovery order.
#[allow(dead_code)] // The command line uses `solve_observed`.
pub fn solve(
    puzzle: &Puzzle,
    config: &SolveConfig,
    on_solution: impl FnMut(&Grid),
) -> anyhow::Result<Report> {
    solve_observed(puzzle, config, &mut OnSolution(on_solution))
}

pub fn solve_observed(
    puzzle: &Puzzle,
    config: &SolveConfig,
    observer: &mut dyn Observer,
) -> anyhow::Result<Report> {
    if config.max_solutions == 0 {
        bail!("the solution limit must be at least 1");
    }
    puzzle.validate()?;

    let mut solver = Solver::new(puzzle, config)?;
    let (row_cands, col_cands) = solver.candidate_counts();
    info!(
        "solving {}x{}: {} row candidates, {} column candidates",
        puzzle.rows.len(),
        puzzle.cols.len(),
        row_cands,
        col_cands
    );

    let (iterations, preliminary) = solver.propagate();
    observer.propagated(iterations, &preliminary);
    solver.weave(observer);

    Ok(Report {
        iterations,
        solutions: solver.solutions,
        nodes: solver.nodes,
        hit_limit: solver.stopped,
        preliminary,
    })
}

/// Like `solve`, but keeps every solution.
#[allow(dead_code)]
pub fn solve_collect(
    puzzle: &Puzzle,
    config: &SolveConfig,
) -> anyhow::Result<(Report, Vec<Grid>)> {
    let mut found = vec![];
    let report = solve(puzzle, config, |grid| found.push(grid.clone()))?;
    Ok((report, found))
}

#[cfg(test)]
mod tests {
    use crate::grid_solve::{solve, solve_collect, SolveConfig, Solver};
    use crate::puzzle::{Clue, Color, ColorInfo, Grid, Palette, Puzzle, BACKGROUND};

    const A: Color = Color(1);
    const B: Color = Color(2);

    fn palette() -> Palette {
        let mut palette = Palette::new();
        for (color, ch, name, rgb) in [
            (BACKGROUND, '.', "white", (255, 255, 255)),
            (A, 'A', "ColorA", (255, 0, 0)),
            (B, 'B', "ColorB", (0, 0, 255)),
        ] {
            palette.insert(
                color,
                ColorInfo {
                    ch,
                    name: name.to_string(),
                    rgb,
                    color,
                },
            );
        }
        palette
    }

    fn puzzle_from_grid(rows: &[Vec<Color>]) -> (Puzzle, Grid) {
        let grid = Grid::from_rows(rows).unwrap();
        let puzzle = Puzzle {
            palette: palette(),
            rows: grid
                .rows()
                .map(|row| Clue::compile(&row.to_vec()).unwrap())
                .collect(),
            cols: (0..grid.ncols())
                .map(|c| Clue::compile(&grid.column(c).to_vec()).unwrap())
                .collect(),
        };
        (puzzle, grid)
    }

    #[test]
    fn full_square() {
        let (puzzle, grid) = puzzle_from_grid(&vec![vec![A; 3]; 3]);
        let (report, found) = solve_collect(&puzzle, &SolveConfig::default()).unwrap();
        assert_eq!(report.iterations, 0);
        assert_eq!(report.solutions, 1);
        assert!(!report.hit_limit);
        assert_eq!(found, vec![grid]);
        assert_eq!(report.preliminary.known_cells(), 9);
    }

    #[test]
    fn checkerboard() {
        let (puzzle, grid) = puzzle_from_grid(&[vec![A, B], vec![B, A]]);
        let (report, found) = solve_collect(&puzzle, &SolveConfig::default()).unwrap();
        assert_eq!(report.solutions, 1);
        assert_eq!(found, vec![grid]);
    }

    #[test]
    fn all_background() {
        let (puzzle, grid) = puzzle_from_grid(&[vec![BACKGROUND; 2], vec![BACKGROUND; 2]]);
        let (report, found) = solve_collect(&puzzle, &SolveConfig::default()).unwrap();
        assert_eq!(report.solutions, 1);
        assert_eq!(found, vec![grid]);
    }

    #[test]
    fn ambiguous_diagonal() {
        // Both diagonals satisfy every clue.
        let (puzzle, _) = puzzle_from_grid(&[vec![A, BACKGROUND], vec![BACKGROUND, A]]);
        let (report, found) = solve_collect(&puzzle, &SolveConfig::default()).unwrap();
        assert_eq!(report.iterations, 0);
        assert_eq!(report.solutions, 2);
        assert_eq!(found.len(), 2);
        assert!(!report.preliminary.get(0, 0).is_known());

        let limited = SolveConfig {
            max_solutions: 1,
            ..SolveConfig::default()
        };
        let (report, found) = solve_collect(&puzzle, &limited).unwrap();
        assert_eq!(report.solutions, 1);
        assert_eq!(found.len(), 1);
        assert!(report.hit_limit);
    }

    #[test]
    fn propagation_narrows_then_settles() {
        let (puzzle, grid) = puzzle_from_grid(&[
            vec![A, A, A, BACKGROUND],
            vec![BACKGROUND, B, BACKGROUND, BACKGROUND],
            vec![A, BACKGROUND, A, A],
        ]);
        let config = SolveConfig::default();
        let mut solver = Solver::new(&puzzle, &config).unwrap();

        let (first, changed) = solver.trim();
        assert!(changed);
        let (second, _) = solver.trim();
        assert!(second.is_subset_of(&first));

        let (_, image) = solver.propagate();
        for r in 0..grid.nrows() {
            assert!(solver.row_candidates()[r].contains(&grid.row(r).to_vec()));
        }
        for c in 0..grid.ncols() {
            assert!(solver.col_candidates()[c].contains(&grid.column(c).to_vec()));
        }
        assert_eq!(image.known_cells(), 12);
    }

    #[test]
    fn contradictory_clues_have_no_solutions() {
        // Row 1 wants two A's, but the columns each want one B.
        let puzzle = Puzzle {
            palette: palette(),
            rows: vec![Clue::from_blocks(&[(A, 2)])],
            cols: vec![Clue::from_blocks(&[(B, 1)]), Clue::from_blocks(&[(B, 1)])],
        };
        let mut calls = 0;
        let report = solve(&puzzle, &SolveConfig::default(), |_| calls += 1).unwrap();
        assert_eq!(report.solutions, 0);
        assert_eq!(calls, 0);
        assert!(report.preliminary.get(0, 0).contradictory());
    }

    #[test]
    fn rejects_bad_input() {
        let (puzzle, _) = puzzle_from_grid(&[vec![A]]);
        let zero = SolveConfig {
            max_solutions: 0,
            ..SolveConfig::default()
        };
        assert!(solve(&puzzle, &zero, |_| {}).is_err());

        let overlong = Puzzle {
            palette: palette(),
            rows: vec![Clue::from_blocks(&[(A, 2)])],
            cols: vec![Clue::from_blocks(&[(A, 1)])],
        };
        let err = solve(&overlong, &SolveConfig::default(), |_| {}).unwrap_err();
        assert!(format!("{:#}", err).contains("Row 1"), "{:#}", err);

        // An empty block fits an empty line once per gap, which would repeat solutions.
        let empty_block = Puzzle {
            palette: palette(),
            rows: vec![Clue::from_blocks(&[(A, 0)])],
            cols: vec![Clue::from_blocks(&[])],
        };
        let mut calls = 0;
        assert!(solve(&empty_block, &SolveConfig::default(), |_| calls += 1).is_err());
        assert_eq!(calls, 0);
    }

    #[test]
    fn filter_limit_is_still_sound() {
        let (puzzle, grid) = puzzle_from_grid(&[
            vec![A, BACKGROUND, BACKGROUND, B],
            vec![A, A, BACKGROUND, B],
            vec![BACKGROUND, A, B, B],
        ]);
        let unlimited = solve_collect(&puzzle, &SolveConfig::default()).unwrap();
        let limited = SolveConfig {
            filter_limit: Some(1),
            ..SolveConfig::default()
        };
        let (report, found) = solve_collect(&puzzle, &limited).unwrap();
        assert!(found.contains(&grid));
        assert_eq!(report.solutions, unlimited.0.solutions);
        assert_eq!(found, unlimited.1);
    }
}
