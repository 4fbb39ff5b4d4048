use std::collections::HashMap;

use anyhow::{bail, Context};
use itertools::Itertools;
use ndarray::{Array2, ArrayView1};

#[derive(PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Hash, Debug)]
pub struct Color(pub u8);

pub static BACKGROUND: Color = Color(0);

/// Per-cell color sets are 32-bit masks.
pub const MAX_COLORS: usize = 32;

#[derive(PartialEq, Eq, Clone, Debug)]
pub struct ColorInfo {
    pub ch: char,
    pub name: String,
    pub rgb: (u8, u8, u8),
    pub color: Color,
}

pub type Palette = HashMap<Color, ColorInfo>;

/// One piece of a clue. Gaps are background runs with a minimum length and no maximum; blocks
/// are runs of exactly `len` cells of one foreground color.
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum Segment {
    Gap { min: u16 },
    Block { color: Color, len: u16 },
}

impl Segment {
    pub fn min_len(&self) -> u16 {
        match *self {
            Segment::Gap { min } => min,
            Segment::Block { len, .. } => len,
        }
    }

    pub fn is_gap(&self) -> bool {
        matches!(self, Segment::Gap { .. })
    }
}

/// The canonical description of a row or column: blocks and gaps, starting and ending with a gap.
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct Clue {
    segments: Vec<Segment>,
}

impl Clue {
    /// Accepts a clue that was supplied directly rather than compiled.
    #[allow(dead_code)] // The loaders only ever build clues from blocks.
    pub fn new(segments: Vec<Segment>) -> anyhow::Result<Clue> {
        let clue = Clue { segments };
        clue.check()?;
        Ok(clue)
    }

    /// Rejects clues that would produce duplicate candidates or let blocks merge.
    pub fn check(&self) -> anyhow::Result<()> {
        let segments = &self.segments;
        if !segments.iter().any(Segment::is_gap) {
            bail!("malformed clue: no gap segments");
        }
        if !segments.first().map_or(false, Segment::is_gap)
            || !segments.last().map_or(false, Segment::is_gap)
        {
            bail!("malformed clue: must start and end with a gap");
        }
        if segments.windows(2).any(|pair| pair[0].is_gap() && pair[1].is_gap()) {
            bail!("malformed clue: two gaps in a row");
        }

        // The last block's color, until a gap of at least one cell separates it.
        let mut unseparated: Option<Color> = None;
        for segment in segments {
            match *segment {
                Segment::Gap { min } => {
                    if min > 0 {
                        unseparated = None;
                    }
                }
                Segment::Block { color, len } => {
                    if color == BACKGROUND {
                        bail!("malformed clue: block of background color");
                    }
                    if len == 0 {
                        bail!("malformed clue: empty block of {:?}", color);
                    }
                    if unseparated == Some(color) {
                        bail!(
                            "malformed clue: blocks of {:?} with nothing between them",
                            color
                        );
                    }
                    unseparated = Some(color);
                }
            }
        }
        Ok(())
    }

    /// Builds a clue from an ordinary list of blocks. Blocks of the same color need at least one
    /// background cell between them, or they'd merge into a single block.
    pub fn from_blocks(blocks: &[(Color, u16)]) -> Clue {
        let mut segments = vec![Segment::Gap { min: 0 }];
        for (i, &(color, len)) in blocks.iter().enumerate() {
            segments.push(Segment::Block { color, len });
            if let Some(&(next_color, _)) = blocks.get(i + 1) {
                let min = if next_color == color { 1 } else { 0 };
                segments.push(Segment::Gap { min });
            }
        }
        if !blocks.is_empty() {
            segments.push(Segment::Gap { min: 0 });
        }
        Clue { segments }
    }

    /// Compiles a concrete line into its clue. Only runs too long for a `u16` fail.
    pub fn compile(line: &[Color]) -> anyhow::Result<Clue> {
        Ok(Clue::from_blocks(&runs(line)?))
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn gap_count(&self) -> usize {
        self.segments.iter().filter(|s| s.is_gap()).count()
    }

    /// The length of the shortest line satisfying this clue.
    pub fn min_len(&self) -> usize {
        self.segments.iter().map(|s| s.min_len() as usize).sum()
    }

    pub fn blocks(&self) -> impl Iterator<Item = (Color, u16)> + '_ {
        self.segments.iter().filter_map(|s| match *s {
            Segment::Block { color, len } => Some((color, len)),
            Segment::Gap { .. } => None,
        })
    }

    /// E.g. "2a 1a 3b", or "0" for a line with no foreground.
    pub fn describe(&self, palette: &Palette) -> String {
        if self.blocks().next().is_none() {
            return "0".to_string();
        }
        self.blocks()
            .map(|(color, len)| {
                let ch = palette.get(&color).map_or('?', |ci| ci.ch);
                format!("{}{}", len, ch)
            })
            .join(" ")
    }
}

/// Maximal runs of foreground color, as (color, length).
fn runs(line: &[Color]) -> anyhow::Result<Vec<(Color, u16)>> {
    let mut res: Vec<(Color, u16)> = vec![];
    let mut prev = BACKGROUND;
    for &color in line {
        if color != BACKGROUND {
            match res.last_mut() {
                Some((last_color, len)) if prev == color && *last_color == color => {
                    *len = len.checked_add(1).with_context(|| {
                        format!("run of {:?} is longer than {} cells", color, u16::MAX)
                    })?;
                }
                _ => res.push((color, 1)),
            }
        }
        prev = color;
    }
    Ok(res)
}

/// An R×C grid of concrete colors. Rows are the unit of mutation; columns are read-only views.
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct Grid {
    cells: Array2<Color>,
}

impl Grid {
    pub fn new(rows: usize, cols: usize) -> Grid {
        Grid {
            cells: Array2::from_elem((rows, cols), BACKGROUND),
        }
    }

    pub fn from_rows(rows: &[Vec<Color>]) -> anyhow::Result<Grid> {
        let width = rows.first().map_or(0, |r| r.len());
        let mut grid = Grid::new(rows.len(), width);
        for (r, row) in rows.iter().enumerate() {
            if row.len() != width {
                bail!(
                    "row {} has {} cells, but the first row has {}",
                    r + 1,
                    row.len(),
                    width
                );
            }
            grid.set_row(r, row);
        }
        Ok(grid)
    }

    pub fn nrows(&self) -> usize {
        self.cells.nrows()
    }

    pub fn ncols(&self) -> usize {
        self.cells.ncols()
    }

    pub fn get(&self, r: usize, c: usize) -> Color {
        self.cells[(r, c)]
    }

    pub fn set(&mut self, r: usize, c: usize, color: Color) {
        self.cells[(r, c)] = color;
    }

    pub fn row(&self, r: usize) -> ArrayView1<Color> {
        self.cells.row(r)
    }

    pub fn column(&self, c: usize) -> ArrayView1<Color> {
        self.cells.column(c)
    }

    pub fn set_row(&mut self, r: usize, line: &[Color]) {
        assert_eq!(line.len(), self.ncols(), "row length mismatch");
        self.cells.row_mut(r).assign(&ArrayView1::from(line));
    }

    pub fn rows(&self) -> impl Iterator<Item = ArrayView1<'_, Color>> + '_ {
        self.cells.rows().into_iter()
    }
}

#[derive(Clone, Debug)]
pub struct Solution {
    pub palette: Palette, // should include the background!
    pub grid: Grid,
}

#[derive(Clone, Debug)]
pub struct Puzzle {
    pub palette: Palette, // should include the background!
    pub rows: Vec<Clue>,
    pub cols: Vec<Clue>,
}

impl Puzzle {
    /// Checks everything the solver assumes about its input.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.rows.is_empty() || self.cols.is_empty() {
            bail!(
                "puzzle must have at least one row and column (got {}x{})",
                self.rows.len(),
                self.cols.len()
            );
        }
        if self.palette.len() > MAX_COLORS {
            bail!(
                "{} colors; at most {} are supported",
                self.palette.len(),
                MAX_COLORS
            );
        }
        check_lanes(&self.rows, self.cols.len(), "Row", &self.palette)?;
        check_lanes(&self.cols, self.rows.len(), "Column", &self.palette)?;
        Ok(())
    }
}

fn check_lanes(clues: &[Clue], len: usize, kind: &str, palette: &Palette) -> anyhow::Result<()> {
    for (idx, clue) in clues.iter().enumerate() {
        (|| -> anyhow::Result<()> {
            clue.check()?;
            if clue.min_len() > len {
                bail!("clue needs {} cells, but the line has {}", clue.min_len(), len);
            }
            if let Some((color, _)) = clue.blocks().find(|(c, _)| !palette.contains_key(c)) {
                bail!("color {:?} is not in the palette", color);
            }
            Ok(())
        })()
        .with_context(|| format!("{} {} ({})", kind, idx + 1, clue.describe(palette)))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const W: Color = Color(0);
    const A: Color = Color(1);
    const B: Color = Color(2);

    fn gap(min: u16) -> Segment {
        Segment::Gap { min }
    }

    fn block(color: Color, len: u16) -> Segment {
        Segment::Block { color, len }
    }

    #[test]
    fn compile_separates_same_colored_blocks() {
        let clue = Clue::compile(&[A, A, W, A, W, W, B, A]).unwrap();
        assert_eq!(
            clue.segments(),
            &[
                gap(0),
                block(A, 2),
                gap(1),
                block(A, 1),
                gap(0),
                block(B, 1),
                gap(0),
                block(A, 1),
                gap(0)
            ]
        );
        assert_eq!(clue.min_len(), 6);
        assert_eq!(clue.gap_count(), 5);
    }

    #[test]
    fn compile_all_background() {
        let clue = Clue::compile(&[W, W, W]).unwrap();
        assert_eq!(clue.segments(), &[gap(0)]);
        assert_eq!(clue.min_len(), 0);
    }

    #[test]
    fn compile_checkerboard_row() {
        let clue = Clue::compile(&[A, B]).unwrap();
        assert_eq!(clue.segments(), &[gap(0), block(A, 1), gap(0), block(B, 1), gap(0)]);
    }

    #[test]
    fn new_rejects_malformed() {
        assert!(Clue::new(vec![block(A, 1)]).is_err());
        assert!(Clue::new(vec![]).is_err());
        assert!(Clue::new(vec![block(A, 1), gap(0)]).is_err());
        assert!(Clue::new(vec![gap(0), block(W, 1), gap(0)]).is_err());
        assert!(Clue::new(vec![gap(0), block(A, 0), gap(0)]).is_err());
        assert!(Clue::new(vec![gap(0), block(A, 2), block(B, 1), gap(0)]).is_ok());

        // Consecutive gaps would hand out the same slack twice.
        assert!(Clue::new(vec![gap(0), gap(0)]).is_err());
        assert!(Clue::new(vec![gap(0), block(A, 1), gap(0), gap(1)]).is_err());

        // Same-colored blocks need a background cell between them, or they merge.
        assert!(Clue::new(vec![gap(0), block(A, 1), gap(0), block(A, 1), gap(0)]).is_err());
        assert!(Clue::new(vec![gap(0), block(A, 1), block(A, 1), gap(0)]).is_err());
        assert!(Clue::new(vec![gap(0), block(A, 1), gap(1), block(A, 1), gap(0)]).is_ok());
        assert!(
            Clue::new(vec![gap(0), block(A, 1), gap(0), block(B, 1), gap(0), block(A, 1), gap(0)])
                .is_ok()
        );
    }

    #[test]
    fn compile_rejects_overlong_runs() {
        let line = vec![A; u16::MAX as usize + 1];
        assert!(Clue::compile(&line).is_err());

        let clue = Clue::compile(&line[1..]).unwrap();
        assert_eq!(clue.blocks().collect::<Vec<_>>(), vec![(A, u16::MAX)]);
    }

    #[test]
    fn grid_rows_and_columns() {
        let mut grid = Grid::new(2, 3);
        grid.set_row(1, &[A, B, A]);
        assert_eq!(grid.row(1).to_vec(), vec![A, B, A]);
        assert_eq!(grid.column(1).to_vec(), vec![W, B]);
        assert_eq!(grid.get(1, 2), A);
    }

    #[test]
    #[should_panic]
    fn grid_out_of_range() {
        let grid = Grid::new(2, 2);
        grid.get(2, 0);
    }

    fn palette() -> Palette {
        let mut palette = Palette::new();
        for (color, ch) in [(W, '.'), (A, 'a')] {
            palette.insert(
                color,
                ColorInfo {
                    ch,
                    name: ch.to_string(),
                    rgb: (0, 0, 0),
                    color,
                },
            );
        }
        palette
    }

    #[test]
    fn validate_catches_overlong_clue() {
        let puzzle = Puzzle {
            palette: palette(),
            rows: vec![Clue::from_blocks(&[(A, 3)])],
            cols: vec![Clue::from_blocks(&[(A, 1)]); 2],
        };
        let err = puzzle.validate().unwrap_err();
        assert!(format!("{:#}", err).contains("Row 1 (3a)"), "{:#}", err);
    }

    #[test]
    fn validate_catches_malformed_blocks() {
        // A zero-length block would be satisfied twice over by an empty line.
        let empty_block = Puzzle {
            palette: palette(),
            rows: vec![Clue::from_blocks(&[(A, 0)])],
            cols: vec![Clue::from_blocks(&[])],
        };
        let err = empty_block.validate().unwrap_err();
        assert!(format!("{:#}", err).contains("empty block"), "{:#}", err);

        let background_block = Puzzle {
            palette: palette(),
            rows: vec![Clue::from_blocks(&[(W, 1)])],
            cols: vec![Clue::from_blocks(&[])],
        };
        let err = background_block.validate().unwrap_err();
        assert!(format!("{:#}", err).contains("background"), "{:#}", err);
    }
}
