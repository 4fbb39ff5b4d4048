use anyhow::bail;
use ndarray::ArrayView1;

use crate::puzzle::{Clue, Color, Segment, BACKGROUND};

/// One concrete coloring of a row or column.
pub type Line = Vec<Color>;

/// The set of colors a cell could still be.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Cell {
    possible_color_mask: u32,
}

impl Cell {
    pub fn new_impossible() -> Cell {
        Cell {
            possible_color_mask: 0,
        }
    }

    pub fn actually_could_be(&mut self, color: Color) {
        self.possible_color_mask |= 1 << color.0;
    }

    pub fn can_be(&self, color: Color) -> bool {
        (self.possible_color_mask & 1 << color.0) != 0
    }

    pub fn is_known(&self) -> bool {
        self.possible_color_mask.is_power_of_two()
    }

    pub fn known_or(&self) -> Option<Color> {
        if !self.is_known() {
            None
        } else {
            Some(Color(self.possible_color_mask.ilog2() as u8))
        }
    }

    pub fn contradictory(&self) -> bool {
        self.possible_color_mask == 0
    }

    pub fn intersect(&self, other: Cell) -> Cell {
        Cell {
            possible_color_mask: self.possible_color_mask & other.possible_color_mask,
        }
    }

    pub fn is_subset_of(&self, other: Cell) -> bool {
        self.possible_color_mask & !other.possible_color_mask == 0
    }
}

/// Does every cell of `line` have a color that `lane` still allows?
pub fn fits(line: &[Color], lane: ArrayView1<Cell>) -> bool {
    line.iter().zip(lane.iter()).all(|(color, cell)| cell.can_be(*color))
}

/// Produces the colors of a line, given a clue and how much extra background each gap gets.
struct Arrangement<'a> {
    segments: &'a [Segment],
    extras: &'a [u16],

    segment: usize,
    gap: usize,
    pos_in_segment: u16,
}

impl<'a> Arrangement<'a> {
    fn new(clue: &'a Clue, extras: &'a [u16]) -> Arrangement<'a> {
        Arrangement {
            segments: clue.segments(),
            extras,
            segment: 0,
            gap: 0,
            pos_in_segment: 0,
        }
    }
}

impl<'a> Iterator for Arrangement<'a> {
    type Item = Color;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (color, len) = match *self.segments.get(self.segment)? {
                Segment::Gap { min } => (BACKGROUND, min + self.extras[self.gap]),
                Segment::Block { color, len } => (color, len),
            };

            if self.pos_in_segment < len {
                self.pos_in_segment += 1;
                return Some(color);
            }

            // Off the end of this segment:
            if self.segments[self.segment].is_gap() {
                self.gap += 1;
            }
            self.segment += 1;
            self.pos_in_segment = 0;
        }
    }
}

/// Every line of length `len` that satisfies `clue`, without duplicates.
///
/// The spare cells (the "slack") are handed out to the gaps left to right: the first gap takes
/// each amount from all of the slack down to none, and the rest is distributed recursively.
pub fn candidates(clue: &Clue, len: usize) -> anyhow::Result<Vec<Line>> {
    if len == 0 {
        bail!("candidate lines must have positive length");
    }
    if clue.gap_count() == 0 {
        bail!("malformed clue: no gap segments");
    }
    if clue.min_len() > len {
        bail!(
            "malformed clue: needs {} cells, but the line has {}",
            clue.min_len(),
            len
        );
    }
    if len > u16::MAX as usize {
        bail!("line length {} is too long", len);
    }

    let slack = (len - clue.min_len()) as u16;
    let mut extras = vec![0_u16; clue.gap_count()];
    let mut res = vec![];
    distribute(clue, &mut extras, 0, slack, &mut res);
    Ok(res)
}

fn distribute(clue: &Clue, extras: &mut [u16], gap: usize, slack: u16, res: &mut Vec<Line>) {
    if gap == extras.len() - 1 {
        // Only one gap left; it takes everything.
        extras[gap] = slack;
        res.push(Arrangement::new(clue, extras).collect());
        return;
    }
    if slack == 0 {
        for extra in &mut extras[gap..] {
            *extra = 0;
        }
        res.push(Arrangement::new(clue, extras).collect());
        return;
    }
    for amount in (0..=slack).rev() {
        extras[gap] = amount;
        distribute(clue, extras, gap + 1, slack - amount, res);
    }
}
