use crate::{
    grid_solve::DomainImage,
    puzzle::{Clue, Grid, Palette, Puzzle, BACKGROUND},
};

pub fn emit_grid(grid: &Grid, palette: &Palette) -> String {
    let mut res = String::new();
    for row in grid.rows() {
        for color in row {
            res.push(palette.get(color).map_or('#', |ci| ci.ch));
        }
        res.push('\n');
    }
    res
}

/// Cells that propagation pinned down get their color's character; the rest get `?`.
pub fn emit_domain(domain: &DomainImage, palette: &Palette) -> String {
    let mut res = String::new();
    for r in 0..domain.nrows() {
        for c in 0..domain.ncols() {
            res.push(match domain.get(r, c).known_or() {
                Some(color) => palette.get(&color).map_or('#', |ci| ci.ch),
                None => '?',
            });
        }
        res.push('\n');
    }
    res
}

fn emit_webpbn_lanes(res: &mut String, lanes: &[Clue], puzzle: &Puzzle) {
    for lane in lanes {
        res.push_str("<line>");
        for (color, count) in lane.blocks() {
            res.push_str(&format!(
                r#"<count color="{}">{}</count>"#,
                puzzle.palette[&color].name, count
            ));
        }
        res.push_str("</line>\n");
    }
}

pub fn emit_webpbn(puzzle: &Puzzle) -> String {
    use indoc::formatdoc;

    let background = puzzle
        .palette
        .get(&BACKGROUND)
        .map_or("white", |ci| ci.name.as_str());

    let mut res = String::new();
    // If you add <!DOCTYPE pbn SYSTEM "https://webpbn.com/pbn-0.3.dtd">, `pbnsolve` warns.
    res.push_str(&formatdoc!(
        r#"
        <?xml version="1.0"?>
        <puzzleset>
        <puzzle type="grid" defaultcolor="{}">
        <source>pbn-weave</source>
        "#,
        background
    ));

    let mut colors: Vec<_> = puzzle.palette.values().collect();
    colors.sort_by_key(|ci| ci.color);
    for color in colors {
        let (r, g, b) = color.rgb;
        res.push_str(&format!(
            r#"<color name="{}" char="{}">{:02X}{:02X}{:02X}</color>"#,
            color.name, color.ch, r, g, b
        ));
        res.push('\n');
    }

    res.push_str(r#"<clues type="columns">"#);
    res.push('\n');
    emit_webpbn_lanes(&mut res, &puzzle.cols, puzzle);
    res.push_str("</clues>\n");

    res.push_str(r#"<clues type="rows">"#);
    res.push('\n');
    emit_webpbn_lanes(&mut res, &puzzle.rows, puzzle);
    res.push_str("</clues>\n");

    res.push_str("</puzzle></puzzleset>\n");

    res
}
