use anyhow::{bail, Context};
use image::{DynamicImage, GenericImageView, Rgba};
use log::warn;
use std::{
    collections::{BTreeSet, HashMap},
    path::Path,
};

use crate::puzzle::{
    Clue, Color, ColorInfo, Grid, Palette, Puzzle, Solution, BACKGROUND, MAX_COLORS,
};

fn parse_hex_rgb(text: &str) -> Option<(u8, u8, u8)> {
    let hex_color = regex::Regex::new(
        r"^#?([0-9A-Fa-f][0-9A-Fa-f])([0-9A-Fa-f][0-9A-Fa-f])([0-9A-Fa-f][0-9A-Fa-f])$",
    )
    .ok()?;
    let (_, component_strs) = hex_color.captures(text.trim())?.extract();
    let [r, g, b] = component_strs.map(|s| u8::from_str_radix(s, 16).unwrap_or(0));
    Some((r, g, b))
}

pub fn image_to_solution(image: &DynamicImage) -> anyhow::Result<Solution> {
    let (width, height) = image.dimensions();

    let mut palette = HashMap::<Rgba<u8>, ColorInfo>::new();
    let mut grid = Grid::new(height as usize, width as usize);

    palette.insert(
        Rgba::<u8>([255, 255, 255, 255]),
        ColorInfo {
            ch: '.',
            name: "white".to_owned(),
            rgb: (255, 255, 255),
            color: BACKGROUND,
        },
    );

    let mut next_char = 'a';
    let mut next_color_idx: u8 = 1; // BACKGROUND is 0

    for y in 0..height {
        for x in 0..width {
            let pixel: Rgba<u8> = image.get_pixel(x, y);
            if !palette.contains_key(&pixel) {
                if palette.len() == MAX_COLORS {
                    bail!("more than {} colors in the image", MAX_COLORS);
                }
                let [r, g, b, _] = pixel.0;
                let this_color = Color(next_color_idx);
                next_color_idx += 1;

                let info = if r == 0 && g == 0 && b == 0 {
                    ColorInfo {
                        ch: '#',
                        name: "black".to_string(),
                        rgb: (0, 0, 0),
                        color: this_color,
                    }
                } else {
                    let this_char = next_char;
                    next_char = (next_char as u8 + 1) as char;
                    ColorInfo {
                        ch: this_char,
                        name: format!("{}{:02X}{:02X}{:02X}", this_char, r, g, b),
                        rgb: (r, g, b),
                        color: this_color,
                    }
                };
                palette.insert(pixel, info);
            }

            grid.set(y as usize, x as usize, palette[&pixel].color);
        }
    }

    Ok(Solution {
        palette: palette
            .into_values()
            .map(|color_info| (color_info.color, color_info))
            .collect(),
        grid,
    })
}

/// Reads an XPM image with one character per pixel. The color listed as `#ffffff` is the
/// background.
pub fn xpm_to_solution(xpm: &str) -> anyhow::Result<Solution> {
    let quoted = regex::Regex::new(r#""([^"]*)""#)?;
    let mut strings = quoted
        .captures_iter(xpm)
        .map(|cap| cap.get(1).map_or("", |m| m.as_str()));

    let header = strings.next().context("XPM: missing header")?;
    let numbers = header
        .split_whitespace()
        .map(|s| s.parse::<usize>())
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("XPM: bad header {:?}", header))?;
    let &[width, height, num_colors, chars_per_pixel] = numbers.as_slice() else {
        bail!("XPM: expected four numbers in the header, got {:?}", header);
    };
    if chars_per_pixel != 1 {
        bail!("XPM: only one character per pixel is supported");
    }
    if num_colors > MAX_COLORS {
        bail!("XPM: {} colors; at most {} are supported", num_colors, MAX_COLORS);
    }

    let mut entries: Vec<(char, String)> = vec![];
    for _ in 0..num_colors {
        let line = strings.next().context("XPM: missing color definition")?;
        let ch = line.chars().next().context("XPM: empty color definition")?;
        let value = line[ch.len_utf8()..]
            .split_whitespace()
            .skip_while(|key| *key != "c")
            .nth(1)
            .with_context(|| format!("XPM: no 'c' value in {:?}", line))?;
        entries.push((ch, value.to_lowercase()));
    }

    let bg_ch = match entries
        .iter()
        .find(|(_, value)| value == "#ffffff" || value == "white")
    {
        Some((ch, _)) => *ch,
        None => {
            let fallback = if entries.iter().any(|(ch, _)| *ch == ' ') {
                ' '
            } else {
                entries.first().context("XPM: no colors")?.0
            };
            warn!("XPM has no white; using {:?} as the background", fallback);
            fallback
        }
    };

    let mut palette = Palette::new();
    let mut by_char = HashMap::<char, Color>::new();
    let mut next_color: u8 = 1;
    for (ch, value) in &entries {
        let color = if *ch == bg_ch {
            BACKGROUND
        } else {
            next_color += 1;
            Color(next_color - 1)
        };
        palette.insert(
            color,
            ColorInfo {
                ch: *ch,
                name: if color == BACKGROUND {
                    "white".to_string()
                } else {
                    format!("{}{}", ch, value.trim_start_matches('#'))
                },
                rgb: parse_hex_rgb(value).unwrap_or((0, 0, 0)),
                color,
            },
        );
        by_char.insert(*ch, color);
    }

    let mut rows = vec![];
    for y in 0..height {
        let line = strings
            .next()
            .with_context(|| format!("XPM: missing pixel row {}", y + 1))?;
        let mut row = Vec::with_capacity(width);
        for ch in line.chars().take(width) {
            match by_char.get(&ch) {
                Some(color) => row.push(*color),
                None => bail!("XPM: unknown color {:?} in row {}", ch, y + 1),
            }
        }
        if row.len() != width {
            bail!("XPM: row {} has {} pixels, expected {}", y + 1, row.len(), width);
        }
        rows.push(row);
    }

    Ok(Solution {
        palette,
        grid: Grid::from_rows(&rows)?,
    })
}

pub fn char_grid_to_solution(char_grid: &str) -> anyhow::Result<Solution> {
    let mut palette = HashMap::<char, ColorInfo>::new();

    // We want deterministic behavior
    let mut unused_chars = BTreeSet::<char>::new();
    for ch in char_grid.chars() {
        if ch == '\n' || ch == '\r' {
            continue;
        }
        unused_chars.insert(ch);
    }

    let mut bg_ch: Option<char> = None;

    // Look for a character that seems to represent a white background.
    for possible_bg in [' ', '.', '_', 'w', 'W', '0'] {
        if unused_chars.contains(&possible_bg) {
            bg_ch = Some(possible_bg);
        }
    }

    // But we need to *some* color as background to proceed!
    let bg_ch = match bg_ch {
        Some(x) => x,
        None => {
            let corner = char_grid
                .trim_start()
                .chars()
                .next()
                .context("empty character grid")?;
            warn!(
                "unable to guess which character is supposed to be the background; using {:?}",
                corner
            );
            corner
        }
    };

    palette.insert(
        bg_ch,
        ColorInfo {
            ch: bg_ch,
            name: "white".to_string(),
            rgb: (255, 255, 255),
            color: BACKGROUND,
        },
    );
    unused_chars.remove(&bg_ch);

    if unused_chars.len() >= MAX_COLORS {
        bail!("{} colors; at most {} are supported", unused_chars.len() + 1, MAX_COLORS);
    }

    let mut next_color: u8 = 1;
    for ch in unused_chars {
        let rgb = match ch {
            '#' | 'B' | 'b' | '1' => (0, 0, 0),
            'r' | 'R' => (255, 0, 0),
            'g' | 'G' => (0, 255, 0),
            'y' | 'Y' => (255, 255, 0),
            'c' | 'C' => (0, 255, 255),
            'm' | 'M' => (255, 0, 255),
            _ => (44 * (next_color % 5), 44 * (next_color % 5), 127),
        };
        palette.insert(
            ch,
            ColorInfo {
                ch,
                name: ch.to_string(),
                rgb,
                color: Color(next_color),
            },
        );
        next_color += 1;
    }

    let rows: Vec<Vec<Color>> = char_grid
        .lines()
        .filter(|line| !line.is_empty())
        .map(|line| line.chars().map(|ch| palette[&ch].color).collect())
        .collect();

    Ok(Solution {
        palette: palette
            .into_values()
            .map(|color_info| (color_info.color, color_info))
            .collect(),
        grid: Grid::from_rows(&rows).context("character grid is not rectangular")?,
    })
}

pub fn get_children<'a, 'input>(
    node: roxmltree::Node<'a, 'input>,
    tag: &str,
) -> anyhow::Result<Vec<roxmltree::Node<'a, 'input>>> {
    let mut res = vec![];

    for child in node.children() {
        if child.is_text() {
            let text = child.text().unwrap_or("");
            if text.trim() != "" {
                bail!("unexpected text: {}", text);
            }
        }
        if child.is_element() {
            if child.tag_name().name() == tag {
                res.push(child);
            } else {
                bail!(
                    "unexpected element {}; was looking for {tag}",
                    child.tag_name().name()
                )
            }
        }
    }

    Ok(res)
}

pub fn get_single_child<'a, 'input>(
    node: roxmltree::Node<'a, 'input>,
    tag: &str,
) -> anyhow::Result<roxmltree::Node<'a, 'input>> {
    let mut res = get_children(node, tag)?;
    if res.len() > 1 {
        bail!("expected only one element named {tag}");
    }
    res.pop()
        .with_context(|| format!("did not find the element {tag}"))
}

/// Reads a puzzle whose clues are given directly.
pub fn webpbn_to_puzzle(webpbn: &str) -> anyhow::Result<Puzzle> {
    let doc = roxmltree::Document::parse(webpbn)?;
    let puzzleset = doc.root_element();
    let puzzle = get_single_child(puzzleset, "puzzle")?;

    let default_color = puzzle
        .attribute("defaultcolor")
        .context("Expected a 'defaultcolor'")?;
    let mut next_color_index = 1;

    let mut named_colors = HashMap::<String, Color>::new();

    let mut res = Puzzle {
        palette: Palette::new(),
        rows: vec![],
        cols: vec![],
    };

    for puzzle_part in puzzle.children() {
        if puzzle_part.tag_name().name() == "color" {
            let color_name = puzzle_part
                .attribute("name")
                .context("Expected a color 'name'")?;
            let color = if color_name == default_color {
                BACKGROUND
            } else {
                next_color_index += 1;
                Color(next_color_index - 1)
            };

            let color_text = puzzle_part.text().context("Expected hex color in text")?;
            let rgb = parse_hex_rgb(color_text)
                .with_context(|| format!("Expected 6 hex digits, got {:?}", color_text))?;

            let color_info = ColorInfo {
                ch: puzzle_part
                    .attribute("char")
                    .and_then(|s| s.chars().next())
                    .context("Expected a color 'char'")?,
                name: color_name.to_string(),
                rgb,
                color,
            };

            res.palette.insert(color, color_info);
            named_colors.insert(color_name.to_string(), color);
        } else if puzzle_part.tag_name().name() == "clues" {
            let row = match puzzle_part.attribute("type") {
                Some("rows") => true,
                Some("columns") => false,
                other => bail!("Expected rows or columns, got {:?}", other),
            };

            let mut clue_lanes = vec![];

            for (idx, lane) in get_children(puzzle_part, "line")?.into_iter().enumerate() {
                let mut blocks = vec![];
                for block in get_children(lane, "count")? {
                    let color_name = block.attribute("color").unwrap_or("black");
                    let color = *named_colors
                        .get(color_name)
                        .with_context(|| format!("Unknown color {:?}", color_name))?;
                    if color == BACKGROUND {
                        bail!(
                            "Line {}: a count in the background color {:?}",
                            idx + 1,
                            color_name
                        );
                    }
                    let count = block
                        .text()
                        .unwrap_or("")
                        .trim()
                        .parse::<u16>()
                        .context("Expected a number.")?;
                    if count == 0 {
                        bail!("Line {}: counts must be positive", idx + 1);
                    }
                    blocks.push((color, count));
                }
                clue_lanes.push(Clue::from_blocks(&blocks));
            }

            if row {
                res.rows = clue_lanes;
            } else {
                res.cols = clue_lanes;
            }
        }
    }

    Ok(res)
}

fn quality_check(solution: &Solution) {
    let (height, width) = (solution.grid.nrows(), solution.grid.ncols());

    let bg_squares_found: usize = solution
        .grid
        .rows()
        .map(|row| row.iter().filter(|c| **c == BACKGROUND).count())
        .sum();

    if bg_squares_found < (width + height) {
        warn!("{} is a very small number of background squares", bg_squares_found);
    }

    if (width * height - bg_squares_found) < (width + height) {
        warn!(
            "{} is a very small number of foreground squares",
            width * height - bg_squares_found
        );
    }

    if solution.palette.len() > 10 {
        warn!("{} colors detected. That's probably too many.", solution.palette.len());
    }
}

/// Compiles every row and column of a finished picture into its clue.
pub fn solution_to_puzzle(solution: &Solution) -> anyhow::Result<Puzzle> {
    if solution.palette.len() > MAX_COLORS {
        bail!(
            "{} colors detected. Nonograms with more than {} colors are not supported.",
            solution.palette.len(),
            MAX_COLORS
        );
    }
    quality_check(solution);

    let grid = &solution.grid;
    let rows = (0..grid.nrows())
        .map(|r| Clue::compile(&grid.row(r).to_vec()).with_context(|| format!("Row {}", r + 1)))
        .collect::<anyhow::Result<Vec<_>>>()?;
    let cols = (0..grid.ncols())
        .map(|c| {
            Clue::compile(&grid.column(c).to_vec()).with_context(|| format!("Column {}", c + 1))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    Ok(Puzzle {
        palette: solution.palette.clone(),
        rows,
        cols,
    })
}

/// Loads a puzzle, picking the format from the file extension.
pub fn read_puzzle(path: &Path) -> anyhow::Result<Puzzle> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();
    let read_text =
        || std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()));

    let puzzle = match extension.as_str() {
        "xpm" => solution_to_puzzle(&xpm_to_solution(&read_text()?)?),
        "txt" => solution_to_puzzle(&char_grid_to_solution(&read_text()?)?),
        "xml" | "pbn" => webpbn_to_puzzle(&read_text()?),
        _ => {
            let img = image::open(path).with_context(|| format!("opening {}", path.display()))?;
            solution_to_puzzle(&image_to_solution(&img)?)
        }
    };
    puzzle.with_context(|| format!("loading {}", path.display()))
}
