#![allow(dead_code)] // Otherwise, anything not tested by this becomes a warning!

mod export;
mod grid_solve;
mod import;
mod line_solve;
mod puzzle;
