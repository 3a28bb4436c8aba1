//! ASCII rendering of per-cell ratios on a regular 2D grid.
//!
//! Used to eyeball efficiency maps in logs and terminals. Each cell holds an
//! optional ratio in `[0, 1]`; cells without data render as blanks so that
//! "no tracks" is distinguishable from "zero efficiency".

use crate::{Result, VizError};
use std::fmt::Write;

/// Configuration for grid rendering
#[derive(Debug, Clone)]
pub struct RatioGridConfig<'a> {
    /// Title printed above the grid
    pub title: Option<&'a str>,
    /// Label printed under the grid
    pub x_label: Option<&'a str>,
    /// Characters from lowest to highest ratio
    pub levels: &'a str,
    /// Character used for cells without data
    pub empty: char,
}

impl Default for RatioGridConfig<'_> {
    fn default() -> Self {
        Self {
            title: None,
            x_label: None,
            levels: ".:-=+*%#@",
            empty: ' ',
        }
    }
}

/// Render a row-major `nx` by `ny` grid of ratios.
///
/// Row 0 is the lowest y and is drawn at the bottom.
pub fn render_ratio_grid(
    cells: &[Option<f64>],
    nx: usize,
    ny: usize,
    config: &RatioGridConfig,
) -> Result<String> {
    if cells.len() != nx * ny {
        return Err(VizError::GridError(format!(
            "grid of {nx}x{ny} needs {} cells, got {}",
            nx * ny,
            cells.len()
        )));
    }
    let levels: Vec<char> = config.levels.chars().collect();
    if levels.is_empty() {
        return Err(VizError::GridError(
            "Empty character set for ratio grid".to_string(),
        ));
    }

    let mut output = String::new();
    if let Some(title) = config.title {
        writeln!(output, "{title}")?;
        writeln!(output, "{}", "=".repeat(title.len()))?;
    }

    writeln!(output, "  {}", "-".repeat(nx + 2))?;
    for row in (0..ny).rev() {
        output.push_str("  |");
        for col in 0..nx {
            let c = match cells[row * nx + col] {
                Some(ratio) => {
                    let ratio = ratio.clamp(0.0, 1.0);
                    levels[(ratio * (levels.len() - 1) as f64).round() as usize]
                }
                None => config.empty,
            };
            output.push(c);
        }
        output.push_str("|\n");
    }
    writeln!(output, "  {}", "-".repeat(nx + 2))?;

    if let Some(x_label) = config.x_label {
        writeln!(output, "  {x_label}")?;
    }

    writeln!(
        output,
        "  Legend: '{}' = no data, '{}' = 0%, '{}' = 100%",
        config.empty,
        levels[0],
        levels[levels.len() - 1]
    )?;

    Ok(output)
}
