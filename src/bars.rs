//! Maps analyzer output onto a row of visualizer bars.

use std::time::Duration;

pub const DEFAULT_BAR_COUNT: usize = 50;

/// Visualizer refresh cadence
pub const DEFAULT_REFRESH: Duration = Duration::from_millis(50);

const BLOCKS: [char; 9] = [' ', '▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];

/// Averages contiguous groups of bins into `count` bars scaled to [0, 1]
/// against the loudest bar. A silent spectrum gives all-zero bars.
pub fn spectrum_bars(magnitudes: &[f32], count: usize) -> Vec<f32> {
    let mut bars = vec![0.0; count];
    if count == 0 || magnitudes.is_empty() {
        return bars;
    }

    let len = magnitudes.len();
    for (i, bar) in bars.iter_mut().enumerate() {
        let start = i * len / count;
        let end = ((i + 1) * len / count).max(start + 1).min(len);
        if start >= len {
            break;
        }
        let group = &magnitudes[start..end];
        *bar = group.iter().sum::<f32>() / group.len() as f32;
    }

    let loudest = bars.iter().cloned().fold(0.0f32, f32::max);
    if loudest <= f32::EPSILON {
        bars.fill(0.0);
    } else {
        for bar in bars.iter_mut() {
            *bar /= loudest;
        }
    }
    bars
}

/// Number of filled cells for a level in [0, 1].
pub fn level_cells(level: f32, width: usize) -> usize {
    (level.clamp(0.0, 1.0) * width as f32).round() as usize
}

/// Hue in degrees, swept evenly across the row.
pub fn bar_hue(index: usize, count: usize) -> f32 {
    if count == 0 {
        return 0.0;
    }
    index as f32 * 360.0 / count as f32
}

/// Fully saturated, full brightness RGB for a hue in degrees.
pub fn hue_to_rgb(hue: f32) -> (u8, u8, u8) {
    let h = hue.rem_euclid(360.0) / 60.0;
    let x = 1.0 - (h % 2.0 - 1.0).abs();
    let (r, g, b) = match h as u32 {
        0 => (1.0, x, 0.0),
        1 => (x, 1.0, 0.0),
        2 => (0.0, 1.0, x),
        3 => (0.0, x, 1.0),
        4 => (x, 0.0, 1.0),
        _ => (1.0, 0.0, x),
    };
    let scale = |c: f32| (c * 255.0).round() as u8;
    (scale(r), scale(g), scale(b))
}

fn block_for(height: f32) -> char {
    let step = (height.clamp(0.0, 1.0) * (BLOCKS.len() - 1) as f32).round() as usize;
    BLOCKS[step]
}

pub fn render_bars(heights: &[f32]) -> String {
    heights.iter().map(|&h| block_for(h)).collect()
}

/// Like [`render_bars`], with each bar tinted by its hue using 24-bit ANSI colour.
pub fn render_bars_colored(heights: &[f32]) -> String {
    let mut row = String::new();
    for (i, &h) in heights.iter().enumerate() {
        let (r, g, b) = hue_to_rgb(bar_hue(i, heights.len()));
        row.push_str(&format!("\x1b[38;2;{};{};{}m{}", r, g, b, block_for(h)));
    }
    row.push_str("\x1b[0m");
    row
}

pub fn render_meter(level: f32, width: usize) -> String {
    let filled = level_cells(level, width);
    let mut meter = "█".repeat(filled);
    meter.push_str(&"·".repeat(width - filled));
    meter
}
