//! Log-log ASCII plotting for terminal output.
//!
//! Fixed-size grid, deterministic output. Measured points are drawn as `o`,
//! the fitted curve as a `-` line. Points with non-positive intensity cannot
//! be placed on a log axis and are left out.

use crate::report::ResidualRow;

/// Render measured points and the fitted curve on log10 axes.
pub fn render_ascii_plot(rows: &[ResidualRow], width: usize, height: usize) -> String {
    let width = width.max(10);
    let height = height.max(5);

    let measured: Vec<(f64, f64)> = log_points(rows.iter().map(|r| (r.q, r.measured)));
    let curve: Vec<(f64, f64)> = log_points(rows.iter().map(|r| (r.q, r.modeled)));

    let (x_min, x_max) = range(measured.iter().chain(&curve).map(|p| p.0)).unwrap_or((0.0, 1.0));
    let (y_min, y_max) = range(measured.iter().chain(&curve).map(|p| p.1)).unwrap_or((0.0, 1.0));
    let (y_min, y_max) = pad_range(y_min, y_max, 0.05);

    let mut grid = vec![vec![' '; width]; height];

    // Curve first so points overlay it.
    draw_curve(&mut grid, &curve, x_min, x_max, y_min, y_max);
    for &(x, y) in &measured {
        let col = map_x(x, x_min, x_max, width);
        let row = map_y(y, y_min, y_max, height);
        grid[row][col] = 'o';
    }

    let mut out = String::new();
    out.push_str(&format!(
        "Plot: log10 q=[{x_min:.3}, {x_max:.3}] | log10 I=[{y_min:.2}, {y_max:.2}]\n"
    ));
    for row in grid {
        out.push_str(&row.into_iter().collect::<String>());
        out.push('\n');
    }
    out
}

fn log_points(points: impl Iterator<Item = (f64, f64)>) -> Vec<(f64, f64)> {
    points
        .filter(|&(q, i)| q > 0.0 && i > 0.0 && q.is_finite() && i.is_finite())
        .map(|(q, i)| (q.log10(), i.log10()))
        .collect()
}

fn range(values: impl Iterator<Item = f64>) -> Option<(f64, f64)> {
    let (lo, hi) = values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
    (lo.is_finite() && hi.is_finite() && hi > lo).then_some((lo, hi))
}

fn pad_range(min: f64, max: f64, frac: f64) -> (f64, f64) {
    let pad = ((max - min).abs() * frac).max(1e-12);
    (min - pad, max + pad)
}

fn map_x(x: f64, x_min: f64, x_max: f64, width: usize) -> usize {
    let u = ((x - x_min) / (x_max - x_min)).clamp(0.0, 1.0);
    (u * (width as f64 - 1.0)).round() as usize
}

fn map_y(y: f64, y_min: f64, y_max: f64, height: usize) -> usize {
    let u = ((y - y_min) / (y_max - y_min)).clamp(0.0, 1.0);
    // Row 0 is the top.
    (height as f64 - 1.0 - (u * (height as f64 - 1.0))).round() as usize
}

fn draw_curve(grid: &mut [Vec<char>], curve: &[(f64, f64)], x_min: f64, x_max: f64, y_min: f64, y_max: f64) {
    let height = grid.len();
    let width = grid[0].len();
    let mut prev = None;
    for &(x, y) in curve {
        let col = map_x(x, x_min, x_max, width);
        let row = map_y(y, y_min, y_max, height);
        match prev {
            Some((c0, r0)) => draw_line(grid, c0, r0, col, row, '-'),
            None => grid[row][col] = '-',
        }
        prev = Some((col, row));
    }
}

/// Integer line drawing (Bresenham).
fn draw_line(grid: &mut [Vec<char>], x0: usize, y0: usize, x1: usize, y1: usize, ch: char) {
    let (mut x0, mut y0) = (x0 as isize, y0 as isize);
    let (x1, y1) = (x1 as isize, y1 as isize);

    let dx = (x1 - x0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let dy = -(y1 - y0).abs();
    let sy = if y0 < y1 { 1 } else { -1 };
    let mut err = dx + dy;

    loop {
        let (r, c) = (y0 as usize, x0 as usize);
        if y0 >= 0 && x0 >= 0 && r < grid.len() && c < grid[0].len() && grid[r][c] == ' ' {
            grid[r][c] = ch;
        }
        if x0 == x1 && y0 == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x0 += sx;
        }
        if e2 <= dx {
            err += dx;
            y0 += sy;
        }
    }
}
