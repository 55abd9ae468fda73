//! Hole filling for transparent regions inside a subject (car windows and similar)

use ndarray::{Array2, Array3};
use std::collections::VecDeque;

/// Pixels with alpha below this are treated as holes
pub const HOLE_ALPHA: u8 = 128;

/// Which transparent regions get filled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillMode {
    /// Only regions fully enclosed by the subject (not touching the frame border)
    Car,
    /// Every transparent region, including the background
    All,
}

/// Fill holes of an `(h, w, 4)` RGBA buffer in place
///
/// Hole pixels get `fill_value` as alpha. With `average`, their colour is
/// replaced by the mean colour of the connected hole they belong to.
pub fn fill_holes(rgba: &mut Array3<u8>, fill_value: u8, mode: FillMode, average: bool) {
    let (height, width, channels) = rgba.dim();
    if channels != 4 || height == 0 || width == 0 {
        return;
    }

    let mut visited = Array2::<bool>::from_elem((height, width), false);
    let mut queue = VecDeque::new();

    for start_y in 0..height {
        for start_x in 0..width {
            if visited[[start_y, start_x]] || rgba[[start_y, start_x, 3]] >= HOLE_ALPHA {
                continue;
            }

            // Flood the 4-connected component
            let mut component = Vec::new();
            let mut touches_border = false;
            visited[[start_y, start_x]] = true;
            queue.push_back((start_y, start_x));

            while let Some((y, x)) = queue.pop_front() {
                component.push((y, x));
                if y == 0 || x == 0 || y == height - 1 || x == width - 1 {
                    touches_border = true;
                }

                let neighbours = [
                    (y.wrapping_sub(1), x),
                    (y + 1, x),
                    (y, x.wrapping_sub(1)),
                    (y, x + 1),
                ];
                for (ny, nx) in neighbours {
                    if ny < height
                        && nx < width
                        && !visited[[ny, nx]]
                        && rgba[[ny, nx, 3]] < HOLE_ALPHA
                    {
                        visited[[ny, nx]] = true;
                        queue.push_back((ny, nx));
                    }
                }
            }

            if mode == FillMode::Car && touches_border {
                continue;
            }

            let mean = average.then(|| {
                let mut sum = [0u64; 3];
                for &(y, x) in &component {
                    for (c, acc) in sum.iter_mut().enumerate() {
                        *acc += u64::from(rgba[[y, x, c]]);
                    }
                }
                let n = component.len() as u64;
                sum.map(|s| ((s + n / 2) / n) as u8)
            });

            for &(y, x) in &component {
                rgba[[y, x, 3]] = fill_value;
                if let Some(mean) = mean {
                    for (c, &v) in mean.iter().enumerate() {
                        rgba[[y, x, c]] = v;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::s;

    /// Opaque ring with a transparent window in the middle, transparent outside
    fn ring() -> Array3<u8> {
        let mut img = Array3::<u8>::zeros((10, 10, 4));
        img.slice_mut(s![2..8, 2..8, 3]).fill(255);
        img.slice_mut(s![4..6, 4..6, 3]).fill(0);
        img.slice_mut(s![4..5, 4..6, 0]).fill(100);
        img.slice_mut(s![5..6, 4..6, 0]).fill(200);
        img
    }

    #[test]
    fn test_car_mode_fills_enclosed_window_only() {
        let mut img = ring();
        fill_holes(&mut img, 200, FillMode::Car, false);
        assert_eq!(img[[4, 4, 3]], 200);
        assert_eq!(img[[5, 5, 3]], 200);
        assert_eq!(img[[0, 0, 3]], 0);
        assert_eq!(img[[4, 4, 0]], 100);
    }

    #[test]
    fn test_average_replaces_window_colour() {
        let mut img = ring();
        fill_holes(&mut img, 255, FillMode::Car, true);
        assert_eq!(img[[4, 4, 0]], 150);
        assert_eq!(img[[5, 5, 0]], 150);
        assert_eq!(img[[4, 4, 3]], 255);
    }

    #[test]
    fn test_all_mode_includes_background() {
        let mut img = ring();
        fill_holes(&mut img, 200, FillMode::All, true);
        assert_eq!(img[[0, 0, 3]], 200);
        assert_eq!(img[[4, 4, 3]], 200);
        assert_eq!(img[[3, 3, 3]], 255);
    }
}
