//! Extraction capability consumed by the request pipeline
//!
//! An [`Extractor`] turns a BGR buffer into foreground colour plus alpha.
//! Implementations own their model state and are driven by exactly one
//! worker thread, so the trait takes `&mut self` and only requires `Send`.

use crate::config::{Category, SemitransparencyStrategy};
use crate::error::{BgRemovalError, Result};
use ndarray::{Array2, Array3, ArrayView2, ArrayView3};
use std::collections::VecDeque;

/// Trimap label for definite background
pub const TRIMAP_BACKGROUND: u8 = 0;
/// Trimap label for the uncertain band
pub const TRIMAP_UNKNOWN: u8 = 128;
/// Trimap label for definite foreground
pub const TRIMAP_FOREGROUND: u8 = 255;

/// Images below this many pixels are treated as low-resolution previews
pub const PREVIEW_PIXELS: u64 = 250_000;

/// Largest share of the foreground the confidence filter may drop
pub const MAX_REMOVED_FRACTION: f64 = 0.8;

/// Confidence threshold for an input of `width` x `height`
///
/// Previews get the stricter value so they never accept a subject the
/// full-resolution pass would reject.
#[must_use]
pub fn confidence_threshold(width: u32, height: u32) -> f64 {
    if u64::from(width) * u64::from(height) < PREVIEW_PIXELS {
        0.25
    } else {
        0.15
    }
}

/// Per-call extraction options
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractOptions {
    /// Minimum region score kept by the trimap confidence filter; 0 disables it
    pub confidence_threshold: f64,
    /// Resolved category of the subject
    pub category: Category,
    /// Return colour-corrected foreground instead of the input colour
    pub color_correction: bool,
    /// Synthesise a ground shadow
    pub shadow: bool,
    /// Refine translucent regions
    pub semitransparency: bool,
    pub strategy: SemitransparencyStrategy,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.15,
            category: Category::Other,
            color_correction: false,
            shadow: false,
            semitransparency: true,
            strategy: SemitransparencyStrategy::Legacy,
        }
    }
}

/// Extractor output for one input buffer
#[derive(Debug, Clone)]
pub struct Extraction {
    /// `(h, w, 4)` BGRA, same height and width as the input
    pub bgra: Array3<u8>,
    /// Filtered trimap, when the extractor produced one
    pub trimap: Option<Array2<u8>>,
}

/// Black-box foreground extraction
pub trait Extractor: Send {
    /// Short name for logs
    fn name(&self) -> &str;

    /// Classify the subject of a `(h, w, 3)` BGR buffer
    ///
    /// Extractors without a classifier report [`Category::Other`].
    fn identify(&mut self, _bgr: ArrayView3<'_, u8>) -> Result<Category> {
        Ok(Category::Other)
    }

    /// Extract foreground colour and alpha from a `(h, w, 3)` BGR buffer
    ///
    /// # Errors
    /// - `UnknownForeground` when no subject survives
    /// - `Extractor` for any model failure
    fn extract(&mut self, bgr: ArrayView3<'_, u8>, options: &ExtractOptions) -> Result<Extraction>;
}

/// Creates one extractor per worker
pub trait ExtractorFactory: Send + Sync {
    /// Build the extractor owned by worker `worker`
    ///
    /// # Errors
    /// Model loading or configuration failures.
    fn create_extractor(&self, worker: usize) -> Result<Box<dyn Extractor>>;
}

/// Drop low-confidence foreground regions from a trimap in place
///
/// Regions are 8-connected components of non-background labels. Each is
/// scored `exp(-uncertain / certain)` over its unknown and foreground
/// pixels; a region without certain pixels scores 0. Regions scoring below
/// `threshold` are relabelled background.
///
/// # Errors
/// `UnknownForeground` if the trimap has no foreground at all, or if more
/// than 80% of the labelled pixels were dropped.
pub fn filter_trimap(trimap: &mut Array2<u8>, threshold: f64) -> Result<()> {
    if threshold <= 0.0 {
        return Ok(());
    }

    let (height, width) = trimap.dim();
    let mut labels = Array2::<u32>::zeros((height, width));
    let mut regions: Vec<(u64, u64)> = Vec::new();
    let mut queue = VecDeque::new();

    for ((y, x), &value) in trimap.indexed_iter() {
        if value == TRIMAP_BACKGROUND || labels[[y, x]] != 0 {
            continue;
        }
        regions.push((0, 0));
        let label = regions.len() as u32;
        labels[[y, x]] = label;
        queue.push_back((y, x));

        while let Some((cy, cx)) = queue.pop_front() {
            let counts = &mut regions[label as usize - 1];
            match trimap[[cy, cx]] {
                TRIMAP_FOREGROUND => counts.1 += 1,
                _ => counts.0 += 1,
            }

            for ny in cy.saturating_sub(1)..=(cy + 1).min(height - 1) {
                for nx in cx.saturating_sub(1)..=(cx + 1).min(width - 1) {
                    if labels[[ny, nx]] == 0 && trimap[[ny, nx]] != TRIMAP_BACKGROUND {
                        labels[[ny, nx]] = label;
                        queue.push_back((ny, nx));
                    }
                }
            }
        }
    }

    if regions.is_empty() {
        return Err(BgRemovalError::unknown_foreground(
            "only background pixels detected",
        ));
    }

    let dropped: Vec<bool> = regions
        .iter()
        .map(|&(uncertain, certain)| region_score(uncertain, certain) < threshold)
        .collect();
    let total: u64 = regions.iter().map(|(u, c)| u + c).sum();
    let removed: u64 = regions
        .iter()
        .zip(&dropped)
        .filter(|(_, &drop)| drop)
        .map(|((u, c), _)| u + c)
        .sum();

    let fraction = removed as f64 / total as f64;
    log::debug!(
        "Trimap filter: {} regions, removed {:.1}% at threshold {:.2}",
        regions.len(),
        fraction * 100.0,
        threshold
    );
    if fraction > MAX_REMOVED_FRACTION {
        return Err(BgRemovalError::unknown_foreground(format!(
            "removed {:.1}% of all foreground pixels",
            fraction * 100.0
        )));
    }

    ndarray::Zip::from(trimap).and(&labels).for_each(|t, &label| {
        if label != 0 && dropped[label as usize - 1] {
            *t = TRIMAP_BACKGROUND;
        }
    });
    Ok(())
}

fn region_score(uncertain: u64, certain: u64) -> f64 {
    if certain == 0 {
        return 0.0;
    }
    (-(uncertain as f64) / certain as f64).exp()
}

/// Alpha from a trimap and a soft matte: background 0, foreground 255, matte in between
#[must_use]
pub fn compose_alpha(trimap: ArrayView2<'_, u8>, matte: ArrayView2<'_, u8>) -> Array2<u8> {
    let mut alpha = Array2::<u8>::zeros(trimap.dim());
    ndarray::Zip::from(&mut alpha)
        .and(trimap)
        .and(matte)
        .for_each(|a, &t, &m| {
            *a = match t {
                TRIMAP_BACKGROUND => 0,
                TRIMAP_FOREGROUND => 255,
                _ => m,
            };
        });
    alpha
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::s;

    #[test]
    fn test_threshold_depends_on_resolution() {
        assert!((confidence_threshold(400, 400) - 0.25).abs() < f64::EPSILON);
        assert!((confidence_threshold(500, 500) - 0.15).abs() < f64::EPSILON);
    }

    #[test]
    fn test_empty_trimap_is_unknown_foreground() {
        let mut trimap = Array2::<u8>::zeros((8, 8));
        let err = filter_trimap(&mut trimap, 0.15).unwrap_err();
        assert!(matches!(err, BgRemovalError::UnknownForeground(_)));
    }

    #[test]
    fn test_uncertain_blob_dropped() {
        let mut trimap = Array2::<u8>::zeros((20, 20));
        // Confident subject, 100 px with a thin unknown rim
        trimap.slice_mut(s![2..12, 2..12]).fill(TRIMAP_FOREGROUND);
        trimap.slice_mut(s![2..12, 12]).fill(TRIMAP_UNKNOWN);
        // Detached speck of pure uncertainty
        trimap.slice_mut(s![16..18, 16..18]).fill(TRIMAP_UNKNOWN);

        filter_trimap(&mut trimap, 0.15).unwrap();
        assert_eq!(trimap[[17, 17]], TRIMAP_BACKGROUND);
        assert_eq!(trimap[[5, 5]], TRIMAP_FOREGROUND);
        assert_eq!(trimap[[5, 12]], TRIMAP_UNKNOWN);
    }

    #[test]
    fn test_mostly_uncertain_is_rejected() {
        let mut trimap = Array2::<u8>::from_elem((10, 10), TRIMAP_UNKNOWN);
        trimap[[0, 0]] = TRIMAP_FOREGROUND;
        let err = filter_trimap(&mut trimap, 0.15).unwrap_err();
        assert!(matches!(err, BgRemovalError::UnknownForeground(_)));
    }

    #[test]
    fn test_zero_threshold_disables_filter() {
        let mut trimap = Array2::<u8>::zeros((4, 4));
        assert!(filter_trimap(&mut trimap, 0.0).is_ok());
    }

    #[test]
    fn test_compose_alpha() {
        let trimap = Array2::from_shape_vec((1, 3), vec![0, 128, 255]).unwrap();
        let matte = Array2::from_elem((1, 3), 77u8);
        let alpha = compose_alpha(trimap.view(), matte.view());
        assert_eq!(alpha.into_raw_vec_and_offset().0, vec![0, 77, 255]);
    }
}
