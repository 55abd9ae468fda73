//! Deterministic extractor without a model
//!
//! Used for `MOCK_RESPONSE` deployments and throughout the tests. The
//! `BackgroundKey` mode derives a trimap from colour distance to the
//! dominant border colour, so it behaves like a real extractor on synthetic
//! scenes (a blank frame has no foreground, a solid subject on a flat
//! background is cut out).

use crate::config::{Category, MockMode, SemitransparencyStrategy};
use crate::error::{BgRemovalError, Result};
use crate::extractor::{
    compose_alpha, filter_trimap, ExtractOptions, Extraction, Extractor, TRIMAP_BACKGROUND,
    TRIMAP_FOREGROUND, TRIMAP_UNKNOWN,
};
use ndarray::{s, Array2, Array3, ArrayView3, Axis, Zip};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Colour distance at or below which a pixel is background
const KEY_BACKGROUND_DISTANCE: u32 = 24;
/// Colour distance at or above which a pixel is foreground
const KEY_FOREGROUND_DISTANCE: u32 = 96;

/// Injected failure behaviour
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailurePlan {
    Never,
    Always,
    Panic,
    FirstN,
}

/// Model-free extractor with failure injection and call recording
#[derive(Debug, Clone)]
pub struct MockExtractor {
    mode: MockMode,
    category: Category,
    failure: FailurePlan,
    remaining_failures: Arc<AtomicUsize>,
    call_history: Arc<Mutex<Vec<String>>>,
}

impl MockExtractor {
    #[must_use]
    pub fn new(mode: MockMode) -> Self {
        Self {
            mode,
            category: Category::Product,
            failure: FailurePlan::Never,
            remaining_failures: Arc::new(AtomicUsize::new(0)),
            call_history: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Mock that reports `category` from `identify`
    #[must_use]
    pub fn with_category(mut self, category: Category) -> Self {
        self.category = category;
        self
    }

    /// Every extraction fails with an extractor error
    #[must_use]
    pub fn fail_always(mut self) -> Self {
        self.failure = FailurePlan::Always;
        self
    }

    /// Every extraction panics
    #[must_use]
    pub fn panic_always(mut self) -> Self {
        self.failure = FailurePlan::Panic;
        self
    }

    /// The next `n` extractions fail, shared across clones
    #[must_use]
    pub fn fail_n_times(mut self, n: usize) -> Self {
        self.failure = FailurePlan::FirstN;
        self.remaining_failures = Arc::new(AtomicUsize::new(n));
        self
    }

    /// Calls recorded so far, shared across clones
    #[must_use]
    pub fn call_history(&self) -> Vec<String> {
        self.call_history
            .lock()
            .map(|history| history.clone())
            .unwrap_or_default()
    }

    fn record_call(&self, call: String) {
        if let Ok(mut history) = self.call_history.lock() {
            history.push(call);
        }
    }

    fn inject_failure(&self) -> Result<()> {
        match self.failure {
            FailurePlan::Never => Ok(()),
            FailurePlan::Always => Err(BgRemovalError::extractor("injected extractor failure")),
            FailurePlan::Panic => panic!("injected extractor panic"),
            FailurePlan::FirstN => {
                let consumed = self
                    .remaining_failures
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok();
                if consumed {
                    Err(BgRemovalError::extractor("injected transient failure"))
                } else {
                    Ok(())
                }
            },
        }
    }

    fn key_trimap(bgr: ArrayView3<'_, u8>) -> (Array2<u8>, Array2<u8>) {
        let key = border_color(bgr);
        let mut trimap = Array2::<u8>::zeros((bgr.dim().0, bgr.dim().1));
        let mut matte = Array2::<u8>::zeros(trimap.dim());

        Zip::from(&mut trimap)
            .and(&mut matte)
            .and(bgr.lanes(Axis(2)))
            .for_each(|t, m, px| {
                let distance = px
                    .iter()
                    .zip(key)
                    .map(|(&v, k)| u32::from(v.abs_diff(k)))
                    .max()
                    .unwrap_or(0);
                *t = if distance >= KEY_FOREGROUND_DISTANCE {
                    TRIMAP_FOREGROUND
                } else if distance > KEY_BACKGROUND_DISTANCE {
                    TRIMAP_UNKNOWN
                } else {
                    TRIMAP_BACKGROUND
                };
                let span = KEY_FOREGROUND_DISTANCE - KEY_BACKGROUND_DISTANCE;
                *m = (distance.saturating_sub(KEY_BACKGROUND_DISTANCE).min(span) * 255 / span) as u8;
            });
        (trimap, matte)
    }
}

impl Default for MockExtractor {
    fn default() -> Self {
        Self::new(MockMode::default())
    }
}

impl Extractor for MockExtractor {
    fn name(&self) -> &str {
        "mock"
    }

    fn identify(&mut self, bgr: ArrayView3<'_, u8>) -> Result<Category> {
        self.record_call(format!("identify:{}x{}", bgr.dim().1, bgr.dim().0));
        Ok(self.category)
    }

    fn extract(&mut self, bgr: ArrayView3<'_, u8>, options: &ExtractOptions) -> Result<Extraction> {
        let (height, width, _) = bgr.dim();
        self.record_call(format!(
            "extract:{}x{}:{}:color={}:shadow={}",
            width, height, options.category, options.color_correction, options.shadow
        ));
        self.inject_failure()?;

        let (alpha, trimap) = match self.mode {
            MockMode::ConstantAlpha(value) => (Array2::from_elem((height, width), value), None),
            MockMode::BackgroundKey => {
                let (mut trimap, matte) = Self::key_trimap(bgr);
                filter_trimap(&mut trimap, options.confidence_threshold)?;
                let mut alpha = compose_alpha(trimap.view(), matte.view());
                if options.semitransparency
                    && options.strategy == SemitransparencyStrategy::Experimental
                {
                    // Translucent band stays at half opacity
                    Zip::from(&mut alpha).and(&trimap).for_each(|a, &t| {
                        if t == TRIMAP_UNKNOWN {
                            *a = (*a).max(128);
                        }
                    });
                }
                (alpha, Some(trimap))
            },
        };

        let mut bgra = Array3::<u8>::zeros((height, width, 4));
        bgra.slice_mut(s![.., .., ..3]).assign(&bgr);
        bgra.slice_mut(s![.., .., 3]).assign(&alpha);

        Ok(Extraction { bgra, trimap })
    }
}

/// Most frequent colour on the one-pixel frame border
fn border_color(bgr: ArrayView3<'_, u8>) -> [u8; 3] {
    let (height, width, _) = bgr.dim();
    let mut counts = std::collections::HashMap::<[u8; 3], usize>::new();
    let mut visit = |y: usize, x: usize| {
        let px = [bgr[[y, x, 0]], bgr[[y, x, 1]], bgr[[y, x, 2]]];
        *counts.entry(px).or_default() += 1;
    };
    for x in 0..width {
        visit(0, x);
        visit(height - 1, x);
    }
    for y in 0..height {
        visit(y, 0);
        visit(y, width - 1);
    }
    counts
        .into_iter()
        .max_by_key(|&(px, n)| (n, px))
        .map_or([255, 255, 255], |(px, _)| px)
}
