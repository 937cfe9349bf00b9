use indicatif::{ProgressBar, ProgressStyle};
use once_cell::sync::OnceCell;

static PROGRESS_BAR: OnceCell<ProgressBar> = OnceCell::new();

fn default_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{elapsed} {wide_bar} {pos}/{len} ({eta})")
        .expect("failed to create indicatif progress bar")
}

/// (Re)starts the shared bar for a stage of `len` items. The bar is a
/// process-wide singleton; stages reuse it by resetting the length.
#[inline]
pub fn init_progress_bar(len: u64) {
    let progress_bar = PROGRESS_BAR.get_or_init(|| ProgressBar::new(len).with_style(default_style()));
    progress_bar.reset();
    progress_bar.set_length(len);
}

#[inline]
pub fn inc_bar(delta: u64) {
    if let Some(progress_bar) = PROGRESS_BAR.get() {
        progress_bar.inc(delta);
    }
}

#[inline]
pub fn finish_progress_bar() {
    if let Some(progress_bar) = PROGRESS_BAR.get() {
        progress_bar.finish_and_clear();
    }
}
