//! The pluggable progress-reporting sink consumed by the dispatch loop.

/// A progress sink: `tick` is called once per completed request, `close`
/// once the whole batch finishes.
pub trait ProgressReporter: Send + Sync {
    fn tick(&self, completed: u64, total: u64);
    fn close(&self);
}

/// Reports nothing; the default when no reporter is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn tick(&self, _completed: u64, _total: u64) {}
    fn close(&self) {}
}

/// Reference [`ProgressReporter`] backed by `indicatif`, behind the
/// `progress-indicatif` feature.
#[cfg(feature = "progress-indicatif")]
pub struct IndicatifProgress {
    bar: indicatif::ProgressBar,
}

#[cfg(feature = "progress-indicatif")]
impl IndicatifProgress {
    pub fn new(total: u64) -> Self {
        let bar = indicatif::ProgressBar::new(total);
        bar.set_style(
            indicatif::ProgressStyle::with_template("{bar:40} {pos}/{len} ({eta})")
                .unwrap_or_else(|_| indicatif::ProgressStyle::default_bar()),
        );
        Self { bar }
    }
}

#[cfg(feature = "progress-indicatif")]
impl ProgressReporter for IndicatifProgress {
    fn tick(&self, completed: u64, total: u64) {
        self.bar.set_length(total);
        self.bar.set_position(completed);
    }

    fn close(&self) {
        self.bar.finish_and_clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_progress_does_nothing_observable() {
        let reporter = NoopProgress;
        reporter.tick(1, 10);
        reporter.close();
    }
}
