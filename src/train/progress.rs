use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};

const EPOCH_TEMPLATE: &str = "{prefix:>5} {bar:30.cyan/blue} {pos}/{len} [{elapsed}<{eta}]";
const PHASE_TEMPLATE: &str = "{prefix:>5} {bar:30.green/black} {pos}/{len} [{elapsed}<{eta}] {msg}";

fn style(template: &str) -> ProgressStyle {
    ProgressStyle::with_template(template)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=>-")
}

/// Terminal progress of a run: one bar over epochs, with the bar of the
/// current train or validation phase underneath.
///
/// Bars draw to stderr and stay invisible when it is not a terminal.
pub struct RunProgress {
    multi: MultiProgress,
    epochs: ProgressBar,
}

impl RunProgress {
    pub fn new(total_epochs: usize) -> RunProgress {
        RunProgress::with_target(total_epochs, ProgressDrawTarget::stderr())
    }

    /// Tracks positions without drawing anything.
    pub fn hidden(total_epochs: usize) -> RunProgress {
        RunProgress::with_target(total_epochs, ProgressDrawTarget::hidden())
    }

    fn with_target(total_epochs: usize, target: ProgressDrawTarget) -> RunProgress {
        let multi = MultiProgress::with_draw_target(target);
        let epochs = multi.add(ProgressBar::new(total_epochs as u64));
        epochs.set_style(style(EPOCH_TEMPLATE));
        epochs.set_prefix("Epoch");
        RunProgress { multi, epochs }
    }

    /// A bar of `len` batches for one phase, drawn below the epoch bar.
    pub fn phase(&self, len: usize, name: &'static str) -> ProgressBar {
        let bar = self.multi.add(ProgressBar::new(len as u64));
        bar.set_style(style(PHASE_TEMPLATE));
        bar.set_prefix(name);
        bar
    }

    pub fn epoch_done(&self) {
        self.epochs.inc(1);
    }

    pub fn epochs_done(&self) -> u64 {
        self.epochs.position()
    }

    pub fn finish(&self) {
        self.epochs.finish_and_clear();
    }

    /// Runs `f` with the bars cleared, so log lines do not tear them.
    pub fn suspend<F: FnOnce() -> R, R>(&self, f: F) -> R {
        self.multi.suspend(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_bars_count_batches() {
        let progress = RunProgress::hidden(3);
        let bar = progress.phase(4, "Train");
        bar.inc(1);
        bar.inc(1);
        assert_eq!(bar.position(), 2);
        assert_eq!(bar.length(), Some(4));
        progress.epoch_done();
        assert_eq!(progress.epochs_done(), 1);
    }

    #[test]
    fn templates_parse() {
        assert!(ProgressStyle::with_template(EPOCH_TEMPLATE).is_ok());
        assert!(ProgressStyle::with_template(PHASE_TEMPLATE).is_ok());
    }
}
