//! Progress reporting for packing and uploads.

use crate::pack::digest::ChunkDigest;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::sync::Mutex;

/// Receives progress notifications. All methods default to no-ops so an
/// observer only implements what it displays.
///
/// Upload notifications may arrive concurrently from several chunk tasks.
pub trait ProgressObserver: Send + Sync {
    /// `processed` source bytes of `total` have gone through the packer.
    fn on_pack(&self, _processed: u64, _total: u64) {}

    /// `uploaded` bytes of `total` missing bytes are on the remote.
    /// `completed` is false when `chunk` starts and true once it is settled.
    fn on_upload(&self, _uploaded: u64, _total: u64, _chunk: &ChunkDigest, _completed: bool) {}
}

/// Observer that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressObserver for NoProgress {}

const BAR_TEMPLATE: &str =
    "{prefix:>8} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})";

/// Terminal progress bars for the command-line front end.
pub struct BarProgress {
    bars: MultiProgress,
    pack: Mutex<Option<ProgressBar>>,
    upload: Mutex<Option<ProgressBar>>,
}

impl BarProgress {
    pub fn new() -> Self {
        Self {
            bars: MultiProgress::new(),
            pack: Mutex::new(None),
            upload: Mutex::new(None),
        }
    }

    /// Hidden bars, for non-interactive output.
    pub fn hidden() -> Self {
        Self {
            bars: MultiProgress::with_draw_target(indicatif::ProgressDrawTarget::hidden()),
            pack: Mutex::new(None),
            upload: Mutex::new(None),
        }
    }

    fn bar(&self, total: u64, prefix: &'static str) -> ProgressBar {
        let style = ProgressStyle::with_template(BAR_TEMPLATE)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> ");
        let bar = self.bars.add(ProgressBar::new(total));
        bar.set_style(style);
        bar.set_prefix(prefix);
        bar
    }

    fn update(&self, slot: &Mutex<Option<ProgressBar>>, prefix: &'static str, position: u64, total: u64) {
        let Ok(mut slot) = slot.lock() else {
            return;
        };
        let bar = slot.get_or_insert_with(|| self.bar(total, prefix));
        bar.set_length(total);
        bar.set_position(position);
        if position >= total {
            bar.finish();
        }
    }
}

impl Default for BarProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressObserver for BarProgress {
    fn on_pack(&self, processed: u64, total: u64) {
        self.update(&self.pack, "pack", processed, total);
    }

    fn on_upload(&self, uploaded: u64, total: u64, _chunk: &ChunkDigest, completed: bool) {
        if completed {
            self.update(&self.upload, "upload", uploaded, total);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[derive(Default)]
    struct Counting {
        packs: AtomicU64,
    }

    impl ProgressObserver for Counting {
        fn on_pack(&self, _processed: u64, _total: u64) {
            self.packs.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn test_default_methods_are_noops() {
        let observer = Counting::default();
        observer.on_pack(1, 2);
        observer.on_upload(1, 2, &ChunkDigest::compute(b"x"), true);
        assert_eq!(observer.packs.load(Ordering::Relaxed), 1);
        NoProgress.on_upload(0, 0, &ChunkDigest::compute(b"x"), false);
    }

    #[test]
    fn test_hidden_bars_accept_updates() {
        let progress = BarProgress::hidden();
        progress.on_pack(10, 100);
        progress.on_pack(100, 100);
        progress.on_upload(5, 10, &ChunkDigest::compute(b"a"), true);
        let pack = progress.pack.lock().unwrap();
        assert_eq!(pack.as_ref().map(|b| b.position()), Some(100));
    }
}
