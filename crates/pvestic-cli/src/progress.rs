use std::io::{self, Write};
use std::time::{Duration, Instant};

use pvestic_core::commands::backup::BackupProgressEvent;

use crate::format::{format_bytes, format_bytes_f64};

const PROGRESS_REDRAW_INTERVAL: Duration = Duration::from_millis(100);
const BAR_WIDTH: usize = 40;

/// Renders one `\r`-refreshed progress line per streamed entry.
pub(crate) struct StreamProgressRenderer {
    dest_file: String,
    total_bytes: Option<u64>,
    bytes_done: f64,
    last_draw: Instant,
    last_line_len: usize,
    rendered_any: bool,
}

impl StreamProgressRenderer {
    pub(crate) fn new() -> Self {
        Self {
            dest_file: String::new(),
            total_bytes: None,
            bytes_done: 0.0,
            last_draw: Instant::now(),
            last_line_len: 0,
            rendered_any: false,
        }
    }

    pub(crate) fn on_event(&mut self, event: BackupProgressEvent) {
        match event {
            BackupProgressEvent::EntryStarted {
                dest_file,
                total_bytes,
            } => {
                self.dest_file = dest_file;
                self.total_bytes = total_bytes;
                self.bytes_done = 0.0;
                self.render(true);
            }
            BackupProgressEvent::BytesTransferred { bytes_done } => {
                self.bytes_done = bytes_done;
                self.render(false);
            }
            BackupProgressEvent::EntryFinished => self.finish(),
        }
    }

    /// Terminate the current progress line, if any.
    pub(crate) fn finish(&mut self) {
        if !self.rendered_any {
            return;
        }
        self.render(true);
        eprintln!();
        self.rendered_any = false;
        self.last_line_len = 0;
    }

    fn render(&mut self, force: bool) {
        if !force && self.rendered_any && self.last_draw.elapsed() < PROGRESS_REDRAW_INTERVAL {
            return;
        }
        self.last_draw = Instant::now();

        let line = render_line(&self.dest_file, self.bytes_done, self.total_bytes);
        let pad_len = self.last_line_len.saturating_sub(line.len());
        eprint!("\r{line}{}", " ".repeat(pad_len));
        let _ = io::stderr().flush();

        self.last_line_len = line.len();
        self.rendered_any = true;
    }
}

fn render_line(dest_file: &str, bytes_done: f64, total_bytes: Option<u64>) -> String {
    match total_bytes {
        Some(total) if total > 0 => {
            let fraction = (bytes_done / total as f64).max(0.0).min(1.0);
            format!(
                "{dest_file} [{}] {:5.1}% {} / {}",
                render_bar(fraction),
                fraction * 100.0,
                format_bytes_f64(bytes_done),
                format_bytes(total),
            )
        }
        _ => format!("{dest_file} {}", format_bytes_f64(bytes_done)),
    }
}

fn render_bar(fraction: f64) -> String {
    let filled = (fraction.max(0.0).min(1.0) * BAR_WIDTH as f64).round() as usize;
    let mut bar = String::with_capacity(BAR_WIDTH);
    for _ in 0..filled {
        bar.push('=');
    }
    for _ in filled..BAR_WIDTH {
        bar.push(' ');
    }
    bar
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bar_is_always_fixed_width() {
        for fraction in [-1.0e18, -0.1, 0.0, 0.33, 1.0, 7.5, 1.0e18] {
            assert_eq!(render_bar(fraction).len(), BAR_WIDTH);
        }
    }

    #[test]
    fn bar_fills_with_the_fraction() {
        assert_eq!(render_bar(0.0).trim_end(), "");
        assert_eq!(render_bar(0.5).trim_end().len(), BAR_WIDTH / 2);
        assert_eq!(render_bar(1.0), "=".repeat(BAR_WIDTH));
    }

    #[test]
    fn line_clamps_overflowing_counts() {
        let line = render_line("lxc-7/data.raw", 1.0e18, Some(2_147_483_648));
        assert!(line.contains("100.0%"), "line was: {line}");
        let line = render_line("lxc-7/data.raw", -10.0, Some(2_147_483_648));
        assert!(line.contains("  0.0%"), "line was: {line}");
    }

    #[test]
    fn line_reaches_the_probed_total() {
        let line = render_line("lxc-7/data.raw", 2_147_483_648.0, Some(2_147_483_648));
        assert!(line.contains("2.00 GiB / 2.00 GiB"), "line was: {line}");
    }

    #[test]
    fn unknown_total_renders_bytes_only() {
        let line = render_line("lxc-7/config", 1024.0, None);
        assert_eq!(line, "lxc-7/config 1.00 KiB");
        let line = render_line("lxc-7/config", 1024.0, Some(0));
        assert!(!line.contains('%'));
    }
}
