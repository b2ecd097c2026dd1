//! Stage reporting for the operator tools.
//!
//! Pretty mode draws indicatif spinners and bars on stderr; plain mode prints one line
//! per event so output stays readable in logs and pipes.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum UiMode {
    Auto,
    Plain,
    Pretty,
}

#[derive(Clone, Debug)]
pub struct Ui {
    mode: UiMode,
    is_tty: bool,
}

impl Ui {
    pub fn new(mode: UiMode, is_tty: bool) -> Self {
        Self { mode, is_tty }
    }

    fn pretty(&self) -> bool {
        self.is_tty && matches!(self.mode, UiMode::Pretty | UiMode::Auto)
    }

    pub fn stage(&self, name: &str) -> StageGuard {
        if self.pretty() {
            let spinner = ProgressBar::new_spinner();
            spinner.set_draw_target(ProgressDrawTarget::stderr());
            spinner.enable_steady_tick(Duration::from_millis(120));
            let style = ProgressStyle::with_template("{spinner} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner());
            spinner.set_style(style);
            spinner.set_message(format!("{name}…"));
            StageGuard::new(name.to_string(), Some(spinner), self.mode)
        } else {
            eprintln!("==> {}", name);
            StageGuard::new(name.to_string(), None, self.mode)
        }
    }

    /// Stage with a known number of steps, e.g. one per camera.
    pub fn counted_stage(&self, name: &str, total: u64) -> StageGuard {
        if !self.pretty() {
            eprintln!("==> {} ({} items)", name, total);
            return StageGuard::new(name.to_string(), None, self.mode);
        }
        let bar = ProgressBar::new(total);
        bar.set_draw_target(ProgressDrawTarget::stderr());
        let style = ProgressStyle::with_template("{bar:30} {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        bar.set_style(style);
        bar.set_message(name.to_string());
        StageGuard::new(name.to_string(), Some(bar), self.mode)
    }
}

pub struct StageGuard {
    name: String,
    start: Instant,
    bar: Option<ProgressBar>,
    mode: UiMode,
    failed: bool,
}

impl StageGuard {
    fn new(name: String, bar: Option<ProgressBar>, mode: UiMode) -> Self {
        Self {
            name,
            start: Instant::now(),
            bar,
            mode,
            failed: false,
        }
    }

    /// Report one finished step.
    pub fn step(&self, detail: &str) {
        match &self.bar {
            Some(bar) => {
                bar.inc(1);
                bar.set_message(detail.to_string());
            }
            None => eprintln!("    {}", detail),
        }
    }

    /// Finish with a failure marker instead of a check mark.
    pub fn fail(mut self, reason: &str) {
        self.failed = true;
        self.name = format!("{}: {}", self.name, reason);
    }

    pub fn mode(&self) -> UiMode {
        self.mode
    }
}

impl Drop for StageGuard {
    fn drop(&mut self) {
        let mark = if self.failed { "✘" } else { "✔" };
        let message = format!(
            "{} {} ({})",
            mark,
            self.name,
            format_duration(self.start.elapsed())
        );
        match &self.bar {
            Some(bar) => bar.finish_with_message(message),
            None => eprintln!("{message}"),
        }
    }
}

fn format_duration(duration: Duration) -> String {
    if duration.as_secs() >= 1 {
        format!("{:.2}s", duration.as_secs_f64())
    } else {
        format!("{}ms", duration.as_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pretty_only_on_terminals() {
        assert!(!Ui::new(UiMode::Auto, false).pretty());
        assert!(!Ui::new(UiMode::Pretty, false).pretty());
        assert!(!Ui::new(UiMode::Plain, true).pretty());
        assert!(Ui::new(UiMode::Auto, true).pretty());
    }

    #[test]
    fn durations_switch_units_at_one_second() {
        assert_eq!(format_duration(Duration::from_millis(250)), "250ms");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.50s");
    }

    #[test]
    fn plain_stages_do_not_panic() {
        let ui = Ui::new(UiMode::Plain, false);
        let stage = ui.counted_stage("render masks", 2);
        stage.step("cam-1");
        stage.fail("disk full");
    }
}
