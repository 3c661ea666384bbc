//! Terminal progress display for the default verbosity.
//!
//! The display polls session snapshots from the runner at a random interval
//! of up to 200 ms while the run task is alive, one line per session.

use std::io::Write;
use std::time::{Duration, Instant};

use rand::Rng;
use tokio::task::{JoinError, JoinHandle};

use crate::result::SessionResult;
use crate::runner::Runner;

const MAX_POLL_INTERVAL_MS: u64 = 200;

/// Renders one progress line.
pub fn render_line(index: usize, result: &SessionResult, elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!(
        "Session:{index} {:>3.0}% {}/{} {:>3}m{:02}s",
        result.percent_complete(),
        result.executed,
        result.planned,
        secs / 60,
        secs % 60
    )
}

/// Line-oriented progress board: the newest session's line is redrawn in
/// place, earlier sessions are finalized on their own line.
pub struct ProgressBoard<W: Write> {
    out: W,
    started: Vec<Instant>,
}

impl<W: Write> ProgressBoard<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            started: Vec::new(),
        }
    }

    /// Redraws the board from fresh snapshots.
    pub fn update(&mut self, results: &[SessionResult]) {
        for index in self.started.len()..results.len() {
            if let Some(previous) = index.checked_sub(1) {
                self.draw(previous, &results[previous]);
                let _ = writeln!(self.out);
            }
            self.started.push(Instant::now());
        }
        if let Some(last) = self.started.len().checked_sub(1) {
            if let Some(result) = results.get(last) {
                self.draw(last, result);
            }
        }
        let _ = self.out.flush();
    }

    /// Final redraw with every session forced to 100%.
    pub fn finish(&mut self, results: &[SessionResult]) {
        let completed = results
            .iter()
            .map(|result| SessionResult {
                executed: result.planned,
                ..*result
            })
            .collect::<Vec<_>>();
        self.update(&completed);
        if !self.started.is_empty() {
            let _ = writeln!(self.out);
        }
        let _ = self.out.flush();
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn draw(&mut self, index: usize, result: &SessionResult) {
        let elapsed = self
            .started
            .get(index)
            .map(Instant::elapsed)
            .unwrap_or_default();
        let _ = write!(self.out, "\r{}", render_line(index, result, elapsed));
    }
}

/// Shows progress on stderr until `task` finishes, then returns its output.
pub async fn watch<T>(runner: &Runner, mut task: JoinHandle<T>) -> Result<T, JoinError> {
    let mut board = ProgressBoard::new(std::io::stderr());
    loop {
        let pause = Duration::from_millis(rand::thread_rng().gen_range(0..MAX_POLL_INTERVAL_MS));
        tokio::select! {
            joined = &mut task => {
                board.finish(&runner.session_results());
                return joined;
            }
            _ = tokio::time::sleep(pause) => board.update(&runner.session_results()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tally(planned: u64, executed: u64) -> SessionResult {
        SessionResult {
            planned,
            executed,
            succeeded: executed,
            ..SessionResult::default()
        }
    }

    #[test]
    fn line_shows_percent_counts_and_elapsed() {
        let line = render_line(0, &tally(4, 1), Duration::from_secs(125));
        assert_eq!(line, "Session:0  25% 1/4   2m05s");
    }

    #[test]
    fn finish_forces_every_session_to_complete() {
        let mut board = ProgressBoard::new(Vec::new());
        board.update(&[tally(3, 1)]);
        board.update(&[tally(3, 3), tally(1, 0)]);
        board.finish(&[tally(3, 3), tally(1, 0)]);

        let text = String::from_utf8(board.into_inner()).expect("utf8 output");
        let finished = text.lines().map(|line| line.rsplit('\r').next().unwrap_or(""));
        let finished = finished.collect::<Vec<_>>();
        assert_eq!(finished.len(), 2);
        assert!(finished[0].starts_with("Session:0 100% 3/3"));
        assert!(finished[1].starts_with("Session:1 100% 1/1"));
    }
}
