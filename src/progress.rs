use std::{
    collections::VecDeque,
    io::{self, Write},
    time::{Duration, Instant},
};

use crossterm::{
    cursor::MoveToColumn,
    style::Print,
    terminal::{Clear, ClearType},
    tty::IsTty,
    QueueableCommand,
};
use number_prefix::NumberPrefix;

/// Minimum delay between redraws.
const DRAW_INTERVAL: Duration = Duration::from_millis(100);
/// Window for the moving-average speed.
const SPEED_WINDOW: Duration = Duration::from_secs(5);

/// Format a byte count in base 2 units.
fn binary_size(value: u64) -> String {
    match NumberPrefix::binary(value as f64) {
        NumberPrefix::Standalone(number) => format!("{number:.0}B"),
        NumberPrefix::Prefixed(prefix, number) => format!("{number:.2}{prefix}B"),
    }
}

/// Single-line progress display for a download: position, total, percentage,
/// and a moving-average speed. Rendering is skipped entirely when the output
/// is not a TTY, so log output stays clean in pipelines.
pub struct ProgressLine<W: Write + IsTty> {
    term: W,
    len: u64,
    pos: u64,
    interactive: bool,
    last_draw: Option<Instant>,
    samples: VecDeque<(Instant, u64)>,
}

impl<W: Write + IsTty> ProgressLine<W> {
    pub fn new(term: W, len: u64) -> Self {
        let interactive = term.is_tty();

        Self {
            term,
            len,
            pos: 0,
            interactive,
            last_draw: None,
            samples: VecDeque::new(),
        }
    }

    /// Update the current position and redraw if enough time has passed
    /// since the last draw.
    pub fn set_position(&mut self, pos: u64) -> io::Result<()> {
        let now = Instant::now();

        self.pos = pos;
        self.samples.push_back((now, pos));
        while let Some(front) = self.samples.front() {
            if self.samples.len() > 2 && now - front.0 > SPEED_WINDOW {
                self.samples.pop_front();
            } else {
                break;
            }
        }

        if !self.interactive {
            return Ok(());
        }
        if matches!(self.last_draw, Some(t) if now - t < DRAW_INTERVAL) {
            return Ok(());
        }

        self.last_draw = Some(now);
        self.draw()
    }

    /// Moving-average speed in bytes per second.
    fn speed(&self) -> f64 {
        match (self.samples.front(), self.samples.back()) {
            (Some(first), Some(last)) if first.0 != last.0 => {
                (last.1 - first.1) as f64 / (last.0 - first.0).as_secs_f64()
            }
            _ => 0.0,
        }
    }

    fn draw(&mut self) -> io::Result<()> {
        let percent = if self.len > 0 {
            self.pos * 100 / self.len
        } else {
            0
        };
        let line = format!(
            "{} / {} ({}%) at {}/s",
            binary_size(self.pos),
            binary_size(self.len),
            percent,
            binary_size(self.speed() as u64),
        );

        self.term.queue(MoveToColumn(0))?
            .queue(Clear(ClearType::CurrentLine))?
            .queue(Print(line))?;
        self.term.flush()
    }

    /// Draw the final state and move to the next line.
    pub fn finish(&mut self) -> io::Result<()> {
        if !self.interactive {
            return Ok(());
        }

        self.draw()?;
        self.term.queue(Print("\n"))?;
        self.term.flush()
    }
}
