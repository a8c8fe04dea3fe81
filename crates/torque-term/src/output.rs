use std::{
    io::{self, IsTerminal, Write},
    result::Result as StdResult,
    time::Duration,
};

use indicatif::{ProgressBar, ProgressStyle};
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};
use thiserror::Error;

/// Indentation level (in spaces) used for nested output sections.
const INDENT: usize = 4;
/// Redraw interval for spinners.
const SPINNER_TICK: Duration = Duration::from_millis(100);

/// Errors produced by [`Output`] implementations when writing to the terminal.
#[derive(Debug, Error)]
pub enum OutputError {
    /// Underlying I/O error while writing to the terminal.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Convenience alias for output-related fallible operations.
pub type Result<T> = StdResult<T, OutputError>;

/// Abstraction over how user-facing messages are produced.
pub trait Output: Send + Sync {
    /// Print an informational message.
    fn message(&self, msg: &str) -> Result<()>;
    /// Print a success message.
    fn success(&self, msg: &str) -> Result<()>;
    /// Print a warning message.
    fn warn(&self, msg: &str) -> Result<()>;
    /// Print an error/failure message.
    fn fail(&self, msg: &str) -> Result<()>;
    /// Print a labelled value, such as an identifier or link.
    fn item(&self, label: &str, value: &str) -> Result<()>;
    /// Flush any buffered output.
    fn finish(&self) -> Result<()>;
    /// Create a nested output section that indents subsequent messages.
    fn section(&self, header: &str) -> Box<dyn Output>;
    /// Start a spinner showing `msg` until it is finished.
    fn spinner(&self, msg: &str) -> Spinner;
}

/// Progress indicator for long-running operations. Hidden when output is
/// suppressed or stderr is not a terminal.
#[derive(Debug)]
pub struct Spinner {
    /// The animated bar, if one is drawn.
    bar: Option<ProgressBar>,
}

impl Spinner {
    /// A spinner that draws nothing.
    pub fn hidden() -> Self {
        Self { bar: None }
    }

    /// Start an animated spinner on stderr showing `msg`.
    fn animated(msg: &str) -> Self {
        if !io::stderr().is_terminal() {
            return Self::hidden();
        }
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::default_spinner()
            .template("{spinner:.yellow} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        bar.set_style(style);
        bar.set_message(msg.to_string());
        bar.enable_steady_tick(SPINNER_TICK);
        Self { bar: Some(bar) }
    }

    /// Whether the spinner is drawn.
    pub fn is_visible(&self) -> bool {
        self.bar.is_some()
    }

    /// Replace the spinner's message.
    pub fn set_message(&self, msg: &str) {
        if let Some(bar) = &self.bar {
            bar.set_message(msg.to_string());
        }
    }

    /// Stop the spinner, leaving a success mark and `msg`.
    pub fn finish_success(&self, msg: &str) {
        if let Some(bar) = &self.bar {
            bar.finish_with_message(format!("✔ {msg}"));
        }
    }

    /// Stop the spinner, leaving a failure mark and `msg`.
    pub fn finish_fail(&self, msg: &str) {
        if let Some(bar) = &self.bar {
            bar.abandon_with_message(format!("✘ {msg}"));
        }
    }
}

/// Output implementation that suppresses all messages. Useful for
/// non-interactive or test environments.
pub struct Quiet;

impl Output for Quiet {
    fn message(&self, _msg: &str) -> Result<()> {
        Ok(())
    }

    fn success(&self, _msg: &str) -> Result<()> {
        Ok(())
    }

    fn warn(&self, _msg: &str) -> Result<()> {
        Ok(())
    }

    fn fail(&self, _msg: &str) -> Result<()> {
        Ok(())
    }

    fn item(&self, _label: &str, _value: &str) -> Result<()> {
        Ok(())
    }

    fn finish(&self) -> Result<()> {
        Ok(())
    }

    fn section(&self, _header: &str) -> Box<dyn Output> {
        Box::new(Self)
    }

    fn spinner(&self, _msg: &str) -> Spinner {
        Spinner::hidden()
    }
}

/// Color-capable terminal renderer for user messages.
pub struct Terminal {
    /// Whether to emit ANSI color sequences when writing to stdout.
    color_choice: ColorChoice,
    /// Current indentation depth in spaces.
    indent: usize,
}

impl Terminal {
    /// Create a new terminal output.
    ///
    /// - `color`: when `true`, always render colored output; when `false`,
    ///   disable ANSI colors.
    pub fn new(color: bool) -> Self {
        let color_choice = if color {
            ColorChoice::Always
        } else {
            ColorChoice::Never
        };
        Self {
            color_choice,
            indent: 0,
        }
    }

    /// Write `msg` using `color` while honoring the current indentation level.
    fn write_colored(&self, msg: &str, color: Option<Color>, bold: bool) -> Result<()> {
        let mut stdout = StandardStream::stdout(self.color_choice);
        stdout.set_color(ColorSpec::new().set_fg(color).set_bold(bold))?;
        writeln!(stdout, "{}{msg}", " ".repeat(self.indent))?;
        stdout.reset()?;
        stdout.flush()?;
        Ok(())
    }
}

impl Output for Terminal {
    fn message(&self, msg: &str) -> Result<()> {
        self.write_colored(msg, None, false)
    }

    fn success(&self, msg: &str) -> Result<()> {
        self.write_colored(msg, Some(Color::Green), false)
    }

    fn warn(&self, msg: &str) -> Result<()> {
        self.write_colored(msg, Some(Color::Yellow), false)
    }

    fn fail(&self, msg: &str) -> Result<()> {
        self.write_colored(msg, Some(Color::Red), true)
    }

    fn item(&self, label: &str, value: &str) -> Result<()> {
        let mut stdout = StandardStream::stdout(self.color_choice);
        write!(stdout, "{}{label}: ", " ".repeat(self.indent))?;
        stdout.set_color(ColorSpec::new().set_fg(Some(Color::Cyan)).set_bold(true))?;
        writeln!(stdout, "{value}")?;
        stdout.reset()?;
        stdout.flush()?;
        Ok(())
    }

    fn finish(&self) -> Result<()> {
        io::stdout().flush()?;
        Ok(())
    }

    fn section(&self, header: &str) -> Box<dyn Output> {
        // A header that cannot be written still leaves a usable section.
        if self.write_colored(header, None, true).is_err() {
            return Box::new(Quiet);
        }

        Box::new(Self {
            color_choice: self.color_choice,
            indent: self.indent + INDENT,
        })
    }

    fn spinner(&self, msg: &str) -> Spinner {
        Spinner::animated(msg)
    }
}
