use std::fmt::Write as _;
use std::time::{Duration, Instant};

use hf_core::frame::VizSnapshot;
use hf_core::traits::VisualizationSink;
use triple_buffer::{Input, Output, TripleBuffer};

/// Width of a rendered bar in glyphs.
pub const BAR_WIDTH: usize = 32;
/// Default minimum spacing between two rendered log lines.
pub const DEFAULT_LOG_INTERVAL: Duration = Duration::from_millis(250);

/// Latest-wins snapshot hand-off to another thread.
///
/// The mapper writes through the sink; any reader polls the [`Output`]
/// half without ever blocking the writer.
///
/// # Example
/// ```
/// use hf_light::viz::SnapshotBuffer;
/// use hf_core::frame::VizSnapshot;
/// use hf_core::traits::VisualizationSink;
///
/// let (mut sink, mut reader) = SnapshotBuffer::new();
/// sink.update(&VizSnapshot { hue: 42.0, ..VizSnapshot::default() });
/// assert!((reader.read().hue - 42.0).abs() < f32::EPSILON);
/// ```
pub struct SnapshotBuffer {
    input: Input<VizSnapshot>,
}

impl SnapshotBuffer {
    #[must_use]
    pub fn new() -> (Self, Output<VizSnapshot>) {
        let (input, output) = TripleBuffer::new(&VizSnapshot::default()).split();
        (Self { input }, output)
    }
}

impl VisualizationSink for SnapshotBuffer {
    fn update(&mut self, snapshot: &VizSnapshot) {
        self.input.write(*snapshot);
    }
}

/// Append `label [█████░░░] 0.42` to `out`. The value is clamped to [0, 1];
/// any positive value fills at least one glyph.
///
/// # Example
/// ```
/// use hf_light::viz::render_bar;
/// let mut line = String::new();
/// render_bar(&mut line, "Bass", 0.5, 8);
/// assert_eq!(line, "Bass       [████░░░░] 0.50");
/// ```
pub fn render_bar(out: &mut String, label: &str, value: f32, width: usize) {
    let clamped = if value.is_nan() { 0.0 } else { value.clamp(0.0, 1.0) };
    let mut filled = ((clamped * width as f32).round() as usize).min(width);
    if clamped > 0.0 && filled == 0 && width > 0 {
        filled = 1;
    }

    let _ = write!(out, "{label:<10} [");
    out.extend(std::iter::repeat_n('█', filled));
    out.extend(std::iter::repeat_n('░', width - filled));
    let _ = write!(out, "] {clamped:.2}");
}

/// Throttled debug rendering of the mapper state through `log`.
pub struct LogVisualizer {
    interval: Duration,
    last: Option<Instant>,
    line: String,
}

impl Default for LogVisualizer {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_INTERVAL)
    }
}

impl LogVisualizer {
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
            line: String::with_capacity(1024),
        }
    }

    /// Render a snapshot into the internal buffer and return it.
    pub fn render(&mut self, s: &VizSnapshot) -> &str {
        self.line.clear();
        let _ = writeln!(
            self.line,
            "{:<13} hsv {:3.0}°/{:3.0}%/{:3.0}%  intensity {:4.2}  beat {} {:4.2}",
            s.mode.name(),
            s.hue.clamp(0.0, 359.0),
            s.saturation.clamp(0.0, 100.0),
            s.brightness.clamp(0.0, 100.0),
            s.intensity.clamp(0.0, 1.0),
            if s.beat { '●' } else { '○' },
            s.beat_strength.clamp(0.0, 1.0),
        );
        let bars = [
            ("Energy", s.energy),
            ("Beat Pulse", s.beat_pulse),
            ("Bass", s.bass),
            ("Mid", s.mid),
            ("Treble", s.treble),
            ("Sparkle", s.sparkle),
            ("Centroid", s.centroid),
            ("Rolloff", s.rolloff),
        ];
        for (i, (label, value)) in bars.into_iter().enumerate() {
            if i > 0 {
                self.line.push('\n');
            }
            render_bar(&mut self.line, label, value, BAR_WIDTH);
        }
        &self.line
    }
}

impl VisualizationSink for LogVisualizer {
    fn update(&mut self, snapshot: &VizSnapshot) {
        let now = Instant::now();
        if self
            .last
            .is_some_and(|t| now.duration_since(t) < self.interval)
        {
            return;
        }
        self.last = Some(now);
        if log::log_enabled!(log::Level::Debug) {
            let text = self.render(snapshot);
            log::debug!("\n{text}");
        }
    }
}
