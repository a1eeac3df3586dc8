use std::{io, time::Duration};

use anyhow::{bail, Result};
use chrono::NaiveDateTime;
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use itertools::Itertools as _;
use ratatui::{
    backend::{Backend, CrosstermBackend},
    style::{Color, Style},
    symbols,
    widgets::{Axis, Block, BorderType, Borders, Chart, Dataset, GraphType, LegendPosition},
    Terminal,
};

use crate::render::{Figure, LegendCorner};

const SERIES_COLORS: [Color; 8] = [
    Color::Cyan,
    Color::Yellow,
    Color::Magenta,
    Color::Green,
    Color::Red,
    Color::Blue,
    Color::LightCyan,
    Color::LightMagenta,
];
const X_TICKS: i32 = 4;
const Y_TICKS: u64 = 4;

/// A [`Figure`] flattened to what a terminal chart needs: seconds since the first sample on
/// x, MiB on y.
#[derive(Debug, Clone, PartialEq)]
pub struct TerminalChart {
    pub series: Vec<(String, Vec<(f64, f64)>)>,
    pub x_bounds: [f64; 2],
    pub y_bounds: [f64; 2],
    pub x_labels: Vec<String>,
    pub y_labels: Vec<String>,
    pub legend: LegendPosition,
}

impl TerminalChart {
    pub fn from_figure(figure: &Figure) -> Option<Self> {
        let (x_range, y_max) = figure.bounds()?;
        let origin = x_range.start;
        let seconds = |t: NaiveDateTime| (t - origin).num_milliseconds() as f64 / 1000.0;

        let series = figure
            .series
            .iter()
            .map(|series| {
                let points = series
                    .points
                    .iter()
                    .map(|&(t, mib)| (seconds(t), mib as f64))
                    .collect_vec();
                (series.label.clone(), points)
            })
            .collect_vec();

        let span = x_range.end - origin;
        let x_labels = (0..=X_TICKS)
            .map(|i| (origin + span * i / X_TICKS).format("%H:%M").to_string())
            .collect_vec();
        let y_top = (y_max + y_max / 20).max(1);
        let y_labels = (0..=Y_TICKS).map(|i| (y_top * i / Y_TICKS).to_string()).collect_vec();

        let legend = match figure.legend_corner() {
            LegendCorner::UpperRight => LegendPosition::TopRight,
            LegendCorner::UpperLeft => LegendPosition::TopLeft,
            LegendCorner::LowerLeft => LegendPosition::BottomLeft,
            LegendCorner::LowerRight => LegendPosition::BottomRight,
        };

        Some(TerminalChart {
            series,
            x_bounds: [0.0, seconds(x_range.end)],
            y_bounds: [0.0, y_top as f64],
            x_labels,
            y_labels,
            legend,
        })
    }
}

/// Shows the figure in the terminal until `q` or `Esc` is pressed.
pub fn show(figure: &Figure) -> Result<()> {
    let Some(chart) = TerminalChart::from_figure(figure) else {
        bail!("no samples to show");
    };

    enable_raw_mode()?;
    execute!(io::stdout(), EnterAlternateScreen)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(io::stdout()))?;

    let result = run(&mut terminal, &chart);

    let restored = first_error([
        disable_raw_mode(),
        execute!(terminal.backend_mut(), LeaveAlternateScreen),
        terminal.show_cursor(),
    ]);
    result?;
    Ok(restored?)
}

/// Takes steps that have all been run already and keeps the first failure.
fn first_error(steps: impl IntoIterator<Item = io::Result<()>>) -> io::Result<()> {
    steps.into_iter().find(Result::is_err).unwrap_or(Ok(()))
}

fn chart_widget(chart: &TerminalChart) -> Chart<'_> {
    let datasets = chart
        .series
        .iter()
        .enumerate()
        .map(|(i, (label, points))| {
            Dataset::default()
                .name(label.as_str())
                .marker(symbols::Marker::Braille)
                .graph_type(GraphType::Scatter)
                .style(Style::default().fg(SERIES_COLORS[i % SERIES_COLORS.len()]))
                .data(points)
        })
        .collect_vec();

    Chart::new(datasets)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_type(BorderType::Rounded)
                .title(" GPU memory usage (q to quit) "),
        )
        .x_axis(
            Axis::default()
                .title("Timestamp")
                .bounds(chart.x_bounds)
                .labels(chart.x_labels.iter().map(String::as_str)),
        )
        .y_axis(
            Axis::default()
                .title("Memory usage [MiB]")
                .bounds(chart.y_bounds)
                .labels(chart.y_labels.iter().map(String::as_str)),
        )
        .legend_position(Some(chart.legend))
}

fn run<B: Backend>(terminal: &mut Terminal<B>, chart: &TerminalChart) -> Result<()> {
    loop {
        terminal.draw(|f| f.render_widget(chart_widget(chart), f.area()))?;

        if event::poll(Duration::from_millis(100))? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press && matches!(key.code, KeyCode::Char('q') | KeyCode::Esc) {
                    return Ok(());
                }
            }
        }
    }
}
