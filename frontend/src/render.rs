use std::{
    f64::consts::PI,
    ops::Range,
    path::{Path, PathBuf},
};

use anyhow::{anyhow, bail, Context as _, Result};
use chrono::{Duration, NaiveDateTime};
use collector_data::log_format::PLOT_FILE_NAME;
use image::{ImageFormat, RgbImage};
use itertools::Itertools as _;
use plotters::prelude::*;

use crate::data::{DeviceId, Table};

//const FONT_FAMILY: &str = "DejaVuSansMono"; // not installed on every compute node
const FONT_FAMILY: &str = "sans-serif";
pub const FIGURE_SIZE: (u32, u32) = (800, 600);
const MARKER_RADIUS: i32 = 4;

pub fn create_bitmap_buffer(buf: &mut Vec<u8>, x: u32, y: u32) -> BitMapBackend<'_> {
    let len = x as usize * y as usize * 3; // RGB: bit depth = 24
    buf.clear();
    buf.resize(len, 0);
    BitMapBackend::with_buffer(buf.as_mut_slice(), (x, y))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    Circle,
    Square,
    TriangleUp,
    Diamond,
    TriangleDown,
    Cross,
    Pentagon,
    Star,
}

pub const MARKER_CYCLE: [Marker; 8] = [
    Marker::Circle,
    Marker::Square,
    Marker::TriangleUp,
    Marker::Diamond,
    Marker::TriangleDown,
    Marker::Cross,
    Marker::Pentagon,
    Marker::Star,
];

/// `n` points on a circle of radius `r`, starting at angle `phase` (0 = straight up),
/// clockwise in screen coordinates.
fn regular_polygon(n: usize, r: f64, phase: f64) -> Vec<(i32, i32)> {
    (0..n)
        .map(|i| {
            let angle = phase + 2.0 * PI * i as f64 / n as f64;
            ((r * angle.sin()).round() as i32, (-r * angle.cos()).round() as i32)
        })
        .collect()
}

impl Marker {
    pub fn nth(i: usize) -> Self {
        MARKER_CYCLE[i % MARKER_CYCLE.len()]
    }

    /// Closed outline around `(0, 0)` in pixel offsets; `size` is roughly the radius.
    pub fn outline(self, size: i32) -> Vec<(i32, i32)> {
        let s = size;
        let r = f64::from(size);
        match self {
            Marker::Circle => regular_polygon(16, r, 0.0),
            Marker::Square => vec![(-s, -s), (s, -s), (s, s), (-s, s)],
            Marker::TriangleUp => regular_polygon(3, r, 0.0),
            Marker::Diamond => regular_polygon(4, r, 0.0),
            Marker::TriangleDown => regular_polygon(3, r, PI),
            Marker::Cross => {
                // X made of two bars of half-width w
                let w = (s / 3).max(1);
                vec![
                    (-s, -s + w),
                    (-s + w, -s),
                    (0, -w),
                    (s - w, -s),
                    (s, -s + w),
                    (w, 0),
                    (s, s - w),
                    (s - w, s),
                    (0, w),
                    (-s + w, s),
                    (-s, s - w),
                    (-w, 0),
                ]
            }
            Marker::Pentagon => regular_polygon(5, r, 0.0),
            Marker::Star => regular_polygon(5, r, 0.0)
                .into_iter()
                .interleave(regular_polygon(5, r * 0.45, PI / 5.0))
                .collect(),
        }
    }
}

/// Widens `range` by 2% of its span on each side so markers on the edges stay whole.
fn pad_time_range(range: Range<NaiveDateTime>) -> Range<NaiveDateTime> {
    let pad = (range.end - range.start) / 50;
    (range.start - pad)..(range.end + pad)
}

/// Where the legend box goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegendCorner {
    UpperRight,
    UpperLeft,
    LowerLeft,
    LowerRight,
}

impl LegendCorner {
    const ALL: [LegendCorner; 4] = [
        LegendCorner::UpperRight,
        LegendCorner::UpperLeft,
        LegendCorner::LowerLeft,
        LegendCorner::LowerRight,
    ];

    pub fn position(self) -> SeriesLabelPosition {
        match self {
            LegendCorner::UpperRight => SeriesLabelPosition::UpperRight,
            LegendCorner::UpperLeft => SeriesLabelPosition::UpperLeft,
            LegendCorner::LowerLeft => SeriesLabelPosition::LowerLeft,
            LegendCorner::LowerRight => SeriesLabelPosition::LowerRight,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Series {
    pub label: String,
    pub device: DeviceId,
    pub marker: Marker,
    /// Position in first-seen device order, also selects the colour.
    pub index: usize,
    pub points: Vec<(NaiveDateTime, u64)>,
}

/// Memory used over time, one unconnected scatter series per GPU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Figure {
    pub series: Vec<Series>,
}

impl Figure {
    pub fn from_table(table: &Table) -> Self {
        let series = table
            .devices()
            .into_iter()
            .enumerate()
            .map(|(index, device)| Series {
                label: format!("GPU: {index}"),
                device: device.clone(),
                marker: Marker::nth(index),
                index,
                points: table
                    .samples_of(device)
                    .map(|sample| (sample.timestamp, *sample.memory_used))
                    .collect(),
            })
            .collect();
        Figure { series }
    }

    fn points(&self) -> impl Iterator<Item = &(NaiveDateTime, u64)> + '_ {
        self.series.iter().flat_map(|series| series.points.iter())
    }

    /// Time range covering every point (widened by a minute on both ends if all points share
    /// one instant) and the largest memory value. `None` without points.
    pub fn bounds(&self) -> Option<(Range<NaiveDateTime>, u64)> {
        let (first, last) = match self.points().map(|(x, _)| *x).minmax() {
            itertools::MinMaxResult::NoElements => return None,
            itertools::MinMaxResult::OneElement(x) => (x, x),
            itertools::MinMaxResult::MinMax(first, last) => (first, last),
        };
        let x_range = if first == last {
            (first - Duration::minutes(1))..(last + Duration::minutes(1))
        } else {
            first..last
        };
        let y_max = self.points().map(|(_, y)| *y).max().unwrap_or_default();
        Some((x_range, y_max))
    }

    /// The corner whose quarter of the plot holds the fewest points.
    pub fn legend_corner(&self) -> LegendCorner {
        let Some((x_range, y_max)) = self.bounds() else {
            return LegendCorner::UpperRight;
        };
        let x_mid = x_range.start + (x_range.end - x_range.start) / 2;
        let y_mid = y_max / 2;

        let mut counts = [0usize; 4];
        for &(x, y) in self.points() {
            let corner = match (x < x_mid, y <= y_mid) {
                (false, false) => LegendCorner::UpperRight,
                (true, false) => LegendCorner::UpperLeft,
                (true, true) => LegendCorner::LowerLeft,
                (false, true) => LegendCorner::LowerRight,
            };
            counts[corner as usize] += 1;
        }

        LegendCorner::ALL
            .into_iter()
            .min_by_key(|corner| counts[*corner as usize])
            .unwrap_or(LegendCorner::UpperRight)
    }

    pub fn draw<DB>(&self, backend: DB) -> Result<()>
    where
        DB: DrawingBackend,
        DB::ErrorType: 'static,
    {
        let Some((x_range, y_max)) = self.bounds() else {
            bail!("no samples to plot");
        };
        // a little headroom so the top markers are not cut in half
        let y_range = 0..(y_max + y_max / 20).max(1);
        let coord: RangedDateTime<_> = pad_time_range(x_range).into();

        let drawing_area = backend.into_drawing_area();
        drawing_area.fill(&WHITE)?;

        let mut chart = ChartBuilder::on(&drawing_area)
            .margin(10)
            .x_label_area_size(40)
            .y_label_area_size(60)
            .build_cartesian_2d(coord, y_range)?;
        chart
            .configure_mesh()
            .x_desc("Timestamp")
            .y_desc("Memory usage [MiB]")
            .x_label_formatter(&|x| x.format("%H:%M").to_string())
            .label_style((FONT_FAMILY, 14))
            .axis_desc_style((FONT_FAMILY, 16))
            .draw()?;

        for series in &self.series {
            let style = Palette99::pick(series.index).filled();
            let outline = series.marker.outline(MARKER_RADIUS);
            let legend_outline = outline.clone();
            chart
                .draw_series(
                    series
                        .points
                        .iter()
                        .map(|&point| EmptyElement::at(point) + Polygon::new(outline.clone(), style)),
                )?
                .label(&series.label)
                .legend(move |(x, y)| {
                    Polygon::new(
                        legend_outline
                            .iter()
                            .map(|(dx, dy)| (x + 10 + dx, y + dy))
                            .collect_vec(),
                        style,
                    )
                });
        }

        chart
            .configure_series_labels()
            .position(self.legend_corner().position())
            .background_style(WHITE.mix(0.8))
            .border_style(BLACK)
            .label_font((FONT_FAMILY, 14))
            .draw()?;

        drawing_area.present()?;
        Ok(())
    }

    /// Renders into `<outdir>/gpu_log.png` and returns that path.
    pub fn save_png(&self, outdir: impl AsRef<Path>) -> Result<PathBuf> {
        let (x, y) = FIGURE_SIZE;
        let mut buf = Vec::new();
        self.draw(create_bitmap_buffer(&mut buf, x, y))?;

        let image = RgbImage::from_raw(x, y, buf)
            .ok_or_else(|| anyhow!("failed to create image from internal buffer (too small?)"))
            .context("rendering memory plot")?;
        let path = outdir.as_ref().join(PLOT_FILE_NAME);
        image
            .save_with_format(&path, ImageFormat::Png)
            .with_context(|| format!("saving plot to {}", path.display()))?;
        Ok(path)
    }
}
