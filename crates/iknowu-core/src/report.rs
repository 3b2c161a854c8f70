//! Training report: per-epoch history as CSV plus a line chart as PNG.

use crate::types::History;
use image::{Rgb, RgbImage};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const CSV_FILE: &str = "report.csv";
pub const PNG_FILE: &str = "report.png";

const WIDTH: u32 = 640;
const HEIGHT: u32 = 480;
const MARGIN: u32 = 40;
const LEGEND: u32 = 10;

const BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);
const AXIS: Rgb<u8> = Rgb([40, 40, 40]);
const GRID: Rgb<u8> = Rgb([225, 225, 225]);

/// One colour per history column, in [`History::COLUMNS`] order.
const PALETTE: [Rgb<u8>; 4] = [
    Rgb([31, 119, 180]),
    Rgb([255, 127, 14]),
    Rgb([44, 160, 44]),
    Rgb([214, 39, 40]),
];

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("report directory not found: {0}")]
    DirectoryNotFound(PathBuf),
    #[error("failed to write {path}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("failed to write {path}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

pub struct Report<'a> {
    history: &'a History,
}

impl<'a> Report<'a> {
    pub fn new(history: &'a History) -> Self {
        Self { history }
    }

    /// Write `report.csv` and `report.png` into `directory`, overwriting both.
    pub fn save(&self, directory: &Path) -> Result<(PathBuf, PathBuf), ReportError> {
        if !directory.is_dir() {
            return Err(ReportError::DirectoryNotFound(directory.to_path_buf()));
        }
        let csv = self.write_csv(&directory.join(CSV_FILE))?;
        let png = self.write_png(&directory.join(PNG_FILE))?;
        tracing::info!(csv = %csv.display(), png = %png.display(), "report saved");
        Ok((csv, png))
    }

    fn write_csv(&self, path: &Path) -> Result<PathBuf, ReportError> {
        let err = |e| ReportError::Csv {
            path: path.to_path_buf(),
            source: e,
        };
        let mut writer = csv::Writer::from_path(path).map_err(err)?;
        writer.write_record(History::COLUMNS).map_err(err)?;
        for row in self.history.rows() {
            writer
                .write_record(row.iter().map(|v| v.to_string()))
                .map_err(err)?;
        }
        writer.flush().map_err(|e| err(e.into()))?;
        Ok(path.to_path_buf())
    }

    fn write_png(&self, path: &Path) -> Result<PathBuf, ReportError> {
        self.render().save(path).map_err(|e| ReportError::Image {
            path: path.to_path_buf(),
            source: e,
        })?;
        Ok(path.to_path_buf())
    }

    /// Draw every series on a shared y axis starting at zero.
    pub fn render(&self) -> RgbImage {
        let mut img = RgbImage::from_pixel(WIDTH, HEIGHT, BACKGROUND);
        let (left, top) = (MARGIN as i64, MARGIN as i64);
        let (right, bottom) = ((WIDTH - MARGIN) as i64, (HEIGHT - MARGIN) as i64);

        for step in 1..=4 {
            let y = bottom - (bottom - top) * step / 4;
            line(&mut img, (left, y), (right, y), GRID);
        }
        line(&mut img, (left, bottom), (right, bottom), AXIS);
        line(&mut img, (left, top), (left, bottom), AXIS);

        let series = self.history.series();
        let peak = series
            .iter()
            .flat_map(|s| s.iter().copied())
            .filter(|v| v.is_finite())
            .fold(0.0_f64, f64::max);
        let ceiling = if peak > 0.0 { peak } else { 1.0 };
        let epochs = self.history.epochs();

        let point = |i: usize, v: f64| -> (i64, i64) {
            let x = if epochs > 1 {
                left + (right - left) * i as i64 / (epochs as i64 - 1)
            } else {
                left
            };
            let y = bottom - ((bottom - top) as f64 * (v / ceiling)).round() as i64;
            (x, y)
        };

        for (values, colour) in series.iter().zip(PALETTE) {
            let points: Vec<_> = values
                .iter()
                .enumerate()
                .filter(|(_, v)| v.is_finite())
                .map(|(i, &v)| point(i, v))
                .collect();
            for pair in points.windows(2) {
                line(&mut img, pair[0], pair[1], colour);
            }
            if let [only] = points.as_slice() {
                square(&mut img, *only, 2, colour);
            }
        }

        // Legend: one swatch per column, top right, in column order.
        for (i, colour) in PALETTE.iter().enumerate() {
            let x = right - LEGEND as i64;
            let y = top + (i as i64) * (LEGEND as i64 + 4);
            square(&mut img, (x, y), LEGEND as i64 / 2, *colour);
        }

        img
    }
}

fn put(img: &mut RgbImage, x: i64, y: i64, colour: Rgb<u8>) {
    if x >= 0 && y >= 0 && (x as u32) < img.width() && (y as u32) < img.height() {
        img.put_pixel(x as u32, y as u32, colour);
    }
}

/// Bresenham line between two points, clipped to the image.
fn line(img: &mut RgbImage, from: (i64, i64), to: (i64, i64), colour: Rgb<u8>) {
    let (mut x, mut y) = from;
    let dx = (to.0 - x).abs();
    let dy = -(to.1 - y).abs();
    let sx = if x < to.0 { 1 } else { -1 };
    let sy = if y < to.1 { 1 } else { -1 };
    let mut err = dx + dy;
    loop {
        put(img, x, y, colour);
        if (x, y) == to {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x += sx;
        }
        if e2 <= dx {
            err += dx;
            y += sy;
        }
    }
}

fn square(img: &mut RgbImage, centre: (i64, i64), half: i64, colour: Rgb<u8>) {
    for y in centre.1 - half..=centre.1 + half {
        for x in centre.0 - half..=centre.0 + half {
            put(img, x, y, colour);
        }
    }
}
