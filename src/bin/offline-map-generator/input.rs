use anyhow::{Context, Result};
use std::{
    fs::File,
    io::{BufRead, BufReader, Lines},
    path::{Path, PathBuf},
    vec,
};

use offline_map_generator::Coordinate;

/// Lazily reads `lat,lon` lines from a list of text files.
///
/// Blank lines and lines starting with `#` are ignored; malformed lines are
/// logged and skipped.
pub struct CoordinateReader {
    files: vec::IntoIter<(PathBuf, File)>,
    current: Option<(PathBuf, Lines<BufReader<File>>, usize)>,
}

impl CoordinateReader {
    /// Opens every file up front so unreadable input is reported before any work starts.
    pub fn open(paths: &[PathBuf]) -> Result<Self> {
        let files = paths
            .iter()
            .map(|path| {
                File::open(path)
                    .map(|file| (path.clone(), file))
                    .with_context(|| format!("failed opening input file {}", path.display()))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            files: files.into_iter(),
            current: None,
        })
    }
}

fn parse_line(line: &str) -> Option<Coordinate> {
    let mut parts = line
        .split(|c: char| c == ',' || c == ';' || c.is_whitespace())
        .filter(|part| !part.is_empty());

    let lat = parts.next()?.parse::<f64>().ok()?;
    let lon = parts.next()?.parse::<f64>().ok()?;

    let valid = (-90f64..=90f64).contains(&lat) && (-180f64..=180f64).contains(&lon);
    valid.then(|| Coordinate::new(lat, lon))
}

fn warn_skipped(path: &Path, line_no: usize, reason: &str) {
    log::warn!("{}:{}: {}, skipping line", path.display(), line_no, reason);
}

impl Iterator for CoordinateReader {
    type Item = Coordinate;

    fn next(&mut self) -> Option<Coordinate> {
        loop {
            if self.current.is_none() {
                let (path, file) = self.files.next()?;
                log::debug!("reading coordinates from {}", path.display());
                self.current = Some((path, BufReader::new(file).lines(), 0));
            }

            let (path, lines, line_no) = self.current.as_mut()?;
            match lines.next() {
                Some(Ok(line)) => {
                    *line_no += 1;
                    let line = line.trim();
                    if line.is_empty() || line.starts_with('#') {
                        continue;
                    }

                    match parse_line(line) {
                        Some(coordinate) => return Some(coordinate),
                        None => warn_skipped(path, *line_no, "not a valid `lat,lon` pair"),
                    }
                }
                Some(Err(e)) => {
                    *line_no += 1;
                    warn_skipped(path, *line_no, &e.to_string());
                    self.current = None;
                }
                None => self.current = None,
            }
        }
    }
}
