use offline_map_generator::{Coordinate, Format, MAX_ZOOM};
use std::str::FromStr;

pub fn is_numeric_min<T>(min: T) -> impl Fn(&str) -> Result<T, String> + Clone + Send + Sync + 'static
where
    T: FromStr + PartialOrd + std::fmt::Display + Copy + Send + Sync + 'static,
{
    move |v: &str| {
        let val = v.parse::<T>().map_err(|_| "must be numeric".to_owned())?;

        if val < min {
            return Err(format!("must be >= {}", min));
        }

        Ok(val)
    }
}

pub fn is_zoom(v: &str) -> Result<u8, String> {
    let val = v.trim().parse::<u8>().map_err(|_| "must be numeric".to_owned())?;

    if val > MAX_ZOOM {
        return Err(format!("must be <= {}", MAX_ZOOM));
    }

    Ok(val)
}

/// A comma separated list of zoom levels, e.g. `10,12,14`.
pub fn is_zoom_list(v: &str) -> Result<Vec<u8>, String> {
    v.split(',')
        .filter(|part| !part.trim().is_empty())
        .map(|part| is_zoom(part).map_err(|e| format!("`{}` {}", part.trim(), e)))
        .collect()
}

/// A `lat,lon` pair in degrees.
pub fn is_geo_coord(v: &str) -> Result<Coordinate, String> {
    let (lat, lon) = v
        .split_once(',')
        .ok_or_else(|| "must be `lat,lon`".to_owned())?;

    let lat = lat
        .trim()
        .parse::<f64>()
        .map_err(|_| "latitude must be numeric".to_owned())?;
    let lon = lon
        .trim()
        .parse::<f64>()
        .map_err(|_| "longitude must be numeric".to_owned())?;

    if !(-90f64..=90f64).contains(&lat) {
        return Err("latitude must be within ±90°".to_owned());
    }
    if !(-180f64..=180f64).contains(&lon) {
        return Err("longitude must be within ±180°".to_owned());
    }

    Ok(Coordinate::new(lat, lon))
}

pub fn is_format(v: &str) -> Result<Format, String> {
    v.parse::<Format>().map_err(|e| e.to_owned())
}
