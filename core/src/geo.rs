//! State centroids and great-circle distance for the geographic rule.

const EARTH_RADIUS_KM: f64 = 6_371.0;

/// (USPS code, latitude, longitude) of approximate geographic centres.
const STATE_CENTROIDS: [(&str, f64, f64); 51] = [
    ("AK", 64.20, -149.49),
    ("AL", 32.32, -86.90),
    ("AR", 35.20, -91.83),
    ("AZ", 34.05, -111.09),
    ("CA", 36.78, -119.42),
    ("CO", 39.55, -105.78),
    ("CT", 41.60, -73.09),
    ("DC", 38.91, -77.04),
    ("DE", 38.91, -75.53),
    ("FL", 27.66, -81.52),
    ("GA", 32.16, -82.90),
    ("HI", 19.90, -155.58),
    ("IA", 41.88, -93.10),
    ("ID", 44.07, -114.74),
    ("IL", 40.63, -89.40),
    ("IN", 40.27, -86.13),
    ("KS", 39.01, -98.48),
    ("KY", 37.84, -84.27),
    ("LA", 30.98, -91.96),
    ("MA", 42.41, -71.38),
    ("MD", 39.05, -76.64),
    ("ME", 45.25, -69.45),
    ("MI", 44.31, -85.60),
    ("MN", 46.73, -94.69),
    ("MO", 37.96, -91.83),
    ("MS", 32.35, -89.40),
    ("MT", 46.88, -110.36),
    ("NC", 35.76, -79.02),
    ("ND", 47.55, -101.00),
    ("NE", 41.49, -99.90),
    ("NH", 43.19, -71.57),
    ("NJ", 40.06, -74.41),
    ("NM", 34.52, -105.87),
    ("NV", 38.80, -116.42),
    ("NY", 43.30, -74.22),
    ("OH", 40.42, -82.91),
    ("OK", 35.01, -97.09),
    ("OR", 43.80, -120.55),
    ("PA", 41.20, -77.19),
    ("RI", 41.58, -71.48),
    ("SC", 33.84, -81.16),
    ("SD", 43.97, -99.90),
    ("TN", 35.52, -86.58),
    ("TX", 31.97, -99.90),
    ("UT", 39.32, -111.09),
    ("VA", 37.43, -78.66),
    ("VT", 44.56, -72.58),
    ("WA", 47.75, -120.74),
    ("WI", 43.78, -88.79),
    ("WV", 38.60, -80.45),
    ("WY", 43.08, -107.29),
];

/// Centroid of a US state by its two-letter code, case-insensitive.
pub fn state_centroid(code: &str) -> Option<(f64, f64)> {
    let code = code.trim();
    STATE_CENTROIDS
        .iter()
        .find(|(c, _, _)| c.eq_ignore_ascii_case(code))
        .map(|&(_, lat, lon)| (lat, lon))
}

/// Haversine distance in kilometres.
pub fn haversine_km(a: (f64, f64), b: (f64, f64)) -> f64 {
    let (lat1, lon1) = (a.0.to_radians(), a.1.to_radians());
    let (lat2, lon2) = (b.0.to_radians(), b.1.to_radians());
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;
    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().min(1.0).asin()
}

/// How far a transaction location sits from the member's home.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StateDistance {
    Km(f64),
    /// One of the states has no centroid; only equality is known.
    Unmeasured { same_state: bool },
}

pub fn state_distance(home: &str, location: &str) -> StateDistance {
    match (state_centroid(home), state_centroid(location)) {
        (Some(a), Some(b)) => StateDistance::Km(haversine_km(a, b)),
        _ => StateDistance::Unmeasured {
            same_state: home.trim().eq_ignore_ascii_case(location.trim()),
        },
    }
}
