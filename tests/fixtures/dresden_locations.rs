//! Dresden-area locations for realistic test fixtures.
//!
//! Coordinates are taken from OpenStreetMap, rounded to four decimals.

use tour_planner::{Point, Stop};

/// Depot used by every fixture (FAMO, Dresden).
pub const DEPOT: Point = (51.0111988, 13.7016485);

/// A named location with coordinates.
#[derive(Debug, Clone)]
pub struct Location {
    pub name: &'static str,
    pub lat: f64,
    pub lng: f64,
}

impl Location {
    pub const fn new(name: &'static str, lat: f64, lng: f64) -> Self {
        Self { name, lat, lng }
    }

    pub fn coords(&self) -> Point {
        (self.lat, self.lng)
    }

    pub fn stop(&self, id: &str) -> Stop {
        Stop::new(id, self.lat, self.lng).with_name(self.name)
    }
}

// ============================================================================
// City center
// ============================================================================

pub const CITY_CENTER: &[Location] = &[
    Location::new("Frauenkirche", 51.0519, 13.7415),
    Location::new("Zwinger", 51.0530, 13.7340),
    Location::new("Semperoper", 51.0543, 13.7353),
    Location::new("Hauptbahnhof", 51.0404, 13.7320),
    Location::new("Bahnhof Neustadt", 51.0654, 13.7407),
    Location::new("Großer Garten", 51.0379, 13.7626),
    Location::new("TU Dresden", 51.0306, 13.7270),
    Location::new("Pieschen", 51.0750, 13.7270),
    Location::new("Striesen", 51.0460, 13.7800),
    Location::new("Plauen", 51.0290, 13.7150),
    Location::new("Cotta", 51.0550, 13.6900),
    Location::new("Leubnitz", 51.0180, 13.7700),
];

// ============================================================================
// Outskirts and surrounding towns
// ============================================================================

pub const OUTSKIRTS: &[Location] = &[
    Location::new("Blaues Wunder", 51.0537, 13.8133),
    Location::new("Weißer Hirsch", 51.0650, 13.8300),
    Location::new("Schloss Pillnitz", 51.0090, 13.8700),
    Location::new("Prohlis", 51.0050, 13.7990),
    Location::new("Heidenau", 50.9826, 13.8679),
    Location::new("Pirna Markt", 50.9624, 13.9415),
    Location::new("Bannewitz", 50.9950, 13.7170),
    Location::new("Freital", 51.0027, 13.6496),
    Location::new("Gorbitz", 51.0450, 13.6700),
    Location::new("Kesselsdorf", 51.0420, 13.5740),
    Location::new("Elbepark", 51.0868, 13.6848),
    Location::new("Radebeul Ost", 51.1049, 13.6699),
    Location::new("Klotzsche", 51.1180, 13.7761),
    Location::new("Flughafen", 51.1328, 13.7672),
    Location::new("Coswig", 51.1268, 13.5830),
    Location::new("Moritzburg", 51.1660, 13.6795),
    Location::new("Meißen Dom", 51.1660, 13.4710),
];

pub fn all_locations() -> Vec<Location> {
    CITY_CENTER.iter().chain(OUTSKIRTS.iter()).cloned().collect()
}

/// Stops `s0..` for the given locations.
pub fn stops_for(locations: &[Location]) -> Vec<Stop> {
    locations
        .iter()
        .enumerate()
        .map(|(i, loc)| loc.stop(&format!("s{i}")))
        .collect()
}

/// The three stops used in the small-tour scenario.
pub fn three_city_stops() -> Vec<Stop> {
    vec![
        Stop::new("s1", 51.05, 13.73),
        Stop::new("s2", 51.06, 13.74),
        Stop::new("s3", 51.04, 13.72),
    ]
}

/// `rows * cols` stops on a grid with ~0.9 km spacing, north-east of the
/// depot, listed row by row in serpentine order.
pub fn serpentine_grid(rows: usize, cols: usize) -> Vec<Stop> {
    let mut stops = Vec::with_capacity(rows * cols);
    for r in 0..rows {
        for c in 0..cols {
            let c = if r % 2 == 0 { c } else { cols - 1 - c };
            stops.push(Stop::new(
                format!("g{}-{}", r, c),
                51.02 + 0.008 * r as f64,
                13.71 + 0.0128 * c as f64,
            ));
        }
    }
    stops
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coordinates_in_dresden_area() {
        for loc in all_locations() {
            assert!(loc.lat > 50.9 && loc.lat < 51.2, "{} lat {}", loc.name, loc.lat);
            assert!(loc.lng > 13.4 && loc.lng < 14.0, "{} lng {}", loc.name, loc.lng);
        }
    }
}
