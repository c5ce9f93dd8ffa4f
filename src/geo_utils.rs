// Copyright: Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Removal of the attribution is not allowed, as covered under the AGPL license

use geo::{Distance, Haversine, Point};

/// Great-circle distance in kilometres between two (lat, lng) pairs.
pub fn distance(a: (f64, f64), b: (f64, f64)) -> f64 {
    // geo points are (x = lng, y = lat)
    let p1 = Point::new(a.1, a.0);
    let p2 = Point::new(b.1, b.0);
    Haversine.distance(p1, p2) / 1000.0
}
