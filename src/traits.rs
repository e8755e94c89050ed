//! Core seams for the planner.
//!
//! Kept minimal: the route builder and the distance code only need to know
//! where something is and how far apart two points are. The table rows in
//! [`crate::model`] implement these, and so can any caller-side type.

use crate::geo::Coordinate;

/// Something on the map that can appear in a route.
pub trait Located {
    fn id(&self) -> &str;

    /// Coordinates, or `None` when missing or not finite.
    fn location(&self) -> Option<Coordinate>;
}

impl<T: Located + ?Sized> Located for &T {
    fn id(&self) -> &str {
        (**self).id()
    }

    fn location(&self) -> Option<Coordinate> {
        (**self).location()
    }
}

/// Distance in kilometers between two coordinates.
pub trait DistanceMetric {
    fn distance_km(&self, from: Coordinate, to: Coordinate) -> f64;

    /// Distance matrix indexed by the provided location order.
    fn matrix_for(&self, locations: &[Coordinate]) -> Vec<Vec<f64>> {
        let n = locations.len();
        let mut matrix = vec![vec![0.0; n]; n];

        for (i, from) in locations.iter().enumerate() {
            for (j, to) in locations.iter().enumerate() {
                if i != j {
                    matrix[i][j] = self.distance_km(*from, *to);
                }
            }
        }

        matrix
    }
}
