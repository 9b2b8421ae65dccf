use geo::Point;
use rstar::{RTree, RTreeObject, AABB};

/// Mean Earth radius used for every distance in this crate.
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// Great-circle distance between two lon/lat points (haversine).
pub fn distance_meters(a: Point<f64>, b: Point<f64>) -> f64 {
    let d_lat = (b.y() - a.y()).to_radians();
    let d_lon = (b.x() - a.x()).to_radians();
    let lat1 = a.y().to_radians();
    let lat2 = b.y().to_radians();

    let sin_lat = (d_lat / 2.0).sin();
    let sin_lon = (d_lon / 2.0).sin();
    let h = sin_lat * sin_lat + lat1.cos() * lat2.cos() * sin_lon * sin_lon;

    // Rounding can push h a hair above 1 for near-antipodal points.
    2.0 * EARTH_RADIUS_METERS * h.sqrt().min(1.0).asin()
}

/// True iff `point` lies within `radius_meters` of at least one center.
pub fn is_within_any(point: Point<f64>, centers: &[Point<f64>], radius_meters: f64) -> bool {
    centers
        .iter()
        .any(|center| distance_meters(point, *center) <= radius_meters)
}

pub struct CenterPoint(Point<f64>);

impl RTreeObject for CenterPoint {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point([self.0.x(), self.0.y()])
    }
}

/// R-tree over exclusion centers. Candidates come from a degree envelope
/// padded around the radius; the haversine check has the final word.
pub struct ProximityIndex {
    tree: RTree<CenterPoint>,
}

impl ProximityIndex {
    pub fn new(centers: &[Point<f64>]) -> Self {
        let tree = RTree::bulk_load(centers.iter().copied().map(CenterPoint).collect());
        Self { tree }
    }

    pub fn len(&self) -> usize {
        self.tree.size()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }

    pub fn is_near(&self, point: Point<f64>, radius_meters: f64) -> bool {
        if self.is_empty() {
            return false;
        }
        let candidates: Vec<Point<f64>> = search_envelopes(point, radius_meters)
            .iter()
            .flat_map(|envelope| self.tree.locate_in_envelope_intersecting(envelope))
            .map(|center| center.0)
            .collect();
        is_within_any(point, &candidates, radius_meters)
    }
}

/// Degree boxes covering every point within `radius_meters`. Boxes that
/// cross the antimeridian are split in two; near a pole the box spans all
/// longitudes.
fn search_envelopes(point: Point<f64>, radius_meters: f64) -> Vec<AABB<[f64; 2]>> {
    let lat_delta = (radius_meters / EARTH_RADIUS_METERS).to_degrees() * 1.01;
    let south = point.y() - lat_delta;
    let north = point.y() + lat_delta;
    let lon_delta = lat_delta / point.y().to_radians().cos().abs().max(1e-6);

    if south <= -90.0 || north >= 90.0 || lon_delta >= 180.0 {
        return vec![AABB::from_corners([-180.0, south.max(-90.0)], [180.0, north.min(90.0)])];
    }

    let west = point.x() - lon_delta;
    let east = point.x() + lon_delta;
    let mut envelopes = vec![AABB::from_corners([west.max(-180.0), south], [east.min(180.0), north])];
    if west < -180.0 {
        envelopes.push(AABB::from_corners([west + 360.0, south], [180.0, north]));
    }
    if east > 180.0 {
        envelopes.push(AABB::from_corners([-180.0, south], [east - 360.0, north]));
    }
    envelopes
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn pt(lon: f64, lat: f64) -> Point<f64> {
        Point::new(lon, lat)
    }

    #[rstest]
    #[case(pt(-118.25, 34.045), pt(-118.25, 34.0457))]
    #[case(pt(-118.41, 34.0), pt(2.35, 48.85))]
    #[case(pt(0.0, 0.0), pt(179.9, 0.1))]
    #[case(pt(-73.98, 40.75), pt(-73.98, 40.75))]
    fn distance_is_symmetric(#[case] a: Point<f64>, #[case] b: Point<f64>) {
        assert_eq!(distance_meters(a, b), distance_meters(b, a));
    }

    #[test]
    fn identical_points_are_zero_apart() {
        let a = pt(-118.2437, 34.0522);
        assert_eq!(distance_meters(a, a), 0.0);
    }

    #[test]
    fn antipodal_points_stay_finite() {
        let d = distance_meters(pt(0.0, 0.0), pt(180.0, 0.0));
        assert!(d.is_finite());
        assert!((d - std::f64::consts::PI * EARTH_RADIUS_METERS).abs() < 1.0);
    }

    #[test]
    fn short_northward_offsets_match_expected_meters() {
        let manual = pt(-118.25, 34.045);
        let near = distance_meters(manual, pt(-118.25, 34.0457));
        let far = distance_meters(manual, pt(-118.25, 34.046));
        assert!((near - 77.8).abs() < 0.5, "got {near}");
        assert!((far - 111.2).abs() < 0.5, "got {far}");
    }

    #[test]
    fn within_any_uses_inclusive_radius() {
        let centers = [pt(-118.25, 34.045)];
        assert!(is_within_any(pt(-118.25, 34.0457), &centers, 80.0));
        assert!(!is_within_any(pt(-118.25, 34.046), &centers, 80.0));
        assert!(!is_within_any(pt(-118.25, 34.0457), &[], 80.0));
    }

    #[test]
    fn index_agrees_with_linear_scan() {
        let centers = vec![
            pt(-118.25, 34.045),
            pt(-118.2437, 34.0522),
            pt(-118.3, 34.1),
            pt(179.9999, 0.0),
            pt(-179.9995, -12.0),
            pt(45.0, 89.9997),
        ];
        let index = ProximityIndex::new(&centers);
        assert_eq!(index.len(), 6);

        let queries = [
            pt(-118.25, 34.0457),
            pt(-118.25, 34.046),
            pt(-118.2445, 34.0522),
            pt(-118.5, 34.2),
            pt(-118.3009, 34.1),
            pt(-179.9999, 0.0),
            pt(179.9998, -12.0),
            pt(-135.0, 89.9997),
            pt(179.0, 0.0),
        ];
        for query in queries {
            assert_eq!(index.is_near(query, 80.0), is_within_any(query, &centers, 80.0), "{query:?}");
        }
    }

    #[test]
    fn centers_across_the_antimeridian_are_found() {
        let index = ProximityIndex::new(&[pt(179.9999, 0.0)]);
        let across = pt(-179.9999, 0.0);
        assert!(distance_meters(across, pt(179.9999, 0.0)) < 80.0);
        assert!(index.is_near(across, 80.0));
    }

    #[test]
    fn empty_index_excludes_nothing() {
        assert!(!ProximityIndex::new(&[]).is_near(pt(0.0, 0.0), 1_000.0));
    }
}
