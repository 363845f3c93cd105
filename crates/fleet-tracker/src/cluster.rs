//! Grid clustering of entity positions
//!
//! Positions are bucketed into square cells whose size in degrees follows
//! the Web Mercator tile width at the current zoom, so a cell always covers
//! roughly the same number of screen pixels. Output is recomputed from
//! scratch every tick and is fully determined by its input.

use fleet_core::{Coordinates, EntityId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Pixel width of one map tile
pub const TILE_SIZE_PX: f64 = 256.0;

/// Highest zoom level the grid is defined for
pub const MAX_ZOOM: u8 = 22;

/// Renderer-facing group of nearby entities
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    pub centroid: Coordinates,
    pub members: BTreeSet<EntityId>,
    /// Distance from the centroid to the farthest member, in meters
    pub radius_m: f64,
}

impl Cluster {
    fn from_members(points: &[(EntityId, Coordinates)]) -> Self {
        let count = points.len() as f64;
        let centroid = Coordinates::new(
            points.iter().map(|(_, c)| c.lon).sum::<f64>() / count,
            points.iter().map(|(_, c)| c.lat).sum::<f64>() / count,
        );

        let radius_m = points
            .iter()
            .map(|(_, c)| centroid.distance_to(c) * 1000.0)
            .fold(0.0, f64::max);

        Self {
            centroid,
            members: points.iter().map(|(id, _)| id.clone()).collect(),
            radius_m,
        }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn is_single(&self) -> bool {
        self.members.len() == 1
    }
}

/// Clustering parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClusterIndex {
    cell_size_px: u32,
    max_cluster_zoom: u8,
}

impl ClusterIndex {
    pub fn new(cell_size_px: u32, max_cluster_zoom: u8) -> Self {
        Self {
            cell_size_px: cell_size_px.max(1),
            max_cluster_zoom,
        }
    }

    /// Cell edge in degrees of longitude at `zoom`
    pub fn cell_size_deg(&self, zoom: u8) -> f64 {
        let tiles = 2.0_f64.powi(zoom.min(MAX_ZOOM) as i32);
        self.cell_size_px as f64 * 360.0 / (TILE_SIZE_PX * tiles)
    }

    /// Partition `points` into clusters.
    ///
    /// Input order does not matter: points are sorted by id, duplicate ids
    /// keep their first position, invalid coordinates are skipped. Clusters
    /// come out ordered by grid cell.
    pub fn compute(&self, points: &[(EntityId, Coordinates)], zoom: u8) -> Vec<Cluster> {
        let mut sorted: Vec<(EntityId, Coordinates)> = points
            .iter()
            .filter(|(_, c)| c.is_valid())
            .cloned()
            .collect();
        sorted.sort_by(|a, b| a.0.cmp(&b.0));
        sorted.dedup_by(|next, prev| next.0 == prev.0);

        if zoom > self.max_cluster_zoom {
            return sorted
                .chunks(1)
                .map(Cluster::from_members)
                .collect();
        }

        let cell = self.cell_size_deg(zoom);
        let mut buckets: BTreeMap<(i64, i64), Vec<(EntityId, Coordinates)>> = BTreeMap::new();
        for (id, coords) in sorted {
            let key = (
                (coords.lon / cell).floor() as i64,
                (coords.lat / cell).floor() as i64,
            );
            buckets.entry(key).or_default().push((id, coords));
        }

        buckets
            .values()
            .map(|members| Cluster::from_members(members))
            .collect()
    }
}

impl Default for ClusterIndex {
    fn default() -> Self {
        Self::new(60, 16)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn point(id: &str, lon: f64, lat: f64) -> (EntityId, Coordinates) {
        (EntityId::new(id), Coordinates::new(lon, lat))
    }

    fn fleet() -> Vec<(EntityId, Coordinates)> {
        vec![
            point("A", 69.1000, 34.5000),
            point("B", 69.1001, 34.5001),
            point("C", 69.1002, 34.4999),
            point("D", 71.0000, 35.0000),
            point("E", -3.7000, 40.4000),
        ]
    }

    #[test]
    fn test_cell_size_halves_per_zoom() {
        let index = ClusterIndex::new(256, 16);
        assert_eq!(index.cell_size_deg(0), 360.0);
        assert_eq!(index.cell_size_deg(1), 180.0);
        assert_eq!(index.cell_size_deg(40), index.cell_size_deg(MAX_ZOOM));
    }

    #[test]
    fn test_nearby_entities_share_cluster() {
        let clusters = ClusterIndex::default().compute(&fleet(), 10);

        let biggest = clusters.iter().max_by_key(|c| c.len()).unwrap();
        assert_eq!(biggest.len(), 3);
        assert!(biggest.members.contains(&EntityId::new("A")));
        assert!(biggest.radius_m > 0.0 && biggest.radius_m < 50.0);

        let total: usize = clusters.iter().map(Cluster::len).sum();
        assert_eq!(total, 5);
    }

    #[test]
    fn test_output_is_byte_identical_regardless_of_input_order() {
        let index = ClusterIndex::default();
        let forward = index.compute(&fleet(), 8);

        let mut shuffled = fleet();
        shuffled.reverse();
        shuffled.swap(0, 2);
        let reordered = index.compute(&shuffled, 8);

        assert_eq!(
            serde_json::to_string(&forward).unwrap(),
            serde_json::to_string(&reordered).unwrap()
        );
    }

    #[test]
    fn test_above_max_zoom_every_entity_is_single() {
        let clusters = ClusterIndex::new(60, 12).compute(&fleet(), 13);
        assert_eq!(clusters.len(), 5);
        assert!(clusters.iter().all(Cluster::is_single));
        assert_eq!(clusters[0].members.first(), Some(&EntityId::new("A")));
        assert_eq!(clusters[0].radius_m, 0.0);
    }

    #[test]
    fn test_low_zoom_merges_more() {
        let index = ClusterIndex::default();
        let world = index.compute(&fleet(), 1);
        let street = index.compute(&fleet(), 14);
        assert!(world.len() < street.len());
    }

    #[test]
    fn test_invalid_and_duplicate_points_ignored() {
        let points = vec![
            point("A", 10.0, 10.0),
            point("A", 50.0, 50.0),
            point("B", f64::NAN, 10.0),
            point("C", 10.0, 95.0),
        ];

        let clusters = ClusterIndex::default().compute(&points, 5);
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].centroid, Coordinates::new(10.0, 10.0));
    }

    #[test]
    fn test_empty_input() {
        assert!(ClusterIndex::default().compute(&[], 10).is_empty());
    }
}
