use std::collections::{HashMap, HashSet, VecDeque};

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display, EnumIter,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    East,
    SouthEast,
    SouthWest,
    West,
    NorthWest,
    NorthEast,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CubeCoord {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl CubeCoord {
    pub fn new(x: i32, y: i32, z: i32) -> Self {
        debug_assert!(x + y + z == 0, "cube coordinates must sum to zero");
        Self { x, y, z }
    }

    pub fn add(self, other: CubeCoord) -> Self {
        CubeCoord::new(self.x + other.x, self.y + other.y, self.z + other.z)
    }

    pub fn neighbor(self, direction: Direction) -> Self {
        self.add(UNIT_VECTORS[&direction])
    }

    pub fn neighbors(self) -> impl Iterator<Item = CubeCoord> {
        UNIT_VECTORS.iter().map(move |(_, vec)| self.add(*vec))
    }

    /// Hex distance from the origin, i.e. the ring this coordinate sits on.
    pub fn ring(self) -> i32 {
        self.x.abs().max(self.y.abs()).max(self.z.abs())
    }
}

impl Default for CubeCoord {
    fn default() -> Self {
        CubeCoord::new(0, 0, 0)
    }
}

pub static UNIT_VECTORS: Lazy<HashMap<Direction, CubeCoord>> = Lazy::new(|| {
    use Direction::*;
    HashMap::from([
        (NorthEast, CubeCoord::new(1, 0, -1)),
        (SouthWest, CubeCoord::new(-1, 0, 1)),
        (NorthWest, CubeCoord::new(0, 1, -1)),
        (SouthEast, CubeCoord::new(0, -1, 1)),
        (East, CubeCoord::new(1, -1, 0)),
        (West, CubeCoord::new(-1, 1, 0)),
    ])
});

fn num_tiles_for(layer: i32) -> i32 {
    if layer == 0 {
        return 1;
    }
    6 * layer + num_tiles_for(layer - 1)
}

/// Breadth-first walk outward from the origin, so every coordinate appears
/// after at least one already-listed neighbor (except the origin itself).
pub fn generate_coordinate_system(num_layers: i32) -> Vec<CubeCoord> {
    let target = num_tiles_for(num_layers) as usize;
    let mut visited = HashSet::new();
    let mut ordered = Vec::with_capacity(target);
    let mut queue = VecDeque::from([CubeCoord::default()]);

    while ordered.len() < target {
        let Some(node) = queue.pop_front() else {
            break;
        };
        if node.ring() > num_layers || !visited.insert(node) {
            continue;
        }
        ordered.push(node);
        for direction in DIRECTION_ORDER {
            let neighbor = node.neighbor(direction);
            if !visited.contains(&neighbor) {
                queue.push_back(neighbor);
            }
        }
    }
    ordered
}

/// Fixed iteration order; `UNIT_VECTORS` is a hash map and would make layouts
/// depend on hasher state.
pub const DIRECTION_ORDER: [Direction; 6] = [
    Direction::East,
    Direction::SouthEast,
    Direction::SouthWest,
    Direction::West,
    Direction::NorthWest,
    Direction::NorthEast,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coordinate_system_sizes() {
        assert_eq!(generate_coordinate_system(0).len(), 1);
        assert_eq!(generate_coordinate_system(1).len(), 7);
        assert_eq!(generate_coordinate_system(2).len(), 19);
    }

    #[test]
    fn test_coordinate_system_is_deterministic() {
        assert_eq!(generate_coordinate_system(2), generate_coordinate_system(2));
        assert_eq!(generate_coordinate_system(2)[0], CubeCoord::default());
    }
}
