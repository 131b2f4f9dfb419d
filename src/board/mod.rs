use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use itertools::Itertools;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;

use crate::coords::{CubeCoord, DIRECTION_ORDER, Direction, generate_coordinate_system};
use crate::types::{EdgeRef, NodeRef, Resource};

pub mod graph;

pub use graph::{
    BoardEdge, BoardError, BoardGraph, BoardNode, EdgeId, Harbor, MAX_NODE_CONNECTIONS, NodeId,
    PlacementViolation, Structure, TileId,
};

type NodeMap = HashMap<NodeRef, NodeId>;
type EdgeMap = HashMap<EdgeRef, EdgeId>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LandTile {
    pub id: TileId,
    pub coord: CubeCoord,
    pub resource: Option<Resource>,
    pub number: Option<u8>,
    pub nodes: Vec<NodeId>,
}

impl LandTile {
    pub fn is_desert(&self) -> bool {
        self.resource.is_none()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MapType {
    #[default]
    Base,
    Mini,
}

impl fmt::Display for MapType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            MapType::Base => "BASE",
            MapType::Mini => "MINI",
        };
        write!(f, "{label}")
    }
}

impl FromStr for MapType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "base" => Ok(MapType::Base),
            "mini" => Ok(MapType::Mini),
            _ => Err(format!("unknown map type: {s}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MapTemplate {
    pub layers: i32,
    pub numbers: Vec<u8>,
    pub tile_resources: Vec<Option<Resource>>,
    pub harbors: Vec<Harbor>,
}

impl MapTemplate {
    pub fn for_map(map_type: MapType) -> Self {
        match map_type {
            MapType::Base => Self::base(),
            MapType::Mini => Self::mini(),
        }
    }

    pub fn base() -> Self {
        let mut tile_resources = Vec::with_capacity(19);
        for (resource, count) in [
            (Resource::Wood, 4),
            (Resource::Brick, 3),
            (Resource::Sheep, 4),
            (Resource::Wheat, 4),
            (Resource::Ore, 3),
        ] {
            tile_resources.extend(std::iter::repeat(Some(resource)).take(count));
        }
        tile_resources.push(None);

        let mut harbors: Vec<Harbor> = Resource::ALL.into_iter().map(Harbor::Specific).collect();
        harbors.extend(std::iter::repeat(Harbor::Generic).take(4));

        Self {
            layers: 2,
            numbers: vec![2, 3, 3, 4, 4, 5, 5, 6, 6, 8, 8, 9, 9, 10, 10, 11, 11, 12],
            tile_resources,
            harbors,
        }
    }

    pub fn mini() -> Self {
        Self {
            layers: 1,
            numbers: vec![3, 4, 5, 6, 8, 9, 10],
            tile_resources: vec![
                Some(Resource::Wood),
                None,
                Some(Resource::Brick),
                Some(Resource::Sheep),
                Some(Resource::Wheat),
                Some(Resource::Wheat),
                Some(Resource::Ore),
            ],
            harbors: vec![],
        }
    }
}

/// Generated board: the node/edge graph plus the land tiles that annotate it.
#[derive(Debug, Clone)]
pub struct Board {
    pub graph: BoardGraph,
    pub tiles: Vec<LandTile>,
}

impl Board {
    pub fn generate(map_type: MapType, rng: &mut impl rand::Rng) -> Result<Self, BoardError> {
        Self::from_template(&MapTemplate::for_map(map_type), rng)
    }

    pub fn from_template(
        template: &MapTemplate,
        rng: &mut impl rand::Rng,
    ) -> Result<Self, BoardError> {
        let mut numbers = template.numbers.clone();
        numbers.shuffle(rng);
        let mut tile_resources = template.tile_resources.clone();
        tile_resources.shuffle(rng);
        let mut harbors = template.harbors.clone();
        harbors.shuffle(rng);

        let mut graph = BoardGraph::new();
        let mut corners: HashMap<CubeCoord, (NodeMap, EdgeMap)> = HashMap::new();
        let mut tiles = Vec::new();
        let mut edge_tile_counts: HashMap<EdgeId, u8> = HashMap::new();

        for coord in generate_coordinate_system(template.layers) {
            let (nodes, edges) = get_nodes_and_edges(&mut graph, &corners, coord)?;
            let id = tiles.len() as TileId;
            for node in nodes.values() {
                graph.attach_tile(*node, id)?;
            }
            for edge in edges.values() {
                *edge_tile_counts.entry(*edge).or_default() += 1;
            }

            let resource = tile_resources.pop().flatten();
            let number = resource.and_then(|_| numbers.pop());
            tiles.push(LandTile {
                id,
                coord,
                resource,
                number,
                nodes: NodeRef::iter().map(|r| nodes[&r]).collect(),
            });
            corners.insert(coord, (nodes, edges));
        }

        let coastal: Vec<EdgeId> = edge_tile_counts
            .into_iter()
            .filter(|(_, count)| *count == 1)
            .map(|(edge, _)| edge)
            .sorted()
            .collect();
        let coastline = walk_coastline(&graph, &coastal)?;
        if !harbors.is_empty() && !coastline.is_empty() {
            let stride = (coastline.len() / harbors.len()).max(2);
            for (harbor, edge) in harbors.iter().zip(coastline.iter().step_by(stride)) {
                let (a, b) = graph.edge(*edge)?.nodes;
                graph.set_harbor(a, *harbor)?;
                graph.set_harbor(b, *harbor)?;
            }
        }

        Ok(Self { graph, tiles })
    }

    pub fn tile(&self, id: TileId) -> Option<&LandTile> {
        self.tiles.get(id as usize)
    }

    pub fn desert(&self) -> Option<TileId> {
        self.tiles.iter().find(|tile| tile.is_desert()).map(|tile| tile.id)
    }

    /// Nodes that border at least one land tile; the only legal building sites.
    pub fn land_nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.graph
            .nodes()
            .filter(|node| !node.tiles.is_empty())
            .map(|node| node.id)
    }
}

/// Orders the coastal edges as one walk around the island, so that edges
/// picked at a fixed stride never share a node.
fn walk_coastline(graph: &BoardGraph, coastal: &[EdgeId]) -> Result<Vec<EdgeId>, BoardError> {
    let Some(&start) = coastal.first() else {
        return Ok(Vec::new());
    };
    let mut ordered = vec![start];
    let mut previous = start;
    let mut node = graph.edge(start)?.nodes.1;
    while ordered.len() < coastal.len() {
        let next = graph
            .node(node)?
            .edges()
            .iter()
            .copied()
            .find(|edge| *edge != previous && coastal.binary_search(edge).is_ok());
        match next {
            Some(edge) if edge != start => {
                ordered.push(edge);
                node = graph.edge(edge)?.other_end(node);
                previous = edge;
            }
            _ => break,
        }
    }
    Ok(ordered)
}

/// Collects the corner nodes and side edges of the tile at `coordinate`, reusing
/// those already created by neighboring tiles and creating the rest.
fn get_nodes_and_edges(
    graph: &mut BoardGraph,
    corners: &HashMap<CubeCoord, (NodeMap, EdgeMap)>,
    coordinate: CubeCoord,
) -> Result<(NodeMap, EdgeMap), BoardError> {
    let mut nodes: HashMap<NodeRef, Option<NodeId>> = NodeRef::iter().map(|n| (n, None)).collect();
    let mut edges: HashMap<EdgeRef, Option<EdgeId>> = EdgeRef::iter().map(|e| (e, None)).collect();

    for direction in DIRECTION_ORDER {
        let Some((n_nodes, n_edges)) = corners.get(&coordinate.neighbor(direction)) else {
            continue;
        };
        let (shared_nodes, shared_edge) = shared_with(direction);
        for (ours, theirs) in shared_nodes {
            nodes.insert(ours, n_nodes.get(&theirs).copied());
        }
        edges.insert(shared_edge.0, n_edges.get(&shared_edge.1).copied());
    }

    for node_ref in NodeRef::iter() {
        if let Some(entry) = nodes.get_mut(&node_ref) {
            if entry.is_none() {
                *entry = Some(graph.add_node());
            }
        }
    }
    let finalized_nodes: NodeMap = nodes
        .into_iter()
        .filter_map(|(k, v)| v.map(|id| (k, id)))
        .collect();

    let mut finalized_edges = EdgeMap::new();
    for edge_ref in EdgeRef::iter() {
        let id = match edges.get(&edge_ref).copied().flatten() {
            Some(id) => id,
            None => {
                let (a_ref, b_ref) = get_edge_nodes(edge_ref);
                graph.add_connection(finalized_nodes[&a_ref], finalized_nodes[&b_ref])?
            }
        };
        finalized_edges.insert(edge_ref, id);
    }

    Ok((finalized_nodes, finalized_edges))
}

/// For a neighbor in `direction`: which of our corners equal which of theirs,
/// and which of our sides is their opposite side.
fn shared_with(direction: Direction) -> ([(NodeRef, NodeRef); 2], (EdgeRef, EdgeRef)) {
    use NodeRef as N;
    match direction {
        Direction::East => (
            [(N::NorthEast, N::NorthWest), (N::SouthEast, N::SouthWest)],
            (EdgeRef::East, EdgeRef::West),
        ),
        Direction::SouthEast => (
            [(N::South, N::NorthWest), (N::SouthEast, N::North)],
            (EdgeRef::SouthEast, EdgeRef::NorthWest),
        ),
        Direction::SouthWest => (
            [(N::South, N::NorthEast), (N::SouthWest, N::North)],
            (EdgeRef::SouthWest, EdgeRef::NorthEast),
        ),
        Direction::West => (
            [(N::NorthWest, N::NorthEast), (N::SouthWest, N::SouthEast)],
            (EdgeRef::West, EdgeRef::East),
        ),
        Direction::NorthWest => (
            [(N::North, N::SouthEast), (N::NorthWest, N::South)],
            (EdgeRef::NorthWest, EdgeRef::SouthEast),
        ),
        Direction::NorthEast => (
            [(N::North, N::SouthWest), (N::NorthEast, N::South)],
            (EdgeRef::NorthEast, EdgeRef::SouthWest),
        ),
    }
}

fn get_edge_nodes(edge_ref: EdgeRef) -> (NodeRef, NodeRef) {
    match edge_ref {
        EdgeRef::East => (NodeRef::NorthEast, NodeRef::SouthEast),
        EdgeRef::SouthEast => (NodeRef::SouthEast, NodeRef::South),
        EdgeRef::SouthWest => (NodeRef::South, NodeRef::SouthWest),
        EdgeRef::West => (NodeRef::SouthWest, NodeRef::NorthWest),
        EdgeRef::NorthWest => (NodeRef::NorthWest, NodeRef::North),
        EdgeRef::NorthEast => (NodeRef::North, NodeRef::NorthEast),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{SeedableRng, rngs::StdRng};

    fn base_board(seed: u64) -> Board {
        Board::generate(MapType::Base, &mut StdRng::seed_from_u64(seed)).unwrap()
    }

    #[test]
    fn test_base_board_topology() {
        let board = base_board(7);
        assert_eq!(board.tiles.len(), 19);
        assert_eq!(board.graph.node_count(), 54);
        assert_eq!(board.graph.edge_count(), 72);
        for node in board.graph.nodes() {
            assert!((2..=MAX_NODE_CONNECTIONS).contains(&node.degree()));
            assert!((1..=3).contains(&node.tiles.len()));
        }
    }

    #[test]
    fn test_map_type_names() {
        assert_eq!(MapType::default(), MapType::Base);
        assert_eq!("mini".parse::<MapType>(), Ok(MapType::Mini));
        assert_eq!(MapType::Base.to_string(), "BASE");
        assert!("huge".parse::<MapType>().is_err());
    }

    #[test]
    fn test_mini_board_topology() {
        let board = Board::generate(MapType::Mini, &mut StdRng::seed_from_u64(1)).unwrap();
        assert_eq!(board.tiles.len(), 7);
        assert_eq!(board.graph.node_count(), 24);
        assert_eq!(board.graph.edge_count(), 30);
        assert!(board.graph.nodes().all(|n| n.harbor.is_none()));
    }

    #[test]
    fn test_single_desert_without_number() {
        let board = base_board(3);
        let deserts: Vec<_> = board.tiles.iter().filter(|t| t.is_desert()).collect();
        assert_eq!(deserts.len(), 1);
        assert_eq!(deserts[0].number, None);
        assert!(
            board
                .tiles
                .iter()
                .filter(|t| !t.is_desert())
                .all(|t| t.number.is_some_and(|n| n != 7))
        );
    }

    #[test]
    fn test_harbors_sit_on_coast() {
        let board = base_board(11);
        let harbor_nodes = board.graph.nodes().filter(|n| n.harbor.is_some()).count();
        assert_eq!(harbor_nodes, 18);
        for node in board.graph.nodes().filter(|n| n.harbor.is_some()) {
            assert!(node.tiles.len() < 3);
        }
    }

    #[test]
    fn test_same_seed_same_layout() {
        let a = base_board(99);
        let b = base_board(99);
        let layout = |board: &Board| {
            board
                .tiles
                .iter()
                .map(|t| (t.resource, t.number, t.nodes.clone()))
                .collect::<Vec<_>>()
        };
        assert_eq!(layout(&a), layout(&b));
    }

    #[test]
    fn test_tiles_share_corners() {
        let board = base_board(5);
        let center = &board.tiles[0];
        for tile in &board.tiles[1..7] {
            let shared = tile.nodes.iter().filter(|n| center.nodes.contains(n)).count();
            assert_eq!(shared, 2);
        }
    }
}
