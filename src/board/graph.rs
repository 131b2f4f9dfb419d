use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::types::{Resource, StructureKind};

pub type NodeId = u16;
pub type EdgeId = u16;
pub type TileId = u16;

/// Hex intersections never join more than three paths.
pub const MAX_NODE_CONNECTIONS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Structure {
    Settlement { owner: usize },
    City { owner: usize },
}

impl Structure {
    pub fn owner(&self) -> usize {
        match self {
            Structure::Settlement { owner } | Structure::City { owner } => *owner,
        }
    }

    pub fn kind(&self) -> StructureKind {
        match self {
            Structure::Settlement { .. } => StructureKind::Settlement,
            Structure::City { .. } => StructureKind::City,
        }
    }

    pub fn production_multiplier(&self) -> u8 {
        match self {
            Structure::Settlement { .. } => 1,
            Structure::City { .. } => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Harbor {
    /// 3:1 on any resource.
    Generic,
    /// 2:1 on one resource.
    Specific(Resource),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoardNode {
    pub id: NodeId,
    edges: SmallVec<[EdgeId; MAX_NODE_CONNECTIONS]>,
    pub tiles: SmallVec<[TileId; 3]>,
    pub harbor: Option<Harbor>,
    pub structure: Option<Structure>,
}

impl BoardNode {
    fn new(id: NodeId) -> Self {
        Self {
            id,
            edges: SmallVec::new(),
            tiles: SmallVec::new(),
            harbor: None,
            structure: None,
        }
    }

    pub fn edges(&self) -> &[EdgeId] {
        &self.edges
    }

    pub fn degree(&self) -> usize {
        self.edges.len()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoardEdge {
    pub id: EdgeId,
    pub nodes: (NodeId, NodeId),
    pub road: Option<usize>,
}

impl BoardEdge {
    pub fn other_end(&self, node: NodeId) -> NodeId {
        if self.nodes.0 == node {
            self.nodes.1
        } else {
            self.nodes.0
        }
    }

    pub fn touches(&self, node: NodeId) -> bool {
        self.nodes.0 == node || self.nodes.1 == node
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlacementViolation {
    #[error("node {0} is already occupied")]
    NodeOccupied(NodeId),
    #[error("edge {0} already holds a road")]
    EdgeOccupied(EdgeId),
    #[error("node {0} is adjacent to another settlement")]
    DistanceRule(NodeId),
    #[error("target does not border the player's network")]
    NotConnected,
    #[error("node {0} does not hold the player's settlement")]
    NotOwnSettlement(NodeId),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BoardError {
    #[error("node {node} already has {MAX_NODE_CONNECTIONS} connections")]
    Capacity { node: NodeId },
    #[error("nodes {0} and {1} are already connected")]
    DuplicateConnection(NodeId, NodeId),
    #[error("node {0} cannot connect to itself")]
    SelfConnection(NodeId),
    #[error("unknown node {0}")]
    UnknownNode(NodeId),
    #[error("unknown edge {0}")]
    UnknownEdge(EdgeId),
    #[error("illegal placement: {0}")]
    IllegalPlacement(#[from] PlacementViolation),
}

/// Intersections and paths of the board. Connections can be added while the
/// board is generated but never removed; afterwards only the structure and
/// road annotations change.
#[derive(Debug, Clone, Default)]
pub struct BoardGraph {
    nodes: Vec<BoardNode>,
    edges: Vec<BoardEdge>,
    edge_lookup: HashMap<(NodeId, NodeId), EdgeId>,
}

impl BoardGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self) -> NodeId {
        let id = self.nodes.len() as NodeId;
        self.nodes.push(BoardNode::new(id));
        id
    }

    pub fn add_connection(&mut self, a: NodeId, b: NodeId) -> Result<EdgeId, BoardError> {
        if a == b {
            return Err(BoardError::SelfConnection(a));
        }
        for node in [a, b] {
            if self.node(node)?.degree() >= MAX_NODE_CONNECTIONS {
                return Err(BoardError::Capacity { node });
            }
        }
        let key = normalize(a, b);
        if self.edge_lookup.contains_key(&key) {
            return Err(BoardError::DuplicateConnection(key.0, key.1));
        }

        let id = self.edges.len() as EdgeId;
        self.edges.push(BoardEdge {
            id,
            nodes: key,
            road: None,
        });
        self.edge_lookup.insert(key, id);
        self.nodes[a as usize].edges.push(id);
        self.nodes[b as usize].edges.push(id);
        Ok(id)
    }

    pub(crate) fn attach_tile(&mut self, node: NodeId, tile: TileId) -> Result<(), BoardError> {
        let entry = self.node_mut(node)?;
        if !entry.tiles.contains(&tile) {
            entry.tiles.push(tile);
        }
        Ok(())
    }

    pub(crate) fn set_harbor(&mut self, node: NodeId, harbor: Harbor) -> Result<(), BoardError> {
        self.node_mut(node)?.harbor = Some(harbor);
        Ok(())
    }

    pub fn node(&self, id: NodeId) -> Result<&BoardNode, BoardError> {
        self.nodes
            .get(id as usize)
            .ok_or(BoardError::UnknownNode(id))
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut BoardNode, BoardError> {
        self.nodes
            .get_mut(id as usize)
            .ok_or(BoardError::UnknownNode(id))
    }

    pub fn edge(&self, id: EdgeId) -> Result<&BoardEdge, BoardError> {
        self.edges
            .get(id as usize)
            .ok_or(BoardError::UnknownEdge(id))
    }

    pub fn nodes(&self) -> impl Iterator<Item = &BoardNode> + '_ {
        self.nodes.iter()
    }

    pub fn edges(&self) -> impl Iterator<Item = &BoardEdge> + '_ {
        self.edges.iter()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn edge_between(&self, a: NodeId, b: NodeId) -> Option<EdgeId> {
        self.edge_lookup.get(&normalize(a, b)).copied()
    }

    /// Edges touching `node`; empty for an unknown node.
    pub fn incident_edges(&self, node: NodeId) -> &[EdgeId] {
        self.nodes
            .get(node as usize)
            .map(|n| n.edges.as_slice())
            .unwrap_or(&[])
    }

    pub fn neighbors(&self, node: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.incident_edges(node)
            .iter()
            .map(move |edge| self.edges[*edge as usize].other_end(node))
    }

    pub fn is_occupied(&self, node: NodeId) -> bool {
        self.structure_at(node).is_some()
    }

    pub fn structure_at(&self, node: NodeId) -> Option<Structure> {
        self.nodes.get(node as usize).and_then(|n| n.structure)
    }

    pub fn road_owner(&self, edge: EdgeId) -> Option<usize> {
        self.edges.get(edge as usize).and_then(|e| e.road)
    }

    pub fn check_settlement(
        &self,
        node: NodeId,
        seat: usize,
        require_network: bool,
    ) -> Result<(), BoardError> {
        let target = self.node(node)?;
        if target.structure.is_some() {
            return Err(PlacementViolation::NodeOccupied(node).into());
        }
        if self.neighbors(node).any(|n| self.is_occupied(n)) {
            return Err(PlacementViolation::DistanceRule(node).into());
        }
        if require_network && !self.node_touches_own_road(node, seat) {
            return Err(PlacementViolation::NotConnected.into());
        }
        Ok(())
    }

    pub fn place_settlement(
        &mut self,
        node: NodeId,
        seat: usize,
        require_network: bool,
    ) -> Result<(), BoardError> {
        self.check_settlement(node, seat, require_network)?;
        self.nodes[node as usize].structure = Some(Structure::Settlement { owner: seat });
        Ok(())
    }

    pub fn check_city(&self, node: NodeId, seat: usize) -> Result<(), BoardError> {
        match self.node(node)?.structure {
            Some(Structure::Settlement { owner }) if owner == seat => Ok(()),
            _ => Err(PlacementViolation::NotOwnSettlement(node).into()),
        }
    }

    pub fn upgrade_to_city(&mut self, node: NodeId, seat: usize) -> Result<(), BoardError> {
        self.check_city(node, seat)?;
        self.nodes[node as usize].structure = Some(Structure::City { owner: seat });
        Ok(())
    }

    pub fn check_road(
        &self,
        edge: EdgeId,
        seat: usize,
        require_network: bool,
    ) -> Result<(), BoardError> {
        let target = self.edge(edge)?;
        if target.road.is_some() {
            return Err(PlacementViolation::EdgeOccupied(edge).into());
        }
        if require_network {
            let (a, b) = target.nodes;
            if !self.road_extends_network(edge, a, seat)
                && !self.road_extends_network(edge, b, seat)
            {
                return Err(PlacementViolation::NotConnected.into());
            }
        }
        Ok(())
    }

    pub fn place_road(
        &mut self,
        edge: EdgeId,
        seat: usize,
        require_network: bool,
    ) -> Result<(), BoardError> {
        self.check_road(edge, seat, require_network)?;
        self.edges[edge as usize].road = Some(seat);
        Ok(())
    }

    fn node_touches_own_road(&self, node: NodeId, seat: usize) -> bool {
        self.nodes[node as usize]
            .edges
            .iter()
            .any(|edge| self.edges[*edge as usize].road == Some(seat))
    }

    /// A road attaches at `node` if the player builds there, or if one of their
    /// roads ends there and no opponent structure sits in between.
    fn road_extends_network(&self, edge: EdgeId, node: NodeId, seat: usize) -> bool {
        let entry = &self.nodes[node as usize];
        match entry.structure {
            Some(structure) if structure.owner() == seat => true,
            Some(_) => false,
            None => entry
                .edges
                .iter()
                .any(|other| *other != edge && self.edges[*other as usize].road == Some(seat)),
        }
    }

    pub fn structures_of(&self, seat: usize) -> impl Iterator<Item = (NodeId, Structure)> + '_ {
        self.nodes.iter().filter_map(move |node| match node.structure {
            Some(structure) if structure.owner() == seat => Some((node.id, structure)),
            _ => None,
        })
    }

    pub fn roads_of(&self, seat: usize) -> impl Iterator<Item = EdgeId> + '_ {
        self.edges
            .iter()
            .filter(move |edge| edge.road == Some(seat))
            .map(|edge| edge.id)
    }

    pub fn longest_road(&self, seat: usize) -> usize {
        let mut best = 0;
        let mut visited = HashSet::new();
        for edge in self.roads_of(seat) {
            let (a, b) = self.edges[edge as usize].nodes;
            best = best.max(self.trail_from(seat, a, &mut visited));
            best = best.max(self.trail_from(seat, b, &mut visited));
        }
        best
    }

    fn trail_from(&self, seat: usize, node: NodeId, visited: &mut HashSet<EdgeId>) -> usize {
        let blocked = matches!(self.nodes[node as usize].structure, Some(s) if s.owner() != seat);
        if blocked && !visited.is_empty() {
            return 0;
        }
        let mut best = 0;
        for &edge in &self.nodes[node as usize].edges {
            if self.edges[edge as usize].road != Some(seat) || visited.contains(&edge) {
                continue;
            }
            visited.insert(edge);
            let next = self.edges[edge as usize].other_end(node);
            best = best.max(1 + self.trail_from(seat, next, visited));
            visited.remove(&edge);
        }
        best
    }
}

fn normalize(a: NodeId, b: NodeId) -> (NodeId, NodeId) {
    if a <= b { (a, b) } else { (b, a) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    /// 0 - 1 - 2 - 3 - 4 - 5 in a line.
    fn path_graph(len: u16) -> BoardGraph {
        let mut graph = BoardGraph::new();
        for _ in 0..len {
            graph.add_node();
        }
        for n in 1..len {
            graph.add_connection(n - 1, n).unwrap();
        }
        graph
    }

    #[test]
    fn test_capacity_error_leaves_graph_unchanged() {
        let mut graph = BoardGraph::new();
        let hub = graph.add_node();
        let spokes: Vec<NodeId> = (0..4).map(|_| graph.add_node()).collect();
        for spoke in &spokes[..3] {
            graph.add_connection(hub, *spoke).unwrap();
        }

        let err = graph.add_connection(hub, spokes[3]).unwrap_err();
        assert_eq!(err, BoardError::Capacity { node: hub });
        assert_eq!(graph.edge_count(), 3);
        assert_eq!(graph.node(hub).unwrap().degree(), 3);
        assert_eq!(graph.node(spokes[3]).unwrap().degree(), 0);
    }

    #[test]
    fn test_duplicate_and_self_connections_rejected() {
        let mut graph = path_graph(2);
        assert_eq!(
            graph.add_connection(1, 0),
            Err(BoardError::DuplicateConnection(0, 1))
        );
        assert_eq!(graph.add_connection(1, 1), Err(BoardError::SelfConnection(1)));
        assert_eq!(graph.add_connection(0, 9), Err(BoardError::UnknownNode(9)));
    }

    #[test]
    fn test_neighbors_and_edge_lookup() {
        let graph = path_graph(3);
        let mut neighbors: Vec<_> = graph.neighbors(1).collect();
        neighbors.sort();
        assert_eq!(neighbors, vec![0, 2]);
        assert_eq!(graph.edge_between(2, 1), Some(1));
        assert_eq!(graph.edge_between(0, 2), None);
    }

    #[test]
    fn test_distance_rule() {
        let mut graph = path_graph(4);
        graph.place_settlement(1, 0, false).unwrap();
        assert_eq!(
            graph.place_settlement(2, 1, false),
            Err(BoardError::IllegalPlacement(PlacementViolation::DistanceRule(2)))
        );
        assert_eq!(
            graph.place_settlement(1, 1, false),
            Err(BoardError::IllegalPlacement(PlacementViolation::NodeOccupied(1)))
        );
        assert!(graph.place_settlement(3, 1, false).is_ok());
    }

    #[test]
    fn test_network_rules() {
        let mut graph = path_graph(5);
        graph.place_settlement(0, 0, false).unwrap();
        // edge 1 (1-2) does not touch the settlement
        assert_eq!(
            graph.place_road(1, 0, true),
            Err(BoardError::IllegalPlacement(PlacementViolation::NotConnected))
        );
        graph.place_road(0, 0, true).unwrap();
        graph.place_road(1, 0, true).unwrap();
        assert!(graph.check_settlement(2, 0, true).is_ok());
        assert_eq!(
            graph.check_settlement(2, 1, true),
            Err(BoardError::IllegalPlacement(PlacementViolation::NotConnected))
        );
    }

    #[test]
    fn test_opponent_settlement_blocks_road_extension() {
        let mut graph = path_graph(4);
        graph.place_settlement(0, 0, false).unwrap();
        graph.place_road(0, 0, true).unwrap();
        graph.place_road(1, 0, true).unwrap();
        graph.place_settlement(2, 1, false).unwrap();
        assert_eq!(
            graph.place_road(2, 0, true),
            Err(BoardError::IllegalPlacement(PlacementViolation::NotConnected))
        );
    }

    #[test]
    fn test_city_requires_own_settlement() {
        let mut graph = path_graph(3);
        graph.place_settlement(0, 0, false).unwrap();
        assert!(graph.upgrade_to_city(0, 1).is_err());
        graph.upgrade_to_city(0, 0).unwrap();
        assert_eq!(graph.structure_at(0), Some(Structure::City { owner: 0 }));
        assert!(graph.upgrade_to_city(0, 0).is_err());
    }

    #[test]
    fn test_longest_road_stops_at_opponent() {
        let mut graph = path_graph(7);
        graph.place_settlement(0, 0, false).unwrap();
        for edge in 0..6 {
            graph.place_road(edge, 0, true).unwrap();
        }
        assert_eq!(graph.longest_road(0), 6);

        let mut split = path_graph(7);
        for edge in 0..6 {
            split.place_road(edge, 0, false).unwrap();
        }
        split.place_settlement(3, 1, false).unwrap();
        assert_eq!(split.longest_road(0), 3);
    }

    proptest! {
        #[test]
        fn prop_degree_never_exceeds_maximum(
            pairs in proptest::collection::vec((0u16..8, 0u16..8), 0..64)
        ) {
            let mut graph = BoardGraph::new();
            for _ in 0..8 {
                graph.add_node();
            }
            for (a, b) in pairs {
                let before = graph.edge_count();
                match graph.add_connection(a, b) {
                    Ok(_) => prop_assert_eq!(graph.edge_count(), before + 1),
                    Err(_) => prop_assert_eq!(graph.edge_count(), before),
                }
                for node in graph.nodes() {
                    prop_assert!(node.degree() <= MAX_NODE_CONNECTIONS);
                }
            }
        }
    }
}
