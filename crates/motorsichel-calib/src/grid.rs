//! Assemble raw ChESS corners into an ordered inner-corner grid.
//!
//! Each corner links to at most one neighbor per image direction. A neighbor
//! must sit at roughly the typical corner spacing, have an orthogonal ChESS
//! orientation, and lie at ~45° to both corners' orientations. A BFS over the
//! resulting graph assigns integer grid coordinates.

use std::collections::{HashMap, VecDeque};

use kiddo::{KdTree, SquaredEuclidean};
use log::debug;
use nalgebra::{Point2, Vector2};
use serde::{Deserialize, Serialize};

use std::f32::consts::{FRAC_PI_2, FRAC_PI_4, PI};

/// A ChESS corner response, detached from the detector crate's types.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ChessCorner {
    pub position: Point2<f32>,
    /// Direction of the bright diagonal, modulo π.
    pub orientation: f32,
    pub strength: f32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridParams {
    pub k_neighbors: usize,
    pub orientation_tolerance_deg: f32,
    /// Accepted neighbor distance, relative to the typical spacing.
    pub spacing_tolerance: f32,
    pub min_spacing_pix: f32,
}

impl Default for GridParams {
    fn default() -> Self {
        Self {
            k_neighbors: 8,
            orientation_tolerance_deg: 22.5,
            spacing_tolerance: 0.5,
            min_spacing_pix: 3.0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum NeighborDirection {
    Right,
    Left,
    Up,
    Down,
}

#[derive(Debug)]
struct NodeNeighbor {
    direction: NeighborDirection,
    index: usize,
    distance: f32,
    score: f32,
}

fn angle_diff_abs(a: f32, b: f32) -> f32 {
    let mut diff = (b - a).rem_euclid(2.0 * PI);
    if diff >= PI {
        diff -= 2.0 * PI;
    }
    diff.abs()
}

/// Angle in `[0, π/2]` between an undirected axis and a directed vector.
fn axis_vec_diff(axis_angle: f32, vec_angle: f32) -> f32 {
    let d = angle_diff_abs(axis_angle, vec_angle);
    d.min(PI - d)
}

fn direction_quadrant(v: &Vector2<f32>) -> NeighborDirection {
    if v.x.abs() > v.y.abs() {
        if v.x >= 0.0 {
            NeighborDirection::Right
        } else {
            NeighborDirection::Left
        }
    } else if v.y >= 0.0 {
        NeighborDirection::Down
    } else {
        NeighborDirection::Up
    }
}

fn is_good_neighbor(
    corner: &ChessCorner,
    neighbor: &ChessCorner,
    neighbor_index: usize,
    spacing: (f32, f32),
    tol: f32,
) -> Option<NodeNeighbor> {
    // Orientations modulo π: adjacent inner corners differ by a quarter turn.
    let rel = angle_diff_abs(corner.orientation, neighbor.orientation);
    let ortho = (FRAC_PI_2 - rel.min(PI - rel)).abs();
    if ortho > tol {
        return None;
    }

    let v = neighbor.position - corner.position;
    let distance = v.norm();
    if distance < spacing.0 || distance > spacing.1 {
        return None;
    }

    let edge_angle = v.y.atan2(v.x);
    let score_corner = (axis_vec_diff(corner.orientation, edge_angle) - FRAC_PI_4).abs();
    let score_neighbor = (axis_vec_diff(neighbor.orientation, edge_angle) - FRAC_PI_4).abs();
    if score_corner > tol || score_neighbor > tol {
        return None;
    }

    Some(NodeNeighbor {
        direction: direction_quadrant(&v),
        index: neighbor_index,
        distance,
        score: score_corner + score_neighbor + ortho,
    })
}

/// Keep the lowest-score candidate per direction.
fn select_neighbors(candidates: Vec<NodeNeighbor>) -> Vec<NodeNeighbor> {
    let mut best: [Option<NodeNeighbor>; 4] = [None, None, None, None];
    for candidate in candidates {
        let slot = &mut best[candidate.direction as usize];
        let replace = match slot {
            None => true,
            Some(current) => {
                candidate.score < current.score
                    || (candidate.score == current.score && candidate.distance < current.distance)
            }
        };
        if replace {
            *slot = Some(candidate);
        }
    }
    best.into_iter().flatten().collect()
}

/// Median nearest-neighbor distance.
fn typical_spacing(tree: &KdTree<f32, 2>, corners: &[ChessCorner]) -> Option<f32> {
    let mut nn: Vec<f32> = corners
        .iter()
        .filter_map(|c| {
            tree.nearest_n::<SquaredEuclidean>(&[c.position.x, c.position.y], 2)
                .into_iter()
                .map(|n| n.distance.sqrt())
                .find(|d| *d > 0.0)
        })
        .collect();
    if nn.is_empty() {
        return None;
    }
    nn.sort_by(f32::total_cmp);
    Some(nn[nn.len() / 2])
}

struct GridGraph {
    neighbors: Vec<Vec<NodeNeighbor>>,
}

impl GridGraph {
    fn build(corners: &[ChessCorner], params: &GridParams) -> Option<Self> {
        let coords: Vec<[f32; 2]> = corners
            .iter()
            .map(|c| [c.position.x, c.position.y])
            .collect();
        let tree: KdTree<f32, 2> = (&coords).into();

        let spacing = typical_spacing(&tree, corners)?;
        let window = (
            (spacing * (1.0 - params.spacing_tolerance)).max(params.min_spacing_pix),
            spacing * (1.0 + params.spacing_tolerance),
        );
        debug!(
            "grid graph: {} corners, typical spacing {spacing:.1}px",
            corners.len()
        );
        let tol = params.orientation_tolerance_deg.to_radians();

        let neighbors = corners
            .iter()
            .enumerate()
            .map(|(i, corner)| {
                let query = [corner.position.x, corner.position.y];
                let candidates = tree
                    .nearest_n::<SquaredEuclidean>(&query, params.k_neighbors)
                    .into_iter()
                    .map(|nn| nn.item as usize)
                    .filter(|&j| j != i)
                    .filter_map(|j| is_good_neighbor(corner, &corners[j], j, window, tol))
                    .collect();
                select_neighbors(candidates)
            })
            .collect();

        Some(Self { neighbors })
    }

    fn connected_components(&self) -> Vec<Vec<usize>> {
        let mut visited = vec![false; self.neighbors.len()];
        let mut components = Vec::new();
        for start in 0..self.neighbors.len() {
            if visited[start] {
                continue;
            }
            let mut component = Vec::new();
            let mut stack = vec![start];
            while let Some(node) = stack.pop() {
                if visited[node] {
                    continue;
                }
                visited[node] = true;
                component.push(node);
                stack.extend(
                    self.neighbors[node]
                        .iter()
                        .map(|n| n.index)
                        .filter(|&j| !visited[j]),
                );
            }
            components.push(component);
        }
        components
    }

    /// BFS grid coordinates, `None` when two corners claim the same cell.
    fn assign_grid_coordinates(&self, start: usize) -> Option<HashMap<(i32, i32), usize>> {
        let mut cells = HashMap::new();
        let mut seen = vec![false; self.neighbors.len()];
        let mut queue = VecDeque::from([(start, 0i32, 0i32)]);
        while let Some((node, i, j)) = queue.pop_front() {
            if seen[node] {
                continue;
            }
            seen[node] = true;
            if cells.insert((i, j), node).is_some() {
                return None;
            }
            for n in &self.neighbors[node] {
                let (di, dj) = match n.direction {
                    NeighborDirection::Right => (1, 0),
                    NeighborDirection::Left => (-1, 0),
                    NeighborDirection::Up => (0, -1),
                    NeighborDirection::Down => (0, 1),
                };
                queue.push_back((n.index, i + di, j + dj));
            }
        }
        Some(cells)
    }
}

/// Order `corners` into a complete `rows x cols` inner-corner grid.
///
/// The fast index follows whichever image axis carries `rows` corners, and
/// the first corner is the top-left one. Returns `None` unless exactly one
/// connected component forms the full grid.
pub fn assemble_grid(
    corners: &[ChessCorner],
    rows: u32,
    cols: u32,
    params: &GridParams,
) -> Option<Vec<Point2<f32>>> {
    let needed = (rows * cols) as usize;
    if corners.len() < needed {
        return None;
    }
    let graph = GridGraph::build(corners, params)?;

    for component in graph.connected_components() {
        if component.len() != needed {
            continue;
        }
        let Some(cells) = graph.assign_grid_coordinates(component[0]) else {
            continue;
        };
        let min_i = cells.keys().map(|k| k.0).min()?;
        let min_j = cells.keys().map(|k| k.1).min()?;
        let width = (cells.keys().map(|k| k.0).max()? - min_i + 1) as u32;
        let height = (cells.keys().map(|k| k.1).max()? - min_j + 1) as u32;

        let at = |i: u32, j: u32| {
            cells
                .get(&(min_i + i as i32, min_j + j as i32))
                .map(|&n| corners[n].position)
        };
        let ordered: Option<Vec<Point2<f32>>> = if (width, height) == (rows, cols) {
            (0..needed as u32).map(|k| at(k % rows, k / rows)).collect()
        } else if (width, height) == (cols, rows) {
            (0..needed as u32).map(|k| at(k / rows, k % rows)).collect()
        } else {
            None
        };
        if let Some(points) = ordered {
            return Some(points);
        }
        debug!("component of {needed} corners spans {width}x{height}, skipping");
    }
    None
}
