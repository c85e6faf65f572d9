//! The Hierarchical Triangular Mesh.
//!
//! The sphere is split into eight spherical triangles (trixels) by the planes
//! of the coordinate axes, and each trixel is recursively split into four by
//! joining the midpoints of its edges. Identifiers follow the usual numbering:
//! the roots S0..S3 are 8..11 and N0..N3 are 12..15, and child `i` of trixel
//! `t` is `4t + i`, so a trixel at depth `d` has an id in `[8·4^d, 16·4^d)`.

use std::collections::BTreeSet;

use super::{ShardId, ShardIndexer};
use crate::{
    error::{Error, Result},
    geometry::{SkyPoint, SphericalCap},
    wcs::D2R,
};

pub const DEFAULT_DEPTH: u32 = 7;

/// Ids must fit in a u64 with room for the root bits.
pub const MAX_DEPTH: u32 = 24;

const EPSILON: f64 = 1e-12;

type Vec3 = [f64; 3];
type Triangle = [Vec3; 3];

const V0: Vec3 = [0., 0., 1.];
const V1: Vec3 = [1., 0., 0.];
const V2: Vec3 = [0., 1., 0.];
const V3: Vec3 = [-1., 0., 0.];
const V4: Vec3 = [0., -1., 0.];
const V5: Vec3 = [0., 0., -1.];

const ROOTS: [(ShardId, Triangle); 8] = [
    (8, [V1, V5, V2]),
    (9, [V2, V5, V3]),
    (10, [V3, V5, V4]),
    (11, [V4, V5, V1]),
    (12, [V1, V0, V4]),
    (13, [V4, V0, V3]),
    (14, [V3, V0, V2]),
    (15, [V2, V0, V1]),
];

fn dot(a: &Vec3, b: &Vec3) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

fn cross(a: &Vec3, b: &Vec3) -> Vec3 {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

fn norm(a: &Vec3) -> f64 {
    dot(a, a).sqrt()
}

fn normalize(a: Vec3) -> Vec3 {
    let n = norm(&a);
    [a[0] / n, a[1] / n, a[2] / n]
}

fn midpoint(a: &Vec3, b: &Vec3) -> Vec3 {
    normalize([a[0] + b[0], a[1] + b[1], a[2] + b[2]])
}

fn children(tri: &Triangle) -> [Triangle; 4] {
    let [v0, v1, v2] = tri;
    let w0 = midpoint(v1, v2);
    let w1 = midpoint(v0, v2);
    let w2 = midpoint(v0, v1);

    [
        [*v0, w2, w1],
        [*v1, w0, w2],
        [*v2, w1, w0],
        [w0, w1, w2],
    ]
}

/// How far inside the triangle `p` is: positive inside, negative outside,
/// roughly zero on an edge. Vertices run counterclockwise seen from outside.
fn containment(tri: &Triangle, p: &Vec3) -> f64 {
    let [a, b, c] = tri;
    dot(&cross(a, b), p)
        .min(dot(&cross(b, c), p))
        .min(dot(&cross(c, a), p))
}

/// Whether the great-circle arc from `a` to `b` comes within the cap.
fn edge_intersects(a: &Vec3, b: &Vec3, center: &Vec3, cos_r: f64) -> bool {
    let n = normalize(cross(a, b));
    let along = dot(center, &n);
    let projected = [
        center[0] - along * n[0],
        center[1] - along * n[1],
        center[2] - along * n[2],
    ];

    if norm(&projected) < EPSILON {
        // The center is a pole of the arc's great circle; every point of the
        // arc is 90° away.
        return cos_r <= EPSILON;
    }

    let p = normalize(projected);

    if dot(&cross(a, &p), &n) < -EPSILON || dot(&cross(&p, b), &n) < -EPSILON {
        // The closest point of the great circle isn't on this arc, so the
        // endpoints are the closest points, and those were already checked.
        return false;
    }

    dot(&p, center) >= cos_r
}

fn intersects(tri: &Triangle, center: &Vec3, cos_r: f64) -> bool {
    if tri.iter().any(|v| dot(v, center) >= cos_r) {
        return true;
    }

    if containment(tri, center) >= -EPSILON {
        return true;
    }

    (0..3).any(|i| edge_intersects(&tri[i], &tri[(i + 1) % 3], center, cos_r))
}

/// The depth of a trixel id, or `None` if the id is not a valid trixel.
pub fn level_of(id: ShardId) -> Option<u32> {
    let bits = u64::BITS - id.leading_zeros();

    if bits < 4 || bits % 2 != 0 {
        return None;
    }

    let level = (bits - 4) / 2;
    (level <= MAX_DEPTH).then_some(level)
}

/// The vertices of a trixel, counterclockwise.
pub fn trixel_vertices(id: ShardId) -> Option<[Vec3; 3]> {
    let level = level_of(id)?;
    let root = id >> (2 * level);
    let (_, mut tri) = ROOTS[(root - 8) as usize];

    for shift in (0..level).rev() {
        let child = ((id >> (2 * shift)) & 3) as usize;
        tri = children(&tri)[child];
    }

    Some(tri)
}

/// The centroid of a trixel, projected back onto the sphere.
pub fn trixel_center(id: ShardId) -> Option<SkyPoint> {
    let [a, b, c] = trixel_vertices(id)?;
    Some(SkyPoint::from_vector([
        a[0] + b[0] + c[0],
        a[1] + b[1] + c[1],
        a[2] + b[2] + c[2],
    ]))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HtmIndexer {
    depth: u32,
}

impl Default for HtmIndexer {
    fn default() -> Self {
        HtmIndexer {
            depth: DEFAULT_DEPTH,
        }
    }
}

impl HtmIndexer {
    pub fn new(depth: u32) -> Result<Self> {
        if depth > MAX_DEPTH {
            return Err(Error::UnknownIndexer(format!("HTM{depth}")));
        }

        Ok(HtmIndexer { depth })
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }
}

impl ShardIndexer for HtmIndexer {
    fn name(&self) -> String {
        format!("HTM{}", self.depth)
    }

    fn dimension(&self) -> String {
        format!("htm{}", self.depth)
    }

    fn shard_for_point(&self, point: &SkyPoint) -> ShardId {
        let p = point.to_vector();

        // Points on a boundary belong to more than one trixel; we take the one
        // we are most inside, which also absorbs rounding.
        let pick = |candidates: &[(ShardId, Triangle)]| {
            let mut best = candidates[0];
            let mut best_margin = f64::NEG_INFINITY;

            for &(id, tri) in candidates {
                let margin = containment(&tri, &p);

                if margin > best_margin {
                    best = (id, tri);
                    best_margin = margin;
                }
            }

            best
        };

        let (mut id, mut tri) = pick(&ROOTS);

        for _ in 0..self.depth {
            let kids = children(&tri);
            let candidates: Vec<(ShardId, Triangle)> = kids
                .iter()
                .enumerate()
                .map(|(i, t)| (4 * id + i as ShardId, *t))
                .collect();
            (id, tri) = pick(&candidates);
        }

        id
    }

    fn shards_for_cap(&self, cap: &SphericalCap) -> BTreeSet<ShardId> {
        let center = cap.center.to_vector();

        // Pad a hair so that a trixel grazing the boundary is kept.
        let cos_r = (cap.radius_deg.clamp(0., 180.) * D2R).cos() - EPSILON;

        let mut found = BTreeSet::new();
        let mut stack: Vec<(ShardId, Triangle, u32)> =
            ROOTS.iter().map(|&(id, tri)| (id, tri, 0)).collect();

        while let Some((id, tri, level)) = stack.pop() {
            if !intersects(&tri, &center, cos_r) {
                continue;
            }

            if level == self.depth {
                found.insert(id);
                continue;
            }

            for (i, child) in children(&tri).into_iter().enumerate() {
                stack.push((4 * id + i as ShardId, child, level + 1));
            }
        }

        found
    }
}
