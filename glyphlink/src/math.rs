//! Column-major 4x4 matrices, laid out the way WGSL `mat4x4<f32>` reads them.

pub type Mat4 = [[f32; 4]; 4];

pub const IDENTITY: Mat4 = [
    [1.0, 0.0, 0.0, 0.0],
    [0.0, 1.0, 0.0, 0.0],
    [0.0, 0.0, 1.0, 0.0],
    [0.0, 0.0, 0.0, 1.0],
];

/// `a × b`: applies `b` first, then `a`.
pub fn multiply(a: &Mat4, b: &Mat4) -> Mat4 {
    let mut out = [[0.0; 4]; 4];
    for col in 0..4 {
        for row in 0..4 {
            out[col][row] = (0..4).map(|k| a[k][row] * b[col][k]).sum();
        }
    }
    out
}

pub fn translation(x: f32, y: f32, z: f32) -> Mat4 {
    let mut m = IDENTITY;
    m[3] = [x, y, z, 1.0];
    m
}

pub fn scale(x: f32, y: f32, z: f32) -> Mat4 {
    let mut m = IDENTITY;
    m[0][0] = x;
    m[1][1] = y;
    m[2][2] = z;
    m
}

/// Counter-clockwise rotation about +Z.
pub fn rotation_z(radians: f32) -> Mat4 {
    let (s, c) = radians.sin_cos();
    let mut m = IDENTITY;
    m[0] = [c, s, 0.0, 0.0];
    m[1] = [-s, c, 0.0, 0.0];
    m
}

/// Orthographic projection mapping `(0, 0)..(width, height)` to clip space,
/// with +Y up. Z in `-1..1` maps to depth `0..1`.
pub fn orthographic(width: f32, height: f32) -> Mat4 {
    [
        [2.0 / width, 0.0, 0.0, 0.0],
        [0.0, 2.0 / height, 0.0, 0.0],
        [0.0, 0.0, 0.5, 0.0],
        [-1.0, -1.0, 0.5, 1.0],
    ]
}

/// Transform a point (w = 1).
pub fn transform_point(m: &Mat4, p: [f32; 3]) -> [f32; 3] {
    let v = [p[0], p[1], p[2], 1.0];
    let mut out = [0.0; 3];
    for (row, slot) in out.iter_mut().enumerate() {
        *slot = (0..4).map(|k| m[k][row] * v[k]).sum();
    }
    out
}
