use serde::Serialize;
use std::f64::consts::PI;

/// Simple 2D point (x, y).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Pt(pub f64, pub f64);

impl Pt {
    pub fn x(&self) -> f64 {
        self.0
    }
    pub fn y(&self) -> f64 {
        self.1
    }
}

/// Wrap to [0, 2π).
#[inline]
pub fn modulo_two_pi(angle: f64) -> f64 {
    let a = angle.rem_euclid(2.0 * PI);
    if a >= 2.0 * PI {
        0.0
    } else {
        a
    }
}

#[inline]
pub fn translate_by_angle(p: Pt, angle: f64, dist: f64) -> Pt {
    Pt(p.0 + dist * angle.cos(), p.1 + dist * angle.sin())
}

/// Direction of the vector `p` in [0, 2π); the zero vector has angle 0.
pub fn compute_angle(p: Pt) -> f64 {
    if p.0 == 0.0 && p.1 == 0.0 {
        return 0.0;
    }
    modulo_two_pi(p.1.atan2(p.0))
}

/// Signed angle in (-π, π] at `apex` turning from `a` to `b`.
pub fn compute_observed_angle(apex: Pt, a: Pt, b: Pt) -> f64 {
    let (ax, ay) = (a.0 - apex.0, a.1 - apex.1);
    let (bx, by) = (b.0 - apex.0, b.1 - apex.1);
    if (ax == 0.0 && ay == 0.0) || (bx == 0.0 && by == 0.0) {
        return 0.0;
    }
    (ax * by - ay * bx).atan2(ax * bx + ay * by)
}

/// Smallest distance between two angles on the circle.
pub fn angular_distance(a: f64, b: f64) -> f64 {
    let d = modulo_two_pi(a - b);
    d.min(2.0 * PI - d)
}
