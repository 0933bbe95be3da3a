//! Angular helpers for speaker, platform and response angles (degrees)
//!
//! Angles in the study are recorded on a half-open circle [-180, 180). World
//! angles come from clock-face speaker indices and head-centred angles are
//! obtained by subtracting the platform rotation.

use std::ops::{Add, Sub};

/// Scalar types that can carry an angle in degrees.
pub trait Degrees: Copy + PartialOrd + Add<Output = Self> + Sub<Output = Self> {
    const HALF_TURN: Self;
    const FULL_TURN: Self;
}

impl Degrees for i32 {
    const HALF_TURN: Self = 180;
    const FULL_TURN: Self = 360;
}

impl Degrees for f64 {
    const HALF_TURN: Self = 180.0;
    const FULL_TURN: Self = 360.0;
}

/// Wrap an angle to the half-open interval [-180, 180).
///
/// Only one adjustment is applied, so inputs are expected in [-540, 540),
/// which covers any difference of two angles already in range.
pub fn wrap_to_180<A: Degrees>(angle: A) -> A {
    let half = A::HALF_TURN;
    let lower = A::HALF_TURN - A::FULL_TURN;
    if angle < lower {
        angle + A::FULL_TURN
    } else if angle >= half {
        angle - A::FULL_TURN
    } else {
        angle
    }
}

/// Copy every point at `boundary_value` to `boundary_value + mirror_delta`.
///
/// Used so that circular curves and heatmaps join at the ±180° seam. The
/// original points are kept and the result is sorted by angle (stable, so
/// ties keep input order).
pub fn duplicate_boundary_for_plotting<A, T>(
    series: &[(A, T)],
    boundary_value: A,
    mirror_delta: A,
) -> Vec<(A, T)>
where
    A: Degrees,
    T: Clone,
{
    let mut extended: Vec<(A, T)> = series.to_vec();
    extended.extend(
        series
            .iter()
            .filter(|(angle, _)| *angle == boundary_value)
            .map(|(_, value)| (boundary_value + mirror_delta, value.clone())),
    );
    extended.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
    extended
}

/// Speaker angle in the world for a clock-face index (12 o'clock = -180°).
pub fn clock_to_world_angle(clock_index: i32) -> i32 {
    180 - 30 * clock_index
}

/// World angle expressed relative to the platform (putative head) rotation.
pub fn platform_relative(world_angle: i32, platform_rotation: i32) -> i32 {
    wrap_to_180(world_angle - platform_rotation)
}
