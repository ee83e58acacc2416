pub mod angles;
pub mod collisions;
pub mod convex_hull;
pub mod daylight;
pub mod equal_angle;
pub mod geometry;
