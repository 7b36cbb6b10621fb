pub mod admissibility;
pub mod canonicalize;
pub mod robots;

pub use admissibility::{Admissibility, Rejection};
pub use canonicalize::canonicalize;
pub use robots::{RobotsCache, RobotsFetcher};
