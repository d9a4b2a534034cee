pub mod gps_point;
pub mod job;
pub mod timeline;

pub use gps_point::{Coordinate, GpsPoint};
pub use job::{GenerationJob, GenerationMode, GenerationStep, JobStatus};
pub use timeline::{ensure_contiguous, DataGap, PathPoint, Stay, TimelineEvent, TravelType, Trip};
