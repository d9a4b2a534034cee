mod gps_points;
mod timeline_events;
