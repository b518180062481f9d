//! Current vehicle position, either a manually set value or interpolated from a
//! time-indexed trajectory loaded from a CSV file.

use std::fs;
use std::io::BufRead;
use std::sync::Mutex;
use v2x_wire::error::{WireError, WireResult};
use v2x_wire::time::now_us;

#[derive(Debug, Clone, Copy, PartialEq)]
struct TrajectoryPoint {
    timestamp_ms: i64,
    x: f64,
    y: f64,
}

struct Inner {
    x: f64,
    y: f64,
    trajectory: Vec<TrajectoryPoint>,
}

/// Guarded by a single mutex; never panics on bad input, matching the source's
/// "fall back to the manual value" error policy.
pub struct LocationService {
    inner: Mutex<Inner>,
}

impl LocationService {
    pub fn new() -> LocationService {
        LocationService {
            inner: Mutex::new(Inner { x: 0.0, y: 0.0, trajectory: Vec::new() }),
        }
    }

    pub fn set_current_coordinates(&self, x: f64, y: f64) {
        let mut inner = self.inner.lock().unwrap();
        inner.x = x;
        inner.y = y;
    }

    /// Loads `timestamp_ms,x,y` rows from `path`, sorted by timestamp. An optional
    /// header line is detected by the literal substring `timestamp` and skipped;
    /// malformed lines are skipped rather than aborting the load.
    pub fn load_trajectory(&self, path: &str) -> WireResult<()> {
        let file = fs::File::open(path)?;
        let reader = std::io::BufReader::new(file);
        let mut points = Vec::new();

        for line in reader.lines() {
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.contains("timestamp") {
                continue;
            }
            if let Some(point) = parse_trajectory_line(trimmed) {
                points.push(point);
            }
        }

        if points.is_empty() {
            return Err(WireError::Trajectory(format!("no usable rows in {}", path)));
        }

        points.sort_by_key(|p| p.timestamp_ms);

        let mut inner = self.inner.lock().unwrap();
        inner.trajectory = points;
        Ok(())
    }

    /// Interpolated position at `timestamp_ms`, falling back to the manually-set
    /// value when there is no trajectory loaded or `timestamp_ms` is zero.
    pub fn current_coordinates(&self, timestamp_ms: i64) -> (f64, f64) {
        let inner = self.inner.lock().unwrap();
        if timestamp_ms == 0 || inner.trajectory.is_empty() {
            return (inner.x, inner.y);
        }
        interpolate(&inner.trajectory, timestamp_ms)
    }

    /// Live position at the current wall-clock time. Every send/receive/leader-
    /// selection call site that wants the vehicle's actual position (as opposed
    /// to a specific historical instant) should use this rather than passing
    /// `0`, which `current_coordinates` treats as "no timestamp given".
    pub fn current_coordinates_now(&self) -> (f64, f64) {
        self.current_coordinates(now_us() / 1000)
    }
}

fn parse_trajectory_line(line: &str) -> Option<TrajectoryPoint> {
    let mut fields = line.split(',');
    let timestamp_ms: i64 = fields.next()?.trim().parse().ok()?;
    let x: f64 = fields.next()?.trim().parse().ok()?;
    let y: f64 = fields.next()?.trim().parse().ok()?;
    Some(TrajectoryPoint { timestamp_ms, x, y })
}

fn interpolate(points: &[TrajectoryPoint], timestamp_ms: i64) -> (f64, f64) {
    if timestamp_ms <= points[0].timestamp_ms {
        return (points[0].x, points[0].y);
    }
    let last = points.len() - 1;
    if timestamp_ms >= points[last].timestamp_ms {
        return (points[last].x, points[last].y);
    }

    // Binary search for the first point whose timestamp is > timestamp_ms.
    let upper = points.partition_point(|p| p.timestamp_ms <= timestamp_ms);
    let before = &points[upper - 1];
    let after = &points[upper];

    let span = (after.timestamp_ms - before.timestamp_ms) as f64;
    let ratio = if span > 0.0 {
        (timestamp_ms - before.timestamp_ms) as f64 / span
    } else {
        0.0
    };

    (
        before.x + (after.x - before.x) * ratio,
        before.y + (after.y - before.y) * ratio,
    )
}

impl Default for LocationService {
    fn default() -> Self {
        LocationService::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn falls_back_to_manual_coordinates_without_trajectory() {
        let service = LocationService::new();
        service.set_current_coordinates(3.0, 4.0);
        assert_eq!(service.current_coordinates(0), (3.0, 4.0));
        assert_eq!(service.current_coordinates(12345), (3.0, 4.0));
    }

    #[test]
    fn interpolates_between_bracketing_points() {
        let dir = std::env::temp_dir();
        let path = dir.join("v2x-core-trajectory-test.csv");
        {
            let mut file = fs::File::create(&path).unwrap();
            writeln!(file, "timestamp_ms,x,y").unwrap();
            writeln!(file, "0,0.0,0.0").unwrap();
            writeln!(file, "1000,10.0,0.0").unwrap();
            writeln!(file, "garbage,line,here").unwrap();
            writeln!(file, "2000,10.0,10.0").unwrap();
        }

        let service = LocationService::new();
        service.load_trajectory(path.to_str().unwrap()).unwrap();

        assert_eq!(service.current_coordinates(500), (5.0, 0.0));
        assert_eq!(service.current_coordinates(1500), (10.0, 5.0));
        assert_eq!(service.current_coordinates(-100), (0.0, 0.0));
        assert_eq!(service.current_coordinates(5000), (10.0, 10.0));

        fs::remove_file(&path).ok();
    }

    #[test]
    fn missing_file_yields_error_not_panic() {
        let service = LocationService::new();
        let result = service.load_trajectory("/nonexistent/path/does-not-exist.csv");
        assert!(result.is_err());
    }
}
