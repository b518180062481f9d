use std::io;

pub type WireResult<T> = Result<T, WireError>;

/// Failure modes for the handful of fallible, constructor-time paths in the wire
/// layer. Everything that can legitimately happen during normal packet handling
/// (a malformed frame, a MAC mismatch, an out-of-radius sender) is represented as
/// `Message::Invalid`, `bool`, or `Option` rather than an error, matching the
/// source's own error taxonomy.
#[derive(Debug)]
pub enum WireError {
    /// A trajectory CSV could not be parsed or contained no usable points.
    Trajectory(String),
    Io(io::Error),
}

impl From<io::Error> for WireError {
    #[inline]
    fn from(error: io::Error) -> Self {
        WireError::Io(error)
    }
}

impl std::fmt::Display for WireError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WireError::Trajectory(reason) => write!(f, "trajectory error: {}", reason),
            WireError::Io(error) => write!(f, "io error: {}", error),
        }
    }
}

impl std::error::Error for WireError {}

pub trait ErrorUtils {
    fn has_failed(&self) -> bool;
}

impl<T> ErrorUtils for WireResult<T> {
    fn has_failed(&self) -> bool {
        self.is_err()
    }
}
