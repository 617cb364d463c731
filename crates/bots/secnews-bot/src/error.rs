use std::{error, fmt};

pub type BoxedError = Box<dyn error::Error + Send + Sync + 'static>;
pub type BoxedErrorResult<T> = std::result::Result<T, BoxedError>;

/// Renders an error followed by its whole `source()` chain on one line,
/// e.g. `Feed request failed: error sending request: connection refused`.
pub struct CompactError<'e>(&'e (dyn error::Error + 'e));

impl fmt::Display for CompactError<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)?;
        let mut cause = self.0.source();
        while let Some(err) = cause {
            write!(f, ": {err}")?;
            cause = err.source();
        }
        Ok(())
    }
}

pub trait FmtCompact {
    fn fmt_compact(&self) -> CompactError<'_>;
}

impl<E> FmtCompact for E
where
    E: error::Error,
{
    fn fmt_compact(&self) -> CompactError<'_> {
        CompactError(self)
    }
}
