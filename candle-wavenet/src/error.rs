/// Errors raised while building or running the convolution stack.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Invalid construction parameters, e.g. a zero kernel size or dilation.
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("shape mismatch in {op}, {dim}: expected {expected}, got {got}")]
    ShapeMismatch {
        op: &'static str,
        dim: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("{op} was built with local conditioning but no conditioning tensor was provided")]
    MissingConditioning { op: &'static str },

    #[error(transparent)]
    Candle(#[from] candle::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<Error> for candle::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Candle(err) => err,
            err => candle::Error::wrap(err),
        }
    }
}

macro_rules! config_bail {
    ($($arg:tt)*) => {
        return Err($crate::Error::Config(format!($($arg)*)))
    };
}
pub(crate) use config_bail;

/// Checks that dimension `dim` of a rank-3 shape has the expected size.
pub(crate) fn check_dim(
    op: &'static str,
    dim: &'static str,
    expected: usize,
    got: usize,
) -> Result<()> {
    if expected != got {
        return Err(Error::ShapeMismatch {
            op,
            dim,
            expected,
            got,
        });
    }
    Ok(())
}
