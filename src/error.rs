use std::borrow::Cow;
use std::error::Error;
use std::fmt;

pub type PropResult<T> = Result<T, PropError>;

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct PropError {
    error: PropErrorEnum,
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub enum PropErrorEnum {
    /// A required argument was missing, or a count disagrees with the array it describes.
    InvalidArgument,
    /// The operation is not allowed on this property or with these flags.
    InvalidParameter,
    /// A stream name or property name could not be decoded.
    InvalidName,
    /// The stream or property set does not exist.
    NotFound,
    /// The property set already exists and the CREATE mode bit was not given.
    AlreadyExists,
    /// The handle was opened read-only.
    AccessDenied,
    /// A string had to be transcoded through a code page missing from the table.
    UnsupportedCodePage(u16),
    /// Malformed on-disk data.
    Corruption(Cow<'static, str>),
}

impl PropError {
    pub fn kind(&self) -> &PropErrorEnum {
        &self.error
    }

    pub fn corruption<S: Into<Cow<'static, str>>>(detail: S) -> Self {
        PropErrorEnum::Corruption(detail.into()).into()
    }
}

impl From<PropErrorEnum> for PropError {
    fn from(t: PropErrorEnum) -> Self {
        PropError { error: t }
    }
}

impl fmt::Display for PropError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.error {
            PropErrorEnum::InvalidArgument => write!(f, "invalid argument"),
            PropErrorEnum::InvalidParameter => write!(f, "invalid parameter"),
            PropErrorEnum::InvalidName => write!(f, "invalid name"),
            PropErrorEnum::NotFound => write!(f, "property set not found"),
            PropErrorEnum::AlreadyExists => write!(f, "property set already exists"),
            PropErrorEnum::AccessDenied => write!(f, "access denied"),
            PropErrorEnum::UnsupportedCodePage(cp) => write!(f, "unsupported code page {}", cp),
            PropErrorEnum::Corruption(ref detail) => write!(f, "corrupt property set: {}", detail),
        }
    }
}

impl Error for PropError {}
