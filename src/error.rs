use std::{fmt, io};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorCode {
    // Opening a core file.
    MalformedCore = 1,
    UnsupportedCore = 2,
    // Bad command or argument typed at the prompt.
    Usage = 3,
    Format = 4,
    // Target memory not readable: process gone, address unmapped.
    ProcessState = 5,
    // Target data that can't be right, e.g. too many nested threads.
    Sanity = 6,
    Runtime = 7,
}

#[derive(Debug)]
pub enum ErrorEnum {
    IO(io::Error),
    Code(ErrorCode),
}

#[derive(Clone)]
pub struct Error {
    pub error: ErrorEnum,
    pub message: String,
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn new(code: ErrorCode, message: String) -> Error {
        Error {error: ErrorEnum::Code(code), message}
    }

    pub fn from_io_error(e: io::Error, message: String) -> Error {
        Error {error: ErrorEnum::IO(e), message}
    }

    pub fn code(&self) -> Option<ErrorCode> { match &self.error { ErrorEnum::Code(c) => Some(*c), _ => None } }
    pub fn is_usage(&self) -> bool { self.code() == Some(ErrorCode::Usage) }
    pub fn is_process_state(&self) -> bool { self.code() == Some(ErrorCode::ProcessState) }
    pub fn is_sanity(&self) -> bool { self.code() == Some(ErrorCode::Sanity) }
}

impl From<io::Error> for Error {
    fn from(error: io::Error) -> Self {
        Error {error: ErrorEnum::IO(error), message: String::new()}
    }
}

impl From<std::num::ParseIntError> for Error {
    fn from(error: std::num::ParseIntError) -> Self {
        Error {error: ErrorEnum::Code(ErrorCode::Format), message: format!("{}", error)}
    }
}

impl From<std::str::Utf8Error> for Error {
    fn from(error: std::str::Utf8Error) -> Self {
        Error {error: ErrorEnum::Code(ErrorCode::Format), message: format!("{}", error)}
    }
}

impl From<std::fmt::Error> for Error {
    fn from(error: std::fmt::Error) -> Self {
        Error {error: ErrorEnum::Code(ErrorCode::Format), message: format!("{}", error)}
    }
}

// For printing to log.
impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.error {
            &ErrorEnum::Code(code) => write!(f, "{}: {}", code as i64, self.message),
            ErrorEnum::IO(error) => write!(f, "{}: {}", self.message, error),
        }
    }
}

// For showing to the user.
impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.error {
            &ErrorEnum::Code(_) => write!(f, "{}", self.message),
            ErrorEnum::IO(error) if self.message.is_empty() => write!(f, "{}", error),
            ErrorEnum::IO(error) => write!(f, "{}: {}", self.message, error),
        }
    }
}

impl Clone for ErrorEnum {
    fn clone(&self) -> Self {
        match self {
            Self::Code(c) => Self::Code(*c),
            Self::IO(e) => Self::IO(match e.raw_os_error() {
                Some(os) => io::Error::from_raw_os_error(os),
                None => e.kind().into(),
            }),
        }
    }
}

#[macro_export]
macro_rules! error {
    ($code:ident, $($arg:tt)*) => (
        $crate::error::Error {error: $crate::error::ErrorEnum::Code($crate::error::ErrorCode::$code), message: format!($($arg)*)}
    );
}

#[macro_export]
macro_rules! err {
    ($code:ident, $($arg:tt)*) => (
        Err($crate::error!($code, $($arg)*))
    );
}

#[macro_export]
macro_rules! errno_err {
    ($($arg:tt)*) => (
        Err($crate::error::Error {error: $crate::error::ErrorEnum::IO(::std::io::Error::last_os_error()), message: format!($($arg)*)})
    );
}

#[cfg(test)]
mod tests {
    use crate::error::*;

    #[test]
    fn display_and_debug() {
        let e: Error = error!(Sanity, "more than {} nested threads", 64);
        assert!(e.is_sanity() && !e.is_usage());
        assert_eq!(format!("{}", e), "more than 64 nested threads");
        assert_eq!(format!("{:?}", e), "6: more than 64 nested threads");

        let e = Error::from_io_error(io::Error::from_raw_os_error(libc::ENOENT), "open core".to_string());
        assert_eq!(e.code(), None);
        assert!(format!("{}", e).starts_with("open core: "));
        match e.clone().error {
            ErrorEnum::IO(io) => assert_eq!(io.raw_os_error(), Some(libc::ENOENT)),
            _ => panic!(),
        }

        let r: Result<u32> = "x1".parse::<u32>().map_err(|e| e.into());
        assert_eq!(r.unwrap_err().code(), Some(ErrorCode::Format));
    }
}
