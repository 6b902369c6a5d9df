//! Environmental failures. Programmer misuse of the manager panics instead.

#[derive(Debug, Fail)]
pub enum Error {
    #[fail(display = "{}", _0)]
    IO(::std::io::Error),
    #[fail(display = "{}", _0)]
    Json(::serde_json::Error),
    #[fail(display = "Failed to spawn worker thread: {}.", _0)]
    Spawn(String),
    #[fail(display = "Loader failed: {}.", _0)]
    Loader(String),
    #[fail(display = "{}", _0)]
    Malformed(String),
}

pub type Result<T> = ::std::result::Result<T, Error>;

impl From<::std::io::Error> for Error {
    fn from(err: ::std::io::Error) -> Self {
        Error::IO(err)
    }
}

impl From<::serde_json::Error> for Error {
    fn from(err: ::serde_json::Error) -> Self {
        Error::Json(err)
    }
}

impl From<::failure::Error> for Error {
    fn from(err: ::failure::Error) -> Self {
        Error::Loader(err.to_string())
    }
}
