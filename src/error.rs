// Copyright (C) 2022-2025 Michael Herstine <sp1ff@pobox.com>
//
// This file is part of rpc-binlog.
//
// rpc-binlog is free software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.
//
// rpc-binlog is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without
// even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU
// General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with rpc-binlog.  If
// not, see <http://www.gnu.org/licenses/>.
//! [rpc-binlog](crate) errors

use backtrace::Backtrace;

/// [rpc-binlog](crate) error type
///
/// Like its sibling crates, [rpc-binlog](crate) eschews libraries like [thiserror] & [anyhow] in
/// favor of a straightforward enumeration with a few match arms chosen on the basis of what the
/// caller will need to respond.
///
/// Only [`Error::ConfigSyntax`] is produced by this crate's own logic; the other variants wrap
/// failures in the collaborators this crate drives (sinks and the underlying calls).
///
/// [thiserror]: https://docs.rs/thiserror
/// [anyhow]: https://docs.rs/anyhow
#[non_exhaustive]
pub enum Error {
    /// A binlog configuration clause did not match the clause grammar at all; the whole
    /// configuration is rejected
    ConfigSyntax { clause: String, back: Backtrace },
    /// A [`Sink`](crate::sink::Sink) failed to write a log entry
    Sink {
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
        back: Backtrace,
    },
    /// The wrapped call or listener failed
    Call {
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
        back: Backtrace,
    },
}

impl Error {
    /// Wrap an arbitrary error as a sink failure
    pub fn sink<E>(err: E) -> Error
    where
        E: Into<Box<dyn std::error::Error + Send + Sync + 'static>>,
    {
        Error::Sink {
            source: err.into(),
            back: Backtrace::new(),
        }
    }
    /// Wrap an arbitrary error as a failure of the underlying call
    pub fn call<E>(err: E) -> Error
    where
        E: Into<Box<dyn std::error::Error + Send + Sync + 'static>>,
    {
        Error::Call {
            source: err.into(),
            back: Backtrace::new(),
        }
    }
}

impl std::fmt::Display for Error {
    // `Error` is non-exhaustive so that adding variants won't be a breaking change to our
    // callers. That means the compiler won't catch us if we miss a variant here, so we
    // always include a `_` arm.
    #[allow(unreachable_patterns)]
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::ConfigSyntax { clause, .. } => {
                write!(f, "Bad binlog configuration clause: {:?}", clause)
            }
            Error::Sink { source, .. } => write!(f, "While writing a log entry, got {}", source),
            Error::Call { source, .. } => write!(f, "Underlying call failed: {}", source),
            _ => write!(f, "Other rpc-binlog error"),
        }
    }
}

impl std::fmt::Debug for Error {
    #[allow(unreachable_patterns)]
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::ConfigSyntax { clause: _, back } => write!(f, "{}\n{:#?}", self, back),
            Error::Sink { source: _, back } => write!(f, "{}\n{:#?}", self, back),
            Error::Call { source: _, back } => write!(f, "{}\n{:#?}", self, back),
            err => write!(f, "rpc-binlog error: {}", err),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Sink { source, .. } | Error::Call { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

impl std::convert::From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Sink {
            source: Box::new(err),
            back: Backtrace::new(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod test {

    use super::*;

    #[test]
    fn display() {
        let err = Error::ConfigSyntax {
            clause: "pkg.Svc/Method{x}".to_owned(),
            back: Backtrace::new(),
        };
        assert_eq!(
            format!("{}", err),
            "Bad binlog configuration clause: \"pkg.Svc/Method{x}\""
        );

        let err: Error = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone").into();
        assert!(matches!(err, Error::Sink { .. }));
        assert_eq!(format!("{}", err), "While writing a log entry, got gone");
        assert!(std::error::Error::source(&err).is_some());
    }
}
