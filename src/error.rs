// Copyright (c) 2023 The TQUIC Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Error type for session operations.

use strum::IntoEnumIterator;
use strum_macros::EnumIter;

/// Session error.
#[derive(Clone, Debug, Default, PartialEq, Eq, EnumIter)]
pub enum Error {
    /// The operation completed without error.
    #[default]
    NoError,

    /// There is no more work to do.
    Done,

    /// The configuration is invalid.
    InvalidConfig(String),

    /// The operation cannot be completed because it was attempted in an
    /// invalid state.
    InvalidState(String),

    /// The operation on the session is invalid.
    InvalidOperation(String),

    /// I/O error.
    IoError(String),
}

impl Error {
    /// Return a stable error number, for callers that report errors
    /// numerically.
    pub fn to_errno(&self) -> isize {
        match self {
            Error::NoError => 0,
            Error::Done => -100,
            Error::InvalidConfig(_) => -101,
            Error::InvalidState(_) => -102,
            Error::InvalidOperation(_) => -103,
            Error::IoError(_) => -104,
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        None
    }
}

impl std::convert::From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::IoError(format!("{}", err))
    }
}
