// Copyright 2026 The Seglog Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use thiserror::Error;

use crate::ServerId;

#[derive(Error, Debug)]
pub enum Error {
    #[error("backup server {0} is unavailable")]
    ServerUnavailable(ServerId),
    #[error("no eligible backup")]
    NoEligibleBackup,
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("protocol violation: {0}")]
    Protocol(String),
}

impl Error {
    pub fn transport(s: impl ToString) -> Self {
        Self::Transport(s.to_string())
    }

    pub fn protocol(s: impl ToString) -> Self {
        Self::Protocol(s.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
