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

pub const DEFAULT_NUM_REPLICAS: usize = 3;
pub const MAX_BYTES_PER_WRITE_RPC: u32 = 1024 * 1024;
pub const MAX_WRITE_RPCS_IN_FLIGHT: u32 = 4;

/// The option structure of ReplicaManager.
#[derive(Debug, Clone)]
pub struct ManagerOption {
    /// The number of replicas maintained for every segment.
    ///
    /// DEFAULT: [`DEFAULT_NUM_REPLICAS`].
    pub num_replicas: usize,

    /// Maximum bytes to send in a single backup write rpc; keeps long
    /// transfers from clogging backups that are also serving recovery
    /// reads.
    ///
    /// DEFAULT: [`MAX_BYTES_PER_WRITE_RPC`].
    pub max_bytes_per_write_rpc: u32,

    /// Maximum write rpcs outstanding across all segments of the master.
    ///
    /// DEFAULT: [`MAX_WRITE_RPCS_IN_FLIGHT`].
    pub max_write_rpcs_in_flight: u32,
}

impl Default for ManagerOption {
    fn default() -> Self {
        ManagerOption {
            num_replicas: DEFAULT_NUM_REPLICAS,
            max_bytes_per_write_rpc: MAX_BYTES_PER_WRITE_RPC,
            max_write_rpcs_in_flight: MAX_WRITE_RPCS_IN_FLIGHT,
        }
    }
}
