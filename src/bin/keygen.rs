// Copyright (c) 2026 Driftnet
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![forbid(unsafe_code)]

//! Provision an author key for a node data directory and print the public
//! key in hex.

use anyhow::Result;
use driftnet::core::keys::AuthorKey;

fn main() -> Result<()> {
    let out_dir = std::env::args().nth(1).unwrap_or_else(|| "data".to_string());
    let key = AuthorKey::load_or_create(&out_dir).map_err(|e| anyhow::anyhow!("keystore: {e}"))?;
    println!("{}", hex::encode(key.public_key()));
    Ok(())
}
