// Copyright 2025 jonefeewang@gmail.com
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

use std::fmt;
use std::net::SocketAddr;

use crate::{AppError, AppResult};

/// Address and port to bind or dial. Port `0` lets the OS pick one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Connection {
    address: String,
    port: u16,
}

impl Connection {
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Connection {
            address: address.into(),
            port,
        }
    }

    pub fn localhost(port: u16) -> Self {
        Connection::new("127.0.0.1", port)
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Resolves to the first socket address the host name maps to.
    pub async fn resolve(&self) -> AppResult<SocketAddr> {
        let mut addrs = tokio::net::lookup_host((self.address.as_str(), self.port))
            .await
            .map_err(|e| AppError::InvalidValue(format!("address {}: {}", self, e)))?;
        addrs
            .next()
            .ok_or_else(|| AppError::InvalidValue(format!("address {} resolved to nothing", self)))
    }
}

impl From<SocketAddr> for Connection {
    fn from(addr: SocketAddr) -> Self {
        Connection::new(addr.ip().to_string(), addr.port())
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.address.contains(':') {
            write!(f, "[{}]:{}", self.address, self.port)
        } else {
            write!(f, "{}:{}", self.address, self.port)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_resolve_literal() -> AppResult<()> {
        let addr = Connection::localhost(4000).resolve().await?;
        assert_eq!(addr, "127.0.0.1:4000".parse::<SocketAddr>().unwrap());
        Ok(())
    }

    #[test]
    fn test_display() {
        assert_eq!(Connection::localhost(0).to_string(), "127.0.0.1:0");
        assert_eq!(Connection::new("::1", 9).to_string(), "[::1]:9");
        let from_addr: Connection = "10.0.0.1:80".parse::<SocketAddr>().unwrap().into();
        assert_eq!(from_addr, Connection::new("10.0.0.1", 80));
    }
}
