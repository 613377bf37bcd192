/* This file is part of DarkFi (https://dark.fi)
 *
 * Copyright (C) 2020-2026 Dyne.org foundation
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as
 * published by the Free Software Foundation, either version 3 of the
 * License, or (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

//! A single CSPRNG handed to every subsystem that needs randomness:
//! nonces, DH scalars, anonymous connection identities, SOCKS usernames,
//! and the Poisson polling delay. Cloning is cheap and each clone still
//! pulls from the OS entropy source, so there is no shared mutable state
//! to lock.

use rand::{rngs::OsRng, Rng, RngCore};

#[derive(Debug, Clone, Copy, Default)]
pub struct Csprng;

impl Csprng {
    pub fn new() -> Self {
        Self
    }

    pub fn fill(&self, buf: &mut [u8]) {
        OsRng.fill_bytes(buf);
    }

    pub fn bytes32(&self) -> [u8; 32] {
        let mut buf = [0u8; 32];
        self.fill(&mut buf);
        buf
    }

    pub fn bytes24(&self) -> [u8; 24] {
        let mut buf = [0u8; 24];
        self.fill(&mut buf);
        buf
    }

    pub fn u64(&self) -> u64 {
        OsRng.gen()
    }

    /// Samples an exponential inter-arrival delay with the given mean,
    /// used to make polling connections indistinguishable from cover
    /// traffic: `delay = -mean * ln(U)`, `U` uniform on `(0, 1]`.
    pub fn poisson_delay(&self, mean: std::time::Duration) -> std::time::Duration {
        let u: f64 = OsRng.gen_range(f64::MIN_POSITIVE..1.0);
        let secs = -mean.as_secs_f64() * u.ln();
        std::time::Duration::from_secs_f64(secs.max(0.0))
    }

    /// A random SOCKS5 username, for per-connection isolation at the proxy.
    pub fn socks_username(&self) -> String {
        let raw = self.bytes32();
        bs58::encode(raw).into_string()
    }
}
