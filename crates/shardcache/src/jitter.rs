// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Random TTL jitter so entries written together do not expire together.

use std::{fmt::Debug, time::Duration};

/// Non-cryptographic random number generator used for TTL jitter.
#[derive(Clone, Default)]
pub(crate) enum Rnd {
    #[default]
    Real,

    #[cfg(test)]
    Test(std::sync::Arc<dyn Fn() -> f64 + Send + Sync>),
}

impl Debug for Rnd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Real => write!(f, "Real"),
            #[cfg(test)]
            Self::Test(_) => write!(f, "Test"),
        }
    }
}

impl Rnd {
    #[cfg(test)]
    pub fn new_fixed(value: f64) -> Self {
        Self::Test(std::sync::Arc::new(move || value))
    }

    pub fn next_f64(&self) -> f64 {
        match self {
            Self::Real => fastrand::f64(),
            #[cfg(test)]
            Self::Test(generator) => generator(),
        }
    }
}

/// Spreads durations uniformly within `[base * (1 - deviation), base * (1 + deviation)]`.
#[derive(Debug, Clone)]
pub(crate) struct Unstable {
    deviation: f64,
    rnd: Rnd,
}

impl Unstable {
    pub fn new(deviation: f64) -> Self {
        Self::with_rnd(deviation, Rnd::default())
    }

    pub fn with_rnd(deviation: f64, rnd: Rnd) -> Self {
        let deviation = if deviation.is_nan() { 0.0 } else { deviation.clamp(0.0, 1.0) };
        Self { deviation, rnd }
    }

    pub fn around_duration(&self, base: Duration) -> Duration {
        let factor = 1.0 + self.deviation - 2.0 * self.deviation * self.rnd.next_f64();
        Duration::try_from_secs_f64(base.as_secs_f64() * factor).unwrap_or(base)
    }
}
