use std::env;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::foundation::error::{CombMaskError, CombMaskResult};

/// Environment variable that caps the automatically selected kernel level.
pub const SIMD_ENV_VAR: &str = "COMBMASK_SIMD";

/// Kernel implementation family, ordered from narrowest to widest.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimdLevel {
    /// Portable per-byte loops.
    Scalar,
    /// 128-bit registers (SSE2).
    Vector128,
    /// 256-bit registers (AVX2).
    Vector256,
}

impl SimdLevel {
    const ALL: [SimdLevel; 3] = [SimdLevel::Scalar, SimdLevel::Vector128, SimdLevel::Vector256];

    /// Widest level the running CPU supports, capped by `COMBMASK_SIMD` when it is set.
    ///
    /// An unparsable variable is ignored with a warning; a value above the detected level is
    /// lowered to it.
    pub fn detect() -> Self {
        let detected = Self::ALL
            .into_iter()
            .rev()
            .find(|l| l.is_supported())
            .unwrap_or(SimdLevel::Scalar);
        let manual = match env::var(SIMD_ENV_VAR) {
            Ok(v) => Some(v),
            Err(env::VarError::NotPresent) => None,
            Err(env::VarError::NotUnicode(raw)) => Some(raw.to_string_lossy().into_owned()),
        };
        let level = capped_level(manual.as_deref(), detected);
        tracing::debug!(?detected, ?level, "kernel level selected");
        level
    }

    /// `true` if kernels of this level can run on this CPU.
    pub fn is_supported(self) -> bool {
        match self {
            SimdLevel::Scalar => true,
            #[cfg(target_arch = "x86_64")]
            SimdLevel::Vector128 => true,
            #[cfg(target_arch = "x86_64")]
            SimdLevel::Vector256 => std::arch::is_x86_feature_detected!("avx2"),
            #[cfg(not(target_arch = "x86_64"))]
            SimdLevel::Vector128 | SimdLevel::Vector256 => false,
        }
    }

    /// Every supported level, narrowest first.
    pub fn available() -> Vec<SimdLevel> {
        Self::ALL.into_iter().filter(|l| l.is_supported()).collect()
    }

    /// Bytes processed per register.
    pub fn vector_width(self) -> usize {
        match self {
            SimdLevel::Scalar => 1,
            SimdLevel::Vector128 => 16,
            SimdLevel::Vector256 => 32,
        }
    }

    /// Alignment for scratch buffers and plane pitches used with this level.
    pub fn alignment(self) -> usize {
        self.vector_width().max(16)
    }
}

impl FromStr for SimdLevel {
    type Err = CombMaskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "scalar" | "c" | "0" => Ok(SimdLevel::Scalar),
            "vector128" | "sse2" | "1" => Ok(SimdLevel::Vector128),
            "vector256" | "avx2" | "2" => Ok(SimdLevel::Vector256),
            other => Err(CombMaskError::configuration(format!(
                "unknown kernel level '{other}'"
            ))),
        }
    }
}

/// Kernel level requested through filter options.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimdRequest {
    /// Use [`SimdLevel::detect`].
    #[default]
    Auto,
    /// Force scalar kernels.
    #[serde(alias = "c")]
    Scalar,
    /// Force 128-bit kernels.
    #[serde(alias = "sse2")]
    Vector128,
    /// Force 256-bit kernels.
    #[serde(alias = "avx2")]
    Vector256,
}

impl SimdRequest {
    /// Resolve to a concrete level, failing if an explicit level is not supported here.
    pub fn resolve(self) -> CombMaskResult<SimdLevel> {
        let level = match self {
            SimdRequest::Auto => return Ok(SimdLevel::detect()),
            SimdRequest::Scalar => SimdLevel::Scalar,
            SimdRequest::Vector128 => SimdLevel::Vector128,
            SimdRequest::Vector256 => SimdLevel::Vector256,
        };
        if !level.is_supported() {
            return Err(CombMaskError::precondition(format!(
                "{level:?} kernels are not supported on this CPU"
            )));
        }
        Ok(level)
    }
}

fn capped_level(manual: Option<&str>, detected: SimdLevel) -> SimdLevel {
    let Some(value) = manual else {
        return detected;
    };
    match value.parse::<SimdLevel>() {
        Ok(level) => level.min(detected),
        Err(err) => {
            tracing::warn!(
                var = SIMD_ENV_VAR,
                value,
                %err,
                "ignoring kernel level override"
            );
            detected
        }
    }
}
