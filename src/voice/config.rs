//! User-facing voice configuration and its snapshot store

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Slowest accepted speaking rate
pub const MIN_SPEED: f32 = 0.5;

/// Fastest accepted speaking rate
pub const MAX_SPEED: f32 = 2.0;

/// Named synthesis persona
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoiceIdentity {
    /// Neutral
    #[default]
    Alloy,
    /// Male
    Echo,
    /// British
    Fable,
    /// Deep
    Onyx,
    /// Friendly
    Nova,
    /// Warm
    Shimmer,
}

impl VoiceIdentity {
    /// Every selectable voice, in display order
    pub const ALL: [Self; 6] = [
        Self::Alloy,
        Self::Echo,
        Self::Fable,
        Self::Onyx,
        Self::Nova,
        Self::Shimmer,
    ];

    /// Wire name used by the synthesis endpoint
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Alloy => "alloy",
            Self::Echo => "echo",
            Self::Fable => "fable",
            Self::Onyx => "onyx",
            Self::Nova => "nova",
            Self::Shimmer => "shimmer",
        }
    }

    /// Short description of the voice character
    #[must_use]
    pub const fn character(self) -> &'static str {
        match self {
            Self::Alloy => "Neutral",
            Self::Echo => "Male",
            Self::Fable => "British",
            Self::Onyx => "Deep",
            Self::Nova => "Friendly",
            Self::Shimmer => "Warm",
        }
    }
}

impl fmt::Display for VoiceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VoiceIdentity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let name = s.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|v| v.as_str() == name)
            .ok_or_else(|| Error::ConfigInvalid(format!("unknown voice '{s}'")))
    }
}

/// One immutable configuration snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    /// Master switch for voice features
    pub enabled: bool,

    /// Synthesis voice
    pub voice: VoiceIdentity,

    /// Speaking rate multiplier, within [`MIN_SPEED`, `MAX_SPEED`]
    pub speed: f32,

    /// Speak assistant replies without an explicit request
    pub auto_speak: bool,

    /// Pause active capture while synthesized audio is requested or playing
    #[serde(default)]
    pub suppress_capture_during_playback: bool,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            voice: VoiceIdentity::Alloy,
            speed: 1.0,
            auto_speak: false,
            suppress_capture_during_playback: false,
        }
    }
}

impl VoiceConfig {
    /// Produce a new snapshot with `patch` merged over this one
    ///
    /// # Errors
    ///
    /// Returns `ConfigInvalid` if the patched speed is not a finite number
    pub fn merged(&self, patch: &VoiceConfigPatch) -> Result<Self> {
        let speed = match patch.speed {
            Some(speed) => clamp_speed(speed)?,
            None => self.speed,
        };

        Ok(Self {
            enabled: patch.enabled.unwrap_or(self.enabled),
            voice: patch.voice.unwrap_or(self.voice),
            speed,
            auto_speak: patch.auto_speak.unwrap_or(self.auto_speak),
            suppress_capture_during_playback: patch
                .suppress_capture_during_playback
                .unwrap_or(self.suppress_capture_during_playback),
        })
    }
}

/// Partial update; absent fields keep their current value
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfigPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice: Option<VoiceIdentity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_speak: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suppress_capture_during_playback: Option<bool>,
}

impl VoiceConfigPatch {
    #[must_use]
    pub const fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = Some(enabled);
        self
    }

    #[must_use]
    pub const fn voice(mut self, voice: VoiceIdentity) -> Self {
        self.voice = Some(voice);
        self
    }

    #[must_use]
    pub const fn speed(mut self, speed: f32) -> Self {
        self.speed = Some(speed);
        self
    }

    #[must_use]
    pub const fn auto_speak(mut self, auto_speak: bool) -> Self {
        self.auto_speak = Some(auto_speak);
        self
    }

    #[must_use]
    pub const fn suppress_capture_during_playback(mut self, suppress: bool) -> Self {
        self.suppress_capture_during_playback = Some(suppress);
        self
    }
}

/// Clamp a speaking rate into the accepted range
///
/// # Errors
///
/// Returns `ConfigInvalid` for NaN or infinite values
pub fn clamp_speed(speed: f32) -> Result<f32> {
    if !speed.is_finite() {
        return Err(Error::ConfigInvalid(format!("speed must be finite, got {speed}")));
    }

    let clamped = speed.clamp(MIN_SPEED, MAX_SPEED);
    if (clamped - speed).abs() > f32::EPSILON {
        tracing::warn!(requested = speed, clamped, "speed out of range, clamping");
    }
    Ok(clamped)
}

/// Holds the single current configuration snapshot
///
/// Readers get an `Arc` to an immutable snapshot; writers merge and swap
/// under the write lock so interleaved updates never lose fields.
#[derive(Debug, Clone, Default)]
pub struct VoiceConfigStore {
    current: Arc<RwLock<Arc<VoiceConfig>>>,
}

impl VoiceConfigStore {
    /// Create a store seeded with `initial`
    ///
    /// # Errors
    ///
    /// Returns `ConfigInvalid` if the initial speed is not finite
    pub fn new(initial: VoiceConfig) -> Result<Self> {
        let speed = clamp_speed(initial.speed)?;
        Ok(Self {
            current: Arc::new(RwLock::new(Arc::new(VoiceConfig { speed, ..initial }))),
        })
    }

    /// Current snapshot
    #[must_use]
    pub fn snapshot(&self) -> Arc<VoiceConfig> {
        let guard = self.current.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&guard)
    }

    /// Merge `patch` over the current snapshot and publish the result
    ///
    /// # Errors
    ///
    /// Returns `ConfigInvalid` if the patch is rejected; the current
    /// snapshot is left untouched
    pub fn set_config(&self, patch: &VoiceConfigPatch) -> Result<Arc<VoiceConfig>> {
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        let next = Arc::new(guard.merged(patch)?);
        *guard = Arc::clone(&next);
        drop(guard);

        tracing::debug!(config = ?next, "voice config updated");
        Ok(next)
    }
}
