//! System volume and media keys

use std::sync::Arc;

use super::{ComboSynthesizer, InjectionError, VirtualKey};

/// Drives system volume by tapping the media keys
#[derive(Clone)]
pub struct VolumeActuator {
    synth: Arc<ComboSynthesizer>,
}

impl VolumeActuator {
    pub fn new(synth: Arc<ComboSynthesizer>) -> Self {
        Self { synth }
    }

    pub fn up(&self) -> Result<(), InjectionError> {
        self.synth.tap(VirtualKey::VOLUME_UP)
    }

    pub fn down(&self) -> Result<(), InjectionError> {
        self.synth.tap(VirtualKey::VOLUME_DOWN)
    }

    pub fn toggle_mute(&self) -> Result<(), InjectionError> {
        self.synth.tap(VirtualKey::VOLUME_MUTE)
    }

    pub fn play_pause(&self) -> Result<(), InjectionError> {
        self.synth.tap(VirtualKey::MEDIA_PLAY_PAUSE)
    }
}
