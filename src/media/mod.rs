//! Local media: tracks, streams, device acquisition and audio mixing

pub mod devices;
pub mod mixer;
pub mod track;

pub use devices::{DisplayConstraints, MediaConstraints, MediaDevices};
pub use mixer::{AudioMixer, AudioMixerFactory, MixingGraph, MixingGraphFactory};
pub use track::{MediaStream, MediaTrack, TrackKind, TrackState};
