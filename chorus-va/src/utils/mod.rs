//! Utility modules for chorus-va

pub mod audio_decoder;
pub mod db_retry;
pub mod resample;

pub use audio_decoder::{decode_audio_file, DecodedAudio};
pub use db_retry::{retry_on_lock, DEFAULT_MAX_LOCK_WAIT_MS};
pub use resample::resample_mono;
