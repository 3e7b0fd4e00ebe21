//! Audio I/O and resampling utilities for the classifier CLI and tests.
//!
//! These helpers keep audio handling separate from the model itself: decoding
//! files into waveforms, downmixing to mono and converting sample rates.

pub mod io;
pub mod resample;
