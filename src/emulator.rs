//! Front-end emulator.
//!
//! Produces fragment buffers the way a readout board would, with optional
//! damage so the builder's corruption and duplicate paths can be exercised
//! end to end.

use bytes::Bytes;
use evb_format::{EventTag, Fragment};
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};

/// Bunch crossings per orbit; emulated BCIDs wrap here.
pub const BUNCHES_PER_ORBIT: u64 = 3564;

/// Emulated source settings.
#[derive(Debug, Clone)]
pub struct EmulatorConfig {
    /// Source id written into every fragment
    pub source_id: u32,
    /// Class of the emitted fragments
    pub tag: EventTag,
    /// First upstream event id
    pub first_event_id: u64,
    /// Smallest payload, in bytes
    pub min_payload: usize,
    /// Largest payload, in bytes
    pub max_payload: usize,
    /// Fraction of buffers truncated so they fail to decode
    pub corrupt_fraction: f64,
    /// Fraction of fragments that repeat the previous event id
    pub duplicate_fraction: f64,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            source_id: 0,
            tag: EventTag::Physics,
            first_event_id: 1,
            min_payload: 16,
            max_payload: 256,
            corrupt_fraction: 0.0,
            duplicate_fraction: 0.0,
        }
    }
}

/// One emulated readout source.
#[derive(Debug)]
pub struct FrontEndEmulator<R = StdRng> {
    config: EmulatorConfig,
    next_event_id: u64,
    rng: R,
}

impl FrontEndEmulator<StdRng> {
    /// Emulator seeded from the OS.
    pub fn new(config: EmulatorConfig) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }

    /// Reproducible emulator.
    pub fn with_seed(config: EmulatorConfig, seed: u64) -> Self {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }
}

impl<R: RngCore> FrontEndEmulator<R> {
    /// Emulator drawing from `rng`.
    pub fn with_rng(mut config: EmulatorConfig, rng: R) -> Self {
        config.corrupt_fraction = config.corrupt_fraction.clamp(0.0, 1.0);
        config.duplicate_fraction = config.duplicate_fraction.clamp(0.0, 1.0);
        if config.min_payload > config.max_payload {
            std::mem::swap(&mut config.min_payload, &mut config.max_payload);
        }
        Self {
            next_event_id: config.first_event_id,
            config,
            rng,
        }
    }

    /// Id the next fresh fragment will carry.
    pub fn next_event_id(&self) -> u64 {
        self.next_event_id
    }

    /// BCID an emulated source reports for `event_id`.
    ///
    /// Derived from the id alone so independent sources agree.
    pub fn bc_id_for(event_id: u64) -> u16 {
        (event_id.wrapping_mul(7) % BUNCHES_PER_ORBIT) as u16
    }

    /// Next fragment, before any damage.
    pub fn next_fragment(&mut self, now_micros: u64) -> Fragment {
        let repeat = self.next_event_id > self.config.first_event_id
            && self.rng.gen_bool(self.config.duplicate_fraction);
        let event_id = if repeat {
            self.next_event_id - 1
        } else {
            let id = self.next_event_id;
            self.next_event_id += 1;
            id
        };

        let len = self
            .rng
            .gen_range(self.config.min_payload..=self.config.max_payload);
        let mut payload = vec![0u8; len];
        self.rng.fill_bytes(&mut payload);

        Fragment::new(
            self.config.tag.as_u8(),
            self.config.source_id,
            event_id,
            Self::bc_id_for(event_id),
            payload,
        )
        .with_trigger_bits(1)
        .with_timestamp(now_micros)
    }

    /// Next wire buffer, possibly truncated.
    pub fn next_buffer(&mut self, now_micros: u64) -> Bytes {
        let raw = self.next_fragment(now_micros).to_bytes();
        if self.rng.gen_bool(self.config.corrupt_fraction) {
            let cut = self.rng.gen_range(1..=raw.len().min(8));
            return raw.slice(..raw.len() - cut);
        }
        raw
    }
}
