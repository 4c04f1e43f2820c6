//! Accurate Pitch Integration
//!
//! The high-quality pitch unit lives outside this crate. Hosts hand in an
//! [`AccuratePitchLoader`]; the module it yields is loaded at most once per
//! [`AccuratePitchProvider`] and then asked for one unit per effect chain.
//! Failures never propagate into the graph: the stage is skipped or
//! bypassed and the chain's failure counter goes up.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::engine::AudioBuffer;
use crate::error::Result;
use crate::graph::{AudioNode, NodeKind};
use crate::impl_node_common;

/// Display name used in errors and logs
pub const UNIT_NAME: &str = "accurate pitch";

/// One processing instance of the external unit
pub trait AccuratePitchUnit: Send {
    fn set_semitones(&mut self, semitones: f32);

    /// Shift one block. An error bypasses the unit for that block.
    fn process(&mut self, input: &AudioBuffer, output: &mut AudioBuffer) -> Result<()>;

    fn reset(&mut self) {}
}

/// A loaded module able to create units
pub trait AccuratePitchModule: Send + Sync {
    fn create_unit(&self, sample_rate: u32) -> Result<Box<dyn AccuratePitchUnit>>;
}

/// Loads the module on first use
pub trait AccuratePitchLoader: Send + Sync {
    fn load(&self) -> Result<Arc<dyn AccuratePitchModule>>;
}

/// Loader for hosts without an accurate unit; always fails
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableLoader;

impl AccuratePitchLoader for UnavailableLoader {
    fn load(&self) -> Result<Arc<dyn AccuratePitchModule>> {
        Err(crate::error::TabFxError::UnitLoad {
            unit: UNIT_NAME.to_string(),
            reason: "no accurate pitch module installed".to_string(),
        })
    }
}

/// Lazily loaded module shared by every chain
#[derive(Clone)]
pub struct AccuratePitchProvider {
    loader: Arc<dyn AccuratePitchLoader>,
    module: Arc<Mutex<Option<Arc<dyn AccuratePitchModule>>>>,
}

impl AccuratePitchProvider {
    pub fn new(loader: Arc<dyn AccuratePitchLoader>) -> Self {
        Self {
            loader,
            module: Arc::new(Mutex::new(None)),
        }
    }

    /// Provider whose every acquisition fails
    pub fn unavailable() -> Self {
        Self::new(Arc::new(UnavailableLoader))
    }

    pub fn is_loaded(&self) -> bool {
        self.module.lock().is_some()
    }

    /// Create a unit, loading the module first if this is the first request
    ///
    /// A failed load is not remembered; the next call tries again.
    pub fn acquire(&self, sample_rate: u32) -> Result<Box<dyn AccuratePitchUnit>> {
        let module = {
            let mut slot = self.module.lock();
            match slot.as_ref() {
                Some(module) => Arc::clone(module),
                None => {
                    let module = self.loader.load()?;
                    info!(unit = UNIT_NAME, "Loaded pitch module");
                    *slot = Some(Arc::clone(&module));
                    module
                }
            }
        };
        module.create_unit(sample_rate)
    }
}

impl std::fmt::Debug for AccuratePitchProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccuratePitchProvider")
            .field("loaded", &self.is_loaded())
            .finish()
    }
}

/// Graph stage wrapping one external unit
pub struct AccuratePitchNode {
    unit: Box<dyn AccuratePitchUnit>,
    semitone: f32,
    /// Shared with the owning chain
    failures: Arc<AtomicU32>,
    failure_limit: u32,
}

impl AccuratePitchNode {
    pub fn new(
        mut unit: Box<dyn AccuratePitchUnit>,
        semitone: f32,
        failures: Arc<AtomicU32>,
        failure_limit: u32,
    ) -> Self {
        unit.set_semitones(semitone);
        Self {
            unit,
            semitone,
            failures,
            failure_limit,
        }
    }

    pub fn set_semitone(&mut self, semitone: f32) {
        if semitone != self.semitone {
            self.semitone = semitone;
            self.unit.set_semitones(semitone);
        }
    }

    pub fn semitone(&self) -> f32 {
        self.semitone
    }

    fn is_disabled(&self) -> bool {
        self.failures.load(Ordering::Relaxed) >= self.failure_limit
    }
}

impl AudioNode for AccuratePitchNode {
    impl_node_common!(NodeKind::AccuratePitch);

    fn process(&mut self, inputs: &[AudioBuffer], outputs: &mut [AudioBuffer]) {
        let input = &inputs[0];
        let output = &mut outputs[0];

        if self.is_disabled() {
            output.copy_from(input);
            return;
        }

        if self.unit.process(input, output).is_err() {
            self.failures.fetch_add(1, Ordering::Relaxed);
            output.copy_from(input);
        }
    }

    fn reset(&mut self) {
        self.unit.reset();
    }
}

/// Log a failed acquisition and count it
pub(crate) fn record_failure(failures: &AtomicU32, error: &crate::error::TabFxError) -> u32 {
    let count = failures.fetch_add(1, Ordering::Relaxed) + 1;
    warn!(unit = UNIT_NAME, failures = count, error = %error, "Pitch unit unavailable");
    count
}
