//! # Derived Registers
//!
//! Custom registers have no bus address. Their value is computed from other
//! physical registers of the same profile, and a write to them is decomposed
//! into writes to those registers. The computation is delegated to a strategy
//! selected by the descriptor's `class` name through a [`ResolverRegistry`].
//!
//! ## Paired offset/middle strategy
//!
//! Registered as `TempPanelRegister`. The descriptor options reference two
//! holding registers:
//!
//! ```json
//! { "middle": { "type": 1, "register": 70 }, "offset": { "type": 1, "register": 71 } }
//! ```
//!
//! - value = middle + offset, where a missing reading counts as 0
//! - a write moves the sum to the target in unit steps, spending the
//!   offset's range (`min`/`max` of the offset register, ±3 when unset)
//!   before touching the middle register

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::Deserialize;
use tracing::debug;

use crate::catalog::DeviceProfile;
use crate::constants::{DEFAULT_OFFSET_MAX, DEFAULT_OFFSET_MIN, MAX_DECOMPOSE_STEPS, STEP_TOLERANCE};
use crate::error::{BridgeError, BridgeResult};
use crate::register::{ReadingSet, RegisterDescriptor, RegisterRef, WriteCommand};

/// Name under which [`PairedOffsetResolver`] is registered.
pub const PAIRED_OFFSET_CLASS: &str = "TempPanelRegister";

/// State a strategy may consult: the profile the custom register belongs to
/// and the most recent readings.
#[derive(Debug, Clone, Copy)]
pub struct ResolveContext<'a> {
    pub profile: &'a DeviceProfile,
    pub readings: &'a ReadingSet,
}

impl<'a> ResolveContext<'a> {
    pub fn new(profile: &'a DeviceProfile, readings: &'a ReadingSet) -> Self {
        Self { profile, readings }
    }

    /// Latest value of a referenced register, 0 when it was not read.
    pub fn value_or_zero(&self, reference: RegisterRef) -> f64 {
        self.readings
            .value(self.profile.name(), reference.kind, reference.address)
            .unwrap_or(0.0)
    }

    /// Descriptor of a referenced register.
    pub fn descriptor(&self, reference: RegisterRef) -> Option<&'a RegisterDescriptor> {
        self.profile.find(reference.kind, reference.address)
    }
}

/// Strategy computing and decomposing one family of custom registers.
pub trait DerivedRegister: Send + Sync + fmt::Debug {
    /// Check the descriptor's options without computing anything.
    fn validate(&self, descriptor: &RegisterDescriptor) -> BridgeResult<()>;

    /// Engineering value of `descriptor` given the current readings.
    fn compute_value(&self, descriptor: &RegisterDescriptor, ctx: &ResolveContext<'_>) -> BridgeResult<f64>;

    /// Physical writes that bring `descriptor` to `target`.
    fn decompose_write(
        &self,
        descriptor: &RegisterDescriptor,
        target: f64,
        ctx: &ResolveContext<'_>,
    ) -> BridgeResult<Vec<WriteCommand>>;
}

type ResolverFactory = Box<dyn Fn() -> Arc<dyn DerivedRegister> + Send + Sync>;

/// Strategy constructors keyed by class name.
pub struct ResolverRegistry {
    factories: HashMap<String, ResolverFactory>,
}

impl ResolverRegistry {
    /// Registry without any strategy.
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registry holding the built-in strategies.
    pub fn with_builtin() -> Self {
        let mut registry = Self::empty();
        registry.register(PAIRED_OFFSET_CLASS, || Arc::new(PairedOffsetResolver::new()));
        registry
    }

    /// Register a strategy, replacing any previous one with the same name.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Arc<dyn DerivedRegister> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Box::new(factory));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Instantiate the strategy registered under `name`.
    pub fn create(&self, name: &str) -> BridgeResult<Arc<dyn DerivedRegister>> {
        self.factories
            .get(name)
            .map(|factory| factory())
            .ok_or_else(|| BridgeError::config(format!("Unknown resolver class: {}", name)))
    }
}

impl Default for ResolverRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}

impl fmt::Debug for ResolverRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.factories.keys().collect();
        names.sort();
        f.debug_struct("ResolverRegistry").field("classes", &names).finish()
    }
}

// ============================================================================
// Paired offset/middle strategy
// ============================================================================

#[derive(Debug, Deserialize)]
struct PairedOptions {
    middle: Option<RegisterRef>,
    offset: Option<RegisterRef>,
}

/// Custom register whose value is the sum of a coarse `middle` setpoint and a
/// bounded `offset` trim.
#[derive(Debug, Default)]
pub struct PairedOffsetResolver;

impl PairedOffsetResolver {
    pub fn new() -> Self {
        Self
    }

    fn references(descriptor: &RegisterDescriptor) -> BridgeResult<(RegisterRef, RegisterRef)> {
        let options = descriptor.options.as_ref().ok_or_else(|| {
            BridgeError::config(format!(
                "Register {} has no middle/offset options",
                descriptor.address
            ))
        })?;
        let parsed: PairedOptions = serde_json::from_value(options.clone()).map_err(|e| {
            BridgeError::config(format!(
                "Register {} has malformed middle/offset options: {}",
                descriptor.address, e
            ))
        })?;
        match (parsed.middle, parsed.offset) {
            (Some(middle), Some(offset)) => Ok((middle, offset)),
            (None, _) => Err(BridgeError::config(format!(
                "Register {} is missing the middle reference",
                descriptor.address
            ))),
            (_, None) => Err(BridgeError::config(format!(
                "Register {} is missing the offset reference",
                descriptor.address
            ))),
        }
    }
}

impl DerivedRegister for PairedOffsetResolver {
    fn validate(&self, descriptor: &RegisterDescriptor) -> BridgeResult<()> {
        Self::references(descriptor).map(|_| ())
    }

    fn compute_value(&self, descriptor: &RegisterDescriptor, ctx: &ResolveContext<'_>) -> BridgeResult<f64> {
        let (middle, offset) = Self::references(descriptor)?;
        Ok(ctx.value_or_zero(middle) + ctx.value_or_zero(offset))
    }

    fn decompose_write(
        &self,
        descriptor: &RegisterDescriptor,
        target: f64,
        ctx: &ResolveContext<'_>,
    ) -> BridgeResult<Vec<WriteCommand>> {
        let (middle_ref, offset_ref) = Self::references(descriptor)?;
        let register = descriptor.id(ctx.profile.name()).to_string();
        let lookup = |reference: RegisterRef, role: &str| {
            ctx.descriptor(reference).ok_or_else(|| {
                BridgeError::config(format!(
                    "{} register {}-{} of {} is not in profile {}",
                    role,
                    reference.kind.code(),
                    reference.address,
                    register,
                    ctx.profile.name()
                ))
            })
        };
        let middle_desc = lookup(middle_ref, "Middle")?;
        let offset_desc = lookup(offset_ref, "Offset")?;

        let offset_min = offset_desc.minimum.unwrap_or(DEFAULT_OFFSET_MIN);
        let offset_max = offset_desc.maximum.unwrap_or(DEFAULT_OFFSET_MAX);

        let mut middle = ctx.value_or_zero(middle_ref);
        let mut offset = ctx.value_or_zero(offset_ref);

        let gap = target - (middle + offset);
        let steps = gap.round();
        if !gap.is_finite() || (gap - steps).abs() > STEP_TOLERANCE {
            return Err(BridgeError::unreachable_target(
                register,
                target,
                format!("{} is not a whole number of unit steps from {}", target, middle + offset),
            ));
        }
        if steps.abs() > f64::from(MAX_DECOMPOSE_STEPS) {
            return Err(BridgeError::unreachable_target(
                register,
                target,
                format!("more than {} unit steps required", MAX_DECOMPOSE_STEPS),
            ));
        }

        let upward = steps > 0.0;
        for _ in 0..(steps.abs() as u32) {
            if upward {
                if offset < offset_max {
                    offset += 1.0;
                } else {
                    middle += 1.0;
                }
            } else if offset > offset_min {
                offset -= 1.0;
            } else {
                middle -= 1.0;
            }
        }

        debug!(%register, target, middle, offset, "decomposed derived write");
        Ok(vec![
            WriteCommand::new(ctx.profile.name(), middle_desc.clone(), middle),
            WriteCommand::new(ctx.profile.name(), offset_desc.clone(), offset),
        ])
    }
}
