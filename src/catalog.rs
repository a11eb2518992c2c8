//! # Register Catalog
//!
//! Device profiles and their register descriptors. A profile is loaded once at
//! startup from a JSON register file and is immutable afterwards.
//!
//! ## Register File
//!
//! ```json
//! [
//!   { "type": 2, "register": 41, "description": "Outdoor temperature",
//!     "write": false, "data": "int16", "min": -40, "max": 60,
//!     "scaling": 10, "unit": "°C" },
//!   { "type": 3, "register": 1, "description": "Panel temperature",
//!     "write": true, "data": "int16", "min": 15, "max": 28, "scaling": 1,
//!     "unit": "°C", "class": "TempPanelRegister",
//!     "options": { "middle": { "type": 1, "register": 70 },
//!                  "offset": { "type": 1, "register": 71 } } }
//! ]
//! ```
//!
//! Loading fails with [`BridgeError::Config`] when the file is missing,
//! unreadable or malformed, when a scaling factor is zero, when a
//! `(kind, address)` pair appears twice, or when a custom register has no
//! resolver class.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

use tracing::info;

use crate::error::{BridgeError, BridgeResult};
use crate::register::{RegisterDescriptor, RegisterId, RegisterKind};

/// Named collection of register descriptors sharing the bus.
#[derive(Debug, Clone)]
pub struct DeviceProfile {
    name: String,
    registers: Vec<RegisterDescriptor>,
    index: HashMap<(RegisterKind, u16), usize>,
}

impl DeviceProfile {
    /// Build a validated profile.
    pub fn new(name: impl Into<String>, registers: Vec<RegisterDescriptor>) -> BridgeResult<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(BridgeError::config("Profile name must not be empty"));
        }

        let mut index = HashMap::with_capacity(registers.len());
        for (slot, descriptor) in registers.iter().enumerate() {
            validate_descriptor(&name, descriptor)?;
            if index.insert((descriptor.kind, descriptor.address), slot).is_some() {
                return Err(BridgeError::config(format!(
                    "Duplicate register {} in profile {}",
                    descriptor.id(&name),
                    name
                )));
            }
        }

        Ok(Self {
            name,
            registers,
            index,
        })
    }

    /// Parse a profile from the JSON register file format.
    pub fn from_json_str(name: impl Into<String>, json: &str) -> BridgeResult<Self> {
        let name = name.into();
        let registers: Vec<RegisterDescriptor> = serde_json::from_str(json)
            .map_err(|e| BridgeError::config(format!("Malformed register file for {}: {}", name, e)))?;
        Self::new(name, registers)
    }

    /// Load a profile from a JSON register file.
    pub fn load(name: impl Into<String>, path: impl AsRef<Path>) -> BridgeResult<Self> {
        let name = name.into();
        let path = path.as_ref();
        let json = fs::read_to_string(path).map_err(|e| {
            BridgeError::config(format!("Failed to read register file {}: {}", path.display(), e))
        })?;
        let profile = Self::from_json_str(name, &json)?;
        info!(
            profile = %profile.name,
            registers = profile.registers.len(),
            path = %path.display(),
            "loaded register file"
        );
        Ok(profile)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// All descriptors in declaration order.
    pub fn registers(&self) -> &[RegisterDescriptor] {
        &self.registers
    }

    pub fn find(&self, kind: RegisterKind, address: u16) -> Option<&RegisterDescriptor> {
        self.index.get(&(kind, address)).map(|&slot| &self.registers[slot])
    }

    /// Descriptors that live on the bus.
    pub fn physical(&self) -> impl Iterator<Item = &RegisterDescriptor> {
        self.registers.iter().filter(|d| d.kind.is_physical())
    }

    /// Virtual descriptors resolved by a strategy.
    pub fn custom(&self) -> impl Iterator<Item = &RegisterDescriptor> {
        self.registers.iter().filter(|d| !d.kind.is_physical())
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.registers.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.registers.is_empty()
    }
}

fn validate_descriptor(profile: &str, descriptor: &RegisterDescriptor) -> BridgeResult<()> {
    let id = descriptor.id(profile);
    if descriptor.scaling == 0.0 || !descriptor.scaling.is_finite() {
        return Err(BridgeError::config(format!(
            "Register {} has invalid scaling {}",
            id, descriptor.scaling
        )));
    }
    if let Some(offset) = descriptor.offset {
        if !offset.is_finite() {
            return Err(BridgeError::config(format!("Register {} has invalid offset", id)));
        }
    }
    if let (Some(min), Some(max)) = (descriptor.minimum, descriptor.maximum) {
        if min > max {
            return Err(BridgeError::config(format!(
                "Register {} has minimum {} above maximum {}",
                id, min, max
            )));
        }
    }
    if descriptor.kind == RegisterKind::Custom && descriptor.resolver.is_none() {
        return Err(BridgeError::config(format!(
            "Custom register {} has no resolver class",
            id
        )));
    }
    Ok(())
}

/// All device profiles sharing the bus.
#[derive(Debug, Clone, Default)]
pub struct RegisterCatalog {
    profiles: Vec<DeviceProfile>,
}

impl RegisterCatalog {
    /// Build a catalog; profile names must be unique.
    pub fn new(profiles: Vec<DeviceProfile>) -> BridgeResult<Self> {
        let mut names = HashSet::with_capacity(profiles.len());
        for profile in &profiles {
            if !names.insert(profile.name()) {
                return Err(BridgeError::config(format!(
                    "Duplicate profile name: {}",
                    profile.name()
                )));
            }
        }
        Ok(Self { profiles })
    }

    /// Load one profile per `(name, path)` pair.
    pub fn load<I, N, P>(sources: I) -> BridgeResult<Self>
    where
        I: IntoIterator<Item = (N, P)>,
        N: Into<String>,
        P: AsRef<Path>,
    {
        let profiles = sources
            .into_iter()
            .map(|(name, path)| DeviceProfile::load(name, path))
            .collect::<BridgeResult<Vec<_>>>()?;
        Self::new(profiles)
    }

    pub fn profiles(&self) -> &[DeviceProfile] {
        &self.profiles
    }

    pub fn profile(&self, name: &str) -> Option<&DeviceProfile> {
        self.profiles.iter().find(|p| p.name() == name)
    }

    /// Resolve an identifier to its descriptor.
    pub fn find(&self, id: &RegisterId) -> Option<&RegisterDescriptor> {
        self.profile(&id.profile)?.find(id.kind, id.address)
    }

    /// Total number of descriptors across profiles.
    pub fn len(&self) -> usize {
        self.profiles.iter().map(DeviceProfile::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
