//! Register data model
//!
//! Descriptors are deserialized from register files whose field names follow
//! the established file format (`type`, `register`, `write`, `data`, `min`,
//! `max`, `class`, ...). The more descriptive names (`kind`, `address`,
//! `writable`, `encoding`, `resolver`) are accepted as aliases.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};

use crate::codec;
use crate::error::{BridgeError, BridgeResult};

// ============================================================================
// Register Kind
// ============================================================================

/// Register address space.
///
/// The numeric codes (1, 2, 3) are the ones used by register files and by the
/// text encoding of [`RegisterId`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "KindRepr", into = "u8")]
pub enum RegisterKind {
    /// Read/write holding register (FC03 / FC06)
    Holding,
    /// Read-only input register (FC04)
    Input,
    /// Virtual register computed by a resolver strategy
    Custom,
}

impl RegisterKind {
    /// Numeric code used in register files and identifiers.
    pub fn code(self) -> u8 {
        match self {
            Self::Holding => 1,
            Self::Input => 2,
            Self::Custom => 3,
        }
    }

    /// Look up a kind by numeric code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::Holding),
            2 => Some(Self::Input),
            3 => Some(Self::Custom),
            _ => None,
        }
    }

    /// Whether the kind addresses a register on the bus.
    #[inline]
    pub fn is_physical(self) -> bool {
        !matches!(self, Self::Custom)
    }
}

impl fmt::Display for RegisterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Holding => write!(f, "holding"),
            Self::Input => write!(f, "input"),
            Self::Custom => write!(f, "custom"),
        }
    }
}

impl FromStr for RegisterKind {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(code) = s.parse::<u8>() {
            return Self::from_code(code)
                .ok_or_else(|| BridgeError::config(format!("Unknown register type code: {}", code)));
        }
        match s.to_lowercase().as_str() {
            "holding" => Ok(Self::Holding),
            "input" => Ok(Self::Input),
            "custom" => Ok(Self::Custom),
            other => Err(BridgeError::config(format!("Unknown register type: {}", other))),
        }
    }
}

impl From<RegisterKind> for u8 {
    fn from(kind: RegisterKind) -> Self {
        kind.code()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum KindRepr {
    Code(u8),
    Name(String),
}

impl TryFrom<KindRepr> for RegisterKind {
    type Error = BridgeError;

    fn try_from(repr: KindRepr) -> Result<Self, Self::Error> {
        match repr {
            KindRepr::Code(code) => Self::from_code(code)
                .ok_or_else(|| BridgeError::config(format!("Unknown register type code: {}", code))),
            KindRepr::Name(name) => name.parse(),
        }
    }
}

// ============================================================================
// Encoding
// ============================================================================

/// Wire encoding of a single 16-bit register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Encoding {
    /// Unsigned word
    #[default]
    Uint16,
    /// Two's-complement signed word
    Int16,
}

impl Encoding {
    /// Canonical name used in register files.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Uint16 => "uint16",
            Self::Int16 => "int16",
        }
    }
}

impl FromStr for Encoding {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "uint16" | "u16" | "word" => Ok(Self::Uint16),
            "int16" | "i16" | "short" => Ok(Self::Int16),
            other => Err(BridgeError::config(format!("Unsupported data type: {}", other))),
        }
    }
}

impl TryFrom<String> for Encoding {
    type Error = BridgeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Encoding> for String {
    fn from(encoding: Encoding) -> Self {
        encoding.as_str().to_string()
    }
}

// ============================================================================
// Descriptors
// ============================================================================

fn default_scaling() -> f64 {
    1.0
}

/// Typed description of one accessible register.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterDescriptor {
    #[serde(rename = "type", alias = "kind")]
    pub kind: RegisterKind,
    #[serde(rename = "register", alias = "address")]
    pub address: u16,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "write", alias = "writable", default)]
    pub writable: bool,
    #[serde(rename = "data", alias = "encoding", default)]
    pub encoding: Encoding,
    /// Lowest accepted engineering value
    #[serde(rename = "min", alias = "minimum", default)]
    pub minimum: Option<f64>,
    /// Highest accepted engineering value
    #[serde(rename = "max", alias = "maximum", default)]
    pub maximum: Option<f64>,
    /// raw = engineering × scaling
    #[serde(default = "default_scaling")]
    pub scaling: f64,
    /// Added to the decoded raw value before the scaling division
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<f64>,
    #[serde(default)]
    pub unit: String,
    /// Resolver strategy name for custom registers
    #[serde(rename = "class", alias = "resolver", default, skip_serializing_if = "Option::is_none")]
    pub resolver: Option<String>,
    /// Strategy-specific options
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<serde_json::Value>,
}

impl RegisterDescriptor {
    /// Minimal descriptor with unit scaling; mostly useful for tests and tooling.
    pub fn new(kind: RegisterKind, address: u16, description: impl Into<String>) -> Self {
        Self {
            kind,
            address,
            description: description.into(),
            writable: false,
            encoding: Encoding::Uint16,
            minimum: None,
            maximum: None,
            scaling: 1.0,
            offset: None,
            unit: String::new(),
            resolver: None,
            options: None,
        }
    }

    /// Mark the descriptor writable.
    pub fn writable(mut self) -> Self {
        self.writable = true;
        self
    }

    /// Set the wire encoding.
    pub fn with_encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// Set the scaling factor.
    pub fn with_scaling(mut self, scaling: f64) -> Self {
        self.scaling = scaling;
        self
    }

    /// Set the raw offset.
    pub fn with_offset(mut self, offset: f64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Set the accepted engineering range.
    pub fn with_range(mut self, minimum: f64, maximum: f64) -> Self {
        self.minimum = Some(minimum);
        self.maximum = Some(maximum);
        self
    }

    /// Set the unit label.
    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = unit.into();
        self
    }

    /// Attach a resolver strategy and its options.
    pub fn with_resolver(mut self, name: impl Into<String>, options: serde_json::Value) -> Self {
        self.resolver = Some(name.into());
        self.options = Some(options);
        self
    }

    /// Identifier of this descriptor within `profile`.
    pub fn id(&self, profile: &str) -> RegisterId {
        RegisterId::new(profile, self.kind, self.address)
    }
}

/// Reference from a resolver option to a physical register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegisterRef {
    #[serde(rename = "type", alias = "kind")]
    pub kind: RegisterKind,
    #[serde(rename = "register", alias = "address")]
    pub address: u16,
}

// ============================================================================
// Identifiers
// ============================================================================

/// Identity of a register across all profiles.
///
/// The text form is `<profile>-<kind code>-<address>`, e.g. `primary-1-20`.
/// Profile names may contain `-`; the last two segments are always kind and
/// address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegisterId {
    pub profile: String,
    pub kind: RegisterKind,
    pub address: u16,
}

impl RegisterId {
    pub fn new(profile: impl Into<String>, kind: RegisterKind, address: u16) -> Self {
        Self {
            profile: profile.into(),
            kind,
            address,
        }
    }
}

impl fmt::Display for RegisterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.profile, self.kind.code(), self.address)
    }
}

impl FromStr for RegisterId {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.rsplitn(3, '-');
        let (Some(address), Some(kind), Some(profile)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(BridgeError::config(format!("Malformed register id: {}", s)));
        };
        if profile.is_empty() {
            return Err(BridgeError::config(format!("Missing profile in register id: {}", s)));
        }
        let address = address
            .parse::<u16>()
            .map_err(|e| BridgeError::config(format!("Invalid address in register id {}: {}", s, e)))?;
        Ok(Self::new(profile, kind.parse()?, address))
    }
}

impl Serialize for RegisterId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

// ============================================================================
// Readings
// ============================================================================

/// One register value produced by a poll cycle, in engineering units.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reading {
    pub profile: String,
    pub kind: RegisterKind,
    pub address: u16,
    pub description: String,
    pub value: f64,
    pub unit: String,
    pub read_at: DateTime<Utc>,
}

impl Reading {
    /// Build a reading for `descriptor` with an engineering `value`.
    pub fn new(profile: &str, descriptor: &RegisterDescriptor, value: f64) -> Self {
        Self {
            profile: profile.to_string(),
            kind: descriptor.kind,
            address: descriptor.address,
            description: descriptor.description.clone(),
            value,
            unit: descriptor.unit.clone(),
            read_at: Utc::now(),
        }
    }

    /// Build a reading from a raw bus word.
    pub fn from_raw(profile: &str, descriptor: &RegisterDescriptor, raw: u16) -> Self {
        Self::new(profile, descriptor, codec::decode_raw(descriptor, raw))
    }

    pub fn id(&self) -> RegisterId {
        RegisterId::new(self.profile.clone(), self.kind, self.address)
    }
}

/// Immutable set of readings from one poll cycle, indexed by register id.
#[derive(Debug, Clone, Default)]
pub struct ReadingSet {
    readings: Vec<Reading>,
    index: HashMap<RegisterId, usize>,
}

impl ReadingSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a reading, replacing an earlier one with the same id.
    pub fn push(&mut self, reading: Reading) {
        let id = reading.id();
        match self.index.get(&id) {
            Some(&slot) => self.readings[slot] = reading,
            None => {
                self.index.insert(id, self.readings.len());
                self.readings.push(reading);
            }
        }
    }

    pub fn get(&self, id: &RegisterId) -> Option<&Reading> {
        self.index.get(id).map(|&slot| &self.readings[slot])
    }

    /// Engineering value of a register, if it was read this cycle.
    pub fn value(&self, profile: &str, kind: RegisterKind, address: u16) -> Option<f64> {
        self.get(&RegisterId::new(profile, kind, address))
            .map(|reading| reading.value)
    }

    pub fn readings(&self) -> &[Reading] {
        &self.readings
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Reading> {
        self.readings.iter()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.readings.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }
}

impl FromIterator<Reading> for ReadingSet {
    fn from_iter<I: IntoIterator<Item = Reading>>(iter: I) -> Self {
        let mut set = Self::new();
        for reading in iter {
            set.push(reading);
        }
        set
    }
}

impl Extend<Reading> for ReadingSet {
    fn extend<I: IntoIterator<Item = Reading>>(&mut self, iter: I) {
        for reading in iter {
            self.push(reading);
        }
    }
}

impl<'a> IntoIterator for &'a ReadingSet {
    type Item = &'a Reading;
    type IntoIter = std::slice::Iter<'a, Reading>;

    fn into_iter(self) -> Self::IntoIter {
        self.readings.iter()
    }
}

impl Serialize for ReadingSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.readings.serialize(serializer)
    }
}

// ============================================================================
// Writes
// ============================================================================

/// A requested engineering value for one register.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteCommand {
    pub profile: String,
    pub target: RegisterDescriptor,
    pub value: f64,
}

/// A write ready for the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawWrite {
    pub address: u16,
    pub value: u16,
}

impl WriteCommand {
    pub fn new(profile: impl Into<String>, target: RegisterDescriptor, value: f64) -> Self {
        Self {
            profile: profile.into(),
            target,
            value,
        }
    }

    pub fn id(&self) -> RegisterId {
        self.target.id(&self.profile)
    }

    /// Validate the command and encode it for the bus.
    ///
    /// Fails without touching the bus when the register is not writable, is an
    /// input register, is virtual, or cannot hold the value.
    pub fn to_raw(&self) -> BridgeResult<RawWrite> {
        let register = self.id().to_string();
        match self.target.kind {
            RegisterKind::Custom => {
                return Err(BridgeError::config(format!(
                    "Virtual register {} must be decomposed before writing",
                    register
                )))
            }
            RegisterKind::Input => return Err(BridgeError::write_disallowed(register)),
            RegisterKind::Holding => {}
        }
        if !self.target.writable {
            return Err(BridgeError::write_disallowed(register));
        }
        check_range(&self.target, &register, self.value)?;
        let value = codec::encode_engineering(&self.target, self.value).ok_or_else(|| {
            BridgeError::out_of_range(
                register,
                self.value,
                format!("raw value does not fit {}", self.target.encoding.as_str()),
            )
        })?;
        Ok(RawWrite {
            address: self.target.address,
            value,
        })
    }
}

/// Check `value` against the descriptor's engineering range.
pub(crate) fn check_range(descriptor: &RegisterDescriptor, register: &str, value: f64) -> BridgeResult<()> {
    if !value.is_finite() {
        return Err(BridgeError::out_of_range(register, value, "value is not finite"));
    }
    if let Some(min) = descriptor.minimum {
        if value < min {
            return Err(BridgeError::out_of_range(register, value, format!("below minimum {}", min)));
        }
    }
    if let Some(max) = descriptor.maximum {
        if value > max {
            return Err(BridgeError::out_of_range(register, value, format!("above maximum {}", max)));
        }
    }
    Ok(())
}
