//! Topic metadata and value validation.
//!
//! Every typed topic carries a [`Metadata`] describing its value type, default,
//! permitted options and behavioral flags. [`Metadata::validate`] converts and
//! range-checks an incoming value before it may become the retained value.

use std::{fmt, str::FromStr};

use bitflags::bitflags;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use treebus_error::{MetadataError, ValidationError};

use crate::value::{self, Value};

/// Tokens that invert the current value of a `bool` topic.
pub const TOGGLE_TOKENS: [&str; 3] = ["!", "~", "__toggle__"];

const TRUTHY: [&str; 7] = ["1", "yes", "on", "enable", "enabled", "true", "active"];
const FALSY: [&str; 8] = ["0", "no", "off", "disable", "disabled", "false", "inactive", ""];

/// Value type tag of a topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DType {
    /// Any value, stored as given.
    Obj,
    Str,
    Bytes,
    Bin,
    Float,
    F32,
    F64,
    /// Any integer that fits in 64 bits.
    Int,
    U8,
    U16,
    U32,
    U64,
    I8,
    I16,
    I32,
    I64,
    Bool,
    Font,
    /// Normalized to `#aarrggbb`.
    Color,
    /// Event topics that carry no value.
    None,
    /// Pure hierarchy node; publishing a value is rejected.
    Node,
    /// Ordered list of distinct strings.
    UniqueStrings,
}

impl DType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Obj => "obj",
            Self::Str => "str",
            Self::Bytes => "bytes",
            Self::Bin => "bin",
            Self::Float => "float",
            Self::F32 => "f32",
            Self::F64 => "f64",
            Self::Int => "int",
            Self::U8 => "u8",
            Self::U16 => "u16",
            Self::U32 => "u32",
            Self::U64 => "u64",
            Self::I8 => "i8",
            Self::I16 => "i16",
            Self::I32 => "i32",
            Self::I64 => "i64",
            Self::Bool => "bool",
            Self::Font => "font",
            Self::Color => "color",
            Self::None => "none",
            Self::Node => "node",
            Self::UniqueStrings => "unique_strings",
        }
    }

    /// Half-open `[min, max)` bounds of the sized integer types.
    pub fn int_bounds(self) -> Option<(i128, i128)> {
        let bounds = match self {
            Self::U8 => (0, 1 << 8),
            Self::U16 => (0, 1 << 16),
            Self::U32 => (0, 1 << 32),
            Self::U64 => (0, 1 << 64),
            Self::I8 => (-(1 << 7), 1 << 7),
            Self::I16 => (-(1 << 15), 1 << 15),
            Self::I32 => (-(1 << 31), 1 << 31),
            Self::I64 => (-(1 << 63), 1 << 63),
            _ => return Option::None,
        };
        Some(bounds)
    }

    pub fn is_integer(self) -> bool {
        self == Self::Int || self.int_bounds().is_some()
    }

    pub fn is_float(self) -> bool {
        matches!(self, Self::Float | Self::F32 | Self::F64)
    }
}

impl fmt::Display for DType {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DType {
    type Err = MetadataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(Value::String(s.to_string()))
            .map_err(|_| MetadataError::new(format!("unsupported dtype {s}")))
    }
}

bitflags! {
    /// Behavioral flags of a topic.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct MetaFlags: u8 {
        /// Read-only for user interfaces. Not enforced by the broker.
        const RO = 1 << 0;
        /// Omitted from snapshots together with its subtree.
        const HIDE = 1 << 1;
        /// Developer option.
        const DEV = 1 << 2;
        /// Never captured into undo history.
        const SKIP_UNDO = 1 << 3;
        /// Transient value; written as null and never restored.
        const TMP = 1 << 4;
        /// Instances do not inherit the class value.
        const NOINIT = 1 << 5;
    }
}

impl Serialize for MetaFlags {
    fn serialize<S: Serializer>(
        &self,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let names: Vec<String> = self
            .iter_names()
            .map(|(name, _)| name.to_ascii_lowercase())
            .collect();
        names.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for MetaFlags {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let names = Vec::<String>::deserialize(deserializer)?;
        names.iter().try_fold(MetaFlags::empty(), |acc, name| {
            MetaFlags::from_name(&name.to_ascii_uppercase())
                .map(|flag| acc | flag)
                .ok_or_else(|| de::Error::custom(format!("unknown flag '{name}'")))
        })
    }
}

/// Per-topic value contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "MetadataMap", into = "MetadataMap")]
pub struct Metadata {
    pub dtype: DType,
    pub brief: Option<String>,
    pub detail: Option<String>,
    pub default: Option<Value>,
    /// Each option is `[canonical, alias...]`.
    pub options: Option<Vec<Vec<Value>>>,
    /// Inclusive `[min, max, step]`.
    pub range: Option<[i64; 3]>,
    pub format: Option<String>,
    pub flags: MetaFlags,
}

/// Wire form of [`Metadata`]: absent keys are omitted.
#[derive(Serialize, Deserialize)]
struct MetadataMap {
    dtype: DType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    brief: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    default: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    options: Option<Vec<Vec<Value>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    range: Option<Vec<i64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    format: Option<String>,
    #[serde(default, skip_serializing_if = "MetaFlags::is_empty")]
    flags: MetaFlags,
}

impl TryFrom<MetadataMap> for Metadata {
    type Error = MetadataError;

    fn try_from(map: MetadataMap) -> Result<Self, Self::Error> {
        let range = match map.range.as_deref() {
            Option::None => Option::None,
            Some([min, max]) => Some([*min, *max, 1]),
            Some([min, max, step]) => Some([*min, *max, *step]),
            Some(other) => {
                return Err(MetadataError::new(format!(
                    "range needs 2 or 3 entries, got {}",
                    other.len()
                )))
            }
        };
        Metadata {
            dtype: map.dtype,
            brief: map.brief,
            detail: map.detail,
            default: map.default,
            options: map.options,
            range,
            format: map.format,
            flags: map.flags,
        }
        .checked()
    }
}

impl From<Metadata> for MetadataMap {
    fn from(meta: Metadata) -> Self {
        MetadataMap {
            dtype: meta.dtype,
            brief: meta.brief,
            detail: meta.detail,
            default: meta.default,
            options: meta.options,
            range: meta.range.map(|r| r.to_vec()),
            format: meta.format,
            flags: meta.flags,
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Construction
////////////////////////////////////////////////////////////////////////////////

impl Metadata {
    pub fn new(
        dtype: DType,
        brief: impl Into<String>,
    ) -> Self {
        Self {
            dtype,
            brief: Some(brief.into()),
            detail: Option::None,
            default: Option::None,
            options: Option::None,
            range: Option::None,
            format: Option::None,
            flags: MetaFlags::empty(),
        }
    }

    /// Untyped hierarchy node.
    pub fn node(brief: impl Into<String>) -> Self {
        Self::new(DType::Node, brief)
    }

    pub fn with_detail(
        mut self,
        detail: impl Into<String>,
    ) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_default(
        mut self,
        default: impl Into<Value>,
    ) -> Self {
        self.default = Some(default.into());
        self
    }

    /// Sets the option table from a JSON array.
    ///
    /// Each entry is either `[canonical, alias...]` or a bare canonical value.
    pub fn with_options(
        mut self,
        options: Value,
    ) -> Self {
        let table = match options {
            Value::Array(items) => items
                .into_iter()
                .map(|item| match item {
                    Value::Array(aliases) => aliases,
                    other => vec![other],
                })
                .collect(),
            other => vec![vec![other]],
        };
        self.options = Some(table);
        self
    }

    pub fn with_range(
        mut self,
        min: i64,
        max: i64,
        step: i64,
    ) -> Self {
        self.range = Some([min, max, step]);
        self
    }

    pub fn with_format(
        mut self,
        format: impl Into<String>,
    ) -> Self {
        self.format = Some(format.into());
        self
    }

    pub fn with_flags(
        mut self,
        flags: MetaFlags,
    ) -> Self {
        self.flags |= flags;
        self
    }

    /// Validates the definition itself and normalizes the default.
    pub fn checked(mut self) -> Result<Self, MetadataError> {
        if let Some([min, max, step]) = self.range {
            if step <= 0 {
                return Err(MetadataError::new(format!("range step {step} must be positive")));
            }
            if min > max {
                return Err(MetadataError::new(format!("range min {min} exceeds max {max}")));
            }
        }
        if let Some(options) = &self.options {
            if options.iter().any(Vec::is_empty) {
                return Err(MetadataError::new("empty option entry"));
            }
        }
        if let Some(default) = self.default.take() {
            self.default = if default.is_null() {
                Option::None
            } else {
                Some(self.validate(&default)?)
            };
        }
        Ok(self)
    }

    /// Parses metadata from its JSON map form.
    pub fn from_value(value: Value) -> Result<Self, MetadataError> {
        serde_json::from_value(value).map_err(|e| MetadataError::new(e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self, MetadataError> {
        serde_json::from_str(json).map_err(|e| MetadataError::new(e.to_string()))
    }

    /// JSON map form; absent attributes are omitted.
    pub fn to_map(&self) -> Value {
        serde_json::to_value(self).unwrap_or_default()
    }

    pub fn has_flag(
        &self,
        flag: MetaFlags,
    ) -> bool {
        self.flags.contains(flag)
    }

    /// Value a freshly added topic starts with.
    pub fn initial_value(&self) -> Value {
        self.default.clone().unwrap_or(Value::Null)
    }
}

////////////////////////////////////////////////////////////////////////////////
// Validation
////////////////////////////////////////////////////////////////////////////////

impl Metadata {
    /// Validates a candidate value and returns its normalized form.
    pub fn validate(
        &self,
        value: &Value,
    ) -> Result<Value, ValidationError> {
        self.validate_with_current(value, Option::None)
    }

    /// Like [`validate`](Self::validate), resolving bool toggle tokens
    /// against `current`.
    pub fn validate_with_current(
        &self,
        value: &Value,
        current: Option<&Value>,
    ) -> Result<Value, ValidationError> {
        if self.dtype == DType::Bool && is_toggle(value) {
            let current = current.unwrap_or(&Value::Null);
            let flipped = !to_bool(current).ok_or_else(|| self.reject(current, "not a bool"))?;
            return Ok(Value::Bool(flipped));
        }
        let value = self.resolve_options(value)?;
        let value = self.convert(value)?;
        if self.dtype == DType::UniqueStrings {
            self.check_unique(&value)?;
        }
        if self.range.is_some() {
            self.check_range(&value)?;
        }
        Ok(value)
    }

    fn reject(
        &self,
        value: &Value,
        reason: impl Into<String>,
    ) -> ValidationError {
        ValidationError::new(self.dtype.as_str(), value::preview(value), reason)
    }

    fn lookup_option(
        &self,
        options: &[Vec<Value>],
        value: &Value,
    ) -> Result<Value, ValidationError> {
        options
            .iter()
            .find(|option| option.iter().any(|alias| value::loose_eq(alias, value)))
            .map(|option| option[0].clone())
            .ok_or_else(|| self.reject(value, "not in options"))
    }

    fn resolve_options(
        &self,
        value: &Value,
    ) -> Result<Value, ValidationError> {
        let Some(options) = &self.options else {
            return Ok(value.clone());
        };
        if self.dtype != DType::UniqueStrings {
            return self.lookup_option(options, value);
        }
        match value {
            Value::Array(items) => items
                .iter()
                .map(|item| self.lookup_option(options, item))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            other => Err(self.reject(other, "expected a list")),
        }
    }

    fn convert(
        &self,
        value: Value,
    ) -> Result<Value, ValidationError> {
        match self.dtype {
            DType::Obj | DType::Font => Ok(value),
            DType::Str => match value {
                Value::Null | Value::String(_) => Ok(value),
                other => Err(self.reject(&other, "expected a string")),
            },
            DType::Bytes | DType::Bin => self.convert_bytes(value),
            DType::Float | DType::F32 | DType::F64 => {
                let f = to_float(&value).ok_or_else(|| self.reject(&value, "not a number"))?;
                serde_json::Number::from_f64(f)
                    .map(Value::Number)
                    .ok_or_else(|| self.reject(&value, "not a finite number"))
            }
            DType::Int => {
                let i = to_int(&value).ok_or_else(|| self.reject(&value, "not an integer"))?;
                value::from_i128(i).ok_or_else(|| self.reject(&value, "exceeds 64 bits"))
            }
            DType::U8
            | DType::U16
            | DType::U32
            | DType::U64
            | DType::I8
            | DType::I16
            | DType::I32
            | DType::I64 => {
                let i = to_int(&value).ok_or_else(|| self.reject(&value, "not an integer"))?;
                if let Some((min, max)) = self.dtype.int_bounds() {
                    if !(min <= i && i < max) {
                        return Err(self.reject(&value, format!("out of range [{min}, {max})")));
                    }
                }
                value::from_i128(i).ok_or_else(|| self.reject(&value, "exceeds 64 bits"))
            }
            DType::Bool => to_bool(&value)
                .map(Value::Bool)
                .ok_or_else(|| self.reject(&value, "not a bool")),
            DType::Color => to_color(&value).ok_or_else(|| self.reject(&value, "invalid color")),
            DType::None => match value {
                Value::Null => Ok(value),
                other => Err(self.reject(&other, "event topics carry no value")),
            },
            DType::Node => match value {
                Value::Null => Ok(value),
                other => Err(self.reject(&other, "cannot assign a value to a node")),
            },
            DType::UniqueStrings => match value {
                Value::Array(items) => {
                    if let Some(bad) = items.iter().find(|i| !(i.is_string() || i.is_null())) {
                        return Err(self.reject(bad, "expected a string"));
                    }
                    Ok(Value::Array(items))
                }
                other => Err(self.reject(&other, "expected a list")),
            },
        }
    }

    fn convert_bytes(
        &self,
        value: Value,
    ) -> Result<Value, ValidationError> {
        match &value {
            Value::Null => Ok(value),
            Value::Array(items) => {
                let ok = items
                    .iter()
                    .all(|b| b.as_u64().is_some_and(|b| b <= u8::MAX as u64));
                if ok {
                    Ok(value)
                } else {
                    Err(self.reject(&value, "expected bytes"))
                }
            }
            _ => Err(self.reject(&value, "expected bytes")),
        }
    }

    fn check_unique(
        &self,
        value: &Value,
    ) -> Result<(), ValidationError> {
        if let Value::Array(items) = value {
            for (idx, item) in items.iter().enumerate() {
                if items[..idx].contains(item) {
                    return Err(self.reject(value, "contains duplicates"));
                }
            }
        }
        Ok(())
    }

    fn check_range(
        &self,
        value: &Value,
    ) -> Result<(), ValidationError> {
        let Some([min, max, step]) = self.range else {
            return Ok(());
        };
        let Value::Number(n) = value else {
            return Err(self.reject(value, "range requires a number"));
        };
        let in_range = match value::as_i128(n) {
            Some(i) => {
                let (min, max, step) = (min as i128, max as i128, step as i128);
                if !(min..=max).contains(&i) {
                    false
                } else {
                    return if (i - min) % step == 0 {
                        Ok(())
                    } else {
                        Err(self.reject(value, format!("not on increment {step} from {min}")))
                    };
                }
            }
            Option::None => {
                let f = n.as_f64().unwrap_or(f64::NAN);
                if !(min as f64 <= f && f <= max as f64) {
                    false
                } else {
                    return if ((f - min as f64) % step as f64) == 0.0 {
                        Ok(())
                    } else {
                        Err(self.reject(value, format!("not on increment {step} from {min}")))
                    };
                }
            }
        };
        debug_assert!(!in_range);
        Err(self.reject(value, format!("out of range [{min}, {max}]")))
    }
}

fn is_toggle(value: &Value) -> bool {
    value
        .as_str()
        .is_some_and(|s| TOGGLE_TOKENS.contains(&s))
}

fn to_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Null => Some(false),
        Value::Bool(b) => Some(*b),
        Value::Number(n) => match n.as_f64() {
            Some(x) if x == 0.0 => Some(false),
            Some(x) if x == 1.0 => Some(true),
            _ => Option::None,
        },
        Value::String(s) => {
            let s = s.to_ascii_lowercase();
            if FALSY.contains(&s.as_str()) {
                Some(false)
            } else if TRUTHY.contains(&s.as_str()) {
                Some(true)
            } else {
                Option::None
            }
        }
        _ => Option::None,
    }
}

fn to_float(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => Option::None,
    }
}

/// Integer conversion: floats truncate toward zero, strings must parse as
/// integers.
fn to_int(value: &Value) -> Option<i128> {
    match value {
        Value::Number(n) => value::as_i128(n).or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && f.abs() < 1e38)
                .map(|f| f.trunc() as i128)
        }),
        Value::Bool(b) => Some(*b as i128),
        Value::String(s) => s.trim().parse::<i128>().ok(),
        _ => Option::None,
    }
}

fn to_color(value: &Value) -> Option<Value> {
    let (a, r, g, b) = match value {
        Value::String(s) => parse_hex_color(s)?,
        Value::Array(items) if items.len() == 3 || items.len() == 4 => {
            let mut c = [255u8; 4];
            for (slot, item) in c.iter_mut().zip(items) {
                *slot = u8::try_from(item.as_u64()?).ok()?;
            }
            (c[3], c[0], c[1], c[2])
        }
        _ => return Option::None,
    };
    Some(Value::String(format!("#{a:02x}{r:02x}{g:02x}{b:02x}")))
}

fn parse_hex_color(s: &str) -> Option<(u8, u8, u8, u8)> {
    let hex = s.trim().strip_prefix('#')?;
    let byte = |i: usize| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok();
    match hex.len() {
        3 => {
            let nibble = |i: usize| {
                let n = u8::from_str_radix(hex.get(i..i + 1)?, 16).ok()?;
                Some(n * 17)
            };
            Some((255, nibble(0)?, nibble(1)?, nibble(2)?))
        }
        6 => Some((255, byte(0)?, byte(2)?, byte(4)?)),
        8 => Some((byte(0)?, byte(2)?, byte(4)?, byte(6)?)),
        _ => Option::None,
    }
}

////////////////////////////////////////////////////////////////////////////////
// Tests
////////////////////////////////////////////////////////////////////////////////
