//! Compile-time constant values.

use std::fmt;
use std::hash::{Hash, Hasher};

use crate::arena::Handle;
use crate::hash::KeyBuilder;
use crate::param::DataParameter;
use crate::program::Program;
use crate::types::ScalarKind;

/// One scalar component of a constant. Floats compare and hash by bit
/// pattern so values can key memoization maps.
#[derive(Clone, Copy, Debug)]
pub enum Component {
    Undefined,
    Bool(bool),
    Int(i32),
    Uint(u32),
    Float(f32),
}

impl Component {
    fn bits(&self) -> (u8, u32) {
        match *self {
            Self::Undefined => (0, 0),
            Self::Bool(b) => (1, b as u32),
            Self::Int(i) => (2, i as u32),
            Self::Uint(u) => (3, u),
            Self::Float(f) => (4, f.to_bits()),
        }
    }

    pub fn is_defined(&self) -> bool {
        !matches!(self, Self::Undefined)
    }

    pub fn kind(&self) -> Option<ScalarKind> {
        match self {
            Self::Undefined => None,
            Self::Bool(_) => Some(ScalarKind::Bool),
            Self::Int(_) => Some(ScalarKind::Int),
            Self::Uint(_) => Some(ScalarKind::Uint),
            Self::Float(_) => Some(ScalarKind::Float),
        }
    }

    /// Value conversion as performed by constructors (`float(3)`, `uint(x)`).
    pub fn convert(self, kind: ScalarKind) -> Self {
        match (self, kind) {
            (Self::Undefined, _) => Self::Undefined,
            (Self::Bool(b), ScalarKind::Bool) => Self::Bool(b),
            (Self::Bool(b), ScalarKind::Int) => Self::Int(b as i32),
            (Self::Bool(b), ScalarKind::Uint) => Self::Uint(b as u32),
            (Self::Bool(b), ScalarKind::Float) => Self::Float(if b { 1.0 } else { 0.0 }),
            (Self::Int(i), ScalarKind::Bool) => Self::Bool(i != 0),
            (Self::Int(i), ScalarKind::Int) => Self::Int(i),
            (Self::Int(i), ScalarKind::Uint) => Self::Uint(i as u32),
            (Self::Int(i), ScalarKind::Float) => Self::Float(i as f32),
            (Self::Uint(u), ScalarKind::Bool) => Self::Bool(u != 0),
            (Self::Uint(u), ScalarKind::Int) => Self::Int(u as i32),
            (Self::Uint(u), ScalarKind::Uint) => Self::Uint(u),
            (Self::Uint(u), ScalarKind::Float) => Self::Float(u as f32),
            (Self::Float(f), ScalarKind::Bool) => Self::Bool(f != 0.0),
            (Self::Float(f), ScalarKind::Int) => Self::Int(f as i32),
            (Self::Float(f), ScalarKind::Uint) => Self::Uint(f as u32),
            (Self::Float(f), ScalarKind::Float) => Self::Float(f),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            Self::Bool(b) => Some(b),
            Self::Int(i) => Some(i != 0),
            Self::Uint(u) => Some(u != 0),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Self::Int(i) => Some(i as i64),
            Self::Uint(u) => Some(u as i64),
            Self::Bool(b) => Some(b as i64),
            _ => None,
        }
    }

    pub fn as_f32(&self) -> Option<f32> {
        match *self {
            Self::Float(f) => Some(f),
            Self::Int(i) => Some(i as f32),
            Self::Uint(u) => Some(u as f32),
            _ => None,
        }
    }
}

impl PartialEq for Component {
    fn eq(&self, other: &Self) -> bool {
        self.bits() == other.bits()
    }
}

impl Eq for Component {}

impl Hash for Component {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.bits().hash(state);
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::Undefined => write!(f, "<undefined>"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Uint(u) => write!(f, "{u}u"),
            Self::Float(v) => {
                if v.is_finite() && v == v.trunc() && v.abs() < 1.0e7 {
                    write!(f, "{v:.1}")
                } else {
                    write!(f, "{v:?}")
                }
            }
        }
    }
}

/// A constant of any type: a flat component list for numeric data
/// (vectors, matrices column-major, arrays and structures flattened), a
/// program reference, or a static reference to a bound resource.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum DataValue {
    Components(Vec<Component>),
    Program(Handle<Program>),
    Resource(Handle<DataParameter>),
}

impl DataValue {
    pub fn scalar(c: Component) -> Self {
        Self::Components(vec![c])
    }

    pub fn float(v: f32) -> Self {
        Self::scalar(Component::Float(v))
    }

    pub fn int(v: i32) -> Self {
        Self::scalar(Component::Int(v))
    }

    pub fn uint(v: u32) -> Self {
        Self::scalar(Component::Uint(v))
    }

    pub fn bool(v: bool) -> Self {
        Self::scalar(Component::Bool(v))
    }

    /// `count` undefined components.
    pub fn undefined(count: usize) -> Self {
        Self::Components(vec![Component::Undefined; count])
    }

    pub fn components(&self) -> &[Component] {
        match self {
            Self::Components(c) => c,
            Self::Program(_) | Self::Resource(_) => &[],
        }
    }

    /// A value is fully defined when no component is undefined.
    pub fn is_defined(&self) -> bool {
        match self {
            Self::Components(c) => c.iter().all(Component::is_defined),
            Self::Program(_) | Self::Resource(_) => true,
        }
    }

    pub fn as_scalar(&self) -> Option<Component> {
        match self {
            Self::Components(c) if c.len() == 1 => Some(c[0]),
            _ => None,
        }
    }

    /// Serializes the value into a structural key.
    pub fn write_key(&self, key: &mut KeyBuilder, program_name: impl Fn(Handle<Program>) -> String) {
        match self {
            Self::Components(c) => {
                key.u8(0).u32(c.len() as u32);
                for comp in c {
                    let (tag, bits) = comp.bits();
                    key.u8(tag).u32(bits);
                }
            }
            Self::Program(p) => {
                key.u8(1).str(&program_name(*p));
            }
            Self::Resource(r) => {
                key.u8(2).u32(r.raw());
            }
        }
    }
}

impl fmt::Display for DataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Components(c) if c.len() == 1 => write!(f, "{}", c[0]),
            Self::Components(c) => {
                write!(f, "(")?;
                for (i, comp) in c.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{comp}")?;
                }
                write!(f, ")")
            }
            Self::Program(p) => write!(f, "program{p:?}"),
            Self::Resource(r) => write!(f, "resource{r:?}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn float_components_compare_by_bits() {
        assert_eq!(Component::Float(0.5), Component::Float(0.5));
        assert_ne!(Component::Float(0.0), Component::Float(-0.0));
        assert_ne!(Component::Int(1), Component::Uint(1));
    }

    #[test]
    fn definedness_checks_every_component() {
        let mut v = DataValue::undefined(3);
        assert!(!v.is_defined());
        v = DataValue::Components(vec![Component::Float(1.0); 3]);
        assert!(v.is_defined());
    }

    #[test]
    fn conversions_follow_constructor_rules() {
        assert_eq!(Component::Float(2.7).convert(ScalarKind::Int), Component::Int(2));
        assert_eq!(Component::Int(-1).convert(ScalarKind::Uint), Component::Uint(u32::MAX));
        assert_eq!(Component::Bool(true).convert(ScalarKind::Float), Component::Float(1.0));
    }

    #[test]
    fn display_keeps_float_suffix() {
        assert_eq!(DataValue::float(1.0).to_string(), "1.0");
        assert_eq!(DataValue::float(0.25).to_string(), "0.25");
        assert_eq!(DataValue::uint(3).to_string(), "3u");
    }
}
