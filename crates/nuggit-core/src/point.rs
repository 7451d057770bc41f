//! The value type a pipe's terminal exchange produces.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scalar {
    Bytes,
    #[default]
    String,
    Bool,
    Int64,
    Uint64,
    Float64,
}

impl Scalar {
    pub fn as_str(self) -> &'static str {
        match self {
            Scalar::Bytes => "bytes",
            Scalar::String => "string",
            Scalar::Bool => "bool",
            Scalar::Int64 => "int64",
            Scalar::Uint64 => "uint64",
            Scalar::Float64 => "float64",
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scalar {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "bytes" => Scalar::Bytes,
            "" | "string" => Scalar::String,
            "bool" => Scalar::Bool,
            "int64" => Scalar::Int64,
            "uint64" => Scalar::Uint64,
            "float64" => Scalar::Float64,
            other => return Err(Error::invalid(format!("unknown scalar: {:?}", other))),
        })
    }
}

/// Nullability, cardinality, and scalar type of a pipe's result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Point {
    #[serde(default, skip_serializing_if = "is_false")]
    pub nullable: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub repeated: bool,
    #[serde(default)]
    pub scalar: Scalar,
}

fn is_false(b: &bool) -> bool {
    !*b
}

impl Point {
    pub fn scalar(scalar: Scalar) -> Self {
        Self {
            scalar,
            ..Default::default()
        }
    }

    pub fn repeated(scalar: Scalar) -> Self {
        Self {
            repeated: true,
            scalar,
            ..Default::default()
        }
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.nullable {
            f.write_str("nullable ")?;
        }
        if self.repeated {
            f.write_str("repeated ")?;
        }
        f.write_str(self.scalar.as_str())
    }
}
