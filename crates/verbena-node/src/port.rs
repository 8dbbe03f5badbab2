//! Typed ports.

use serde::{Deserialize, Serialize};

/// The data taxonomy carried between ports. `Any` is the open type and is
/// compatible with everything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
  Any,
  Bool,
  Number,
  String,
  Record,
  Sequence,
}

impl DataType {
  /// Whether a link between two ports of these types is allowed.
  pub fn compatible_with(self, other: DataType) -> bool {
    self == DataType::Any || other == DataType::Any || self == other
  }
}

/// Link taxonomy. Only standard data links exist today.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkType {
  #[default]
  Standard,
}

/// A named input or output on a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Port {
  pub name: String,
  pub data_type: DataType,
  #[serde(default)]
  pub link_type: LinkType,
}

impl Port {
  pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
    Self {
      name: name.into(),
      data_type,
      link_type: LinkType::Standard,
    }
  }
}
