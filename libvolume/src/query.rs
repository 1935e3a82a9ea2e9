//! Volume lookup queries.
//!
//! Callers look volumes up with a set of `(key, value)` parameters whose keys
//! are the [`OptionKey`] names.  All supplied criteria must match; repeated
//! `VolumeID` parameters are alternatives.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::error::VolumeError;
use crate::types::{Volume, VolumeId};

/// Recognised query parameter names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OptionKey {
    /// Look up by locator name.
    Name,
    /// Look up by volume ID.
    VolumeId,
    /// Look up by locator labels.
    Label,
    /// Look up by spec config labels.
    ConfigLabel,
}

impl OptionKey {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Name => "Name",
            Self::VolumeId => "VolumeID",
            Self::Label => "Label",
            Self::ConfigLabel => "ConfigLabel",
        }
    }
}

impl fmt::Display for OptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OptionKey {
    type Err = VolumeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Name" => Ok(Self::Name),
            "VolumeID" => Ok(Self::VolumeId),
            "Label" => Ok(Self::Label),
            "ConfigLabel" => Ok(Self::ConfigLabel),
            other => Err(VolumeError::Validation(format!(
                "unknown query parameter {other}"
            ))),
        }
    }
}

/// Parsed volume lookup.  An empty query matches every volume.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VolumeQuery {
    pub name: Option<String>,
    pub ids: Vec<VolumeId>,
    pub labels: HashMap<String, String>,
    pub config_labels: HashMap<String, String>,
}

impl VolumeQuery {
    /// Build a query from raw `(key, value)` parameters.
    ///
    /// `Label` and `ConfigLabel` values are comma separated `key=value`
    /// lists; repeated label parameters accumulate.
    pub fn from_params<I, K, V>(params: I) -> Result<Self, VolumeError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut query = Self::default();
        for (key, value) in params {
            let value = value.as_ref();
            match key.as_ref().parse::<OptionKey>()? {
                OptionKey::Name => query.name = Some(value.to_owned()),
                OptionKey::VolumeId => query.ids.push(VolumeId::from(value)),
                OptionKey::Label => query.labels.extend(parse_labels(value)?),
                OptionKey::ConfigLabel => query.config_labels.extend(parse_labels(value)?),
            }
        }
        Ok(query)
    }

    pub fn matches(&self, volume: &Volume) -> bool {
        if let Some(name) = &self.name
            && volume.locator.name != *name
        {
            return false;
        }
        if !self.ids.is_empty() && !self.ids.contains(&volume.id) {
            return false;
        }
        contains_all(&volume.locator.volume_labels, &self.labels)
            && contains_all(&volume.spec.config_labels, &self.config_labels)
    }
}

fn contains_all(have: &HashMap<String, String>, want: &HashMap<String, String>) -> bool {
    want.iter().all(|(k, v)| have.get(k) == Some(v))
}

/// Parse `a=1,b=2` into a label map.
pub fn parse_labels(text: &str) -> Result<HashMap<String, String>, VolumeError> {
    let mut labels = HashMap::new();
    for pair in text.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let Some((k, v)) = pair.split_once('=') else {
            return Err(VolumeError::Validation(format!(
                "label {pair:?} is not of the form key=value"
            )));
        };
        let k = k.trim();
        if k.is_empty() {
            return Err(VolumeError::Validation(format!("label {pair:?} has an empty key")));
        }
        labels.insert(k.to_owned(), v.trim().to_owned());
    }
    Ok(labels)
}
