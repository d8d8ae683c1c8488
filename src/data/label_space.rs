// Label space: dense ids for the observed label strings
//
// Ids follow byte-wise sorted label order, so the same label set always
// yields the same assignment. Rebuilt from scratch for every run.

use serde::de::{self, Deserializer};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

use crate::errors::{PipelineError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelSpace {
    id_to_label: Vec<String>,
    label_to_id: HashMap<String, u32>,
}

impl LabelSpace {
    /// Build from observed labels (duplicates allowed, any order)
    pub fn from_labels<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let distinct: BTreeSet<String> = labels
            .into_iter()
            .map(|l| l.as_ref().to_string())
            .collect();
        let id_to_label: Vec<String> = distinct.into_iter().collect();
        let label_to_id = index(&id_to_label);
        Self {
            id_to_label,
            label_to_id,
        }
    }

    /// Rebuild from an id-ordered label list (as stored in `label_mapping.json`)
    pub fn from_id_to_label(id_to_label: Vec<String>) -> Result<Self> {
        let label_to_id = index(&id_to_label);
        if label_to_id.len() != id_to_label.len() {
            return Err(PipelineError::config(
                "label mapping assigns the same label to more than one id",
            ));
        }
        Ok(Self {
            id_to_label,
            label_to_id,
        })
    }

    pub fn len(&self) -> usize {
        self.id_to_label.len()
    }

    pub fn is_empty(&self) -> bool {
        self.id_to_label.is_empty()
    }

    pub fn id(&self, label: &str) -> Option<u32> {
        self.label_to_id.get(label).copied()
    }

    pub fn label(&self, id: u32) -> Option<&str> {
        self.id_to_label.get(id as usize).map(String::as_str)
    }

    /// Labels in id order
    pub fn labels(&self) -> &[String] {
        &self.id_to_label
    }

    /// `{"0": "neg", ...}` in id order, for HF-style `id2label`
    pub fn id2label(&self) -> serde_json::Map<String, serde_json::Value> {
        self.id_to_label
            .iter()
            .enumerate()
            .map(|(id, label)| (id.to_string(), serde_json::Value::String(label.clone())))
            .collect()
    }

    /// `{"neg": 0, ...}` in id order, for HF-style `label2id`
    pub fn label2id(&self) -> serde_json::Map<String, serde_json::Value> {
        self.id_to_label
            .iter()
            .enumerate()
            .map(|(id, label)| (label.clone(), serde_json::Value::from(id)))
            .collect()
    }
}

fn index(id_to_label: &[String]) -> HashMap<String, u32> {
    id_to_label
        .iter()
        .enumerate()
        .map(|(id, label)| (label.clone(), id as u32))
        .collect()
}

impl Serialize for LabelSpace {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.id_to_label.len()))?;
        for (id, label) in self.id_to_label.iter().enumerate() {
            map.serialize_entry(&id.to_string(), label)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for LabelSpace {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw: HashMap<String, String> = HashMap::deserialize(deserializer)?;

        let mut entries = Vec::with_capacity(raw.len());
        for (key, label) in raw {
            let id: usize = key
                .parse()
                .map_err(|_| de::Error::custom(format!("label id '{}' is not an integer", key)))?;
            entries.push((id, label));
        }
        entries.sort_by_key(|(id, _)| *id);

        for (expected, (id, _)) in entries.iter().enumerate() {
            if *id != expected {
                return Err(de::Error::custom(format!(
                    "label ids must be dense 0..{}, missing id {}",
                    entries.len(),
                    expected
                )));
            }
        }

        let id_to_label = entries.into_iter().map(|(_, label)| label).collect();
        LabelSpace::from_id_to_label(id_to_label).map_err(de::Error::custom)
    }
}
