use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;
use std::ops::Index;
use std::sync::Arc;

use crate::error::{Error, Result};

/// Ordered set of unique names with O(1) name → column lookup.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Labels {
    names: Vec<String>,
    index: HashMap<String, usize>,
}

impl Labels {
    /// Builds the label set, rejecting duplicate names.
    pub fn new<I, S>(names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut labels = Labels::default();
        for name in names {
            let name = name.into();
            if labels.index.contains_key(&name) {
                return Err(Error::invalid_input(format!("duplicate label `{name}`")));
            }
            labels.index.insert(name.clone(), labels.names.len());
            labels.names.push(name);
        }
        Ok(labels)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// A numeric vector whose columns carry names.
///
/// Column order is the order of the [`Labels`] it was built with, so the same
/// value can be handed to code that indexes by position and to code that
/// looks values up by name.
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledVector {
    labels: Arc<Labels>,
    values: Vec<f64>,
}

impl LabeledVector {
    pub fn new(labels: Arc<Labels>, values: Vec<f64>) -> Result<Self> {
        if labels.len() != values.len() {
            return Err(Error::DimensionMismatch {
                expected: labels.len(),
                found: values.len(),
            });
        }
        Ok(Self { labels, values })
    }

    /// Builds a vector from `(name, value)` pairs, keeping their order.
    pub fn from_pairs<I, S>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        let (names, values): (Vec<String>, Vec<f64>) =
            pairs.into_iter().map(|(n, v)| (n.into(), v)).unzip();
        Ok(Self {
            labels: Arc::new(Labels::new(names)?),
            values,
        })
    }

    pub fn labels(&self) -> &Arc<Labels> {
        &self.labels
    }

    pub fn names(&self) -> &[String] {
        self.labels.names()
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn into_values(self) -> Vec<f64> {
        self.values
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.labels.position(name).map(|i| self.values[i])
    }

    /// Like [`get`](Self::get) but reports the missing name as an error.
    pub fn value(&self, name: &str) -> Result<f64> {
        self.get(name)
            .ok_or_else(|| Error::MissingValue(name.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> + '_ {
        self.labels
            .names()
            .iter()
            .map(String::as_str)
            .zip(self.values.iter().copied())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl Index<&str> for LabeledVector {
    type Output = f64;

    /// # Panics
    /// If `name` is not one of the vector's labels.
    fn index(&self, name: &str) -> &f64 {
        match self.labels.position(name) {
            Some(i) => &self.values[i],
            None => panic!("no value labelled `{name}`"),
        }
    }
}

impl Index<usize> for LabeledVector {
    type Output = f64;

    fn index(&self, i: usize) -> &f64 {
        &self.values[i]
    }
}

impl fmt::Display for LabeledVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (name, value)) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{name}: {value}")?;
        }
        write!(f, "}}")
    }
}

impl Serialize for LabeledVector {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.len()))?;
        for (name, value) in self.iter() {
            map.serialize_entry(name, &value)?;
        }
        map.end()
    }
}

struct LabeledVectorVisitor;

impl<'de> Visitor<'de> for LabeledVectorVisitor {
    type Value = LabeledVector;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a map of variable names to numbers")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> std::result::Result<Self::Value, A::Error> {
        let mut pairs: Vec<(String, f64)> = Vec::with_capacity(access.size_hint().unwrap_or(0));
        while let Some((name, value)) = access.next_entry::<String, f64>()? {
            pairs.push((name, value));
        }
        LabeledVector::from_pairs(pairs).map_err(serde::de::Error::custom)
    }
}

impl<'de> Deserialize<'de> for LabeledVector {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_map(LabeledVectorVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_by_name_and_position() {
        let v = LabeledVector::from_pairs([("a", 1.0), ("b", 2.0), ("c", 3.0)]).unwrap();
        assert_eq!(v.get("b"), Some(2.0));
        assert_eq!(v["c"], 3.0);
        assert_eq!(v[0], 1.0);
        assert_eq!(v.get("z"), None);
        assert!(matches!(v.value("z"), Err(Error::MissingValue(_))));
    }

    #[test]
    fn test_duplicate_labels_rejected() {
        let result = LabeledVector::from_pairs([("a", 1.0), ("a", 2.0)]);
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_length_must_match_labels() {
        let labels = Arc::new(Labels::new(["x", "y"]).unwrap());
        let result = LabeledVector::new(labels, vec![1.0]);
        assert!(matches!(
            result,
            Err(Error::DimensionMismatch { expected: 2, found: 1 })
        ));
    }

    #[test]
    fn test_json_keeps_column_order() {
        let v = LabeledVector::from_pairs([("zeta", 1.5), ("alpha", -2.0)]).unwrap();
        let json = serde_json::to_string(&v).unwrap();
        assert_eq!(json, r#"{"zeta":1.5,"alpha":-2.0}"#);

        let back: LabeledVector = serde_json::from_str(&json).unwrap();
        assert_eq!(back, v);
        assert_eq!(back.names(), &["zeta".to_string(), "alpha".to_string()]);
    }
}
