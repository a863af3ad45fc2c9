use crate::error::{Error, Result};
use serde_derive::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

pub const CLASS_COUNT: usize = 5;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum ObjectClass {
    Bus,
    Car,
    Motorcycle,
    Person,
    Truck,
}

impl ObjectClass {
    pub const ALL: [ObjectClass; CLASS_COUNT] = [
        ObjectClass::Bus,
        ObjectClass::Car,
        ObjectClass::Motorcycle,
        ObjectClass::Person,
        ObjectClass::Truck,
    ];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    #[inline]
    pub fn name(self) -> &'static str {
        match self {
            ObjectClass::Bus => "bus",
            ObjectClass::Car => "car",
            ObjectClass::Motorcycle => "motorcycle",
            ObjectClass::Person => "person",
            ObjectClass::Truck => "truck",
        }
    }
}

impl fmt::Display for ObjectClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ObjectClass {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        ObjectClass::ALL
            .iter()
            .copied()
            .find(|c| c.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| Error::config(format!("unknown object class `{}`", s)))
    }
}

/// Maps raw detector class ids onto the closed [`ObjectClass`] set.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassMap {
    map: BTreeMap<i32, ObjectClass>,
}

impl ClassMap {
    pub fn new(map: BTreeMap<i32, ObjectClass>) -> Result<Self> {
        if map.is_empty() {
            return Err(Error::config("class map is empty"));
        }

        Ok(Self { map })
    }

    /// Custom five-class model: 0 bus, 1 car, 2 motorcycle, 3 person, 4 truck.
    pub fn identity() -> Self {
        Self {
            map: ObjectClass::ALL
                .iter()
                .map(|c| (c.index() as i32, *c))
                .collect(),
        }
    }

    pub fn coco() -> Self {
        let map = [
            (0, ObjectClass::Person),
            (2, ObjectClass::Car),
            (3, ObjectClass::Motorcycle),
            (5, ObjectClass::Bus),
            (7, ObjectClass::Truck),
        ];

        Self {
            map: map.into_iter().collect(),
        }
    }

    /// Parses `{ "<id>": "<class name>", ... }`.
    pub fn from_json(src: &str) -> Result<Self> {
        Self::from_names(serde_json::from_str(src)?)
    }

    pub fn from_names(raw: BTreeMap<String, String>) -> Result<Self> {
        let mut map = BTreeMap::new();

        for (id, name) in raw {
            let id = id
                .trim()
                .parse::<i32>()
                .map_err(|_| Error::config(format!("class id `{}` is not an integer", id)))?;

            map.insert(id, name.parse()?);
        }

        Self::new(map)
    }

    #[inline]
    pub fn get(&self, class_id: i32) -> Option<ObjectClass> {
        self.map.get(&class_id).copied()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl Default for ClassMap {
    fn default() -> Self {
        Self::identity()
    }
}
