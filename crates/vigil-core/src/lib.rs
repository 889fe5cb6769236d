use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use serde::de;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

pub mod api;
pub mod history;
pub mod stream;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ObjectType {
    Person,
    Animal,
    Vehicle,
}

impl ObjectType {
    pub const ALL: [ObjectType; 3] = [ObjectType::Person, ObjectType::Animal, ObjectType::Vehicle];

    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectType::Person => "person",
            ObjectType::Animal => "animal",
            ObjectType::Vehicle => "vehicle",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ObjectType::Person => "Person",
            ObjectType::Animal => "Animal",
            ObjectType::Vehicle => "Vehicle",
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ObjectType {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let normalized = input.trim().to_lowercase();
        match normalized.as_str() {
            "person" | "persons" | "people" => Ok(ObjectType::Person),
            "animal" | "animals" => Ok(ObjectType::Animal),
            "vehicle" | "vehicles" => Ok(ObjectType::Vehicle),
            other => Err(format!("Unknown object type: {other}")),
        }
    }
}

/// Full snapshot of the current per-class tallies. Always replaced as a
/// whole, never patched field by field.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DetectionCounts {
    pub person: u32,
    pub animal: u32,
    pub vehicle: u32,
}

impl DetectionCounts {
    pub fn new(person: u32, animal: u32, vehicle: u32) -> Self {
        Self {
            person,
            animal,
            vehicle,
        }
    }

    pub fn get(&self, object_type: ObjectType) -> u32 {
        match object_type {
            ObjectType::Person => self.person,
            ObjectType::Animal => self.animal,
            ObjectType::Vehicle => self.vehicle,
        }
    }

    pub fn total(&self) -> u32 {
        self.person
            .saturating_add(self.animal)
            .saturating_add(self.vehicle)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Alert {
    pub rule_name: String,
    pub object_type: ObjectType,
    #[serde(deserialize_with = "deserialize_count")]
    pub count: u32,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Alert {
    /// Dedup identity: the same rule firing at the same instant is the same alert.
    pub fn identity(&self) -> (&str, DateTime<Utc>) {
        (self.rule_name.as_str(), self.timestamp)
    }

    pub fn summary(&self) -> String {
        format!("{}: {} detected", self.object_type.label(), self.count)
    }
}

/// The latest pushed image. Payload stays encoded; nothing in the client
/// looks inside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamFrame {
    pub data: String,
    pub received_at: DateTime<Utc>,
}

impl StreamFrame {
    pub fn new(data: String, received_at: DateTime<Utc>) -> Self {
        Self { data, received_at }
    }

    /// Decoded size estimate for a base64 payload.
    pub fn approx_bytes(&self) -> usize {
        let padding = self.data.bytes().rev().take_while(|byte| *byte == b'=').count();
        (self.data.len() / 4 * 3).saturating_sub(padding)
    }
}

/// Accepts RFC 3339 timestamps and naive ISO-8601 ones. Naive values are
/// wall-clock time in the local zone; one that falls in a DST gap is read as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(parsed.with_timezone(&Utc));
    }
    let naive = trimmed.parse::<NaiveDateTime>().ok()?;
    Some(
        Local
            .from_local_datetime(&naive)
            .earliest()
            .map(|local| local.with_timezone(&Utc))
            .unwrap_or_else(|| naive.and_utc()),
    )
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw).ok_or_else(|| de::Error::custom(format!("invalid timestamp '{raw}'")))
}

fn deserialize_count<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let count = u32::deserialize(deserializer)?;
    if count == 0 {
        return Err(de::Error::custom("alert count must be at least 1"));
    }
    Ok(count)
}
